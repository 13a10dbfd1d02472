use bridge::{
    DiagnosticLevel, FrameTask, IpcNames, ResultMessage, ResultSender, RingLayout, SlotRing,
    StentorState, TaskMessage, TaskReceiver, TrackState, WorkerMessage,
};
use capture::{
    CaptureSource, Dispatched, FrameLogger, FrameProducer, LatestMask, Organism, PipelineChannels,
    PipelineObserver, ProducerConfig, ResultDispatcher, ShmReady, SyntheticSource, Tick,
    WorkerStop, WorkerSupervisor,
};
use image::Luma;
use serial_test::serial;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const WIDTH: u32 = 64;
const HEIGHT: u32 = 48;

#[derive(Default)]
struct RecordingObserver {
    ready: Mutex<Vec<ShmReady>>,
    tasks: Mutex<Vec<u64>>,
    results: Mutex<Vec<u64>>,
    logs: Mutex<Vec<(DiagnosticLevel, String)>>,
}

impl PipelineObserver for RecordingObserver {
    fn on_shm_ready(&self, ready: &ShmReady) {
        self.ready.lock().unwrap().push(ready.clone());
    }

    fn on_cv_task(&self, task: &FrameTask) {
        self.tasks.lock().unwrap().push(task.frame_index);
    }

    fn on_results_ready(&self, results: &ResultMessage) {
        self.results.lock().unwrap().push(results.frame_index);
    }

    fn on_log(&self, level: DiagnosticLevel, message: &str) {
        self.logs.lock().unwrap().push((level, message.to_string()));
    }
}

#[derive(Default)]
struct RecordingLogger {
    frames: Mutex<Vec<(u64, usize)>>,
}

impl FrameLogger for RecordingLogger {
    fn log_frame(&self, results: &[StentorState], frame_index: u64, _timestamp: f64) {
        self.frames.lock().unwrap().push((frame_index, results.len()));
    }
}

fn names(tag: &str) -> IpcNames {
    IpcNames::with_prefix(&format!("stentor_ct_{tag}"), std::process::id())
}

fn source() -> SyntheticSource {
    let mut source = SyntheticSource::new(WIDTH, HEIGHT, vec![Organism::round((32.0, 24.0), 10.0)]);
    assert!(source.open());
    source
}

fn producer(
    names: &IpcNames,
    channels: &PipelineChannels,
    capacity: u32,
    observer: &Arc<RecordingObserver>,
) -> FrameProducer<SyntheticSource> {
    FrameProducer::new(
        source(),
        ProducerConfig {
            names: names.clone(),
            capacity,
            fps: None,
        },
        Arc::clone(&channels.semaphore),
        Arc::clone(&channels.tasks),
        observer.clone(),
    )
}

// ============================================================================
// Producer
// ============================================================================

#[test]
#[serial]
fn test_first_frame_creates_rings_and_submits() {
    let names = names("first");
    let channels = PipelineChannels::create(&names, 3).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let mut producer = producer(&names, &channels, 3, &observer);
    let mut tasks = TaskReceiver::open(&names.task_queue).unwrap();

    assert_eq!(producer.geometry(), None);
    let tick = producer.tick().unwrap();
    assert!(matches!(tick, Tick::Submitted { frame_index: 1, .. }));
    assert_eq!(producer.geometry(), Some((WIDTH, HEIGHT)));

    let ready = observer.ready.lock().unwrap().clone();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].frame_shape, (HEIGHT, WIDTH, 3));
    assert_eq!(ready[0].mask_shape, (HEIGHT, WIDTH));
    assert_eq!(ready[0].capacity, 3);

    // The worker side sees the task and the pixels behind it.
    let Some(TaskMessage::Frame(task)) = tasks.recv_timeout(Duration::from_secs(1)).unwrap() else {
        panic!("expected a frame task");
    };
    assert_eq!(task.frame_index, 1);
    let ring = SlotRing::attach(&names.frame_ring, bridge::RingKind::Frame).unwrap();
    let mut buf = vec![0; ring.slot_size()];
    assert!(
        ring.read_validated(task.slot_index as usize, 1, &mut buf)
            .unwrap()
            .is_valid()
    );

    producer.tick().unwrap();
    assert_eq!(observer.ready.lock().unwrap().len(), 1);
    assert_eq!(*observer.tasks.lock().unwrap(), vec![1, 2]);
}

#[test]
#[serial]
fn test_exhausted_semaphore_skips_tracking() {
    let names = names("busy");
    let channels = PipelineChannels::create(&names, 2).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let mut producer = producer(&names, &channels, 2, &observer);

    assert!(matches!(producer.tick().unwrap(), Tick::Submitted { .. }));
    assert!(matches!(producer.tick().unwrap(), Tick::Submitted { .. }));
    assert_eq!(producer.tick().unwrap(), Tick::Busy { frame_index: 3 });
    assert_eq!(channels.semaphore.available().unwrap(), 0);

    // The worker finishing one frame frees a slot for the next.
    channels.semaphore.release().unwrap();
    assert!(matches!(
        producer.tick().unwrap(),
        Tick::Submitted { frame_index: 4, .. }
    ));

    let stats = producer.stats();
    assert_eq!(stats.captured, 4);
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.busy, 1);
}

#[test]
#[serial]
fn test_full_task_queue_returns_the_permit() {
    let capacity = bridge::paths::TASK_QUEUE_DEPTH as u32 + 2;
    let names = names("full");
    let channels = PipelineChannels::create(&names, capacity).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let mut producer = producer(&names, &channels, capacity, &observer);

    for _ in 0..bridge::paths::TASK_QUEUE_DEPTH {
        assert!(matches!(producer.tick().unwrap(), Tick::Submitted { .. }));
    }
    let frame_index = bridge::paths::TASK_QUEUE_DEPTH as u64 + 1;
    assert_eq!(producer.tick().unwrap(), Tick::QueueFull { frame_index });
    assert_eq!(channels.semaphore.available().unwrap(), 2);
    assert_eq!(producer.stats().queue_full, 1);
}

#[test]
#[serial]
fn test_finite_source_finishes() {
    let names = names("finite");
    let channels = PipelineChannels::create(&names, 3).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let mut source = SyntheticSource::demo(WIDTH, HEIGHT).with_max_frames(Some(2));
    assert!(source.open());
    let mut producer = FrameProducer::new(
        source,
        ProducerConfig {
            names: names.clone(),
            capacity: 3,
            fps: None,
        },
        Arc::clone(&channels.semaphore),
        Arc::clone(&channels.tasks),
        observer.clone(),
    );

    producer.tick().unwrap();
    producer.tick().unwrap();
    assert_eq!(producer.tick().unwrap(), Tick::Finished);
}

// ============================================================================
// Dispatcher
// ============================================================================

fn state(id: u64) -> StentorState {
    StentorState {
        id,
        centroid: (32.0, 24.0),
        area: 300.0,
        circularity: 0.9,
        state: TrackState::Undetermined,
        timestamp: 0.1,
        debug_color: [255, 255, 0],
        edge_reflection: false,
    }
}

fn detection(frame_index: u64, slot: u32) -> WorkerMessage {
    WorkerMessage::Detection(ResultMessage {
        results: vec![state(1)],
        frame_index,
        timestamp: frame_index as f64 / 30.0,
        slot_index: slot,
        mask_slot: Some(slot),
    })
}

fn dispatcher(
    names: &IpcNames,
    channels: PipelineChannels,
    observer: &Arc<RecordingObserver>,
    logger: &Arc<RecordingLogger>,
    latest: &Arc<LatestMask>,
) -> ResultDispatcher {
    ResultDispatcher::new(
        channels.results,
        names.mask_ring.clone(),
        Arc::clone(latest),
        observer.clone(),
        logger.clone(),
        Duration::from_millis(10),
    )
}

#[test]
#[serial]
fn test_dispatcher_delivers_results_and_masks() {
    let names = names("dispatch");
    let channels = PipelineChannels::create(&names, 3).unwrap();
    let mut masks = SlotRing::create(&names.mask_ring, RingLayout::masks(3, WIDTH, HEIGHT)).unwrap();
    let results = ResultSender::open(&names.result_queue).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let logger = Arc::new(RecordingLogger::default());
    let latest = Arc::new(LatestMask::new());
    let mut dispatcher = dispatcher(&names, channels, &observer, &logger, &latest);

    let slot = masks.slot_for(4);
    let mask = vec![255u8; (WIDTH * HEIGHT) as usize];
    masks.write(slot, &mask, 4).unwrap();
    assert!(results.try_send(&detection(4, slot as u32)).unwrap());

    let dispatched = dispatcher.dispatch_one(Duration::from_secs(1)).unwrap();
    assert_eq!(
        dispatched,
        Some(Dispatched::Results {
            frame_index: 4,
            tracks: 1,
            mask: true
        })
    );
    let held = latest.latest().unwrap();
    assert_eq!(held.frame_index, 4);
    assert_eq!(held.mask.get_pixel(0, 0), &Luma([255]));
    assert_eq!(*logger.frames.lock().unwrap(), vec![(4, 1)]);
    assert_eq!(*observer.results.lock().unwrap(), vec![4]);
}

#[test]
#[serial]
fn test_dispatcher_skips_overwritten_mask() {
    let names = names("torn");
    let channels = PipelineChannels::create(&names, 3).unwrap();
    let mut masks = SlotRing::create(&names.mask_ring, RingLayout::masks(3, WIDTH, HEIGHT)).unwrap();
    let results = ResultSender::open(&names.result_queue).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let logger = Arc::new(RecordingLogger::default());
    let latest = Arc::new(LatestMask::new());
    let mut dispatcher = dispatcher(&names, channels, &observer, &logger, &latest);

    // Frame 7 reused the slot frame 4 announced.
    let slot = masks.slot_for(4);
    masks.write(slot, &vec![0; (WIDTH * HEIGHT) as usize], 7).unwrap();
    assert!(results.try_send(&detection(4, slot as u32)).unwrap());

    let dispatched = dispatcher.dispatch_one(Duration::from_secs(1)).unwrap();
    assert!(matches!(dispatched, Some(Dispatched::Results { mask: false, .. })));
    assert!(latest.latest().is_none());
    assert_eq!(dispatcher.stats().torn_masks, 1);
    // Results still reach the collaborators without a mask.
    assert_eq!(*logger.frames.lock().unwrap(), vec![(4, 1)]);
}

#[test]
#[serial]
fn test_dispatcher_forwards_diagnostics() {
    let names = names("diag");
    let channels = PipelineChannels::create(&names, 3).unwrap();
    let results = ResultSender::open(&names.result_queue).unwrap();
    let observer = Arc::new(RecordingObserver::default());
    let logger = Arc::new(RecordingLogger::default());
    let latest = Arc::new(LatestMask::new());
    let mut dispatcher = dispatcher(&names, channels, &observer, &logger, &latest);

    assert!(
        results
            .try_send(&WorkerMessage::diagnostic(DiagnosticLevel::Warning, "torn frame 3"))
            .unwrap()
    );
    assert!(
        results
            .try_send(&WorkerMessage::Fatal {
                reason: "attach failed".into()
            })
            .unwrap()
    );

    assert_eq!(
        dispatcher.dispatch_one(Duration::from_secs(1)).unwrap(),
        Some(Dispatched::Diagnostic(DiagnosticLevel::Warning))
    );
    assert!(matches!(
        dispatcher.dispatch_one(Duration::from_secs(1)).unwrap(),
        Some(Dispatched::Fatal(reason)) if reason == "attach failed"
    ));
    assert_eq!(dispatcher.dispatch_one(Duration::from_millis(20)).unwrap(), None);

    let logs = observer.logs.lock().unwrap();
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0], (DiagnosticLevel::Warning, "torn frame 3".to_string()));
    assert_eq!(logs[1].0, DiagnosticLevel::Error);
}

// ============================================================================
// Supervisor
// ============================================================================

fn supervisor(names: &IpcNames, channels: PipelineChannels, program: &str) -> WorkerSupervisor {
    WorkerSupervisor::new(
        PathBuf::from(program),
        names.session,
        channels.control,
        Arc::clone(&channels.tasks),
        Duration::from_millis(200),
    )
}

#[test]
#[serial]
fn test_unresponsive_worker_is_killed() {
    let names = names("kill");
    let channels = PipelineChannels::create(&names, 3).unwrap();
    let mut supervisor = supervisor(&names, channels, "sleep").arg("30");

    supervisor.spawn().unwrap();
    assert!(supervisor.pid().is_some());
    assert!(supervisor.spawn().is_err());
    assert_eq!(supervisor.poll_exit(), None);

    assert_eq!(supervisor.stop(), WorkerStop::Killed);
    assert_eq!(supervisor.pid(), None);
    assert_eq!(supervisor.stop(), WorkerStop::NotRunning);
}

#[test]
#[serial]
fn test_worker_exit_is_observed() {
    let names = names("exit");
    let channels = PipelineChannels::create(&names, 3).unwrap();
    let mut supervisor = supervisor(&names, channels, "true");

    supervisor.spawn().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    let status = loop {
        if let Some(status) = supervisor.poll_exit() {
            break status;
        }
        assert!(std::time::Instant::now() < deadline, "worker never exited");
        std::thread::sleep(Duration::from_millis(10));
    };
    assert!(status.success());
    assert_eq!(supervisor.stop(), WorkerStop::NotRunning);
}

#[test]
#[serial]
fn test_missing_worker_binary_fails_to_spawn() {
    let names = names("missing");
    let channels = PipelineChannels::create(&names, 3).unwrap();
    let mut supervisor = supervisor(&names, channels, "/nonexistent/stentor-worker");
    assert!(supervisor.spawn().is_err());
    assert_eq!(supervisor.pid(), None);
}
