use bridge::{
    ControlMode, DiagnosticLevel, FrameTask, IpcNames, ResultMessage, ResultReceiver,
    ResultSender, StentorState, TaskMessage, TaskReceiver, TaskSender, TrackState,
    WorkerControl, WorkerMessage, paths,
};
use serial_test::serial;
use std::thread;
use std::time::{Duration, Instant};

fn names() -> IpcNames {
    IpcNames::with_prefix("stentor_it", std::process::id())
}

#[test]
#[serial]
fn test_task_and_result_round_trip_between_threads() {
    let names = names();
    let tasks = TaskSender::create(
        &names.task_queue,
        paths::TASK_QUEUE_DEPTH,
        paths::TASK_MESSAGE_SIZE,
    )
    .unwrap();
    let mut results = ResultReceiver::create(
        &names.result_queue,
        paths::RESULT_QUEUE_DEPTH,
        paths::RESULT_MESSAGE_SIZE,
    )
    .unwrap();

    let worker_names = names.clone();
    let worker = thread::spawn(move || {
        let mut tasks = TaskReceiver::open(&worker_names.task_queue).unwrap();
        let results = ResultSender::open(&worker_names.result_queue).unwrap();
        let mut handled = 0;
        loop {
            match tasks.recv_timeout(Duration::from_millis(100)).unwrap() {
                Some(TaskMessage::Frame(task)) => {
                    let message = WorkerMessage::Detection(ResultMessage {
                        results: vec![StentorState {
                            id: 1,
                            centroid: (5.0, 5.0),
                            area: 120.0,
                            circularity: 0.8,
                            state: TrackState::Undetermined,
                            timestamp: task.timestamp,
                            debug_color: TrackState::Undetermined.color(),
                            edge_reflection: false,
                        }],
                        frame_index: task.frame_index,
                        timestamp: task.timestamp,
                        slot_index: task.slot_index,
                        mask_slot: Some(task.slot_index),
                    });
                    assert!(results.try_send(&message).unwrap());
                    handled += 1;
                }
                Some(TaskMessage::Shutdown) => break,
                None => {}
            }
        }
        handled
    });

    for frame_index in 1..=4u64 {
        let task = TaskMessage::Frame(FrameTask {
            frame_index,
            timestamp: frame_index as f64,
            slot_index: (frame_index % 3) as u32,
            trace: None,
        });
        assert!(tasks.try_send(&task).unwrap());
    }
    assert!(tasks.try_send(&TaskMessage::Shutdown).unwrap());

    let mut seen = Vec::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    while seen.len() < 4 && Instant::now() < deadline {
        if let Some(WorkerMessage::Detection(result)) =
            results.recv_timeout(Duration::from_millis(50)).unwrap()
        {
            assert_eq!(result.mask_slot, Some(result.slot_index));
            seen.push(result.frame_index);
        }
    }

    assert_eq!(worker.join().unwrap(), 4);
    assert_eq!(seen, vec![1, 2, 3, 4]);
}

#[test]
#[serial]
fn test_diagnostics_and_fatal_travel_on_result_queue() {
    let names = names();
    let mut receiver = ResultReceiver::create(&names.result_queue, 4, 1024).unwrap();
    let sender = ResultSender::open(&names.result_queue).unwrap();

    let torn = WorkerMessage::diagnostic(DiagnosticLevel::Warning, "torn frame 7");
    let fatal = WorkerMessage::Fatal {
        reason: "cannot attach frame ring".into(),
    };
    assert!(sender.try_send(&torn).unwrap());
    assert!(sender.try_send(&fatal).unwrap());

    assert_eq!(receiver.try_recv().unwrap(), Some(torn));
    assert_eq!(receiver.try_recv().unwrap(), Some(fatal));
    assert_eq!(receiver.try_recv().unwrap(), None);
}

#[test]
#[serial]
fn test_stop_signal_reaches_waiting_worker() {
    let names = IpcNames::with_prefix(&format!("stentor_it_{}", std::process::id()), 1);
    let dir = tempfile::tempdir().unwrap();
    let control_path = dir.path().join("control");
    let control = WorkerControl::create(&control_path).unwrap();
    let _tasks = TaskSender::create(&names.task_queue, 2, 256).unwrap();

    let path = control_path.clone();
    let task_queue = names.task_queue.clone();
    let worker = thread::spawn(move || {
        let control = WorkerControl::attach(&path).unwrap();
        let mut tasks = TaskReceiver::open(&task_queue).unwrap();
        let started = Instant::now();
        while control.mode() == ControlMode::Run {
            let _ = tasks.recv_timeout(Duration::from_millis(20)).unwrap();
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    });

    thread::sleep(Duration::from_millis(50));
    control.request_stop();
    worker.join().unwrap();
}
