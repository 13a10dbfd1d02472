use anyhow::Context;
use bridge::{
    IpcNames, ResultReceiver, SlotSemaphore, TaskSender, WorkerControl,
    paths::{RESULT_MESSAGE_SIZE, RESULT_QUEUE_DEPTH, TASK_MESSAGE_SIZE, TASK_QUEUE_DEPTH},
};
use std::sync::Arc;

/// IPC resources that do not depend on frame geometry, created before
/// capture starts. This process owns them: dropping unlinks every name.
pub struct PipelineChannels {
    pub semaphore: Arc<SlotSemaphore>,
    pub tasks: Arc<TaskSender>,
    pub results: ResultReceiver,
    pub control: WorkerControl,
}

impl PipelineChannels {
    pub fn create(names: &IpcNames, capacity: u32) -> anyhow::Result<Self> {
        let semaphore = SlotSemaphore::create(&names.semaphore, capacity)
            .with_context(|| format!("Failed to create slot semaphore {}", names.semaphore))?;
        let tasks = TaskSender::create(&names.task_queue, TASK_QUEUE_DEPTH, TASK_MESSAGE_SIZE)
            .with_context(|| format!("Failed to create task queue {}", names.task_queue))?;
        let results =
            ResultReceiver::create(&names.result_queue, RESULT_QUEUE_DEPTH, RESULT_MESSAGE_SIZE)
                .with_context(|| format!("Failed to create result queue {}", names.result_queue))?;
        let control = WorkerControl::create(&names.control).with_context(|| {
            format!("Failed to create control segment {}", names.control.display())
        })?;

        tracing::debug!(session = names.session, capacity, "Pipeline channels created");
        Ok(Self {
            semaphore: Arc::new(semaphore),
            tasks: Arc::new(tasks),
            results,
            control,
        })
    }
}
