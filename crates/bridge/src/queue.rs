//! Bounded POSIX message queues carrying small bincode-encoded messages.
//!
//! Senders never block: a full queue reports the message as dropped.
//! Receivers wait with a short deadline so callers can interleave stop and
//! liveness checks with waiting for work.

use crate::errors::BridgeError;
use crate::types::{TaskMessage, WorkerMessage};
use nix::errno::Errno;
use nix::mqueue::{
    MQ_OFlag, MqAttr, MqdT, mq_attr_member_t, mq_close, mq_getattr, mq_open, mq_send,
    mq_timedreceive, mq_unlink,
};
use nix::sys::stat::Mode;
use nix::sys::time::TimeSpec;
use nix::time::{ClockId, clock_gettime};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRole {
    Send,
    Receive,
}

impl QueueRole {
    fn flags(self) -> MQ_OFlag {
        match self {
            QueueRole::Send => MQ_OFlag::O_WRONLY | MQ_OFlag::O_NONBLOCK,
            QueueRole::Receive => MQ_OFlag::O_RDONLY,
        }
    }
}

/// Raw queue handle. Creator unlinks the name on drop.
pub struct MessageQueue {
    mqd: Option<MqdT>,
    name: String,
    role: QueueRole,
    max_message: usize,
    owner: bool,
}

impl MessageQueue {
    /// Create a queue, replacing a stale one of the same name.
    pub fn create(
        name: &str,
        role: QueueRole,
        depth: usize,
        message_size: usize,
    ) -> Result<Self, BridgeError> {
        match mq_unlink(name) {
            Ok(()) => tracing::debug!(name, "Removed stale message queue"),
            Err(Errno::ENOENT) => {}
            Err(e) => return Err(e.into()),
        }

        let attr = MqAttr::new(
            0,
            depth as mq_attr_member_t,
            message_size as mq_attr_member_t,
            0,
        );
        let mqd = mq_open(
            name,
            role.flags() | MQ_OFlag::O_CREAT | MQ_OFlag::O_EXCL,
            Mode::S_IRUSR | Mode::S_IWUSR,
            Some(&attr),
        )?;

        Ok(Self {
            mqd: Some(mqd),
            name: name.to_string(),
            role,
            max_message: message_size,
            owner: true,
        })
    }

    /// Open a queue created by another process.
    pub fn open(name: &str, role: QueueRole) -> Result<Self, BridgeError> {
        let mqd = mq_open(name, role.flags(), Mode::empty(), None)?;
        let attr = mq_getattr(&mqd)?;

        Ok(Self {
            mqd: Some(mqd),
            name: name.to_string(),
            role,
            max_message: attr.msgsize() as usize,
            owner: false,
        })
    }

    fn handle(&self) -> Result<&MqdT, BridgeError> {
        self.mqd.as_ref().ok_or(BridgeError::Queue(Errno::EBADF))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> QueueRole {
        self.role
    }

    pub fn max_message(&self) -> usize {
        self.max_message
    }

    /// Messages currently queued.
    pub fn pending(&self) -> Result<usize, BridgeError> {
        Ok(mq_getattr(self.handle()?)?.curmsgs() as usize)
    }

    /// `Ok(false)` when the queue is full.
    pub fn try_send_bytes(&self, payload: &[u8]) -> Result<bool, BridgeError> {
        if payload.len() > self.max_message {
            return Err(BridgeError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_message,
            });
        }
        match mq_send(self.handle()?, payload, 0) {
            Ok(()) => Ok(true),
            Err(Errno::EAGAIN) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Wait up to `timeout` for one message. `Ok(None)` on timeout or when
    /// interrupted by a signal.
    pub fn recv_bytes_timeout(
        &self,
        buf: &mut Vec<u8>,
        timeout: Duration,
    ) -> Result<Option<usize>, BridgeError> {
        buf.resize(self.max_message, 0);
        let deadline = clock_gettime(ClockId::CLOCK_REALTIME)? + TimeSpec::from(timeout);
        let mut priority = 0u32;
        match mq_timedreceive(self.handle()?, buf.as_mut_slice(), &mut priority, &deadline) {
            Ok(len) => Ok(Some(len)),
            Err(Errno::ETIMEDOUT) | Err(Errno::EINTR) | Err(Errno::EAGAIN) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for MessageQueue {
    fn drop(&mut self) {
        if let Some(mqd) = self.mqd.take() {
            if let Err(e) = mq_close(mqd) {
                tracing::warn!(name = %self.name, error = %e, "Failed to close message queue");
            }
        }
        if self.owner {
            if let Err(e) = mq_unlink(self.name.as_str()) {
                if e != Errno::ENOENT {
                    tracing::warn!(name = %self.name, error = %e, "Failed to unlink message queue");
                }
            }
        }
    }
}

/// Typed, non-blocking sending end.
pub struct QueueSender<T> {
    queue: MessageQueue,
    _marker: PhantomData<fn(T)>,
}

impl<T: Serialize> QueueSender<T> {
    pub fn create(name: &str, depth: usize, message_size: usize) -> Result<Self, BridgeError> {
        Ok(Self {
            queue: MessageQueue::create(name, QueueRole::Send, depth, message_size)?,
            _marker: PhantomData,
        })
    }

    pub fn open(name: &str) -> Result<Self, BridgeError> {
        Ok(Self {
            queue: MessageQueue::open(name, QueueRole::Send)?,
            _marker: PhantomData,
        })
    }

    /// Encode and enqueue. `Ok(false)` means the queue was full and the
    /// message was dropped.
    pub fn try_send(&self, message: &T) -> Result<bool, BridgeError> {
        let payload = bincode::serialize(message)?;
        self.queue.try_send_bytes(&payload)
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }
}

/// Typed receiving end with deadline-bounded waits.
pub struct QueueReceiver<T> {
    queue: MessageQueue,
    buf: Vec<u8>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> QueueReceiver<T> {
    pub fn create(name: &str, depth: usize, message_size: usize) -> Result<Self, BridgeError> {
        Ok(Self {
            queue: MessageQueue::create(name, QueueRole::Receive, depth, message_size)?,
            buf: Vec::with_capacity(message_size),
            _marker: PhantomData,
        })
    }

    pub fn open(name: &str) -> Result<Self, BridgeError> {
        let queue = MessageQueue::open(name, QueueRole::Receive)?;
        let buf = Vec::with_capacity(queue.max_message());
        Ok(Self {
            queue,
            buf,
            _marker: PhantomData,
        })
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<T>, BridgeError> {
        match self.queue.recv_bytes_timeout(&mut self.buf, timeout)? {
            Some(len) => Ok(Some(bincode::deserialize(&self.buf[..len])?)),
            None => Ok(None),
        }
    }

    /// Take a message only if one is already queued.
    pub fn try_recv(&mut self) -> Result<Option<T>, BridgeError> {
        self.recv_timeout(Duration::ZERO)
    }

    pub fn queue(&self) -> &MessageQueue {
        &self.queue
    }
}

pub type TaskSender = QueueSender<TaskMessage>;
pub type TaskReceiver = QueueReceiver<TaskMessage>;
pub type ResultSender = QueueSender<WorkerMessage>;
pub type ResultReceiver = QueueReceiver<WorkerMessage>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiagnosticLevel, FrameTask};
    use std::time::Instant;

    fn unique_name(tag: &str) -> String {
        format!("/stentor_test_mq_{}_{}", tag, std::process::id())
    }

    fn task(frame_index: u64) -> TaskMessage {
        TaskMessage::Frame(FrameTask {
            frame_index,
            timestamp: frame_index as f64 * 0.1,
            slot_index: (frame_index % 3) as u32,
            trace: None,
        })
    }

    #[test]
    fn test_send_then_receive_in_order() {
        let name = unique_name("order");
        let sender = TaskSender::create(&name, 8, 256).unwrap();
        let mut receiver = TaskReceiver::open(&name).unwrap();

        assert!(sender.try_send(&task(1)).unwrap());
        assert!(sender.try_send(&task(2)).unwrap());
        assert_eq!(sender.queue().pending().unwrap(), 2);

        assert_eq!(
            receiver.recv_timeout(Duration::from_millis(100)).unwrap(),
            Some(task(1))
        );
        assert_eq!(receiver.try_recv().unwrap(), Some(task(2)));
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let name = unique_name("full");
        let sender = TaskSender::create(&name, 2, 256).unwrap();

        assert!(sender.try_send(&task(1)).unwrap());
        assert!(sender.try_send(&task(2)).unwrap());
        let start = Instant::now();
        assert!(!sender.try_send(&task(3)).unwrap());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_receive_times_out_on_empty_queue() {
        let name = unique_name("empty");
        let mut receiver = ResultReceiver::create(&name, 4, 1024).unwrap();

        let start = Instant::now();
        assert!(
            receiver
                .recv_timeout(Duration::from_millis(30))
                .unwrap()
                .is_none()
        );
        assert!(start.elapsed() >= Duration::from_millis(20));
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_oversized_payload_is_rejected() {
        let name = unique_name("oversize");
        let _receiver = ResultReceiver::create(&name, 4, 64).unwrap();
        let sender = ResultSender::open(&name).unwrap();
        assert_eq!(sender.queue().max_message(), 64);

        let message = WorkerMessage::Diagnostic {
            level: DiagnosticLevel::Info,
            message: "x".repeat(200),
        };
        assert!(matches!(
            sender.try_send(&message),
            Err(BridgeError::PayloadTooLarge { max: 64, .. })
        ));
    }

    #[test]
    fn test_creator_unlinks_on_drop() {
        let name = unique_name("unlink");
        let sender = TaskSender::create(&name, 2, 256).unwrap();
        drop(sender);
        assert!(matches!(
            TaskReceiver::open(&name),
            Err(BridgeError::Queue(Errno::ENOENT))
        ));
    }
}
