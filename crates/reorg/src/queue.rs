//! Message transport between scanner and migration workers
//!
//! Messages cross the queue as JSON bytes so workers parse them at the same
//! parameter boundary a remote queue would impose.

use crate::error::{Error, Result};
use crate::params::MigrationRequest;
use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc;

#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, request: &MigrationRequest) -> Result<()>;
}

/// In-process queue backed by an unbounded channel
#[derive(Clone)]
pub struct ChannelQueue {
    sender: mpsc::UnboundedSender<Vec<u8>>,
}

pub struct QueueReceiver {
    receiver: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl ChannelQueue {
    pub fn new() -> (ChannelQueue, QueueReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelQueue { sender }, QueueReceiver { receiver })
    }
}

#[async_trait]
impl Dispatcher for ChannelQueue {
    async fn dispatch(&self, request: &MigrationRequest) -> Result<()> {
        let body = request
            .to_json()
            .map_err(|e| Error::Dispatch(format!("cannot encode {}: {e}", request.task_id)))?;
        self.sender
            .send(body)
            .map_err(|_| Error::Dispatch(format!("queue closed before {}", request.task_id)))?;
        debug!("Dispatched task {}", request.task_id);
        Ok(())
    }
}

impl QueueReceiver {
    /// Next message; `None` once every sender is dropped and the queue is empty
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.receiver.recv().await
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        while let Ok(body) = self.receiver.try_recv() {
            messages.push(body);
        }
        messages
    }

    /// Stop accepting messages; later dispatches fail
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
