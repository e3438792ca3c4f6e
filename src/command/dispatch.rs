//! Serialized delivery of translated commands
//!
//! Commands for different vacuums go out concurrently; commands for the
//! same vacuum are handed to the transport one at a time, in call order.

use super::{OutboundCommand, VacuumCommand, VacuumTarget, ValidationError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Transport channel closed")]
    TransportClosed,
}

/// Hands translated commands to the transport collaborator
pub struct CommandDispatcher {
    transport: mpsc::Sender<OutboundCommand>,
    /// One lock per vacuum topic
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl CommandDispatcher {
    /// Create a dispatcher and the receiving end for the transport
    pub fn new(max_queue: usize) -> (Self, mpsc::Receiver<OutboundCommand>) {
        let (transport, rx) = mpsc::channel(max_queue.max(1));
        let dispatcher = Self {
            transport,
            locks: Mutex::new(HashMap::new()),
        };
        (dispatcher, rx)
    }

    fn lock_for(&self, topic: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    /// Validate, translate and send one command
    ///
    /// Validation failures are returned before anything is queued.
    pub async fn dispatch(
        &self,
        target: &VacuumTarget,
        command: &VacuumCommand,
    ) -> Result<OutboundCommand, DispatchError> {
        let outbound = match command.translate(target) {
            Ok(outbound) => outbound,
            Err(e) => {
                warn!("Rejected {} for {}: {}", command.kind(), target.topic, e);
                return Err(e.into());
            }
        };

        let lock = self.lock_for(&target.topic);
        let _guard = lock.lock().await;
        debug!("Sending {} to {}", command.kind(), outbound.topic);

        self.transport
            .send(outbound.clone())
            .await
            .map_err(|_| DispatchError::TransportClosed)?;

        info!("Dispatched {} to {}", command.kind(), target.topic);
        Ok(outbound)
    }
}
