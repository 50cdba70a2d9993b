use crate::*;

use super::modbus::Snapshot;

/// Snapshot of one device, ready to be written to a sink.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub(crate) struct Forwarded {
  pub(crate) device: String,
  #[serde(flatten)]
  pub(crate) snapshot: Snapshot,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ForwardError {
  #[error("Forward queue is full")]
  Full,

  #[error("Forward queue is closed")]
  Closed,
}

#[async_trait::async_trait]
pub(crate) trait Forward: Send + Sync {
  async fn forward(
    &self,
    device: &str,
    snapshot: Snapshot,
  ) -> Result<(), ForwardError>;
}

#[derive(Debug, Clone)]
pub(crate) struct Service {
  sender: flume::Sender<Forwarded>,
  receiver: flume::Receiver<Forwarded>,
}

impl service::Service for Service {
  fn new(config: config::Values) -> Self {
    Self::with_capacity(config.forward.capacity)
  }
}

impl Service {
  pub(crate) fn with_capacity(capacity: usize) -> Self {
    let (sender, receiver) = flume::bounded(capacity);
    Self { sender, receiver }
  }

  pub(crate) async fn receive(&self) -> Option<Forwarded> {
    self.receiver.recv_async().await.ok()
  }

  pub(crate) fn drain(&self) -> Vec<Forwarded> {
    self.receiver.drain().collect()
  }
}

#[async_trait::async_trait]
impl Forward for Service {
  // NOTE: a full queue drops the snapshot instead of blocking the poller
  async fn forward(
    &self,
    device: &str,
    snapshot: Snapshot,
  ) -> Result<(), ForwardError> {
    self
      .sender
      .try_send(Forwarded {
        device: device.to_owned(),
        snapshot,
      })
      .map_err(|error| match error {
        flume::TrySendError::Full(_) => ForwardError::Full,
        flume::TrySendError::Disconnected(_) => ForwardError::Closed,
      })
  }
}
