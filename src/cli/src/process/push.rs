use tokio_util::sync::CancellationToken;

use crate::service::forward::Forwarded;
use crate::*;

/// Default sink: writes each forwarded snapshot as one structured event.
pub(crate) struct Process {
  services: service::Container,
}

impl Process {
  pub(crate) fn new(services: service::Container) -> Self {
    Self { services }
  }

  fn push(&self, forwarded: Forwarded) {
    let values = forwarded.snapshot.len();
    match serde_json::to_string(&forwarded) {
      Ok(json) => tracing::info!(
        device = %forwarded.device,
        alive = forwarded.snapshot.alive,
        values,
        %json,
        "Snapshot"
      ),
      Err(error) => tracing::error! {
        %error,
        device = %forwarded.device,
        "Failed serializing snapshot"
      },
    }
  }
}

impl super::Process for Process {}

#[async_trait::async_trait]
impl process::Continuous for Process {
  #[tracing::instrument(skip_all)]
  async fn run(&self, token: CancellationToken) {
    loop {
      tokio::select! {
        _ = token.cancelled() => break,
        forwarded = self.services.forward().receive() => match forwarded {
          Some(forwarded) => self.push(forwarded),
          None => break,
        },
      }
    }

    for forwarded in self.services.forward().drain() {
      self.push(forwarded);
    }
  }
}
