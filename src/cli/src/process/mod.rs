mod poll;
mod push;

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::{config, service};

pub(crate) trait Process {
  fn process_name(&self) -> &'static str {
    std::any::type_name::<Self>()
  }
}

#[async_trait::async_trait]
pub(crate) trait Continuous: Process {
  /// Runs until `token` is cancelled.
  async fn run(&self, token: tokio_util::sync::CancellationToken);
}

pub(crate) struct Container {
  config: config::Manager,
  services: service::Container,
  handles: Arc<Mutex<Option<Vec<Handle>>>>,
}

impl Container {
  pub(crate) fn new(
    config: config::Manager,
    services: service::Container,
  ) -> Self {
    Self {
      config,
      services,
      handles: Arc::new(Mutex::new(None)),
    }
  }

  pub(crate) async fn cancel(&self) {
    let termination_timeout = match self.config.values().await {
      Ok(config) => config.modbus.termination_timeout,
      Err(_) => chrono::Duration::milliseconds(10_000),
    };

    {
      let mut handles = self.handles.clone().lock_owned().await;
      if let Some(handles) = &mut *handles {
        for handle in handles.iter() {
          handle.token.cancel();
        }

        for mut handle in handles.drain(0..) {
          match tokio::time::timeout(
            std::time::Duration::from_millis(
              termination_timeout.num_milliseconds().max(0) as u64,
            ),
            &mut handle.join,
          )
          .await
          {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
              tracing::error! {
                %error,
                "Joining process handle on cancel failed"
              }
            }
            Err(_) => {
              tracing::warn!(
                "Process {} did not stop in time, aborting",
                handle.name
              );
              handle.abort.abort();
            }
          }
        }
      }
      *handles = None;
    }
  }
}

impl Container {
  /// Plans every device map and starts one poller per device plus the sink.
  ///
  /// Fails without starting anything when a device map cannot be planned.
  pub(crate) async fn spawn(&self) -> anyhow::Result<()> {
    let config = self.config.values().await?;

    let mut processes: Vec<Box<dyn Continuous + Sync + Send>> = Vec::new();
    for device in config.devices {
      let plan = self.services.modbus().plan(&device.map).await?;
      processes.push(Box::new(poll::Process::new(
        device,
        plan,
        self.services.clone(),
      )));
    }
    processes.push(Box::new(push::Process::new(self.services.clone())));

    {
      let mut handles = self.handles.clone().lock_owned().await;
      *handles = Some(processes.into_iter().map(Handle::continuous).collect());
    }

    Ok(())
  }
}

struct Handle {
  name: &'static str,
  token: tokio_util::sync::CancellationToken,
  abort: tokio::task::AbortHandle,
  join: tokio::task::JoinHandle<()>,
}

impl Handle {
  fn continuous(process: Box<dyn Continuous + Sync + Send>) -> Self {
    let name = process.process_name();
    let token = tokio_util::sync::CancellationToken::new();
    let child_token = token.child_token();
    let join = tokio::spawn(async move {
      process.run(child_token).await;
    });
    let abort = join.abort_handle();
    Self {
      name,
      token,
      abort,
      join,
    }
  }
}
