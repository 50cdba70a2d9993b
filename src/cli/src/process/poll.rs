use tokio_util::sync::CancellationToken;

use crate::service::forward::Forward;
use crate::service::modbus::{self, ConnectError, Plan, Snapshot, Transport};
use crate::*;

#[async_trait::async_trait]
pub(crate) trait Connector: Send + Sync {
  type Transport: Transport;

  async fn connect(&self) -> Result<Self::Transport, ConnectError>;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum CycleError {
  #[error("Failed connecting")]
  Connect(#[from] ConnectError),

  #[error("Device is not alive ({values} values read)")]
  NotAlive { values: usize },
}

/// Opens the configured serial port through the modbus service.
pub(crate) struct SerialConnector {
  serial: modbus::SerialParams,
  services: service::Container,
}

#[async_trait::async_trait]
impl Connector for SerialConnector {
  type Transport = modbus::Connection;

  async fn connect(&self) -> Result<Self::Transport, ConnectError> {
    match self.services.modbus().connect(&self.serial) {
      Ok(connection) => Ok(connection),
      Err(error) => {
        let ports = self.services.serial().scan_serial().await;
        tracing::debug!(
          port = %self.serial.path,
          available = ?ports,
          "Serial port unavailable"
        );
        Err(error)
      }
    }
  }
}

/// Polls one device forever, reconnecting whenever a cycle fails.
pub(crate) struct Supervisor<TConnector: Connector, TForward: Forward> {
  device: String,
  slave: u8,
  interval: chrono::Duration,
  plan: Plan,
  connector: TConnector,
  forward: TForward,
}

pub(crate) type Process =
  Supervisor<SerialConnector, service::forward::Service>;

impl Process {
  pub(crate) fn new(
    device: config::Device,
    plan: Plan,
    services: service::Container,
  ) -> Self {
    let forward = services.forward().clone();
    Self::with(
      device.id,
      device.slave,
      device.interval,
      plan,
      SerialConnector {
        serial: device.serial,
        services,
      },
      forward,
    )
  }
}

impl<TConnector: Connector, TForward: Forward>
  Supervisor<TConnector, TForward>
{
  pub(crate) fn with(
    device: String,
    slave: u8,
    interval: chrono::Duration,
    plan: Plan,
    connector: TConnector,
    forward: TForward,
  ) -> Self {
    Self {
      device,
      slave,
      interval,
      plan,
      connector,
      forward,
    }
  }

  async fn cycle(
    &self,
    transport: &mut Option<TConnector::Transport>,
  ) -> Result<Snapshot, CycleError> {
    let mut connected = match transport.take() {
      Some(connected) => connected,
      None => self.connector.connect().await?,
    };

    let snapshot =
      modbus::read_snapshot(&mut connected, self.slave, &self.plan).await;
    *transport = Some(connected);
    if !snapshot.alive || snapshot.is_empty() {
      return Err(CycleError::NotAlive {
        values: snapshot.len(),
      });
    }

    Ok(snapshot)
  }

  async fn reconnect(
    &self,
    transport: &mut Option<TConnector::Transport>,
    failures: u64,
  ) {
    *transport = None;
    match self.connector.connect().await {
      Ok(connected) => {
        *transport = Some(connected);
        tracing::info!(failures, "Reconnected");
      }
      Err(error) => {
        tracing::warn!(%error, failures, "Reconnect failed");
      }
    }
  }
}

impl<TConnector: Connector, TForward: Forward> process::Process
  for Supervisor<TConnector, TForward>
{
}

#[async_trait::async_trait]
impl<TConnector: Connector, TForward: Forward> process::Continuous
  for Supervisor<TConnector, TForward>
{
  #[tracing::instrument(skip(self, token), fields(device = %self.device))]
  async fn run(&self, token: CancellationToken) {
    let interval = std::time::Duration::from_millis(
      self.interval.num_milliseconds().max(0) as u64,
    );
    let mut transport = None;
    let mut failures = 0u64;

    while !token.is_cancelled() {
      match self.cycle(&mut transport).await {
        Ok(snapshot) => {
          failures = 0;
          tracing::debug!(values = snapshot.len(), "Polled device");
          if let Err(error) = self.forward.forward(&self.device, snapshot).await
          {
            tracing::warn!(%error, "Dropped snapshot");
          }
        }
        Err(error @ CycleError::Connect(_)) => {
          failures += 1;
          transport = None;
          tracing::warn!(%error, failures, "Device link unavailable");
        }
        Err(error @ CycleError::NotAlive { .. }) => {
          failures += 1;
          tracing::warn!(%error, failures, "Device read failed");
          self.reconnect(&mut transport, failures).await;
        }
      }

      tokio::select! {
        _ = token.cancelled() => break,
        _ = tokio::time::sleep(interval) => {}
      }
    }

    tracing::info!("Stopped polling");
  }
}
