pub(crate) mod forward;
pub(crate) mod modbus;
pub(crate) mod serial;

use crate::*;

pub(crate) trait Service {
  fn new(config: config::Values) -> Self;
}

#[derive(Debug, Clone)]
pub(crate) struct Container {
  modbus: modbus::Service,
  serial: serial::Service,
  forward: forward::Service,
}

impl Container {
  pub(crate) fn new(config: config::Values) -> Self {
    Self {
      modbus: modbus::Service::new(config.clone()),
      serial: serial::Service::new(config.clone()),
      forward: forward::Service::new(config),
    }
  }

  pub(crate) fn modbus(&self) -> &modbus::Service {
    &self.modbus
  }

  pub(crate) fn serial(&self) -> &serial::Service {
    &self.serial
  }

  pub(crate) fn forward(&self) -> &forward::Service {
    &self.forward
  }
}
