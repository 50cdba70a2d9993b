use crate::*;

#[derive(Debug, Clone)]
pub(crate) struct Service {}

impl service::Service for Service {
  fn new(_config: config::Values) -> Self {
    Self {}
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SerialPort {
  pub(crate) path: String,
  pub(crate) kind: String,
}

impl Service {
  /// Lists the serial ports the host currently exposes.
  #[tracing::instrument(skip(self))]
  pub(crate) async fn scan_serial(&self) -> Vec<SerialPort> {
    let available = match serialport::available_ports() {
      Ok(available) => available,
      Err(error) => {
        tracing::debug! {
          %error,
          "Failed listing serial ports"
        };
        return Vec::new();
      }
    };

    available
      .into_iter()
      .map(|port| SerialPort {
        kind: describe(&port.port_type),
        path: port.port_name,
      })
      .collect::<Vec<_>>()
  }
}

fn describe(port_type: &serialport::SerialPortType) -> String {
  match port_type {
    serialport::SerialPortType::UsbPort(usb) => match &usb.product {
      Some(product) => {
        format!("usb {:04x}:{:04x} {}", usb.vid, usb.pid, product)
      }
      None => format!("usb {:04x}:{:04x}", usb.vid, usb.pid),
    },
    serialport::SerialPortType::PciPort => "pci".to_owned(),
    serialport::SerialPortType::BluetoothPort => "bluetooth".to_owned(),
    serialport::SerialPortType::Unknown => "unknown".to_owned(),
  }
}
