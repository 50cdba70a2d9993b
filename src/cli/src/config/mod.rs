mod args;
mod env;
mod file;

use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_modbus::Slave;

use crate::service::modbus::SerialParams;

#[derive(Debug, Clone)]
pub(crate) struct Modbus {
  pub(crate) read_timeout: chrono::Duration,
  pub(crate) write_timeout: chrono::Duration,
  pub(crate) max_batch_registers: u16,
  pub(crate) max_batch_gap: u16,
  pub(crate) termination_timeout: chrono::Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct Device {
  pub(crate) id: String,
  pub(crate) map: PathBuf,
  pub(crate) serial: SerialParams,
  pub(crate) slave: u8,
  pub(crate) interval: chrono::Duration,
}

#[derive(Debug, Clone)]
pub(crate) struct Forward {
  pub(crate) capacity: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct Values {
  pub(crate) log_level: tracing::level_filters::LevelFilter,
  pub(crate) log_directive: Option<String>,
  pub(crate) modbus: Modbus,
  pub(crate) devices: Vec<Device>,
  pub(crate) forward: Forward,
}

#[derive(Debug, Clone)]
struct Unparsed {
  from_args: args::Values,
  from_env: env::Values,
  from_file: file::Values,
}

#[derive(Debug, Clone)]
pub(crate) struct Manager {
  lock: Arc<Mutex<Unparsed>>,
}

#[derive(Debug, Error)]
pub(crate) enum ReadError {
  #[error("Failed reading file")]
  FileReadError(#[from] file::ParseError),

  #[error("Failed reading env")]
  EnvReadError(#[from] env::ParseError),

  #[error("Failed parsing config")]
  ParseError(#[from] ParseError),
}

#[derive(Debug, Error)]
pub(crate) enum ParseError {
  #[error("No devices configured")]
  NoDevices,

  #[error("Device {device} has slave {slave} outside the device range")]
  Slave { device: String, slave: u8 },

  #[error("Device {device} has unsupported data bits {data_bits}")]
  DataBits { device: String, data_bits: u8 },

  #[error("Device {device} has unsupported stop bits {stop_bits}")]
  StopBits { device: String, stop_bits: u8 },

  #[error("Devices {} share serial port {port}", .devices.join(", "))]
  SharedPort { port: String, devices: Vec<String> },
}

impl Manager {
  pub(crate) async fn new() -> Result<Self, ReadError> {
    let config = Self::read_async().await?;
    Self::parse(config.clone())?;

    let config_manager = Self {
      lock: Arc::new(Mutex::new(config)),
    };

    Ok(config_manager)
  }

  pub(crate) async fn values(&self) -> Result<Values, ParseError> {
    let config = self.lock.lock().await.clone();

    Self::parse(config)
  }

  fn parse(config: Unparsed) -> Result<Values, ParseError> {
    let directory = config.from_file.directory.clone();
    let single_device = config.from_file.devices.len() == 1;
    let mut devices = Vec::with_capacity(config.from_file.devices.len());
    for (id, device) in config.from_file.devices {
      let slave = device.slave.unwrap_or(1);
      if !(Slave::min_device()..=Slave::max_device()).contains(&Slave(slave)) {
        return Err(ParseError::Slave { device: id, slave });
      }

      let data_bits = match device.data_bits.unwrap_or(8) {
        5 => tokio_serial::DataBits::Five,
        6 => tokio_serial::DataBits::Six,
        7 => tokio_serial::DataBits::Seven,
        8 => tokio_serial::DataBits::Eight,
        data_bits => {
          return Err(ParseError::DataBits {
            device: id,
            data_bits,
          })
        }
      };

      let stop_bits = match device.stop_bits.unwrap_or(1) {
        1 => tokio_serial::StopBits::One,
        2 => tokio_serial::StopBits::Two,
        stop_bits => {
          return Err(ParseError::StopBits {
            device: id,
            stop_bits,
          })
        }
      };

      let parity = match device.parity.unwrap_or(file::Parity::None) {
        file::Parity::None => tokio_serial::Parity::None,
        file::Parity::Odd => tokio_serial::Parity::Odd,
        file::Parity::Even => tokio_serial::Parity::Even,
      };

      let path = match (&config.from_env.serial_port, single_device) {
        (Some(port), true) => port.clone(),
        _ => device.port,
      };

      let map = PathBuf::from(device.map);
      let map = match &directory {
        Some(directory) if map.is_relative() => directory.join(map),
        _ => map,
      };

      devices.push(Device {
        map,
        serial: SerialParams {
          path,
          baud_rate: device.baud_rate.unwrap_or(9600),
          parity,
          data_bits,
          stop_bits,
        },
        slave,
        interval: file::milliseconds_to_chrono(
          device.interval.unwrap_or(10_000),
        ),
        id,
      });
    }

    if devices.is_empty() {
      return Err(ParseError::NoDevices);
    }

    let mut ports = BTreeMap::<&str, Vec<String>>::new();
    for device in &devices {
      ports
        .entry(device.serial.path.as_str())
        .or_default()
        .push(device.id.clone());
    }
    if let Some((port, devices)) =
      ports.into_iter().find(|(_, devices)| devices.len() > 1)
    {
      return Err(ParseError::SharedPort {
        port: port.to_owned(),
        devices,
      });
    }

    Ok(Values {
      log_level: config.from_file.log_level.map_or_else(
        || {
          if config.from_args.trace {
            tracing::level_filters::LevelFilter::TRACE
          } else {
            #[cfg(debug_assertions)]
            {
              tracing::level_filters::LevelFilter::DEBUG
            }
            #[cfg(not(debug_assertions))]
            {
              tracing::level_filters::LevelFilter::INFO
            }
          }
        },
        |log_level| match log_level {
          file::LogLevel::Trace => tracing::level_filters::LevelFilter::TRACE,
          file::LogLevel::Debug => tracing::level_filters::LevelFilter::DEBUG,
          file::LogLevel::Info => tracing::level_filters::LevelFilter::INFO,
          file::LogLevel::Warn => tracing::level_filters::LevelFilter::WARN,
          file::LogLevel::Error => tracing::level_filters::LevelFilter::ERROR,
        },
      ),
      log_directive: config.from_env.log,
      modbus: Modbus {
        read_timeout: file::milliseconds_to_chrono(
          config.from_file.modbus.read_timeout.unwrap_or(1000),
        ),
        write_timeout: file::milliseconds_to_chrono(
          config.from_file.modbus.write_timeout.unwrap_or(1000),
        ),
        max_batch_registers: config
          .from_file
          .modbus
          .max_batch_registers
          .unwrap_or(120),
        max_batch_gap: config.from_file.modbus.max_batch_gap.unwrap_or(8),
        termination_timeout: file::milliseconds_to_chrono(
          config
            .from_file
            .modbus
            .termination_timeout
            .unwrap_or(10_000),
        ),
      },
      devices,
      forward: Forward {
        capacity: config.from_file.forward.capacity.unwrap_or(1024).max(1),
      },
    })
  }

  async fn read_async() -> Result<Unparsed, ReadError> {
    let from_args = args::parse();
    let from_env = env::parse()?;
    let from_file = file::parse_file(from_args.config.as_deref()).await?;

    Ok(Unparsed {
      from_args,
      from_env,
      from_file,
    })
  }
}
