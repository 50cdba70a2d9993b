use std::fmt::Display;
use std::io;

use futures_time::future::FutureExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_modbus::{Address, Quantity};
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};

use super::frame::{self, FrameError, FunctionCode, MAX_READ_QUANTITY};

#[async_trait::async_trait]
pub(crate) trait Transport: Send {
  /// Performs one read transaction and returns the big-endian payload.
  async fn read_registers(
    &mut self,
    slave: u8,
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
  ) -> Result<Vec<u8>, ReadError>;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ReadError {
  #[error(
    "Failed reading {quantity} registers at {address} \
     with function {function} from slave {slave}"
  )]
  ReadFailed {
    slave: u8,
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
  },
}

/// Byte stream to a device that can drop whatever is waiting to be read.
pub(crate) trait Link: AsyncRead + AsyncWrite + Unpin + Send {
  fn discard_input(&mut self) -> io::Result<()>;
}

impl Link for SerialStream {
  fn discard_input(&mut self) -> io::Result<()> {
    tokio_serial::SerialPort::clear(&*self, tokio_serial::ClearBuffer::Input)
      .map_err(io::Error::from)
  }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SerialParams {
  pub(crate) path: String,
  pub(crate) baud_rate: u32,
  pub(crate) parity: Parity,
  pub(crate) data_bits: DataBits,
  pub(crate) stop_bits: StopBits,
}

impl Display for SerialParams {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "{}@{} {}{}{}",
      self.path,
      self.baud_rate,
      match self.data_bits {
        DataBits::Five => 5,
        DataBits::Six => 6,
        DataBits::Seven => 7,
        DataBits::Eight => 8,
      },
      match self.parity {
        Parity::None => 'N',
        Parity::Odd => 'O',
        Parity::Even => 'E',
      },
      match self.stop_bits {
        StopBits::One => 1,
        StopBits::Two => 2,
      }
    )
  }
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct Params {
  read_timeout: futures_time::time::Duration,
  write_timeout: futures_time::time::Duration,
}

impl Params {
  pub(crate) fn new(
    read_timeout: chrono::Duration,
    write_timeout: chrono::Duration,
  ) -> Self {
    Self {
      read_timeout: timeout_from_chrono(read_timeout),
      write_timeout: timeout_from_chrono(write_timeout),
    }
  }
}

impl Default for Params {
  fn default() -> Self {
    Self::new(
      chrono::Duration::milliseconds(1000),
      chrono::Duration::milliseconds(1000),
    )
  }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ConnectError {
  #[error("Failed opening serial port {path}")]
  Open {
    path: String,
    #[source]
    source: tokio_serial::Error,
  },
}

#[derive(Debug, thiserror::Error)]
enum TransactError {
  #[error("Register quantity {0} is outside 1..=125")]
  Quantity(Quantity),

  #[error("Failed discarding stale input: {0}")]
  Discard(io::Error),

  #[error("Failed writing request: {0}")]
  Write(io::Error),

  #[error("Write timed out")]
  WriteTimeout,

  #[error("Failed reading response: {0}")]
  Read(io::Error),

  #[error("Read timed out with {received} of {expected} bytes")]
  ReadTimeout { received: usize, expected: usize },

  #[error(transparent)]
  Frame(#[from] FrameError),
}

#[derive(Debug)]
pub(crate) struct Connection<TLink: Link = SerialStream> {
  link: TLink,
  params: Params,
}

impl Connection<SerialStream> {
  #[tracing::instrument(skip(serial, params), fields(serial = %serial))]
  pub(crate) fn open(
    serial: &SerialParams,
    params: Params,
  ) -> Result<Self, ConnectError> {
    let builder = tokio_serial::new(&serial.path, serial.baud_rate)
      .parity(serial.parity)
      .data_bits(serial.data_bits)
      .stop_bits(serial.stop_bits)
      .timeout(std::time::Duration::from_millis(
        params.read_timeout.as_millis() as u64,
      ));
    let stream =
      SerialStream::open(&builder).map_err(|source| ConnectError::Open {
        path: serial.path.clone(),
        source,
      })?;

    tracing::debug!("Opened serial port");

    Ok(Self::attach(stream, params))
  }
}

impl<TLink: Link> Connection<TLink> {
  pub(crate) fn attach(link: TLink, params: Params) -> Self {
    Self { link, params }
  }

  async fn transact(
    &mut self,
    slave: u8,
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
  ) -> Result<Vec<u8>, TransactError> {
    if quantity == 0 || quantity > MAX_READ_QUANTITY {
      return Err(TransactError::Quantity(quantity));
    }

    self.link.discard_input().map_err(TransactError::Discard)?;

    let request = frame::request(slave, function, address, quantity);
    self
      .link
      .write_all(&request)
      .timeout(self.params.write_timeout)
      .await
      .map_err(|_| TransactError::WriteTimeout)?
      .map_err(TransactError::Write)?;

    let expected = frame::response_length(quantity);
    let mut buffer = vec![0u8; expected];
    let mut received = 0usize;
    let read_timeout = self.params.read_timeout;
    let link = &mut self.link;
    let read = async {
      while received < expected {
        let count = link.read(&mut buffer[received..]).await?;
        if count == 0 {
          return Err(io::Error::from(io::ErrorKind::UnexpectedEof));
        }
        received += count;

        // NOTE: exception responses are shorter than the expected frame
        if frame::is_exception(&buffer[..received], function) {
          break;
        }
      }
      Ok::<_, io::Error>(())
    };
    let outcome = read.timeout(read_timeout).await;
    match outcome {
      Ok(Ok(())) => {}
      Ok(Err(error)) => return Err(TransactError::Read(error)),
      Err(_) => return Err(TransactError::ReadTimeout { received, expected }),
    }

    let payload =
      frame::parse_response(&buffer[..received], slave, function, quantity)?;

    Ok(payload.to_vec())
  }
}

#[async_trait::async_trait]
impl<TLink: Link> Transport for Connection<TLink> {
  #[tracing::instrument(skip(self))]
  async fn read_registers(
    &mut self,
    slave: u8,
    function: FunctionCode,
    address: Address,
    quantity: Quantity,
  ) -> Result<Vec<u8>, ReadError> {
    self
      .transact(slave, function, address, quantity)
      .await
      .map_err(|error| {
        tracing::debug!(%error, "Register read failed");
        ReadError::ReadFailed {
          slave,
          function,
          address,
          quantity,
        }
      })
  }
}

fn timeout_from_chrono(
  timeout: chrono::Duration,
) -> futures_time::time::Duration {
  futures_time::time::Duration::from_millis(
    timeout.num_milliseconds().max(0) as u64,
  )
}

#[cfg(test)]
mod tests {
  use futures::FutureExt as _;
  use tokio::io::DuplexStream;

  use super::*;

  impl Link for DuplexStream {
    fn discard_input(&mut self) -> io::Result<()> {
      let mut sink = [0u8; 64];
      while let Some(read) = self.read(&mut sink).now_or_never() {
        if read? == 0 {
          break;
        }
      }
      Ok(())
    }
  }

  fn params(read_timeout: i64) -> Params {
    Params::new(
      chrono::Duration::milliseconds(read_timeout),
      chrono::Duration::milliseconds(1000),
    )
  }

  /// Answers a single request with `response` and hands back the request.
  fn device(
    mut stream: DuplexStream,
    response: Vec<u8>,
  ) -> tokio::task::JoinHandle<[u8; frame::REQUEST_LENGTH]> {
    tokio::spawn(async move {
      let mut request = [0u8; frame::REQUEST_LENGTH];
      #[allow(clippy::unwrap_used)] // NOTE: the client always writes a request
      stream.read_exact(&mut request).await.unwrap();
      if !response.is_empty() {
        #[allow(clippy::unwrap_used)] // NOTE: the client keeps its end open
        stream.write_all(&response).await.unwrap();
      }
      // NOTE: hold the stream so silence is a timeout rather than EOF
      tokio::time::sleep(std::time::Duration::from_millis(500)).await;
      request
    })
  }

  fn connection(
    response: Vec<u8>,
    read_timeout: i64,
  ) -> (
    Connection<DuplexStream>,
    tokio::task::JoinHandle<[u8; frame::REQUEST_LENGTH]>,
  ) {
    let (client, server) = tokio::io::duplex(512);
    let handle = device(server, response);
    (Connection::attach(client, params(read_timeout)), handle)
  }

  #[tokio::test]
  async fn reads_payload_from_valid_response() {
    let payload = [0x01, 0x2C, 0x00, 0x07];
    let response =
      frame::response(1, FunctionCode::ReadHoldingRegisters, &payload);
    let (mut connection, handle) = connection(response, 1000);

    let result = connection
      .read_registers(1, FunctionCode::ReadHoldingRegisters, 0, 2)
      .await;
    assert_eq!(result.ok(), Some(payload.to_vec()));

    let request = handle.await.ok();
    assert_eq!(
      request,
      Some(frame::request(1, FunctionCode::ReadHoldingRegisters, 0, 2))
    );
  }

  #[tokio::test]
  async fn corrupted_crc_fails() {
    let mut response =
      frame::response(1, FunctionCode::ReadInputRegisters, &[0x00, 0x01]);
    if let Some(last) = response.last_mut() {
      *last ^= 0xFF;
    }
    let (mut connection, _handle) = connection(response, 1000);

    let result = connection
      .read_registers(1, FunctionCode::ReadInputRegisters, 0, 1)
      .await;
    assert!(matches!(result, Err(ReadError::ReadFailed { slave: 1, .. })));
  }

  #[tokio::test]
  async fn response_from_other_slave_fails() {
    let response =
      frame::response(2, FunctionCode::ReadHoldingRegisters, &[0x00, 0x01]);
    let (mut connection, _handle) = connection(response, 1000);

    let result = connection
      .read_registers(1, FunctionCode::ReadHoldingRegisters, 0, 1)
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn silent_device_times_out() {
    let (mut connection, _handle) = connection(Vec::new(), 50);

    let started = tokio::time::Instant::now();
    let result = connection
      .read_registers(1, FunctionCode::ReadHoldingRegisters, 0, 1)
      .await;
    assert!(result.is_err());
    assert!(started.elapsed() < std::time::Duration::from_millis(450));
  }

  #[tokio::test]
  async fn exception_response_fails_without_waiting() {
    let mut response = vec![0x01, 0x83, 0x02];
    let crc = frame::crc16(&response);
    response.extend_from_slice(&crc.to_le_bytes());
    let (mut connection, _handle) = connection(response, 5000);

    let started = tokio::time::Instant::now();
    let result = connection
      .read_registers(1, FunctionCode::ReadHoldingRegisters, 0, 10)
      .await;
    assert!(result.is_err());
    assert!(started.elapsed() < std::time::Duration::from_millis(1000));
  }

  #[tokio::test]
  async fn stale_input_is_discarded_before_request() {
    let (client, mut server) = tokio::io::duplex(512);
    #[allow(clippy::unwrap_used)] // NOTE: duplex buffer has room
    server.write_all(&[0xDE, 0xAD, 0xBE, 0xEF]).await.unwrap();
    let response =
      frame::response(1, FunctionCode::ReadHoldingRegisters, &[0x12, 0x34]);
    let handle = device(server, response);
    let mut connection = Connection::attach(client, params(1000));

    let result = connection
      .read_registers(1, FunctionCode::ReadHoldingRegisters, 7, 1)
      .await;
    assert_eq!(result.ok(), Some(vec![0x12, 0x34]));
    assert!(handle.await.is_ok());
  }

  #[tokio::test]
  async fn invalid_quantity_never_touches_the_link() {
    let (client, _server) = tokio::io::duplex(512);
    let mut connection = Connection::attach(client, params(1000));

    for quantity in [0, MAX_READ_QUANTITY + 1] {
      let result = connection
        .read_registers(1, FunctionCode::ReadHoldingRegisters, 0, quantity)
        .await;
      assert!(result.is_err());
    }
  }

  #[test]
  fn params_convert_chrono_timeouts() {
    let params = Params::new(
      chrono::Duration::milliseconds(250),
      chrono::Duration::milliseconds(-750),
    );
    assert_eq!(params.read_timeout.as_millis(), 250);
    assert_eq!(params.write_timeout.as_millis(), 0);
  }

  #[test]
  fn serial_params_display_line_settings() {
    let serial = SerialParams {
      path: "/dev/ttyUSB0".to_owned(),
      baud_rate: 9600,
      parity: Parity::Even,
      data_bits: DataBits::Eight,
      stop_bits: StopBits::One,
    };
    assert_eq!(serial.to_string(), "/dev/ttyUSB0@9600 8E1");
  }
}
