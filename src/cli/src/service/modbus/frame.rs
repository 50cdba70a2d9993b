use std::fmt::Display;

use tokio_modbus::{Address, Quantity};

pub(crate) const REQUEST_LENGTH: usize = 8;

// NOTE: protocol ceiling for read holding/input registers
pub(crate) const MAX_READ_QUANTITY: Quantity = 125;

const HEADER_LENGTH: usize = 3;
const CRC_LENGTH: usize = 2;
const EXCEPTION_LENGTH: usize = 5;
const EXCEPTION_FLAG: u8 = 0x80;

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum FunctionCode {
  ReadHoldingRegisters,
  ReadInputRegisters,
}

impl FunctionCode {
  pub(crate) fn code(self) -> u8 {
    match self {
      FunctionCode::ReadHoldingRegisters => 0x03,
      FunctionCode::ReadInputRegisters => 0x04,
    }
  }

  pub(crate) fn from_code(code: u8) -> Option<Self> {
    match code {
      0x03 => Some(FunctionCode::ReadHoldingRegisters),
      0x04 => Some(FunctionCode::ReadInputRegisters),
      _ => None,
    }
  }
}

impl Display for FunctionCode {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:#04X}", self.code())
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum FrameError {
  #[error("Response is too short ({0} bytes)")]
  TooShort(usize),

  #[error("Slave mismatch (expected {expected}, received {received})")]
  Slave { expected: u8, received: u8 },

  #[error("Function code {received:#04X} does not match {expected:#04X}")]
  Function { expected: u8, received: u8 },

  #[error("Device responded with exception code {0:#04X}")]
  Exception(u8),

  #[error("Byte count mismatch (expected {expected}, received {received})")]
  ByteCount { expected: usize, received: u8 },

  #[error("CRC mismatch (expected {expected:#06X}, received {received:#06X})")]
  Crc { expected: u16, received: u16 },
}

/// CRC-16/MODBUS: reflected polynomial 0xA001 with initial value 0xFFFF.
pub(crate) fn crc16(data: &[u8]) -> u16 {
  let mut crc: u16 = 0xFFFF;
  for &byte in data {
    crc ^= byte as u16;
    for _ in 0..8 {
      let lsb = crc & 0x0001 != 0;
      crc >>= 1;
      if lsb {
        crc ^= 0xA001;
      }
    }
  }
  crc
}

pub(crate) fn request(
  slave: u8,
  function: FunctionCode,
  address: Address,
  quantity: Quantity,
) -> [u8; REQUEST_LENGTH] {
  let [address_hi, address_lo] = address.to_be_bytes();
  let [quantity_hi, quantity_lo] = quantity.to_be_bytes();
  let mut frame = [
    slave,
    function.code(),
    address_hi,
    address_lo,
    quantity_hi,
    quantity_lo,
    0,
    0,
  ];
  let [crc_lo, crc_hi] =
    crc16(&frame[..REQUEST_LENGTH - CRC_LENGTH]).to_le_bytes();
  frame[6] = crc_lo;
  frame[7] = crc_hi;
  frame
}

/// Full length of a normal read response carrying `quantity` registers.
pub(crate) fn response_length(quantity: Quantity) -> usize {
  HEADER_LENGTH + quantity as usize * 2 + CRC_LENGTH
}

/// Whether the bytes received so far form a complete exception response for
/// the given function.
pub(crate) fn is_exception(received: &[u8], function: FunctionCode) -> bool {
  received.len() >= EXCEPTION_LENGTH
    && received[1] == function.code() | EXCEPTION_FLAG
}

/// Validates a read response and returns its register payload.
pub(crate) fn parse_response(
  frame: &[u8],
  slave: u8,
  function: FunctionCode,
  quantity: Quantity,
) -> Result<&[u8], FrameError> {
  if frame.len() < EXCEPTION_LENGTH {
    return Err(FrameError::TooShort(frame.len()));
  }

  if frame[0] != slave {
    return Err(FrameError::Slave {
      expected: slave,
      received: frame[0],
    });
  }

  if is_exception(frame, function) {
    check_crc(&frame[..EXCEPTION_LENGTH])?;
    return Err(FrameError::Exception(frame[2]));
  }

  if frame[1] != function.code() {
    return Err(FrameError::Function {
      expected: function.code(),
      received: frame[1],
    });
  }

  let expected = quantity as usize * 2;
  if frame[2] as usize != expected {
    return Err(FrameError::ByteCount {
      expected,
      received: frame[2],
    });
  }

  if frame.len() != response_length(quantity) {
    return Err(FrameError::TooShort(frame.len()));
  }

  check_crc(frame)?;

  Ok(&frame[HEADER_LENGTH..frame.len() - CRC_LENGTH])
}

fn check_crc(frame: &[u8]) -> Result<(), FrameError> {
  let (body, trailer) = frame.split_at(frame.len() - CRC_LENGTH);
  let expected = crc16(body);
  let received = u16::from_le_bytes([trailer[0], trailer[1]]);
  if expected != received {
    return Err(FrameError::Crc { expected, received });
  }

  Ok(())
}

#[cfg(test)]
pub(crate) fn response(
  slave: u8,
  function: FunctionCode,
  payload: &[u8],
) -> Vec<u8> {
  let mut frame =
    Vec::with_capacity(payload.len() + HEADER_LENGTH + CRC_LENGTH);
  frame.push(slave);
  frame.push(function.code());
  frame.push(payload.len() as u8);
  frame.extend_from_slice(payload);
  let crc = crc16(&frame);
  frame.extend_from_slice(&crc.to_le_bytes());
  frame
}
