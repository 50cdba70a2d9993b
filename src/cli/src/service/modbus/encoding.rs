use super::register::*;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub(crate) enum DecodeError {
  #[error("Expected at least {expected} bytes but received {received}")]
  InsufficientBytes { expected: usize, received: usize },

  #[error("Scaled value {raw} * {scale} is not finite")]
  NotFinite { raw: f64, scale: f64 },
}

// NOTE: registers travel big-endian and 32-bit values put the high word first
macro_rules! decode_integer {
  ($type: ty, $bytes: ident) => {{
    const WIDTH: usize = std::mem::size_of::<$type>();
    let slice: [u8; WIDTH] = $bytes
      .get(..WIDTH)
      .and_then(|slice| slice.try_into().ok())
      .ok_or(DecodeError::InsufficientBytes {
        expected: WIDTH,
        received: $bytes.len(),
      })?;
    f64::from(<$type>::from_be_bytes(slice))
  }};
}

/// Decodes the unscaled value of `data_type` from the start of `bytes`.
pub(crate) fn decode_raw(
  data_type: DataType,
  bytes: &[u8],
) -> Result<f64, DecodeError> {
  let value = match data_type {
    DataType::UInt16 => decode_integer!(u16, bytes),
    DataType::Int16 => decode_integer!(i16, bytes),
    DataType::UInt32 => decode_integer!(u32, bytes),
    DataType::Int32 => decode_integer!(i32, bytes),
  };

  Ok(value)
}

/// Decodes the scaled value of `definition` from the start of `bytes`.
pub(crate) fn decode(
  definition: &RegisterDefinition,
  bytes: &[u8],
) -> Result<f64, DecodeError> {
  if bytes.len() < definition.byte_length() {
    return Err(DecodeError::InsufficientBytes {
      expected: definition.byte_length(),
      received: bytes.len(),
    });
  }

  let raw = decode_raw(definition.data_type(), bytes)?;
  let scale = definition.scale();
  let scaled = raw * scale;
  if !scaled.is_finite() {
    return Err(DecodeError::NotFinite { raw, scale });
  }

  Ok(scaled)
}

pub(crate) fn decode_value(
  definition: &RegisterDefinition,
  bytes: &[u8],
) -> Result<RegisterValue, DecodeError> {
  let scaled_value = decode(definition, bytes)?;
  let raw_value = decode_raw(definition.data_type(), bytes)?;
  Ok(RegisterValue {
    scaled_value,
    raw_value,
    data_type: definition.data_type(),
    scale: definition.scale(),
    unit: definition.unit().map(ToOwned::to_owned),
  })
}

#[cfg(test)]
mod tests {
  use super::super::frame::FunctionCode;
  use super::*;

  fn definition(data_type: DataType, scale: f64) -> RegisterDefinition {
    #[allow(clippy::unwrap_used)] // NOTE: word length comes from the type
    let definition = RegisterDefinition::new(
      "test",
      data_type.as_str(),
      FunctionCode::ReadHoldingRegisters,
      0,
      data_type.word_length(),
      data_type,
    )
    .unwrap();

    definition.with_scale(scale)
  }

  #[test]
  fn integer_layouts_round_trip_exactly() {
    let cases: Vec<(DataType, Vec<u8>, f64)> = vec![
      (DataType::UInt16, 0u16.to_be_bytes().to_vec(), 0.0),
      (DataType::UInt16, 54321u16.to_be_bytes().to_vec(), 54321.0),
      (DataType::UInt16, u16::MAX.to_be_bytes().to_vec(), 65535.0),
      (DataType::Int16, (-1234i16).to_be_bytes().to_vec(), -1234.0),
      (DataType::Int16, i16::MIN.to_be_bytes().to_vec(), -32768.0),
      (DataType::UInt32, 3_000_000_000u32.to_be_bytes().to_vec(), 3e9),
      (DataType::UInt32, u32::MAX.to_be_bytes().to_vec(), 4294967295.0),
      (DataType::Int32, (-123i32).to_be_bytes().to_vec(), -123.0),
      (DataType::Int32, i32::MIN.to_be_bytes().to_vec(), -2147483648.0),
    ];

    for (data_type, bytes, expected) in cases {
      assert_eq!(
        decode(&definition(data_type, 1.0), &bytes),
        Ok(expected),
        "{data_type}"
      );
    }
  }

  #[test]
  fn scaling_can_be_reversed() {
    for scale in [0.1, 0.01, 10.0, 1.0 / 3.0] {
      let scaled = decode(&definition(DataType::UInt16, scale), &[0x01, 0x2C])
        .unwrap_or(f64::NAN);
      assert!((scaled / scale - 300.0).abs() < 1e-9, "{scale}");
    }
  }

  #[test]
  fn first_register_is_the_high_word() {
    assert_eq!(
      decode_raw(DataType::UInt32, &[0x00, 0x01, 0x00, 0x02]),
      Ok(65538.0)
    );
    assert_eq!(
      decode_raw(DataType::Int32, &[0xFF, 0xFF, 0xFF, 0x85]),
      Ok(-123.0)
    );
  }

  #[test]
  fn short_slices_fail_without_panicking() {
    assert_eq!(
      decode(&definition(DataType::UInt32, 1.0), &[0x00, 0x01, 0x02]),
      Err(DecodeError::InsufficientBytes {
        expected: 4,
        received: 3
      })
    );
    assert!(decode(&definition(DataType::Int16, 1.0), &[]).is_err());
    assert!(decode(&definition(DataType::UInt16, 1.0), &[0x01]).is_err());
  }

  #[test]
  fn extra_bytes_are_ignored() {
    assert_eq!(
      decode(&definition(DataType::Int16, 1.0), &[0xFF, 0xFE, 0xAA, 0xBB]),
      Ok(-2.0)
    );
  }

  #[test]
  fn non_finite_results_are_rejected() {
    assert!(matches!(
      decode(&definition(DataType::UInt16, f64::INFINITY), &[0x00, 0x01]),
      Err(DecodeError::NotFinite { .. })
    ));
    assert!(matches!(
      decode(&definition(DataType::UInt16, f64::NAN), &[0x00, 0x01]),
      Err(DecodeError::NotFinite { .. })
    ));
  }

  #[test]
  fn value_carries_raw_and_metadata() {
    let definition = definition(DataType::UInt16, 0.1)
      .with_unit(Some("V".to_owned()));
    let value = decode_value(&definition, &[0x01, 0x2C]);
    assert_eq!(
      value,
      Ok(RegisterValue {
        scaled_value: 300.0 * 0.1,
        raw_value: 300.0,
        data_type: DataType::UInt16,
        scale: 0.1,
        unit: Some("V".to_owned()),
      })
    );
  }
}
