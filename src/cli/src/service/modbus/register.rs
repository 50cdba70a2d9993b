use std::fmt::Display;
use std::str::FromStr;

use tokio_modbus::{Address, Quantity};

use super::frame::FunctionCode;
use super::span::*;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DataType {
  UInt16,
  Int16,
  UInt32,
  Int32,
}

impl DataType {
  pub(crate) fn word_length(self) -> Quantity {
    match self {
      DataType::UInt16 => 1,
      DataType::Int16 => 1,
      DataType::UInt32 => 2,
      DataType::Int32 => 2,
    }
  }

  pub(crate) fn as_str(self) -> &'static str {
    match self {
      DataType::UInt16 => "uint16",
      DataType::Int16 => "int16",
      DataType::UInt32 => "uint32",
      DataType::Int32 => "int32",
    }
  }
}

impl Display for DataType {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for DataType {
  type Err = DefinitionError;

  fn from_str(raw: &str) -> Result<Self, Self::Err> {
    match raw.trim().to_ascii_lowercase().as_str() {
      "uint16" | "u16" => Ok(DataType::UInt16),
      "int16" | "s16" | "i16" => Ok(DataType::Int16),
      "uint32" | "u32" => Ok(DataType::UInt32),
      "int32" | "s32" | "i32" => Ok(DataType::Int32),
      _ => Err(DefinitionError::UnsupportedDataType(raw.trim().to_owned())),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum DefinitionError {
  #[error("Unsupported data type {0:?}")]
  UnsupportedDataType(String),

  #[error("Word length {length} does not fit {data_type} ({expected} words)")]
  WordLength {
    length: Quantity,
    data_type: DataType,
    expected: Quantity,
  },
}

/// A single named value on the device, validated at construction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RegisterDefinition {
  group: String,
  name: String,
  function: FunctionCode,
  address: Address,
  word_length: Quantity,
  data_type: DataType,
  scale: f64,
  unit: Option<String>,
}

impl RegisterDefinition {
  pub(crate) fn new(
    group: impl Into<String>,
    name: impl Into<String>,
    function: FunctionCode,
    address: Address,
    word_length: Quantity,
    data_type: DataType,
  ) -> Result<Self, DefinitionError> {
    let expected = data_type.word_length();
    if word_length != expected {
      return Err(DefinitionError::WordLength {
        length: word_length,
        data_type,
        expected,
      });
    }

    Ok(Self {
      group: group.into(),
      name: name.into(),
      function,
      address,
      word_length,
      data_type,
      scale: 1.0,
      unit: None,
    })
  }

  pub(crate) fn with_scale(mut self, scale: f64) -> Self {
    self.scale = scale;
    self
  }

  pub(crate) fn with_unit(mut self, unit: Option<String>) -> Self {
    self.unit = unit;
    self
  }

  pub(crate) fn group(&self) -> &str {
    &self.group
  }

  pub(crate) fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn function(&self) -> FunctionCode {
    self.function
  }

  pub(crate) fn data_type(&self) -> DataType {
    self.data_type
  }

  pub(crate) fn scale(&self) -> f64 {
    self.scale
  }

  pub(crate) fn unit(&self) -> Option<&str> {
    self.unit.as_deref()
  }

  pub(crate) fn byte_length(&self) -> usize {
    self.word_length as usize * 2
  }
}

impl Span for RegisterDefinition {
  fn address(&self) -> Address {
    self.address
  }

  fn quantity(&self) -> Quantity {
    self.word_length
  }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub(crate) struct RegisterValue {
  pub(crate) scaled_value: f64,
  pub(crate) raw_value: f64,
  pub(crate) data_type: DataType,
  pub(crate) scale: f64,
  pub(crate) unit: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_data_types_case_insensitively() {
    assert_eq!("UInt16".parse::<DataType>(), Ok(DataType::UInt16));
    assert_eq!(" int16 ".parse::<DataType>(), Ok(DataType::Int16));
    assert_eq!("U32".parse::<DataType>(), Ok(DataType::UInt32));
    assert_eq!("int32".parse::<DataType>(), Ok(DataType::Int32));
  }

  #[test]
  fn rejects_floating_and_boolean_layouts() {
    for raw in ["float32", "float", "double", "bool", "string"] {
      assert!(matches!(
        raw.parse::<DataType>(),
        Err(DefinitionError::UnsupportedDataType(_))
      ));
    }
  }

  #[test]
  fn construction_checks_word_length() {
    let definition = RegisterDefinition::new(
      "grid",
      "power",
      FunctionCode::ReadHoldingRegisters,
      10,
      2,
      DataType::Int32,
    );
    assert!(definition.is_ok());

    let mismatch = RegisterDefinition::new(
      "grid",
      "voltage",
      FunctionCode::ReadHoldingRegisters,
      0,
      2,
      DataType::UInt16,
    );
    assert_eq!(
      mismatch,
      Err(DefinitionError::WordLength {
        length: 2,
        data_type: DataType::UInt16,
        expected: 1,
      })
    );
  }

  #[test]
  fn definition_spans_its_words() -> Result<(), DefinitionError> {
    let definition = RegisterDefinition::new(
      "battery",
      "energy",
      FunctionCode::ReadInputRegisters,
      0xFFFF,
      2,
      DataType::UInt32,
    )?
    .with_scale(0.1)
    .with_unit(Some("kWh".to_owned()));

    assert_eq!(definition.byte_length(), 4);
    assert_eq!(definition.end(), 0x1_0001);
    assert_eq!(definition.unit(), Some("kWh"));
    assert_eq!(definition.scale(), 0.1);
    Ok(())
  }
}
