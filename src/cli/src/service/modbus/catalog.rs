use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio_modbus::{Address, Quantity};

use super::frame::FunctionCode;
use super::register::*;
use super::span::Span;

/// Register definitions keyed by group, each group sorted by function code,
/// address and name.
pub(crate) type Catalog = BTreeMap<String, Vec<Arc<RegisterDefinition>>>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum CatalogError {
  #[error("Register map not found at {0:?}")]
  NotFound(PathBuf),

  #[error("Failed reading register map")]
  Read(#[from] std::io::Error),

  #[error("Register map is missing an extension")]
  MissingExtension,

  #[error("Register map has invalid extension")]
  InvalidExtension,

  #[error("Failed deserializing register map from json")]
  DeserializationJson(#[from] serde_json::Error),

  #[error("Failed deserializing register map from yaml")]
  DeserializationYaml(#[from] serde_yaml::Error),

  #[error("Register map yields no usable registers")]
  Empty,
}

/// One loosely typed row of a device map.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub(crate) struct Row {
  #[serde(alias = "Active")]
  pub(crate) active: Field,

  #[serde(alias = "ReadFunctionCode", alias = "function_code")]
  pub(crate) read_function_code: Field,

  #[serde(alias = "ReadAddress", alias = "address")]
  pub(crate) read_address: Field,

  #[serde(alias = "Length", alias = "word_length")]
  pub(crate) length: Field,

  #[serde(alias = "Name")]
  pub(crate) name: Field,

  #[serde(alias = "DataType", alias = "DateType", alias = "date_type")]
  pub(crate) data_type: Field,

  #[serde(alias = "Factor", alias = "scale")]
  pub(crate) factor: Field,

  #[serde(alias = "Unit")]
  pub(crate) unit: Field,

  #[serde(alias = "Group")]
  pub(crate) group: Field,
}

/// Any scalar the map may carry; `null` and empty text both mean absent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub(crate) struct Field(Option<serde_json::Value>);

impl Field {
  pub(crate) fn text(&self) -> Option<String> {
    let text = match &self.0 {
      None | Some(serde_json::Value::Null) => return None,
      Some(serde_json::Value::String(text)) => text.trim().to_owned(),
      Some(serde_json::Value::Number(number)) => number.to_string(),
      Some(serde_json::Value::Bool(flag)) => flag.to_string(),
      Some(_) => return None,
    };

    if text.is_empty() || text.eq_ignore_ascii_case("null") {
      return None;
    }

    Some(text)
  }
}

#[tracing::instrument]
pub(crate) async fn load(path: &Path) -> Result<Catalog, CatalogError> {
  let raw = match tokio::fs::read_to_string(path).await {
    Ok(raw) => raw,
    Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
      return Err(CatalogError::NotFound(path.to_owned()))
    }
    Err(error) => return Err(error.into()),
  };

  let catalog = match path.extension().and_then(|str| str.to_str()) {
    None => return Err(CatalogError::MissingExtension),
    Some("json") => parse_json(raw.as_str())?,
    Some("yaml" | "yml") => {
      from_rows(serde_yaml::from_str::<Vec<Row>>(raw.as_str())?)
    }
    Some(_) => return Err(CatalogError::InvalidExtension),
  };

  if catalog.is_empty() {
    return Err(CatalogError::Empty);
  }

  tracing::info!(
    groups = catalog.len(),
    registers = catalog.values().map(Vec::len).sum::<usize>(),
    "Loaded register map"
  );

  Ok(catalog)
}

pub(crate) fn parse_json(json: &str) -> Result<Catalog, CatalogError> {
  let rows = serde_json::from_str::<Vec<Row>>(json)?;

  Ok(from_rows(rows))
}

pub(crate) fn from_rows<TIntoIterator: IntoIterator<Item = Row>>(
  rows: TIntoIterator,
) -> Catalog {
  let mut catalog = Catalog::new();
  for (index, row) in rows.into_iter().enumerate() {
    let Some(definition) = to_definition(index, row) else {
      continue;
    };

    catalog
      .entry(definition.group().to_owned())
      .or_default()
      .push(Arc::new(definition));
  }

  for (group, definitions) in catalog.iter_mut() {
    definitions.sort_by(|left, right| {
      (left.function(), left.address(), left.name()).cmp(&(
        right.function(),
        right.address(),
        right.name(),
      ))
    });

    let mut seen = std::collections::HashSet::new();
    definitions.retain(|definition| {
      let unique = seen.insert(definition.name().to_owned());
      if !unique {
        tracing::warn!(
          group,
          name = definition.name(),
          "Dropping duplicate register name"
        );
      }
      unique
    });
  }

  catalog
}

fn to_definition(index: usize, row: Row) -> Option<RegisterDefinition> {
  if !row.active.text().as_deref().is_some_and(parse_flag) {
    return None;
  }

  let function = row
    .read_function_code
    .text()
    .as_deref()
    .and_then(parse_integer::<u8>)
    .and_then(FunctionCode::from_code)?;

  let address = row
    .read_address
    .text()
    .as_deref()
    .and_then(parse_integer::<Address>)?;
  let length = row
    .length
    .text()
    .as_deref()
    .and_then(parse_integer::<Quantity>)
    .filter(|length| *length > 0)?;

  let (Some(name), Some(group), Some(data_type)) =
    (row.name.text(), row.group.text(), row.data_type.text())
  else {
    tracing::trace!(index, "Skipping register row with missing fields");
    return None;
  };

  let scale = parse_scale(row.factor.text().as_deref());

  let data_type = match data_type.parse::<DataType>() {
    Ok(data_type) => data_type,
    Err(error) => {
      tracing::warn!(%error, index, %group, %name, "Skipping register");
      return None;
    }
  };

  let definition = RegisterDefinition::new(
    group, name, function, address, length, data_type,
  );
  match definition {
    Ok(definition) => {
      Some(definition.with_scale(scale).with_unit(row.unit.text()))
    }
    Err(error) => {
      tracing::warn!(%error, index, address, "Skipping register");
      None
    }
  }
}

fn parse_flag(raw: &str) -> bool {
  matches!(
    raw.trim().to_ascii_lowercase().as_str(),
    "true" | "1" | "yes" | "y"
  )
}

trait FromRadix: Sized {
  fn from_radix(raw: &str, radix: u32) -> Option<Self>;
}

macro_rules! impl_from_radix {
  ($type: ty) => {
    impl FromRadix for $type {
      fn from_radix(raw: &str, radix: u32) -> Option<Self> {
        <$type>::from_str_radix(raw, radix).ok()
      }
    }
  };
}

impl_from_radix!(u8);
impl_from_radix!(u16);

fn parse_integer<T: FromRadix>(raw: &str) -> Option<T> {
  let raw = raw.trim();
  match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
    Some(hex) => T::from_radix(hex, 16),
    None => T::from_radix(raw, 10),
  }
}

fn parse_float(raw: &str) -> Option<f64> {
  raw
    .trim()
    .parse::<f64>()
    .ok()
    .filter(|value| value.is_finite())
}

/// Parses a scale factor written either as a number or as
/// `numerator/denominator`, defaulting to 1.
pub(crate) fn parse_scale(raw: Option<&str>) -> f64 {
  let text = match raw.map(str::trim) {
    None => return 1.0,
    Some(text) if text.is_empty() || text.eq_ignore_ascii_case("null") => {
      return 1.0
    }
    Some(text) => text,
  };

  if text.contains('/') {
    let parts = text
      .split('/')
      .map(str::trim)
      .filter(|part| !part.is_empty())
      .collect::<Vec<_>>();

    if let [numerator, denominator] = parts.as_slice() {
      if let (Some(numerator), Some(denominator)) =
        (parse_float(numerator), parse_float(denominator))
      {
        if denominator.abs() > 0.0 {
          return numerator / denominator;
        }
      }
    }

    return parts
      .first()
      .and_then(|numerator| parse_float(numerator))
      .unwrap_or(1.0);
  }

  parse_float(text).unwrap_or(1.0)
}
