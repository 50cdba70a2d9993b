use std::sync::Arc;

use itertools::Itertools;
use tokio_modbus::{Address, Quantity};

use super::catalog::Catalog;
use super::frame::{FunctionCode, MAX_READ_QUANTITY};
use super::register::RegisterDefinition;
use super::span::*;

pub(crate) const DEFAULT_MAX_REGISTERS: Quantity = 120;
pub(crate) const DEFAULT_MAX_GAP: Quantity = 8;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Limits {
  max_registers: Quantity,
  max_gap: Quantity,
}

impl Limits {
  /// Register cap is kept between one 32-bit value and the protocol ceiling.
  pub(crate) fn new(max_registers: Quantity, max_gap: Quantity) -> Self {
    Self {
      max_registers: max_registers.clamp(2, MAX_READ_QUANTITY),
      max_gap,
    }
  }

  pub(crate) fn max_registers(self) -> Quantity {
    self.max_registers
  }

  pub(crate) fn max_gap(self) -> Quantity {
    self.max_gap
  }
}

impl Default for Limits {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_REGISTERS, DEFAULT_MAX_GAP)
  }
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Slice {
  pub(crate) definition: Arc<RegisterDefinition>,
  pub(crate) byte_offset: usize,
}

/// One read transaction covering a run of registers from a single group.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ReadBatch {
  pub(crate) group: String,
  pub(crate) function: FunctionCode,
  pub(crate) address: Address,
  pub(crate) quantity: Quantity,
  pub(crate) slices: Vec<Slice>,
}

impl Span for ReadBatch {
  fn address(&self) -> Address {
    self.address
  }

  fn quantity(&self) -> Quantity {
    self.quantity
  }
}

impl ReadBatch {
  fn start(group: &str, definition: Arc<RegisterDefinition>) -> Self {
    Self {
      group: group.to_owned(),
      function: definition.function(),
      address: definition.address(),
      quantity: definition.quantity(),
      slices: vec![Slice {
        definition,
        byte_offset: 0,
      }],
    }
  }

  fn accepts(&self, definition: &RegisterDefinition, limits: Limits) -> bool {
    if definition.function() != self.function
      || definition.address() < self.address
    {
      return false;
    }

    let end = self.end();
    let address = definition.address() as u32;
    if address > end && address - end > limits.max_gap() as u32 {
      return false;
    }

    definition.end() - self.address as u32 <= limits.max_registers() as u32
  }

  fn push(&mut self, definition: Arc<RegisterDefinition>) {
    let required = (definition.end() - self.address as u32) as Quantity;
    self.quantity = self.quantity.max(required);
    self.slices.push(Slice {
      byte_offset: (definition.address() - self.address) as usize * 2,
      definition,
    });
  }

  pub(crate) fn byte_length(&self) -> usize {
    self.quantity as usize * 2
  }
}

/// Merges each group's definitions into as few reads as the limits allow.
///
/// Groups and function codes are planned independently, so a batch never
/// mixes either. Within a partition definitions are walked by address and a
/// definition joins the open batch while the batch stays under the register
/// cap and the hole it would open stays within the gap tolerance.
pub(crate) fn plan(catalog: &Catalog, limits: Limits) -> Vec<ReadBatch> {
  let mut batches = Vec::new();

  for (group, definitions) in catalog {
    let ordered = definitions
      .iter()
      .cloned()
      .sorted_by_key(|definition| {
        (
          definition.function(),
          definition.address(),
          definition.quantity(),
        )
      })
      .group_by(|definition| definition.function());

    for (_, partition) in &ordered {
      let mut current: Option<ReadBatch> = None;
      for definition in partition {
        match current.as_mut() {
          Some(batch) if batch.accepts(&definition, limits) => {
            batch.push(definition)
          }
          _ => {
            batches.extend(current.take());
            current = Some(ReadBatch::start(group, definition));
          }
        }
      }
      batches.extend(current);
    }
  }

  tracing::debug!(
    batches = batches.len(),
    registers = batches.iter().map(|batch| batch.slices.len()).sum::<usize>(),
    "Planned register reads"
  );

  batches
}

#[cfg(test)]
mod tests {
  use super::super::register::DataType;
  use super::*;

  fn definition(
    group: &str,
    name: &str,
    function: FunctionCode,
    address: Address,
    data_type: DataType,
  ) -> Arc<RegisterDefinition> {
    #[allow(clippy::unwrap_used)] // NOTE: word length comes from the type
    let definition = RegisterDefinition::new(
      group,
      name,
      function,
      address,
      data_type.word_length(),
      data_type,
    )
    .unwrap();

    Arc::new(definition)
  }

  fn holding(address: Address) -> Arc<RegisterDefinition> {
    definition(
      "grid",
      &format!("r{address}"),
      FunctionCode::ReadHoldingRegisters,
      address,
      DataType::UInt16,
    )
  }

  fn catalog(definitions: Vec<Arc<RegisterDefinition>>) -> Catalog {
    let mut catalog = Catalog::new();
    for definition in definitions {
      catalog
        .entry(definition.group().to_owned())
        .or_default()
        .push(definition);
    }
    catalog
  }

  fn spans(batches: &[ReadBatch]) -> Vec<(Address, Quantity)> {
    batches
      .iter()
      .map(|batch| (batch.address, batch.quantity))
      .collect()
  }

  #[test]
  fn splits_on_large_gaps() {
    let catalog =
      catalog(vec![holding(0), holding(1), holding(5), holding(200)]);
    let batches = plan(&catalog, Limits::default());

    assert_eq!(spans(&batches), vec![(0, 6), (200, 1)]);
    let offsets = batches[0]
      .slices
      .iter()
      .map(|slice| slice.byte_offset)
      .collect::<Vec<_>>();
    assert_eq!(offsets, vec![0, 2, 10]);
    assert_eq!(batches[1].slices[0].byte_offset, 0);
  }

  #[test]
  fn planning_is_deterministic() {
    let catalog = catalog(vec![
      holding(40),
      holding(3),
      holding(17),
      definition(
        "battery",
        "soc",
        FunctionCode::ReadInputRegisters,
        9,
        DataType::Int32,
      ),
    ]);
    assert_eq!(
      plan(&catalog, Limits::default()),
      plan(&catalog, Limits::default())
    );
  }

  #[test]
  fn gap_tolerance_is_inclusive() {
    // NOTE: first batch ends at 1, so 9 leaves a hole of exactly 8 registers
    let batches =
      plan(&catalog(vec![holding(0), holding(9)]), Limits::default());
    assert_eq!(spans(&batches), vec![(0, 10)]);

    let batches =
      plan(&catalog(vec![holding(0), holding(10)]), Limits::default());
    assert_eq!(spans(&batches), vec![(0, 1), (10, 1)]);
  }

  #[test]
  fn register_cap_forces_new_batch() {
    let wide = definition(
      "grid",
      "wide",
      FunctionCode::ReadHoldingRegisters,
      119,
      DataType::UInt32,
    );
    let mut definitions = (0..119).step_by(7).map(holding).collect::<Vec<_>>();
    definitions.push(wide);
    let batches = plan(&catalog(definitions), Limits::default());

    assert!(batches.iter().all(|batch| batch.quantity <= 120));
    assert_eq!(batches.last().map(|batch| batch.address), Some(119));
    assert_eq!(batches.last().map(|batch| batch.quantity), Some(2));
  }

  #[test]
  fn never_mixes_function_codes_or_groups() {
    let catalog = catalog(vec![
      holding(0),
      definition(
        "grid",
        "input",
        FunctionCode::ReadInputRegisters,
        1,
        DataType::UInt16,
      ),
      definition(
        "battery",
        "holding",
        FunctionCode::ReadHoldingRegisters,
        2,
        DataType::UInt16,
      ),
    ]);
    let batches = plan(&catalog, Limits::default());

    let keys = batches
      .iter()
      .map(|batch| (batch.group.as_str(), batch.function, batch.address))
      .collect::<Vec<_>>();
    assert_eq!(
      keys,
      vec![
        ("battery", FunctionCode::ReadHoldingRegisters, 2),
        ("grid", FunctionCode::ReadHoldingRegisters, 0),
        ("grid", FunctionCode::ReadInputRegisters, 1),
      ]
    );
  }

  #[test]
  fn overlapping_definitions_share_a_batch() {
    let catalog = catalog(vec![
      definition(
        "meter",
        "energy",
        FunctionCode::ReadHoldingRegisters,
        10,
        DataType::UInt32,
      ),
      definition(
        "meter",
        "energy_low",
        FunctionCode::ReadHoldingRegisters,
        11,
        DataType::UInt16,
      ),
    ]);
    let batches = plan(&catalog, Limits::default());

    assert_eq!(spans(&batches), vec![(10, 2)]);
    assert_eq!(batches[0].slices[1].byte_offset, 2);
  }

  #[test]
  fn slices_fit_inside_their_batch() {
    let catalog = catalog(
      (0..300)
        .step_by(3)
        .map(|address| {
          definition(
            "meter",
            &format!("r{address}"),
            FunctionCode::ReadHoldingRegisters,
            address,
            DataType::Int32,
          )
        })
        .collect(),
    );
    let batches = plan(&catalog, Limits::default());

    for batch in &batches {
      assert!(batch.quantity <= DEFAULT_MAX_REGISTERS);
      for slice in &batch.slices {
        assert!(
          slice.byte_offset + slice.definition.byte_length()
            <= batch.byte_length()
        );
      }
    }
    let planned = batches.iter().map(|batch| batch.slices.len()).sum::<usize>();
    assert_eq!(planned, 100);
  }

  #[test]
  fn limits_are_clamped_to_protocol_ceiling() {
    assert_eq!(Limits::new(500, 8).max_registers(), MAX_READ_QUANTITY);
    assert_eq!(Limits::new(0, 8).max_registers(), 2);
  }

  #[test]
  fn empty_catalog_plans_nothing() {
    assert!(plan(&Catalog::new(), Limits::default()).is_empty());
  }
}
