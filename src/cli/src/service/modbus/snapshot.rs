use std::collections::BTreeMap;

use super::batch::ReadBatch;
use super::connection::{ReadError, Transport};
use super::encoding;
use super::register::RegisterValue;

pub(crate) type Values = BTreeMap<String, RegisterValue>;

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub(crate) struct Snapshot {
  pub(crate) alive: bool,
  pub(crate) timestamp: chrono::DateTime<chrono::Utc>,
  pub(crate) groups: BTreeMap<String, Values>,
}

impl Snapshot {
  #[cfg(test)]
  pub(crate) fn value(
    &self,
    group: &str,
    name: &str,
  ) -> Option<&RegisterValue> {
    self.groups.get(group).and_then(|values| values.get(name))
  }

  pub(crate) fn len(&self) -> usize {
    self.groups.values().map(BTreeMap::len).sum()
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.groups.is_empty()
  }
}

/// Reads every batch once, in order, and assembles the decoded values.
///
/// Failures never abort the cycle. A failed or short batch and an undecodable
/// register only clear `alive` and leave their values out.
#[tracing::instrument(
  skip(transport, batches),
  fields(batches = batches.len())
)]
pub(crate) async fn read_snapshot<TTransport: Transport + ?Sized>(
  transport: &mut TTransport,
  slave: u8,
  batches: &[ReadBatch],
) -> Snapshot {
  let timestamp = chrono::Utc::now();

  let mut accumulator = Accumulator::new();
  for batch in batches {
    let response = transport
      .read_registers(slave, batch.function, batch.address, batch.quantity)
      .await;
    accumulator = accumulator.absorb(batch, response);
  }

  accumulator.finish(timestamp)
}

struct Accumulator {
  alive: bool,
  groups: BTreeMap<String, Values>,
}

impl Accumulator {
  fn new() -> Self {
    Self {
      alive: true,
      groups: BTreeMap::new(),
    }
  }

  fn absorb(
    mut self,
    batch: &ReadBatch,
    response: Result<Vec<u8>, ReadError>,
  ) -> Self {
    let payload = match response {
      Ok(payload) => payload,
      Err(error) => {
        tracing::debug!(%error, group = %batch.group, "Batch read failed");
        self.alive = false;
        return self;
      }
    };

    if payload.len() < batch.byte_length() {
      tracing::debug!(
        group = %batch.group,
        address = batch.address,
        expected = batch.byte_length(),
        received = payload.len(),
        "Batch response is too short"
      );
      self.alive = false;
      return self;
    }

    for slice in &batch.slices {
      let definition = &slice.definition;
      let decoded = payload
        .get(slice.byte_offset..slice.byte_offset + definition.byte_length())
        .ok_or(encoding::DecodeError::InsufficientBytes {
          expected: slice.byte_offset + definition.byte_length(),
          received: payload.len(),
        })
        .and_then(|bytes| encoding::decode_value(definition, bytes));

      match decoded {
        Ok(value) => {
          self
            .groups
            .entry(batch.group.clone())
            .or_default()
            .insert(definition.name().to_owned(), value);
        }
        Err(error) => {
          tracing::debug!(
            %error,
            group = %batch.group,
            name = %definition.name(),
            "Register decode failed"
          );
          self.alive = false;
        }
      }
    }

    self
  }

  fn finish(self, timestamp: chrono::DateTime<chrono::Utc>) -> Snapshot {
    let alive = self.alive && !self.groups.is_empty();

    Snapshot {
      alive,
      timestamp,
      groups: self.groups,
    }
  }
}
