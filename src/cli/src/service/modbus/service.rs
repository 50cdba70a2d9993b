use std::{
  collections::HashMap,
  path::{Path, PathBuf},
  sync::Arc,
};

use tokio::sync::Mutex;

use crate::*;

use super::batch::{self, Limits, ReadBatch};
use super::catalog::{self, CatalogError};
use super::connection::{ConnectError, Connection, Params, SerialParams};

pub(crate) type Plan = Arc<Vec<ReadBatch>>;

#[derive(Clone, Debug)]
pub(crate) struct Service {
  params: Params,
  limits: Limits,
  plans: Arc<Mutex<HashMap<PathBuf, Plan>>>,
}

impl service::Service for Service {
  fn new(config: config::Values) -> Self {
    Self::with(
      Params::new(config.modbus.read_timeout, config.modbus.write_timeout),
      Limits::new(
        config.modbus.max_batch_registers,
        config.modbus.max_batch_gap,
      ),
    )
  }
}

impl Service {
  fn with(params: Params, limits: Limits) -> Self {
    Self {
      params,
      limits,
      plans: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  /// Loads the device map at `map` and plans its reads.
  ///
  /// Devices sharing a map share one plan, so each map is loaded only once.
  #[tracing::instrument(skip(self))]
  pub(crate) async fn plan(&self, map: &Path) -> Result<Plan, CatalogError> {
    let mut plans = self.plans.lock().await;
    if let Some(plan) = plans.get(map) {
      return Ok(plan.clone());
    }

    let catalog = catalog::load(map).await?;
    let plan = Arc::new(batch::plan(&catalog, self.limits));
    tracing::info!(
      groups = catalog.len(),
      batches = plan.len(),
      "Planned device map"
    );
    plans.insert(map.to_path_buf(), plan.clone());

    Ok(plan)
  }

  pub(crate) fn connect(
    &self,
    serial: &SerialParams,
  ) -> Result<Connection, ConnectError> {
    Connection::open(serial, self.params)
  }
}
