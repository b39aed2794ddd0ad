//! Durable-store seam for vehicle state records.
//!
//! The flush loop only knows [`StateStore`]; [`CsvStateStore`] is the
//! shipped implementation. Connection management, retries and schema
//! concerns belong to the implementor, not the core.

mod csv;

pub use csv::CsvStateStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::state::VehicleState;

/// One durable write per vehicle state per flush tick. Implementations
/// report success or failure per call; the flush loop never retries inline.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn write_state(&self, state: &VehicleState) -> Result<()>;
}
