//! Derived vehicle state and the table the flush loop reads from.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::buffer::VehicleBuffer;
use crate::convert::{convert_gear, convert_speed, state_of_charge};
use crate::error::ConversionError;

/// The persistence-ready projection of one vehicle's telemetry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleState {
    pub car_id: u32,
    /// When the derived state last reflected incoming telemetry.
    pub observed_at: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub speed_kmh: f64,
    /// 0 = neutral, 1..=6 forward gears.
    pub gear: u8,
    /// Capacity-weighted percentage, floored; always within 0..=100.
    pub state_of_charge: i64,
}

impl VehicleState {
    /// Re-checks the record invariants. Run before every durable write.
    pub fn validate(&self) -> Result<(), String> {
        if self.gear > 6 {
            return Err(format!("gear {} out of range 0..=6", self.gear));
        }
        if !(0..=100).contains(&self.state_of_charge) {
            return Err(format!(
                "state of charge {} out of range 0..=100",
                self.state_of_charge
            ));
        }
        if !self.latitude.is_finite()
            || !self.longitude.is_finite()
            || !self.speed_kmh.is_finite()
        {
            return Err("non-finite position or speed".to_string());
        }
        Ok(())
    }
}

/// Derives a full [`VehicleState`] from a buffer, or `Ok(None)` if the
/// buffer has not reached completeness yet.
pub fn derive(
    buffer: &VehicleBuffer,
    required_cells: usize,
) -> Result<Option<VehicleState>, ConversionError> {
    if !buffer.is_complete(required_cells) {
        return Ok(None);
    }

    // is_complete guarantees every field below is present
    let (Some(latitude), Some(longitude), Some(speed), Some(gear), Some(soc)) = (
        buffer.latitude,
        buffer.longitude,
        buffer.speed,
        buffer.gear.as_deref(),
        state_of_charge(&buffer.cells),
    ) else {
        return Ok(None);
    };

    Ok(Some(VehicleState {
        car_id: buffer.car_id,
        observed_at: Utc::now(),
        latitude,
        longitude,
        speed_kmh: convert_speed(speed),
        gear: convert_gear(gear)?,
        state_of_charge: soc,
    }))
}

/// Latest derived state per vehicle, shared between the reconciler (writer)
/// and the flush loop (snapshot reader).
pub struct StateTable {
    states: RwLock<HashMap<u32, VehicleState>>,
}

impl StateTable {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, car_id: u32) -> Option<VehicleState> {
        self.states.read().await.get(&car_id).cloned()
    }

    pub async fn upsert(&self, state: VehicleState) {
        self.states.write().await.insert(state.car_id, state);
    }

    /// Copy-on-read snapshot so the flush fan-out never holds the lock
    /// while writes are in flight.
    pub async fn snapshot(&self) -> Vec<VehicleState> {
        self.states.read().await.values().cloned().collect()
    }

    pub async fn remove(&self, car_id: u32) {
        self.states.write().await.remove(&car_id);
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for StateTable {
    fn default() -> Self {
        Self::new()
    }
}
