//! The reconciler: merges each incoming event into its vehicle's buffer
//! and keeps the derived state table current.
//!
//! Per vehicle the lifecycle is accumulate-until-complete, then track:
//! the first time the buffer satisfies the completeness predicate the
//! derived state is computed in full and the vehicle joins the persistence
//! cycle; after that every event only updates the derived field it
//! touches. A tracked vehicle never re-gates completeness.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::buffer::{BufferStore, VehicleBuffer};
use crate::convert::{convert_gear, convert_speed, state_of_charge};
use crate::decode::{Field, decode};
use crate::error::ReconcileError;
use crate::state::{StateTable, VehicleState, derive};

/// Outcome of one message, reported back to the transport so it can apply
/// its acknowledgement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The event was merged (and the state table updated if tracked).
    Accepted,
    /// The event was for a vehicle other than the configured target;
    /// nothing was created or modified.
    Skipped,
}

pub struct Reconciler {
    buffers: BufferStore,
    table: Arc<StateTable>,
    target_car_id: u32,
    required_cells: usize,
}

impl Reconciler {
    pub fn new(table: Arc<StateTable>, target_car_id: u32, required_cells: usize) -> Self {
        Self {
            buffers: BufferStore::new(),
            table,
            target_car_id,
            required_cells,
        }
    }

    /// Decodes and applies one raw message.
    ///
    /// # Errors
    ///
    /// Returns the decode or conversion failure for a rejected event. The
    /// buffer and state table are untouched in that case; callers log the
    /// error and move on.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> Result<Ack, ReconcileError> {
        let event = decode(topic, payload)?;

        if event.car_id != self.target_car_id {
            debug!(
                car_id = event.car_id,
                target = self.target_car_id,
                "event for non-target vehicle, skipping"
            );
            return Ok(Ack::Skipped);
        }

        // Hold the vehicle's lock across merge, gate and table update so
        // events for one vehicle apply strictly in arrival order.
        let entry = self.buffers.entry(event.car_id);
        let mut buffer = entry.lock().await;

        // A bad gear label must not reach the buffer: merge is
        // all-or-nothing per field.
        if let Field::Gear(label) = &event.field {
            convert_gear(label)?;
        }

        buffer.apply(&event.field);

        match self.table.get(event.car_id).await {
            None => {
                if let Some(state) = derive(&buffer, self.required_cells)? {
                    info!(
                        car_id = event.car_id,
                        gear = state.gear,
                        state_of_charge = state.state_of_charge,
                        "vehicle record complete, tracking state"
                    );
                    self.table.upsert(state).await;
                }
            }
            Some(state) => {
                let updated = update_derived(state, &event.field, &buffer)?;
                self.table.upsert(updated).await;
            }
        }

        Ok(Ack::Accepted)
    }

    /// True if the vehicle has ever sent an event we merged.
    pub fn has_buffer(&self, car_id: u32) -> bool {
        self.buffers.contains(car_id)
    }
}

/// Recomputes only the derived field affected by `field` on an already
/// tracked state. State of charge is refreshed only while every cell stays
/// fully populated; otherwise the previous value is retained.
fn update_derived(
    mut state: VehicleState,
    field: &Field,
    buffer: &VehicleBuffer,
) -> Result<VehicleState, ReconcileError> {
    match field {
        Field::Latitude(v) => state.latitude = *v,
        Field::Longitude(v) => state.longitude = *v,
        Field::Speed(v) => state.speed_kmh = convert_speed(*v),
        Field::Gear(label) => state.gear = convert_gear(label)?,
        Field::CellSoc { .. } | Field::CellCapacity { .. } => {
            if let Some(soc) = state_of_charge(&buffer.cells) {
                state.state_of_charge = soc;
            } else {
                warn!(
                    car_id = state.car_id,
                    "cells partially populated, retaining previous state of charge"
                );
            }
        }
    }
    state.observed_at = chrono::Utc::now();
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConversionError, DecodeError};

    fn reconciler() -> (Reconciler, Arc<StateTable>) {
        let table = Arc::new(StateTable::new());
        (Reconciler::new(table.clone(), 1, 2), table)
    }

    async fn send(r: &Reconciler, topic: &str, value: &str) -> Result<Ack, ReconcileError> {
        let payload = format!(r#"{{"value": {value}}}"#);
        r.handle_message(topic, payload.as_bytes()).await
    }

    async fn complete_vehicle(r: &Reconciler) {
        send(r, "car/1/location/latitude", "52.1").await.unwrap();
        send(r, "car/1/location/longitude", "13.4").await.unwrap();
        send(r, "car/1/speed", "20").await.unwrap();
        send(r, "car/1/gear", r#""3""#).await.unwrap();
        send(r, "car/1/battery/0/soc", "90").await.unwrap();
        send(r, "car/1/battery/0/capacity", "50").await.unwrap();
        send(r, "car/1/battery/1/soc", "70").await.unwrap();
        send(r, "car/1/battery/1/capacity", "50").await.unwrap();
    }

    #[tokio::test]
    async fn test_no_state_until_complete() {
        let (r, table) = reconciler();
        send(&r, "car/1/location/latitude", "52.1").await.unwrap();
        send(&r, "car/1/speed", "20").await.unwrap();
        assert!(table.get(1).await.is_none());
        assert!(r.has_buffer(1));
    }

    #[tokio::test]
    async fn test_state_created_at_completion() {
        let (r, table) = reconciler();
        complete_vehicle(&r).await;

        let state = table.get(1).await.unwrap();
        assert_eq!(state.latitude, 52.1);
        assert_eq!(state.speed_kmh, 72.0);
        assert_eq!(state.gear, 3);
        assert_eq!(state.state_of_charge, 80);
    }

    #[tokio::test]
    async fn test_tracked_state_updates_per_field() {
        let (r, table) = reconciler();
        complete_vehicle(&r).await;

        send(&r, "car/1/speed", "10").await.unwrap();
        assert_eq!(table.get(1).await.unwrap().speed_kmh, 36.0);

        send(&r, "car/1/gear", r#""N""#).await.unwrap();
        assert_eq!(table.get(1).await.unwrap().gear, 0);
    }

    #[tokio::test]
    async fn test_soc_retained_while_cells_partial() {
        let (r, table) = reconciler();
        complete_vehicle(&r).await;

        // A third cell appears with only soc; aggregation is deferred
        // until its capacity arrives.
        send(&r, "car/1/battery/2/soc", "10").await.unwrap();
        assert_eq!(table.get(1).await.unwrap().state_of_charge, 80);

        send(&r, "car/1/battery/2/capacity", "100").await.unwrap();
        // (90*50 + 70*50 + 10*100) / 200 = 45
        assert_eq!(table.get(1).await.unwrap().state_of_charge, 45);
    }

    #[tokio::test]
    async fn test_non_target_vehicle_creates_nothing() {
        let (r, table) = reconciler();
        let ack = send(&r, "car/7/speed", "20").await.unwrap();
        assert_eq!(ack, Ack::Skipped);
        assert!(!r.has_buffer(7));
        assert!(table.get(7).await.is_none());
    }

    #[tokio::test]
    async fn test_invalid_gear_leaves_buffer_untouched() {
        let (r, table) = reconciler();
        complete_vehicle(&r).await;

        let err = send(&r, "car/1/gear", r#""7""#).await.unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Conversion(ConversionError::InvalidGear("7".to_string()))
        );
        // previous gear survives
        assert_eq!(table.get(1).await.unwrap().gear, 3);
    }

    #[tokio::test]
    async fn test_decode_failure_surfaces() {
        let (r, _) = reconciler();
        let err = r
            .handle_message("car/1/tire/pressure", br#"{"value": 2.4}"#)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReconcileError::Decode(DecodeError::UnknownField("pressure".to_string()))
        );
    }
}
