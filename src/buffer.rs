//! Per-vehicle accumulation buffers and the store that owns them.
//!
//! A [`VehicleBuffer`] collects partial field updates until it satisfies
//! the completeness predicate. Fields are only ever overwritten, never
//! cleared, and battery cells merge field-by-field: a soc update never
//! erases a previously known capacity for the same cell.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::decode::Field;

/// One battery cell's readings. Either side may arrive first.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct CellReading {
    pub soc: Option<f64>,
    pub capacity: Option<f64>,
}

/// Accumulated partial state for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleBuffer {
    pub car_id: u32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Raw speed in m/s; converted to km/h only at derivation.
    pub speed: Option<f64>,
    /// Gear label as received; validated before merge.
    pub gear: Option<String>,
    /// Keyed by cell index. BTreeMap keeps derivation deterministic.
    pub cells: BTreeMap<u8, CellReading>,
}

impl VehicleBuffer {
    pub fn new(car_id: u32) -> Self {
        Self {
            car_id,
            latitude: None,
            longitude: None,
            speed: None,
            gear: None,
            cells: BTreeMap::new(),
        }
    }

    /// Merges one decoded field update. Overwrites the targeted field and
    /// touches nothing else; never fails for a structurally valid event.
    pub fn apply(&mut self, field: &Field) {
        match field {
            Field::Latitude(v) => self.latitude = Some(*v),
            Field::Longitude(v) => self.longitude = Some(*v),
            Field::Speed(v) => self.speed = Some(*v),
            Field::Gear(label) => self.gear = Some(label.clone()),
            Field::CellSoc { cell, soc } => {
                self.cells.entry(*cell).or_default().soc = Some(*soc);
            }
            Field::CellCapacity { cell, capacity } => {
                self.cells.entry(*cell).or_default().capacity = Some(*capacity);
            }
        }
    }

    /// The completeness predicate: all scalar fields present and exactly
    /// `required_cells` cells, each with both soc and capacity.
    ///
    /// Monotonic under `apply`: fields are only added or overwritten, so
    /// once this holds it keeps holding.
    pub fn is_complete(&self, required_cells: usize) -> bool {
        self.latitude.is_some()
            && self.longitude.is_some()
            && self.speed.is_some()
            && self.gear.is_some()
            && self.cells.len() == required_cells
            && self.cells_fully_populated()
    }

    /// True when every known cell has both soc and capacity.
    pub fn cells_fully_populated(&self) -> bool {
        self.cells
            .values()
            .all(|c| c.soc.is_some() && c.capacity.is_some())
    }
}

/// Owns one buffer per vehicle, each behind its own async lock.
///
/// The per-vehicle `tokio::sync::Mutex` is the serialization point the
/// reconciler holds across its whole merge-derive-store sequence, so at
/// most one reconciliation is in flight per vehicle while different
/// vehicles proceed independently.
pub struct BufferStore {
    vehicles: Mutex<HashMap<u32, Arc<tokio::sync::Mutex<VehicleBuffer>>>>,
}

impl BufferStore {
    pub fn new() -> Self {
        Self {
            vehicles: Mutex::new(HashMap::new()),
        }
    }

    /// Looks up or creates the buffer entry for `car_id`. The outer lock
    /// only guards the map; callers lock the returned entry themselves.
    pub fn entry(&self, car_id: u32) -> Arc<tokio::sync::Mutex<VehicleBuffer>> {
        let mut vehicles = self.vehicles.lock().expect("buffer map lock poisoned");
        vehicles
            .entry(car_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(VehicleBuffer::new(car_id))))
            .clone()
    }

    /// True if a buffer exists for `car_id` (i.e. it has sent any event).
    pub fn contains(&self, car_id: u32) -> bool {
        self.vehicles
            .lock()
            .expect("buffer map lock poisoned")
            .contains_key(&car_id)
    }

    pub fn len(&self) -> usize {
        self.vehicles.lock().expect("buffer map lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BufferStore {
    fn default() -> Self {
        Self::new()
    }
}
