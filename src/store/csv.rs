//! CSV-backed state store: one appended row per durable write.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use csv::WriterBuilder;
use tracing::debug;

use super::StateStore;
use crate::state::VehicleState;

/// Appends [`VehicleState`] rows to a CSV file, writing the header only
/// when creating the file.
pub struct CsvStateStore {
    path: PathBuf,
}

impl CsvStateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StateStore for CsvStateStore {
    async fn write_state(&self, state: &VehicleState) -> Result<()> {
        let path = self.path.clone();
        let state = state.clone();
        // File appends are blocking; keep them off the runtime workers.
        tokio::task::spawn_blocking(move || append_record(&path, &state)).await?
    }
}

fn append_record(path: &Path, state: &VehicleState) -> Result<()> {
    let file_exists = path.exists();
    debug!(path = %path.display(), file_exists, "appending state record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(state)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::env;
    use std::fs;

    fn temp_path(name: &str) -> PathBuf {
        env::temp_dir().join(name)
    }

    fn state() -> VehicleState {
        VehicleState {
            car_id: 1,
            observed_at: Utc::now(),
            latitude: 52.1,
            longitude: 13.4,
            speed_kmh: 72.0,
            gear: 3,
            state_of_charge: 80,
        }
    }

    #[test]
    fn test_append_record_creates_file() {
        let path = temp_path("car_state_test_create.csv");
        let _ = fs::remove_file(&path); // clean up any prior run

        append_record(&path, &state()).unwrap();

        assert!(path.exists());
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("car_id"));
        assert!(content.contains("72.0"));

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_append_record_writes_header_once() {
        let path = temp_path("car_state_test_header.csv");
        let _ = fs::remove_file(&path);

        append_record(&path, &state()).unwrap();
        append_record(&path, &state()).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let header_count = content.lines().filter(|l| l.contains("observed_at")).count();
        assert_eq!(header_count, 1);
        assert_eq!(content.lines().count(), 3);

        fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_write_state_through_trait() {
        let path = temp_path("car_state_test_trait.csv");
        let _ = fs::remove_file(&path);

        let store = CsvStateStore::new(&path);
        store.write_state(&state()).await.unwrap();

        assert!(path.exists());
        fs::remove_file(&path).unwrap();
    }
}
