//! CLI and environment configuration surface.

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "car_state_reconciler")]
#[command(about = "Reconciles per-field car telemetry into durable state records", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Consume telemetry from the MQTT broker and persist state periodically
    Run {
        /// Broker to subscribe to (mqtt://host:port)
        #[arg(long, env = "MQTT_BROKER_URL", default_value = "mqtt://localhost:1883")]
        broker_url: String,

        #[command(flatten)]
        opts: ReconcileOpts,
    },
    /// Replay a recorded telemetry file (topic<TAB>payload per line), then
    /// flush once
    Replay {
        /// Path to the recorded telemetry file
        #[arg(value_name = "FILE")]
        input: String,

        #[command(flatten)]
        opts: ReconcileOpts,
    },
}

#[derive(Args, Clone)]
pub struct ReconcileOpts {
    /// Only telemetry for this vehicle ID is processed
    #[arg(long, env = "CAR_ID", default_value_t = 1)]
    pub car_id: u32,

    /// Battery cells required before a vehicle record counts as complete
    #[arg(long, env = "REQUIRED_CELLS", default_value_t = 2)]
    pub required_cells: usize,

    /// Seconds between periodic durable flushes
    #[arg(long, env = "FLUSH_INTERVAL_SECS", default_value_t = 5)]
    pub flush_interval_secs: u64,

    /// Per-vehicle durable write timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// Maximum concurrent durable writes per flush tick
    #[arg(long, default_value_t = 4)]
    pub flush_concurrency: usize,

    /// CSV file state records are appended to
    #[arg(short, long, default_value = "car_states.csv")]
    pub output: String,
}

impl ReconcileOpts {
    pub fn flush_config(&self) -> crate::flush::FlushConfig {
        crate::flush::FlushConfig {
            interval: std::time::Duration::from_secs(self.flush_interval_secs),
            write_timeout: std::time::Duration::from_secs(self.write_timeout_secs),
            concurrency: self.flush_concurrency,
        }
    }
}
