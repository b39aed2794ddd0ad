//! Error taxonomy for the reconciliation pipeline.
//!
//! None of these are fatal: decode and conversion failures drop the
//! offending event, persistence failures drop the affected vehicle's state
//! entry so a later complete cycle rebuilds it.

use thiserror::Error;

/// A raw message could not be turned into a [`crate::decode::FieldEvent`].
#[derive(Debug, Error, PartialEq)]
pub enum DecodeError {
    /// Topic does not look like `car/<id>/.../<leaf>`.
    #[error("topic '{0}' does not match car/<id>/.../<leaf>")]
    MalformedTopic(String),

    /// The `<id>` segment is not an integer.
    #[error("vehicle id segment '{0}' is not an integer")]
    InvalidVehicleId(String),

    /// The leaf segment names a field we do not know.
    #[error("unknown field '{0}'")]
    UnknownField(String),

    /// A `soc`/`capacity` leaf without a usable cell index segment.
    #[error("missing or invalid cell index for leaf '{0}'")]
    MissingCellIndex(String),

    /// Payload is not a `{"value": ...}` envelope with a usable value.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// A structurally valid event carried a value that cannot be converted.
#[derive(Debug, Error, PartialEq)]
pub enum ConversionError {
    /// Gear labels are `"N"` or `"1"` through `"6"`.
    #[error("invalid gear label '{0}'")]
    InvalidGear(String),
}

/// Why a single event was dropped by the reconciler.
#[derive(Debug, Error, PartialEq)]
pub enum ReconcileError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

/// Why one vehicle's entry failed to flush. The flush loop removes the
/// entry and carries on with the others.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("state for car {car_id} failed re-validation: {reason}")]
    Validation { car_id: u32, reason: String },

    #[error("durable write for car {car_id} failed: {source}")]
    Write {
        car_id: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("durable write for car {car_id} timed out after {secs}s")]
    Timeout { car_id: u32, secs: u64 },
}
