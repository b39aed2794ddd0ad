//! Decoder for topic-qualified telemetry messages.
//!
//! Topics look like `car/<id>/location/latitude` or
//! `car/<id>/battery/<cell>/soc`; payloads are a JSON `{"value": ...}`
//! envelope. Decoding is pure and produces a typed [`FieldEvent`].

use crate::error::DecodeError;

/// One decoded partial update. The variant carries the already-parsed
/// value, so downstream code never sees raw strings for numeric fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Latitude(f64),
    Longitude(f64),
    /// Raw speed in m/s, as sent on the wire.
    Speed(f64),
    /// Gear label as sent: `"N"` or `"1"`..`"6"`. Validated at conversion.
    Gear(String),
    CellSoc { cell: u8, soc: f64 },
    CellCapacity { cell: u8, capacity: f64 },
}

/// A single per-field telemetry update for one vehicle.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldEvent {
    pub car_id: u32,
    pub field: Field,
}

/// Decodes a raw topic + payload pair into a [`FieldEvent`].
///
/// # Errors
///
/// Returns a [`DecodeError`] if the topic shape, vehicle id, leaf name,
/// cell index, or payload envelope is unusable. Never panics, never has
/// side effects.
pub fn decode(topic: &str, payload: &[u8]) -> Result<FieldEvent, DecodeError> {
    let parts: Vec<&str> = topic.split('/').collect();

    if parts.len() < 3 || parts[0] != "car" {
        return Err(DecodeError::MalformedTopic(topic.to_string()));
    }

    let car_id: u32 = parts[1]
        .parse()
        .map_err(|_| DecodeError::InvalidVehicleId(parts[1].to_string()))?;

    let leaf = parts[parts.len() - 1];
    let value = extract_value(payload)?;

    let field = match leaf {
        "latitude" => Field::Latitude(numeric(&value, leaf)?),
        "longitude" => Field::Longitude(numeric(&value, leaf)?),
        "speed" => Field::Speed(numeric(&value, leaf)?),
        "gear" => Field::Gear(textual(&value)),
        "soc" => Field::CellSoc {
            cell: cell_index(&parts, leaf)?,
            soc: numeric(&value, leaf)?,
        },
        "capacity" => Field::CellCapacity {
            cell: cell_index(&parts, leaf)?,
            capacity: numeric(&value, leaf)?,
        },
        other => return Err(DecodeError::UnknownField(other.to_string())),
    };

    Ok(FieldEvent { car_id, field })
}

/// Pulls the `value` out of the `{"value": ...}` JSON envelope.
fn extract_value(payload: &[u8]) -> Result<serde_json::Value, DecodeError> {
    let json: serde_json::Value = serde_json::from_slice(payload)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;

    json.get("value")
        .cloned()
        .ok_or_else(|| DecodeError::MalformedPayload("no 'value' key".to_string()))
}

/// The cell index is the second-to-last topic segment for battery leaves.
fn cell_index(parts: &[&str], leaf: &str) -> Result<u8, DecodeError> {
    if parts.len() < 4 {
        return Err(DecodeError::MissingCellIndex(leaf.to_string()));
    }
    parts[parts.len() - 2]
        .parse()
        .map_err(|_| DecodeError::MissingCellIndex(leaf.to_string()))
}

/// Accepts JSON numbers and numeric strings (publishers send both).
fn numeric(value: &serde_json::Value, leaf: &str) -> Result<f64, DecodeError> {
    match value {
        serde_json::Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DecodeError::MalformedPayload(format!("'{leaf}' out of range"))),
        serde_json::Value::String(s) => s.parse().map_err(|_| {
            DecodeError::MalformedPayload(format!("'{leaf}' value '{s}' is not a number"))
        }),
        other => Err(DecodeError::MalformedPayload(format!(
            "'{leaf}' value {other} is not a number"
        ))),
    }
}

/// Gear arrives as `"3"` from some publishers and `3` from others.
fn textual(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
