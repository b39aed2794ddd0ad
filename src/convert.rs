//! Pure conversion functions for derived vehicle state.

use std::collections::BTreeMap;

use crate::buffer::CellReading;
use crate::error::ConversionError;

/// Converts a gear label to its numeric form: `"N"` → 0, `"1"`..`"6"` →
/// the digit. Anything else is rejected.
pub fn convert_gear(gear: &str) -> Result<u8, ConversionError> {
    if gear == "N" {
        return Ok(0);
    }
    match gear.parse::<u8>() {
        Ok(n) if (1..=6).contains(&n) => Ok(n),
        _ => Err(ConversionError::InvalidGear(gear.to_string())),
    }
}

/// Converts a raw speed in m/s to km/h.
pub fn convert_speed(mps: f64) -> f64 {
    mps * 3.6
}

/// Capacity-weighted state of charge across all cells, floored to an
/// integer percentage: `floor(Σ(soc·cap) / Σcap)`.
///
/// Returns `None` when any cell is missing soc or capacity, or when the
/// total capacity is zero; callers retain the previous value in that case.
pub fn state_of_charge(cells: &BTreeMap<u8, CellReading>) -> Option<i64> {
    if cells.is_empty() {
        return None;
    }

    let mut numerator = 0.0;
    let mut denominator = 0.0;

    for reading in cells.values() {
        let soc = reading.soc?;
        let capacity = reading.capacity?;
        numerator += soc * capacity;
        denominator += capacity;
    }

    if denominator <= 0.0 {
        return None;
    }

    Some((numerator / denominator).floor() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(soc: Option<f64>, capacity: Option<f64>) -> CellReading {
        CellReading { soc, capacity }
    }

    #[test]
    fn test_convert_gear_neutral() {
        assert_eq!(convert_gear("N"), Ok(0));
    }

    #[test]
    fn test_convert_gear_digits() {
        assert_eq!(convert_gear("1"), Ok(1));
        assert_eq!(convert_gear("3"), Ok(3));
        assert_eq!(convert_gear("6"), Ok(6));
    }

    #[test]
    fn test_convert_gear_out_of_range() {
        assert_eq!(
            convert_gear("7"),
            Err(ConversionError::InvalidGear("7".to_string()))
        );
        assert_eq!(
            convert_gear("0"),
            Err(ConversionError::InvalidGear("0".to_string()))
        );
        assert_eq!(
            convert_gear("R"),
            Err(ConversionError::InvalidGear("R".to_string()))
        );
    }

    #[test]
    fn test_convert_speed() {
        assert_eq!(convert_speed(10.0), 36.0);
        assert_eq!(convert_speed(0.0), 0.0);
    }

    #[test]
    fn test_state_of_charge_weighted() {
        let cells = BTreeMap::from([
            (0, cell(Some(80.0), Some(50.0))),
            (1, cell(Some(60.0), Some(50.0))),
        ]);
        assert_eq!(state_of_charge(&cells), Some(70));
    }

    #[test]
    fn test_state_of_charge_uneven_capacity() {
        // 90*75 + 30*25 = 7500 -> 75%
        let cells = BTreeMap::from([
            (0, cell(Some(90.0), Some(75.0))),
            (1, cell(Some(30.0), Some(25.0))),
        ]);
        assert_eq!(state_of_charge(&cells), Some(75));
    }

    #[test]
    fn test_state_of_charge_floors() {
        let cells = BTreeMap::from([
            (0, cell(Some(50.0), Some(30.0))),
            (1, cell(Some(51.0), Some(31.0))),
        ]);
        // (1500 + 1581) / 61 = 50.5...
        assert_eq!(state_of_charge(&cells), Some(50));
    }

    #[test]
    fn test_state_of_charge_partial_cell() {
        let cells = BTreeMap::from([
            (0, cell(Some(80.0), Some(50.0))),
            (1, cell(Some(60.0), None)),
        ]);
        assert_eq!(state_of_charge(&cells), None);
    }

    #[test]
    fn test_state_of_charge_no_cells() {
        assert_eq!(state_of_charge(&BTreeMap::new()), None);
    }

    #[test]
    fn test_state_of_charge_zero_capacity() {
        let cells = BTreeMap::from([(0, cell(Some(80.0), Some(0.0)))]);
        assert_eq!(state_of_charge(&cells), None);
    }
}
