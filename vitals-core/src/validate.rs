use crate::{Reading, ValidReading};

/// Accepted interval for one vital sign.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalRange {
    pub min: f64,
    pub max: f64,
    /// Whether `min` itself is excluded.
    pub min_exclusive: bool,
}

impl VitalRange {
    pub const fn closed(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            min_exclusive: false,
        }
    }

    pub const fn left_open(min: f64, max: f64) -> Self {
        Self {
            min,
            max,
            min_exclusive: true,
        }
    }

    /// NaN and infinities are never contained.
    pub fn contains(&self, value: f64) -> bool {
        let above_min = if self.min_exclusive {
            value > self.min
        } else {
            value >= self.min
        };
        above_min && value <= self.max
    }
}

pub const SPO2: VitalRange = VitalRange::left_open(0.0, 100.0);
pub const HEART_RATE: VitalRange = VitalRange::closed(60.0, 120.0);
pub const TEMPERATURE: VitalRange = VitalRange::closed(36.0, 39.0);
pub const BP_SYSTOLIC: VitalRange = VitalRange::closed(90.0, 140.0);
pub const BP_DIASTOLIC: VitalRange = VitalRange::closed(60.0, 90.0);

fn within(value: Option<f64>, range: VitalRange) -> bool {
    value.is_some_and(|v| range.contains(v))
}

/// Whether `reading` is present, complete and within range.
pub fn is_valid(reading: Option<&Reading>) -> bool {
    let Some(reading) = reading else {
        return false;
    };

    reading.patient_id.is_some()
        && within(reading.spo2, SPO2)
        && within(reading.heart_rate, HEART_RATE)
        && within(reading.temperature, TEMPERATURE)
        && within(reading.bp_systolic, BP_SYSTOLIC)
        && within(reading.bp_diastolic, BP_DIASTOLIC)
}

/// Promote a reading to a [`ValidReading`], or reject it whole.
pub fn validate(reading: Reading) -> Option<ValidReading> {
    if !is_valid(Some(&reading)) {
        return None;
    }

    Some(ValidReading {
        patient_id: reading.patient_id?,
        heart_rate: reading.heart_rate?,
        spo2: reading.spo2?,
        temperature: reading.temperature?,
        bp_systolic: reading.bp_systolic?,
        bp_diastolic: reading.bp_diastolic?,
        extra: reading.extra,
    })
}
