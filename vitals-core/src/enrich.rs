use crate::{EnrichedReading, RiskLevel, ValidReading};

const HEART_RATE_WEIGHT: f64 = 0.4;
const TEMPERATURE_WEIGHT: f64 = 0.3;
const DESATURATION_WEIGHT: f64 = 0.3;

/// Scores below this are [`RiskLevel::Low`].
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.3;
/// Scores at or above this are [`RiskLevel::High`].
pub const HIGH_RISK_THRESHOLD: f64 = 0.6;

/// Weighted composite of normalised heart rate, temperature and oxygen
/// desaturation.
pub fn risk_score(heart_rate: f64, temperature: f64, spo2: f64) -> f64 {
    (heart_rate / 200.0) * HEART_RATE_WEIGHT
        + (temperature / 40.0) * TEMPERATURE_WEIGHT
        + (1.0 - spo2 / 100.0) * DESATURATION_WEIGHT
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score < MEDIUM_RISK_THRESHOLD {
            RiskLevel::Low
        } else if score < HIGH_RISK_THRESHOLD {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

pub fn enrich(mut reading: ValidReading) -> EnrichedReading {
    // Derived keys are always recomputed, never taken from the payload.
    reading.extra.remove("risk_score");
    reading.extra.remove("risk_level");

    let risk_score = risk_score(reading.heart_rate, reading.temperature, reading.spo2);

    EnrichedReading {
        reading,
        risk_score,
        risk_level: RiskLevel::from_score(risk_score),
    }
}
