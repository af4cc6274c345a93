//! Per-window, per-patient reduction of enriched readings.

use crate::{AggregateSummary, EnrichedReading, PatientId, RiskLevel};

/// Resolution of the running sums: one millionth of a unit.
const SCALE: f64 = 1_000_000.0;

fn to_fixed(value: f64) -> i128 {
    (value * SCALE).round() as i128
}

/// Running state of one group.
///
/// Holds a count, one fixed-point sum per vital and the most severe level
/// seen. Integer sums make every update associative as well as commutative,
/// so the summary is bit-for-bit independent of arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accumulator {
    count: u64,
    heart_rate: i128,
    spo2: i128,
    temperature: i128,
    bp_systolic: i128,
    bp_diastolic: i128,
    risk_level: Option<RiskLevel>,
}

impl Accumulator {
    pub fn add(&mut self, enriched: &EnrichedReading) {
        let reading = &enriched.reading;

        self.count += 1;
        self.heart_rate += to_fixed(reading.heart_rate);
        self.spo2 += to_fixed(reading.spo2);
        self.temperature += to_fixed(reading.temperature);
        self.bp_systolic += to_fixed(reading.bp_systolic);
        self.bp_diastolic += to_fixed(reading.bp_diastolic);
        self.risk_level = self.risk_level.max(Some(enriched.risk_level));
    }

    /// Fold another partial result for the same group into this one.
    pub fn merge(&mut self, other: &Accumulator) {
        self.count += other.count;
        self.heart_rate += other.heart_rate;
        self.spo2 += other.spo2;
        self.temperature += other.temperature;
        self.bp_systolic += other.bp_systolic;
        self.bp_diastolic += other.bp_diastolic;
        self.risk_level = self.risk_level.max(other.risk_level);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Produce the summary, or `None` if nothing was added.
    pub fn finish(&self, patient_id: PatientId) -> Option<AggregateSummary> {
        let risk_level = self.risk_level?;
        if self.count == 0 {
            return None;
        }

        let divisor = self.count as f64 * SCALE;
        let mean = |sum: i128| sum as f64 / divisor;
        Some(AggregateSummary {
            patient_id,
            count: self.count,
            avg_heart_rate: mean(self.heart_rate),
            avg_spo2: mean(self.spo2),
            avg_temperature: mean(self.temperature),
            avg_bp_systolic: mean(self.bp_systolic),
            avg_bp_diastolic: mean(self.bp_diastolic),
            risk_level,
        })
    }
}

/// Summarise a complete group. `None` only for an empty group.
pub fn aggregate(patient_id: PatientId, group: &[EnrichedReading]) -> Option<AggregateSummary> {
    let mut acc = Accumulator::default();
    for reading in group {
        acc.add(reading);
    }
    acc.finish(patient_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ValidReading;

    fn enriched(heart_rate: f64, spo2: f64, risk_level: RiskLevel) -> EnrichedReading {
        EnrichedReading {
            reading: ValidReading {
                patient_id: PatientId::new("P1"),
                heart_rate,
                spo2,
                temperature: 37.0,
                bp_systolic: 120.0,
                bp_diastolic: 80.0,
                extra: Default::default(),
            },
            risk_score: 0.0,
            risk_level,
        }
    }

    #[test]
    fn summarises_two_readings() {
        let group = [
            enriched(80.0, 98.0, RiskLevel::Low),
            enriched(100.0, 94.0, RiskLevel::High),
        ];

        let summary = aggregate(PatientId::new("P1"), &group).unwrap();

        assert_eq!(summary.patient_id, PatientId::new("P1"));
        assert_eq!(summary.count, 2);
        assert_eq!(summary.avg_heart_rate, 90.0);
        assert_eq!(summary.avg_spo2, 96.0);
        assert_eq!(summary.avg_temperature, 37.0);
        assert_eq!(summary.avg_bp_systolic, 120.0);
        assert_eq!(summary.avg_bp_diastolic, 80.0);
        assert_eq!(summary.risk_level, RiskLevel::High);
    }

    #[test]
    fn risk_level_is_most_severe() {
        let lows = [
            enriched(70.0, 98.0, RiskLevel::Low),
            enriched(72.0, 97.0, RiskLevel::Low),
        ];
        let mixed = [
            enriched(70.0, 98.0, RiskLevel::Low),
            enriched(90.0, 95.0, RiskLevel::Medium),
            enriched(72.0, 97.0, RiskLevel::Low),
        ];

        let id = PatientId::new("P1");
        assert_eq!(aggregate(id.clone(), &lows).unwrap().risk_level, RiskLevel::Low);
        assert_eq!(aggregate(id, &mixed).unwrap().risk_level, RiskLevel::Medium);
    }

    #[test]
    fn order_does_not_matter() {
        let group = vec![
            enriched(64.0, 99.0, RiskLevel::Low),
            enriched(110.0, 90.0, RiskLevel::High),
            enriched(88.0, 95.5, RiskLevel::Medium),
            enriched(75.0, 97.25, RiskLevel::Low),
        ];
        let expected = aggregate(PatientId::new("P1"), &group).unwrap();

        let mut reversed = group.clone();
        reversed.reverse();
        let mut rotated = group.clone();
        rotated.rotate_left(2);
        let mut swapped = group;
        swapped.swap(0, 3);

        for permutation in [reversed, rotated, swapped] {
            assert_eq!(aggregate(PatientId::new("P1"), &permutation).unwrap(), expected);
        }
    }

    #[test]
    fn inexact_decimals_average_the_same_in_any_order() {
        let group: Vec<EnrichedReading> = [36.1, 36.2, 36.3, 38.7, 37.9]
            .into_iter()
            .map(|temperature| {
                let mut reading = enriched(72.3, 96.7, RiskLevel::Medium);
                reading.reading.temperature = temperature;
                reading
            })
            .collect();

        let forward = aggregate(PatientId::new("P1"), &group).unwrap();
        let mut reversed = group.clone();
        reversed.reverse();
        let backward = aggregate(PatientId::new("P1"), &reversed).unwrap();

        assert_eq!(forward, backward);
        assert_eq!(forward.avg_temperature, 37.04);
        assert_eq!(forward.avg_heart_rate, 72.3);
        assert_eq!(forward.avg_spo2, 96.7);
    }

    #[test]
    fn merged_partials_match_full_reduction() {
        let group = [
            enriched(64.0, 99.0, RiskLevel::Low),
            enriched(110.0, 90.0, RiskLevel::High),
            enriched(88.0, 95.5, RiskLevel::Medium),
        ];

        let mut left = Accumulator::default();
        left.add(&group[0]);
        let mut right = Accumulator::default();
        right.add(&group[1]);
        right.add(&group[2]);
        left.merge(&right);

        assert_eq!(
            left.finish(PatientId::new("P1")),
            aggregate(PatientId::new("P1"), &group)
        );
    }

    #[test]
    fn empty_group_has_no_summary() {
        assert_eq!(aggregate(PatientId::new("P1"), &[]), None);
        assert!(Accumulator::default().is_empty());
    }
}
