use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vitals_core::{PatientId, RawMessage};

use super::MessageSource;

/// Mock source that publishes synthetic vital-sign readings.
pub struct MockSource {
    subscription: String,
    /// Interval between bursts; every patient publishes once per burst.
    interval: Duration,
    /// Share of messages that are deliberately bad, in percent.
    invalid_percent: u8,
    capacity: usize,
    patients: Arc<Vec<MockPatient>>,
}

impl MockSource {
    pub fn new(
        subscription: impl Into<String>,
        interval_ms: u64,
        patient_count: usize,
        invalid_percent: u8,
        capacity: usize,
    ) -> Self {
        let patients = (0..patient_count).map(MockPatient::new).collect();

        Self {
            subscription: subscription.into(),
            interval: Duration::from_millis(interval_ms),
            invalid_percent: invalid_percent.min(100),
            capacity,
            patients: Arc::new(patients),
        }
    }

    pub fn patient_ids(&self) -> Vec<PatientId> {
        self.patients.iter().map(|p| p.id.clone()).collect()
    }
}

/// A simulated patient with a stable baseline.
struct MockPatient {
    id: PatientId,
    baseline_heart_rate: f64,
    baseline_spo2: f64,
}

impl MockPatient {
    fn new(index: usize) -> Self {
        let mut rng = rand::rng();
        Self {
            id: PatientId::new(format!("P{:04}", index + 1)),
            baseline_heart_rate: rng.random_range(65.0..105.0),
            baseline_spo2: rng.random_range(92.0..99.5),
        }
    }

    fn generate_payload(&self, invalid_percent: u8) -> Vec<u8> {
        let mut rng = rand::rng();

        let value = if rng.random_ratio(u32::from(invalid_percent), 100) {
            match rng.random_range(0..3) {
                0 => return b"{\"patient_id\": \"".to_vec(),
                // Missing blood pressure.
                1 => json!({
                    "patient_id": self.id,
                    "heart_rate": self.baseline_heart_rate,
                    "spo2": self.baseline_spo2,
                    "temperature": 37.0,
                }),
                // Tachycardic beyond the accepted range.
                _ => json!({
                    "patient_id": self.id,
                    "heart_rate": rng.random_range(121.0..180.0),
                    "spo2": self.baseline_spo2,
                    "temperature": 37.0,
                    "bp_systolic": 120.0,
                    "bp_diastolic": 80.0,
                }),
            }
        } else {
            json!({
                "patient_id": self.id,
                "heart_rate": (self.baseline_heart_rate + rng.random_range(-5.0..5.0)).clamp(60.0, 120.0),
                "spo2": (self.baseline_spo2 + rng.random_range(-1.5..1.5)).clamp(85.0, 100.0),
                "temperature": rng.random_range(36.2..38.6),
                "bp_systolic": rng.random_range(100.0..138.0),
                "bp_diastolic": rng.random_range(62.0..88.0),
            })
        };

        value.to_string().into_bytes()
    }
}

#[async_trait]
impl MessageSource for MockSource {
    type Error = std::convert::Infallible;

    async fn start(
        &self,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<RawMessage>, Self::Error> {
        let (tx, rx) = mpsc::channel(self.capacity);

        let patients = Arc::clone(&self.patients);
        let interval = self.interval;
        let invalid_percent = self.invalid_percent;

        info!(
            subscription = %self.subscription,
            patient_count = patients.len(),
            interval_ms = interval.as_millis() as u64,
            invalid_percent,
            "Starting mock source"
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Mock source shutting down");
                        break;
                    }
                    _ = interval.tick() => {
                        for patient in patients.iter() {
                            let payload = patient.generate_payload(invalid_percent);
                            let message = RawMessage::new(payload, jiff::Timestamp::now());
                            if tx.send(message).await.is_err() {
                                info!("Channel closed, mock source shutting down");
                                return;
                            }
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
