pub mod aggregate;
pub mod decode;
pub mod enrich;
pub mod validate;
pub mod window;

pub use aggregate::{Accumulator, aggregate};
pub use decode::decode;
pub use enrich::{enrich, risk_score};
pub use validate::{is_valid, validate};
pub use window::{DEFAULT_WINDOW_SECS, FixedWindows};

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

// We use `Box<str>` for identifiers that never grow after decoding. This
// keeps per-key state compact when many patients are in flight.
type BoxStr = Box<str>;

/// Keys of a payload object that are not one of the known vital fields.
pub type ExtraFields = Map<String, Value>;

/// Unique identifier for a message pulled from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Ulid);

/// Identifier of the patient a reading belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PatientId(pub BoxStr);

impl PatientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().into_boxed_str())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An opaque payload as delivered by the transport.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Transport-assigned identity of this message.
    pub id: MessageId,
    /// The payload bytes, expected to hold one JSON-encoded reading.
    pub payload: Box<[u8]>,
    /// Time at which the transport accepted the message.
    pub publish_time: jiff::Timestamp,
}

impl RawMessage {
    pub fn new(payload: impl Into<Box<[u8]>>, publish_time: jiff::Timestamp) -> Self {
        Self {
            id: MessageId(Ulid::new()),
            payload: payload.into(),
            publish_time,
        }
    }

    /// The payload as a single line of text, as captured by the raw tier.
    ///
    /// Invalid UTF-8 is replaced rather than rejected. Line breaks are folded
    /// into spaces so that one message always occupies one line; for JSON this
    /// never changes the meaning of the document.
    pub fn raw_line(&self) -> String {
        String::from_utf8_lossy(&self.payload)
            .trim_end_matches(['\r', '\n'])
            .replace(['\r', '\n'], " ")
    }
}

/// A decoded reading. Every field is optional until validated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reading {
    pub patient_id: Option<PatientId>,
    /// Beats per minute.
    pub heart_rate: Option<f64>,
    /// Oxygen saturation in percent.
    pub spo2: Option<f64>,
    /// Body temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Systolic blood pressure in mmHg.
    pub bp_systolic: Option<f64>,
    /// Diastolic blood pressure in mmHg.
    pub bp_diastolic: Option<f64>,
    /// Any other keys carried by the payload, kept verbatim.
    pub extra: ExtraFields,
}

/// A reading with every vital present and within its accepted range.
///
/// Only [`validate`] constructs these.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidReading {
    pub patient_id: PatientId,
    pub heart_rate: f64,
    pub spo2: f64,
    pub temperature: f64,
    pub bp_systolic: f64,
    pub bp_diastolic: f64,
    #[serde(flatten)]
    pub extra: ExtraFields,
}

/// Discrete clinical risk category, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Medium => "Medium",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RiskLevel {
    type Err = UnknownRiskLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Low" => Ok(RiskLevel::Low),
            "Medium" => Ok(RiskLevel::Medium),
            "High" => Ok(RiskLevel::High),
            other => Err(UnknownRiskLevel(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRiskLevel(pub String);

impl fmt::Display for UnknownRiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown risk level: {}", self.0)
    }
}

impl std::error::Error for UnknownRiskLevel {}

/// A validated reading together with its derived risk.
///
/// Serializes as one flat JSON object: the vitals, any extra payload keys,
/// then `risk_score` and `risk_level`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedReading {
    #[serde(flatten)]
    pub reading: ValidReading,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
}

/// A half-open time interval `[start, end)`, in seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn contains(&self, second: i64) -> bool {
        self.start <= second && second < self.end
    }

    /// Compact UTC rendering of a window bound, suitable for file names.
    pub fn format_bound(second: i64) -> String {
        match jiff::Timestamp::from_second(second) {
            Ok(ts) => ts.strftime("%Y%m%dT%H%M%SZ").to_string(),
            Err(_) => second.to_string(),
        }
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            Window::format_bound(self.start),
            Window::format_bound(self.end)
        )
    }
}

/// Grouping key of the aggregation stage.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowKey {
    pub window: Window,
    pub patient_id: PatientId,
}

/// Per-patient summary of one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    pub patient_id: PatientId,
    /// Number of readings summarised, never zero.
    pub count: u64,
    pub avg_heart_rate: f64,
    pub avg_spo2: f64,
    pub avg_temperature: f64,
    pub avg_bp_systolic: f64,
    pub avg_bp_diastolic: f64,
    /// Most severe level observed among the readings.
    pub risk_level: RiskLevel,
}
