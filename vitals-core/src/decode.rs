use serde_json::{Map, Value};

use crate::{PatientId, Reading};

/// Decode a payload into a [`Reading`].
///
/// Returns `None` when the payload is not a JSON object (invalid UTF-8,
/// malformed or truncated JSON, or a top-level array/scalar). A known field
/// holding a value of the wrong type is treated as absent; the validator then
/// rejects the record.
pub fn decode(payload: &[u8]) -> Option<Reading> {
    let mut fields: Map<String, Value> = serde_json::from_slice(payload).ok()?;

    Some(Reading {
        patient_id: fields.remove("patient_id").and_then(patient_id),
        heart_rate: fields.remove("heart_rate").and_then(number),
        spo2: fields.remove("spo2").and_then(number),
        temperature: fields.remove("temperature").and_then(number),
        bp_systolic: fields.remove("bp_systolic").and_then(number),
        bp_diastolic: fields.remove("bp_diastolic").and_then(number),
        extra: fields,
    })
}

fn patient_id(value: Value) -> Option<PatientId> {
    match value {
        Value::String(s) => Some(PatientId(s.into_boxed_str())),
        Value::Number(n) => Some(PatientId(n.to_string().into_boxed_str())),
        _ => None,
    }
}

fn number(value: Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}
