use crate::snapshot::style::{classify, StatusStyle};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Status shown before the first reading arrives.
pub const DEFAULT_STATUS: &str = "WAITING";
/// Free-form text shown before the first reading arrives.
pub const DEFAULT_TEXT: &str = "Scanning...";
/// Vehicle classes that are always present in a snapshot.
pub const KNOWN_CLASSES: [&str; 4] = ["Car", "Bus", "Truck", "Bike"];

/// Latest traffic reading in display-ready form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrafficSnapshot {
    pub vehicle_count: u64,
    pub status: String,
    pub density: f64,
    pub objects: BTreeMap<String, u64>,
    pub text: String,
    pub style: StatusStyle,
}

impl Default for TrafficSnapshot {
    fn default() -> Self {
        Self {
            vehicle_count: 0,
            status: DEFAULT_STATUS.into(),
            density: 0.0,
            objects: default_objects(),
            text: DEFAULT_TEXT.into(),
            style: classify(DEFAULT_STATUS),
        }
    }
}

impl TrafficSnapshot {
    /// Builds a snapshot from a raw `vehicle_data` payload.
    ///
    /// Every field falls back to its default when missing or of the wrong
    /// shape; unknown keys are ignored. This never fails.
    pub fn from_payload(raw: &Value) -> Self {
        let mut snapshot = Self::default();
        let Some(fields) = raw.as_object() else {
            return snapshot;
        };

        if let Some(count) = field(fields, &["vehicle_count", "vehicleCount"]).and_then(as_count) {
            snapshot.vehicle_count = count;
        }
        if let Some(status) = fields.get("status").and_then(Value::as_str) {
            snapshot.status = status.to_string();
        }
        if let Some(density) = fields
            .get("density")
            .and_then(Value::as_f64)
            .filter(|d| d.is_finite())
        {
            snapshot.density = density;
        }
        if let Some(text) = fields.get("text").and_then(Value::as_str) {
            snapshot.text = text.to_string();
        }
        if let Some(objects) = fields.get("objects").and_then(Value::as_object) {
            for (class, count) in objects {
                if let Some(count) = as_count(count) {
                    snapshot.objects.insert(class.clone(), count);
                }
            }
        }

        snapshot.style = classify(&snapshot.status);
        snapshot
    }

    pub fn style(&self) -> StatusStyle {
        self.style
    }

    pub fn class_count(&self, class: &str) -> u64 {
        self.objects.get(class).copied().unwrap_or(0)
    }
}

fn default_objects() -> BTreeMap<String, u64> {
    KNOWN_CLASSES
        .iter()
        .map(|class| (class.to_string(), 0))
        .collect()
}

fn field<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| fields.get(*key))
}

fn as_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v.trunc() as u64)
    })
}
