//! Structural checks for serialized run reports
//!
//! Validates a report against its expected schema and value ranges rather
//! than against golden files.

#![allow(dead_code)]

use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn error(&mut self, msg: String) {
        self.errors.push(msg);
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

const STATES: &[&str] = &["completed", "cancelled"];

/// Validate the JSON form of a `RunReport`
pub fn validate_run_report(report: &Value) -> ValidationResult {
    let mut result = ValidationResult::default();

    let state = report["status"]["state"].as_str().unwrap_or_default();
    if !STATES.contains(&state) {
        result.error(format!("status.state: unexpected {state:?}"));
    }

    for field in [
        "frames_written",
        "frames_with_detections",
        "detections",
    ] {
        if report[field].as_u64().is_none() {
            result.error(format!("{field}: expected unsigned integer"));
        }
    }
    let written = report["frames_written"].as_u64().unwrap_or(0);
    let with_detections = report["frames_with_detections"].as_u64().unwrap_or(0);
    if with_detections > written {
        result.error(format!(
            "frames_with_detections {with_detections} > frames_written {written}"
        ));
    }

    let by_class_total: u64 = report["detections_by_class"]
        .as_object()
        .map(|classes| classes.values().filter_map(Value::as_u64).sum())
        .unwrap_or(0);
    if Some(by_class_total) != report["detections"].as_u64() {
        result.error(format!(
            "detections_by_class sums to {by_class_total}, detections is {}",
            report["detections"]
        ));
    }

    match report["elapsed_secs"].as_f64() {
        Some(secs) if secs >= 0.0 => {}
        _ => result.error("elapsed_secs: expected non-negative number".to_string()),
    }

    let video = &report["video"];
    for field in ["width", "height"] {
        if video[field].as_u64().unwrap_or(0) == 0 {
            result.error(format!("video.{field}: expected positive integer"));
        }
    }
    if video["frame_rate"]["num"].as_u64().unwrap_or(0) == 0 {
        result.error("video.frame_rate.num: expected positive integer".to_string());
    }

    // Exactly one of output / partial_output for runs that wrote frames
    let has_output = !report["output"].is_null();
    let has_partial = !report["partial_output"].is_null();
    match state {
        "completed" if !has_output || has_partial => {
            result.error("completed run must report output only".to_string());
        }
        "cancelled" if has_output => {
            result.error("cancelled run must not report output".to_string());
        }
        "cancelled" if has_partial != (written > 0) => {
            result.error(format!(
                "cancelled run with {written} frames has partial_output = {has_partial}"
            ));
        }
        _ => {}
    }

    result
}
