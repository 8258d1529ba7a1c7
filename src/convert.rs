//! Conversion of expression results into Prometheus exposition samples.

use std::fmt::Write as _;

use crate::models::{Response, ResultValue};
use crate::tags::TagSet;
use crate::Result;

/// One exposition line: labels, value and an optional millisecond timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: TagSet,
    pub value: f64,
    pub timestamp_ms: Option<i64>,
}

/// Flattens every result into samples.
///
/// A number becomes one sample without a timestamp, a series one sample per
/// point in timestamp order, and an empty value nothing at all.
pub fn convert_response(response: &Response) -> Vec<Sample> {
    let mut samples = Vec::new();
    for result in &response.results {
        match &result.value {
            ResultValue::Number(value) => samples.push(Sample {
                labels: result.group.clone(),
                value: *value,
                timestamp_ms: None,
            }),
            ResultValue::Series(series) => {
                samples.extend(series.iter().map(|(ts, value)| Sample {
                    labels: result.group.clone(),
                    value: *value,
                    timestamp_ms: Some(*ts),
                }));
            }
            ResultValue::Empty => {}
        }
    }
    samples
}

/// Appends `value` with backslash, double quote and newline escaped.
fn escape_label_value(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

fn format_value(out: &mut String, value: f64) {
    if value.is_nan() {
        out.push_str("NaN");
    } else if value == f64::INFINITY {
        out.push_str("+Inf");
    } else if value == f64::NEG_INFINITY {
        out.push_str("-Inf");
    } else {
        let _ = write!(out, "{}", value);
    }
}

fn write_sample(out: &mut String, name: &str, sample: &Sample) {
    out.push_str(name);
    if !sample.labels.is_empty() {
        out.push('{');
        for (i, (label, value)) in sample.labels.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            out.push_str(label);
            out.push_str("=\"");
            escape_label_value(out, value);
            out.push('"');
        }
        out.push('}');
    }
    out.push(' ');
    format_value(out, sample.value);
    if let Some(ts) = sample.timestamp_ms {
        let _ = write!(out, " {}", ts);
    }
    out.push('\n');
}

/// Encodes the samples as one untyped text-format family. No samples, no bytes.
///
/// The family carries no `# HELP` line; the source data has no description.
/// Every sample with a timestamp gets it written, including 0.
pub fn encode_text(name: &str, samples: &[Sample]) -> Result<Vec<u8>> {
    if samples.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = String::with_capacity(32 + samples.len() * (name.len() + 32));
    let _ = writeln!(out, "# TYPE {} untyped", name);
    for sample in samples {
        write_sample(&mut out, name, sample);
    }
    Ok(out.into_bytes())
}
