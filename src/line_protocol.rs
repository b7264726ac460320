//! InfluxDB line protocol encoding.
//!
//! ```text
//! temperature_humidity,sensor_name=attic dew_point_f=50,humidity=50,temperature_c=20,temperature_f=68 1709294400000000000
//! ```

use crate::reading::DerivedMetricRecord;

/// Encode one record as a single line (no trailing newline).
///
/// Tags and fields are emitted in key order. Fields are written as floats.
/// Non-finite field values cannot be represented and are skipped.
pub fn encode(record: &DerivedMetricRecord) -> String {
    let mut line = String::with_capacity(128);
    escape_into(&mut line, &record.measurement_name, &[',', ' ']);

    for (key, value) in &record.tags {
        if value.is_empty() {
            continue;
        }
        line.push(',');
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        escape_into(&mut line, value, &[',', '=', ' ']);
    }

    let mut first = true;
    for (key, value) in &record.fields {
        if !value.is_finite() {
            continue;
        }
        line.push(if first { ' ' } else { ',' });
        first = false;
        escape_into(&mut line, key, &[',', '=', ' ']);
        line.push('=');
        line.push_str(&value.to_string());
    }

    line.push(' ');
    line.push_str(&timestamp_nanos(record).to_string());
    line
}

fn timestamp_nanos(record: &DerivedMetricRecord) -> i64 {
    record
        .timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| record.timestamp.timestamp().saturating_mul(1_000_000_000))
}

fn escape_into(out: &mut String, raw: &str, special: &[char]) {
    for c in raw.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if special.contains(&c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{RecordTarget, Reading, ValidationRanges};
    use chrono::{TimeZone, Utc};

    fn record(measurement: &str, sensor: &str) -> DerivedMetricRecord {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        DerivedMetricRecord::derive(
            &Reading::new(20.0, 50.0, at),
            &ValidationRanges::default(),
            &RecordTarget::new(measurement, sensor),
        )
        .unwrap()
    }

    #[test]
    fn test_encode_reference_point() {
        let line = encode(&record("temperature_humidity", "attic"));
        assert_eq!(
            line,
            "temperature_humidity,sensor_name=attic dew_point_f=50,humidity=50,temperature_c=20,temperature_f=68 1709294400000000000"
        );
    }

    #[test]
    fn test_fractional_fields_round_trip_shortest() {
        let mut rec = record("m", "s");
        rec.fields.insert("humidity".to_string(), 41.3);
        let line = encode(&rec);
        assert!(line.contains("humidity=41.3,"));
    }

    #[test]
    fn test_escaping() {
        let line = encode(&record("living room,east", "desk=left side"));
        assert!(line.starts_with("living\\ room\\,east,sensor_name=desk\\=left\\ side "));
    }

    #[test]
    fn test_non_finite_fields_skipped() {
        let mut rec = record("m", "s");
        rec.fields.insert("dew_point_f".to_string(), f64::NAN);
        let line = encode(&rec);
        assert!(!line.contains("dew_point_f"));
        assert!(line.contains(" humidity=50,"));
    }
}
