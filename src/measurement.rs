//! iperf3 JSON report parsing for the per-device measurement files.

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MeasurementError {
    #[error("measurement file {} not found", .path.display())]
    Missing { path: PathBuf },

    #[error("failed to read measurement file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("measurement output is not a valid iperf3 report: {reason}")]
    Malformed { reason: String },

    /// The report parsed but carries no result, usually because the test
    /// never reached the server.
    #[error("iperf3 report has no {key}{}", .iperf_error.as_deref().map(|e| format!(" (iperf3: {e})")).unwrap_or_default())]
    MissingKey {
        key: &'static str,
        iperf_error: Option<String>,
    },
}

impl MeasurementError {
    /// A structurally valid report lacking results, as opposed to no usable
    /// report at all.
    pub fn is_soft(&self) -> bool {
        matches!(self, MeasurementError::MissingKey { .. })
    }
}

/// Rates show up as JSON numbers, or as strings in some firmware builds.
#[derive(Debug)]
enum Rate<'a> {
    Number(f64),
    Text(&'a str),
}

impl<'a> Rate<'a> {
    fn from_value(key: &str, value: &'a Value) -> Result<Self, MeasurementError> {
        match value {
            Value::Number(n) => n.as_f64().map(Rate::Number).ok_or_else(|| MeasurementError::Malformed {
                reason: format!("{key} {n} is not representable"),
            }),
            Value::String(s) => Ok(Rate::Text(s)),
            other => Err(MeasurementError::Malformed {
                reason: format!("{key} is {other}, expected a number"),
            }),
        }
    }

    fn to_bps(&self) -> Result<u64, MeasurementError> {
        let value = match self {
            Rate::Number(n) => *n,
            Rate::Text(s) => s.trim().parse::<f64>().map_err(|_| MeasurementError::Malformed {
                reason: format!("bits_per_second {s:?} is not numeric"),
            })?,
        };
        if !value.is_finite() || value < 0.0 {
            return Err(MeasurementError::Malformed {
                reason: format!("bits_per_second {value} is out of range"),
            });
        }
        Ok(value as u64)
    }
}

/// Measured throughput from the device's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Throughput {
    /// `end.sum_sent.bits_per_second`
    pub upload_bps: u64,
    /// `end.sum_received.bits_per_second`
    pub download_bps: u64,
}

/// Slice from the first `{` to the last `}`, dropping prompt echoes or
/// trailing line noise around the report.
fn json_span(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text.trim(),
    }
}

/// Step into `parent[name]`. An absent key is `MissingKey`; a key that is
/// present but `null`, or a parent that is not an object, is `Malformed`.
fn child<'a>(
    parent: &'a Value,
    name: &str,
    key: &'static str,
    iperf_error: &Option<String>,
) -> Result<&'a Value, MeasurementError> {
    let Some(object) = parent.as_object() else {
        return Err(MeasurementError::Malformed {
            reason: format!("parent of {key} is {parent}, expected an object"),
        });
    };
    match object.get(name) {
        None => Err(MeasurementError::MissingKey {
            key,
            iperf_error: iperf_error.clone(),
        }),
        Some(Value::Null) => Err(MeasurementError::Malformed {
            reason: format!("{key} is null"),
        }),
        Some(value) => Ok(value),
    }
}

/// Parse the raw output of the traffic-test run command.
pub fn parse_output(text: &str) -> Result<Throughput, MeasurementError> {
    let report: Value =
        serde_json::from_str(json_span(text)).map_err(|e| MeasurementError::Malformed {
            reason: e.to_string(),
        })?;
    if !report.is_object() {
        return Err(MeasurementError::Malformed {
            reason: "top level is not a JSON object".to_string(),
        });
    }
    let iperf_error = report.get("error").and_then(Value::as_str).map(str::to_string);

    let end = child(&report, "end", "end", &iperf_error)?;
    let sent = child(end, "sum_sent", "end.sum_sent", &iperf_error)?;
    let sent = child(sent, "bits_per_second", "end.sum_sent.bits_per_second", &iperf_error)?;
    let received = child(end, "sum_received", "end.sum_received", &iperf_error)?;
    let received = child(
        received,
        "bits_per_second",
        "end.sum_received.bits_per_second",
        &iperf_error,
    )?;

    Ok(Throughput {
        upload_bps: Rate::from_value("end.sum_sent.bits_per_second", sent)?.to_bps()?,
        download_bps: Rate::from_value("end.sum_received.bits_per_second", received)?.to_bps()?,
    })
}

/// Read and parse the measurement file at `path`.
pub fn read_measurement(path: &Path) -> Result<Throughput, MeasurementError> {
    let text = std::fs::read_to_string(path).map_err(|source| {
        if source.kind() == std::io::ErrorKind::NotFound {
            MeasurementError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            MeasurementError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;
    parse_output(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_report() {
        let text = r#"{"end":{"sum_sent":{"bits_per_second":900000000},"sum_received":{"bits_per_second":850000000}}}"#;
        let t = parse_output(text).unwrap();
        assert_eq!(t.upload_bps, 900_000_000);
        assert_eq!(t.download_bps, 850_000_000);
    }

    #[test]
    fn test_parse_fractional_and_string_rates() {
        let text = r#"{"end":{"sum_sent":{"bits_per_second":"93871234.56"},"sum_received":{"bits_per_second":91234567.9}}}"#;
        let t = parse_output(text).unwrap();
        assert_eq!(t.upload_bps, 93_871_234);
        assert_eq!(t.download_bps, 91_234_567);
    }

    #[test]
    fn test_parse_with_surrounding_noise() {
        let text = "FW-A # diagnose traffictest run -c 192.0.2.10 -J\n\
                    {\"start\":{},\"end\":{\"sum_sent\":{\"bits_per_second\":1000},\"sum_received\":{\"bits_per_second\":2000}}}\r\n\
                    FW-A # ";
        let t = parse_output(text).unwrap();
        assert_eq!(t.upload_bps, 1000);
        assert_eq!(t.download_bps, 2000);
    }

    #[test]
    fn test_missing_keys_are_soft() {
        let text = r#"{"start":{},"intervals":[],"end":{},"error":"unable to connect to server: Connection refused"}"#;
        let err = parse_output(text).unwrap_err();
        assert!(err.is_soft());
        assert!(err.to_string().contains("end.sum_sent"));
        assert!(err.to_string().contains("Connection refused"));
    }

    #[test]
    fn test_absent_sum_is_soft() {
        let text = r#"{"end":{"sum_received":{"bits_per_second":1}}}"#;
        let err = parse_output(text).unwrap_err();
        assert!(err.is_soft());
        assert!(err.to_string().contains("end.sum_sent"));
    }

    #[test]
    fn test_null_values_are_malformed() {
        for text in [
            r#"{"end":{"sum_sent":{"bits_per_second":null},"sum_received":{"bits_per_second":1}}}"#,
            r#"{"end":{"sum_sent":null,"sum_received":{"bits_per_second":1}}}"#,
            r#"{"end":null}"#,
        ] {
            let err = parse_output(text).unwrap_err();
            assert!(matches!(err, MeasurementError::Malformed { .. }), "{text}: {err:?}");
            assert!(!err.is_soft());
        }
    }

    #[test]
    fn test_wrong_types_are_malformed() {
        for text in [
            r#"{"end":[]}"#,
            r#"{"end":{"sum_sent":{"bits_per_second":true},"sum_received":{"bits_per_second":1}}}"#,
            r#"[1, 2]"#,
        ] {
            assert!(!parse_output(text).unwrap_err().is_soft(), "{text}");
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = parse_output("Command fail. Return code -61").unwrap_err();
        assert!(matches!(err, MeasurementError::Malformed { .. }));
        assert!(!err.is_soft());
    }

    #[test]
    fn test_non_numeric_rate_is_malformed() {
        let text = r#"{"end":{"sum_sent":{"bits_per_second":"fast"},"sum_received":{"bits_per_second":1}}}"#;
        assert!(!parse_output(text).unwrap_err().is_soft());
    }

    #[test]
    fn test_read_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = read_measurement(&dir.path().join("10.0.0.5")).unwrap_err();
        assert!(matches!(err, MeasurementError::Missing { .. }));
    }
}
