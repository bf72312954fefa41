//! Final report serialization.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use tracing::info;

use crate::reconcile::Report;

/// Pretty-print `report` with 4-space indentation.
pub fn to_json(report: &Report) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    report.serialize(&mut ser).context("failed to serialize report")?;
    let mut out = String::from_utf8(buf).context("report is not valid UTF-8")?;
    out.push_str("\r\n");
    Ok(out)
}

/// Write the report next to its final location, then rename it into place.
pub fn write_report(report: &Report, path: &Path) -> Result<()> {
    let json = to_json(report)?;

    let tmp = tmp_path(path);
    std::fs::write(&tmp, json).with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to move report into {}", path.display()))?;

    info!(path = %path.display(), devices = report.len(), "report written");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{FinalRecord, Measured};

    fn sample() -> Report {
        let mut report = Report::new();
        report.insert(
            "FW-A".to_string(),
            FinalRecord {
                upload_contractual: 100_000_000,
                download_contractual: 100_000_000,
                upload: Some(Measured::Bps(900_000_000)),
                download: Some(Measured::Bps(850_000_000)),
            },
        );
        report.insert(
            "FW-B".to_string(),
            FinalRecord {
                upload_contractual: 0,
                download_contractual: 0,
                upload: Some(Measured::Failed),
                download: Some(Measured::Failed),
            },
        );
        report
    }

    #[test]
    fn test_four_space_indent_and_crlf() {
        let json = to_json(&sample()).unwrap();
        assert!(json.starts_with("{\n    \"FW-A\": {\n        \"upload_contractual\": 100000000,"));
        assert!(json.contains("\"upload\": \"0\""));
        assert!(json.contains("\"download\": 850000000"));
        assert!(json.ends_with("}\r\n"));
    }

    #[test]
    fn test_empty_report_is_valid_json() {
        let json = to_json(&Report::new()).unwrap();
        assert_eq!(json, "{}\r\n");
        let parsed: serde_json::Value = serde_json::from_str(json.trim()).unwrap();
        assert!(parsed.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_write_report_replaces_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("result.json");
        std::fs::write(&path, "stale").unwrap();

        write_report(&sample(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(content.trim()).unwrap();
        assert_eq!(parsed["FW-B"]["download"], "0");
        assert!(!dir.path().join("result.json.tmp").exists());
    }
}
