//! Diagnostic report writer.
//!
//! Serializes diagnostic records to a flat UTF-8 CSV with the fixed
//! two-column header `Tabela,Feições Encontradas`. Every record given is
//! written: tables whose query failed appear with their reported zero
//! count, so the file always matches the diagnostic output the caller saw.

use crate::error::PostIntersectError;
use crate::models::DiagnosticRecord;
use crate::Result;
use std::path::Path;

/// Header of the diagnostic report file.
pub const REPORT_HEADER: [&str; 2] = ["Tabela", "Feições Encontradas"];

/// Writes the diagnostic records to a CSV file at `path`.
pub fn write_diagnostic_report(records: &[DiagnosticRecord], path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path).map_err(|e| {
        PostIntersectError::io(
            format!("Failed to create report file {}", path.display()),
            std::io::Error::other(e),
        )
    })?;

    let write_failed = |e: csv::Error| {
        PostIntersectError::io(
            format!("Failed to write report file {}", path.display()),
            std::io::Error::other(e),
        )
    };

    writer.write_record(REPORT_HEADER).map_err(write_failed)?;
    for record in records {
        writer
            .write_record([record.table.as_str(), &record.feature_count.to_string()])
            .map_err(write_failed)?;
    }

    writer.flush().map_err(|e| {
        PostIntersectError::io(format!("Failed to flush report file {}", path.display()), e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_has_fixed_header_and_one_row_per_record() {
        let records = vec![
            DiagnosticRecord::counted("hidrografia", 5),
            DiagnosticRecord::counted("vegetacao", 0),
            DiagnosticRecord::failed("restrito", "permission denied"),
        ];

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diagnostico.csv");
        write_diagnostic_report(&records, &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();

        assert_eq!(lines[0], "Tabela,Feições Encontradas");
        assert_eq!(lines[1], "hidrografia,5");
        assert_eq!(lines[2], "vegetacao,0");
        // Errored tables are reported with their zero count, never dropped.
        assert_eq!(lines[3], "restrito,0");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn test_report_on_empty_batch_is_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.csv");
        write_diagnostic_report(&[], &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim_end(), "Tabela,Feições Encontradas");
    }
}
