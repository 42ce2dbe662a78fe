//! CSV export of count matrices

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use query_grid_core::CountMatrix;

/// Spreadsheet tools need the BOM to detect UTF-8 labels.
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Write `matrix` as CSV: a header of the domain column name followed by intent labels,
/// then one row per domain label.
///
/// # Errors
/// Returns an error when the destination cannot be created or written.
pub fn write_matrix_csv(matrix: &CountMatrix, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create CSV directory {}", parent.display()))?;
    }

    let mut file =
        File::create(path).with_context(|| format!("failed to create CSV {}", path.display()))?;
    file.write_all(UTF8_BOM).with_context(|| format!("failed to write CSV {}", path.display()))?;

    let mut writer = csv::Writer::from_writer(file);
    let header =
        std::iter::once(matrix.domain_column()).chain(matrix.columns().iter().map(String::as_str));
    writer
        .write_record(header)
        .with_context(|| format!("failed to write CSV header to {}", path.display()))?;

    for (label, counts) in matrix.rows().iter().zip(matrix.cells()) {
        let mut record = Vec::with_capacity(counts.len() + 1);
        record.push(label.clone());
        record.extend(counts.iter().map(u64::to_string));
        writer
            .write_record(&record)
            .with_context(|| format!("failed to write CSV row {label:?} to {}", path.display()))?;
    }

    writer.flush().with_context(|| format!("failed to flush CSV {}", path.display()))
}
