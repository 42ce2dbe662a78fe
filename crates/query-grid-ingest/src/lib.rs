//! Tabular input readers (CSV and spreadsheets) feeding the record store

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};
use query_grid_core::{LoadError, RecordStore, Table};

const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Spreadsheet,
}

impl InputFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "csv" => Some(Self::Csv),
            "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => Some(Self::Spreadsheet),
            _ => None,
        }
    }
}

/// How strictly the required category columns are enforced at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnPolicy {
    /// Every required column must be present.
    #[default]
    Strict,
    /// Keep the data; combinations needing an absent column fail later.
    Partial,
}

/// Read the first sheet (or the CSV body) of `path` into a [`Table`].
///
/// # Errors
/// Returns [`LoadError::ParseFailure`] when the file cannot be opened, decoded, or has an
/// unsupported extension.
pub fn read_table(path: &Path) -> Result<Table, LoadError> {
    match InputFormat::from_path(path) {
        Some(InputFormat::Csv) => read_csv_table(path),
        Some(InputFormat::Spreadsheet) => read_spreadsheet_table(path),
        None => Err(LoadError::ParseFailure(format!(
            "unsupported input format for {} (expected .csv, .xlsx, .xlsm, .xlsb, .xls or .ods)",
            path.display()
        ))),
    }
}

/// Read `path` and validate it into a [`RecordStore`].
///
/// # Errors
/// Returns [`LoadError::ParseFailure`] for unreadable input and, under
/// [`ColumnPolicy::Strict`], [`LoadError::MissingColumns`] when required columns are absent.
pub fn load_store(path: &Path, policy: ColumnPolicy) -> Result<RecordStore, LoadError> {
    let table = read_table(path)?;
    tracing::info!("Loaded {} rows from {}", table.rows.len(), path.display());
    tracing::debug!("Columns: {:?}", table.header);

    let store = match policy {
        ColumnPolicy::Strict => RecordStore::load(&table)?,
        ColumnPolicy::Partial => RecordStore::load_partial(&table),
    };

    for rejected in store.rejected() {
        tracing::warn!(
            "Skipping line {} of {}: blank value in column {}",
            rejected.line,
            path.display(),
            rejected.column
        );
    }

    Ok(store)
}

fn read_csv_table(path: &Path) -> Result<Table, LoadError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|err| parse_failure(path, &err))?;

    let mut header = reader
        .headers()
        .map_err(|err| parse_failure(path, &err))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    strip_bom(&mut header);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|err| parse_failure(path, &err))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table::new(header, rows))
}

fn read_spreadsheet_table(path: &Path) -> Result<Table, LoadError> {
    let mut workbook = open_workbook_auto(path).map_err(|err| parse_failure(path, &err))?;
    let Some(sheet_name) = workbook.sheet_names().first().cloned() else {
        return Err(LoadError::ParseFailure(format!("{} has no worksheets", path.display())));
    };
    let range = workbook.worksheet_range(&sheet_name).map_err(|err| parse_failure(path, &err))?;

    let mut rows = range.rows().map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>());
    let Some(mut header) = rows.next() else {
        return Err(LoadError::ParseFailure(format!(
            "worksheet '{sheet_name}' in {} is empty",
            path.display()
        )));
    };
    strip_bom(&mut header);

    Ok(Table::new(header, rows.collect()))
}

fn strip_bom(header: &mut [String]) {
    if let Some(first) = header.first_mut() {
        if let Some(stripped) = first.strip_prefix(UTF8_BOM) {
            *first = stripped.to_string();
        }
    }
}

fn parse_failure(path: &Path, err: &dyn std::fmt::Display) -> LoadError {
    LoadError::ParseFailure(format!("{}: {err}", path.display()))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        // Whole floats print without the trailing ".0"
        Data::Float(f) if f.fract() == 0.0 => format!("{f:.0}"),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(true) => "TRUE".to_string(),
        Data::Bool(false) => "FALSE".to_string(),
        Data::Error(e) => format!("#ERROR: {e:?}"),
        Data::DateTime(dt) => dt.to_string(),
    }
}
