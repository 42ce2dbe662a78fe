use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SYNTHETIC_SEED: u64 = 42;
pub const DEFAULT_SYNTHETIC_COUNT: usize = 2000;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LoadError {
    #[error("missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("failed to parse input: {0}")]
    ParseFailure(String),
}

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum GridError {
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("count matrix is empty; statistics are undefined")]
    EmptyMatrix,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Taxonomy {
    Domain,
    Intent,
}

impl Taxonomy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Intent => "intent",
        }
    }
}

impl Display for Taxonomy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    First,
    Second,
}

impl Level {
    #[must_use]
    pub fn number(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Second => 2,
        }
    }

    #[must_use]
    pub fn from_number(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::First),
            2 => Some(Self::Second),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "first",
            Self::Second => "second",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "first" => Some(Self::First),
            "second" => Some(Self::Second),
            _ => None,
        }
    }
}

/// Category slots in record field order.
const CATEGORY_SLOTS: [(Taxonomy, Level); 4] = [
    (Taxonomy::Domain, Level::First),
    (Taxonomy::Domain, Level::Second),
    (Taxonomy::Intent, Level::First),
    (Taxonomy::Intent, Level::Second),
];

/// Physical column names for every (taxonomy, level) slot plus the free-text query column.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Schema {
    pub domain_l1: String,
    pub domain_l2: String,
    pub intent_l1: String,
    pub intent_l2: String,
    pub query: String,
}

impl Default for Schema {
    fn default() -> Self {
        Self {
            domain_l1: "First_domain".to_string(),
            domain_l2: "Second_Domain".to_string(),
            intent_l1: "First_Intent".to_string(),
            intent_l2: "Second_Intent".to_string(),
            query: "query".to_string(),
        }
    }
}

impl Schema {
    #[must_use]
    pub fn column(&self, taxonomy: Taxonomy, level: Level) -> &str {
        match (taxonomy, level) {
            (Taxonomy::Domain, Level::First) => &self.domain_l1,
            (Taxonomy::Domain, Level::Second) => &self.domain_l2,
            (Taxonomy::Intent, Level::First) => &self.intent_l1,
            (Taxonomy::Intent, Level::Second) => &self.intent_l2,
        }
    }

    /// Map a numeric granularity onto its column.
    ///
    /// # Errors
    /// Returns [`GridError::ColumnNotFound`] when no column is mapped to `level`.
    pub fn resolve(&self, taxonomy: Taxonomy, level: u8) -> Result<(Level, &str), GridError> {
        let Some(resolved) = Level::from_number(level) else {
            return Err(GridError::ColumnNotFound(format!("{taxonomy} level {level}")));
        };
        Ok((resolved, self.column(taxonomy, resolved)))
    }

    #[must_use]
    pub fn required_columns(&self) -> Vec<&str> {
        CATEGORY_SLOTS.iter().map(|(taxonomy, level)| self.column(*taxonomy, *level)).collect()
    }
}

/// Validate a table header against the required category columns.
///
/// # Errors
/// Returns [`LoadError::MissingColumns`] listing every required column absent from `header`,
/// in schema order.
pub fn validate_columns(header: &[String], schema: &Schema) -> Result<(), LoadError> {
    let missing = schema
        .required_columns()
        .into_iter()
        .filter(|required| !header.iter().any(|name| name == required))
        .map(str::to_string)
        .collect::<Vec<_>>();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LoadError::MissingColumns(missing))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Record {
    pub domain_l1: String,
    pub domain_l2: String,
    pub intent_l1: String,
    pub intent_l2: String,
    pub query_text: String,
}

impl Record {
    #[must_use]
    pub fn label(&self, taxonomy: Taxonomy, level: Level) -> &str {
        match (taxonomy, level) {
            (Taxonomy::Domain, Level::First) => &self.domain_l1,
            (Taxonomy::Domain, Level::Second) => &self.domain_l2,
            (Taxonomy::Intent, Level::First) => &self.intent_l1,
            (Taxonomy::Intent, Level::Second) => &self.intent_l2,
        }
    }
}

/// Raw tabular input: a header row and string cells.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    #[must_use]
    pub fn new(header: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { header, rows }
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column == name)
    }
}

/// A data row excluded at load time because a category label was blank.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct RejectedRow {
    /// 1-based line in the source, header included.
    pub line: usize,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordStore {
    schema: Schema,
    columns: BTreeSet<String>,
    records: Vec<Record>,
    rejected: Vec<RejectedRow>,
}

impl RecordStore {
    /// Build a store from a table that exposes all four category columns.
    ///
    /// # Errors
    /// Returns [`LoadError::MissingColumns`] when a required column is absent.
    pub fn load(table: &Table) -> Result<Self, LoadError> {
        Self::load_with_schema(table, Schema::default())
    }

    /// Same as [`RecordStore::load`] with custom column names.
    ///
    /// # Errors
    /// Returns [`LoadError::MissingColumns`] when a required column is absent.
    pub fn load_with_schema(table: &Table, schema: Schema) -> Result<Self, LoadError> {
        validate_columns(&table.header, &schema)?;
        Ok(Self::from_table(table, schema))
    }

    /// Keep whatever category columns the table has. Grids that need an absent column fail
    /// later with [`GridError::ColumnNotFound`].
    #[must_use]
    pub fn load_partial(table: &Table) -> Self {
        Self::from_table(table, Schema::default())
    }

    fn from_table(table: &Table, schema: Schema) -> Self {
        let columns = table.header.iter().cloned().collect::<BTreeSet<_>>();
        let slot_indexes = CATEGORY_SLOTS
            .map(|(taxonomy, level)| table.column_index(schema.column(taxonomy, level)));
        let query_index = table.column_index(&schema.query);

        let mut records = Vec::with_capacity(table.rows.len());
        let mut rejected = Vec::new();
        for (row_index, row) in table.rows.iter().enumerate() {
            if row.iter().all(|cell| cell.trim().is_empty()) {
                continue;
            }

            let mut labels: [String; 4] = Default::default();
            let mut blank_slot = None;
            for (slot, index) in slot_indexes.iter().enumerate() {
                let Some(index) = index else {
                    continue;
                };
                let value = row.get(*index).map_or("", String::as_str);
                if value.trim().is_empty() {
                    blank_slot = Some(slot);
                    break;
                }
                labels[slot] = value.to_string();
            }

            if let Some(slot) = blank_slot {
                let (taxonomy, level) = CATEGORY_SLOTS[slot];
                rejected.push(RejectedRow {
                    line: row_index + 2,
                    column: schema.column(taxonomy, level).to_string(),
                });
                continue;
            }

            let [domain_l1, domain_l2, intent_l1, intent_l2] = labels;
            let query_text = query_index.and_then(|index| row.get(index)).cloned().unwrap_or_default();
            records.push(Record { domain_l1, domain_l2, intent_l1, intent_l2, query_text });
        }

        Self { schema, columns, records, rejected }
    }

    /// Wrap already-validated records. The store exposes every schema column.
    #[must_use]
    pub fn from_records(records: Vec<Record>) -> Self {
        let schema = Schema::default();
        let columns = schema
            .required_columns()
            .into_iter()
            .chain(std::iter::once(schema.query.as_str()))
            .map(str::to_string)
            .collect();
        Self { schema, columns, records, rejected: Vec::new() }
    }

    #[must_use]
    pub fn synthetic(seed: u64, count: usize) -> Self {
        Self::from_records(generate_synthetic(seed, count))
    }

    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    #[must_use]
    pub fn rejected(&self) -> &[RejectedRow] {
        &self.rejected
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn resolve_column(&self, taxonomy: Taxonomy, level: u8) -> Result<(Level, &str), GridError> {
        let (level, column) = self.schema.resolve(taxonomy, level)?;
        if !self.has_column(column) {
            return Err(GridError::ColumnNotFound(column.to_string()));
        }
        Ok((level, column))
    }
}

const DOMAIN_TAXONOMY: [(&str, [&str; 5]); 5] = [
    (
        "Technology",
        ["Artificial Intelligence", "Machine Learning", "Data Science", "Cloud Computing", "Blockchain"],
    ),
    ("Lifestyle", ["Health", "Food", "Travel", "Shopping", "Home"]),
    ("Entertainment", ["Movies", "Music", "Games", "Sports", "Reading"]),
    (
        "Education",
        ["Language Learning", "Vocational Training", "Academic Research", "Online Courses", "Exams"],
    ),
    ("Business", ["E-commerce", "Finance", "Marketing", "Management", "Entrepreneurship"]),
];

const INTENT_TAXONOMY: [(&str, [&str; 5]); 5] = [
    (
        "Lookup",
        [
            "Definition Lookup",
            "Application Lookup",
            "Comparison Lookup",
            "Price Lookup",
            "Location Lookup",
        ],
    ),
    (
        "Learning",
        [
            "Tutorial Learning",
            "Skill Learning",
            "Theory Learning",
            "Practice Learning",
            "Exam Learning",
        ],
    ),
    (
        "Consultation",
        [
            "Medical Consultation",
            "Legal Consultation",
            "Technical Consultation",
            "Investment Consultation",
            "Lifestyle Consultation",
        ],
    ),
    (
        "Recommendation",
        [
            "Content Recommendation",
            "Product Recommendation",
            "Service Recommendation",
            "Place Recommendation",
            "People Recommendation",
        ],
    ),
    ("Purchase", ["Online Purchase", "Price Comparison", "Group Buying", "Booking", "Rental"]),
];

fn sample_branch<R: Rng>(
    rng: &mut R,
    taxonomy: &'static [(&'static str, [&'static str; 5])],
) -> (&'static str, &'static str) {
    let (parent, children) = &taxonomy[rng.gen_range(0..taxonomy.len())];
    (*parent, children[rng.gen_range(0..children.len())])
}

/// Sample `count` records uniformly from the built-in domain and intent taxonomies.
///
/// The second-level label is always drawn from the children of the sampled first-level
/// label. Identical `seed` and `count` produce identical output.
#[must_use]
pub fn generate_synthetic(seed: u64, count: usize) -> Vec<Record> {
    let mut rng = StdRng::seed_from_u64(seed);
    (1..=count)
        .map(|index| {
            let (domain_l1, domain_l2) = sample_branch(&mut rng, &DOMAIN_TAXONOMY);
            let (intent_l1, intent_l2) = sample_branch(&mut rng, &INTENT_TAXONOMY);
            Record {
                domain_l1: domain_l1.to_string(),
                domain_l2: domain_l2.to_string(),
                intent_l1: intent_l1.to_string(),
                intent_l2: intent_l2.to_string(),
                query_text: format!("sample_query_{index}"),
            }
        })
        .collect()
}

/// Domain × intent counts over the categories observed in one record collection.
///
/// Axes are sorted lexically. The grid is dense over the observed axes, so a pair that was
/// never seen inside them counts `0`.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct CountMatrix {
    domain_column: String,
    intent_column: String,
    rows: Vec<String>,
    columns: Vec<String>,
    cells: Vec<Vec<u64>>,
}

impl CountMatrix {
    #[must_use]
    pub fn domain_column(&self) -> &str {
        &self.domain_column
    }

    #[must_use]
    pub fn intent_column(&self) -> &str {
        &self.intent_column
    }

    #[must_use]
    pub fn rows(&self) -> &[String] {
        &self.rows
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Row-major cell values; `cells()[row][column]`.
    #[must_use]
    pub fn cells(&self) -> &[Vec<u64>] {
        &self.cells
    }

    /// Count for one (domain, intent) pair, or `None` if either label is not on its axis.
    #[must_use]
    pub fn get(&self, row: &str, column: &str) -> Option<u64> {
        let row_index = self.rows.iter().position(|label| label == row)?;
        let column_index = self.columns.iter().position(|label| label == column)?;
        self.cells.get(row_index).and_then(|cells| cells.get(column_index)).copied()
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.cells.iter().flatten().sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    fn column_values(&self, column_index: usize) -> impl Iterator<Item = u64> + '_ {
        self.cells.iter().filter_map(move |row| row.get(column_index).copied())
    }
}

/// Cross-tabulate the store at the requested granularities.
///
/// # Errors
/// Returns [`GridError::ColumnNotFound`] when a level has no mapped column or the mapped
/// column is absent from the store.
pub fn build_matrix(
    store: &RecordStore,
    domain_level: u8,
    intent_level: u8,
) -> Result<CountMatrix, GridError> {
    let (domain_level, domain_column) = store.resolve_column(Taxonomy::Domain, domain_level)?;
    let (intent_level, intent_column) = store.resolve_column(Taxonomy::Intent, intent_level)?;

    let mut pair_counts: BTreeMap<(&str, &str), u64> = BTreeMap::new();
    let mut row_labels = BTreeSet::new();
    let mut column_labels = BTreeSet::new();
    for record in store.records() {
        let row = record.label(Taxonomy::Domain, domain_level);
        let column = record.label(Taxonomy::Intent, intent_level);
        row_labels.insert(row);
        column_labels.insert(column);
        *pair_counts.entry((row, column)).or_insert(0) += 1;
    }

    let rows = row_labels.into_iter().collect::<Vec<_>>();
    let columns = column_labels.into_iter().collect::<Vec<_>>();
    let mut cells = vec![vec![0_u64; columns.len()]; rows.len()];
    for ((row, column), count) in pair_counts {
        let (Ok(row_index), Ok(column_index)) =
            (rows.binary_search(&row), columns.binary_search(&column))
        else {
            continue;
        };
        cells[row_index][column_index] = count;
    }

    Ok(CountMatrix {
        domain_column: domain_column.to_string(),
        intent_column: intent_column.to_string(),
        rows: rows.into_iter().map(str::to_string).collect(),
        columns: columns.into_iter().map(str::to_string).collect(),
        cells,
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatisticsSummary {
    pub total_queries: u64,
    pub total_domains: usize,
    pub total_intents: usize,
    pub max_count: u64,
    pub min_count: u64,
    /// Mean across intent columns of each column's mean count.
    pub mean_count: f64,
    /// Sample standard deviation across intent columns of each column's sample standard
    /// deviation. `NaN` when fewer than two domain rows or two intent columns exist.
    pub std_count: f64,
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (divides by `n - 1`); `NaN` below two values.
#[allow(clippy::cast_precision_loss)]
fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let center = mean(values);
    let squared = values.iter().map(|value| (value - center).powi(2)).sum::<f64>();
    (squared / (values.len() - 1) as f64).sqrt()
}

/// Summarize one count matrix.
///
/// # Errors
/// Returns [`GridError::EmptyMatrix`] when the matrix has no rows or no columns.
#[allow(clippy::cast_precision_loss)]
pub fn compute_statistics(matrix: &CountMatrix) -> Result<StatisticsSummary, GridError> {
    if matrix.is_empty() {
        return Err(GridError::EmptyMatrix);
    }

    let all_cells = || matrix.cells.iter().flatten().copied();
    let max_count = all_cells().max().ok_or(GridError::EmptyMatrix)?;
    let min_count = all_cells().min().ok_or(GridError::EmptyMatrix)?;

    let mut column_means = Vec::with_capacity(matrix.columns.len());
    let mut column_stds = Vec::with_capacity(matrix.columns.len());
    for column_index in 0..matrix.columns.len() {
        let values = matrix.column_values(column_index).map(|value| value as f64).collect::<Vec<_>>();
        column_means.push(mean(&values));
        column_stds.push(sample_std(&values));
    }

    Ok(StatisticsSummary {
        total_queries: matrix.total(),
        total_domains: matrix.rows.len(),
        total_intents: matrix.columns.len(),
        max_count,
        min_count,
        mean_count: mean(&column_means),
        std_count: sample_std(&column_stds),
    })
}

/// One (domain level, intent level) pairing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct GridCombination {
    pub domain_level: u8,
    pub intent_level: u8,
}

impl GridCombination {
    pub const ALL: [Self; 4] = [
        Self { domain_level: 1, intent_level: 1 },
        Self { domain_level: 1, intent_level: 2 },
        Self { domain_level: 2, intent_level: 1 },
        Self { domain_level: 2, intent_level: 2 },
    ];

    #[must_use]
    pub fn new(domain_level: u8, intent_level: u8) -> Self {
        Self { domain_level, intent_level }
    }

    /// `first_second` style name used in file names and reports.
    #[must_use]
    pub fn slug(self) -> String {
        format!("{}_{}", level_slug(self.domain_level), level_slug(self.intent_level))
    }
}

impl Display for GridCombination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} domain vs {} intent",
            level_slug(self.domain_level),
            level_slug(self.intent_level)
        )
    }
}

/// `first`/`second` for mapped levels, `level<n>` otherwise.
#[must_use]
pub fn level_slug(level: u8) -> String {
    Level::from_number(level)
        .map_or_else(|| format!("level{level}"), |level| level.as_str().to_string())
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct GridAnalysis {
    pub combination: GridCombination,
    pub matrix: CountMatrix,
    pub statistics: StatisticsSummary,
}

/// Build the matrix and statistics for one combination.
///
/// # Errors
/// Propagates [`GridError::ColumnNotFound`] from [`build_matrix`] and
/// [`GridError::EmptyMatrix`] from [`compute_statistics`].
pub fn analyze(store: &RecordStore, combination: GridCombination) -> Result<GridAnalysis, GridError> {
    let matrix = build_matrix(store, combination.domain_level, combination.intent_level)?;
    let statistics = compute_statistics(&matrix)?;
    Ok(GridAnalysis { combination, matrix, statistics })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn record(domain_l1: &str, intent_l1: &str) -> Record {
        Record {
            domain_l1: domain_l1.to_string(),
            domain_l2: format!("{domain_l1}-sub"),
            intent_l1: intent_l1.to_string(),
            intent_l2: format!("{intent_l1}-sub"),
            query_text: format!("{domain_l1}/{intent_l1}"),
        }
    }

    fn scenario_store() -> RecordStore {
        RecordStore::from_records(vec![
            record("A", "X"),
            record("A", "X"),
            record("A", "Y"),
            record("B", "X"),
        ])
    }

    fn table(header: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            header.iter().map(|name| (*name).to_string()).collect(),
            rows.iter().map(|row| row.iter().map(|cell| (*cell).to_string()).collect()).collect(),
        )
    }

    fn must_build(store: &RecordStore, domain_level: u8, intent_level: u8) -> CountMatrix {
        match build_matrix(store, domain_level, intent_level) {
            Ok(matrix) => matrix,
            Err(err) => panic!("matrix should build: {err}"),
        }
    }

    fn must_summarize(matrix: &CountMatrix) -> StatisticsSummary {
        match compute_statistics(matrix) {
            Ok(summary) => summary,
            Err(err) => panic!("statistics should compute: {err}"),
        }
    }

    fn seeded_permutation(records: &[Record], seed: u64) -> Vec<Record> {
        fn splitmix64(mut value: u64) -> u64 {
            value = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
            value = (value ^ (value >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            value = (value ^ (value >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            value ^ (value >> 31)
        }

        let mut keyed = records
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, record)| {
                let index_u64 = u64::try_from(index).unwrap_or(u64::MAX);
                (splitmix64(seed ^ index_u64), record)
            })
            .collect::<Vec<_>>();
        keyed.sort_by_key(|(key, _)| *key);
        keyed.into_iter().map(|(_, record)| record).collect()
    }

    fn arb_records() -> impl Strategy<Value = Vec<Record>> {
        prop::collection::vec((0..4_u8, 0..3_u8, 0..3_u8, 0..4_u8), 0..80).prop_map(|rows| {
            rows.into_iter()
                .map(|(d1, d2, i1, i2)| Record {
                    domain_l1: format!("D{d1}"),
                    domain_l2: format!("D{d1}.{d2}"),
                    intent_l1: format!("I{i1}"),
                    intent_l2: format!("I{i1}.{i2}"),
                    query_text: String::new(),
                })
                .collect()
        })
    }

    #[test]
    fn crosstab_counts_observed_pairs() {
        let matrix = must_build(&scenario_store(), 1, 1);

        assert_eq!(matrix.rows(), ["A".to_string(), "B".to_string()]);
        assert_eq!(matrix.columns(), ["X".to_string(), "Y".to_string()]);
        assert_eq!(matrix.get("A", "X"), Some(2));
        assert_eq!(matrix.get("A", "Y"), Some(1));
        assert_eq!(matrix.get("B", "X"), Some(1));
        assert_eq!(matrix.get("B", "Y"), Some(0));
        assert_eq!(matrix.get("C", "X"), None);
        assert_eq!(matrix.domain_column(), "First_domain");
        assert_eq!(matrix.intent_column(), "First_Intent");

        let summary = must_summarize(&matrix);
        assert_eq!(summary.total_queries, 4);
        assert_eq!(summary.total_domains, 2);
        assert_eq!(summary.total_intents, 2);
        assert_eq!(summary.max_count, 2);
        assert_eq!(summary.min_count, 0);
    }

    #[test]
    fn second_level_axes_use_second_level_columns() {
        let matrix = must_build(&scenario_store(), 2, 1);
        assert_eq!(matrix.rows(), ["A-sub".to_string(), "B-sub".to_string()]);
        assert_eq!(matrix.domain_column(), "Second_Domain");
        assert_eq!(matrix.get("A-sub", "X"), Some(2));
    }

    #[test]
    fn unmapped_level_is_column_not_found() {
        let store = scenario_store();
        assert_eq!(
            build_matrix(&store, 3, 1),
            Err(GridError::ColumnNotFound("domain level 3".to_string()))
        );
        assert_eq!(
            build_matrix(&store, 1, 0),
            Err(GridError::ColumnNotFound("intent level 0".to_string()))
        );
    }

    #[test]
    fn column_absent_from_store_is_column_not_found() {
        let store = RecordStore::load_partial(&table(
            &["First_domain", "Second_Domain", "First_Intent"],
            &[&["A", "A1", "X"], &["B", "B1", "Y"]],
        ));

        assert!(build_matrix(&store, 1, 1).is_ok());
        assert_eq!(
            build_matrix(&store, 1, 2),
            Err(GridError::ColumnNotFound("Second_Intent".to_string()))
        );
    }

    #[test]
    fn empty_store_yields_empty_matrix_error() {
        let store = RecordStore::from_records(Vec::new());
        let matrix = must_build(&store, 1, 1);
        assert!(matrix.is_empty());
        assert_eq!(matrix.total(), 0);
        assert_eq!(compute_statistics(&matrix), Err(GridError::EmptyMatrix));
        assert_eq!(
            analyze(&store, GridCombination::new(2, 2)).map(|analysis| analysis.statistics),
            Err(GridError::EmptyMatrix)
        );
    }

    #[test]
    fn std_count_is_std_of_column_stds() {
        // X = [3, 1, 2], Y = [1, 1, 0]
        let mut records = Vec::new();
        for (domain, intent, times) in
            [("A", "X", 3), ("A", "Y", 1), ("B", "X", 1), ("B", "Y", 1), ("C", "X", 2)]
        {
            for _ in 0..times {
                records.push(record(domain, intent));
            }
        }
        let store = RecordStore::from_records(records);
        let summary = must_summarize(&must_build(&store, 1, 1));

        let expected_mean = (2.0 + 2.0 / 3.0) / 2.0;
        let expected_std = (1.0 - (1.0_f64 / 3.0).sqrt()) / 2.0_f64.sqrt();
        assert!((summary.mean_count - expected_mean).abs() < 1e-12);
        assert!((summary.std_count - expected_std).abs() < 1e-12);
        assert_eq!(summary.total_queries, 8);
        assert_eq!((summary.max_count, summary.min_count), (3, 0));
    }

    #[test]
    fn single_row_or_column_propagates_nan_std() {
        let single_row =
            RecordStore::from_records(vec![record("A", "X"), record("A", "Y"), record("A", "Y")]);
        let summary = must_summarize(&must_build(&single_row, 1, 1));
        assert!(summary.std_count.is_nan());
        assert!((summary.mean_count - 1.5).abs() < f64::EPSILON);

        let single_column =
            RecordStore::from_records(vec![record("A", "X"), record("B", "X"), record("B", "X")]);
        let summary = must_summarize(&must_build(&single_column, 1, 1));
        assert!(summary.std_count.is_nan());
        assert_eq!(summary.total_intents, 1);
    }

    #[test]
    fn repeated_builds_are_identical() {
        let store = RecordStore::synthetic(7, 300);
        for combination in GridCombination::ALL {
            let first = must_build(&store, combination.domain_level, combination.intent_level);
            let second = must_build(&store, combination.domain_level, combination.intent_level);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn synthetic_generation_is_reproducible() {
        let first = generate_synthetic(DEFAULT_SYNTHETIC_SEED, DEFAULT_SYNTHETIC_COUNT);
        let second = generate_synthetic(DEFAULT_SYNTHETIC_SEED, DEFAULT_SYNTHETIC_COUNT);
        assert_eq!(first.len(), DEFAULT_SYNTHETIC_COUNT);

        let first_json = serde_json::to_vec(&first)
            .unwrap_or_else(|err| panic!("records should serialize: {err}"));
        let second_json = serde_json::to_vec(&second)
            .unwrap_or_else(|err| panic!("records should serialize: {err}"));
        assert_eq!(first_json, second_json);
        assert_ne!(first, generate_synthetic(DEFAULT_SYNTHETIC_SEED + 1, DEFAULT_SYNTHETIC_COUNT));
    }

    #[test]
    fn synthetic_second_levels_stay_under_their_parent() {
        let records = generate_synthetic(3, 500);
        for record in &records {
            let Some((_, domains)) =
                DOMAIN_TAXONOMY.iter().find(|(parent, _)| *parent == record.domain_l1)
            else {
                panic!("unknown first-level domain {}", record.domain_l1);
            };
            assert!(domains.contains(&record.domain_l2.as_str()));

            let Some((_, intents)) =
                INTENT_TAXONOMY.iter().find(|(parent, _)| *parent == record.intent_l1)
            else {
                panic!("unknown first-level intent {}", record.intent_l1);
            };
            assert!(intents.contains(&record.intent_l2.as_str()));
        }
        assert_eq!(records[0].query_text, "sample_query_1");
        assert_eq!(records[499].query_text, "sample_query_500");

        let summary = must_summarize(&must_build(&RecordStore::from_records(records), 1, 1));
        assert_eq!(summary.total_domains, 5);
        assert_eq!(summary.total_intents, 5);
    }

    #[test]
    fn load_reports_every_missing_column() {
        let result = RecordStore::load(&table(&["First_domain", "query"], &[&["A", "q"]]));
        assert_eq!(
            result,
            Err(LoadError::MissingColumns(vec![
                "Second_Domain".to_string(),
                "First_Intent".to_string(),
                "Second_Intent".to_string(),
            ]))
        );
    }

    #[test]
    fn load_flags_rows_with_blank_labels() {
        let store = match RecordStore::load(&table(
            &["id", "First_domain", "Second_Domain", "First_Intent", "Second_Intent", "query"],
            &[
                &["1", "技术", "人工智能", "查询", "定义查询", "what is a transformer"],
                &["2", "技术", "  ", "查询", "定义查询", "blank sub-domain"],
                &["", "", "", "", "", ""],
                &["4", "生活", "健康", "咨询"],
            ],
        )) {
            Ok(store) => store,
            Err(err) => panic!("table should load: {err}"),
        };

        assert_eq!(store.len(), 1);
        assert_eq!(store.records()[0].domain_l1, "技术");
        assert_eq!(store.records()[0].query_text, "what is a transformer");
        assert_eq!(
            store.rejected(),
            [
                RejectedRow { line: 3, column: "Second_Domain".to_string() },
                RejectedRow { line: 5, column: "Second_Intent".to_string() },
            ]
        );
        assert!(store.has_column("id"));
        assert!(store.columns().contains("First_Intent"));
    }

    #[test]
    fn custom_schema_renames_columns() {
        let schema = Schema {
            domain_l1: "domain".to_string(),
            domain_l2: "subdomain".to_string(),
            intent_l1: "intent".to_string(),
            intent_l2: "subintent".to_string(),
            query: "text".to_string(),
        };
        let store = match RecordStore::load_with_schema(
            &table(&["domain", "subdomain", "intent", "subintent"], &[&["A", "A1", "X", "X1"]]),
            schema,
        ) {
            Ok(store) => store,
            Err(err) => panic!("table should load: {err}"),
        };
        let matrix = must_build(&store, 2, 2);
        assert_eq!(matrix.get("A1", "X1"), Some(1));
        assert_eq!(matrix.intent_column(), "subintent");
    }

    #[test]
    fn combination_slugs_name_levels() {
        let slugs = GridCombination::ALL.iter().map(|combination| combination.slug()).collect::<Vec<_>>();
        assert_eq!(slugs, ["first_first", "first_second", "second_first", "second_second"]);
        assert_eq!(GridCombination::new(3, 1).slug(), "level3_first");
        assert_eq!(GridCombination::new(2, 1).to_string(), "second domain vs first intent");
    }

    #[test]
    fn core_types_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<RecordStore>();
        assert_send_sync::<CountMatrix>();
        assert_send_sync::<StatisticsSummary>();
    }

    proptest! {
        #[test]
        fn property_cells_sum_to_record_count(records in arb_records()) {
            let store = RecordStore::from_records(records);
            for combination in GridCombination::ALL {
                let matrix = build_matrix(&store, combination.domain_level, combination.intent_level);
                prop_assert!(matrix.is_ok());
                let matrix = matrix.unwrap_or_else(|_| unreachable!());
                prop_assert_eq!(matrix.total(), u64::try_from(store.len()).unwrap_or(u64::MAX));

                if let Ok(summary) = compute_statistics(&matrix) {
                    prop_assert!(summary.max_count >= summary.min_count);
                    prop_assert_eq!(summary.total_domains, matrix.rows().len());
                    prop_assert_eq!(summary.total_queries, matrix.total());
                } else {
                    prop_assert!(store.is_empty());
                }
            }
        }

        #[test]
        fn property_axes_only_contain_observed_labels(records in arb_records()) {
            let store = RecordStore::from_records(records);
            let matrix = build_matrix(&store, 2, 2).unwrap_or_else(|_| unreachable!());
            for (row_index, row) in matrix.rows().iter().enumerate() {
                prop_assert!(store.records().iter().any(|record| &record.domain_l2 == row));
                prop_assert!(matrix.cells()[row_index].iter().sum::<u64>() > 0);
            }
            for (column_index, column) in matrix.columns().iter().enumerate() {
                prop_assert!(store.records().iter().any(|record| &record.intent_l2 == column));
                prop_assert!(matrix.column_values(column_index).sum::<u64>() > 0);
            }
        }

        #[test]
        fn property_matrix_is_independent_of_record_order(
            records in arb_records(),
            seed_a in any::<u64>(),
            seed_b in any::<u64>(),
        ) {
            let store_a = RecordStore::from_records(seeded_permutation(&records, seed_a));
            let store_b = RecordStore::from_records(seeded_permutation(&records, seed_b));
            for combination in GridCombination::ALL {
                prop_assert_eq!(
                    build_matrix(&store_a, combination.domain_level, combination.intent_level),
                    build_matrix(&store_b, combination.domain_level, combination.intent_level)
                );
            }
        }
    }
}
