use std::collections::HashSet;

use crate::errors::StoreError;

/// 标识列名称：所有数据集的第一列
pub const ID_COLUMN: &str = "ID";

/// Ordered column list of a table. Column order is the physical column order
/// in the sheet, so it is never sorted or deduplicated after construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<String>,
}

impl TableSchema {
    /// Build a schema. Names must be unique and column 0 must be `ID`.
    pub fn new<I, S>(columns: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.first().map(String::as_str) != Some(ID_COLUMN) {
            return Err(StoreError::Validation(format!("first column must be '{ID_COLUMN}'")));
        }
        let mut seen = HashSet::new();
        for c in &columns {
            if c.trim().is_empty() {
                return Err(StoreError::Validation("column names must not be empty".into()));
            }
            if !seen.insert(c.as_str()) {
                return Err(StoreError::Validation(format!("duplicate column '{c}'")));
            }
        }
        Ok(Self { columns })
    }

    pub fn columns(&self) -> &[String] { &self.columns }

    pub fn width(&self) -> usize { self.columns.len() }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Header rows read back from a sheet may carry trailing blank cells.
    pub fn matches_header(&self, header: &[String]) -> bool {
        let trimmed = trim_trailing_blanks(header);
        trimmed.len() == self.columns.len()
            && trimmed.iter().zip(&self.columns).all(|(h, c)| h.trim() == c)
    }
}

pub(crate) fn trim_trailing_blanks(row: &[String]) -> &[String] {
    let end = row.iter().rposition(|v| !v.trim().is_empty()).map_or(0, |i| i + 1);
    &row[..end]
}

/// How identifiers are generated for new rows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdStrategy {
    /// `max(seen, start) + 1` rendered as a plain number.
    Numeric { start: u64 },
    /// Fixed prefix plus a zero padded counter, e.g. `CC0001`.
    Prefixed { prefix: String, width: usize },
    /// Prefix looked up from another column of the create payload.
    PrefixByColumn {
        column: String,
        codes: Vec<(String, String)>,
        fallback: String,
        width: usize,
    },
}

/// The boolean-like column marking live records.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveFlag {
    pub column: String,
    /// Coerce update values to `TRUE`/`FALSE`
    pub normalize_on_update: bool,
    /// Render the flag as a JSON boolean on reads
    pub render_as_bool: bool,
    /// Upper-case the stored text on reads
    pub upper_case_on_read: bool,
}

impl ActiveFlag {
    pub const ACTIVE: &'static str = "TRUE";
    pub const INACTIVE: &'static str = "FALSE";

    pub fn new(column: impl Into<String>) -> Self {
        Self { column: column.into(), normalize_on_update: false, render_as_bool: false, upper_case_on_read: false }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteMode {
    /// Remove the physical row; later rows shift up by one.
    Hard,
    /// Flip the active flag to `FALSE` and keep the row.
    Soft,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateLocator {
    ById,
    /// Caller passes `rowIndex` which must still hold the given ID.
    VerifiedPosition,
}

/// What reconciliation does when the header row differs from the schema.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SchemaDriftPolicy {
    #[default]
    Reject,
    /// Clear the table (dropping data rows) and rewrite the header.
    Reset,
}

impl std::str::FromStr for SchemaDriftPolicy {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "reset" => Ok(Self::Reset),
            other => Err(StoreError::Validation(format!("unknown schema drift policy '{other}'"))),
        }
    }
}

/// Full per-table configuration of a row store.
#[derive(Clone, Debug)]
pub struct RowStoreSpec {
    pub schema: TableSchema,
    pub id_strategy: IdStrategy,
    pub active_flag: ActiveFlag,
    pub delete_mode: DeleteMode,
    pub update_locator: UpdateLocator,
    pub drift_policy: SchemaDriftPolicy,
    /// Column filled with the creation time
    pub stamp_column: Option<String>,
    /// Emit each record's sheet row as `rowIndex` on reads
    pub expose_row_index: bool,
}

impl RowStoreSpec {
    /// Check that every column referenced by a policy exists in the schema.
    pub fn validate(&self) -> Result<(), StoreError> {
        let mut referenced = vec![self.active_flag.column.as_str()];
        if let Some(c) = &self.stamp_column {
            referenced.push(c);
        }
        if let IdStrategy::PrefixByColumn { column, .. } = &self.id_strategy {
            referenced.push(column);
        }
        for c in referenced {
            if c == ID_COLUMN || self.schema.index_of(c).is_none() {
                return Err(StoreError::Validation(format!("column '{c}' is not a data column of the schema")));
            }
        }
        Ok(())
    }
}
