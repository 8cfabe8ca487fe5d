//! Tabular storage backends for row stores
//!
//! A backend exposes one document (spreadsheet) as named tables addressed by
//! row positions. Row 1 is the header; data rows start at position 2.

use async_trait::async_trait;

use crate::errors::StoreError;

pub mod local;
pub mod sheets;

/// First sheet row holding data
pub const FIRST_DATA_ROW: usize = 2;

/// Trait abstraction for the remote tabular store.
/// Implementations can be in-memory, file-backed, or a spreadsheet API.
#[async_trait]
pub trait TabularBackend: Send + Sync {
    /// Create the table when it does not exist yet.
    async fn ensure_table(&self, table: &str) -> Result<(), StoreError>;
    /// Header row; empty when the table has none.
    async fn read_header(&self, table: &str) -> Result<Vec<String>, StoreError>;
    async fn write_header(&self, table: &str, header: &[String]) -> Result<(), StoreError>;
    /// Drop header and data rows.
    async fn clear(&self, table: &str) -> Result<(), StoreError>;
    /// Data rows in sheet order, each padded or cut to `width` cells.
    async fn read_rows(&self, table: &str, width: usize) -> Result<Vec<Vec<String>>, StoreError>;
    async fn append_row(&self, table: &str, row: Vec<String>) -> Result<(), StoreError>;
    /// Overwrite the row at `position` if its first cell still equals `expected_id`.
    async fn replace_row(&self, table: &str, position: usize, expected_id: &str, row: Vec<String>) -> Result<(), StoreError>;
    /// Remove the row at `position` if its first cell still equals `expected_id`.
    async fn delete_row(&self, table: &str, position: usize, expected_id: &str) -> Result<(), StoreError>;
    /// Advance the id counter of `(table, scope)` to at least `candidate` and
    /// past its previous value; returns the allocated number.
    async fn advance_counter(&self, table: &str, scope: &str, candidate: u64) -> Result<u64, StoreError>;
}

/// Counter rule shared by backends: never hand out a number twice.
pub(crate) fn advance(stored: Option<u64>, candidate: u64) -> Result<u64, StoreError> {
    match stored {
        Some(s) => s.checked_add(1).map(|n| candidate.max(n)).ok_or_else(StoreError::id_space_exhausted),
        None => Ok(candidate),
    }
}

/// Pad or cut a raw row to exactly `width` cells.
pub(crate) fn fit_row(mut row: Vec<String>, width: usize) -> Vec<String> {
    row.resize(width, String::new());
    row
}

pub(crate) fn stale_reference(position: usize, expected_id: &str, found: Option<&str>) -> StoreError {
    match found {
        Some(found) => StoreError::InvalidReference(format!(
            "ID mismatch. Row index {position} points to ID {found}, but payload requested ID {expected_id}."
        )),
        None => StoreError::InvalidReference(format!("Invalid rowIndex: {position}. Row not found or out of bounds.")),
    }
}
