//! Row store service layer.
//! - `row_store`: schema-driven CRUD over one table, with header reconciliation and id allocation.
//! - `storage`: tabular backends (local JSON document, Google Sheets).
//! - `datasets`: the built-in employee dataset presets.

pub mod errors;
pub mod row_store;
pub mod storage;
pub mod datasets;

pub use datasets::Dataset;
pub use errors::StoreError;
pub use row_store::RowStore;
