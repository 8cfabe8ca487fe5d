//! Row store: a table with a fixed column schema, kept in a tabular backend.
//!
//! Every operation reconciles the header row first. Scan-then-write
//! sequences (create, update, delete) run under a per-store lock, row writes
//! are checked against the expected id by the backend, and ids come from a
//! backend counter so they are never handed out twice.

pub mod ids;
pub mod payload;
pub mod record;
pub mod schema;

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use common::metrics;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::datasets::Dataset;
use crate::errors::StoreError;
use crate::storage::{stale_reference, TabularBackend, FIRST_DATA_ROW};

use payload::{cell_value, normalize_flag, Payload};
use record::{Record, RecordView};
use schema::{trim_trailing_blanks, ActiveFlag, DeleteMode, RowStoreSpec, SchemaDriftPolicy, UpdateLocator, ID_COLUMN};

pub struct RowStore {
    name: String,
    table: String,
    spec: RowStoreSpec,
    view: RecordView,
    backend: Arc<dyn TabularBackend>,
    gate: Mutex<()>,
}

impl RowStore {
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        spec: RowStoreSpec,
        backend: Arc<dyn TabularBackend>,
    ) -> Result<Self, StoreError> {
        spec.validate()?;
        let view = RecordView {
            bool_column: spec.active_flag.render_as_bool.then(|| spec.active_flag.column.clone()),
            upper_column: spec.active_flag.upper_case_on_read.then(|| spec.active_flag.column.clone()),
            expose_row_index: spec.expose_row_index || spec.update_locator == UpdateLocator::VerifiedPosition,
        };
        Ok(Self { name: name.into(), table: table.into(), spec, view, backend, gate: Mutex::new(()) })
    }

    pub fn for_dataset(dataset: &Dataset, backend: Arc<dyn TabularBackend>) -> Result<Self, StoreError> {
        Self::new(dataset.name.clone(), dataset.table.clone(), dataset.spec.clone(), backend)
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn table(&self) -> &str { &self.table }

    pub fn spec(&self) -> &RowStoreSpec { &self.spec }

    /// Make sure the table exists and its header equals the schema.
    ///
    /// A blank header is written in place. Any other difference is rejected
    /// unless the drift policy is [`SchemaDriftPolicy::Reset`], which clears
    /// the table first.
    pub async fn reconcile(&self) -> Result<(), StoreError> {
        self.backend.ensure_table(&self.table).await?;
        let header = self.backend.read_header(&self.table).await?;
        if self.spec.schema.matches_header(&header) {
            return Ok(());
        }

        let columns = self.spec.schema.columns();
        let found = trim_trailing_blanks(&header).len();
        if found == 0 {
            info!(dataset = %self.name, table = %self.table, columns = columns.len(), "writing header row");
            return self.backend.write_header(&self.table, columns).await;
        }

        match self.spec.drift_policy {
            SchemaDriftPolicy::Reject => {
                error!(
                    dataset = %self.name,
                    table = %self.table,
                    expected = columns.len(),
                    found,
                    "header row does not match schema; refusing to touch table"
                );
                Err(StoreError::SchemaMismatch { table: self.table.clone(), expected: columns.len(), found })
            }
            SchemaDriftPolicy::Reset => {
                let dropped = self.carry_counters(&header).await?;
                warn!(
                    dataset = %self.name,
                    table = %self.table,
                    expected = columns.len(),
                    found,
                    dropped_rows = dropped,
                    "header row does not match schema; resetting table"
                );
                self.backend.clear(&self.table).await?;
                self.backend.write_header(&self.table, columns).await?;
                metrics::SCHEMA_RESETS.with_label_values(&[self.table.as_str()]).inc();
                Ok(())
            }
        }
    }

    /// Record the highest id of every scope in the counters before a reset
    /// drops the rows. Returns the number of rows about to be dropped.
    async fn carry_counters(&self, header: &[String]) -> Result<usize, StoreError> {
        let id_col = header.iter().position(|h| h.trim() == ID_COLUMN).unwrap_or(0);
        let rows = self.backend.read_rows(&self.table, id_col + 1).await?;
        for format in self.spec.id_strategy.formats() {
            let seen = format.max_seen(rows.iter().map(|r| r[id_col].as_str()));
            if let Some(n) = format.taken(seen) {
                self.backend.advance_counter(&self.table, format.scope(), n).await?;
                debug!(dataset = %self.name, scope = format.scope(), id = n, "id counter carried over reset");
            }
        }
        Ok(rows.len())
    }

    /// All records in table order. Fully blank rows are skipped.
    pub async fn list(&self) -> Result<Vec<Record>, StoreError> {
        self.reconcile().await?;
        self.load().await
    }

    pub async fn get(&self, id: &str) -> Result<Record, StoreError> {
        self.reconcile().await?;
        let records = self.load().await?;
        find(&records, id).cloned().ok_or_else(|| StoreError::not_found(id.trim()))
    }

    /// Append a new record and return its store-assigned id.
    pub async fn create(&self, payload: &Payload) -> Result<String, StoreError> {
        if payload.is_empty() {
            return Err(StoreError::MissingBody);
        }
        let format = self.spec.id_strategy.format_for(|c| payload.get(c).and_then(Value::as_str))?;

        let _guard = self.gate.lock().await;
        self.reconcile().await?;
        let records = self.load().await?;
        let seen = format.max_seen(records.iter().map(Record::id));
        let n = self
            .backend
            .advance_counter(&self.table, format.scope(), format.next_after(seen)?)
            .await?;
        let id = format.render(n);

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let row: Vec<String> = self
            .spec
            .schema
            .columns()
            .iter()
            .map(|c| {
                if c == ID_COLUMN {
                    id.clone()
                } else if *c == self.spec.active_flag.column {
                    ActiveFlag::ACTIVE.to_string()
                } else if self.spec.stamp_column.as_ref() == Some(c) {
                    now.clone()
                } else {
                    payload.get(c).and_then(cell_value).unwrap_or_default()
                }
            })
            .collect();
        self.backend.append_row(&self.table, row).await?;

        metrics::IDS_ALLOCATED.with_label_values(&[self.name.as_str()]).inc();
        info!(dataset = %self.name, table = %self.table, %id, "record created");
        Ok(id)
    }

    /// Replace the fields present in `payload`; the id column never changes.
    pub async fn update(&self, id: &str, payload: &Payload) -> Result<Record, StoreError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StoreError::MissingIdentifier);
        }
        if payload.is_empty() {
            return Err(StoreError::MissingBody);
        }

        let _guard = self.gate.lock().await;
        self.reconcile().await?;
        let records = self.load().await?;
        let current = match self.spec.update_locator {
            UpdateLocator::ById => find(&records, id).ok_or_else(|| StoreError::not_found(id))?,
            UpdateLocator::VerifiedPosition => {
                let position = payload::row_index(payload)?;
                let rec = records
                    .iter()
                    .find(|r| r.row_index == position)
                    .ok_or_else(|| stale_reference(position, id, None))?;
                if rec.id().trim() != id {
                    return Err(stale_reference(position, id, Some(rec.id())));
                }
                rec
            }
        };

        let flag = &self.spec.active_flag;
        let row: Vec<String> = current
            .fields()
            .map(|(column, existing)| {
                if column == ID_COLUMN {
                    return existing.to_string();
                }
                match payload.get(column) {
                    Some(v) if column == flag.column && flag.normalize_on_update && !v.is_null() => {
                        normalize_flag(v).to_string()
                    }
                    Some(v) => cell_value(v).unwrap_or_else(|| existing.to_string()),
                    None => existing.to_string(),
                }
            })
            .collect();

        self.backend.replace_row(&self.table, current.row_index, current.id(), row.clone()).await?;
        info!(dataset = %self.name, table = %self.table, %id, row = current.row_index, "record updated");
        Ok(Record::from_row(&self.spec.schema, current.row_index, &row, &self.view))
    }

    /// Remove the record, or flag it inactive for soft-delete datasets.
    pub async fn delete(&self, id: &str) -> Result<DeleteMode, StoreError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(StoreError::MissingIdentifier);
        }

        let _guard = self.gate.lock().await;
        self.reconcile().await?;
        let records = self.load().await?;
        let current = find(&records, id).ok_or_else(|| StoreError::not_found(id))?;

        match self.spec.delete_mode {
            DeleteMode::Hard => {
                self.backend.delete_row(&self.table, current.row_index, current.id()).await?;
            }
            DeleteMode::Soft => {
                let flag = self.spec.active_flag.column.as_str();
                let row: Vec<String> = current
                    .fields()
                    .map(|(c, v)| if c == flag { ActiveFlag::INACTIVE.to_string() } else { v.to_string() })
                    .collect();
                self.backend.replace_row(&self.table, current.row_index, current.id(), row).await?;
            }
        }
        info!(dataset = %self.name, table = %self.table, %id, mode = ?self.spec.delete_mode, "record deleted");
        Ok(self.spec.delete_mode)
    }

    async fn load(&self) -> Result<Vec<Record>, StoreError> {
        let rows = self.backend.read_rows(&self.table, self.spec.schema.width()).await?;
        let records: Vec<Record> = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.iter().any(|c| !c.trim().is_empty()))
            .map(|(i, r)| Record::from_row(&self.spec.schema, i + FIRST_DATA_ROW, r, &self.view))
            .collect();
        debug!(dataset = %self.name, count = records.len(), "loaded records");
        Ok(records)
    }
}

fn find<'a>(records: &'a [Record], id: &str) -> Option<&'a Record> {
    let id = id.trim();
    records.iter().find(|r| r.id().trim() == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{self, Dataset};
    use crate::storage::local::LocalBackend;
    use serde_json::json;

    fn store(name: &str) -> (RowStore, Arc<LocalBackend>) {
        let backend = LocalBackend::in_memory();
        let dataset = Dataset::preset(name).expect("preset");
        let store = RowStore::for_dataset(&dataset, backend.clone()).expect("store");
        (store, backend)
    }

    fn payload(v: Value) -> Payload {
        match v {
            Value::Object(m) => m,
            _ => panic!("payload must be an object"),
        }
    }

    fn strings(v: &[&str]) -> Vec<String> { v.iter().map(|s| s.to_string()).collect() }

    #[tokio::test]
    async fn numeric_ids_start_at_1001_and_increment() -> Result<(), StoreError> {
        let (store, _) = store(datasets::EMPLOYEES_UNIT2);
        assert_eq!(store.create(&payload(json!({"Full Name": "A"}))).await?, "1001");
        assert_eq!(store.create(&payload(json!({"Full Name": "B"}))).await?, "1002");
        Ok(())
    }

    #[tokio::test]
    async fn prefixed_ids_start_at_cc0001() -> Result<(), StoreError> {
        let (store, _) = store(datasets::COMPANY_CONTRACT_EMPLOYEES);
        assert_eq!(store.create(&payload(json!({"Full Name": "A"}))).await?, "CC0001");
        assert_eq!(store.create(&payload(json!({"Full Name": "B"}))).await?, "CC0002");
        Ok(())
    }

    #[tokio::test]
    async fn consultancy_prefixes_count_independently() -> Result<(), StoreError> {
        let (store, _) = store(datasets::CONTRACT_EMPLOYEES);
        let nila = payload(json!({"Consultancy Name": "Nila Agency", "Full Name": "A"}));
        let other = payload(json!({"Consultancy Name": "Someone Else", "Full Name": "B"}));
        assert_eq!(store.create(&nila).await?, "NIL0001");
        assert_eq!(store.create(&other).await?, "OTH0001");
        assert_eq!(store.create(&nila).await?, "NIL0002");

        let err = store.create(&payload(json!({"Full Name": "C"}))).await.unwrap_err();
        assert_eq!(err.to_string(), "Consultancy Name is required");

        // creation time is stamped
        let rec = store.get("NIL0001").await?;
        assert!(!rec.get("Timestamp").unwrap_or_default().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn ids_are_never_reused_after_delete() -> Result<(), StoreError> {
        let (store, _) = store(datasets::CHERAN_PLASTICS);
        store.create(&payload(json!({"Full Name": "A"}))).await?;
        let last = store.create(&payload(json!({"Full Name": "B"}))).await?;
        assert_eq!(last, "1002");
        store.delete(&last).await?;
        assert_eq!(store.create(&payload(json!({"Full Name": "C"}))).await?, "1003");
        Ok(())
    }

    #[tokio::test]
    async fn round_trip_keeps_fields_except_id_and_flag() -> Result<(), StoreError> {
        let (store, _) = store(datasets::EMPLOYEES_UNIT2);
        let input = payload(json!({
            "ID": "9999",
            "Full Name": "Asha",
            "City": "Coimbatore",
            "Pincode": 641001,
            "Is Active": "FALSE",
            "Unknown Column": "ignored"
        }));
        let id = store.create(&input).await?;
        assert_eq!(id, "1001");

        let rec = store.get(&id).await?;
        assert_eq!(rec.id(), "1001");
        assert_eq!(rec.get("Full Name"), Some("Asha"));
        assert_eq!(rec.get("City"), Some("Coimbatore"));
        assert_eq!(rec.get("Pincode"), Some("641001"));
        assert_eq!(rec.get("Is Active"), Some("TRUE"));
        assert_eq!(rec.get("Branch"), Some(""));
        assert_eq!(rec.get("Unknown Column"), None);
        Ok(())
    }

    #[tokio::test]
    async fn partial_update_preserves_other_fields() -> Result<(), StoreError> {
        let (store, _) = store(datasets::CHERAN_PLASTICS);
        let id = store.create(&payload(json!({"Full Name": "A", "City": "Salem"}))).await?;

        let updated = store.update(&id, &payload(json!({"City": "Erode", "ID": "1"}))).await?;
        assert_eq!(updated.id(), id);
        assert_eq!(updated.get("City"), Some("Erode"));
        assert_eq!(updated.get("Full Name"), Some("A"));

        let stored = store.get(&id).await?;
        assert_eq!(stored, updated);
        Ok(())
    }

    #[tokio::test]
    async fn missing_ids_are_not_found_without_mutation() -> Result<(), StoreError> {
        let (store, backend) = store(datasets::EMPLOYEES_UNIT2);
        store.create(&payload(json!({"Full Name": "A"}))).await?;
        let before = backend.read_rows(store.table(), 33).await?;

        assert!(matches!(store.delete("4242").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.update("4242", &payload(json!({"City": "X"}))).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(store.get("4242").await, Err(StoreError::NotFound(_))));
        assert_eq!(backend.read_rows(store.table(), 33).await?, before);
        Ok(())
    }

    #[tokio::test]
    async fn required_inputs_are_checked() {
        let (store, _) = store(datasets::EMPLOYEES_UNIT2);
        assert!(matches!(store.create(&Payload::new()).await, Err(StoreError::MissingBody)));
        assert!(matches!(store.update(" ", &payload(json!({"a": 1}))).await, Err(StoreError::MissingIdentifier)));
        assert!(matches!(store.update("1001", &Payload::new()).await, Err(StoreError::MissingBody)));
        assert!(matches!(store.delete("").await, Err(StoreError::MissingIdentifier)));
    }

    #[tokio::test]
    async fn verified_position_update_normalizes_flag() -> Result<(), StoreError> {
        let (store, _) = store(datasets::EMPLOYEES_UNIT1);
        store.create(&payload(json!({"Full Name": "A"}))).await?;
        let id = store.create(&payload(json!({"Full Name": "B"}))).await?;
        let rec = store.get(&id).await?;
        assert_eq!(rec.row_index, 3);

        let updated = store
            .update(&id, &payload(json!({"rowIndex": 3, "ID": id, "Is Active": "false"})))
            .await?;
        assert_eq!(updated.get("Is Active"), Some("FALSE"));

        let updated = store
            .update(&id, &payload(json!({"rowIndex": 3, "Is Active": "True"})))
            .await?;
        assert_eq!(updated.get("Is Active"), Some("TRUE"));

        // rowIndex is serialized for this dataset
        let json = serde_json::to_value(&updated).expect("serialize");
        assert_eq!(json["rowIndex"], 3);
        Ok(())
    }

    #[tokio::test]
    async fn unit1_reads_upper_case_the_flag() -> Result<(), StoreError> {
        let (store, backend) = store(datasets::EMPLOYEES_UNIT1);
        store.reconcile().await?;
        let mut row = vec![String::new(); store.spec().schema.width()];
        row[0] = "1001".into();
        if let Some(last) = row.last_mut() {
            *last = "true".into();
        }
        backend.append_row(store.table(), row).await?;

        let json = serde_json::to_value(store.get("1001").await?).expect("serialize");
        assert_eq!(json["Is Active"], "TRUE");
        assert_eq!(json["rowIndex"], 2);
        Ok(())
    }

    #[tokio::test]
    async fn verified_position_rejects_stale_references() -> Result<(), StoreError> {
        let (store, _) = store(datasets::EMPLOYEES_UNIT1);
        let first = store.create(&payload(json!({"Full Name": "A"}))).await?;
        let second = store.create(&payload(json!({"Full Name": "B"}))).await?;

        let missing = store.update(&second, &payload(json!({"City": "X"}))).await.unwrap_err();
        assert!(matches!(missing, StoreError::InvalidReference(_)));

        // deleting the first row shifts the second one up to row 2
        store.delete(&first).await?;
        let stale = store.update(&second, &payload(json!({"rowIndex": 3, "City": "X"}))).await.unwrap_err();
        assert!(matches!(stale, StoreError::InvalidReference(_)));

        let wrong = store.update(&first, &payload(json!({"rowIndex": 2, "City": "X"}))).await.unwrap_err();
        assert!(wrong.to_string().contains("ID mismatch"));

        let ok = store.update(&second, &payload(json!({"rowIndex": 2, "City": "X"}))).await?;
        assert_eq!(ok.get("City"), Some("X"));
        Ok(())
    }

    #[tokio::test]
    async fn hard_delete_removes_row() -> Result<(), StoreError> {
        let (store, _) = store(datasets::EMPLOYEES_UNIT2);
        let a = store.create(&payload(json!({"Full Name": "A"}))).await?;
        store.create(&payload(json!({"Full Name": "B"}))).await?;
        assert_eq!(store.delete(&a).await?, DeleteMode::Hard);

        let list = store.list().await?;
        assert_eq!(list.len(), 1);
        assert!(list.iter().all(|r| r.id() != a));
        assert_eq!(list[0].row_index, 2);
        Ok(())
    }

    #[tokio::test]
    async fn soft_delete_flags_record_inactive() -> Result<(), StoreError> {
        let (store, _) = store(datasets::COMPANY_CONTRACT_EMPLOYEES);
        let id = store.create(&payload(json!({"Full Name": "A"}))).await?;
        assert_eq!(store.delete(&id).await?, DeleteMode::Soft);

        let list = store.list().await?;
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].get("Is Active"), Some("FALSE"));
        assert_eq!(list[0].get("Full Name"), Some("A"));
        Ok(())
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() -> Result<(), StoreError> {
        let (store, backend) = store(datasets::CHERAN_PLASTICS);
        store.reconcile().await?;
        let first = backend.read_header(store.table()).await?;
        store.reconcile().await?;
        let second = backend.read_header(store.table()).await?;
        assert_eq!(first, second);
        assert_eq!(first, store.spec().schema.columns());
        Ok(())
    }

    #[tokio::test]
    async fn drifted_header_is_rejected_by_default() -> Result<(), StoreError> {
        let (store, backend) = store(datasets::EMPLOYEES_UNIT2);
        backend.ensure_table(store.table()).await?;
        backend.write_header(store.table(), &strings(&["ID", "Name"])).await?;
        backend.append_row(store.table(), strings(&["7", "kept"])).await?;

        let err = store.list().await.unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { expected: 33, found: 2, .. }));
        assert_eq!(backend.read_rows(store.table(), 2).await?, vec![strings(&["7", "kept"])]);
        Ok(())
    }

    #[tokio::test]
    async fn drifted_header_resets_when_opted_in() -> Result<(), StoreError> {
        let backend = LocalBackend::in_memory();
        let mut dataset = Dataset::preset(datasets::EMPLOYEES_UNIT2).expect("preset");
        dataset.spec.drift_policy = SchemaDriftPolicy::Reset;
        let store = RowStore::for_dataset(&dataset, backend.clone())?;

        backend.ensure_table(store.table()).await?;
        backend.write_header(store.table(), &strings(&["ID", "Name"])).await?;
        backend.append_row(store.table(), strings(&["1500", "dropped"])).await?;

        assert!(store.list().await?.is_empty());
        assert_eq!(backend.read_header(store.table()).await?, store.spec().schema.columns());
        // ids of dropped rows are not handed out again
        assert_eq!(store.create(&payload(json!({"Full Name": "A"}))).await?, "1501");
        Ok(())
    }

    #[tokio::test]
    async fn reset_carries_every_prefix_scope() -> Result<(), StoreError> {
        let backend = LocalBackend::in_memory();
        let mut dataset = Dataset::preset(datasets::CONTRACT_EMPLOYEES).expect("preset");
        dataset.spec.drift_policy = SchemaDriftPolicy::Reset;
        let store = RowStore::for_dataset(&dataset, backend.clone())?;

        backend.ensure_table(store.table()).await?;
        // old layout keeps the id in the second column
        backend.write_header(store.table(), &strings(&["Timestamp", "ID"])).await?;
        backend.append_row(store.table(), strings(&["t", "OTH0007"])).await?;
        backend.append_row(store.table(), strings(&["t", "OTH0003"])).await?;

        let other = payload(json!({"Consultancy Name": "Unlisted", "Full Name": "A"}));
        assert_eq!(store.create(&other).await?, "OTH0008");
        let nila = payload(json!({"Consultancy Name": "Nila Agency", "Full Name": "B"}));
        assert_eq!(store.create(&nila).await?, "NIL0001");
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_id_space_fails_without_writing() -> Result<(), StoreError> {
        let (store, backend) = store(datasets::EMPLOYEES_UNIT2);
        store.reconcile().await?;
        backend.append_row(store.table(), strings(&["18446744073709551615", "Max"])).await?;

        let err = store.create(&payload(json!({"Full Name": "A"}))).await.unwrap_err();
        assert_eq!(err.to_string(), "id space exhausted");
        assert_eq!(store.list().await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn concurrent_creates_get_distinct_ids() -> Result<(), StoreError> {
        let (store, _) = store(datasets::EMPLOYEES_UNIT2);
        let store = Arc::new(store);
        let mut handles = Vec::new();
        for i in 0..10 {
            let s = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                s.create(&payload(json!({"Full Name": format!("P{i}")}))).await
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.expect("join")?);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 10);
        assert_eq!(store.list().await?.len(), 10);
        Ok(())
    }
}
