use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Url};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::errors::StoreError;

use super::{advance, fit_row, stale_reference, TabularBackend};

pub const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com";

/// Hidden sheet holding `[table, scope, value]` counter rows
pub const COUNTER_SHEET: &str = "_row_store_counters";

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

/// Google Sheets v4 backend: one spreadsheet, tables are its sheets.
///
/// The REST API has no conditional writes, so `replace_row`, `delete_row` and
/// `advance_counter` are read-check-write sequences. Callers serialize them
/// per process; concurrent writers in other processes can still interleave.
pub struct SheetsBackend {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    access_token: Option<String>,
}

impl SheetsBackend {
    pub fn new(
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Arc<Self>, StoreError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Arc::new(Self {
            client,
            base_url: base_url.into(),
            spreadsheet_id: spreadsheet_id.into(),
            access_token: access_token.filter(|t| !t.trim().is_empty()),
        }))
    }

    /// `{base}/v4/spreadsheets/{id}{suffix}` followed by extra path segments.
    fn url(&self, suffix: &str, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| StoreError::Backend(format!("invalid base url: {e}")))?;
        let doc = format!("{}{suffix}", self.spreadsheet_id);
        url.path_segments_mut()
            .map_err(|_| StoreError::Backend("base url cannot carry a path".into()))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", doc.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn values_url(&self, range: &str, action: &str) -> Result<Url, StoreError> {
        let target = format!("{range}{action}");
        self.url("", &["values", target.as_str()])
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let req = self.client.request(method, url);
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T, StoreError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Backend(format!("sheets api returned {status}: {body}")));
        }
        Ok(resp.json::<T>().await?)
    }

    async fn sheets(&self) -> Result<Vec<SheetProperties>, StoreError> {
        let mut url = self.url("", &[])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties(sheetId,title)");
        let meta: SpreadsheetMeta = self.send(self.request(Method::GET, url)).await?;
        Ok(meta.sheets.into_iter().map(|s| s.properties).collect())
    }

    async fn sheet_id(&self, table: &str) -> Result<i64, StoreError> {
        self.sheets()
            .await?
            .into_iter()
            .find(|p| p.title == table)
            .map(|p| p.sheet_id)
            .ok_or_else(|| StoreError::Backend(format!("table '{table}' does not exist")))
    }

    async fn batch_update(&self, requests: Value) -> Result<(), StoreError> {
        let url = self.url(":batchUpdate", &[])?;
        let _: Value = self.send(self.request(Method::POST, url).json(&json!({ "requests": requests }))).await?;
        Ok(())
    }

    async fn get_values(&self, range: &str) -> Result<Vec<Vec<String>>, StoreError> {
        let url = self.values_url(range, "")?;
        let vr: ValueRange = self.send(self.request(Method::GET, url)).await?;
        Ok(vr.values.iter().map(|r| r.iter().map(cell_text).collect()).collect())
    }

    async fn put_values(&self, range: &str, rows: Vec<Vec<String>>) -> Result<(), StoreError> {
        let mut url = self.values_url(range, "")?;
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");
        let _: Value = self.send(self.request(Method::PUT, url).json(&json!({ "values": rows }))).await?;
        Ok(())
    }

    async fn append_values(&self, range: &str, row: Vec<String>) -> Result<(), StoreError> {
        let mut url = self.values_url(range, ":append")?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "RAW")
            .append_pair("insertDataOption", "INSERT_ROWS");
        let _: Value = self.send(self.request(Method::POST, url).json(&json!({ "values": [row] }))).await?;
        Ok(())
    }

    /// First cell of a data row, `None` past the end of the sheet.
    async fn id_at(&self, table: &str, position: usize) -> Result<Option<String>, StoreError> {
        let cells = self.get_values(&a1(table, &format!("A{position}"))).await?;
        Ok(cells.into_iter().next().and_then(|r| r.into_iter().next()))
    }

    async fn check_id(&self, table: &str, position: usize, expected_id: &str) -> Result<(), StoreError> {
        if position < super::FIRST_DATA_ROW {
            return Err(stale_reference(position, expected_id, None));
        }
        match self.id_at(table, position).await? {
            Some(found) if found.trim() == expected_id.trim() => Ok(()),
            Some(found) => Err(stale_reference(position, expected_id, Some(&found))),
            None => Err(stale_reference(position, expected_id, None)),
        }
    }
}

#[async_trait]
impl TabularBackend for SheetsBackend {
    async fn ensure_table(&self, table: &str) -> Result<(), StoreError> {
        if self.sheets().await?.iter().any(|p| p.title == table) {
            return Ok(());
        }
        info!(spreadsheet = %self.spreadsheet_id, %table, "creating missing sheet");
        self.batch_update(json!([{ "addSheet": { "properties": { "title": table } } }])).await
    }

    async fn read_header(&self, table: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.get_values(&a1(table, "1:1")).await?.into_iter().next().unwrap_or_default())
    }

    async fn write_header(&self, table: &str, header: &[String]) -> Result<(), StoreError> {
        let range = a1(table, &format!("A1:{}1", column_letter(header.len())));
        self.put_values(&range, vec![header.to_vec()]).await
    }

    async fn clear(&self, table: &str) -> Result<(), StoreError> {
        let url = self.values_url(&a1(table, ""), ":clear")?;
        let _: Value = self.send(self.request(Method::POST, url).json(&json!({}))).await?;
        Ok(())
    }

    async fn read_rows(&self, table: &str, width: usize) -> Result<Vec<Vec<String>>, StoreError> {
        let range = a1(table, &format!("A2:{}", column_letter(width)));
        let rows = self.get_values(&range).await?;
        debug!(%table, rows = rows.len(), "read sheet rows");
        Ok(rows.into_iter().map(|r| fit_row(r, width)).collect())
    }

    async fn append_row(&self, table: &str, row: Vec<String>) -> Result<(), StoreError> {
        let range = a1(table, &format!("A:{}", column_letter(row.len())));
        self.append_values(&range, row).await
    }

    async fn replace_row(&self, table: &str, position: usize, expected_id: &str, row: Vec<String>) -> Result<(), StoreError> {
        self.check_id(table, position, expected_id).await?;
        let range = a1(table, &format!("A{position}:{}{position}", column_letter(row.len())));
        self.put_values(&range, vec![row]).await
    }

    async fn delete_row(&self, table: &str, position: usize, expected_id: &str) -> Result<(), StoreError> {
        self.check_id(table, position, expected_id).await?;
        let sheet_id = self.sheet_id(table).await?;
        self.batch_update(json!([{
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": position - 1,
                    "endIndex": position
                }
            }
        }]))
        .await
    }

    async fn advance_counter(&self, table: &str, scope: &str, candidate: u64) -> Result<u64, StoreError> {
        self.ensure_table(COUNTER_SHEET).await?;
        let rows = self.get_values(&a1(COUNTER_SHEET, "A:C")).await?;
        let existing = rows.iter().enumerate().find(|(_, r)| {
            r.first().map(String::as_str) == Some(table) && r.get(1).map(String::as_str).unwrap_or_default() == scope
        });

        let stored = existing.and_then(|(_, r)| r.get(2)).and_then(|v| v.trim().parse::<u64>().ok());
        let next = advance(stored, candidate)?;
        let cells = vec![table.to_string(), scope.to_string(), next.to_string()];
        match existing {
            Some((i, _)) => {
                let position = i + 1;
                self.put_values(&a1(COUNTER_SHEET, &format!("A{position}:C{position}")), vec![cells]).await?
            }
            None => self.append_values(&a1(COUNTER_SHEET, "A:C"), cells).await?,
        }
        Ok(next)
    }
}

/// A1 notation with a quoted sheet title; an empty range means the whole sheet.
fn a1(table: &str, range: &str) -> String {
    let title = format!("'{}'", table.replace('\'', "''"));
    if range.is_empty() { title } else { format!("{title}!{range}") }
}

/// 1 → A, 26 → Z, 27 → AA
fn column_letter(mut n: usize) -> String {
    let mut out = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        out.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Bool(true) => "TRUE".into(),
        Value::Bool(false) => "FALSE".into(),
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, Method as HttpMethod},
        routing::get,
        Json, Router,
    };
    use std::collections::HashMap;
    use tokio::{net::TcpListener, sync::Mutex};

    /// Request seen by the mock: method, last path segment, query, auth header, body
    type Seen = (String, String, HashMap<String, String>, Option<String>, Value);

    #[derive(Clone, Default)]
    struct Mock {
        seen: Arc<Mutex<Vec<Seen>>>,
        values: Arc<HashMap<String, Value>>,
        meta: Arc<Value>,
    }

    async fn record(mock: &Mock, method: &HttpMethod, path: String, q: HashMap<String, String>, headers: &HeaderMap, body: Value) {
        let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_string);
        mock.seen.lock().await.push((method.to_string(), path, q, auth, body));
    }

    async fn values_get(
        State(mock): State<Mock>,
        Path((_doc, range)): Path<(String, String)>,
        Query(q): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Json<Value> {
        record(&mock, &HttpMethod::GET, range.clone(), q, &headers, Value::Null).await;
        Json(mock.values.get(&range).cloned().unwrap_or_else(|| json!({ "range": range })))
    }

    async fn values_write(
        State(mock): State<Mock>,
        method: HttpMethod,
        Path((_doc, range)): Path<(String, String)>,
        Query(q): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        record(&mock, &method, range, q, &headers, body).await;
        Json(json!({}))
    }

    /// Spreadsheet metadata (`GET`) and `:batchUpdate` (`POST`) share the document path.
    async fn doc_get(
        State(mock): State<Mock>,
        Path(doc): Path<String>,
        Query(q): Query<HashMap<String, String>>,
        headers: HeaderMap,
    ) -> Json<Value> {
        record(&mock, &HttpMethod::GET, doc, q, &headers, Value::Null).await;
        Json(mock.meta.as_ref().clone())
    }

    async fn doc_post(
        State(mock): State<Mock>,
        Path(doc): Path<String>,
        Query(q): Query<HashMap<String, String>>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        record(&mock, &HttpMethod::POST, doc, q, &headers, body).await;
        Json(json!({ "replies": [] }))
    }

    fn sheets_meta(titles: &[(i64, &str)]) -> Value {
        let sheets: Vec<Value> = titles
            .iter()
            .map(|(id, title)| json!({ "properties": { "sheetId": id, "title": title } }))
            .collect();
        json!({ "sheets": sheets })
    }

    async fn start(values: HashMap<String, Value>) -> (Arc<SheetsBackend>, Mock) {
        start_with(values, sheets_meta(&[])).await
    }

    async fn start_with(values: HashMap<String, Value>, meta: Value) -> (Arc<SheetsBackend>, Mock) {
        let mock = Mock { seen: Arc::default(), values: Arc::new(values), meta: Arc::new(meta) };
        let app = Router::new()
            .route("/v4/spreadsheets/:doc", get(doc_get).post(doc_post))
            .route("/v4/spreadsheets/:doc/values/:range", get(values_get).put(values_write).post(values_write))
            .with_state(mock.clone());
        let listener = TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await.expect("bind mock");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        let backend = SheetsBackend::new(format!("http://{addr}"), "doc-1", Some("tok".into()), Duration::from_secs(5))
            .expect("backend");
        (backend, mock)
    }

    #[test]
    fn a1_and_column_letters() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(33), "AG");
        assert_eq!(a1("Employees", "1:1"), "'Employees'!1:1");
        assert_eq!(a1("Bob's", ""), "'Bob''s'");
    }

    #[tokio::test]
    async fn read_rows_pads_and_stringifies_cells() {
        let mut values = HashMap::new();
        values.insert("'Employees'!A2:C".to_string(), json!({ "values": [["1001", "A", true], [1002]] }));
        let (backend, mock) = start(values).await;

        let rows = backend.read_rows("Employees", 3).await.expect("rows");
        assert_eq!(rows, vec![vec!["1001", "A", "TRUE"], vec!["1002", "", ""]]);

        let seen = mock.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].3.as_deref(), Some("Bearer tok"));
    }

    #[tokio::test]
    async fn append_row_sends_raw_values() {
        let (backend, mock) = start(HashMap::new()).await;
        backend.append_row("Employees", vec!["1001".into(), "A".into()]).await.expect("append");

        let seen = mock.seen.lock().await;
        let (method, range, q, _, body) = &seen[0];
        assert_eq!(method, "POST");
        assert_eq!(range, "'Employees'!A:B:append");
        assert_eq!(q.get("valueInputOption").map(String::as_str), Some("RAW"));
        assert_eq!(q.get("insertDataOption").map(String::as_str), Some("INSERT_ROWS"));
        assert_eq!(body, &json!({ "values": [["1001", "A"]] }));
    }

    #[tokio::test]
    async fn replace_row_refuses_stale_position() {
        let mut values = HashMap::new();
        values.insert("'Employees'!A3".to_string(), json!({ "values": [["1005"]] }));
        let (backend, mock) = start(values).await;

        let err = backend
            .replace_row("Employees", 3, "1004", vec!["1004".into(), "X".into()])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidReference(_)));
        // only the verification read went out
        let seen = mock.seen.lock().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "GET");
    }

    #[tokio::test]
    async fn replace_row_writes_full_range_after_check() {
        let mut values = HashMap::new();
        values.insert("'Employees'!A3".to_string(), json!({ "values": [["1004"]] }));
        let (backend, mock) = start(values).await;

        backend
            .replace_row("Employees", 3, "1004", vec!["1004".into(), "X".into()])
            .await
            .expect("replace");
        let seen = mock.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].0, "PUT");
        assert_eq!(seen[1].1, "'Employees'!A3:B3");
        assert_eq!(seen[1].4, json!({ "values": [["1004", "X"]] }));
    }

    #[tokio::test]
    async fn ensure_table_adds_missing_sheet_only() -> Result<(), StoreError> {
        let (backend, mock) = start_with(HashMap::new(), sheets_meta(&[(0, "Employees")])).await;
        backend.ensure_table("Employees").await?;
        backend.ensure_table("contract_employees_1").await?;

        let seen = mock.seen.lock().await;
        let posts: Vec<&Seen> = seen.iter().filter(|s| s.0 == "POST").collect();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].1, "doc-1:batchUpdate");
        assert_eq!(
            posts[0].4,
            json!({ "requests": [{ "addSheet": { "properties": { "title": "contract_employees_1" } } }] })
        );
        Ok(())
    }

    #[tokio::test]
    async fn delete_row_removes_one_zero_based_dimension() -> Result<(), StoreError> {
        let mut values = HashMap::new();
        values.insert("'Employees'!A3".to_string(), json!({ "values": [["1004"]] }));
        let (backend, mock) = start_with(values, sheets_meta(&[(0, "Other"), (42, "Employees")])).await;

        backend.delete_row("Employees", 3, "1004").await?;

        let seen = mock.seen.lock().await;
        let (method, path, _, auth, body) = seen.last().expect("batch update sent");
        assert_eq!(method, "POST");
        assert_eq!(path, "doc-1:batchUpdate");
        assert_eq!(auth.as_deref(), Some("Bearer tok"));
        assert_eq!(
            body,
            &json!({ "requests": [{ "deleteDimension": { "range": {
                "sheetId": 42, "dimension": "ROWS", "startIndex": 2, "endIndex": 3
            } } }] })
        );
        Ok(())
    }

    #[tokio::test]
    async fn delete_row_checks_id_before_deleting() {
        let mut values = HashMap::new();
        values.insert("'Employees'!A2".to_string(), json!({ "values": [["1009"]] }));
        let (backend, mock) = start_with(values, sheets_meta(&[(42, "Employees")])).await;

        let err = backend.delete_row("Employees", 2, "1004").await.unwrap_err();
        assert!(err.to_string().contains("ID mismatch"));
        assert!(mock.seen.lock().await.iter().all(|s| s.0 == "GET"));
    }

    #[tokio::test]
    async fn counter_row_is_updated_in_place() -> Result<(), StoreError> {
        let mut values = HashMap::new();
        values.insert(
            "'_row_store_counters'!A:C".to_string(),
            json!({ "values": [["Other", "", "9"], ["Employees", "", "1005"]] }),
        );
        let (backend, mock) = start_with(values, sheets_meta(&[(0, "Employees"), (1, COUNTER_SHEET)])).await;

        assert_eq!(backend.advance_counter("Employees", "", 1001).await?, 1006);

        let seen = mock.seen.lock().await;
        let (method, range, q, _, body) = seen.last().expect("counter write");
        assert_eq!(method, "PUT");
        assert_eq!(range, "'_row_store_counters'!A2:C2");
        assert_eq!(q.get("valueInputOption").map(String::as_str), Some("RAW"));
        assert_eq!(body, &json!({ "values": [["Employees", "", "1006"]] }));
        Ok(())
    }

    #[tokio::test]
    async fn first_counter_creates_sheet_and_appends() -> Result<(), StoreError> {
        let (backend, mock) = start_with(HashMap::new(), sheets_meta(&[(0, "company_contract_employees")])).await;

        assert_eq!(backend.advance_counter("company_contract_employees", "CC", 1).await?, 1);

        let seen = mock.seen.lock().await;
        let posts: Vec<&str> = seen.iter().filter(|s| s.0 == "POST").map(|s| s.1.as_str()).collect();
        assert_eq!(posts, vec!["doc-1:batchUpdate", "'_row_store_counters'!A:C:append"]);
        let (_, _, _, _, body) = seen.last().expect("append");
        assert_eq!(body, &json!({ "values": [["company_contract_employees", "CC", "1"]] }));
        Ok(())
    }

    #[tokio::test]
    async fn clear_posts_to_whole_sheet_range() -> Result<(), StoreError> {
        let (backend, mock) = start(HashMap::new()).await;
        backend.clear("Employees").await?;
        let seen = mock.seen.lock().await;
        assert_eq!(seen[0].0, "POST");
        assert_eq!(seen[0].1, "'Employees':clear");
        Ok(())
    }
}
