use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    Json,
};
use common::metrics;
use serde_json::{json, Value};
use service::{
    row_store::{
        payload::{self, Payload},
        schema::DeleteMode,
    },
    StoreError,
};
use tracing::{error, info, warn};

use crate::{errors::ApiError, state::{AppState, DatasetEndpoint}};

/// CRUD verb carried in the query string of a POST.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Read,
    Create,
    Update,
    Delete,
}

impl Verb {
    /// Case-insensitive; an absent or blank verb means create.
    pub fn parse(raw: Option<&str>) -> Result<Self, StoreError> {
        let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(Verb::Create);
        };
        match raw.to_ascii_lowercase().as_str() {
            "get" => Ok(Verb::Read),
            "post" | "create" => Ok(Verb::Create),
            "put" | "update" => Ok(Verb::Update),
            "delete" => Ok(Verb::Delete),
            _ => Err(StoreError::UnsupportedMethod(raw.to_string())),
        }
    }

    pub fn op(self) -> &'static str {
        match self {
            Verb::Read => "read",
            Verb::Create => "create",
            Verb::Update => "update",
            Verb::Delete => "delete",
        }
    }
}

type Params = HashMap<String, String>;

/// `id` query parameter, also accepted as `ID`.
fn query_id(params: &Params) -> Option<String> {
    ["id", "ID"]
        .iter()
        .filter_map(|k| params.get(*k))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())
        .map(str::to_string)
}

fn success(mut body: Value) -> Json<Value> {
    if let Value::Object(map) = &mut body {
        map.insert("status".into(), json!("success"));
    }
    Json(body)
}

fn endpoint(state: &AppState, dataset: &str) -> Result<std::sync::Arc<DatasetEndpoint>, ApiError> {
    state.endpoint(dataset).ok_or_else(|| {
        warn!(%dataset, "unknown dataset requested");
        ApiError::unknown_dataset(dataset)
    })
}

/// Count and log the outcome, then wrap it into an envelope.
fn finish(ep: &DatasetEndpoint, op: &str, result: Result<Value, StoreError>) -> Result<Json<Value>, ApiError> {
    match result {
        Ok(body) => {
            metrics::record_operation(ep.name(), op, "success");
            Ok(success(body))
        }
        Err(e) => {
            metrics::record_operation(ep.name(), op, e.kind());
            match e {
                StoreError::Internal(_) | StoreError::Backend(_) | StoreError::SchemaMismatch { .. } => {
                    error!(dataset = %ep.name(), op, error = %e, "operation failed")
                }
                _ => warn!(dataset = %ep.name(), op, error = %e, "request rejected"),
            }
            Err(e.into())
        }
    }
}

async fn read_records(ep: &DatasetEndpoint, id: Option<String>) -> Result<Value, StoreError> {
    let data = match id {
        Some(id) => serde_json::to_value(ep.store.get(&id).await?)?,
        None => serde_json::to_value(ep.store.list().await?)?,
    };
    Ok(json!({ "data": data }))
}

fn require_body(body: &[u8]) -> Result<Payload, StoreError> {
    payload::parse_body(body)?.ok_or(StoreError::MissingBody)
}

async fn execute(ep: &DatasetEndpoint, verb: Verb, params: &Params, body: &[u8]) -> Result<Value, StoreError> {
    match verb {
        Verb::Read => read_records(ep, query_id(params)).await,
        Verb::Create => {
            let payload = require_body(body)?;
            let id = ep.store.create(&payload).await?;
            Ok(json!({ "message": "Employee created successfully", "data": { "ID": id } }))
        }
        Verb::Update => {
            let payload = require_body(body)?;
            let id = query_id(params)
                .or_else(|| payload::payload_id(&payload))
                .ok_or(StoreError::MissingIdentifier)?;
            let record = ep.store.update(&id, &payload).await?;
            Ok(json!({ "message": "Employee updated successfully", "data": record }))
        }
        Verb::Delete => {
            let parsed = payload::parse_body(body)?;
            let id = query_id(params)
                .or_else(|| parsed.as_ref().and_then(payload::payload_id))
                .ok_or(StoreError::MissingIdentifier)?;
            let message = match ep.store.delete(&id).await? {
                DeleteMode::Hard => "Employee deleted successfully",
                DeleteMode::Soft => "Employee deactivated successfully",
            };
            Ok(json!({ "message": message, "ID": id }))
        }
    }
}

#[utoipa::path(
    get, path = "/{dataset}", tag = "datasets",
    params(
        ("dataset" = String, Path, description = "Dataset route name"),
        ("id" = Option<String>, Query, description = "Record ID; lists all records when absent")
    ),
    responses((status = 200, description = "Envelope with `data`, or an error envelope", body = crate::openapi::EnvelopeDoc))
)]
pub async fn read(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Query(params): Query<Params>,
) -> Result<Json<Value>, ApiError> {
    let ep = endpoint(&state, &dataset)?;
    let result = read_records(&ep, query_id(&params)).await;
    finish(&ep, Verb::Read.op(), result)
}

#[utoipa::path(
    post, path = "/{dataset}", tag = "datasets",
    params(
        ("dataset" = String, Path, description = "Dataset route name"),
        ("method" = Option<String>, Query, description = "get | post | create | put | update | delete (`action` for employees_unit2); create when absent"),
        ("id" = Option<String>, Query, description = "Record ID for update and delete; falls back to `ID` in the body")
    ),
    request_body = crate::openapi::RecordDoc,
    responses((status = 200, description = "Success or error envelope", body = crate::openapi::EnvelopeDoc))
)]
pub async fn write(
    State(state): State<AppState>,
    Path(dataset): Path<String>,
    Query(params): Query<Params>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let ep = endpoint(&state, &dataset)?;
    let verb = match Verb::parse(params.get(&ep.verb_param).map(String::as_str)) {
        Ok(v) => v,
        Err(e) => return finish(&ep, "unknown", Err(e)),
    };
    info!(dataset = %ep.name(), op = verb.op(), bytes = body.len(), "dataset write");
    let result = execute(&ep, verb, &params, &body).await;
    finish(&ep, verb.op(), result)
}

/// CORS preflight: permissive headers and a static body.
pub async fn preflight(Path(_dataset): Path<String>) -> impl IntoResponse {
    (
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type"),
        ],
        Json(json!({ "status": "ok" })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbs_parse_case_insensitively() {
        assert_eq!(Verb::parse(None).unwrap(), Verb::Create);
        assert_eq!(Verb::parse(Some("  ")).unwrap(), Verb::Create);
        assert_eq!(Verb::parse(Some("GET")).unwrap(), Verb::Read);
        assert_eq!(Verb::parse(Some("Create")).unwrap(), Verb::Create);
        assert_eq!(Verb::parse(Some("post")).unwrap(), Verb::Create);
        assert_eq!(Verb::parse(Some("PUT")).unwrap(), Verb::Update);
        assert_eq!(Verb::parse(Some("update")).unwrap(), Verb::Update);
        assert_eq!(Verb::parse(Some("Delete")).unwrap(), Verb::Delete);
        let err = Verb::parse(Some("patch")).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported method: patch");
    }

    #[test]
    fn id_comes_from_either_casing() {
        let mut p = Params::new();
        assert_eq!(query_id(&p), None);
        p.insert("ID".into(), " 1001 ".into());
        assert_eq!(query_id(&p).as_deref(), Some("1001"));
        p.insert("id".into(), "1002".into());
        assert_eq!(query_id(&p).as_deref(), Some("1002"));
    }
}
