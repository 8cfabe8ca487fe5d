use std::{collections::HashMap, sync::Arc, time::Duration};

use axum::Router;
use common::{admin_http::spawn_admin_server, metrics};
use configs::{AppConfig, BackendKind, DatasetConfig};
use service::{
    datasets::PRESET_NAMES,
    row_store::schema::SchemaDriftPolicy,
    storage::{
        local::LocalBackend,
        sheets::{SheetsBackend, DEFAULT_BASE_URL},
        TabularBackend,
    },
    Dataset,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::errors::StartupError;
use crate::routes;
use crate::state::{AppState, DatasetEndpoint};

pub fn build_cors() -> CorsLayer {
    CorsLayer::very_permissive()
}

/// Configured datasets, or every preset when none are listed.
fn selected_datasets(cfg: &AppConfig) -> Vec<DatasetConfig> {
    if cfg.datasets.is_empty() {
        PRESET_NAMES.iter().map(|p| DatasetConfig::for_preset(p)).collect()
    } else {
        cfg.datasets.clone()
    }
}

/// Apply route, table and drift overrides on top of a preset.
fn resolve_dataset(sel: &DatasetConfig) -> Result<Dataset, StartupError> {
    let mut dataset = Dataset::preset(&sel.preset)
        .ok_or_else(|| StartupError::InvalidConfig(format!("unknown dataset preset '{}'", sel.preset)))?;
    dataset.name = sel.route_name().to_string();
    if let Some(table) = sel.table.as_deref().filter(|t| !t.trim().is_empty()) {
        dataset.table = table.to_string();
    }
    if let Some(policy) = sel.schema_drift.as_deref() {
        dataset.spec.drift_policy = policy
            .parse::<SchemaDriftPolicy>()
            .map_err(|e| StartupError::InvalidConfig(e.to_string()))?;
    }
    if dataset.spec.drift_policy == SchemaDriftPolicy::Reset {
        warn!(dataset = %dataset.name, table = %dataset.table, "schema drift policy is reset: a drifted header clears the table");
    }
    Ok(dataset)
}

/// Open the configured backend(s) and build one endpoint per dataset.
pub async fn build_state(cfg: &AppConfig) -> Result<AppState, StartupError> {
    let kind = cfg.backend.kind()?;
    let shared: Option<Arc<dyn TabularBackend>> = match kind {
        BackendKind::Memory => Some(LocalBackend::in_memory()),
        BackendKind::File => {
            let path = cfg.backend.file_path();
            common::env::ensure_data_dir(path).await?;
            info!(%path, "opening local row store document");
            Some(LocalBackend::open(path).await?)
        }
        BackendKind::Sheets => None,
    };

    // 同一个 spreadsheet 只建一个客户端
    let mut sheets: HashMap<String, Arc<dyn TabularBackend>> = HashMap::new();
    let mut endpoints = Vec::new();
    for sel in selected_datasets(cfg) {
        let dataset = resolve_dataset(&sel)?;
        let backend = match &shared {
            Some(b) => Arc::clone(b),
            None => {
                let doc = sel
                    .spreadsheet_id
                    .clone()
                    .or_else(|| cfg.backend.spreadsheet_id.clone())
                    .ok_or_else(|| StartupError::InvalidConfig(format!("no spreadsheet_id for dataset '{}'", dataset.name)))?;
                match sheets.get(&doc) {
                    Some(b) => Arc::clone(b),
                    None => {
                        let b: Arc<dyn TabularBackend> = SheetsBackend::new(
                            cfg.backend.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL),
                            doc.as_str(),
                            cfg.backend.access_token.clone(),
                            Duration::from_secs(cfg.backend.timeout_secs),
                        )?;
                        sheets.insert(doc, Arc::clone(&b));
                        b
                    }
                }
            }
        };
        endpoints.push(DatasetEndpoint::new(&dataset, backend)?);
    }
    Ok(AppState::new(endpoints))
}

/// Reconcile every table once so header problems show up in the boot log.
/// Failures are not fatal; each request reconciles again.
async fn reconcile_all(state: &AppState) {
    for name in state.names() {
        let Some(ep) = state.endpoint(name) else { continue };
        match ep.store.reconcile().await {
            Ok(()) => info!(dataset = %name, table = %ep.store.table(), "table ready"),
            Err(e) => warn!(dataset = %name, table = %ep.store.table(), error = %e, "table not ready"),
        }
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!(service = "server", event = "shutdown_signal", "received Ctrl+C, shutting down");
    }
}

/// Public entry: build the app and run the HTTP server until Ctrl+C
pub async fn run(cfg: AppConfig) -> anyhow::Result<()> {
    if let Some(addr) = cfg.server.admin_addr.as_deref() {
        spawn_admin_server(addr, metrics::encode_metrics);
    }

    let state = build_state(&cfg).await?;
    reconcile_all(&state).await;
    let datasets = state.names().join(",");

    let app: Router = routes::build_router(state, build_cors());

    let addr = cfg.server.bind_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, %datasets, "starting server");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}
