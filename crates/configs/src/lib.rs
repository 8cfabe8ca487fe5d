use std::collections::HashSet;

use anyhow::Result;
use serde::Deserialize;
use anyhow::anyhow;

pub const DEFAULT_STORE_FILE: &str = "data/row_store.json";

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    /// Datasets to serve; empty means every preset under its own name.
    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub worker_threads: Option<usize>,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// `/healthz` + `/metrics` listener, disabled when absent
    #[serde(default)]
    pub admin_addr: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            worker_threads: Some(4),
            log_format: default_log_format(),
            admin_addr: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Memory,
    File,
    Sheets,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_kind")]
    pub kind: String,
    /// JSON document for the `file` backend
    #[serde(default)]
    pub path: Option<String>,
    /// Sheets API root, overridable for tests and proxies
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    /// Spreadsheet shared by datasets that do not name their own
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: default_backend_kind(),
            path: None,
            base_url: None,
            access_token: None,
            spreadsheet_id: None,
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfig {
    /// One of the built-in dataset presets
    pub preset: String,
    /// Route segment; defaults to the preset name
    #[serde(default)]
    pub route: Option<String>,
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
    /// Table (sheet) name override
    #[serde(default)]
    pub table: Option<String>,
    /// `reject` (default) or `reset`
    #[serde(default)]
    pub schema_drift: Option<String>,
}

impl DatasetConfig {
    /// Serve `preset` under its own name with default settings.
    pub fn for_preset(preset: &str) -> Self {
        Self { preset: preset.to_string(), route: None, spreadsheet_id: None, table: None, schema_drift: None }
    }

    pub fn route_name(&self) -> &str {
        self.route.as_deref().unwrap_or(&self.preset)
    }
}

fn default_log_format() -> String { "compact".into() }
fn default_backend_kind() -> String { "file".into() }
fn default_timeout() -> u64 { 30 }

pub fn load_default() -> Result<AppConfig> {
    let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    if std::fs::metadata(&path).is_err() {
        // 配置文件可选：缺省时使用默认值，再由环境变量覆盖
        return Ok(AppConfig::default());
    }
    load_from_file(&path)
}

pub fn load_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<AppConfig> {
    let cfg: AppConfig = toml::from_str(content)?;
    Ok(cfg)
}

impl AppConfig {
    pub fn load_and_validate() -> Result<Self> {
        let mut cfg = load_default()?;
        cfg.normalize_and_validate()?;
        Ok(cfg)
    }

    pub fn normalize_and_validate(&mut self) -> Result<()> {
        self.apply_env(|key| std::env::var(key).ok());
        self.validate()
    }

    /// Fill settings from environment variables looked up through `lookup`.
    pub fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(host) = non_empty("SERVER_HOST") {
            self.server.host = host;
        }
        if let Some(port) = non_empty("SERVER_PORT").and_then(|p| p.trim().parse().ok()) {
            self.server.port = port;
        }
        // 令牌优先使用配置文件，未提供时再读环境变量
        if self.backend.access_token.is_none() {
            self.backend.access_token = non_empty("SHEETS_ACCESS_TOKEN");
        }
        if let Some(path) = non_empty("ROW_STORE_FILE") {
            self.backend.path = Some(path);
        }
    }

    pub fn validate(&mut self) -> Result<()> {
        // 归一化 server
        self.server.normalize()?;
        self.backend.normalize()?;

        let mut routes = HashSet::new();
        for d in &self.datasets {
            if d.preset.trim().is_empty() {
                return Err(anyhow!("datasets.preset 不能为空"));
            }
            let route = d.route_name();
            if route.trim().is_empty() || route.contains('/') {
                return Err(anyhow!("datasets.route 非法: '{route}'"));
            }
            if !routes.insert(route.to_string()) {
                return Err(anyhow!("datasets.route 重复: '{route}'"));
            }
            if let Some(p) = d.schema_drift.as_deref() {
                if !matches!(p.to_ascii_lowercase().as_str(), "reject" | "reset") {
                    return Err(anyhow!("datasets.schema_drift 只能是 reject 或 reset，当前为 '{p}'"));
                }
            }
            if self.backend.kind()? == BackendKind::Sheets
                && d.spreadsheet_id.is_none()
                && self.backend.spreadsheet_id.is_none()
            {
                return Err(anyhow!("sheets 后端需要 spreadsheet_id（dataset '{route}'）"));
            }
        }
        if self.datasets.is_empty()
            && self.backend.kind()? == BackendKind::Sheets
            && self.backend.spreadsheet_id.is_none()
        {
            return Err(anyhow!("sheets 后端需要 backend.spreadsheet_id"));
        }
        Ok(())
    }
}

impl ServerConfig {
    fn normalize(&mut self) -> Result<()> {
        if self.host.trim().is_empty() {
            self.host = "127.0.0.1".to_string();
        }
        if self.port == 0 {
            return Err(anyhow!("server.port 必须在 1..=65535 范围内"));
        }
        if let Some(w) = self.worker_threads {
            if w == 0 { self.worker_threads = Some(4); }
        } else {
            self.worker_threads = Some(4);
        }
        let fmt = self.log_format.trim().to_ascii_lowercase();
        if !matches!(fmt.as_str(), "json" | "compact") {
            return Err(anyhow!("server.log_format 只能是 json 或 compact"));
        }
        self.log_format = fmt;
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl BackendConfig {
    pub fn kind(&self) -> Result<BackendKind> {
        match self.kind.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "file" => Ok(BackendKind::File),
            "sheets" => Ok(BackendKind::Sheets),
            other => Err(anyhow!("backend.kind 未知: '{other}'（可选 memory / file / sheets）")),
        }
    }

    pub fn file_path(&self) -> &str {
        self.path.as_deref().unwrap_or(DEFAULT_STORE_FILE)
    }

    fn normalize(&mut self) -> Result<()> {
        let kind = self.kind()?;
        if self.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs 必须为正整数秒"));
        }
        if kind == BackendKind::Sheets && self.access_token.is_none() {
            return Err(anyhow!("sheets 后端需要 access_token；请在 config.toml 或环境变量 SHEETS_ACCESS_TOKEN 中提供"));
        }
        Ok(())
    }
}
