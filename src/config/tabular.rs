//! Spreadsheet-shaped configuration.
//!
//! The source is four tabs named `Relay`, `DataSource`, `Beer` and
//! `Manager`, each holding rows of `<item name>, key, value`. Cell
//! decoding: booleans parse case-insensitively from true/false/yes/no,
//! numbers as 64-bit floats, a `!int ` prefix forces an integer, and an
//! empty cell means the key is absent. Change detection hashes the raw
//! rows of all four tabs, since tabular sources rarely expose a usable
//! version token of their own.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::store::ConfigStore;
use crate::config::{ConfigMap, ConfigSpec};
use crate::error::{FermenatorError, Result};

/// Sheet tab name to spec section, in assembly order.
const SHEETS: [(&str, &str); 4] = [
    ("Relay", "relays"),
    ("DataSource", "datasources"),
    ("Beer", "beers"),
    ("Manager", "managers"),
];

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport seam: anything that can serve the raw rows of a tab.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// `name, key, value` rows of one tab, header row excluded.
    async fn rows(&self, sheet: &str) -> Result<Vec<Vec<String>>>;
}

pub struct TabularSheetStore {
    name: String,
    refresh: Duration,
    rows: Arc<dyn RowSource>,
    inherited: ConfigMap,
    last_version: Mutex<Option<String>>,
}

impl TabularSheetStore {
    pub fn new(
        name: impl Into<String>,
        rows: Arc<dyn RowSource>,
        inherited: ConfigMap,
        refresh: Duration,
    ) -> Self {
        TabularSheetStore {
            name: name.into(),
            refresh,
            rows,
            inherited,
            last_version: Mutex::new(None),
        }
    }

    /// Fetch all four tabs at once, producing the decoded document and
    /// its content hash. Reading everything in one pass is what keeps a
    /// half-edited sheet from being applied piecemeal: either the whole
    /// snapshot validates later, or none of it does.
    async fn snapshot(&self) -> Result<(Value, String)> {
        let mut doc = Map::new();
        let mut hasher = Sha256::new();
        for (sheet, section) in SHEETS {
            let rows = self.rows.rows(sheet).await?;
            hasher.update(sheet.as_bytes());
            for row in &rows {
                for cell in row {
                    hasher.update(cell.as_bytes());
                    hasher.update([0x1f]);
                }
                hasher.update([0x1e]);
            }
            doc.insert(section.to_string(), decode_sheet(sheet, &rows)?);
        }
        let digest = hasher.finalize();
        let version = digest.iter().map(|b| format!("{:02x}", b)).collect();
        Ok((Value::Object(doc), version))
    }
}

#[async_trait]
impl ConfigStore for TabularSheetStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    async fn load(&self) -> Result<ConfigSpec> {
        let (doc, version) = self.snapshot().await?;
        let mut spec = ConfigSpec::from_value(doc, &self.inherited)?;
        spec.version = version.clone();
        *self.last_version.lock().await = Some(version);
        Ok(spec)
    }

    async fn has_changed(&self) -> Result<bool> {
        let (_, version) = self.snapshot().await?;
        let last = self.last_version.lock().await;
        Ok(last.as_deref() != Some(version.as_str()))
    }
}

/// Fold `name, key, value` rows into `{ name: { type, config } }`.
fn decode_sheet(sheet: &str, rows: &[Vec<String>]) -> Result<Value> {
    let mut items: Map<String, Value> = Map::new();
    for row in rows {
        let name = row.first().map(|s| s.trim()).unwrap_or("");
        if name.is_empty() {
            continue;
        }
        let key = row
            .get(1)
            .map(|s| s.trim().to_ascii_lowercase())
            .unwrap_or_default();
        if key.is_empty() {
            return Err(FermenatorError::config(
                format!("sheet '{}'", sheet),
                format!("row for '{}' is missing its key column", name),
            ));
        }
        let raw = row.get(2).map(|s| s.trim()).unwrap_or("");
        // Empty cell: the key is simply absent.
        if raw.is_empty() {
            continue;
        }
        let entry = items
            .entry(name.to_string())
            .or_insert_with(|| serde_json::json!({ "config": {} }));
        if key == "type" {
            entry["type"] = Value::String(raw.to_string());
        } else if key == "config" && raw == "inherit" {
            entry["config"] = Value::String("inherit".to_string());
        } else if let Some(config) = entry["config"].as_object_mut() {
            config.insert(key, decode_cell(raw));
        }
    }
    Ok(Value::Object(items))
}

fn decode_cell(raw: &str) -> Value {
    if let Some(rest) = raw.strip_prefix("!int") {
        if let Ok(n) = rest.trim().parse::<i64>() {
            return Value::Number(Number::from(n));
        }
    }
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" => return Value::Bool(true),
        "false" | "no" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

/// Google-Sheets values API transport for [`TabularSheetStore`].
/// Authenticates with an API key or a bearer token, either given
/// inline or taken from the shared credentials file.
pub struct SheetsApiRows {
    spreadsheet_id: String,
    api_key: Option<String>,
    bearer_token: Option<String>,
    client: Mutex<Option<Client>>,
}

impl SheetsApiRows {
    pub fn from_config(cfg: &ConfigMap, credentials: Option<&ConfigMap>) -> Result<Self> {
        let item = "tabular_sheet store";
        let spreadsheet_id = crate::config::cfg_str(item, cfg, "spreadsheet_id")?
            .ok_or_else(|| FermenatorError::config(item, "spreadsheet_id is required"))?;
        let pick = |key: &str| -> Result<Option<String>> {
            if let Some(value) = crate::config::cfg_str(item, cfg, key)? {
                return Ok(Some(value));
            }
            match credentials {
                Some(creds) => crate::config::cfg_str(item, creds, key),
                None => Ok(None),
            }
        };
        let api_key = pick("api_key")?;
        let bearer_token = pick("access_token")?;
        if api_key.is_none() && bearer_token.is_none() {
            return Err(FermenatorError::config(
                item,
                "either api_key or access_token is required",
            ));
        }
        Ok(SheetsApiRows {
            spreadsheet_id,
            api_key,
            bearer_token,
            client: Mutex::new(None),
        })
    }

    async fn client(&self) -> Result<Client> {
        let mut slot = self.client.lock().await;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        *slot = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl RowSource for SheetsApiRows {
    async fn rows(&self, sheet: &str) -> Result<Vec<Vec<String>>> {
        let mut url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{}/values/{}!A2:C",
            self.spreadsheet_id, sheet
        );
        if let Some(key) = &self.api_key {
            url.push_str("?key=");
            url.push_str(key);
        }
        let client = self.client().await?;
        let mut request = client.get(&url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(FermenatorError::DataSourceAuth(format!(
                "sheets API returned {} for tab '{}'",
                status, sheet
            )));
        }
        if !status.is_success() {
            return Err(FermenatorError::DataSourceRead(format!(
                "sheets API returned {} for tab '{}'",
                status, sheet
            )));
        }
        #[derive(serde::Deserialize)]
        struct ValueRange {
            #[serde(default)]
            values: Vec<Vec<Value>>,
        }
        let range: ValueRange = response
            .json()
            .await
            .map_err(|e| FermenatorError::DataSourceRead(e.to_string()))?;
        // Cells may arrive as strings, numbers or booleans.
        Ok(range
            .values
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| match cell {
                        Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect())
    }
}
