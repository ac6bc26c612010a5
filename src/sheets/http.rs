//! Google Sheets v4 REST client.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{RangeUpdate, Rows, SheetsApi};
use crate::columns::A1Range;
use crate::error::SheetsError;

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com/v4";

/// Connection settings for [`HttpSheetsClient`].
#[derive(Debug, Clone)]
pub struct SheetsClientConfig {
    pub api_base: String,
    /// OAuth bearer token with spreadsheet scope.
    pub access_token: String,
    pub timeout: Duration,
}

impl SheetsClientConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        SheetsClientConfig {
            api_base: DEFAULT_API_BASE.to_string(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Spreadsheet backend over HTTP.
pub struct HttpSheetsClient {
    client: Client,
    config: SheetsClientConfig,
    /// (spreadsheet id, tab title) -> numeric sheet id, needed for row deletes.
    sheet_ids: RwLock<HashMap<(String, String), i64>>,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Serialize)]
struct ValueRangeBody<'a> {
    range: String,
    #[serde(rename = "majorDimension")]
    major_dimension: &'static str,
    values: &'a Rows,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    #[serde(rename = "sheetId")]
    sheet_id: i64,
    title: String,
}

impl HttpSheetsClient {
    pub fn new(config: SheetsClientConfig) -> Result<Self, SheetsError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(HttpSheetsClient {
            client,
            config,
            sheet_ids: RwLock::new(HashMap::new()),
        })
    }

    fn values_url(&self, spreadsheet_id: &str, range: &A1Range) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.config.api_base,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(&range.to_string())
        )
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str) -> String {
        format!(
            "{}/spreadsheets/{}",
            self.config.api_base,
            urlencoding::encode(spreadsheet_id)
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SheetsError> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SheetsError::from_response(status.as_u16(), &body))
    }

    async fn sheet_id(&self, spreadsheet_id: &str, tab: &str) -> Result<i64, SheetsError> {
        let key = (spreadsheet_id.to_string(), tab.to_string());
        let cached = self
            .sheet_ids
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
            .copied();
        if let Some(id) = cached {
            return Ok(id);
        }

        let url = self.spreadsheet_url(spreadsheet_id);
        let meta: SpreadsheetMeta = self
            .send(
                self.client
                    .get(url)
                    .query(&[("fields", "sheets.properties(sheetId,title)")]),
            )
            .await?
            .json()
            .await
            .map_err(|e| SheetsError::Decode(e.to_string()))?;

        let mut ids = self.sheet_ids.write().unwrap_or_else(|e| e.into_inner());
        for sheet in meta.sheets {
            ids.insert(
                (spreadsheet_id.to_string(), sheet.properties.title),
                sheet.properties.sheet_id,
            );
        }
        ids.get(&key)
            .copied()
            .ok_or_else(|| SheetsError::NotFound(format!("tab '{}' in {}", tab, spreadsheet_id)))
    }
}

/// Render a cell value as the text the sheet shows.
fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetsApi for HttpSheetsClient {
    async fn read_range(&self, spreadsheet_id: &str, range: &A1Range) -> Result<Rows, SheetsError> {
        debug!("GET {} {}", spreadsheet_id, range);
        let url = self.values_url(spreadsheet_id, range);
        let body: ValueRange = self
            .send(
                self.client
                    .get(url)
                    .query(&[("valueRenderOption", "FORMATTED_VALUE")]),
            )
            .await?
            .json()
            .await
            .map_err(|e| SheetsError::Decode(e.to_string()))?;

        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn update_range(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        values: Rows,
    ) -> Result<(), SheetsError> {
        debug!("PUT {} {}", spreadsheet_id, range);
        let url = self.values_url(spreadsheet_id, range);
        let body = ValueRangeBody {
            range: range.to_string(),
            major_dimension: "ROWS",
            values: &values,
        };
        self.send(
            self.client
                .put(url)
                .query(&[("valueInputOption", "USER_ENTERED")])
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        updates: Vec<RangeUpdate>,
    ) -> Result<(), SheetsError> {
        if updates.is_empty() {
            return Ok(());
        }
        debug!("batchUpdate {} ({} ranges)", spreadsheet_id, updates.len());
        let url = format!("{}/values:batchUpdate", self.spreadsheet_url(spreadsheet_id));
        let data: Vec<Value> = updates
            .iter()
            .map(|u| {
                json!({
                    "range": u.range.to_string(),
                    "majorDimension": "ROWS",
                    "values": u.values,
                })
            })
            .collect();
        self.send(self.client.post(url).json(&json!({
            "valueInputOption": "USER_ENTERED",
            "data": data,
        })))
        .await?;
        Ok(())
    }

    async fn append_rows(
        &self,
        spreadsheet_id: &str,
        range: &A1Range,
        values: Rows,
    ) -> Result<(), SheetsError> {
        debug!("append {} {} ({} rows)", spreadsheet_id, range, values.len());
        let url = format!("{}:append", self.values_url(spreadsheet_id, range));
        let body = ValueRangeBody {
            range: range.to_string(),
            major_dimension: "ROWS",
            values: &values,
        };
        self.send(
            self.client
                .post(url)
                .query(&[
                    ("valueInputOption", "USER_ENTERED"),
                    ("insertDataOption", "INSERT_ROWS"),
                ])
                .json(&body),
        )
        .await?;
        Ok(())
    }

    async fn delete_row(
        &self,
        spreadsheet_id: &str,
        tab: &str,
        row_number: usize,
    ) -> Result<(), SheetsError> {
        if row_number == 0 {
            return Err(SheetsError::Unknown("row numbers start at 1".to_string()));
        }
        let sheet_id = self.sheet_id(spreadsheet_id, tab).await?;
        debug!("delete {} '{}' row {}", spreadsheet_id, tab, row_number);
        let url = format!("{}:batchUpdate", self.spreadsheet_url(spreadsheet_id));
        self.send(self.client.post(url).json(&json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": sheet_id,
                        "dimension": "ROWS",
                        "startIndex": row_number - 1,
                        "endIndex": row_number,
                    }
                }
            }]
        })))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_url_encodes_range() {
        let client = HttpSheetsClient::new(
            SheetsClientConfig::new("token").with_api_base("http://localhost:9999/v4/"),
        )
        .unwrap();
        let url = client.values_url("abc", &A1Range::rows_from("All Current Violations", 2, "N"));
        assert_eq!(
            url,
            "http://localhost:9999/v4/spreadsheets/abc/values/%27All%20Current%20Violations%27%21A2%3AN"
        );
    }

    #[test]
    fn cell_text_renders_scalars() {
        assert_eq!(cell_text(json!("x")), "x");
        assert_eq!(cell_text(json!(12.5)), "12.5");
        assert_eq!(cell_text(json!(true)), "true");
        assert_eq!(cell_text(Value::Null), "");
    }
}
