//! BigQuery warehouse over the REST `jobs.query` API

use super::{Warehouse, WarehouseBatch};
use crate::datasets::DatasetKind;
use crate::db::duckdb::models::{IndexPriceRow, PriceRow};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use gcp_auth::TokenProvider;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

const BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const PAGE_SIZE: u32 = 50_000;
const WAIT_MS: u64 = 10_000;

/// BigQuery client scoped to one billing project
pub struct BigQueryWarehouse {
    client: Client,
    project_id: String,
    credentials: Credentials,
}

/// Source of the bearer token sent with every request
enum Credentials {
    /// Fixed token from configuration, never refreshed
    Static(String),
    /// Application Default Credentials; the provider caches and refreshes tokens
    Default(OnceCell<Arc<dyn TokenProvider>>),
}

impl Credentials {
    fn from_config(access_token: Option<String>) -> Self {
        match access_token.filter(|t| !t.trim().is_empty()) {
            Some(token) => Credentials::Static(token),
            None => Credentials::Default(OnceCell::new()),
        }
    }

    async fn bearer_token(&self) -> Result<String> {
        match self {
            Credentials::Static(token) => Ok(token.clone()),
            Credentials::Default(provider) => {
                let provider = provider
                    .get_or_try_init(|| async {
                        gcp_auth::provider().await.map_err(|e| {
                            AppError::Warehouse(format!("No Google credentials found: {}", e))
                        })
                    })
                    .await?;
                let token = provider
                    .token(&[BIGQUERY_SCOPE])
                    .await
                    .map_err(|e| AppError::Warehouse(format!("Access token request failed: {}", e)))?;
                Ok(token.as_str().to_string())
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    max_results: u32,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    job_reference: Option<JobReference>,
    job_complete: Option<bool>,
    schema: Option<TableSchema>,
    rows: Option<Vec<TableRow>>,
    page_token: Option<String>,
    errors: Option<Vec<ErrorProto>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    v: Value,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    message: String,
}

impl BigQueryWarehouse {
    pub fn new(
        project_id: impl Into<String>,
        access_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            project_id: project_id.into(),
            credentials: Credentials::from_config(access_token),
        })
    }

    /// Attach a bearer token fetched for this request
    async fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        let token = self.credentials.bearer_token().await?;
        Ok(request.bearer_auth(token))
    }

    async fn start_query(&self, sql: &str) -> Result<QueryResponse> {
        let request = QueryRequest {
            query: sql,
            use_legacy_sql: false,
            max_results: PAGE_SIZE,
            timeout_ms: WAIT_MS,
        };

        let response = self
            .authorize(
                self.client
                    .post(format!("{}/projects/{}/queries", BASE_URL, self.project_id))
                    .json(&request),
            )
            .await?
            .send()
            .await?;

        Self::parse_response(response).await
    }

    async fn fetch_page(&self, job: &JobReference, page_token: Option<&str>) -> Result<QueryResponse> {
        let mut url = format!(
            "{}/projects/{}/queries/{}?maxResults={}&timeoutMs={}",
            BASE_URL, self.project_id, job.job_id, PAGE_SIZE, WAIT_MS
        );
        if let Some(location) = &job.location {
            url.push_str(&format!("&location={}", urlencoding::encode(location)));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        let response = self.authorize(self.client.get(url)).await?.send().await?;
        Self::parse_response(response).await
    }

    async fn parse_response(response: reqwest::Response) -> Result<QueryResponse> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Warehouse(format!(
                "BigQuery returned {}: {}",
                status, body
            )));
        }

        let parsed: QueryResponse = response.json().await?;
        if let Some(errors) = parsed.errors.as_ref().filter(|e| !e.is_empty()) {
            let messages: Vec<&str> = errors.iter().map(|e| e.message.as_str()).collect();
            return Err(AppError::Warehouse(messages.join("; ")));
        }
        Ok(parsed)
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    fn name(&self) -> &'static str {
        "bigquery"
    }

    async fn fetch_all_rows(&self, locator: &str, kind: DatasetKind) -> Result<WarehouseBatch> {
        let sql = query_text(locator, kind)?;

        let mut response = self.start_query(&sql).await?;
        let job = response
            .job_reference
            .clone()
            .ok_or_else(|| AppError::Warehouse("Query response has no job reference".to_string()))?;

        while !response.job_complete.unwrap_or(false) {
            tracing::debug!("BigQuery job {} still running", job.job_id);
            response = self.fetch_page(&job, None).await?;
        }

        let columns: Vec<String> = response
            .schema
            .take()
            .map(|s| s.fields.into_iter().map(|f| f.name).collect())
            .unwrap_or_default();

        let mut batch = WarehouseBatch::empty(kind);
        loop {
            let rows = response.rows.take().unwrap_or_default();
            let cells: Vec<Vec<Value>> = rows
                .into_iter()
                .map(|r| r.f.into_iter().map(|c| c.v).collect())
                .collect();
            decode_rows(&columns, &cells, &mut batch)?;

            match response.page_token.take() {
                Some(token) => response = self.fetch_page(&job, Some(&token)).await?,
                None => break,
            }
        }

        tracing::debug!("Fetched {} rows from {}", batch.len(), locator);
        Ok(batch)
    }
}

/// Bulk query for one table; the locator is checked before being quoted
fn query_text(locator: &str, kind: DatasetKind) -> Result<String> {
    let valid = !locator.is_empty()
        && locator
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(AppError::Validation(format!(
            "Invalid warehouse table reference: {:?}",
            locator
        )));
    }

    let descriptive = match kind {
        DatasetKind::Index => "symbol, name, sector, industry",
        DatasetKind::IndexPrices => "symbol, name, currency, exchange",
    };

    Ok(format!(
        "SELECT {}, CAST(DATE(trade_date) AS STRING) AS trade_date, \
         open, close, high, low, volume FROM `{}`",
        descriptive, locator
    ))
}

/// Column lookup over BigQuery's positional `f`/`v` row encoding
struct RowReader<'a> {
    positions: &'a HashMap<&'a str, usize>,
    cells: &'a [Value],
}

impl RowReader<'_> {
    fn raw(&self, column: &str) -> Option<&Value> {
        self.positions
            .get(column)
            .and_then(|&i| self.cells.get(i))
            .filter(|v| !v.is_null())
    }

    fn text(&self, column: &str) -> String {
        match self.raw(column) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }

    /// NaN when absent or unparsable
    fn number(&self, column: &str) -> f64 {
        match self.raw(column) {
            Some(Value::String(s)) => s.parse().unwrap_or(f64::NAN),
            Some(Value::Number(n)) => n.as_f64().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    fn integer(&self, column: &str) -> i64 {
        let value = self.number(column);
        if value.is_finite() {
            value as i64
        } else {
            0
        }
    }

    fn date(&self, column: &str) -> Result<NaiveDate> {
        let raw = self.text(column);
        let day = raw.get(..10).unwrap_or(raw.as_str());
        NaiveDate::parse_from_str(day, "%Y-%m-%d")
            .map_err(|e| AppError::Warehouse(format!("Bad {} value {:?}: {}", column, raw, e)))
    }
}

fn decode_rows(columns: &[String], rows: &[Vec<Value>], batch: &mut WarehouseBatch) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let positions: HashMap<&str, usize> = columns
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();
    if !positions.contains_key("trade_date") {
        return Err(AppError::Warehouse(
            "Result set has no trade_date column".to_string(),
        ));
    }

    for cells in rows {
        let row = RowReader {
            positions: &positions,
            cells,
        };
        match batch {
            WarehouseBatch::Prices(out) => out.push(PriceRow {
                symbol: row.text("symbol"),
                name: row.text("name"),
                sector: row.text("sector"),
                industry: row.text("industry"),
                trade_date: row.date("trade_date")?,
                open: row.number("open"),
                close: row.number("close"),
                high: row.number("high"),
                low: row.number("low"),
                volume: row.integer("volume"),
                dataset_key: String::new(),
            }),
            WarehouseBatch::IndexPrices(out) => out.push(IndexPriceRow {
                symbol: row.text("symbol"),
                name: row.text("name"),
                currency: row.text("currency"),
                exchange: row.text("exchange"),
                trade_date: row.date("trade_date")?,
                open: row.number("open"),
                close: row.number("close"),
                high: row.number("high"),
                low: row.number("low"),
                volume: row.integer("volume"),
            }),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_configured_token_overrides_default_credentials() {
        let timeout = Duration::from_secs(5);

        let warehouse = BigQueryWarehouse::new("proj", Some("ya29.fixed".to_string()), timeout).unwrap();
        assert!(matches!(warehouse.credentials, Credentials::Static(_)));
        assert_eq!(warehouse.credentials.bearer_token().await.unwrap(), "ya29.fixed");

        let request = warehouse
            .authorize(warehouse.client.get("http://localhost/"))
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(
            request.headers()[reqwest::header::AUTHORIZATION],
            "Bearer ya29.fixed"
        );

        // Blank or missing tokens fall back to Application Default Credentials
        let warehouse = BigQueryWarehouse::new("proj", Some("  ".to_string()), timeout).unwrap();
        assert!(matches!(warehouse.credentials, Credentials::Default(_)));
        let warehouse = BigQueryWarehouse::new("proj", None, timeout).unwrap();
        assert!(matches!(warehouse.credentials, Credentials::Default(_)));
    }

    #[test]
    fn test_query_text() {
        let sql = query_text("proj.stock_exchange.sp500_prices", DatasetKind::Index).unwrap();
        assert!(sql.contains("FROM `proj.stock_exchange.sp500_prices`"));
        assert!(sql.contains("sector, industry"));

        let sql = query_text("proj.stock_exchange.index_prices", DatasetKind::IndexPrices).unwrap();
        assert!(sql.contains("currency, exchange"));

        assert!(query_text("proj.x`; DROP", DatasetKind::Index).is_err());
        assert!(query_text("", DatasetKind::Index).is_err());
    }

    #[test]
    fn test_decode_price_rows() {
        let cols = columns(&[
            "symbol", "name", "sector", "industry", "trade_date", "open", "close", "high", "low",
            "volume",
        ]);
        let rows = vec![
            vec![
                json!("AAPL"),
                json!("Apple"),
                json!("Technology"),
                json!("Hardware"),
                json!("2024-01-02"),
                json!("185.5"),
                json!("186.0"),
                json!("187.0"),
                json!("184.0"),
                json!("1000"),
            ],
            vec![
                json!("MSFT"),
                Value::Null,
                Value::Null,
                Value::Null,
                json!("2024-01-02"),
                json!("370"),
                Value::Null,
                json!("371"),
                json!("369"),
                Value::Null,
            ],
        ];

        let mut batch = WarehouseBatch::empty(DatasetKind::Index);
        decode_rows(&cols, &rows, &mut batch).unwrap();

        let WarehouseBatch::Prices(out) = batch else {
            panic!("expected price rows");
        };
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].symbol, "AAPL");
        assert_eq!(out[0].close, 186.0);
        assert_eq!(out[0].volume, 1000);
        assert_eq!(out[0].trade_date, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap());
        assert_eq!(out[1].sector, "");
        assert!(out[1].close.is_nan());
        assert_eq!(out[1].volume, 0);
    }

    #[test]
    fn test_decode_rejects_bad_dates() {
        let cols = columns(&["symbol", "trade_date", "close"]);
        let rows = vec![vec![json!("X"), json!("not-a-date"), json!("1")]];
        let mut batch = WarehouseBatch::empty(DatasetKind::IndexPrices);
        assert!(decode_rows(&cols, &rows, &mut batch).is_err());

        let cols = columns(&["symbol", "close"]);
        let mut batch = WarehouseBatch::empty(DatasetKind::IndexPrices);
        assert!(decode_rows(&cols, &[vec![json!("X"), json!("1")]], &mut batch).is_err());
    }
}
