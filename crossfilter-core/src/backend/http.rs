//! HTTP connector for the pooled SQL backend
//!
//! Statements are posted as JSON to a SQL-over-HTTP endpoint:
//! - `POST /query` with `{ sql, params }` for one-off statements
//! - `POST /prepare` with `{ sql }` returning `{ statement_id }`, once per
//!   statement text and connection, then `POST /execute` with
//!   `{ statement_id, params }`
//!
//! Results come back as `{ rows: [[...], ...] }`. With compression on, request
//! bodies are gzip-encoded and gzip responses are decoded.

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use reqwest::header::{HeaderValue, ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

use super::pooled::{SqlConnection, SqlConnector};
use super::sql::{SqlRequest, SqlRow};
use crate::error::{CrossfilterError, CrossfilterResult};

#[derive(Debug, Serialize)]
struct QueryBody<'a> {
    sql: &'a str,
    params: &'a [f64],
}

#[derive(Debug, Serialize)]
struct PrepareBody<'a> {
    sql: &'a str,
}

#[derive(Debug, Deserialize)]
struct PrepareResponse {
    statement_id: String,
}

#[derive(Debug, Serialize)]
struct ExecuteBody<'a> {
    statement_id: &'a str,
    params: &'a [f64],
}

#[derive(Debug, Deserialize)]
struct RowsResponse {
    rows: Vec<SqlRow>,
}

pub(crate) fn gzip(bytes: &[u8]) -> CrossfilterResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub(crate) fn gunzip(bytes: &[u8]) -> CrossfilterResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Opens [`HttpSqlConnection`]s against one endpoint
#[derive(Debug, Clone)]
pub struct HttpSqlConnector {
    endpoint: String,
    compression: bool,
    connect_timeout: Duration,
}

impl HttpSqlConnector {
    pub fn new<S: Into<String>>(endpoint: S, compression: bool) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        info!(
            "SQL-over-HTTP connector for {} (compression: {})",
            endpoint, compression
        );
        Self {
            endpoint,
            compression,
            connect_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl SqlConnector for HttpSqlConnector {
    type Connection = HttpSqlConnection;

    async fn connect(&self) -> CrossfilterResult<HttpSqlConnection> {
        let client = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .pool_max_idle_per_host(1)
            .build()
            .map_err(|e| {
                CrossfilterError::connection(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(HttpSqlConnection {
            client,
            endpoint: self.endpoint.clone(),
            compression: self.compression,
            prepared: HashMap::new(),
        })
    }
}

/// One HTTP session with its own prepared statement handles
pub struct HttpSqlConnection {
    client: reqwest::Client,
    endpoint: String,
    compression: bool,
    /// statement text -> server-side statement id
    prepared: HashMap<String, String>,
}

impl HttpSqlConnection {
    async fn post<B, R>(&self, path: &str, body: &B) -> CrossfilterResult<R>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body)?;
        let mut request = self
            .client
            .post(format!("{}{}", self.endpoint, path))
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        request = if self.compression {
            request
                .header(CONTENT_ENCODING, HeaderValue::from_static("gzip"))
                .header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"))
                .body(gzip(&payload)?)
        } else {
            request.body(payload)
        };

        let response = request.send().await?;
        let status = response.status();
        let gzipped = response
            .headers()
            .get(CONTENT_ENCODING)
            .map(|v| v.as_bytes().eq_ignore_ascii_case(b"gzip"))
            .unwrap_or(false);
        let bytes = response.bytes().await?;
        let body = if gzipped { gunzip(&bytes)? } else { bytes.to_vec() };

        if status == StatusCode::SERVICE_UNAVAILABLE {
            return Err(CrossfilterError::connection(format!(
                "{} unavailable: {}",
                self.endpoint,
                String::from_utf8_lossy(&body)
            )));
        }
        if !status.is_success() {
            return Err(CrossfilterError::backend(format!(
                "{} returned {}: {}",
                path,
                status,
                String::from_utf8_lossy(&body)
            )));
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn statement_id(&mut self, sql: &str) -> CrossfilterResult<String> {
        if let Some(id) = self.prepared.get(sql) {
            return Ok(id.clone());
        }
        let response: PrepareResponse = self.post("/prepare", &PrepareBody { sql }).await?;
        debug!("Prepared statement {}: {}", response.statement_id, sql);
        self.prepared
            .insert(sql.to_string(), response.statement_id.clone());
        Ok(response.statement_id)
    }
}

#[async_trait]
impl SqlConnection for HttpSqlConnection {
    async fn execute(&mut self, request: &SqlRequest) -> CrossfilterResult<Vec<SqlRow>> {
        let response: RowsResponse = if request.prepared {
            let statement_id = self.statement_id(&request.sql).await?;
            self.post(
                "/execute",
                &ExecuteBody {
                    statement_id: &statement_id,
                    params: &request.params,
                },
            )
            .await?
        } else {
            self.post(
                "/query",
                &QueryBody {
                    sql: &request.sql,
                    params: &request.params,
                },
            )
            .await?
        };
        Ok(response.rows)
    }
}
