//! SQL-over-HTTP transport for the results warehouse.
//!
//! Request body:
//! ```text
//! {"statements": [{"sql": "...", "arguments": [...]}], "execute": true}
//! ```
//! Response body: `{"execution": {"txn_results": [{"rows": [{col: val}]}]}}`
//! or `{"error": {"message": "..."}}`.

use super::{parse_timestamp, RenderedQuery, ResultsStore, RunRow};
use crate::error::{Result, TriageError};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::debug;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SqlResponse {
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    execution: Option<Execution>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Execution {
    #[serde(default)]
    txn_results: Vec<TxnResult>,
}

#[derive(Debug, Deserialize)]
struct TxnResult {
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    rows: Vec<Map<String, Value>>,
}

// ---------------------------------------------------------------------------
// HttpResultsStore
// ---------------------------------------------------------------------------

pub struct HttpResultsStore {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpResultsStore {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TriageError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }

    fn body(query: &RenderedQuery) -> Value {
        let arguments: Vec<Value> = query.params.iter().map(|p| p.to_json()).collect();
        json!({
            "statements": [{ "sql": query.sql, "arguments": arguments }],
            "execute": true,
        })
    }
}

impl ResultsStore for HttpResultsStore {
    fn fetch(&self, query: &RenderedQuery) -> Result<Vec<RunRow>> {
        let mut request = self.client.post(&self.url).json(&Self::body(query));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().map_err(|e| {
            TriageError::StoreUnavailable(format!("request to {} failed: {e}", self.url))
        })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TriageError::StoreUnavailable(format!(
                "results store rejected credentials (HTTP {})",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let hint = body.chars().take(300).collect::<String>();
            return Err(TriageError::StoreUnavailable(format!(
                "results store returned HTTP {}: {hint}",
                status.as_u16()
            )));
        }

        let parsed: SqlResponse = response.json().map_err(|e| {
            TriageError::StoreUnavailable(format!("undecodable results store response: {e}"))
        })?;
        if let Some(err) = parsed.error {
            return Err(TriageError::StoreUnavailable(err.message));
        }

        let Some(txn) = parsed
            .execution
            .and_then(|e| e.txn_results.into_iter().next())
        else {
            return Ok(Vec::new());
        };
        if let Some(err) = txn.error {
            return Err(TriageError::StoreUnavailable(err.message));
        }

        debug!(rows = txn.rows.len(), "decoded results store response");
        txn.rows.iter().map(decode_row).collect()
    }
}

fn decode_row(row: &Map<String, Value>) -> Result<RunRow> {
    let text = |key: &str| -> Result<String> {
        match row.get(key) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            other => Err(TriageError::StoreUnavailable(format!(
                "malformed row: column '{key}' is {other:?}"
            ))),
        }
    };

    let raw_start = text("start_date")?;
    let start_date = parse_timestamp(&raw_start).ok_or_else(|| {
        TriageError::StoreUnavailable(format!("malformed row: bad start_date '{raw_start}'"))
    })?;

    Ok(RunRow {
        build_id: text("build_id")?,
        start_date,
        branch_name: text("branch_name")?,
        test_status: text("test_status")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{ResultsClient, RunHistory, RunQuery};

    fn query() -> RenderedQuery {
        RunQuery::new("pkg/kv/TestSplits", "2024-01-01T00:00:00Z".parse().unwrap(), "%")
            .limit(1)
            .render()
    }

    fn store(server: &mockito::Server, token: Option<&str>) -> HttpResultsStore {
        HttpResultsStore::new(
            format!("{}/api/v2/sql/", server.url()),
            token.map(str::to_string),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn posts_statement_with_bound_arguments_and_decodes_rows() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/api/v2/sql/")
            .match_header("authorization", "Bearer s3cret")
            .match_body(mockito::Matcher::PartialJson(json!({
                "execute": true,
                "statements": [{ "arguments": ["pkg/kv/TestSplits", "2024-01-01T00:00:00Z", "%", 1] }]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "execution": { "txn_results": [{ "rows": [{
                        "build_id": 123456,
                        "start_date": "2024-05-01T10:00:00Z",
                        "branch_name": "master",
                        "test_status": "SUCCESS"
                    }]}]}
                })
                .to_string(),
            )
            .create();

        let rows = store(&server, Some("s3cret")).fetch(&query()).unwrap();
        mock.assert();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].build_id, "123456");
        assert_eq!(rows[0].test_status, "SUCCESS");
    }

    #[test]
    fn unauthorized_is_store_unavailable() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/v2/sql/")
            .with_status(401)
            .create();
        let err = store(&server, None).fetch(&query()).unwrap_err();
        assert!(matches!(err, TriageError::StoreUnavailable(ref m) if m.contains("credentials")));
    }

    #[test]
    fn api_error_object_is_store_unavailable() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/v2/sql/")
            .with_status(200)
            .with_body(r#"{"error":{"message":"relation \"builds\" does not exist"}}"#)
            .create();
        let err = store(&server, None).fetch(&query()).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn empty_result_is_not_an_error() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/v2/sql/")
            .with_status(200)
            .with_body(r#"{"execution":{"txn_results":[{"rows":[]}]}}"#)
            .create();
        let client = ResultsClient::new(store(&server, None), 90, "%");
        assert!(client.find_last_success("t", None).unwrap().is_none());
    }

    #[test]
    fn malformed_row_is_store_unavailable() {
        let mut server = mockito::Server::new();
        server
            .mock("POST", "/api/v2/sql/")
            .with_status(200)
            .with_body(
                r#"{"execution":{"txn_results":[{"rows":[{"build_id":1,"start_date":"soon","branch_name":"m","test_status":"success"}]}]}}"#,
            )
            .create();
        let err = store(&server, None).fetch(&query()).unwrap_err();
        assert!(matches!(err, TriageError::StoreUnavailable(_)));
    }

    #[test]
    fn unreachable_server_is_store_unavailable() {
        let store = HttpResultsStore::new(
            "http://127.0.0.1:1/api/v2/sql/",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        let err = store.fetch(&query()).unwrap_err();
        assert!(matches!(err, TriageError::StoreUnavailable(_)));
    }
}
