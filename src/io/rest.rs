//! REST adapter for the vote store (PostgREST-style HTTP API)
//!
//! Implements the resolver, rating store and participant directory over
//! `{base_url}/rest/v1/<table>` with `apikey` + bearer headers.

use crate::domain::{GroupId, ParticipantId, PerformanceUnit, RatingRecord};
use crate::error::{SourceError, SourceResult};
use crate::infra::config::Config;
use crate::io::rows::{NameRow, ScheduleRow, VoteRow};
use crate::services::ports::{GroupResolver, ParticipantDirectory, RatingStore};
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

const VOTE_COLUMNS: &str = "id,group_id,employee_id,rating,created_at,employee:employees(name)";
const GROUP_COLUMNS: &str = "group:groups(id,name,theme)";

pub struct RestClient {
    base_url: String,
    api_key: String,
    timeout: Duration,
    http: reqwest::Client,
    /// Participant names never change during an event
    names: Mutex<FxHashMap<ParticipantId, String>>,
}

impl RestClient {
    pub fn new(config: &Config) -> SourceResult<Self> {
        Self::with_endpoint(config.store_base_url(), config.store_api_key(), config.store_timeout())
    }

    pub fn with_endpoint(base_url: &str, api_key: &str, timeout: Duration) -> SourceResult<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            timeout,
            http,
            names: Mutex::new(FxHashMap::default()),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    async fn get_rows<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> SourceResult<Vec<T>> {
        let response = self
            .http
            .get(self.table_url(table))
            .query(query)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| if e.is_timeout() { SourceError::Timeout(self.timeout) } else { SourceError::Http(e) })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status { endpoint: table.to_string(), status: status.as_u16() });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| SourceError::Decode(format!("{table}: {e}")))
    }
}

#[async_trait]
impl GroupResolver for RestClient {
    async fn resolve_active_group(&self, date: NaiveDate) -> SourceResult<Option<PerformanceUnit>> {
        let rows: Vec<ScheduleRow> = self
            .get_rows(
                "schedules",
                &[
                    ("select", GROUP_COLUMNS.to_string()),
                    ("date", format!("eq.{}", date.format("%Y-%m-%d"))),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next().and_then(|row| row.group).map(PerformanceUnit::from))
    }
}

#[async_trait]
impl RatingStore for RestClient {
    async fn fetch_ratings(&self, group_id: &GroupId) -> SourceResult<Vec<RatingRecord>> {
        let rows: Vec<VoteRow> = self
            .get_rows(
                "votes",
                &[("select", VOTE_COLUMNS.to_string()), ("group_id", format!("eq.{group_id}"))],
            )
            .await?;
        rows.into_iter().map(VoteRow::into_record).collect()
    }
}

#[async_trait]
impl ParticipantDirectory for RestClient {
    async fn resolve_participant_name(&self, participant_id: &ParticipantId) -> SourceResult<String> {
        let cached = self.names.lock().get(participant_id).cloned();
        if let Some(name) = cached {
            return Ok(name);
        }

        let rows: Vec<NameRow> = self
            .get_rows(
                "employees",
                &[("select", "name".to_string()), ("id", format!("eq.{participant_id}"))],
            )
            .await?;
        let name = rows
            .into_iter()
            .next()
            .and_then(|row| row.name)
            .ok_or_else(|| SourceError::NotFound(format!("participant {participant_id}")))?;

        debug!(participant_id = %participant_id, "participant_name_cached");
        self.names.lock().insert(participant_id.clone(), name.clone());
        Ok(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// One-shot HTTP server answering every request with `status` and `body`.
    /// Each request line is sent back on the returned channel.
    async fn serve(status: &'static str, body: &'static str) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let text = String::from_utf8_lossy(&request).to_string();
                let _ = tx.send(text.lines().next().unwrap_or_default().to_string());
                let response = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });
        (format!("http://{addr}"), rx)
    }

    fn client(base_url: &str) -> RestClient {
        RestClient::with_endpoint(base_url, "anon-key", Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_ratings_decodes_rows() {
        let (url, mut requests) = serve(
            "200 OK",
            r#"[{"id":"a","group_id":"g1","employee_id":"e1","rating":8,"created_at":"2026-10-19T19:00:00Z","employee":{"name":"Ayu"}},
                {"id":"b","group_id":"g1","employee_id":null,"rating":4,"created_at":"2026-10-19T19:01:00Z","employee":null}]"#,
        )
        .await;

        let records = client(&url).fetch_ratings(&GroupId::new("g1")).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].participant_name.as_deref(), Some("Ayu"));
        assert!(records[1].participant_id.is_none());

        let request_line = requests.recv().await.unwrap();
        assert!(request_line.starts_with("GET /rest/v1/votes?"));
        assert!(request_line.contains("group_id=eq.g1"));
    }

    #[tokio::test]
    async fn test_out_of_range_rating_fails_fetch() {
        let (url, _requests) =
            serve("200 OK", r#"[{"id":"a","group_id":"g1","employee_id":"e1","rating":0}]"#).await;
        let result = client(&url).fetch_ratings(&GroupId::new("g1")).await;
        assert!(matches!(result, Err(SourceError::Decode(_))));
    }

    #[tokio::test]
    async fn test_error_status_is_surfaced() {
        let (url, _requests) = serve("503 Service Unavailable", "{}").await;
        let result = client(&url).fetch_ratings(&GroupId::new("g1")).await;
        assert!(matches!(result, Err(SourceError::Status { status: 503, .. })));
    }

    #[tokio::test]
    async fn test_resolve_active_group() {
        let (url, mut requests) =
            serve("200 OK", r#"[{"group":{"id":"g1","name":"Angklung","theme":"Nusantara"}}]"#).await;
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();

        let group = client(&url).resolve_active_group(date).await.unwrap().unwrap();
        assert_eq!(group.id, GroupId::new("g1"));
        assert_eq!(group.theme, "Nusantara");
        assert!(requests.recv().await.unwrap().contains("date=eq.2026-10-19"));
    }

    #[tokio::test]
    async fn test_participant_names_are_cached() {
        let (url, mut requests) = serve("200 OK", r#"[{"name":"Budi"}]"#).await;
        let client = client(&url);
        let id = ParticipantId::new("e7");

        assert_eq!(client.resolve_participant_name(&id).await.unwrap(), "Budi");
        assert_eq!(client.resolve_participant_name(&id).await.unwrap(), "Budi");
        requests.recv().await.unwrap();
        assert!(requests.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unknown_participant_is_not_found() {
        let (url, _requests) = serve("200 OK", "[]").await;
        let result = client(&url).resolve_participant_name(&ParticipantId::new("nobody")).await;
        assert!(matches!(result, Err(SourceError::NotFound(_))));
    }
}
