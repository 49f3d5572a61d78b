//! [`PersistenceApi`] over HTTP.
//!
//! Every route hangs off `{base}/api/documents/{id}`. Scope travels as the
//! `linked_type`/`linked_id` query pair on reads and as nullable body fields
//! on writes.

use std::time::Duration;

use async_trait::async_trait;
use pagemark_core::{
    ApiError, DocumentInfo, HistoryEntry, LinkedContext, Markup, MarkupsPayload, PersistenceApi,
    ScopeBody,
};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DETAIL_LEN: usize = 200;

/// Records stay raw until [`decode_markups`] so one bad record cannot sink
/// the whole list.
#[derive(Debug, Deserialize)]
struct MarkupsResponse {
    #[serde(default)]
    markups: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

#[derive(Clone)]
pub struct HttpPersistence {
    client: Client,
    base: Url,
    document_id: u64,
}

impl HttpPersistence {
    pub fn new(base: &str, document_id: u64) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(concat!("pagemark/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(transport_error)?;
        let base = parse_base(base)?;
        Ok(Self::with_client(client, base, document_id))
    }

    pub fn with_client(client: Client, base: Url, document_id: u64) -> Self {
        Self {
            client,
            base,
            document_id,
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn document_id(&self) -> u64 {
        self.document_id
    }

    fn endpoint(&self, tail: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base.clone();
        let id = self.document_id.to_string();
        url.path_segments_mut()
            .map_err(|_| ApiError::Network(format!("{} cannot be used as a base url", self.base)))?
            .pop_if_empty()
            .extend(["api", "documents", id.as_str()])
            .extend(tail);
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<Response, ApiError> {
        debug!(%url, "GET");
        let response = self.client.get(url).send().await.map_err(transport_error)?;
        check(response).await
    }
}

/// Parses the service root. Opaque urls such as `mailto:` have no path to
/// extend and are refused.
pub fn parse_base(input: &str) -> Result<Url, ApiError> {
    let url = Url::parse(input)
        .map_err(|err| ApiError::Network(format!("invalid server url {input:?}: {err}")))?;
    if url.cannot_be_a_base() {
        return Err(ApiError::Network(format!(
            "invalid server url {input:?}: not a hierarchical url"
        )));
    }
    Ok(url)
}

fn scope_query(scope: Option<LinkedContext>) -> Vec<(&'static str, String)> {
    match scope {
        Some(scope) => vec![
            ("linked_type", scope.linked_type.as_str().to_owned()),
            ("linked_id", scope.linked_id.to_string()),
        ],
        None => Vec::new(),
    }
}

fn with_query(mut url: Url, pairs: &[(&'static str, String)]) -> Url {
    if !pairs.is_empty() {
        url.query_pairs_mut()
            .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())));
    }
    url
}

fn decode_markups(records: Vec<serde_json::Value>) -> Vec<Markup> {
    let total = records.len();
    let markups: Vec<Markup> = records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match serde_json::from_value(record) {
            Ok(markup) => Some(markup),
            Err(err) => {
                warn!(index, %err, "skipping undecodable markup record");
                None
            }
        })
        .collect();
    if markups.len() < total {
        info!(kept = markups.len(), total, "markup list decoded with skipped records");
    }
    markups
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_decode() {
        ApiError::Malformed(err.to_string())
    } else {
        ApiError::Network(err.to_string())
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(error_from_status(status, &body))
}

/// Maps a failed response to an [`ApiError`]. A 400 is the service refusing
/// the scope pair and is never worth retrying.
pub fn error_from_status(status: StatusCode, body: &str) -> ApiError {
    let detail = error_detail(body);
    if status == StatusCode::BAD_REQUEST {
        return ApiError::ValidationRejection(detail);
    }
    ApiError::Server {
        status: status.as_u16(),
        message: detail,
    }
}

fn error_detail(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(text) = value.get(key).and_then(|v| v.as_str()) {
                return text.to_owned();
            }
        }
    }
    let trimmed = body.trim();
    if trimmed.chars().count() > MAX_DETAIL_LEN {
        let mut cut: String = trimmed.chars().take(MAX_DETAIL_LEN).collect();
        cut.push('…');
        cut
    } else {
        trimmed.to_owned()
    }
}

#[async_trait]
impl PersistenceApi for HttpPersistence {
    #[instrument(skip(self), fields(document = self.document_id))]
    async fn document(&self) -> Result<DocumentInfo, ApiError> {
        let response = self.get(self.endpoint(&[])?).await?;
        response.json().await.map_err(transport_error)
    }

    async fn fetch_file(&self) -> Result<Vec<u8>, ApiError> {
        let response = self.get(self.endpoint(&["file"])?).await?;
        let bytes = response.bytes().await.map_err(transport_error)?;
        debug!(len = bytes.len(), "document file fetched");
        Ok(bytes.to_vec())
    }

    async fn fetch_markups(&self, scope: Option<LinkedContext>) -> Result<Vec<Markup>, ApiError> {
        let url = with_query(self.endpoint(&["markups"])?, &scope_query(scope));
        let body: MarkupsResponse = self
            .get(url)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        Ok(decode_markups(body.markups))
    }

    #[instrument(skip(self, payload), fields(markups = payload.markups.len()))]
    async fn put_markups(&self, payload: &MarkupsPayload) -> Result<(), ApiError> {
        let url = self.endpoint(&["markups"])?;
        let response = self
            .client
            .put(url)
            .json(payload)
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }

    async fn save_document(&self, scope: Option<LinkedContext>) -> Result<(), ApiError> {
        let url = self.endpoint(&["save-document"])?;
        let response = self
            .client
            .post(url)
            .json(&ScopeBody::from(scope))
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }

    async fn history(&self, scope: Option<LinkedContext>) -> Result<Vec<HistoryEntry>, ApiError> {
        let url = with_query(self.endpoint(&["markups", "history"])?, &scope_query(scope));
        let body: HistoryResponse = self
            .get(url)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        Ok(body.history)
    }

    async fn restore(&self, version: u64, scope: Option<LinkedContext>) -> Result<(), ApiError> {
        let mut query = vec![("version", version.to_string())];
        query.extend(scope_query(scope));
        let url = with_query(self.endpoint(&["markups", "restore"])?, &query);
        let response = self
            .client
            .post(url)
            .send()
            .await
            .map_err(transport_error)?;
        check(response).await?;
        Ok(())
    }

    fn send_beacon(&self, payload: MarkupsPayload) {
        let url = match self.endpoint(&["markups"]) {
            Ok(url) => url,
            Err(err) => {
                warn!(%err, "beacon dropped");
                return;
            }
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                markups = payload.markups.len(),
                "no async runtime; unsaved markups were not flushed"
            );
            return;
        };
        let client = self.client.clone();
        runtime.spawn(async move {
            let sent = client.put(url).json(&payload).send().await;
            match sent {
                Ok(response) if response.status().is_success() => info!("beacon delivered"),
                Ok(response) => warn!(status = %response.status(), "beacon rejected"),
                Err(err) => warn!(%err, "beacon failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use pagemark_core::{Bounds, LinkedType};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    use super::*;

    /// Serves one canned response and hands back the raw request.
    async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request_complete(&request) {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).into_owned()
        });
        (format!("http://{addr}"), handle)
    }

    fn request_complete(request: &[u8]) -> bool {
        let text = String::from_utf8_lossy(request);
        let Some(head_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..head_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length")
                    .then(|| value.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        request.len() >= head_end + 4 + length
    }

    #[test]
    fn bad_request_is_a_validation_rejection() {
        let err = error_from_status(StatusCode::BAD_REQUEST, r#"{"detail": "project 7 is not linked"}"#);
        assert_eq!(err, ApiError::ValidationRejection("project 7 is not linked".into()));
        assert!(!err.is_retryable());
    }

    #[test]
    fn other_statuses_keep_their_code() {
        let err = error_from_status(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(
            err,
            ApiError::Server {
                status: 500,
                message: "boom".into()
            }
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn long_plain_bodies_are_truncated() {
        let detail = error_detail(&"x".repeat(1000));
        assert_eq!(detail.chars().count(), MAX_DETAIL_LEN + 1);
    }

    #[test]
    fn endpoints_extend_the_base_path() {
        let api = HttpPersistence::new("http://localhost:8000/app/", 12).unwrap();
        let url = api.endpoint(&["markups", "history"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8000/app/api/documents/12/markups/history");

        let api = HttpPersistence::new("http://localhost:8000", 12).unwrap();
        assert_eq!(
            api.endpoint(&[]).unwrap().as_str(),
            "http://localhost:8000/api/documents/12"
        );
    }

    #[test]
    fn scope_query_is_empty_at_document_level() {
        assert!(scope_query(None).is_empty());
        let query = scope_query(Some(LinkedContext::new(LinkedType::Task, 3)));
        assert_eq!(
            query,
            vec![("linked_type", "task".to_owned()), ("linked_id", "3".to_owned())]
        );
    }

    #[test]
    fn opaque_urls_are_rejected() {
        assert!(parse_base("mailto:someone@example.org").is_err());
        assert!(parse_base("not a url").is_err());
    }

    #[tokio::test]
    async fn fetch_markups_sends_the_scope_query() {
        let body = r#"{"markups": [{"id": "m1", "page": 0, "type": "comment", "bounds": {"x": 0.1, "y": 0.1, "width": 0.05, "height": 0.05}, "text": "hi"}]}"#;
        let (base, server) = serve_once("200 OK", body).await;
        let api = HttpPersistence::new(&base, 4).unwrap();

        let scope = LinkedContext::new(LinkedType::Project, 7);
        let markups = api.fetch_markups(Some(scope)).await.unwrap();
        assert_eq!(markups.len(), 1);
        assert_eq!(markups[0].id, "m1");

        let request = server.await.unwrap();
        assert!(request.starts_with(
            "GET /api/documents/4/markups?linked_type=project&linked_id=7 HTTP/1.1"
        ));
    }

    #[test]
    fn undecodable_records_are_skipped() {
        let records: Vec<serde_json::Value> = serde_json::from_str(
            r#"[
                {"id": "keep", "page": 0, "type": "comment", "bounds": {"x": 0.1, "y": 0.1, "width": 0.05, "height": 0.05}, "text": "hi"},
                {"id": "named", "page": 0, "type": "highlight", "bounds": {"x": 0.1, "y": 0.2, "width": 0.3, "height": 0.02}, "color": "yellow"},
                {"id": "alien", "page": 1, "type": "stamp", "bounds": {"x": 0.1, "y": 0.2, "width": 0.3, "height": 0.02}}
            ]"#,
        )
        .unwrap();
        let markups = decode_markups(records);
        assert_eq!(markups.len(), 1);
        assert_eq!(markups[0].id, "keep");
    }

    #[tokio::test]
    async fn one_bad_record_does_not_lose_the_list() {
        let body = r#"{"markups": [
            {"id": "m1", "page": 0, "type": "comment", "bounds": {"x": 0.1, "y": 0.1, "width": 0.05, "height": 0.05}, "text": "hi"},
            {"id": "m2", "page": 0, "type": "highlight", "bounds": {"x": 0.1, "y": 0.2, "width": 0.3, "height": 0.02}, "color": "yellow"}
        ]}"#;
        let (base, server) = serve_once("200 OK", body).await;
        let api = HttpPersistence::new(&base, 4).unwrap();

        let markups = api.fetch_markups(None).await.unwrap();
        assert_eq!(markups.len(), 1);
        assert_eq!(markups[0].id, "m1");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_put_maps_to_validation_error() {
        let (base, server) = serve_once("400 Bad Request", r#"{"detail": "not linked"}"#).await;
        let api = HttpPersistence::new(&base, 4).unwrap();
        let payload = MarkupsPayload::new(
            Some(LinkedContext::new(LinkedType::Area, 2)),
            vec![Markup::comment(0, Bounds::new(0.1, 0.1, 0.1, 0.1), "x".into())],
        );

        let err = api.put_markups(&payload).await.unwrap_err();
        assert_eq!(err, ApiError::ValidationRejection("not linked".into()));

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /api/documents/4/markups HTTP/1.1"));
        assert!(request.contains(r#""linked_type":"area""#));
        assert!(request.contains(r#""linked_id":2"#));
    }

    #[tokio::test]
    async fn undecodable_body_is_malformed() {
        let (base, server) = serve_once("200 OK", "<html>").await;
        let api = HttpPersistence::new(&base, 4).unwrap();
        let err = api.history(None).await.unwrap_err();
        assert!(matches!(err, ApiError::Malformed(_)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_server_is_a_network_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let api = HttpPersistence::new(&format!("http://{addr}"), 1).unwrap();
        let err = api.document().await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
    }
}
