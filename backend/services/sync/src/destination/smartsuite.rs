use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use rowsync_common::{DestinationErrorKind, SyncError, SyncResult};
use rowsync_config::DestinationSettings;
use rowsync_transform::Payload;

use super::DestinationClient;

#[derive(Debug, Clone)]
pub struct SmartSuiteClientConfig {
    pub base_url: String,
    pub token: String,
    pub account_id: String,
    pub max_retries: u32,
    pub timeout_secs: u64,
    /// First retry waits twice this long, doubling up to 30s.
    pub backoff_base: Duration,
}

impl From<&DestinationSettings> for SmartSuiteClientConfig {
    fn from(settings: &DestinationSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            token: settings.token.clone(),
            account_id: settings.account_id.clone(),
            max_retries: settings.max_retries,
            timeout_secs: settings.timeout_secs,
            backoff_base: Duration::from_secs(1),
        }
    }
}

/// Longest single Retry-After wait honoured on 429.
const MAX_RETRY_AFTER_SECS: u64 = 60;
const MAX_BACKOFF: Duration = Duration::from_secs(30);

impl SmartSuiteClientConfig {
    fn backoff(&self, attempt: u32) -> Duration {
        std::cmp::min(self.backoff_base * (1u32 << attempt.min(16)), MAX_BACKOFF)
    }

    /// Worst-case wall time of one logical call including every retry, its
    /// backoff and a capped Retry-After wait.
    pub fn call_budget(&self) -> Duration {
        let per_attempt = Duration::from_secs(self.timeout_secs.saturating_add(MAX_RETRY_AFTER_SECS));
        let attempts = self.max_retries.saturating_add(1);

        // Past 16 doublings every backoff is at the cap.
        let doubling = self.max_retries.min(16);
        let backoffs = (1..=doubling).fold(Duration::ZERO, |total, attempt| {
            total.saturating_add(self.backoff(attempt))
        });
        let capped = MAX_BACKOFF.saturating_mul(self.max_retries - doubling);

        per_attempt
            .saturating_mul(attempts)
            .saturating_add(backoffs)
            .saturating_add(capped)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SmartSuiteError {
    #[error("HTTP {status}: {body}")]
    HttpError { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded { attempts: u32, last_error: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl SmartSuiteError {
    pub fn kind(&self) -> DestinationErrorKind {
        match self {
            Self::HttpError { status, .. } => match *status {
                StatusCode::NOT_FOUND => DestinationErrorKind::NotFound,
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    DestinationErrorKind::Unauthorized
                }
                s if s == StatusCode::TOO_MANY_REQUESTS || s.is_server_error() => {
                    DestinationErrorKind::Transient
                }
                _ => DestinationErrorKind::Permanent,
            },
            Self::RequestError(e) if e.is_timeout() || e.is_connect() => {
                DestinationErrorKind::Transient
            }
            Self::RequestError(_) | Self::UnexpectedResponse(_) => DestinationErrorKind::Permanent,
            Self::MaxRetriesExceeded { .. } => DestinationErrorKind::Transient,
        }
    }
}

impl From<SmartSuiteError> for SyncError {
    fn from(e: SmartSuiteError) -> Self {
        SyncError::destination(e.kind(), e.to_string())
    }
}

#[derive(Clone)]
pub struct SmartSuiteClient {
    client: Client,
    config: SmartSuiteClientConfig,
}

impl SmartSuiteClient {
    pub fn new(config: SmartSuiteClientConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, config })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    async fn request_with_retry(
        &self,
        method: Method,
        url: &str,
        body: Option<&Payload>,
    ) -> Result<Value, SmartSuiteError> {
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.backoff(attempt);
                tracing::warn!(attempt, backoff_ms = backoff.as_millis() as u64, %url, "retrying after backoff");
                tokio::time::sleep(backoff).await;
            }
            let last_attempt = attempt == self.config.max_retries;

            let mut request = self
                .client
                .request(method.clone(), url)
                .header("Authorization", format!("Token {}", self.config.token))
                .header("ACCOUNT-ID", &self.config.account_id);
            if let Some(payload) = body {
                request = request.json(payload);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    let err = SmartSuiteError::RequestError(e);
                    if err.kind().is_retryable() {
                        last_error = err.to_string();
                        continue;
                    }
                    return Err(err);
                }
            };

            let status = response.status();

            if status.is_success() {
                let text = response.text().await?;
                if text.trim().is_empty() {
                    return Ok(Value::Null);
                }
                return serde_json::from_str(&text)
                    .map_err(|e| SmartSuiteError::UnexpectedResponse(format!("invalid JSON: {e}")));
            }

            // Honor Retry-After header for 429
            if status == StatusCode::TOO_MANY_REQUESTS && !last_attempt {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, MAX_RETRY_AFTER_SECS);
                    tracing::warn!(wait, "rate-limited, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
            }

            let body = response.text().await.unwrap_or_default();
            let err = SmartSuiteError::HttpError { status, body };
            if err.kind().is_retryable() {
                last_error = err.to_string();
                continue;
            }

            // Fail fast on other 4xx
            tracing::warn!(%status, %method, %url, error = %err, "smartsuite request rejected");
            return Err(err);
        }

        Err(SmartSuiteError::MaxRetriesExceeded {
            attempts: self.config.max_retries.saturating_add(1),
            last_error,
        })
    }

    pub async fn create_record(
        &self,
        table_id: &str,
        payload: &Payload,
    ) -> Result<String, SmartSuiteError> {
        let url = self.url(&format!("/applications/{table_id}/records/"));
        let created = self.request_with_retry(Method::POST, &url, Some(payload)).await?;

        match created.get("id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(id.clone()),
            Some(Value::Number(n)) => Ok(n.to_string()),
            _ => Err(SmartSuiteError::UnexpectedResponse(
                "created record has no id".to_owned(),
            )),
        }
    }

    pub async fn update_record(
        &self,
        table_id: &str,
        record_id: &str,
        payload: &Payload,
    ) -> Result<(), SmartSuiteError> {
        let url = self.url(&format!("/applications/{table_id}/records/{record_id}/"));
        self.request_with_retry(Method::PATCH, &url, Some(payload))
            .await
            .map(|_| ())
    }

    /// List applications; succeeds iff the credentials are accepted.
    pub async fn list_applications(&self) -> Result<Value, SmartSuiteError> {
        let url = self.url("/applications/");
        self.request_with_retry(Method::GET, &url, None).await
    }
}

#[async_trait]
impl DestinationClient for SmartSuiteClient {
    async fn create(&self, collection: &str, payload: &Payload) -> SyncResult<String> {
        Ok(self.create_record(collection, payload).await?)
    }

    async fn update(
        &self,
        collection: &str,
        destination_id: &str,
        payload: &Payload,
    ) -> SyncResult<()> {
        Ok(self.update_record(collection, destination_id, payload).await?)
    }

    async fn ping(&self) -> SyncResult<()> {
        self.list_applications().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use rowsync_db::sync::MappingStore;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> SmartSuiteClientConfig {
        SmartSuiteClientConfig {
            base_url: "http://localhost".to_string(),
            token: "fake-token".to_string(),
            account_id: "acct-1".to_string(),
            max_retries: 2,
            timeout_secs: 5,
            backoff_base: Duration::from_millis(1),
        }
    }

    fn client_for(server: &MockServer) -> SmartSuiteClient {
        SmartSuiteClient::new(test_config())
            .unwrap()
            .with_base_url(&server.uri())
    }

    fn payload() -> Payload {
        let mut p = Payload::new();
        p.insert("title".into(), json!("Ada"));
        p
    }

    #[tokio::test]
    async fn create_posts_payload_with_auth_headers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/applications/tbl1/records/"))
            .and(header("Authorization", "Token fake-token"))
            .and(header("ACCOUNT-ID", "acct-1"))
            .and(body_json(json!({ "title": "Ada" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "rec_1", "title": "Ada" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = client_for(&server).create("tbl1", &payload()).await.unwrap();
        assert_eq!(id, "rec_1");
    }

    #[tokio::test]
    async fn update_patches_record_path() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/applications/tbl1/records/rec_1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "rec_1" })))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .update("tbl1", "rec_1", &payload())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn retries_on_500() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/applications/tbl1/records/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/applications/tbl1/records/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "rec_2" })))
            .mount(&server)
            .await;

        let id = client_for(&server).create("tbl1", &payload()).await.unwrap();
        assert_eq!(id, "rec_2");
    }

    #[tokio::test]
    async fn retries_on_429_honoring_retry_after() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/applications/tbl1/records/rec_1/"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("PATCH"))
            .and(path("/applications/tbl1/records/rec_1/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        client_for(&server)
            .update("tbl1", "rec_1", &payload())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn not_found_is_classified_and_not_retried() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path("/applications/tbl1/records/gone/"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such record"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .update("tbl1", "gone", &payload())
            .await
            .unwrap_err();
        match err {
            SyncError::Destination { kind, message } => {
                assert_eq!(kind, DestinationErrorKind::NotFound);
                assert!(message.contains("no such record"), "got: {message}");
            }
            other => panic!("expected destination error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fails_fast_on_401_and_403() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/applications/t401/records/"))
            .respond_with(ResponseTemplate::new(401).set_body_string("unauthorized"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/applications/t403/records/"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server);
        for table in ["t401", "t403"] {
            let err = client.create_record(table, &payload()).await.unwrap_err();
            assert_eq!(err.kind(), DestinationErrorKind::Unauthorized);
        }
    }

    #[tokio::test]
    async fn other_4xx_is_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/applications/tbl1/records/"))
            .respond_with(ResponseTemplate::new(422).set_body_string("bad field s1a2b3"))
            .expect(1)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_record("tbl1", &payload())
            .await
            .unwrap_err();
        match &err {
            SmartSuiteError::HttpError { status, body } => {
                assert_eq!(*status, StatusCode::UNPROCESSABLE_ENTITY);
                assert_eq!(body, "bad field s1a2b3");
            }
            other => panic!("expected HttpError, got: {other:?}"),
        }
        assert_eq!(err.kind(), DestinationErrorKind::Permanent);
    }

    #[tokio::test]
    async fn max_retries_exceeded_is_transient() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/applications/tbl1/records/"))
            .respond_with(ResponseTemplate::new(503).set_body_string("always failing"))
            .expect(3)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_record("tbl1", &payload())
            .await
            .unwrap_err();
        assert!(matches!(err, SmartSuiteError::MaxRetriesExceeded { attempts: 3, .. }));
        assert_eq!(err.kind(), DestinationErrorKind::Transient);
    }

    #[tokio::test]
    async fn create_without_id_is_permanent() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/applications/tbl1/records/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "title": "Ada" })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .create_record("tbl1", &payload())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), DestinationErrorKind::Permanent);
    }

    #[tokio::test]
    async fn ping_lists_applications() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/applications/"))
            .and(header("ACCOUNT-ID", "acct-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server).ping().await.unwrap();
    }

    #[test]
    fn call_budget_covers_every_attempt_and_wait() {
        let config = SmartSuiteClientConfig {
            timeout_secs: 1,
            max_retries: 2,
            backoff_base: Duration::from_secs(1),
            ..test_config()
        };
        // 3 attempts * (1s + 60s Retry-After) + 2s + 4s backoff
        assert_eq!(config.call_budget(), Duration::from_secs(189));

        let huge = SmartSuiteClientConfig {
            max_retries: u32::MAX,
            ..test_config()
        };
        assert!(huge.call_budget() >= Duration::from_secs(3600));
    }

    #[tokio::test]
    async fn reconciler_budget_lets_rate_limited_create_recover() {
        use crate::reconcile::{Decision, Reconciler};
        use crate::testing::{at, customer, customers_definition, memory_store};
        use std::sync::Arc;

        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/applications/tbl_customers/records/"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/applications/tbl_customers/records/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "rec_9" })))
            .expect(1)
            .mount(&server)
            .await;

        let config = SmartSuiteClientConfig {
            timeout_secs: 1,
            ..test_config()
        };
        let budget = config.call_budget();
        assert!(budget > Duration::from_secs(config.timeout_secs));

        let client = Arc::new(
            SmartSuiteClient::new(config)
                .unwrap()
                .with_base_url(&server.uri()),
        );
        let store = Arc::new(memory_store().await);
        let reconciler = Reconciler::new(Arc::clone(&store), client, budget);

        let decision = reconciler
            .reconcile(&customers_definition(), &customer(1, "Ada", 1, at(1, 9)))
            .await
            .unwrap();
        assert!(matches!(&decision, Decision::Created(id) if id == "rec_9"), "got: {decision:?}");
        assert_eq!(
            store.get_mapping("customers", "1").await.unwrap().unwrap().destination_id,
            "rec_9"
        );
    }

    #[test]
    fn exhausted_retries_convert_to_transient_sync_error() {
        let err = SmartSuiteError::MaxRetriesExceeded {
            attempts: 3,
            last_error: "connection refused".into(),
        };
        let sync: SyncError = err.into();
        assert!(matches!(
            sync,
            SyncError::Destination {
                kind: DestinationErrorKind::Transient,
                ..
            }
        ));
    }
}
