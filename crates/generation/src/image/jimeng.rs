//! Jimeng (Volcengine visual API) image generation
//!
//! Generation is asynchronous on the vendor side: a submit call returns a
//! task id, and the result endpoint is polled until image URLs appear.
//! Polling is bounded by `max_wait_secs`.

use super::signing::{canonical_query, sign, RequestToSign, SigningCredentials};
use super::ImageGenerator;
use async_trait::async_trait;
use chrono::Utc;
use fairytale_common::config::JimengConfig;
use fairytale_common::errors::{AppError, Result};
use fairytale_common::metrics::record_vendor_request;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument};

const SERVICE: &str = "jimeng";

pub const SUBMIT_ACTION: &str = "CVSync2AsyncSubmitTask";
pub const QUERY_ACTION: &str = "CVSync2AsyncGetResult";
pub const API_VERSION: &str = "2022-08-31";

/// Text-to-image model key
pub const REQ_KEY_T2I: &str = "jimeng_t2i_v31";
/// Image-to-image model key
pub const REQ_KEY_I2I: &str = "jimeng_i2i_v30";

/// Vendor success code for both submit and query
pub const SUCCESS_CODE: i64 = 10000;

const PATH: &str = "/";
const JSON: &str = "application/json";

/// No visible logo, return URLs rather than base64 payloads
const RESULT_OPTIONS: &str =
    r#"{"logo_info":{"add_logo":false,"position":0,"language":0,"opacity":0.3},"return_url":true}"#;

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    req_key: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    image_urls: Vec<&'a str>,
}

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    req_key: &'a str,
    task_id: &'a str,
    req_json: &'a str,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    message: String,
    data: Option<SubmitData>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    status: i64,
    #[serde(default)]
    message: String,
    data: Option<QueryData>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryData {
    /// in_queue, generating, done, not_found, expired
    #[serde(default)]
    status: String,
    #[serde(default)]
    image_urls: Option<Vec<String>>,
}

/// The API has used both `code` and `status` for the same value
fn effective_code(code: i64, status: i64) -> i64 {
    if code != 0 {
        code
    } else {
        status
    }
}

#[derive(Debug, PartialEq, Eq)]
enum PollOutcome {
    Ready(String),
    Pending,
    Failed(String),
}

fn interpret_submit(response: SubmitResponse) -> Result<String> {
    let code = effective_code(response.code, response.status);
    if code != SUCCESS_CODE {
        return Err(AppError::upstream(
            SERVICE,
            format!("submit rejected ({}): {}", code, response.message),
        ));
    }

    response
        .data
        .map(|d| d.task_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::malformed(SERVICE, "submit succeeded without a task_id"))
}

fn interpret_query(response: QueryResponse) -> PollOutcome {
    let code = effective_code(response.code, response.status);
    if code != SUCCESS_CODE {
        return PollOutcome::Failed(format!("query rejected ({}): {}", code, response.message));
    }

    let data = response.data.unwrap_or_default();
    let first_url = data.image_urls.and_then(|urls| urls.into_iter().next());

    match (response.message.as_str(), first_url) {
        ("Success", Some(url)) => PollOutcome::Ready(url),
        _ if data.status == "not_found" || data.status == "expired" => {
            PollOutcome::Failed(format!("task {}", data.status))
        }
        _ => PollOutcome::Pending,
    }
}

/// `jimeng_i2i_v30` when a reference image is given, `jimeng_t2i_v31` otherwise
pub fn req_key_for(reference_url: Option<&str>) -> &'static str {
    match reference_url {
        Some(url) if !url.is_empty() => REQ_KEY_I2I,
        _ => REQ_KEY_T2I,
    }
}

pub struct JimengClient {
    client: reqwest::Client,
    endpoint: String,
    host: String,
    credentials: SigningCredentials,
    poll_interval: Duration,
    max_wait: Duration,
}

impl JimengClient {
    pub fn new(config: &JimengConfig) -> Result<Self> {
        let parsed = url::Url::parse(&config.endpoint).map_err(|e| AppError::Configuration {
            message: format!("invalid jimeng endpoint {:?}: {}", config.endpoint, e),
        })?;
        let host_name = parsed.host_str().ok_or_else(|| AppError::Configuration {
            message: format!("jimeng endpoint {:?} has no host", config.endpoint),
        })?;
        // Signed host must match the Host header reqwest sends
        let host = match parsed.port() {
            Some(port) => format!("{}:{}", host_name, port),
            None => host_name.to_string(),
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            host,
            credentials: SigningCredentials {
                access_key_id: config.access_key_id.clone(),
                secret_access_key: config.secret_access_key.clone(),
                region: config.region.clone(),
                service: config.service.clone(),
            },
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            max_wait: Duration::from_secs(config.max_wait_secs),
        })
    }

    /// Sign and send one action, returning the raw response body
    async fn post<T: Serialize>(&self, action: &str, payload: &T) -> Result<String> {
        let body = serde_json::to_vec(payload)?;
        let query = [("Action", action), ("Version", API_VERSION)];

        let signed = sign(
            &RequestToSign {
                method: "POST",
                host: &self.host,
                path: PATH,
                query: &query,
                content_type: JSON,
                body: &body,
            },
            &self.credentials,
            Utc::now(),
        )?;

        let url = format!("{}{}?{}", self.endpoint, PATH, canonical_query(&query));
        let response = self
            .client
            .post(&url)
            .header("X-Date", &signed.x_date)
            .header("X-Content-Sha256", &signed.x_content_sha256)
            .header(CONTENT_TYPE, JSON)
            .header(AUTHORIZATION, &signed.authorization)
            .body(body)
            .send()
            .await
            .map_err(|e| AppError::upstream(SERVICE, format!("Request failed: {}", e)))?;

        let status = response.status();
        let text = response.text().await?;
        debug!(action, status = %status, "Jimeng responded");

        if status != reqwest::StatusCode::OK {
            return Err(AppError::upstream(
                SERVICE,
                format!("API error {}: {}", status, text),
            ));
        }
        Ok(text)
    }

    async fn submit(&self, req_key: &str, prompt: &str, reference_url: Option<&str>) -> Result<String> {
        let request = SubmitRequest {
            req_key,
            prompt,
            image_urls: reference_url.filter(|u| !u.is_empty()).into_iter().collect(),
        };
        let body = self.post(SUBMIT_ACTION, &request).await?;
        let response: SubmitResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::malformed(SERVICE, format!("submit response: {}", e)))?;
        interpret_submit(response)
    }

    async fn query(&self, req_key: &str, task_id: &str) -> Result<PollOutcome> {
        let request = QueryRequest {
            req_key,
            task_id,
            req_json: RESULT_OPTIONS,
        };
        let body = self.post(QUERY_ACTION, &request).await?;
        let response: QueryResponse = serde_json::from_str(&body)
            .map_err(|e| AppError::malformed(SERVICE, format!("query response: {}", e)))?;
        Ok(interpret_query(response))
    }

    /// Poll until the task yields an image, fails, or `max_wait` passes
    async fn wait_for_image(&self, req_key: &str, task_id: &str) -> Result<String> {
        let started = Instant::now();

        loop {
            tokio::time::sleep(self.poll_interval).await;

            match self.query(req_key, task_id).await? {
                PollOutcome::Ready(url) => {
                    info!(task_id, elapsed_ms = started.elapsed().as_millis() as u64, "Jimeng task finished");
                    return Ok(url);
                }
                PollOutcome::Failed(message) => return Err(AppError::upstream(SERVICE, message)),
                PollOutcome::Pending => {}
            }

            if started.elapsed() >= self.max_wait {
                return Err(AppError::UpstreamTimeout {
                    service: SERVICE.to_string(),
                    timeout_ms: self.max_wait.as_millis() as u64,
                });
            }
        }
    }
}

#[async_trait]
impl ImageGenerator for JimengClient {
    fn provider_name(&self) -> &'static str {
        SERVICE
    }

    #[instrument(skip(self, prompt), fields(with_reference = reference_url.is_some()))]
    async fn generate(&self, prompt: &str, reference_url: Option<&str>) -> Result<String> {
        let req_key = req_key_for(reference_url);

        let result = async {
            let task_id = self.submit(req_key, prompt, reference_url).await?;
            debug!(task_id = %task_id, req_key, "Jimeng task submitted");
            self.wait_for_image(req_key, &task_id).await
        }
        .await;

        record_vendor_request(SERVICE, result.is_ok());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::{Query, State},
        http::{HeaderMap, StatusCode},
        routing::post,
        Router,
    };
    use chrono::NaiveDateTime;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct VisualStub {
        credentials: SigningCredentials,
        polls: Arc<AtomicUsize>,
        /// Query call that first reports a finished task; `None` never finishes
        ready_after: Option<usize>,
    }

    fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    /// Recompute the signature from what actually arrived on the wire
    fn signature_matches(
        credentials: &SigningCredentials,
        params: &HashMap<String, String>,
        headers: &HeaderMap,
        body: &[u8],
    ) -> bool {
        let Ok(at) = NaiveDateTime::parse_from_str(header(headers, "x-date"), "%Y%m%dT%H%M%SZ")
        else {
            return false;
        };
        let action = params.get("Action").map(String::as_str).unwrap_or_default();
        let version = params.get("Version").map(String::as_str).unwrap_or_default();

        let expected = sign(
            &RequestToSign {
                method: "POST",
                host: header(headers, "host"),
                path: PATH,
                query: &[("Action", action), ("Version", version)],
                content_type: JSON,
                body,
            },
            credentials,
            at.and_utc(),
        )
        .unwrap();
        expected.authorization == header(headers, "authorization")
    }

    async fn stub_action(
        State(stub): State<VisualStub>,
        Query(params): Query<HashMap<String, String>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> (StatusCode, String) {
        if !signature_matches(&stub.credentials, &params, &headers, &body) {
            return (StatusCode::UNAUTHORIZED, "signature mismatch".to_string());
        }

        match params.get("Action").map(String::as_str) {
            Some(SUBMIT_ACTION) => (
                StatusCode::OK,
                r#"{"code":10000,"message":"Success","data":{"task_id":"task-1"}}"#.to_string(),
            ),
            Some(QUERY_ACTION) => {
                let poll = stub.polls.fetch_add(1, Ordering::SeqCst) + 1;
                let body = match stub.ready_after {
                    Some(ready) if poll >= ready => {
                        r#"{"code":10000,"message":"Success","data":{"status":"done","image_urls":["https://img.test/out.png"]}}"#
                    }
                    _ => r#"{"code":10000,"message":"Success","data":{"status":"generating","image_urls":null}}"#,
                };
                (StatusCode::OK, body.to_string())
            }
            _ => (StatusCode::BAD_REQUEST, "unknown action".to_string()),
        }
    }

    async fn spawn_stub(ready_after: Option<usize>, max_wait_secs: u64) -> (JimengClient, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = JimengClient::new(&JimengConfig {
            access_key_id: "AKTEST".to_string(),
            secret_access_key: "c2VjcmV0".to_string(),
            endpoint: format!("http://{}", addr),
            poll_interval_secs: 0,
            max_wait_secs,
            timeout_secs: 5,
            ..Default::default()
        })
        .unwrap();

        let polls = Arc::new(AtomicUsize::new(0));
        let stub = VisualStub {
            credentials: client.credentials.clone(),
            polls: polls.clone(),
            ready_after,
        };
        let app = Router::new().route("/", post(stub_action)).with_state(stub);
        tokio::spawn(async move { axum::serve(listener, app).await });

        (client, polls)
    }

    #[test]
    fn test_req_key_selection() {
        assert_eq!(req_key_for(None), REQ_KEY_T2I);
        assert_eq!(req_key_for(Some("")), REQ_KEY_T2I);
        assert_eq!(req_key_for(Some("https://img.test/a.png")), REQ_KEY_I2I);
    }

    #[test]
    fn test_submit_body() {
        let body = serde_json::to_value(SubmitRequest {
            req_key: REQ_KEY_I2I,
            prompt: "p",
            image_urls: vec!["https://img.test/a.png"],
        })
        .unwrap();
        assert_eq!(body["image_urls"][0], "https://img.test/a.png");

        let t2i = serde_json::to_value(SubmitRequest {
            req_key: REQ_KEY_T2I,
            prompt: "p",
            image_urls: vec![],
        })
        .unwrap();
        assert!(t2i.get("image_urls").is_none());
    }

    #[test]
    fn test_result_options_disable_logo() {
        let options: serde_json::Value = serde_json::from_str(RESULT_OPTIONS).unwrap();
        assert_eq!(options["logo_info"]["add_logo"], false);
        assert_eq!(options["return_url"], true);
    }

    #[test]
    fn test_submit_success() {
        let response: SubmitResponse = serde_json::from_str(
            r#"{"code":10000,"data":{"task_id":"7392616336519610409"},"message":"Success","request_id":"x"}"#,
        )
        .unwrap();
        assert_eq!(interpret_submit(response).unwrap(), "7392616336519610409");
    }

    #[test]
    fn test_submit_rejected() {
        let response: SubmitResponse =
            serde_json::from_str(r#"{"code":50411,"message":"Pre Img Risk Not Pass","data":null}"#)
                .unwrap();
        let err = interpret_submit(response).unwrap_err();
        assert!(err.to_string().contains("50411"));
    }

    #[test]
    fn test_query_pending_then_ready() {
        let pending: QueryResponse = serde_json::from_str(
            r#"{"code":10000,"message":"Success","data":{"status":"generating","image_urls":null}}"#,
        )
        .unwrap();
        assert_eq!(interpret_query(pending), PollOutcome::Pending);

        let done: QueryResponse = serde_json::from_str(
            r#"{"code":10000,"message":"Success","data":{"status":"done","image_urls":["https://a","https://b"]}}"#,
        )
        .unwrap();
        assert_eq!(interpret_query(done), PollOutcome::Ready("https://a".to_string()));
    }

    #[test]
    fn test_query_expired_task_fails() {
        let expired: QueryResponse = serde_json::from_str(
            r#"{"code":10000,"message":"Success","data":{"status":"expired"}}"#,
        )
        .unwrap();
        assert!(matches!(interpret_query(expired), PollOutcome::Failed(_)));
    }

    #[test]
    fn test_query_error_code_fails() {
        let failed: QueryResponse =
            serde_json::from_str(r#"{"status":50500,"message":"Internal Error"}"#).unwrap();
        assert!(matches!(interpret_query(failed), PollOutcome::Failed(_)));
    }

    #[test]
    fn test_client_derives_host() {
        let client = JimengClient::new(&JimengConfig::default()).unwrap();
        assert_eq!(client.host, "visual.volcengineapi.com");
        assert_eq!(client.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn test_client_keeps_explicit_port() {
        let client = JimengClient::new(&JimengConfig {
            endpoint: "http://127.0.0.1:8443".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(client.host, "127.0.0.1:8443");

        let default_port = JimengClient::new(&JimengConfig {
            endpoint: "https://visual.volcengineapi.com:443".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(default_port.host, "visual.volcengineapi.com");
    }

    #[tokio::test]
    async fn test_generate_polls_until_image_ready() {
        let (client, polls) = spawn_stub(Some(2), 5).await;

        let url = client.generate("a fox in the snow", None).await.unwrap();
        assert_eq!(url, "https://img.test/out.png");
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generate_times_out_when_task_never_finishes() {
        let (client, polls) = spawn_stub(None, 0).await;

        let err = client.generate("a fox in the snow", None).await.unwrap_err();
        assert!(matches!(err, AppError::UpstreamTimeout { ref service, .. } if service == "jimeng"));
        assert_eq!(polls.load(Ordering::SeqCst), 1);
    }
}
