//! HTTP client for the remote face-recognition service.
//!
//! Every endpoint shares one envelope: a JSON object with a boolean
//! `success`, the payload field on `true`, an `error` string on
//! `false`. Expected failures — HTTP errors, malformed bodies,
//! application-level rejections — are all surfaced as [`ClientError`]
//! variants, never panics.
//!
//! Each call first targets the normalized base URL; if the response
//! looks like a route mismatch (the server runs without the `/api`
//! prefix), the legacy candidate is tried once. Transport errors never
//! trigger the fallback, so a mutating request is issued at most once
//! per candidate.

use std::time::Duration;

use async_trait::async_trait;
use image::DynamicImage;
use kinfolk_core::endpoint;
use kinfolk_core::types::{RecognitionMatch, RegisteredFace};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::encode;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
// Uploads carry an image and wait on server-side inference.
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);

const BODY_PREVIEW_LEN: usize = 200;

/// Default confidence threshold for recognition calls.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP {status} from /{endpoint}: {preview}")]
    Http {
        endpoint: String,
        status: u16,
        preview: String,
    },
    #[error("route mismatch for /{endpoint} on all candidates; tried {attempts}")]
    RouteMismatch { endpoint: String, attempts: String },
    #[error("invalid JSON from /{endpoint} (HTTP {status}): {preview}")]
    InvalidJson {
        endpoint: String,
        status: u16,
        preview: String,
    },
    /// Application-level failure: the server answered `success: false`.
    #[error("{0}")]
    Api(String),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

enum Method {
    Get,
    Post,
    Delete,
}

struct RawResponse {
    status: u16,
    body: String,
}

impl RawResponse {
    fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Interface to the recognition service, so orchestration code can run
/// against a stub in tests.
#[async_trait]
pub trait FaceBackend {
    async fn check_health(&self) -> bool;
    async fn register_face(
        &self,
        server_id: i64,
        member_name: &str,
        photo: &DynamicImage,
    ) -> Result<String, ClientError>;
    async fn recognize_face(
        &self,
        photo: &DynamicImage,
        threshold: f64,
    ) -> Result<Vec<RecognitionMatch>, ClientError>;
    async fn delete_face(&self, server_id: i64) -> Result<String, ClientError>;
    async fn clear_all(&self) -> Result<String, ClientError>;
    async fn list_faces(&self) -> Result<Vec<RegisteredFace>, ClientError>;
}

/// Client for one recognition server.
///
/// The base URL is fixed at construction; changing the configured
/// server means constructing a new client. Calls in flight when that
/// happens finish against the URL they started with.
pub struct FaceClient {
    http: reqwest::Client,
    base_url: String,
}

impl FaceClient {
    /// Build a client for the given server address. The address is
    /// normalized; anything unparseable falls back to the default
    /// production endpoint.
    pub fn new(server_url: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        let base_url = endpoint::normalize(server_url);
        tracing::debug!(%base_url, "face client configured");
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Liveness probe: true iff `GET /health` answers 2xx. Any failure,
    /// including timeouts, reads as "server unavailable".
    pub async fn check_health(&self) -> bool {
        match self.execute("health", Method::Get, None, HEALTH_TIMEOUT).await {
            Ok(raw) => {
                tracing::debug!(status = raw.status, "health check response");
                raw.is_success()
            }
            Err(err) => {
                tracing::warn!(error = %err, "health check failed");
                false
            }
        }
    }

    /// Register a face photo under a namespaced server id.
    pub async fn register_face(
        &self,
        server_id: i64,
        member_name: &str,
        photo: &DynamicImage,
    ) -> Result<String, ClientError> {
        let body = serde_json::json!({
            "member_id": server_id.to_string(),
            "member_name": member_name,
            "image": encode::to_base64_jpeg(photo)?,
        });
        let raw = self
            .execute("register_face", Method::Post, Some(&body), UPLOAD_TIMEOUT)
            .await?;
        interpret_message("register_face", &raw, "registration failed")
    }

    /// Recognize faces in a photo. An empty list is a successful
    /// "nobody matched", distinct from a failure.
    pub async fn recognize_face(
        &self,
        photo: &DynamicImage,
        threshold: f64,
    ) -> Result<Vec<RecognitionMatch>, ClientError> {
        let body = serde_json::json!({
            "image": encode::to_base64_jpeg(photo)?,
            "threshold": threshold,
        });
        let raw = self
            .execute("recognize_face", Method::Post, Some(&body), UPLOAD_TIMEOUT)
            .await?;
        interpret_recognize(&raw)
    }

    /// Remove one registration from the server.
    pub async fn delete_face(&self, server_id: i64) -> Result<String, ClientError> {
        let path = format!("delete_face/{server_id}");
        let raw = self.execute(&path, Method::Delete, None, ADMIN_TIMEOUT).await?;
        interpret_message(&path, &raw, "delete failed")
    }

    /// Remove every registration from the server.
    pub async fn clear_all(&self) -> Result<String, ClientError> {
        let raw = self
            .execute("clear_all", Method::Delete, None, ADMIN_TIMEOUT)
            .await?;
        interpret_message("clear_all", &raw, "clear failed")
    }

    /// Fetch all faces currently registered on the server.
    pub async fn list_faces(&self) -> Result<Vec<RegisteredFace>, ClientError> {
        let raw = self.execute("list_faces", Method::Get, None, ADMIN_TIMEOUT).await?;
        interpret_list(&raw)
    }

    async fn execute(
        &self,
        path: &str,
        method: Method,
        body: Option<&serde_json::Value>,
        timeout: Duration,
    ) -> Result<RawResponse, ClientError> {
        let bases = endpoint::candidates(&self.base_url);
        let last = bases.len() - 1;
        let mut attempts = Vec::new();

        for (index, base) in bases.iter().enumerate() {
            let candidate = if index == 0 { "primary" } else { "legacy" };
            let url = format!("{base}/{path}");
            tracing::debug!(candidate, %url, "issuing request");

            let builder = match method {
                Method::Get => self.http.get(&url),
                Method::Delete => self.http.delete(&url),
                Method::Post => self
                    .http
                    .post(&url)
                    .json(body.unwrap_or(&serde_json::Value::Null)),
            };

            // Transport failures abort without touching the legacy
            // candidate: the request may already have mutated server
            // state, and a blind retry could register twice.
            let response = builder.timeout(timeout).send().await?;
            let status = response.status().as_u16();
            let text = response.text().await?;

            if endpoint::is_route_mismatch(status, &text) {
                attempts.push(format!("{candidate}:HTTP {status} {url}"));
                if index < last {
                    tracing::warn!(candidate, status, "route mismatch, trying legacy candidate");
                    continue;
                }
                return Err(ClientError::RouteMismatch {
                    endpoint: path.to_string(),
                    attempts: attempts.join(" | "),
                });
            }

            tracing::debug!(candidate, status, "using response");
            return Ok(RawResponse { status, body: text });
        }

        // candidates() always yields at least one base URL, so the loop
        // above always returns; this arm is for the type checker.
        Err(ClientError::RouteMismatch {
            endpoint: path.to_string(),
            attempts: attempts.join(" | "),
        })
    }
}

#[async_trait]
impl FaceBackend for FaceClient {
    async fn check_health(&self) -> bool {
        FaceClient::check_health(self).await
    }

    async fn register_face(
        &self,
        server_id: i64,
        member_name: &str,
        photo: &DynamicImage,
    ) -> Result<String, ClientError> {
        FaceClient::register_face(self, server_id, member_name, photo).await
    }

    async fn recognize_face(
        &self,
        photo: &DynamicImage,
        threshold: f64,
    ) -> Result<Vec<RecognitionMatch>, ClientError> {
        FaceClient::recognize_face(self, photo, threshold).await
    }

    async fn delete_face(&self, server_id: i64) -> Result<String, ClientError> {
        FaceClient::delete_face(self, server_id).await
    }

    async fn clear_all(&self) -> Result<String, ClientError> {
        FaceClient::clear_all(self).await
    }

    async fn list_faces(&self) -> Result<Vec<RegisteredFace>, ClientError> {
        FaceClient::list_faces(self).await
    }
}

#[derive(Deserialize)]
struct MessageResponse {
    success: bool,
    message: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct RecognizeResponse {
    success: bool,
    results: Option<Vec<RecognitionMatch>>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ListResponse {
    success: bool,
    faces: Option<Vec<RegisteredFace>>,
    error: Option<String>,
}

fn preview(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    trimmed.chars().take(BODY_PREVIEW_LEN).collect()
}

fn parse_body<T: DeserializeOwned>(path: &str, raw: &RawResponse) -> Result<T, ClientError> {
    if !raw.is_success() {
        return Err(ClientError::Http {
            endpoint: path.to_string(),
            status: raw.status,
            preview: preview(&raw.body),
        });
    }
    serde_json::from_str(&raw.body).map_err(|_| ClientError::InvalidJson {
        endpoint: path.to_string(),
        status: raw.status,
        preview: preview(&raw.body),
    })
}

fn interpret_message(path: &str, raw: &RawResponse, fallback: &str) -> Result<String, ClientError> {
    let resp: MessageResponse = parse_body(path, raw)?;
    if resp.success {
        Ok(resp.message.unwrap_or_else(|| "OK".to_string()))
    } else {
        Err(ClientError::Api(
            resp.error.unwrap_or_else(|| fallback.to_string()),
        ))
    }
}

fn interpret_recognize(raw: &RawResponse) -> Result<Vec<RecognitionMatch>, ClientError> {
    let resp: RecognizeResponse = parse_body("recognize_face", raw)?;
    if resp.success {
        Ok(resp.results.unwrap_or_default())
    } else {
        Err(ClientError::Api(
            resp.error.unwrap_or_else(|| "recognition failed".to_string()),
        ))
    }
}

fn interpret_list(raw: &RawResponse) -> Result<Vec<RegisteredFace>, ClientError> {
    let resp: ListResponse = parse_body("list_faces", raw)?;
    if resp.success {
        Ok(resp.faces.unwrap_or_default())
    } else {
        Err(ClientError::Api(
            resp.error.unwrap_or_else(|| "list failed".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_message_success() {
        let result = interpret_message(
            "register_face",
            &raw(200, r#"{"success":true,"message":"Face registered"}"#),
            "registration failed",
        );
        assert_eq!(result.unwrap(), "Face registered");
    }

    #[test]
    fn test_message_success_without_message_field() {
        let result = interpret_message("clear_all", &raw(200, r#"{"success":true}"#), "clear failed");
        assert_eq!(result.unwrap(), "OK");
    }

    #[test]
    fn test_application_failure_carries_server_error() {
        let result = interpret_message(
            "register_face",
            &raw(200, r#"{"success":false,"error":"no face detected"}"#),
            "registration failed",
        );
        match result {
            Err(ClientError::Api(msg)) => assert_eq!(msg, "no face detected"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_application_failure_without_error_uses_fallback() {
        let result = interpret_message(
            "delete_face/1",
            &raw(200, r#"{"success":false}"#),
            "delete failed",
        );
        match result {
            Err(ClientError::Api(msg)) => assert_eq!(msg, "delete failed"),
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn test_http_error_reported_before_parsing() {
        let result = interpret_message("register_face", &raw(500, "boom"), "registration failed");
        match result {
            Err(ClientError::Http { status, preview, .. }) => {
                assert_eq!(status, 500);
                assert_eq!(preview, "boom");
            }
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_json_body_is_invalid_json() {
        let result = interpret_message("register_face", &raw(200, "<html>oops</html>"), "x");
        assert!(matches!(result, Err(ClientError::InvalidJson { status: 200, .. })));
    }

    #[test]
    fn test_missing_success_field_is_invalid_json() {
        let result = interpret_message("register_face", &raw(200, r#"{"message":"hi"}"#), "x");
        assert!(matches!(result, Err(ClientError::InvalidJson { .. })));
    }

    #[test]
    fn test_recognize_parses_matches() {
        let body = r#"{
            "success": true,
            "results": [{
                "member_id": "42000007",
                "member_name": "Ada Kinfolk",
                "confidence": 0.91,
                "location": {"top": 10, "right": 120, "bottom": 110, "left": 20}
            }]
        }"#;
        let matches = interpret_recognize(&raw(200, body)).unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].member_id, "42000007");
        assert_eq!(matches[0].member_name, "Ada Kinfolk");
        assert!((matches[0].confidence - 0.91).abs() < 1e-9);
        assert_eq!(matches[0].location.top, 10);
        assert_eq!(matches[0].location.left, 20);
    }

    #[test]
    fn test_recognize_empty_results_is_success() {
        let matches = interpret_recognize(&raw(200, r#"{"success":true,"results":[]}"#)).unwrap();
        assert!(matches.is_empty());

        // A missing results array also means "no faces matched".
        let matches = interpret_recognize(&raw(200, r#"{"success":true}"#)).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn test_list_parses_faces() {
        let body = r#"{"success":true,"faces":[
            {"member_id":"42000007","member_name":"Ada Kinfolk"},
            {"member_id":"42000008","member_name":"Brendan Kinfolk"}
        ]}"#;
        let faces = interpret_list(&raw(200, body)).unwrap();
        assert_eq!(faces.len(), 2);
        assert_eq!(faces[1].member_name, "Brendan Kinfolk");
    }

    #[test]
    fn test_preview_truncates_and_marks_empty() {
        assert_eq!(preview("   "), "<empty>");
        let long = "x".repeat(500);
        assert_eq!(preview(&long).len(), BODY_PREVIEW_LEN);
    }
}
