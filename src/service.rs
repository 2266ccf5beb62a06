use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{any, get, post},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{AppError, ErrorKind, Result};
use crate::flashcards::{self, FlashcardService};
use crate::models::{
    Artifact, FlashcardSet, JsonRpcRequest, JsonRpcResponse, KIND_DATA, KIND_MESSAGE, KIND_TEXT,
    Message, MessagePart, PartPayload, ROLE_AGENT, STATE_COMPLETED, Status, TaskResult,
};

#[derive(Clone)]
pub struct AppState {
    pub flashcards: Arc<FlashcardService>,
}

pub fn build_router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/a2a", any(a2a_handler))
        .route("/health", get(health_check))
        .route(
            "/upload",
            post(upload_handler).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "flashcard-generator"}))
}

/// JSON-RPC endpoint. Every outcome, including protocol errors, is an
/// HTTP 200 carrying a JSON-RPC envelope.
async fn a2a_handler(State(state): State<AppState>, method: Method, body: Bytes) -> Json<JsonRpcResponse> {
    if method != Method::POST {
        return rpc_error(
            "unknown",
            &AppError::new(ErrorKind::InvalidRequest, "Only POST method is supported"),
        );
    }

    let req: JsonRpcRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => {
            return rpc_error("", &AppError::with_detail(ErrorKind::Parse, "Parse error", e.to_string()));
        }
    };

    if req.jsonrpc != "2.0" {
        return rpc_error(
            &req.id,
            &AppError::with_detail(ErrorKind::InvalidRequest, "Invalid Request", "jsonrpc must be 2.0"),
        );
    }

    match req.method.as_str() {
        "message/send" => handle_message_send(&state, req).await,
        other => rpc_error(
            &req.id,
            &AppError::with_detail(
                ErrorKind::MethodNotFound,
                "Method not found",
                format!("Method {other} not supported"),
            ),
        ),
    }
}

async fn handle_message_send(state: &AppState, req: JsonRpcRequest) -> Json<JsonRpcResponse> {
    let msg = match extract_message(&req) {
        Ok(msg) => msg,
        Err(e) => return rpc_error(&req.id, &e),
    };

    let user_input = extract_user_input(&msg);
    if user_input.is_empty() {
        return rpc_error(
            &req.id,
            &AppError::with_detail(ErrorKind::InvalidParams, "Invalid params", "No text content found in message"),
        );
    }

    match process_request(state, &user_input, &msg).await {
        Ok(result) => {
            let value = serde_json::to_value(&result).unwrap_or(Value::Null);
            Json(JsonRpcResponse::success(req.id, value))
        }
        Err(e) => {
            error!(code = e.code(), "request failed: {}", e.message);
            rpc_error(&req.id, &e)
        }
    }
}

fn extract_message(req: &JsonRpcRequest) -> Result<Message> {
    let message = req
        .params
        .get("message")
        .filter(|v| v.is_object())
        .ok_or_else(|| AppError::invalid_params("Missing or invalid 'message' parameter"))?;

    serde_json::from_value(message.clone())
        .map_err(|e| AppError::with_detail(ErrorKind::InvalidParams, "Invalid message format", e.to_string()))
}

/// Returns the text of the first text-kind part, scanning in declaration
/// order. Subsequent text or data parts are ignored here.
fn extract_user_input(msg: &Message) -> String {
    msg.parts
        .iter()
        .find(|part| part.kind == KIND_TEXT)
        .and_then(|part| part.text.clone())
        .unwrap_or_default()
}

/// Routing decision, first match wins: PDF URL in the text, then an uploaded
/// PDF in a data part, then the text itself as source content.
async fn process_request(state: &AppState, input: &str, user_msg: &Message) -> Result<TaskResult> {
    let set = if let Some(pdf_url) = flashcards::extract_pdf_url(input) {
        info!(url = %pdf_url, "processing PDF from URL");
        state.flashcards.generate_from_url(&pdf_url).await?
    } else if let Some(pdf_data) = extract_pdf_data(user_msg) {
        info!(bytes = pdf_data.len(), "processing uploaded PDF");
        state.flashcards.generate_from_pdf_data(pdf_data).await?
    } else {
        info!("generating flashcards from text input");
        state.flashcards.generate_from_text(input).await?
    };

    Ok(build_task_result(&set, user_msg))
}

/// Pulls inline PDF bytes out of the first data-kind part that identifies a
/// PDF: either a structured payload with `contentType: application/pdf` and a
/// base64 `data` string, or a bare string payload taken as raw bytes. A
/// non-decodable `data` string falls back to its raw bytes.
fn extract_pdf_data(msg: &Message) -> Option<Vec<u8>> {
    for part in &msg.parts {
        if part.kind != KIND_DATA {
            continue;
        }
        match &part.data {
            Some(PartPayload::Structured(map)) => {
                let content_type = map.get("contentType").and_then(Value::as_str);
                if content_type == Some("application/pdf") {
                    if let Some(encoded) = map.get("data").and_then(Value::as_str) {
                        return Some(
                            BASE64
                                .decode(encoded)
                                .unwrap_or_else(|_| encoded.as_bytes().to_vec()),
                        );
                    }
                }
            }
            Some(PartPayload::Text(raw)) => return Some(raw.clone().into_bytes()),
            _ => {}
        }
    }
    None
}

fn build_task_result(set: &FlashcardSet, user_msg: &Message) -> TaskResult {
    let task_id = if user_msg.task_id.is_empty() {
        format!("task-{}", short_id())
    } else {
        user_msg.task_id.clone()
    };

    let response_msg = Message {
        kind: KIND_MESSAGE.to_string(),
        role: ROLE_AGENT.to_string(),
        message_id: format!("msg-{}", short_id()),
        task_id: String::new(),
        parts: vec![MessagePart::text(flashcards::format_as_text(set))],
        metadata: None,
    };

    let artifacts = vec![Artifact {
        artifact_id: format!("artifact-{}", Uuid::new_v4()),
        name: "flashcardSet".to_string(),
        parts: vec![MessagePart::data(PartPayload::Other(
            serde_json::to_value(set).unwrap_or(Value::Null),
        ))],
    }];

    TaskResult {
        id: task_id,
        context_id: format!("ctx-{}", Uuid::new_v4()),
        status: Status {
            state: STATE_COMPLETED.to_string(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            message: response_msg.clone(),
        },
        artifacts,
        history: vec![user_msg.clone(), response_msg],
        kind: "task".to_string(),
    }
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

fn rpc_error(id: &str, err: &AppError) -> Json<JsonRpcResponse> {
    Json(JsonRpcResponse::error(
        id,
        err.code(),
        err.message.clone(),
        err.detail.clone().unwrap_or_default(),
    ))
}

/// Multipart PDF upload. Unlike `/a2a`, this endpoint answers with plain
/// HTTP statuses and the bare flashcard set on success.
async fn upload_handler(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut pdf_data: Option<Vec<u8>> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                if field.name() == Some("pdf") {
                    let file_name = field.file_name().map(str::to_owned);
                    // bytes() drains the field fully, so declared sizes are
                    // never trusted over the actual stream length.
                    match field.bytes().await {
                        Ok(bytes) => {
                            info!(
                                file = file_name.as_deref().unwrap_or("<unnamed>"),
                                bytes = bytes.len(),
                                "received uploaded file"
                            );
                            pdf_data = Some(bytes.to_vec());
                            break;
                        }
                        Err(_) => {
                            return (StatusCode::BAD_REQUEST, "Failed to read PDF file").into_response();
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(_) => {
                return (StatusCode::BAD_REQUEST, "Failed to parse multipart form").into_response();
            }
        }
    }

    let Some(pdf_data) = pdf_data else {
        return (StatusCode::BAD_REQUEST, "Failed to get PDF file from form").into_response();
    };

    match state.flashcards.generate_from_pdf_data(pdf_data).await {
        Ok(set) => (StatusCode::OK, Json(set)).into_response(),
        Err(e) => {
            error!("error generating flashcards: {}", e.message);
            let status = match e.kind {
                ErrorKind::InvalidParams => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, format!("Failed to generate flashcards: {}", e.message)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::GenerationEngine;
    use crate::pdf::PdfService;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct ScriptedEngine(String);

    #[async_trait]
    impl GenerationEngine for ScriptedEngine {
        async fn generate(&self, _prompt: &str) -> anyhow::Result<String> {
            Ok(self.0.clone())
        }
    }

    const CARDS: &str = "Q: What is a task?\nA: One completed unit of work.\nT: Protocol\n\n\
Q: What is an artifact?\nA: A named structured output.\nT: Protocol";

    fn test_router() -> Router {
        let engine = Arc::new(ScriptedEngine(CARDS.to_string()));
        let state = AppState {
            flashcards: Arc::new(FlashcardService::new(PdfService::new(), engine)),
        };
        build_router(state, 10 * 1024 * 1024)
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        (status, value)
    }

    fn rpc_request(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/a2a")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn message_send_body(text: &str) -> String {
        json!({
            "jsonrpc": "2.0",
            "id": "test-123",
            "method": "message/send",
            "params": {
                "message": {
                    "kind": "message",
                    "role": "user",
                    "messageId": "msg-001",
                    "taskId": "task-001",
                    "parts": [{"kind": "text", "text": text}]
                }
            }
        })
        .to_string()
    }

    #[tokio::test]
    async fn non_post_yields_invalid_request_envelope() {
        for method in ["GET", "PUT", "DELETE"] {
            let request = Request::builder()
                .method(method)
                .uri("/a2a")
                .body(Body::empty())
                .unwrap();
            let (status, body) = send(test_router(), request).await;

            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["error"]["code"], -32600);
            assert_eq!(body["error"]["message"], "Only POST method is supported");
        }
    }

    #[tokio::test]
    async fn malformed_json_yields_parse_error() {
        let (status, body) = send(test_router(), rpc_request("{invalid json}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], "");
    }

    #[tokio::test]
    async fn missing_jsonrpc_version_is_invalid_request() {
        let (_, body) = send(
            test_router(),
            rpc_request(r#"{"id":"123","method":"message/send"}"#),
        )
        .await;
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn wrong_jsonrpc_version_is_invalid_request() {
        let (_, body) = send(
            test_router(),
            rpc_request(r#"{"jsonrpc":"1.0","id":"123","method":"message/send"}"#),
        )
        .await;
        assert_eq!(body["error"]["code"], -32600);
        assert_eq!(body["id"], "123");
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let (_, body) = send(
            test_router(),
            rpc_request(r#"{"jsonrpc":"2.0","id":"123","method":"unknown/method","params":{}}"#),
        )
        .await;
        assert_eq!(body["error"]["code"], -32601);
        assert_eq!(body["error"]["data"], "Method unknown/method not supported");
    }

    #[tokio::test]
    async fn missing_message_param_is_invalid_params() {
        let (_, body) = send(
            test_router(),
            rpc_request(r#"{"jsonrpc":"2.0","id":"123","method":"message/send","params":{}}"#),
        )
        .await;
        assert_eq!(body["error"]["code"], -32602);
        assert_eq!(body["error"]["message"], "Missing or invalid 'message' parameter");
    }

    #[tokio::test]
    async fn message_without_text_part_is_invalid_params() {
        let body_str = json!({
            "jsonrpc": "2.0",
            "id": "123",
            "method": "message/send",
            "params": {
                "message": {
                    "kind": "message",
                    "role": "user",
                    "messageId": "m1",
                    "parts": [{"kind": "data", "data": {"foo": "bar"}}]
                }
            }
        })
        .to_string();
        let (_, body) = send(test_router(), rpc_request(&body_str)).await;
        assert_eq!(body["error"]["code"], -32602);
        assert_eq!(body["error"]["data"], "No text content found in message");
    }

    #[tokio::test]
    async fn valid_request_returns_completed_task() {
        let (status, body) = send(
            test_router(),
            rpc_request(&message_send_body("Generate flashcards about basic mathematics.")),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jsonrpc"], "2.0");
        assert_eq!(body["id"], "test-123");
        assert!(body.get("error").is_none());

        let result = &body["result"];
        assert_eq!(result["kind"], "task");
        assert_eq!(result["id"], "task-001");
        assert_eq!(result["status"]["state"], "completed");

        // History is exactly [user message, agent message].
        let history = result["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["role"], "user");
        assert_eq!(history[1]["role"], "agent");

        let artifacts = result["artifacts"].as_array().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0]["name"], "flashcardSet");
        let set = &artifacts[0]["parts"][0]["data"];
        assert_eq!(set["totalCards"], 2);
        assert_eq!(set["source"], "user_input");
        assert_eq!(set["title"], "Study Flashcards");
    }

    #[tokio::test]
    async fn task_id_is_generated_when_absent() {
        let body_str = json!({
            "jsonrpc": "2.0",
            "id": "1",
            "method": "message/send",
            "params": {
                "message": {
                    "kind": "message",
                    "role": "user",
                    "messageId": "m1",
                    "parts": [{"kind": "text", "text": "Summarize ownership rules."}]
                }
            }
        })
        .to_string();
        let (_, body) = send(test_router(), rpc_request(&body_str)).await;
        let id = body["result"]["id"].as_str().unwrap();
        assert!(id.starts_with("task-"));
    }

    #[tokio::test]
    async fn first_text_part_wins_for_input_extraction() {
        let body_str = json!({
            "jsonrpc": "2.0",
            "id": "1",
            "method": "message/send",
            "params": {
                "message": {
                    "kind": "message",
                    "role": "user",
                    "messageId": "m1",
                    "parts": [
                        {"kind": "data", "data": {"ignored": true}},
                        {"kind": "text", "text": "first text part"},
                        {"kind": "text", "text": "second text part"}
                    ]
                }
            }
        })
        .to_string();
        let (_, body) = send(test_router(), rpc_request(&body_str)).await;
        // The request succeeds off the first text part; the echoed user
        // message in history still carries all parts.
        let parts = body["result"]["history"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert!(body["result"]["status"]["message"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Study Flashcards"));
    }

    #[tokio::test]
    async fn health_endpoint_reports_service_name() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let (status, body) = send(test_router(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "flashcard-generator");
    }

    #[tokio::test]
    async fn upload_without_pdf_field_is_bad_request() {
        let boundary = "XBOUNDARY";
        let form = format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"other\"\r\n\r\nhello\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(form))
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn upload_with_invalid_pdf_bytes_is_bad_request() {
        let boundary = "XBOUNDARY";
        let form = format!(
            "--{boundary}\r\ncontent-disposition: form-data; name=\"pdf\"; filename=\"notes.pdf\"\r\n\
content-type: application/pdf\r\n\r\nnot a pdf at all\r\n--{boundary}--\r\n"
        );
        let request = Request::builder()
            .method("POST")
            .uri("/upload")
            .header("content-type", format!("multipart/form-data; boundary={boundary}"))
            .body(Body::from(form))
            .unwrap();

        let response = test_router().oneshot(request).await.unwrap();
        // Fails the %PDF signature check before any generation.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn extract_pdf_data_prefers_structured_pdf_payload() {
        let msg = Message {
            kind: "message".to_string(),
            role: "user".to_string(),
            message_id: "m1".to_string(),
            task_id: String::new(),
            metadata: None,
            parts: vec![MessagePart {
                kind: "data".to_string(),
                text: None,
                data: Some(PartPayload::Structured(
                    json!({"contentType": "application/pdf", "data": BASE64.encode(b"%PDF-1.4 body")})
                        .as_object()
                        .unwrap()
                        .clone(),
                )),
            }],
        };
        assert_eq!(extract_pdf_data(&msg).unwrap(), b"%PDF-1.4 body");
    }

    #[test]
    fn extract_pdf_data_falls_back_to_raw_string_payload() {
        let msg = Message {
            kind: "message".to_string(),
            role: "user".to_string(),
            message_id: "m1".to_string(),
            task_id: String::new(),
            metadata: None,
            parts: vec![MessagePart {
                kind: "data".to_string(),
                text: None,
                data: Some(PartPayload::Text("%PDF-1.4 raw".to_string())),
            }],
        };
        assert_eq!(extract_pdf_data(&msg).unwrap(), b"%PDF-1.4 raw");
    }

    #[test]
    fn extract_pdf_data_ignores_non_pdf_structured_payloads() {
        let msg = Message {
            kind: "message".to_string(),
            role: "user".to_string(),
            message_id: "m1".to_string(),
            task_id: String::new(),
            metadata: None,
            parts: vec![MessagePart {
                kind: "data".to_string(),
                text: None,
                data: Some(PartPayload::Structured(
                    json!({"contentType": "text/plain", "data": "hello"}).as_object().unwrap().clone(),
                )),
            }],
        };
        assert!(extract_pdf_data(&msg).is_none());
    }
}
