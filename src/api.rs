//! JSON HTTP API
//!
//! Minimal HTTP/1.1 request parsing and the route table of the query
//! service. The accept loop lives in the `server` binary.

use crate::assistant::{QueryAssistant, QueryOutcome};
use crate::error::EduError;
use crate::query_templates::{sample_questions, QUICK_QUERIES};
use crate::security::build_filter_clause;
use percent_encoding::percent_decode_str;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error};

pub const MAX_REQUEST_BYTES: usize = 1024 * 1024;

/// Recent query entries returned by `GET /api/audit`.
const AUDIT_RECENT_LIMIT: usize = 50;

const JSON_CONTENT_TYPE: &str = "application/json";
const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpRequest {
    /// Parse a raw request. Query strings and trailing slashes are dropped
    /// from the path; header names are lower-cased.
    pub fn parse(raw: &str) -> Option<Self> {
        let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
        let mut lines = head.lines();

        let mut parts = lines.next()?.split_whitespace();
        let method = parts.next()?.to_uppercase();
        let target = parts.next()?;

        let path = target.split('?').next().unwrap_or(target).trim_end_matches('/');
        let path = if path.is_empty() { "/" } else { path }.to_string();

        let headers = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
            .collect();

        Some(Self {
            method,
            path,
            headers,
            body: body.to_string(),
        })
    }

    pub fn content_length(&self) -> usize {
        self.headers
            .get("content-length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

/// Read one request: headers up to the blank line, then as many body bytes
/// as `Content-Length` announces. The whole read must finish within
/// `timeout`, otherwise it fails with `ErrorKind::TimedOut`. Oversized
/// requests fail with `ErrorKind::InvalidData`; `Ok(None)` means the peer
/// closed early or sent garbage.
pub async fn read_request<R>(reader: &mut R, timeout: Duration) -> io::Result<Option<HttpRequest>>
where
    R: AsyncRead + Unpin,
{
    match tokio::time::timeout(timeout, read_request_unbounded(reader)).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "request read timed out")),
    }
}

async fn read_request_unbounded<R>(reader: &mut R) -> io::Result<Option<HttpRequest>>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buffer) {
            break pos;
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&chunk[..n]);
        if buffer.len() > MAX_REQUEST_BYTES {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request too large"));
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = HttpRequest::parse(&head).map(|r| r.content_length()).unwrap_or(0);
    if header_end + content_length > MAX_REQUEST_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "request too large"));
    }

    while buffer.len() < header_end + content_length {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
    }

    Ok(HttpRequest::parse(&String::from_utf8_lossy(&buffer)))
}

/// Byte offset just past the blank line that ends the headers.
fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl HttpResponse {
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            content_type: JSON_CONTENT_TYPE,
            body: value.to_string(),
        }
    }

    pub fn csv(body: String) -> Self {
        Self {
            status: 200,
            content_type: CSV_CONTENT_TYPE,
            body,
        }
    }

    fn no_content() -> Self {
        Self {
            status: 204,
            content_type: JSON_CONTENT_TYPE,
            body: String::new(),
        }
    }

    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            204 => "No Content",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            422 => "Unprocessable Entity",
            502 => "Bad Gateway",
            _ => "Internal Server Error",
        }
    }

    /// Serialize with content-type and CORS headers.
    pub fn to_http(&self) -> String {
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: {}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             \r\n\
             {}",
            self.status,
            self.reason(),
            self.content_type,
            self.body.len(),
            self.body
        )
    }

    pub fn body_json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or(Value::Null)
    }
}

fn error_response(status: u16, message: &str) -> HttpResponse {
    HttpResponse::json(status, &json!({ "error": message }))
}

/// Map a service error to a status code and JSON body.
pub fn error_to_response(e: &EduError) -> HttpResponse {
    match e {
        EduError::UserNotFound(_) => error_response(403, &e.to_string()),
        // Engine message passed through unchanged.
        EduError::Database(message) => HttpResponse::json(
            422,
            &json!({ "error": "Database query failed", "detail": message }),
        ),
        EduError::StatementRejected(_) | EduError::SqlParse(_) => error_response(400, &e.to_string()),
        EduError::Template(_) => error_response(404, &e.to_string()),
        EduError::Llm(_) => error_response(502, &e.to_string()),
        _ => {
            error!("Internal error: {}", e);
            error_response(500, &e.to_string())
        }
    }
}

/// Shape of a query response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ResultFormat {
    #[default]
    Json,
    /// Result table only, as a CSV download.
    Csv,
}

#[derive(Debug, Deserialize)]
struct AskBody {
    username: String,
    question: String,
    #[serde(default)]
    format: ResultFormat,
}

#[derive(Debug, Deserialize)]
struct QuickQueryBody {
    username: String,
    name: String,
    #[serde(default)]
    format: ResultFormat,
}

/// `/api/users/{username}/scope`, with the username percent-decoded.
fn scope_username(path: &str) -> Option<Cow<'_, str>> {
    let raw = path.strip_prefix("/api/users/")?.strip_suffix("/scope")?;
    percent_decode_str(raw).decode_utf8().ok()
}

fn outcome_response(outcome: &QueryOutcome, format: ResultFormat) -> HttpResponse {
    match format {
        ResultFormat::Json => match serde_json::to_value(outcome) {
            Ok(value) => HttpResponse::json(200, &value),
            Err(e) => error_to_response(&EduError::from(e)),
        },
        ResultFormat::Csv => match outcome.result.to_csv() {
            Ok(body) => HttpResponse::csv(body),
            Err(e) => error_to_response(&e),
        },
    }
}

fn parse_body<T: DeserializeOwned>(request: &HttpRequest) -> Result<T, HttpResponse> {
    serde_json::from_str(request.body.trim())
        .map_err(|e| error_response(400, &format!("Invalid request body: {}", e)))
}

pub async fn handle_request(assistant: &QueryAssistant, request: &HttpRequest) -> HttpResponse {
    debug!("Request: {} {}", request.method, request.path);

    if request.method == "OPTIONS" {
        return HttpResponse::no_content();
    }

    let path = request.path.as_str();
    match (request.method.as_str(), path) {
        ("GET", "/api/health") => HttpResponse::json(
            200,
            &json!({
                "status": "ok",
                "service": "edu-query-api",
                "generator": assistant.generator_name(),
                "filter_strategy": assistant.filter_strategy(),
            }),
        ),
        ("GET", "/api/users") => {
            let users: Vec<Value> = assistant
                .users()
                .list()
                .iter()
                .map(|u| json!({ "username": u.username, "full_name": u.full_name, "role": u.role }))
                .collect();
            HttpResponse::json(200, &json!({ "users": users }))
        }
        ("GET", p) if scope_username(p).is_some() => {
            let username = scope_username(p).unwrap_or_default();
            match assistant.authorize(&username) {
                Ok((user, scope)) => HttpResponse::json(
                    200,
                    &json!({
                        "username": user.username,
                        "full_name": user.full_name,
                        "role": user.role,
                        "scope": scope,
                        "filter": build_filter_clause(&scope, None),
                    }),
                ),
                Err(e) => error_to_response(&e),
            }
        }
        ("GET", "/api/quick-queries") => HttpResponse::json(200, &json!({ "queries": QUICK_QUERIES })),
        ("GET", "/api/sample-questions") => {
            HttpResponse::json(200, &json!({ "questions": sample_questions() }))
        }
        ("POST", "/api/query") => {
            let body: AskBody = match parse_body(request) {
                Ok(body) => body,
                Err(response) => return response,
            };
            if body.question.trim().is_empty() {
                return error_response(400, "Question is required");
            }
            match assistant.ask(&body.question, &body.username).await {
                Ok(outcome) => outcome_response(&outcome, body.format),
                Err(e) => error_to_response(&e),
            }
        }
        ("POST", "/api/quick-queries/run") => {
            let body: QuickQueryBody = match parse_body(request) {
                Ok(body) => body,
                Err(response) => return response,
            };
            match assistant.run_quick_query(&body.name, &body.username) {
                Ok(outcome) => outcome_response(&outcome, body.format),
                Err(e) => error_to_response(&e),
            }
        }
        ("GET", "/api/audit") => {
            let logger = assistant.logger();
            let (granted, denied) = logger.get_access_stats();
            HttpResponse::json(
                200,
                &json!({
                    "recent_queries": logger.get_recent_queries(AUDIT_RECENT_LIMIT),
                    "access": { "granted": granted, "denied": denied },
                }),
            )
        }
        ("GET", "/api/audit/export") => match assistant.logger().export_logs() {
            Ok(body) => HttpResponse {
                status: 200,
                content_type: JSON_CONTENT_TYPE,
                body,
            },
            Err(e) => error_to_response(&e),
        },
        (
            _,
            "/api/health" | "/api/users" | "/api/quick-queries" | "/api/sample-questions" | "/api/query"
            | "/api/quick-queries/run" | "/api/audit" | "/api/audit/export",
        ) => {
            error_response(405, "Method not allowed")
        }
        _ => error_response(404, "Not found"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::llm::TemplateGenerator;
    use crate::observability::ExecutionLogger;
    use crate::security::{Role, ScopeFilter, UserDirectory, UserRecord};

    fn assistant() -> QueryAssistant {
        let mut db = Database::open_in_memory().unwrap();
        db.load_csv_table(
            "students",
            "student_id,student_name,grade,section,region,attendance_percentage,parent_contact\n\
             1,Asha,Grade 6,A,North Delhi,71,9811111111\n\
             2,Ravi,Grade 7,B,South Delhi,72,9822222222\n"
                .as_bytes(),
        )
        .unwrap();
        let users = UserDirectory::from_records(vec![
            UserRecord::new("root", "Root", Role::SuperAdmin, "ALL", "ALL", "ALL"),
            UserRecord::new("six", "Six", Role::GradeCoordinator, "Grade 6", "ALL", "ALL"),
        ]);
        QueryAssistant::new(
            users,
            db,
            Box::new(TemplateGenerator::new()),
            ScopeFilter::default(),
            ExecutionLogger::default(),
        )
        .unwrap()
    }

    fn post(path: &str, body: &str) -> HttpRequest {
        HttpRequest::parse(&format!(
            "POST {} HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            path,
            body.len(),
            body
        ))
        .unwrap()
    }

    fn get(path: &str) -> HttpRequest {
        HttpRequest::parse(&format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path)).unwrap()
    }

    #[test]
    fn test_parse_request() {
        let req = HttpRequest::parse(
            "POST /api/query/?debug=1 HTTP/1.1\r\nContent-Length: 2\r\nX-Thing: a:b\r\n\r\n{}",
        )
        .unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.path, "/api/query");
        assert_eq!(req.content_length(), 2);
        assert_eq!(req.headers.get("x-thing").map(String::as_str), Some("a:b"));
        assert_eq!(req.body, "{}");
        assert!(HttpRequest::parse("").is_none());
    }

    #[test]
    fn test_response_format() {
        let http = HttpResponse::json(403, &json!({"error": "x"})).to_http();
        assert!(http.starts_with("HTTP/1.1 403 Forbidden\r\n"));
        assert!(http.contains("Access-Control-Allow-Origin: *"));
        assert!(http.ends_with("\r\n\r\n{\"error\":\"x\"}"));
    }

    #[tokio::test]
    async fn test_health_and_catalogue() {
        let assistant = assistant();
        let health = handle_request(&assistant, &get("/api/health")).await;
        assert_eq!(health.status, 200);
        assert_eq!(health.body_json()["generator"], "template");

        let queries = handle_request(&assistant, &get("/api/quick-queries")).await;
        assert_eq!(queries.body_json()["queries"].as_array().unwrap().len(), QUICK_QUERIES.len());

        let samples = handle_request(&assistant, &get("/api/sample-questions")).await;
        assert_eq!(samples.status, 200);
    }

    #[tokio::test]
    async fn test_users_and_scope() {
        let assistant = assistant();
        let users = handle_request(&assistant, &get("/api/users")).await;
        assert_eq!(users.body_json()["users"].as_array().unwrap().len(), 2);

        let scope = handle_request(&assistant, &get("/api/users/six/scope")).await;
        assert_eq!(scope.status, 200);
        assert_eq!(scope.body_json()["filter"], "grade IN ('Grade 6')");

        let missing = handle_request(&assistant, &get("/api/users/ghost/scope")).await;
        assert_eq!(missing.status, 403);
    }

    #[tokio::test]
    async fn test_query_is_scoped() {
        let assistant = assistant();
        let response = handle_request(
            &assistant,
            &post("/api/query", r#"{"username":"six","question":"students with low attendance"}"#),
        )
        .await;
        assert_eq!(response.status, 200, "{}", response.body);
        let body = response.body_json();
        assert_eq!(body["result"]["rows"].as_array().unwrap().len(), 1);
        assert_eq!(body["role"], "grade_coordinator");
        assert!(body["secured_sql"].as_str().unwrap().contains("s.grade IN ('Grade 6')"));
    }

    #[tokio::test]
    async fn test_unknown_user_is_forbidden() {
        let response = handle_request(
            &assistant(),
            &post("/api/query", r#"{"username":"ghost","question":"anything"}"#),
        )
        .await;
        assert_eq!(response.status, 403);
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let assistant = assistant();
        assert_eq!(handle_request(&assistant, &post("/api/query", "not json")).await.status, 400);
        assert_eq!(
            handle_request(&assistant, &post("/api/query", r#"{"username":"root","question":" "}"#))
                .await
                .status,
            400
        );
        assert_eq!(handle_request(&assistant, &get("/api/query")).await.status, 405);
        assert_eq!(handle_request(&assistant, &get("/nowhere")).await.status, 404);

        let options = HttpRequest::parse("OPTIONS /api/query HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(handle_request(&assistant, &options).await.status, 204);
    }

    #[tokio::test]
    async fn test_quick_query_route() {
        let assistant = assistant();
        let ok = handle_request(
            &assistant,
            &post("/api/quick-queries/run", r#"{"username":"root","name":"attendance_summary"}"#),
        )
        .await;
        assert_eq!(ok.status, 200, "{}", ok.body);

        let unknown = handle_request(
            &assistant,
            &post("/api/quick-queries/run", r#"{"username":"root","name":"bogus"}"#),
        )
        .await;
        assert_eq!(unknown.status, 404);
    }

    #[tokio::test]
    async fn test_csv_format() {
        let assistant = assistant();
        let response = handle_request(
            &assistant,
            &post(
                "/api/quick-queries/run",
                r#"{"username":"six","name":"low_attendance","format":"csv"}"#,
            ),
        )
        .await;
        assert_eq!(response.status, 200, "{}", response.body);
        assert_eq!(response.content_type, CSV_CONTENT_TYPE);
        assert!(response.to_http().contains("Content-Type: text/csv; charset=utf-8\r\n"));

        let lines: Vec<&str> = response.body.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("student_name"));
        assert!(lines[1].contains("Asha"));

        let json = handle_request(
            &assistant,
            &post("/api/query", r#"{"username":"six","question":"low attendance","format":"json"}"#),
        )
        .await;
        assert_eq!(json.content_type, JSON_CONTENT_TYPE);

        let bad = handle_request(
            &assistant,
            &post("/api/query", r#"{"username":"six","question":"x","format":"xlsx"}"#),
        )
        .await;
        assert_eq!(bad.status, 400);
    }

    #[tokio::test]
    async fn test_audit_reports_recent_activity() {
        let assistant = assistant();
        handle_request(
            &assistant,
            &post("/api/quick-queries/run", r#"{"username":"six","name":"low_attendance"}"#),
        )
        .await;
        handle_request(&assistant, &post("/api/query", r#"{"username":"ghost","question":"x"}"#)).await;

        let audit = handle_request(&assistant, &get("/api/audit")).await;
        assert_eq!(audit.status, 200);
        let body = audit.body_json();
        assert_eq!(body["access"]["granted"], 1);
        assert_eq!(body["access"]["denied"], 1);
        let recent = body["recent_queries"].as_array().unwrap();
        assert_eq!(recent[0]["username"], "ghost");
        assert_eq!(recent[0]["success"], false);

        let export = handle_request(&assistant, &get("/api/audit/export")).await;
        assert_eq!(export.status, 200);
        assert_eq!(export.body_json()["access_logs"].as_array().unwrap().len(), 2);

        let wrong_method = handle_request(&assistant, &post("/api/audit", "{}")).await;
        assert_eq!(wrong_method.status, 405);
    }

    #[tokio::test]
    async fn test_scope_username_is_percent_decoded() {
        let assistant = assistant();
        let scope = handle_request(&assistant, &get("/api/users/s%69x/scope")).await;
        assert_eq!(scope.status, 200, "{}", scope.body);
        assert_eq!(scope.body_json()["username"], "six");

        assert_eq!(scope_username("/api/users/ms%20rao/scope").as_deref(), Some("ms rao"));
        assert_eq!(scope_username("/api/users/%FF/scope"), None);
        assert_eq!(scope_username("/api/users/six"), None);
    }

    #[tokio::test]
    async fn test_read_request_with_body() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let raw = "POST /api/query HTTP/1.1\r\nContent-Length: 13\r\n\r\n{\"a\":\"bcdef\"}";
        let writer = tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(raw.as_bytes()).await.unwrap();
            client
        });

        let request = read_request(&mut server, Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(request.path, "/api/query");
        assert_eq!(request.body, "{\"a\":\"bcdef\"}");
        drop(writer.await.unwrap());
    }

    #[tokio::test]
    async fn test_read_request_times_out_on_stalled_client() {
        let (mut client, mut server) = tokio::io::duplex(64);
        {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"GET /api/health HTTP/1.1\r\nHost: x\r\n").await.unwrap();
        }

        let err = read_request(&mut server, Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        drop(client);
    }

    #[test]
    fn test_database_errors_keep_engine_message() {
        let response = error_to_response(&EduError::Database("no such column: foo".to_string()));
        assert_eq!(response.status, 422);
        assert_eq!(response.body_json()["detail"], "no such column: foo");
    }
}
