//! Minimal HTTP/1.1 front end over tokio.
//!
//! Routes:
//! - `GET /` health check
//! - `POST /generate-sql` with `{"question": "..."}`
//!
//! Every request passes the per-client rate limiter first.

use crate::error::Text2SqlError;
use crate::pipeline::Text2SqlPipeline;
use crate::rate_limit::RateLimiter;
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

const MAX_REQUEST_BYTES: usize = 1_000_000;
const READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct AppState {
    pub pipeline: Text2SqlPipeline,
    pub limiter: RateLimiter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    fn error(status: u16, reason: &str, message: impl Into<String>) -> Self {
        Self::json(
            status,
            serde_json::json!({ "message": message.into(), "reason": reason }),
        )
    }

    pub fn with_header(mut self, name: &str, value: String) -> Self {
        self.headers.push((name.to_string(), value));
        self
    }

    pub fn to_http_string(&self) -> String {
        let mut extra = String::new();
        for (name, value) in &self.headers {
            extra.push_str(&format!("{}: {}\r\n", name, value));
        }
        format!(
            "HTTP/1.1 {} {}\r\n\
             Content-Type: application/json\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n\
             {}\
             \r\n\
             {}",
            self.status,
            status_text(self.status),
            self.body.len(),
            extra,
            self.body
        )
    }
}

#[derive(Debug, Deserialize)]
struct GenerateSqlRequest {
    question: String,
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        _ => "Internal Server Error",
    }
}

/// Parse a complete raw request. Returns `None` for anything that is not a
/// well-formed request line.
pub fn parse_request(raw: &str) -> Option<HttpRequest> {
    let (head, body) = raw.split_once("\r\n\r\n").unwrap_or((raw, ""));
    let mut lines = head.lines();

    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?;

    let path = target.split('?').next().unwrap_or(target);
    let mut path = path.trim_end_matches('/').to_string();
    if path.is_empty() {
        path = "/".to_string();
    }

    let headers = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    Some(HttpRequest {
        method,
        path,
        headers,
        body: body.to_string(),
    })
}

pub async fn handle_request(state: &AppState, request: &HttpRequest, client: &str) -> HttpResponse {
    let started = Instant::now();

    let response = if !state.limiter.allow(client) {
        warn!("Rate limit exceeded for {}", client);
        HttpResponse::error(429, Text2SqlError::RateLimited.reason_code(), "Too many requests")
    } else {
        route(state, request).await
    };

    response.with_header(
        "X-Process-Time",
        format!("{:.6}", started.elapsed().as_secs_f64()),
    )
}

async fn route(state: &AppState, request: &HttpRequest) -> HttpResponse {
    debug!("Request: {} {}", request.method, request.path);

    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/") => HttpResponse::json(
            200,
            serde_json::json!({
                "status": "ok",
                "message": "Text2SQL API running.",
                "schema": state.pipeline.schema().version,
            }),
        ),
        ("POST", "/generate-sql") => generate_sql(state, &request.body).await,
        (_, "/") | (_, "/generate-sql") => {
            HttpResponse::error(405, "MethodNotAllowed", "Method not allowed")
        }
        _ => HttpResponse::error(404, "NotFound", "Not found"),
    }
}

async fn generate_sql(state: &AppState, body: &str) -> HttpResponse {
    let request: GenerateSqlRequest = match serde_json::from_str(body.trim()) {
        Ok(request) => request,
        Err(e) => {
            return HttpResponse::error(400, "InvalidRequest", format!("Invalid request body: {}", e))
        }
    };

    if request.question.trim().is_empty() {
        return HttpResponse::error(400, "InvalidRequest", "Field 'question' must not be empty");
    }

    match state.pipeline.generate_and_execute(&request.question).await {
        Ok(response) => match serde_json::to_value(&response) {
            Ok(body) => HttpResponse::json(200, body),
            Err(e) => HttpResponse::error(500, "InternalError", format!("Internal error: {}", e)),
        },
        Err(e) => {
            if e.status_code() >= 500 {
                error!("Request failed: {}", e);
            }
            HttpResponse::error(e.status_code(), e.reason_code(), e.to_string())
        }
    }
}

/// True once the buffer holds the headers and a body of `Content-Length` bytes.
fn request_complete(buffer: &[u8]) -> bool {
    let text = String::from_utf8_lossy(buffer);
    let Some(headers_end) = text.find("\r\n\r\n") else {
        return false;
    };
    let content_length = text[..headers_end]
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    buffer.len() >= headers_end + 4 + content_length
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if request_complete(&buffer) || buffer.len() > MAX_REQUEST_BYTES {
            break;
        }
    }

    Ok(buffer)
}

pub async fn handle_connection(state: Arc<AppState>, mut stream: TcpStream, addr: SocketAddr) {
    let buffer = match tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(buffer)) => buffer,
        Ok(Err(e)) => {
            warn!("Failed to read from {}: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("Request read timeout from {}", addr);
            return;
        }
    };

    if buffer.is_empty() {
        return;
    }

    let response = match std::str::from_utf8(&buffer).ok().and_then(parse_request) {
        Some(request) => handle_request(&state, &request, &addr.ip().to_string()).await,
        None => HttpResponse::error(400, "InvalidRequest", "Malformed HTTP request"),
    };

    if let Err(e) = stream.write_all(response.to_http_string().as_bytes()).await {
        warn!("Failed to write response to {}: {}", addr, e);
    }
}

/// Accept loop. Also sweeps idle rate-limit entries once per window.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(limiter.window().max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            limiter.sweep();
        }
    });

    info!("Server listening on {}", listener.local_addr()?);
    loop {
        let (stream, addr) = listener.accept().await?;
        debug!("New connection from: {}", addr);
        tokio::spawn(handle_connection(state.clone(), stream, addr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Executor, QueryRunner, ResultSet};
    use crate::error::Result;
    use crate::llm::SqlGenerator;
    use crate::prompt::SchemaContext;
    use crate::validator::QueryValidator;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct FixedGenerator(&'static str);

    #[async_trait]
    impl SqlGenerator for FixedGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingRunner;

    #[async_trait]
    impl QueryRunner for FailingRunner {
        async fn fetch(&self, _sql: &str) -> Result<ResultSet> {
            Err(Text2SqlError::Database("relation \"nope\" does not exist".to_string()))
        }
    }

    struct OneRowRunner;

    #[async_trait]
    impl QueryRunner for OneRowRunner {
        async fn fetch(&self, _sql: &str) -> Result<ResultSet> {
            Ok(ResultSet::new(vec!["city_name".to_string()], vec![vec![json!("Berlin")]]))
        }
    }

    fn state(sql: &'static str, runner: Arc<dyn QueryRunner>, limit: u32) -> AppState {
        AppState {
            pipeline: Text2SqlPipeline::new(
                Arc::new(FixedGenerator(sql)),
                QueryValidator::default(),
                Executor::new(runner, Duration::from_secs(1)),
                SchemaContext::builtin(),
            ),
            limiter: RateLimiter::new(limit, Duration::from_secs(60), 100),
        }
    }

    fn post(body: &str) -> HttpRequest {
        let raw = format!(
            "POST /generate-sql HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        );
        parse_request(&raw).unwrap()
    }

    fn body(response: &HttpResponse) -> Value {
        serde_json::from_str(&response.body).unwrap()
    }

    #[test]
    fn test_parse_request() {
        let request = parse_request("GET /generate-sql/?x=1 HTTP/1.1\r\nX-Test: yes\r\n\r\n").unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/generate-sql");
        assert_eq!(request.headers.get("x-test").map(String::as_str), Some("yes"));
        assert!(parse_request("").is_none());
    }

    #[test]
    fn test_request_complete() {
        assert!(!request_complete(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nab"));
        assert!(request_complete(b"POST / HTTP/1.1\r\nContent-Length: 4\r\n\r\nabcd"));
        assert!(request_complete(b"GET / HTTP/1.1\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_health() {
        let state = state("SELECT 1", Arc::new(OneRowRunner), 5);
        let request = parse_request("GET / HTTP/1.1\r\n\r\n").unwrap();
        let response = handle_request(&state, &request, "127.0.0.1").await;
        assert_eq!(response.status, 200);
        assert_eq!(body(&response)["status"], "ok");
        assert!(response.headers.iter().any(|(k, _)| k == "X-Process-Time"));
    }

    #[tokio::test]
    async fn test_generate_sql_success() {
        let state = state("SELECT city_name FROM cities", Arc::new(OneRowRunner), 5);
        let response = handle_request(&state, &post(r#"{"question":"list cities"}"#), "127.0.0.1").await;

        assert_eq!(response.status, 200);
        let body = body(&response);
        assert_eq!(body["validated_query"], "SELECT city_name FROM cities LIMIT 1000;");
        assert_eq!(body["rows"], json!([{"city_name": "Berlin"}]));
        assert!(response.to_http_string().starts_with("HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn test_validation_failure_is_400() {
        let state = state("DELETE FROM orders", Arc::new(OneRowRunner), 5);
        let response = handle_request(&state, &post(r#"{"question":"wipe"}"#), "127.0.0.1").await;

        assert_eq!(response.status, 400);
        assert_eq!(body(&response)["reason"], "NotASelectStatement");
    }

    #[tokio::test]
    async fn test_execution_failure_is_500() {
        let state = state("SELECT * FROM nope", Arc::new(FailingRunner), 5);
        let response = handle_request(&state, &post(r#"{"question":"?"}"#), "127.0.0.1").await;

        assert_eq!(response.status, 500);
        assert_eq!(body(&response)["reason"], "ExecutionFailed");
    }

    #[tokio::test]
    async fn test_bad_body_and_unknown_route() {
        let state = state("SELECT 1", Arc::new(OneRowRunner), 5);

        let response = handle_request(&state, &post("not json"), "127.0.0.1").await;
        assert_eq!(response.status, 400);

        let response = handle_request(&state, &post(r#"{"question":"   "}"#), "127.0.0.1").await;
        assert_eq!(response.status, 400);

        let request = parse_request("GET /nowhere HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(handle_request(&state, &request, "127.0.0.1").await.status, 404);

        let request = parse_request("GET /generate-sql HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(handle_request(&state, &request, "127.0.0.1").await.status, 405);
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let state = state("SELECT 1", Arc::new(OneRowRunner), 1);
        let request = parse_request("GET / HTTP/1.1\r\n\r\n").unwrap();

        assert_eq!(handle_request(&state, &request, "10.0.0.7").await.status, 200);
        let response = handle_request(&state, &request, "10.0.0.7").await;
        assert_eq!(response.status, 429);
        assert_eq!(body(&response)["reason"], "RateLimited");
        assert_eq!(handle_request(&state, &request, "10.0.0.8").await.status, 200);
    }
}
