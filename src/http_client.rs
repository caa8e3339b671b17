use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{Config, HttpMethod};
use crate::error::{AuthError, Result};

/// A request before it is handed to reqwest, so interceptors can edit it
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: impl Into<Method>, path: &str) -> Self {
        Self {
            method: method.into(),
            path: path.to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: &str, body: Value) -> Self {
        Self::new(Method::POST, path).with_json(body)
    }

    /// Request for a configured endpoint
    pub fn endpoint(method: HttpMethod, path: &str) -> Self {
        Self::new(method, path)
    }

    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header, replacing any value under the same (case-insensitive) name
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.to_string()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Path without query string or fragment
    pub fn route(&self) -> &str {
        crate::router::route_path(&self.path)
    }
}

/// A fully read response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Parsed JSON; a non-JSON body is carried as a string, an empty one as null
    pub body: Value,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Edits every outgoing request
pub trait RequestInterceptor: Send + Sync {
    fn on_request(&self, request: &mut ApiRequest);
}

/// Observes every response, successful or not, before the caller sees it
pub trait ResponseInterceptor: Send + Sync {
    fn on_response(&self, request: &ApiRequest, response: &HttpResponse);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterceptorId(u64);

/// HTTP client bound to one API base URL, with interceptor registries
pub struct AuthHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,
    base_url: String,
    request_interceptors: Mutex<Vec<(InterceptorId, Arc<dyn RequestInterceptor>)>>,
    response_interceptors: Mutex<Vec<(InterceptorId, Arc<dyn ResponseInterceptor>)>>,
    next_id: AtomicU64,
}

impl AuthHttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str, connect_timeout: u64, request_timeout: u64) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            request_interceptors: Mutex::new(Vec::new()),
            response_interceptors: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            &config.base_url,
            config.http_connect_timeout,
            config.http_request_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn add_request_interceptor(&self, interceptor: Arc<dyn RequestInterceptor>) -> InterceptorId {
        let id = self.next_id();
        if let Ok(mut list) = self.request_interceptors.lock() {
            list.push((id, interceptor));
        }
        id
    }

    pub fn add_response_interceptor(
        &self,
        interceptor: Arc<dyn ResponseInterceptor>,
    ) -> InterceptorId {
        let id = self.next_id();
        if let Ok(mut list) = self.response_interceptors.lock() {
            list.push((id, interceptor));
        }
        id
    }

    /// Remove an interceptor of either kind; false if the id is unknown
    pub fn remove_interceptor(&self, id: InterceptorId) -> bool {
        let mut removed = false;
        if let Ok(mut list) = self.request_interceptors.lock() {
            let before = list.len();
            list.retain(|(i, _)| *i != id);
            removed |= list.len() != before;
        }
        if let Ok(mut list) = self.response_interceptors.lock() {
            let before = list.len();
            list.retain(|(i, _)| *i != id);
            removed |= list.len() != before;
        }
        removed
    }

    fn next_id(&self) -> InterceptorId {
        InterceptorId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub async fn get(&self, path: &str) -> Result<HttpResponse> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<HttpResponse> {
        self.send(ApiRequest::post(path, body)).await
    }

    /// Run request interceptors, execute, read the body and run response
    /// interceptors. Non-success statuses come back as errors.
    pub async fn send(&self, mut request: ApiRequest) -> Result<HttpResponse> {
        let request_interceptors: Vec<_> = match self.request_interceptors.lock() {
            Ok(list) => list.iter().map(|(_, i)| i.clone()).collect(),
            Err(_) => Vec::new(),
        };
        for interceptor in &request_interceptors {
            interceptor.on_request(&mut request);
        }

        let url = self.url_for(&request.path);
        tracing::debug!(method = %request.method, url = %url, "Sending HTTP request");

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(build_headers(&request.headers)?);
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                // Categorize the error for better debugging
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else {
                    "unknown"
                };
                tracing::warn!(
                    error_kind = error_kind,
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );
                return Err(AuthError::Network(e));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;
        let body = parse_body(&text);

        tracing::debug!(status = %status, url = %url, "Received HTTP response");

        let result = HttpResponse {
            status: status.as_u16(),
            headers,
            body,
        };

        let response_interceptors: Vec<_> = match self.response_interceptors.lock() {
            Ok(list) => list.iter().map(|(_, i)| i.clone()).collect(),
            Err(_) => Vec::new(),
        };
        for interceptor in &response_interceptors {
            interceptor.on_response(&request, &result);
        }

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), url = %url, "HTTP request failed with error response");
            return Err(AuthError::from_status(status, &url, &text));
        }

        Ok(result)
    }
}

fn build_headers(headers: &[(String, String)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AuthError::Config(format!("Invalid header name {}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| AuthError::Config(format!("Invalid value for header {}: {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct AddHeader;

    impl RequestInterceptor for AddHeader {
        fn on_request(&self, request: &mut ApiRequest) {
            request.set_header("X-Test", "1");
        }
    }

    struct CountStatus(std::sync::atomic::AtomicUsize, u16);

    impl ResponseInterceptor for CountStatus {
        fn on_response(&self, _request: &ApiRequest, response: &HttpResponse) {
            if response.status == self.1 {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_url_for() {
        let client = AuthHttpClient::new("http://localhost:8000/", 1, 1).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert_eq!(client.url_for("/auth/login"), "http://localhost:8000/auth/login");
        assert_eq!(client.url_for("auth/login"), "http://localhost:8000/auth/login");
        assert_eq!(client.url_for("https://other/x"), "https://other/x");
    }

    #[test]
    fn test_request_headers_case_insensitive() {
        let mut request = ApiRequest::get("/a?b=1").with_header("authorization", "x");
        request.set_header("Authorization", "y");
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("AUTHORIZATION"), Some("y"));
        assert_eq!(request.route(), "/a");
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("{\"a\":1}"), json!({"a": 1}));
        assert_eq!(parse_body("plain"), json!("plain"));
    }

    #[test]
    fn test_remove_interceptor() {
        let client = AuthHttpClient::new("http://localhost", 1, 1).unwrap();
        let id = client.add_request_interceptor(Arc::new(AddHeader));
        assert!(client.remove_interceptor(id));
        assert!(!client.remove_interceptor(id));
    }

    #[tokio::test]
    async fn test_send_runs_interceptors() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/ok")
            .match_header("x-test", "1")
            .with_status(200)
            .with_body("{\"ok\":true}")
            .create_async()
            .await;
        let _fail = server
            .mock("GET", "/fail")
            .with_status(401)
            .create_async()
            .await;

        let client = AuthHttpClient::new(&server.url(), 5, 5).unwrap();
        let counter = Arc::new(CountStatus(Default::default(), 401));
        client.add_request_interceptor(Arc::new(AddHeader));
        client.add_response_interceptor(counter.clone());

        let response = client.get("/ok").await.unwrap();
        assert_eq!(response.body, json!({"ok": true}));
        ok.assert_async().await;

        let err = client.get("/fail").await.unwrap_err();
        assert!(err.is_unauthorized());
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_status_carried() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/boom")
            .with_status(500)
            .with_body("server exploded")
            .create_async()
            .await;

        let client = AuthHttpClient::new(&server.url(), 5, 5).unwrap();
        let err = client.post("/boom", json!({})).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert!(err.to_string().contains("server exploded"));
    }
}
