//! Raw HTTP exchange behind a trait so the transport can be driven by a stub.
//!
//! A backend returns `Ok` for every response that arrived, whatever its status,
//! and `Err` only when nothing came back.

use crate::error::TransportKind;
use std::io::Read;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
}

#[cfg(test)]
impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A send that produced no response
#[derive(Debug, Clone)]
pub struct SendFailure {
    pub kind: TransportKind,
    pub detail: String,
}

/// Trait for HTTP backends to allow mocking and abstraction
pub trait HttpBackend {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, SendFailure>;
}

pub struct UreqBackend {
    agent: ureq::Agent,
}

impl UreqBackend {
    pub fn new() -> Self {
        // No cookie store: credentials only travel in the Authorization header
        Self {
            agent: ureq::AgentBuilder::new().redirects(5).build(),
        }
    }
}

impl Default for UreqBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpBackend for UreqBackend {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, SendFailure> {
        let mut req = self
            .agent
            .request(request.method.as_str(), &request.url)
            .timeout(request.timeout);
        for (k, v) in &request.query {
            req = req.query(k, v);
        }
        for (k, v) in &request.headers {
            req = req.set(k, v);
        }

        let result = match &request.body {
            Some(body) => req.send_bytes(body),
            None => req.call(),
        };

        let resp = match result {
            Ok(r) => r,
            Err(ureq::Error::Status(_, r)) => r,
            Err(ureq::Error::Transport(t)) => {
                return Err(SendFailure {
                    kind: transport_kind(&t),
                    detail: t.to_string(),
                })
            }
        };

        let status = resp.status();
        let content_type = resp.header("content-type").map(str::to_string);
        let mut body = Vec::new();
        resp.into_reader()
            .read_to_end(&mut body)
            .map_err(|e| SendFailure {
                kind: io_kind(&e).unwrap_or(TransportKind::ResponseLost),
                detail: format!("failed to read response body: {}", e),
            })?;

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}

fn io_kind(e: &std::io::Error) -> Option<TransportKind> {
    match e.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            Some(TransportKind::TimedOut)
        }
        _ => None,
    }
}

/// Map a ureq transport error onto the failure kinds the taxonomy knows about
fn transport_kind(t: &ureq::Transport) -> TransportKind {
    // Timeouts surface as io errors somewhere down the source chain,
    // whatever the reported kind.
    let mut source = std::error::Error::source(t);
    while let Some(err) = source {
        if let Some(kind) = err.downcast_ref::<std::io::Error>().and_then(io_kind) {
            return kind;
        }
        source = err.source();
    }

    match t.kind() {
        ureq::ErrorKind::Dns
        | ureq::ErrorKind::ConnectionFailed
        | ureq::ErrorKind::ProxyConnect => TransportKind::ConnectFailed,
        ureq::ErrorKind::Io => TransportKind::ResponseLost,
        _ => TransportKind::Other,
    }
}

#[cfg(test)]
pub mod stub {
    //! Recording backend for transport and session tests.

    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    #[derive(Default)]
    pub struct StubBackend {
        responses: RefCell<VecDeque<Result<HttpResponse, SendFailure>>>,
        pub requests: RefCell<Vec<HttpRequest>>,
    }

    impl StubBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn push_json(&self, status: u16, body: serde_json::Value) {
            self.responses.borrow_mut().push_back(Ok(HttpResponse {
                status,
                content_type: Some("application/json".to_string()),
                body: body.to_string().into_bytes(),
            }));
        }

        pub fn push_bytes(&self, status: u16, content_type: &str, body: &[u8]) {
            self.responses.borrow_mut().push_back(Ok(HttpResponse {
                status,
                content_type: Some(content_type.to_string()),
                body: body.to_vec(),
            }));
        }

        pub fn push_failure(&self, kind: TransportKind) {
            self.responses.borrow_mut().push_back(Err(SendFailure {
                kind,
                detail: "stubbed failure".to_string(),
            }));
        }

        pub fn request_count(&self) -> usize {
            self.requests.borrow().len()
        }

        pub fn last_request(&self) -> HttpRequest {
            self.requests
                .borrow()
                .last()
                .cloned()
                .expect("no request was sent")
        }
    }

    impl HttpBackend for StubBackend {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, SendFailure> {
            self.requests.borrow_mut().push(request.clone());
            self.responses
                .borrow_mut()
                .pop_front()
                .expect("unexpected request with no stubbed response")
        }
    }

    /// Lets a test keep a handle on the stub after handing it to a transport
    impl HttpBackend for std::rc::Rc<StubBackend> {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, SendFailure> {
            self.as_ref().send(request)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    fn request(url: String, timeout: Duration) -> HttpRequest {
        HttpRequest {
            method: Method::Get,
            url,
            query: vec![("page".to_string(), "0".to_string())],
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("Authorization".to_string(), "Bearer t1".to_string()),
            ],
            body: None,
            timeout,
        }
    }

    /// Serve one canned response and hand back the request head that was received
    fn serve_once(status_line: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut head = String::new();
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                head.push_str(&line);
            }
            let resp = format!(
                "{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            stream.write_all(resp.as_bytes()).unwrap();
            head
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_ureq_sends_headers_and_query() {
        let (base, handle) = serve_once("HTTP/1.1 200 OK", r#"{"ok":true}"#);
        let resp = UreqBackend::new()
            .send(&request(format!("{}/students", base), Duration::from_secs(5)))
            .unwrap();
        let head = handle.join().unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, br#"{"ok":true}"#);
        assert_eq!(resp.content_type.as_deref(), Some("application/json"));
        assert!(head.starts_with("GET /students?page=0 HTTP/1.1"));
        assert!(head
            .lines()
            .any(|l| l.eq_ignore_ascii_case("authorization: Bearer t1")));
    }

    #[test]
    fn test_ureq_error_status_is_a_response() {
        let (base, handle) = serve_once("HTTP/1.1 401 Unauthorized", r#"{"error":"Unauthorized"}"#);
        let resp = UreqBackend::new()
            .send(&request(format!("{}/grades", base), Duration::from_secs(5)))
            .unwrap();
        handle.join().unwrap();
        assert_eq!(resp.status, 401);
        assert!(!resp.is_success());
    }

    #[test]
    fn test_ureq_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let addr = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap();
        let err = UreqBackend::new()
            .send(&request(format!("http://{}/students", addr), Duration::from_secs(5)))
            .unwrap_err();
        assert_eq!(err.kind, TransportKind::ConnectFailed);
    }

    #[test]
    fn test_ureq_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            // Accept and hold the connection open without answering
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(1500));
            drop(stream);
        });
        let err = UreqBackend::new()
            .send(&request(format!("http://{}/statistics", addr), Duration::from_millis(200)))
            .unwrap_err();
        handle.join().unwrap();
        assert_eq!(err.kind, TransportKind::TimedOut);
    }

    #[test]
    fn test_ureq_connection_dropped_before_response() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            // Read the request head, then hang up without answering
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
            }
            drop(stream);
        });
        let err = UreqBackend::new()
            .send(&request(format!("http://{}/courses", addr), Duration::from_secs(5)))
            .unwrap_err();
        handle.join().unwrap();
        assert_eq!(err.kind, TransportKind::ResponseLost);
    }

    #[test]
    fn test_ureq_invalid_url() {
        let err = UreqBackend::new()
            .send(&request("not a url".to_string(), Duration::from_secs(1)))
            .unwrap_err();
        assert_eq!(err.kind, TransportKind::Other);
    }
}
