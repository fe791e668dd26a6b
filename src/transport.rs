//! The single client through which every call to the grade service goes.
//!
//! The transport reads the persisted bearer token at send time, attaches it,
//! and turns failures into [`ApiError`]s. A 401 on an authenticated call
//! clears the persisted session and notifies invalidation subscribers before
//! the error is returned to the caller.

use crate::error::{ApiError, ApiResult};
use crate::http::{HttpBackend, HttpRequest, HttpResponse, Method};
use crate::storage::{self, KeyValueStore};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/api";
/// Generous enough for a service that sleeps when idle
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// One outgoing call, relative to the configured base address
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Auth exchanges (login/register) never carry a token, and a 401 on them
    /// is a credentials problem rather than an expired session.
    pub anonymous: bool,
    pub accept: &'static str,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            anonymous: false,
            accept: "application/json",
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn query_opt(self, key: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(v) => self.query(key, v),
            None => self,
        }
    }

    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> ApiResult<Self> {
        let bytes = serde_json::to_vec(body).map_err(|source| ApiError::Encode {
            path: self.path.clone(),
            source,
        })?;
        self.body = Some(bytes);
        Ok(self)
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = accept;
        self
    }
}

/// Emitted when the server rejects the persisted token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub method: Method,
    pub path: String,
}

type InvalidationListener = Rc<dyn Fn(&Invalidation)>;

pub struct Transport {
    base_url: String,
    timeout: Duration,
    backend: Box<dyn HttpBackend>,
    storage: Rc<dyn KeyValueStore>,
    listeners: RefCell<Vec<InvalidationListener>>,
}

impl Transport {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        backend: Box<dyn HttpBackend>,
        storage: Rc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            backend,
            storage,
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Register a callback for forced session invalidation (401 on an authenticated call)
    pub fn subscribe(&self, listener: impl Fn(&Invalidation) + 'static) {
        self.listeners.borrow_mut().push(Rc::new(listener));
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn current_token(&self) -> Option<String> {
        match storage::read_token(self.storage.as_ref()) {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "could not read persisted token; sending without it");
                None
            }
        }
    }

    /// Send a request and return the raw response when the status is 2xx
    pub fn execute(&self, req: ApiRequest) -> ApiResult<HttpResponse> {
        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), req.accept.to_string()),
        ];
        let token = if req.anonymous {
            None
        } else {
            self.current_token()
        };
        let has_auth = token.is_some();
        if let Some(token) = token {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }

        let http_req = HttpRequest {
            method: req.method,
            url: self.url(&req.path),
            query: req.query,
            headers,
            body: req.body,
            timeout: self.timeout,
        };
        debug!(method = %req.method, path = %req.path, has_auth, "api request");

        let resp = match self.backend.send(&http_req) {
            Ok(resp) => resp,
            Err(failure) => {
                let err = ApiError::transport(failure.kind, failure.detail);
                warn!(method = %req.method, path = %req.path, error = %err, "api request failed");
                return Err(err);
            }
        };

        debug!(
            method = %req.method,
            path = %req.path,
            status = resp.status,
            content_type = resp.content_type.as_deref().unwrap_or("-"),
            bytes = resp.body.len(),
            "api response"
        );
        if resp.is_success() {
            return Ok(resp);
        }

        let err = ApiError::status(resp.status, &resp.body);
        warn!(method = %req.method, path = %req.path, error = %err, "api error response");

        if err.is_unauthorized() && !req.anonymous {
            self.invalidate(Invalidation {
                method: req.method,
                path: req.path,
            });
        }
        Err(err)
    }

    /// Clear the persisted session, then tell subscribers. Safe to repeat.
    fn invalidate(&self, event: Invalidation) {
        if let Err(e) = storage::clear_session(self.storage.as_ref()) {
            warn!(error = %e, "failed to clear persisted session");
        }
        // Snapshot so a listener may subscribe or issue requests without a borrow conflict
        let listeners: Vec<InvalidationListener> = self.listeners.borrow().clone();
        for listener in listeners {
            listener(&event);
        }
    }

    pub fn json<T: DeserializeOwned>(&self, req: ApiRequest) -> ApiResult<T> {
        let path = req.path.clone();
        let resp = self.execute(req)?;
        serde_json::from_slice(&resp.body).map_err(|source| ApiError::Decode { path, source })
    }

    /// For calls whose response body is ignored
    pub fn send(&self, req: ApiRequest) -> ApiResult<()> {
        self.execute(req).map(|_| ())
    }

    /// Response body as text; JSON strings are unwrapped
    pub fn text(&self, req: ApiRequest) -> ApiResult<String> {
        let resp = self.execute(req)?;
        let raw = String::from_utf8_lossy(&resp.body).into_owned();
        Ok(match serde_json::from_str::<String>(&raw) {
            Ok(s) => s,
            Err(_) => raw,
        })
    }

    pub fn bytes(&self, req: ApiRequest) -> ApiResult<Vec<u8>> {
        Ok(self.execute(req)?.body)
    }
}
