//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! # Volcano Web Client
//!
//! Pooled keep-alive HTTP/1.1 sessions towards the game's back end. A
//! [`HttpSession`] owns one TCP-or-TLS stream and performs one
//! request/response exchange at a time; a [`HttpSessionPool`] bounds how
//! many sessions exist per [`HttpTarget`]; the process-wide
//! [`session_pools`] directory shares pools between clients of the same
//! endpoint.
//!
//! Every phase of an exchange (connect, write, read) is guarded by the same
//! timeout, and a timed-out or errored session is closed rather than
//! recycled, so the pool only ever hands out streams in a known state.

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(
    clippy::option_if_let_else,
    clippy::module_name_repetitions,
    clippy::missing_errors_doc
)]

mod client;
mod target;

pub use self::client::{session_pools, HttpClient, HttpSession, HttpSessionPool, HttpSessionPools};
pub use self::target::parse_http_target;

use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_rustls::rustls::ClientConfig;

/// Result type for web client operations.
pub type WebResult<T> = Result<T, WebError>;

/// Errors surfaced by the web client.
#[derive(Debug, Error)]
pub enum WebError {
    /// A phase of the exchange exceeded its deadline.
    #[error("timed out")]
    Timeout,

    /// The underlying stream failed; the session has been closed.
    #[error("I/O error: {0}")]
    Io(String),

    /// The peer's response could not be parsed.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The URL could not be parsed or uses an unsupported scheme.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// Host name resolution failed.
    #[error("host resolution failed: {0}")]
    Resolve(String),

    /// The session pool is unusable.
    #[error("resource unavailable, try again later")]
    PoolClosed,
}

/// The URL scheme of a target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpScheme {
    /// Plain HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

impl HttpScheme {
    /// The default port for this scheme.
    pub fn default_port(self) -> u16 {
        match self {
            HttpScheme::Http => 80,
            HttpScheme::Https => 443,
        }
    }
}

/// One resolved HTTP endpoint.
///
/// Equality and hashing key the pool directory and deliberately ignore the
/// host header: two URLs resolving to the same scheme/address/port share a
/// pool.
#[derive(Clone, Debug)]
pub struct HttpTarget {
    /// Plain or TLS.
    pub scheme: HttpScheme,
    /// Resolved peer address.
    pub address: IpAddr,
    /// Peer port.
    pub port: u16,
    /// The `Host` header value: bracketed for IPv6, with an explicit port
    /// only when non-default.
    pub host_header: String,
}

impl HttpTarget {
    /// The value for the `Host` header.
    pub fn host(&self) -> String {
        if self.host_header.is_empty() {
            self.address.to_string()
        } else {
            self.host_header.clone()
        }
    }

    /// The host portion of the host header, suitable for SNI: brackets and
    /// any port suffix removed.
    pub fn sni_host(&self) -> String {
        let host = self.host();
        if let Some(stripped) = host.strip_prefix('[') {
            if let Some(end) = stripped.find(']') {
                return stripped[..end].to_owned();
            }
        }
        match host.rfind(':') {
            Some(colon) if host.find(':') == Some(colon) => {
                let port = &host[colon + 1..];
                if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
                    return host[..colon].to_owned();
                }
                host
            }
            _ => host,
        }
    }
}

impl PartialEq for HttpTarget {
    fn eq(&self, other: &HttpTarget) -> bool {
        self.scheme == other.scheme && self.address == other.address && self.port == other.port
    }
}

impl Eq for HttpTarget {}

impl Hash for HttpTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.scheme.hash(state);
        self.address.hash(state);
        self.port.hash(state);
    }
}

/// Per-pool tuning knobs.
#[derive(Clone)]
pub struct HttpPoolOptions {
    /// Upper bound on sessions per target, in flight plus idle.
    pub max_sessions: usize,
    /// TLS configuration for HTTPS targets; the verifying default when
    /// absent.
    pub tls_config: Option<Arc<ClientConfig>>,
    /// Timeout applied to each request phase when the caller passes none.
    pub request_timeout: Duration,
}

impl Default for HttpPoolOptions {
    fn default() -> HttpPoolOptions {
        HttpPoolOptions {
            max_sessions: 8,
            tls_config: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// An HTTP/1.1 request under construction.
#[derive(Clone, Debug)]
pub struct HttpRequest {
    /// Request method, upper case.
    pub method: String,
    /// Request target path (plus query).
    pub path: String,
    headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// A request with the given method and path.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> HttpRequest {
        HttpRequest {
            method: method.into(),
            path: path.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// A GET request.
    pub fn get(path: impl Into<String>) -> HttpRequest {
        HttpRequest::new("GET", path)
    }

    /// A POST request.
    pub fn post(path: impl Into<String>) -> HttpRequest {
        HttpRequest::new("POST", path)
    }

    /// Look up a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a header, replacing any previous value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    /// All headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Set a JSON body and the matching content type.
    pub fn set_json(&mut self, value: &serde_json::Value) -> &mut Self {
        self.set_header("Content-Type", "application/json");
        self.body = value.to_string().into_bytes();
        self
    }

    /// Serialize as HTTP/1.1, forcing keep-alive and a `Host` header when
    /// the request does not carry them.
    pub(crate) fn serialize(&self, host: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(256 + self.body.len());
        out.extend_from_slice(self.method.as_bytes());
        out.push(b' ');
        out.extend_from_slice(self.path.as_bytes());
        out.extend_from_slice(b" HTTP/1.1\r\n");

        if self.header("Host").is_none() {
            out.extend_from_slice(format!("Host: {host}\r\n").as_bytes());
        }
        if self.header("Connection").is_none() {
            out.extend_from_slice(b"Connection: keep-alive\r\n");
        }
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        if !self.body.is_empty() || self.method == "POST" || self.method == "PUT" {
            out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(&self.body);
        out
    }
}

/// A parsed HTTP/1.1 response.
#[derive(Clone, Debug, Default)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub(crate) fn with_headers(
        status: u16,
        reason: String,
        headers: Vec<(String, String)>,
    ) -> HttpResponse {
        HttpResponse {
            status,
            reason,
            headers,
            body: Vec::new(),
        }
    }

    /// Look up a header, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the peer allows this connection to be reused.
    pub fn keep_alive(&self) -> bool {
        match self.header("Connection") {
            Some(value) => !value.eq_ignore_ascii_case("close"),
            None => true,
        }
    }

    /// Parse the body as JSON.
    pub fn json(&self) -> WebResult<serde_json::Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| WebError::MalformedResponse(format!("body is not JSON: {e}")))
    }
}
