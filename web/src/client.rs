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

use crate::{HttpPoolOptions, HttpRequest, HttpResponse, HttpScheme, HttpTarget, WebError, WebResult};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use volcano_net::{connect, AnyStream, ConnectOptions, TransportMode};

/// How much to read from the socket per call while assembling a response.
const READ_CHUNK: usize = 8 * 1024;
/// Hard ceiling on a response head plus body.
const MAX_RESPONSE: usize = 16 * 1024 * 1024;

/// One keep-alive session to a target.
///
/// The stream is dialed lazily on the first request and recycled through the
/// pool while the peer allows reuse.
pub struct HttpSession {
    target: HttpTarget,
    tls_config: Option<Arc<tokio_rustls::rustls::ClientConfig>>,
    stream: Option<AnyStream>,
    residual: Vec<u8>,
}

impl HttpSession {
    /// A session that will dial `target` on first use.
    pub fn new(
        target: HttpTarget,
        tls_config: Option<Arc<tokio_rustls::rustls::ClientConfig>>,
    ) -> HttpSession {
        HttpSession {
            target,
            tls_config,
            stream: None,
            residual: Vec::new(),
        }
    }

    /// The session's endpoint.
    pub fn target(&self) -> &HttpTarget {
        &self.target
    }

    /// Whether a live stream is attached.
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Drop the stream; the next request redials.
    pub fn close(&mut self) {
        self.stream = None;
        self.residual.clear();
    }

    async fn connect(&mut self, timeout: Option<Duration>) -> WebResult<()> {
        if self.is_open() {
            return Ok(());
        }

        let transport = match self.target.scheme {
            HttpScheme::Http => TransportMode::Plain,
            HttpScheme::Https => TransportMode::Tls {
                server_name: self.target.sni_host(),
            },
        };
        let options = ConnectOptions {
            transport,
            timeout,
            tls_config: self.tls_config.clone(),
        };
        let addr = SocketAddr::new(self.target.address, self.target.port);
        let stream = connect(addr, options).await.map_err(|err| match err {
            volcano_net::NetError::Timeout => WebError::Timeout,
            other => WebError::Io(other.to_string()),
        })?;
        trace!(peer = %addr, "http session connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Perform one request/response exchange.
    ///
    /// Connect, write and read are each guarded by `timeout`. A timeout or
    /// I/O failure closes the session before surfacing the error; a
    /// `Connection: close` response closes it after the exchange.
    pub async fn request(
        &mut self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> WebResult<HttpResponse> {
        self.connect(timeout).await?;

        let wire = request.serialize(&self.target.host());
        let write = async {
            let stream = self.stream.as_mut().ok_or(WebError::PoolClosed)?;
            stream
                .write_all(&wire)
                .await
                .map_err(|e| WebError::Io(e.to_string()))
        };
        if let Err(err) = guard(timeout, write).await {
            self.close();
            return Err(err);
        }

        match guard(timeout, self.read_response()).await {
            Ok(response) => {
                if !response.keep_alive() {
                    self.close();
                }
                Ok(response)
            }
            Err(err) => {
                self.close();
                Err(err)
            }
        }
    }

    async fn read_response(&mut self) -> WebResult<HttpResponse> {
        let mut buffer = std::mem::take(&mut self.residual);

        // assemble the head
        let (mut response, body_start, body_framing) = loop {
            if let Some(parsed) = parse_head(&buffer)? {
                break parsed;
            }
            if buffer.len() > MAX_RESPONSE {
                return Err(WebError::MalformedResponse("response head too large".into()));
            }
            self.read_more(&mut buffer).await?;
        };

        // then the body
        let mut body = buffer.split_off(body_start);
        match body_framing {
            BodyFraming::Length(length) => {
                while body.len() < length {
                    if body.len() > MAX_RESPONSE {
                        return Err(WebError::MalformedResponse("response body too large".into()));
                    }
                    self.read_more(&mut body).await?;
                }
                self.residual = body.split_off(length);
                response.body = body;
            }
            BodyFraming::Chunked => {
                let (decoded, residual) = self.read_chunked(body).await?;
                response.body = decoded;
                self.residual = residual;
            }
            BodyFraming::UntilClose => {
                loop {
                    if body.len() > MAX_RESPONSE {
                        return Err(WebError::MalformedResponse("response body too large".into()));
                    }
                    let stream = self.stream.as_mut().ok_or(WebError::PoolClosed)?;
                    let mut chunk = [0u8; READ_CHUNK];
                    match stream.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => body.extend_from_slice(&chunk[..n]),
                        Err(e) => return Err(WebError::Io(e.to_string())),
                    }
                }
                response.body = body;
                // the peer is done with this stream
                self.stream = None;
            }
        }

        Ok(response)
    }

    async fn read_more(&mut self, buffer: &mut Vec<u8>) -> WebResult<()> {
        let stream = self.stream.as_mut().ok_or(WebError::PoolClosed)?;
        let mut chunk = [0u8; READ_CHUNK];
        match stream.read(&mut chunk).await {
            Ok(0) => Err(WebError::Io("connection closed mid-response".into())),
            Ok(n) => {
                buffer.extend_from_slice(&chunk[..n]);
                Ok(())
            }
            Err(e) => Err(WebError::Io(e.to_string())),
        }
    }

    /// Decode a chunked body. Returns the decoded bytes and any residual
    /// input past the terminating chunk.
    async fn read_chunked(&mut self, mut input: Vec<u8>) -> WebResult<(Vec<u8>, Vec<u8>)> {
        let mut decoded = Vec::new();
        loop {
            // find the chunk-size line
            let line_end = loop {
                if let Some(pos) = find_crlf(&input) {
                    break pos;
                }
                self.read_more(&mut input).await?;
            };
            let size_text = String::from_utf8_lossy(&input[..line_end]);
            let size_text = size_text.split(';').next().unwrap_or_default().trim().to_owned();
            let size = usize::from_str_radix(&size_text, 16)
                .map_err(|_| WebError::MalformedResponse(format!("bad chunk size: {size_text}")))?;
            input.drain(..line_end + 2);

            // chunk data plus its trailing CRLF
            while input.len() < size + 2 {
                if decoded.len() + input.len() > MAX_RESPONSE {
                    return Err(WebError::MalformedResponse("response body too large".into()));
                }
                self.read_more(&mut input).await?;
            }
            decoded.extend_from_slice(&input[..size]);
            input.drain(..size + 2);

            if size == 0 {
                return Ok((decoded, input));
            }
        }
    }
}

fn find_crlf(data: &[u8]) -> Option<usize> {
    data.windows(2).position(|pair| pair == b"\r\n")
}

/// How the response body is delimited.
enum BodyFraming {
    Length(usize),
    Chunked,
    UntilClose,
}

/// Parse a response head out of `buffer`. Returns `None` while incomplete.
fn parse_head(buffer: &[u8]) -> WebResult<Option<(HttpResponse, usize, BodyFraming)>> {
    let mut header_storage = [httparse::EMPTY_HEADER; 64];
    let mut parsed = httparse::Response::new(&mut header_storage);
    match parsed.parse(buffer) {
        Ok(httparse::Status::Complete(body_start)) => {
            let status = parsed.code.unwrap_or(0);
            let reason = parsed.reason.unwrap_or_default().to_owned();
            let headers: Vec<(String, String)> = parsed
                .headers
                .iter()
                .map(|h| {
                    (
                        h.name.to_owned(),
                        String::from_utf8_lossy(h.value).into_owned(),
                    )
                })
                .collect();
            let response = HttpResponse::with_headers(status, reason, headers);

            let framing = if response
                .header("Transfer-Encoding")
                .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
            {
                BodyFraming::Chunked
            } else if let Some(length) = response.header("Content-Length") {
                let length = length
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| WebError::MalformedResponse("bad content length".into()))?;
                BodyFraming::Length(length)
            } else if response.keep_alive() {
                BodyFraming::Length(0)
            } else {
                BodyFraming::UntilClose
            };

            Ok(Some((response, body_start, framing)))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(WebError::MalformedResponse(e.to_string())),
    }
}

async fn guard<T>(
    timeout: Option<Duration>,
    work: impl std::future::Future<Output = WebResult<T>>,
) -> WebResult<T> {
    match timeout {
        Some(deadline) => match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => Err(WebError::Timeout),
        },
        None => work.await,
    }
}

/// A bounded pool of sessions for one target.
///
/// `created` counts every session currently out in the world, in flight or
/// idle; it never exceeds `max_sessions` and is always restored when a
/// session dies.
pub struct HttpSessionPool {
    target: HttpTarget,
    options: HttpPoolOptions,
    created: Mutex<usize>,
    idle_tx: mpsc::Sender<HttpSession>,
    idle_rx: tokio::sync::Mutex<mpsc::Receiver<HttpSession>>,
}

impl HttpSessionPool {
    /// A pool for `target`.
    pub fn new(target: HttpTarget, options: HttpPoolOptions) -> HttpSessionPool {
        let (idle_tx, idle_rx) = mpsc::channel(options.max_sessions.max(1));
        HttpSessionPool {
            target,
            options,
            created: Mutex::new(0),
            idle_tx,
            idle_rx: tokio::sync::Mutex::new(idle_rx),
        }
    }

    /// The pool's endpoint.
    pub fn target(&self) -> &HttpTarget {
        &self.target
    }

    /// The pool's options.
    pub fn options(&self) -> &HttpPoolOptions {
        &self.options
    }

    /// Get a session: a fresh one while under the limit, otherwise the next
    /// session released by another caller.
    pub async fn acquire(&self) -> WebResult<HttpSession> {
        {
            let mut created = self.created.lock().map_err(|_| WebError::PoolClosed)?;
            if *created < self.options.max_sessions {
                *created += 1;
                return Ok(HttpSession::new(
                    self.target.clone(),
                    self.options.tls_config.clone(),
                ));
            }
        }

        let mut idle = self.idle_rx.lock().await;
        idle.recv().await.ok_or(WebError::PoolClosed)
    }

    /// Return a session. Closed sessions and overflow give their slot back
    /// to the `created` budget.
    pub fn release(&self, session: HttpSession) {
        if session.is_open() {
            match self.idle_tx.try_send(session) {
                Ok(()) => return,
                Err(mpsc::error::TrySendError::Full(mut session))
                | Err(mpsc::error::TrySendError::Closed(mut session)) => {
                    session.close();
                }
            }
        }
        if let Ok(mut created) = self.created.lock() {
            *created = created.saturating_sub(1);
        }
    }

    #[cfg(test)]
    fn created(&self) -> usize {
        *self.created.lock().unwrap()
    }
}

/// A process-wide, weak-valued directory of pools keyed by target.
#[derive(Default)]
pub struct HttpSessionPools {
    pools: Mutex<HashMap<HttpTarget, Weak<HttpSessionPool>>>,
}

impl HttpSessionPools {
    /// The shared pool for `target`, creating it with `options` when no
    /// live pool exists.
    pub fn pool_for(&self, target: &HttpTarget, options: HttpPoolOptions) -> Arc<HttpSessionPool> {
        let mut pools = self.pools.lock().expect("pool directory mutex poisoned");
        if let Some(existing) = pools.get(target).and_then(Weak::upgrade) {
            return existing;
        }
        let created = Arc::new(HttpSessionPool::new(target.clone(), options));
        pools.insert(target.clone(), Arc::downgrade(&created));
        created
    }
}

static SESSION_POOLS: Lazy<HttpSessionPools> = Lazy::new(HttpSessionPools::default);

/// The process-wide pool directory.
pub fn session_pools() -> &'static HttpSessionPools {
    &SESSION_POOLS
}

/// A client over one shared pool.
pub struct HttpClient {
    pool: Arc<HttpSessionPool>,
}

impl HttpClient {
    /// A client over an existing pool.
    pub fn from_pool(pool: Arc<HttpSessionPool>) -> HttpClient {
        HttpClient { pool }
    }

    /// A client over the process-wide shared pool for `target`.
    pub fn new(target: &HttpTarget, options: HttpPoolOptions) -> HttpClient {
        HttpClient {
            pool: session_pools().pool_for(target, options),
        }
    }

    /// The client's endpoint.
    pub fn target(&self) -> &HttpTarget {
        self.pool.target()
    }

    /// Acquire a session, perform one exchange, release the session.
    ///
    /// The per-call timeout falls back to the pool's `request_timeout`.
    pub async fn request(
        &self,
        request: &HttpRequest,
        timeout: Option<Duration>,
    ) -> WebResult<HttpResponse> {
        let effective = timeout.or(Some(self.pool.options().request_timeout));
        let mut session = self.pool.acquire().await?;
        let result = session.request(request, effective).await;
        if result.is_err() {
            session.close();
            debug!(endpoint = %self.pool.target().host(), "request failed, session closed");
        }
        self.pool.release(session);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HttpScheme;
    use tokio::net::TcpListener;

    fn local_target(port: u16) -> HttpTarget {
        HttpTarget {
            scheme: HttpScheme::Http,
            address: "127.0.0.1".parse().unwrap(),
            port,
            host_header: format!("127.0.0.1:{port}"),
        }
    }

    async fn serve_canned(listener: TcpListener, responses: Vec<&'static str>) {
        let (mut stream, _) = listener.accept().await.unwrap();
        for response in responses {
            let mut buffer = [0u8; 4096];
            // read until the end of the request head
            let mut head = Vec::new();
            loop {
                let n = stream.read(&mut buffer).await.unwrap();
                assert!(n > 0, "client hung up early");
                head.extend_from_slice(&buffer[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).await.unwrap();
        }
    }

    #[tokio::test]
    async fn request_response_over_a_live_socket() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_canned(
            listener,
            vec!["HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"],
        ));

        let mut session = HttpSession::new(local_target(port), None);
        let response = session
            .request(&HttpRequest::get("/status"), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, b"hello");
        assert!(session.is_open());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn keep_alive_sessions_reuse_one_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // one accepted connection serves both exchanges
        let server = tokio::spawn(serve_canned(
            listener,
            vec![
                "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\none",
                "HTTP/1.1 200 OK\r\nContent-Length: 3\r\n\r\ntwo",
            ],
        ));

        let mut session = HttpSession::new(local_target(port), None);
        let first = session
            .request(&HttpRequest::get("/a"), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(first.body, b"one");
        let second = session
            .request(&HttpRequest::get("/b"), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(second.body, b"two");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn connection_close_responses_drop_the_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_canned(
            listener,
            vec!["HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok"],
        ));

        let mut session = HttpSession::new(local_target(port), None);
        let response = session
            .request(&HttpRequest::get("/"), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(response.body, b"ok");
        assert!(!session.is_open());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn chunked_bodies_are_decoded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(serve_canned(
            listener,
            vec![
                "HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
            ],
        ));

        let mut session = HttpSession::new(local_target(port), None);
        let response = session
            .request(&HttpRequest::get("/"), Some(Duration::from_secs(2)))
            .await
            .unwrap();
        assert_eq!(response.body, b"hello world");

        server.await.unwrap();
    }

    #[tokio::test]
    async fn slow_servers_time_out_and_close_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            // never answer
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let mut session = HttpSession::new(local_target(port), None);
        let err = session
            .request(&HttpRequest::get("/"), Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, WebError::Timeout));
        assert!(!session.is_open());

        server.abort();
    }

    #[tokio::test]
    async fn pool_accounting_never_exceeds_the_limit() {
        let pool = HttpSessionPool::new(
            local_target(1),
            HttpPoolOptions {
                max_sessions: 2,
                ..HttpPoolOptions::default()
            },
        );

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        assert_eq!(pool.created(), 2);

        // the pool is exhausted; a third acquire must wait
        let waited =
            tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(waited.is_err());

        // releasing a closed session frees budget for a fresh one
        pool.release(a);
        assert_eq!(pool.created(), 1);
        let c = pool.acquire().await.unwrap();
        assert_eq!(pool.created(), 2);

        pool.release(b);
        pool.release(c);
        assert_eq!(pool.created(), 0);
    }

    #[tokio::test]
    async fn pool_directory_shares_pools_per_target() {
        let pools = HttpSessionPools::default();
        let target_a = local_target(8080);
        let also_a = HttpTarget {
            host_header: "other.example".to_owned(),
            ..local_target(8080)
        };
        let target_b = local_target(8081);

        let first = pools.pool_for(&target_a, HttpPoolOptions::default());
        let second = pools.pool_for(&also_a, HttpPoolOptions::default());
        let third = pools.pool_for(&target_b, HttpPoolOptions::default());

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &third));

        // dropping every strong reference lets the entry be rebuilt
        drop(first);
        drop(second);
        let fresh = pools.pool_for(&target_a, HttpPoolOptions::default());
        assert_eq!(fresh.created(), 0);
    }
}
