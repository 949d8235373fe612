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

use crate::{Flow, JwtTokens, ModeHandler, PortalConfig, PortalHooks};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use volcano_mud::ClientData;
use volcano_telnet::{DisconnectReason, TelnetLink, ToGameMessage, ToTelnetMessage};
use volcano_web::{HttpClient, HttpRequest, HttpResponse, WebResult};

/// How often the refresher polls while no tokens are held.
const TOKENLESS_POLL: Duration = Duration::from_secs(1);

/// Shared pieces of a client that both the mode loop and the token
/// refresher touch.
struct ClientShared {
    connection_id: i64,
    remote_addr: SocketAddr,
    hostname: String,
    client_data: Mutex<ClientData>,
    tokens: Mutex<Option<JwtTokens>>,
    http: HttpClient,
    to_telnet: mpsc::Sender<ToTelnetMessage>,
}

/// The surface mode handlers and hooks see: outbound traffic, the client
/// record, tokens and authenticated back-end requests.
pub struct ClientContext<'a> {
    shared: &'a ClientShared,
}

impl ClientContext<'_> {
    /// The link's connection id.
    pub fn connection_id(&self) -> i64 {
        self.shared.connection_id
    }

    /// The player's remote address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote_addr
    }

    /// A snapshot of the client capability record.
    pub fn client_data(&self) -> ClientData {
        self.shared
            .client_data
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    /// The currently held tokens, if any.
    pub fn tokens(&self) -> Option<JwtTokens> {
        self.shared.tokens.lock().ok().and_then(|guard| guard.clone())
    }

    /// Replace or drop the held tokens.
    pub fn set_tokens(&self, tokens: Option<JwtTokens>) {
        if let Ok(mut guard) = self.shared.tokens.lock() {
            *guard = tokens;
        }
    }

    /// Send raw text to the player.
    pub async fn send_text(&self, text: impl Into<String>) {
        if self
            .shared
            .to_telnet
            .send(ToTelnetMessage::AppData(text.into()))
            .await
            .is_err()
        {
            debug!("to-telnet channel closed, output dropped");
        }
    }

    /// Send a line to the player, appending `\r\n` unless already present.
    pub async fn send_line(&self, text: impl Into<String>) {
        let mut text = text.into();
        if !text.ends_with("\r\n") {
            text.push_str("\r\n");
        }
        self.send_text(text).await;
    }

    /// Send a GMCP package to the player.
    pub async fn send_gmcp(&self, package: impl Into<String>, data: Option<Value>) {
        let message = ToTelnetMessage::Gmcp {
            package: package.into(),
            data: data.unwrap_or(Value::Null),
        };
        if self.shared.to_telnet.send(message).await.is_err() {
            debug!("to-telnet channel closed, GMCP dropped");
        }
    }

    /// Ask the telnet side to close the session.
    pub async fn disconnect(&self, reason: DisconnectReason) {
        let _ = self
            .shared
            .to_telnet
            .send(ToTelnetMessage::Disconnect(reason))
            .await;
    }

    /// A request towards the back end carrying the portal's ambient
    /// headers: user agent, bearer token when held, and the player's
    /// address as `X-Forwarded-For`.
    pub fn base_request(&self, method: &str, path: &str) -> HttpRequest {
        let mut request = HttpRequest::new(method, path);
        request.set_header("User-Agent", "volcano-portal/1.0");
        request.set_header("X-Forwarded-For", self.shared.remote_addr.ip().to_string());
        if let Some(tokens) = self.tokens() {
            request.set_header("Authorization", format!("Bearer {}", tokens.jwt));
        }
        request
    }

    /// A [`ClientContext::base_request`] with a JSON body.
    pub fn json_request(&self, method: &str, path: &str, body: &Value) -> HttpRequest {
        let mut request = self.base_request(method, path);
        request.set_json(body);
        request
    }

    /// Dispatch a request through the shared session pool.
    pub async fn request(&self, request: &HttpRequest) -> WebResult<HttpResponse> {
        self.shared.http.request(request, None).await
    }
}

/// A portal client: owns one link and drives mode handlers over it.
pub struct Client {
    shared: Arc<ClientShared>,
    to_game: mpsc::Receiver<ToGameMessage>,
    hooks: Arc<dyn PortalHooks>,
}

impl Client {
    /// Build a client for a delivered link.
    pub fn new(link: TelnetLink, config: &PortalConfig, hooks: Arc<dyn PortalHooks>) -> Client {
        let shared = ClientShared {
            connection_id: link.connection_id,
            remote_addr: link.remote_addr,
            hostname: link.hostname,
            client_data: Mutex::new(link.client_data),
            tokens: Mutex::new(None),
            http: HttpClient::new(&config.target, config.pool_options.clone()),
            to_telnet: link.to_telnet,
        };
        Client {
            shared: Arc::new(shared),
            to_game: link.to_game,
            hooks,
        }
    }

    /// The link's connection id.
    pub fn connection_id(&self) -> i64 {
        self.shared.connection_id
    }

    /// The link's hostname.
    pub fn hostname(&self) -> &str {
        &self.shared.hostname
    }

    /// Drive the mode loop and the token refresher until either finishes.
    pub async fn run(mut self) {
        let shared = Arc::clone(&self.shared);
        let hooks = Arc::clone(&self.hooks);

        tokio::select! {
            () = run_modes(&mut self.to_game, &shared, &*hooks) => {}
            () = run_refresher(&shared, &*hooks) => {}
        }
    }
}

/// The mode loop: bridge to-game traffic into the active handler.
async fn run_modes(
    to_game: &mut mpsc::Receiver<ToGameMessage>,
    shared: &ClientShared,
    hooks: &dyn PortalHooks,
) {
    let mut context = ClientContext { shared };
    let mut handler: Box<dyn ModeHandler> = hooks.initial_mode();

    if let Err(err) = handler.enter_mode(&mut context).await {
        warn!("mode enter failed: {err}");
        return;
    }

    loop {
        let Some(message) = to_game.recv().await else {
            let _ = handler.handle_disconnect(&mut context).await;
            return;
        };

        let flow = match message {
            ToGameMessage::AppData(line) => handler.handle_command(&mut context, &line).await,
            ToGameMessage::Gmcp { package, data } => {
                handler.handle_gmcp(&mut context, &package, &data).await
            }
            ToGameMessage::ChangeCapabilities(delta) => {
                if let Ok(mut guard) = shared.client_data.lock() {
                    guard.apply_delta(&delta);
                }
                Ok(Flow::Continue)
            }
            ToGameMessage::Disconnect(reason) => {
                debug!(?reason, "telnet session ended");
                let _ = handler.handle_disconnect(&mut context).await;
                return;
            }
        };

        match flow {
            Ok(Flow::Continue) => {}
            Ok(Flow::Switch(next)) => {
                if let Err(err) = handler.exit_mode(&mut context).await {
                    warn!("mode exit failed: {err}");
                }
                handler = next;
                if let Err(err) = handler.enter_mode(&mut context).await {
                    warn!("mode enter failed: {err}");
                    return;
                }
            }
            Ok(Flow::Disconnect) => {
                context.disconnect(DisconnectReason::ClientDisconnect).await;
                let _ = handler.exit_mode(&mut context).await;
                return;
            }
            Err(err) => {
                warn!("mode handler failed: {err}");
                context.disconnect(DisconnectReason::Error).await;
                return;
            }
        }
    }
}

/// The refresher: poll until tokens appear, then renew them as they expire.
/// A failed or refused refresh drops the tokens and ends the client.
async fn run_refresher(shared: &ClientShared, hooks: &dyn PortalHooks) {
    let context = ClientContext { shared };

    loop {
        let wait = match shared.tokens.lock() {
            Ok(guard) => guard.as_ref().map(|tokens| tokens.expires_in),
            Err(_) => return,
        };

        let Some(wait) = wait else {
            tokio::time::sleep(TOKENLESS_POLL).await;
            continue;
        };

        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }

        // tokens may have been dropped while we slept
        if context.tokens().is_none() {
            continue;
        }

        match hooks.refresh_tokens(&context).await {
            Ok(Some(fresh)) => context.set_tokens(Some(fresh)),
            Ok(None) => {
                debug!("token refresh refused, ending client");
                context.set_tokens(None);
                return;
            }
            Err(err) => {
                warn!("token refresh failed: {err}");
                context.set_tokens(None);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PortalError, PortalResult};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use volcano_web::{HttpPoolOptions, HttpScheme, HttpTarget};

    fn test_config() -> PortalConfig {
        PortalConfig {
            target: HttpTarget {
                scheme: HttpScheme::Http,
                address: "127.0.0.1".parse().unwrap(),
                port: 8080,
                host_header: "game.example".to_owned(),
            },
            pool_options: HttpPoolOptions::default(),
        }
    }

    struct FakeLink {
        link: TelnetLink,
        to_game: mpsc::Sender<ToGameMessage>,
        to_telnet: mpsc::Receiver<ToTelnetMessage>,
    }

    fn fake_link() -> FakeLink {
        let (to_game_tx, to_game_rx) = mpsc::channel(16);
        let (to_telnet_tx, to_telnet_rx) = mpsc::channel(16);
        FakeLink {
            link: TelnetLink {
                connection_id: 3,
                remote_addr: "203.0.113.9:4321".parse().unwrap(),
                hostname: "player.example".to_owned(),
                client_data: ClientData::default(),
                to_game: to_game_rx,
                to_telnet: to_telnet_tx,
            },
            to_game: to_game_tx,
            to_telnet: to_telnet_rx,
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        refreshes: AtomicUsize,
    }

    #[async_trait]
    impl PortalHooks for RecordingHooks {
        fn initial_mode(&self) -> Box<dyn ModeHandler> {
            Box::new(EchoMode)
        }

        async fn refresh_tokens(
            &self,
            _client: &ClientContext<'_>,
        ) -> PortalResult<Option<JwtTokens>> {
            self.refreshes.fetch_add(1, Ordering::Relaxed);
            Ok(Some(JwtTokens {
                jwt: "fresh".to_owned(),
                refresh_token: "next".to_owned(),
                expires_in: Duration::from_secs(60),
            }))
        }
    }

    /// Echoes lines back; "quit" disconnects, "deeper" switches modes.
    struct EchoMode;

    #[async_trait]
    impl ModeHandler for EchoMode {
        async fn handle_command(
            &mut self,
            client: &mut ClientContext<'_>,
            line: &str,
        ) -> PortalResult<Flow> {
            match line {
                "quit" => Ok(Flow::Disconnect),
                "deeper" => Ok(Flow::Switch(Box::new(DeeperMode))),
                "fail" => Err(PortalError::Handler("boom".to_owned())),
                _ => {
                    client.send_line(format!("echo: {line}")).await;
                    Ok(Flow::Continue)
                }
            }
        }
    }

    struct DeeperMode;

    #[async_trait]
    impl ModeHandler for DeeperMode {
        async fn enter_mode(&mut self, client: &mut ClientContext<'_>) -> PortalResult<()> {
            client.send_line("now deeper").await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn lines_are_bridged_into_the_active_handler() {
        let mut fake = fake_link();
        let client = Client::new(fake.link, &test_config(), Arc::new(RecordingHooks::default()));
        let run = tokio::spawn(client.run());

        fake.to_game
            .send(ToGameMessage::AppData("hello".to_owned()))
            .await
            .unwrap();
        let reply = fake.to_telnet.recv().await.unwrap();
        assert_eq!(reply, ToTelnetMessage::AppData("echo: hello\r\n".to_owned()));

        run.abort();
    }

    #[tokio::test]
    async fn switching_modes_enters_the_next_handler() {
        let mut fake = fake_link();
        let client = Client::new(fake.link, &test_config(), Arc::new(RecordingHooks::default()));
        let run = tokio::spawn(client.run());

        fake.to_game
            .send(ToGameMessage::AppData("deeper".to_owned()))
            .await
            .unwrap();
        let reply = fake.to_telnet.recv().await.unwrap();
        assert_eq!(reply, ToTelnetMessage::AppData("now deeper\r\n".to_owned()));

        run.abort();
    }

    #[tokio::test]
    async fn quit_requests_a_client_disconnect() {
        let mut fake = fake_link();
        let client = Client::new(fake.link, &test_config(), Arc::new(RecordingHooks::default()));
        let run = tokio::spawn(client.run());

        fake.to_game
            .send(ToGameMessage::AppData("quit".to_owned()))
            .await
            .unwrap();
        let reply = fake.to_telnet.recv().await.unwrap();
        assert_eq!(
            reply,
            ToTelnetMessage::Disconnect(DisconnectReason::ClientDisconnect)
        );

        let _ = tokio::time::timeout(Duration::from_secs(1), run).await;
    }

    #[tokio::test]
    async fn capability_deltas_update_the_client_record() {
        let mut fake = fake_link();
        let client = Client::new(fake.link, &test_config(), Arc::new(RecordingHooks::default()));
        let shared = Arc::clone(&client.shared);
        let run = tokio::spawn(client.run());

        fake.to_game
            .send(ToGameMessage::ChangeCapabilities(
                json!({"width": 132, "gmcp": true}),
            ))
            .await
            .unwrap();
        // follow with a line so we can observe the loop has advanced
        fake.to_game
            .send(ToGameMessage::AppData("ping".to_owned()))
            .await
            .unwrap();
        let _ = fake.to_telnet.recv().await.unwrap();

        let data = shared.client_data.lock().unwrap().clone();
        assert_eq!(data.width, 132);
        assert!(data.gmcp);

        run.abort();
    }

    #[tokio::test]
    async fn telnet_disconnect_ends_the_client() {
        let fake = fake_link();
        let client = Client::new(fake.link, &test_config(), Arc::new(RecordingHooks::default()));
        let run = tokio::spawn(client.run());

        fake.to_game
            .send(ToGameMessage::Disconnect(DisconnectReason::RemoteDisconnect))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("client did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn refresher_renews_tokens_when_they_expire() {
        let mut fake = fake_link();
        let hooks = Arc::new(RecordingHooks::default());
        let client = Client::new(fake.link, &test_config(), Arc::clone(&hooks) as Arc<dyn PortalHooks>);
        let shared = Arc::clone(&client.shared);

        *shared.tokens.lock().unwrap() = Some(JwtTokens {
            jwt: "stale".to_owned(),
            refresh_token: "r".to_owned(),
            expires_in: Duration::from_millis(10),
        });

        let run = tokio::spawn(client.run());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(hooks.refreshes.load(Ordering::Relaxed) >= 1);
        let tokens = shared.tokens.lock().unwrap().clone().unwrap();
        assert_eq!(tokens.jwt, "fresh");

        run.abort();
        drop(fake.to_game);
        let _ = fake.to_telnet.try_recv();
    }

    #[tokio::test]
    async fn base_requests_carry_the_ambient_headers() {
        let fake = fake_link();
        let client = Client::new(fake.link, &test_config(), Arc::new(RecordingHooks::default()));
        let context = ClientContext {
            shared: &client.shared,
        };

        let plain = context.base_request("GET", "/status");
        assert_eq!(plain.header("User-Agent"), Some("volcano-portal/1.0"));
        assert_eq!(plain.header("X-Forwarded-For"), Some("203.0.113.9"));
        assert!(plain.header("Authorization").is_none());

        context.set_tokens(Some(JwtTokens {
            jwt: "abc123".to_owned(),
            refresh_token: "r".to_owned(),
            expires_in: Duration::from_secs(60),
        }));
        let authed = context.json_request("POST", "/auth/refresh", &json!({"token": "r"}));
        assert_eq!(authed.header("Authorization"), Some("Bearer abc123"));
        assert_eq!(authed.header("Content-Type"), Some("application/json"));
    }
}
