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

//! # Volcano Portal Clients
//!
//! A portal [`Client`] owns one [`TelnetLink`] and drives a stack of
//! [`ModeHandler`]s over it: telnet traffic from the game channel is bridged
//! into the active handler, capability deltas are merged into the link's
//! client record, and bearer tokens for the back end are refreshed on their
//! own timer. [`run_portal_links`] accepts links off the process-wide
//! channel and spawns one client per session.
//!
//! What the handlers actually do (login flow, in-game bridging) is supplied
//! by the embedding process through [`PortalHooks`].

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
mod handler;

pub use self::client::{Client, ClientContext};
pub use self::handler::{Flow, ModeHandler};

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, trace};
use volcano_telnet::{take_link_receiver, TelnetLink};
use volcano_web::{HttpPoolOptions, HttpTarget, WebError};

/// Result type for portal operations.
pub type PortalResult<T> = Result<T, PortalError>;

/// Errors surfaced while driving a portal client.
#[derive(Debug, Error)]
pub enum PortalError {
    /// The back-end HTTP exchange failed.
    #[error("web error: {0}")]
    Web(#[from] WebError),

    /// The telnet side of the link is gone.
    #[error("link closed")]
    LinkClosed,

    /// A handler failed in its own terms.
    #[error("{0}")]
    Handler(String),
}

/// Bearer tokens for the back end, as returned by its auth endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JwtTokens {
    /// The access token sent as `Authorization: Bearer`.
    pub jwt: String,
    /// The refresh token exchanged for the next pair.
    pub refresh_token: String,
    /// How long the access token stays valid.
    pub expires_in: Duration,
}

/// Process-level configuration for portal clients.
#[derive(Clone)]
pub struct PortalConfig {
    /// The back-end endpoint every client talks to.
    pub target: HttpTarget,
    /// Pool sizing and timeouts for that endpoint.
    pub pool_options: HttpPoolOptions,
}

/// The behavior the embedding process plugs into each client.
#[async_trait]
pub trait PortalHooks: Send + Sync {
    /// The mode a fresh client starts in (login, MOTD, ...).
    fn initial_mode(&self) -> Box<dyn ModeHandler>;

    /// Exchange the current tokens for fresh ones. Returning `Ok(None)`
    /// drops the tokens and ends the client.
    async fn refresh_tokens(&self, client: &ClientContext<'_>) -> PortalResult<Option<JwtTokens>>;
}

/// Accept links from the process-wide channel and run one client task per
/// session until the channel closes.
pub async fn run_portal_links(config: PortalConfig, hooks: Arc<dyn PortalHooks>) {
    let Some(mut links) = take_link_receiver() else {
        error!("link receiver already taken, refusing to run a second accept loop");
        return;
    };

    info!("portal link handler started");
    while let Some(link) = links.recv().await {
        spawn_client(link, &config, Arc::clone(&hooks));
    }
    info!("portal link handler stopped");
}

/// Run one client for `link` on its own task.
pub fn spawn_client(link: TelnetLink, config: &PortalConfig, hooks: Arc<dyn PortalHooks>) {
    let client = Client::new(link, config, hooks);
    tokio::spawn(async move {
        let id = client.connection_id();
        trace!(connection_id = id, "portal client starting");
        client.run().await;
        trace!(connection_id = id, "portal client finished");
    });
}
