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

//! Per-option negotiation state machines.
//!
//! Each option is a variant of [`OptionKind`] carrying whatever transient
//! state its subnegotiation protocol needs. The base negotiation machine is
//! a pure function of (support policy, current state, received verb); the
//! option-specific behavior hangs off enable/reject hooks dispatched on the
//! variant.
//!
//! Options talk to the connection through [`OptionContext`], which exposes
//! exactly what they need: send a negotiation, send a subnegotiation,
//! publish a capability delta, and mark a pending negotiation complete.

use crate::connection::OutgoingMessage;
use crate::{codec, codes, NegotiationCommand, TelnetMessage, ToGameMessage};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use volcano_mud::ClientData;

/// One side of an option: whether it is active and whether a negotiation we
/// initiated is still in flight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct SideState {
    pub enabled: bool,
    pub negotiating: bool,
}

/// Both sides of one option.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct OptionState {
    pub local: SideState,
    pub remote: SideState,
}

#[derive(Clone, Copy)]
struct Support {
    supported: bool,
    auto_start: bool,
}

impl Support {
    const NONE: Support = Support {
        supported: false,
        auto_start: false,
    };
    const AUTO: Support = Support {
        supported: true,
        auto_start: true,
    };
}

#[derive(Clone, Copy)]
struct Policy {
    local: Support,
    remote: Support,
}

/// One-shot signals the negotiation barrier waits on, keyed by option name.
///
/// Each signal is a capacity-one channel; firing an already-fired signal is
/// a no-op, so completion hooks stay idempotent.
pub(crate) struct PendingSignals {
    senders: HashMap<&'static str, mpsc::Sender<()>>,
    receivers: Vec<mpsc::Receiver<()>>,
}

impl PendingSignals {
    pub fn new() -> PendingSignals {
        PendingSignals {
            senders: HashMap::new(),
            receivers: Vec::new(),
        }
    }

    fn register(&mut self, name: &'static str) {
        if self.senders.contains_key(name) {
            return;
        }
        let (tx, rx) = mpsc::channel(1);
        self.senders.insert(name, tx);
        self.receivers.push(rx);
    }

    fn fire(&self, name: &str) {
        if let Some(tx) = self.senders.get(name) {
            let _ = tx.try_send(());
        }
    }

    /// Hand the receive sides to the negotiation barrier.
    pub fn take_receivers(&mut self) -> Vec<mpsc::Receiver<()>> {
        std::mem::take(&mut self.receivers)
    }
}

/// The narrow connection surface an option is allowed to touch.
pub(crate) struct OptionContext<'a> {
    pub outgoing: &'a mpsc::Sender<OutgoingMessage>,
    pub to_game: &'a mpsc::Sender<ToGameMessage>,
    pub client_data: &'a Arc<Mutex<ClientData>>,
    pub pending: &'a mut PendingSignals,
}

impl OptionContext<'_> {
    async fn send_negotiation(&self, command: NegotiationCommand, option: u8) {
        let message = TelnetMessage::Negotiation { command, option };
        if self.outgoing.send(OutgoingMessage::Message(message)).await.is_err() {
            debug!("outgoing channel closed while sending negotiation");
        }
    }

    async fn send_subnegotiation(&self, option: u8, data: Vec<u8>) {
        let message = TelnetMessage::Subnegotiation { option, data };
        if self.outgoing.send(OutgoingMessage::Message(message)).await.is_err() {
            debug!("outgoing channel closed while sending subnegotiation");
        }
    }

    /// Publish a capability delta towards the game side.
    pub(crate) async fn publish_capabilities(&self, delta: Value) {
        if self
            .to_game
            .send(ToGameMessage::ChangeCapabilities(delta))
            .await
            .is_err()
        {
            debug!("to-game channel closed while publishing capabilities");
        }
    }

    fn mark_negotiation_complete(&self, name: &str) {
        self.pending.fire(name);
    }

    fn with_client_data<T>(&self, f: impl FnOnce(&mut ClientData) -> T) -> T {
        let mut guard = self
            .client_data
            .lock()
            .expect("client data mutex poisoned");
        f(&mut guard)
    }
}

/// Record the client's declared name and version and publish the delta.
pub(crate) async fn set_client_name(ctx: &OptionContext<'_>, name: &str, version: Option<&str>) {
    let mut delta = Map::new();
    ctx.with_client_data(|cd| {
        cd.client_name = name.to_owned();
        delta.insert("client_name".to_owned(), Value::from(name));
        if let Some(version) = version {
            cd.client_version = version.to_owned();
            delta.insert("client_version".to_owned(), Value::from(version));
        }
    });
    ctx.publish_capabilities(Value::Object(delta)).await;
}

/// CHARSET subnegotiation commands.
const CHARSET_REQUEST: u8 = 0x01;
const CHARSET_ACCEPTED: u8 = 0x02;
/// The charsets we offer, space-delimited per RFC 2066.
const CHARSET_OFFER: &[u8] = b" ascii utf-8";

/// MTTS subnegotiation commands.
const MTTS_IS: u8 = 0x00;
const MTTS_SEND: u8 = 0x01;

/// An option and its protocol-specific transient state.
#[derive(Debug)]
enum OptionKind {
    Sga,
    Naws,
    Charset {
        requested: bool,
    },
    Mtts {
        requests_sent: u8,
        last_response: Option<Vec<u8>>,
    },
    Mssp,
    Mccp2,
    Mccp3,
    Gmcp,
    Linemode,
    Eor,
}

impl OptionKind {
    fn code(&self) -> u8 {
        match self {
            OptionKind::Sga => codes::SGA,
            OptionKind::Naws => codes::NAWS,
            OptionKind::Charset { .. } => codes::CHARSET,
            OptionKind::Mtts { .. } => codes::MTTS,
            OptionKind::Mssp => codes::MSSP,
            OptionKind::Mccp2 => codes::MCCP2,
            OptionKind::Mccp3 => codes::MCCP3,
            OptionKind::Gmcp => codes::GMCP,
            OptionKind::Linemode => codes::LINEMODE,
            OptionKind::Eor => codes::EOR,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            OptionKind::Sga => "SGA",
            OptionKind::Naws => "NAWS",
            OptionKind::Charset { .. } => "CHARSET",
            OptionKind::Mtts { .. } => "MTTS",
            OptionKind::Mssp => "MSSP",
            OptionKind::Mccp2 => "MCCP2",
            OptionKind::Mccp3 => "MCCP3",
            OptionKind::Gmcp => "GMCP",
            OptionKind::Linemode => "LINEMODE",
            OptionKind::Eor => "EOR",
        }
    }

    fn policy(&self) -> Policy {
        match self {
            OptionKind::Sga | OptionKind::Mssp | OptionKind::Mccp2 | OptionKind::Mccp3
            | OptionKind::Gmcp | OptionKind::Linemode => Policy {
                local: Support::AUTO,
                remote: Support::NONE,
            },
            OptionKind::Naws => Policy {
                local: Support::NONE,
                remote: Support::AUTO,
            },
            OptionKind::Charset { .. } | OptionKind::Mtts { .. } => Policy {
                local: Support::AUTO,
                remote: Support::AUTO,
            },
            OptionKind::Eor => Policy {
                local: Support::NONE,
                remote: Support::NONE,
            },
        }
    }
}

struct OptionSlot {
    kind: OptionKind,
    state: OptionState,
}

impl OptionSlot {
    fn new(kind: OptionKind) -> OptionSlot {
        OptionSlot {
            kind,
            state: OptionState::default(),
        }
    }

    async fn at_local_enable(&mut self, ctx: &mut OptionContext<'_>) {
        ctx.mark_negotiation_complete(self.kind.name());
        match &mut self.kind {
            OptionKind::Sga => {
                ctx.with_client_data(|cd| cd.sga = true);
                ctx.publish_capabilities(json!({"sga": true})).await;
            }
            OptionKind::Mssp => {
                ctx.with_client_data(|cd| cd.mssp = true);
                ctx.publish_capabilities(json!({"mssp": true})).await;
            }
            OptionKind::Mccp2 => {
                ctx.with_client_data(|cd| cd.mccp2 = true);
                ctx.publish_capabilities(json!({"mccp2": true})).await;
                // the writer flips outbound compression after this frame
                ctx.send_subnegotiation(codes::MCCP2, Vec::new()).await;
            }
            OptionKind::Mccp3 => {
                ctx.with_client_data(|cd| cd.mccp3 = true);
                ctx.publish_capabilities(json!({"mccp3": true})).await;
            }
            OptionKind::Gmcp => {
                ctx.with_client_data(|cd| cd.gmcp = true);
                ctx.publish_capabilities(json!({"gmcp": true})).await;
            }
            OptionKind::Linemode => {
                ctx.with_client_data(|cd| cd.linemode = true);
                ctx.publish_capabilities(json!({"linemode": true})).await;
            }
            OptionKind::Charset { requested } => {
                if !*requested {
                    *requested = true;
                    let mut payload = vec![CHARSET_REQUEST];
                    payload.extend_from_slice(CHARSET_OFFER);
                    ctx.send_subnegotiation(codes::CHARSET, payload).await;
                }
            }
            OptionKind::Mtts { requests_sent, .. } => {
                if *requests_sent == 0 {
                    *requests_sent = 1;
                    ctx.send_subnegotiation(codes::MTTS, vec![MTTS_SEND]).await;
                }
            }
            OptionKind::Naws | OptionKind::Eor => {}
        }
    }

    async fn at_remote_enable(&mut self, ctx: &mut OptionContext<'_>) {
        ctx.mark_negotiation_complete(self.kind.name());
        match &mut self.kind {
            OptionKind::Naws => {
                ctx.with_client_data(|cd| cd.naws = true);
                ctx.publish_capabilities(json!({"naws": true})).await;
            }
            OptionKind::Charset { requested } => {
                if !*requested {
                    *requested = true;
                    let mut payload = vec![CHARSET_REQUEST];
                    payload.extend_from_slice(CHARSET_OFFER);
                    ctx.send_subnegotiation(codes::CHARSET, payload).await;
                }
            }
            OptionKind::Mtts { requests_sent, .. } => {
                ctx.with_client_data(|cd| cd.mtts = true);
                ctx.publish_capabilities(json!({"mtts": true})).await;
                if *requests_sent == 0 {
                    *requests_sent = 1;
                    ctx.send_subnegotiation(codes::MTTS, vec![MTTS_SEND]).await;
                }
            }
            _ => {}
        }
    }

    fn at_local_reject(&self, ctx: &OptionContext<'_>) {
        ctx.mark_negotiation_complete(self.kind.name());
    }

    fn at_remote_reject(&self, ctx: &OptionContext<'_>) {
        ctx.mark_negotiation_complete(self.kind.name());
    }

    /// The base negotiation machine: pure function of policy, state and the
    /// received verb, with option hooks on the transitions.
    async fn receive_negotiation(
        &mut self,
        command: NegotiationCommand,
        ctx: &mut OptionContext<'_>,
    ) {
        let policy = self.kind.policy();
        let code = self.kind.code();

        match command {
            NegotiationCommand::Will => {
                if policy.remote.supported {
                    if !self.state.remote.enabled {
                        self.state.remote.enabled = true;
                        if !self.state.remote.negotiating {
                            ctx.send_negotiation(NegotiationCommand::Do, code).await;
                        }
                        self.at_remote_enable(ctx).await;
                    }
                } else {
                    ctx.send_negotiation(NegotiationCommand::Dont, code).await;
                    self.at_remote_reject(ctx);
                }
            }
            NegotiationCommand::Do => {
                if policy.local.supported {
                    if !self.state.local.enabled {
                        self.state.local.enabled = true;
                        if !self.state.local.negotiating {
                            ctx.send_negotiation(NegotiationCommand::Will, code).await;
                        }
                        self.at_local_enable(ctx).await;
                    }
                } else {
                    ctx.send_negotiation(NegotiationCommand::Wont, code).await;
                    self.at_local_reject(ctx);
                }
            }
            NegotiationCommand::Wont => {
                if policy.remote.supported {
                    if self.state.remote.enabled {
                        self.state.remote.enabled = false;
                    }
                    if self.state.remote.negotiating {
                        self.state.remote.negotiating = false;
                        self.at_remote_reject(ctx);
                    }
                }
            }
            NegotiationCommand::Dont => {
                if policy.local.supported {
                    if self.state.local.enabled {
                        self.state.local.enabled = false;
                    }
                    if self.state.local.negotiating {
                        self.state.local.negotiating = false;
                        self.at_local_reject(ctx);
                    }
                }
            }
        }
    }

    async fn receive_subnegotiation(&mut self, data: &[u8], ctx: &mut OptionContext<'_>) {
        match &mut self.kind {
            OptionKind::Naws => {
                // malformed payloads are dropped silently
                let Some((width, height)) = codec::parse_naws_payload(data) else {
                    return;
                };
                let changed = ctx.with_client_data(|cd| {
                    if cd.width == width && cd.height == height {
                        return false;
                    }
                    cd.width = width;
                    cd.height = height;
                    true
                });
                if changed {
                    ctx.publish_capabilities(json!({"width": width, "height": height}))
                        .await;
                }
            }
            OptionKind::Charset { .. } => {
                if data.first() != Some(&CHARSET_ACCEPTED) {
                    return;
                }
                let encoding = String::from_utf8_lossy(&data[1..]).trim().to_owned();
                if encoding.is_empty() {
                    return;
                }
                ctx.with_client_data(|cd| {
                    cd.charset = true;
                    cd.encoding = encoding.clone();
                });
                ctx.publish_capabilities(json!({"charset": true, "encoding": encoding}))
                    .await;
                ctx.mark_negotiation_complete("CHARSET");
            }
            OptionKind::Mtts {
                requests_sent,
                last_response,
            } => {
                if data.first() != Some(&MTTS_IS) {
                    return;
                }
                let response = data[1..].to_vec();
                let repeated = last_response.as_deref() == Some(response.as_slice());
                let request = *requests_sent;
                let text = String::from_utf8_lossy(&response).trim().to_owned();

                match request {
                    1 => match text.split_once(' ') {
                        Some((name, version)) => {
                            set_client_name(ctx, name, Some(version)).await;
                        }
                        None if !text.is_empty() => {
                            set_client_name(ctx, &text, None).await;
                        }
                        None => {}
                    },
                    2 => {
                        // terminal type; only adopt it while the client has
                        // not introduced itself
                        let token = text.split('-').next().unwrap_or_default();
                        let adopt = !token.is_empty()
                            && ctx.with_client_data(|cd| cd.client_name == "UNKNOWN");
                        if adopt {
                            set_client_name(ctx, token, None).await;
                        }
                    }
                    _ => {
                        if let Some(mask) = text
                            .strip_prefix("MTTS ")
                            .and_then(|rest| rest.trim().parse::<u32>().ok())
                        {
                            let delta = ctx.with_client_data(|cd| apply_mtts_bitmask(cd, mask));
                            if !delta.is_empty() {
                                ctx.publish_capabilities(Value::Object(delta)).await;
                            }
                        } else {
                            debug!("unparseable MTTS bitmask response: {text:?}");
                        }
                    }
                }

                *last_response = Some(response);
                if request >= 3 || repeated {
                    ctx.mark_negotiation_complete("MTTS");
                } else {
                    *requests_sent += 1;
                    ctx.send_subnegotiation(codes::MTTS, vec![MTTS_SEND]).await;
                }
            }
            // MCCP3 activation happens at the framing layer in the reader
            _ => {}
        }
    }
}

/// Decode the MTTS capability bitmask into client data fields, collecting
/// the changed fields as a delta.
fn apply_mtts_bitmask(cd: &mut ClientData, mask: u32) -> Map<String, Value> {
    let mut delta = Map::new();
    let mut set_flag = |name: &str, slot: &mut bool| {
        if !*slot {
            *slot = true;
            delta.insert(name.to_owned(), Value::from(true));
        }
    };

    if mask & 2 != 0 {
        set_flag("vt100", &mut cd.vt100);
    }
    if mask & 16 != 0 {
        set_flag("mouse_tracking", &mut cd.mouse_tracking);
    }
    if mask & 32 != 0 {
        set_flag("osc_color_palette", &mut cd.osc_color_palette);
    }
    if mask & 64 != 0 {
        set_flag("screen_reader", &mut cd.screen_reader);
    }
    if mask & 128 != 0 {
        set_flag("proxy", &mut cd.proxy);
    }
    if mask & 512 != 0 {
        set_flag("mnes", &mut cd.mnes);
    }
    if mask & 2048 != 0 {
        set_flag("tls_support", &mut cd.tls_support);
    }

    if mask & 4 != 0 && cd.encoding != "utf-8" {
        cd.encoding = "utf-8".to_owned();
        delta.insert("encoding".to_owned(), Value::from("utf-8"));
    }

    let mut color = cd.color;
    if mask & 1 != 0 {
        color = color.max(1);
    }
    if mask & 8 != 0 {
        color = color.max(2);
    }
    if mask & 256 != 0 {
        color = color.max(3);
    }
    if color != cd.color {
        cd.color = color;
        delta.insert("color".to_owned(), Value::from(color));
    }

    delta
}

/// The full option table of one connection.
pub(crate) struct TelnetOptions {
    slots: Vec<OptionSlot>,
}

impl TelnetOptions {
    pub fn new() -> TelnetOptions {
        TelnetOptions {
            slots: vec![
                OptionSlot::new(OptionKind::Sga),
                OptionSlot::new(OptionKind::Naws),
                OptionSlot::new(OptionKind::Charset { requested: false }),
                OptionSlot::new(OptionKind::Mtts {
                    requests_sent: 0,
                    last_response: None,
                }),
                OptionSlot::new(OptionKind::Mssp),
                OptionSlot::new(OptionKind::Mccp2),
                OptionSlot::new(OptionKind::Mccp3),
                OptionSlot::new(OptionKind::Gmcp),
                OptionSlot::new(OptionKind::Linemode),
                OptionSlot::new(OptionKind::Eor),
            ],
        }
    }

    fn slot_mut(&mut self, code: u8) -> Option<&mut OptionSlot> {
        self.slots.iter_mut().find(|slot| slot.kind.code() == code)
    }

    /// Register pending signals and kick off every auto-start negotiation.
    pub async fn start(&mut self, ctx: &mut OptionContext<'_>) {
        for slot in &mut self.slots {
            let policy = slot.kind.policy();
            if policy.local.supported || policy.remote.supported {
                ctx.pending.register(slot.kind.name());
            }
            if policy.local.supported && policy.local.auto_start {
                ctx.send_negotiation(NegotiationCommand::Will, slot.kind.code())
                    .await;
                slot.state.local.negotiating = true;
            }
            if policy.remote.supported && policy.remote.auto_start {
                ctx.send_negotiation(NegotiationCommand::Do, slot.kind.code())
                    .await;
                slot.state.remote.negotiating = true;
            }
        }
    }

    /// Route a received negotiation verb. Unknown options are refused
    /// cleanly: DO begets WONT, WILL begets DONT, and refusals are answered
    /// with the matching refusal.
    pub async fn handle_negotiation(
        &mut self,
        command: NegotiationCommand,
        option: u8,
        ctx: &mut OptionContext<'_>,
    ) {
        if let Some(slot) = self.slot_mut(option) {
            slot.receive_negotiation(command, ctx).await;
            return;
        }

        let reply = match command {
            NegotiationCommand::Do | NegotiationCommand::Dont => NegotiationCommand::Wont,
            NegotiationCommand::Will | NegotiationCommand::Wont => NegotiationCommand::Dont,
        };
        ctx.send_negotiation(reply, option).await;
    }

    /// Route a received subnegotiation payload. Payloads for unknown
    /// options are dropped.
    pub async fn handle_subnegotiation(
        &mut self,
        option: u8,
        data: &[u8],
        ctx: &mut OptionContext<'_>,
    ) {
        match self.slot_mut(option) {
            Some(slot) => slot.receive_subnegotiation(data, ctx).await,
            None => warn!("subnegotiation for unknown option {option}"),
        }
    }

    /// Handle an inbound GMCP package: `Core.Hello` updates the client
    /// identity, and every package is forwarded to the game side.
    pub async fn handle_gmcp(&mut self, package: &str, data: &Value, ctx: &mut OptionContext<'_>) {
        if package.eq_ignore_ascii_case("Core.Hello") {
            let client = data.get("client").and_then(Value::as_str);
            let version = data.get("version").and_then(Value::as_str);
            if let Some(client) = client {
                set_client_name(ctx, client, version).await;
            }
        }

        if ctx
            .to_game
            .send(ToGameMessage::Gmcp {
                package: package.to_owned(),
                data: data.clone(),
            })
            .await
            .is_err()
        {
            debug!("to-game channel closed while forwarding GMCP");
        }
    }

    #[cfg(test)]
    pub fn state(&self, code: u8) -> Option<OptionState> {
        self.slots
            .iter()
            .find(|slot| slot.kind.code() == code)
            .map(|slot| slot.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DisconnectReason;

    struct Harness {
        options: TelnetOptions,
        outgoing_tx: mpsc::Sender<OutgoingMessage>,
        outgoing_rx: mpsc::Receiver<OutgoingMessage>,
        to_game_tx: mpsc::Sender<ToGameMessage>,
        to_game_rx: mpsc::Receiver<ToGameMessage>,
        client_data: Arc<Mutex<ClientData>>,
        pending: PendingSignals,
    }

    impl Harness {
        fn new() -> Harness {
            let (outgoing_tx, outgoing_rx) = mpsc::channel(100);
            let (to_game_tx, to_game_rx) = mpsc::channel(100);
            Harness {
                options: TelnetOptions::new(),
                outgoing_tx,
                outgoing_rx,
                to_game_tx,
                to_game_rx,
                client_data: Arc::new(Mutex::new(ClientData::default())),
                pending: PendingSignals::new(),
            }
        }

        async fn start(&mut self) {
            let mut ctx = OptionContext {
                outgoing: &self.outgoing_tx,
                to_game: &self.to_game_tx,
                client_data: &self.client_data,
                pending: &mut self.pending,
            };
            self.options.start(&mut ctx).await;
        }

        async fn negotiate(&mut self, command: NegotiationCommand, option: u8) {
            let mut ctx = OptionContext {
                outgoing: &self.outgoing_tx,
                to_game: &self.to_game_tx,
                client_data: &self.client_data,
                pending: &mut self.pending,
            };
            self.options.handle_negotiation(command, option, &mut ctx).await;
        }

        async fn subnegotiate(&mut self, option: u8, data: &[u8]) {
            let mut ctx = OptionContext {
                outgoing: &self.outgoing_tx,
                to_game: &self.to_game_tx,
                client_data: &self.client_data,
                pending: &mut self.pending,
            };
            self.options
                .handle_subnegotiation(option, data, &mut ctx)
                .await;
        }

        fn drain_outgoing(&mut self) -> Vec<TelnetMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.outgoing_rx.try_recv() {
                match msg {
                    OutgoingMessage::Message(m) => out.push(m),
                    OutgoingMessage::Disconnect(reason) => {
                        panic!("unexpected disconnect: {reason:?}")
                    }
                }
            }
            out
        }

        fn drain_to_game(&mut self) -> Vec<ToGameMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.to_game_rx.try_recv() {
                out.push(msg);
            }
            out
        }

        fn client_data(&self) -> ClientData {
            self.client_data.lock().unwrap().clone()
        }
    }

    fn negotiation(command: NegotiationCommand, option: u8) -> TelnetMessage {
        TelnetMessage::Negotiation { command, option }
    }

    #[tokio::test]
    async fn start_sends_will_and_do_for_auto_options() {
        let mut harness = Harness::new();
        harness.start().await;
        let sent = harness.drain_outgoing();

        assert!(sent.contains(&negotiation(NegotiationCommand::Will, codes::SGA)));
        assert!(sent.contains(&negotiation(NegotiationCommand::Do, codes::NAWS)));
        assert!(sent.contains(&negotiation(NegotiationCommand::Will, codes::CHARSET)));
        assert!(sent.contains(&negotiation(NegotiationCommand::Do, codes::CHARSET)));
        assert!(sent.contains(&negotiation(NegotiationCommand::Will, codes::MCCP2)));
        assert!(sent.contains(&negotiation(NegotiationCommand::Will, codes::GMCP)));
        // EOR supports neither side, so nothing goes out for it
        assert!(!sent.iter().any(|m| matches!(
            m,
            TelnetMessage::Negotiation { option: codes::EOR, .. }
        )));
    }

    #[tokio::test]
    async fn do_sga_enables_local_without_re_ack_while_negotiating() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.drain_outgoing();

        harness.negotiate(NegotiationCommand::Do, codes::SGA).await;
        // we initiated WILL SGA at start, so no second WILL goes out
        assert!(harness.drain_outgoing().is_empty());
        let state = harness.options.state(codes::SGA).unwrap();
        assert!(state.local.enabled);
        assert!(harness.client_data().sga);
    }

    #[tokio::test]
    async fn duplicate_will_is_idempotent() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.drain_outgoing();

        harness.negotiate(NegotiationCommand::Will, codes::NAWS).await;
        let first = harness.drain_to_game();
        assert!(!first.is_empty());

        harness.negotiate(NegotiationCommand::Will, codes::NAWS).await;
        assert!(harness.drain_outgoing().is_empty());
        assert!(harness.drain_to_game().is_empty());
    }

    #[tokio::test]
    async fn unsupported_options_round_trip_to_disabled() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.drain_outgoing();

        // EOR is registered but supported on neither side
        harness.negotiate(NegotiationCommand::Will, codes::EOR).await;
        assert_eq!(
            harness.drain_outgoing(),
            vec![negotiation(NegotiationCommand::Dont, codes::EOR)]
        );
        harness.negotiate(NegotiationCommand::Do, codes::EOR).await;
        assert_eq!(
            harness.drain_outgoing(),
            vec![negotiation(NegotiationCommand::Wont, codes::EOR)]
        );
        let state = harness.options.state(codes::EOR).unwrap();
        assert!(!state.local.enabled);
        assert!(!state.remote.enabled);
    }

    #[tokio::test]
    async fn unknown_options_are_refused_cleanly() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.drain_outgoing();

        for (received, expected) in [
            (NegotiationCommand::Do, NegotiationCommand::Wont),
            (NegotiationCommand::Will, NegotiationCommand::Dont),
            (NegotiationCommand::Wont, NegotiationCommand::Dont),
            (NegotiationCommand::Dont, NegotiationCommand::Wont),
        ] {
            harness.negotiate(received, 199).await;
            assert_eq!(harness.drain_outgoing(), vec![negotiation(expected, 199)]);
        }
    }

    #[tokio::test]
    async fn naws_subnegotiation_applies_geometry_once() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.negotiate(NegotiationCommand::Will, codes::NAWS).await;
        harness.drain_to_game();

        harness
            .subnegotiate(codes::NAWS, &codec::naws_payload(120, 40))
            .await;
        let cd = harness.client_data();
        assert_eq!((cd.width, cd.height), (120, 40));
        let deltas = harness.drain_to_game();
        assert_eq!(
            deltas,
            vec![ToGameMessage::ChangeCapabilities(
                json!({"width": 120, "height": 40})
            )]
        );

        // identical geometry publishes nothing
        harness
            .subnegotiate(codes::NAWS, &codec::naws_payload(120, 40))
            .await;
        assert!(harness.drain_to_game().is_empty());

        // malformed payloads are dropped silently
        harness.subnegotiate(codes::NAWS, &[0, 80]).await;
        assert!(harness.drain_to_game().is_empty());
        assert_eq!(harness.client_data().width, 120);
    }

    #[tokio::test]
    async fn charset_enable_requests_once_and_accept_adopts_encoding() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.drain_outgoing();

        harness.negotiate(NegotiationCommand::Do, codes::CHARSET).await;
        harness.negotiate(NegotiationCommand::Will, codes::CHARSET).await;
        let sent = harness.drain_outgoing();
        let requests: Vec<_> = sent
            .iter()
            .filter(|m| {
                matches!(m, TelnetMessage::Subnegotiation { option: codes::CHARSET, data } if data.first() == Some(&1))
            })
            .collect();
        assert_eq!(requests.len(), 1, "exactly one REQUEST: {sent:?}");

        let mut accept = vec![2u8];
        accept.extend_from_slice(b"utf-8");
        harness.subnegotiate(codes::CHARSET, &accept).await;
        let cd = harness.client_data();
        assert!(cd.charset);
        assert_eq!(cd.encoding, "utf-8");
    }

    #[tokio::test]
    async fn mtts_cycle_collects_identity_and_bitmask() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.negotiate(NegotiationCommand::Will, codes::MTTS).await;
        harness.drain_outgoing();
        harness.drain_to_game();

        // response 1: client name and version
        let mut response = vec![0u8];
        response.extend_from_slice(b"MUDLET 4.17.2");
        harness.subnegotiate(codes::MTTS, &response).await;
        let cd = harness.client_data();
        assert_eq!(cd.client_name, "MUDLET");
        assert_eq!(cd.client_version, "4.17.2");
        // a follow-up SEND goes out
        assert_eq!(
            harness.drain_outgoing(),
            vec![TelnetMessage::Subnegotiation {
                option: codes::MTTS,
                data: vec![1],
            }]
        );

        // response 2: terminal type is ignored once the client named itself
        let mut response = vec![0u8];
        response.extend_from_slice(b"XTERM-256COLOR");
        harness.subnegotiate(codes::MTTS, &response).await;
        assert_eq!(harness.client_data().client_name, "MUDLET");
        harness.drain_outgoing();

        // response 3: the bitmask raises capabilities
        let mut response = vec![0u8];
        response.extend_from_slice(b"MTTS 845"); // ansi|utf8|xterm256|screenreader|truecolor|mnes
        harness.subnegotiate(codes::MTTS, &response).await;
        let cd = harness.client_data();
        assert_eq!(cd.color, 3);
        assert_eq!(cd.encoding, "utf-8");
        assert!(cd.screen_reader);
        assert!(cd.mnes);
        // cycle complete, no further SEND
        assert!(harness.drain_outgoing().is_empty());
    }

    #[tokio::test]
    async fn mtts_two_identical_responses_complete_the_cycle() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.negotiate(NegotiationCommand::Will, codes::MTTS).await;
        harness.drain_outgoing();

        let mut response = vec![0u8];
        response.extend_from_slice(b"ANSI");
        harness.subnegotiate(codes::MTTS, &response).await;
        assert!(!harness.drain_outgoing().is_empty());

        harness.subnegotiate(codes::MTTS, &response).await;
        // repeated response ends the cycle without another SEND
        assert!(harness.drain_outgoing().is_empty());
    }

    #[tokio::test]
    async fn mccp2_local_enable_emits_activation_subnegotiation() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.drain_outgoing();

        harness.negotiate(NegotiationCommand::Do, codes::MCCP2).await;
        let sent = harness.drain_outgoing();
        assert_eq!(
            sent,
            vec![TelnetMessage::Subnegotiation {
                option: codes::MCCP2,
                data: Vec::new(),
            }]
        );
        assert!(harness.client_data().mccp2);
    }

    #[tokio::test]
    async fn gmcp_core_hello_updates_identity_and_forwards() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.drain_to_game();

        let mut ctx = OptionContext {
            outgoing: &harness.outgoing_tx,
            to_game: &harness.to_game_tx,
            client_data: &harness.client_data,
            pending: &mut harness.pending,
        };
        let body = json!({"client": "Mudlet", "version": "4.0"});
        harness
            .options
            .handle_gmcp("Core.Hello", &body, &mut ctx)
            .await;

        let cd = harness.client_data();
        assert_eq!(cd.client_name, "Mudlet");
        assert_eq!(cd.client_version, "4.0");

        let forwarded = harness.drain_to_game();
        assert!(forwarded.contains(&ToGameMessage::Gmcp {
            package: "Core.Hello".to_owned(),
            data: body,
        }));
    }

    #[tokio::test]
    async fn wont_after_do_fires_reject_and_disables() {
        let mut harness = Harness::new();
        harness.start().await;
        harness.drain_outgoing();

        harness.negotiate(NegotiationCommand::Wont, codes::NAWS).await;
        let state = harness.options.state(codes::NAWS).unwrap();
        assert!(!state.remote.enabled);
        assert!(!state.remote.negotiating);
    }

    #[test]
    fn pending_signals_fire_exactly_once() {
        let mut pending = PendingSignals::new();
        pending.register("NAWS");
        pending.fire("NAWS");
        pending.fire("NAWS");
        let mut receivers = pending.take_receivers();
        assert_eq!(receivers.len(), 1);
        assert!(receivers[0].try_recv().is_ok());
        assert!(receivers[0].try_recv().is_err());
    }

    #[test]
    fn disconnect_reason_default_is_unknown() {
        assert_eq!(DisconnectReason::default(), DisconnectReason::Unknown);
    }
}
