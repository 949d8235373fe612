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

//! The per-connection driver.
//!
//! [`TelnetConnection::run`] composes four cooperative tasks over one duplex
//! stream:
//!
//! 1. **Reader**: socket bytes, MCCP3 inflation, framing, dispatch into the
//!    option machinery and the to-game channel.
//! 2. **Writer**: drains the outgoing queue and the to-telnet channel,
//!    encodes, deflates once MCCP2 is active, writes.
//! 3. **Keep-alive**: IAC NOP every 30 seconds once the peer has spoken
//!    telnet.
//! 4. **Link**: waits out the negotiation barrier, delivers the
//!    [`TelnetLink`] to the portal, then parks until shutdown.
//!
//! All four share one cancellation token. The first task to observe a
//! terminal condition stores the [`DisconnectReason`] (a one-shot CAS) and
//! cancels the rest; `run` returns the stored reason.

use crate::options::{OptionContext, PendingSignals, TelnetOptions};
use crate::{
    codec, codes, DisconnectReason, TelnetLimits, TelnetLink, TelnetMessage, ToGameMessage,
    ToTelnetMessage,
};
use bytes::{Buf, BytesMut};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use volcano_compress::{DeflateStream, FlushMode, InflateStream};
use volcano_mud::ClientData;
use volcano_net::AnyStream;

/// Capacity of the outgoing, to-game and to-telnet channels.
const CHANNEL_CAPACITY: usize = 100;
/// Socket read chunk size.
const READ_CHUNK: usize = 4096;
/// Keep-alive period.
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);
/// MCCP2 deflate level.
const MCCP2_LEVEL: u32 = 9;

/// What the writer drains: encoded protocol traffic or a close marker.
#[derive(Debug)]
pub(crate) enum OutgoingMessage {
    Message(TelnetMessage),
    Disconnect(DisconnectReason),
}

/// Identity of one accepted connection.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    /// Process-unique id.
    pub connection_id: i64,
    /// Remote socket address.
    pub remote_addr: SocketAddr,
    /// Reverse-resolved hostname, when known.
    pub hostname: String,
    /// Whether the transport is TLS.
    pub tls: bool,
}

/// One-shot shutdown machinery shared by the four tasks: the first caller's
/// reason sticks, everyone else just observes the cancellation.
struct Shutdown {
    token: CancellationToken,
    reason: OnceLock<DisconnectReason>,
}

impl Shutdown {
    fn new() -> Shutdown {
        Shutdown {
            token: CancellationToken::new(),
            reason: OnceLock::new(),
        }
    }

    fn signal(&self, reason: DisconnectReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    fn reason(&self) -> DisconnectReason {
        self.reason.get().copied().unwrap_or_default()
    }
}

/// Classify an I/O error per the disconnect taxonomy: peer-went-away errors
/// count as remote disconnects, everything else is an error.
fn classify_io_error(err: &std::io::Error) -> DisconnectReason {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe => DisconnectReason::RemoteDisconnect,
        _ => DisconnectReason::Error,
    }
}

/// A telnet session over any duplex stream.
pub struct TelnetConnection<S> {
    io: S,
    info: ConnectionInfo,
    limits: TelnetLimits,
    link_tx: mpsc::Sender<TelnetLink>,
}

impl TelnetConnection<AnyStream> {
    /// Wrap an accepted stream, publishing the link on the process-wide
    /// channel.
    pub fn new(stream: AnyStream) -> TelnetConnection<AnyStream> {
        let info = ConnectionInfo {
            connection_id: stream.id(),
            remote_addr: stream.peer_addr(),
            hostname: stream.hostname().to_owned(),
            tls: stream.is_tls(),
        };
        TelnetConnection::from_parts(stream, info, TelnetLimits::default())
    }
}

impl<S> TelnetConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    /// Build a connection over an arbitrary stream with explicit identity
    /// and limits.
    pub fn from_parts(io: S, info: ConnectionInfo, limits: TelnetLimits) -> TelnetConnection<S> {
        TelnetConnection {
            io,
            info,
            limits,
            link_tx: crate::link_sender(),
        }
    }

    /// Deliver the link to a specific channel instead of the process-wide
    /// one.
    #[must_use]
    pub fn with_link_sender(mut self, link_tx: mpsc::Sender<TelnetLink>) -> TelnetConnection<S> {
        self.link_tx = link_tx;
        self
    }

    /// Drive the session to completion and report why it ended.
    pub async fn run(self) -> DisconnectReason {
        let TelnetConnection {
            io,
            info,
            limits,
            link_tx,
        } = self;

        let (outgoing_tx, outgoing_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_game_tx, to_game_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (to_telnet_tx, to_telnet_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let client_data = Arc::new(Mutex::new(ClientData {
            client_address: info.remote_addr.ip().to_string(),
            client_hostname: info.hostname.clone(),
            client_protocol: "telnet".to_owned(),
            tls: info.tls,
            ..ClientData::default()
        }));

        let shutdown = Arc::new(Shutdown::new());
        let telnet_mode = Arc::new(AtomicBool::new(false));

        let mut options = TelnetOptions::new();
        let mut pending = PendingSignals::new();
        {
            let mut ctx = OptionContext {
                outgoing: &outgoing_tx,
                to_game: &to_game_tx,
                client_data: &client_data,
                pending: &mut pending,
            };
            options.start(&mut ctx).await;
        }
        let pending_receivers = pending.take_receivers();

        let (read_half, write_half) = tokio::io::split(io);

        info!(
            connection_id = info.connection_id,
            peer = %info.remote_addr,
            "telnet connection starting"
        );

        let reader = Reader {
            io: read_half,
            options,
            pending,
            outgoing: outgoing_tx.clone(),
            to_game: to_game_tx.clone(),
            client_data: Arc::clone(&client_data),
            telnet_mode: Arc::clone(&telnet_mode),
            limits,
            shutdown: Arc::clone(&shutdown),
        };
        let writer = Writer {
            io: write_half,
            outgoing_rx,
            to_telnet_rx,
            to_game: to_game_tx.clone(),
            client_data: Arc::clone(&client_data),
            shutdown: Arc::clone(&shutdown),
        };
        let keepalive = KeepAlive {
            outgoing: outgoing_tx.clone(),
            telnet_mode: Arc::clone(&telnet_mode),
            shutdown: Arc::clone(&shutdown),
        };
        let link = LinkDelivery {
            info: info.clone(),
            client_data: Arc::clone(&client_data),
            pending_receivers,
            to_game_rx,
            to_telnet_tx,
            link_tx,
            deadline: limits.negotiation_deadline,
            shutdown: Arc::clone(&shutdown),
        };

        tokio::join!(reader.run(), writer.run(), keepalive.run(), link.run());

        let reason = shutdown.reason();
        info!(
            connection_id = info.connection_id,
            ?reason,
            "telnet connection closed"
        );
        reason
    }
}

/// The reader task: bytes in, messages dispatched.
struct Reader<R> {
    io: R,
    options: TelnetOptions,
    pending: PendingSignals,
    outgoing: mpsc::Sender<OutgoingMessage>,
    to_game: mpsc::Sender<ToGameMessage>,
    client_data: Arc<Mutex<ClientData>>,
    telnet_mode: Arc<AtomicBool>,
    limits: TelnetLimits,
    shutdown: Arc<Shutdown>,
}

impl<R> Reader<R>
where
    R: AsyncRead + Unpin,
{
    async fn run(mut self) {
        let shutdown = Arc::clone(&self.shutdown);
        tokio::select! {
            () = shutdown.cancelled() => {}
            reason = self.read_loop() => {
                if let Some(reason) = reason {
                    shutdown.signal(reason);
                }
            }
        }
    }

    /// Returns the shutdown reason to record, or `None` when shutdown has
    /// already been arranged through the writer.
    async fn read_loop(&mut self) -> Option<DisconnectReason> {
        let mut wire_buf = BytesMut::with_capacity(READ_CHUNK);
        let mut decode_buf = BytesMut::new();
        let mut line_buf = BytesMut::new();
        let mut inflater: Option<InflateStream> = None;

        loop {
            // drain every complete message currently in the buffer
            while let Some((message, consumed)) = codec::parse(&decode_buf) {
                decode_buf.advance(consumed);

                if let TelnetMessage::Subnegotiation {
                    option: codes::MCCP3,
                    ..
                } = &message
                {
                    // every byte after the closing SE is deflate input
                    let mut stream = InflateStream::new();
                    let tail = decode_buf.split();
                    if !tail.is_empty() {
                        if let Err(err) =
                            stream.write(&tail, |chunk| decode_buf.extend_from_slice(chunk))
                        {
                            error!("inflate failed at MCCP3 activation: {err}");
                            let _ = self
                                .to_game
                                .send(ToGameMessage::Disconnect(DisconnectReason::Error))
                                .await;
                            return Some(DisconnectReason::Error);
                        }
                    }
                    inflater = Some(stream);
                    self.with_client_data(|cd| cd.mccp3_enabled = true);
                    self.publish(json!({"mccp3_enabled": true})).await;
                }

                if let Some(reason) = self.dispatch(message, &mut line_buf).await {
                    return reason;
                }
            }

            if decode_buf.len() > self.limits.max_message_buffer {
                warn!("framing buffer overflow, closing connection");
                return self.overflow(DisconnectReason::BufferOverflow).await;
            }

            wire_buf.reserve(READ_CHUNK);
            match self.io.read_buf(&mut wire_buf).await {
                Ok(0) => {
                    trace!("peer closed the connection");
                    let _ = self
                        .to_game
                        .send(ToGameMessage::Disconnect(DisconnectReason::RemoteDisconnect))
                        .await;
                    return Some(DisconnectReason::RemoteDisconnect);
                }
                Ok(_) => {}
                Err(err) => {
                    let reason = classify_io_error(&err);
                    debug!("read error: {err}");
                    let _ = self.to_game.send(ToGameMessage::Disconnect(reason)).await;
                    return Some(reason);
                }
            }

            let chunk = wire_buf.split();
            match &mut inflater {
                Some(stream) => {
                    if let Err(err) =
                        stream.write(&chunk, |piece| decode_buf.extend_from_slice(piece))
                    {
                        error!("inflate failed: {err}");
                        let _ = self
                            .to_game
                            .send(ToGameMessage::Disconnect(DisconnectReason::Error))
                            .await;
                        return Some(DisconnectReason::Error);
                    }
                }
                None => decode_buf.extend_from_slice(&chunk),
            }
        }
    }

    async fn dispatch(
        &mut self,
        message: TelnetMessage,
        line_buf: &mut BytesMut,
    ) -> Option<Option<DisconnectReason>> {
        match message {
            TelnetMessage::AppData(bytes) => {
                line_buf.extend_from_slice(&bytes);
                while let Some(pos) = line_buf.iter().position(|b| *b == b'\n') {
                    let mut line = line_buf.split_to(pos + 1);
                    line.truncate(pos);
                    if line.last() == Some(&b'\r') {
                        line.truncate(line.len() - 1);
                    }
                    let line = String::from_utf8_lossy(&line).into_owned();
                    if self.to_game.send(ToGameMessage::AppData(line)).await.is_err() {
                        debug!("to-game channel closed, dropping input line");
                    }
                }
                // only the unterminated residue counts against the limit
                if line_buf.len() > self.limits.max_appdata_buffer {
                    warn!("line accumulator overflow, closing connection");
                    return Some(self.overflow(DisconnectReason::AppdataOverflow).await);
                }
            }
            TelnetMessage::Negotiation { command, option } => {
                self.telnet_mode.store(true, Ordering::Relaxed);
                let mut ctx = OptionContext {
                    outgoing: &self.outgoing,
                    to_game: &self.to_game,
                    client_data: &self.client_data,
                    pending: &mut self.pending,
                };
                self.options.handle_negotiation(command, option, &mut ctx).await;
            }
            TelnetMessage::Subnegotiation { option, data } => {
                self.telnet_mode.store(true, Ordering::Relaxed);
                let mut ctx = OptionContext {
                    outgoing: &self.outgoing,
                    to_game: &self.to_game,
                    client_data: &self.client_data,
                    pending: &mut self.pending,
                };
                self.options
                    .handle_subnegotiation(option, &data, &mut ctx)
                    .await;
            }
            TelnetMessage::Gmcp { package, data } => {
                self.telnet_mode.store(true, Ordering::Relaxed);
                let mut ctx = OptionContext {
                    outgoing: &self.outgoing,
                    to_game: &self.to_game,
                    client_data: &self.client_data,
                    pending: &mut self.pending,
                };
                self.options.handle_gmcp(&package, &data, &mut ctx).await;
            }
            TelnetMessage::Command { code } => {
                self.telnet_mode.store(true, Ordering::Relaxed);
                trace!("telnet command 0x{code:02X}");
            }
        }

        None
    }

    /// Fatal buffer breach: tell the user, route the close through the
    /// writer so the notice still goes out, tell the game, then wait for
    /// the writer's shutdown to land.
    async fn overflow(&self, reason: DisconnectReason) -> Option<DisconnectReason> {
        let notice = match reason {
            DisconnectReason::AppdataOverflow => "\r\nInput line too long. Goodbye.\r\n",
            _ => "\r\nProtocol buffer overflow. Goodbye.\r\n",
        };
        let _ = self
            .outgoing
            .send(OutgoingMessage::Message(TelnetMessage::AppData(
                notice.as_bytes().to_vec(),
            )))
            .await;
        let _ = self.outgoing.send(OutgoingMessage::Disconnect(reason)).await;
        let _ = self.to_game.send(ToGameMessage::Disconnect(reason)).await;
        self.shutdown.cancelled().await;
        None
    }

    fn with_client_data(&self, f: impl FnOnce(&mut ClientData)) {
        if let Ok(mut guard) = self.client_data.lock() {
            f(&mut guard);
        }
    }

    async fn publish(&self, delta: serde_json::Value) {
        if self
            .to_game
            .send(ToGameMessage::ChangeCapabilities(delta))
            .await
            .is_err()
        {
            debug!("to-game channel closed while publishing capabilities");
        }
    }
}

/// The writer task: messages out, deflated once MCCP2 is live.
struct Writer<W> {
    io: W,
    outgoing_rx: mpsc::Receiver<OutgoingMessage>,
    to_telnet_rx: mpsc::Receiver<ToTelnetMessage>,
    to_game: mpsc::Sender<ToGameMessage>,
    client_data: Arc<Mutex<ClientData>>,
    shutdown: Arc<Shutdown>,
}

impl<W> Writer<W>
where
    W: AsyncWrite + Unpin,
{
    async fn run(mut self) {
        let shutdown = Arc::clone(&self.shutdown);
        tokio::select! {
            () = shutdown.cancelled() => {}
            reason = self.write_loop() => {
                shutdown.signal(reason);
            }
        }
        // best-effort close of our half
        let _ = self.io.shutdown().await;
    }

    async fn write_loop(&mut self) -> DisconnectReason {
        let mut compressing = false;
        let mut deflater = DeflateStream::new(MCCP2_LEVEL);
        let mut plain = BytesMut::new();
        let mut compressed: Vec<u8> = Vec::new();

        loop {
            let message = tokio::select! {
                biased;
                outgoing = self.outgoing_rx.recv() => match outgoing {
                    Some(message) => message,
                    // the protocol side is gone without a shutdown; record
                    // nothing better than Unknown
                    None => return DisconnectReason::Unknown,
                },
                to_telnet = self.to_telnet_rx.recv() => match to_telnet {
                    Some(message) => convert_to_telnet(message),
                    // the portal dropped its sender: the client side hung up
                    None => return DisconnectReason::ClientDisconnect,
                },
            };

            let message = match message {
                OutgoingMessage::Message(message) => message,
                OutgoingMessage::Disconnect(reason) => return reason,
            };

            plain.clear();
            codec::encode(&message, &mut plain);
            if plain.is_empty() {
                continue;
            }

            let result = if compressing {
                compressed.clear();
                match deflater.write(&plain, |chunk| compressed.extend_from_slice(chunk), FlushMode::Sync)
                {
                    Ok(_) => self.io.write_all(&compressed).await,
                    Err(err) => {
                        error!("deflate failed: {err}");
                        let _ = self
                            .to_game
                            .send(ToGameMessage::Disconnect(DisconnectReason::Error))
                            .await;
                        return DisconnectReason::Error;
                    }
                }
            } else {
                self.io.write_all(&plain).await
            };

            if let Err(err) = result {
                let reason = classify_io_error(&err);
                debug!("write error: {err}");
                let _ = self.to_game.send(ToGameMessage::Disconnect(reason)).await;
                return reason;
            }

            if let TelnetMessage::Subnegotiation {
                option: codes::MCCP2,
                ..
            } = &message
            {
                // this frame was the last uncompressed byte on the wire
                compressing = true;
                deflater.reset(Some(MCCP2_LEVEL));
                if let Ok(mut guard) = self.client_data.lock() {
                    guard.mccp2_enabled = true;
                }
                if self
                    .to_game
                    .send(ToGameMessage::ChangeCapabilities(
                        json!({"mccp2_enabled": true}),
                    ))
                    .await
                    .is_err()
                {
                    debug!("to-game channel closed while publishing capabilities");
                }
            }
        }
    }
}

/// Translate a game-side message into outgoing protocol traffic.
fn convert_to_telnet(message: ToTelnetMessage) -> OutgoingMessage {
    match message {
        ToTelnetMessage::AppData(text) => {
            OutgoingMessage::Message(TelnetMessage::AppData(text.into_bytes()))
        }
        ToTelnetMessage::Gmcp { package, data } => {
            OutgoingMessage::Message(TelnetMessage::Gmcp { package, data })
        }
        ToTelnetMessage::Mssp { variables } => {
            OutgoingMessage::Message(TelnetMessage::Subnegotiation {
                option: codes::MSSP,
                data: codec::mssp_payload(&variables),
            })
        }
        ToTelnetMessage::Disconnect(reason) => OutgoingMessage::Disconnect(reason),
    }
}

/// The keep-alive task: a NOP every period, once the peer has spoken IAC.
struct KeepAlive {
    outgoing: mpsc::Sender<OutgoingMessage>,
    telnet_mode: Arc<AtomicBool>,
    shutdown: Arc<Shutdown>,
}

impl KeepAlive {
    async fn run(self) {
        let shutdown = Arc::clone(&self.shutdown);
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = self.tick_loop() => {}
        }
    }

    async fn tick_loop(&self) {
        let mut interval = tokio::time::interval(KEEPALIVE_PERIOD);
        interval.tick().await; // immediate first tick
        loop {
            interval.tick().await;
            if !self.telnet_mode.load(Ordering::Relaxed) {
                continue;
            }
            let nop = OutgoingMessage::Message(TelnetMessage::Command { code: codes::NOP });
            if self.outgoing.send(nop).await.is_err() {
                return;
            }
        }
    }
}

/// The link task: negotiation barrier, then the handoff.
struct LinkDelivery {
    info: ConnectionInfo,
    client_data: Arc<Mutex<ClientData>>,
    pending_receivers: Vec<mpsc::Receiver<()>>,
    to_game_rx: mpsc::Receiver<ToGameMessage>,
    to_telnet_tx: mpsc::Sender<ToTelnetMessage>,
    link_tx: mpsc::Sender<TelnetLink>,
    deadline: Duration,
    shutdown: Arc<Shutdown>,
}

impl LinkDelivery {
    async fn run(self) {
        let shutdown = Arc::clone(&self.shutdown);
        tokio::select! {
            () = shutdown.cancelled() => {}
            () = self.deliver() => {}
        }
    }

    async fn deliver(mut self) {
        // the barrier: every registered option signals completion, or the
        // deadline fires; either way the link goes out with whatever
        // capabilities were discovered
        let mut receivers = std::mem::take(&mut self.pending_receivers);
        let wait_all = async {
            for receiver in &mut receivers {
                let _ = receiver.recv().await;
            }
        };
        if tokio::time::timeout(self.deadline, wait_all).await.is_err() {
            debug!(
                connection_id = self.info.connection_id,
                "negotiation deadline reached, proceeding"
            );
        }

        let client_data = self
            .client_data
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();

        let link = TelnetLink {
            connection_id: self.info.connection_id,
            remote_addr: self.info.remote_addr,
            hostname: self.info.hostname.clone(),
            client_data,
            to_game: self.to_game_rx,
            to_telnet: self.to_telnet_tx,
        };

        if self.link_tx.send(link).await.is_err() {
            warn!(
                connection_id = self.info.connection_id,
                "link channel closed, no portal client will serve this connection"
            );
        }

        // the link task owns nothing else to do; park until shutdown
        std::future::pending::<()>().await;
    }
}
