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

//! # Volcano Telnet
//!
//! The telnet session subsystem of the portal: a byte-level protocol codec,
//! per-option negotiation state machines, on-the-fly MCCP2/MCCP3 stream
//! compression and the per-connection task model that couples one duplex
//! socket to the two in-process message channels ("to-game" and
//! "to-telnet").
//!
//! ## Overview
//!
//! The Telnet protocol (RFC 854/855) frames control traffic with the IAC
//! byte (0xFF). This crate handles:
//!
//! - **Data transmission**: application bytes with IAC escaping
//! - **Option negotiation**: DO, DONT, WILL, WONT per-option state machines
//! - **Subnegotiation**: framed option payloads with doubled-IAC escaping
//! - **MUD extensions**: NAWS, CHARSET, MTTS, MSSP, MCCP2/MCCP3, GMCP,
//!   LINEMODE and SGA
//!
//! ## Core Components
//!
//! ### [`TelnetMessage`]
//!
//! The typed form of everything that crosses the wire: application data,
//! negotiation commands, bare commands, subnegotiations and GMCP packages
//! (which are surfaced pre-parsed, JSON body included).
//!
//! ### [`codec`]
//!
//! [`codec::parse`] turns a byte view into `(message, consumed)` pairs,
//! returning `None` while a sequence is still incomplete so the caller can
//! buffer and retry. [`codec::encode`] is the byte-exact inverse.
//!
//! ### [`TelnetConnection`]
//!
//! Drives one client session: a reader, a writer, a keep-alive ticker and a
//! link-delivery task race on a single cancellation token. Negotiation runs
//! against a deadline; whatever capabilities were discovered by then ride
//! along in the [`TelnetLink`] handed to the portal through the process-wide
//! [`link_channel`].
//!
//! ## Ordering Guarantees
//!
//! - Outbound bytes leave in the order their messages reached the outgoing
//!   queue.
//! - The MCCP2 subnegotiation is the last uncompressed thing written; every
//!   byte after it is deflated.
//! - The MCCP3 subnegotiation is parsed from the plain stream; every byte
//!   after its closing SE is treated as deflate input.

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

pub mod codec;
mod connection;
mod options;

pub use self::connection::{ConnectionInfo, TelnetConnection};

use once_cell::sync::Lazy;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use volcano_mud::ClientData;

/// Protocol byte values for commands and options.
///
/// Values follow the IANA telnet assignments; only the options this portal
/// actually negotiates are named.
pub mod codes {
    /// Interpret As Command.
    pub const IAC: u8 = 255;
    /// Refuse or require the peer to disable an option.
    pub const DONT: u8 = 254;
    /// Request the peer enable an option.
    pub const DO: u8 = 253;
    /// Refuse or announce disabling an option locally.
    pub const WONT: u8 = 252;
    /// Offer or announce enabling an option locally.
    pub const WILL: u8 = 251;
    /// Subnegotiation begin.
    pub const SB: u8 = 250;
    /// Subnegotiation end.
    pub const SE: u8 = 240;
    /// No operation.
    pub const NOP: u8 = 241;
    /// Are You There.
    pub const AYT: u8 = 246;

    /// Suppress Go Ahead (RFC 858).
    pub const SGA: u8 = 3;
    /// Terminal type, carrying the MUD Terminal Type Standard.
    pub const MTTS: u8 = 24;
    /// End of Record (RFC 885).
    pub const EOR: u8 = 25;
    /// Negotiate About Window Size (RFC 1073).
    pub const NAWS: u8 = 31;
    /// Linemode (RFC 1184).
    pub const LINEMODE: u8 = 34;
    /// MUD New-Environ Standard.
    pub const MNES: u8 = 39;
    /// Charset (RFC 2066).
    pub const CHARSET: u8 = 42;
    /// MUD Server Status Protocol.
    pub const MSSP: u8 = 70;
    /// MUD Client Compression Protocol v2 (outbound).
    pub const MCCP2: u8 = 86;
    /// MUD Client Compression Protocol v3 (inbound).
    pub const MCCP3: u8 = 87;
    /// Generic MUD Communication Protocol.
    pub const GMCP: u8 = 201;
}

/// One of the four negotiation verbs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NegotiationCommand {
    /// Peer offers / announces an option on its side.
    Will,
    /// Peer refuses / disables an option on its side.
    Wont,
    /// Peer asks us to enable an option.
    Do,
    /// Peer asks us to disable an option.
    Dont,
}

impl NegotiationCommand {
    /// The wire byte for this verb.
    pub fn to_u8(self) -> u8 {
        match self {
            NegotiationCommand::Will => codes::WILL,
            NegotiationCommand::Wont => codes::WONT,
            NegotiationCommand::Do => codes::DO,
            NegotiationCommand::Dont => codes::DONT,
        }
    }

    /// Decode a wire byte; `None` for anything that is not a verb.
    pub fn from_u8(byte: u8) -> Option<NegotiationCommand> {
        match byte {
            codes::WILL => Some(NegotiationCommand::Will),
            codes::WONT => Some(NegotiationCommand::Wont),
            codes::DO => Some(NegotiationCommand::Do),
            codes::DONT => Some(NegotiationCommand::Dont),
            _ => None,
        }
    }
}

/// A parsed telnet wire message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TelnetMessage {
    /// Application bytes (already IAC-unescaped).
    AppData(Vec<u8>),
    /// A framed option payload, unescaped.
    Subnegotiation {
        /// Option code.
        option: u8,
        /// Payload with doubled IACs collapsed.
        data: Vec<u8>,
    },
    /// A negotiation verb for an option.
    Negotiation {
        /// The verb.
        command: NegotiationCommand,
        /// Option code.
        option: u8,
    },
    /// A bare two-byte command such as NOP or AYT.
    Command {
        /// Command code.
        code: u8,
    },
    /// A GMCP package, body parsed as JSON (null when absent or malformed).
    Gmcp {
        /// Dotted package name.
        package: String,
        /// JSON body.
        data: Value,
    },
}

/// Why a connection ended. Stored once per connection by the first task to
/// observe the cause.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The portal side asked for the session to close.
    ClientDisconnect,
    /// The remote peer closed the socket.
    RemoteDisconnect,
    /// The session was administratively aborted.
    Aborted,
    /// The framing buffer exceeded its limit.
    BufferOverflow,
    /// The line accumulator exceeded its limit.
    AppdataOverflow,
    /// The peer violated the protocol.
    ProtocolError,
    /// An I/O or codec failure.
    Error,
    /// No reason was recorded.
    #[default]
    Unknown,
}

/// Messages delivered from the telnet session to the game side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToGameMessage {
    /// A complete input line, newline and trailing `\r` stripped.
    AppData(String),
    /// A GMCP package from the client.
    Gmcp {
        /// Dotted package name.
        package: String,
        /// JSON body (null when absent or malformed).
        data: Value,
    },
    /// A capability delta; only changed fields are present.
    ChangeCapabilities(Value),
    /// The session ended.
    Disconnect(DisconnectReason),
}

/// Messages the game side sends back down to the telnet session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ToTelnetMessage {
    /// Raw text towards the client.
    AppData(String),
    /// A GMCP package towards the client.
    Gmcp {
        /// Dotted package name.
        package: String,
        /// JSON body; omitted from the wire when null.
        data: Value,
    },
    /// MSSP status variables towards the client.
    Mssp {
        /// Name/value pairs in transmission order.
        variables: Vec<(String, String)>,
    },
    /// Close the session with the given reason.
    Disconnect(DisconnectReason),
}

/// Buffer and timing limits for a connection.
#[derive(Clone, Copy, Debug)]
pub struct TelnetLimits {
    /// Ceiling for the live decode buffer.
    pub max_message_buffer: usize,
    /// Ceiling for the unterminated-line accumulator.
    pub max_appdata_buffer: usize,
    /// How long the negotiation barrier waits before proceeding.
    pub negotiation_deadline: Duration,
}

impl Default for TelnetLimits {
    fn default() -> TelnetLimits {
        TelnetLimits {
            max_message_buffer: 2 * 1024 * 1024,
            max_appdata_buffer: 64 * 1024,
            negotiation_deadline: Duration::from_secs(3),
        }
    }
}

/// The per-session handoff record delivered to the portal once negotiation
/// completes (or its deadline fires).
#[derive(Debug)]
pub struct TelnetLink {
    /// Process-unique connection id.
    pub connection_id: i64,
    /// Remote socket address.
    pub remote_addr: SocketAddr,
    /// Reverse-resolved hostname, when known.
    pub hostname: String,
    /// Capability snapshot at link creation; kept current by applying
    /// [`ToGameMessage::ChangeCapabilities`] deltas.
    pub client_data: ClientData,
    /// Messages from the telnet session.
    pub to_game: mpsc::Receiver<ToGameMessage>,
    /// Messages back to the telnet session.
    pub to_telnet: mpsc::Sender<ToTelnetMessage>,
}

/// Capacity of the process-wide link channel.
const LINK_CHANNEL_CAPACITY: usize = 256;

struct LinkChannel {
    sender: mpsc::Sender<TelnetLink>,
    receiver: Mutex<Option<mpsc::Receiver<TelnetLink>>>,
}

static LINK_CHANNEL: Lazy<LinkChannel> = Lazy::new(|| {
    let (sender, receiver) = mpsc::channel(LINK_CHANNEL_CAPACITY);
    LinkChannel {
        sender,
        receiver: Mutex::new(Some(receiver)),
    }
});

/// A sender onto the process-wide link channel.
pub fn link_sender() -> mpsc::Sender<TelnetLink> {
    LINK_CHANNEL.sender.clone()
}

/// Take the receive side of the process-wide link channel. There is exactly
/// one; subsequent calls return `None`.
pub fn take_link_receiver() -> Option<mpsc::Receiver<TelnetLink>> {
    LINK_CHANNEL
        .receiver
        .lock()
        .expect("link channel mutex poisoned")
        .take()
}
