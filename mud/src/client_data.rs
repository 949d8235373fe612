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

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn unknown() -> String {
    "UNKNOWN".to_owned()
}

fn ascii() -> String {
    "ascii".to_owned()
}

fn default_width() -> u16 {
    78
}

fn default_height() -> u16 {
    24
}

/// Everything the portal knows about a remote client.
///
/// Defaults describe a client that has negotiated nothing: unknown identity,
/// ascii encoding, no color, a conservative 78x24 geometry, every feature
/// flag off. The telnet option machinery raises fields as the client reveals
/// itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientData {
    /// Remote network address in display form.
    #[serde(skip_serializing)]
    pub client_address: String,
    /// Reverse-resolved hostname, when available.
    #[serde(skip_serializing)]
    pub client_hostname: String,
    /// Wire protocol the client connected with (`telnet`, `websocket`, ...).
    pub client_protocol: String,
    /// Client software name as declared over MTTS or GMCP `Core.Hello`.
    pub client_name: String,
    /// Client software version.
    pub client_version: String,
    /// Negotiated text encoding.
    pub encoding: String,
    /// Whether the transport is TLS.
    pub tls: bool,
    /// Color depth: 0=none, 1=ansi16, 2=xterm256, 3=truecolor.
    pub color: u8,
    /// Terminal width in cells.
    pub width: u16,
    /// Terminal height in cells.
    pub height: u16,
    /// MSSP negotiated.
    pub mssp: bool,
    /// MCCP2 negotiated.
    pub mccp2: bool,
    /// Outbound compression actually running.
    pub mccp2_enabled: bool,
    /// MCCP3 negotiated.
    pub mccp3: bool,
    /// Inbound compression actually running.
    pub mccp3_enabled: bool,
    /// GMCP negotiated.
    pub gmcp: bool,
    /// MTTS negotiated.
    pub mtts: bool,
    /// NAWS negotiated.
    pub naws: bool,
    /// CHARSET negotiated.
    pub charset: bool,
    /// MNES support reported by MTTS.
    pub mnes: bool,
    /// LINEMODE negotiated.
    pub linemode: bool,
    /// Suppress-go-ahead negotiated.
    pub sga: bool,
    /// Client needs explicit line endings.
    pub force_endline: bool,
    /// Client reports a screen reader.
    pub screen_reader: bool,
    /// Client supports mouse tracking.
    pub mouse_tracking: bool,
    /// Client reports VT100 compatibility.
    pub vt100: bool,
    /// Client supports OSC color palette queries.
    pub osc_color_palette: bool,
    /// Client is a proxy.
    pub proxy: bool,
    /// Client advertises TLS support.
    pub tls_support: bool,
}

impl Default for ClientData {
    fn default() -> ClientData {
        ClientData {
            client_address: unknown(),
            client_hostname: unknown(),
            client_protocol: unknown(),
            client_name: unknown(),
            client_version: unknown(),
            encoding: ascii(),
            tls: false,
            color: 0,
            width: default_width(),
            height: default_height(),
            mssp: false,
            mccp2: false,
            mccp2_enabled: false,
            mccp3: false,
            mccp3_enabled: false,
            gmcp: false,
            mtts: false,
            naws: false,
            charset: false,
            mnes: false,
            linemode: false,
            sga: false,
            force_endline: false,
            screen_reader: false,
            mouse_tracking: false,
            vt100: false,
            osc_color_palette: false,
            proxy: false,
            tls_support: false,
        }
    }
}

impl ClientData {
    /// Serialize to a JSON document with the stable field names.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Merge a capability delta: only fields present in `delta` are applied,
    /// unknown keys are ignored.
    pub fn apply_delta(&mut self, delta: &Value) {
        let Some(map) = delta.as_object() else {
            return;
        };

        for (key, value) in map {
            match key.as_str() {
                "client_protocol" => apply_string(&mut self.client_protocol, value),
                "client_name" => apply_string(&mut self.client_name, value),
                "client_version" => apply_string(&mut self.client_version, value),
                "encoding" => apply_string(&mut self.encoding, value),
                "tls" => apply_bool(&mut self.tls, value),
                "color" => apply_u8(&mut self.color, value),
                "width" => apply_u16(&mut self.width, value),
                "height" => apply_u16(&mut self.height, value),
                "mssp" => apply_bool(&mut self.mssp, value),
                "mccp2" => apply_bool(&mut self.mccp2, value),
                "mccp2_enabled" => apply_bool(&mut self.mccp2_enabled, value),
                "mccp3" => apply_bool(&mut self.mccp3, value),
                "mccp3_enabled" => apply_bool(&mut self.mccp3_enabled, value),
                "gmcp" => apply_bool(&mut self.gmcp, value),
                "mtts" => apply_bool(&mut self.mtts, value),
                "naws" => apply_bool(&mut self.naws, value),
                "charset" => apply_bool(&mut self.charset, value),
                "mnes" => apply_bool(&mut self.mnes, value),
                "linemode" => apply_bool(&mut self.linemode, value),
                "sga" => apply_bool(&mut self.sga, value),
                "force_endline" => apply_bool(&mut self.force_endline, value),
                "screen_reader" => apply_bool(&mut self.screen_reader, value),
                "mouse_tracking" => apply_bool(&mut self.mouse_tracking, value),
                "vt100" => apply_bool(&mut self.vt100, value),
                "osc_color_palette" => apply_bool(&mut self.osc_color_palette, value),
                "proxy" => apply_bool(&mut self.proxy, value),
                "tls_support" => apply_bool(&mut self.tls_support, value),
                _ => {}
            }
        }
    }
}

fn apply_string(slot: &mut String, value: &Value) {
    if let Some(s) = value.as_str() {
        *slot = s.to_owned();
    }
}

fn apply_bool(slot: &mut bool, value: &Value) {
    if let Some(b) = value.as_bool() {
        *slot = b;
    }
}

fn apply_u8(slot: &mut u8, value: &Value) {
    if let Some(n) = value.as_u64() {
        *slot = n.min(u64::from(u8::MAX)) as u8;
    }
}

fn apply_u16(slot: &mut u16, value: &Value) {
    if let Some(n) = value.as_u64() {
        *slot = n.min(u64::from(u16::MAX)) as u16;
    }
}
