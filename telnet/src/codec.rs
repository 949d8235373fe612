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

//! Telnet wire framing: parse an incoming byte stream into typed messages
//! and encode typed messages back to bytes with IAC escaping.
//!
//! [`parse`] is incremental: it returns `None` whenever the buffer ends
//! mid-sequence, and the caller keeps unconsumed bytes around until more
//! arrive. GMCP subnegotiations are surfaced pre-parsed as
//! [`TelnetMessage::Gmcp`] so downstream code never re-splits the payload.

use crate::{codes, NegotiationCommand, TelnetMessage};
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use serde_json::Value;

/// Parse one message off the front of `data`.
///
/// Returns `Some((message, consumed))` when a complete message is present,
/// `None` when more bytes are needed. `consumed` counts raw input bytes,
/// including escaping and framing.
pub fn parse(data: &[u8]) -> Option<(TelnetMessage, usize)> {
    if data.is_empty() {
        return None;
    }

    let avail = data.len();

    if data[0] != codes::IAC {
        // regular data, up to the next IAC or the end of the buffer
        let pos = data
            .iter()
            .position(|b| *b == codes::IAC)
            .unwrap_or(data.len());
        return Some((TelnetMessage::AppData(data[..pos].to_vec()), pos));
    }

    if avail < 2 {
        return None;
    }

    match data[1] {
        codes::SB => {
            // subnegotiation: IAC SB <opt> [<data>] IAC SE
            if avail < 5 {
                return None;
            }
            let option = data[2];
            let mut pos = 3;
            while pos + 1 < avail {
                if data[pos] == codes::IAC {
                    if data[pos + 1] == codes::SE {
                        let payload = unescape(&data[3..pos]);
                        let message = if option == codes::GMCP {
                            gmcp_from_payload(&payload)
                        } else {
                            TelnetMessage::Subnegotiation {
                                option,
                                data: payload,
                            }
                        };
                        return Some((message, pos + 2));
                    } else if data[pos + 1] == codes::IAC {
                        // escaped 255 byte
                        pos += 2;
                    } else {
                        pos += 1;
                    }
                } else {
                    pos += 1;
                }
            }
            // no unescaped IAC SE inside the buffer yet
            None
        }
        codes::IAC => {
            // escaped 255 data byte
            Some((TelnetMessage::AppData(vec![codes::IAC]), 2))
        }
        byte => {
            if let Some(command) = NegotiationCommand::from_u8(byte) {
                if avail < 3 {
                    return None;
                }
                Some((
                    TelnetMessage::Negotiation {
                        command,
                        option: data[2],
                    },
                    3,
                ))
            } else {
                Some((TelnetMessage::Command { code: byte }, 2))
            }
        }
    }
}

/// Collapse doubled IACs inside a subnegotiation payload.
fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] == codes::IAC && i + 1 < data.len() && data[i + 1] == codes::IAC {
            out.push(codes::IAC);
            i += 2;
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

/// Split a GMCP payload into package and JSON body at the first space.
/// A missing or malformed body becomes `null`.
fn gmcp_from_payload(payload: &[u8]) -> TelnetMessage {
    let text = String::from_utf8_lossy(payload);
    match text.split_once(' ') {
        Some((package, body)) => TelnetMessage::Gmcp {
            package: package.to_owned(),
            data: serde_json::from_str(body).unwrap_or(Value::Null),
        },
        None => TelnetMessage::Gmcp {
            package: text.into_owned(),
            data: Value::Null,
        },
    }
}

/// Append `data` with every 0xFF doubled.
pub fn append_iac_escaped(dst: &mut BytesMut, data: &[u8]) {
    for byte in data {
        dst.put_u8(*byte);
        if *byte == codes::IAC {
            dst.put_u8(codes::IAC);
        }
    }
}

/// Append a complete `IAC SB <opt> <escaped data> IAC SE` frame.
pub fn append_subnegotiation(dst: &mut BytesMut, option: u8, data: &[u8]) {
    dst.put_u8(codes::IAC);
    dst.put_u8(codes::SB);
    dst.put_u8(option);
    append_iac_escaped(dst, data);
    dst.put_u8(codes::IAC);
    dst.put_u8(codes::SE);
}

/// Encode a message onto `dst`.
///
/// Application data passes through verbatim; senders escape IACs before
/// framing. Subnegotiation payloads are escaped here. GMCP encodes as a
/// subnegotiation whose payload is the package name, optionally followed by
/// a space and the compact JSON body.
pub fn encode(message: &TelnetMessage, dst: &mut BytesMut) {
    match message {
        TelnetMessage::AppData(data) => {
            dst.put_slice(data);
        }
        TelnetMessage::Negotiation { command, option } => {
            dst.put_u8(codes::IAC);
            dst.put_u8(command.to_u8());
            dst.put_u8(*option);
        }
        TelnetMessage::Command { code } => {
            dst.put_u8(codes::IAC);
            dst.put_u8(*code);
        }
        TelnetMessage::Subnegotiation { option, data } => {
            append_subnegotiation(dst, *option, data);
        }
        TelnetMessage::Gmcp { package, data } => {
            let mut payload = package.clone().into_bytes();
            if !data.is_null() {
                payload.push(b' ');
                payload.extend_from_slice(data.to_string().as_bytes());
            }
            append_subnegotiation(dst, codes::GMCP, &payload);
        }
    }
}

/// Build a NAWS payload: width and height as big-endian u16s.
pub fn naws_payload(width: u16, height: u16) -> [u8; 4] {
    let mut out = [0u8; 4];
    BigEndian::write_u16(&mut out[0..2], width);
    BigEndian::write_u16(&mut out[2..4], height);
    out
}

/// Decode a NAWS payload; `None` unless it is exactly four bytes.
pub fn parse_naws_payload(data: &[u8]) -> Option<(u16, u16)> {
    if data.len() != 4 {
        return None;
    }
    Some((
        BigEndian::read_u16(&data[0..2]),
        BigEndian::read_u16(&data[2..4]),
    ))
}

/// MSSP variable marker.
const MSSP_VAR: u8 = 1;
/// MSSP value marker.
const MSSP_VAL: u8 = 2;

/// Build an MSSP payload: `VAR name VAL value` per pair.
pub fn mssp_payload(variables: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in variables {
        out.push(MSSP_VAR);
        out.extend_from_slice(name.as_bytes());
        out.push(MSSP_VAL);
        out.extend_from_slice(value.as_bytes());
    }
    out
}

/// Decode an MSSP payload back into name/value pairs. Unknown marker bytes
/// are skipped; values before any name are dropped.
pub fn parse_mssp_payload(data: &[u8]) -> Vec<(String, String)> {
    let mut variables = Vec::new();
    let mut current_name: Option<String> = None;
    let mut pos = 0;

    while pos < data.len() {
        match data[pos] {
            MSSP_VAR => {
                pos += 1;
                let start = pos;
                while pos < data.len() && data[pos] != MSSP_VAR && data[pos] != MSSP_VAL {
                    pos += 1;
                }
                current_name = Some(String::from_utf8_lossy(&data[start..pos]).into_owned());
            }
            MSSP_VAL => {
                pos += 1;
                let start = pos;
                while pos < data.len() && data[pos] != MSSP_VAR && data[pos] != MSSP_VAL {
                    pos += 1;
                }
                if let Some(name) = current_name.take() {
                    let value = String::from_utf8_lossy(&data[start..pos]).into_owned();
                    variables.push((name, value));
                }
            }
            _ => pos += 1,
        }
    }

    variables
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_all(mut data: &[u8]) -> Vec<TelnetMessage> {
        let mut out = Vec::new();
        while let Some((message, consumed)) = parse(data) {
            out.push(message);
            data = &data[consumed..];
        }
        assert!(data.is_empty(), "unconsumed bytes: {data:?}");
        out
    }

    #[test]
    fn parse_plain_data_run() {
        let (message, consumed) = parse(b"hello\xFF\xF1").unwrap();
        assert_eq!(message, TelnetMessage::AppData(b"hello".to_vec()));
        assert_eq!(consumed, 5);
    }

    #[test]
    fn parse_negotiation() {
        // IAC WILL NAWS
        let (message, consumed) = parse(&[0xFF, 0xFB, 0x1F]).unwrap();
        assert_eq!(
            message,
            TelnetMessage::Negotiation {
                command: NegotiationCommand::Will,
                option: 31,
            }
        );
        assert_eq!(consumed, 3);
    }

    #[test]
    fn parse_subnegotiation_with_escaped_iac() {
        // IAC SB CHARSET 0x02 "UTF" IAC IAC IAC SE
        let bytes = [0xFF, 0xFA, 0x2A, 0x02, 0x55, 0x54, 0x46, 0xFF, 0xFF, 0xFF, 0xF0];
        let (message, consumed) = parse(&bytes).unwrap();
        assert_eq!(
            message,
            TelnetMessage::Subnegotiation {
                option: codes::CHARSET,
                data: b"\x02UTF\xFF".to_vec(),
            }
        );
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn parse_escaped_iac_data_byte() {
        let (message, consumed) = parse(&[0xFF, 0xFF, b'x']).unwrap();
        assert_eq!(message, TelnetMessage::AppData(vec![0xFF]));
        assert_eq!(consumed, 2);
    }

    #[test]
    fn parse_bare_command() {
        let (message, consumed) = parse(&[0xFF, codes::NOP]).unwrap();
        assert_eq!(message, TelnetMessage::Command { code: codes::NOP });
        assert_eq!(consumed, 2);
    }

    #[test]
    fn parse_incomplete_sequences_need_more_data() {
        assert!(parse(&[]).is_none());
        assert!(parse(&[0xFF]).is_none());
        assert!(parse(&[0xFF, 0xFB]).is_none());
        // subnegotiation missing its IAC SE terminator
        assert!(parse(&[0xFF, 0xFA, 0x2A, b'a', b'b']).is_none());
        // terminator split: the closing SE is not in the buffer yet
        assert!(parse(&[0xFF, 0xFA, 0x2A, b'a', 0xFF]).is_none());
    }

    #[test]
    fn parse_gmcp_with_json_body() {
        let mut bytes = vec![0xFF, 0xFA, 0xC9];
        bytes.extend_from_slice(br#"Core.Hello {"client":"Mudlet","version":"4.0"}"#);
        bytes.extend_from_slice(&[0xFF, 0xF0]);
        let (message, consumed) = parse(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(
            message,
            TelnetMessage::Gmcp {
                package: "Core.Hello".to_owned(),
                data: json!({"client": "Mudlet", "version": "4.0"}),
            }
        );
    }

    #[test]
    fn parse_gmcp_without_body_or_with_bad_json_is_null() {
        let mut bytes = vec![0xFF, 0xFA, 0xC9];
        bytes.extend_from_slice(b"Core.Ping");
        bytes.extend_from_slice(&[0xFF, 0xF0]);
        let (message, _) = parse(&bytes).unwrap();
        assert_eq!(
            message,
            TelnetMessage::Gmcp {
                package: "Core.Ping".to_owned(),
                data: Value::Null,
            }
        );

        let mut bytes = vec![0xFF, 0xFA, 0xC9];
        bytes.extend_from_slice(b"Core.Hello not-json");
        bytes.extend_from_slice(&[0xFF, 0xF0]);
        let (message, _) = parse(&bytes).unwrap();
        assert_eq!(
            message,
            TelnetMessage::Gmcp {
                package: "Core.Hello".to_owned(),
                data: Value::Null,
            }
        );
    }

    #[test]
    fn parse_interleaved_stream() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"look\r\n");
        bytes.extend_from_slice(&[0xFF, 0xFB, codes::NAWS]);
        bytes.extend_from_slice(b"north");
        let messages = parse_all(&bytes);
        assert_eq!(
            messages,
            vec![
                TelnetMessage::AppData(b"look\r\n".to_vec()),
                TelnetMessage::Negotiation {
                    command: NegotiationCommand::Will,
                    option: codes::NAWS,
                },
                TelnetMessage::AppData(b"north".to_vec()),
            ]
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        let messages = vec![
            TelnetMessage::Negotiation {
                command: NegotiationCommand::Do,
                option: codes::CHARSET,
            },
            TelnetMessage::Command { code: codes::AYT },
            TelnetMessage::Subnegotiation {
                option: codes::MCCP2,
                data: Vec::new(),
            },
            TelnetMessage::Subnegotiation {
                option: codes::CHARSET,
                data: b"\x02utf-8\xFFtail".to_vec(),
            },
            TelnetMessage::Gmcp {
                package: "Char.Vitals".to_owned(),
                data: json!({"hp": 100}),
            },
            TelnetMessage::Gmcp {
                package: "Core.Ping".to_owned(),
                data: Value::Null,
            },
        ];

        for message in messages {
            let mut wire = BytesMut::new();
            encode(&message, &mut wire);
            let (decoded, consumed) = parse(&wire).unwrap_or_else(|| panic!("{message:?}"));
            assert_eq!(consumed, wire.len(), "{message:?}");
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn encode_escapes_iac_in_subnegotiation_payload() {
        let mut wire = BytesMut::new();
        encode(
            &TelnetMessage::Subnegotiation {
                option: 99,
                data: vec![0xFF],
            },
            &mut wire,
        );
        assert_eq!(&wire[..], &[0xFF, 0xFA, 99, 0xFF, 0xFF, 0xFF, 0xF0]);
    }

    #[test]
    fn encode_appdata_is_verbatim() {
        let mut wire = BytesMut::new();
        encode(&TelnetMessage::AppData(b"plain".to_vec()), &mut wire);
        assert_eq!(&wire[..], b"plain");
    }

    #[test]
    fn naws_payload_round_trip() {
        let payload = naws_payload(120, 40);
        assert_eq!(payload, [0, 120, 0, 40]);
        assert_eq!(parse_naws_payload(&payload), Some((120, 40)));
        assert_eq!(parse_naws_payload(&payload[..3]), None);
        // widths above 255 exercise the high byte
        assert_eq!(parse_naws_payload(&naws_payload(300, 24)), Some((300, 24)));
    }

    #[test]
    fn mssp_payload_round_trip() {
        let variables = vec![
            ("NAME".to_owned(), "Volcano".to_owned()),
            ("PLAYERS".to_owned(), "42".to_owned()),
        ];
        let payload = mssp_payload(&variables);
        assert_eq!(parse_mssp_payload(&payload), variables);
    }

    #[test]
    fn mssp_parse_skips_orphan_values() {
        // a VAL with no preceding VAR is dropped
        let mut payload = vec![2u8];
        payload.extend_from_slice(b"orphan");
        payload.push(1);
        payload.extend_from_slice(b"KEY");
        payload.push(2);
        payload.extend_from_slice(b"value");
        assert_eq!(
            parse_mssp_payload(&payload),
            vec![("KEY".to_owned(), "value".to_owned())]
        );
    }
}
