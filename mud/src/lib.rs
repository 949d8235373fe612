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

//! # Volcano Client Capabilities
//!
//! The [`ClientData`] record describes everything the portal has learned
//! about a remote client: protocol, declared name and version, encoding,
//! color depth, geometry and per-extension feature flags. The telnet layer
//! mutates it as negotiation progresses and publishes deltas towards the
//! game; the record itself JSON-round-trips with stable field names.

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
    clippy::struct_excessive_bools
)]

mod client_data;

pub use self::client_data::ClientData;
