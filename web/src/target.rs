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

use crate::{HttpScheme, HttpTarget, WebError, WebResult};
use std::net::IpAddr;
use url::{Host, Url};

/// Resolve a URL into an [`HttpTarget`].
///
/// Accepts `http` and `https` with their default ports. The host header
/// keeps IPv6 brackets and an explicit port only when it differs from the
/// scheme default. Literal addresses are used directly; names resolve
/// through the system resolver, taking the first endpoint.
pub async fn parse_http_target(url: &str) -> WebResult<HttpTarget> {
    let parsed = Url::parse(url).map_err(|e| WebError::InvalidUrl(e.to_string()))?;

    let scheme = match parsed.scheme() {
        "http" => HttpScheme::Http,
        "https" => HttpScheme::Https,
        other => {
            return Err(WebError::InvalidUrl(format!("unsupported scheme: {other}")));
        }
    };

    let host = parsed
        .host()
        .ok_or_else(|| WebError::InvalidUrl("URL must include a host".to_owned()))?;

    // the url crate drops default ports during normalization, so port() is
    // only Some for non-default ports
    let explicit_port = parsed.port();
    let port = explicit_port.unwrap_or_else(|| scheme.default_port());

    let mut host_header = match &host {
        Host::Domain(domain) => (*domain).to_owned(),
        Host::Ipv4(addr) => addr.to_string(),
        Host::Ipv6(addr) => format!("[{addr}]"),
    };
    if let Some(explicit) = explicit_port {
        host_header.push_str(&format!(":{explicit}"));
    }

    let address = match host {
        Host::Ipv4(addr) => IpAddr::V4(addr),
        Host::Ipv6(addr) => IpAddr::V6(addr),
        Host::Domain(domain) => {
            let mut endpoints = tokio::net::lookup_host((domain, port))
                .await
                .map_err(|e| WebError::Resolve(e.to_string()))?;
            endpoints
                .next()
                .map(|endpoint| endpoint.ip())
                .ok_or_else(|| WebError::Resolve(format!("no addresses for {domain}")))?
        }
    };

    Ok(HttpTarget {
        scheme,
        address,
        port,
        host_header,
    })
}
