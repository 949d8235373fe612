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

use crate::{ClientContext, PortalResult};
use async_trait::async_trait;
use serde_json::Value;

/// What the mode loop does after a handler callback.
pub enum Flow {
    /// Stay in the current mode.
    Continue,
    /// Leave the current mode and enter the given one.
    Switch(Box<dyn ModeHandler>),
    /// Close the session.
    Disconnect,
}

/// One state of a portal client's mode stack: login, character select,
/// in-game, and so on.
///
/// The client bridges telnet traffic into the active handler; the handler
/// answers with a [`Flow`] telling the client whether to stay, switch modes
/// or hang up. All callbacks default to doing nothing.
#[async_trait]
pub trait ModeHandler: Send {
    /// Called once when the mode becomes active.
    async fn enter_mode(&mut self, client: &mut ClientContext<'_>) -> PortalResult<()> {
        let _ = client;
        Ok(())
    }

    /// Called once when the mode is left.
    async fn exit_mode(&mut self, client: &mut ClientContext<'_>) -> PortalResult<()> {
        let _ = client;
        Ok(())
    }

    /// A complete input line from the player.
    async fn handle_command(
        &mut self,
        client: &mut ClientContext<'_>,
        line: &str,
    ) -> PortalResult<Flow> {
        let _ = (client, line);
        Ok(Flow::Continue)
    }

    /// A GMCP package from the player's client.
    async fn handle_gmcp(
        &mut self,
        client: &mut ClientContext<'_>,
        package: &str,
        data: &Value,
    ) -> PortalResult<Flow> {
        let _ = (client, package, data);
        Ok(Flow::Continue)
    }

    /// The telnet session ended.
    async fn handle_disconnect(&mut self, client: &mut ClientContext<'_>) -> PortalResult<()> {
        let _ = client;
        Ok(())
    }
}
