// SPDX-License-Identifier: Apache-2.0, MIT

//! `POST /api/v1/nodes/register`. Mints a bearer token for a new (or
//! re-registering) node and persists its descriptor.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::auth::AuthSecret;
use crate::error::GatewayError;
use crate::models::Node;
use crate::repo::NodeRepo;
use crate::whitelist::Whitelist;

/// Bearer tokens are minted with this lifetime; nodes re-register well
/// before expiry in normal operation (pings do not renew the token).
const TOKEN_TTL_SECS: i64 = 30 * 24 * 3600;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub id: String,
    pub config_hash: String,
    pub payout_address: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub token: String,
    pub tunnel_server_address: String,
}

pub struct RegistrationController {
    node_repo: Arc<dyn NodeRepo>,
    auth: AuthSecret,
    whitelist: Whitelist,
    tunnel_server_address: String,
}

impl RegistrationController {
    pub fn new(
        node_repo: Arc<dyn NodeRepo>,
        auth: AuthSecret,
        whitelist: Whitelist,
        tunnel_server_address: String,
    ) -> Self {
        Self {
            node_repo,
            auth,
            whitelist,
            tunnel_server_address,
        }
    }

    pub async fn register(
        &self,
        req: RegisterRequest,
        now: i64,
    ) -> Result<RegisterResponse, GatewayError> {
        if !self.whitelist.is_allowed(&req.id) {
            return Err(GatewayError::NotWhitelisted(req.id));
        }

        let token = self
            .auth
            .issue(&req.id, now, TOKEN_TTL_SECS)
            .map_err(|_| GatewayError::InvalidToken)?;

        let node = Node {
            id: req.id,
            node_url: String::new(),
            config_hash: req.config_hash,
            payout_address: req.payout_address,
            token: token.clone(),
            last_used: now,
            penalized: false,
            penalty_count: 0,
            cooldown: 0,
        };
        self.node_repo.save(node).await?;

        Ok(RegisterResponse {
            token,
            tunnel_server_address: self.tunnel_server_address.clone(),
        })
    }
}
