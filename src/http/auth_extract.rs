// SPDX-License-Identifier: Apache-2.0, MIT

//! Bearer-token extractor for node-originated requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

use crate::auth::Claims;

use super::AppState;

/// The authenticated node identity, extracted from the `Authorization:
/// Bearer <token>` header and verified against [`crate::auth::AuthSecret`].
pub struct AuthenticatedNode(pub Claims);

impl FromRequestParts<std::sync::Arc<AppState>> for AuthenticatedNode {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &std::sync::Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing bearer token"))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or((StatusCode::UNAUTHORIZED, "malformed authorization header"))?;

        let claims = state
            .auth
            .verify(token)
            .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid bearer token"))?;

        Ok(AuthenticatedNode(claims))
    }
}
