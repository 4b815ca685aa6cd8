use std::sync::Arc;

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use crypto_bigint::subtle::ConstantTimeEq;

/// The shared secret for machine clients such as `vg-roast`.
/// `None` disables the JSON API entirely.
#[derive(Clone, Default)]
pub struct PrincipalSecret(pub Option<Arc<str>>);

/// Service principal authentication via Bearer token
pub struct ServicePrincipal;

#[async_trait]
impl<S> FromRequestParts<S> for ServicePrincipal
where
    PrincipalSecret: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let no = |msg: &'static str| (StatusCode::UNAUTHORIZED, msg);

        let PrincipalSecret(Some(expected)) = PrincipalSecret::from_ref(state) else {
            return Err(no("The API is disabled on this server"));
        };

        let auth_header = parts
            .headers
            .get("Authorization")
            .ok_or(no("No Authorization header"))?;

        let auth_str = auth_header
            .to_str()
            .map_err(|_| no("Invalid Authorization header"))?;

        let token = auth_str
            .strip_prefix("Bearer ")
            .ok_or(no("Authorization must be Bearer token"))?;

        // Constant-time comparison to prevent timing attacks
        if token.as_bytes().ct_eq(expected.as_bytes()).into() {
            Ok(ServicePrincipal)
        } else {
            Err(no("Invalid service principal secret"))
        }
    }
}
