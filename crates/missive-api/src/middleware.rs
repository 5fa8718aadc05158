use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, error, info};

use missive_guard::{ClientIdentity, GateContext, GateRequest, RequestKind, Requester, Verdict};
use missive_types::api::Claims;
use missive_types::models::Role;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::messages::blocking;

/// Result of reading the bearer token. `None` means anonymous; whether that
/// is acceptable is the admission pipeline's call.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Option<Requester>);

/// Decode an optional JWT from the Authorization header. Never rejects.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let requester = token.and_then(|token| {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| debug!("Ignoring invalid token: {}", e))
        .ok()
        .map(|data| Requester {
            user_id: data.claims.sub,
            username: data.claims.username,
            role: data.claims.role,
        })
    });

    req.extensions_mut().insert(Authenticated(requester));
    next.run(req).await
}

/// One log line per gated request: who asked for what.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let user = req
        .extensions()
        .get::<Authenticated>()
        .and_then(|auth| auth.0.as_ref())
        .map_or_else(|| "Anonymous".to_string(), |r| r.username.clone());

    info!(user = %user, method = %req.method(), path = %req.uri().path(), "request");
    next.run(req).await
}

/// Run the admission pipeline. Admitted requests carry their `Requester`
/// on to the handler.
pub async fn admit(State(state): State<AppState>, mut req: Request, next: Next) -> Result<Response, ApiError> {
    let forwarded_for = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok());
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let identity = ClientIdentity::resolve(forwarded_for, peer, state.trust_proxy);

    let claimed = req
        .extensions()
        .get::<Authenticated>()
        .and_then(|auth| auth.0.clone());
    let requester = match claimed {
        Some(claimed) => current_requester(&state, claimed).await?,
        None => None,
    };

    let gate_request = GateRequest {
        identity: &identity,
        requester: requester.as_ref(),
        kind: RequestKind::from_method(req.method().as_str()),
    };

    match state.admission.evaluate(&gate_request, &GateContext::capture()) {
        Verdict::Admit => {}
        Verdict::Reject(rejection) => return Err(rejection.into()),
    }

    // Handlers always need a requester, even behind a pipeline without a role gate.
    let requester = requester.ok_or(missive_guard::Rejection::Unauthorized)?;
    req.extensions_mut().insert(requester);
    Ok(next.run(req).await)
}

/// Refresh a token's requester from the users table. The role gate must see
/// the role held now, not the one signed into the token; a deleted account
/// counts as anonymous.
async fn current_requester(state: &AppState, claimed: Requester) -> Result<Option<Requester>, ApiError> {
    blocking(state, move |state| {
        let Some(user) = state.db.get_user_by_id(&claimed.user_id.to_string())? else {
            debug!(user_id = %claimed.user_id, "token for a deleted account");
            return Ok(None);
        };

        let role: Role = user.role.parse().map_err(|e| {
            error!("User {} has {}", user.username, e);
            ApiError::Internal
        })?;
        if role != claimed.role {
            debug!(user = %user.username, token_role = %claimed.role, role = %role, "role changed since login");
        }

        Ok(Some(Requester {
            user_id: claimed.user_id,
            username: user.username,
            role,
        }))
    })
    .await
}
