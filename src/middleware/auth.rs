use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::{Error, ErrorKind};
use crate::utils::token::verify_token;
use crate::AppState;

/// The signed-in user, inserted into request extensions by `require_auth`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub id: String,
}

fn unauthenticated(message: &str) -> Response {
    Error::backend(ErrorKind::Unauthenticated, message).into_response()
}

pub async fn require_auth(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(auth_header) = req.headers().get(axum::http::header::AUTHORIZATION) else {
        return unauthenticated("missing authorization header");
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return unauthenticated("unreadable authorization header");
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return unauthenticated("unsupported authorization scheme");
    };

    match verify_token(token.trim(), &state.config.jwt_secret) {
        Ok(claims) => {
            req.extensions_mut().insert(AuthUser { id: claims.sub });
            next.run(req).await
        }
        Err(err) => err.into_response(),
    }
}
