use std::sync::Arc;

use axum::extract::FromRef;
use common_auth::JwtVerifier;
use sqlx::PgPool;

/// Shared application state used by handlers (kept in the library so tests
/// can build it without going through `main`).
#[derive(Clone)]
pub struct AppState {
    pub(crate) db: PgPool,
    pub(crate) jwt_verifier: Arc<JwtVerifier>,
}

impl AppState {
    pub fn new(db: PgPool, jwt_verifier: Arc<JwtVerifier>) -> Self {
        Self { db, jwt_verifier }
    }
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_verifier.clone()
    }
}
