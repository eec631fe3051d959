use anyhow::{Context, Result};
use std::env;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Issuer tenant domain; the token issuer and JWKS discovery URL both
    /// derive from it.
    pub auth_domain: String,
    pub auth_audience: String,
    pub jwt_leeway_seconds: u32,
    pub jwks_refresh_seconds: u64,
    pub cors_allowed_origins: Vec<String>,
}

pub fn load_service_config() -> Result<ServiceConfig> {
    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let auth_domain = env::var("AUTH_DOMAIN").context("AUTH_DOMAIN must be set")?;
    let auth_audience = env::var("AUTH_AUDIENCE").context("AUTH_AUDIENCE must be set")?;

    let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port: u16 = env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8080);

    let jwt_leeway_seconds = env::var("JWT_LEEWAY_SECONDS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(0);

    let jwks_refresh_seconds = env::var("JWKS_REFRESH_SECONDS")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(300);

    let cors_allowed_origins = match env::var("CORS_ALLOWED_ORIGINS") {
        Ok(value) => value
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect(),
        Err(_) => vec![
            "http://localhost:3000".to_string(),
            "http://localhost:5173".to_string(),
        ],
    };

    Ok(ServiceConfig {
        host,
        port,
        database_url,
        auth_domain,
        auth_audience,
        jwt_leeway_seconds,
        jwks_refresh_seconds,
        cors_allowed_origins,
    })
}
