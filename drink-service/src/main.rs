use std::{env, net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method,
    },
    routing::{get, patch},
    Router,
};
use common_auth::{JwtConfig, JwtVerifier};
use drink_service::app_state::AppState;
use drink_service::config::{load_service_config, ServiceConfig};
use drink_service::drink_handlers::{
    create_drink, delete_drink, drinks_detail, list_drinks, update_drink,
};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::time::{interval, MissedTickBehavior};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let config = load_service_config()?;

    let db = PgPool::connect(&config.database_url).await?;
    // Ensure database schema is up to date before serving traffic
    sqlx::migrate!("./migrations").run(&db).await?;

    let jwt_verifier = build_jwt_verifier(&config).await?;
    spawn_jwks_refresh(jwt_verifier.clone(), config.jwks_refresh_seconds);

    let state = AppState::new(db, jwt_verifier);

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            config
                .cors_allowed_origins
                .iter()
                .filter_map(|origin| origin.parse::<HeaderValue>().ok())
                .collect::<Vec<_>>(),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION]);

    let app = Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/drinks", get(list_drinks).post(create_drink))
        .route("/drinks-detail", get(drinks_detail))
        .route("/drinks/:id", patch(update_drink).delete(delete_drink))
        .with_state(state)
        .layer(cors);

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    println!("starting drink-service on {addr}");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_jwt_verifier(config: &ServiceConfig) -> anyhow::Result<Arc<JwtVerifier>> {
    let jwt_config = JwtConfig::new(config.auth_domain.clone(), config.auth_audience.clone())
        .with_leeway(config.jwt_leeway_seconds);

    info!(jwks_url = %jwt_config.jwks_url(), "Configuring JWKS discovery");
    let mut builder = JwtVerifier::builder(jwt_config).with_discovery();

    if let Ok(pem) = env::var("JWT_DEV_PUBLIC_KEY_PEM") {
        warn!("Using JWT_DEV_PUBLIC_KEY_PEM for verification; do not enable in production");
        builder = builder
            .with_rsa_pem("local-dev", pem.as_bytes())
            .map_err(anyhow::Error::from)?;
    }

    let verifier = builder.build().await.map_err(anyhow::Error::from)?;
    info!("JWT verifier initialised");
    Ok(Arc::new(verifier))
}

fn spawn_jwks_refresh(verifier: Arc<JwtVerifier>, refresh_secs: u64) {
    let Some(fetcher) = verifier.jwks_fetcher() else {
        return;
    };

    let refresh_secs = refresh_secs.max(60);
    let interval_duration = Duration::from_secs(refresh_secs);
    let url = fetcher.url().to_owned();
    let handle = verifier.clone();

    tokio::spawn(async move {
        let mut ticker = interval(interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match handle.refresh_jwks().await {
                Ok(count) => {
                    debug!(count, jwks_url = %url, "Refreshed JWKS keys");
                }
                Err(err) => {
                    warn!(error = %err, jwks_url = %url, "Failed to refresh JWKS keys");
                }
            }
        }
    });
}
