//! DKG operator service
//!
//! HTTP endpoint fronting one operator's [`Switch`]: every ceremony round
//! arrives as a `POST` of a signed envelope and is answered synchronously
//! with the operator's signed reply, per the ceremony protocol's
//! request/response routing (no operator ever talks to another operator
//! directly).

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use dkg_blobstore::InMemoryBlobStore;
use dkg_core::config::CeremonyTimeouts;
use dkg_core::crypto::RsaKeyPair;
use dkg_core::switch::Switch;
use dkg_core::wire::SignedTransport;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};

/// Operator service CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "dkg-operator-svc")]
#[command(about = "DKG ceremony operator HTTP service")]
struct Args {
    /// Listen address
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// This operator's numeric id within any ceremony it participates in
    #[arg(long)]
    operator_id: u64,

    /// Path to this operator's RSA private key, PKCS#8 DER
    #[arg(long)]
    rsa_key_path: String,

    /// Path to the initiator's RSA public key, SubjectPublicKeyInfo DER,
    /// trusted as the sole source of every ceremony request
    #[arg(long)]
    initiator_pubkey_path: String,

    /// Blob store entry TTL in seconds; <= 0 means "effectively forever"
    #[arg(long, default_value = "0")]
    blob_ttl_seconds: i64,
}

struct AppState {
    operator_id: u64,
    switch: Switch,
    limiter: RateLimiter,
}

/// Simple fixed-window token bucket, one bucket per route class: 5000
/// req/min overall, 1000 req/min on `/init` and `/reshare`.
struct RateLimiter {
    overall: dashmap::DashMap<(), Bucket>,
    init_reshare: dashmap::DashMap<(), Bucket>,
}

struct Bucket {
    window_start: Instant,
    count: u32,
}

impl RateLimiter {
    fn new() -> Self {
        Self {
            overall: dashmap::DashMap::new(),
            init_reshare: dashmap::DashMap::new(),
        }
    }

    fn check(&self, map: &dashmap::DashMap<(), Bucket>, limit: u32) -> bool {
        let mut entry = map.entry(()).or_insert_with(|| Bucket {
            window_start: Instant::now(),
            count: 0,
        });
        if entry.window_start.elapsed() > Duration::from_secs(60) {
            entry.window_start = Instant::now();
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= limit
    }

    /// `true` if the request may proceed.
    fn admit(&self, route_is_init_or_reshare: bool) -> bool {
        if !self.check(&self.overall, 5000) {
            return false;
        }
        if route_is_init_or_reshare && !self.check(&self.init_reshare, 1000) {
            return false;
        }
        true
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let rsa_der = std::fs::read(&args.rsa_key_path).context("reading operator RSA key")?;
    let keypair = Arc::new(RsaKeyPair::from_pkcs8_der(&rsa_der).context("parsing operator RSA key")?);
    let initiator_pub_der =
        std::fs::read(&args.initiator_pubkey_path).context("reading initiator public key")?;
    let blob_store = Arc::new(InMemoryBlobStore::new(if args.blob_ttl_seconds > 0 {
        args.blob_ttl_seconds
    } else {
        i64::MAX / 2
    }));

    info!(operator_id = args.operator_id, listen = %args.listen, "starting DKG operator service");

    let state = Arc::new(AppState {
        operator_id: args.operator_id,
        switch: Switch::new(
            args.operator_id,
            keypair,
            initiator_pub_der,
            CeremonyTimeouts::default(),
            blob_store,
        ),
        limiter: RateLimiter::new(),
    });

    let app = Router::new()
        .route("/health_check", get(health_check))
        .route("/init", post(init))
        .route("/reshare", post(reshare))
        .route("/dkg", post(dkg))
        .route("/resign", post(resign))
        .route("/results", post(results))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    operator_id: u64,
    active_ceremonies: usize,
    version: &'static str,
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        operator_id: state.operator_id,
        active_ceremonies: state.switch.active_ceremony_count(),
        version: dkg_core::VERSION,
    })
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

fn error_response(err: dkg_core::Error) -> axum::response::Response {
    warn!(error = %err, "request failed");
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let kind = if err.http_status() == 429 { "rate_limited" } else { "protocol_error" };
    (status, Json(ErrorBody { error: err.to_string(), kind })).into_response()
}

fn rate_limited_response() -> axum::response::Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorBody {
            error: "rate limit exceeded".into(),
            kind: "rate_limited",
        }),
    )
        .into_response()
}

async fn init(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<SignedTransport>,
) -> axum::response::Response {
    if !state.limiter.admit(true) {
        return rate_limited_response();
    }
    match state.switch.handle_init(envelope) {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

async fn reshare(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<SignedTransport>,
) -> axum::response::Response {
    if !state.limiter.admit(true) {
        return rate_limited_response();
    }
    match state.switch.handle_reshare(envelope) {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

async fn dkg(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<SignedTransport>,
) -> axum::response::Response {
    if !state.limiter.admit(false) {
        return rate_limited_response();
    }
    match state.switch.handle_exchange_set(envelope) {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

async fn resign(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<SignedTransport>,
) -> axum::response::Response {
    if !state.limiter.admit(false) {
        return rate_limited_response();
    }
    match state.switch.handle_resign(envelope) {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}

async fn results(
    State(state): State<Arc<AppState>>,
    Json(envelope): Json<SignedTransport>,
) -> axum::response::Response {
    if !state.limiter.admit(false) {
        return rate_limited_response();
    }
    match state.switch.handle_result(envelope).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => error_response(e),
    }
}
