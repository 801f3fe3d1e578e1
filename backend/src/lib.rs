use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    AUTHORIZATION, CACHE_CONTROL,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use games_core::render::{render_page, resolve_feed, FeedPayload, FeedSource};
use games_core::token::TokenCodec;
use games_core::{now_millis, seed_games, DeleteRequest, GameError, GameMetadata, GameRecord, GameSubmission};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod config;
pub mod error;
pub mod steam;
pub mod store;

use config::{Config, StoreBackendKind};
use error::{ApiError, Result};
use steam::{MetadataLookup, SteamStoreClient};
use store::{FileBackend, GameStore, KvBackend, MemoryBackend, RedisBackend, Snapshot};

#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    store: GameStore,
    tokens: TokenCodec,
    metadata: Option<Arc<dyn MetadataLookup>>,
    /// Serializes load-modify-save within this instance.
    write_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: GameStore,
        metadata: Option<Arc<dyn MetadataLookup>>,
    ) -> Self {
        Self {
            tokens: TokenCodec::new(config.signing_secret()),
            config: Arc::new(config),
            store,
            metadata,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Wire up the configured backend and lookup client.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let backend: Arc<dyn KvBackend> = match &config.store {
            StoreBackendKind::Redis(url) => Arc::new(RedisBackend::new(url, config.store_timeout)?),
            StoreBackendKind::File(path) => Arc::new(FileBackend::new(path.clone())),
            StoreBackendKind::Memory => Arc::new(MemoryBackend::default()),
        };

        let mut store = GameStore::new(backend, config.games_key.clone());
        if config.seed_defaults {
            store = store.with_seed(seed_games());
        }

        let metadata: Option<Arc<dyn MetadataLookup>> = if config.steam_lookup {
            Some(Arc::new(SteamStoreClient::new(
                config.steam_api_base.clone(),
                config.steam_timeout,
            )?))
        } else {
            None
        };

        info!(
            provider = store.provider(),
            key = %config.games_key,
            steam_lookup = config.steam_lookup,
            "game store ready"
        );
        Ok(Self::new(config, store, metadata))
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route(
            "/games",
            get(list_games)
                .post(upsert_game)
                .delete(delete_game)
                .options(preflight)
                .fallback(method_not_allowed),
        )
        .route(
            "/auth",
            post(login).options(preflight).fallback(method_not_allowed),
        )
        .route("/health", get(health))
        .fallback(not_found)
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, DELETE, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GamesResponse {
    games: Vec<GameRecord>,
    server_time: String,
    store_status: String,
    provider: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MutationResponse {
    success: bool,
    games: Vec<GameRecord>,
    store_status: String,
}

#[derive(Deserialize, Default)]
struct LoginRequest {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    success: bool,
    token: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    store: String,
}

fn require_admin(headers: &HeaderMap, state: &AppState) -> Result<()> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .map(|v| v.strip_prefix("Bearer ").unwrap_or(v))
        .unwrap_or("");

    if state.tokens.verify(token) {
        Ok(())
    } else {
        warn!(present = !token.is_empty(), "rejected admin token");
        Err(ApiError::Unauthorized("invalid or expired token"))
    }
}

/// An empty body reads as `{}`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| ApiError::Internal(format!("malformed request body: {err}")))
}

async fn list_games(State(state): State<AppState>) -> impl IntoResponse {
    let Snapshot { games, status, .. } = state.store.load().await;
    (
        [(CACHE_CONTROL, "no-cache, no-store, must-revalidate")],
        Json(GamesResponse {
            games,
            server_time: chrono::Utc::now().to_rfc3339(),
            store_status: status.to_string(),
            provider: state.store.provider(),
        }),
    )
}

async fn upsert_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MutationResponse>> {
    require_admin(&headers, &state)?;
    let mut submission: GameSubmission = parse_body(&body)?;

    let _guard = state.write_lock.lock().await;
    let Snapshot {
        mut games,
        status,
        layout,
    } = state.store.load().await;

    // stored fields win over looked-up ones
    submission.inherit_from(&games);
    if let Some(steam_id) = submission.lookup_target().map(str::to_owned) {
        if let Some(metadata) = fetch_metadata(&state, &steam_id).await {
            submission.fill_missing(metadata);
        }
    }

    let outcome = games_core::upsert(&mut games, submission, now_millis())?;
    info!(id = outcome.id, created = outcome.created, "game saved");

    // never overwrite the backend from a mirror-only view
    let saved = if status.is_degraded() {
        state.store.keep_in_memory(&games).await
    } else {
        state.store.save(&layout, &games).await
    };

    Ok(Json(MutationResponse {
        success: true,
        games,
        store_status: saved.to_string(),
    }))
}

async fn fetch_metadata(state: &AppState, steam_id: &str) -> Option<GameMetadata> {
    let lookup = state.metadata.as_ref()?;
    match lookup.lookup(steam_id).await {
        Ok(Some(metadata)) => Some(metadata),
        Ok(None) => {
            warn!(steam_id, "no store entry for steam id");
            None
        }
        Err(err) => {
            warn!(steam_id, error = %err, "metadata lookup failed; using submitted fields");
            None
        }
    }
}

async fn delete_game(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<MutationResponse>> {
    require_admin(&headers, &state)?;
    let request: DeleteRequest = parse_body(&body)?;
    let id = request.id.ok_or(GameError::MissingId)?;

    let _guard = state.write_lock.lock().await;
    let Snapshot {
        mut games,
        status,
        layout,
    } = state.store.load().await;
    let removed = games_core::remove(&mut games, id);
    info!(id, removed, "game delete");

    let saved = if status.is_degraded() {
        state.store.keep_in_memory(&games).await
    } else {
        state.store.save(&layout, &games).await
    };

    Ok(Json(MutationResponse {
        success: true,
        games,
        store_status: saved.to_string(),
    }))
}

async fn login(State(state): State<AppState>, body: Bytes) -> Result<Json<LoginResponse>> {
    let request: LoginRequest = parse_body(&body)?;
    let config = &state.config;
    if !state.tokens.is_configured() {
        warn!("admin login attempted but no signing secret is configured");
        return Err(ApiError::Unauthorized("invalid credentials"));
    }

    let user_ok = config
        .admin_username
        .as_deref()
        .map_or(true, |expected| request.username.as_deref() == Some(expected));
    let pass_ok = matches!(
        (config.login_password(), request.password.as_deref()),
        (Some(expected), Some(given)) if expected == given
    );
    if !(user_ok && pass_ok) {
        warn!("rejected admin login");
        return Err(ApiError::Unauthorized("invalid credentials"));
    }

    let token = state
        .tokens
        .issue()
        .ok_or_else(|| ApiError::Internal("no signing secret configured".to_string()))?;
    info!("admin token issued");
    Ok(Json(LoginResponse {
        success: true,
        token,
    }))
}

async fn index_page(State(state): State<AppState>) -> Html<String> {
    let Snapshot { games, status, .. } = state.store.load().await;
    let live = (!status.is_degraded()).then(|| FeedPayload::Bare(games));
    let (games, source) = resolve_feed(live, state.store.mirror_snapshot().await);
    if source != FeedSource::Live {
        warn!(?source, "rendering fallback games list");
    }
    Html(render_page(&games))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let Snapshot { status, .. } = state.store.load().await;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        store: status.to_string(),
    })
}

async fn preflight() -> StatusCode {
    StatusCode::OK
}

async fn method_not_allowed() -> ApiError {
    ApiError::MethodNotAllowed
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}
