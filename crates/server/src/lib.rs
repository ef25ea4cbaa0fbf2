use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use regex::Regex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tapheart_engine::{now_ms, Game, GameConfig, GameError, SqliteStore};
use tapheart_protocol::{
    ErrorBody, ErrorKind, GameEvent, GameState, LevelRequirement, PurchaseOutcome, SelectOutcome,
    SpinOutcome, SyncOutcome, TapOutcome, WheelStatus,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;


const DEFAULT_USERNAME: &str = "Player";
const DEFAULT_EVENT_PAGE: u32 = 100;

pub struct AppState {
    pub game: Game<SqliteStore>,
    /// Extra browser origins allowed besides the local ones.
    pub allowed_origins: Vec<String>,
}

impl AppState {
    /// Opens the database, seeds the catalog and validates `config`.
    pub fn open(
        db_path: PathBuf,
        config: GameConfig,
        allowed_origins: Vec<String>,
    ) -> anyhow::Result<Self> {
        let store = SqliteStore::new(db_path);
        store.seed_catalog(&config)?;
        let game = Game::new(store, config)?;
        Ok(Self {
            game,
            allowed_origins,
        })
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = local_only_cors(state.allowed_origins.clone());
    Router::new()
        .route("/health", get(health))
        .route("/api/levels", get(levels))
        .route("/api/user/init", post(init_user))
        .route("/api/game/{user_id}/state", get(game_state))
        .route("/api/game/{user_id}/sync", post(sync))
        .route("/api/game/{user_id}/tap", post(tap))
        .route(
            "/api/game/{user_id}/upgrades/{upgrade_id}/purchase",
            post(purchase_upgrade),
        )
        .route("/api/game/{user_id}/wheel", get(wheel_status))
        .route("/api/game/{user_id}/wheel/spin", post(spin_wheel))
        .route("/api/game/{user_id}/character/select", post(select_character))
        .route("/api/game/{user_id}/events", get(events))
        .with_state(Arc::new(state))
        // Game state is per-player and changes every second.
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        // Never `Access-Control-Allow-Origin: *`: a random page could spend a
        // player's points.
        .layer(cors)
}

/// Error response: status plus a JSON body carrying the error kind and, for
/// rule violations, the structured reason.
#[derive(Debug)]
pub struct ApiError(pub StatusCode, pub Json<ErrorBody>);

impl ApiError {
    fn new(status: StatusCode, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self(
            status,
            Json(ErrorBody {
                kind,
                message: message.into(),
                violation: None,
            }),
        )
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorKind::Validation, message)
    }

    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::PersistenceFailure,
            "internal error",
        )
    }
}

impl From<GameError> for ApiError {
    fn from(e: GameError) -> Self {
        match e {
            GameError::Validation(msg) => Self::validation(msg),
            GameError::NotFound { .. } => {
                Self::new(StatusCode::NOT_FOUND, ErrorKind::NotFound, e.to_string())
            }
            GameError::Rule(v) => Self(
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(ErrorBody {
                    kind: ErrorKind::RuleViolation,
                    message: v.to_string(),
                    violation: Some(v),
                }),
            ),
            GameError::Persistence(err) => {
                tracing::error!("persistence failure: {err:#}");
                Self::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, self.1).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Runs a blocking engine call off the async workers.
async fn run<T, F>(state: &Arc<AppState>, f: F) -> ApiResult<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> Result<T, GameError> + Send + 'static,
{
    let st = state.clone();
    let out = tokio::task::spawn_blocking(move || f(&st))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "engine task failed");
            ApiError::internal()
        })??;
    Ok(Json(out))
}

fn user_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("valid user id pattern"))
}

fn check_user_id(user_id: &str) -> Result<(), ApiError> {
    if user_id_re().is_match(user_id) {
        return Ok(());
    }
    Err(ApiError::validation(
        "user_id must be 1-64 characters of A-Z, a-z, 0-9, '_' or '-'",
    ))
}

fn check_catalog_id(what: &str, id: &str) -> Result<(), ApiError> {
    if id.is_empty() || id.len() > 64 {
        return Err(ApiError::validation(format!("{what} must be 1-64 characters")));
    }
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn levels(State(state): State<Arc<AppState>>) -> Json<Vec<LevelRequirement>> {
    Json(state.game.levels().rows().to_vec())
}

#[derive(Debug, Deserialize)]
pub struct InitInput {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
}

/// Creates the player on first contact; later calls only return state.
async fn init_user(
    State(state): State<Arc<AppState>>,
    Json(input): Json<InitInput>,
) -> ApiResult<GameState> {
    check_user_id(&input.user_id)?;
    let username = input
        .username
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_USERNAME)
        .to_string();
    if username.chars().count() > 64 {
        return Err(ApiError::validation("username must be at most 64 characters"));
    }
    run(&state, move |st| {
        let now = now_ms();
        let user = st
            .game
            .store()
            .init_player(&input.user_id, &username, st.game.config(), now)?;
        tracing::info!(user_id = %user.id, "player ready");
        st.game.state(&input.user_id, now)
    })
    .await
}

async fn game_state(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<GameState> {
    check_user_id(&user_id)?;
    run(&state, move |st| st.game.state(&user_id, now_ms())).await
}

async fn sync(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<SyncOutcome> {
    check_user_id(&user_id)?;
    run(&state, move |st| st.game.sync(&user_id, now_ms())).await
}

async fn tap(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<TapOutcome> {
    check_user_id(&user_id)?;
    run(&state, move |st| st.game.tap(&user_id, now_ms())).await
}

async fn purchase_upgrade(
    State(state): State<Arc<AppState>>,
    Path((user_id, upgrade_id)): Path<(String, String)>,
) -> ApiResult<PurchaseOutcome> {
    check_user_id(&user_id)?;
    check_catalog_id("upgrade_id", &upgrade_id)?;
    run(&state, move |st| {
        st.game.purchase_upgrade(&user_id, &upgrade_id, now_ms())
    })
    .await
}

async fn wheel_status(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<WheelStatus> {
    check_user_id(&user_id)?;
    run(&state, move |st| st.game.wheel_status(&user_id, now_ms())).await
}

async fn spin_wheel(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<SpinOutcome> {
    check_user_id(&user_id)?;
    run(&state, move |st| {
        st.game
            .spin_wheel(&user_id, now_ms(), &mut rand::thread_rng())
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct SelectInput {
    pub character_id: String,
}

async fn select_character(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Json(input): Json<SelectInput>,
) -> ApiResult<SelectOutcome> {
    check_user_id(&user_id)?;
    check_catalog_id("character_id", &input.character_id)?;
    run(&state, move |st| {
        st.game
            .select_character(&user_id, &input.character_id, now_ms())
    })
    .await
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub limit: Option<u32>,
}

async fn events(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(q): Query<EventsQuery>,
) -> ApiResult<Vec<GameEvent>> {
    check_user_id(&user_id)?;
    let since = q.since.unwrap_or(0);
    let limit = q.limit.unwrap_or(DEFAULT_EVENT_PAGE);
    run(&state, move |st| st.game.events(&user_id, since, limit)).await
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, state, shutdown_signal()).await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    state: AppState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(state);
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(addr)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn local_only_cors(extra: Vec<String>) -> CorsLayer {
    use axum::http::Method;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _req| {
            is_allowed_origin(origin, &extra)
        }))
}

fn is_allowed_origin(origin: &HeaderValue, extra: &[String]) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };

    // Tauri WebView origin (packaged client).
    if s == "tauri://localhost" {
        return true;
    }
    if extra.iter().any(|o| o == s) {
        return true;
    }

    // Dev server and local reverse proxies.
    is_http_origin_for_host(s, "localhost") || is_http_origin_for_host(s, "127.0.0.1")
}

fn is_http_origin_for_host(origin: &str, host: &str) -> bool {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = origin.strip_prefix(scheme) {
            if let Some(after) = rest.strip_prefix(host) {
                // Origin is just scheme://host[:port]
                return after.is_empty() || after.starts_with(':');
            }
        }
    }
    false
}
