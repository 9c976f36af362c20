//! Leadflow Server
//!
//! Axum server exposing the pipeline board: stage moves, validation, the
//! stage cache and a live event stream. Also carries a few CLI commands for
//! inspecting the pipeline and the local cache without starting the server.

mod api;

use axum::{
    extract::State,
    http::header,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{delete, get, post},
    Router,
};
use clap::{Parser, Subcommand};
use futures::stream::{self, Stream};
use std::{convert::Infallible, net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

use leadflow_core::gateway::{
    CredentialProvider, HttpStageGateway, LeadDirectory, StageEntityGateway, StaticCredentials,
};
use leadflow_core::state::io::get_runtime_path;
use leadflow_core::state::{LeadflowDb, StageCache};
use leadflow_core::{BoardController, EngineConfig, StageRegistry, TransitionOrchestrator};

/// Application state
pub struct AppState {
    pub board: BoardController,
}

pub type SharedState = Arc<AppState>;

#[derive(Parser, Clone)]
#[command(author, version, about = "Leadflow - pipeline stage transition engine")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Leadflow server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Skip loading leads from the backend at startup
        #[arg(long)]
        no_load: bool,
    },
    /// Print the pipeline definition
    Stages,
    /// Inspect or clear the local stage cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Clone)]
enum CacheAction {
    /// Show cached entries (one lead, or all)
    Show { lead_id: Option<String> },
    /// Clear cached entries (one lead, or all)
    Clear { lead_id: Option<String> },
}

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Leadflow API",
        version = "1.0.0",
        description = "Pipeline board, stage moves and stage cache"
    ),
    paths(
        api::board::get_board,
        api::board::refresh_board,
        api::board::validate_lead,
        api::board::move_lead,
        api::board::list_stages,
        api::cache::list_cache,
        api::cache::clear_cache,
        api::cache::clear_cache_entry
    ),
    components(
        schemas(
            api::ErrorResponse,
            api::board::BoardResponse,
            api::board::RefreshResponse,
            api::board::ValidationResponse,
            api::board::MoveRequest,
            api::board::StagesResponse,
            api::cache::CacheListResponse,
            api::cache::CacheClearResponse
        )
    ),
    tags(
        (name = "board", description = "Board, validation and stage moves"),
        (name = "cache", description = "Local stage cache")
    )
)]
struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}

/// SSE endpoint for board events with heartbeat
async fn events(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.board.orchestrator().subscribe();

    // Heartbeat every 15 seconds while idle
    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            let next = tokio::time::timeout(std::time::Duration::from_secs(15), rx.recv()).await;

            match next {
                Ok(Ok(event)) => {
                    let json = serde_json::to_string(&event).unwrap_or_default();
                    return Some((Ok(Event::default().event("transition").data(json)), rx));
                }
                Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped))) => {
                    tracing::warn!(skipped, "Event stream lagged");
                    continue;
                }
                Ok(Err(_)) => return None, // Channel closed
                Err(_) => return Some((Ok(Event::default().comment("heartbeat")), rx)),
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// === Setup ===

/// Load `.env` from the runtime directory, then the working directory
fn load_env() {
    let runtime_env = get_runtime_path().join(".env");
    if runtime_env.exists() {
        let _ = dotenvy::from_path(&runtime_env);
    }
    let _ = dotenvy::dotenv();
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,leadflow_core=debug")),
        )
        .init();
}

fn build_state(config: &EngineConfig) -> anyhow::Result<SharedState> {
    let db = LeadflowDb::open_at(config.db_path())?;
    let cache = StageCache::new(&db);

    if config.api_token.is_none() {
        tracing::warn!("LEADFLOW_API_TOKEN not set; backend calls will be unauthenticated");
    }
    let credentials: Arc<dyn CredentialProvider> = Arc::new(StaticCredentials::new(
        config.api_token.clone().unwrap_or_default(),
    ));
    // Connect bound only; the orchestrator owns the per-call timeout
    let gateway = Arc::new(HttpStageGateway::new(
        config.api_base_url.as_str(),
        credentials,
        config.gateway_timeout(),
    )?);

    let entity_gateway: Arc<dyn StageEntityGateway> = gateway.clone();
    let directory: Arc<dyn LeadDirectory> = gateway;
    let orchestrator = Arc::new(TransitionOrchestrator::new(
        entity_gateway,
        cache,
        config.transition_settings(),
    ));

    Ok(Arc::new(AppState {
        board: BoardController::new(orchestrator, Some(directory)),
    }))
}

// === CLI Commands ===

fn print_stages() {
    let registry = StageRegistry::new();
    println!("{:<4} {:<22} {:<20} {:<20} REQUIRED", "#", "STAGE", "OWNS", "DEPENDS ON");
    for def in registry.definitions() {
        let owns = def
            .owned_entity
            .map(|kind| kind.display_name().to_string())
            .unwrap_or_else(|| "-".to_string());
        let depends = def
            .depends_on
            .map(|kind| kind.display_name().to_string())
            .unwrap_or_else(|| "-".to_string());
        let required: Vec<&str> = def.required_fields.iter().map(|f| f.as_str()).collect();
        println!(
            "{:<4} {:<22} {:<20} {:<20} {}",
            def.order,
            def.stage.as_str(),
            owns,
            depends,
            required.join(", ")
        );
    }
}

fn run_cache_command(config: &EngineConfig, action: CacheAction) -> anyhow::Result<()> {
    let db = LeadflowDb::open_at(config.db_path())?;
    let cache = StageCache::new(&db);

    match action {
        CacheAction::Show { lead_id: Some(id) } => match cache.get(&id)? {
            Some(entry) => println!("{}", serde_json::to_string_pretty(&entry)?),
            None => println!("No cache entry for lead {}", id),
        },
        CacheAction::Show { lead_id: None } => {
            let entries = cache.list()?;
            println!("{}", serde_json::to_string_pretty(&entries)?);
            println!("{} entries", entries.len());
        }
        CacheAction::Clear { lead_id: Some(id) } => {
            if cache.clear(&id)? {
                println!("Cleared cache entry for lead {}", id);
            } else {
                println!("No cache entry for lead {}", id);
            }
        }
        CacheAction::Clear { lead_id: None } => {
            let removed = cache.clear_all()?;
            println!("Cleared {} cache entries", removed);
        }
    }
    Ok(())
}

// === Server Entry ===

pub async fn run_server(config: EngineConfig, port: u16, load: bool) -> anyhow::Result<()> {
    let state = build_state(&config)?;

    if load {
        match state.board.load().await {
            Ok(count) => tracing::info!(leads = count, "Loaded board"),
            Err(e) => tracing::warn!(error = %format!("{:#}", e), "Starting with an empty board"),
        }
    }

    let board_routes = Router::new()
        .route("/", get(api::board::get_board))
        .route("/refresh", post(api::board::refresh_board));

    let lead_routes = Router::new()
        .route("/:id/validate", get(api::board::validate_lead))
        .route("/:id/move", post(api::board::move_lead));

    let cache_routes = Router::new()
        .route("/", get(api::cache::list_cache).delete(api::cache::clear_cache))
        .route("/:id", delete(api::cache::clear_cache_entry));

    let app = Router::new()
        .nest("/api/v1/board", board_routes)
        .nest("/api/v1/leads", lead_routes)
        .nest("/api/v1/cache", cache_routes)
        .route("/api/v1/stages", get(api::board::list_stages))
        .route("/api/v1/events", get(events))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!(%addr, api = %config.api_base_url, "Leadflow server listening");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let args = Args::parse();
    let config = EngineConfig::load().await?;

    match args.command {
        Some(CliCommand::Serve { port, no_load }) => run_server(config, port, !no_load).await,
        Some(CliCommand::Stages) => {
            print_stages();
            Ok(())
        }
        Some(CliCommand::Cache { action }) => run_cache_command(&config, action),
        None => run_server(config, 8080, true).await,
    }
}
