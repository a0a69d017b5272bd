mod auth;
mod config;
mod error;
mod models;
mod publisher;
mod routes;
mod store;
#[cfg(test)]
mod testing;
mod workflow;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use clap::{Parser, Subcommand};
use config::Config;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use error::AppError;
use models::team::CreateTeamRequest;
use publisher::{DisabledPublisher, HttpPublisher, Publisher};
use store::{MemoryStore, PgStore, Store};
use workflow::Workflow;

#[derive(Parser)]
#[command(name = "clipgate", about = "Team video review and publishing service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Keep all state in memory instead of Postgres
        #[arg(long)]
        in_memory: bool,
    },
    /// Create a team and its first admin
    CreateTeam {
        #[arg(long)]
        name: String,
        #[arg(long)]
        owner_email: String,
        #[arg(long)]
        owner_name: String,
    },
}

#[derive(Clone)]
pub struct AppState {
    pub workflow: Workflow,
    pub config: Arc<Config>,
}

async fn health(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    state.workflow.ping().await?;
    Ok(Json(serde_json::json!({ "status": "ok", "db": true })))
}

fn publisher(config: &Config) -> Arc<dyn Publisher> {
    match &config.publisher_url {
        Some(url) => Arc::new(HttpPublisher::new(url.clone())),
        None => {
            tracing::warn!("PUBLISHER_URL is not set, publishing is disabled");
            Arc::new(DisabledPublisher)
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env();

    let command = cli.command.unwrap_or(Command::Serve { in_memory: false });
    let store: Arc<dyn Store> = match command {
        Command::Serve { in_memory: true } => {
            tracing::warn!("using the in-memory store, state is lost on exit");
            Arc::new(MemoryStore::new())
        }
        _ => {
            let db = PgPool::connect(&config.database_url)
                .await
                .expect("failed to connect to database");

            sqlx::migrate!()
                .run(&db)
                .await
                .expect("failed to run migrations");

            Arc::new(PgStore::new(db))
        }
    };

    let workflow = Workflow::new(store, publisher(&config), config.settings());

    match command {
        Command::Serve { .. } => serve(workflow, config).await,
        Command::CreateTeam {
            name,
            owner_email,
            owner_name,
        } => {
            let req = CreateTeamRequest {
                name,
                owner_email,
                owner_name,
            };
            match workflow.create_team(req).await {
                Ok((team, owner)) => {
                    println!("team {} created, owner {} ({})", team.id, owner.id, owner.email);
                }
                Err(e) => {
                    eprintln!("failed to create team: {e}");
                    std::process::exit(1);
                }
            }
        }
    }
}

async fn serve(workflow: Workflow, config: Config) {
    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState {
        workflow,
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/api/health", get(health))
        .merge(routes::api_router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listener");
    axum::serve(listener, app).await.expect("server error");
}
