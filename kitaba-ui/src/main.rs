//! kitaba-ui - Historical Arabic text detector
//!
//! Serves the single-page UI and its API on 127.0.0.1:5780 by default.
//! A database that cannot be opened disables history; a missing API key
//! disables detection. Neither stops the server from starting.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use kitaba_common::config::{
    load_toml_config_or_default, CompiledDefaults, RootFolderInitializer, RootFolderResolver,
    TomlConfig,
};
use kitaba_common::db::init_database;
use kitaba_common::SubjectId;
use kitaba_ui::inference::{GeminiClient, TranscriptionBackend};
use kitaba_ui::session::{AuthProvider, LocalAuthProvider};
use kitaba_ui::store::{DocumentStore, PrivilegeRegistry, SqliteStore};
use kitaba_ui::{build_router, AppContext, AppOptions, Backends};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MODULE_NAME: &str = "kitaba-ui";

/// Command-line arguments for kitaba-ui
#[derive(Parser, Debug)]
#[command(name = "kitaba-ui")]
#[command(about = "Historical Arabic text detector")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the web server (default)
    Serve(ServeArgs),

    /// Grant correction privileges to a subject
    GrantAdmin {
        subject: String,
        #[command(flatten)]
        root: RootArgs,
    },

    /// Revoke correction privileges from a subject
    RevokeAdmin {
        subject: String,
        #[command(flatten)]
        root: RootArgs,
    },

    /// Register a custom sign-in token and print its subject
    IssueToken {
        token: String,
        #[command(flatten)]
        root: RootArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct RootArgs {
    /// Root folder holding kitaba.db and kitaba.toml
    #[arg(short, long)]
    root_folder: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    #[command(flatten)]
    root: RootArgs,

    /// Port to listen on (overrides [server].port)
    #[arg(short, long, env = "KITABA_PORT")]
    port: Option<u16>,

    /// Gemini API key (overrides [inference].api_key)
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let defaults = CompiledDefaults::for_current_platform();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "kitaba_ui={lvl},kitaba_common={lvl},tower_http={lvl}",
                    lvl = defaults.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Build identification first, before any database work
    info!(
        "Starting Kitaba (kitaba-ui) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve(cli.serve)) {
        Command::Serve(args) => serve(args).await,
        Command::GrantAdmin { subject, root } => {
            let store = open_store(&root).await?;
            store
                .grant_privilege(&SubjectId::new(subject.clone()))
                .await
                .context("Failed to grant privileges")?;
            println!("Granted correction privileges to {}", subject);
            Ok(())
        }
        Command::RevokeAdmin { subject, root } => {
            let store = open_store(&root).await?;
            let removed = store
                .revoke_privilege(&SubjectId::new(subject.clone()))
                .await
                .context("Failed to revoke privileges")?;
            if removed {
                println!("Revoked correction privileges from {}", subject);
            } else {
                println!("{} had no correction privileges", subject);
            }
            Ok(())
        }
        Command::IssueToken { token, root } => {
            let initializer = prepare_root(&root)?;
            let pool = init_database(&initializer.database_path())
                .await
                .context("Failed to open database")?;
            let provider = LocalAuthProvider::open(pool)
                .await
                .context("Failed to open auth provider")?;
            let subject = provider
                .register_token_subject(&token)
                .await
                .context("Failed to register token")?;
            println!("{}", subject);
            Ok(())
        }
    }
}

fn prepare_root(root: &RootArgs) -> Result<RootFolderInitializer> {
    let root_folder = RootFolderResolver::new(MODULE_NAME)
        .with_cli_arg(root.root_folder.clone())
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to create root folder")?;
    info!("Root folder: {}", initializer.root_folder().display());
    Ok(initializer)
}

async fn open_store(root: &RootArgs) -> Result<SqliteStore> {
    let initializer = prepare_root(root)?;
    let pool = init_database(&initializer.database_path())
        .await
        .context("Failed to open database")?;
    Ok(SqliteStore::new(pool))
}

async fn serve(args: ServeArgs) -> Result<()> {
    let initializer = prepare_root(&args.root)?;

    let mut settings: TomlConfig = load_toml_config_or_default(&initializer.settings_path());
    if let Some(key) = args.api_key {
        settings.inference.api_key = Some(key);
    }
    if let Some(port) = args.port {
        settings.server.port = port;
    }

    let mut backends = Backends::default();

    let db_path = initializer.database_path();
    info!("Database path: {}", db_path.display());
    match init_database(&db_path).await {
        Ok(pool) => match LocalAuthProvider::open(pool.clone()).await {
            Ok(auth) => {
                let store = Arc::new(SqliteStore::new(pool));
                backends.auth = Some(Arc::new(auth) as Arc<dyn AuthProvider>);
                backends.store = Some(store.clone() as Arc<dyn DocumentStore>);
                backends.privileges = Some(store as Arc<dyn PrivilegeRegistry>);
                info!("✓ History persistence enabled");
            }
            Err(e) => error!("Failed to open auth provider, history disabled: {}", e),
        },
        Err(e) => error!("Failed to open database, history disabled: {}", e),
    }

    match GeminiClient::new(&settings.inference) {
        Ok(client) => {
            info!("✓ Inference endpoint configured (model {})", client.model());
            backends.inference = Some(Arc::new(client) as Arc<dyn TranscriptionBackend>);
        }
        Err(e) => warn!("Detection disabled: {}", e),
    }

    let options = AppOptions {
        initial_auth_token: settings.auth.initial_auth_token.clone(),
        saved_flash: Duration::from_millis(settings.ui.saved_flash_ms),
        ..Default::default()
    };

    let ctx = AppContext::new(backends, options);
    let tasks = ctx.start();

    let app = build_router(ctx.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("{}:{}", settings.server.bind, settings.server.port)
        .parse()
        .with_context(|| format!("Invalid bind address {}", settings.server.bind))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("kitaba-ui listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    ctx.shutdown().await;
    for task in tasks {
        task.abort();
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
