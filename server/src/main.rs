use std::net::SocketAddr;
use tokio::net::TcpListener;

use chatdesk_server::config::{generate_config_template, Config};
use chatdesk_server::rooms::sweeper::{spawn_cleanup_sweeper, CleanupSweeper};
use chatdesk_server::rooms::RoomSettings;
use chatdesk_server::{auth, db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let env_filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chatdesk_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter())
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(env_filter())
            .init();
    }

    tracing::info!(
        "Chatdesk server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = auth::jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    let settings = RoomSettings::from_config(&config.rooms());
    let app_state = state::AppState::new(db, jwt_secret, settings.clone());

    // Idle cleanup for rooms and hubs, including deadlines left by a previous run
    let sweeper = CleanupSweeper::new(
        app_state.rooms.clone(),
        app_state.hubs.clone(),
        app_state.store.clone(),
        app_state.names.clone(),
    );
    spawn_cleanup_sweeper(sweeper, settings.sweep_interval);

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
