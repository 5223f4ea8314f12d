use std::net::SocketAddr;
use tokio::net::TcpListener;

use huddle_server::auth::jwt;
use huddle_server::config::{generate_config_template, Config};
use huddle_server::{db, routes, state};

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
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "huddle_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "huddle_server=info".parse().unwrap()),
            )
            .init();
    }

    // Load or generate the local token signing key (256-bit random, stored in data_dir)
    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Handle --issue-token: print a local token and exit
    if let Some(user_id) = &config.issue_token {
        let email = config.email.as_deref().unwrap_or_default();
        let token = jwt::issue_local_token(&jwt_secret, user_id, email, config.local_token_ttl_secs)?;
        println!("{}", token);
        return Ok(());
    }

    tracing::info!(
        "Huddle server v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    // Initialize SQLite database
    let db = db::init_db(&config.data_dir)?;

    // Build application state: identity strategies, store, coordinator
    let app_state = state::AppState::from_config(&config, db, jwt_secret)?;

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
