use anyhow::Context;
use clap::{Parser, Subcommand};
use duochat::{AppState, app, auth::TokenIdentity, config::Config, model::UserId, store, users::SqliteDirectory};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "duochat", about = "Two-party real-time chat server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP and websocket server (default)
    Serve,
    /// Add a user to the directory
    AddUser {
        first_name: String,
        last_name: String,
        email: String,
    },
    /// Issue a bearer token for a user
    IssueToken {
        user_id: i64,
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Revoke a bearer token
    RevokeToken { token: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("duochat=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    let db_pool = store::connect(&config.database_url, config.db_max_connections).await?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let app = app(AppState::new(db_pool), config.cors()?);
            let listener = tokio::net::TcpListener::bind(config.bind_addr)
                .await
                .with_context(|| format!("binding {}", config.bind_addr))?;
            tracing::info!(addr = %config.bind_addr, "listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;
            tracing::info!("shut down");
        }
        Command::AddUser { first_name, last_name, email } => {
            let user = SqliteDirectory::new(db_pool).insert(&first_name, &last_name, &email).await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::IssueToken { user_id, hours } => {
            let token = TokenIdentity::new(db_pool)
                .issue(UserId(user_id), time::Duration::hours(hours))
                .await?;
            println!("{token}");
        }
        Command::RevokeToken { token } => {
            if !TokenIdentity::new(db_pool).revoke(&token).await? {
                anyhow::bail!("no such token");
            }
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}
