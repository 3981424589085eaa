use anyhow::{bail, Context, Result};
use axum::serve;
use seedhub::clients::client::TorrentClient;
use seedhub::clients::factory::create_client_with;
use seedhub::core::config::Config;
use seedhub::core::poller::run_poller;
use seedhub::core::routes::build_router;
use seedhub::core::state::AppState;
use seedhub::core::tracing_init::init_tracing;
use seedhub::models::server::unique_by_name;
use seedhub::stores::kv_store::FileStore;
use seedhub::vault::service::Vault;
use seedhub::vault::session::MemorySessionStore;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    let config_path = if args.len() > 1 {
        PathBuf::from(&args[1])
    } else {
        PathBuf::from("seedhub.toml")
    };

    // Load and validate configuration
    let config = Config::from_file(&config_path).context(format!(
        "Failed to load configuration from '{}'. \
        If this is your first run, copy config.example.toml to seedhub.toml and adjust the values.",
        config_path.display()
    ))?;

    init_tracing(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.server.num_threads)
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    runtime.block_on(async_main(config, config_path))
}

async fn async_main(config: Config, config_path: PathBuf) -> Result<()> {
    info!(
        config_path = %config_path.display(),
        bind = %config.server.bind,
        port = config.server.port,
        num_threads = config.server.num_threads,
        log_level = %config.logging.level,
        log_format = %config.logging.format,
        "seedhub starting"
    );

    let vault = open_vault(&config).await?;

    let servers = vault
        .get_servers()
        .await
        .context("Failed to read servers from vault")?;
    let (servers, dropped) = unique_by_name(servers);
    for name in &dropped {
        warn!(server = %name, "Skipping vault entry with a duplicate server name");
    }

    let settings = config.poll.transport_settings();
    let mut clients: Vec<Arc<dyn TorrentClient>> = Vec::new();
    for server in servers.into_iter().filter(|s| s.visible) {
        let name = server.name.clone();
        match create_client_with(server, &settings) {
            Ok(client) => {
                info!(server = %name, kind = %client.kind(), url = %client.server().url, "Client ready");
                clients.push(Arc::from(client));
            }
            Err(e) => {
                warn!(server = %name, error = %e, "Skipping server with invalid configuration");
            }
        }
    }

    if clients.is_empty() {
        warn!("No usable servers in the vault, the API will report nothing");
    }

    let state = AppState::new(config.clone(), clients);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(run_poller(state.clone(), config.poll.interval(), shutdown_rx));

    let app = build_router(state.clone()).layer(
        ServiceBuilder::new().layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        ),
    );

    let addr = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .context(format!("Failed to bind TCP listener to {}", addr))?;

    info!(address = %addr, servers = state.clients.len(), "seedhub startup complete");

    if let Err(e) = serve(listener, app).with_graceful_shutdown(shutdown_signal()).await {
        error!(error = %e, "HTTP server error");
    }

    info!("Shutting down gracefully");

    let _ = shutdown_tx.send(true);
    if let Err(e) = poller.await {
        error!(error = %e, "Poller task failed");
    }

    for client in state.clients.iter() {
        if let Err(e) = client.logout().await {
            warn!(server = %client.server().name, error = %e, "Logout failed");
        }
    }

    vault.lock().await.context("Failed to lock vault")?;

    Ok(())
}

/// Open the vault file and unlock it, creating or migrating it on first run
async fn open_vault(config: &Config) -> Result<Vault> {
    let passphrase = match env::var(&config.vault.passphrase_env) {
        Ok(value) if !value.is_empty() => value,
        _ => bail!(
            "Vault passphrase not set. Export it in the {} environment variable.",
            config.vault.passphrase_env
        ),
    };

    let store = FileStore::open(config.vault.path.clone())
        .await
        .context(format!("Failed to open vault store: {}", config.vault.path.display()))?;

    let vault = Vault::with_iterations(
        Arc::new(store),
        Arc::new(MemorySessionStore::new()),
        config.vault.kdf_iterations,
    );

    if vault.is_initialized().await? {
        vault
            .unlock(&passphrase)
            .await
            .context("Failed to unlock vault")?;
        if !config.servers.is_empty() {
            warn!(
                config_servers = config.servers.len(),
                "Vault already exists; [[servers]] in the config are ignored and their passwords should be removed from the file"
            );
        }
    } else if !vault.migrate_legacy(&passphrase).await? {
        vault
            .initialize(&passphrase, &config.servers)
            .await
            .context("Failed to initialize vault")?;
    }

    info!(path = %config.vault.path.display(), "Vault ready");

    Ok(vault)
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
