use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use vg_server::{
    ai::LlmClient,
    auth::PrincipalSecret,
    cache::new_cache,
    config::Config,
    database::Database,
    gallery::Gallery,
    session::Sessions,
    storage::{BlobStore, DriveClient, ImageSource, LocalFolder},
    tts::SpeechClient,
    web::{router, AppState},
};

#[derive(Parser, Debug)]
struct Args {
    /// YAML configuration file. Missing settings keep their defaults.
    #[clap(long, default_value = "vibe-gallery.yml")]
    config: String,

    /// The address and optionally port to bind to, overriding the config file
    #[clap(long)]
    address: Option<String>,

    /// Whether to use HTTPS / TLS. Requires `server.tls` in the config file.
    #[clap(long)]
    tls: bool,
}

/// Pick where images and the database live
fn open_storage(config: &Config) -> Result<(Arc<dyn ImageSource>, Arc<dyn BlobStore>)> {
    match &config.drive.local_dir {
        Some(dir) => {
            tracing::info!("Serving the local folder {}", dir);
            let folder = Arc::new(LocalFolder::new(dir));
            let source: Arc<dyn ImageSource> = folder.clone();
            let blobs: Arc<dyn BlobStore> = folder;
            Ok((source, blobs))
        }
        None => {
            tracing::info!("Serving drive folder {}", config.drive.folder_id);
            let drive = Arc::new(DriveClient::from_config(&config.drive).context("Opening drive")?);
            let source: Arc<dyn ImageSource> = drive.clone();
            let blobs: Arc<dyn BlobStore> = drive;
            Ok((source, blobs))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    // Parse command line arguments
    let args = Args::parse();
    let config = if std::fs::exists(&args.config)? {
        Config::load(&args.config).with_context(|| format!("Loading {}", args.config))?
    } else {
        Config::default()
    };

    // initialize tracing
    let file_appender = tracing_appender::rolling::daily(
        match &config.server.log_dir {
            Some(dir) => std::path::PathBuf::from(dir),
            None => std::env::current_dir()?,
        },
        "access.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .json()
        .with_writer(non_blocking)
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let ai_key = dotenvy::var("AI_API_KEY").context("AI_API_KEY is not set")?;
    // Speech can come from a different provider than the chat models
    let tts_key = dotenvy::var("TTS_API_KEY").unwrap_or_else(|_| ai_key.clone());
    let principal = PrincipalSecret(dotenvy::var("PRINCIPAL_SECRET").ok().map(Into::into));
    if principal.0.is_none() {
        tracing::warn!("PRINCIPAL_SECRET is not set, the JSON API is disabled");
    }

    let (source, blobs) = open_storage(&config)?;
    let sessions = Sessions::new(config.session.idle_minutes, args.tls);
    sessions.spawn_sweeper();

    let app = router(AppState {
        gallery: Gallery::new(source, new_cache()),
        db: Database::new(blobs, config.drive.database_name.clone()),
        llm: LlmClient::new(&config.ai, &ai_key),
        speech: SpeechClient::new(&config.tts, &tts_key),
        sessions,
        principal,
    });

    let address = args.address.unwrap_or(config.server.address);

    // In development, use HTTP. In production, use HTTPS.
    if args.tls {
        let tls = config
            .server
            .tls
            .context("--tls needs server.tls in the config file")?;
        rustls::crypto::ring::default_provider()
            .install_default()
            .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;
        let tls_config =
            axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                .await
                .context("Loading TLS certificate")?;

        let addr = address.parse()?;
        tracing::info!("Listening on {}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await
            .context("Starting TLS server")?;
    } else {
        let listener = tokio::net::TcpListener::bind(&address).await?;
        tracing::info!("Listening on {}", address);
        axum::serve(listener, app).await?;
    }
    Ok(())
}
