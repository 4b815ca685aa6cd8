use anyhow::{bail, Context, Result};
use base64::Engine;
use clap::Parser;
use vg::basic_models::{Level, RoastRequest};
use vg_client::api::ApiClient;

/// Roast gallery images from the command line
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Drive file IDs to roast. Defaults to the top of the leaderboard.
    file_ids: Vec<String>,
    /// How many leaderboard images to roast when no IDs are given
    #[arg(long, default_value_t = 3)]
    top: usize,
    /// Force a heat level from 1 to 3 instead of escalating
    #[arg(short, long)]
    level: Option<u8>,
    /// Ask the server to voice each roast
    #[arg(long)]
    voice: bool,
    /// Directory to save voiced roasts into, as <file id>.wav
    #[arg(long, default_value = ".")]
    out: std::path::PathBuf,
    /// Just list the gallery with its counters and exit
    #[arg(long)]
    list: bool,
    /// URL of the server
    #[arg(long, default_value = "http://localhost:3000")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();
    let args = Args::parse();
    let client = ApiClient::from_env(&args.server)?;

    if args.list {
        for entry in client.images().await? {
            println!(
                "{}\t{}\t{} points, {} roasts, {} comments",
                entry.image.id, entry.image.name, entry.votes, entry.roasts, entry.comments
            );
        }
        return Ok(());
    }

    let file_ids = if args.file_ids.is_empty() {
        let top = client.leaderboard(args.top).await?;
        if top.is_empty() {
            bail!("Nobody has voted yet, so there is nothing to roast. Pass some file IDs.");
        }
        for entry in &top {
            println!("{} ({} points)", entry.name, entry.score);
        }
        top.into_iter().map(|e| e.file_id).collect()
    } else {
        args.file_ids
    };

    let request = RoastRequest {
        level: args.level.map(Level::clamp),
        voice: args.voice,
    };
    for file_id in file_ids {
        tracing::info!("Roasting {}", file_id);
        let roast = client
            .roast(&file_id, &request)
            .await
            .with_context(|| format!("Roasting {}", file_id))?;
        println!("\n[{}] level {}\n{}", roast.file_id, roast.level, roast.text);

        if let Some(audio) = &roast.audio_base64 {
            let wav = base64::engine::general_purpose::STANDARD.decode(audio)?;
            let path = args.out.join(format!("{}.wav", file_id));
            std::fs::write(&path, wav)?;
            println!("Saved audio to {}", path.display());
        } else if args.voice {
            println!("(The server could not voice this one)");
        }
    }
    Ok(())
}
