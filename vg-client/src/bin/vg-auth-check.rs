use anyhow::Result;
use clap::Parser;
use vg_client::api::ApiClient;

/// Check authentication with the server
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// URL of the server to check
    #[arg(long, default_value = "http://localhost:3000")]
    server: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    if dotenvy::dotenv().is_err() {
        eprintln!("Warning: Failed to load .env file");
    }
    let args = Args::parse();

    // Get the service principal secret from environment
    let client = match ApiClient::from_env(&args.server) {
        Ok(client) => client,
        Err(_) => {
            eprintln!("Error: PRINCIPAL_SECRET not found in environment");
            eprintln!("Please set PRINCIPAL_SECRET in your .env file or environment");
            std::process::exit(1);
        }
    };

    println!("Testing authentication with {}...", client.server());

    match client.auth_check().await {
        Ok(body) => {
            println!("\nAuthentication successful!");
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Err(e) => {
            println!("\nAuthentication failed!");
            println!("{e:#}");
            if args.server.starts_with("https://localhost")
                || args.server.starts_with("https://127.0.0.1")
            {
                eprintln!("\nHint: Local dev servers typically use HTTP, not HTTPS.");
                eprintln!("Try: cargo run --bin vg-auth-check -- --server http://localhost:3000");
            }
            std::process::exit(1);
        }
    }

    Ok(())
}
