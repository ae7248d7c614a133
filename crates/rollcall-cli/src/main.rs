use std::path::PathBuf;

use anyhow::{Context, Result};
use base64::Engine;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance recognition CLI")]
struct Cli {
    /// Base URL of the rollcalld server
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    server: String,

    /// Bearer token sent with authenticated requests
    #[arg(long, env = "ROLLCALL_API_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that the daemon is up
    Health,
    /// Generate an embedding for an image file
    Embed {
        /// Path to the image file
        image: PathBuf,
    },
    /// Run a recognition attempt with an image file
    Recognize {
        /// Path to the image file
        image: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Health => {
            let body = client
                .get(format!("{}/health", cli.server))
                .send()
                .await
                .context("daemon unreachable")?
                .text()
                .await?;
            println!("{body}");
        }
        Commands::Embed { image } => {
            let response =
                post_image(&client, &cli.server, "/generate-embedding", &image, &cli.token).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Recognize { image } => {
            let response =
                post_image(&client, &cli.server, "/recognize", &image, &cli.token).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }

    Ok(())
}

async fn post_image(
    client: &reqwest::Client,
    server: &str,
    path: &str,
    image: &PathBuf,
    token: &Option<String>,
) -> Result<serde_json::Value> {
    let bytes =
        std::fs::read(image).with_context(|| format!("reading image {}", image.display()))?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);

    let mut request = client
        .post(format!("{server}{path}"))
        .json(&serde_json::json!({ "image": encoded }));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }

    let response = request.send().await.context("daemon unreachable")?;
    let status = response.status();
    let body: serde_json::Value = response
        .json()
        .await
        .with_context(|| format!("non-JSON response with status {status}"))?;
    Ok(body)
}
