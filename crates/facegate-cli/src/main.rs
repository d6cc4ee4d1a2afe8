use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facegate", about = "Facegate face recognition API client")]
struct Cli {
    /// Base URL of the facegated daemon
    #[arg(long, default_value = "http://127.0.0.1:5000")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check daemon health
    Health,
    /// Detect faces in an image file
    Detect {
        /// Path to the image (png/jpeg)
        image: PathBuf,
    },
    /// Register a face and print its embedding
    Register {
        image: PathBuf,
        /// Identity to enroll
        #[arg(long)]
        student_id: String,
        /// Append the returned embedding to this gallery JSON file
        #[arg(long)]
        gallery: Option<PathBuf>,
    },
    /// Recognize a face against a gallery JSON file
    Recognize {
        image: PathBuf,
        /// Gallery file: a JSON array of {student_id, embedding}
        #[arg(long)]
        gallery: PathBuf,
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
            let body = get_json(&client, &format!("{}/api/health", cli.server)).await?;
            print_json(&body);
        }
        Commands::Detect { image } => {
            let payload = encode_image(&image)?;
            let body = post_json(
                &client,
                &format!("{}/api/detect-face", cli.server),
                &serde_json::json!({ "image": payload }),
            )
            .await?;
            print_json(&body);
        }
        Commands::Register { image, student_id, gallery } => {
            let payload = encode_image(&image)?;
            let body = post_json(
                &client,
                &format!("{}/api/register-face", cli.server),
                &serde_json::json!({ "image": payload, "student_id": student_id }),
            )
            .await?;
            print_json(&body);

            if let Some(path) = gallery {
                append_to_gallery(&path, &student_id, &body["embedding"])?;
                eprintln!("appended {student_id} to {}", path.display());
            }
        }
        Commands::Recognize { image, gallery } => {
            let payload = encode_image(&image)?;
            let entries = read_gallery(&gallery)?;
            let body = post_json(
                &client,
                &format!("{}/api/recognize-face", cli.server),
                &serde_json::json!({ "image": payload, "embeddings": entries }),
            )
            .await?;
            print_json(&body);
        }
    }

    Ok(())
}

/// Read an image file and base64-encode its bytes for the API.
fn encode_image(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading image {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

fn read_gallery(path: &Path) -> Result<serde_json::Value> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading gallery {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("parsing gallery {}", path.display()))?;
    if !value.is_array() {
        bail!("gallery file must contain a JSON array of {{student_id, embedding}}");
    }
    Ok(value)
}

/// Append one enrolled embedding to a gallery file, creating it if missing.
fn append_to_gallery(path: &Path, student_id: &str, embedding: &serde_json::Value) -> Result<()> {
    if embedding.is_null() {
        bail!("register response carried no embedding");
    }

    let mut entries = if path.exists() {
        read_gallery(path)?
    } else {
        serde_json::Value::Array(Vec::new())
    };

    if let Some(list) = entries.as_array_mut() {
        list.push(serde_json::json!({
            "student_id": student_id,
            "embedding": embedding,
        }));
    }

    std::fs::write(path, serde_json::to_string_pretty(&entries)?)
        .with_context(|| format!("writing gallery {}", path.display()))?;
    Ok(())
}

async fn get_json(client: &reqwest::Client, url: &str) -> Result<serde_json::Value> {
    let response = client.get(url).send().await.context("request failed")?;
    into_body(response).await
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> Result<serde_json::Value> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .context("request failed")?;
    into_body(response).await
}

/// Parse the response body, failing with the server's error payload on
/// non-success statuses.
async fn into_body(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    let body: serde_json::Value = response.json().await.context("parsing response body")?;
    if !status.is_success() {
        bail!("{status}: {}", serde_json::to_string_pretty(&body)?);
    }
    Ok(body)
}

fn print_json(body: &serde_json::Value) {
    match serde_json::to_string_pretty(body) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{body}"),
    }
}
