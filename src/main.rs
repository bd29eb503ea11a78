use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use authbridge::config::{self, CredentialSource, EnvSource, FileSource};
use authbridge::store::CredentialStore;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "authbridge=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = cli::Cli::parse();
    match args.command {
        cli::Commands::Check { file, json } => check(file, json).await,
    }
}

/// Deploy-time validation: resolve every configured credential source the
/// way the embedded layer would at startup, and report what the resolver
/// will see. Exits non-zero on malformed config.
async fn check(file: Option<PathBuf>, json: bool) -> anyhow::Result<()> {
    let mut sources: Vec<Box<dyn CredentialSource>> = vec![Box::new(EnvSource::new())];
    if let Some(path) = file {
        sources.push(Box::new(FileSource::new(path)));
    }

    let store = CredentialStore::new();
    config::provision(&store, &sources)
        .await
        .context("credential configuration is invalid")?;

    let snapshot = store.snapshot();
    let mut credentials: Vec<_> = snapshot.values().collect();
    credentials.sort_by(|a, b| {
        (a.authority.host(), a.authority.port(), a.authority.realm())
            .cmp(&(b.authority.host(), b.authority.port(), b.authority.realm()))
    });

    if credentials.is_empty() {
        println!("No credentials configured.");
        return Ok(());
    }

    if json {
        let rows: Vec<serde_json::Value> = credentials
            .iter()
            .map(|c| {
                serde_json::json!({
                    "host": c.authority.host(),
                    "port": c.authority.port(),
                    "realm": c.authority.realm(),
                    "username": c.username,
                    "secret": "<redacted>",
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        println!("{:<30} {:<12} {:<16} SECRET", "AUTHORITY", "REALM", "USERNAME");
        for c in credentials {
            println!(
                "{:<30} {:<12} {:<16} <redacted>",
                format!("{}:{}", c.authority.host(), c.authority.port()),
                c.authority.realm().unwrap_or("(any)"),
                c.username,
            );
        }
    }
    Ok(())
}
