//! TubeSage - YouTube channel ingestion and retrieval-augmented chat.
//!
//! A backend service that ingests channel/video transcripts, indexes them
//! into embedding chunks, and serves streaming chat grounded in retrieval
//! over those chunks.

mod cache;
mod chat;
mod chunker;
mod config;
mod email;
mod embedding;
mod error;
mod error_sink;
mod llm;
mod lock;
mod models;
mod pipeline;
mod queue;
mod rate_limit;
mod repository;
mod search;
mod server;
mod storage;
mod summary;
mod transcript;
mod youtube;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (before anything else)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tubesage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = config::Settings::from_env()?;
    error::set_expose_stacks(!settings.is_production());

    server::serve(settings).await
}
