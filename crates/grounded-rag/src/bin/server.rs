//! Pipeline server binary
//!
//! Run with: cargo run -p grounded-rag --bin grounded-rag-server
//! Configuration is read from the TOML file named by `GROUNDED_RAG_CONFIG`.

use grounded_rag::{config::RagConfig, server::RagServer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grounded_rag=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!(
        r#"
╔═══════════════════════════════════════════════════════════╗
║                       Grounded RAG                        ║
║     Resumable Extraction with Citation-Bound Retrieval    ║
╚═══════════════════════════════════════════════════════════╝
"#
    );

    let config = RagConfig::from_env()?;

    tracing::info!("Configuration loaded");
    tracing::info!("  - Extraction model: {}", config.extraction.model);
    tracing::info!(
        "  - Sections: {} MB target, {} MB inline limit",
        config.extraction.target_section_mb,
        config.extraction.inline_limit_mb
    );
    tracing::info!(
        "  - Embeddings: {:?} {} ({} dims)",
        config.embeddings.backend,
        config.embeddings.model,
        config.embeddings.dimensions
    );
    tracing::info!(
        "  - Chunks: {} tokens, {} overlap",
        config.chunking.chunk_tokens,
        config.chunking.overlap_tokens
    );
    tracing::info!(
        "  - Retrieval: top {} at similarity >= {}",
        config.retrieval.top_k,
        config.retrieval.min_similarity
    );

    let server = RagServer::new(config).await?;

    println!("\nServer starting...");
    println!("  API: http://{}", server.address());
    println!("  Health: http://{}/health", server.address());
    println!("  API Info: http://{}/api/info", server.address());
    println!("\nPress Ctrl+C to stop\n");

    server.start().await?;

    Ok(())
}
