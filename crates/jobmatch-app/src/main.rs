//! jobmatch binary - composition root.
//!
//! 1. Load configuration from TOML, then environment overrides
//! 2. Pick the embedding provider (ONNX model, or the mock when none is set)
//! 3. Open the vector store and build the matching service
//! 4. Build the retrieval agent with whichever collaborators are configured
//! 5. Run one subcommand and print its result as JSON

mod cli;

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use jobmatch_agent::{AskRequest, RetrievalAgent};
use jobmatch_core::config::{expand_home, MatchConfig};
use jobmatch_core::types::Entity;
use jobmatch_vector::embedding::{
    DynEmbeddingService, EmbeddingService, MockEmbedding, OnnxEmbeddingService,
};
use jobmatch_vector::{MatchingService, VectorStore};
use serde::Deserialize;
use serde_json::json;

use cli::{CliArgs, Command};

type AppResult<T> = Result<T, Box<dyn std::error::Error>>;

/// One entry of an `index` input file.
#[derive(Debug, Deserialize)]
struct IndexRecord {
    id: String,
    entity: Entity,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> AppResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&content)?)
}

fn print_json(value: &serde_json::Value) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The configured ONNX model, or a hash-based mock sized to `index.dimension`.
fn build_embedder(config: &MatchConfig) -> AppResult<Arc<dyn DynEmbeddingService>> {
    if config.embedding.model_dir.is_empty() {
        tracing::warn!(
            dimension = config.index.dimension,
            "No embedding model configured, using mock embeddings"
        );
        return Ok(Arc::new(MockEmbedding::with_dimensions(config.index.dimension)));
    }
    let model_dir = expand_home(&config.embedding.model_dir);
    let service = OnnxEmbeddingService::from_directory(&model_dir)?;
    tracing::info!(
        path = %model_dir.display(),
        dimension = EmbeddingService::dimensions(&service),
        "ONNX embedding model loaded"
    );
    Ok(Arc::new(service))
}

async fn run(command: Command, config: &MatchConfig) -> AppResult<()> {
    let embedder = build_embedder(config)?;
    let index_dir = config.resolved_index_dir();
    let store = Arc::new(VectorStore::open(index_dir.clone(), embedder.dimensions())?);
    tracing::info!(path = %index_dir.display(), "Vector store opened");
    let matching = Arc::new(MatchingService::from_config(config, store, embedder)?);

    match command {
        Command::Index { file } => {
            let records: Vec<IndexRecord> = read_json(&file)?;
            let entities: Vec<(String, Entity)> =
                records.into_iter().map(|r| (r.id, r.entity)).collect();
            let results = matching.batch_index(&entities).await;
            let indexed = results.values().filter(|ok| **ok).count();
            tracing::info!(indexed, total = results.len(), "Index run finished");
            print_json(&json!({ "indexed": indexed, "results": results }))
        }
        Command::Match {
            file,
            top_k,
            collection,
        } => {
            let entity: Entity = read_json(&file)?;
            let target = collection
                .unwrap_or_else(|| matching.collection_for(entity.kind().opposite()).to_string());
            let matches = matching.find_matches_for(&entity, &target, top_k).await?;
            print_json(&json!({ "collection": target, "matches": matches }))
        }
        Command::Ask {
            query,
            session,
            top_k,
            target,
            context,
        } => {
            let agent = RetrievalAgent::from_config(config, matching)?;
            let request = AskRequest {
                query,
                session_id: session,
                top_k,
                target,
                context,
            };
            print_json(&agent.ask_json(&request).await)
        }
        Command::Delete { id, collection } => {
            let deleted = matching.delete_entity(&id, &collection).await;
            print_json(&json!({ "id": id, "collection": collection, "deleted": deleted }))
        }
        Command::Stats => print_json(&serde_json::to_value(matching.stats()?)?),
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let args = CliArgs::parse();

    // Config, read before tracing so the configured level can seed the filter.
    let config_file = args.resolve_config_path();
    let (mut config, load_error) = match MatchConfig::load(&config_file) {
        Ok(config) => (config, None),
        Err(e) => (MatchConfig::default(), Some(e)),
    };
    config.apply_env_overrides();

    // Tracing. RUST_LOG wins over the flag and the config file.
    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting jobmatch v{}", env!("CARGO_PKG_VERSION"));
    match load_error {
        None => tracing::info!(path = %config_file.display(), "Configuration loaded"),
        Some(e) => tracing::warn!(
            path = %config_file.display(),
            error = %e,
            "Failed to load config, using defaults"
        ),
    }

    if let Err(e) = run(args.command, &config).await {
        tracing::error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobmatch_core::types::EntityKind;

    #[test]
    fn test_index_records_parse() {
        let raw = r#"[
            {"id": "17", "entity": {"kind": "job_offer", "title": "Rust developer", "is_remote": true}},
            {"id": "42", "entity": {"kind": "candidate", "headline": "Backend engineer",
                                    "skills": [{"name": "Rust"}]}}
        ]"#;
        let records: Vec<IndexRecord> = serde_json::from_str(raw).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "17");
        assert_eq!(records[0].entity.kind(), EntityKind::JobOffer);
        assert_eq!(records[1].entity.kind(), EntityKind::Candidate);
    }

    #[test]
    fn test_mock_embedder_without_model_dir() {
        let mut config = MatchConfig::default();
        config.index.dimension = 64;
        let embedder = build_embedder(&config).unwrap();
        assert_eq!(embedder.dimensions(), 64);
    }

    #[test]
    fn test_missing_model_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = MatchConfig::default();
        config.embedding.model_dir = dir.path().join("absent").to_string_lossy().to_string();
        assert!(build_embedder(&config).is_err());
    }

    #[tokio::test]
    async fn test_index_then_stats() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("offers.json");
        std::fs::write(
            &input,
            r#"[{"id": "1", "entity": {"kind": "job_offer", "title": "Welder"}}]"#,
        )
        .unwrap();

        let mut config = MatchConfig::default();
        config.general.data_dir = dir.path().to_string_lossy().to_string();
        config.index.dimension = 16;

        run(Command::Index { file: input }, &config).await.unwrap();
        run(Command::Stats, &config).await.unwrap();
        let index_dir = config.resolved_index_dir();
        assert!(index_dir.join("job_offers.index").exists());
        assert!(index_dir.join("job_offers_mappings.json").exists());
    }
}
