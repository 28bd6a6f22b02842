use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MatchError, Result};
use crate::types::{CANDIDATES_COLLECTION, JOB_OFFERS_COLLECTION};

/// Top-level configuration for the matching backend.
///
/// Loaded from `~/.jobmatch/config.toml` by default. Every section falls back
/// to its defaults, so a partial (or empty) file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub fusion: FusionConfig,
    #[serde(default)]
    pub rewriter: RewriterConfig,
    #[serde(default)]
    pub lexical: LexicalConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

impl MatchConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MatchConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Overlay collaborator endpoints and credentials from the environment.
    ///
    /// Credentials are usually kept out of the config file; a variable that is
    /// set (even to an empty string) replaces the file value.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("JOBMATCH_REWRITER_API_KEY") {
            self.rewriter.api_key = v;
        }
        if let Some(v) = lookup("JOBMATCH_REWRITER_ENDPOINT") {
            self.rewriter.endpoint = v;
        }
        if let Some(v) = lookup("JOBMATCH_REWRITER_MODEL") {
            self.rewriter.model = v;
        }
        if let Some(v) = lookup("JOBMATCH_LEXICAL_URL") {
            self.lexical.base_url = v;
        }
        if let Some(v) = lookup("JOBMATCH_LEXICAL_USER") {
            self.lexical.username = v;
        }
        if let Some(v) = lookup("JOBMATCH_LEXICAL_PASSWORD") {
            self.lexical.password = v;
        }
        if let Some(v) = lookup("JOBMATCH_MODEL_DIR") {
            self.embedding.model_dir = v;
        }
    }

    /// Reject values that would make the service misbehave at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.index.candidates_collection == self.index.job_offers_collection {
            return Err(MatchError::Config(format!(
                "candidates and job offers must use distinct collections (both are '{}')",
                self.index.candidates_collection
            )));
        }
        for name in [
            &self.index.candidates_collection,
            &self.index.job_offers_collection,
        ] {
            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(MatchError::Config(format!(
                    "invalid collection name '{}': use ASCII letters, digits, '_' or '-'",
                    name
                )));
            }
        }
        if self.index.dimension == 0 {
            return Err(MatchError::Config("index.dimension must be > 0".into()));
        }
        if self.fusion.vector_weight < 0.0 || self.fusion.lexical_weight < 0.0 {
            return Err(MatchError::Config(
                "fusion weights must be non-negative".into(),
            ));
        }
        if self.fusion.default_top_k == 0 || self.fusion.default_top_k > self.fusion.max_top_k {
            return Err(MatchError::Config(format!(
                "fusion.default_top_k must be in 1..={}",
                self.fusion.max_top_k
            )));
        }
        Ok(())
    }

    /// The index directory, resolved against the data directory when relative.
    pub fn resolved_index_dir(&self) -> PathBuf {
        let index_dir = expand_home(&self.index.index_dir);
        if index_dir.is_absolute() {
            index_dir
        } else {
            expand_home(&self.general.data_dir).join(index_dir)
        }
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        #[cfg(target_os = "windows")]
        let home = std::env::var("USERPROFILE").unwrap_or_else(|_| ".".to_string());
        #[cfg(not(target_os = "windows"))]
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory; relative index paths are resolved against it.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.jobmatch/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Vector index configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Directory holding the `<collection>.index` / `<collection>_mappings.json` pairs.
    pub index_dir: String,
    /// Vector dimension, used when the embedding provider cannot report one.
    pub dimension: usize,
    /// Collection that candidate profiles are indexed under.
    pub candidates_collection: String,
    /// Collection that job offers are indexed under.
    pub job_offers_collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            index_dir: "faiss".to_string(),
            dimension: 384,
            candidates_collection: CANDIDATES_COLLECTION.to_string(),
            job_offers_collection: JOB_OFFERS_COLLECTION.to_string(),
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Directory containing `model.onnx` and `tokenizer.json`. Empty uses the mock provider.
    pub model_dir: String,
    /// Model name reported in statistics.
    pub model_name: String,
    /// Timeout for one embedding call (single text or batch), in milliseconds.
    pub timeout_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_dir: String::new(),
            model_name: "all-MiniLM-L6-v2".to_string(),
            timeout_ms: 30_000,
        }
    }
}

/// Score fusion policy for hybrid retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Weight of the vector similarity when an ID is found by both sources.
    pub vector_weight: f32,
    /// Weight of the lexical score (both sources, or lexical only).
    pub lexical_weight: f32,
    /// Number of results when the caller does not ask for a specific count.
    pub default_top_k: usize,
    /// Upper bound on the number of results per query.
    pub max_top_k: usize,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.6,
            lexical_weight: 0.4,
            default_top_k: 10,
            max_top_k: 100,
        }
    }
}

/// Query rewriter (chat-completions LLM) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriterConfig {
    /// API key. Empty disables the rewriter.
    pub api_key: String,
    /// Chat-completions endpoint.
    pub endpoint: String,
    /// Model identifier.
    pub model: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: "https://api.mistral.ai/v1/chat/completions".to_string(),
            model: "mistral-small-latest".to_string(),
            timeout_ms: 30_000,
        }
    }
}

impl RewriterConfig {
    pub fn is_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// External full-text engine (Elasticsearch-compatible) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LexicalConfig {
    /// Base URL, e.g. `http://localhost:9200`. Empty disables lexical search.
    pub base_url: String,
    /// Basic-auth user (used only together with a password).
    pub username: String,
    /// Basic-auth password.
    pub password: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for LexicalConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password: String::new(),
            timeout_ms: 10_000,
        }
    }
}

impl LexicalConfig {
    pub fn is_enabled(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

/// Conversation session memory configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Turns kept per session; older turns are dropped first. 0 keeps everything.
    pub max_turns: usize,
    /// Sessions idle for longer than this are evicted. 0 disables expiry.
    pub idle_timeout_minutes: u32,
    /// Maximum number of live sessions; the least recently used is evicted. 0 is unbounded.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            idle_timeout_minutes: 60,
            max_sessions: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = MatchConfig::default();
        assert_eq!(config.general.data_dir, "~/.jobmatch/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.index.dimension, 384);
        assert_eq!(config.index.candidates_collection, "candidates");
        assert_eq!(config.index.job_offers_collection, "job_offers");
        assert_eq!(config.embedding.model_name, "all-MiniLM-L6-v2");
        assert!((config.fusion.vector_weight - 0.6).abs() < f32::EPSILON);
        assert!((config.fusion.lexical_weight - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.fusion.default_top_k, 10);
        assert!(!config.rewriter.is_enabled());
        assert!(!config.lexical.is_enabled());
        assert_eq!(config.session.max_turns, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let content = r#"
[general]
log_level = "debug"

[fusion]
vector_weight = 0.7
lexical_weight = 0.3
"#;
        let file = create_temp_config(content);
        let config = MatchConfig::load(file.path()).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert!((config.fusion.vector_weight - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.fusion.default_top_k, 10);
        assert_eq!(config.index.dimension, 384);
    }

    #[test]
    fn test_load_full_config() {
        let content = r#"
[general]
data_dir = "/srv/jobmatch"
log_level = "warn"

[index]
index_dir = "/srv/jobmatch/vectors"
dimension = 768
candidates_collection = "talents"
job_offers_collection = "offers"

[embedding]
model_dir = "/models/minilm"
model_name = "custom"
timeout_ms = 500

[fusion]
vector_weight = 0.5
lexical_weight = 0.5
default_top_k = 5
max_top_k = 50

[rewriter]
api_key = "secret"
endpoint = "http://localhost:8080/v1/chat/completions"
model = "small"
timeout_ms = 1500

[lexical]
base_url = "http://localhost:9200"
username = "elastic"
password = "changeme"
timeout_ms = 2000

[session]
max_turns = 10
idle_timeout_minutes = 5
max_sessions = 100
"#;
        let file = create_temp_config(content);
        let config = MatchConfig::load(file.path()).unwrap();
        assert_eq!(config.index.dimension, 768);
        assert_eq!(config.index.candidates_collection, "talents");
        assert_eq!(config.embedding.timeout_ms, 500);
        assert_eq!(config.fusion.max_top_k, 50);
        assert!(config.rewriter.is_enabled());
        assert!(config.lexical.is_enabled());
        assert_eq!(config.lexical.username, "elastic");
        assert_eq!(config.session.max_sessions, 100);
        assert_eq!(
            config.resolved_index_dir(),
            PathBuf::from("/srv/jobmatch/vectors")
        );
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = MatchConfig::load_or_default(Path::new("/nonexistent/jobmatch.toml"));
        assert_eq!(config.general.data_dir, "~/.jobmatch/data");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(MatchConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_load_rejects_same_collection_twice() {
        let content = r#"
[index]
candidates_collection = "all"
job_offers_collection = "all"
"#;
        let file = create_temp_config(content);
        let err = MatchConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, MatchError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = MatchConfig::default();
        config.index.job_offers_collection = "../escape".into();
        assert!(config.validate().is_err());

        let mut config = MatchConfig::default();
        config.fusion.lexical_weight = -0.1;
        assert!(config.validate().is_err());

        let mut config = MatchConfig::default();
        config.fusion.default_top_k = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("config.toml");

        let mut config = MatchConfig::default();
        config.fusion.default_top_k = 25;
        config.save(&path).unwrap();

        let reloaded = MatchConfig::load(&path).unwrap();
        assert_eq!(reloaded.fusion.default_top_k, 25);
        assert_eq!(reloaded.index.dimension, config.index.dimension);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = MatchConfig::load(file.path()).unwrap();
        assert_eq!(config.index.index_dir, "faiss");
        assert_eq!(config.session.idle_timeout_minutes, 60);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("JOBMATCH_REWRITER_API_KEY", "key-123"),
            ("JOBMATCH_LEXICAL_URL", "http://es:9200"),
            ("JOBMATCH_MODEL_DIR", "/models"),
        ]
        .into_iter()
        .collect();

        let mut config = MatchConfig::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.rewriter.api_key, "key-123");
        assert!(config.rewriter.is_enabled());
        assert_eq!(config.lexical.base_url, "http://es:9200");
        assert_eq!(config.embedding.model_dir, "/models");
        assert_eq!(config.rewriter.model, "mistral-small-latest");
    }

    #[test]
    fn test_relative_index_dir_resolves_under_data_dir() {
        let mut config = MatchConfig::default();
        config.general.data_dir = "/var/lib/jobmatch".into();
        config.index.index_dir = "vectors".into();
        assert_eq!(
            config.resolved_index_dir(),
            PathBuf::from("/var/lib/jobmatch/vectors")
        );
    }
}
