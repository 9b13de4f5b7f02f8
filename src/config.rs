use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::llm::GenerationParams;
use crate::retrieval::dense::{MissingVectorPolicy, QueryEmbeddingMode};
use crate::workflow::classifier::RoutePolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub generation: GenerationConfig,
    pub retrieval: RetrievalConfig,
    pub encyclopedia: EncyclopediaConfig,
    pub embedding: EmbeddingConfig,
    pub reranker: RerankerConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub health_check: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8081/v1".to_string(),
            model: "Qwen3-30B-A3B-Instruct-2507".to_string(),
            api_key: "sk-no-key-required".to_string(),
            timeout_secs: 120,
            max_retries: 2,
            retry_backoff_ms: 500,
            health_check: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub classifier: GenerationParams,
    pub keywords: GenerationParams,
    pub solver: GenerationParams,
    pub recovery: GenerationParams,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            classifier: GenerationParams {
                temperature: 0.0,
                max_tokens: 20,
                repetition_penalty: None,
                json_mode: false,
            },
            keywords: GenerationParams {
                temperature: 0.0,
                max_tokens: 256,
                repetition_penalty: None,
                json_mode: true,
            },
            solver: GenerationParams {
                temperature: 0.6,
                max_tokens: 4096,
                repetition_penalty: Some(1.1),
                json_mode: false,
            },
            recovery: GenerationParams {
                temperature: 0.0,
                max_tokens: 8,
                repetition_penalty: None,
                json_mode: false,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub corpus_paths: Vec<PathBuf>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub sparse_k: usize,
    pub dense_k: usize,
    pub fused_k: usize,
    pub sparse_weight: f64,
    pub dense_weight: f64,
    pub rrf_k: u32,
    pub bm25_k1: f64,
    pub bm25_b: f64,
    pub max_queries: usize,
    pub query_fallback_chars: usize,
    pub candidate_max_chars: usize,
    pub rerank_top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            corpus_paths: vec![PathBuf::from("data/corpus")],
            chunk_size: 1000,
            chunk_overlap: 200,
            sparse_k: 10,
            dense_k: 3,
            fused_k: 3,
            sparse_weight: 0.3,
            dense_weight: 0.7,
            rrf_k: 20,
            bm25_k1: 1.5,
            bm25_b: 0.75,
            max_queries: 3,
            query_fallback_chars: 20,
            candidate_max_chars: 1000,
            rerank_top_k: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncyclopediaConfig {
    pub enabled: bool,
    pub api_url: String,
    pub max_pages_per_keyword: usize,
    pub max_chunks_per_query: usize,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub timeout_secs: u64,
}

impl Default for EncyclopediaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_url: "https://ko.wikipedia.org/w/api.php".to_string(),
            max_pages_per_keyword: 3,
            max_chunks_per_query: 5,
            chunk_size: 500,
            chunk_overlap: 50,
            timeout_secs: 10,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingBackend {
    LocalHash,
    Http,
}

impl EmbeddingBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocalHash => "local-hash",
            Self::Http => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub base_url: String,
    pub dimensions: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
    pub store_path: PathBuf,
    pub query_mode: QueryEmbeddingMode,
    pub on_missing_vector: MissingVectorPolicy,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::LocalHash,
            model: "dragonkue/BGE-m3-ko".to_string(),
            base_url: "http://localhost:8082/v1".to_string(),
            dimensions: 384,
            batch_size: 32,
            timeout_secs: 60,
            store_path: PathBuf::from(".cache/csat-rag/embeddings.sqlite"),
            query_mode: QueryEmbeddingMode::Online,
            on_missing_vector: MissingVectorPolicy::Embed,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RerankerBackend {
    LocalOverlap,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub backend: RerankerBackend,
    pub model: String,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            backend: RerankerBackend::LocalOverlap,
            model: "BAAI/bge-reranker-v2-m3".to_string(),
            base_url: "http://localhost:8083".to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub checkpoint_every: usize,
    pub default_answer: String,
    pub recovery_context_chars: usize,
    pub route: RoutePolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            checkpoint_every: 10,
            default_answer: "1".to_string(),
            recovery_context_chars: 6000,
            route: RoutePolicy::Auto,
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config = Self::from_yaml(&raw)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_yaml::from_str(raw).context("invalid YAML config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let retrieval = &self.retrieval;
        for (name, weight) in [
            ("sparse_weight", retrieval.sparse_weight),
            ("dense_weight", retrieval.dense_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                bail!("retrieval.{name} must be a finite non-negative number, got {weight}");
            }
        }
        if retrieval.sparse_weight + retrieval.dense_weight <= 0.0 {
            bail!("retrieval weights must not both be zero");
        }
        if retrieval.chunk_overlap >= retrieval.chunk_size {
            bail!(
                "retrieval.chunk_overlap ({}) must be smaller than chunk_size ({})",
                retrieval.chunk_overlap,
                retrieval.chunk_size
            );
        }
        if self.encyclopedia.chunk_overlap >= self.encyclopedia.chunk_size {
            bail!("encyclopedia.chunk_overlap must be smaller than chunk_size");
        }
        if self.run.checkpoint_every == 0 {
            bail!("run.checkpoint_every must be at least 1");
        }
        if !is_choice_label(&self.run.default_answer) {
            bail!(
                "run.default_answer must be a choice number 1-5, got '{}'",
                self.run.default_answer
            );
        }
        if self.llm.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if self.embedding.dimensions == 0 {
            bail!("embedding.dimensions must be positive");
        }

        Ok(())
    }
}

fn is_choice_label(value: &str) -> bool {
    matches!(value, "1" | "2" | "3" | "4" | "5")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::from_yaml("").expect("empty config should load");
        assert_eq!(config.retrieval.rrf_k, 20);
        assert_eq!(config.run.checkpoint_every, 10);
        assert_eq!(config.run.default_answer, "1");
        assert_eq!(config.run.route, RoutePolicy::Auto);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let raw = r#"
llm:
  base_url: http://127.0.0.1:9000/v1
  model: local-model
retrieval:
  sparse_weight: 0.5
  dense_weight: 0.5
run:
  route: never
embedding:
  backend: http
  query_mode: precomputed
  on_missing_vector: error
"#;
        let config = AppConfig::from_yaml(raw).expect("partial config should load");
        assert_eq!(config.llm.model, "local-model");
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.retrieval.sparse_weight, 0.5);
        assert_eq!(config.retrieval.chunk_size, 1000);
        assert_eq!(config.run.route, RoutePolicy::Never);
        assert_eq!(config.embedding.backend, EmbeddingBackend::Http);
        assert_eq!(config.embedding.query_mode, QueryEmbeddingMode::Precomputed);
        assert_eq!(
            config.embedding.on_missing_vector,
            MissingVectorPolicy::Error
        );
    }

    #[test]
    fn shipped_sample_config_matches_defaults() {
        let config = AppConfig::from_yaml(include_str!("../config/default.yaml"))
            .expect("sample config should load");
        let defaults = AppConfig::default();
        assert_eq!(config.retrieval.corpus_paths, defaults.retrieval.corpus_paths);
        assert_eq!(config.generation.solver, defaults.generation.solver);
        assert_eq!(config.embedding.store_path, defaults.embedding.store_path);
        assert_eq!(config.reranker.backend, defaults.reranker.backend);
    }

    #[test]
    fn rejects_zero_weights() {
        let raw = "retrieval:\n  sparse_weight: 0.0\n  dense_weight: 0.0\n";
        assert!(AppConfig::from_yaml(raw).is_err());
    }

    #[test]
    fn rejects_overlap_not_smaller_than_chunk() {
        let raw = "retrieval:\n  chunk_size: 100\n  chunk_overlap: 100\n";
        assert!(AppConfig::from_yaml(raw).is_err());
    }

    #[test]
    fn rejects_default_answer_outside_choices() {
        let raw = "run:\n  default_answer: \"7\"\n";
        assert!(AppConfig::from_yaml(raw).is_err());
    }

    #[test]
    fn missing_explicit_path_is_an_error() {
        let missing = Path::new("/definitely/not/here/config.yaml");
        assert!(AppConfig::load(Some(missing)).is_err());
        assert!(AppConfig::load(None).is_ok());
    }
}
