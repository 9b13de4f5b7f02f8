use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::PipelineError;
use crate::model::DocumentChunk;
use crate::retrieval::embed_store::{EmbeddingStore, query_text_hash};
use crate::semantic::{
    LOCAL_HASH_BACKEND, cosine_similarity, embed_text_local, embedding_text_hash, normalize_vector,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryEmbeddingMode {
    Online,
    Precomputed,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissingVectorPolicy {
    Error,
    Embed,
}

pub trait Embedder: Send + Sync {
    fn model_id(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

pub struct LocalHashEmbedder {
    model_id: String,
    dimensions: usize,
}

impl LocalHashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            model_id: format!("{LOCAL_HASH_BACKEND}-{dimensions}"),
            dimensions,
        }
    }
}

impl Embedder for LocalHashEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| embed_text_local(text, self.dimensions))
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: Option<usize>,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/v1/embeddings` client.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    dimensions: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to create HTTP client for embeddings")?;

        Ok(Self {
            client,
            endpoint: embeddings_endpoint(&config.base_url),
            model: config.model.clone(),
            dimensions: config.dimensions,
        })
    }
}

impl Embedder for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .map_err(|err| anyhow!(PipelineError::transient("embeddings", err.to_string())))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            bail!(PipelineError::transient(
                "embeddings",
                format!("HTTP {status}: {detail}")
            ));
        }

        let body = response
            .text()
            .context("failed to read embeddings response body")?;
        parse_embedding_body(&body, texts.len(), self.dimensions)
    }
}

pub(crate) fn embeddings_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/embeddings") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/embeddings")
    } else {
        format!("{base}/v1/embeddings")
    }
}

pub(crate) fn parse_embedding_body(
    body: &str,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>> {
    let parsed: EmbeddingResponse =
        serde_json::from_str(body).context("failed to decode embeddings JSON")?;
    if parsed.data.len() != expected {
        bail!(
            "embeddings response returned {} vectors for {expected} inputs",
            parsed.data.len()
        );
    }

    let mut data = parsed.data;
    if data.iter().all(|datum| datum.index.is_some()) {
        data.sort_by_key(|datum| datum.index.unwrap_or_default());
    }

    data.into_iter()
        .map(|datum| {
            let mut vector = datum.embedding;
            if vector.len() != dimensions {
                bail!(
                    "embedding dimension mismatch: expected {dimensions}, got {}",
                    vector.len()
                );
            }
            normalize_vector(&mut vector);
            Ok(vector)
        })
        .collect()
}

pub type EmbedderLoader = Box<dyn Fn() -> Result<Arc<dyn Embedder>> + Send + Sync>;

/// Owns the lifecycle of the embedding backend.
///
/// `load` is idempotent and `unload` is a no-op when nothing is loaded.
pub struct EmbeddingModel {
    model_id: String,
    dimensions: usize,
    loader: EmbedderLoader,
    active: RwLock<Option<Arc<dyn Embedder>>>,
}

impl EmbeddingModel {
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let owned = config.clone();
        let (model_id, dimensions) = match config.backend {
            EmbeddingBackend::LocalHash => {
                let local = LocalHashEmbedder::new(config.dimensions);
                (local.model_id().to_string(), config.dimensions)
            }
            EmbeddingBackend::Http => (config.model.clone(), config.dimensions),
        };

        Self::with_loader(
            model_id,
            dimensions,
            Box::new(move || -> Result<Arc<dyn Embedder>> {
                match owned.backend {
                    EmbeddingBackend::LocalHash => {
                        Ok(Arc::new(LocalHashEmbedder::new(owned.dimensions)))
                    }
                    EmbeddingBackend::Http => Ok(Arc::new(HttpEmbedder::new(&owned)?)),
                }
            }),
        )
    }

    pub fn with_loader(model_id: String, dimensions: usize, loader: EmbedderLoader) -> Self {
        Self {
            model_id,
            dimensions,
            loader,
            active: RwLock::new(None),
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn load(&self) -> Result<()> {
        let mut active = self
            .active
            .write()
            .map_err(|_| anyhow!("embedding model lock poisoned"))?;
        if active.is_some() {
            return Ok(());
        }

        let embedder = (self.loader)()
            .map_err(|err| anyhow!(PipelineError::fatal_init(format!("{err:#}"))))
            .with_context(|| format!("failed to load embedding model {}", self.model_id))?;
        if embedder.dimensions() != self.dimensions {
            bail!(PipelineError::fatal_init(format!(
                "embedding model {} produces {} dimensions, configured {}",
                self.model_id,
                embedder.dimensions(),
                self.dimensions
            )));
        }
        info!(model_id = %self.model_id, dimensions = self.dimensions, "embedding model loaded");
        *active = Some(embedder);
        Ok(())
    }

    pub fn unload(&self) {
        let Ok(mut active) = self.active.write() else {
            return;
        };
        if active.take().is_some() {
            info!(model_id = %self.model_id, "embedding model unloaded");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.active
            .read()
            .map(|active| active.is_some())
            .unwrap_or(false)
    }

    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embedder = self
            .active
            .read()
            .map_err(|_| anyhow!("embedding model lock poisoned"))?
            .clone()
            .with_context(|| format!("embedding model {} is not loaded", self.model_id))?;
        embedder.embed_batch(texts)
    }

    pub fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .context("embedding backend returned no vector")
    }
}

pub enum QueryInput<'a> {
    Text(&'a str),
    Vector(&'a [f32]),
}

#[derive(Debug, Clone, Copy)]
pub struct DenseBuildOptions {
    pub batch_size: usize,
    pub refresh_all: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DenseBuildStats {
    pub reused: usize,
    pub embedded: usize,
}

/// Exact cosine top-k over chunk vectors.
pub struct DenseIndex {
    chunks: Vec<DocumentChunk>,
    vectors: Vec<Vec<f32>>,
    model: Arc<EmbeddingModel>,
    mode: QueryEmbeddingMode,
    on_missing: MissingVectorPolicy,
    precomputed: HashMap<String, Vec<f32>>,
}

impl DenseIndex {
    pub fn build(
        chunks: Vec<DocumentChunk>,
        model: Arc<EmbeddingModel>,
        mut store: Option<&mut EmbeddingStore>,
        options: DenseBuildOptions,
    ) -> Result<(Self, DenseBuildStats)> {
        model.load()?;

        let model_id = model.model_id().to_string();
        let dimensions = model.dimensions();
        let mut stats = DenseBuildStats::default();
        let mut vectors = vec![Vec::<f32>::new(); chunks.len()];
        let mut pending = Vec::<usize>::new();

        for (index, chunk) in chunks.iter().enumerate() {
            if !options.refresh_all {
                if let Some(store) = store.as_deref() {
                    let text_hash = embedding_text_hash(&chunk.text);
                    let stored = store.load_chunk_embedding(&model_id, &text_hash, dimensions)?;
                    if let Some(vector) = stored {
                        vectors[index] = vector;
                        stats.reused += 1;
                        continue;
                    }
                }
            }
            pending.push(index);
        }

        for batch in pending.chunks(options.batch_size.max(1)) {
            let texts = batch
                .iter()
                .map(|index| chunks[*index].text.clone())
                .collect::<Vec<String>>();
            let embedded = model.embed(&texts)?;
            if embedded.len() != batch.len() {
                bail!(
                    "embedding backend returned {} vectors for {} chunks",
                    embedded.len(),
                    batch.len()
                );
            }

            let mut rows = Vec::<(String, Vec<f32>)>::with_capacity(batch.len());
            for (index, vector) in batch.iter().zip(embedded) {
                rows.push((embedding_text_hash(&chunks[*index].text), vector.clone()));
                vectors[*index] = vector;
            }
            if let Some(store) = store.as_deref_mut() {
                store.upsert_chunk_embeddings(&model_id, &rows)?;
            }
            stats.embedded += batch.len();
            debug!(
                model_id = %model_id,
                embedded = stats.embedded,
                pending = pending.len(),
                "chunk batch embedded"
            );
        }

        info!(
            model_id = %model_id,
            chunks = chunks.len(),
            reused = stats.reused,
            embedded = stats.embedded,
            "dense index built"
        );

        Ok((
            Self {
                chunks,
                vectors,
                model,
                mode: QueryEmbeddingMode::Online,
                on_missing: MissingVectorPolicy::Embed,
                precomputed: HashMap::new(),
            },
            stats,
        ))
    }

    pub fn with_query_mode(
        mut self,
        mode: QueryEmbeddingMode,
        on_missing: MissingVectorPolicy,
        precomputed: HashMap<String, Vec<f32>>,
    ) -> Self {
        self.mode = mode;
        self.on_missing = on_missing;
        self.precomputed = precomputed;
        self
    }

    /// Nearest chunks for `query`. In precomputed mode the stored vector of
    /// `query` is used when present, else the vector stored for
    /// `question_key` (the question plus its choices).
    pub fn search(
        &self,
        query: &str,
        question_key: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<DocumentChunk>> {
        if self.mode == QueryEmbeddingMode::Online {
            return self.search_input(QueryInput::Text(query), top_k);
        }

        let stored = std::iter::once(query)
            .chain(question_key)
            .find_map(|text| self.precomputed.get(&query_text_hash(text)));
        match (stored, self.on_missing) {
            (Some(vector), _) => self.search_input(QueryInput::Vector(vector), top_k),
            (None, MissingVectorPolicy::Error) => bail!(
                "no precomputed query vector for '{}'; run the index command with --questions",
                crate::util::truncate_chars(question_key.unwrap_or(query), 40)
            ),
            (None, MissingVectorPolicy::Embed) => {
                debug!("precomputed query vector missing, embedding online");
                self.search_input(QueryInput::Text(query), top_k)
            }
        }
    }

    pub fn search_input(&self, query: QueryInput<'_>, top_k: usize) -> Result<Vec<DocumentChunk>> {
        let owned;
        let vector = match query {
            QueryInput::Text(text) => {
                owned = self.model.embed_one(text)?;
                owned.as_slice()
            }
            QueryInput::Vector(vector) => vector,
        };

        let mut ranked = self
            .vectors
            .iter()
            .enumerate()
            .map(|(index, candidate)| (index, cosine_similarity(vector, candidate)))
            .collect::<Vec<(usize, f64)>>();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));
        ranked.truncate(top_k);

        Ok(ranked
            .into_iter()
            .map(|(index, score)| self.chunks[index].with_score(score as f32))
            .collect())
    }
}
