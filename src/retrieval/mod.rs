pub mod chunker;
pub mod corpus;
pub mod dense;
pub mod embed_store;
pub mod encyclopedia;
pub mod ensemble;
pub mod rerank;
pub mod sparse;
pub mod tokenizer;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::AppConfig;
use crate::retrieval::chunker::TextSplitter;
use crate::retrieval::corpus::load_corpus;
use crate::retrieval::dense::{DenseBuildOptions, DenseBuildStats, DenseIndex, EmbeddingModel, QueryEmbeddingMode};
use crate::retrieval::embed_store::EmbeddingStore;
use crate::retrieval::ensemble::{EnsembleRetriever, EnsembleSettings, FusionWeights};
use crate::retrieval::sparse::{Bm25Params, SparseIndex};
use crate::retrieval::tokenizer::{KoreanTokenizer, Tokenizer};

pub struct LocalIndexes {
    pub retriever: EnsembleRetriever,
    pub model: Arc<EmbeddingModel>,
    pub store: EmbeddingStore,
    pub files: Vec<PathBuf>,
    pub chunk_count: usize,
    pub skipped_entries: usize,
    pub vocabulary_size: usize,
    pub dense_stats: DenseBuildStats,
}

/// Loads the corpus once and builds the sparse and dense indexes over
/// separate copies of the chunks.
pub fn build_local_indexes(config: &AppConfig, refresh_all: bool) -> Result<LocalIndexes> {
    let retrieval = &config.retrieval;
    let splitter = TextSplitter::new(retrieval.chunk_size, retrieval.chunk_overlap)?;
    let corpus = load_corpus(&retrieval.corpus_paths, &splitter)?;
    let chunk_count = corpus.chunks.len();

    let analyzer = KoreanTokenizer::new()?
        .with_lexicon(corpus.chunks.iter().map(|chunk| chunk.title.clone()));
    let lexicon_size = analyzer.lexicon_size();
    let tokenizer: Arc<dyn Tokenizer> = Arc::new(analyzer);
    let sparse = SparseIndex::build(
        corpus.chunks.clone(),
        tokenizer,
        Bm25Params {
            k1: retrieval.bm25_k1,
            b: retrieval.bm25_b,
        },
    )
    .context("failed to build sparse index")?;
    let vocabulary_size = sparse.vocabulary_size();

    let embedding = &config.embedding;
    let model = Arc::new(EmbeddingModel::from_config(embedding));
    let mut store = EmbeddingStore::open(&embedding.store_path)?;
    let (dense, dense_stats) = DenseIndex::build(
        corpus.chunks,
        model.clone(),
        Some(&mut store),
        DenseBuildOptions {
            batch_size: embedding.batch_size,
            refresh_all,
        },
    )
    .context("failed to build dense index")?;

    let dense = match embedding.query_mode {
        QueryEmbeddingMode::Online => dense,
        QueryEmbeddingMode::Precomputed => {
            let vectors = store.load_query_embeddings(model.model_id(), model.dimensions())?;
            info!(
                model_id = %model.model_id(),
                query_vectors = vectors.len(),
                on_missing = ?embedding.on_missing_vector,
                "loaded precomputed query vectors"
            );
            dense.with_query_mode(
                QueryEmbeddingMode::Precomputed,
                embedding.on_missing_vector,
                vectors,
            )
        }
    };

    let retriever = EnsembleRetriever::new(
        sparse,
        dense,
        EnsembleSettings {
            weights: FusionWeights {
                sparse: retrieval.sparse_weight,
                dense: retrieval.dense_weight,
            },
            rrf_k: retrieval.rrf_k,
            sparse_k: retrieval.sparse_k,
            dense_k: retrieval.dense_k,
            fused_k: retrieval.fused_k,
        },
    );

    info!(
        files = corpus.files.len(),
        chunks = chunk_count,
        skipped_entries = corpus.skipped_entries,
        vocabulary = vocabulary_size,
        lexicon = lexicon_size,
        model_loaded = model.is_loaded(),
        "local indexes ready"
    );

    Ok(LocalIndexes {
        retriever,
        model,
        store,
        files: corpus.files,
        chunk_count,
        skipped_entries: corpus.skipped_entries,
        vocabulary_size,
        dense_stats,
    })
}
