use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::info;

use crate::cli::{EmbedRefreshMode, IndexArgs};
use crate::config::AppConfig;
use crate::dataset::load_questions;
use crate::model::{IndexRunManifest, QuestionRecord};
use crate::retrieval::build_local_indexes;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: IndexArgs) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    let embedding = &config.embedding;
    let refresh_all = matches!(args.refresh_mode, EmbedRefreshMode::Full);

    let generated_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("index-{}", utc_compact_string(Utc::now()));
    let mut warnings = Vec::<String>::new();

    let mut indexes = build_local_indexes(&config, refresh_all)?;
    let model_id = indexes.model.model_id().to_string();

    let mut query_embeddings = 0usize;
    if let Some(path) = &args.questions {
        let loaded = load_questions(path)?;
        if !loaded.skipped.is_empty() {
            warnings.push(format!("{} malformed question rows skipped", loaded.skipped.len()));
        }

        let texts = query_texts(&loaded.questions);
        for batch in texts.chunks(embedding.batch_size.max(1)) {
            let vectors = indexes.model.embed(batch)?;
            if vectors.len() != batch.len() {
                bail!(
                    "embedding backend returned {} vectors for {} queries",
                    vectors.len(),
                    batch.len()
                );
            }
            let rows = batch
                .iter()
                .cloned()
                .zip(vectors)
                .collect::<Vec<(String, Vec<f32>)>>();
            query_embeddings += indexes.store.upsert_query_embeddings(&model_id, &rows)?;
            info!(model_id = %model_id, query_embeddings, total = texts.len(), "query batch embedded");
        }
    }

    let counts = indexes.store.counts(&model_id)?;
    indexes.model.unload();
    if indexes.skipped_entries > 0 {
        warnings.push(format!(
            "{} empty corpus entries skipped",
            indexes.skipped_entries
        ));
    }

    let manifest = IndexRunManifest {
        manifest_version: 1,
        run_id,
        generated_at,
        store_path: embedding.store_path.display().to_string(),
        model_id: model_id.clone(),
        backend: embedding.backend.as_str().to_string(),
        embedding_dim: indexes.model.dimensions(),
        refresh_mode: args.refresh_mode.as_str().to_string(),
        corpus_files: indexes
            .files
            .iter()
            .map(|path| path.display().to_string())
            .collect(),
        chunk_count: indexes.chunk_count,
        sparse_vocabulary: indexes.vocabulary_size,
        reused_chunk_embeddings: indexes.dense_stats.reused,
        embedded_chunks: indexes.dense_stats.embedded,
        query_embeddings: counts.query_embeddings,
        duration_ms: started.elapsed().as_millis(),
        status: "completed".to_string(),
        warnings,
    };

    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        default_manifest_dir(&embedding.store_path)
            .join(format!("index_run_{}.json", utc_compact_string(Utc::now())))
    });
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        path = %manifest_path.display(),
        model_id = %model_id,
        chunks = indexes.chunk_count,
        reused = indexes.dense_stats.reused,
        embedded = indexes.dense_stats.embedded,
        new_query_vectors = query_embeddings,
        stored_query_vectors = counts.query_embeddings,
        "index refresh completed"
    );

    Ok(())
}

fn default_manifest_dir(store_path: &std::path::Path) -> PathBuf {
    store_path
        .parent()
        .map(|parent| parent.join("manifests"))
        .unwrap_or_else(|| PathBuf::from("manifests"))
}

/// Keys for precomputed query vectors: the question-and-choices text that
/// dense search falls back to, and the bare question.
pub(crate) fn query_texts(questions: &[QuestionRecord]) -> Vec<String> {
    let mut seen = HashSet::<String>::new();
    questions
        .iter()
        .flat_map(|question| [question.retrieval_query(), question.question.clone()])
        .filter(|text| !text.trim().is_empty())
        .filter(|text| seen.insert(text.clone()))
        .collect()
}
