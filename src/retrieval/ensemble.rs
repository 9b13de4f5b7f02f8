use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use anyhow::Result;
use tracing::debug;

use crate::model::{DocumentChunk, QuestionRecord};
use crate::retrieval::dense::DenseIndex;
use crate::retrieval::sparse::SparseIndex;

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalCandidate {
    pub content: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub sparse: f64,
    pub dense: f64,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            sparse: 0.3,
            dense: 0.7,
        }
    }
}

/// Local document search used by the retrieval stage. `question` is the
/// question the query was derived from.
pub trait LocalSearch: Send + Sync {
    fn search(&self, query: &str, question: &QuestionRecord) -> Result<Vec<RetrievalCandidate>>;
}

#[derive(Debug, Clone)]
struct FusedEntry {
    content: String,
    score: f64,
    sparse_rank: Option<usize>,
    dense_rank: Option<usize>,
}

/// Weighted reciprocal-rank fusion: each list contributes `weight / (k + rank + 1)`
/// with 0-based ranks; entries with identical text accumulate additively.
pub fn fuse_weighted_rrf(
    sparse: &[DocumentChunk],
    dense: &[DocumentChunk],
    weights: FusionWeights,
    rrf_k: u32,
    top_k: usize,
) -> Vec<RetrievalCandidate> {
    let rrf_base = f64::from(rrf_k);
    let mut merged = HashMap::<String, FusedEntry>::new();

    for (rank, content) in unique_contents(sparse).into_iter().enumerate() {
        let contribution = weights.sparse / (rrf_base + rank as f64 + 1.0);
        let entry = merged
            .entry(content.to_string())
            .or_insert_with(|| seed_entry(content));
        entry.score += contribution;
        entry.sparse_rank = Some(rank);
    }

    for (rank, content) in unique_contents(dense).into_iter().enumerate() {
        let contribution = weights.dense / (rrf_base + rank as f64 + 1.0);
        let entry = merged
            .entry(content.to_string())
            .or_insert_with(|| seed_entry(content));
        entry.score += contribution;
        entry.dense_rank = Some(rank);
    }

    let mut fused = merged.into_values().collect::<Vec<FusedEntry>>();
    fused.sort_by(compare_fused);
    fused.truncate(top_k);

    fused
        .into_iter()
        .map(|entry| RetrievalCandidate {
            content: entry.content,
            score: entry.score,
        })
        .collect()
}

fn unique_contents(chunks: &[DocumentChunk]) -> Vec<&str> {
    let mut seen = HashSet::<&str>::new();
    chunks
        .iter()
        .map(|chunk| chunk.text.as_str())
        .filter(|content| seen.insert(*content))
        .collect()
}

fn seed_entry(content: &str) -> FusedEntry {
    FusedEntry {
        content: content.to_string(),
        score: 0.0,
        sparse_rank: None,
        dense_rank: None,
    }
}

fn compare_fused(left: &FusedEntry, right: &FusedEntry) -> Ordering {
    right
        .score
        .total_cmp(&left.score)
        .then_with(|| rank_key(left.sparse_rank).cmp(&rank_key(right.sparse_rank)))
        .then_with(|| rank_key(left.dense_rank).cmp(&rank_key(right.dense_rank)))
        .then_with(|| left.content.cmp(&right.content))
}

fn rank_key(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}

#[derive(Debug, Clone, Copy)]
pub struct EnsembleSettings {
    pub weights: FusionWeights,
    pub rrf_k: u32,
    pub sparse_k: usize,
    pub dense_k: usize,
    pub fused_k: usize,
}

pub struct EnsembleRetriever {
    sparse: SparseIndex,
    dense: DenseIndex,
    settings: EnsembleSettings,
}

impl EnsembleRetriever {
    pub fn new(sparse: SparseIndex, dense: DenseIndex, settings: EnsembleSettings) -> Self {
        Self {
            sparse,
            dense,
            settings,
        }
    }
}

impl LocalSearch for EnsembleRetriever {
    fn search(&self, query: &str, question: &QuestionRecord) -> Result<Vec<RetrievalCandidate>> {
        let sparse = self.sparse.search(query, self.settings.sparse_k);
        let question_key = question.retrieval_query();
        let dense = self
            .dense
            .search(query, Some(&question_key), self.settings.dense_k)?;
        let fused = fuse_weighted_rrf(
            &sparse,
            &dense,
            self.settings.weights,
            self.settings.rrf_k,
            self.settings.fused_k,
        );
        debug!(
            sparse_hits = sparse.len(),
            dense_hits = dense.len(),
            fused = fused.len(),
            "ensemble search"
        );
        Ok(fused)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn chunks(texts: &[&str]) -> Vec<DocumentChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| DocumentChunk {
                text: text.to_string(),
                source: "test".to_string(),
                title: format!("t{index}"),
                chunk_index: 0,
                score: None,
            })
            .collect()
    }

    fn contribution(weight: f64, rank: usize) -> f64 {
        weight / (20.0 + rank as f64 + 1.0)
    }

    #[test]
    fn shared_items_accumulate_both_contributions() {
        let sparse = chunks(&["a", "b", "c"]);
        let dense = chunks(&["c", "d"]);
        let fused = fuse_weighted_rrf(&sparse, &dense, FusionWeights::default(), 20, 10);

        let by_content = fused
            .iter()
            .map(|candidate| (candidate.content.as_str(), candidate.score))
            .collect::<HashMap<_, _>>();
        let expected_c = contribution(0.3, 2) + contribution(0.7, 0);
        assert!((by_content["c"] - expected_c).abs() < 1e-12);
        assert!((by_content["d"] - contribution(0.7, 1)).abs() < 1e-12);
        assert!((by_content["a"] - contribution(0.3, 0)).abs() < 1e-12);
        assert_eq!(fused[0].content, "c");
    }

    #[test]
    fn output_is_sorted_and_truncated() {
        let sparse = chunks(&["a", "b", "c", "d"]);
        let dense = chunks(&["d", "c"]);
        let fused = fuse_weighted_rrf(&sparse, &dense, FusionWeights::default(), 20, 3);
        assert_eq!(fused.len(), 3);
        assert!(fused.windows(2).all(|pair| pair[0].score >= pair[1].score));
    }

    #[test]
    fn ties_break_by_sparse_then_dense_rank() {
        let weights = FusionWeights {
            sparse: 1.0,
            dense: 1.0,
        };
        let sparse = chunks(&["x", "y"]);
        let dense = chunks(&["q", "p"]);
        let fused = fuse_weighted_rrf(&sparse, &dense, weights, 20, 10);
        let order = fused
            .iter()
            .map(|candidate| candidate.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["x", "q", "y", "p"]);
    }

    #[test]
    fn duplicate_texts_within_a_list_count_once() {
        let sparse = chunks(&["same", "same", "other"]);
        let fused = fuse_weighted_rrf(&sparse, &[], FusionWeights::default(), 20, 10);
        assert_eq!(fused.len(), 2);
        assert!((fused[0].score - contribution(0.3, 0)).abs() < 1e-12);
        assert!((fused[1].score - contribution(0.3, 1)).abs() < 1e-12);
    }

    proptest! {
        #[test]
        fn fused_score_is_sum_of_source_contributions(
            sparse_ids in proptest::collection::hash_set(0u8..12, 0..8),
            dense_ids in proptest::collection::hash_set(0u8..12, 0..8),
            sparse_weight in 0.0f64..2.0,
            dense_weight in 0.0f64..2.0,
            rrf_k in 0u32..60,
        ) {
            let sparse_texts = sparse_ids.iter().map(|id| format!("doc-{id}")).collect::<Vec<_>>();
            let dense_texts = dense_ids.iter().map(|id| format!("doc-{id}")).collect::<Vec<_>>();
            let sparse = chunks(&sparse_texts.iter().map(String::as_str).collect::<Vec<_>>());
            let dense = chunks(&dense_texts.iter().map(String::as_str).collect::<Vec<_>>());
            let weights = FusionWeights { sparse: sparse_weight, dense: dense_weight };

            let fused = fuse_weighted_rrf(&sparse, &dense, weights, rrf_k, usize::MAX);
            let base = f64::from(rrf_k);
            for candidate in &fused {
                let mut expected = 0.0;
                if let Some(rank) = sparse_texts.iter().position(|text| *text == candidate.content) {
                    expected += sparse_weight / (base + rank as f64 + 1.0);
                }
                if let Some(rank) = dense_texts.iter().position(|text| *text == candidate.content) {
                    expected += dense_weight / (base + rank as f64 + 1.0);
                }
                prop_assert!((candidate.score - expected).abs() < 1e-12);
            }

            let union = sparse_texts.iter().chain(dense_texts.iter()).collect::<HashSet<_>>();
            prop_assert_eq!(fused.len(), union.len());
        }
    }
}
