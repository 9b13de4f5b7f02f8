use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use tracing::info;

use crate::model::DocumentChunk;
use crate::retrieval::tokenizer::{TokenizeMode, Tokenizer};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self { k1: 1.5, b: 0.75 }
    }
}

/// BM25 (Lucene scoring variant) over pre-tokenized chunks.
pub struct SparseIndex {
    chunks: Vec<DocumentChunk>,
    postings: HashMap<String, Vec<(usize, u32)>>,
    doc_lengths: Vec<u32>,
    avg_doc_length: f64,
    params: Bm25Params,
    tokenizer: Arc<dyn Tokenizer>,
}

impl SparseIndex {
    pub fn build(
        chunks: Vec<DocumentChunk>,
        tokenizer: Arc<dyn Tokenizer>,
        params: Bm25Params,
    ) -> Result<Self> {
        if chunks.is_empty() {
            bail!("cannot build a sparse index over zero chunks");
        }

        let tokenized = chunks
            .iter()
            .map(|chunk| tokenizer.tokenize(&chunk.text, TokenizeMode::Corpus))
            .collect::<Vec<Vec<String>>>();

        let mut postings = HashMap::<String, Vec<(usize, u32)>>::new();
        let mut doc_lengths = Vec::<u32>::with_capacity(tokenized.len());
        for (doc_index, tokens) in tokenized.iter().enumerate() {
            doc_lengths.push(tokens.len() as u32);

            let mut term_counts = HashMap::<&str, u32>::new();
            for token in tokens {
                *term_counts.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, count) in term_counts {
                postings
                    .entry(term.to_string())
                    .or_default()
                    .push((doc_index, count));
            }
        }
        // Token lists duplicate every posting; release them before serving queries.
        drop(tokenized);

        for list in postings.values_mut() {
            list.sort_unstable_by_key(|(doc_index, _)| *doc_index);
        }

        let total_length = doc_lengths.iter().map(|value| f64::from(*value)).sum::<f64>();
        let avg_doc_length = (total_length / doc_lengths.len() as f64).max(1.0);

        info!(
            chunks = chunks.len(),
            vocabulary = postings.len(),
            avg_doc_length,
            "sparse index built"
        );

        Ok(Self {
            chunks,
            postings,
            doc_lengths,
            avg_doc_length,
            params,
            tokenizer,
        })
    }

    pub fn vocabulary_size(&self) -> usize {
        self.postings.len()
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<DocumentChunk> {
        if top_k == 0 {
            return Vec::new();
        }

        let terms = self.tokenizer.tokenize(query, TokenizeMode::Query);
        let mut scores = vec![0_f64; self.chunks.len()];
        let doc_count = self.chunks.len() as f64;

        for term in &terms {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let doc_freq = list.len() as f64;
            let idf = (1.0 + (doc_count - doc_freq + 0.5) / (doc_freq + 0.5)).ln();

            for (doc_index, term_freq) in list {
                let tf = f64::from(*term_freq);
                let length_ratio = f64::from(self.doc_lengths[*doc_index]) / self.avg_doc_length;
                let norm = self.params.k1 * (1.0 - self.params.b + self.params.b * length_ratio);
                scores[*doc_index] += idf * tf / (tf + norm);
            }
        }

        let mut ranked = scores
            .into_iter()
            .enumerate()
            .filter(|(_, score)| *score > 0.0)
            .collect::<Vec<(usize, f64)>>();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1).then(left.0.cmp(&right.0)));
        ranked.truncate(top_k);

        ranked
            .into_iter()
            .map(|(doc_index, score)| self.chunks[doc_index].with_score(score as f32))
            .collect()
    }
}
