use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RerankerBackend, RerankerConfig};
use crate::retrieval::ensemble::RetrievalCandidate;
use crate::semantic::{cosine_similarity, embed_text_local};

/// Cross-encoder style relevance scoring of `(query, document)` pairs.
pub trait Reranker: Send + Sync {
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f64>>;
}

pub fn build_reranker(config: &RerankerConfig) -> Result<Box<dyn Reranker>> {
    match config.backend {
        RerankerBackend::LocalOverlap => Ok(Box::new(LocalOverlapReranker::default())),
        RerankerBackend::Http => Ok(Box::new(HttpReranker::new(config)?)),
    }
}

/// Scores every document in one call and keeps the best `top_k`.
pub fn rerank(
    reranker: &dyn Reranker,
    query: &str,
    documents: Vec<String>,
    top_k: usize,
) -> Result<Vec<RetrievalCandidate>> {
    if documents.is_empty() || top_k == 0 {
        return Ok(Vec::new());
    }

    let scores = reranker.score(query, &documents)?;
    if scores.len() != documents.len() {
        bail!(
            "reranker returned {} scores for {} documents",
            scores.len(),
            documents.len()
        );
    }

    let mut scored = documents
        .into_iter()
        .zip(scores)
        .map(|(content, score)| RetrievalCandidate { content, score })
        .collect::<Vec<RetrievalCandidate>>();
    scored.sort_by(|left, right| right.score.total_cmp(&left.score));
    scored.truncate(top_k);

    debug!(kept = scored.len(), "candidates reranked");
    Ok(scored)
}

pub struct LocalOverlapReranker {
    dimensions: usize,
}

impl Default for LocalOverlapReranker {
    fn default() -> Self {
        Self { dimensions: 512 }
    }
}

impl Reranker for LocalOverlapReranker {
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f64>> {
        let query_vector = embed_text_local(query, self.dimensions);
        Ok(documents
            .iter()
            .map(|document| {
                cosine_similarity(&query_vector, &embed_text_local(document, self.dimensions))
            })
            .collect())
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f64,
}

/// Client for a `/v1/rerank` endpoint (llama.cpp, TEI and Jina style).
pub struct HttpReranker {
    client: reqwest::blocking::Client,
    endpoint: String,
    model: String,
}

impl HttpReranker {
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .context("failed to create HTTP client for reranking")?;

        Ok(Self {
            client,
            endpoint: rerank_endpoint(&config.base_url),
            model: config.model.clone(),
        })
    }
}

impl Reranker for HttpReranker {
    fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f64>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&RerankRequest {
                model: &self.model,
                query,
                documents,
            })
            .send()
            .with_context(|| format!("rerank request to {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            bail!("rerank endpoint returned HTTP {status}: {detail}");
        }

        let body = response.text().context("failed to read rerank response body")?;
        parse_rerank_body(&body, documents.len())
    }
}

pub(crate) fn rerank_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/rerank") {
        base.to_string()
    } else if base.ends_with("/v1") {
        format!("{base}/rerank")
    } else {
        format!("{base}/v1/rerank")
    }
}

pub(crate) fn parse_rerank_body(body: &str, expected: usize) -> Result<Vec<f64>> {
    let parsed: RerankResponse =
        serde_json::from_str(body).context("failed to decode rerank JSON")?;

    let mut scores = vec![None; expected];
    for result in parsed.results {
        let Some(slot) = scores.get_mut(result.index) else {
            bail!("rerank result index {} out of range", result.index);
        };
        *slot = Some(result.relevance_score);
    }

    scores
        .into_iter()
        .enumerate()
        .map(|(index, score)| score.with_context(|| format!("rerank response missing index {index}")))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedScores {
        scores: Vec<f64>,
        calls: AtomicUsize,
    }

    impl Reranker for FixedScores {
        fn score(&self, _query: &str, _documents: &[String]) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.scores.clone())
        }
    }

    fn docs(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    #[test]
    fn keeps_top_k_by_score_in_one_call() {
        let reranker = FixedScores {
            scores: vec![0.1, 0.9, 0.5, 0.9],
            calls: AtomicUsize::new(0),
        };
        let kept = rerank(&reranker, "q", docs(&["a", "b", "c", "d"]), 3).expect("rerank");
        let order = kept
            .iter()
            .map(|candidate| candidate.content.as_str())
            .collect::<Vec<_>>();
        assert_eq!(order, vec!["b", "d", "c"]);
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_input_skips_the_model() {
        let reranker = FixedScores {
            scores: vec![],
            calls: AtomicUsize::new(0),
        };
        assert!(rerank(&reranker, "q", Vec::new(), 3).expect("rerank").is_empty());
        assert_eq!(reranker.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn score_count_mismatch_is_an_error() {
        let reranker = FixedScores {
            scores: vec![0.3],
            calls: AtomicUsize::new(0),
        };
        assert!(rerank(&reranker, "q", docs(&["a", "b"]), 3).is_err());
    }

    #[test]
    fn local_reranker_prefers_overlapping_text() {
        let reranker = LocalOverlapReranker::default();
        let kept = rerank(
            &reranker,
            "훈민정음 창제 세종",
            docs(&["광합성은 엽록체에서 일어난다", "세종 훈민정음 창제 1443년"]),
            1,
        )
        .expect("rerank");
        assert_eq!(kept[0].content, "세종 훈민정음 창제 1443년");
    }

    #[test]
    fn rerank_body_maps_scores_back_to_input_order() {
        let body = r#"{"results": [{"index": 1, "relevance_score": 0.8}, {"index": 0, "relevance_score": 0.2}]}"#;
        assert_eq!(parse_rerank_body(body, 2).expect("parse"), vec![0.2, 0.8]);
        assert!(parse_rerank_body(body, 3).is_err());
        assert!(parse_rerank_body(body, 1).is_err());
    }

    #[test]
    fn rerank_endpoint_normalizes_base_url() {
        assert_eq!(rerank_endpoint("http://localhost:8083"), "http://localhost:8083/v1/rerank");
        assert_eq!(rerank_endpoint("http://localhost:8083/v1/"), "http://localhost:8083/v1/rerank");
    }
}
