use std::collections::HashSet;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{EncyclopediaConfig, RetrievalConfig};
use crate::error::PipelineError;
use crate::llm::{ChatModel, GenerationParams};
use crate::model::QuestionRecord;
use crate::retrieval::chunker::TextSplitter;
use crate::retrieval::encyclopedia::{Encyclopedia, page_chunks, search_and_fetch};
use crate::retrieval::ensemble::{LocalSearch, RetrievalCandidate};
use crate::retrieval::rerank::{Reranker, rerank};
use crate::util::truncate_chars;
use crate::workflow::prompts::{CONTEXT_HEADER, NO_CONTEXT, keyword_messages};
use crate::workflow::state::RetrievalUpdate;

/// Produces the supporting context for a knowledge-heavy question.
pub trait ContextRetriever: Send + Sync {
    fn retrieve(&self, question: &QuestionRecord) -> Result<RetrievalUpdate>;
}

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub max_queries: usize,
    pub query_fallback_chars: usize,
    pub candidate_max_chars: usize,
    pub rerank_top_k: usize,
    pub max_pages_per_keyword: usize,
    pub max_chunks_per_query: usize,
}

impl RetrievalSettings {
    pub fn from_config(retrieval: &RetrievalConfig, encyclopedia: &EncyclopediaConfig) -> Self {
        Self {
            max_queries: retrieval.max_queries.max(1),
            query_fallback_chars: retrieval.query_fallback_chars,
            candidate_max_chars: retrieval.candidate_max_chars,
            rerank_top_k: retrieval.rerank_top_k,
            max_pages_per_keyword: encyclopedia.max_pages_per_keyword,
            max_chunks_per_query: encyclopedia.max_chunks_per_query,
        }
    }
}

/// Keyword extraction, local ensemble plus encyclopedia search, rerank.
pub struct HybridContextRetriever<'a> {
    llm: &'a dyn ChatModel,
    keyword_params: GenerationParams,
    local: &'a dyn LocalSearch,
    encyclopedia: Option<(&'a dyn Encyclopedia, TextSplitter)>,
    reranker: &'a dyn Reranker,
    settings: RetrievalSettings,
}

impl<'a> HybridContextRetriever<'a> {
    pub fn new(
        llm: &'a dyn ChatModel,
        keyword_params: GenerationParams,
        local: &'a dyn LocalSearch,
        reranker: &'a dyn Reranker,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            llm,
            keyword_params,
            local,
            encyclopedia: None,
            reranker,
            settings,
        }
    }

    pub fn with_encyclopedia(mut self, source: &'a dyn Encyclopedia, splitter: TextSplitter) -> Self {
        self.encyclopedia = Some((source, splitter));
        self
    }

    fn extract_queries(&self, question: &QuestionRecord) -> (Vec<String>, bool) {
        let parsed = match self
            .llm
            .complete(&keyword_messages(question), &self.keyword_params)
        {
            Ok(reply) => {
                let parsed = parse_keyword_reply(&reply, self.settings.max_queries);
                if parsed.is_none() {
                    let err = PipelineError::malformed("keyword reply has no usable keywords");
                    warn!(question_id = %question.id, error = %err, "keyword extraction unusable");
                }
                parsed
            }
            Err(err) => {
                warn!(question_id = %question.id, error = %err, "keyword extraction call failed");
                None
            }
        };

        match parsed {
            Some(queries) => (queries, false),
            None => {
                let fallback =
                    truncate_chars(&question.question, self.settings.query_fallback_chars)
                        .trim()
                        .to_string();
                warn!(question_id = %question.id, query = %fallback, "using question text as search query");
                (vec![fallback], true)
            }
        }
    }

    fn gather_candidates(&self, question: &QuestionRecord, queries: &[String]) -> Result<Vec<String>> {
        let question_id = question.id.as_str();
        let mut candidates = Vec::<String>::new();

        for query in queries {
            let local = self
                .local
                .search(query, question)
                .with_context(|| format!("local search failed for query '{query}'"))?;
            debug!(question_id = %question_id, query = %query, hits = local.len(), "local search");
            candidates.extend(local.into_iter().map(|candidate| candidate.content));

            if let Some((source, splitter)) = &self.encyclopedia {
                let pages = search_and_fetch(
                    *source,
                    std::slice::from_ref(query),
                    self.settings.max_pages_per_keyword,
                );
                let chunks = page_chunks(&pages, splitter, self.settings.max_chunks_per_query);
                debug!(
                    question_id = %question_id,
                    query = %query,
                    pages = pages.len(),
                    chunks = chunks.len(),
                    "encyclopedia search"
                );
                candidates.extend(chunks);
            }
        }

        Ok(candidates)
    }
}

impl ContextRetriever for HybridContextRetriever<'_> {
    fn retrieve(&self, question: &QuestionRecord) -> Result<RetrievalUpdate> {
        let (queries, used_fallback_query) = self.extract_queries(question);
        let gathered = self.gather_candidates(question, &queries)?;
        let candidates = dedupe_and_truncate(gathered, self.settings.candidate_max_chars);
        let candidate_count = candidates.len();

        let reranked = rerank(
            self.reranker,
            &question.retrieval_query(),
            candidates,
            self.settings.rerank_top_k,
        )
        .with_context(|| format!("rerank failed for question {}", question.id))?;

        info!(
            question_id = %question.id,
            queries = %queries.join(", "),
            candidates = candidate_count,
            kept = reranked.len(),
            "context retrieved"
        );

        Ok(RetrievalUpdate {
            queries,
            used_fallback_query,
            candidates: candidate_count,
            context: assemble_context(&reranked),
        })
    }
}

/// Reads `{"keywords": [...]}` (or the first value of any object) from a
/// keyword-extraction reply. Returns `None` when nothing usable remains.
pub fn parse_keyword_reply(reply: &str, max_queries: usize) -> Option<Vec<String>> {
    let value: Value = serde_json::from_str(strip_code_fence(reply)).ok()?;

    let raw = match value {
        Value::Object(mut map) => match map.remove("keywords") {
            Some(keywords) => keywords,
            None => map.into_iter().next().map(|(_, first)| first)?,
        },
        other => other,
    };

    let items = match raw {
        Value::Array(items) => items,
        single => vec![single],
    };

    let mut seen = HashSet::<String>::new();
    let queries = items
        .into_iter()
        .filter_map(|item| match item {
            Value::String(text) => Some(text),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .map(|text| text.trim().to_string())
        .filter(|text| text.chars().count() > 1)
        .filter(|text| seen.insert(text.clone()))
        .take(max_queries)
        .collect::<Vec<String>>();

    if queries.is_empty() { None } else { Some(queries) }
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

/// Drops exact duplicates, truncates, then drops duplicates the cut produced.
pub fn dedupe_and_truncate(candidates: Vec<String>, max_chars: usize) -> Vec<String> {
    let mut seen_full = HashSet::<String>::new();
    let mut seen_cut = HashSet::<String>::new();
    let mut kept = Vec::<String>::new();

    for candidate in candidates {
        if candidate.trim().is_empty() || !seen_full.insert(candidate.clone()) {
            continue;
        }
        let cut = truncate_chars(&candidate, max_chars).to_string();
        if seen_cut.insert(cut.clone()) {
            kept.push(cut);
        }
    }

    kept
}

pub fn assemble_context(candidates: &[RetrievalCandidate]) -> String {
    if candidates.is_empty() {
        return NO_CONTEXT.to_string();
    }

    let body = candidates
        .iter()
        .enumerate()
        .map(|(index, candidate)| {
            format!(
                "[{}] (신뢰도: {:.2}) {}",
                index + 1,
                candidate.score,
                candidate.content
            )
        })
        .collect::<Vec<String>>()
        .join("\n\n");
    format!("{CONTEXT_HEADER}{body}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_reply_variants() {
        assert_eq!(
            parse_keyword_reply(r#"{"keywords": ["훈민정음", " 세종 ", "가", "집현전", "한글"]}"#, 3),
            Some(vec!["훈민정음".to_string(), "세종".to_string(), "집현전".to_string()])
        );
        assert_eq!(
            parse_keyword_reply("```json\n{\"terms\": \"갑오개혁\"}\n```", 3),
            Some(vec!["갑오개혁".to_string()])
        );
        assert_eq!(parse_keyword_reply("검색어: 세종", 3), None);
        assert_eq!(parse_keyword_reply(r#"{"keywords": []}"#, 3), None);
    }

    #[test]
    fn shared_candidates_appear_once() {
        let first = vec!["세종 실록".to_string(), "고려사".to_string()];
        let second = vec!["고려사".to_string(), "동국통감".to_string()];
        let merged = dedupe_and_truncate(first.into_iter().chain(second).collect(), 100);
        assert_eq!(merged, vec!["세종 실록", "고려사", "동국통감"]);
    }

    #[test]
    fn truncation_collisions_are_removed() {
        let merged = dedupe_and_truncate(
            vec!["가나다라마".to_string(), "가나다바사".to_string(), "  ".to_string()],
            3,
        );
        assert_eq!(merged, vec!["가나다"]);
    }

    #[test]
    fn context_lists_candidates_with_scores() {
        let context = assemble_context(&[
            RetrievalCandidate {
                content: "세종은 훈민정음을 창제했다".to_string(),
                score: 0.9312,
            },
            RetrievalCandidate {
                content: "집현전".to_string(),
                score: 0.5,
            },
        ]);
        assert_eq!(
            context,
            "=== [엄선된 지식 컨텍스트] ===\n[1] (신뢰도: 0.93) 세종은 훈민정음을 창제했다\n\n[2] (신뢰도: 0.50) 집현전"
        );
        assert_eq!(assemble_context(&[]), NO_CONTEXT);
    }
}
