use serde::{Deserialize, Serialize};

use crate::metrics::MetricSummary;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub text: String,
    pub source: String,
    pub title: String,
    pub chunk_index: usize,
    pub score: Option<f32>,
}

impl DocumentChunk {
    pub fn with_score(&self, score: f32) -> Self {
        Self {
            score: Some(score),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRecord {
    pub id: String,
    pub paragraph: String,
    pub question: String,
    pub choices: Vec<String>,
    pub answer: Option<u8>,
}

impl QuestionRecord {
    pub fn numbered_choices(&self) -> String {
        self.choices
            .iter()
            .enumerate()
            .map(|(index, choice)| format!("{}. {choice}", index + 1))
            .collect::<Vec<String>>()
            .join("\n")
    }

    pub fn retrieval_query(&self) -> String {
        format!("{} {}", self.question, self.choices.join(" "))
    }
}

pub const ERROR_ANSWER: &str = "ERROR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    pub predicted_answer: String,
    pub is_correct: Option<bool>,
    pub full_response: String,
    pub latency: f64,
    pub ground_truth: Option<u8>,
    pub needs_knowledge: Option<bool>,
    pub route: String,
    pub recovered: bool,
    pub defaulted: bool,
    pub error: Option<String>,
}

impl ResultRecord {
    pub fn failed(question: &QuestionRecord, error: String, latency: f64) -> Self {
        Self {
            id: question.id.clone(),
            predicted_answer: ERROR_ANSWER.to_string(),
            is_correct: question.answer.map(|_| false),
            full_response: String::new(),
            latency,
            ground_truth: question.answer,
            needs_knowledge: None,
            route: String::new(),
            recovered: false,
            defaulted: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RouteCounts {
    pub with_retrieval: usize,
    pub without_retrieval: usize,
    pub recovered: usize,
    pub defaulted: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SolveRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub input_path: String,
    pub output_path: String,
    pub output_format: String,
    pub llm_model: String,
    pub embedding_model: Option<String>,
    pub route_policy: String,
    pub questions_loaded: usize,
    pub questions_skipped: usize,
    pub questions_processed: usize,
    pub checkpoints_written: usize,
    pub routes: RouteCounts,
    pub metrics: MetricSummary,
    pub duration_ms: u128,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub generated_at: String,
    pub store_path: String,
    pub model_id: String,
    pub backend: String,
    pub embedding_dim: usize,
    pub refresh_mode: String,
    pub corpus_files: Vec<String>,
    pub chunk_count: usize,
    pub sparse_vocabulary: usize,
    pub reused_chunk_embeddings: usize,
    pub embedded_chunks: usize,
    pub query_embeddings: usize,
    pub duration_ms: u128,
    pub status: String,
    pub warnings: Vec<String>,
}
