use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};

use super::graph::{Node, Workflow, next_node};
use super::retrieve::{ContextRetriever, HybridContextRetriever, RetrievalSettings};
use super::state::{RetrievalUpdate, WorkflowState};
use crate::config::{GenerationConfig, RunConfig};
use crate::error::PipelineError;
use crate::llm::{ChatMessage, ChatModel, GenerationParams};
use crate::model::QuestionRecord;
use crate::retrieval::chunker::TextSplitter;
use crate::retrieval::encyclopedia::Encyclopedia;
use crate::retrieval::ensemble::{LocalSearch, RetrievalCandidate};
use crate::retrieval::rerank::LocalOverlapReranker;
use crate::workflow::classifier::RoutePolicy;

struct ScriptedChat {
    replies: Mutex<VecDeque<&'static str>>,
    seen: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedChat {
    fn new(replies: &[&'static str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().copied().collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> usize {
        self.seen.lock().expect("lock").len()
    }

    fn user_prompt(&self, call: usize) -> String {
        self.seen.lock().expect("lock")[call][1].content.clone()
    }
}

impl ChatModel for ScriptedChat {
    fn complete(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
        self.seen.lock().expect("lock").push(messages.to_vec());
        match self.replies.lock().expect("lock").pop_front() {
            Some(reply) => Ok(reply.to_string()),
            None => bail!(PipelineError::transient("llm", "script exhausted")),
        }
    }
}

struct CountingRetriever {
    calls: AtomicUsize,
}

impl ContextRetriever for CountingRetriever {
    fn retrieve(&self, _question: &QuestionRecord) -> Result<RetrievalUpdate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(RetrievalUpdate {
            queries: vec!["훈민정음".to_string()],
            used_fallback_query: false,
            candidates: 1,
            context: "[1] (신뢰도: 0.90) 세종이 훈민정음을 창제하였다".to_string(),
        })
    }
}

fn counting_retriever() -> CountingRetriever {
    CountingRetriever {
        calls: AtomicUsize::new(0),
    }
}

fn question() -> QuestionRecord {
    QuestionRecord {
        id: "2024-history-7".to_string(),
        paragraph: "이 왕은 집현전을 설치하였다.".to_string(),
        question: "밑줄 친 왕의 업적으로 옳은 것은?".to_string(),
        choices: vec![
            "훈민정음을 창제하였다".to_string(),
            "경국대전을 완성하였다".to_string(),
            "대동법을 실시하였다".to_string(),
        ],
        answer: Some(1),
    }
}

fn run_config(route: RoutePolicy) -> RunConfig {
    RunConfig {
        route,
        ..RunConfig::default()
    }
}

#[test]
fn general_question_skips_retrieval() {
    let llm = ScriptedChat::new(&["GENERAL", "지문을 보면...\n{\"정답\": \"3\"}"]);
    let retriever = counting_retriever();
    let workflow = Workflow::new(
        &llm,
        Some(&retriever),
        GenerationConfig::default(),
        run_config(RoutePolicy::Auto),
    )
    .expect("workflow");

    let outcome = workflow.run(question()).expect("run");

    assert_eq!(retriever.calls.load(Ordering::SeqCst), 0);
    assert_eq!(
        outcome.path,
        vec![Node::Classify, Node::SolveWithoutContext, Node::Parse, Node::End]
    );
    assert_eq!(outcome.state.final_answer().as_deref(), Some("3"));
    assert!(!outcome.recovered());
    assert_eq!(outcome.state.question(), &question());
}

#[test]
fn knowledge_question_solves_with_retrieved_context() {
    let llm = ScriptedChat::new(&["KNOWLEDGE_REQUIRED", "<think>자료 [1] 참고</think>\n{\"정답\": \"1\"}"]);
    let retriever = counting_retriever();
    let workflow = Workflow::new(
        &llm,
        Some(&retriever),
        GenerationConfig::default(),
        run_config(RoutePolicy::Auto),
    )
    .expect("workflow");

    let outcome = workflow.run(question()).expect("run");

    assert_eq!(retriever.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        outcome.path,
        vec![Node::Classify, Node::Retrieve, Node::SolveWithContext, Node::Parse, Node::End]
    );
    assert!(llm.user_prompt(1).contains("세종이 훈민정음을 창제하였다"));
    assert_eq!(outcome.state.optimized_queries(), ["훈민정음".to_string()]);
    assert_eq!(outcome.state.final_answer().as_deref(), Some("1"));
}

#[test]
fn recovery_runs_once_then_defaults() {
    let llm = ScriptedChat::new(&["GENERAL", "잘 모르겠습니다.", "판단 불가"]);
    let workflow = Workflow::new(
        &llm,
        None,
        GenerationConfig::default(),
        run_config(RoutePolicy::Auto),
    )
    .expect("workflow");

    let outcome = workflow.run(question()).expect("run");

    assert_eq!(
        outcome.path,
        vec![
            Node::Classify,
            Node::SolveWithoutContext,
            Node::Parse,
            Node::Recover,
            Node::End
        ]
    );
    assert_eq!(llm.calls(), 3);
    let recovery = outcome.state.recovery().expect("recovery ran");
    assert!(recovery.defaulted);
    assert_eq!(outcome.state.final_answer().as_deref(), Some("1"));
}

#[test]
fn recovery_reads_digit_from_reply() {
    let llm = ScriptedChat::new(&["GENERAL", "둘 중 하나인데...", "2"]);
    let workflow = Workflow::new(
        &llm,
        None,
        GenerationConfig::default(),
        run_config(RoutePolicy::Auto),
    )
    .expect("workflow");

    let outcome = workflow.run(question()).expect("run");
    assert_eq!(outcome.state.final_answer().as_deref(), Some("2"));
    assert!(outcome.recovered());
    assert!(llm.user_prompt(2).contains("둘 중 하나인데"));
}

#[test]
fn route_overrides_bypass_classifier() {
    let llm = ScriptedChat::new(&["{\"정답\": \"2\"}"]);
    let workflow = Workflow::new(
        &llm,
        None,
        GenerationConfig::default(),
        run_config(RoutePolicy::Never),
    )
    .expect("workflow");
    let outcome = workflow.run(question()).expect("run");
    assert_eq!(llm.calls(), 1);
    assert_eq!(outcome.state.final_answer().as_deref(), Some("2"));

    let llm = ScriptedChat::new(&["{\"정답\": \"2\"}"]);
    let workflow = Workflow::new(
        &llm,
        None,
        GenerationConfig::default(),
        run_config(RoutePolicy::Always),
    )
    .expect("workflow");
    assert!(workflow.run(question()).is_err());
}

#[test]
fn solver_failure_surfaces_as_error() {
    let llm = ScriptedChat::new(&["GENERAL"]);
    let workflow = Workflow::new(
        &llm,
        None,
        GenerationConfig::default(),
        run_config(RoutePolicy::Auto),
    )
    .expect("workflow");
    assert!(workflow.run(question()).is_err());
}

#[test]
fn transitions_require_stage_output() {
    let state = WorkflowState::new(question());
    assert!(next_node(Node::Classify, &state).is_err());
    assert!(next_node(Node::Parse, &state).is_err());
    assert!(next_node(Node::End, &state).is_err());
    assert_eq!(next_node(Node::Recover, &state).expect("recover"), Node::End);
}

struct FixedLocal;

impl LocalSearch for FixedLocal {
    fn search(&self, query: &str, _question: &QuestionRecord) -> Result<Vec<RetrievalCandidate>> {
        Ok(vec![
            RetrievalCandidate {
                content: format!("{query} 관련 문서: 세종이 훈민정음을 창제하였다"),
                score: 0.03,
            },
            RetrievalCandidate {
                content: "광합성은 엽록체에서 일어난다".to_string(),
                score: 0.01,
            },
        ])
    }
}

struct DownWiki;

impl Encyclopedia for DownWiki {
    fn search_titles(&self, _keyword: &str, _limit: usize) -> Result<Vec<String>> {
        bail!(PipelineError::transient("encyclopedia", "HTTP 503"))
    }

    fn fetch_page(&self, _title: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

struct BrokenLocal;

impl LocalSearch for BrokenLocal {
    fn search(&self, _query: &str, _question: &QuestionRecord) -> Result<Vec<RetrievalCandidate>> {
        bail!("index not built")
    }
}

fn settings() -> RetrievalSettings {
    RetrievalSettings {
        max_queries: 3,
        query_fallback_chars: 20,
        candidate_max_chars: 1000,
        rerank_top_k: 3,
        max_pages_per_keyword: 3,
        max_chunks_per_query: 5,
    }
}

#[test]
fn hybrid_retrieval_tolerates_encyclopedia_outage() {
    let llm = ScriptedChat::new(&[
        "KNOWLEDGE_REQUIRED",
        "{\"keywords\": [\"훈민정음\", \"집현전\"]}",
        "{\"정답\": \"1\"}",
    ]);
    let local = FixedLocal;
    let wiki = DownWiki;
    let reranker = LocalOverlapReranker::default();
    let splitter = TextSplitter::new(500, 50).expect("splitter");
    let retriever = HybridContextRetriever::new(
        &llm,
        GenerationParams::default(),
        &local,
        &reranker,
        settings(),
    )
    .with_encyclopedia(&wiki, splitter);

    let workflow = Workflow::new(
        &llm,
        Some(&retriever),
        GenerationConfig::default(),
        run_config(RoutePolicy::Auto),
    )
    .expect("workflow");
    let outcome = workflow.run(question()).expect("run");

    let retrieval = outcome.state.retrieval().expect("retrieval ran");
    assert_eq!(retrieval.queries, vec!["훈민정음", "집현전"]);
    assert!(!retrieval.used_fallback_query);
    assert_eq!(retrieval.candidates, 3);
    assert!(retrieval.context.starts_with("=== [엄선된 지식 컨텍스트] ===\n[1] (신뢰도: "));
    assert_eq!(outcome.state.final_answer().as_deref(), Some("1"));
}

#[test]
fn malformed_keywords_fall_back_to_question_text() {
    let llm = ScriptedChat::new(&["검색어는 세종입니다"]);
    let local = FixedLocal;
    let reranker = LocalOverlapReranker::default();
    let retriever = HybridContextRetriever::new(
        &llm,
        GenerationParams::default(),
        &local,
        &reranker,
        settings(),
    );

    let update = retriever.retrieve(&question()).expect("retrieve");
    assert!(update.used_fallback_query);
    assert_eq!(update.queries, vec!["밑줄 친 왕의 업적으로 옳은 것은?"]);
}

#[test]
fn local_search_failure_propagates() {
    let llm = ScriptedChat::new(&["{\"keywords\": [\"세종\"]}"]);
    let local = BrokenLocal;
    let reranker = LocalOverlapReranker::default();
    let retriever = HybridContextRetriever::new(
        &llm,
        GenerationParams::default(),
        &local,
        &reranker,
        settings(),
    );
    assert!(retriever.retrieve(&question()).is_err());
}
