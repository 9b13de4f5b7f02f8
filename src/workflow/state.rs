use crate::model::QuestionRecord;
use crate::workflow::parser::ParsedAnswer;

pub const WORKFLOW_STATE_VERSION: u32 = 1;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Route {
    Retrieval,
    Direct,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Direct => "direct",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RouteDecision {
    Classifier,
    Ambiguous,
    Override,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierUpdate {
    pub needs_knowledge: bool,
    pub decision: RouteDecision,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalUpdate {
    pub queries: Vec<String>,
    pub used_fallback_query: bool,
    pub candidates: usize,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SolverUpdate {
    pub full_response: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryUpdate {
    pub answer: String,
    pub defaulted: bool,
}

/// Per-question state threaded through the graph.
///
/// The question is fixed at construction. Each stage returns its own update
/// type and only the matching `apply_*` method writes the fields it owns.
#[derive(Debug, Clone)]
pub struct WorkflowState {
    question: QuestionRecord,
    classification: Option<ClassifierUpdate>,
    retrieval: Option<RetrievalUpdate>,
    solver: Option<SolverUpdate>,
    parsed: Option<ParsedAnswer>,
    recovery: Option<RecoveryUpdate>,
}

impl WorkflowState {
    pub fn new(question: QuestionRecord) -> Self {
        Self {
            question,
            classification: None,
            retrieval: None,
            solver: None,
            parsed: None,
            recovery: None,
        }
    }

    pub fn version(&self) -> u32 {
        WORKFLOW_STATE_VERSION
    }

    pub fn question(&self) -> &QuestionRecord {
        &self.question
    }

    pub fn needs_knowledge(&self) -> Option<bool> {
        self.classification
            .as_ref()
            .map(|update| update.needs_knowledge)
    }

    pub fn route(&self) -> Option<Route> {
        self.needs_knowledge().map(|needs| {
            if needs {
                Route::Retrieval
            } else {
                Route::Direct
            }
        })
    }

    pub fn route_decision(&self) -> Option<RouteDecision> {
        self.classification.as_ref().map(|update| update.decision)
    }

    pub fn optimized_queries(&self) -> &[String] {
        self.retrieval
            .as_ref()
            .map(|update| update.queries.as_slice())
            .unwrap_or_default()
    }

    pub fn retrieved_context(&self) -> Option<&str> {
        self.retrieval.as_ref().map(|update| update.context.as_str())
    }

    pub fn retrieval(&self) -> Option<&RetrievalUpdate> {
        self.retrieval.as_ref()
    }

    pub fn full_response(&self) -> Option<&str> {
        self.solver
            .as_ref()
            .map(|update| update.full_response.as_str())
    }

    pub fn parsed(&self) -> Option<&ParsedAnswer> {
        self.parsed.as_ref()
    }

    pub fn recovery(&self) -> Option<&RecoveryUpdate> {
        self.recovery.as_ref()
    }

    pub fn final_answer(&self) -> Option<String> {
        if let Some(recovery) = &self.recovery {
            return Some(recovery.answer.clone());
        }
        self.parsed.as_ref().and_then(ParsedAnswer::answer_label)
    }

    pub fn apply_classifier(&mut self, update: ClassifierUpdate) {
        self.classification = Some(update);
    }

    pub fn apply_retrieval(&mut self, update: RetrievalUpdate) {
        self.retrieval = Some(update);
    }

    pub fn apply_solver(&mut self, update: SolverUpdate) {
        self.solver = Some(update);
    }

    pub fn apply_parse(&mut self, parsed: ParsedAnswer) {
        self.parsed = Some(parsed);
    }

    pub fn apply_recovery(&mut self, update: RecoveryUpdate) {
        self.recovery = Some(update);
    }
}
