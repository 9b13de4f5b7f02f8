use anyhow::{Result, anyhow, bail};
use tracing::info;

use crate::config::{GenerationConfig, RunConfig};
use crate::llm::ChatModel;
use crate::model::QuestionRecord;
use crate::workflow::classifier::classify;
use crate::workflow::parser::AnswerParser;
use crate::workflow::prompts::NO_CONTEXT;
use crate::workflow::recovery::{RecoverySettings, recover};
use crate::workflow::retrieve::ContextRetriever;
use crate::workflow::solver::{SolverInput, solve};
use crate::workflow::state::WorkflowState;

const MAX_STEPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Classify,
    Retrieve,
    SolveWithContext,
    SolveWithoutContext,
    Parse,
    Recover,
    End,
}

impl Node {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Retrieve => "retrieve",
            Self::SolveWithContext => "solve_with_context",
            Self::SolveWithoutContext => "solve_without_context",
            Self::Parse => "parse",
            Self::Recover => "recover",
            Self::End => "end",
        }
    }
}

/// Chooses the successor of `current` from the fields it has written.
///
/// Errors when the stage has not produced the output its edge depends on.
pub fn next_node(current: Node, state: &WorkflowState) -> Result<Node> {
    let next = match current {
        Node::Classify => match state.needs_knowledge() {
            Some(true) => Node::Retrieve,
            Some(false) => Node::SolveWithoutContext,
            None => bail!("classify finished without a routing decision"),
        },
        Node::Retrieve => {
            if state.retrieved_context().is_none() {
                bail!("retrieve finished without a context");
            }
            Node::SolveWithContext
        }
        Node::SolveWithContext | Node::SolveWithoutContext => {
            if state.full_response().is_none() {
                bail!("{} finished without a response", current.as_str());
            }
            Node::Parse
        }
        Node::Parse => match state.parsed() {
            Some(parsed) if parsed.answer().is_some() => Node::End,
            Some(_) => Node::Recover,
            None => bail!("parse finished without a result"),
        },
        Node::Recover => Node::End,
        Node::End => bail!("end has no successor"),
    };
    Ok(next)
}

#[derive(Debug, Clone)]
pub struct WorkflowOutcome {
    pub state: WorkflowState,
    pub path: Vec<Node>,
}

impl WorkflowOutcome {
    pub fn recovered(&self) -> bool {
        self.path.contains(&Node::Recover)
    }
}

/// Per-question graph runner. Services are borrowed for the whole batch.
pub struct Workflow<'a> {
    llm: &'a dyn ChatModel,
    retriever: Option<&'a dyn ContextRetriever>,
    parser: AnswerParser,
    generation: GenerationConfig,
    run: RunConfig,
}

impl<'a> Workflow<'a> {
    pub fn new(
        llm: &'a dyn ChatModel,
        retriever: Option<&'a dyn ContextRetriever>,
        generation: GenerationConfig,
        run: RunConfig,
    ) -> Result<Self> {
        Ok(Self {
            llm,
            retriever,
            parser: AnswerParser::new()?,
            generation,
            run,
        })
    }

    pub fn run(&self, question: QuestionRecord) -> Result<WorkflowOutcome> {
        let mut state = WorkflowState::new(question);
        let mut path = Vec::<Node>::new();
        let mut node = Node::Classify;

        while node != Node::End {
            if path.len() >= MAX_STEPS {
                bail!("workflow exceeded {MAX_STEPS} steps");
            }
            self.execute(node, &mut state)?;
            path.push(node);
            node = next_node(node, &state)?;
        }
        path.push(Node::End);

        Ok(WorkflowOutcome { state, path })
    }

    fn execute(&self, node: Node, state: &mut WorkflowState) -> Result<()> {
        let question_id = state.question().id.clone();

        match node {
            Node::Classify => {
                let update = classify(
                    self.llm,
                    &self.generation.classifier,
                    self.run.route,
                    state.question(),
                )?;
                info!(
                    question_id = %question_id,
                    node = node.as_str(),
                    needs_knowledge = update.needs_knowledge,
                    decision = ?update.decision,
                    "stage finished"
                );
                state.apply_classifier(update);
            }
            Node::Retrieve => {
                let retriever = self
                    .retriever
                    .ok_or_else(|| anyhow!("retrieval requested but no retriever is configured"))?;
                let update = retriever.retrieve(state.question())?;
                info!(
                    question_id = %question_id,
                    node = node.as_str(),
                    queries = update.queries.len(),
                    fallback_query = update.used_fallback_query,
                    "stage finished"
                );
                state.apply_retrieval(update);
            }
            Node::SolveWithContext | Node::SolveWithoutContext => {
                let input = if node == Node::SolveWithContext {
                    SolverInput::WithContext(state.retrieved_context().unwrap_or(NO_CONTEXT))
                } else {
                    SolverInput::General
                };
                let update = solve(self.llm, &self.generation.solver, state.question(), input)?;
                info!(question_id = %question_id, node = node.as_str(), "stage finished");
                state.apply_solver(update);
            }
            Node::Parse => {
                let parsed = self.parser.parse(state.full_response().unwrap_or_default());
                info!(
                    question_id = %question_id,
                    node = node.as_str(),
                    kind = parsed.kind(),
                    answer = %parsed.label(),
                    "stage finished"
                );
                state.apply_parse(parsed);
            }
            Node::Recover => {
                let settings = RecoverySettings {
                    params: &self.generation.recovery,
                    context_chars: self.run.recovery_context_chars,
                    default_answer: &self.run.default_answer,
                };
                let update = recover(
                    self.llm,
                    &settings,
                    &question_id,
                    state.full_response().unwrap_or_default(),
                );
                info!(
                    question_id = %question_id,
                    node = node.as_str(),
                    answer = %update.answer,
                    defaulted = update.defaulted,
                    "stage finished"
                );
                state.apply_recovery(update);
            }
            Node::End => {}
        }

        Ok(())
    }
}
