use anyhow::{Context, Result};
use tracing::debug;

use crate::llm::{ChatModel, GenerationParams};
use crate::model::QuestionRecord;
use crate::workflow::prompts::{solver_general_messages, solver_with_context_messages};
use crate::workflow::state::SolverUpdate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverInput<'a> {
    WithContext(&'a str),
    General,
}

impl SolverInput<'_> {
    pub fn variant(&self) -> &'static str {
        match self {
            Self::WithContext(_) => "with-context",
            Self::General => "general",
        }
    }
}

pub fn solve(
    llm: &dyn ChatModel,
    params: &GenerationParams,
    question: &QuestionRecord,
    input: SolverInput<'_>,
) -> Result<SolverUpdate> {
    let messages = match input {
        SolverInput::WithContext(context) => solver_with_context_messages(question, context),
        SolverInput::General => solver_general_messages(question),
    };

    let full_response = llm
        .complete(&messages, params)
        .with_context(|| format!("solver call failed for question {}", question.id))?;
    debug!(
        question_id = %question.id,
        variant = input.variant(),
        response_chars = full_response.chars().count(),
        "solver responded"
    );

    Ok(SolverUpdate { full_response })
}
