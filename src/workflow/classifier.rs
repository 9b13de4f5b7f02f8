use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::llm::{ChatModel, GenerationParams};
use crate::model::QuestionRecord;
use crate::workflow::prompts::classifier_messages;
use crate::workflow::state::{ClassifierUpdate, RouteDecision};

pub const KNOWLEDGE_LABEL: &str = "KNOWLEDGE_REQUIRED";
pub const GENERAL_LABEL: &str = "GENERAL";

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutePolicy {
    Auto,
    Always,
    Never,
}

impl RoutePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Always => "always",
            Self::Never => "never",
        }
    }
}

/// Maps a classifier reply onto the retrieval flag.
///
/// `None` when neither label, or both, appear in the reply.
pub fn interpret_label(reply: &str) -> Option<bool> {
    let upper = reply.to_uppercase();
    let knowledge = upper.contains(KNOWLEDGE_LABEL);
    let general = upper.contains(GENERAL_LABEL);
    match (knowledge, general) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

pub fn classify(
    llm: &dyn ChatModel,
    params: &GenerationParams,
    policy: RoutePolicy,
    question: &QuestionRecord,
) -> Result<ClassifierUpdate> {
    match policy {
        RoutePolicy::Always => {
            return Ok(ClassifierUpdate {
                needs_knowledge: true,
                decision: RouteDecision::Override,
            });
        }
        RoutePolicy::Never => {
            return Ok(ClassifierUpdate {
                needs_knowledge: false,
                decision: RouteDecision::Override,
            });
        }
        RoutePolicy::Auto => {}
    }

    let reply = llm
        .complete(&classifier_messages(question), params)
        .with_context(|| format!("classifier call failed for question {}", question.id))?;

    match interpret_label(&reply) {
        Some(needs_knowledge) => {
            debug!(question_id = %question.id, needs_knowledge, "classified");
            Ok(ClassifierUpdate {
                needs_knowledge,
                decision: RouteDecision::Classifier,
            })
        }
        None => {
            warn!(
                question_id = %question.id,
                reply = %reply.trim(),
                "ambiguous classifier reply, skipping retrieval"
            );
            Ok(ClassifierUpdate {
                needs_knowledge: false,
                decision: RouteDecision::Ambiguous,
            })
        }
    }
}
