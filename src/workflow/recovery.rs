use tracing::{info, warn};

use crate::llm::{ChatModel, GenerationParams};
use crate::util::tail_chars;
use crate::workflow::prompts::recovery_messages;
use crate::workflow::state::RecoveryUpdate;

pub struct RecoverySettings<'a> {
    pub params: &'a GenerationParams,
    pub context_chars: usize,
    pub default_answer: &'a str,
}

/// Asks the model to commit to one option given its earlier reasoning.
///
/// Never fails: a model error or a reply without a choice digit yields the
/// configured default answer.
pub fn recover(
    llm: &dyn ChatModel,
    settings: &RecoverySettings<'_>,
    question_id: &str,
    full_response: &str,
) -> RecoveryUpdate {
    let reasoning = tail_chars(full_response, settings.context_chars);
    let reply = match llm.complete(&recovery_messages(reasoning), settings.params) {
        Ok(reply) => reply,
        Err(err) => {
            warn!(question_id = %question_id, error = %err, "recovery call failed, using default answer");
            return defaulted(settings);
        }
    };

    match first_choice_digit(&reply) {
        Some(digit) => {
            info!(question_id = %question_id, answer = %digit, "answer recovered");
            RecoveryUpdate {
                answer: digit.to_string(),
                defaulted: false,
            }
        }
        None => {
            warn!(
                question_id = %question_id,
                reply = %reply.trim(),
                default_answer = %settings.default_answer,
                "recovery reply had no choice digit, using default answer"
            );
            defaulted(settings)
        }
    }
}

fn defaulted(settings: &RecoverySettings<'_>) -> RecoveryUpdate {
    RecoveryUpdate {
        answer: settings.default_answer.to_string(),
        defaulted: true,
    }
}

fn first_choice_digit(reply: &str) -> Option<char> {
    reply.chars().find(|ch| matches!(ch, '1'..='5'))
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};

    use super::*;
    use crate::error::PipelineError;
    use crate::llm::ChatMessage;

    struct Reply(Option<&'static str>);

    impl ChatModel for Reply {
        fn complete(&self, _messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
            match self.0 {
                Some(reply) => Ok(reply.to_string()),
                None => bail!(PipelineError::transient("llm", "connection reset")),
            }
        }
    }

    fn settings(params: &GenerationParams) -> RecoverySettings<'_> {
        RecoverySettings {
            params,
            context_chars: 100,
            default_answer: "1",
        }
    }

    #[test]
    fn takes_first_choice_digit() {
        let params = GenerationParams::default();
        let update = recover(&Reply(Some("정답은 4번, 아니면 2")), &settings(&params), "q", "...");
        assert_eq!(update.answer, "4");
        assert!(!update.defaulted);
    }

    #[test]
    fn falls_back_to_default_answer() {
        let params = GenerationParams::default();
        let no_digit = recover(&Reply(Some("모르겠다 0")), &settings(&params), "q", "...");
        assert_eq!(no_digit.answer, "1");
        assert!(no_digit.defaulted);

        let failed = recover(&Reply(None), &settings(&params), "q", "...");
        assert_eq!(failed.answer, "1");
        assert!(failed.defaulted);
    }
}
