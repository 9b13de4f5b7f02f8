use anyhow::{Context, Result};
use regex::Regex;

pub const NO_ANSWER: &str = "N/A";
pub const REASONING_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedAnswer {
    Structured(u8),
    FallbackDigit(u8),
    NoAnswer,
}

impl ParsedAnswer {
    pub fn answer(&self) -> Option<u8> {
        match self {
            Self::Structured(digit) | Self::FallbackDigit(digit) => Some(*digit),
            Self::NoAnswer => None,
        }
    }

    pub fn answer_label(&self) -> Option<String> {
        self.answer().map(|digit| digit.to_string())
    }

    pub fn label(&self) -> String {
        self.answer_label()
            .unwrap_or_else(|| NO_ANSWER.to_string())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structured(_) => "structured",
            Self::FallbackDigit(_) => "fallback-digit",
            Self::NoAnswer => "no-answer",
        }
    }
}

/// Extracts the chosen option from free-form solver output.
///
/// Only text after the last reasoning-close marker is inspected. Within it,
/// the last `{"정답": "d"}` fragment wins, then the last standalone digit 1-5.
pub struct AnswerParser {
    structured: Regex,
    number: Regex,
}

impl AnswerParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            structured: Regex::new(r#"\{\s*["']정답["']\s*:\s*["']?([1-5])["']?\s*\}"#)
                .context("failed to compile structured answer regex")?,
            number: Regex::new(r"\d+").context("failed to compile digit regex")?,
        })
    }

    pub fn parse(&self, response: &str) -> ParsedAnswer {
        let tail = match response.rfind(REASONING_CLOSE) {
            Some(position) => &response[position + REASONING_CLOSE.len()..],
            None => response,
        };

        let structured = self
            .structured
            .captures_iter(tail)
            .filter_map(|captures| captures.get(1))
            .last()
            .and_then(|digit| digit.as_str().parse::<u8>().ok());
        if let Some(digit) = structured {
            return ParsedAnswer::Structured(digit);
        }

        let fallback = self
            .number
            .find_iter(tail)
            .filter_map(|token| choice_digit(token.as_str()))
            .last();
        match fallback {
            Some(digit) => ParsedAnswer::FallbackDigit(digit),
            None => ParsedAnswer::NoAnswer,
        }
    }
}

fn choice_digit(token: &str) -> Option<u8> {
    match token {
        "1" => Some(1),
        "2" => Some(2),
        "3" => Some(3),
        "4" => Some(4),
        "5" => Some(5),
        _ => None,
    }
}
