mod literal;

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::model::QuestionRecord;

pub use literal::parse_literal;

#[derive(Debug, Clone, PartialEq)]
pub struct SkippedRow {
    pub row: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoadedQuestions {
    pub questions: Vec<QuestionRecord>,
    pub skipped: Vec<SkippedRow>,
}

pub fn load_questions(path: &Path) -> Result<LoadedQuestions> {
    if !path.is_file() {
        return Err(PipelineError::fatal_init(format!(
            "question file not found: {}",
            path.display()
        ))
        .into());
    }

    let extension = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();

    let rows = match extension.as_str() {
        "csv" => read_csv_rows(path)?,
        "json" => read_json_rows(path)?,
        "jsonl" => read_jsonl_rows(path)?,
        other => bail!(
            "unsupported question file extension '{other}': {}",
            path.display()
        ),
    };

    let mut loaded = LoadedQuestions::default();
    for (row, raw) in rows.into_iter().enumerate() {
        match raw.and_then(|value| question_from_row(&value, row)) {
            Ok(question) => loaded.questions.push(question),
            Err(err) => {
                warn!(row, error = %err, "skipping malformed question row");
                loaded.skipped.push(SkippedRow {
                    row,
                    reason: format!("{err:#}"),
                });
            }
        }
    }

    info!(
        path = %path.display(),
        loaded = loaded.questions.len(),
        skipped = loaded.skipped.len(),
        "question set loaded"
    );
    Ok(loaded)
}

fn read_csv_rows(path: &Path) -> Result<Vec<Result<Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open question csv: {}", path.display()))?;
    let headers = csv_headers(
        reader
            .headers()
            .with_context(|| format!("failed to read csv header: {}", path.display()))?,
    );

    let mut rows = Vec::new();
    for record in reader.records() {
        let row = record
            .context("failed to read csv record")
            .map(|record| csv_row_object(&headers, &record));
        rows.push(row);
    }
    Ok(rows)
}

/// Header names with a leading byte-order mark and padding removed.
pub(crate) fn csv_headers(record: &csv::StringRecord) -> Vec<String> {
    record
        .iter()
        .map(|value| value.trim_start_matches('\u{feff}').trim().to_string())
        .collect()
}

pub(crate) fn csv_row_object(headers: &[String], record: &csv::StringRecord) -> Value {
    let mut object = serde_json::Map::new();
    for (header, field) in headers.iter().zip(record.iter()) {
        object.insert(header.clone(), Value::String(field.to_string()));
    }
    Value::Object(object)
}

fn read_json_rows(path: &Path) -> Result<Vec<Result<Value>>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read question json: {}", path.display()))?;
    let value: Value = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse question json: {}", path.display()))?;

    match value {
        Value::Array(items) => Ok(items.into_iter().map(Ok).collect()),
        _ => bail!("question json must be an array: {}", path.display()),
    }
}

fn read_jsonl_rows(path: &Path) -> Result<Vec<Result<Value>>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read question jsonl: {}", path.display()))?;

    Ok(raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<Value>(line).context("invalid jsonl line"))
        .collect())
}

pub(crate) fn question_from_row(row: &Value, index: usize) -> Result<QuestionRecord> {
    let id = match row.get("id") {
        Some(Value::String(value)) if !value.trim().is_empty() => value.trim().to_string(),
        Some(Value::Number(value)) => value.to_string(),
        _ => index.to_string(),
    };

    let paragraph = row
        .get("paragraph")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let problems = match row.get("problems") {
        Some(Value::String(raw)) => parse_literal(raw).context("failed to parse problems field")?,
        Some(value @ Value::Object(_)) | Some(value @ Value::Array(_)) => value.clone(),
        _ => bail!("row is missing the problems field"),
    };
    let problems = match problems {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };

    let mut question = problems
        .get("question")
        .and_then(Value::as_str)
        .context("problems.question is missing")?
        .to_string();

    let choices = match problems.get("choices") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(value) => value.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<String>>(),
        _ => bail!("problems.choices is missing or not a list"),
    };
    if choices.is_empty() {
        bail!("problems.choices is empty");
    }

    let answer = problems.get("answer").and_then(answer_label);

    let question_plus = row
        .get("question_plus")
        .or_else(|| problems.get("question_plus"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty() && *value != "nan");
    if let Some(extra) = question_plus {
        question.push_str("\n\n<보기>\n");
        question.push_str(extra);
    }

    Ok(QuestionRecord {
        id,
        paragraph,
        question,
        choices,
        answer,
    })
}

fn answer_label(value: &Value) -> Option<u8> {
    let number = match value {
        Value::Number(number) => number.as_u64()?,
        Value::String(raw) => raw.trim().parse::<f64>().ok().filter(|v| v.fract() == 0.0)? as u64,
        _ => return None,
    };
    (1..=5).contains(&number).then_some(number as u8)
}
