use std::path::Path;

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::cli::LabelArgs;
use crate::commands::solve::is_fatal;
use crate::config::AppConfig;
use crate::dataset::{csv_headers, csv_row_object, question_from_row};
use crate::llm::{ChatMessage, ChatModel, GenerationParams, OpenAiChatClient};
use crate::util::replace_file_atomically;

pub const LABEL_COLUMN: &str = "is_korea";

/// Whether a question needs Korea-specific background to answer well.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KoreaLabel {
    Korea,
    Universal,
    Unknown,
}

impl KoreaLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Korea => "True",
            Self::Universal => "False",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Only an exact `True` or `False` reply counts.
    pub fn from_reply(reply: &str) -> Self {
        match reply.trim() {
            "True" => Self::Korea,
            "False" => Self::Universal,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelCounts {
    pub korea: usize,
    pub universal: usize,
    pub unknown: usize,
}

impl LabelCounts {
    fn add(&mut self, label: KoreaLabel) {
        match label {
            KoreaLabel::Korea => self.korea += 1,
            KoreaLabel::Universal => self.universal += 1,
            KoreaLabel::Unknown => self.unknown += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.korea + self.universal + self.unknown
    }
}

pub fn run(args: LabelArgs) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref())?;
    let llm = OpenAiChatClient::new(&config.llm)?;
    if config.llm.health_check {
        llm.health_check()?;
    }

    let counts = label_file(
        &llm,
        &config.generation.classifier,
        &args.input,
        &args.output,
        args.limit,
    )?;

    info!(
        input = %args.input.display(),
        output = %args.output.display(),
        rows = counts.total(),
        korea = counts.korea,
        universal = counts.universal,
        unknown = counts.unknown,
        "korea labels written"
    );
    Ok(())
}

pub fn render_label_prompt(paragraph: &str, question: &str, choices: &str) -> String {
    format!(
        "다음은 수능 스타일의 문제이다.

[지문]
{paragraph}

[문제]
{question}

[선택지]
{choices}

### Instruction
주어진 문제가 \"한국(Korea)\"에 관한 특수한 배경지식, 한국의 사회·문화·역사적 맥락을 이해해야 더 정확하게 풀 수 있는 문제인지 판단하세요.

### Criteria
- 한국의 고유한 지명, 인물, 사건, 제도, 관습 등이 포함된 경우
- 한국의 교육과정이나 사회적 상황에 특화된 논리가 필요한 경우

위 조건에 해당하면 True, 보편적인 세계사적 사실이나 일반적인 논리만으로 충분히 풀 수 있다면 False를 출력하세요.

### Output Format
True 혹은 False 중 하나만 정확히 출력하라."
    )
}

/// Copies `input` to `output` with a label column appended (or overwritten).
///
/// Rows that cannot be read as a question, and transient LLM failures, are
/// labeled `UNKNOWN`; a fatal-init failure aborts before anything is written.
pub(crate) fn label_file(
    llm: &dyn ChatModel,
    params: &GenerationParams,
    input: &Path,
    output: &Path,
    limit: Option<usize>,
) -> Result<LabelCounts> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    let mut headers = csv_headers(
        reader
            .headers()
            .with_context(|| format!("failed to read csv header: {}", input.display()))?,
    );
    let records = reader
        .records()
        .take(limit.unwrap_or(usize::MAX))
        .enumerate()
        .map(|(row, record)| {
            record.with_context(|| format!("invalid row {} in {}", row + 1, input.display()))
        })
        .collect::<Result<Vec<csv::StringRecord>>>()?;

    let mut counts = LabelCounts::default();
    let mut rows = Vec::<Vec<String>>::with_capacity(records.len());
    let label_index = match headers.iter().position(|header| header == LABEL_COLUMN) {
        Some(index) => index,
        None => {
            headers.push(LABEL_COLUMN.to_string());
            headers.len() - 1
        }
    };

    for (row, record) in records.iter().enumerate() {
        let object = csv_row_object(&headers, record);
        let label = label_row(llm, params, &object, row)?;
        counts.add(label);

        let mut fields = record.iter().map(str::to_string).collect::<Vec<String>>();
        fields.resize(headers.len(), String::new());
        fields[label_index] = label.as_str().to_string();
        rows.push(fields);

        if (row + 1) % 50 == 0 {
            info!(done = row + 1, total = records.len(), "labeling progress");
        }
    }

    replace_file_atomically(output, |file| {
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(&headers)
            .context("failed to write label header")?;
        for fields in &rows {
            writer
                .write_record(fields)
                .context("failed to write labeled row")?;
        }
        writer.flush().context("failed to flush labeled csv")?;
        Ok(())
    })
    .with_context(|| format!("failed to write {}", output.display()))?;

    Ok(counts)
}

fn label_row(
    llm: &dyn ChatModel,
    params: &GenerationParams,
    object: &Value,
    row: usize,
) -> Result<KoreaLabel> {
    let prompt = match prompt_for_row(object, row) {
        Ok(prompt) => prompt,
        Err(err) => {
            warn!(row, error = %format!("{err:#}"), "row is not a readable question");
            return Ok(KoreaLabel::Unknown);
        }
    };

    match llm.complete(&[ChatMessage::user(prompt)], params) {
        Ok(reply) => {
            let label = KoreaLabel::from_reply(&reply);
            if label == KoreaLabel::Unknown {
                warn!(row, reply = %reply.trim(), "label reply outside True/False");
            }
            Ok(label)
        }
        Err(err) if is_fatal(&err) => Err(err.context(format!("aborting labeling at row {row}"))),
        Err(err) => {
            warn!(row, error = %format!("{err:#}"), "label call failed");
            Ok(KoreaLabel::Unknown)
        }
    }
}

/// Flat rows carry `question`/`choices` columns; competition rows carry a
/// serialized `problems` field.
fn prompt_for_row(object: &Value, row: usize) -> Result<String> {
    if object.get("problems").is_some() && text(object, "question").is_empty() {
        let question = question_from_row(object, row)?;
        return Ok(render_label_prompt(
            &question.paragraph,
            &question.question,
            &question.numbered_choices(),
        ));
    }

    let question = text(object, "question");
    if question.trim().is_empty() {
        anyhow::bail!("row has neither a question nor a problems column");
    }
    Ok(render_label_prompt(
        text(object, "paragraph"),
        question,
        text(object, "choices"),
    ))
}

fn text<'a>(object: &'a Value, name: &str) -> &'a str {
    object.get(name).and_then(Value::as_str).unwrap_or_default()
}
