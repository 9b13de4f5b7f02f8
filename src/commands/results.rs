use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::cli::OutputFormat;
use crate::model::ResultRecord;
use crate::util::replace_file_atomically;

pub fn format_for_path(path: &Path) -> OutputFormat {
    match path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .as_deref()
    {
        Some("jsonl") => OutputFormat::Jsonl,
        _ => OutputFormat::Csv,
    }
}

/// Rewrites the whole results file; every checkpoint replaces the previous one.
pub fn write_results(path: &Path, format: OutputFormat, results: &[ResultRecord]) -> Result<()> {
    replace_file_atomically(path, |file| match format {
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(file);
            for record in results {
                writer
                    .serialize(record)
                    .with_context(|| format!("failed to write result row {}", record.id))?;
            }
            writer.flush().context("failed to flush csv results")?;
            Ok(())
        }
        OutputFormat::Jsonl => {
            for record in results {
                serde_json::to_writer(&mut *file, record)
                    .with_context(|| format!("failed to write result row {}", record.id))?;
                file.write_all(b"\n")
                    .context("failed to write jsonl newline")?;
            }
            Ok(())
        }
    })
    .with_context(|| format!("failed to write results: {}", path.display()))
}

pub fn read_results(path: &Path) -> Result<Vec<ResultRecord>> {
    let file =
        File::open(path).with_context(|| format!("failed to open results: {}", path.display()))?;

    match format_for_path(path) {
        OutputFormat::Csv => {
            let mut reader = csv::Reader::from_reader(file);
            reader
                .deserialize::<ResultRecord>()
                .enumerate()
                .map(|(row, record)| {
                    record.with_context(|| format!("invalid result row {} in {}", row + 1, path.display()))
                })
                .collect()
        }
        OutputFormat::Jsonl => {
            let mut records = Vec::<ResultRecord>::new();
            for (line_number, line) in BufReader::new(file).lines().enumerate() {
                let line = line.with_context(|| format!("failed to read {}", path.display()))?;
                if line.trim().is_empty() {
                    continue;
                }
                let record = serde_json::from_str::<ResultRecord>(&line).with_context(|| {
                    format!("invalid result line {} in {}", line_number + 1, path.display())
                })?;
                records.push(record);
            }
            Ok(records)
        }
    }
}
