use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::model::DocumentChunk;
use crate::retrieval::chunker::TextSplitter;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorpusEntry {
    #[serde(rename = "제목", alias = "title", default)]
    pub title: Option<String>,
    #[serde(rename = "한자명", alias = "hanja", default)]
    pub hanja: Option<String>,
    #[serde(rename = "[정의]", alias = "definition", default)]
    pub definition: Option<String>,
    #[serde(rename = "[내용]", alias = "content", default)]
    pub content: Option<String>,
}

impl CorpusEntry {
    fn field(value: &Option<String>) -> &str {
        value.as_deref().map(str::trim).unwrap_or_default()
    }

    pub fn title(&self) -> &str {
        Self::field(&self.title)
    }

    pub fn is_empty(&self) -> bool {
        self.title().is_empty()
            && Self::field(&self.definition).is_empty()
            && Self::field(&self.content).is_empty()
    }

    pub fn to_text(&self) -> String {
        format!(
            "제목: {}\n한자명: {}\n정의: {}\n내용: {}",
            self.title(),
            Self::field(&self.hanja),
            Self::field(&self.definition),
            Self::field(&self.content)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadedCorpus {
    pub files: Vec<PathBuf>,
    pub chunks: Vec<DocumentChunk>,
    pub skipped_entries: usize,
}

pub fn discover_corpus_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::<PathBuf>::new();
    for path in paths {
        if path.is_dir() {
            let entries = fs::read_dir(path)
                .with_context(|| format!("failed to list corpus directory: {}", path.display()))?;
            for entry in entries {
                let entry_path = entry
                    .with_context(|| format!("failed to read entry in {}", path.display()))?
                    .path();
                let is_json = entry_path
                    .extension()
                    .and_then(|value| value.to_str())
                    .is_some_and(|value| value.eq_ignore_ascii_case("json"));
                if entry_path.is_file() && is_json {
                    files.push(entry_path);
                }
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            return Err(anyhow!(PipelineError::fatal_init(format!(
                "corpus path does not exist: {}",
                path.display()
            ))));
        }
    }

    files.sort();
    files.dedup();
    Ok(files)
}

pub fn load_corpus(paths: &[PathBuf], splitter: &TextSplitter) -> Result<LoadedCorpus> {
    let files = discover_corpus_files(paths)?;
    if files.is_empty() {
        return Err(anyhow!(PipelineError::fatal_init(
            "no corpus files found under the configured corpus paths"
        )));
    }

    let mut corpus = LoadedCorpus {
        files: files.clone(),
        ..LoadedCorpus::default()
    };

    for file in &files {
        let entries = read_entries(file)?;
        let source = file
            .file_name()
            .map(|value| value.to_string_lossy().into_owned())
            .unwrap_or_else(|| file.display().to_string());

        let before = corpus.chunks.len();
        for entry in &entries {
            if entry.is_empty() {
                corpus.skipped_entries += 1;
                continue;
            }
            corpus.chunks.extend(chunk_entry(&source, entry, splitter));
        }
        info!(
            file = %file.display(),
            entries = entries.len(),
            chunks = corpus.chunks.len() - before,
            "corpus file loaded"
        );
    }

    if corpus.skipped_entries > 0 {
        warn!(
            skipped = corpus.skipped_entries,
            "corpus entries without title or text were skipped"
        );
    }
    if corpus.chunks.is_empty() {
        return Err(anyhow!(PipelineError::fatal_init(
            "corpus files produced no chunks"
        )));
    }

    Ok(corpus)
}

fn read_entries(path: &Path) -> Result<Vec<CorpusEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read corpus file: {}", path.display()))?;
    serde_json::from_str::<Vec<CorpusEntry>>(&raw)
        .with_context(|| format!("corpus file must be a JSON array of entries: {}", path.display()))
}

pub fn chunk_entry(source: &str, entry: &CorpusEntry, splitter: &TextSplitter) -> Vec<DocumentChunk> {
    let title = entry.title().to_string();
    splitter
        .split(&entry.to_text())
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| {
            let text = if chunk_index == 0 {
                text
            } else {
                format!("문서제목: {title}\n{text}")
            };
            DocumentChunk {
                text,
                source: source.to_string(),
                title: title.clone(),
                chunk_index,
                score: None,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_corpus(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("write corpus");
        path
    }

    #[test]
    fn entries_render_with_korean_field_labels() {
        let entry: CorpusEntry = serde_json::from_str(
            r#"{"제목": "훈민정음", "한자명": "訓民正音", "[정의]": "조선 세종이 창제한 문자", "[내용]": "1443년 창제"}"#,
        )
        .expect("entry");
        assert_eq!(
            entry.to_text(),
            "제목: 훈민정음\n한자명: 訓民正音\n정의: 조선 세종이 창제한 문자\n내용: 1443년 창제"
        );
    }

    #[test]
    fn later_chunks_carry_the_title_prefix() {
        let splitter = TextSplitter::new(30, 5).expect("splitter");
        let entry = CorpusEntry {
            title: Some("고려".to_string()),
            hanja: None,
            definition: Some("918년 왕건이 세운 왕조".to_string()),
            content: Some("고려는 후삼국을 통일하였다. 수도는 개경이었다. 몽골의 침입을 받았다.".to_string()),
        };
        let chunks = chunk_entry("history.json", &entry, &splitter);
        assert!(chunks.len() > 1);
        assert!(chunks[0].text.starts_with("제목: 고려"));
        for chunk in &chunks[1..] {
            assert!(chunk.text.starts_with("문서제목: 고려\n"));
        }
        assert_eq!(
            chunks.iter().map(|chunk| chunk.chunk_index).collect::<Vec<_>>(),
            (0..chunks.len()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn directories_are_read_in_sorted_order() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_corpus(dir.path(), "b.json", r#"[{"title": "B", "content": "둘째"}]"#);
        write_corpus(dir.path(), "a.json", r#"[{"title": "A", "content": "첫째"}, {}]"#);
        write_corpus(dir.path(), "notes.txt", "ignored");

        let splitter = TextSplitter::new(1000, 200).expect("splitter");
        let corpus = load_corpus(&[dir.path().to_path_buf()], &splitter).expect("corpus");
        assert_eq!(corpus.files.len(), 2);
        assert_eq!(
            corpus.chunks.iter().map(|chunk| chunk.title.as_str()).collect::<Vec<_>>(),
            vec!["A", "B"]
        );
        assert_eq!(corpus.chunks[0].source, "a.json");
        assert_eq!(corpus.skipped_entries, 1);
    }

    #[test]
    fn empty_or_missing_corpus_is_fatal() {
        let dir = tempfile::tempdir().expect("tempdir");
        let splitter = TextSplitter::new(1000, 200).expect("splitter");

        let err = load_corpus(&[dir.path().to_path_buf()], &splitter).expect_err("no files");
        assert!(err.downcast_ref::<PipelineError>().is_some_and(PipelineError::is_fatal));

        let missing = dir.path().join("missing");
        let err = load_corpus(&[missing], &splitter).expect_err("missing path");
        assert!(err.downcast_ref::<PipelineError>().is_some_and(PipelineError::is_fatal));

        write_corpus(dir.path(), "empty.json", "[]");
        let err = load_corpus(&[dir.path().to_path_buf()], &splitter).expect_err("no chunks");
        assert!(err.downcast_ref::<PipelineError>().is_some_and(PipelineError::is_fatal));
    }
}
