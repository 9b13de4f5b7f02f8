use std::collections::VecDeque;

use anyhow::{Result, bail};

pub const DEFAULT_SEPARATORS: &[&str] = &["\n\n", "\n", ". ", " "];

/// Recursive character splitter. Lengths are counted in `char`s.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::with_separators(chunk_size, chunk_overlap, DEFAULT_SEPARATORS)
    }

    pub fn with_separators(
        chunk_size: usize,
        chunk_overlap: usize,
        separators: &[&str],
    ) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be positive");
        }
        if chunk_overlap >= chunk_size {
            bail!("chunk_overlap ({chunk_overlap}) must be smaller than chunk_size ({chunk_size})");
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: separators
                .iter()
                .filter(|value| !value.is_empty())
                .map(|value| value.to_string())
                .collect(),
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let Some(position) = separators
            .iter()
            .position(|separator| text.contains(separator.as_str()))
        else {
            return self.hard_split(text);
        };
        let separator = separators[position].as_str();
        let finer = &separators[position + 1..];

        let mut chunks = Vec::<String>::new();
        let mut pending = Vec::<&str>::new();
        for piece in text.split(separator) {
            if piece.trim().is_empty() {
                continue;
            }
            if char_len(piece) <= self.chunk_size {
                pending.push(piece);
                continue;
            }

            if !pending.is_empty() {
                chunks.extend(self.merge(&pending, separator));
                pending.clear();
            }
            chunks.extend(self.split_recursive(piece, finer));
        }
        if !pending.is_empty() {
            chunks.extend(self.merge(&pending, separator));
        }

        chunks
    }

    fn merge(&self, pieces: &[&str], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let mut out = Vec::<String>::new();
        let mut window = VecDeque::<&str>::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            let joined = |window: &VecDeque<&str>| if window.is_empty() { 0 } else { separator_len };

            if total + len + joined(&window) > self.chunk_size && !window.is_empty() {
                push_joined(&mut out, &window, separator);
                while total > self.chunk_overlap
                    || (total > 0 && total + len + joined(&window) > self.chunk_size)
                {
                    let Some(removed) = window.pop_front() else {
                        break;
                    };
                    total -= char_len(removed) + joined(&window);
                }
            }

            total += len + joined(&window);
            window.push_back(piece);
        }
        push_joined(&mut out, &window, separator);

        out
    }

    fn hard_split(&self, text: &str) -> Vec<String> {
        let trimmed = text.trim();
        let chars = trimmed.chars().collect::<Vec<char>>();
        if chars.is_empty() {
            return Vec::new();
        }
        if chars.len() <= self.chunk_size {
            return vec![trimmed.to_string()];
        }

        let step = self.chunk_size - self.chunk_overlap;
        let mut out = Vec::new();
        let mut start = 0usize;
        loop {
            let end = (start + self.chunk_size).min(chars.len());
            out.push(chars[start..end].iter().collect::<String>());
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }
}

fn push_joined(out: &mut Vec<String>, window: &VecDeque<&str>, separator: &str) {
    let joined = window.iter().copied().collect::<Vec<&str>>().join(separator);
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
