use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

pub fn now_utc_string() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn utc_compact_string(ts: DateTime<Utc>) -> String {
    ts.format("%Y%m%dT%H%M%SZ").to_string()
}

pub fn ensure_directory(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .with_context(|| format!("failed to create directory: {}", path.display()))
}

pub fn ensure_parent_directory(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_directory(parent),
        _ => Ok(()),
    }
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_directory(path)?;

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize json: {}", path.display()))?;

    let mut file = File::create(path)
        .with_context(|| format!("failed to create json file: {}", path.display()))?;
    file.write_all(&data)
        .with_context(|| format!("failed to write json file: {}", path.display()))?;
    file.write_all(b"\n")
        .with_context(|| format!("failed to finalize json file: {}", path.display()))?;

    Ok(())
}

/// Writes through a sibling temp file so readers never observe a half-written file.
pub fn replace_file_atomically(
    path: &Path,
    write: impl FnOnce(&mut File) -> Result<()>,
) -> Result<()> {
    ensure_parent_directory(path)?;

    let tmp_path = sibling_temp_path(path);
    let mut file = File::create(&tmp_path)
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
    write(&mut file)?;
    file.sync_all()
        .with_context(|| format!("failed to flush temp file: {}", tmp_path.display()))?;
    drop(file);

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to move {} into place at {}",
            tmp_path.display(),
            path.display()
        )
    })
}

pub fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    path.with_file_name(format!("{file_name}{suffix}"))
}

pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub fn tail_chars(text: &str, max_chars: usize) -> &str {
    let total = text.chars().count();
    if total <= max_chars {
        return text;
    }
    match text.char_indices().nth(total - max_chars) {
        Some((byte_index, _)) => &text[byte_index..],
        None => text,
    }
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    sibling_path(path, ".tmp")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_chars_respects_multibyte_boundaries() {
        assert_eq!(truncate_chars("가나다라", 2), "가나");
        assert_eq!(truncate_chars("가나", 5), "가나");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn tail_chars_keeps_the_end() {
        assert_eq!(tail_chars("가나다라", 2), "다라");
        assert_eq!(tail_chars("ab", 5), "ab");
    }

    #[test]
    fn sibling_path_appends_suffix_to_file_name() {
        let path = Path::new("results/run.csv");
        assert_eq!(
            sibling_path(path, ".manifest.json"),
            PathBuf::from("results/run.csv.manifest.json")
        );
    }

    #[test]
    fn replace_file_atomically_overwrites_previous_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("out.txt");

        replace_file_atomically(&path, |file| {
            file.write_all(b"first version with more bytes")?;
            Ok(())
        })
        .expect("first write");
        replace_file_atomically(&path, |file| {
            file.write_all(b"second")?;
            Ok(())
        })
        .expect("second write");

        assert_eq!(fs::read_to_string(&path).expect("read"), "second");
        assert!(!sibling_temp_path(&path).exists());
    }
}
