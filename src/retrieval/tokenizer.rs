use std::collections::HashSet;

use anyhow::{Context, Result};
use regex::Regex;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TokenTag {
    Noun,
    Predicate,
    Foreign,
    Hanja,
    Number,
}

impl TokenTag {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Noun => "NNG",
            Self::Predicate => "VV",
            Self::Foreign => "SL",
            Self::Hanja => "SH",
            Self::Number => "SN",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TokenizeMode {
    Corpus,
    Query,
}

pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str, mode: TokenizeMode) -> Vec<String>;
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Script {
    Hangul,
    Latin,
    Hanja,
    Digit,
}

const JOSA: &[&str] = &[
    "에서는", "에서도", "으로서", "으로써", "으로는", "에게서", "이라는", "이라고", "이었다",
    "에서", "에게", "한테", "으로", "부터", "까지", "처럼", "보다", "이나", "이며", "라는",
    "라고", "이다", "과", "와", "은", "는", "이", "가", "을", "를", "의", "에", "도", "로",
    "만", "께", "나",
];

// Endings after a 하다/되다 stem; the stem itself is nominal.
const LIGHT_VERB_ENDINGS: &[&str] = &[
    "하였으며", "하였다", "하였고", "하였던", "되었으며", "되었다", "되었고", "되었던",
    "하면서", "되면서", "했으며", "됐으며", "했다", "했고", "됐다", "됐고", "한다", "된다",
    "하는", "되는", "하여", "되어", "하고", "되고", "하게", "되게", "하던", "되던", "하다",
    "되다", "하며", "되며", "한", "된", "할", "될",
];

const PREDICATE_ENDINGS: &[&str] = &[
    "었으며", "았으며", "였으며", "었다", "았다", "였다", "었고", "았고", "였고", "는다",
    "으며", "으면", "어서", "아서", "습니다", "ㅂ니다",
];

const STOPWORDS: &[&str] = &[
    "그", "이", "저", "것", "수", "등", "및", "또는", "그리고", "그러나", "하지만", "때문",
    "다음", "중", "위", "대한", "대해", "관한", "있다", "없다", "있는", "없는", "옳은", "않은",
    "것은", "무엇", "어느", "어떤", "가장", "모두", "각각", "보기", "고른", "적절한", "설명",
];

/// Rule-based Korean analyzer emitting `form/TAG` content tokens.
///
/// Words found in the noun lexicon, bare or followed by a particle, are kept
/// whole instead of going through suffix stripping.
pub struct KoreanTokenizer {
    include: HashSet<TokenTag>,
    stopwords: HashSet<&'static str>,
    lexicon: HashSet<String>,
    fallback: Regex,
}

impl KoreanTokenizer {
    pub fn new() -> Result<Self> {
        Self::with_tags(&[
            TokenTag::Noun,
            TokenTag::Predicate,
            TokenTag::Foreign,
            TokenTag::Hanja,
            TokenTag::Number,
        ])
    }

    pub fn with_tags(tags: &[TokenTag]) -> Result<Self> {
        let fallback = Regex::new(r"\w+").context("failed to compile tokenizer fallback regex")?;
        Ok(Self {
            include: tags.iter().copied().collect(),
            stopwords: STOPWORDS.iter().copied().collect(),
            lexicon: HashSet::new(),
            fallback,
        })
    }

    /// Adds known nouns (corpus entry titles). Only all-Hangul words of two or
    /// more syllables are kept.
    pub fn with_lexicon(mut self, nouns: impl IntoIterator<Item = String>) -> Self {
        self.lexicon.extend(nouns.into_iter().filter_map(|noun| {
            let noun = noun.trim().to_string();
            let hangul = noun
                .chars()
                .all(|character| classify_char(character) == Some(Script::Hangul));
            (hangul && noun.chars().count() >= 2).then_some(noun)
        }));
        self
    }

    pub fn lexicon_size(&self) -> usize {
        self.lexicon.len()
    }

    fn lexicon_noun<'a>(&self, word: &'a str) -> Option<&'a str> {
        if self.lexicon.contains(word) {
            return Some(word);
        }
        JOSA.iter()
            .filter_map(|suffix| word.strip_suffix(*suffix))
            .find(|stem| self.lexicon.contains(*stem))
    }

    fn analyze_hangul<'a>(&self, word: &'a str) -> (&'a str, TokenTag) {
        match self.lexicon_noun(word) {
            Some(noun) => (noun, TokenTag::Noun),
            None => analyze_hangul(word),
        }
    }

    fn analyze_run(
        &self,
        script: Script,
        run: &str,
        mode: TokenizeMode,
        out: &mut Vec<(String, TokenTag)>,
    ) {
        match script {
            Script::Latin => out.push((run.to_lowercase(), TokenTag::Foreign)),
            Script::Hanja => out.push((run.to_string(), TokenTag::Hanja)),
            Script::Digit => out.push((run.to_string(), TokenTag::Number)),
            Script::Hangul => {
                if self.stopwords.contains(run) {
                    return;
                }
                let (stem, tag) = self.analyze_hangul(run);
                if !stem.is_empty() && !self.stopwords.contains(stem) {
                    out.push((stem.to_string(), tag));
                }
                if mode == TokenizeMode::Corpus && stem != run {
                    out.push((run.to_string(), tag));
                }
            }
        }
    }
}

impl Tokenizer for KoreanTokenizer {
    fn tokenize(&self, text: &str, mode: TokenizeMode) -> Vec<String> {
        let mut analyzed = Vec::<(String, TokenTag)>::new();
        for (script, run) in script_runs(text) {
            self.analyze_run(script, run, mode, &mut analyzed);
        }

        let mut seen = HashSet::<String>::new();
        let mut tokens = Vec::<String>::new();
        for (form, tag) in analyzed {
            if !self.include.contains(&tag) {
                continue;
            }
            let token = format!("{form}/{}", tag.as_str());
            if seen.insert(token.clone()) {
                tokens.push(token);
            }
        }

        if tokens.is_empty() {
            for word in self.fallback.find_iter(text) {
                let token = word.as_str().to_lowercase();
                if seen.insert(token.clone()) {
                    tokens.push(token);
                }
            }
        }

        tokens
    }
}

fn classify_char(character: char) -> Option<Script> {
    match character {
        '\u{AC00}'..='\u{D7A3}' | '\u{1100}'..='\u{11FF}' | '\u{3130}'..='\u{318F}' => {
            Some(Script::Hangul)
        }
        '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}' => {
            Some(Script::Hanja)
        }
        character if character.is_ascii_alphabetic() => Some(Script::Latin),
        character if character.is_ascii_digit() => Some(Script::Digit),
        _ => None,
    }
}

fn script_runs(text: &str) -> Vec<(Script, &str)> {
    let mut runs = Vec::new();
    let mut current: Option<(Script, usize)> = None;

    for (index, character) in text.char_indices() {
        let script = classify_char(character);
        match (current, script) {
            (Some((active, _)), Some(next)) if active == next => {}
            (Some((active, start)), next) => {
                runs.push((active, &text[start..index]));
                current = next.map(|value| (value, index));
            }
            (None, next) => {
                current = next.map(|value| (value, index));
            }
        }
    }
    if let Some((active, start)) = current {
        runs.push((active, &text[start..]));
    }

    runs
}

fn analyze_hangul(word: &str) -> (&str, TokenTag) {
    if let Some(stem) = strip_suffix_min(word, LIGHT_VERB_ENDINGS, 2) {
        return (stem, TokenTag::Noun);
    }
    if let Some(stem) = strip_suffix_min(word, PREDICATE_ENDINGS, 1) {
        return (stem, TokenTag::Predicate);
    }
    if let Some(stem) = strip_josa(word) {
        return (stem, TokenTag::Noun);
    }
    (word, TokenTag::Noun)
}

fn strip_josa(word: &str) -> Option<&str> {
    for suffix in JOSA {
        let Some(stem) = word.strip_suffix(*suffix) else {
            continue;
        };
        let min_stem = if suffix.chars().count() == 1 { 2 } else { 1 };
        if stem.chars().count() >= min_stem {
            return Some(stem);
        }
    }
    None
}

fn strip_suffix_min<'a>(word: &'a str, suffixes: &[&str], min_stem: usize) -> Option<&'a str> {
    suffixes.iter().find_map(|suffix| {
        word.strip_suffix(*suffix)
            .filter(|stem| stem.chars().count() >= min_stem)
    })
}
