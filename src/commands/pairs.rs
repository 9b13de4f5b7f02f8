use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::cli::PairsArgs;
use crate::util::replace_file_atomically;

const UNCATEGORIZED: &str = "";

#[derive(Debug, Clone, Deserialize)]
struct ResponseRow {
    id: String,
    #[serde(default)]
    input_context: String,
    #[serde(default)]
    input_question: String,
    #[serde(default)]
    full: String,
    #[serde(default)]
    gt: String,
}

#[derive(Debug, Clone, Deserialize)]
struct CategoryRow {
    id: String,
    #[serde(default)]
    category: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreferenceRow {
    pub id: String,
    pub prompt: String,
    pub chosen: String,
    pub rejected: String,
    pub gt: String,
    pub category: String,
}

pub fn run(args: PairsArgs) -> Result<()> {
    if !(args.valid_ratio > 0.0 && args.valid_ratio < 1.0) {
        bail!("--valid-ratio must be between 0 and 1, got {}", args.valid_ratio);
    }

    let chosen = read_rows::<ResponseRow>(&args.chosen)?;
    let rejected = read_rows::<ResponseRow>(&args.rejected)?;
    let categories = read_rows::<CategoryRow>(&args.categories)?
        .into_iter()
        .map(|row| (row.id, row.category))
        .collect::<HashMap<String, String>>();

    let chosen_count = chosen.len();
    let pairs = join_pairs(chosen, rejected, &categories);
    if pairs.is_empty() {
        bail!("no ids shared between chosen and rejected responses");
    }
    let uncategorized = pairs
        .iter()
        .filter(|row| row.category == UNCATEGORIZED)
        .count();
    if uncategorized > 0 {
        warn!(uncategorized, "pairs without a category are split as their own group");
    }

    let (train, valid) = split_stratified(pairs, args.valid_ratio, args.seed);
    write_rows(&args.train_output, &train)?;
    write_rows(&args.valid_output, &valid)?;

    info!(
        chosen = chosen_count,
        train = train.len(),
        valid = valid.len(),
        train_output = %args.train_output.display(),
        valid_output = %args.valid_output.display(),
        "preference pairs written"
    );

    Ok(())
}

pub fn render_tutor_prompt(context: &str, question: &str) -> String {
    format!(
        "너는 대한민국 최고의 명문대학교에서 수능형 문항 분석과 교수법을 담당하는 교육학 교수이다.
너의 목표는 학생들에게 복잡한 수능형 지문과 문제를 어떻게 논리적으로 풀고 분석해야 하는지 가르치는 것이다.
단순히 정답만 맞히는 것이 아니라, 지문에 근거하여 오답이 왜 오답인지까지 명확하게 설명하는 '가장 완벽한 해설'을 제공해야 한다.

<task_description>
아래에 수능형 문제의 평가 가이드라인과 실제 문항(지문 및 발문)이 제시될 것이다.
너는 이 가이드라인을 준수하여 해당 문제에 대한 정답과 심층적인 풀이 과정을 작성해야 한다.
</task_description>

<guideline>
수능형 문제의 풀이는 다음의 세 가지 관점에서 평가된다:
- (Logical Grounding, 논리적 근거): 모든 풀이는 반드시 지문 내의 명시적 단서에 근거해야 한다.
- (Conceptual Accuracy, 개념적 정확성): 국어, 사회, 역사 등 각 과목의 핵심 개념과 용어를 정확하게 사용해야 한다. 특히 인과관계나 사회적 현상의 정의가 틀림이 없어야 한다.
- (Process Transparency, 풀이 과정의 투명성): 정답이 도출되는 단계를 1) 지문 분석, 2) 선택지별 분석(정답 및 오답 이유), 3) 최종 결론의 순서로 명확히 제시하여 학생이 사고의 흐름을 따라올 수 있게 해야 한다.
</guideline>

아래는 네가 분석해야 할 문항이다.
<context_and_question>
[지문]
{context}

[질문]
{question}
</context_and_question>

지문을 꼼꼼히 읽고 위의 가이드라인을 복습하라.
작성된 해설은 반드시 <response></response> 태그 안에 넣어라.
해설이 끝난 후, 반드시 맨 마지막 줄에 최종 정답을 {{\"정답\": n}} 형식의 문자열을 추가하라."
    )
}

/// Inner join on `id`, keeping chosen-file order. The first rejected row for
/// an id wins; categories are a left join.
fn join_pairs(
    chosen: Vec<ResponseRow>,
    rejected: Vec<ResponseRow>,
    categories: &HashMap<String, String>,
) -> Vec<PreferenceRow> {
    let mut rejected_by_id = HashMap::<String, String>::new();
    for row in rejected {
        rejected_by_id.entry(row.id).or_insert(row.full);
    }

    chosen
        .into_iter()
        .filter_map(|row| {
            let rejected = rejected_by_id.get(&row.id)?.clone();
            let category = categories
                .get(&row.id)
                .cloned()
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            Some(PreferenceRow {
                prompt: render_tutor_prompt(&row.input_context, &row.input_question),
                chosen: row.full,
                rejected,
                gt: row.gt,
                category,
                id: row.id,
            })
        })
        .collect()
}

/// Deterministic stratified split.
///
/// Within each category rows are ordered by `sha256("{seed}:{id}")` and the
/// first `round(len * ratio)` go to validation. Both outputs keep input order.
pub fn split_stratified(
    rows: Vec<PreferenceRow>,
    valid_ratio: f64,
    seed: u64,
) -> (Vec<PreferenceRow>, Vec<PreferenceRow>) {
    let mut groups = BTreeMap::<String, Vec<(usize, Vec<u8>)>>::new();
    for (position, row) in rows.iter().enumerate() {
        let key = Sha256::digest(format!("{seed}:{}", row.id).as_bytes()).to_vec();
        groups
            .entry(row.category.clone())
            .or_default()
            .push((position, key));
    }

    let mut is_valid = vec![false; rows.len()];
    for members in groups.values_mut() {
        members.sort_by(|left, right| left.1.cmp(&right.1));
        let take = ((members.len() as f64) * valid_ratio).round() as usize;
        for (position, _) in members.iter().take(take.min(members.len().saturating_sub(1))) {
            is_valid[*position] = true;
        }
    }

    let mut train = Vec::<PreferenceRow>::new();
    let mut valid = Vec::<PreferenceRow>::new();
    for (row, validation) in rows.into_iter().zip(is_valid) {
        if validation {
            valid.push(row);
        } else {
            train.push(row);
        }
    }
    (train, valid)
}

fn read_rows<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut reader = csv::Reader::from_reader(file);
    reader
        .deserialize::<T>()
        .enumerate()
        .map(|(row, record)| {
            record.with_context(|| format!("invalid row {} in {}", row + 1, path.display()))
        })
        .collect()
}

fn write_rows(path: &Path, rows: &[PreferenceRow]) -> Result<()> {
    replace_file_atomically(path, |file| {
        let mut writer = csv::Writer::from_writer(file);
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("failed to write pair {}", row.id))?;
        }
        writer.flush().context("failed to flush preference csv")?;
        Ok(())
    })
    .with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use super::*;

    fn pair(id: usize, category: &str) -> PreferenceRow {
        PreferenceRow {
            id: id.to_string(),
            prompt: String::new(),
            chosen: "좋은 해설".to_string(),
            rejected: "나쁜 해설".to_string(),
            gt: "1".to_string(),
            category: category.to_string(),
        }
    }

    #[test]
    fn split_is_stratified_and_repeatable() {
        let rows = (0..40)
            .map(|id| pair(id, if id % 2 == 0 { "history" } else { "reading" }))
            .collect::<Vec<_>>();

        let (train, valid) = split_stratified(rows.clone(), 0.1, 42);
        assert_eq!(train.len() + valid.len(), 40);
        assert_eq!(valid.iter().filter(|row| row.category == "history").count(), 2);
        assert_eq!(valid.iter().filter(|row| row.category == "reading").count(), 2);

        let (_, again) = split_stratified(rows.clone(), 0.1, 42);
        assert_eq!(valid, again);
        let (_, other_seed) = split_stratified(rows, 0.1, 7);
        assert_eq!(other_seed.len(), 4);
    }

    #[test]
    fn singleton_categories_stay_in_train() {
        let (train, valid) = split_stratified(vec![pair(1, "rare")], 0.9, 42);
        assert_eq!(train.len(), 1);
        assert!(valid.is_empty());
    }

    #[test]
    fn prompt_embeds_context_and_question() {
        let prompt = render_tutor_prompt("지문 내용", "질문 내용");
        assert!(prompt.contains("[지문]\n지문 내용\n\n[질문]\n질문 내용"));
        assert!(prompt.ends_with("{\"정답\": n} 형식의 문자열을 추가하라."));
    }

    #[test]
    fn run_joins_on_id_and_writes_both_splits() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = |name: &str| -> PathBuf { dir.path().join(name) };

        let mut chosen = String::from("id,input_context,input_question,full,model_answer,gt,is_correct\n");
        let mut rejected = String::from("id,input_context,input_question,full,model_answer,gt,is_correct\n");
        let mut categories = String::from("id,category\n");
        for id in 0..20 {
            chosen.push_str(&format!("{id},지문{id},질문{id},좋은 해설 {id},1,1,True\n"));
            if id != 3 {
                rejected.push_str(&format!("{id},지문{id},질문{id},나쁜 해설 {id},2,1,False\n"));
            }
            categories.push_str(&format!("{id},{}\n", if id < 10 { "history" } else { "reading" }));
        }
        fs::write(path("chosen.csv"), chosen).expect("chosen");
        fs::write(path("rejected.csv"), rejected).expect("rejected");
        fs::write(path("categories.csv"), categories).expect("categories");

        run(PairsArgs {
            chosen: path("chosen.csv"),
            rejected: path("rejected.csv"),
            categories: path("categories.csv"),
            train_output: path("out/train.csv"),
            valid_output: path("out/valid.csv"),
            valid_ratio: 0.1,
            seed: 42,
        })
        .expect("pairs run");

        let count_rows = |name: &str| {
            csv::Reader::from_path(path(name))
                .expect("reader")
                .records()
                .count()
        };
        assert_eq!(count_rows("out/train.csv") + count_rows("out/valid.csv"), 19);
        assert_eq!(count_rows("out/valid.csv"), 2);
    }
}
