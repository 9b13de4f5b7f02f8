use serde::{Deserialize, Serialize};

use crate::model::{ERROR_ANSWER, ResultRecord};

pub const CHOICE_LABELS: [i8; 5] = [1, 2, 3, 4, 5];
pub const MISSING_PREDICTION: i8 = -1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub total: usize,
    pub graded: usize,
    pub correct: usize,
    pub errors: usize,
    pub accuracy_pct: f64,
    pub macro_f1: f64,
}

fn prediction_label(predicted: &str) -> i8 {
    match predicted.trim().parse::<i8>() {
        Ok(label) if CHOICE_LABELS.contains(&label) => label,
        _ => MISSING_PREDICTION,
    }
}

/// Accuracy and macro F1 over rows that carry ground truth.
///
/// Predictions that are not a choice number count as `-1`; F1 is averaged
/// over all five labels, with 0 for labels that have no true or predicted rows.
pub fn summarize(results: &[ResultRecord]) -> MetricSummary {
    let errors = results
        .iter()
        .filter(|record| record.predicted_answer == ERROR_ANSWER)
        .count();

    let pairs = results
        .iter()
        .filter_map(|record| {
            record
                .ground_truth
                .map(|truth| (truth as i8, prediction_label(&record.predicted_answer)))
        })
        .collect::<Vec<(i8, i8)>>();

    let graded = pairs.len();
    let correct = pairs.iter().filter(|(truth, pred)| truth == pred).count();
    let accuracy_pct = if graded == 0 {
        0.0
    } else {
        correct as f64 / graded as f64 * 100.0
    };

    MetricSummary {
        total: results.len(),
        graded,
        correct,
        errors,
        accuracy_pct,
        macro_f1: macro_f1(&pairs),
    }
}

fn macro_f1(pairs: &[(i8, i8)]) -> f64 {
    if pairs.is_empty() {
        return 0.0;
    }

    let total = CHOICE_LABELS
        .iter()
        .map(|label| {
            let tp = pairs
                .iter()
                .filter(|(truth, pred)| truth == label && pred == label)
                .count() as f64;
            let fp = pairs
                .iter()
                .filter(|(truth, pred)| truth != label && pred == label)
                .count() as f64;
            let fn_ = pairs
                .iter()
                .filter(|(truth, pred)| truth == label && pred != label)
                .count() as f64;

            let precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
            let recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
            if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            }
        })
        .sum::<f64>();

    total / CHOICE_LABELS.len() as f64
}
