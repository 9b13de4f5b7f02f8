use anyhow::{Context, Result};
use tracing::info;

use crate::cli::ScoreArgs;
use crate::commands::results::read_results;
use crate::metrics::summarize;

pub fn run(args: ScoreArgs) -> Result<()> {
    let results = read_results(&args.results)?;
    let summary = summarize(&results);

    if args.json {
        let rendered =
            serde_json::to_string_pretty(&summary).context("failed to serialize metric summary")?;
        println!("{rendered}");
    }

    info!(
        path = %args.results.display(),
        total = summary.total,
        graded = summary.graded,
        correct = summary.correct,
        errors = summary.errors,
        accuracy_pct = %format!("{:.2}", summary.accuracy_pct),
        macro_f1 = %format!("{:.4}", summary.macro_f1),
        "results scored"
    );

    Ok(())
}
