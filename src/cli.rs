use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "csat-rag",
    version,
    about = "Retrieval-augmented multiple-choice solver for Korean CSAT-style exams"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    Solve(SolveArgs),
    Index(IndexArgs),
    Score(ScoreArgs),
    Pairs(PairsArgs),
    Label(LabelArgs),
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RouteMode {
    Auto,
    Always,
    Never,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum OutputFormat {
    Csv,
    Jsonl,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Jsonl => "jsonl",
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum EmbedRefreshMode {
    Full,
    MissingOrStale,
}

impl EmbedRefreshMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::MissingOrStale => "missing-or-stale",
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct SolveArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, default_value = "results/predictions.csv")]
    pub output: PathBuf,

    #[arg(long, value_enum)]
    pub format: Option<OutputFormat>,

    #[arg(long)]
    pub limit: Option<usize>,

    #[arg(long, value_enum)]
    pub route: Option<RouteMode>,

    #[arg(long)]
    pub checkpoint_every: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub questions: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = EmbedRefreshMode::MissingOrStale)]
    pub refresh_mode: EmbedRefreshMode,

    #[arg(long)]
    pub manifest_path: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ScoreArgs {
    #[arg(long)]
    pub results: PathBuf,

    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PairsArgs {
    #[arg(long)]
    pub chosen: PathBuf,

    #[arg(long)]
    pub rejected: PathBuf,

    #[arg(long)]
    pub categories: PathBuf,

    #[arg(long, default_value = "data/preference_train.csv")]
    pub train_output: PathBuf,

    #[arg(long, default_value = "data/preference_valid.csv")]
    pub valid_output: PathBuf,

    #[arg(long, default_value_t = 0.1)]
    pub valid_ratio: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

#[derive(Args, Debug, Clone)]
pub struct LabelArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long)]
    pub input: PathBuf,

    #[arg(long, default_value = "data/train_with_korea.csv")]
    pub output: PathBuf,

    #[arg(long)]
    pub limit: Option<usize>,
}
