use std::path::Path;
use std::time::Instant;

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::cli::{OutputFormat, RouteMode, SolveArgs};
use crate::commands::results::{format_for_path, write_results};
use crate::config::AppConfig;
use crate::dataset::load_questions;
use crate::error::PipelineError;
use crate::llm::OpenAiChatClient;
use crate::metrics::summarize;
use crate::model::{QuestionRecord, ResultRecord, RouteCounts, SolveRunManifest};
use crate::retrieval::build_local_indexes;
use crate::retrieval::chunker::TextSplitter;
use crate::retrieval::encyclopedia::MediaWikiClient;
use crate::retrieval::rerank::build_reranker;
use crate::util::{now_utc_string, sibling_path, utc_compact_string, write_json_pretty};
use crate::workflow::classifier::RoutePolicy;
use crate::workflow::parser::NO_ANSWER;
use crate::workflow::retrieve::{ContextRetriever, HybridContextRetriever, RetrievalSettings};
use crate::workflow::{Workflow, WorkflowOutcome};

pub fn run(args: SolveArgs) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref())?;
    if let Some(route) = args.route {
        config.run.route = policy_for(route);
    }
    if let Some(every) = args.checkpoint_every {
        config.run.checkpoint_every = every;
    }
    config.validate()?;

    let format = args.format.unwrap_or_else(|| format_for_path(&args.output));
    let started_at = now_utc_string();
    let started = Instant::now();
    let run_id = format!("solve-{}", utc_compact_string(Utc::now()));
    let mut warnings = Vec::<String>::new();

    let loaded = load_questions(&args.input)?;
    let questions_loaded = loaded.questions.len();
    let mut questions = loaded.questions;
    if let Some(limit) = args.limit {
        questions.truncate(limit);
    }
    if !loaded.skipped.is_empty() {
        warnings.push(format!("{} malformed question rows skipped", loaded.skipped.len()));
    }

    let llm = OpenAiChatClient::new(&config.llm)?;
    if config.llm.health_check {
        llm.health_check()?;
    }

    let route_policy = config.run.route;
    let indexes = if route_policy == RoutePolicy::Never {
        info!("route policy is never, retrieval stack not built");
        None
    } else {
        Some(build_local_indexes(&config, false)?)
    };
    let reranker = match indexes {
        Some(_) => Some(build_reranker(&config.reranker)?),
        None => None,
    };
    let encyclopedia = if indexes.is_some() && config.encyclopedia.enabled {
        Some(MediaWikiClient::new(&config.encyclopedia)?)
    } else {
        None
    };

    let retriever = match (&indexes, &reranker) {
        (Some(indexes), Some(reranker)) => {
            let retriever = HybridContextRetriever::new(
                &llm,
                config.generation.keywords.clone(),
                &indexes.retriever,
                reranker.as_ref(),
                RetrievalSettings::from_config(&config.retrieval, &config.encyclopedia),
            );
            Some(match &encyclopedia {
                Some(wiki) => retriever.with_encyclopedia(
                    wiki,
                    TextSplitter::new(
                        config.encyclopedia.chunk_size,
                        config.encyclopedia.chunk_overlap,
                    )?,
                ),
                None => retriever,
            })
        }
        _ => None,
    };

    let workflow = Workflow::new(
        &llm,
        retriever.as_ref().map(|value| value as &dyn ContextRetriever),
        config.generation.clone(),
        config.run.clone(),
    )?;

    info!(
        run_id = %run_id,
        input = %args.input.display(),
        output = %args.output.display(),
        questions = questions.len(),
        llm_endpoint = %llm.endpoint(),
        route_policy = route_policy.as_str(),
        "solve run started"
    );

    let report = solve_batch(
        &workflow,
        questions,
        &BatchSink {
            path: &args.output,
            format,
            checkpoint_every: config.run.checkpoint_every,
        },
    )?;
    if let Some(indexes) = &indexes {
        indexes.model.unload();
    }
    let BatchReport {
        results,
        routes,
        checkpoints_written,
    } = report;

    let metrics = summarize(&results);
    if metrics.graded == 0 {
        warnings.push("no ground truth available, accuracy not computed".to_string());
    }
    if routes.defaulted > 0 {
        warnings.push(format!(
            "{} answers fell back to the default choice {}",
            routes.defaulted, config.run.default_answer
        ));
    }

    let manifest = SolveRunManifest {
        manifest_version: 1,
        run_id,
        started_at,
        finished_at: now_utc_string(),
        input_path: args.input.display().to_string(),
        output_path: args.output.display().to_string(),
        output_format: format.as_str().to_string(),
        llm_model: config.llm.model.clone(),
        embedding_model: indexes
            .as_ref()
            .map(|indexes| indexes.model.model_id().to_string()),
        route_policy: route_policy.as_str().to_string(),
        questions_loaded,
        questions_skipped: loaded.skipped.len(),
        questions_processed: results.len(),
        checkpoints_written,
        routes,
        metrics: metrics.clone(),
        duration_ms: started.elapsed().as_millis(),
        warnings,
    };
    let manifest_path = sibling_path(&args.output, ".manifest.json");
    write_json_pretty(&manifest_path, &manifest)?;

    info!(
        path = %args.output.display(),
        manifest = %manifest_path.display(),
        total = metrics.total,
        graded = metrics.graded,
        correct = metrics.correct,
        errors = metrics.errors,
        accuracy_pct = %format!("{:.2}", metrics.accuracy_pct),
        macro_f1 = %format!("{:.4}", metrics.macro_f1),
        "solve run completed"
    );

    Ok(())
}

pub(crate) struct BatchSink<'a> {
    pub path: &'a Path,
    pub format: OutputFormat,
    pub checkpoint_every: usize,
}

#[derive(Debug)]
pub(crate) struct BatchReport {
    pub results: Vec<ResultRecord>,
    pub routes: RouteCounts,
    pub checkpoints_written: usize,
}

/// Runs every question through the workflow in order. Per-question failures
/// become error rows; a fatal-init error aborts with the last checkpoint
/// left on disk. The output is rewritten every `checkpoint_every` rows and
/// once more at the end.
pub(crate) fn solve_batch(
    workflow: &Workflow<'_>,
    questions: Vec<QuestionRecord>,
    sink: &BatchSink<'_>,
) -> Result<BatchReport> {
    let total = questions.len();
    let checkpoint_every = sink.checkpoint_every.max(1);
    let mut results = Vec::<ResultRecord>::with_capacity(total);
    let mut routes = RouteCounts::default();
    let mut checkpoints_written = 0usize;

    for (index, question) in questions.into_iter().enumerate() {
        let question_started = Instant::now();
        let record = match workflow.run(question.clone()) {
            Ok(outcome) => {
                debug!(
                    question_id = %question.id,
                    state_version = outcome.state.version(),
                    route_decision = ?outcome.state.route_decision(),
                    queries = ?outcome.state.optimized_queries(),
                    candidates = ?outcome.state.retrieval().map(|update| update.candidates),
                    recovered = outcome.recovered(),
                    path = ?outcome.path,
                    "workflow finished"
                );
                result_from_outcome(&question, &outcome, question_started.elapsed().as_secs_f64())
            }
            Err(err) => {
                if is_fatal(&err) {
                    return Err(err.context(format!("aborting run at question {}", question.id)));
                }
                warn!(question_id = %question.id, error = %format!("{err:#}"), "question failed");
                ResultRecord::failed(
                    &question,
                    format!("{err:#}"),
                    question_started.elapsed().as_secs_f64(),
                )
            }
        };

        tally(&mut routes, &record);
        info!(
            question_id = %record.id,
            done = index + 1,
            total,
            latency_secs = record.latency,
            predicted = %record.predicted_answer,
            route = %record.route,
            "question finished"
        );
        results.push(record);

        if results.len() % checkpoint_every == 0 {
            write_results(sink.path, sink.format, &results)?;
            checkpoints_written += 1;
            info!(rows = results.len(), path = %sink.path.display(), "checkpoint written");
        }
    }

    write_results(sink.path, sink.format, &results)?;

    Ok(BatchReport {
        results,
        routes,
        checkpoints_written,
    })
}

fn policy_for(mode: RouteMode) -> RoutePolicy {
    match mode {
        RouteMode::Auto => RoutePolicy::Auto,
        RouteMode::Always => RoutePolicy::Always,
        RouteMode::Never => RoutePolicy::Never,
    }
}

pub(crate) fn is_fatal(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<PipelineError>())
        .any(PipelineError::is_fatal)
}

pub(crate) fn result_from_outcome(
    question: &QuestionRecord,
    outcome: &WorkflowOutcome,
    latency: f64,
) -> ResultRecord {
    let state = &outcome.state;
    let predicted_answer = state
        .final_answer()
        .unwrap_or_else(|| NO_ANSWER.to_string());
    let recovery = state.recovery();

    ResultRecord {
        id: question.id.clone(),
        is_correct: question
            .answer
            .map(|answer| answer.to_string() == predicted_answer),
        predicted_answer,
        full_response: state.full_response().unwrap_or_default().to_string(),
        latency,
        ground_truth: question.answer,
        needs_knowledge: state.needs_knowledge(),
        route: state
            .route()
            .map(|route| route.as_str().to_string())
            .unwrap_or_default(),
        recovered: recovery.is_some(),
        defaulted: recovery.is_some_and(|update| update.defaulted),
        error: None,
    }
}

fn tally(routes: &mut RouteCounts, record: &ResultRecord) {
    if record.error.is_some() {
        routes.errors += 1;
        return;
    }
    match record.needs_knowledge {
        Some(true) => routes.with_retrieval += 1,
        _ => routes.without_retrieval += 1,
    }
    if record.recovered {
        routes.recovered += 1;
    }
    if record.defaulted {
        routes.defaulted += 1;
    }
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;

    use super::*;
    use crate::commands::results::read_results;
    use crate::config::GenerationConfig;
    use crate::llm::{ChatMessage, ChatModel, GenerationParams};

    struct Script(Vec<&'static str>, std::sync::Mutex<usize>);

    impl ChatModel for Script {
        fn complete(&self, _messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
            let mut next = self.1.lock().expect("lock");
            let reply = self.0.get(*next).copied().unwrap_or_default();
            *next += 1;
            Ok(reply.to_string())
        }
    }

    fn question(answer: Option<u8>) -> QuestionRecord {
        QuestionRecord {
            id: "q9".to_string(),
            paragraph: "지문".to_string(),
            question: "옳은 것은?".to_string(),
            choices: vec!["가".to_string(), "나".to_string()],
            answer,
        }
    }

    #[test]
    fn outcome_becomes_graded_result_row() {
        let llm = Script(vec!["GENERAL", "풀이 끝", "2"], std::sync::Mutex::new(0));
        let mut config = AppConfig::default();
        config.run.route = RoutePolicy::Auto;
        let workflow =
            Workflow::new(&llm, None, config.generation.clone(), config.run.clone()).expect("workflow");
        let outcome = workflow.run(question(Some(2))).expect("run");

        let record = result_from_outcome(&question(Some(2)), &outcome, 0.1);
        assert_eq!(record.predicted_answer, "2");
        assert_eq!(record.is_correct, Some(true));
        assert_eq!(record.route, "direct");
        assert!(record.recovered);
        assert!(!record.defaulted);

        let mut routes = RouteCounts::default();
        tally(&mut routes, &record);
        tally(&mut routes, &ResultRecord::failed(&question(None), "boom".to_string(), 0.0));
        assert_eq!(routes.without_retrieval, 1);
        assert_eq!(routes.recovered, 1);
        assert_eq!(routes.errors, 1);
    }

    #[test]
    fn only_init_failures_abort_the_run() {
        let fatal = anyhow!(PipelineError::fatal_init("corpus missing")).context("building indexes");
        let transient = anyhow!(PipelineError::transient("llm", "timeout")).context("solver call failed");
        assert!(is_fatal(&fatal));
        assert!(!is_fatal(&transient));
        assert!(!is_fatal(&anyhow!("plain failure")));
    }

    /// Answers "2" unless the question text asks it to fail.
    struct BatchChat;

    impl ChatModel for BatchChat {
        fn complete(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
            let prompt = messages
                .last()
                .map(|message| message.content.as_str())
                .unwrap_or_default();
            if prompt.contains("서버 고장") {
                anyhow::bail!(PipelineError::transient("llm", "HTTP 503"));
            }
            if prompt.contains("서버 중단") {
                anyhow::bail!(PipelineError::fatal_init("llm server unreachable"));
            }
            Ok("풀이를 마쳤다.\n{\"정답\": \"2\"}".to_string())
        }
    }

    fn batch(texts: &[&str]) -> Vec<QuestionRecord> {
        texts
            .iter()
            .enumerate()
            .map(|(index, text)| QuestionRecord {
                id: format!("q{index}"),
                paragraph: "지문".to_string(),
                question: text.to_string(),
                choices: vec!["가".to_string(), "나".to_string()],
                answer: Some(2),
            })
            .collect()
    }

    fn direct_workflow(llm: &BatchChat) -> Workflow<'_> {
        let mut config = AppConfig::default();
        config.run.route = RoutePolicy::Never;
        Workflow::new(llm, None, GenerationConfig::default(), config.run).expect("workflow")
    }

    #[test]
    fn batch_checkpoints_and_keeps_going_after_a_failed_question() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("results.csv");
        let mut texts = vec!["옳은 것은?"; 12];
        texts[3] = "서버 고장 문항";

        let llm = BatchChat;
        let workflow = direct_workflow(&llm);
        let report = solve_batch(
            &workflow,
            batch(&texts),
            &BatchSink {
                path: &output,
                format: OutputFormat::Csv,
                checkpoint_every: 5,
            },
        )
        .expect("batch");

        assert_eq!(report.checkpoints_written, 2);
        assert_eq!(report.results.len(), 12);
        assert_eq!(report.routes.errors, 1);
        assert_eq!(report.routes.without_retrieval, 11);

        let written = read_results(&output).expect("results");
        assert_eq!(written.len(), 12);
        assert_eq!(written[3].predicted_answer, "ERROR");
        assert!(written[3].error.is_some());
        assert_eq!(written[4].predicted_answer, "2");
        assert_eq!(written[11].is_correct, Some(true));
    }

    #[test]
    fn fatal_error_aborts_with_last_checkpoint_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output = dir.path().join("results.csv");
        let mut texts = vec!["옳은 것은?"; 8];
        texts[6] = "서버 중단 문항";

        let llm = BatchChat;
        let workflow = direct_workflow(&llm);
        let err = solve_batch(
            &workflow,
            batch(&texts),
            &BatchSink {
                path: &output,
                format: OutputFormat::Csv,
                checkpoint_every: 5,
            },
        )
        .expect_err("fatal error aborts");

        assert!(is_fatal(&err));
        assert!(format!("{err:#}").contains("aborting run at question q6"));
        assert_eq!(read_results(&output).expect("checkpoint").len(), 5);
    }
}
