mod common;

use common::{
    answer, answer_rows, company_records, industry, industry_of, numbered_companies, registry,
    requested, single_subject, ScriptedClient,
};
use llm_enrich::cache::ResultCache;
use llm_enrich::dispatch::{RetryPolicy, StrategyConfig};
use llm_enrich::error::ProviderError;
use llm_enrich::job::{JobOptions, JobRunner};
use llm_enrich::lm_log::{load_lm_log, LmLog, LmOutcome};
use llm_enrich::record::{merge_outcomes, Outcome, FILL_MARKER, STATUS_COLUMN};
use serde_json::json;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn runner(client: Arc<ScriptedClient>, retry: RetryPolicy) -> JobRunner {
    JobRunner::new(registry(), client).with_options(JobOptions {
        retry,
        ..JobOptions::default()
    })
}

fn strategies() -> Vec<StrategyConfig> {
    vec![
        StrategyConfig::Single,
        StrategyConfig::Batch { batch_size: 3 },
        StrategyConfig::Turbo {
            chunk_size: 2,
            concurrency: 3,
        },
    ]
}

#[test]
fn company_example_enriches_every_row() {
    let client = Arc::new(ScriptedClient::answering());
    let runner = runner(client.clone(), RetryPolicy::none());
    let records = company_records(&["Acme", "Globex", "Initech"]);

    let report = runner
        .run_job(None, records.clone(), &StrategyConfig::default())
        .expect("job");

    assert_eq!(report.summary.success, 3);
    assert_eq!(client.calls(), 1);
    let fields = report.outcomes[1].fields().expect("success");
    assert_eq!(fields["industry"], json!("industry of Globex"));
    assert_eq!(fields["headquarters"], json!("Globex City"));
    assert_eq!(fields["founded"], json!(1999));

    let schema = runner.registry().active_schema().expect("schema");
    let merged = merge_outcomes(&records, &report.outcomes, schema);
    assert_eq!(merged[2]["industry"], json!("industry of Initech"));
    assert_eq!(merged[2][STATUS_COLUMN], json!("success"));
}

#[test]
fn every_strategy_keeps_results_aligned_with_inputs() {
    let records = numbered_companies(7);
    for strategy in strategies() {
        let client = Arc::new(ScriptedClient::answering());
        let report = runner(client.clone(), RetryPolicy::none())
            .run_job(None, records.clone(), &strategy)
            .expect("job");
        assert_eq!(report.outcomes.len(), records.len(), "{strategy:?}");
        for (row, outcome) in report.outcomes.iter().enumerate() {
            assert_eq!(
                industry(outcome),
                Some(industry_of(&format!("Company{row}"))),
                "{strategy:?} row {row}"
            );
        }
    }
}

#[test]
fn rerun_with_shared_cache_makes_no_calls() {
    let cache = Arc::new(ResultCache::default());
    let records = numbered_companies(5);
    for strategy in strategies() {
        let client = Arc::new(ScriptedClient::answering());
        let first = runner(client.clone(), RetryPolicy::none())
            .with_cache(Arc::clone(&cache))
            .run_job(None, records.clone(), &strategy)
            .expect("first run");
        let calls_after_first = client.calls();

        let second = runner(client.clone(), RetryPolicy::none())
            .with_cache(Arc::clone(&cache))
            .run_job(None, records.clone(), &strategy)
            .expect("second run");

        assert_eq!(client.calls(), calls_after_first, "{strategy:?}");
        assert_eq!(first.outcomes, second.outcomes, "{strategy:?}");
    }
}

#[test]
fn batch_answer_missing_a_position_fails_only_that_row() {
    let client = Arc::new(ScriptedClient::new(|_, prompt| {
        let rows: Vec<_> = requested(prompt)
            .into_iter()
            .filter(|(index, _)| *index != 1)
            .collect();
        Ok(answer_rows(&rows))
    }));
    let report = runner(client, RetryPolicy::none())
        .run_job(
            None,
            company_records(&["Acme", "Globex", "Initech"]),
            &StrategyConfig::Batch { batch_size: 3 },
        )
        .expect("job");

    assert_eq!(industry(&report.outcomes[0]), Some(industry_of("Acme")));
    assert_eq!(industry(&report.outcomes[2]), Some(industry_of("Initech")));
    let Outcome::ParseError { reason, raw_response } = &report.outcomes[1] else {
        panic!("row 1 should be a parse error: {:?}", report.outcomes[1]);
    };
    assert!(reason.contains("position 1"), "{reason}");
    assert!(raw_response.contains("industry of Acme"));
}

#[test]
fn turbo_completion_order_does_not_reorder_results() {
    // The first chunk finishes last.
    let client = Arc::new(ScriptedClient::new(|_, prompt| {
        if requested(prompt).iter().any(|(_, name)| name == "Company0") {
            thread::sleep(Duration::from_millis(150));
        }
        Ok(answer(prompt))
    }));
    let report = runner(client.clone(), RetryPolicy::none())
        .run_job(
            None,
            numbered_companies(6),
            &StrategyConfig::Turbo {
                chunk_size: 2,
                concurrency: 3,
            },
        )
        .expect("job");

    assert_eq!(client.calls(), 3);
    let names: Vec<_> = report.outcomes.iter().map(industry).collect();
    let expected: Vec<_> = (0..6)
        .map(|row| Some(industry_of(&format!("Company{row}"))))
        .collect();
    assert_eq!(names, expected);
}

#[test]
fn retryable_failures_stop_at_the_retry_bound() {
    let client = Arc::new(ScriptedClient::new(|_, _| {
        Err(ProviderError::from_status(503, "overloaded".to_string()))
    }));
    let report = runner(client.clone(), RetryPolicy::immediate(2))
        .run_job(
            None,
            numbered_companies(4),
            &StrategyConfig::Batch { batch_size: 2 },
        )
        .expect("job");

    assert_eq!(client.calls(), 2 * 3);
    assert_eq!(report.summary.provider_error, 4);
    assert!(report
        .outcomes
        .iter()
        .all(|outcome| outcome.raw_response() == Some("overloaded")));
}

#[test]
fn invalid_rows_never_reach_the_prompt() {
    let client = Arc::new(ScriptedClient::answering());
    let records = company_records(&["Acme", "   ", "Initech"]);
    let report = runner(client.clone(), RetryPolicy::none())
        .run_job(None, records, &StrategyConfig::Batch { batch_size: 10 })
        .expect("job");

    assert!(matches!(
        report.outcomes[1],
        Outcome::ValidationError { .. }
    ));
    assert_eq!(report.summary.success, 2);
    let prompts = client.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(requested(&prompts[0]).len(), 2);

    let schema = registry().active_schema().expect("schema").clone();
    let merged = merge_outcomes(
        &company_records(&["Acme", "   ", "Initech"]),
        &report.outcomes,
        &schema,
    );
    assert_eq!(merged[1]["industry"], json!(FILL_MARKER));
}

#[test]
fn cancel_leaves_undispatched_rows_cancelled() {
    let (started, wait_started) = mpsc::channel::<()>();
    let started = Mutex::new(Some(started));
    let client = Arc::new(ScriptedClient::new(move |call, prompt| {
        if call == 0 {
            if let Some(sender) = started.lock().expect("sender").take() {
                let _ = sender.send(());
            }
            thread::sleep(Duration::from_millis(100));
        }
        let name = single_subject(prompt).unwrap_or_default();
        Ok(json!({ "industry": industry_of(&name) }).to_string())
    }));
    let handle = runner(client.clone(), RetryPolicy::none())
        .start_job(None, numbered_companies(5), &StrategyConfig::Single)
        .expect("start");

    wait_started.recv().expect("first call started");
    handle.cancel();
    let report = handle.wait();

    assert!(report.cancelled);
    assert_eq!(report.outcomes.len(), 5);
    assert!(report.outcomes[0].is_success());
    assert!(report.outcomes[1..]
        .iter()
        .all(|outcome| *outcome == Outcome::Cancelled));
    assert_eq!(client.calls(), 1);
}

#[test]
fn lm_log_records_each_attempt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_path = dir.path().join("lm_log.jsonl");
    let client = Arc::new(ScriptedClient::new(|call, prompt| {
        if call == 0 {
            return Err(ProviderError::transient("timeout"));
        }
        Ok(answer(prompt))
    }));
    let report = runner(client, RetryPolicy::immediate(1))
        .with_lm_log(Arc::new(LmLog::open(&log_path).expect("open log")))
        .run_job(
            None,
            numbered_companies(2),
            &StrategyConfig::Batch { batch_size: 2 },
        )
        .expect("job");
    assert_eq!(report.summary.success, 2);

    let entries = load_lm_log(&log_path).expect("load log");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].outcome, LmOutcome::Failed);
    assert_eq!(entries[0].error.as_deref(), Some("timeout"));
    assert_eq!(entries[1].outcome, LmOutcome::Success);
    assert_eq!(entries[1].rows, vec![0, 1]);
    assert_eq!(entries[1].attempt, 2);
}
