use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use rubric::{
    grade::ProbeStatus,
    probe::{Probe, ProbeError, run_probe},
    submission::Artifact,
};

fn compile(source: &str) -> Probe {
    Probe::compile(source).expect("compile probe")
}

fn no_artifacts() -> BTreeMap<String, Artifact> {
    BTreeMap::new()
}

fn doubling_artifacts(body: &str) -> BTreeMap<String, Artifact> {
    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        "double".to_string(),
        Artifact::Functions(format!("fn double(x) {{ {body} }}")),
    );
    artifacts
}

#[test]
fn map_result_is_accepted_verbatim() {
    let probe = compile(r#"fn probe(submission) { #{ score: 0.5, feedback: "partial" } }"#);
    let outcome = run_probe(&probe, &no_artifacts(), Duration::from_secs(5));

    assert_eq!(outcome.status, ProbeStatus::Ok);
    assert_eq!(outcome.score, 0.5);
    assert_eq!(outcome.feedback, "partial");
}

#[test]
fn bool_result_maps_to_full_or_zero_credit() {
    let passing = compile("fn probe(submission) { true }");
    let outcome = run_probe(&passing, &no_artifacts(), Duration::from_secs(5));
    assert_eq!(outcome.status, ProbeStatus::Ok);
    assert_eq!(outcome.score, 1.0);

    let failing = compile("fn probe(submission) { false }");
    let outcome = run_probe(&failing, &no_artifacts(), Duration::from_secs(5));
    assert_eq!(outcome.status, ProbeStatus::Ok);
    assert_eq!(outcome.score, 0.0);
}

#[test]
fn numeric_result_is_taken_as_partial_credit() {
    let probe = compile("fn probe(submission) { 0.3 }");
    let outcome = run_probe(&probe, &no_artifacts(), Duration::from_secs(5));

    assert_eq!(outcome.status, ProbeStatus::Ok);
    assert_eq!(outcome.score, 0.3);
}

#[test]
fn scores_clamp_into_unit_interval() {
    let over = compile(r#"fn probe(submission) { #{ score: 3.5 } }"#);
    let outcome = run_probe(&over, &no_artifacts(), Duration::from_secs(5));
    assert_eq!(outcome.score, 1.0);

    let under = compile(r#"fn probe(submission) { #{ score: -2.0 } }"#);
    let outcome = run_probe(&under, &no_artifacts(), Duration::from_secs(5));
    assert_eq!(outcome.score, 0.0);
}

#[test]
fn unrecognized_shape_is_an_error_outcome() {
    let probe = compile(r#"fn probe(submission) { "looks good to me" }"#);
    let outcome = run_probe(&probe, &no_artifacts(), Duration::from_secs(5));

    assert_eq!(outcome.status, ProbeStatus::Error);
    assert_eq!(outcome.score, 0.0);
    assert!(outcome.feedback.contains("invalid result shape"), "{}", outcome.feedback);
}

#[test]
fn map_without_score_is_an_error_outcome() {
    let probe = compile(r#"fn probe(submission) { #{ feedback: "no score here" } }"#);
    let outcome = run_probe(&probe, &no_artifacts(), Duration::from_secs(5));

    assert_eq!(outcome.status, ProbeStatus::Error);
    assert_eq!(outcome.score, 0.0);
}

#[test]
fn raised_failure_is_an_error_outcome() {
    let probe = compile(r#"fn probe(submission) { throw "boom" }"#);
    let outcome = run_probe(&probe, &no_artifacts(), Duration::from_secs(5));

    assert_eq!(outcome.status, ProbeStatus::Error);
    assert_eq!(outcome.score, 0.0);
    assert!(outcome.feedback.starts_with("error:"), "{}", outcome.feedback);
}

#[test]
fn runaway_probe_times_out_within_the_limit() {
    let probe = compile("fn probe(submission) { loop { } }");

    let started = Instant::now();
    let outcome = run_probe(&probe, &no_artifacts(), Duration::from_secs(1));
    let elapsed = started.elapsed();

    assert_eq!(outcome.status, ProbeStatus::Timeout);
    assert_eq!(outcome.score, 0.0);
    assert_eq!(outcome.feedback, "timeout");
    assert!(elapsed < Duration::from_secs(3), "took {elapsed:?}");
}

#[test]
fn probe_can_call_a_function_artifact() {
    let probe = compile(
        r#"
        fn probe(submission) {
            let double = submission["double"];
            if double.call(2) == 4 && double.call(-3) == -6 {
                #{ score: 1.0, feedback: "doubles correctly" }
            } else {
                #{ score: 0.0, feedback: "does not double" }
            }
        }
        "#,
    );

    let outcome = run_probe(&probe, &doubling_artifacts("x * 2"), Duration::from_secs(5));
    assert_eq!(outcome.status, ProbeStatus::Ok);
    assert_eq!(outcome.score, 1.0);

    let outcome = run_probe(&probe, &doubling_artifacts("x + 2"), Duration::from_secs(5));
    assert_eq!(outcome.status, ProbeStatus::Ok);
    assert_eq!(outcome.score, 0.0);
    assert_eq!(outcome.feedback, "does not double");
}

#[test]
fn value_artifacts_are_visible_to_the_probe() {
    let probe = compile(
        r#"
        fn probe(submission) {
            let xs = submission["numbers"];
            if xs.len() == 3 && xs[0] == 1 { true } else { false }
        }
        "#,
    );

    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        "numbers".to_string(),
        Artifact::Value(serde_json::json!([1, 2, 3])),
    );
    let outcome = run_probe(&probe, &artifacts, Duration::from_secs(5));
    assert_eq!(outcome.score, 1.0);
}

#[test]
fn unparseable_function_artifact_is_an_error_outcome() {
    let probe = compile("fn probe(submission) { true }");
    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        "broken".to_string(),
        Artifact::Functions("fn broken( {".to_string()),
    );

    let outcome = run_probe(&probe, &artifacts, Duration::from_secs(5));
    assert_eq!(outcome.status, ProbeStatus::Error);
    assert!(outcome.feedback.contains("invalid artifact `broken`"), "{}", outcome.feedback);
}

#[test]
fn compile_rejects_scripts_without_an_entry_point() {
    let err = Probe::compile("fn helper(x) { x }").expect_err("should be rejected");
    assert!(matches!(err, ProbeError::MissingEntryPoint));
}

#[test]
fn compile_rejects_unparseable_source() {
    let err = Probe::compile("fn probe(submission { oops").expect_err("should be rejected");
    assert!(matches!(err, ProbeError::Parse(_)));
}
