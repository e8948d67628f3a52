use std::{
    collections::BTreeMap,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use rubric::{
    assignment::AssignmentSettings,
    grade::ProbeStatus,
    grader::{Grader, GraderError},
    storage::{LocalRepository, Repository},
    submission::{Artifact, SubmissionStatus},
};
use tempfile::TempDir;
use time::OffsetDateTime;

const DOUBLING_PROBE: &str = r#"
fn probe(submission) {
    let double = submission["double"];
    if double.call(2) == 4 && double.call(-3) == -6 {
        #{ score: 1.0 }
    } else {
        #{ score: 0.0, feedback: "function does not double its input" }
    }
}
"#;

const HALF_CREDIT_PROBE: &str = r#"fn probe(submission) { #{ score: 0.5, feedback: "partial" } }"#;

fn grader() -> (TempDir, Grader) {
    let dir = TempDir::new().expect("create temp dir");
    let repo = LocalRepository::new(dir.path()).expect("create repository");
    (dir, Grader::new(Box::new(repo)))
}

fn doubling_submission(body: &str) -> BTreeMap<String, Artifact> {
    let mut artifacts = BTreeMap::new();
    artifacts.insert(
        "double".to_string(),
        Artifact::Functions(format!("fn double(x) {{ {body} }}")),
    );
    artifacts
}

fn setup_hw1(grader: &Grader) {
    grader
        .create_assignment("HW1", AssignmentSettings::default())
        .expect("create HW1");
    grader
        .add_test_case("HW1", "doubles", DOUBLING_PROBE, 6.0, "doubling function")
        .expect("add test A");
    grader
        .add_test_case("HW1", "effort", HALF_CREDIT_PROBE, 4.0, "always half credit")
        .expect("add test B");
}

#[test]
fn correct_submission_earns_weighted_total() {
    let (_dir, grader) = grader();
    setup_hw1(&grader);

    let grade = grader
        .submit("ada", "HW1", doubling_submission("x * 2"))
        .expect("submit");

    assert_eq!(grade.max_score, 10.0);
    assert_eq!(grade.total, 8.0);
    assert!(grade.outcomes[0].passed);
    assert_eq!(grade.outcomes[0].points, 6.0);
    assert_eq!(grade.outcomes[1].points, 2.0);
}

#[test]
fn incorrect_submission_loses_the_weighted_test() {
    let (_dir, grader) = grader();
    setup_hw1(&grader);

    let grade = grader
        .submit("ada", "HW1", doubling_submission("x + 2"))
        .expect("submit");

    assert_eq!(grade.total, 2.0);
    assert_eq!(grade.max_score, 10.0);
    assert_eq!(grade.outcomes[0].score, 0.0);
    assert!(!grade.outcomes[0].passed);
}

#[test]
fn duplicate_assignment_is_rejected() {
    let (_dir, grader) = grader();
    grader
        .create_assignment("HW1", AssignmentSettings::default())
        .expect("create");

    let err = grader
        .create_assignment("HW1", AssignmentSettings::default())
        .expect_err("duplicate");
    assert!(matches!(err, GraderError::DuplicateAssignment(_)));
}

#[test]
fn test_case_validation_fails_fast() {
    let (_dir, grader) = grader();
    grader
        .create_assignment("HW1", AssignmentSettings::default())
        .expect("create");

    let err = grader
        .add_test_case("HW1", "bad-weight", HALF_CREDIT_PROBE, 0.0, "")
        .expect_err("zero weight");
    assert!(matches!(err, GraderError::InvalidWeight(_)));

    let err = grader
        .add_test_case("HW1", "bad-probe", "fn helper(x) { x }", 1.0, "")
        .expect_err("no entry point");
    assert!(matches!(err, GraderError::InvalidProbe(_)));

    let err = grader
        .add_test_case("HW2", "orphan", HALF_CREDIT_PROBE, 1.0, "")
        .expect_err("missing assignment");
    assert!(matches!(err, GraderError::AssignmentNotFound(_)));
}

#[test]
fn submitting_to_a_missing_assignment_fails() {
    let (_dir, grader) = grader();
    let err = grader
        .submit("ada", "HW9", BTreeMap::new())
        .expect_err("missing assignment");
    assert!(matches!(err, GraderError::AssignmentNotFound(_)));
}

#[test]
fn attempt_limit_blocks_the_second_submission() {
    let (_dir, grader) = grader();
    let settings = AssignmentSettings::builder().max_attempts(Some(1)).build();
    grader.create_assignment("HW1", settings).expect("create");
    grader
        .add_test_case("HW1", "effort", HALF_CREDIT_PROBE, 4.0, "")
        .expect("add test");

    grader
        .submit("ada", "HW1", BTreeMap::new())
        .expect("first attempt");
    let err = grader
        .submit("ada", "HW1", BTreeMap::new())
        .expect_err("second attempt");
    assert!(matches!(err, GraderError::AttemptLimitExceeded { .. }));

    // The rejected attempt must not have produced a new grade.
    assert_eq!(grader.get_grades("HW1").expect("grades").len(), 1);
}

#[test]
fn late_submissions_are_rejected_when_disallowed() {
    let (_dir, grader) = grader();
    let settings = AssignmentSettings::builder()
        .allow_late(false)
        .deadline(Some(OffsetDateTime::now_utc() - Duration::from_secs(3600)))
        .build();
    grader.create_assignment("HW1", settings).expect("create");

    let err = grader
        .submit("ada", "HW1", BTreeMap::new())
        .expect_err("past deadline");
    assert!(matches!(err, GraderError::LateSubmission { .. }));
}

#[test]
fn late_submissions_pass_when_allowed() {
    let (_dir, grader) = grader();
    let settings = AssignmentSettings::builder()
        .allow_late(true)
        .deadline(Some(OffsetDateTime::now_utc() - Duration::from_secs(3600)))
        .build();
    grader.create_assignment("HW1", settings).expect("create");

    let grade = grader.submit("ada", "HW1", BTreeMap::new()).expect("late but allowed");
    assert_eq!(grade.max_score, 0.0);
}

#[test]
fn runaway_probe_cannot_stall_the_pipeline() {
    let (_dir, grader) = grader();
    let mut settings = AssignmentSettings::default();
    settings.time_limit_secs = 1;
    grader.create_assignment("HW1", settings).expect("create");
    grader
        .add_test_case("HW1", "spins", "fn probe(submission) { loop { } }", 5.0, "")
        .expect("add spinning test");
    grader
        .add_test_case("HW1", "effort", HALF_CREDIT_PROBE, 5.0, "")
        .expect("add half credit test");

    let started = Instant::now();
    let grade = grader
        .submit("ada", "HW1", BTreeMap::new())
        .expect("submit");
    let elapsed = started.elapsed();

    assert_eq!(grade.outcomes[0].status, ProbeStatus::Timeout);
    assert_eq!(grade.outcomes[0].points, 0.0);
    assert_eq!(grade.total, 2.5);
    assert!(elapsed < Duration::from_secs(4), "took {elapsed:?}");
}

#[test]
fn attempts_increase_across_sequential_submissions() {
    let (dir, grader) = grader();
    setup_hw1(&grader);

    for _ in 0..3 {
        grader
            .submit("ada", "HW1", doubling_submission("x * 2"))
            .expect("submit");
    }

    let inspect = LocalRepository::new(dir.path()).expect("inspect repository");
    let submissions = inspect.load_submissions("ada", "HW1").expect("load");
    let attempts: Vec<u32> = submissions.iter().map(|s| s.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
    assert!(submissions.iter().all(|s| s.status == SubmissionStatus::Graded));
}

#[test]
fn concurrent_submissions_never_reuse_attempt_numbers() {
    let (dir, grader) = grader();
    setup_hw1(&grader);
    let grader = Arc::new(grader);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let grader = Arc::clone(&grader);
            thread::spawn(move || {
                grader
                    .submit("ada", "HW1", doubling_submission("x * 2"))
                    .expect("concurrent submit");
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("join submitter");
    }

    let inspect = LocalRepository::new(dir.path()).expect("inspect repository");
    let mut attempts: Vec<u32> = inspect
        .load_submissions("ada", "HW1")
        .expect("load")
        .iter()
        .map(|s| s.attempt)
        .collect();
    attempts.sort_unstable();
    assert_eq!(attempts, vec![1, 2, 3, 4]);
}

#[test]
fn latest_grade_wins_for_a_resubmitting_student() {
    let (_dir, grader) = grader();
    setup_hw1(&grader);

    grader
        .submit("ada", "HW1", doubling_submission("x + 2"))
        .expect("first, wrong");
    grader
        .submit("ada", "HW1", doubling_submission("x * 2"))
        .expect("second, right");

    let grade = grader.get_grade("ada", "HW1").expect("latest grade");
    assert_eq!(grade.total, 8.0);

    let err = grader.get_grade("bob", "HW1").expect_err("no submissions");
    assert!(matches!(err, GraderError::GradeNotFound { .. }));
}

#[test]
fn regrade_recovers_a_submission_without_a_grade() {
    let (dir, grader) = grader();
    setup_hw1(&grader);

    let grade = grader
        .submit("ada", "HW1", doubling_submission("x * 2"))
        .expect("submit");

    // Simulate a crash between the submission write and the grade write.
    let grade_doc = dir
        .path()
        .join("grades")
        .join(format!("{}.json", grade.submission_id));
    std::fs::remove_file(&grade_doc).expect("drop grade document");
    let err = grader.get_grade("ada", "HW1").expect_err("grade is gone");
    assert!(matches!(err, GraderError::GradeNotFound { .. }));

    let recovered = grader.regrade(&grade.submission_id).expect("regrade");
    assert_eq!(recovered.total, 8.0);
    assert_eq!(recovered.submission_id, grade.submission_id);
    assert!(grader.get_grade("ada", "HW1").is_ok());
}

#[test]
fn removing_a_test_case_shrinks_the_max_score() {
    let (_dir, grader) = grader();
    setup_hw1(&grader);

    grader.remove_test_case("HW1", "effort").expect("remove");
    let grade = grader
        .submit("ada", "HW1", doubling_submission("x * 2"))
        .expect("submit");
    assert_eq!(grade.max_score, 6.0);
    assert_eq!(grade.total, 6.0);

    let err = grader
        .remove_test_case("HW1", "effort")
        .expect_err("already removed");
    assert!(matches!(err, GraderError::TestCaseNotFound { .. }));
}

#[test]
fn deleting_an_assignment_is_explicit_and_final() {
    let (_dir, grader) = grader();
    setup_hw1(&grader);

    grader.delete_assignment("HW1").expect("delete");
    let err = grader
        .submit("ada", "HW1", BTreeMap::new())
        .expect_err("deleted assignment");
    assert!(matches!(err, GraderError::AssignmentNotFound(_)));
}

#[test]
fn corrupt_probe_marks_the_submission_grade_failed() {
    let (dir, grader) = grader();
    grader
        .create_assignment("HW1", AssignmentSettings::default())
        .expect("create");
    grader
        .add_test_case("HW1", "doubles", DOUBLING_PROBE, 6.0, "")
        .expect("add test");

    // Corrupt the stored probe artifact behind the repository's back.
    let probes_dir = dir.path().join("probes");
    let probe_file = std::fs::read_dir(&probes_dir)
        .expect("read probes dir")
        .filter_map(Result::ok)
        .next()
        .expect("one probe artifact");
    std::fs::write(probe_file.path(), "fn helper(x) { x }").expect("overwrite probe");

    let err = grader
        .submit("ada", "HW1", doubling_submission("x * 2"))
        .expect_err("unusable probe");
    assert!(matches!(err, GraderError::CorruptProbe { .. }));

    let inspect = LocalRepository::new(dir.path()).expect("inspect repository");
    let submissions = inspect.load_submissions("ada", "HW1").expect("load");
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].status, SubmissionStatus::GradeFailed);
}
