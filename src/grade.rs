#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::fmt::Display;

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Panel, Style, Width, object::Rows},
};
use time::OffsetDateTime;

use crate::{assignment::TestCase, probe::ProbeOutcome, submission::Submission};

/// How a probe run concluded.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    /// The probe returned an accepted result shape.
    Ok,
    /// The probe raised, returned an unrecognized shape, or could not run.
    Error,
    /// The probe exceeded its time limit and was cancelled.
    Timeout,
}

impl Display for ProbeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeStatus::Ok => write!(f, "OK"),
            ProbeStatus::Error => write!(f, "ERROR"),
            ProbeStatus::Timeout => write!(f, "TIMEOUT"),
        }
    }
}

/// The graded outcome of one test case within a submission's grade.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct TestOutcome {
    /// Identifier of the test case this outcome belongs to.
    pub test_case_id: String,
    /// Description carried over from the test case for reporting.
    pub description:  String,
    /// Raw probe score in `[0, 1]`.
    pub score:        f64,
    /// The test case's point weight.
    pub weight:       f64,
    /// Weight-scaled contribution to the total (`score * weight`).
    pub points:       f64,
    /// Feedback text from the probe run.
    pub feedback:     String,
    /// How the probe run concluded.
    pub status:       ProbeStatus,
    /// Whether the test passed outright (full score, no fault).
    pub passed:       bool,
}

/// The aggregated, persisted outcome of grading one submission.
///
/// A grade is 1:1 with its submission and immutable unless the submission
/// is explicitly re-graded.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Grade {
    /// Identifier of the graded submission.
    pub submission_id: String,
    /// Identifier of the submitting student.
    pub student_id:    String,
    /// Identifier of the assignment.
    pub assignment_id: String,
    /// Weighted total score.
    pub total:         f64,
    /// Maximum attainable score (sum of test case weights).
    pub max_score:     f64,
    /// Per-test outcomes, in assignment order.
    pub outcomes:      Vec<TestOutcome>,
    /// When the grade was computed.
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at:   OffsetDateTime,
}

impl Grade {
    /// Total as a percentage of the max score; zero when nothing was graded.
    pub fn percentage(&self) -> f64 {
        if self.max_score > 0.0 {
            self.total / self.max_score * 100.0
        } else {
            0.0
        }
    }
}

impl Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}/{:.2}", self.total, self.max_score)
    }
}

/// Combines per-probe results into a [`Grade`].
///
/// `outcomes` must parallel `test_cases` in order and length; a mismatch is
/// a caller bug and panics. An assignment with no test cases aggregates to
/// `total = 0, max_score = 0`.
pub fn aggregate(
    submission: &Submission,
    test_cases: &[TestCase],
    results: Vec<ProbeOutcome>,
) -> Grade {
    let outcomes: Vec<TestOutcome> = test_cases
        .iter()
        .zip_eq(results)
        .map(|(test_case, result)| TestOutcome {
            test_case_id: test_case.id.clone(),
            description:  test_case.description.clone(),
            score:        result.score,
            weight:       test_case.weight,
            points:       result.score * test_case.weight,
            feedback:     result.feedback,
            status:       result.status,
            passed:       result.status == ProbeStatus::Ok && result.score >= 1.0,
        })
        .collect();

    let total = outcomes.iter().map(|o| o.points).sum();
    let max_score = test_cases.iter().map(|tc| tc.weight).sum();

    Grade {
        submission_id: submission.id.clone(),
        student_id: submission.student_id.clone(),
        assignment_id: submission.assignment_id.clone(),
        total,
        max_score,
        outcomes,
        computed_at: OffsetDateTime::now_utc(),
    }
}

/// One rendered row of the grade report table.
#[derive(Tabled)]
struct OutcomeRow {
    /// Test case identifier.
    #[tabled(rename = "Test")]
    test:     String,
    /// Weighted points, as `earned/weight`.
    #[tabled(rename = "Points")]
    points:   String,
    /// Probe status tag.
    #[tabled(rename = "Status")]
    status:   String,
    /// Probe feedback text.
    #[tabled(rename = "Feedback")]
    feedback: String,
}

/// Renders a grade as a report table for terminal display.
pub fn report_table(grade: &Grade) -> String {
    let rows: Vec<OutcomeRow> = grade
        .outcomes
        .iter()
        .map(|o| OutcomeRow {
            test:     o.test_case_id.clone(),
            points:   format!("{:.2}/{:.2}", o.points, o.weight),
            status:   o.status.to_string(),
            feedback: o.feedback.clone(),
        })
        .collect();

    Table::new(rows)
        .with(Panel::header(format!("Grading Overview: {}", grade.assignment_id)))
        .with(Panel::footer(format!("Total: {:.2}/{:.2}", grade.total, grade.max_score)))
        .with(Modify::new(Rows::new(1..)).with(Width::wrap(40).keep_words(true)))
        .with(
            Modify::new(Rows::first())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(
            Modify::new(Rows::last())
                .with(Alignment::center())
                .with(Alignment::center_vertical()),
        )
        .with(Style::modern())
        .to_string()
}
