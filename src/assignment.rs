#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use typed_builder::TypedBuilder;

use crate::{config, storage::ProbeHandle};

/// Grading policy knobs attached to an [`Assignment`].
#[derive(Serialize, Deserialize, TypedBuilder, Clone, Debug, PartialEq)]
#[builder(field_defaults(default))]
pub struct AssignmentSettings {
    /// Whether submissions after the deadline are accepted.
    #[builder(default = true)]
    pub allow_late:      bool,
    /// The submission deadline, if the assignment has one.
    #[serde(with = "time::serde::rfc3339::option")]
    pub deadline:        Option<OffsetDateTime>,
    /// Per-probe time limit in seconds.
    #[builder(default = config::default_time_limit().as_secs())]
    pub time_limit_secs: u64,
    /// Whether probes may award fractional credit (scores are clamped to
    /// `[0, 1]` either way; binary grading is a probe that only returns 0
    /// or 1).
    #[builder(default = true)]
    pub partial_credit:  bool,
    /// Cap on submission attempts per student, if any.
    pub max_attempts:    Option<u32>,
}

impl Default for AssignmentSettings {
    fn default() -> Self {
        Self {
            allow_late:      true,
            deadline:        None,
            time_limit_secs: config::default_time_limit().as_secs(),
            partial_credit:  true,
            max_attempts:    None,
        }
    }
}

/// One instructor-authored test unit within an assignment.
///
/// The probe body itself is stored as an executable artifact behind
/// `probe`; editing the body means replacing the test case.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TestCase {
    /// Identifier, unique within the owning assignment.
    pub id:          String,
    /// Handle to the persisted probe artifact.
    pub probe:       ProbeHandle,
    /// Point weight awarded for a fully passing probe.
    pub weight:      f64,
    /// Human-readable description shown in feedback.
    pub description: String,
    /// When the test case was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created:     OffsetDateTime,
}

/// An assignment: an ordered collection of test cases plus grading policy.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Assignment {
    /// Assignment identifier; doubles as the display title.
    pub id:         String,
    /// Display title.
    pub title:      String,
    /// Identifier of the owning teacher, if recorded.
    pub owner:      Option<String>,
    /// Ordered test cases; weights sum to the assignment's max score.
    pub test_cases: Vec<TestCase>,
    /// Grading policy.
    pub settings:   AssignmentSettings,
    /// When the assignment was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created:    OffsetDateTime,
}

impl Assignment {
    /// Creates an empty assignment. The title doubles as the identifier.
    pub fn new(title: impl Into<String>, settings: AssignmentSettings) -> Self {
        let title = title.into();
        Self {
            id: title.clone(),
            title,
            owner: None,
            test_cases: Vec::new(),
            settings,
            created: OffsetDateTime::now_utc(),
        }
    }

    /// The maximum attainable score: the sum of all test case weights.
    pub fn max_score(&self) -> f64 {
        self.test_cases.iter().map(|tc| tc.weight).sum()
    }

    /// Looks up a test case by identifier.
    pub fn test_case(&self, test_case_id: &str) -> Option<&TestCase> {
        self.test_cases.iter().find(|tc| tc.id == test_case_id)
    }

    /// Inserts a test case, replacing any existing one with the same
    /// identifier (replacement is how probe bodies are edited).
    pub fn upsert_test_case(&mut self, test_case: TestCase) {
        match self.test_cases.iter_mut().find(|tc| tc.id == test_case.id) {
            Some(existing) => *existing = test_case,
            None => self.test_cases.push(test_case),
        }
    }

    /// Removes a test case by identifier. Returns the removed entry, if any.
    pub fn remove_test_case(&mut self, test_case_id: &str) -> Option<TestCase> {
        let index = self.test_cases.iter().position(|tc| tc.id == test_case_id)?;
        Some(self.test_cases.remove(index))
    }
}
