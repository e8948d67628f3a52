#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// One submitted value a probe may inspect.
///
/// Plain data travels as JSON; callable slots travel as Rhai source whose
/// top-level functions become invocable inside the probe. Both shapes
/// round-trip losslessly through serialization.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Artifact {
    /// A plain data value (number, string, list, table-like structure).
    Value(serde_json::Value),
    /// Rhai source defining one or more functions; the slot name must match
    /// a function defined here for the probe to call it.
    Functions(String),
}

/// Lifecycle of a submission as it moves through grading. `Graded` and
/// `GradeFailed` are terminal; a failed grading attempt requires a new
/// submission.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Persisted, not yet graded.
    Received,
    /// Probes are running.
    Grading,
    /// A grade was computed and persisted.
    Graded,
    /// Grading could not run (for example a probe artifact failed to load).
    GradeFailed,
}

/// One student submission for one assignment. Submissions are append-only:
/// resubmission creates a new record with the next attempt number.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Submission {
    /// Generated submission identifier.
    pub id:            String,
    /// Identifier of the submitting student.
    pub student_id:    String,
    /// Identifier of the target assignment.
    pub assignment_id: String,
    /// Named artifact slots the probes inspect.
    pub artifacts:     BTreeMap<String, Artifact>,
    /// Attempt number, strictly increasing per (student, assignment) pair.
    pub attempt:       u32,
    /// Where the submission is in its grading lifecycle.
    pub status:        SubmissionStatus,
    /// When the submission was received.
    #[serde(with = "time::serde::rfc3339")]
    pub submitted_at:  OffsetDateTime,
}

impl Submission {
    /// Creates a new `Received` submission with a generated identifier.
    pub fn new(
        student_id: impl Into<String>,
        assignment_id: impl Into<String>,
        artifacts: BTreeMap<String, Artifact>,
        attempt: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            student_id: student_id.into(),
            assignment_id: assignment_id.into(),
            artifacts,
            attempt,
            status: SubmissionStatus::Received,
            submitted_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Role attached to an identity record, scoping what it may do.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May submit work and read their own grades.
    Student,
    /// May create assignments and test cases, and read all grades.
    Teacher,
}

/// A student identity. Students own their submissions.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Student {
    /// Unique student identifier.
    pub id:           String,
    /// Display name.
    pub display_name: String,
}

impl Student {
    /// The role this record carries.
    pub fn role(&self) -> Role {
        Role::Student
    }
}

/// A teacher identity. Teachers own assignments and their test cases.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Teacher {
    /// Unique teacher identifier.
    pub id:           String,
    /// Display name.
    pub display_name: String,
}

impl Teacher {
    /// The role this record carries.
    pub fn role(&self) -> Role {
        Role::Teacher
    }
}
