#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{collections::BTreeMap, sync::Mutex, time::Duration};

use time::OffsetDateTime;

use crate::{
    assignment::{Assignment, AssignmentSettings, TestCase},
    grade::{Grade, aggregate},
    probe::{Probe, ProbeError, run_probe},
    storage::{ConfigError, Repository, StorageConfig, StorageError, make_repository},
    submission::{Artifact, Submission, SubmissionStatus},
};

/// Failures surfaced by [`Grader`] operations.
///
/// Validation errors are never retried automatically; the caller must
/// correct its input. Storage faults pass through unchanged.
#[derive(thiserror::Error, Debug)]
pub enum GraderError {
    /// An assignment with the same identifier already exists.
    #[error("Assignment `{0}` already exists")]
    DuplicateAssignment(String),
    /// The referenced assignment does not exist.
    #[error("Assignment `{0}` was not found")]
    AssignmentNotFound(String),
    /// The referenced test case does not exist within the assignment.
    #[error("Test case `{test_case_id}` was not found in assignment `{assignment_id}`")]
    TestCaseNotFound {
        /// The assignment searched.
        assignment_id: String,
        /// The missing test case.
        test_case_id:  String,
    },
    /// Test case weights must be positive.
    #[error("Test case weight must be a positive number, got {0}")]
    InvalidWeight(f64),
    /// The student has used up every allowed attempt.
    #[error("Attempt limit of {limit} reached for student `{student_id}` on `{assignment_id}`")]
    AttemptLimitExceeded {
        /// The submitting student.
        student_id:    String,
        /// The capped assignment.
        assignment_id: String,
        /// The configured cap.
        limit:         u32,
    },
    /// The assignment's deadline has passed and late work is disallowed.
    #[error("Assignment `{assignment_id}` stopped accepting submissions at {deadline}")]
    LateSubmission {
        /// The closed assignment.
        assignment_id: String,
        /// When it closed.
        deadline:      OffsetDateTime,
    },
    /// No grade is recorded for the student on this assignment.
    #[error("No grade recorded for student `{student_id}` on `{assignment_id}`")]
    GradeNotFound {
        /// The student queried.
        student_id:    String,
        /// The assignment queried.
        assignment_id: String,
    },
    /// Probe source submitted at authoring time failed validation.
    #[error("Probe script rejected: {0}")]
    InvalidProbe(#[from] ProbeError),
    /// A stored probe artifact could not be loaded back into runnable form.
    #[error("Probe for test case `{test_case_id}` could not be loaded: {source}")]
    CorruptProbe {
        /// The test case whose artifact failed to load.
        test_case_id: String,
        /// Why compilation of the stored artifact failed.
        #[source]
        source:       ProbeError,
    },
    /// Storage adapter selection failed.
    #[error(transparent)]
    Configuration(#[from] ConfigError),
    /// A storage operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The grading orchestrator: the single mutation point for the domain
/// model and the only surface front-end clients call.
///
/// Each `submit` runs independently; the orchestrator keeps no grading
/// state in memory beyond what the repository provides. Attempt-number
/// allocation for concurrent submissions is serialized internally.
pub struct Grader {
    /// The active storage backend, behind the shared interface.
    repo:         Box<dyn Repository>,
    /// Critical section for attempt-number allocation.
    attempt_lock: Mutex<()>,
}

impl Grader {
    /// Creates an orchestrator over an already constructed repository.
    pub fn new(repo: Box<dyn Repository>) -> Self {
        Self {
            repo,
            attempt_lock: Mutex::new(()),
        }
    }

    /// Creates an orchestrator from environment configuration.
    pub fn from_env() -> Result<Self, GraderError> {
        let config = StorageConfig::from_env()?;
        Ok(Self::new(make_repository(&config)?))
    }

    /// Creates a new assignment. The title doubles as its identifier.
    pub fn create_assignment(
        &self,
        title: &str,
        settings: AssignmentSettings,
    ) -> Result<Assignment, GraderError> {
        match self.repo.load_assignment(title) {
            Ok(_) => return Err(GraderError::DuplicateAssignment(title.to_string())),
            Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let assignment = Assignment::new(title, settings);
        self.repo.save_assignment(&assignment)?;
        tracing::info!(assignment = %assignment.id, "created assignment");
        Ok(assignment)
    }

    /// Adds a test case to an assignment, persisting its probe source as an
    /// executable artifact. An existing test case with the same name is
    /// replaced.
    pub fn add_test_case(
        &self,
        assignment_id: &str,
        name: &str,
        probe_source: &str,
        weight: f64,
        description: &str,
    ) -> Result<TestCase, GraderError> {
        let mut assignment = self.load_assignment(assignment_id)?;

        if !(weight > 0.0 && weight.is_finite()) {
            return Err(GraderError::InvalidWeight(weight));
        }
        // Reject unrunnable probes before anything is persisted.
        Probe::compile(probe_source)?;

        let handle = self.repo.save_probe(name, probe_source)?;
        let test_case = TestCase {
            id: name.to_string(),
            probe: handle,
            weight,
            description: description.to_string(),
            created: OffsetDateTime::now_utc(),
        };
        assignment.upsert_test_case(test_case.clone());
        self.repo.save_assignment(&assignment)?;
        tracing::info!(assignment = %assignment_id, test_case = %name, weight, "added test case");
        Ok(test_case)
    }

    /// Removes a test case from an assignment.
    pub fn remove_test_case(
        &self,
        assignment_id: &str,
        test_case_id: &str,
    ) -> Result<(), GraderError> {
        let mut assignment = self.load_assignment(assignment_id)?;
        if assignment.remove_test_case(test_case_id).is_none() {
            return Err(GraderError::TestCaseNotFound {
                assignment_id: assignment_id.to_string(),
                test_case_id:  test_case_id.to_string(),
            });
        }
        self.repo.save_assignment(&assignment)?;
        Ok(())
    }

    /// Deletes an assignment. Explicit administrative operation; submissions
    /// and grades already recorded against it are left in place.
    pub fn delete_assignment(&self, assignment_id: &str) -> Result<(), GraderError> {
        match self.repo.delete_assignment(assignment_id) {
            Ok(()) => Ok(()),
            Err(StorageError::NotFound { .. }) => {
                Err(GraderError::AssignmentNotFound(assignment_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Accepts and grades a submission, returning its grade.
    ///
    /// The submission is persisted first, then graded; if the process dies
    /// between the two writes the submission exists without a grade and can
    /// be recovered with [`Grader::regrade`].
    pub fn submit(
        &self,
        student_id: &str,
        assignment_id: &str,
        artifacts: BTreeMap<String, Artifact>,
    ) -> Result<Grade, GraderError> {
        let assignment = self.load_assignment(assignment_id)?;

        if !assignment.settings.allow_late
            && let Some(deadline) = assignment.settings.deadline
            && OffsetDateTime::now_utc() > deadline
        {
            return Err(GraderError::LateSubmission {
                assignment_id: assignment_id.to_string(),
                deadline,
            });
        }

        // Attempt numbers are allocated and persisted under the lock so
        // concurrent submissions for the same pair stay strictly increasing.
        let submission = {
            let _guard = self.attempt_lock.lock().expect("attempt lock poisoned");
            let prior = self.repo.load_submissions(student_id, assignment_id)?;

            if let Some(limit) = assignment.settings.max_attempts
                && prior.len() as u32 >= limit
            {
                return Err(GraderError::AttemptLimitExceeded {
                    student_id: student_id.to_string(),
                    assignment_id: assignment_id.to_string(),
                    limit,
                });
            }

            let attempt = prior.last().map(|s| s.attempt).unwrap_or(0) + 1;
            let submission = Submission::new(student_id, assignment_id, artifacts, attempt);
            self.repo.save_submission(&submission)?;
            submission
        };

        tracing::info!(
            student = %student_id,
            assignment = %assignment_id,
            attempt = submission.attempt,
            "received submission"
        );
        self.run_grading(&assignment, submission)
    }

    /// Re-runs grading for an already persisted submission.
    ///
    /// This is the operator action for submissions left without a grade by
    /// a crash between the submission write and the grade write.
    pub fn regrade(&self, submission_id: &str) -> Result<Grade, GraderError> {
        let submission = self.repo.load_submission(submission_id)?;
        let assignment = self.load_assignment(&submission.assignment_id)?;
        self.run_grading(&assignment, submission)
    }

    /// Returns every grade recorded for an assignment.
    pub fn get_grades(&self, assignment_id: &str) -> Result<Vec<Grade>, GraderError> {
        self.load_assignment(assignment_id)?;
        Ok(self.repo.load_grades(assignment_id)?)
    }

    /// Returns the grade of a student's latest graded attempt.
    pub fn get_grade(&self, student_id: &str, assignment_id: &str) -> Result<Grade, GraderError> {
        let not_found = || GraderError::GradeNotFound {
            student_id:    student_id.to_string(),
            assignment_id: assignment_id.to_string(),
        };

        let submissions = self.repo.load_submissions(student_id, assignment_id)?;
        let latest = submissions.last().ok_or_else(not_found)?;
        match self.repo.load_grade(&latest.id) {
            Ok(grade) => Ok(grade),
            Err(StorageError::NotFound { .. }) => Err(not_found()),
            Err(e) => Err(e.into()),
        }
    }

    /// Loads an assignment, mapping a missing entity to
    /// [`GraderError::AssignmentNotFound`].
    fn load_assignment(&self, assignment_id: &str) -> Result<Assignment, GraderError> {
        match self.repo.load_assignment(assignment_id) {
            Ok(assignment) => Ok(assignment),
            Err(StorageError::NotFound { .. }) => {
                Err(GraderError::AssignmentNotFound(assignment_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Runs every probe, aggregates, and persists the grade, moving the
    /// submission through its lifecycle states.
    fn run_grading(
        &self,
        assignment: &Assignment,
        mut submission: Submission,
    ) -> Result<Grade, GraderError> {
        submission.status = SubmissionStatus::Grading;
        self.repo.save_submission(&submission)?;

        let time_limit = Duration::from_secs(assignment.settings.time_limit_secs);
        let mut results = Vec::with_capacity(assignment.test_cases.len());
        for test_case in &assignment.test_cases {
            let probe = match self.load_compiled_probe(test_case) {
                Ok(probe) => probe,
                Err(e) => {
                    submission.status = SubmissionStatus::GradeFailed;
                    self.repo.save_submission(&submission)?;
                    tracing::warn!(
                        submission = %submission.id,
                        test_case = %test_case.id,
                        "grading failed: probe could not be loaded"
                    );
                    return Err(e);
                }
            };
            results.push(run_probe(&probe, &submission.artifacts, time_limit));
        }

        let grade = aggregate(&submission, &assignment.test_cases, results);
        self.repo.save_grade(&grade)?;
        submission.status = SubmissionStatus::Graded;
        self.repo.save_submission(&submission)?;
        tracing::info!(
            submission = %submission.id,
            total = grade.total,
            max = grade.max_score,
            "graded submission"
        );
        Ok(grade)
    }

    /// Loads and compiles one test case's probe artifact.
    fn load_compiled_probe(&self, test_case: &TestCase) -> Result<Probe, GraderError> {
        let source = self.repo.load_probe(&test_case.probe)?;
        Probe::compile(&source).map_err(|source| GraderError::CorruptProbe {
            test_case_id: test_case.id.clone(),
            source,
        })
    }
}
