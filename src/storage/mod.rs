#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{fmt::Display, path::PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{assignment::Assignment, config, grade::Grade, submission::Submission};

/// The local file-backed adapter.
pub mod local;
/// The PostgREST document-store adapter.
pub mod remote;

pub use local::LocalRepository;
pub use remote::RemoteRepository;

/// Opaque key under which a probe artifact is persisted.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ProbeHandle(String);

impl ProbeHandle {
    /// Generates a fresh handle.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an adapter-chosen key. Handles are opaque to callers; only
    /// adapters mint them.
    pub(crate) fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The handle's string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ProbeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failures surfaced by storage adapters.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// The requested entity does not exist.
    #[error("{kind} `{id}` was not found")]
    NotFound {
        /// Entity kind, for diagnostics.
        kind: &'static str,
        /// Entity identifier.
        id:   String,
    },
    /// The backend could not be reached or refused the operation.
    #[error("Storage backend unavailable: {reason}")]
    Unavailable {
        /// Transport-level failure description.
        reason: String,
    },
    /// A probe artifact exists but cannot be loaded back into usable form.
    /// Distinct from [`StorageError::NotFound`].
    #[error("Probe artifact `{handle}` is corrupt: {reason}")]
    CorruptArtifact {
        /// Handle of the offending artifact.
        handle: String,
        /// Why the artifact could not be loaded.
        reason: String,
    },
    /// A filesystem operation failed.
    #[error("I/O error at `{path}`: {source}")]
    Io {
        /// Path the operation touched.
        path:   String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// An interchange document failed to (de)serialize.
    #[error("Malformed {kind} document `{id}`: {source}")]
    Malformed {
        /// Entity kind, for diagnostics.
        kind:   &'static str,
        /// Entity identifier.
        id:     String,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// Storage-agnostic persistence contract.
///
/// Every write is atomic per entity: a crash mid-write never leaves a
/// partially written entity readable by a later load. The system provides
/// no cross-entity transactions.
pub trait Repository: Send + Sync {
    /// Persists an assignment document, replacing any previous version.
    fn save_assignment(&self, assignment: &Assignment) -> Result<(), StorageError>;
    /// Loads an assignment by identifier.
    fn load_assignment(&self, assignment_id: &str) -> Result<Assignment, StorageError>;
    /// Removes an assignment document. Explicit administrative operation.
    fn delete_assignment(&self, assignment_id: &str) -> Result<(), StorageError>;

    /// Persists a submission document.
    fn save_submission(&self, submission: &Submission) -> Result<(), StorageError>;
    /// Loads a single submission by its generated identifier.
    fn load_submission(&self, submission_id: &str) -> Result<Submission, StorageError>;
    /// Loads all submissions for a (student, assignment) pair, in attempt
    /// order.
    fn load_submissions(
        &self,
        student_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<Submission>, StorageError>;

    /// Persists a grade document, keyed by its submission identifier.
    fn save_grade(&self, grade: &Grade) -> Result<(), StorageError>;
    /// Loads the grade for a submission.
    fn load_grade(&self, submission_id: &str) -> Result<Grade, StorageError>;
    /// Loads all grades recorded for an assignment.
    fn load_grades(&self, assignment_id: &str) -> Result<Vec<Grade>, StorageError>;

    /// Persists probe source as an executable artifact and returns its
    /// handle.
    fn save_probe(&self, test_case_id: &str, source: &str) -> Result<ProbeHandle, StorageError>;
    /// Loads probe source back by handle.
    fn load_probe(&self, handle: &ProbeHandle) -> Result<String, StorageError>;
}

/// Configuration failures raised while selecting a storage adapter.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The configured adapter kind is not recognized.
    #[error("Unrecognized storage kind `{0}` (expected `local` or `remote`)")]
    UnknownKind(String),
    /// A parameter the selected adapter requires is missing.
    #[error("Missing required configuration: {0}")]
    MissingParameter(&'static str),
}

/// Selects and parameterizes a storage adapter.
#[derive(Clone, Debug)]
pub enum StorageConfig {
    /// File-backed storage rooted at a directory.
    Local {
        /// Directory that holds all entity documents.
        root: PathBuf,
    },
    /// PostgREST-backed document storage.
    Remote {
        /// Fully qualified PostgREST endpoint.
        endpoint: String,
        /// API key sent with every request.
        api_key:  String,
    },
}

impl StorageConfig {
    /// Builds a storage configuration from the process environment
    /// (`RUBRIC_STORAGE`, `RUBRIC_DATA_DIR`, `SUPABASE_URL`,
    /// `SUPABASE_ANON_KEY`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let cfg = config::get();
        match cfg.storage_kind() {
            "local" => Ok(Self::Local {
                root: cfg.data_dir().clone(),
            }),
            "remote" => {
                let (endpoint, api_key) = cfg
                    .supabase_endpoint()
                    .ok_or(ConfigError::MissingParameter("SUPABASE_URL / SUPABASE_ANON_KEY"))?;
                Ok(Self::Remote { endpoint, api_key })
            }
            other => Err(ConfigError::UnknownKind(other.to_string())),
        }
    }
}

/// Constructs the configured storage adapter behind the shared interface.
///
/// This is the only place a concrete adapter type is named; everything else
/// depends on [`Repository`].
pub fn make_repository(config: &StorageConfig) -> Result<Box<dyn Repository>, StorageError> {
    match config {
        StorageConfig::Local { root } => Ok(Box::new(LocalRepository::new(root)?)),
        StorageConfig::Remote { endpoint, api_key } => {
            Ok(Box::new(RemoteRepository::new(endpoint, api_key)?))
        }
    }
}
