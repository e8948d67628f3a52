#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};
use uuid::Uuid;

use super::{ProbeHandle, Repository, StorageError};
use crate::{assignment::Assignment, grade::Grade, submission::Submission};

/// Subdirectory holding assignment documents.
const ASSIGNMENTS_DIR: &str = "assignments";
/// Subdirectory holding submission documents.
const SUBMISSIONS_DIR: &str = "submissions";
/// Subdirectory holding grade documents.
const GRADES_DIR: &str = "grades";
/// Subdirectory holding probe artifacts.
const PROBES_DIR: &str = "probes";

/// File-backed repository: one JSON document per entity under a storage
/// root, probe artifacts as `.rhai` script blobs.
///
/// Writes go to a uniquely named temp file and are renamed into place, so a
/// crash mid-write never leaves a torn document and concurrent writers to
/// the same key resolve to the last completed rename.
pub struct LocalRepository {
    /// Directory all entity documents live under.
    root: PathBuf,
}

impl LocalRepository {
    /// Creates the adapter, ensuring the storage layout exists under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        for dir in [ASSIGNMENTS_DIR, SUBMISSIONS_DIR, GRADES_DIR, PROBES_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(|source| StorageError::Io {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(Self { root })
    }

    /// Path of the JSON document for `id` within `dir`.
    fn doc_path(&self, dir: &str, id: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", file_key(id)))
    }

    /// Path of the probe artifact for `handle`.
    fn probe_path(&self, handle: &ProbeHandle) -> PathBuf {
        self.root
            .join(PROBES_DIR)
            .join(format!("{}.rhai", file_key(handle.as_str())))
    }

    /// Serializes `entity` and atomically replaces the document at `path`.
    fn write_doc<T: Serialize>(
        &self,
        path: &Path,
        kind: &'static str,
        id: &str,
        entity: &T,
    ) -> Result<(), StorageError> {
        let body = serde_json::to_vec_pretty(entity).map_err(|source| StorageError::Malformed {
            kind,
            id: id.to_string(),
            source,
        })?;
        atomic_write(path, &body)
    }

    /// Loads and deserializes the document at `path`.
    fn read_doc<T: DeserializeOwned>(
        &self,
        path: &Path,
        kind: &'static str,
        id: &str,
    ) -> Result<T, StorageError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    kind,
                    id: id.to_string(),
                });
            }
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|source| StorageError::Malformed {
            kind,
            id: id.to_string(),
            source,
        })
    }

    /// Loads every document in `dir` that satisfies `keep`.
    fn scan_docs<T: DeserializeOwned>(
        &self,
        dir: &str,
        kind: &'static str,
        keep: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>, StorageError> {
        let dir_path = self.root.join(dir);
        let entries = fs::read_dir(&dir_path).map_err(|source| StorageError::Io {
            path: dir_path.display().to_string(),
            source,
        })?;

        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StorageError::Io {
                path: dir_path.display().to_string(),
                source,
            })?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let id = path.file_stem().map(|s| s.to_string_lossy().to_string());
            let entity: T = self.read_doc(&path, kind, id.as_deref().unwrap_or("?"))?;
            if keep(&entity) {
                found.push(entity);
            }
        }
        Ok(found)
    }
}

impl Repository for LocalRepository {
    fn save_assignment(&self, assignment: &Assignment) -> Result<(), StorageError> {
        let path = self.doc_path(ASSIGNMENTS_DIR, &assignment.id);
        self.write_doc(&path, "assignment", &assignment.id, assignment)
    }

    fn load_assignment(&self, assignment_id: &str) -> Result<Assignment, StorageError> {
        let path = self.doc_path(ASSIGNMENTS_DIR, assignment_id);
        self.read_doc(&path, "assignment", assignment_id)
    }

    fn delete_assignment(&self, assignment_id: &str) -> Result<(), StorageError> {
        let path = self.doc_path(ASSIGNMENTS_DIR, assignment_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound {
                kind: "assignment",
                id:   assignment_id.to_string(),
            }),
            Err(source) => Err(StorageError::Io {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    fn save_submission(&self, submission: &Submission) -> Result<(), StorageError> {
        let path = self.doc_path(SUBMISSIONS_DIR, &submission.id);
        self.write_doc(&path, "submission", &submission.id, submission)
    }

    fn load_submission(&self, submission_id: &str) -> Result<Submission, StorageError> {
        let path = self.doc_path(SUBMISSIONS_DIR, submission_id);
        self.read_doc(&path, "submission", submission_id)
    }

    fn load_submissions(
        &self,
        student_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<Submission>, StorageError> {
        let mut submissions: Vec<Submission> =
            self.scan_docs(SUBMISSIONS_DIR, "submission", |s: &Submission| {
                s.student_id == student_id && s.assignment_id == assignment_id
            })?;
        submissions.sort_by_key(|s| s.attempt);
        Ok(submissions)
    }

    fn save_grade(&self, grade: &Grade) -> Result<(), StorageError> {
        let path = self.doc_path(GRADES_DIR, &grade.submission_id);
        self.write_doc(&path, "grade", &grade.submission_id, grade)
    }

    fn load_grade(&self, submission_id: &str) -> Result<Grade, StorageError> {
        let path = self.doc_path(GRADES_DIR, submission_id);
        self.read_doc(&path, "grade", submission_id)
    }

    fn load_grades(&self, assignment_id: &str) -> Result<Vec<Grade>, StorageError> {
        let mut grades: Vec<Grade> = self.scan_docs(GRADES_DIR, "grade", |g: &Grade| {
            g.assignment_id == assignment_id
        })?;
        grades.sort_by(|a, b| a.computed_at.cmp(&b.computed_at));
        Ok(grades)
    }

    fn save_probe(&self, test_case_id: &str, source: &str) -> Result<ProbeHandle, StorageError> {
        let handle =
            ProbeHandle::from_raw(format!("{}-{}", file_key(test_case_id), Uuid::new_v4()));
        atomic_write(&self.probe_path(&handle), source.as_bytes())?;
        Ok(handle)
    }

    fn load_probe(&self, handle: &ProbeHandle) -> Result<String, StorageError> {
        let path = self.probe_path(handle);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::NotFound {
                    kind: "probe",
                    id:   handle.to_string(),
                });
            }
            Err(source) => {
                return Err(StorageError::Io {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        String::from_utf8(bytes).map_err(|e| StorageError::CorruptArtifact {
            handle: handle.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Maps an entity identifier to a safe file-name component. Path
/// separators and other unusable characters collapse to `_`.
fn file_key(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ' ') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Writes `body` to a uniquely named temp file next to `path`, then renames
/// it into place.
fn atomic_write(path: &Path, body: &[u8]) -> Result<(), StorageError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = parent.join(format!(".{}.tmp", Uuid::new_v4()));

    fs::write(&tmp, body).map_err(|source| StorageError::Io {
        path: tmp.display().to_string(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| {
        let _ = fs::remove_file(&tmp);
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    })
}
