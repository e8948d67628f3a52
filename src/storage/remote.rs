#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use postgrest::{Builder, Postgrest};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use super::{ProbeHandle, Repository, StorageError};
use crate::{assignment::Assignment, grade::Grade, submission::Submission};

/// Document-store repository over a PostgREST endpoint.
///
/// Each entity is one JSON document in its table row; writes are upserts
/// and rely on the store's native per-document atomicity. All transport
/// failures surface as [`StorageError::Unavailable`].
pub struct RemoteRepository {
    /// PostgREST client carrying the endpoint and API key.
    client:  Postgrest,
    /// Runtime driving the async HTTP client from this blocking interface.
    runtime: tokio::runtime::Runtime,
}

impl RemoteRepository {
    /// Creates the adapter for `endpoint`, authenticating with `api_key`.
    pub fn new(endpoint: &str, api_key: &str) -> Result<Self, StorageError> {
        let client =
            Postgrest::new(endpoint.to_string()).insert_header("apiKey", api_key.to_string());
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StorageError::Unavailable {
                reason: format!("failed to start runtime: {e}"),
            })?;
        Ok(Self { client, runtime })
    }

    /// Executes a prepared request, returning status and body text.
    fn execute(&self, builder: Builder) -> Result<(StatusCode, String), StorageError> {
        self.runtime.block_on(async {
            let response = builder
                .execute()
                .await
                .map_err(|e| StorageError::Unavailable {
                    reason: e.to_string(),
                })?;
            let status = response.status();
            let body = response.text().await.map_err(|e| StorageError::Unavailable {
                reason: e.to_string(),
            })?;
            Ok((status, body))
        })
    }

    /// Upserts one row, mapping any non-success response to `Unavailable`.
    fn upsert(&self, table: &str, row: Value) -> Result<(), StorageError> {
        let (status, body) = self.execute(self.client.from(table).upsert(row.to_string()))?;
        if !status.is_success() {
            return Err(StorageError::Unavailable {
                reason: format!("{table} upsert failed with {status}: {body}"),
            });
        }
        Ok(())
    }

    /// Fetches exactly one row and extracts `column` from it.
    fn fetch_single(
        &self,
        builder: Builder,
        column: &str,
        kind: &'static str,
        id: &str,
    ) -> Result<Value, StorageError> {
        let (status, body) = self.execute(builder.select(column).single())?;
        if status == StatusCode::NOT_ACCEPTABLE || status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound {
                kind,
                id: id.to_string(),
            });
        }
        if !status.is_success() {
            return Err(StorageError::Unavailable {
                reason: format!("{kind} fetch failed with {status}: {body}"),
            });
        }

        let mut row: Value =
            serde_json::from_str(&body).map_err(|source| StorageError::Malformed {
                kind,
                id: id.to_string(),
                source,
            })?;
        match row.get_mut(column) {
            Some(value) => Ok(value.take()),
            None => Err(StorageError::NotFound {
                kind,
                id: id.to_string(),
            }),
        }
    }

    /// Fetches the `doc` column of every row a prepared filter matches.
    fn fetch_docs<T: DeserializeOwned>(
        &self,
        builder: Builder,
        kind: &'static str,
    ) -> Result<Vec<T>, StorageError> {
        let (status, body) = self.execute(builder.select("doc"))?;
        if !status.is_success() {
            return Err(StorageError::Unavailable {
                reason: format!("{kind} query failed with {status}: {body}"),
            });
        }

        let rows: Vec<Value> =
            serde_json::from_str(&body).map_err(|source| StorageError::Malformed {
                kind,
                id: "*".to_string(),
                source,
            })?;
        rows.into_iter()
            .map(|mut row| {
                let doc = row
                    .get_mut("doc")
                    .map(Value::take)
                    .unwrap_or(Value::Null);
                serde_json::from_value(doc).map_err(|source| StorageError::Malformed {
                    kind,
                    id: "*".to_string(),
                    source,
                })
            })
            .collect()
    }

    /// Deserializes a fetched `doc` value into an entity.
    fn decode<T: DeserializeOwned>(
        doc: Value,
        kind: &'static str,
        id: &str,
    ) -> Result<T, StorageError> {
        serde_json::from_value(doc).map_err(|source| StorageError::Malformed {
            kind,
            id: id.to_string(),
            source,
        })
    }
}

impl Repository for RemoteRepository {
    fn save_assignment(&self, assignment: &Assignment) -> Result<(), StorageError> {
        self.upsert(
            "assignments",
            json!({ "id": assignment.id, "doc": assignment }),
        )
    }

    fn load_assignment(&self, assignment_id: &str) -> Result<Assignment, StorageError> {
        let doc = self.fetch_single(
            self.client.from("assignments").eq("id", assignment_id),
            "doc",
            "assignment",
            assignment_id,
        )?;
        Self::decode(doc, "assignment", assignment_id)
    }

    fn delete_assignment(&self, assignment_id: &str) -> Result<(), StorageError> {
        // Surfaces NotFound for missing rows; PostgREST deletes are silent.
        self.load_assignment(assignment_id)?;
        let (status, body) =
            self.execute(self.client.from("assignments").eq("id", assignment_id).delete())?;
        if !status.is_success() {
            return Err(StorageError::Unavailable {
                reason: format!("assignment delete failed with {status}: {body}"),
            });
        }
        Ok(())
    }

    fn save_submission(&self, submission: &Submission) -> Result<(), StorageError> {
        self.upsert(
            "submissions",
            json!({
                "id": submission.id,
                "student_id": submission.student_id,
                "assignment_id": submission.assignment_id,
                "doc": submission,
            }),
        )
    }

    fn load_submission(&self, submission_id: &str) -> Result<Submission, StorageError> {
        let doc = self.fetch_single(
            self.client.from("submissions").eq("id", submission_id),
            "doc",
            "submission",
            submission_id,
        )?;
        Self::decode(doc, "submission", submission_id)
    }

    fn load_submissions(
        &self,
        student_id: &str,
        assignment_id: &str,
    ) -> Result<Vec<Submission>, StorageError> {
        let mut submissions: Vec<Submission> = self.fetch_docs(
            self.client
                .from("submissions")
                .eq("student_id", student_id)
                .eq("assignment_id", assignment_id),
            "submission",
        )?;
        submissions.sort_by_key(|s| s.attempt);
        Ok(submissions)
    }

    fn save_grade(&self, grade: &Grade) -> Result<(), StorageError> {
        self.upsert(
            "grades",
            json!({
                "submission_id": grade.submission_id,
                "assignment_id": grade.assignment_id,
                "doc": grade,
            }),
        )
    }

    fn load_grade(&self, submission_id: &str) -> Result<Grade, StorageError> {
        let doc = self.fetch_single(
            self.client.from("grades").eq("submission_id", submission_id),
            "doc",
            "grade",
            submission_id,
        )?;
        Self::decode(doc, "grade", submission_id)
    }

    fn load_grades(&self, assignment_id: &str) -> Result<Vec<Grade>, StorageError> {
        let mut grades: Vec<Grade> = self.fetch_docs(
            self.client.from("grades").eq("assignment_id", assignment_id),
            "grade",
        )?;
        grades.sort_by(|a, b| a.computed_at.cmp(&b.computed_at));
        Ok(grades)
    }

    fn save_probe(&self, test_case_id: &str, source: &str) -> Result<ProbeHandle, StorageError> {
        let handle = ProbeHandle::generate();
        self.upsert(
            "probes",
            json!({
                "handle": handle.as_str(),
                "test_case_id": test_case_id,
                "source": source,
            }),
        )?;
        Ok(handle)
    }

    fn load_probe(&self, handle: &ProbeHandle) -> Result<String, StorageError> {
        let source = self.fetch_single(
            self.client.from("probes").eq("handle", handle.as_str()),
            "source",
            "probe",
            handle.as_str(),
        )?;
        match source {
            Value::String(source) => Ok(source),
            other => Err(StorageError::CorruptArtifact {
                handle: handle.to_string(),
                reason: format!("expected script text, found {other}"),
            }),
        }
    }
}
