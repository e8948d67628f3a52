#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::{
    collections::BTreeMap,
    sync::mpsc,
    thread,
    time::{Duration, Instant},
};

use rhai::{AST, Dynamic, Engine, EvalAltResult, FnPtr, Map, Scope};
use serde::{Deserialize, Serialize};

use crate::{grade::ProbeStatus, submission::Artifact};

/// Name of the entry-point function every probe script must define.
const ENTRY_POINT: &str = "probe";

/// Errors raised while turning probe source into an executable artifact.
///
/// These are distinct from missing-entity storage errors: a handle that
/// resolves to source which fails here is a corrupt or incompatible
/// artifact, not an absent one.
#[derive(thiserror::Error, Debug)]
pub enum ProbeError {
    /// The script does not parse as Rhai.
    #[error("Failed to parse probe script: {0}")]
    Parse(String),
    /// The script parses but does not define `probe(submission)`.
    #[error("Probe script does not define a `probe(submission)` function")]
    MissingEntryPoint,
}

/// A validated, compiled probe ready to run against submissions.
#[derive(Clone)]
pub struct Probe {
    /// Original script source, kept for persistence round-trips.
    source: String,
    /// Compiled form of the script.
    ast:    AST,
}

impl Probe {
    /// Compiles and validates probe source.
    ///
    /// Validation requires a top-level `probe` function taking exactly one
    /// parameter (the submission map).
    pub fn compile(source: &str) -> Result<Self, ProbeError> {
        let engine = probe_engine();
        let ast = engine
            .compile(source)
            .map_err(|e| ProbeError::Parse(e.to_string()))?;

        let has_entry = ast
            .iter_functions()
            .any(|f| f.name == ENTRY_POINT && f.params.len() == 1);
        if !has_entry {
            return Err(ProbeError::MissingEntryPoint);
        }

        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// Returns the probe's script source.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Normalized result of running one probe against one submission.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ProbeOutcome {
    /// Raw score in `[0, 1]`, before weighting.
    pub score:    f64,
    /// Feedback text for the student.
    pub feedback: String,
    /// How the run concluded.
    pub status:   ProbeStatus,
}

impl ProbeOutcome {
    /// An `Error` outcome with zero score.
    fn error(feedback: impl Into<String>) -> Self {
        Self {
            score:    0.0,
            feedback: feedback.into(),
            status:   ProbeStatus::Error,
        }
    }

    /// The `Timeout` outcome with zero score.
    fn timeout() -> Self {
        Self {
            score:    0.0,
            feedback: "timeout".to_string(),
            status:   ProbeStatus::Timeout,
        }
    }
}

/// Runs one probe against one submission's artifacts under a hard deadline.
///
/// The probe executes on a dedicated worker thread. The caller waits at most
/// `time_limit` for a result; past that it returns a `Timeout` outcome
/// immediately while the engine's progress hook terminates the script, so a
/// misbehaving probe cannot hold the worker or its resources.
///
/// This function never fails outward: every failure mode folds into a
/// [`ProbeOutcome`] with status `Ok`, `Error`, or `Timeout`.
pub fn run_probe(
    probe: &Probe,
    artifacts: &BTreeMap<String, Artifact>,
    time_limit: Duration,
) -> ProbeOutcome {
    let ast = probe.ast.clone();
    let artifacts = artifacts.clone();
    let deadline = Instant::now() + time_limit;

    let (tx, rx) = mpsc::channel::<ProbeOutcome>();
    thread::spawn(move || {
        let outcome = execute(ast, &artifacts, deadline);
        let _ = tx.send(outcome);
    });

    match rx.recv_timeout(time_limit) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => ProbeOutcome::timeout(),
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            ProbeOutcome::error("error: probe execution thread failed")
        }
    }
}

/// Worker-side execution: builds the submission map, invokes the probe's
/// entry point, and normalizes whatever comes back.
fn execute(ast: AST, artifacts: &BTreeMap<String, Artifact>, deadline: Instant) -> ProbeOutcome {
    let mut engine = probe_engine();
    engine.on_progress(move |_| {
        if Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    let mut exec_ast = ast;
    let mut submission = Map::new();
    for (slot, artifact) in artifacts {
        match artifact {
            Artifact::Value(value) => match rhai::serde::to_dynamic(value) {
                Ok(dynamic) => {
                    submission.insert(slot.as_str().into(), dynamic);
                }
                Err(e) => {
                    return ProbeOutcome::error(format!("invalid artifact `{slot}`: {e}"));
                }
            },
            Artifact::Functions(source) => {
                let fn_ast = match engine.compile(source) {
                    Ok(fn_ast) => fn_ast,
                    Err(e) => {
                        return ProbeOutcome::error(format!("invalid artifact `{slot}`: {e}"));
                    }
                };
                exec_ast = exec_ast.merge(&fn_ast);
                let ptr = match FnPtr::new(slot.as_str()) {
                    Ok(ptr) => ptr,
                    Err(e) => {
                        return ProbeOutcome::error(format!("invalid artifact `{slot}`: {e}"));
                    }
                };
                submission.insert(slot.as_str().into(), Dynamic::from(ptr));
            }
        }
    }

    let mut scope = Scope::new();
    let result = engine.call_fn::<Dynamic>(
        &mut scope,
        &exec_ast,
        ENTRY_POINT,
        (Dynamic::from(submission),),
    );

    match result {
        Ok(value) => normalize(value),
        Err(e) if matches!(*e, EvalAltResult::ErrorTerminated(..)) => ProbeOutcome::timeout(),
        Err(e) => ProbeOutcome::error(format!("error: {e}")),
    }
}

/// Maps a probe's return value onto the closed set of accepted shapes.
///
/// Accepted: a map carrying `score` (plus optional `feedback`), a boolean,
/// or a bare number. Scores clamp to `[0, 1]`; anything else is an error
/// outcome.
fn normalize(value: Dynamic) -> ProbeOutcome {
    if let Ok(passed) = value.as_bool() {
        return ProbeOutcome {
            score:    if passed { 1.0 } else { 0.0 },
            feedback: if passed {
                "Test passed successfully".to_string()
            } else {
                "Test failed".to_string()
            },
            status:   ProbeStatus::Ok,
        };
    }

    if let Some(score) = as_number(&value) {
        let score = clamp_score(score);
        return ProbeOutcome {
            score,
            feedback: format!("Partial credit: {:.1}%", score * 100.0),
            status: ProbeStatus::Ok,
        };
    }

    let type_name = value.type_name();
    let Some(map) = value.try_cast::<Map>() else {
        return ProbeOutcome::error(format!("invalid result shape: {type_name}"));
    };

    let Some(score) = map.get("score").and_then(as_number) else {
        return ProbeOutcome::error("invalid result shape: map is missing a numeric `score`");
    };

    let feedback = map
        .get("feedback")
        .map(|d| d.to_string())
        .unwrap_or_else(|| "No feedback provided".to_string());

    ProbeOutcome {
        score: clamp_score(score),
        feedback,
        status: ProbeStatus::Ok,
    }
}

/// Extracts an `f64` from an integer or float dynamic value.
fn as_number(value: &Dynamic) -> Option<f64> {
    if let Ok(f) = value.as_float() {
        return Some(f);
    }
    value.as_int().ok().map(|i| i as f64)
}

/// Clamps a raw probe score into `[0, 1]`, mapping non-finite values to 0.
fn clamp_score(score: f64) -> f64 {
    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Creates the engine probes run under. Probe `print`/`debug` output is
/// forwarded to tracing rather than captured.
fn probe_engine() -> Engine {
    let mut engine = Engine::new();
    engine.on_print(|message| tracing::info!(target: "probe", "{message}"));
    engine.on_debug(|message, _, pos| tracing::debug!(target: "probe", "{pos:?} {message}"));
    engine
}
