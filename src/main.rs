#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

//! # rubric
//!
//! Command-line front end for the `rubric` autograder. Teachers create
//! assignments and attach probe scripts; students submit artifacts and get
//! a graded report back. Storage is selected through the environment
//! (`RUBRIC_STORAGE=local|remote`).

use std::{collections::BTreeMap, path::PathBuf};

use anyhow::{Context, Result};
use bpaf::*;
use colored::Colorize;
use dotenvy::dotenv;
use rubric::{
    Artifact, AssignmentSettings, Grader,
    grade::{self, Grade},
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::{Level, metadata::LevelFilter};
use tracing_subscriber::{fmt, prelude::*, util::SubscriberInitExt};

/// Top-level CLI commands.
#[derive(Debug, Clone)]
enum Cmd {
    /// Create a new assignment
    Create {
        /// Assignment name (doubles as its identifier)
        name:         String,
        /// Reject submissions past the deadline
        no_late:      bool,
        /// RFC 3339 submission deadline
        deadline:     Option<String>,
        /// Per-probe time limit in seconds
        time_limit:   Option<u64>,
        /// Cap on attempts per student
        max_attempts: Option<u32>,
    },
    /// Attach a probe script to an assignment as a test case
    AddTest {
        /// Target assignment
        assignment:  String,
        /// Test case name
        name:        String,
        /// Path to the probe script
        script:      PathBuf,
        /// Point weight
        points:      f64,
        /// Human-readable description
        description: String,
    },
    /// Submit artifacts for grading
    Submit {
        /// Target assignment
        assignment: String,
        /// Submitting student identifier
        student:    String,
        /// Path to a JSON file of named artifacts
        artifacts:  PathBuf,
    },
    /// Show recorded grades
    Grades {
        /// Target assignment
        assignment: String,
        /// Show only this student's latest grade
        student:    Option<String>,
    },
    /// Re-run grading for a persisted submission
    Regrade {
        /// Submission identifier
        submission: String,
    },
}

/// Parse the command line arguments and return a `Cmd` enum
fn options() -> Cmd {
    let create = {
        let name = positional("NAME").help("Assignment name");
        let no_late = long("no-late")
            .help("Reject submissions after the deadline")
            .switch();
        let deadline = long("deadline")
            .help("Submission deadline, RFC 3339")
            .argument::<String>("WHEN")
            .optional();
        let time_limit = long("time-limit")
            .help("Per-probe time limit in seconds")
            .argument::<u64>("SECS")
            .optional();
        let max_attempts = long("max-attempts")
            .help("Cap on submission attempts per student")
            .argument::<u32>("N")
            .optional();
        construct!(Cmd::Create {
            no_late,
            deadline,
            time_limit,
            max_attempts,
            name,
        })
        .to_options()
        .command("create")
        .help("Create an assignment")
    };

    let add_test = {
        let assignment = positional("ASSIGNMENT").help("Assignment name");
        let name = positional("NAME").help("Test case name");
        let script = positional::<PathBuf>("SCRIPT").help("Path to the probe script");
        let points = long("points")
            .help("Point weight for this test case")
            .argument::<f64>("POINTS");
        let description = long("desc")
            .help("Description shown in feedback")
            .argument::<String>("TEXT")
            .fallback(String::new());
        construct!(Cmd::AddTest {
            points,
            description,
            assignment,
            name,
            script,
        })
        .to_options()
        .command("add-test")
        .help("Attach a probe script to an assignment")
    };

    let submit = {
        let assignment = positional("ASSIGNMENT").help("Assignment name");
        let student = positional("STUDENT").help("Student identifier");
        let artifacts = positional::<PathBuf>("ARTIFACTS").help("JSON file of named artifacts");
        construct!(Cmd::Submit {
            assignment,
            student,
            artifacts,
        })
        .to_options()
        .command("submit")
        .help("Submit artifacts for grading")
    };

    let grades = {
        let assignment = positional("ASSIGNMENT").help("Assignment name");
        let student = long("student")
            .help("Show only this student's latest grade")
            .argument::<String>("ID")
            .optional();
        construct!(Cmd::Grades {
            student,
            assignment,
        })
        .to_options()
        .command("grades")
        .help("Show recorded grades")
    };

    let regrade = {
        let submission = positional("SUBMISSION").help("Submission identifier");
        construct!(Cmd::Regrade { submission })
            .to_options()
            .command("regrade")
            .help("Re-run grading for a persisted submission")
    };

    let cmd = construct!([create, add_test, submit, grades, regrade]);

    cmd.to_options()
        .descr("A scriptable autograder with pluggable storage")
        .run()
}

/// Prints a grade report table plus a colored one-line summary.
fn print_grade(grade: &Grade) {
    eprintln!("{}", grade::report_table(grade));
    let summary = format!(
        "{}: {:.2}/{:.2} ({:.1}%)",
        grade.student_id,
        grade.total,
        grade.max_score,
        grade.percentage()
    );
    if grade.total >= grade.max_score {
        println!("{}", summary.green());
    } else if grade.total > 0.0 {
        println!("{}", summary.yellow());
    } else {
        println!("{}", summary.red());
    }
}

fn main() -> Result<()> {
    dotenv().ok();

    let fmt = fmt::layer()
        .without_time()
        .with_file(false)
        .with_line_number(false);
    let filter_layer = LevelFilter::from_level(Level::INFO);
    tracing_subscriber::registry()
        .with(fmt)
        .with(filter_layer)
        .init();

    let cmd = options();
    let grader = Grader::from_env().context("Failed to construct the configured grader")?;

    match cmd {
        Cmd::Create {
            name,
            no_late,
            deadline,
            time_limit,
            max_attempts,
        } => {
            let deadline = deadline
                .map(|raw| {
                    OffsetDateTime::parse(&raw, &Rfc3339)
                        .with_context(|| format!("Could not parse deadline `{raw}`"))
                })
                .transpose()?;
            let mut settings = AssignmentSettings::builder()
                .allow_late(!no_late)
                .deadline(deadline)
                .max_attempts(max_attempts)
                .build();
            if let Some(secs) = time_limit {
                settings.time_limit_secs = secs;
            }

            let assignment = grader.create_assignment(&name, settings)?;
            println!("Created assignment `{}`", assignment.id);
        }
        Cmd::AddTest {
            assignment,
            name,
            script,
            points,
            description,
        } => {
            let source = std::fs::read_to_string(&script)
                .with_context(|| format!("Could not read probe script {}", script.display()))?;
            let test_case = grader.add_test_case(&assignment, &name, &source, points, &description)?;
            println!("Added test case `{}` worth {:.2} points", test_case.id, test_case.weight);
        }
        Cmd::Submit {
            assignment,
            student,
            artifacts,
        } => {
            let raw = std::fs::read_to_string(&artifacts)
                .with_context(|| format!("Could not read artifacts {}", artifacts.display()))?;
            let artifacts: BTreeMap<String, Artifact> = serde_json::from_str(&raw)
                .context("Artifacts file must be a JSON map of named artifacts")?;
            let grade = grader.submit(&student, &assignment, artifacts)?;
            print_grade(&grade);
        }
        Cmd::Grades {
            assignment,
            student,
        } => match student {
            Some(student) => {
                let grade = grader.get_grade(&student, &assignment)?;
                print_grade(&grade);
            }
            None => {
                let grades = grader.get_grades(&assignment)?;
                if grades.is_empty() {
                    println!("No submissions yet");
                }
                for grade in grades {
                    println!(
                        "{}\t{:.2}/{:.2}\t({:.1}%)",
                        grade.student_id,
                        grade.total,
                        grade.max_score,
                        grade.percentage()
                    );
                }
            }
        },
        Cmd::Regrade { submission } => {
            let grade = grader.regrade(&submission)?;
            print_grade(&grade);
        }
    };

    Ok(())
}
