use super::{load_workflow, EventArgs};
use crate::output::{format_duration_ms, print_json, print_table};
use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use webci_core::report::JobResult;
use webci_core::runner::{self, RunOptions, RunOutcome};
use webci_core::runtime;
use webci_core::step::StepStatus;

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub event: EventArgs,

    /// Repository to check out (default: the project root)
    #[arg(long)]
    pub source: Option<String>,

    /// Revision to check out (default: the event's sha, else the clone's HEAD)
    #[arg(long = "ref", value_name = "REV")]
    pub revision: Option<String>,

    /// Directory holding installed runtimes (repeatable)
    #[arg(
        long = "toolchains",
        value_name = "DIR",
        env = "WEBCI_TOOLCHAINS",
        value_delimiter = ':'
    )]
    pub toolchains: Vec<PathBuf>,

    /// Leave the environment on disk after the run
    #[arg(long)]
    pub keep_workspace: bool,

    /// Run even if the event does not match the workflow triggers
    #[arg(long)]
    pub force: bool,

    /// Do not write a report under .webci/runs/
    #[arg(long)]
    pub no_report: bool,
}

/// Execute the workflow. Returns the process exit code: 0 on success or
/// when the event does not trigger a run, otherwise the first failing
/// step's exit code.
pub fn run(
    root: &Path,
    workflow_path: Option<&Path>,
    args: RunArgs,
    json: bool,
) -> anyhow::Result<i32> {
    let workflow = load_workflow(root, workflow_path)?;
    let event = args.event.resolve(root)?;

    let mut toolchain_dirs = args.toolchains;
    toolchain_dirs.extend(runtime::default_toolchain_dirs());

    let opts = RunOptions {
        source: args
            .source
            .unwrap_or_else(|| root.display().to_string()),
        revision: args.revision,
        toolchain_dirs,
        keep_workspace: args.keep_workspace,
        force: args.force,
    };

    let outcome = runner::run(&workflow, &event, &opts).context("run failed")?;
    let result = match outcome {
        RunOutcome::Skipped(decision) => {
            if json {
                print_json(&serde_json::json!({
                    "triggered": false,
                    "reason": decision.reason,
                }))?;
            } else {
                println!("Skipped: {}", decision.reason);
            }
            return Ok(0);
        }
        RunOutcome::Completed(result) => result,
    };

    let report_path = if args.no_report {
        None
    } else {
        Some(result.save(root).context("failed to write run report")?)
    };

    if json {
        print_json(&result)?;
    } else {
        print_summary(&result, report_path.as_deref());
    }
    Ok(result.exit_code)
}

fn print_summary(result: &JobResult, report_path: Option<&Path>) {
    let rows = result
        .steps
        .iter()
        .map(|s| {
            vec![
                s.name.clone(),
                s.status.to_string(),
                s.exit_code.map(|c| c.to_string()).unwrap_or_default(),
                if s.attempt > 1 {
                    s.attempt.to_string()
                } else {
                    String::new()
                },
                if s.status == StepStatus::Skipped {
                    String::new()
                } else {
                    format_duration_ms(s.duration_ms)
                },
            ]
        })
        .collect();
    print_table(&["STEP", "STATUS", "EXIT", "ATTEMPT", "DURATION"], rows);

    if let Some(failure) = &result.failure {
        let failed = result.steps.iter().find(|s| s.status == StepStatus::Failed);
        if let Some(step) = failed {
            if !step.output.is_empty() {
                eprintln!("\n--- output of '{}' ---\n{}", step.name, step.output);
            }
        }
        println!(
            "\nRun {} failed at '{}' ({}): {}",
            result.run_id, failure.step, failure.kind, failure.reason
        );
    } else {
        println!("\nRun {} succeeded", result.run_id);
    }
    if let Some(path) = &result.workspace {
        println!("Workspace kept at {}", path.display());
    }
    if let Some(path) = report_path {
        println!("Report: {}", path.display());
    }
}
