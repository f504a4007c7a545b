use super::load_workflow;
use crate::output::print_json;
use clap::Subcommand;
use std::path::Path;
use webci_core::workflow::{WarnLevel, Workflow};

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Validate the workflow for common mistakes
    Validate,

    /// Print the effective workflow
    Show,
}

pub fn run(
    root: &Path,
    workflow_path: Option<&Path>,
    subcmd: ConfigSubcommand,
    json: bool,
) -> anyhow::Result<()> {
    let workflow = load_workflow(root, workflow_path)?;
    match subcmd {
        ConfigSubcommand::Validate => validate(&workflow, json),
        ConfigSubcommand::Show => show(&workflow, json),
    }
}

fn validate(workflow: &Workflow, json: bool) -> anyhow::Result<()> {
    let warnings = workflow.validate();

    if json {
        print_json(&serde_json::json!({ "warnings": warnings }))?;
    } else if warnings.is_empty() {
        println!("Workflow is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    if Workflow::has_errors(&warnings) {
        anyhow::bail!("workflow validation found errors");
    }
    Ok(())
}

fn show(workflow: &Workflow, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(workflow);
    }

    println!("Workflow: {}", workflow.name);
    println!("Runs on:  {}", workflow.runs_on);
    println!("Working directory: {}", workflow.defaults.working_directory);
    println!();
    if let Some(pr) = &workflow.triggers.pull_request {
        println!("on pull_request:");
        print_patterns("branches", &pr.branches);
        print_patterns("paths", &pr.paths);
    }
    if let Some(push) = &workflow.triggers.push {
        println!("on push:");
        print_patterns("branches", &push.branches);
        print_patterns("paths", &push.paths);
    }
    println!();
    println!("Steps:");
    for (i, step) in workflow.steps.iter().enumerate() {
        let wd = if step.action.uses_working_directory() {
            format!("  [in {}]", workflow.working_directory_for(step))
        } else {
            String::new()
        };
        println!("  {}. {}: {}{wd}", i + 1, step.name, step.action.describe());
    }
    Ok(())
}

fn print_patterns(label: &str, patterns: &[String]) {
    if !patterns.is_empty() {
        println!("  {label}: {}", patterns.join(", "));
    }
}
