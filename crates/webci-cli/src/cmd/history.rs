use crate::output::{format_duration_ms, print_json, print_table};
use anyhow::Context;
use std::path::Path;
use webci_core::report::JobResult;
use webci_core::WebciError;

pub fn run(root: &Path, run_id: Option<&str>, limit: usize, json: bool) -> anyhow::Result<()> {
    if let Some(id) = run_id {
        return show(root, id, json);
    }

    let mut reports = JobResult::list(root).context("failed to read run reports")?;
    reports.truncate(limit);

    if json {
        return print_json(&reports);
    }

    if reports.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }

    let rows = reports
        .iter()
        .map(|r| {
            vec![
                r.run_id.chars().take(8).collect(),
                r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                r.workflow.clone(),
                format!("{}:{}", r.event.kind, r.event.branch),
                if r.success {
                    "success".to_string()
                } else {
                    match &r.failure {
                        Some(f) => format!("failed ({})", f.step),
                        None => "failed".to_string(),
                    }
                },
                r.exit_code.to_string(),
                format_duration_ms(r.duration_ms().max(0) as u64),
            ]
        })
        .collect();
    print_table(
        &["RUN", "STARTED", "WORKFLOW", "EVENT", "RESULT", "EXIT", "DURATION"],
        rows,
    );
    Ok(())
}

fn show(root: &Path, id: &str, json: bool) -> anyhow::Result<()> {
    let report = match JobResult::load(root, id) {
        Ok(r) => r,
        Err(WebciError::ReportNotFound(_)) => {
            let mut matches: Vec<JobResult> = JobResult::list(root)?
                .into_iter()
                .filter(|r| r.run_id.starts_with(id))
                .collect();
            match matches.len() {
                0 => return Err(WebciError::ReportNotFound(id.to_string()).into()),
                1 => matches.remove(0),
                n => anyhow::bail!("run id prefix '{id}' is ambiguous ({n} runs)"),
            }
        }
        Err(e) => return Err(e).context("failed to read run report"),
    };

    if json {
        return print_json(&report);
    }

    println!("Run:      {}", report.run_id);
    println!("Workflow: {}", report.workflow);
    println!("Event:    {} ({})", report.event.kind, report.trigger_reason);
    println!("Image:    {}", report.image);
    println!("Started:  {}", report.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!(
        "Result:   {} (exit {})",
        if report.success { "success" } else { "failed" },
        report.exit_code
    );
    if let Some(f) = &report.failure {
        println!("Failure:  {} at '{}': {}", f.kind, f.step, f.reason);
    }
    println!();
    for step in &report.steps {
        println!("  {:<8} {}", step.status, step.name);
    }
    Ok(())
}
