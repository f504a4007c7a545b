use super::{load_workflow, EventArgs};
use crate::output::print_json;
use std::path::Path;

/// Print whether the event would start a run. A non-match is not an error.
pub fn run(
    root: &Path,
    workflow_path: Option<&Path>,
    args: &EventArgs,
    json: bool,
) -> anyhow::Result<()> {
    let workflow = load_workflow(root, workflow_path)?;
    let event = args.resolve(root)?;
    let decision = workflow.triggers.evaluate(&event);

    if json {
        print_json(&serde_json::json!({
            "workflow": workflow.name,
            "event": event,
            "triggered": decision.triggered,
            "reason": decision.reason,
        }))?;
    } else if decision.triggered {
        println!("triggered: {}", decision.reason);
    } else {
        println!("not triggered: {}", decision.reason);
    }
    Ok(())
}
