//! The pipeline runner: filter the event, provision an environment, then
//! fold over the steps in declared order, stopping at the first failure.

use crate::environment::Environment;
use crate::error::{Result, WebciError};
use crate::event::Event;
use crate::install;
use crate::paths;
use crate::report::{Failure, JobResult};
use crate::shell::{self, CommandOutput, StepEnv};
use crate::step::{FailureKind, StepAction, StepDefinition, StepResult, StepStatus};
use crate::trigger::TriggerDecision;
use crate::workflow::{WarnLevel, Workflow};
use crate::{checkout, runtime};
use chrono::Utc;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Exit code reported when a step failed without one of its own.
pub const GENERIC_FAILURE_CODE: i32 = 1;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Repository to check out: a local path or any URL git accepts.
    pub source: String,
    /// Revision to check out; falls back to the event's `sha`.
    pub revision: Option<String>,
    /// Extra directories searched by runtime setup.
    pub toolchain_dirs: Vec<PathBuf>,
    pub keep_workspace: bool,
    /// Run even when the event does not match the triggers.
    pub force: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The event did not match; no environment was provisioned.
    Skipped(TriggerDecision),
    Completed(JobResult),
}

/// Mutable state threaded through the steps of one run.
struct RunContext<'a> {
    opts: &'a RunOptions,
    revision: Option<String>,
    checkout_dir: PathBuf,
    env: StepEnv,
}

/// Errors when the event is malformed or the workflow has error-level
/// validation problems; step failures are reported in the `JobResult`.
pub fn run(workflow: &Workflow, event: &Event, opts: &RunOptions) -> Result<RunOutcome> {
    event.validate()?;

    let problems: Vec<String> = workflow
        .validate()
        .into_iter()
        .filter(|w| w.level == WarnLevel::Error)
        .map(|w| w.message)
        .collect();
    if !problems.is_empty() {
        return Err(WebciError::InvalidWorkflow(problems.join("; ")));
    }

    let decision = workflow.triggers.evaluate(event);
    if !decision.triggered && !opts.force {
        tracing::info!(reason = %decision.reason, "event does not match triggers");
        return Ok(RunOutcome::Skipped(decision));
    }
    let trigger_reason = if decision.triggered {
        decision.reason
    } else {
        format!("forced ({})", decision.reason)
    };

    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    tracing::info!(%run_id, workflow = %workflow.name, reason = %trigger_reason, "starting run");

    let mut environment = match Environment::provision(&workflow.runs_on) {
        Ok(env) => env,
        Err(reason) => {
            tracing::error!(%reason, "provisioning failed");
            return Ok(RunOutcome::Completed(JobResult {
                run_id,
                workflow: workflow.name.clone(),
                event: event.clone(),
                trigger_reason,
                image: workflow.runs_on.clone(),
                started_at,
                finished_at: Utc::now(),
                success: false,
                exit_code: GENERIC_FAILURE_CODE,
                failure: Some(Failure {
                    step: "provision".to_string(),
                    kind: FailureKind::Provision,
                    reason,
                }),
                steps: workflow
                    .steps
                    .iter()
                    .map(|s| StepResult::skipped(&s.name))
                    .collect(),
                workspace: None,
            }));
        }
    };

    let mut env = StepEnv::new();
    env.set("CI", "true");
    env.set("WEBCI", "true");
    env.set("WEBCI_RUN_ID", run_id.as_str());
    env.set("WEBCI_EVENT", event.kind.as_str());
    env.set("WEBCI_BRANCH", event.branch.as_str());
    env.set(
        "WEBCI_WORKSPACE",
        environment.checkout_dir().display().to_string(),
    );

    let mut ctx = RunContext {
        opts,
        revision: opts.revision.clone().or_else(|| event.sha.clone()),
        checkout_dir: environment.checkout_dir(),
        env,
    };

    let (steps, failure) = run_steps(workflow, &mut ctx);

    let exit_code = match &failure {
        None => 0,
        Some((code, _)) => *code,
    };
    let workspace = opts.keep_workspace.then(|| environment.keep());
    if let Some(path) = &workspace {
        tracing::info!(path = %path.display(), "keeping environment");
    }

    let result = JobResult {
        run_id,
        workflow: workflow.name.clone(),
        event: event.clone(),
        trigger_reason,
        image: environment.image().to_string(),
        started_at,
        finished_at: Utc::now(),
        success: failure.is_none(),
        exit_code,
        failure: failure.map(|(_, f)| f),
        steps,
        workspace,
    };
    tracing::info!(success = result.success, exit_code = result.exit_code, "run finished");
    Ok(RunOutcome::Completed(result))
}

/// Execute steps in order. After the first failure every remaining step is
/// recorded as skipped and never executed.
fn run_steps(
    workflow: &Workflow,
    ctx: &mut RunContext<'_>,
) -> (Vec<StepResult>, Option<(i32, Failure)>) {
    let mut results = Vec::with_capacity(workflow.steps.len());
    let mut failure: Option<(i32, Failure)> = None;

    for step in &workflow.steps {
        if failure.is_some() {
            results.push(StepResult::skipped(&step.name));
            continue;
        }

        tracing::info!(step = %step.name, action = %step.action.describe(), "step started");
        let result = run_step(workflow, step, ctx);

        if result.status == StepStatus::Failed {
            let code = match result.exit_code {
                Some(c) if c != 0 => c,
                _ => GENERIC_FAILURE_CODE,
            };
            tracing::error!(step = %step.name, exit_code = code, "step failed");
            failure = Some((
                code,
                Failure {
                    step: step.name.clone(),
                    kind: step.action.failure_kind(),
                    reason: if result.timed_out {
                        format!("timed out after {}s", step.timeout_seconds)
                    } else {
                        summary_line(&result.output)
                    },
                },
            ));
        } else {
            tracing::info!(step = %step.name, duration_ms = result.duration_ms, "step passed");
        }
        results.push(result);
    }

    (results, failure)
}

/// Run one step with its retry budget. Returns the last attempt.
fn run_step(workflow: &Workflow, step: &StepDefinition, ctx: &mut RunContext<'_>) -> StepResult {
    let max_attempts = step.max_retries.saturating_add(1);
    let timeout = match step.timeout_seconds {
        0 => None,
        secs => Some(Duration::from_secs(u64::from(secs))),
    };

    let mut attempt = 1;
    loop {
        let start = Instant::now();
        let out = dispatch(workflow, step, ctx, attempt, timeout);
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = StepResult {
            name: step.name.clone(),
            status: if out.success() {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            },
            exit_code: out.exit_code,
            output: out.output,
            attempt,
            duration_ms,
            timed_out: out.timed_out,
        };

        if result.status == StepStatus::Passed || attempt >= max_attempts {
            return result;
        }
        if result.timed_out {
            tracing::warn!(step = %step.name, attempt, timeout_seconds = step.timeout_seconds, "step timed out");
        }
        tracing::warn!(step = %step.name, attempt, max_attempts, "step failed, retrying");
        attempt += 1;
    }
}

fn dispatch(
    workflow: &Workflow,
    step: &StepDefinition,
    ctx: &mut RunContext<'_>,
    attempt: u32,
    timeout: Option<Duration>,
) -> CommandOutput {
    match &step.action {
        StepAction::Checkout { fetch_depth } => {
            if attempt > 1 && ctx.checkout_dir.exists() {
                // a failed clone may leave a partial tree behind
                let _ = std::fs::remove_dir_all(&ctx.checkout_dir);
            }
            checkout::checkout(
                &ctx.opts.source,
                &ctx.checkout_dir,
                *fetch_depth,
                ctx.revision.as_deref(),
                &ctx.env,
                timeout,
            )
        }
        StepAction::SetupRuntime { runtime, version } => {
            let cwd = if ctx.checkout_dir.is_dir() {
                ctx.checkout_dir.clone()
            } else {
                std::env::temp_dir()
            };
            match runtime::setup(
                *runtime,
                version,
                &ctx.opts.toolchain_dirs,
                &mut ctx.env,
                &cwd,
            ) {
                Ok(tc) => CommandOutput::completed(format!(
                    "{} {} ({})",
                    tc.runtime.name(),
                    tc.version,
                    tc.bin_dir.display()
                )),
                Err(reason) => CommandOutput::rejected(reason),
            }
        }
        StepAction::Install { manager, command } => {
            let cwd = match step_dir(workflow, step, ctx) {
                Ok(dir) => dir,
                Err(reason) => return CommandOutput::rejected(reason),
            };
            match install::prepare(*manager, command.as_deref(), &cwd) {
                Ok(cmd) => {
                    tracing::debug!(command = %cmd, cwd = %cwd.display(), "installing");
                    shell::execute(shell::shell_command(&cmd, &cwd, &ctx.env), timeout)
                }
                Err(reason) => CommandOutput::rejected(reason),
            }
        }
        StepAction::Run { command } => {
            if command.trim().is_empty() {
                return CommandOutput::rejected("step command is empty");
            }
            match step_dir(workflow, step, ctx) {
                Ok(cwd) => shell::execute(shell::shell_command(command, &cwd, &ctx.env), timeout),
                Err(reason) => CommandOutput::rejected(reason),
            }
        }
    }
}

fn step_dir(
    workflow: &Workflow,
    step: &StepDefinition,
    ctx: &RunContext<'_>,
) -> std::result::Result<PathBuf, String> {
    let wd = workflow.working_directory_for(step);
    let dir = paths::resolve_working_dir(&ctx.checkout_dir, wd).map_err(|e| e.to_string())?;
    if !dir.is_dir() {
        return Err(format!("working directory '{wd}' does not exist"));
    }
    Ok(dir)
}

fn summary_line(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .rfind(|l| !l.is_empty())
        .unwrap_or("step failed")
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testutil::{git_available, init_repo};
    use crate::install::PackageManager;
    use crate::trigger::{TriggerConfig, TriggerFilter};
    use tempfile::TempDir;

    /// A workflow with only shell steps, so no git or node is needed.
    fn shell_workflow(steps: Vec<StepDefinition>) -> Workflow {
        Workflow {
            triggers: TriggerConfig {
                pull_request: Some(TriggerFilter::paths(["docs/**"])),
                push: Some(TriggerFilter::branches(["main"])),
            },
            runs_on: "self-hosted".to_string(),
            steps,
            ..Workflow::new("test")
        }
    }

    fn completed(outcome: RunOutcome) -> JobResult {
        match outcome {
            RunOutcome::Completed(r) => r,
            RunOutcome::Skipped(d) => panic!("run was skipped: {}", d.reason),
        }
    }

    #[test]
    fn non_matching_event_never_provisions() {
        let marker = TempDir::new().unwrap();
        let touched = marker.path().join("ran");
        let wf = shell_workflow(vec![StepDefinition::run(
            "build",
            format!("touch {}", touched.display()),
        )]);
        let outcome = run(&wf, &Event::push("develop"), &RunOptions::default()).unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped(_)));
        assert!(!touched.exists());

        let outcome = run(&wf, &Event::pull_request(["src/x.rs"]), &RunOptions::default()).unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped(_)));
    }

    #[test]
    fn force_runs_non_matching_event() {
        let wf = shell_workflow(vec![StepDefinition::run("build", "true")]);
        let opts = RunOptions {
            force: true,
            ..Default::default()
        };
        let r = completed(run(&wf, &Event::push("develop"), &opts).unwrap());
        assert!(r.success);
        assert!(r.trigger_reason.starts_with("forced"));
    }

    #[test]
    fn all_steps_pass() {
        let wf = shell_workflow(vec![
            StepDefinition::run("prepare", "mkdir -p docs"),
            StepDefinition::run("build", "true"),
        ]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(r.success);
        assert_eq!(r.exit_code, 0);
        assert!(r.failure.is_none());
        assert!(r.steps.iter().all(|s| s.status == StepStatus::Passed));
    }

    #[test]
    fn first_failure_halts_and_sets_exit_code() {
        let marker = TempDir::new().unwrap();
        let touched = marker.path().join("ran");
        let wf = shell_workflow(vec![
            StepDefinition::run("prepare", "true"),
            StepDefinition::run("build", "echo 'compile error' >&2; exit 7"),
            StepDefinition::run("after", format!("touch {}", touched.display())),
        ]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(!r.success);
        assert_eq!(r.exit_code, 7);
        let failure = r.failure.as_ref().unwrap();
        assert_eq!(failure.step, "build");
        assert_eq!(failure.kind, FailureKind::Build);
        assert_eq!(failure.reason, "compile error");
        assert_eq!(r.step("after").unwrap().status, StepStatus::Skipped);
        assert!(!touched.exists());
    }

    #[test]
    fn steps_share_one_working_directory() {
        let wf = Workflow {
            defaults: crate::workflow::StepDefaults {
                working_directory: "./docs".to_string(),
            },
            ..shell_workflow(vec![
                StepDefinition::run("prepare", "mkdir -p docs && echo hi > docs/page.md").in_dir("."),
                StepDefinition::run("build", "test -f page.md && test \"$WEBCI_EVENT\" = push"),
            ])
        };
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(r.success, "{:?}", r.steps);
    }

    #[test]
    fn missing_working_directory_fails_step() {
        let wf = Workflow {
            defaults: crate::workflow::StepDefaults {
                working_directory: "./docs".to_string(),
            },
            ..shell_workflow(vec![StepDefinition::run("build", "true")])
        };
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(!r.success);
        assert_eq!(r.exit_code, GENERIC_FAILURE_CODE);
        assert!(r.failure.unwrap().reason.contains("does not exist"));
    }

    #[test]
    fn lockfile_drift_fails_install_and_skips_build() {
        let marker = TempDir::new().unwrap();
        let built = marker.path().join("built");
        let wf = shell_workflow(vec![
            StepDefinition::run(
                "prepare",
                r#"printf '{"dependencies":{"react":"^18.2.0"}}' > package.json && printf 'left-pad@^1.0.0:\n  version "1.3.0"\n' > yarn.lock"#,
            ),
            StepDefinition::new(
                "install",
                StepAction::Install {
                    manager: Some(PackageManager::Yarn),
                    command: Some("true".to_string()),
                },
            ),
            StepDefinition::run("build", format!("touch {}", built.display())),
        ]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(!r.success);
        let failure = r.failure.as_ref().unwrap();
        assert_eq!(failure.kind, FailureKind::Dependencies);
        assert_eq!(r.step("install").unwrap().status, StepStatus::Failed);
        assert!(r
            .step("install")
            .unwrap()
            .output
            .contains("react@^18.2.0 has no lock entry"));
        assert_eq!(r.step("build").unwrap().status, StepStatus::Skipped);
        assert!(!built.exists());
    }

    #[test]
    fn failing_install_command_skips_build() {
        let wf = shell_workflow(vec![
            StepDefinition::run("prepare", "echo '{}' > package.json && touch yarn.lock"),
            StepDefinition::new(
                "install",
                StepAction::Install {
                    manager: None,
                    command: Some("exit 4".to_string()),
                },
            ),
            StepDefinition::run("build", "true"),
        ]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert_eq!(r.exit_code, 4);
        assert_eq!(r.step("build").unwrap().status, StepStatus::Skipped);
    }

    #[test]
    fn retries_until_success() {
        let marker = TempDir::new().unwrap();
        let counter = marker.path().join("counter");
        std::fs::write(&counter, "0").unwrap();
        let mut step = StepDefinition::run(
            "flaky",
            format!(
                "c=$(cat {p}); c=$((c+1)); echo $c > {p}; [ $c -ge 2 ]",
                p = counter.display()
            ),
        );
        step.max_retries = 2;
        let wf = shell_workflow(vec![step]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(r.success);
        assert_eq!(r.steps[0].attempt, 2);
    }

    #[test]
    fn max_retries_at_u32_max_does_not_overflow() {
        let marker = TempDir::new().unwrap();
        let counter = marker.path().join("counter");
        std::fs::write(&counter, "0").unwrap();
        let mut step = StepDefinition::run(
            "flaky",
            format!(
                "c=$(cat {p}); c=$((c+1)); echo $c > {p}; [ $c -ge 3 ]",
                p = counter.display()
            ),
        );
        step.max_retries = u32::MAX;
        let wf = shell_workflow(vec![step]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(r.success);
        assert_eq!(r.steps[0].attempt, 3);
    }

    #[test]
    fn default_is_one_attempt() {
        let wf = shell_workflow(vec![StepDefinition::run("build", "false")]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert_eq!(r.steps[0].attempt, 1);
        assert_eq!(r.exit_code, 1);
    }

    #[test]
    fn step_timeout_fails_the_run() {
        let mut step = StepDefinition::run("build", "sleep 30");
        step.timeout_seconds = 1;
        let wf = shell_workflow(vec![step]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(!r.success);
        assert!(r.steps[0].timed_out);
        assert!(r.steps[0].output.contains("timed out"));
        assert_eq!(r.exit_code, GENERIC_FAILURE_CODE);
        assert_eq!(r.failure.unwrap().reason, "timed out after 1s");
    }

    #[test]
    fn timed_out_step_leaves_no_background_work() {
        let marker = TempDir::new().unwrap();
        let late = marker.path().join("late");
        let mut step = StepDefinition::run("build", format!("(sleep 2; touch {})", late.display()));
        step.timeout_seconds = 1;
        let wf = shell_workflow(vec![step]);
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(!r.success);
        std::thread::sleep(Duration::from_secs(3));
        assert!(!late.exists());
    }

    #[test]
    fn workflow_with_validation_errors_is_refused() {
        let marker = TempDir::new().unwrap();
        let touched = marker.path().join("ran");
        let wf = shell_workflow(vec![
            StepDefinition::run("build", format!("touch {}", touched.display())),
            StepDefinition::run("build", "exit 5"),
        ]);
        let err = run(&wf, &Event::push("main"), &RunOptions::default()).unwrap_err();
        assert!(matches!(err, WebciError::InvalidWorkflow(_)));
        assert!(err.to_string().contains("duplicate step name 'build'"));
        assert!(!touched.exists());

        let wf = shell_workflow(vec![
            StepDefinition::new("checkout", StepAction::Checkout { fetch_depth: 0 }),
            StepDefinition::new("checkout-again", StepAction::Checkout { fetch_depth: 0 }),
        ]);
        assert!(matches!(
            run(&wf, &Event::push("main"), &RunOptions::default()),
            Err(WebciError::InvalidWorkflow(_))
        ));
    }

    #[test]
    fn provisioning_failure_skips_every_step() {
        let mut wf = shell_workflow(vec![StepDefinition::run("build", "true")]);
        // a known image for a different OS passes validation but cannot be provisioned here
        wf.runs_on = match crate::environment::HostOs::current() {
            crate::environment::HostOs::Windows => "ubuntu-latest",
            _ => "windows-latest",
        }
        .to_string();
        let r = completed(run(&wf, &Event::push("main"), &RunOptions::default()).unwrap());
        assert!(!r.success);
        assert_eq!(r.failure.unwrap().kind, FailureKind::Provision);
        assert_eq!(r.steps[0].status, StepStatus::Skipped);
    }

    #[test]
    fn keep_workspace_returns_path() {
        let wf = shell_workflow(vec![StepDefinition::run("build", "mkdir -p out")]);
        let opts = RunOptions {
            keep_workspace: true,
            ..Default::default()
        };
        let r = completed(run(&wf, &Event::push("main"), &opts).unwrap());
        let ws = r.workspace.clone().unwrap();
        assert!(ws.join("checkout").is_dir());
        std::fs::remove_dir_all(ws).unwrap();
    }

    #[test]
    fn invalid_event_is_an_error() {
        let wf = shell_workflow(vec![]);
        assert!(run(&wf, &Event::push(""), &RunOptions::default()).is_err());
    }

    #[test]
    fn website_pipeline_end_to_end_with_fake_toolchain() {
        use std::os::unix::fs::PermissionsExt;
        if !git_available() {
            return;
        }

        let repo = TempDir::new().unwrap();
        init_repo(
            repo.path(),
            &[
                (
                    "docs/package.json",
                    r#"{"name":"site","dependencies":{"react":"^18.2.0"}}"#,
                ),
                ("docs/yarn.lock", "react@^18.2.0:\n  version \"18.2.0\"\n"),
            ],
        );

        // fake node 18 and yarn inside an nvm-style toolchain dir
        let tools = TempDir::new().unwrap();
        let bin = tools.path().join("versions/node/v18.20.1/bin");
        std::fs::create_dir_all(&bin).unwrap();
        let scripts = [
            ("node", "#!/bin/sh\necho v18.20.1\n"),
            (
                "yarn",
                "#!/bin/sh\nif [ \"$1\" = build ]; then mkdir -p build && echo ok > build/index.html; fi\n",
            ),
        ];
        for (name, body) in scripts {
            let p = bin.join(name);
            std::fs::write(&p, body).unwrap();
            std::fs::set_permissions(&p, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let mut wf = Workflow::website();
        wf.runs_on = "self-hosted".to_string();
        let opts = RunOptions {
            source: repo.path().display().to_string(),
            toolchain_dirs: vec![tools.path().to_path_buf()],
            keep_workspace: true,
            ..Default::default()
        };
        let r = completed(run(&wf, &Event::pull_request(["docs/intro.md"]), &opts).unwrap());
        assert!(r.success, "{:?}", r.steps);
        assert_eq!(r.executed_steps().count(), 4);
        let ws = r.workspace.clone().unwrap();
        assert!(ws.join("checkout/docs/build/index.html").is_file());
        std::fs::remove_dir_all(ws).unwrap();
    }
}
