//! Cross-crate wiring: a full batch run with a scripted oracle and a
//! stubbed shell.

use std::path::Path;
use std::time::Duration;

use skipper_agent::{Controller, RunOutcome};
use skipper_core::{AutoConfirm, SafetyConfig, StepResult};
use skipper_observe::Observer;
use skipper_testkit::{MockOracle, seeded_workspace};
use skipper_tools::Executor;
use skipper_tools::shell::{ShellRunResult, ShellRunner};

struct StubShell {
    stdout: String,
}

impl ShellRunner for StubShell {
    fn run(&self, _cmd: &str, _cwd: &Path, _timeout: Duration) -> anyhow::Result<ShellRunResult> {
        Ok(ShellRunResult {
            status: Some(0),
            stdout: self.stdout.clone(),
            stderr: String::new(),
            timed_out: false,
        })
    }
}

#[test]
fn list_files_goal_executes_one_exec_step_then_terminates() {
    let dir = seeded_workspace(&[("a.txt", "x\n")]);
    let oracle = MockOracle::scripted([r#"[{"action":"exec","target":"ls"}]"#, "[]"]);
    let config = SafetyConfig {
        allow_exec: true,
        yes: true,
        max_steps: 5,
        ..SafetyConfig::default()
    };
    let executor = Executor::new(Some(dir.path().to_path_buf()), Box::new(AutoConfirm))
        .with_shell(Box::new(StubShell {
            stdout: "a.txt\n".to_string(),
        }));
    let mut controller = Controller::new(
        "list files",
        &oracle,
        executor,
        config,
        Observer::default(),
        Box::new(AutoConfirm),
    );

    let outcome = controller.run().expect("run");
    assert_eq!(outcome, RunOutcome::Completed);
    assert_eq!(controller.history().len(), 1);
    match &controller.history()[0].result {
        StepResult::Success(text) => assert!(text.contains("a.txt")),
        other => panic!("unexpected result: {other:?}"),
    }
    // One plan request, one next-step query that returned [].
    assert_eq!(oracle.request_count(), 2);
}

#[test]
fn whitelist_blocks_steps_outside_its_scope() {
    let dir = seeded_workspace(&[("src/lib.rs", "pub fn x() {}\n"), ("secret.txt", "hidden\n")]);
    let oracle = MockOracle::scripted([
        r#"[{"action":"read","target":"src/lib.rs"},{"action":"read","target":"secret.txt"}]"#,
        "[]",
    ]);
    let config = SafetyConfig {
        yes: true,
        max_steps: 5,
        whitelist: vec!["src/".to_string()],
        ..SafetyConfig::default()
    };
    let executor = Executor::new(Some(dir.path().to_path_buf()), Box::new(AutoConfirm));
    let mut controller = Controller::new(
        "read sources",
        &oracle,
        executor,
        config,
        Observer::default(),
        Box::new(AutoConfirm),
    );

    controller.run().expect("run");
    assert!(matches!(
        controller.history()[0].result,
        StepResult::Success(_)
    ));
    match &controller.history()[1].result {
        StepResult::InvalidStep(reason) => assert!(reason.contains("secret.txt")),
        other => panic!("unexpected result: {other:?}"),
    }
}
