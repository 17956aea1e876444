//! The agent loop: a state machine over the step queue, history, and
//! step counter.
//!
//! Steps run strictly one at a time; a step's result (including any
//! reflection call it triggers) is recorded before the next step is
//! considered. History order is execution order.

use serde_json::Value;
use skipper_core::{Action, Confirm, HistoryEntry, SafetyConfig, SkipReason, StepResult};
use skipper_observe::{Observer, RunLog};
use skipper_tools::Executor;

use crate::protocol::{PlanParseError, Planner};
use std::collections::VecDeque;

/// How a run ended. Budget exhaustion is a normal terminal condition,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    BudgetExhausted,
}

pub struct Controller<'a> {
    goal: String,
    planner: Planner<'a>,
    executor: Executor,
    config: SafetyConfig,
    observer: Observer,
    confirm: Box<dyn Confirm>,
    queue: VecDeque<Value>,
    history: Vec<HistoryEntry>,
    steps_taken: usize,
}

impl<'a> Controller<'a> {
    pub fn new(
        goal: impl Into<String>,
        oracle: &'a dyn skipper_llm::Oracle,
        executor: Executor,
        config: SafetyConfig,
        observer: Observer,
        confirm: Box<dyn Confirm>,
    ) -> Self {
        Self {
            goal: goal.into(),
            planner: Planner::new(oracle),
            executor,
            config,
            observer,
            confirm,
            queue: VecDeque::new(),
            history: Vec::new(),
            steps_taken: 0,
        }
    }

    /// Batch mode: seed the queue from the initial plan, then drain.
    /// Plan failure is the one fatal path out of here.
    pub fn run(&mut self) -> Result<RunOutcome, PlanParseError> {
        self.seed_plan()?;
        Ok(self.drain())
    }

    /// Ask the oracle for the initial plan and replace the queue with
    /// it. Returns the plan length.
    pub fn seed_plan(&mut self) -> Result<usize, PlanParseError> {
        let plan = self.planner.request_plan(&self.goal)?;
        self.observer
            .verbose_log(&format!("plan has {} step(s)", plan.len()));
        self.queue = plan.into();
        Ok(self.queue.len())
    }

    /// Process queued steps until the oracle reports completion or the
    /// budget runs out. Flushes the run log before returning.
    pub fn drain(&mut self) -> RunOutcome {
        let outcome = loop {
            if self.steps_taken >= self.config.max_steps {
                self.observer.verbose_log("step budget exhausted");
                break RunOutcome::BudgetExhausted;
            }
            if self.queue.is_empty() && !self.request_next() {
                break RunOutcome::Completed;
            }
            let Some(value) = self.queue.pop_front() else {
                break RunOutcome::Completed;
            };
            self.process(value);
        };
        self.flush_log();
        outcome
    }

    /// Run one queued step, if the queue has one and budget remains.
    pub fn run_one(&mut self) -> bool {
        if self.steps_taken >= self.config.max_steps {
            self.observer.warn_log("step budget exhausted");
            return false;
        }
        match self.queue.pop_front() {
            Some(value) => {
                self.process(value);
                true
            }
            None => false,
        }
    }

    /// Submit an ad hoc step through the same validate/gate/execute
    /// pipeline queued steps use.
    pub fn submit(&mut self, value: Value) {
        if self.steps_taken >= self.config.max_steps {
            self.observer.warn_log("step budget exhausted");
            return;
        }
        self.process(value);
    }

    /// Ask for the next step and enqueue it. `false` means the oracle
    /// has nothing more to propose.
    pub fn request_next(&mut self) -> bool {
        match self.planner.request_next_step(&self.goal, &self.history) {
            Some(step) => {
                self.queue.push_back(step);
                true
            }
            None => false,
        }
    }

    pub fn enqueue(&mut self, value: Value) {
        self.queue.push_back(value);
    }

    pub fn set_goal(&mut self, goal: impl Into<String>) {
        self.goal = goal.into();
    }

    #[must_use]
    pub fn goal(&self) -> &str {
        &self.goal
    }

    #[must_use]
    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    /// Write the run log if a path is configured; failure to persist is
    /// a warning, never fatal.
    pub fn flush_log(&self) {
        let mut run = RunLog::new(&self.goal, &self.config);
        run.history = self.history.to_vec();
        if let Err(err) = self.observer.flush_run_log(&run) {
            self.observer.warn_log(&err.to_string());
        }
    }

    fn process(&mut self, value: Value) {
        self.steps_taken += 1;

        if let Some(reason) = skipper_policy::validate(&value, &self.config) {
            self.record(value, StepResult::InvalidStep(reason));
            return;
        }
        let step = match skipper_policy::parse_step(&value) {
            Ok(step) => step,
            Err(err) => {
                self.record(value, StepResult::InvalidStep(err.to_string()));
                return;
            }
        };

        if self.config.dry_run {
            self.record(value, StepResult::Skipped(SkipReason::DryRun));
            return;
        }
        if self.config.simulate && step.action.has_side_effects() {
            self.record(value, StepResult::Skipped(SkipReason::Simulate));
            return;
        }
        if self.needs_confirmation(step.action) && !self.config.yes {
            let question = format!("run step: {} {} ?", step.action, step.target);
            if !self.confirm.confirm(&question) {
                self.record(value, StepResult::Declined);
                return;
            }
        }

        let result = self.executor.execute(&step, &self.config);
        let failed_text = result
            .outcome_text()
            .filter(|text| failure_pattern(text))
            .map(ToString::to_string);
        self.record(value.clone(), result);

        if self.config.reflect
            && let Some(error_text) = failed_text
            && let Some(recovery) =
                self.planner
                    .request_recovery_step(&self.goal, &value, &error_text)
        {
            self.observer.verbose_log("reflection produced a recovery step");
            // Recovery pre-empts the rest of the plan.
            self.queue.push_front(recovery);
        }
    }

    fn needs_confirmation(&self, action: Action) -> bool {
        match action {
            Action::Exec => self.config.confirm_exec,
            Action::Write | Action::ApplyPatch => self.config.confirm_write,
            Action::Read => self.config.confirm_read,
            Action::Retrieve => false,
        }
    }

    fn record(&mut self, step: Value, result: StepResult) {
        self.history.push(HistoryEntry { step, result });
        let number = self.history.len();
        if let Some(entry) = self.history.last() {
            self.observer.print_step(number, entry);
        }
    }
}

fn failure_pattern(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("error") || lower.contains("failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use skipper_core::AutoConfirm;
    use skipper_testkit::{EndlessOracle, MockOracle, seeded_workspace};
    use std::path::Path;

    fn controller<'a>(
        goal: &str,
        oracle: &'a dyn skipper_llm::Oracle,
        root: &Path,
        config: SafetyConfig,
    ) -> Controller<'a> {
        let executor = Executor::new(Some(root.to_path_buf()), Box::new(AutoConfirm));
        Controller::new(
            goal,
            oracle,
            executor,
            config,
            Observer::default(),
            Box::new(AutoConfirm),
        )
    }

    #[test]
    fn ls_scenario_runs_one_step_then_completes() {
        let dir = seeded_workspace(&[("a.txt", "x\n")]);
        let oracle = MockOracle::scripted([r#"[{"action":"read","target":"a.txt"}]"#, "[]"]);
        let config = SafetyConfig {
            yes: true,
            max_steps: 5,
            ..SafetyConfig::default()
        };
        let mut ctl = controller("read the file", &oracle, dir.path(), config);
        let outcome = ctl.run().expect("run");
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(ctl.history().len(), 1);
        // Plan request plus exactly one next-step query.
        assert_eq!(oracle.request_count(), 2);
        assert!(matches!(ctl.history()[0].result, StepResult::Success(_)));
    }

    #[test]
    fn budget_terminates_an_endless_planner() {
        let dir = seeded_workspace(&[("a.txt", "x\n")]);
        let oracle = EndlessOracle::new(r#"[{"action":"read","target":"a.txt"}]"#);
        let config = SafetyConfig {
            yes: true,
            max_steps: 3,
            ..SafetyConfig::default()
        };
        let mut ctl = controller("loop forever", &oracle, dir.path(), config);
        let outcome = ctl.run().expect("run");
        assert_eq!(outcome, RunOutcome::BudgetExhausted);
        assert_eq!(ctl.history().len(), 3);
        assert_eq!(ctl.steps_taken(), 3);
    }

    #[test]
    fn dry_run_records_skips_and_touches_nothing() {
        let dir = seeded_workspace(&[]);
        let oracle = MockOracle::scripted([
            r#"[{"action":"write","target":"out.txt","content":"x"},{"action":"exec","target":"ls"}]"#,
            "[]",
        ]);
        let config = SafetyConfig {
            yes: true,
            dry_run: true,
            allow_exec: true,
            allow_write: true,
            max_steps: 10,
            ..SafetyConfig::default()
        };
        let mut ctl = controller("write a file", &oracle, dir.path(), config);
        ctl.run().expect("run");
        assert_eq!(ctl.history().len(), 2);
        for entry in ctl.history() {
            assert!(matches!(
                entry.result,
                StepResult::Skipped(SkipReason::DryRun)
            ));
        }
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn simulate_skips_side_effects_but_reads_still_run() {
        let dir = seeded_workspace(&[("a.txt", "hello\n")]);
        let oracle = MockOracle::scripted([
            r#"[{"action":"write","target":"out.txt","content":"x"},{"action":"read","target":"a.txt"}]"#,
            "[]",
        ]);
        let config = SafetyConfig {
            yes: true,
            simulate: true,
            allow_write: true,
            max_steps: 10,
            ..SafetyConfig::default()
        };
        let mut ctl = controller("mixed", &oracle, dir.path(), config);
        ctl.run().expect("run");
        assert!(matches!(
            ctl.history()[0].result,
            StepResult::Skipped(SkipReason::Simulate)
        ));
        assert!(matches!(ctl.history()[1].result, StepResult::Success(_)));
        assert!(!dir.path().join("out.txt").exists());
    }

    #[test]
    fn invalid_steps_are_recorded_without_executing() {
        let dir = seeded_workspace(&[]);
        let oracle = MockOracle::scripted([r#"[{"action":"teleport","target":"moon"}]"#, "[]"]);
        let config = SafetyConfig {
            yes: true,
            max_steps: 5,
            ..SafetyConfig::default()
        };
        let mut ctl = controller("bad plan", &oracle, dir.path(), config);
        ctl.run().expect("run");
        assert_eq!(ctl.history().len(), 1);
        match &ctl.history()[0].result {
            StepResult::InvalidStep(reason) => assert!(reason.contains("teleport")),
            other => panic!("unexpected result: {other:?}"),
        }
        // The raw step is recorded verbatim.
        assert_eq!(ctl.history()[0].step["action"], "teleport");
    }

    #[test]
    fn reflection_pre_empts_the_remaining_plan() {
        let dir = seeded_workspace(&[("present.txt", "here\n")]);
        let oracle = MockOracle::scripted([
            r#"[{"action":"read","target":"missing.txt"},{"action":"read","target":"present.txt"}]"#,
            r#"{"action":"read","target":"present.txt"}"#,
            "[]",
            "[]",
        ]);
        let config = SafetyConfig {
            yes: true,
            reflect: true,
            max_steps: 10,
            ..SafetyConfig::default()
        };
        let mut ctl = controller("recover", &oracle, dir.path(), config);
        ctl.run().expect("run");
        // missing.txt errors, recovery runs next, then the original
        // second step.
        assert_eq!(ctl.history().len(), 3);
        assert!(matches!(ctl.history()[0].result, StepResult::Error(_)));
        assert_eq!(ctl.history()[1].step["target"], "present.txt");
        assert!(matches!(ctl.history()[1].result, StepResult::Success(_)));
    }

    #[test]
    fn no_reflection_when_disabled() {
        let dir = seeded_workspace(&[("present.txt", "here\n")]);
        let oracle = MockOracle::scripted([
            r#"[{"action":"read","target":"missing.txt"},{"action":"read","target":"present.txt"}]"#,
            "[]",
        ]);
        let config = SafetyConfig {
            yes: true,
            reflect: false,
            max_steps: 10,
            ..SafetyConfig::default()
        };
        let mut ctl = controller("no recovery", &oracle, dir.path(), config);
        ctl.run().expect("run");
        assert_eq!(ctl.history().len(), 2);
        assert_eq!(ctl.history()[1].step["target"], "present.txt");
        // Plan request plus the final next-step query only; no
        // recovery request in between.
        assert_eq!(oracle.request_count(), 2);
    }

    #[test]
    fn confirmation_gate_records_declines() {
        struct DenyAll;
        impl Confirm for DenyAll {
            fn confirm(&self, _question: &str) -> bool {
                false
            }
        }
        let dir = seeded_workspace(&[("a.txt", "x\n")]);
        let oracle = MockOracle::scripted([r#"[{"action":"read","target":"a.txt"}]"#, "[]"]);
        let config = SafetyConfig {
            confirm_read: true,
            max_steps: 5,
            ..SafetyConfig::default()
        };
        let executor = Executor::new(Some(dir.path().to_path_buf()), Box::new(AutoConfirm));
        let mut ctl = Controller::new(
            "gated read",
            &oracle,
            executor,
            config,
            Observer::default(),
            Box::new(DenyAll),
        );
        ctl.run().expect("run");
        assert_eq!(ctl.history().len(), 1);
        assert!(matches!(ctl.history()[0].result, StepResult::Declined));
    }

    #[test]
    fn plan_failure_is_fatal_and_carries_raw_text() {
        let dir = seeded_workspace(&[]);
        let oracle = MockOracle::scripted(["gibberish", "more gibberish"]);
        let config = SafetyConfig::default();
        let mut ctl = controller("doomed", &oracle, dir.path(), config);
        let err = ctl.run().expect_err("plan should fail");
        assert!(err.to_string().contains("more gibberish"));
    }

    #[test]
    fn run_log_is_flushed_on_completion() {
        let dir = seeded_workspace(&[("a.txt", "x\n")]);
        let log_dir = tempfile::tempdir().expect("tempdir");
        let log_path = log_dir.path().join("run.json");
        let oracle = MockOracle::scripted([r#"[{"action":"read","target":"a.txt"}]"#, "[]"]);
        let config = SafetyConfig {
            yes: true,
            max_steps: 5,
            ..SafetyConfig::default()
        };
        let executor = Executor::new(Some(dir.path().to_path_buf()), Box::new(AutoConfirm));
        let mut ctl = Controller::new(
            "logged run",
            &oracle,
            executor,
            config,
            Observer::new(Some(log_path.clone()), false),
            Box::new(AutoConfirm),
        );
        ctl.run().expect("run");
        let body = std::fs::read_to_string(&log_path).expect("log written");
        assert!(body.contains("logged run"));
        assert!(body.contains("a.txt"));
    }
}
