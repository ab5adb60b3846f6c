//! Step execution with bounded recovery.
//!
//! Steps run strictly in order. Each result is recorded in memory and in the
//! persistent action log before the next step starts. The first failure stops
//! the sequence and its error goes to the debugger role. If the debugger answers
//! with steps, they run as a new sequence; otherwise the run ends. The number
//! of recovery rounds is capped by `max_recovery_depth`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::steps::debugger_steps;
use crate::core::budget::RecoveryBudget;
use crate::core::step::Step;
use crate::core::types::{AgentKind, BackgroundProcessRecord, Complexity, ExecutionResult};
use crate::io::config::AgentConfig;
use crate::io::files::FileAccess;
use crate::io::ide::IdeControl;
use crate::io::oracle::Oracle;
use crate::io::process::{CommandOutput, ProcessRunner, terminate, venv_python};
use crate::io::prompt::PromptEngine;
use crate::io::state_store::StateStore;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step of the last sequence succeeded.
    Succeeded,
    /// The initial step list was empty.
    NoInstructions,
    /// The debugger returned no usable steps for `error`.
    Unrecoverable { error: String },
    /// Recovery was attempted `attempts` times and the last sequence still failed.
    RecoveryExhausted { attempts: u32, last_error: String },
}

/// Every result produced by a run, plus how it ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub results: Vec<ExecutionResult>,
    #[serde(flatten)]
    pub status: RunStatus,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// One-line description for progress output.
    pub fn summary(&self) -> String {
        let ok = self.results.iter().filter(|r| r.success).count();
        let total = self.results.len();
        match &self.status {
            RunStatus::Succeeded => format!("succeeded ({ok}/{total} steps ok)"),
            RunStatus::NoInstructions => "no instructions".to_string(),
            RunStatus::Unrecoverable { error } => {
                format!("failed, no recovery steps ({ok}/{total} steps ok): {error}")
            }
            RunStatus::RecoveryExhausted {
                attempts,
                last_error,
            } => format!(
                "failed after {attempts} recovery attempt(s) ({ok}/{total} steps ok): {last_error}"
            ),
        }
    }
}

struct StepOutput {
    success: bool,
    output: String,
}

impl StepOutput {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Interprets steps against one workspace.
pub struct StepExecutor<'a, O: Oracle, I: IdeControl> {
    config: &'a AgentConfig,
    oracle: &'a O,
    ide: &'a I,
    prompts: &'a PromptEngine,
    files: FileAccess,
    state: StateStore,
    runner: ProcessRunner,
    active_venv: Option<PathBuf>,
    /// `None` until the first `run_terminal` step asks the IDE for one.
    terminal: Option<Option<String>>,
    recovery_complexity: Complexity,
    /// Send `modify_file` edits through the IDE instead of the filesystem.
    ide_edits: bool,
}

impl<'a, O: Oracle, I: IdeControl> StepExecutor<'a, O, I> {
    pub fn new(
        workdir: &Path,
        config: &'a AgentConfig,
        oracle: &'a O,
        ide: &'a I,
        prompts: &'a PromptEngine,
    ) -> Self {
        Self {
            config,
            oracle,
            ide,
            prompts,
            files: FileAccess::new(workdir),
            state: StateStore::new(workdir.join(&config.state_file)),
            runner: ProcessRunner::new(
                workdir,
                config.command_timeout(),
                config.command_output_limit_bytes,
            ),
            active_venv: None,
            terminal: None,
            recovery_complexity: AgentKind::Debugger.default_complexity(),
            ide_edits: false,
        }
    }

    /// Complexity used for debugger requests.
    pub fn with_recovery_complexity(mut self, complexity: Complexity) -> Self {
        self.recovery_complexity = complexity;
        self
    }

    /// Route `modify_file` steps to the IDE, as IDE action documents expect.
    pub fn with_ide_edits(mut self) -> Self {
        self.ide_edits = true;
        self
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Run `steps`, recovering from failures through the debugger role.
    ///
    /// `on_result` sees every result as soon as it is recorded.
    #[instrument(skip_all, fields(steps = steps.len(), max_recovery_depth = self.config.max_recovery_depth))]
    pub fn execute<F: FnMut(&ExecutionResult)>(
        &mut self,
        steps: Vec<Step>,
        mut on_result: F,
    ) -> Result<RunReport> {
        let mut results = Vec::new();
        if steps.is_empty() {
            return Ok(RunReport {
                results,
                status: RunStatus::NoInstructions,
            });
        }

        let mut budget = RecoveryBudget::new(self.config.max_recovery_depth);
        let mut sequence = steps;
        loop {
            let Some(error) = self.run_sequence(&sequence, &mut results, &mut on_result)? else {
                return Ok(RunReport {
                    results,
                    status: RunStatus::Succeeded,
                });
            };

            if !budget.try_consume() {
                warn!(attempts = budget.used(), "recovery budget exhausted");
                return Ok(RunReport {
                    results,
                    status: RunStatus::RecoveryExhausted {
                        attempts: budget.used(),
                        last_error: error,
                    },
                });
            }

            info!(attempt = %budget, "requesting recovery steps");
            let fix = debugger_steps(self.oracle, self.prompts, &error, self.recovery_complexity)?;
            if fix.is_empty() {
                warn!("debugger returned no steps");
                return Ok(RunReport {
                    results,
                    status: RunStatus::Unrecoverable { error },
                });
            }
            sequence = fix;
        }
    }

    /// Run one sequence. Returns the failing step's output, or `None` when all succeeded.
    fn run_sequence<F: FnMut(&ExecutionResult)>(
        &mut self,
        steps: &[Step],
        results: &mut Vec<ExecutionResult>,
        on_result: &mut F,
    ) -> Result<Option<String>> {
        for (index, step) in steps.iter().enumerate() {
            info!(index, action = step.action_name(), "running step");
            let output = match self.dispatch(step) {
                Ok(output) => output,
                Err(err) => StepOutput::failed(format!("{err:#}")),
            };
            let result = ExecutionResult {
                step_index: index,
                action: step.action_name().to_string(),
                success: output.success,
                output: output.output,
            };
            self.state.record_action(&result)?;
            on_result(&result);
            let failed = !result.success;
            let error = result.output.clone();
            results.push(result);
            if failed {
                debug!(index, "step failed, stopping sequence");
                return Ok(Some(error));
            }
        }
        Ok(None)
    }

    fn dispatch(&mut self, step: &Step) -> Result<StepOutput> {
        match step {
            Step::CreateVenv { path } => self.create_venv(path),
            Step::InstallDeps { deps, venv } => self.install_deps(deps, venv.as_deref()),
            Step::CreateFile { path, content } => {
                if !self.files.create(path, content) {
                    return Ok(StepOutput::failed(format!("could not create {path}")));
                }
                self.state.record_file(path)?;
                Ok(StepOutput::ok(format!("File {path} created.")))
            }
            Step::ModifyFile { path, content } => {
                let modified = if self.ide_edits {
                    self.ide.modify(path, content)
                } else {
                    self.files.modify(path, content)
                };
                if !modified {
                    return Ok(StepOutput::failed(format!("could not modify {path}")));
                }
                self.state.record_file(path)?;
                Ok(StepOutput::ok(format!("File {path} modified.")))
            }
            Step::RunFile { file, venv } => {
                let python = self.python(venv.as_deref());
                let output = self.runner.run_program(&python, &[file.as_str()])?;
                Ok(self.command_output(&output))
            }
            Step::RunCommand {
                command,
                venv,
                background,
            } => self.run_command(command, venv.as_deref(), *background),
            Step::KillProcess => self.kill_processes(),
            Step::OpenFile { path } => {
                if self.ide.open(path) {
                    Ok(StepOutput::ok(format!("Opened {path}.")))
                } else {
                    Ok(StepOutput::failed(format!("could not open {path}")))
                }
            }
            Step::RunTerminal { command } => self.run_terminal(command),
            Step::Unknown { name } => Ok(StepOutput::failed(format!("unknown action: {name}"))),
            Step::Malformed { error, .. } => Ok(StepOutput::failed(error.clone())),
        }
    }

    fn create_venv(&mut self, path: &str) -> Result<StepOutput> {
        let python = PathBuf::from(&self.config.python);
        let output = self.runner.run_program(&python, &["-m", "venv", path])?;
        if !output.success() {
            return Ok(self.command_output(&output));
        }
        self.active_venv = Some(self.files.resolve(path));
        Ok(StepOutput::ok(format!("Virtual environment created at {path}.")))
    }

    fn install_deps(&self, deps: &[String], venv: Option<&str>) -> Result<StepOutput> {
        let python = self.python(venv);
        for dep in deps {
            debug!(dep = %dep, "installing dependency");
            let output = self
                .runner
                .run_program(&python, &["-m", "pip", "install", dep.as_str()])?;
            if !output.success() {
                return Ok(self.command_output(&output));
            }
        }
        Ok(StepOutput::ok("Dependencies installed successfully."))
    }

    fn run_command(
        &self,
        command: &str,
        venv: Option<&str>,
        background: bool,
    ) -> Result<StepOutput> {
        let venv = self.venv(venv);
        if background {
            let pid = self.runner.spawn_detached(command, venv.as_deref())?;
            self.state.record_background(BackgroundProcessRecord {
                command: command.to_string(),
                pid,
            })?;
            return Ok(StepOutput::ok(format!(
                "Started background process {pid}: {command}"
            )));
        }
        let output = self.runner.run(command, venv.as_deref())?;
        Ok(self.command_output(&output))
    }

    fn kill_processes(&self) -> Result<StepOutput> {
        let records = self.state.take_background_processes()?;
        let mut failures = Vec::new();
        for record in &records {
            if let Err(err) = terminate(record.pid) {
                warn!(pid = record.pid, err = %format!("{err:#}"), "failed to terminate background process");
                failures.push(format!("{} ({err:#})", record.pid));
            }
        }
        let killed = records.len() - failures.len();
        let mut message = format!("Terminated {killed} of {} background process(es).", records.len());
        if !failures.is_empty() {
            message.push_str(&format!(" Failed: {}", failures.join(", ")));
        }
        Ok(StepOutput::ok(message))
    }

    fn run_terminal(&mut self, command: &str) -> Result<StepOutput> {
        let ide = self.ide;
        let name = self.config.ide.terminal_name.as_str();
        let terminal = self
            .terminal
            .get_or_insert_with(|| ide.create_terminal(name))
            .clone();
        match terminal {
            Some(id) => {
                if self.ide.run_in_terminal(&id, command) {
                    Ok(StepOutput::ok(format!("Sent to terminal {id}: {command}")))
                } else {
                    Ok(StepOutput::failed(format!(
                        "terminal {id} rejected command: {command}"
                    )))
                }
            }
            None => {
                debug!("no ide terminal, running command directly");
                let output = self.runner.run(command, None)?;
                Ok(self.command_output(&output))
            }
        }
    }

    /// Explicit venv, else the active one.
    fn venv(&self, explicit: Option<&str>) -> Option<PathBuf> {
        match explicit {
            Some(path) => Some(self.files.resolve(path)),
            None => self.active_venv.clone(),
        }
    }

    fn python(&self, venv: Option<&str>) -> PathBuf {
        match self.venv(venv) {
            Some(venv) => venv_python(&venv),
            None => PathBuf::from(&self.config.python),
        }
    }

    fn command_output(&self, output: &CommandOutput) -> StepOutput {
        let text = output.summary(self.runner.timeout());
        if output.success() {
            StepOutput::ok(text)
        } else {
            StepOutput::failed(text)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::core::parser::parse_steps;
    use crate::test_support::{RecordingIde, ScriptedOracle, TestWorkspace, steps_reply};

    fn steps(reply: &str) -> Vec<Step> {
        parse_steps(reply)
    }

    #[test]
    fn empty_step_list_is_no_instructions() {
        let ws = TestWorkspace::new();
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor.execute(Vec::new(), |_| {}).expect("execute");

        assert_eq!(report.status, RunStatus::NoInstructions);
        assert_eq!(oracle.request_count(), 0);
    }

    #[test]
    fn create_then_cat_reports_file_content() {
        let ws = TestWorkspace::new();
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);
        let mut seen = Vec::new();

        let report = executor
            .execute(
                steps(&steps_reply(vec![
                    json!({"action": "create_file", "path": "a.txt", "content": "hi"}),
                    json!({"action": "run_command", "command": "cat a.txt"}),
                ])),
                |result| seen.push(result.output.clone()),
            )
            .expect("execute");

        assert!(report.succeeded());
        assert_eq!(seen, vec!["File a.txt created.", "hi"]);
        let state = ws.state();
        assert_eq!(state.files, vec!["a.txt"]);
        assert_eq!(state.actions, report.results);
    }

    #[test]
    fn modify_file_reports_modified() {
        let ws = TestWorkspace::new();
        ws.write("a.txt", "old");
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(
                vec![Step::ModifyFile {
                    path: "a.txt".to_string(),
                    content: "new".to_string(),
                }],
                |_| {},
            )
            .expect("execute");

        assert_eq!(report.results[0].output, "File a.txt modified.");
        assert_eq!(ws.read("a.txt"), "new");
    }

    #[test]
    fn unknown_action_fails_without_side_effects() {
        let ws = TestWorkspace::new();
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(steps(r#"{"steps": [{"action": "teleport"}]}"#), |_| {})
            .expect("execute");

        assert_eq!(report.results.len(), 1);
        assert!(!report.results[0].success);
        assert_eq!(report.results[0].output, "unknown action: teleport");
        assert!(ws.state().files.is_empty());
    }

    #[test]
    fn failure_stops_sequence_and_asks_debugger_once() {
        let ws = TestWorkspace::new();
        // Debugger answers with nothing usable.
        let oracle = ScriptedOracle::new(["I cannot help"]);
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(
                steps(&steps_reply(vec![
                    json!({"action": "run_command", "command": "true"}),
                    json!({"action": "run_command", "command": "echo nope >&2; false"}),
                    json!({"action": "create_file", "path": "never.txt"}),
                ])),
                |_| {},
            )
            .expect("execute");

        assert_eq!(report.results.len(), 2);
        assert_eq!(oracle.request_count(), 1);
        assert!(oracle.requests()[0].user_prompt.contains("nope"));
        assert_eq!(
            report.status,
            RunStatus::Unrecoverable {
                error: "nope".to_string()
            }
        );
        assert!(!ws.path().join("never.txt").exists());
    }

    #[test]
    fn recovery_steps_run_after_failure() {
        let ws = TestWorkspace::new();
        let oracle = ScriptedOracle::new([steps_reply(vec![
            json!({"action": "create_file", "path": "fixed.txt", "content": "ok"}),
        ])]);
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts)
            .with_recovery_complexity(Complexity::High);

        let report = executor
            .execute(
                vec![Step::RunCommand {
                    command: "exit 1".to_string(),
                    venv: None,
                    background: false,
                }],
                |_| {},
            )
            .expect("execute");

        assert!(report.succeeded());
        assert_eq!(report.results.len(), 2);
        assert_eq!(report.results[1].step_index, 0);
        assert_eq!(oracle.requests()[0].complexity, Complexity::High);
        assert_eq!(ws.read("fixed.txt"), "ok");
    }

    #[test]
    fn recovery_stops_at_max_depth() {
        let mut ws = TestWorkspace::new();
        ws.config.max_recovery_depth = 2;
        let failing = steps_reply(vec![json!({"action": "run_command", "command": "exit 3"})]);
        let oracle = ScriptedOracle::new([failing.clone(), failing.clone(), failing]);
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(
                vec![Step::RunCommand {
                    command: "exit 3".to_string(),
                    venv: None,
                    background: false,
                }],
                |_| {},
            )
            .expect("execute");

        assert_eq!(oracle.request_count(), 2);
        assert_eq!(report.results.len(), 3);
        assert_eq!(
            report.status,
            RunStatus::RecoveryExhausted {
                attempts: 2,
                last_error: "command exited with status 3".to_string()
            }
        );
    }

    #[test]
    fn zero_depth_disables_recovery() {
        let mut ws = TestWorkspace::new();
        ws.config.max_recovery_depth = 0;
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(steps(r#"{"steps": [{"action": "run_file"}]}"#), |_| {})
            .expect("execute");

        assert_eq!(oracle.request_count(), 0);
        assert!(matches!(
            report.status,
            RunStatus::RecoveryExhausted { attempts: 0, .. }
        ));
        assert!(report.results[0].output.contains("invalid parameters for run_file"));
    }

    #[test]
    fn kill_process_empties_list_even_when_signals_fail() {
        let ws = TestWorkspace::new();
        let store = StateStore::new(ws.state_path());
        for pid in [i32::MAX as u32 - 1, i32::MAX as u32 - 2] {
            store
                .record_background(BackgroundProcessRecord {
                    command: "ghost".to_string(),
                    pid,
                })
                .expect("record");
        }
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(vec![Step::KillProcess], |_| {})
            .expect("execute");

        assert!(report.succeeded());
        assert!(report.results[0].output.starts_with("Terminated 0 of 2"));
        assert!(ws.state().background_processes.is_empty());
    }

    #[test]
    fn background_command_is_recorded_and_killed() {
        let ws = TestWorkspace::new();
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(
                vec![
                    Step::RunCommand {
                        command: "sleep 30".to_string(),
                        venv: None,
                        background: true,
                    },
                    Step::KillProcess,
                ],
                |_| {},
            )
            .expect("execute");

        assert!(report.succeeded());
        assert!(report.results[0].output.starts_with("Started background process "));
        assert_eq!(report.results[1].output, "Terminated 1 of 1 background process(es).");
        assert!(ws.state().background_processes.is_empty());
    }

    #[test]
    fn terminal_is_created_once_and_reused() {
        let ws = TestWorkspace::new();
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        executor
            .execute(
                vec![
                    Step::RunTerminal {
                        command: "ls".to_string(),
                    },
                    Step::RunTerminal {
                        command: "pwd".to_string(),
                    },
                ],
                |_| {},
            )
            .expect("execute");

        assert_eq!(
            ide.calls(),
            vec![
                "create_terminal Agent Terminal",
                "run_in_terminal t-1 ls",
                "run_in_terminal t-1 pwd"
            ]
        );
    }

    #[test]
    fn run_terminal_falls_back_to_direct_execution() {
        let ws = TestWorkspace::new();
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::unavailable();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(
                vec![Step::RunTerminal {
                    command: "echo direct".to_string(),
                }],
                |_| {},
            )
            .expect("execute");

        assert!(report.succeeded());
        assert_eq!(report.results[0].output, "direct");
    }

    #[test]
    fn open_file_failure_is_a_failed_step() {
        let mut ws = TestWorkspace::new();
        ws.config.max_recovery_depth = 0;
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::unavailable();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(
                vec![Step::OpenFile {
                    path: "main.py".to_string(),
                }],
                |_| {},
            )
            .expect("execute");

        assert!(!report.results[0].success);
        assert_eq!(ide.calls(), vec!["open main.py"]);
    }

    #[test]
    fn explicit_venv_sets_virtual_env_for_commands() {
        let ws = TestWorkspace::new();
        let oracle = ScriptedOracle::default();
        let ide = RecordingIde::accepting();
        let prompts = PromptEngine::new();
        let mut executor = StepExecutor::new(ws.path(), &ws.config, &oracle, &ide, &prompts);

        let report = executor
            .execute(
                vec![Step::RunCommand {
                    command: "basename \"$VIRTUAL_ENV\"".to_string(),
                    venv: Some("env1".to_string()),
                    background: false,
                }],
                |_| {},
            )
            .expect("execute");

        assert_eq!(report.results[0].output, "env1");
    }
}
