//! Two-phase task routing and agent dispatch.
//!
//! Phase one asks the router prompt (locally, at low complexity) where the
//! analysis should run. Phase two asks the task manager which agent handles the
//! task. The chosen agent then produces steps, code, or IDE actions.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::agents::codegen::{CodeRequest, GeneratedFile, generate_code, generate_files};
use crate::agents::cursor::cursor_steps;
use crate::agents::steps::{debugger_steps, role_steps};
use crate::core::parser::{InstructionDocument, parse, parse_json_object};
use crate::core::step::Step;
use crate::core::types::{
    AgentKind, Complexity, ExecutionResult, RouteDecision, RouteTarget, TaskAnalysis,
};
use crate::executor::{RunReport, RunStatus, StepExecutor};
use crate::io::config::AgentConfig;
use crate::io::files::FileAccess;
use crate::io::ide::IdeControl;
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::prompt::PromptEngine;

/// Result of dispatching one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// A step-producing agent ran (developer, tester, debugger, cursor).
    Steps { report: RunReport },
    /// Code generation wrote one file per requested path.
    CodeWritten { files: Vec<GeneratedFile> },
    /// Code generation without target paths.
    CodeReturned { code: String },
    /// The IDE agent's reply had no `actions` document.
    CouldNotParse,
    UnknownAgent { agent: String },
}

impl TaskOutcome {
    pub fn succeeded(&self) -> bool {
        match self {
            TaskOutcome::Steps { report } => report.succeeded(),
            TaskOutcome::CodeWritten { files } => files.iter().all(|file| file.written),
            TaskOutcome::CodeReturned { .. } => true,
            TaskOutcome::CouldNotParse | TaskOutcome::UnknownAgent { .. } => false,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            TaskOutcome::Steps { report } => report.summary(),
            TaskOutcome::CodeWritten { files } => {
                let written = files.iter().filter(|file| file.written).count();
                format!("generated {written}/{} file(s)", files.len())
            }
            TaskOutcome::CodeReturned { code } => format!("generated {} bytes of code", code.len()),
            TaskOutcome::CouldNotParse => "Could not parse instructions".to_string(),
            TaskOutcome::UnknownAgent { agent } => format!("unknown agent type: {agent}"),
        }
    }
}

/// One routed task, kept for the lifetime of the router.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub task: String,
    pub analysis: TaskAnalysis,
    pub success: bool,
    pub summary: String,
}

pub struct TaskRouter<'a, O: Oracle, I: IdeControl> {
    workdir: PathBuf,
    config: &'a AgentConfig,
    oracle: &'a O,
    ide: &'a I,
    prompts: &'a PromptEngine,
    history: Vec<HistoryEntry>,
}

impl<'a, O: Oracle, I: IdeControl> TaskRouter<'a, O, I> {
    pub fn new(
        workdir: &Path,
        config: &'a AgentConfig,
        oracle: &'a O,
        ide: &'a I,
        prompts: &'a PromptEngine,
    ) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            config,
            oracle,
            ide,
            prompts,
            history: Vec::new(),
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Phase one: where should the analysis run?
    pub fn route(&self, task: &str) -> Result<RouteDecision> {
        let request = OracleRequest::new(self.prompts.router_system()?, task, Complexity::Low)
            .prefer_local(true);
        let raw = self.oracle.ask(&request);
        let Some(Value::Object(fields)) = parse_json_object(&raw) else {
            warn!("route decision unreadable, using default");
            return Ok(RouteDecision::default());
        };
        Ok(route_decision(&fields))
    }

    /// Phase two: which agent handles the task, and with what instructions.
    #[instrument(skip_all)]
    pub fn analyze(&self, task: &str) -> Result<TaskAnalysis> {
        let route = self.route(task)?;
        info!(route_to = ?route.route_to, complexity = %route.complexity, "routed task");
        let request = OracleRequest::new(self.prompts.task_manager_system()?, task, route.complexity)
            .prefer_local(route.route_to == RouteTarget::Local);
        let raw = self.oracle.ask(&request);
        match parse(&raw) {
            Some(InstructionDocument::TaskAnalysis(fields)) => {
                Ok(task_analysis(&fields, task, route.complexity))
            }
            _ => {
                warn!("task analysis unreadable, using default");
                Ok(TaskAnalysis::fallback(task, route.complexity))
            }
        }
    }

    /// Analyze `task`, dispatch it to its agent, and record it in the history.
    pub fn execute_task<F: FnMut(&ExecutionResult)>(
        &mut self,
        task: &str,
        on_result: F,
    ) -> Result<(TaskAnalysis, TaskOutcome)> {
        let analysis = self.analyze(task)?;
        info!(agent = %analysis.agent, complexity = %analysis.complexity, "dispatching task");
        let outcome = self.dispatch(&analysis, on_result)?;
        self.history.push(HistoryEntry {
            task: task.to_string(),
            analysis: analysis.clone(),
            success: outcome.succeeded(),
            summary: outcome.summary(),
        });
        Ok((analysis, outcome))
    }

    fn dispatch<F: FnMut(&ExecutionResult)>(
        &self,
        analysis: &TaskAnalysis,
        on_result: F,
    ) -> Result<TaskOutcome> {
        let kind = match analysis.agent_kind() {
            Ok(kind) => kind,
            Err(err) => {
                warn!(err = %err, "task analysis named an unknown agent");
                return Ok(TaskOutcome::UnknownAgent {
                    agent: analysis.agent.clone(),
                });
            }
        };
        let complexity = analysis.complexity;
        match kind {
            AgentKind::Developer | AgentKind::Tester => {
                let steps = role_steps(
                    self.oracle,
                    self.prompts,
                    kind,
                    Some(analysis.instructions.as_str()),
                    complexity,
                )?;
                let report = self.executor().execute(steps, on_result)?;
                Ok(TaskOutcome::Steps { report })
            }
            AgentKind::Debugger => {
                let steps =
                    debugger_steps(self.oracle, self.prompts, &analysis.instructions, complexity)?;
                let report = self.executor().execute(steps, on_result)?;
                Ok(TaskOutcome::Steps { report })
            }
            AgentKind::CodeGeneration => {
                if analysis.file_paths.is_empty() {
                    let code = generate_code(
                        self.oracle,
                        self.prompts,
                        &CodeRequest {
                            description: &analysis.instructions,
                            language: &analysis.language,
                            file_path: None,
                            complexity,
                        },
                    )?;
                    return Ok(TaskOutcome::CodeReturned { code });
                }
                let files = generate_files(
                    self.oracle,
                    self.prompts,
                    &FileAccess::new(&self.workdir),
                    &analysis.instructions,
                    &analysis.language,
                    &analysis.file_paths,
                    complexity,
                );
                Ok(TaskOutcome::CodeWritten { files })
            }
            AgentKind::Cursor => {
                let Some(steps) =
                    cursor_steps(self.oracle, self.prompts, &analysis.instructions, complexity)?
                else {
                    return Ok(TaskOutcome::CouldNotParse);
                };
                run_ide_steps(self.executor(), steps, on_result)
            }
        }
    }

    fn executor(&self) -> StepExecutor<'a, O, I> {
        StepExecutor::new(
            &self.workdir,
            self.config,
            self.oracle,
            self.ide,
            self.prompts,
        )
    }
}

/// Run translated IDE actions. An empty `actions` list is a successful no-op.
pub fn run_ide_steps<O: Oracle, I: IdeControl, F: FnMut(&ExecutionResult)>(
    executor: StepExecutor<'_, O, I>,
    steps: Vec<Step>,
    on_result: F,
) -> Result<TaskOutcome> {
    if steps.is_empty() {
        return Ok(TaskOutcome::Steps {
            report: RunReport {
                results: Vec::new(),
                status: RunStatus::Succeeded,
            },
        });
    }
    let report = executor.with_ide_edits().execute(steps, on_result)?;
    Ok(TaskOutcome::Steps { report })
}

fn route_decision(fields: &Map<String, Value>) -> RouteDecision {
    let route_to = match fields.get("route_to").and_then(Value::as_str) {
        Some(target) if target.trim().eq_ignore_ascii_case("local") => RouteTarget::Local,
        _ => RouteTarget::Remote,
    };
    let complexity = fields
        .get("complexity")
        .and_then(Value::as_str)
        .and_then(|text| text.parse().ok())
        .unwrap_or_default();
    let explanation = fields
        .get("explanation")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    RouteDecision {
        route_to,
        complexity,
        explanation,
    }
}

fn field_str<'f>(fields: &'f Map<String, Value>, key: &str) -> Option<&'f str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn task_analysis(fields: &Map<String, Value>, task: &str, routed: Complexity) -> TaskAnalysis {
    let complexity = match field_str(fields, "complexity") {
        Some(value) => value.parse().unwrap_or_else(|err: String| {
            warn!(err = %err, "task analysis complexity invalid, using routed complexity");
            routed
        }),
        None => routed,
    };
    let file_paths = match fields.get("file_paths") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::String(path)) if !path.trim().is_empty() => vec![path.trim().to_string()],
        _ => Vec::new(),
    };
    TaskAnalysis {
        complexity,
        agent: field_str(fields, "agent")
            .unwrap_or(AgentKind::Developer.as_str())
            .to_string(),
        instructions: field_str(fields, "instructions").unwrap_or(task).to_string(),
        file_paths,
        language: field_str(fields, "language").unwrap_or("python").to_string(),
    }
}
