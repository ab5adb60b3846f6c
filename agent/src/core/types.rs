//! Shared deterministic types for the step engine.
//!
//! These types define stable contracts between components. They carry no I/O
//! and serialize to the shapes persisted in `state.json` or exchanged with the
//! oracle.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Complexity hint used to pick an oracle backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

impl Complexity {
    pub fn as_str(self) -> &'static str {
        match self {
            Complexity::Low => "low",
            Complexity::Medium => "medium",
            Complexity::High => "high",
        }
    }
}

impl fmt::Display for Complexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Complexity::Low),
            "medium" => Ok(Complexity::Medium),
            "high" => Ok(Complexity::High),
            other => Err(format!("unknown complexity '{other}' (expected low|medium|high)")),
        }
    }
}

/// Agent role chosen by the task manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Developer,
    CodeGeneration,
    Tester,
    Debugger,
    Cursor,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Developer => "developer",
            AgentKind::CodeGeneration => "code_generation",
            AgentKind::Tester => "tester",
            AgentKind::Debugger => "debugger",
            AgentKind::Cursor => "cursor",
        }
    }

    /// Complexity used when the caller gives none.
    pub fn default_complexity(self) -> Complexity {
        match self {
            AgentKind::CodeGeneration => Complexity::High,
            AgentKind::Tester => Complexity::Low,
            AgentKind::Developer | AgentKind::Debugger | AgentKind::Cursor => Complexity::Medium,
        }
    }
}

impl FromStr for AgentKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "developer" => Ok(AgentKind::Developer),
            // The task manager prompt lists "code generation" with a space.
            "code_generation" | "code generation" => Ok(AgentKind::CodeGeneration),
            "tester" => Ok(AgentKind::Tester),
            "debugger" => Ok(AgentKind::Debugger),
            "cursor" | "cursor integration" => Ok(AgentKind::Cursor),
            other => Err(format!("unknown agent type: {other}")),
        }
    }
}

/// Recorded outcome of one executed step. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Index of the step within the sequence that contained it.
    pub step_index: usize,
    /// Wire name of the action (`create_file`, `teleport`, ...).
    pub action: String,
    pub success: bool,
    pub output: String,
}

/// A detached process started by a background `run_command` step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackgroundProcessRecord {
    pub command: String,
    pub pid: u32,
}

/// Where phase one of the router wants the analysis to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTarget {
    Local,
    Remote,
}

/// Phase-one routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDecision {
    pub route_to: RouteTarget,
    pub complexity: Complexity,
    pub explanation: String,
}

impl Default for RouteDecision {
    fn default() -> Self {
        Self {
            route_to: RouteTarget::Local,
            complexity: Complexity::Medium,
            explanation: "Default routing due to parsing failure".to_string(),
        }
    }
}

/// Phase-two routing decision: which agent handles the task and how.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskAnalysis {
    pub complexity: Complexity,
    /// Raw agent name; resolved with [`TaskAnalysis::agent_kind`].
    pub agent: String,
    pub instructions: String,
    pub file_paths: Vec<String>,
    pub language: String,
}

impl TaskAnalysis {
    /// Fallback analysis used when the task manager's reply cannot be read.
    pub fn fallback(task: &str, complexity: Complexity) -> Self {
        Self {
            complexity,
            agent: AgentKind::Developer.as_str().to_string(),
            instructions: task.to_string(),
            file_paths: Vec::new(),
            language: "python".to_string(),
        }
    }

    pub fn agent_kind(&self) -> Result<AgentKind, String> {
        self.agent.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_parses_case_insensitively() {
        assert_eq!("HIGH".parse::<Complexity>(), Ok(Complexity::High));
        assert_eq!(" low ".parse::<Complexity>(), Ok(Complexity::Low));
        assert!("extreme".parse::<Complexity>().is_err());
    }

    #[test]
    fn agent_kind_accepts_prompt_spelling() {
        assert_eq!(
            "code generation".parse::<AgentKind>(),
            Ok(AgentKind::CodeGeneration)
        );
        assert_eq!(
            "unknown agent type: wizard",
            "wizard".parse::<AgentKind>().unwrap_err()
        );
    }

    #[test]
    fn execution_result_serializes_with_stable_field_order() {
        let result = ExecutionResult {
            step_index: 0,
            action: "create_file".to_string(),
            success: true,
            output: "File a.txt created.".to_string(),
        };
        let json = serde_json::to_string(&result).expect("serialize");
        assert_eq!(
            json,
            r#"{"step_index":0,"action":"create_file","success":true,"output":"File a.txt created."}"#
        );
    }
}
