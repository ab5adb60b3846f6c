//! Prompt templates for every agent role.

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::AgentKind;

const TEMPLATES: [(&str, &str); 11] = [
    ("developer_system", include_str!("prompts/developer_system.md")),
    ("developer_task", include_str!("prompts/developer_task.md")),
    ("tester_system", include_str!("prompts/tester_system.md")),
    ("tester_task", include_str!("prompts/tester_task.md")),
    ("debugger_system", include_str!("prompts/debugger_system.md")),
    ("debugger_error", include_str!("prompts/debugger_error.md")),
    ("codegen_system", include_str!("prompts/codegen_system.md")),
    ("codegen_task", include_str!("prompts/codegen_task.md")),
    ("cursor_system", include_str!("prompts/cursor_system.md")),
    ("task_manager_system", include_str!("prompts/task_manager_system.md")),
    ("router_system", include_str!("prompts/router_system.md")),
];

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env }
    }

    fn render_static(&self, name: &str) -> Result<String> {
        Ok(self.env.get_template(name)?.render(context! {})?)
    }

    /// System prompt for a step-producing role.
    ///
    /// Code generation and cursor roles have their own entry points.
    pub fn role_system(&self, role: AgentKind) -> Result<String> {
        match role {
            AgentKind::Developer => self.render_static("developer_system"),
            AgentKind::Tester => self.render_static("tester_system"),
            AgentKind::Debugger => self.render_static("debugger_system"),
            AgentKind::CodeGeneration => self.codegen_system("python"),
            AgentKind::Cursor => self.cursor_system(),
        }
    }

    /// User prompt used when a role is invoked without instructions.
    pub fn role_default_task(&self, role: AgentKind) -> Result<Option<String>> {
        match role {
            AgentKind::Developer => self.render_static("developer_task").map(Some),
            AgentKind::Tester => self.render_static("tester_task").map(Some),
            _ => Ok(None),
        }
    }

    pub fn debugger_error(&self, error: &str) -> Result<String> {
        let template = self.env.get_template("debugger_error")?;
        Ok(template.render(context! { error => error.trim_end() })?)
    }

    pub fn codegen_system(&self, language: &str) -> Result<String> {
        let template = self.env.get_template("codegen_system")?;
        Ok(template.render(context! { language => language })?)
    }

    pub fn codegen_task(&self, description: &str, file_path: Option<&str>) -> Result<String> {
        let template = self.env.get_template("codegen_task")?;
        Ok(template.render(context! {
            description => description.trim(),
            file_path => file_path.filter(|p| !p.trim().is_empty()),
        })?)
    }

    pub fn cursor_system(&self) -> Result<String> {
        self.render_static("cursor_system")
    }

    pub fn task_manager_system(&self) -> Result<String> {
        self.render_static("task_manager_system")
    }

    pub fn router_system(&self) -> Result<String> {
        self.render_static("router_system")
    }
}
