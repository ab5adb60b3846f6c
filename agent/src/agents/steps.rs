//! Step-producing roles (developer, tester, debugger).

use anyhow::{Result, anyhow};
use tracing::{debug, instrument};

use crate::core::parser::parse_steps;
use crate::core::step::Step;
use crate::core::types::{AgentKind, Complexity};
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::prompt::PromptEngine;

/// Ask `role` for a step list.
///
/// Blank `instructions` fall back to the role's default task. Roles without a
/// default task require instructions.
#[instrument(skip_all, fields(role = role.as_str(), complexity = %complexity))]
pub fn role_steps<O: Oracle>(
    oracle: &O,
    prompts: &PromptEngine,
    role: AgentKind,
    instructions: Option<&str>,
    complexity: Complexity,
) -> Result<Vec<Step>> {
    let system = prompts.role_system(role)?;
    let user = match instructions.map(str::trim).filter(|text| !text.is_empty()) {
        Some(text) => text.to_string(),
        None => prompts
            .role_default_task(role)?
            .ok_or_else(|| anyhow!("{} agent needs instructions", role.as_str()))?,
    };
    Ok(request_steps(oracle, &OracleRequest::new(system, user, complexity)))
}

/// Ask the debugger for steps that fix `error`.
#[instrument(skip_all, fields(complexity = %complexity))]
pub fn debugger_steps<O: Oracle>(
    oracle: &O,
    prompts: &PromptEngine,
    error: &str,
    complexity: Complexity,
) -> Result<Vec<Step>> {
    let system = prompts.role_system(AgentKind::Debugger)?;
    let user = prompts.debugger_error(error)?;
    Ok(request_steps(oracle, &OracleRequest::new(system, user, complexity)))
}

fn request_steps<O: Oracle>(oracle: &O, request: &OracleRequest) -> Vec<Step> {
    let raw = oracle.ask(request);
    let steps = parse_steps(&raw);
    debug!(count = steps.len(), "parsed steps");
    steps
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::test_support::{ScriptedOracle, steps_reply};

    #[test]
    fn developer_without_instructions_uses_default_task() {
        let oracle = ScriptedOracle::new([steps_reply(vec![json!({"action": "kill_process"})])]);
        let prompts = PromptEngine::new();

        let steps = role_steps(&oracle, &prompts, AgentKind::Developer, Some("  "), Complexity::Medium)
            .expect("steps");

        assert_eq!(steps, vec![Step::KillProcess]);
        let requests = oracle.requests();
        assert!(requests[0].user_prompt.contains("Flask"));
        assert_eq!(requests[0].complexity, Complexity::Medium);
    }

    #[test]
    fn debugger_without_instructions_is_an_error() {
        let oracle = ScriptedOracle::default();
        let prompts = PromptEngine::new();
        let err = role_steps(&oracle, &prompts, AgentKind::Debugger, None, Complexity::Medium)
            .unwrap_err();
        assert!(err.to_string().contains("debugger agent needs instructions"));
        assert_eq!(oracle.request_count(), 0);
    }

    #[test]
    fn debugger_prompt_carries_error() {
        let oracle = ScriptedOracle::new(["no json here"]);
        let prompts = PromptEngine::new();

        let steps = debugger_steps(&oracle, &prompts, "boom", Complexity::High).expect("steps");

        assert!(steps.is_empty());
        let requests = oracle.requests();
        let request = &requests[0];
        assert_eq!(
            request.user_prompt,
            "Error encountered:\nboom\nFix the code. Return JSON steps only."
        );
        assert_eq!(request.complexity, Complexity::High);
    }
}
