//! IDE-driving role: asks for an `actions` document and translates it to steps.

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::parser::{InstructionDocument, parse};
use crate::core::step::Step;
use crate::core::types::Complexity;
use crate::io::oracle::{Oracle, OracleRequest};
use crate::io::prompt::PromptEngine;

/// Translated steps, or `None` when the reply carried no `actions` document.
pub fn cursor_steps<O: Oracle>(
    oracle: &O,
    prompts: &PromptEngine,
    instructions: &str,
    complexity: Complexity,
) -> Result<Option<Vec<Step>>> {
    let system = prompts.cursor_system()?;
    let raw = oracle.ask(&OracleRequest::new(system, instructions, complexity));
    match parse(&raw) {
        Some(InstructionDocument::Actions(steps)) => {
            debug!(count = steps.len(), "translated ide actions");
            Ok(Some(steps))
        }
        _ => {
            warn!("ide reply carried no actions document");
            Ok(None)
        }
    }
}
