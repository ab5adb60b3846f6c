//! Code generation role: one oracle call per target file.

use anyhow::{Result, bail};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::parser::extract_code_block;
use crate::core::types::Complexity;
use crate::io::files::FileAccess;
use crate::io::oracle::{Oracle, OracleRequest, SENTINEL_RESPONSE};
use crate::io::prompt::PromptEngine;

#[derive(Debug, Clone)]
pub struct CodeRequest<'a> {
    pub description: &'a str,
    pub language: &'a str,
    pub file_path: Option<&'a str>,
    pub complexity: Complexity,
}

/// Outcome for one generated file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedFile {
    pub path: String,
    pub written: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Generate code for `request`, unwrapped from a fenced block when present.
#[instrument(skip_all, fields(language = request.language, complexity = %request.complexity))]
pub fn generate_code<O: Oracle>(
    oracle: &O,
    prompts: &PromptEngine,
    request: &CodeRequest<'_>,
) -> Result<String> {
    let system = prompts.codegen_system(request.language)?;
    let user = prompts.codegen_task(request.description, request.file_path)?;
    let raw = oracle.ask(&OracleRequest::new(system, user, request.complexity));
    if raw == SENTINEL_RESPONSE {
        bail!("all oracle backends failed");
    }
    Ok(extract_code_block(&raw))
}

/// Generate each path independently and write the code verbatim.
///
/// A failure for one path is reported in its entry and does not stop the rest.
pub fn generate_files<O: Oracle>(
    oracle: &O,
    prompts: &PromptEngine,
    files: &FileAccess,
    description: &str,
    language: &str,
    paths: &[String],
    complexity: Complexity,
) -> Vec<GeneratedFile> {
    paths
        .iter()
        .map(|path| {
            let request = CodeRequest {
                description,
                language,
                file_path: Some(path.as_str()),
                complexity,
            };
            let outcome = generate_code(oracle, prompts, &request)
                .and_then(|code| files.write(path, &code));
            match outcome {
                Ok(()) => {
                    info!(path = %path, "generated file written");
                    GeneratedFile {
                        path: path.clone(),
                        written: true,
                        error: None,
                    }
                }
                Err(err) => {
                    warn!(path = %path, err = %format!("{err:#}"), "code generation failed");
                    GeneratedFile {
                        path: path.clone(),
                        written: false,
                        error: Some(format!("{err:#}")),
                    }
                }
            }
        })
        .collect()
}
