//! devagent CLI.
//!
//! Every subcommand works against one workspace directory (`--workdir`) and
//! prints step outcomes as they happen, followed by the execution log and a
//! one-line summary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use devagent::agents::codegen::{CodeRequest, generate_code};
use devagent::agents::cursor::cursor_steps;
use devagent::agents::steps::role_steps;
use devagent::core::types::{AgentKind, Complexity, ExecutionResult};
use devagent::executor::{RunReport, StepExecutor};
use devagent::exit_codes;
use devagent::io::config::{AgentConfig, InvalidConfigError, load_config};
use devagent::io::files::FileAccess;
use devagent::io::ide::HttpIdeClient;
use devagent::io::oracle::OracleClient;
use devagent::io::prompt::PromptEngine;
use devagent::logging;
use devagent::router::{TaskOutcome, TaskRouter, run_ide_steps};
use devagent::server;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "devagent",
    version,
    about = "LLM-driven step execution engine for project scaffolding"
)]
struct Cli {
    /// Workspace the agent operates on. Created if missing.
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Config file. Defaults to `<workdir>/.agent/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scaffold a project with the developer role.
    Project {
        /// What to build. Defaults to the built-in Flask app task.
        #[arg(long)]
        prompt: Option<String>,
        #[arg(long)]
        complexity: Option<Complexity>,
    },
    /// Run developer instructions, then the tester role if they succeed.
    Dev {
        instructions: String,
        #[arg(long)]
        complexity: Option<Complexity>,
    },
    /// Route a free-form task to whichever agent the task manager picks.
    Task { description: String },
    /// Generate code, printing it or writing it to `--file`.
    Code {
        description: String,
        #[arg(long)]
        file: Option<String>,
        #[arg(long, default_value = "python")]
        language: String,
        #[arg(long)]
        complexity: Option<Complexity>,
    },
    /// Drive the IDE with translated actions.
    Cursor {
        instructions: String,
        #[arg(long)]
        complexity: Option<Complexity>,
    },
    /// Serve the JSON API.
    Server {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
}

fn main() {
    dotenvy::dotenv().ok();
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<InvalidConfigError>().is_some() {
                exit_codes::INVALID
            } else {
                exit_codes::FAILED
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let workdir = cli.workdir;
    fs::create_dir_all(&workdir)
        .with_context(|| format!("create workdir {}", workdir.display()))?;
    let config_path = cli
        .config
        .unwrap_or_else(|| workdir.join(".agent").join("config.toml"));
    let mut config = load_config(&config_path)?;
    config.apply_env_overrides();
    debug!(config = %config_path.display(), workdir = %workdir.display(), "loaded config");

    let oracle = OracleClient::from_config(&config)?;
    let ide = HttpIdeClient::from_config(&config, &workdir)?;
    let prompts = PromptEngine::new();
    let session = Session {
        workdir: &workdir,
        config: &config,
        oracle: &oracle,
        ide: &ide,
        prompts: &prompts,
    };

    let success = match cli.command {
        Command::Project { prompt, complexity } => {
            session.cmd_project(prompt.as_deref(), complexity)?
        }
        Command::Dev {
            instructions,
            complexity,
        } => session.cmd_dev(&instructions, complexity)?,
        Command::Task { description } => session.cmd_task(&description)?,
        Command::Code {
            description,
            file,
            language,
            complexity,
        } => session.cmd_code(&description, file.as_deref(), &language, complexity)?,
        Command::Cursor {
            instructions,
            complexity,
        } => session.cmd_cursor(&instructions, complexity)?,
        Command::Server { bind, port } => {
            println!("Serving devagent API on http://{bind}:{port}/api");
            server::serve(workdir.clone(), config.clone(), &bind, port)?;
            true
        }
    };
    Ok(if success {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

/// Collaborators shared by the step-running subcommands.
struct Session<'a> {
    workdir: &'a Path,
    config: &'a AgentConfig,
    oracle: &'a OracleClient,
    ide: &'a HttpIdeClient,
    prompts: &'a PromptEngine,
}

impl Session<'_> {
    fn executor(&self) -> StepExecutor<'_, OracleClient, HttpIdeClient> {
        StepExecutor::new(
            self.workdir,
            self.config,
            self.oracle,
            self.ide,
            self.prompts,
        )
    }

    fn cmd_project(&self, prompt: Option<&str>, complexity: Option<Complexity>) -> Result<bool> {
        println!("Creating project in {}", self.workdir.display());
        let report = self.run_role(AgentKind::Developer, prompt, complexity)?;
        Ok(finish_report(&report))
    }

    fn cmd_dev(&self, instructions: &str, complexity: Option<Complexity>) -> Result<bool> {
        println!("Running developer instructions");
        let report = self.run_role(AgentKind::Developer, Some(instructions), complexity)?;
        if !finish_report(&report) {
            return Ok(false);
        }
        println!("Running tester");
        let report = self.run_role(AgentKind::Tester, None, None)?;
        Ok(finish_report(&report))
    }

    fn cmd_task(&self, description: &str) -> Result<bool> {
        let mut router = TaskRouter::new(
            self.workdir,
            self.config,
            self.oracle,
            self.ide,
            self.prompts,
        );
        let (analysis, outcome) = router.execute_task(description, print_result)?;
        println!(
            "Agent: {} (complexity: {})",
            analysis.agent, analysis.complexity
        );
        Ok(finish_outcome(&outcome))
    }

    fn cmd_code(
        &self,
        description: &str,
        file: Option<&str>,
        language: &str,
        complexity: Option<Complexity>,
    ) -> Result<bool> {
        let request = CodeRequest {
            description,
            language,
            file_path: file,
            complexity: complexity.unwrap_or(AgentKind::CodeGeneration.default_complexity()),
        };
        let code = generate_code(self.oracle, self.prompts, &request)?;
        match file {
            Some(path) => {
                FileAccess::new(self.workdir).write(path, &code)?;
                println!("Code written to {path}");
            }
            None => println!("{code}"),
        }
        Ok(true)
    }

    fn cmd_cursor(&self, instructions: &str, complexity: Option<Complexity>) -> Result<bool> {
        let complexity = complexity.unwrap_or(AgentKind::Cursor.default_complexity());
        let outcome = match cursor_steps(self.oracle, self.prompts, instructions, complexity)? {
            Some(steps) => run_ide_steps(self.executor(), steps, print_result)?,
            None => TaskOutcome::CouldNotParse,
        };
        Ok(finish_outcome(&outcome))
    }

    fn run_role(
        &self,
        role: AgentKind,
        instructions: Option<&str>,
        complexity: Option<Complexity>,
    ) -> Result<RunReport> {
        let complexity = complexity.unwrap_or(role.default_complexity());
        let steps = role_steps(self.oracle, self.prompts, role, instructions, complexity)?;
        self.executor().execute(steps, print_result)
    }
}

fn print_result(result: &ExecutionResult) {
    let status = if result.success { "ok" } else { "FAILED" };
    println!(
        "[{}] {} {status}: {}",
        result.step_index, result.action, result.output
    );
}

/// Print the execution log and summary. Returns whether the run succeeded.
fn finish_report(report: &RunReport) -> bool {
    if !report.results.is_empty() {
        println!("\nExecution log:");
        for (n, result) in report.results.iter().enumerate() {
            let mark = if result.success { "+" } else { "-" };
            println!("  {mark} {:>2}. {}: {}", n + 1, result.action, result.output);
        }
    }
    println!("\nSummary: {}", report.summary());
    report.succeeded()
}

fn finish_outcome(outcome: &TaskOutcome) -> bool {
    match outcome {
        TaskOutcome::Steps { report } => finish_report(report),
        TaskOutcome::CodeReturned { code } => {
            println!("{code}");
            println!("\nSummary: {}", outcome.summary());
            true
        }
        TaskOutcome::CodeWritten { files } => {
            for file in files {
                match &file.error {
                    None => println!("  + {}", file.path),
                    Some(err) => println!("  - {}: {err}", file.path),
                }
            }
            println!("\nSummary: {}", outcome.summary());
            outcome.succeeded()
        }
        TaskOutcome::CouldNotParse | TaskOutcome::UnknownAgent { .. } => {
            println!("\nSummary: {}", outcome.summary());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_project_defaults() {
        let cli = Cli::parse_from(["devagent", "project"]);
        assert_eq!(cli.workdir, PathBuf::from("."));
        assert!(cli.config.is_none());
        assert!(matches!(
            cli.command,
            Command::Project {
                prompt: None,
                complexity: None
            }
        ));
    }

    #[test]
    fn parse_code_with_options() {
        let cli = Cli::parse_from([
            "devagent",
            "--workdir",
            "out",
            "code",
            "a fizzbuzz",
            "--file",
            "fizz.py",
            "--complexity",
            "low",
        ]);
        assert_eq!(cli.workdir, PathBuf::from("out"));
        match cli.command {
            Command::Code {
                description,
                file,
                language,
                complexity,
            } => {
                assert_eq!(description, "a fizzbuzz");
                assert_eq!(file.as_deref(), Some("fizz.py"));
                assert_eq!(language, "python");
                assert_eq!(complexity, Some(Complexity::Low));
            }
            _ => panic!("expected code command"),
        }
    }

    #[test]
    fn parse_server_defaults() {
        let cli = Cli::parse_from(["devagent", "server"]);
        assert!(matches!(cli.command, Command::Server { ref bind, port: 8000 } if bind == "127.0.0.1"));
    }

    #[test]
    fn unknown_complexity_is_rejected() {
        assert!(Cli::try_parse_from(["devagent", "dev", "x", "--complexity", "extreme"]).is_err());
    }
}
