//! The closed step vocabulary and its total decoding from oracle JSON.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action names the executor understands, in wire form.
pub const KNOWN_ACTIONS: [&str; 9] = [
    "create_venv",
    "install_deps",
    "create_file",
    "modify_file",
    "run_file",
    "run_command",
    "kill_process",
    "open_file",
    "run_terminal",
];

/// One normalized instruction.
///
/// The wire shape is flat: `{"action": "create_file", "path": "...", "content": "..."}`.
/// Decoding through [`Step::from_value`] never fails: unrecognized action names
/// become [`Step::Unknown`] and undecodable parameters become [`Step::Malformed`],
/// both of which execute as failed results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    CreateVenv {
        #[serde(default = "default_venv_path")]
        path: String,
    },
    InstallDeps {
        #[serde(default)]
        deps: Vec<String>,
        #[serde(default)]
        venv: Option<String>,
    },
    CreateFile {
        path: String,
        #[serde(default)]
        content: String,
    },
    /// Full replace, identical to `CreateFile` apart from the reported message.
    ModifyFile {
        path: String,
        #[serde(default)]
        content: String,
    },
    RunFile {
        file: String,
        #[serde(default)]
        venv: Option<String>,
    },
    RunCommand {
        command: String,
        #[serde(default)]
        venv: Option<String>,
        #[serde(default)]
        background: bool,
    },
    KillProcess,
    OpenFile {
        path: String,
    },
    RunTerminal {
        command: String,
    },
    #[serde(skip_deserializing)]
    Unknown { name: String },
    #[serde(skip_deserializing)]
    Malformed { name: String, error: String },
}

fn default_venv_path() -> String {
    "./venv".to_string()
}

impl Step {
    /// Decode a step from the flat `{"action": ..}` wire shape.
    pub fn from_value(value: &Value) -> Step {
        let Some(name) = value.get("action").and_then(Value::as_str) else {
            return Step::Malformed {
                name: String::new(),
                error: "missing `action` field".to_string(),
            };
        };
        if !KNOWN_ACTIONS.contains(&name) {
            return Step::Unknown {
                name: name.to_string(),
            };
        }
        match serde_json::from_value::<Step>(value.clone()) {
            Ok(step) => step,
            Err(err) => Step::Malformed {
                name: name.to_string(),
                error: format!("invalid parameters for {name}: {err}"),
            },
        }
    }

    /// Translate one IDE-control action (`{"type": ..}` vocabulary) into a step.
    ///
    /// `run_shell` maps to `run_command` and keeps its `background` flag.
    pub fn from_ide_action(value: &Value) -> Step {
        let Some(fields) = value.as_object() else {
            return Step::Malformed {
                name: String::new(),
                error: "IDE action is not an object".to_string(),
            };
        };
        let Some(kind) = fields.get("type").and_then(Value::as_str) else {
            return Step::Malformed {
                name: String::new(),
                error: "missing `type` field".to_string(),
            };
        };
        let action = match kind {
            "open_file" | "create_file" | "modify_file" | "run_terminal" => kind,
            "run_shell" => "run_command",
            other => {
                return Step::Unknown {
                    name: other.to_string(),
                };
            }
        };
        let mut translated: Map<String, Value> = fields
            .iter()
            .filter(|(key, _)| key.as_str() != "type")
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        translated.insert("action".to_string(), Value::String(action.to_string()));
        Step::from_value(&Value::Object(translated))
    }

    /// Wire name recorded in execution results.
    pub fn action_name(&self) -> &str {
        match self {
            Step::CreateVenv { .. } => "create_venv",
            Step::InstallDeps { .. } => "install_deps",
            Step::CreateFile { .. } => "create_file",
            Step::ModifyFile { .. } => "modify_file",
            Step::RunFile { .. } => "run_file",
            Step::RunCommand { .. } => "run_command",
            Step::KillProcess => "kill_process",
            Step::OpenFile { .. } => "open_file",
            Step::RunTerminal { .. } => "run_terminal",
            Step::Unknown { name } => name,
            Step::Malformed { name, .. } => name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_flat_create_file() {
        let step = Step::from_value(&json!({"action": "create_file", "path": "x", "content": "y"}));
        assert_eq!(
            step,
            Step::CreateFile {
                path: "x".to_string(),
                content: "y".to_string()
            }
        );
    }

    #[test]
    fn applies_parameter_defaults() {
        assert_eq!(
            Step::from_value(&json!({"action": "create_venv"})),
            Step::CreateVenv {
                path: "./venv".to_string()
            }
        );
        assert_eq!(
            Step::from_value(&json!({"action": "run_command", "command": "ls"})),
            Step::RunCommand {
                command: "ls".to_string(),
                venv: None,
                background: false
            }
        );
    }

    #[test]
    fn unknown_action_keeps_its_name() {
        let step = Step::from_value(&json!({"action": "teleport", "to": "mars"}));
        assert_eq!(
            step,
            Step::Unknown {
                name: "teleport".to_string()
            }
        );
        assert_eq!(step.action_name(), "teleport");
    }

    #[test]
    fn missing_required_parameter_is_malformed() {
        let step = Step::from_value(&json!({"action": "run_file"}));
        match step {
            Step::Malformed { name, error } => {
                assert_eq!(name, "run_file");
                assert!(error.contains("file"), "unexpected error: {error}");
            }
            other => panic!("expected malformed step, got {other:?}"),
        }
    }

    #[test]
    fn missing_action_is_malformed() {
        assert!(matches!(
            Step::from_value(&json!({"path": "x"})),
            Step::Malformed { .. }
        ));
    }

    #[test]
    fn run_shell_becomes_run_command_with_background_flag() {
        let step = Step::from_ide_action(
            &json!({"type": "run_shell", "command": "python app.py", "background": true}),
        );
        assert_eq!(
            step,
            Step::RunCommand {
                command: "python app.py".to_string(),
                venv: None,
                background: true
            }
        );
    }

    #[test]
    fn unsupported_ide_action_is_unknown() {
        assert_eq!(
            Step::from_ide_action(&json!({"type": "refactor", "path": "a.py"})),
            Step::Unknown {
                name: "refactor".to_string()
            }
        );
    }
}
