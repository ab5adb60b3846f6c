//! HTTP route handlers for the agent API.
//!
//! Engine work is blocking (process spawns, blocking HTTP to the oracle), so every
//! handler that runs steps moves onto the blocking pool and builds its
//! collaborators there.

use std::path::{Component, Path};

use axum::Router;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{error, info};

use crate::agents::codegen::{CodeRequest, generate_code};
use crate::core::step::Step;
use crate::core::types::{AgentKind, Complexity};
use crate::executor::StepExecutor;
use crate::io::config::AgentConfig;
use crate::io::files::FileAccess;
use crate::io::ide::HttpIdeClient;
use crate::io::oracle::OracleClient;
use crate::io::prompt::PromptEngine;
use crate::io::state_store::PersistentState;
use crate::router::TaskRouter;

use super::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/state", get(get_state))
        .route("/task", post(run_task))
        .route("/steps", post(run_steps))
        .route("/code", post(run_code))
        .route("/kill", post(kill_processes))
        .route("/files", get(list_files))
        .route("/file", get(read_file).delete(delete_file))
}

/// Error body `{"error": "..."}` with a non-2xx status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(err: &anyhow::Error) -> Self {
        error!(err = %format!("{err:#}"), "request failed");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{err:#}"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

/// Collaborators for one request, built on the blocking thread that uses them.
struct Engine<'a> {
    workdir: &'a Path,
    config: &'a AgentConfig,
    oracle: OracleClient,
    ide: HttpIdeClient,
    prompts: PromptEngine,
}

impl<'a> Engine<'a> {
    fn new(workdir: &'a Path, config: &'a AgentConfig) -> anyhow::Result<Self> {
        Ok(Self {
            workdir,
            config,
            oracle: OracleClient::from_config(config)?,
            ide: HttpIdeClient::from_config(config, workdir)?,
            prompts: PromptEngine::new(),
        })
    }

    fn executor(&self) -> StepExecutor<'_, OracleClient, HttpIdeClient> {
        StepExecutor::new(
            self.workdir,
            self.config,
            &self.oracle,
            &self.ide,
            &self.prompts,
        )
    }
}

/// Run `work` on the blocking pool while holding the run lock.
async fn run_engine<T, F>(state: AppState, work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce(&Engine<'_>) -> anyhow::Result<T> + Send + 'static,
{
    let _guard = state.run_lock.clone().lock_owned().await;
    let joined = tokio::task::spawn_blocking(move || {
        let engine = Engine::new(&state.workdir, &state.config)?;
        work(&engine)
    })
    .await;
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(ApiError::internal(&err)),
        Err(join_err) => Err(ApiError::internal(&anyhow::anyhow!(
            "engine task panicked: {join_err}"
        ))),
    }
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// GET /api/state - the persisted state document.
async fn get_state(State(state): State<AppState>) -> Result<Json<PersistentState>, ApiError> {
    let store = state.state_store();
    let loaded = tokio::task::spawn_blocking(move || store.load())
        .await
        .map_err(|err| ApiError::internal(&anyhow::anyhow!("state task panicked: {err}")))?
        .map_err(|err| ApiError::internal(&err))?;
    Ok(Json(loaded))
}

#[derive(Debug, Deserialize)]
pub struct TaskBody {
    task: String,
}

/// POST /api/task - route a free-form task to an agent.
async fn run_task(
    State(state): State<AppState>,
    body: Result<Json<TaskBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let task = body.task.trim().to_string();
    if task.is_empty() {
        return Err(ApiError::bad_request("task must be non-empty"));
    }
    info!(task = %task, "api task");
    run_engine(state, move |engine| {
        let mut router = TaskRouter::new(
            engine.workdir,
            engine.config,
            &engine.oracle,
            &engine.ide,
            &engine.prompts,
        );
        let (analysis, outcome) = router.execute_task(&task, |_| {})?;
        Ok(Json(json!({
            "success": outcome.succeeded(),
            "summary": outcome.summary(),
            "analysis": analysis,
            "outcome": outcome,
        })))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct StepsBody {
    steps: Vec<Value>,
}

/// POST /api/steps - execute a caller-supplied step list.
async fn run_steps(
    State(state): State<AppState>,
    body: Result<Json<StepsBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let steps: Vec<Step> = body.steps.iter().map(Step::from_value).collect();
    run_engine(state, move |engine| {
        let report = engine.executor().execute(steps, |_| {})?;
        Ok(Json(json!({
            "success": report.succeeded(),
            "summary": report.summary(),
            "report": report,
        })))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct CodeBody {
    description: String,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    complexity: Option<Complexity>,
}

/// POST /api/code - generate code, optionally writing it to `file_path`.
async fn run_code(
    State(state): State<AppState>,
    body: Result<Json<CodeBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    if body.description.trim().is_empty() {
        return Err(ApiError::bad_request("description must be non-empty"));
    }
    run_engine(state, move |engine| {
        let file_path = body.file_path.as_deref().filter(|p| !p.trim().is_empty());
        let request = CodeRequest {
            description: &body.description,
            language: body.language.as_deref().unwrap_or("python"),
            file_path,
            complexity: body
                .complexity
                .unwrap_or(AgentKind::CodeGeneration.default_complexity()),
        };
        let code = generate_code(&engine.oracle, &engine.prompts, &request)?;
        if let Some(path) = file_path {
            FileAccess::new(engine.workdir).write(path, &code)?;
        }
        Ok(Json(json!({
            "success": true,
            "file_path": file_path,
            "code": code,
        })))
    })
    .await
}

/// POST /api/kill - terminate every recorded background process.
async fn kill_processes(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    run_engine(state, |engine| {
        let report = engine.executor().execute(vec![Step::KillProcess], |_| {})?;
        Ok(Json(json!({
            "success": report.succeeded(),
            "summary": report.summary(),
            "report": report,
        })))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "workspace_root")]
    dir: String,
    #[serde(default)]
    pattern: Option<String>,
}

fn workspace_root() -> String {
    ".".to_string()
}

#[derive(Debug, Deserialize)]
pub struct PathQuery {
    path: String,
}

/// Reject paths that could leave the workspace.
fn workspace_path(path: &str) -> Result<&str, ApiError> {
    let escapes = Path::new(path)
        .components()
        .any(|part| !matches!(part, Component::Normal(_) | Component::CurDir));
    if path.trim().is_empty() || escapes {
        return Err(ApiError::bad_request(format!(
            "path must be relative to the workspace: {path}"
        )));
    }
    Ok(path)
}

/// GET /api/files?dir=&pattern= - entries of a workspace directory.
async fn list_files(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let dir = workspace_path(&query.dir)?;
    let files = FileAccess::new(&state.workdir).list(dir, query.pattern.as_deref());
    Ok(Json(json!({ "files": files })))
}

/// GET /api/file?path= - contents of one workspace file.
async fn read_file(
    State(state): State<AppState>,
    query: Result<Query<PathQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let path = workspace_path(&query.path)?;
    match FileAccess::new(&state.workdir).read(path) {
        Some(content) => Ok(Json(json!({ "path": path, "content": content }))),
        None => Err(ApiError::not_found(format!("file not found: {path}"))),
    }
}

/// DELETE /api/file?path= - remove one workspace file. Waits for any running steps.
async fn delete_file(
    State(state): State<AppState>,
    query: Result<Query<PathQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let path = workspace_path(&query.path)?;
    let _guard = state.run_lock.lock().await;
    if !FileAccess::new(&state.workdir).delete(path) {
        return Err(ApiError::not_found(format!("file not found: {path}")));
    }
    info!(path, "deleted workspace file");
    Ok(Json(json!({ "deleted": path })))
}
