use relay_core::{RelayError, RelayResult, ToolCall, ToolResult};
use relay_orchestrator::{
    AgentRole, NewTask, Orchestrator, Priority, PullRequest, TaskKind, TaskPayload, TaskStatus,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Names of every tool the router understands.
pub const TOOLS: &[&str] = &[
    "create_task",
    "get_my_tasks",
    "update_task_status",
    "start_workflow",
    "get_workflows",
    "execute_workflow_step",
    "trigger_step",
    "trigger_agent",
    "get_pending_agents",
    "log_message",
    "get_conversation_log",
    "get_metrics",
    "get_current_state",
    "git_init",
    "git_clone",
    "git_create_branch",
    "git_checkout",
    "git_commit",
    "git_push",
    "git_pull",
    "git_fetch",
    "git_merge",
    "git_list_branches",
    "github_create_pr",
];

#[derive(Debug, Deserialize)]
struct CreateTaskArgs {
    from: String,
    to: String,
    #[serde(rename = "type", default)]
    kind: TaskKind,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    data: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    priority: Priority,
}

#[derive(Debug, Deserialize)]
struct AgentArgs {
    agent: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateStatusArgs {
    task_id: Uuid,
    status: TaskStatus,
    agent: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartWorkflowArgs {
    workflow_type: String,
    project_name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    agent: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowArgs {
    workflow_id: Uuid,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerAgentArgs {
    target_agent: String,
    message: String,
    agent: String,
}

#[derive(Debug, Deserialize)]
struct LogMessageArgs {
    agent: String,
    message: String,
    #[serde(default)]
    context: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct LogArgs {
    #[serde(default = "default_log_limit")]
    limit: usize,
}

fn default_log_limit() -> usize {
    50
}

/// Arguments shared by the version-control tools; each reads what it needs.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GitArgs {
    agent: String,
    url: Option<String>,
    branch_name: Option<String>,
    branch: Option<String>,
    message: Option<String>,
    source_branch: Option<String>,
    title: Option<String>,
    #[serde(default)]
    body: String,
    head: Option<String>,
    base: Option<String>,
}

/// Maps tool calls onto [`Orchestrator`] operations.
pub struct ToolRouter {
    orchestrator: Arc<Orchestrator>,
}

impl ToolRouter {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Run one tool call. Failures come back as an error result, never a panic.
    pub async fn dispatch(&self, call: ToolCall) -> ToolResult {
        info!(call_id = %call.id, tool = %call.name, "Dispatching tool call");
        match self.execute(&call).await {
            Ok(value) => ToolResult::success(&call.id, value.to_string()),
            Err(e) => {
                warn!(call_id = %call.id, tool = %call.name, error = %e, "Tool call failed");
                ToolResult::error(&call.id, e.to_string())
            }
        }
    }

    async fn execute(&self, call: &ToolCall) -> RelayResult<Value> {
        let orch = &self.orchestrator;
        match call.name.as_str() {
            "create_task" => {
                let args: CreateTaskArgs = parse(call)?;
                let spec = NewTask::new(
                    agent(&args.from)?,
                    agent(&args.to)?,
                    args.kind,
                    args.title,
                    args.description,
                )
                .with_priority(args.priority)
                .with_payload(TaskPayload::Manual(args.data.unwrap_or_default()));
                let task = orch.create_task(spec).await;
                Ok(json!({ "taskId": task.id, "task": task }))
            }
            "get_my_tasks" => {
                let args: AgentArgs = parse(call)?;
                Ok(serde_json::to_value(orch.my_tasks(agent(&args.agent)?).await)?)
            }
            "update_task_status" => {
                let args: UpdateStatusArgs = parse(call)?;
                let task = orch
                    .update_task_status(args.task_id, args.status, agent(&args.agent)?)
                    .await?;
                Ok(serde_json::to_value(task)?)
            }
            "start_workflow" => {
                let args: StartWorkflowArgs = parse(call)?;
                let initiator = match args.agent.as_deref() {
                    Some(name) => agent(name)?,
                    None => AgentRole::Orchestrator,
                };
                let (workflow, first) = orch
                    .start_workflow(
                        &args.workflow_type,
                        &args.project_name,
                        args.description.as_deref(),
                        initiator,
                    )
                    .await?;
                Ok(json!({
                    "workflowId": workflow.id,
                    "workflowName": workflow.name,
                    "totalSteps": workflow.steps.len(),
                    "firstAgent": first.to,
                    "firstTaskId": first.id,
                }))
            }
            "get_workflows" => Ok(json!({ "workflows": orch.get_workflows().await })),
            "execute_workflow_step" => {
                let args: WorkflowArgs = parse(call)?;
                Ok(serde_json::to_value(orch.advance_workflow(args.workflow_id).await?)?)
            }
            "trigger_step" => {
                let args: WorkflowArgs = parse(call)?;
                Ok(serde_json::to_value(orch.trigger_step(args.workflow_id).await?)?)
            }
            "trigger_agent" => {
                let args: TriggerAgentArgs = parse(call)?;
                let task = orch
                    .trigger_agent(agent(&args.agent)?, agent(&args.target_agent)?, &args.message)
                    .await;
                Ok(json!({ "taskId": task.id, "targetAgent": task.to }))
            }
            "get_pending_agents" => Ok(serde_json::to_value(orch.pending_agents().await)?),
            "log_message" => {
                let args: LogMessageArgs = parse(call)?;
                let entry = orch
                    .log_message(agent(&args.agent)?, &args.message, args.context)
                    .await;
                Ok(serde_json::to_value(entry)?)
            }
            "get_conversation_log" => {
                let args: LogArgs = parse(call)?;
                Ok(json!({ "entries": orch.conversation_log(args.limit).await }))
            }
            "get_metrics" => Ok(serde_json::to_value(orch.metrics().await)?),
            "get_current_state" => Ok(serde_json::to_value(orch.current_state().await)?),
            "git_init" | "git_clone" | "git_create_branch" | "git_checkout" | "git_commit"
            | "git_push" | "git_pull" | "git_fetch" | "git_merge" | "git_list_branches"
            | "github_create_pr" => self.version_control(call).await,
            other => Err(RelayError::UnknownTool(other.to_string())),
        }
    }

    /// Forward a version-control tool to the attached collaborator.
    async fn version_control(&self, call: &ToolCall) -> RelayResult<Value> {
        let vcs = self.orchestrator.version_control().ok_or_else(|| {
            RelayError::Collaborator("no version-control collaborator attached".into())
        })?;
        let args: GitArgs = parse(call)?;
        let acting = agent(&args.agent)?;

        let reply = match call.name.as_str() {
            "git_init" => vcs.init().await,
            "git_clone" => vcs.clone_repo(required(call, "url", &args.url)?).await,
            "git_create_branch" => {
                vcs.checkout(required(call, "branchName", &args.branch_name)?, true)
                    .await
            }
            "git_checkout" => {
                vcs.checkout(required(call, "branchName", &args.branch_name)?, false)
                    .await
            }
            "git_commit" => vcs.commit(required(call, "message", &args.message)?).await,
            "git_push" => vcs.push(args.branch.as_deref()).await,
            "git_pull" => vcs.pull(args.branch.as_deref()).await,
            "git_fetch" => vcs.fetch().await,
            "git_merge" => vcs.merge(required(call, "sourceBranch", &args.source_branch)?).await,
            "git_list_branches" => vcs.list_branches().await,
            "github_create_pr" => {
                let request = PullRequest {
                    title: required(call, "title", &args.title)?.to_string(),
                    body: args.body.clone(),
                    head: required(call, "head", &args.head)?.to_string(),
                    base: args.base.clone().unwrap_or_else(|| "main".to_string()),
                };
                vcs.create_pull_request(&request).await
            }
            other => return Err(RelayError::UnknownTool(other.to_string())),
        };

        let message = reply.into_result()?;
        self.orchestrator
            .log_message(acting, &format!("{}: {message}", call.name), None)
            .await;
        Ok(json!({ "success": true, "message": message }))
    }
}

fn parse<T: DeserializeOwned>(call: &ToolCall) -> RelayResult<T> {
    // Missing arguments read as an empty object so all-default structs parse.
    let arguments = if call.arguments.is_null() {
        json!({})
    } else {
        call.arguments.clone()
    };
    serde_json::from_value(arguments)
        .map_err(|e| RelayError::InvalidArguments(format!("{}: {e}", call.name)))
}

fn agent(name: &str) -> RelayResult<AgentRole> {
    name.parse()
}

fn required<'a>(call: &ToolCall, field: &str, value: &'a Option<String>) -> RelayResult<&'a str> {
    value
        .as_deref()
        .ok_or_else(|| RelayError::InvalidArguments(format!("{}: missing `{field}`", call.name)))
}
