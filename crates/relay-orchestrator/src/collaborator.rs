//! Version-control collaborator.
//!
//! The engine never interprets collaborator output beyond pass/fail. A failed
//! reply aborts the status update that requested it.

use crate::types::{StepTemplate, Task, TaskStatus};
use async_trait::async_trait;
use relay_core::{RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Default prefix for branches created by workflow steps.
pub const DEFAULT_BRANCH_PREFIX: &str = "feature/";
const MAIN_BRANCH: &str = "main";

/// Success flag plus free-form text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollaboratorReply {
    pub success: bool,
    pub message: String,
}

impl CollaboratorReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }

    pub fn into_result(self) -> RelayResult<String> {
        if self.success {
            Ok(self.message)
        } else {
            Err(RelayError::Collaborator(self.message))
        }
    }
}

/// A pull request to open against `base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn init(&self) -> CollaboratorReply;
    async fn clone_repo(&self, url: &str) -> CollaboratorReply;
    async fn commit(&self, message: &str) -> CollaboratorReply;
    async fn push(&self, branch: Option<&str>) -> CollaboratorReply;
    async fn pull(&self, branch: Option<&str>) -> CollaboratorReply;
    async fn fetch(&self) -> CollaboratorReply;
    /// Switch to `branch`, creating it first when `create` is set.
    async fn checkout(&self, branch: &str, create: bool) -> CollaboratorReply;
    async fn merge(&self, branch: &str) -> CollaboratorReply;
    async fn list_branches(&self) -> CollaboratorReply;
    async fn create_pull_request(&self, request: &PullRequest) -> CollaboratorReply;
}

/// Branch name for a workflow step: `{prefix}{slug(project)}`.
pub fn branch_name(template: &StepTemplate, project_name: &str) -> String {
    let prefix = template
        .branch_prefix
        .as_deref()
        .unwrap_or(DEFAULT_BRANCH_PREFIX);
    format!("{prefix}{}", slug(project_name))
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    let mut slug: String = trimmed.chars().take(50).collect();
    if slug.is_empty() {
        slug.push_str("work");
    }
    slug
}

/// Run the collaborator calls a workflow task's template asks for when it
/// moves to `status`. Returns the messages of the calls made.
pub async fn run_step_actions(
    vcs: &dyn VersionControl,
    task: &Task,
    status: TaskStatus,
) -> RelayResult<Vec<String>> {
    let Some(link) = task.workflow_link() else {
        return Ok(Vec::new());
    };
    let template = &link.template;
    let branch = branch_name(template, &link.project_name);
    let mut done = Vec::new();

    match status {
        TaskStatus::InProgress => {
            if template.sync_before_start {
                done.push(checked(task, "pull", vcs.pull(None).await)?);
            }
            if template.create_branch {
                if template.sync_main_before_branch {
                    done.push(checked(task, "checkout", vcs.checkout(MAIN_BRANCH, false).await)?);
                    done.push(checked(task, "pull", vcs.pull(Some(MAIN_BRANCH)).await)?);
                }
                done.push(checked(task, "checkout", vcs.checkout(&branch, true).await)?);
            }
        }
        TaskStatus::Completed => {
            if template.open_pull_request {
                if template.sync_before_pr {
                    done.push(checked(task, "pull", vcs.pull(Some(MAIN_BRANCH)).await)?);
                }
                done.push(checked(task, "push", vcs.push(Some(&branch)).await)?);
                let request = PullRequest {
                    title: task.title.clone(),
                    body: task.description.clone(),
                    head: branch.clone(),
                    base: MAIN_BRANCH.to_string(),
                };
                done.push(checked(
                    task,
                    "create_pull_request",
                    vcs.create_pull_request(&request).await,
                )?);
            }
        }
        TaskStatus::Pending => {}
    }

    Ok(done)
}

fn checked(task: &Task, action: &str, reply: CollaboratorReply) -> RelayResult<String> {
    if reply.success {
        info!(task_id = %task.id, action, "Version-control action succeeded");
    } else {
        warn!(task_id = %task.id, action, error = %reply.message, "Version-control action failed");
    }
    reply.into_result()
}

/// Runs the `git` executable inside a working copy.
///
/// Pull requests need a hosting provider, which this collaborator does not
/// talk to; `create_pull_request` always fails.
pub struct GitCommand {
    repo: PathBuf,
    timeout: Duration,
}

impl GitCommand {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self {
            repo: repo.into(),
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, args: &[&str]) -> CollaboratorReply {
        info!(repo = %self.repo.display(), ?args, "Running git");
        let result = tokio::time::timeout(
            self.timeout,
            tokio::process::Command::new("git")
                .args(args)
                .current_dir(&self.repo)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                if output.status.success() {
                    CollaboratorReply::ok(if stdout.is_empty() { stderr } else { stdout })
                } else {
                    CollaboratorReply::failed(if stderr.is_empty() { stdout } else { stderr })
                }
            }
            Ok(Err(e)) => CollaboratorReply::failed(format!("Failed to run git: {e}")),
            Err(_) => CollaboratorReply::failed(format!(
                "git timed out after {}s",
                self.timeout.as_secs()
            )),
        }
    }
}

#[async_trait]
impl VersionControl for GitCommand {
    async fn init(&self) -> CollaboratorReply {
        self.run(&["init"]).await
    }

    async fn clone_repo(&self, url: &str) -> CollaboratorReply {
        self.run(&["clone", url, "."]).await
    }

    async fn commit(&self, message: &str) -> CollaboratorReply {
        let staged = self.run(&["add", "-A"]).await;
        if !staged.success {
            return staged;
        }
        self.run(&["commit", "-m", message]).await
    }

    async fn push(&self, branch: Option<&str>) -> CollaboratorReply {
        match branch {
            Some(branch) => self.run(&["push", "-u", "origin", branch]).await,
            None => self.run(&["push"]).await,
        }
    }

    async fn pull(&self, branch: Option<&str>) -> CollaboratorReply {
        match branch {
            Some(branch) => self.run(&["pull", "origin", branch]).await,
            None => self.run(&["pull"]).await,
        }
    }

    async fn fetch(&self) -> CollaboratorReply {
        self.run(&["fetch", "--all"]).await
    }

    async fn checkout(&self, branch: &str, create: bool) -> CollaboratorReply {
        if create {
            self.run(&["checkout", "-B", branch]).await
        } else {
            self.run(&["checkout", branch]).await
        }
    }

    async fn merge(&self, branch: &str) -> CollaboratorReply {
        self.run(&["merge", "--no-ff", branch]).await
    }

    async fn list_branches(&self) -> CollaboratorReply {
        self.run(&["branch", "--list"]).await
    }

    async fn create_pull_request(&self, request: &PullRequest) -> CollaboratorReply {
        CollaboratorReply::failed(format!(
            "No pull-request provider configured for {} -> {}",
            request.head, request.base
        ))
    }
}
