use crate::types::{AgentRole, Priority, StepDefinition, StepTemplate, TaskKind};
use std::collections::BTreeMap;

/// Placeholder replaced with the project name when a workflow is started.
pub const PROJECT_PLACEHOLDER: &str = "{project}";

/// Immutable map from workflow type to its ordered step definitions.
#[derive(Debug, Clone)]
pub struct WorkflowCatalog {
    templates: BTreeMap<String, Vec<StepDefinition>>,
}

impl WorkflowCatalog {
    /// The built-in template set.
    pub fn builtin() -> Self {
        let templates = [
            ("development-cycle", development_cycle()),
            ("bug-fix", bug_fix()),
            ("feature-request", feature_request()),
            ("code-review", code_review()),
        ]
        .into_iter()
        .map(|(name, steps)| (name.to_string(), steps))
        .collect();
        Self { templates }
    }

    /// Steps for `workflow_type`; empty when the type is unknown.
    pub fn template_for(&self, workflow_type: &str) -> &[StepDefinition] {
        self.templates
            .get(workflow_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Add or replace a template.
    pub fn with_template(mut self, name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        self.templates.insert(name.into(), steps);
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }
}

impl Default for WorkflowCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

fn step(
    key: &str,
    agent: AgentRole,
    action: &str,
    description: &str,
    auto_trigger: bool,
    template: StepTemplate,
) -> StepDefinition {
    StepDefinition {
        key: key.to_string(),
        agent,
        action: action.to_string(),
        description: description.to_string(),
        auto_trigger,
        template,
    }
}

fn sync_first() -> StepTemplate {
    StepTemplate {
        sync_before_start: true,
        ..StepTemplate::new(TaskKind::Code)
    }
}

fn branch_from_main(prefix: Option<&str>) -> StepTemplate {
    StepTemplate {
        create_branch: true,
        branch_prefix: prefix.map(str::to_string),
        sync_main_before_branch: true,
        ..StepTemplate::new(TaskKind::Code)
    }
}

fn development_cycle() -> Vec<StepDefinition> {
    vec![
        step(
            "sync-main-branch",
            AgentRole::Developer,
            "sync_with_remote",
            "Sync local main branch of {project} with remote to get latest changes",
            false,
            sync_first(),
        ),
        step(
            "design-requirements",
            AgentRole::Designer,
            "create_requirements",
            "Define project requirements and user stories",
            true,
            StepTemplate::new(TaskKind::Requirement).with_priority(Priority::High),
        ),
        step(
            "implement-features",
            AgentRole::Developer,
            "implement_code",
            "Implement features based on design requirements",
            true,
            branch_from_main(None),
        ),
        step(
            "quality-review",
            AgentRole::Qa,
            "review_implementation",
            "Review code quality, functionality, and user experience",
            true,
            StepTemplate {
                run_tests: true,
                ..StepTemplate::new(TaskKind::Review)
            },
        ),
        step(
            "create-pr",
            AgentRole::Developer,
            "create_pull_request",
            "Sync with main and create pull request after QA approval",
            true,
            StepTemplate {
                open_pull_request: true,
                sync_before_pr: true,
                ..StepTemplate::new(TaskKind::Code)
            },
        ),
    ]
}

fn bug_fix() -> Vec<StepDefinition> {
    vec![
        step(
            "sync-for-bugfix",
            AgentRole::Developer,
            "sync_with_remote",
            "Sync {project} with latest main branch to ensure bug still exists",
            false,
            sync_first(),
        ),
        step(
            "reproduce-bug",
            AgentRole::Qa,
            "reproduce_and_document",
            "Reproduce the bug and document steps",
            true,
            StepTemplate::new(TaskKind::Requirement).with_priority(Priority::High),
        ),
        step(
            "fix-bug",
            AgentRole::Developer,
            "implement_fix",
            "Fix the identified bug",
            true,
            branch_from_main(Some("bugfix/")),
        ),
        step(
            "verify-fix",
            AgentRole::Qa,
            "verify_bug_fix",
            "Verify the bug is fixed and no regressions",
            true,
            StepTemplate {
                regression_test: true,
                ..StepTemplate::new(TaskKind::Review)
            },
        ),
    ]
}

fn feature_request() -> Vec<StepDefinition> {
    vec![
        step(
            "sync-before-feature",
            AgentRole::Developer,
            "sync_with_remote",
            "Sync {project} with remote main branch before feature development",
            false,
            sync_first(),
        ),
        step(
            "analyze-feature",
            AgentRole::Designer,
            "analyze_feature_request",
            "Analyze feature requirements and create specifications",
            true,
            StepTemplate::new(TaskKind::Requirement),
        ),
        step(
            "implement-feature",
            AgentRole::Developer,
            "implement_feature",
            "Implement the requested feature",
            true,
            branch_from_main(None),
        ),
        step(
            "test-feature",
            AgentRole::Qa,
            "test_feature",
            "Test the new feature thoroughly",
            true,
            StepTemplate::new(TaskKind::Review),
        ),
    ]
}

fn code_review() -> Vec<StepDefinition> {
    vec![
        step(
            "prepare-review",
            AgentRole::Developer,
            "prepare_changes",
            "Push the {project} changes and summarize them for review",
            false,
            sync_first(),
        ),
        step(
            "review-changes",
            AgentRole::Qa,
            "review_changes",
            "Review the submitted changes and run the test suite",
            true,
            StepTemplate {
                run_tests: true,
                ..StepTemplate::new(TaskKind::Review)
            },
        ),
        step(
            "address-feedback",
            AgentRole::Developer,
            "address_feedback",
            "Address review feedback",
            true,
            StepTemplate::new(TaskKind::Feedback),
        ),
        step(
            "approve-changes",
            AgentRole::Qa,
            "approve_changes",
            "Confirm feedback is resolved and approve the changes",
            true,
            StepTemplate::new(TaskKind::Review),
        ),
    ]
}
