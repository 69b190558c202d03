//! Workflow lifecycle tests.
//!
//! Drives whole workflows through the `Orchestrator` facade: seeding, delayed
//! and immediate step advances, dispatch ordering, idempotence under
//! concurrent completion signals, and the observer event stream.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use relay_core::EventKind;
use relay_orchestrator::*;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn orchestrator(delay_ms: u64) -> Orchestrator {
    Orchestrator::new(OrchestratorConfig {
        advance_delay_ms: delay_ms,
        ..OrchestratorConfig::default()
    })
}

async fn complete(orch: &Orchestrator, task: &Task) {
    orch.update_task_status(task.id, TaskStatus::InProgress, task.to)
        .await
        .unwrap();
    orch.update_task_status(task.id, TaskStatus::Completed, task.to)
        .await
        .unwrap();
}

fn count(sub: &mut Subscription, kind: EventKind) -> usize {
    let mut n = 0;
    while let Ok(event) = sub.receiver.try_recv() {
        if event.kind == kind {
            n += 1;
        }
    }
    n
}

#[tokio::test(start_paused = true)]
async fn bug_fix_runs_to_completion() {
    let orch = orchestrator(1000);
    let mut sub = orch.subscribe().await;

    let (wf, first) = orch
        .start_workflow("bug-fix", "Calc", None, AgentRole::Orchestrator)
        .await
        .unwrap();
    assert_eq!(wf.steps.len(), 4);
    assert_eq!(wf.current_step, 0);
    assert_eq!(first.to, AgentRole::Developer);
    assert_eq!(first.workflow_link().unwrap().step_id, wf.steps[0].id);

    let agents: Vec<AgentRole> = wf.steps.iter().map(|s| s.agent).collect();
    assert_eq!(
        agents,
        vec![
            AgentRole::Developer,
            AgentRole::Qa,
            AgentRole::Developer,
            AgentRole::Qa
        ]
    );

    for (index, step) in wf.steps.iter().enumerate() {
        let open = orch.list_for_agent(step.agent).await;
        let task = open
            .iter()
            .find(|t| t.belongs_to_step(wf.id, &step.id))
            .expect("task for current step");
        assert_eq!(task.workflow_link().unwrap().auto_triggered, index > 0);

        complete(&orch, task).await;
        assert_eq!(orch.get_workflow(wf.id).await.unwrap().current_step, index);
        orch.settle().await;
        assert_eq!(orch.get_workflow(wf.id).await.unwrap().current_step, index + 1);
    }

    let done = orch.get_workflow(wf.id).await.unwrap();
    assert_eq!(done.status, WorkflowStatus::Completed);
    assert_eq!(done.current_step, 4);

    let tasks = orch.tasks().list_by_workflow(wf.id).await;
    assert_eq!(tasks.len(), 4);
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));

    // Later signals are no-ops.
    assert!(matches!(
        orch.advance_workflow(wf.id).await.unwrap(),
        StepAdvance::AlreadyCompleted
    ));
    assert_eq!(count(&mut sub, EventKind::WorkflowCompleted), 1);
}

#[tokio::test(start_paused = true)]
async fn advance_waits_for_the_configured_delay() {
    let orch = orchestrator(1000);
    let (wf, first) = orch
        .start_workflow("development-cycle", "Site", None, AgentRole::Orchestrator)
        .await
        .unwrap();
    complete(&orch, &first).await;

    tokio::time::sleep(Duration::from_millis(900)).await;
    assert_eq!(orch.get_workflow(wf.id).await.unwrap().current_step, 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let wf = orch.get_workflow(wf.id).await.unwrap();
    assert_eq!(wf.current_step, 1);
    let designer = orch.list_for_agent(AgentRole::Designer).await;
    assert_eq!(designer.len(), 1);
    assert!(designer[0].title.starts_with("Auto-triggered: "));
}

#[tokio::test]
async fn workflow_tasks_are_listed_before_unlinked_ones() {
    let orch = orchestrator(0);
    let (wf, _) = orch
        .start_workflow("bug-fix", "Calc", None, AgentRole::Orchestrator)
        .await
        .unwrap();

    let unlinked = orch
        .create_task(
            NewTask::new(
                AgentRole::Designer,
                AgentRole::Qa,
                TaskKind::Review,
                "Urgent check",
                "",
            )
            .with_priority(Priority::High),
        )
        .await;
    let linked = orch
        .create_task(
            NewTask::new(
                AgentRole::Orchestrator,
                AgentRole::Qa,
                TaskKind::Review,
                "Linked check",
                "",
            )
            .with_priority(Priority::Low)
            .with_payload(TaskPayload::Workflow(WorkflowLink {
                workflow_id: wf.id,
                step_id: wf.steps[1].id.clone(),
                project_name: "Calc".into(),
                auto_triggered: false,
                template: StepTemplate::default(),
            })),
        )
        .await;

    let qa = orch.list_for_agent(AgentRole::Qa).await;
    let ids: Vec<Uuid> = qa.iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![linked.id, unlinked.id]);

    complete(&orch, &linked).await;
    let qa = orch.list_for_agent(AgentRole::Qa).await;
    assert!(qa.iter().all(|t| t.status != TaskStatus::Completed));
    assert_eq!(qa.len(), 1);
}

#[tokio::test]
async fn unknown_workflow_type_creates_nothing() {
    let orch = orchestrator(0);
    let err = orch
        .start_workflow("release-train", "Calc", None, AgentRole::Orchestrator)
        .await
        .unwrap_err();
    assert!(matches!(err, relay_core::RelayError::UnknownWorkflowType(_)));
    assert!(orch.get_workflows().await.is_empty());
    assert_eq!(orch.task_stats().await.total, 0);
}

#[tokio::test]
async fn manual_step_is_not_auto_created() {
    let manual = catalog_with_manual_second_step();
    let orch = Orchestrator::with_catalog(
        OrchestratorConfig {
            advance_delay_ms: 0,
            ..OrchestratorConfig::default()
        },
        manual,
    );
    let (wf, first) = orch
        .start_workflow("handoff", "Calc", None, AgentRole::Orchestrator)
        .await
        .unwrap();
    complete(&orch, &first).await;
    orch.settle().await;

    let wf = orch.get_workflow(wf.id).await.unwrap();
    assert_eq!(wf.current_step, 1);
    assert_eq!(orch.tasks().list_by_workflow(wf.id).await.len(), 1);

    let StepTrigger::Created { task } = orch.trigger_step(wf.id).await.unwrap() else {
        panic!("expected a new task");
    };
    assert_eq!(task.to, AgentRole::Designer);
    assert_eq!(orch.tasks().list_by_workflow(wf.id).await.len(), 2);
}

fn catalog_with_manual_second_step() -> WorkflowCatalog {
    let mut steps = WorkflowCatalog::builtin().template_for("code-review").to_vec();
    steps.truncate(2);
    steps[1].agent = AgentRole::Designer;
    steps[1].auto_trigger = false;
    WorkflowCatalog::builtin().with_template("handoff", steps)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_signals_for_one_step_advance_once() {
    let orch = Arc::new(orchestrator(0));
    let (wf, first) = orch
        .start_workflow("bug-fix", "Calc", None, AgentRole::Orchestrator)
        .await
        .unwrap();
    orch.tasks()
        .update_status(first.id, TaskStatus::Completed, AgentRole::Developer)
        .await
        .unwrap();

    let workflow_id = wf.id;
    let step = wf.steps[0].id.clone();
    let mut handles = Vec::new();
    for _ in 0..16 {
        let engine = orch.engine().clone();
        let step = step.clone();
        handles.push(tokio::spawn(async move {
            engine.advance(workflow_id, Some(&step)).await.unwrap()
        }));
    }

    let mut advanced = 0;
    for handle in handles {
        if handle.await.unwrap().advanced() {
            advanced += 1;
        }
    }
    assert_eq!(advanced, 1);
    assert_eq!(orch.get_workflow(wf.id).await.unwrap().current_step, 1);
    assert_eq!(orch.tasks().list_by_workflow(wf.id).await.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_workflows_advance_independently() {
    let orch = Arc::new(orchestrator(0));
    let mut started = Vec::new();
    for project in ["Alpha", "Beta", "Gamma"] {
        let (wf, first) = orch
            .start_workflow("feature-request", project, None, AgentRole::Orchestrator)
            .await
            .unwrap();
        started.push((wf, first));
    }

    let mut handles = Vec::new();
    for (wf, first) in started.clone() {
        let orch = orch.clone();
        handles.push(tokio::spawn(async move {
            orch.update_task_status(first.id, TaskStatus::Completed, first.to)
                .await
                .unwrap();
            wf.id
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    orch.settle().await;

    for (wf, _) in &started {
        let current = orch.get_workflow(wf.id).await.unwrap();
        assert_eq!(current.current_step, 1, "{}", current.project_name);
        let tasks = orch.tasks().list_by_workflow(wf.id).await;
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[1].to, AgentRole::Designer);
    }
}

#[tokio::test]
async fn metrics_reflect_completed_work() {
    // Advances are driven explicitly; the scheduled ones never fire.
    let orch = orchestrator(600_000);
    let (wf, first) = orch
        .start_workflow("code-review", "Api", None, AgentRole::Orchestrator)
        .await
        .unwrap();
    orch.start_workflow("bug-fix", "Calc", None, AgentRole::Orchestrator)
        .await
        .unwrap();

    let mut next = Some(first);
    while let Some(task) = next.take() {
        complete(&orch, &task).await;
        if let StepAdvance::Progressed { task, .. } = orch.advance_workflow(wf.id).await.unwrap() {
            next = Some(*task);
        }
    }

    let metrics = orch.metrics().await;
    assert_eq!(metrics.total_workflows, 2);
    assert_eq!(metrics.completed_workflows, 1);
    assert_eq!(metrics.active_workflows, 1);
    assert_eq!(metrics.success_rate, 50);
    assert_eq!(metrics.completed_tasks, 4);
    assert!((metrics.total_cost - (4.0 * 0.05 + 0.25)).abs() < 1e-9);
    assert_eq!(metrics.agent_utilization[&AgentRole::Developer].pending, 1);

    let summaries = orch.get_workflows().await;
    let review = summaries.iter().find(|s| s.id == wf.id).unwrap();
    assert_eq!(review.progress, 100);
    assert_eq!(review.current_agent, None);
}

/// Opens pull requests slowly and counts them.
#[derive(Default)]
struct SlowPullRequests {
    opened: std::sync::atomic::AtomicUsize,
}

#[async_trait::async_trait]
impl VersionControl for SlowPullRequests {
    async fn init(&self) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn clone_repo(&self, _url: &str) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn commit(&self, _message: &str) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn push(&self, _branch: Option<&str>) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn pull(&self, _branch: Option<&str>) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn fetch(&self) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn checkout(&self, _branch: &str, _create: bool) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn merge(&self, _branch: &str) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn list_branches(&self) -> CollaboratorReply {
        CollaboratorReply::ok("")
    }
    async fn create_pull_request(&self, _request: &PullRequest) -> CollaboratorReply {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.opened
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        CollaboratorReply::ok("opened")
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_completions_of_one_task_open_one_pull_request() {
    let mut steps = WorkflowCatalog::builtin().template_for("code-review").to_vec();
    steps.truncate(1);
    steps[0].template.open_pull_request = true;
    let vcs = Arc::new(SlowPullRequests::default());
    let orch = Arc::new(
        Orchestrator::with_catalog(
            OrchestratorConfig {
                advance_delay_ms: 0,
                ..OrchestratorConfig::default()
            },
            WorkflowCatalog::builtin().with_template("single-pr", steps),
        )
        .with_version_control(vcs.clone()),
    );
    let (wf, task) = orch
        .start_workflow("single-pr", "Calc", None, AgentRole::Orchestrator)
        .await
        .unwrap();
    let mut sub = orch.subscribe().await;

    let mut handles = Vec::new();
    for _ in 0..2 {
        let orch = orch.clone();
        let (id, agent) = (task.id, task.to);
        handles.push(tokio::spawn(async move {
            orch.update_task_status(id, TaskStatus::Completed, agent).await
        }));
    }
    for handle in handles {
        let updated = handle.await.unwrap().unwrap();
        assert_eq!(updated.status, TaskStatus::Completed);
    }
    orch.settle().await;

    assert_eq!(vcs.opened.load(std::sync::atomic::Ordering::SeqCst), 1);
    let mut changes = 0;
    let mut completed = 0;
    while let Ok(event) = sub.receiver.try_recv() {
        match event.kind {
            EventKind::TaskStatusChanged => changes += 1,
            EventKind::WorkflowCompleted => completed += 1,
            _ => {}
        }
    }
    assert_eq!(changes, 1);
    assert_eq!(completed, 1);
    assert_eq!(
        orch.get_workflow(wf.id).await.unwrap().status,
        WorkflowStatus::Completed
    );
}
