//! Plan executor — an in-memory DAG engine over the dispatch pipeline.
//!
//! Plans are validated at creation (Kahn levels, cycle and reference
//! checks), executed level by level with tasks in a level running
//! concurrently, and never persisted: they die with the process.

pub mod dag;
pub mod executor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use executor::PlanExecutor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Status machines
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl PlanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Running => "running",
            PlanStatus::Completed => "completed",
            PlanStatus::Failed => "failed",
            PlanStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    Stop,
    SkipDependents,
    Continue,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Creation input
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSpec {
    /// Unique within the plan; referenced by `depends_on` and
    /// `{{task:ID.FIELD}}` templates.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    /// `"category.name"` tool coordinates.
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Force approval for this invocation regardless of policy.
    #[serde(default)]
    pub require_hitl: bool,
    /// Per-task override of the plan's failure policy.
    #[serde(default)]
    pub on_failure: Option<FailurePolicy>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlanSpec {
    pub name: String,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    pub tasks: Vec<TaskSpec>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub category: String,
    pub tool_name: String,
    pub params: Value,
    pub depends_on: Vec<String>,
    pub require_hitl: bool,
    pub on_failure: Option<FailurePolicy>,
    pub level: usize,
    pub status: TaskStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

pub struct Plan {
    pub id: Uuid,
    pub name: String,
    pub on_failure_default: FailurePolicy,
    pub status: PlanStatus,
    pub tasks: Vec<Task>,
    /// Task indices grouped by topological level.
    pub levels: Vec<Vec<usize>>,
    pub created_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

impl Plan {
    pub fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn counts(&self) -> Value {
        let mut pending = 0;
        let mut running = 0;
        let mut completed = 0;
        let mut failed = 0;
        let mut skipped = 0;
        for task in &self.tasks {
            match task.status {
                TaskStatus::Pending => pending += 1,
                TaskStatus::Running => running += 1,
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                TaskStatus::Skipped => skipped += 1,
            }
        }
        serde_json::json!({
            "pending": pending,
            "running": running,
            "completed": completed,
            "failed": failed,
            "skipped": skipped,
        })
    }

    pub fn summary(&self) -> Value {
        serde_json::json!({
            "plan_id": self.id.to_string(),
            "name": self.name,
            "status": self.status.as_str(),
            "created_at": self.created_at.to_rfc3339(),
            "counts": self.counts(),
            "tasks": self.tasks.iter().map(task_view).collect::<Vec<_>>(),
        })
    }

    /// Indices of every task transitively depending on `task_id`.
    pub fn transitive_dependents(&self, task_id: &str) -> Vec<usize> {
        let mut out = Vec::new();
        let mut frontier = vec![task_id.to_owned()];
        while let Some(current) = frontier.pop() {
            for (i, task) in self.tasks.iter().enumerate() {
                if task.depends_on.iter().any(|d| d == &current) && !out.contains(&i) {
                    out.push(i);
                    frontier.push(task.id.clone());
                }
            }
        }
        out
    }
}

fn task_view(task: &Task) -> Value {
    serde_json::json!({
        "id": task.id,
        "name": task.name,
        "tool": format!("{}.{}", task.category, task.tool_name),
        "level": task.level,
        "status": task.status.as_str(),
        "depends_on": task.depends_on,
        "output": task.output,
        "error": task.error,
        "started_at": task.started_at.map(|t| t.to_rfc3339()),
        "ended_at": task.ended_at.map(|t| t.to_rfc3339()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, deps: &[&str]) -> Task {
        Task {
            id: id.into(),
            name: id.into(),
            category: "fs".into(),
            tool_name: "write".into(),
            params: Value::Null,
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            require_hitl: false,
            on_failure: None,
            level: 0,
            status: TaskStatus::Pending,
            output: None,
            error: None,
            started_at: None,
            ended_at: None,
        }
    }

    fn plan(tasks: Vec<Task>) -> Plan {
        Plan {
            id: Uuid::new_v4(),
            name: "p".into(),
            on_failure_default: FailurePolicy::Stop,
            status: PlanStatus::Pending,
            tasks,
            levels: Vec::new(),
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn transitive_dependents_walks_the_chain() {
        let p = plan(vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &[]),
        ]);
        let mut deps = p.transitive_dependents("a");
        deps.sort();
        assert_eq!(deps, vec![1, 2]);
        assert!(p.transitive_dependents("d").is_empty());
    }

    #[test]
    fn counts_reflect_task_statuses() {
        let mut p = plan(vec![task("a", &[]), task("b", &[]), task("c", &[])]);
        p.tasks[0].status = TaskStatus::Completed;
        p.tasks[1].status = TaskStatus::Failed;
        let counts = p.counts();
        assert_eq!(counts["completed"], 1);
        assert_eq!(counts["failed"], 1);
        assert_eq!(counts["pending"], 1);
    }

    #[test]
    fn failure_policy_parses_from_snake_case() {
        let p: FailurePolicy = serde_json::from_str("\"skip_dependents\"").unwrap();
        assert_eq!(p, FailurePolicy::SkipDependents);
    }
}
