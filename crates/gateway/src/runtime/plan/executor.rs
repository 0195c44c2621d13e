//! Level-wise concurrent plan execution with per-task failure policies.
//!
//! All level-N tasks reach a terminal status before any level-N+1 task
//! starts; a task's output is readable downstream only once `completed`.
//! The plan lock is never held across an await.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinSet;
use uuid::Uuid;

use hb_domain::invocation::{Invocation, Protocol};
use hb_domain::{Error, Result};

use crate::runtime::dispatch::Dispatcher;
use crate::runtime::template;

use super::dag;
use super::{FailurePolicy, Plan, PlanSpec, PlanStatus, Task, TaskStatus};

pub struct PlanExecutor {
    plans: Mutex<HashMap<Uuid, Arc<Mutex<Plan>>>>,
    /// Set once in bootstrap, after the dispatcher exists (the dispatcher
    /// needs the registry, which holds the plan tools, which need this).
    dispatcher: OnceLock<Arc<Dispatcher>>,
}

impl Default for PlanExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanExecutor {
    pub fn new() -> Self {
        Self {
            plans: Mutex::new(HashMap::new()),
            dispatcher: OnceLock::new(),
        }
    }

    pub fn set_dispatcher(&self, dispatcher: Arc<Dispatcher>) {
        let _ = self.dispatcher.set(dispatcher);
    }

    fn dispatcher(&self) -> Result<Arc<Dispatcher>> {
        self.dispatcher
            .get()
            .cloned()
            .ok_or_else(|| Error::Internal("plan executor is not wired to a dispatcher".into()))
    }

    // ── creation ──────────────────────────────────────────────────

    /// Validate the DAG and store the plan. Returns the id and the
    /// level-indexed execution order.
    pub fn create(&self, spec: PlanSpec) -> Result<Value> {
        let level_of = dag::assign_levels(&spec.tasks)?;

        let mut tasks = Vec::with_capacity(spec.tasks.len());
        for task_spec in spec.tasks {
            let (category, tool_name) = task_spec.tool.split_once('.').ok_or_else(|| {
                Error::InvalidParameter(format!(
                    "task '{}': tool must be 'category.name' (got '{}')",
                    task_spec.id, task_spec.tool
                ))
            })?;
            tasks.push(Task {
                level: level_of[&task_spec.id],
                name: task_spec.name.unwrap_or_else(|| task_spec.id.clone()),
                id: task_spec.id,
                category: category.to_owned(),
                tool_name: tool_name.to_owned(),
                params: task_spec.params,
                depends_on: task_spec.depends_on,
                require_hitl: task_spec.require_hitl,
                on_failure: task_spec.on_failure,
                status: TaskStatus::Pending,
                output: None,
                error: None,
                started_at: None,
                ended_at: None,
            });
        }

        let level_count = tasks.iter().map(|t| t.level + 1).max().unwrap_or(0);
        let mut levels: Vec<Vec<usize>> = vec![Vec::new(); level_count];
        for (i, task) in tasks.iter().enumerate() {
            levels[task.level].push(i);
        }

        let plan = Plan {
            id: Uuid::new_v4(),
            name: spec.name,
            on_failure_default: spec.on_failure,
            status: PlanStatus::Pending,
            tasks,
            levels,
            created_at: Utc::now(),
            cancel: tokio_util::sync::CancellationToken::new(),
        };

        let order: Vec<Vec<String>> = plan
            .levels
            .iter()
            .map(|level| level.iter().map(|&i| plan.tasks[i].id.clone()).collect())
            .collect();
        let created = serde_json::json!({
            "plan_id": plan.id.to_string(),
            "name": plan.name,
            "task_count": plan.tasks.len(),
            "execution_order": order,
        });

        tracing::info!(plan_id = %plan.id, name = %plan.name, tasks = plan.tasks.len(), "plan created");
        self.plans.lock().insert(plan.id, Arc::new(Mutex::new(plan)));
        Ok(created)
    }

    // ── resolution ────────────────────────────────────────────────

    /// Resolve a plan reference: an id, or a name carried by exactly one
    /// plan.
    pub fn resolve(&self, reference: &str) -> Result<Arc<Mutex<Plan>>> {
        let plans = self.plans.lock();
        if let Ok(id) = reference.parse::<Uuid>() {
            if let Some(plan) = plans.get(&id) {
                return Ok(plan.clone());
            }
        }
        let matches: Vec<&Arc<Mutex<Plan>>> = plans
            .values()
            .filter(|p| p.lock().name == reference)
            .collect();
        match matches.len() {
            0 => Err(Error::NotFound(format!("plan '{reference}' does not exist"))),
            1 => Ok(matches[0].clone()),
            n => Err(Error::InvalidParameter(format!(
                "plan name '{reference}' is ambiguous ({n} plans); use the id"
            ))),
        }
    }

    // ── execution ─────────────────────────────────────────────────

    pub async fn execute(&self, reference: &str, protocol: Protocol) -> Result<Value> {
        let plan_arc = self.resolve(reference)?;
        let dispatcher = self.dispatcher()?;

        let (plan_id, cancel, level_count) = {
            let mut plan = plan_arc.lock();
            if plan.status != PlanStatus::Pending {
                return Err(Error::InvalidParameter(format!(
                    "plan '{}' is not pending (status: {})",
                    plan.id,
                    plan.status.as_str()
                )));
            }
            plan.status = PlanStatus::Running;
            (plan.id, plan.cancel.clone(), plan.levels.len())
        };
        tracing::info!(plan_id = %plan_id, "plan execution started");

        'levels: for level_idx in 0..level_count {
            if cancel.is_cancelled() {
                break;
            }

            // Snapshot runnable tasks and resolve their task references
            // against completed upstream outputs.
            struct Ready {
                index: usize,
                category: String,
                tool_name: String,
                params: Value,
                require_hitl: bool,
            }
            let mut ready: Vec<Ready> = Vec::new();
            {
                let mut plan = plan_arc.lock();
                let outputs: HashMap<String, Value> = plan
                    .tasks
                    .iter()
                    .filter(|t| t.status == TaskStatus::Completed)
                    .map(|t| (t.id.clone(), t.output.clone().unwrap_or(Value::Null)))
                    .collect();

                let indices = plan.levels[level_idx].clone();
                for i in indices {
                    if plan.tasks[i].status != TaskStatus::Pending {
                        continue;
                    }
                    match template::expand_task_refs(&plan.tasks[i].params, &outputs) {
                        Ok(params) => {
                            let task = &mut plan.tasks[i];
                            task.status = TaskStatus::Running;
                            task.started_at = Some(Utc::now());
                            ready.push(Ready {
                                index: i,
                                category: task.category.clone(),
                                tool_name: task.tool_name.clone(),
                                params,
                                require_hitl: task.require_hitl,
                            });
                        }
                        Err(e) => {
                            let task = &mut plan.tasks[i];
                            task.status = TaskStatus::Failed;
                            task.error = Some(e.public_message());
                            task.started_at = Some(Utc::now());
                            task.ended_at = Some(Utc::now());
                        }
                    }
                }
            }

            // All tasks in the level run concurrently.
            let mut join: JoinSet<(usize, Result<Value>)> = JoinSet::new();
            for r in ready {
                let dispatcher = dispatcher.clone();
                let token = cancel.child_token();
                join.spawn(async move {
                    let inv =
                        Invocation::new(r.category, r.tool_name, r.params, protocol);
                    let result = dispatcher.dispatch_with(inv, token, r.require_hitl).await;
                    (r.index, result)
                });
            }
            while let Some(joined) = join.join_next().await {
                let Ok((index, result)) = joined else { continue };
                let mut plan = plan_arc.lock();
                let task = &mut plan.tasks[index];
                // A cancel may have skipped this task while it ran.
                if task.status != TaskStatus::Running {
                    continue;
                }
                task.ended_at = Some(Utc::now());
                match result {
                    Ok(output) => {
                        task.status = TaskStatus::Completed;
                        task.output = Some(output);
                    }
                    Err(e) => {
                        task.status = TaskStatus::Failed;
                        task.error = Some(e.public_message());
                    }
                }
            }

            // Apply failure policies for this level's failures.
            {
                let mut plan = plan_arc.lock();
                let failed: Vec<usize> = plan.levels[level_idx]
                    .iter()
                    .copied()
                    .filter(|&i| plan.tasks[i].status == TaskStatus::Failed)
                    .collect();
                for i in failed {
                    let policy = plan.tasks[i]
                        .on_failure
                        .unwrap_or(plan.on_failure_default);
                    match policy {
                        FailurePolicy::Stop => {
                            skip_pending(&mut plan);
                            plan.status = PlanStatus::Failed;
                            tracing::warn!(plan_id = %plan_id, task = %plan.tasks[i].id, "plan stopped on task failure");
                            break 'levels;
                        }
                        FailurePolicy::SkipDependents => {
                            let task_id = plan.tasks[i].id.clone();
                            for d in plan.transitive_dependents(&task_id) {
                                if plan.tasks[d].status == TaskStatus::Pending {
                                    plan.tasks[d].status = TaskStatus::Skipped;
                                }
                            }
                        }
                        FailurePolicy::Continue => {}
                    }
                }
            }
        }

        let summary = {
            let mut plan = plan_arc.lock();
            if plan.status == PlanStatus::Running {
                plan.status = if cancel.is_cancelled() {
                    skip_pending(&mut plan);
                    PlanStatus::Cancelled
                } else if plan.tasks.iter().any(|t| t.status == TaskStatus::Failed) {
                    PlanStatus::Failed
                } else {
                    PlanStatus::Completed
                };
            }
            tracing::info!(plan_id = %plan_id, status = plan.status.as_str(), "plan execution finished");
            plan.summary()
        };
        Ok(summary)
    }

    // ── queries & cancellation ────────────────────────────────────

    pub fn status(&self, reference: &str) -> Result<Value> {
        let plan = self.resolve(reference)?;
        let plan = plan.lock();
        Ok(plan.summary())
    }

    pub fn list(&self) -> Value {
        let plans = self.plans.lock();
        let mut items: Vec<Value> = plans
            .values()
            .map(|p| {
                let p = p.lock();
                serde_json::json!({
                    "plan_id": p.id.to_string(),
                    "name": p.name,
                    "status": p.status.as_str(),
                    "created_at": p.created_at.to_rfc3339(),
                    "counts": p.counts(),
                })
            })
            .collect();
        items.sort_by(|a, b| {
            a["created_at"]
                .as_str()
                .unwrap_or("")
                .cmp(b["created_at"].as_str().unwrap_or(""))
        });
        serde_json::json!({ "plans": items, "count": items.len() })
    }

    /// Cancel a plan: pending and running tasks become `skipped`, running
    /// invocations receive cancellation, and the plan can never run again.
    pub fn cancel(&self, reference: &str) -> Result<Value> {
        let plan_arc = self.resolve(reference)?;
        let mut plan = plan_arc.lock();
        match plan.status {
            PlanStatus::Completed | PlanStatus::Failed | PlanStatus::Cancelled => {
                return Err(Error::InvalidParameter(format!(
                    "plan '{}' already finished (status: {})",
                    plan.id,
                    plan.status.as_str()
                )));
            }
            PlanStatus::Pending | PlanStatus::Running => {}
        }
        plan.cancel.cancel();
        for task in &mut plan.tasks {
            if matches!(task.status, TaskStatus::Pending | TaskStatus::Running) {
                task.status = TaskStatus::Skipped;
                task.ended_at.get_or_insert_with(Utc::now);
            }
        }
        plan.status = PlanStatus::Cancelled;
        tracing::info!(plan_id = %plan.id, "plan cancelled");
        Ok(plan.summary())
    }
}

fn skip_pending(plan: &mut Plan) {
    for task in &mut plan.tasks {
        if task.status == TaskStatus::Pending {
            task.status = TaskStatus::Skipped;
        }
    }
}
