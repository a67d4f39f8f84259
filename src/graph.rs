//! Declarative task graph.
//!
//! Tasks declare a name, their dependencies, and an activation state derived
//! from the resolved feature flags. Building the graph prunes inactive tasks
//! by contracting their edges (a task depending on a pruned task inherits
//! its dependencies), rejects unknown names and cycles, and restricts the
//! graph to the invoked target's transitive closure.
//!
//! Execution is fail-fast: ready tasks run on parallel threads; the first
//! failure stops dispatch, downstream tasks report skipped, and branches
//! already running finish before the build reports the originating task.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::mpsc;
use std::time::Instant;

use thiserror::Error;

use crate::compile::CompileError;
use crate::context::BuildContext;
use crate::deps::ResolveError;
use crate::package::PackageError;
use crate::remap::RemapError;
use crate::report::{TaskReport, TaskStatus};
use crate::resources::ResourceError;
use crate::signal::CancelFlag;
use crate::tags::TagsError;

/// Failure of a single task
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Tags(#[from] TagsError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Remap(#[from] RemapError),

    #[error(transparent)]
    Package(#[from] PackageError),
}

impl StageError {
    /// Process exit code for this failure kind
    pub fn exit_code(&self) -> i32 {
        match self {
            StageError::Resolve(_) => 30,
            StageError::Tags(_) => 21,
            StageError::Resource(_) => 22,
            StageError::Compile(_) => 40,
            StageError::Remap(_) => 50,
            StageError::Package(_) => 60,
        }
    }
}

/// Errors from graph construction
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate task {0:?}")]
    DuplicateTask(String),

    #[error("task {task:?} depends on unknown task {dep:?}")]
    UnknownDependency { task: String, dep: String },

    #[error("unknown target task {0:?}")]
    UnknownTarget(String),

    #[error("dependency cycle through task {0:?}")]
    Cycle(String),
}

type TaskFn = Box<dyn Fn(&BuildContext) -> Result<(), StageError> + Send + Sync>;

struct TaskSpec {
    name: &'static str,
    deps: Vec<&'static str>,
    active: bool,
    run: TaskFn,
}

/// Declares tasks and their activation predicates
#[derive(Default)]
pub struct GraphBuilder {
    tasks: Vec<TaskSpec>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an always-active task
    pub fn task<F>(self, name: &'static str, deps: &[&'static str], run: F) -> Self
    where
        F: Fn(&BuildContext) -> Result<(), StageError> + Send + Sync + 'static,
    {
        self.task_if(name, deps, true, run)
    }

    /// Declare a task with an activation state (already evaluated over the
    /// resolved flags; flags cannot change after context preparation)
    pub fn task_if<F>(
        mut self,
        name: &'static str,
        deps: &[&'static str],
        active: bool,
        run: F,
    ) -> Self
    where
        F: Fn(&BuildContext) -> Result<(), StageError> + Send + Sync + 'static,
    {
        self.tasks.push(TaskSpec {
            name,
            deps: deps.to_vec(),
            active,
            run: Box::new(run),
        });
        self
    }

    /// Prune, contract, validate, and restrict to the target's closure
    pub fn build(self, target: &str) -> Result<TaskGraph, GraphError> {
        let mut index: BTreeMap<&'static str, usize> = BTreeMap::new();
        for (i, task) in self.tasks.iter().enumerate() {
            if index.insert(task.name, i).is_some() {
                return Err(GraphError::DuplicateTask(task.name.to_string()));
            }
        }

        for task in &self.tasks {
            for dep in &task.deps {
                if !index.contains_key(dep) {
                    return Err(GraphError::UnknownDependency {
                        task: task.name.to_string(),
                        dep: dep.to_string(),
                    });
                }
            }
        }

        let target_idx = *index
            .get(target)
            .ok_or_else(|| GraphError::UnknownTarget(target.to_string()))?;
        if !self.tasks[target_idx].active {
            return Err(GraphError::UnknownTarget(target.to_string()));
        }

        // Contract edges through inactive tasks, detecting cycles on the way
        let mut effective: Vec<Option<BTreeSet<usize>>> = vec![None; self.tasks.len()];
        for i in 0..self.tasks.len() {
            let mut visiting = Vec::new();
            Self::contract(&self.tasks, &index, i, &mut effective, &mut visiting)?;
        }

        // Restrict to the target's transitive closure over active tasks
        let mut keep = BTreeSet::new();
        let mut queue = VecDeque::from([target_idx]);
        while let Some(i) = queue.pop_front() {
            if !keep.insert(i) {
                continue;
            }
            for &dep in effective[i].as_ref().expect("contracted") {
                queue.push_back(dep);
            }
        }

        let order: Vec<usize> = keep.iter().copied().collect();
        let renumber: BTreeMap<usize, usize> = order
            .iter()
            .enumerate()
            .map(|(new, &old)| (old, new))
            .collect();

        let pruned = self
            .tasks
            .iter()
            .filter(|t| !t.active)
            .map(|t| t.name.to_string())
            .collect();

        let mut tasks = Vec::with_capacity(order.len());
        let mut specs: Vec<Option<TaskSpec>> = self.tasks.into_iter().map(Some).collect();
        for &old in &order {
            let spec = specs[old].take().expect("each task taken once");
            let deps = effective[old]
                .as_ref()
                .expect("contracted")
                .iter()
                .filter_map(|dep| renumber.get(dep).copied())
                .collect();
            tasks.push(Task {
                name: spec.name,
                deps,
                run: spec.run,
            });
        }

        Ok(TaskGraph { tasks, pruned })
    }

    /// Effective dependencies of task `i`: active dependencies, with
    /// inactive ones replaced by their own effective dependencies.
    fn contract(
        tasks: &[TaskSpec],
        index: &BTreeMap<&'static str, usize>,
        i: usize,
        effective: &mut Vec<Option<BTreeSet<usize>>>,
        visiting: &mut Vec<usize>,
    ) -> Result<BTreeSet<usize>, GraphError> {
        if let Some(done) = &effective[i] {
            return Ok(done.clone());
        }
        if visiting.contains(&i) {
            return Err(GraphError::Cycle(tasks[i].name.to_string()));
        }
        visiting.push(i);

        let mut deps = BTreeSet::new();
        for dep_name in &tasks[i].deps {
            let dep = index[dep_name];
            if tasks[dep].active {
                deps.insert(dep);
                // Still recurse so cycles hiding behind active deps surface
                Self::contract(tasks, index, dep, effective, visiting)?;
            } else {
                deps.extend(Self::contract(tasks, index, dep, effective, visiting)?);
            }
        }

        visiting.pop();
        effective[i] = Some(deps.clone());
        Ok(deps)
    }
}

struct Task {
    name: &'static str,
    deps: Vec<usize>,
    run: TaskFn,
}

/// Outcome of executing a graph
pub struct ExecutionOutcome {
    pub reports: Vec<TaskReport>,
    /// Originating failed task and its error
    pub failure: Option<(String, StageError)>,
    pub cancelled: bool,
}

/// A validated, pruned task graph restricted to one target
pub struct TaskGraph {
    tasks: Vec<Task>,
    pruned: Vec<String>,
}

impl TaskGraph {
    /// Task names in a valid execution order
    pub fn task_names(&self) -> Vec<&'static str> {
        let mut indegree: Vec<usize> = self.tasks.iter().map(|t| t.deps.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.tasks.len()];
        for (i, task) in self.tasks.iter().enumerate() {
            for &dep in &task.deps {
                dependents[dep].push(i);
            }
        }

        let mut queue: VecDeque<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, &d)| d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(i) = queue.pop_front() {
            order.push(self.tasks[i].name);
            for &next in &dependents[i] {
                indegree[next] -= 1;
                if indegree[next] == 0 {
                    queue.push_back(next);
                }
            }
        }
        order
    }

    /// Flag-inactive task names removed during construction
    pub fn pruned(&self) -> &[String] {
        &self.pruned
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Execute the graph. Independent ready tasks run concurrently.
    pub fn execute(&self, ctx: &BuildContext, cancel: &CancelFlag) -> ExecutionOutcome {
        let n = self.tasks.len();
        let mut indegree: Vec<usize> = self.tasks.iter().map(|t| t.deps.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, task) in self.tasks.iter().enumerate() {
            for &dep in &task.deps {
                dependents[dep].push(i);
            }
        }

        let mut status: Vec<Option<TaskStatus>> = vec![None; n];
        let mut durations = vec![0u64; n];
        let mut messages: Vec<Option<String>> = vec![None; n];
        let mut failure: Option<(String, StageError)> = None;
        let mut cancelled = false;

        let (tx, rx) = mpsc::channel::<(usize, Result<(), StageError>, u64)>();

        std::thread::scope(|scope| {
            let mut ready: VecDeque<usize> = indegree
                .iter()
                .enumerate()
                .filter(|(_, &d)| d == 0)
                .map(|(i, _)| i)
                .collect();
            let mut running = 0usize;

            loop {
                if !cancelled && cancel.is_cancelled() {
                    cancelled = true;
                }

                if failure.is_none() && !cancelled {
                    while let Some(idx) = ready.pop_front() {
                        let task = &self.tasks[idx];
                        let tx = tx.clone();
                        if ctx.verbose {
                            eprintln!("[{}] started", task.name);
                        }
                        running += 1;
                        scope.spawn(move || {
                            let start = Instant::now();
                            let result = (task.run)(ctx);
                            let _ = tx.send((idx, result, start.elapsed().as_millis() as u64));
                        });
                    }
                }

                if running == 0 {
                    break;
                }

                let (idx, result, duration) = rx.recv().expect("worker channel open");
                running -= 1;
                durations[idx] = duration;

                match result {
                    Ok(()) => {
                        status[idx] = Some(TaskStatus::Succeeded);
                        if ctx.verbose {
                            eprintln!("[{}] succeeded ({duration} ms)", self.tasks[idx].name);
                        }
                        for &next in &dependents[idx] {
                            indegree[next] -= 1;
                            if indegree[next] == 0 {
                                ready.push_back(next);
                            }
                        }
                    }
                    Err(error) => {
                        status[idx] = Some(TaskStatus::Failed);
                        messages[idx] = Some(error.to_string());
                        eprintln!("[{}] FAILED: {error}", self.tasks[idx].name);
                        if failure.is_none() {
                            failure = Some((self.tasks[idx].name.to_string(), error));
                        }
                    }
                }
            }
        });

        let reports = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, task)| TaskReport {
                name: task.name.to_string(),
                status: status[i].unwrap_or(TaskStatus::Skipped),
                duration_ms: durations[i],
                message: messages[i].take(),
            })
            .collect();

        ExecutionOutcome {
            reports,
            failure,
            cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::context::Goal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn context(temp: &TempDir) -> BuildContext {
        let text = r#"
[project]
module_id = "examplemod"
display_name = "Example Mod"
version = "1.2.0"
group = "com.example"
archive_base = "examplemod"
target_version = "1.12.2"

[properties]
useCoreMod = "false"
useMixins = "false"
useSpark = "false"
useAccessTransformer = "false"
includeMod = "false"

[mappings]
channel = "stable"
version = "39"
"#;
        let config: ProjectConfig = toml::from_str(text).unwrap();
        BuildContext::prepare(&config, temp.path(), Goal::Package, false).unwrap()
    }

    fn fail() -> StageError {
        StageError::Tags(TagsError::BadClassName("boom".to_string()))
    }

    #[test]
    fn test_linear_order_and_success() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let log = Arc::new(Mutex::new(Vec::new()));

        let record = |log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str| {
            let log = log.clone();
            move |_: &BuildContext| {
                log.lock().unwrap().push(name);
                Ok(())
            }
        };

        let graph = GraphBuilder::new()
            .task("first", &[], record(&log, "first"))
            .task("second", &["first"], record(&log, "second"))
            .task("third", &["second"], record(&log, "third"))
            .build("third")
            .unwrap();

        let outcome = graph.execute(&ctx, &CancelFlag::new());
        assert!(outcome.failure.is_none());
        assert!(!outcome.cancelled);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
        assert!(outcome
            .reports
            .iter()
            .all(|r| r.status == TaskStatus::Succeeded));
    }

    #[test]
    fn test_pruned_task_edges_contract() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let ran = Arc::new(AtomicUsize::new(0));

        let count = |ran: &Arc<AtomicUsize>| {
            let ran = ran.clone();
            move |_: &BuildContext| {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        let graph = GraphBuilder::new()
            .task("base", &[], count(&ran))
            .task_if("optional", &["base"], false, |_| {
                panic!("pruned task must not run")
            })
            .task("top", &["optional"], count(&ran))
            .build("top")
            .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.pruned(), &["optional".to_string()]);
        // Contraction keeps the transitive edge top -> base
        assert_eq!(graph.task_names(), vec!["base", "top"]);

        let outcome = graph.execute(&ctx, &CancelFlag::new());
        assert!(outcome.failure.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failure_skips_dependents() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);

        let graph = GraphBuilder::new()
            .task("ok", &[], |_| Ok(()))
            .task("broken", &["ok"], |_| Err(fail()))
            .task("downstream", &["broken"], |_| {
                panic!("must not run after failure")
            })
            .build("downstream")
            .unwrap();

        let outcome = graph.execute(&ctx, &CancelFlag::new());
        let (failed_task, error) = outcome.failure.unwrap();
        assert_eq!(failed_task, "broken");
        assert_eq!(error.exit_code(), 21);

        let by_name: BTreeMap<_, _> = outcome
            .reports
            .iter()
            .map(|r| (r.name.as_str(), r.status))
            .collect();
        assert_eq!(by_name["ok"], TaskStatus::Succeeded);
        assert_eq!(by_name["broken"], TaskStatus::Failed);
        assert_eq!(by_name["downstream"], TaskStatus::Skipped);
    }

    #[test]
    fn test_independent_branch_completes_after_failure() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let slow_done = Arc::new(AtomicUsize::new(0));

        let slow = {
            let done = slow_done.clone();
            move |_: &BuildContext| {
                std::thread::sleep(std::time::Duration::from_millis(100));
                done.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        };

        let graph = GraphBuilder::new()
            .task("slow-branch", &[], slow)
            .task("fast-failure", &[], |_| Err(fail()))
            .task("join", &["slow-branch", "fast-failure"], |_| {
                panic!("must not run")
            })
            .build("join")
            .unwrap();

        let outcome = graph.execute(&ctx, &CancelFlag::new());
        assert!(outcome.failure.is_some());
        // The already-running branch ran to completion
        assert_eq!(slow_done.load(Ordering::SeqCst), 1);

        let by_name: BTreeMap<_, _> = outcome
            .reports
            .iter()
            .map(|r| (r.name.as_str(), r.status))
            .collect();
        assert_eq!(by_name["slow-branch"], TaskStatus::Succeeded);
        assert_eq!(by_name["join"], TaskStatus::Skipped);
    }

    #[test]
    fn test_target_restricts_subgraph() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);

        let graph = GraphBuilder::new()
            .task("wanted-dep", &[], |_| Ok(()))
            .task("wanted", &["wanted-dep"], |_| Ok(()))
            .task("unrelated", &[], |_| panic!("outside the target closure"))
            .build("wanted")
            .unwrap();

        assert_eq!(graph.len(), 2);
        let outcome = graph.execute(&ctx, &CancelFlag::new());
        assert!(outcome.failure.is_none());
    }

    #[test]
    fn test_cancellation_stops_dispatch() {
        let temp = TempDir::new().unwrap();
        let ctx = context(&temp);
        let cancel = CancelFlag::new();

        let graph = GraphBuilder::new()
            .task("first", &[], {
                let cancel = cancel.clone();
                move |_| {
                    cancel.cancel();
                    Ok(())
                }
            })
            .task("second", &["first"], |_| panic!("must not dispatch"))
            .build("second")
            .unwrap();

        let outcome = graph.execute(&ctx, &cancel);
        assert!(outcome.cancelled);
        assert!(outcome.failure.is_none());

        let by_name: BTreeMap<_, _> = outcome
            .reports
            .iter()
            .map(|r| (r.name.as_str(), r.status))
            .collect();
        assert_eq!(by_name["first"], TaskStatus::Succeeded);
        assert_eq!(by_name["second"], TaskStatus::Skipped);
    }

    #[test]
    fn test_graph_validation_errors() {
        let dup = GraphBuilder::new()
            .task("a", &[], |_| Ok(()))
            .task("a", &[], |_| Ok(()))
            .build("a");
        assert!(matches!(dup, Err(GraphError::DuplicateTask(_))));

        let unknown = GraphBuilder::new()
            .task("a", &["missing"], |_| Ok(()))
            .build("a");
        assert!(matches!(unknown, Err(GraphError::UnknownDependency { .. })));

        let cycle = GraphBuilder::new()
            .task("a", &["b"], |_| Ok(()))
            .task("b", &["a"], |_| Ok(()))
            .build("a");
        assert!(matches!(cycle, Err(GraphError::Cycle(_))));

        let target = GraphBuilder::new()
            .task("a", &[], |_| Ok(()))
            .build("zzz");
        assert!(matches!(target, Err(GraphError::UnknownTarget(_))));
    }
}
