//! Task dependency and classification engine.
//!
//! A pure function from a task set to a classified task set, a cycle list,
//! and statistics. Stateless and O(V+E); callers re-run it per query and
//! must invalidate any cache on a task write.

mod resolve;

pub use resolve::{normalize_ref, NormalizedRef};

use crate::models::{
    BlockReason, Classification, ClassifiedTask, DependencyReport, DependencyStats, Priority, Task,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Environment the engine resolves working directories against.
#[derive(Debug, Clone)]
pub struct EngineEnv {
    pub home: PathBuf,
}

impl EngineEnv {
    /// Resolve from `$HOME`; falls back to the filesystem root when unset
    /// (workdirs then simply fail the existence check).
    pub fn from_process() -> Self {
        Self {
            home: std::env::var("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/")),
        }
    }
}

/// Classifies a task set against the process environment.
pub fn classify(tasks: &[Task]) -> DependencyReport {
    classify_with_env(tasks, &EngineEnv::from_process())
}

/// Classifies a task set. See the module docs for the rule order.
pub fn classify_with_env(tasks: &[Task], env: &EngineEnv) -> DependencyReport {
    let index = resolve::TaskIndex::build(tasks);

    // Resolve each task's dep refs once; edges are index pairs.
    let mut resolved_edges: Vec<Vec<usize>> = Vec::with_capacity(tasks.len());
    let mut resolved_deps: Vec<Vec<String>> = Vec::with_capacity(tasks.len());
    let mut unresolved_deps: Vec<Vec<String>> = Vec::with_capacity(tasks.len());
    for task in tasks {
        let mut edges = Vec::new();
        let mut resolved = Vec::new();
        let mut unresolved = Vec::new();
        let mut seen_keys = HashSet::new();
        let mut seen_targets = HashSet::new();
        for raw in &task.depends_on {
            let normalized = normalize_ref(raw);
            if !seen_keys.insert(normalized.key.clone()) {
                continue; // duplicates are semantically a set
            }
            match index.resolve(&normalized) {
                // Differently-spelled refs may hit the same task; one edge.
                Some(dep_idx) => {
                    if seen_targets.insert(dep_idx) {
                        edges.push(dep_idx);
                        resolved.push(tasks[dep_idx].id.clone());
                    }
                }
                None => unresolved.push(normalized.key),
            }
        }
        resolved_edges.push(edges);
        resolved_deps.push(resolved);
        unresolved_deps.push(unresolved);
    }

    // Ancestor chains, bounded by a visited set so parent cycles terminate.
    let parent_chains: Vec<Vec<usize>> = tasks
        .iter()
        .map(|task| {
            let mut chain = Vec::new();
            let mut visited = HashSet::new();
            let mut current = task.parent_id.as_deref().and_then(|p| {
                let normalized = normalize_ref(p);
                index.resolve(&normalized)
            });
            while let Some(idx) = current {
                if !visited.insert(idx) {
                    break;
                }
                chain.push(idx);
                current = tasks[idx].parent_id.as_deref().and_then(|p| {
                    let normalized = normalize_ref(p);
                    index.resolve(&normalized)
                });
            }
            chain
        })
        .collect();

    // Cycle membership over resolved dep edges only; unresolved refs never
    // affect cycle or blocked status.
    let sccs = tarjan_sccs(tasks.len(), &resolved_edges);
    let mut in_cycle = vec![false; tasks.len()];
    let mut cycles: Vec<Vec<String>> = Vec::new();
    for scc in &sccs {
        let cyclic = scc.len() > 1 || resolved_edges[scc[0]].contains(&scc[0]);
        if cyclic {
            for &member in scc {
                in_cycle[member] = true;
            }
            let mut ids: Vec<String> = scc.iter().map(|&i| tasks[i].id.clone()).collect();
            ids.sort();
            cycles.push(ids);
        }
    }
    cycles.sort();

    let mut classified = Vec::with_capacity(tasks.len());
    let mut stats = DependencyStats {
        total: tasks.len(),
        ..Default::default()
    };

    for (i, task) in tasks.iter().enumerate() {
        let blocked_by: Vec<String> = resolved_edges[i]
            .iter()
            .filter(|&&dep| tasks[dep].status.blocks_dependents())
            .map(|&dep| tasks[dep].id.clone())
            .collect();
        let waiting_on: Vec<String> = resolved_edges[i]
            .iter()
            .filter(|&&dep| !tasks[dep].status.is_satisfied())
            .map(|&dep| tasks[dep].id.clone())
            .collect();

        let parent_blocking = parent_chains[i]
            .iter()
            .any(|&a| tasks[a].status.blocks_dependents());
        let parent_waiting = parent_chains[i]
            .iter()
            .any(|&a| !tasks[a].status.clears_children());

        let (classification, blocked_by_reason) = if task.status
            != crate::models::EntryStatus::Pending
        {
            (Classification::NotPending, None)
        } else if in_cycle[i] {
            (Classification::Blocked, Some(BlockReason::CircularDependency))
        } else if parent_blocking {
            (Classification::BlockedByParent, None)
        } else if !blocked_by.is_empty() {
            (Classification::Blocked, Some(BlockReason::DependencyBlocked))
        } else if parent_waiting {
            (Classification::WaitingOnParent, None)
        } else if !waiting_on.is_empty() {
            (Classification::Waiting, None)
        } else {
            (Classification::Ready, None)
        };

        match classification {
            Classification::Ready => stats.ready += 1,
            Classification::Waiting => stats.waiting += 1,
            Classification::WaitingOnParent => stats.waiting_on_parent += 1,
            Classification::Blocked => stats.blocked += 1,
            Classification::BlockedByParent => stats.blocked_by_parent += 1,
            Classification::NotPending => stats.not_pending += 1,
        }
        if in_cycle[i] {
            stats.in_cycle += 1;
        }
        stats.unresolved_refs += unresolved_deps[i].len();

        classified.push(ClassifiedTask {
            task: task.clone(),
            classification,
            resolved_deps: resolved_deps[i].clone(),
            unresolved_deps: unresolved_deps[i].clone(),
            parent_chain: parent_chains[i]
                .iter()
                .map(|&a| tasks[a].id.clone())
                .collect(),
            blocked_by,
            blocked_by_reason,
            waiting_on,
            in_cycle: in_cycle[i],
            resolved_workdir: resolve_workdir(task, &env.home),
        });
    }

    DependencyReport {
        tasks: classified,
        cycles,
        stats,
    }
}

/// Scheduling order: priority (high first), then `created` ascending, then
/// id. Stable across runs.
pub fn schedule_order(a: &ClassifiedTask, b: &ClassifiedTask) -> Ordering {
    Priority::rank_or_default(a.task.priority)
        .cmp(&Priority::rank_or_default(b.task.priority))
        .then_with(|| match (a.task.created, b.task.created) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.task.id.cmp(&b.task.id))
}

/// The `ready` projection in scheduling order.
pub fn ready_tasks(report: &DependencyReport) -> Vec<ClassifiedTask> {
    projection(report, Classification::Ready)
}

/// Tasks waiting on dependencies or a parent, in scheduling order.
pub fn waiting_tasks(report: &DependencyReport) -> Vec<ClassifiedTask> {
    let mut tasks: Vec<ClassifiedTask> = report
        .tasks
        .iter()
        .filter(|t| {
            matches!(
                t.classification,
                Classification::Waiting | Classification::WaitingOnParent
            )
        })
        .cloned()
        .collect();
    tasks.sort_by(schedule_order);
    tasks
}

/// Blocked tasks (direct or through a parent), in scheduling order.
pub fn blocked_tasks(report: &DependencyReport) -> Vec<ClassifiedTask> {
    let mut tasks: Vec<ClassifiedTask> = report
        .tasks
        .iter()
        .filter(|t| {
            matches!(
                t.classification,
                Classification::Blocked | Classification::BlockedByParent
            )
        })
        .cloned()
        .collect();
    tasks.sort_by(schedule_order);
    tasks
}

/// The top ready task, i.e. `ready[0]` under the scheduling order.
pub fn next_task(report: &DependencyReport) -> Option<ClassifiedTask> {
    report
        .tasks
        .iter()
        .filter(|t| t.classification == Classification::Ready)
        .cloned()
        .min_by(|a, b| schedule_order(a, b))
}

fn projection(report: &DependencyReport, classification: Classification) -> Vec<ClassifiedTask> {
    let mut tasks: Vec<ClassifiedTask> = report
        .tasks
        .iter()
        .filter(|t| t.classification == classification)
        .cloned()
        .collect();
    tasks.sort_by(schedule_order);
    tasks
}

/// `worktree ?? workdir`, resolved against `$HOME`; `None` unless the
/// directory exists.
fn resolve_workdir(task: &Task, home: &Path) -> Option<PathBuf> {
    let raw = task.worktree.as_deref().or(task.workdir.as_deref())?;
    let path = if let Some(rest) = raw.strip_prefix("~/") {
        home.join(rest)
    } else if raw == "~" {
        home.to_path_buf()
    } else {
        let p = PathBuf::from(raw);
        if p.is_absolute() {
            p
        } else {
            home.join(p)
        }
    };
    if path.is_dir() {
        Some(path)
    } else {
        None
    }
}

/// Iterative Tarjan strongly-connected components.
fn tarjan_sccs(n: usize, edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    #[derive(Clone, Copy)]
    struct NodeState {
        index: Option<usize>,
        lowlink: usize,
        on_stack: bool,
    }
    let mut state = vec![
        NodeState {
            index: None,
            lowlink: 0,
            on_stack: false,
        };
        n
    ];
    let mut counter = 0;
    let mut stack: Vec<usize> = Vec::new();
    let mut sccs: Vec<Vec<usize>> = Vec::new();

    // Explicit DFS frames: (node, next edge position).
    for start in 0..n {
        if state[start].index.is_some() {
            continue;
        }
        let mut frames: Vec<(usize, usize)> = vec![(start, 0)];
        while let Some(&(v, pos)) = frames.last() {
            if state[v].index.is_none() {
                state[v].index = Some(counter);
                state[v].lowlink = counter;
                counter += 1;
                stack.push(v);
                state[v].on_stack = true;
            }
            if pos < edges[v].len() {
                let w = edges[v][pos];
                if let Some(frame) = frames.last_mut() {
                    frame.1 += 1;
                }
                if state[w].index.is_none() {
                    frames.push((w, 0));
                } else if state[w].on_stack {
                    if let Some(w_index) = state[w].index {
                        state[v].lowlink = state[v].lowlink.min(w_index);
                    }
                }
            } else {
                frames.pop();
                let v_lowlink = state[v].lowlink;
                if let Some(&(parent, _)) = frames.last() {
                    state[parent].lowlink = state[parent].lowlink.min(v_lowlink);
                }
                if Some(v_lowlink) == state[v].index {
                    let mut scc = Vec::new();
                    while let Some(w) = stack.pop() {
                        state[w].on_stack = false;
                        scc.push(w);
                        if w == v {
                            break;
                        }
                    }
                    scc.sort_unstable();
                    sccs.push(scc);
                }
            }
        }
    }
    sccs
}
