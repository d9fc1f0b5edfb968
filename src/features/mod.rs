//! Feature-level aggregation of classified tasks.
//!
//! Tasks sharing a `feature_id` form a feature unit with rolled-up
//! priority, status, and task counts. Inter-feature dependencies come from
//! member `feature_depends_on` refs; dependency cycles between features are
//! reported and excluded from the ready projection.

use crate::models::{
    Classification, ClassifiedTask, EntryStatus, Feature, FeatureReport, FeatureStatus,
    FeatureTaskStats, Priority,
};
use std::collections::{BTreeMap, HashSet};

/// Aggregates classified tasks into features. Ungrouped tasks are not
/// features and do not appear.
pub fn aggregate(tasks: &[ClassifiedTask]) -> FeatureReport {
    let mut groups: BTreeMap<String, Vec<&ClassifiedTask>> = BTreeMap::new();
    for task in tasks {
        if let Some(feature_id) = &task.task.feature_id {
            groups.entry(feature_id.clone()).or_default().push(task);
        }
    }

    // First pass: status, priority, and stats per feature.
    let mut features: Vec<Feature> = groups
        .iter()
        .map(|(id, members)| {
            let priority = members
                .iter()
                .filter_map(|m| m.task.feature_priority.or(m.task.priority))
                .min_by_key(|p| p.rank())
                .unwrap_or(Priority::Medium);
            Feature {
                id: id.clone(),
                priority,
                status: rollup_status(members),
                task_stats: rollup_stats(members),
                blocked_by_features: Vec::new(),
                waiting_on_features: Vec::new(),
            }
        })
        .collect();

    // Second pass: inter-feature edges, now that statuses exist.
    let status_by_id: BTreeMap<String, FeatureStatus> = features
        .iter()
        .map(|f| (f.id.clone(), f.status))
        .collect();
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); features.len()];
    let index_by_id: BTreeMap<&str, usize> = features
        .iter()
        .enumerate()
        .map(|(i, f)| (f.id.as_str(), i))
        .collect();
    for (i, feature) in features.iter().enumerate() {
        let members = &groups[&feature.id];
        let mut deps: Vec<String> = members
            .iter()
            .flat_map(|m| m.task.feature_depends_on.iter().cloned())
            .filter(|d| d != &feature.id)
            .collect();
        deps.sort();
        deps.dedup();
        for dep in deps {
            if let Some(&j) = index_by_id.get(dep.as_str()) {
                edges[i].push(j);
            }
        }
    }
    for (i, feature_edges) in edges.iter().enumerate() {
        let mut blocked_by = Vec::new();
        let mut waiting_on = Vec::new();
        for &j in feature_edges {
            let dep_id = &features[j].id;
            match status_by_id.get(dep_id) {
                Some(FeatureStatus::Blocked) => blocked_by.push(dep_id.clone()),
                Some(FeatureStatus::Completed) | None => {}
                Some(_) => waiting_on.push(dep_id.clone()),
            }
        }
        features[i].blocked_by_features = blocked_by;
        features[i].waiting_on_features = waiting_on;
    }

    // Feature dependency cycles, reported like task cycles.
    let cycles = feature_cycles(&features, &edges);

    FeatureReport { features, cycles }
}

/// Ready features under the same priority-then-id order tasks use, with
/// cycle members excluded.
pub fn ready_features(report: &FeatureReport) -> Vec<Feature> {
    let cyclic: HashSet<&String> = report.cycles.iter().flatten().collect();
    let mut ready: Vec<Feature> = report
        .features
        .iter()
        .filter(|f| f.status == FeatureStatus::Ready && !cyclic.contains(&f.id))
        .cloned()
        .collect();
    ready.sort_by(|a, b| a.priority.rank().cmp(&b.priority.rank()).then_with(|| a.id.cmp(&b.id)));
    ready
}

/// Waiting features in priority order.
pub fn waiting_features(report: &FeatureReport) -> Vec<Feature> {
    projection(report, FeatureStatus::Waiting)
}

/// Blocked features in priority order, cycle members included.
pub fn blocked_features(report: &FeatureReport) -> Vec<Feature> {
    let cyclic: HashSet<&String> = report.cycles.iter().flatten().collect();
    let mut blocked: Vec<Feature> = report
        .features
        .iter()
        .filter(|f| f.status == FeatureStatus::Blocked || cyclic.contains(&f.id))
        .cloned()
        .collect();
    blocked.sort_by(|a, b| a.priority.rank().cmp(&b.priority.rank()).then_with(|| a.id.cmp(&b.id)));
    blocked
}

/// The top ready feature.
pub fn next_feature(report: &FeatureReport) -> Option<Feature> {
    ready_features(report).into_iter().next()
}

fn projection(report: &FeatureReport, status: FeatureStatus) -> Vec<Feature> {
    let mut features: Vec<Feature> = report
        .features
        .iter()
        .filter(|f| f.status == status)
        .cloned()
        .collect();
    features.sort_by(|a, b| a.priority.rank().cmp(&b.priority.rank()).then_with(|| a.id.cmp(&b.id)));
    features
}

fn rollup_status(members: &[&ClassifiedTask]) -> FeatureStatus {
    let any_in_progress = members
        .iter()
        .any(|m| m.task.status == EntryStatus::InProgress);
    if any_in_progress {
        return FeatureStatus::InProgress;
    }
    let any_blocked = members.iter().any(|m| {
        matches!(
            m.classification,
            Classification::Blocked | Classification::BlockedByParent
        )
    });
    if any_blocked {
        return FeatureStatus::Blocked;
    }
    if members.iter().all(|m| m.task.status.is_satisfied()) {
        return FeatureStatus::Completed;
    }
    let any_ready = members
        .iter()
        .any(|m| m.classification == Classification::Ready);
    let any_waiting = members.iter().any(|m| {
        matches!(
            m.classification,
            Classification::Waiting | Classification::WaitingOnParent
        )
    });
    if any_ready && !any_waiting {
        FeatureStatus::Ready
    } else {
        FeatureStatus::Waiting
    }
}

fn rollup_stats(members: &[&ClassifiedTask]) -> FeatureTaskStats {
    let mut stats = FeatureTaskStats {
        total: members.len(),
        ..Default::default()
    };
    for member in members {
        match member.classification {
            Classification::Ready => stats.ready += 1,
            Classification::Waiting | Classification::WaitingOnParent => stats.waiting += 1,
            Classification::Blocked | Classification::BlockedByParent => stats.blocked += 1,
            _ => {}
        }
        if member.task.status == EntryStatus::InProgress {
            stats.in_progress += 1;
        }
        if member.task.status.is_satisfied() {
            stats.completed += 1;
        }
    }
    stats
}

fn feature_cycles(features: &[Feature], edges: &[Vec<usize>]) -> Vec<Vec<String>> {
    // Iterative DFS three-color cycle collection; feature graphs are small
    // enough that full Tarjan is not worth carrying twice.
    let n = features.len();
    let mut color = vec![0u8; n]; // 0 white, 1 grey, 2 black
    let mut cycle_members: HashSet<usize> = HashSet::new();

    for start in 0..n {
        if color[start] != 0 {
            continue;
        }
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        let mut path: Vec<usize> = Vec::new();
        while let Some(&(v, pos)) = stack.last() {
            if pos == 0 {
                color[v] = 1;
                path.push(v);
            }
            if pos < edges[v].len() {
                let w = edges[v][pos];
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                if color[w] == 0 {
                    stack.push((w, 0));
                } else if color[w] == 1 {
                    // Back edge: everything from w on the current path cycles.
                    if let Some(from) = path.iter().position(|&p| p == w) {
                        cycle_members.extend(path[from..].iter().copied());
                    }
                }
            } else {
                color[v] = 2;
                path.pop();
                stack.pop();
            }
        }
    }

    if cycle_members.is_empty() {
        return Vec::new();
    }
    let mut ids: Vec<String> = cycle_members
        .into_iter()
        .map(|i| features[i].id.clone())
        .collect();
    ids.sort();
    vec![ids]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps;
    use crate::models::{EntryStatus, Task};

    fn member(
        id: &str,
        feature: &str,
        status: EntryStatus,
        deps_on_features: &[&str],
    ) -> Task {
        Task {
            id: id.to_string(),
            path: format!("projects/demo/task/{id}.md"),
            title: id.to_string(),
            status,
            priority: None,
            created: None,
            depends_on: Vec::new(),
            parent_id: None,
            feature_id: Some(feature.to_string()),
            feature_priority: None,
            feature_depends_on: deps_on_features.iter().map(|s| s.to_string()).collect(),
            workdir: None,
            worktree: None,
            user_original_request: None,
        }
    }

    fn run(tasks: Vec<Task>) -> FeatureReport {
        aggregate(&deps::classify(&tasks).tasks)
    }

    #[test]
    fn ungrouped_tasks_are_not_features() {
        let mut solo = member("solo0001", "f", EntryStatus::Pending, &[]);
        solo.feature_id = None;
        let report = run(vec![solo]);
        assert!(report.features.is_empty());
    }

    #[test]
    fn status_rollup() {
        // auth: one in_progress member dominates.
        let report = run(vec![
            member("aaaa0001", "auth", EntryStatus::InProgress, &[]),
            member("aaaa0002", "auth", EntryStatus::Pending, &[]),
        ]);
        assert_eq!(report.features[0].status, FeatureStatus::InProgress);

        // all satisfied -> completed.
        let report = run(vec![
            member("bbbb0001", "done", EntryStatus::Completed, &[]),
            member("bbbb0002", "done", EntryStatus::Validated, &[]),
        ]);
        assert_eq!(report.features[0].status, FeatureStatus::Completed);

        // one ready pending member, one completed -> ready.
        let report = run(vec![
            member("cccc0001", "go", EntryStatus::Pending, &[]),
            member("cccc0002", "go", EntryStatus::Completed, &[]),
        ]);
        assert_eq!(report.features[0].status, FeatureStatus::Ready);
        assert_eq!(report.features[0].task_stats.ready, 1);
        assert_eq!(report.features[0].task_stats.completed, 1);
    }

    #[test]
    fn blocked_member_blocks_feature() {
        let mut blocked_task = member("dddd0001", "f1", EntryStatus::Pending, &[]);
        blocked_task.depends_on = vec!["dddd0002".to_string()];
        let dep = {
            let mut t = member("dddd0002", "f1", EntryStatus::Cancelled, &[]);
            t.feature_id = None;
            t
        };
        let report = run(vec![blocked_task, dep]);
        assert_eq!(report.features[0].status, FeatureStatus::Blocked);
    }

    #[test]
    fn priority_is_max_urgency_of_members() {
        let mut high = member("eeee0001", "p", EntryStatus::Pending, &[]);
        high.priority = Some(Priority::Low);
        high.feature_priority = Some(Priority::High);
        let mut low = member("eeee0002", "p", EntryStatus::Pending, &[]);
        low.priority = Some(Priority::Low);
        let report = run(vec![high, low]);
        assert_eq!(report.features[0].priority, Priority::High);
    }

    #[test]
    fn inter_feature_edges() {
        let report = run(vec![
            member("ffff0001", "base", EntryStatus::Pending, &[]),
            member("ffff0002", "ui", EntryStatus::Pending, &["base"]),
        ]);
        let ui = report.features.iter().find(|f| f.id == "ui").unwrap();
        assert_eq!(ui.waiting_on_features, vec!["base".to_string()]);
        assert!(ui.blocked_by_features.is_empty());
    }

    #[test]
    fn completed_dependency_features_do_not_gate() {
        let report = run(vec![
            member("gggg0001", "base", EntryStatus::Completed, &[]),
            member("gggg0002", "ui", EntryStatus::Pending, &["base"]),
        ]);
        let ui = report.features.iter().find(|f| f.id == "ui").unwrap();
        assert!(ui.waiting_on_features.is_empty());
        assert!(ui.blocked_by_features.is_empty());
    }

    #[test]
    fn feature_cycles_reported_and_excluded_from_ready() {
        let report = run(vec![
            member("hhhh0001", "a", EntryStatus::Pending, &["b"]),
            member("hhhh0002", "b", EntryStatus::Pending, &["a"]),
        ]);
        assert_eq!(report.cycles.len(), 1);
        assert_eq!(report.cycles[0], vec!["a".to_string(), "b".to_string()]);
        assert!(ready_features(&report).is_empty());
        // Cycle members surface through the blocked projection instead.
        let blocked: Vec<String> = blocked_features(&report).into_iter().map(|f| f.id).collect();
        assert_eq!(blocked, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn next_feature_is_first_ready() {
        let mut urgent = member("iiii0001", "z-urgent", EntryStatus::Pending, &[]);
        urgent.feature_priority = Some(Priority::High);
        let report = run(vec![
            member("iiii0002", "a-normal", EntryStatus::Pending, &[]),
            urgent,
        ]);
        assert_eq!(next_feature(&report).map(|f| f.id), Some("z-urgent".into()));
    }
}
