//! DAG validation and level assignment (Kahn's algorithm).
//!
//! Each task gets the smallest level strictly greater than every
//! dependency's level; tasks sharing a level run concurrently.

use std::collections::{HashMap, HashSet, VecDeque};

use hb_domain::{Error, Result};

use super::TaskSpec;

/// Validate the task graph and assign levels. Fails with
/// `invalid_parameter` on duplicate ids, unknown references, or cycles.
pub fn assign_levels(specs: &[TaskSpec]) -> Result<HashMap<String, usize>> {
    if specs.is_empty() {
        return Err(Error::InvalidParameter(
            "a plan needs at least one task".into(),
        ));
    }

    let mut ids: HashSet<&str> = HashSet::with_capacity(specs.len());
    for spec in specs {
        if spec.id.is_empty() {
            return Err(Error::InvalidParameter("task id must not be empty".into()));
        }
        if !ids.insert(&spec.id) {
            return Err(Error::InvalidParameter(format!(
                "duplicate task id '{}'",
                spec.id
            )));
        }
    }
    for spec in specs {
        for dep in &spec.depends_on {
            if !ids.contains(dep.as_str()) {
                return Err(Error::InvalidParameter(format!(
                    "task '{}' depends on unknown task '{dep}'",
                    spec.id
                )));
            }
            if dep == &spec.id {
                return Err(Error::InvalidParameter(format!(
                    "task '{}' depends on itself",
                    spec.id
                )));
            }
        }
    }

    // Kahn over the dependency graph.
    let mut indegree: HashMap<&str, usize> = specs
        .iter()
        .map(|s| (s.id.as_str(), s.depends_on.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for spec in specs {
        for dep in &spec.depends_on {
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(spec.id.as_str());
        }
    }

    let mut levels: HashMap<String, usize> = HashMap::with_capacity(specs.len());
    let mut queue: VecDeque<&str> = specs
        .iter()
        .filter(|s| s.depends_on.is_empty())
        .map(|s| s.id.as_str())
        .collect();
    for id in &queue {
        levels.insert((*id).to_owned(), 0);
    }

    let dep_of: HashMap<&str, &Vec<String>> = specs
        .iter()
        .map(|s| (s.id.as_str(), &s.depends_on))
        .collect();

    while let Some(current) = queue.pop_front() {
        for next in dependents.get(current).into_iter().flatten() {
            let remaining = indegree.get_mut(next).unwrap();
            *remaining -= 1;
            if *remaining == 0 {
                let level = dep_of[next]
                    .iter()
                    .map(|d| levels[d.as_str()])
                    .max()
                    .unwrap_or(0)
                    + 1;
                levels.insert((*next).to_owned(), level);
                queue.push_back(*next);
            }
        }
    }

    if levels.len() != specs.len() {
        let stuck: Vec<&str> = specs
            .iter()
            .map(|s| s.id.as_str())
            .filter(|id| !levels.contains_key(*id))
            .collect();
        return Err(Error::InvalidParameter(format!(
            "plan contains a dependency cycle involving: {}",
            stuck.join(", ")
        )));
    }

    Ok(levels)
}
