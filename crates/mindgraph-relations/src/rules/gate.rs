//! Structural predicates evaluated before any embedding evidence.

use mindgraph_core::Goal;

fn segments<'a>(path: &'a str, delimiter: &str) -> Vec<&'a str> {
    // Surrounding spaces in the delimiter are optional in the path.
    let delimiter = match delimiter.trim() {
        "" => delimiter,
        trimmed => trimmed,
    };
    if delimiter.is_empty() {
        return Vec::new();
    }
    path.split(delimiter)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// `A.level <= B.level` and the pair shares a domain tag or a source path.
pub fn passes_gate(a: &Goal, b: &Goal) -> bool {
    if a.level() > b.level() {
        return false;
    }
    let same_path = !a.item.path.trim().is_empty() && a.item.path.trim() == b.item.path.trim();
    same_path || !a.shared_domains(b).is_empty()
}

/// One path is a segment prefix of the other.
pub fn paths_overlap(a: &Goal, b: &Goal, delimiter: &str) -> bool {
    let (sa, sb) = (segments(&a.item.path, delimiter), segments(&b.item.path, delimiter));
    if sa.is_empty() || sb.is_empty() {
        return false;
    }
    sa.iter().zip(sb.iter()).all(|(x, y)| x == y)
}

/// Reads as a goal rather than a problem.
pub fn is_purposive(b: &Goal) -> bool {
    b.has_outcome() || !b.has_actions() || !b.has_issues()
}

/// Two concrete tasks side by side, not a means and its end.
pub fn is_parallel(a: &Goal, b: &Goal, delimiter: &str) -> bool {
    a.level() == b.level() && paths_overlap(a, b, delimiter) && a.has_actions() && b.has_actions()
}

/// Both clusters known and equal.
pub fn same_cluster(a: &Goal, b: &Goal) -> bool {
    matches!((a.item.cluster, b.item.cluster), (Some(x), Some(y)) if x == y)
}

/// Both clusters known and different.
pub fn cross_cluster(a: &Goal, b: &Goal) -> bool {
    matches!((a.item.cluster, b.item.cluster), (Some(x), Some(y)) if x != y)
}
