//! Cycle-safe traversal over the child→parent orientation.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::graph::GoalGraph;

impl GoalGraph {
    /// Every node reachable by following parent links. Never contains `id`
    /// unless `id` lies on a cycle.
    pub fn ancestors(&self, id: &str) -> BTreeSet<String> {
        self.reachable(id, |node| self.parents(node))
    }

    /// Every node reachable by following child links.
    pub fn descendants(&self, id: &str) -> BTreeSet<String> {
        self.reachable(id, |node| self.children(node))
    }

    fn reachable<'a, F>(&'a self, id: &str, next: F) -> BTreeSet<String>
    where
        F: Fn(&str) -> Vec<&'a str>,
    {
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<&str> = next(id).into_iter().collect();
        while let Some(node) = queue.pop_front() {
            if seen.insert(node.to_string()) {
                queue.extend(next(node));
            }
        }
        seen
    }

    /// Ancestors ordered root-first: by the longest parent chain leading to a
    /// root, ties broken by id.
    pub fn ancestors_ordered(&self, id: &str) -> Vec<String> {
        let ancestors = self.ancestors(id);
        let mut memo = HashMap::new();
        let mut ordered: Vec<(usize, &str)> = self
            .nodes()
            .filter(|node| ancestors.contains(*node))
            .map(|node| (self.depth_from_root(node, &mut memo, &mut HashSet::new()), node))
            .collect();
        ordered.sort();
        ordered.into_iter().map(|(_, a)| a.to_string()).collect()
    }

    /// Maximum number of parent hops from `id` to a root. Edges closing a
    /// cycle are ignored.
    pub fn depth(&self, id: &str) -> usize {
        self.depth_from_root(id, &mut HashMap::new(), &mut HashSet::new())
    }

    fn depth_from_root<'a>(
        &'a self,
        id: &'a str,
        memo: &mut HashMap<&'a str, usize>,
        on_path: &mut HashSet<&'a str>,
    ) -> usize {
        if let Some(depth) = memo.get(id) {
            return *depth;
        }
        on_path.insert(id);
        let mut depth = 0;
        for parent in self.parents(id) {
            if on_path.contains(parent) {
                continue;
            }
            depth = depth.max(1 + self.depth_from_root(parent, memo, on_path));
        }
        on_path.remove(id);
        memo.insert(id, depth);
        depth
    }

    /// Nodes with exactly the same non-empty parent set as `id`, excluding
    /// `id` itself.
    pub fn siblings(&self, id: &str) -> BTreeSet<String> {
        let Some(parent_set) = self.parent_set(id).filter(|p| !p.is_empty()) else {
            return BTreeSet::new();
        };
        parent_set
            .iter()
            .flat_map(|p| self.children(p))
            .filter(|candidate| *candidate != id)
            .filter(|candidate| self.parent_set(candidate) == Some(parent_set))
            .map(str::to_string)
            .collect()
    }

    /// End of the chain that always follows the first (smallest) parent.
    /// Stops before revisiting a node.
    pub fn root(&self, id: &str) -> String {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = id;
        visited.insert(current);
        while let Some(parent) = self.parents(current).first().copied() {
            if !visited.insert(parent) {
                break;
            }
            current = parent;
        }
        current.to_string()
    }
}
