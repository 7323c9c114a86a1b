//! Bounded candidate sets for group-scoped LLM extraction.

use mindgraph_cache::id_set_key;
use mindgraph_core::{Item, RelationConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;

use crate::rules::cosine;

/// A temporal group of items (the unit of why/how extraction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentGroup {
    pub group_id: String,
    pub items: Vec<Item>,
}

impl IntentGroup {
    pub fn new(group_id: impl Into<String>, items: Vec<Item>) -> Self {
        Self {
            group_id: group_id.into(),
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub index: usize,
    pub id: String,
    pub text: String,
    pub path: String,
}

/// Candidates listed with stable integer indices. Target items come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSet {
    pub group_id: String,
    pub candidates: Vec<Candidate>,
    pub target_indices: Vec<usize>,
}

impl CandidateSet {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Candidate> {
        self.candidates.get(index)
    }

    pub fn is_target(&self, index: usize) -> bool {
        self.target_indices.contains(&index)
    }

    pub fn target_ids(&self) -> Vec<String> {
        self.target_indices
            .iter()
            .filter_map(|i| self.candidates.get(*i))
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn candidate_ids(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.id.clone()).collect()
    }

    /// Depends only on the target and candidate id sets, not their order.
    pub fn cache_key(&self, namespace: &str) -> String {
        id_set_key(namespace, &[&self.target_ids(), &self.candidate_ids()])
    }

    fn push(&mut self, item: &Item, seen: &mut HashSet<String>) -> Option<usize> {
        if !seen.insert(item.id.clone()) {
            return None;
        }
        let index = self.candidates.len();
        self.candidates.push(Candidate {
            index,
            id: item.id.clone(),
            text: item.text.clone(),
            path: item.path.clone(),
        });
        Some(index)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSelector {
    pub top_k: usize,
    pub small_group_threshold: usize,
}

impl Default for CandidateSelector {
    fn default() -> Self {
        Self {
            top_k: 3,
            small_group_threshold: 5,
        }
    }
}

impl CandidateSelector {
    pub fn new(top_k: usize, small_group_threshold: usize) -> Self {
        Self {
            top_k,
            small_group_threshold,
        }
    }

    pub fn from_config(config: &RelationConfig) -> Self {
        Self::new(config.top_k_neighbors, config.small_group_threshold)
    }

    /// Build the candidate set for `groups[target]`. `groups` must be in
    /// temporal order. Returns `None` when `target` is out of range.
    ///
    /// A target group smaller than the threshold also pulls in the previous
    /// group (or the next one for the first group). Each target item then
    /// contributes its `top_k` nearest items by embedding cosine from every
    /// group; items without embeddings contribute nothing.
    pub fn select(&self, groups: &[IntentGroup], target: usize) -> Option<CandidateSet> {
        let group = groups.get(target)?;
        let mut set = CandidateSet {
            group_id: group.group_id.clone(),
            candidates: Vec::new(),
            target_indices: Vec::new(),
        };
        let mut seen = HashSet::new();

        for item in &group.items {
            if let Some(index) = set.push(item, &mut seen) {
                set.target_indices.push(index);
            }
        }

        if group.items.len() < self.small_group_threshold {
            let adjacent = if target > 0 {
                groups.get(target - 1)
            } else {
                groups.get(target + 1)
            };
            if let Some(adjacent) = adjacent {
                for item in &adjacent.items {
                    set.push(item, &mut seen);
                }
            }
        }

        if self.top_k > 0 {
            let pool: Vec<&Item> = groups.iter().flat_map(|g| g.items.iter()).collect();
            for item in &group.items {
                for neighbour in nearest(item, &pool, self.top_k) {
                    set.push(neighbour, &mut seen);
                }
            }
        }

        debug!(
            "Candidate set for group {}: {} targets, {} candidates",
            set.group_id,
            set.target_indices.len(),
            set.candidates.len()
        );
        Some(set)
    }
}

/// The `k` most similar items to `item`, excluding itself. Ties are broken by
/// id.
fn nearest<'a>(item: &Item, pool: &[&'a Item], k: usize) -> Vec<&'a Item> {
    let Some(query) = item.embedding.as_deref() else {
        return Vec::new();
    };
    let mut scored: Vec<(f64, &Item)> = pool
        .iter()
        .filter(|other| other.id != item.id)
        .filter_map(|other| {
            let similarity = cosine(query, other.embedding.as_deref()?)?;
            Some((similarity, *other))
        })
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
    scored.into_iter().take(k).map(|(_, other)| other).collect()
}
