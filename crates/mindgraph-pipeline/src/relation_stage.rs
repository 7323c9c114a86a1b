//! Relation stage: rule relations over goals plus why/how escalation over
//! intent groups, fanned out with bounded concurrency.

use futures::stream::{self, StreamExt};
use mindgraph_core::{
    retain_known_endpoints, sort_relations, Goal, Relation, RelationConfig, RuleThresholds,
};
use mindgraph_relations::{extract_all, CandidateSelector, IntentGroup, WhyHowExtractor};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub unit: String,
    pub error: String,
}

/// Per-unit outcome counts of a fanned-out stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub stage: String,
    pub succeeded: usize,
    /// Units whose oracle output was unusable.
    pub empty: usize,
    pub failed: Vec<UnitFailure>,
}

impl StageReport {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            ..Self::default()
        }
    }

    pub fn record_failure(&mut self, unit: impl Into<String>, error: impl std::fmt::Display) {
        let unit = unit.into();
        warn!("{} unit {} failed: {}", self.stage, unit, error);
        self.failed.push(UnitFailure {
            unit,
            error: error.to_string(),
        });
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.empty + self.failed.len()
    }

    pub fn is_clean(&self) -> bool {
        self.empty == 0 && self.failed.is_empty()
    }

    pub fn merge(&mut self, other: StageReport) {
        self.succeeded += other.succeeded;
        self.empty += other.empty;
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationStageOutput {
    pub relations: Vec<Relation>,
    pub rule_count: usize,
    pub why_how_count: usize,
    pub report: StageReport,
}

pub struct RelationStage {
    thresholds: RuleThresholds,
    selector: CandidateSelector,
    why_how: Option<WhyHowExtractor>,
    max_workers: usize,
}

impl RelationStage {
    /// Without an extractor only rule relations are produced.
    pub fn new(
        config: &RelationConfig,
        max_workers: usize,
        why_how: Option<WhyHowExtractor>,
    ) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            selector: CandidateSelector::from_config(config),
            why_how: if config.enable_llm_escalation { why_how } else { None },
            max_workers: max_workers.max(1),
        }
    }

    /// Path separator used by the structural rule checks.
    #[must_use]
    pub fn with_path_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.thresholds.path_delimiter = delimiter.into();
        self
    }

    pub fn rule_relations(&self, goals: &[Goal]) -> Vec<Relation> {
        extract_all(goals, &self.thresholds)
    }

    /// Run why/how extraction for every group, at most `max_workers` at a
    /// time. A failing group is reported and the others continue.
    pub async fn why_how_relations(&self, groups: &[IntentGroup]) -> (Vec<Relation>, StageReport) {
        let mut report = StageReport::new("why_how");
        let Some(extractor) = self.why_how.as_ref() else {
            return (Vec::new(), report);
        };

        let selector = &self.selector;
        let outcomes: Vec<_> = stream::iter(0..groups.len())
            .map(|target| async move {
                let unit = groups[target].group_id.clone();
                let outcome = match selector.select(groups, target) {
                    Some(set) => extractor.extract(&set).await,
                    None => Ok(Some(Vec::new())),
                };
                (unit, outcome)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let mut relations = Vec::new();
        for (unit, outcome) in outcomes {
            match outcome {
                Ok(Some(found)) => {
                    report.succeeded += 1;
                    relations.extend(found);
                }
                Ok(None) => report.empty += 1,
                Err(e) => report.record_failure(unit, e),
            }
        }
        report.failed.sort_by(|a, b| a.unit.cmp(&b.unit));

        let known: HashSet<String> = groups
            .iter()
            .flat_map(|g| g.items.iter().map(|i| i.id.clone()))
            .collect();
        let mut relations = retain_known_endpoints(relations, &known);
        sort_relations(&mut relations);
        relations.dedup_by(|a, b| a.sort_key() == b.sort_key());
        (relations, report)
    }

    pub async fn run(&self, goals: &[Goal], groups: &[IntentGroup]) -> RelationStageOutput {
        let rules = self.rule_relations(goals);
        let (why_how, report) = self.why_how_relations(groups).await;
        let rule_count = rules.len();
        let why_how_count = why_how.len();

        let mut relations = rules;
        relations.extend(why_how);
        sort_relations(&mut relations);
        info!(
            "Relation stage: {} rule relations, {} why/how relations, {} failed units",
            rule_count,
            why_how_count,
            report.failed.len()
        );
        RelationStageOutput {
            relations,
            rule_count,
            why_how_count,
            report,
        }
    }
}
