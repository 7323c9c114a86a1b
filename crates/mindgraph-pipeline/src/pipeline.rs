//! End-to-end run: records in, relations, graph and outputs out.

use anyhow::Context;
use futures::stream::{self, StreamExt};
use mindgraph_ai::OpenAICompatibleOracle;
use mindgraph_cache::{CachedEmbedder, DiskCache};
use mindgraph_cluster::{ClusterEngine, DistanceCalculator};
use mindgraph_core::{
    sort_relations, Embedder, Goal, Intent, Item, LanguageModel, MessageRecord, MindGraphConfig,
    Relation, ResponseCache,
};
use mindgraph_graph::{score_by_relation_type, GraphRecord, ScoringParams};
use mindgraph_relations::{
    ArtifactSink, FsArtifactSink, IntentGroup, NullArtifactSink, RollupExtractor, RollupGraph,
    WhyHowExtractor,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::clustering::{cluster_items, ClusterStageOutput};
use crate::embed::{embed_goal_fields, embed_intents};
use crate::error::Result;
use crate::extraction::{GoalExtractor, IntentExtractor};
use crate::grouping::{group_messages, GroupingPolicy, MessageGroup};
use crate::persist::{write_outputs, RunReport, ScoreTable, WrittenOutputs};
use crate::rag::{RagEngine, VectorIndex};
use crate::relation_stage::{RelationStage, StageReport};

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub groups: Vec<MessageGroup>,
    pub intents: Vec<Intent>,
    pub goals: Vec<Goal>,
    pub intent_clusters: ClusterStageOutput,
    pub relations: Vec<Relation>,
    pub rollup: RollupGraph,
    pub record: GraphRecord,
    pub scores: ScoreTable,
    pub reports: Vec<StageReport>,
    pub written: WrittenOutputs,
}

pub struct Pipeline {
    config: MindGraphConfig,
    llm: Arc<dyn LanguageModel>,
    embedder: Arc<dyn Embedder>,
    calculator: DistanceCalculator,
    engine: ClusterEngine,
    intents: IntentExtractor,
    goals: GoalExtractor,
    relations: RelationStage,
    rollup: RollupExtractor,
}

impl Pipeline {
    /// Configuration errors surface here, before any oracle call.
    pub fn new(
        config: MindGraphConfig,
        llm: Arc<dyn LanguageModel>,
        embedder: Arc<dyn Embedder>,
        cache: Arc<dyn ResponseCache>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Result<Self> {
        config.validate()?;
        let embedder: Arc<dyn Embedder> =
            Arc::new(CachedEmbedder::new(embedder, cache.clone(), config.batch.clone()));
        let why_how = WhyHowExtractor::new(llm.clone(), cache.clone(), artifacts.clone())?;

        Ok(Self {
            calculator: DistanceCalculator::from_config(&config.distance)?,
            engine: ClusterEngine::from_config(&config.cluster)?,
            intents: IntentExtractor::new(llm.clone(), cache.clone(), artifacts.clone())?,
            goals: GoalExtractor::new(llm.clone(), cache.clone(), artifacts.clone())?,
            relations: RelationStage::new(
                &config.relations,
                config.pipeline.max_workers,
                Some(why_how),
            )
            .with_path_delimiter(config.distance.path_delimiter.clone()),
            rollup: RollupExtractor::new(llm.clone(), cache, artifacts)?,
            config,
            llm,
            embedder,
        })
    }

    /// Wire the HTTP oracle, the on-disk cache and the artifact directory
    /// from configuration.
    pub fn from_config(config: MindGraphConfig) -> anyhow::Result<Self> {
        let oracle = Arc::new(
            OpenAICompatibleOracle::from_config(&config.oracle)
                .context("Failed to create oracle client")?,
        );
        let cache: Arc<dyn ResponseCache> =
            Arc::new(DiskCache::open(config.pipeline.cache_dir.clone())?);
        let artifacts: Arc<dyn ArtifactSink> = match &config.relations.artifact_dir {
            Some(dir) => Arc::new(FsArtifactSink::new(dir.clone())),
            None => Arc::new(NullArtifactSink),
        };
        Ok(Self::new(config, oracle.clone(), oracle, cache, artifacts)?)
    }

    pub fn config(&self) -> &MindGraphConfig {
        &self.config
    }

    fn workers(&self) -> usize {
        self.config.pipeline.max_workers.max(1)
    }

    pub async fn run(&self, records: &[MessageRecord]) -> anyhow::Result<RunOutput> {
        let groups = group_messages(records, GroupingPolicy::from_config(&self.config.pipeline));
        info!("Grouped {} records into {} groups", records.len(), groups.len());

        let (mut intents, intent_report) = self.extract_intents(&groups).await;
        embed_intents(self.embedder.as_ref(), &mut intents)
            .await
            .context("Failed to embed intents")?;

        let mut items: Vec<Item> = intents.iter().map(|i| i.item.clone()).collect();
        let intent_clusters = cluster_items(&mut items, &self.calculator, &self.engine)
            .context("Failed to cluster intents")?;
        for (intent, item) in intents.iter_mut().zip(&items) {
            intent.item.cluster = item.cluster;
        }

        let (mut goals, goal_report) = self.extract_goals(&intents).await;
        embed_goal_fields(self.embedder.as_ref(), &mut goals)
            .await
            .context("Failed to embed goal fields")?;

        let intent_groups = intent_groups(&groups, &intents);
        let stage = self.relations.run(&goals, &intent_groups).await;

        let mut rollup_report = StageReport::new("rollup");
        let rollup = if self.config.relations.enable_llm_escalation {
            let goal_items: Vec<Item> = goals.iter().map(|g| g.item.clone()).collect();
            match self.rollup.rollup(&goal_items).await {
                Ok(Some(graph)) => {
                    rollup_report.succeeded += 1;
                    graph
                }
                Ok(None) => {
                    rollup_report.empty += 1;
                    RollupGraph::default()
                }
                Err(e) => {
                    rollup_report.record_failure("goals", e);
                    RollupGraph::default()
                }
            }
        } else {
            RollupGraph::default()
        };

        let mut relations = stage.relations;
        relations.extend(rollup.relations.iter().cloned());
        sort_relations(&mut relations);

        let mut record = GraphRecord::new();
        record
            .add_intents(&intents)
            .add_goals(&goals)
            .add_generated(&rollup.generated)
            .add_relations(&relations);

        let scores = score_by_relation_type(&record.to_graph(), &ScoringParams::default());

        let reports = vec![intent_report, goal_report, stage.report, rollup_report];
        let report = RunReport {
            stages: reports.clone(),
            intent_clusters: intent_clusters.metrics.clone(),
        };
        let written = write_outputs(
            &self.config.pipeline.output_dir,
            &relations,
            &record,
            &intent_clusters.rows,
            &report,
            &scores,
        )
        .context("Failed to write outputs")?;
        info!(
            "Run complete: {} intents, {} goals, {} relations, {} generated nodes",
            intents.len(),
            goals.len(),
            relations.len(),
            rollup.generated.len()
        );

        Ok(RunOutput {
            groups,
            intents,
            goals,
            intent_clusters,
            relations,
            rollup,
            record,
            scores,
            reports,
            written,
        })
    }

    async fn extract_intents(&self, groups: &[MessageGroup]) -> (Vec<Intent>, StageReport) {
        let extractor = &self.intents;
        let mut outcomes: Vec<_> = stream::iter(groups.iter().enumerate())
            .map(|(n, group)| async move {
                (n, group.group_id.clone(), extractor.extract(group).await)
            })
            .buffer_unordered(self.workers())
            .collect()
            .await;
        outcomes.sort_by_key(|(n, _, _)| *n);

        let mut report = StageReport::new("intents");
        let mut intents = Vec::new();
        for (_, unit, outcome) in outcomes {
            match outcome {
                Ok(found) if found.is_empty() => report.empty += 1,
                Ok(found) => {
                    report.succeeded += 1;
                    intents.extend(found);
                }
                Err(e) => report.record_failure(unit, e),
            }
        }
        (intents, report)
    }

    async fn extract_goals(&self, intents: &[Intent]) -> (Vec<Goal>, StageReport) {
        let mut clusters: BTreeMap<i32, Vec<Intent>> = BTreeMap::new();
        for intent in intents {
            match intent.item.cluster {
                Some(label) => clusters.entry(label).or_default().push(intent.clone()),
                None => warn!("Intent {} has no cluster label", intent.item.id),
            }
        }

        let extractor = &self.goals;
        let mut outcomes: Vec<_> = stream::iter(clusters.iter())
            .map(|(label, members)| async move {
                (*label, extractor.extract(*label, members).await)
            })
            .buffer_unordered(self.workers())
            .collect()
            .await;
        outcomes.sort_by_key(|(label, _)| *label);

        let mut report = StageReport::new("goals");
        let mut goals = Vec::new();
        for (label, outcome) in outcomes {
            match outcome {
                Ok(found) if found.is_empty() => report.empty += 1,
                Ok(found) => {
                    report.succeeded += 1;
                    goals.extend(found);
                }
                Err(e) => report.record_failure(format!("cluster_{}", label), e),
            }
        }
        (goals, report)
    }

    /// A retrieval engine over the run's graph, sharing this pipeline's
    /// oracles. Call [`RagEngine::index_record`] before querying.
    pub fn rag_engine(&self, output: &RunOutput, index: Arc<dyn VectorIndex>) -> RagEngine {
        RagEngine::new(self.embedder.clone(), self.llm.clone(), index, output.record.clone())
    }
}

/// Intents regrouped by their source message group, in temporal order.
pub fn intent_groups(groups: &[MessageGroup], intents: &[Intent]) -> Vec<IntentGroup> {
    let mut by_group: BTreeMap<&str, Vec<Item>> = BTreeMap::new();
    for intent in intents {
        by_group
            .entry(intent.group_id.as_str())
            .or_default()
            .push(intent.item.clone());
    }
    groups
        .iter()
        .filter_map(|g| {
            by_group
                .remove(g.group_id.as_str())
                .map(|items| IntentGroup::new(g.group_id.clone(), items))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_intent_groups_follow_group_order() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let groups = vec![
            MessageGroup {
                group_id: "group_0".to_string(),
                path: "a".to_string(),
                records: vec![MessageRecord::new("a", at, "x")],
            },
            MessageGroup {
                group_id: "group_1".to_string(),
                path: "b".to_string(),
                records: vec![MessageRecord::new("b", at, "y")],
            },
        ];
        let intents = vec![
            Intent::new("group_1_intent_0", "group_1", "later"),
            Intent::new("group_0_intent_0", "group_0", "earlier"),
            Intent::new("group_0_intent_1", "group_0", "earlier too"),
        ];
        let regrouped = intent_groups(&groups, &intents);
        assert_eq!(regrouped.len(), 2);
        assert_eq!(regrouped[0].group_id, "group_0");
        assert_eq!(regrouped[0].items.len(), 2);
        assert_eq!(regrouped[1].items[0].id, "group_1_intent_0");
    }
}
