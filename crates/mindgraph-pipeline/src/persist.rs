//! Run outputs written under the configured output directory.

use mindgraph_cluster::{rows_to_json_lines, ClusterMetrics, ClusteredRow};
use mindgraph_core::{relations_to_json, Relation};
use mindgraph_graph::{GraphRecord, NodeScores};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::Result;
use crate::relation_stage::StageReport;

pub const RELATIONS_FILE: &str = "relations.json";
pub const GRAPH_FILE: &str = "graph.json";
pub const CLUSTERS_FILE: &str = "clusters.jsonl";
pub const REPORT_FILE: &str = "report.json";
pub const SCORES_FILE: &str = "scores.json";

/// Node scores keyed by `"all"` and by relation type name.
pub type ScoreTable = BTreeMap<String, BTreeMap<String, NodeScores>>;

/// Run summary written to [`REPORT_FILE`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    pub intent_clusters: ClusterMetrics,
}

/// Paths of everything a run wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct WrittenOutputs {
    pub relations: PathBuf,
    pub graph: PathBuf,
    pub clusters: PathBuf,
    pub report: PathBuf,
    pub scores: PathBuf,
}

pub fn write_outputs(
    dir: &Path,
    relations: &[Relation],
    record: &GraphRecord,
    rows: &[ClusteredRow],
    report: &RunReport,
    scores: &ScoreTable,
) -> Result<WrittenOutputs> {
    std::fs::create_dir_all(dir)?;
    let out = WrittenOutputs {
        relations: dir.join(RELATIONS_FILE),
        graph: dir.join(GRAPH_FILE),
        clusters: dir.join(CLUSTERS_FILE),
        report: dir.join(REPORT_FILE),
        scores: dir.join(SCORES_FILE),
    };

    std::fs::write(&out.relations, relations_to_json(relations)?)?;
    record.save(&out.graph)?;
    std::fs::write(&out.clusters, rows_to_json_lines(rows)?)?;
    std::fs::write(&out.report, serde_json::to_string_pretty(report)?)?;
    std::fs::write(&out.scores, serde_json::to_string_pretty(scores)?)?;
    info!("Wrote {} relations and {} cluster rows to {:?}", relations.len(), rows.len(), dir);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindgraph_cluster::rows_from_json_lines;
    use mindgraph_core::{relations_from_json, RelationType};
    use mindgraph_graph::{score_by_relation_type, ScoringParams};

    #[test]
    fn test_outputs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let relations =
            vec![Relation::new("a", "b", RelationType::Hierarchy, 0.9, "theme=0.900").unwrap()];
        let mut record = GraphRecord::new();
        record.add_relations(&relations);
        let rows = vec![ClusteredRow {
            id: "a".to_string(),
            path: "work".to_string(),
            text: "alpha".to_string(),
            cluster: 0,
        }];

        let report = RunReport {
            stages: vec![StageReport::new("why_how")],
            intent_clusters: ClusterMetrics {
                n_clusters: 1,
                n_noise: 2,
                ..ClusterMetrics::default()
            },
        };
        let scores = score_by_relation_type(&record.to_graph(), &ScoringParams::default());

        let out = write_outputs(dir.path(), &relations, &record, &rows, &report, &scores).unwrap();
        let read = relations_from_json(&std::fs::read_to_string(&out.relations).unwrap()).unwrap();
        assert_eq!(read, relations);
        assert_eq!(GraphRecord::load(&out.graph).unwrap(), record);
        let rows_back =
            rows_from_json_lines(&std::fs::read_to_string(&out.clusters).unwrap()).unwrap();
        assert_eq!(rows_back, rows);

        let report_back: RunReport =
            serde_json::from_str(&std::fs::read_to_string(&out.report).unwrap()).unwrap();
        assert_eq!(report_back, report);
        let scores_back: ScoreTable =
            serde_json::from_str(&std::fs::read_to_string(&out.scores).unwrap()).unwrap();
        assert!(scores_back["all"].contains_key("a"));
        assert!(scores_back.contains_key(RelationType::Hierarchy.as_str()));
    }
}
