use std::path::{Path, PathBuf};
use std::time::Duration;

use config as cfg;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{MindGraphError, Result};

/// Tolerance used wherever weights must sum to one.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

const CLUSTER_METHODS: &[&str] = &[
    "hdbscan",
    "density",
    "hierarchical",
    "agglomerative",
    "kmeans_constrained",
    "kmeans-constrained",
    "constrained_kmeans",
];
const LINKAGES: &[&str] = &["average", "complete", "single", "ward"];

/// Main configuration for a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MindGraphConfig {
    #[serde(default)]
    pub distance: DistanceConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub relations: RelationConfig,
    #[serde(default)]
    pub oracle: OracleConfig,
    #[serde(default)]
    pub batch: BatchPolicy,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Composite distance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistanceConfig {
    #[serde(default = "default_embedding_weight")]
    pub embedding_weight: f64,
    #[serde(default = "default_time_weight")]
    pub time_weight: f64,
    #[serde(default = "default_hierarchy_weight")]
    pub hierarchy_weight: f64,
    /// Gaussian kernel bandwidth for the temporal signal, in hours
    #[serde(default = "default_bandwidth_hours")]
    pub bandwidth_hours: f64,
    #[serde(default = "default_path_delimiter")]
    pub path_delimiter: String,
    /// Strip a leading `Inbox` segment before comparing paths
    #[serde(default = "default_true")]
    pub strip_inbox_prefix: bool,
}

impl Default for DistanceConfig {
    fn default() -> Self {
        Self {
            embedding_weight: default_embedding_weight(),
            time_weight: default_time_weight(),
            hierarchy_weight: default_hierarchy_weight(),
            bandwidth_hours: default_bandwidth_hours(),
            path_delimiter: default_path_delimiter(),
            strip_inbox_prefix: true,
        }
    }
}

/// Clustering method and its parameters. The method string is parsed by the
/// cluster engine; unknown names are rejected there.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_cluster_method")]
    pub method: String,
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
    #[serde(default)]
    pub min_samples: Option<usize>,
    #[serde(default = "default_true")]
    pub allow_single_cluster: bool,
    #[serde(default)]
    pub n_clusters: Option<usize>,
    #[serde(default = "default_linkage")]
    pub linkage: String,
    #[serde(default = "default_size_min")]
    pub size_min: usize,
    #[serde(default = "default_size_max")]
    pub size_max: usize,
    #[serde(default = "default_n_init")]
    pub n_init: usize,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_random_state")]
    pub random_state: u64,
    #[serde(default = "default_true")]
    pub convert_noise_to_cluster: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            method: default_cluster_method(),
            min_cluster_size: default_min_cluster_size(),
            min_samples: None,
            allow_single_cluster: true,
            n_clusters: None,
            linkage: default_linkage(),
            size_min: default_size_min(),
            size_max: default_size_max(),
            n_init: default_n_init(),
            max_iter: default_max_iter(),
            random_state: default_random_state(),
            convert_noise_to_cluster: true,
        }
    }
}

/// Relation extraction settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationConfig {
    /// Embedding neighbours added per target item to LLM candidate sets
    #[serde(default = "default_top_k")]
    pub top_k_neighbors: usize,
    /// Groups smaller than this borrow the adjacent group's items
    #[serde(default = "default_small_group")]
    pub small_group_threshold: usize,
    #[serde(default = "default_true")]
    pub enable_llm_escalation: bool,
    /// Where malformed LLM responses are written; disabled when unset
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
    #[serde(default)]
    pub thresholds: RuleThresholds,
}

impl Default for RelationConfig {
    fn default() -> Self {
        Self {
            top_k_neighbors: default_top_k(),
            small_group_threshold: default_small_group(),
            enable_llm_escalation: true,
            artifact_dir: None,
            thresholds: RuleThresholds::default(),
        }
    }
}

/// Cosine thresholds and structural limits for the rule-based relation
/// types. These are empirical values; every one of them can be overridden
/// from the `[relations.thresholds]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleThresholds {
    pub hierarchy_theme: f64,
    pub hierarchy_subject: f64,
    pub hierarchy_min_level_gap: u8,
    pub hierarchy_max_level_gap: u8,

    pub means_end_action_theme: f64,
    pub means_end_target_subject: f64,
    /// action→theme bar when it fires together with target→subject
    pub means_end_joint_action_theme: f64,
    pub means_end_outcome_target_theme: f64,
    pub means_end_action_subject: f64,
    /// Cross-cluster means_end pairs need this many fired patterns...
    pub cross_cluster_min_patterns: usize,
    /// ...or this many shared domain tags.
    pub cross_cluster_min_shared_domains: usize,

    pub lexical_text_ratio: f64,
    pub lexical_theme_similarity: f64,

    pub dependency_theme_issue: f64,
    pub dependency_action_issue: f64,
    pub dependency_target_conditions: f64,

    pub causal_action_conditions: f64,
    pub causal_outcome_target_theme: f64,
    pub causal_max_level_gap: u8,

    /// Separator for the structural path checks. Not read from the
    /// thresholds table; the pipeline copies `[distance].path_delimiter`.
    #[serde(skip)]
    pub path_delimiter: String,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            hierarchy_theme: 0.75,
            hierarchy_subject: 0.70,
            hierarchy_min_level_gap: 1,
            hierarchy_max_level_gap: 2,
            means_end_action_theme: 0.78,
            means_end_target_subject: 0.72,
            means_end_joint_action_theme: 0.72,
            means_end_outcome_target_theme: 0.72,
            means_end_action_subject: 0.75,
            cross_cluster_min_patterns: 2,
            cross_cluster_min_shared_domains: 2,
            lexical_text_ratio: 0.85,
            lexical_theme_similarity: 0.92,
            dependency_theme_issue: 0.72,
            dependency_action_issue: 0.75,
            dependency_target_conditions: 0.72,
            causal_action_conditions: 0.74,
            causal_outcome_target_theme: 0.72,
            causal_max_level_gap: 2,
            path_delimiter: default_path_delimiter(),
        }
    }
}

/// OpenAI-compatible oracle endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            embedding_dimension: default_embedding_dimension(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

/// Batching/backoff policy for rate-limited embedding calls
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchPolicy {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between consecutive batches, in milliseconds
    #[serde(default)]
    pub inter_batch_delay_ms: u64,
}

impl BatchPolicy {
    pub fn new(batch_size: usize, inter_batch_delay: Duration) -> Self {
        Self {
            batch_size,
            inter_batch_delay_ms: inter_batch_delay.as_millis() as u64,
        }
    }

    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            inter_batch_delay_ms: 0,
        }
    }
}

/// Orchestration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on concurrently running LLM units
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// A gap longer than this starts a new message group
    #[serde(default = "default_group_gap_minutes")]
    pub group_gap_minutes: i64,
    #[serde(default = "default_max_group_size")]
    pub max_group_size: usize,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            group_gap_minutes: default_group_gap_minutes(),
            max_group_size: default_max_group_size(),
            output_dir: default_output_dir(),
            cache_dir: default_cache_dir(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            with_target: false,
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_embedding_weight() -> f64 {
    0.7
}
fn default_time_weight() -> f64 {
    0.2
}
fn default_hierarchy_weight() -> f64 {
    0.1
}
fn default_bandwidth_hours() -> f64 {
    24.0
}
fn default_path_delimiter() -> String {
    " -> ".to_string()
}
fn default_cluster_method() -> String {
    "hdbscan".to_string()
}
fn default_min_cluster_size() -> usize {
    3
}
fn default_linkage() -> String {
    "average".to_string()
}
fn default_size_min() -> usize {
    3
}
fn default_size_max() -> usize {
    10
}
fn default_n_init() -> usize {
    10
}
fn default_max_iter() -> usize {
    300
}
fn default_random_state() -> u64 {
    42
}
fn default_top_k() -> usize {
    3
}
fn default_small_group() -> usize {
    5
}
fn default_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}
fn default_chat_model() -> String {
    "qwen2.5:14b".to_string()
}
fn default_embedding_model() -> String {
    "bge-m3".to_string()
}
fn default_embedding_dimension() -> usize {
    1024
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_batch_size() -> usize {
    64
}
fn default_max_workers() -> usize {
    4
}
fn default_group_gap_minutes() -> i64 {
    60
}
fn default_max_group_size() -> usize {
    50
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("mindgraph"))
        .unwrap_or_else(|| PathBuf::from(".mindgraph-cache"))
}
fn default_log_level() -> String {
    "info".to_string()
}

impl DistanceConfig {
    pub fn weight_sum(&self) -> f64 {
        self.embedding_weight + self.time_weight + self.hierarchy_weight
    }
}

impl MindGraphConfig {
    /// Load from an optional TOML file, then `MINDGRAPH__*` environment
    /// overrides (e.g. `MINDGRAPH__CLUSTER__METHOD=hierarchical`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = cfg::Config::builder();
        if let Some(path) = path {
            info!("Loading configuration from {:?}", path);
            builder = builder.add_source(cfg::File::from(path).required(true));
        }
        builder = builder.add_source(
            cfg::Environment::with_prefix("MINDGRAPH")
                .separator("__")
                .try_parsing(true),
        );

        let loaded: MindGraphConfig = builder
            .build()
            .map_err(|e| MindGraphError::config(format!("failed to read configuration: {}", e)))?
            .try_deserialize()
            .map_err(|e| MindGraphError::config(format!("failed to parse configuration: {}", e)))?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let parsed: MindGraphConfig =
            toml::from_str(s).map_err(|e| MindGraphError::config(e.to_string()))?;
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> Result<()> {
        let sum = self.distance.weight_sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(MindGraphError::config(format!(
                "distance weights must sum to 1.0, got {:.6}",
                sum
            )));
        }
        if self.distance.bandwidth_hours <= 0.0 {
            return Err(MindGraphError::config(
                "distance.bandwidth_hours must be > 0",
            ));
        }
        if self.distance.path_delimiter.is_empty() {
            return Err(MindGraphError::config(
                "distance.path_delimiter cannot be empty",
            ));
        }
        let method = self.cluster.method.trim().to_lowercase();
        if !CLUSTER_METHODS.contains(&method.as_str()) {
            return Err(MindGraphError::config(format!(
                "unknown cluster.method: {}",
                self.cluster.method
            )));
        }
        if !LINKAGES.contains(&self.cluster.linkage.trim().to_lowercase().as_str()) {
            return Err(MindGraphError::config(format!(
                "unknown cluster.linkage: {}",
                self.cluster.linkage
            )));
        }
        if self.cluster.min_cluster_size < 2 {
            return Err(MindGraphError::config(
                "cluster.min_cluster_size must be >= 2",
            ));
        }
        if self.cluster.size_min == 0 || self.cluster.size_min > self.cluster.size_max {
            return Err(MindGraphError::config(format!(
                "cluster.size_min ({}) must be in 1..=size_max ({})",
                self.cluster.size_min, self.cluster.size_max
            )));
        }
        if self.cluster.n_init == 0 || self.cluster.max_iter == 0 {
            return Err(MindGraphError::config(
                "cluster.n_init and cluster.max_iter must be > 0",
            ));
        }
        let t = &self.relations.thresholds;
        if t.hierarchy_min_level_gap > t.hierarchy_max_level_gap {
            return Err(MindGraphError::config(
                "relations.thresholds.hierarchy_min_level_gap exceeds hierarchy_max_level_gap",
            ));
        }
        if self.batch.batch_size == 0 {
            return Err(MindGraphError::config("batch.batch_size must be > 0"));
        }
        if self.pipeline.max_workers == 0 {
            return Err(MindGraphError::config("pipeline.max_workers must be > 0"));
        }
        if self.pipeline.max_group_size == 0 {
            return Err(MindGraphError::config(
                "pipeline.max_group_size must be > 0",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_configuration_is_valid() {
        let config = MindGraphConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cluster.method, "hdbscan");
    }

    #[test]
    fn test_bad_weight_sum_rejected() {
        let mut config = MindGraphConfig::default();
        config.distance.time_weight = 0.3;
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("sum to 1.0"));
    }

    #[test]
    fn test_toml_partial_sections() {
        let config = MindGraphConfig::from_toml_str(
            r#"
            [cluster]
            method = "hierarchical"
            n_clusters = 4

            [pipeline]
            max_workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.cluster.method, "hierarchical");
        assert_eq!(config.cluster.n_clusters, Some(4));
        assert_eq!(config.cluster.linkage, "average");
        assert_eq!(config.pipeline.max_workers, 8);
    }

    #[test]
    fn test_unknown_method_rejected() {
        let mut config = MindGraphConfig::default();
        config.cluster.method = "spectral".to_string();
        assert!(config.validate().unwrap_err().is_fatal());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = MindGraphConfig::default();
        config.pipeline.max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_threshold_overrides() {
        let config = MindGraphConfig::from_toml_str(
            r#"
            [relations.thresholds]
            means_end_action_theme = 0.8
            "#,
        )
        .unwrap();
        assert_eq!(config.relations.thresholds.means_end_action_theme, 0.8);
        assert_eq!(config.relations.thresholds.hierarchy_theme, 0.75);
        assert_eq!(config.relations.top_k_neighbors, 3);
    }

    #[test]
    fn test_batch_policy_delay() {
        let policy = BatchPolicy::new(16, Duration::from_millis(250));
        assert_eq!(policy.inter_batch_delay(), Duration::from_millis(250));
    }
}
