//! Rule-based relation extraction over goals.
//!
//! Each ordered pair `(A, B)` first has to pass [`passes_gate`]. Past the
//! gate, every relation type checks its structural preconditions and then
//! needs at least one evidence pattern over field embeddings. All
//! extraction functions are pure and return relations sorted by
//! `(source, target, type)`.

pub mod evidence;
pub mod gate;
pub mod lexical;

pub use evidence::*;
pub use gate::*;
pub use lexical::*;

use mindgraph_core::{
    sort_relations, Field, Goal, Relation, RelationType, RuleThresholds,
};
use rayon::prelude::*;
use tracing::debug;

fn build(
    a: &Goal,
    b: &Goal,
    relation_type: RelationType,
    evidence: &[Evidence],
) -> Option<Relation> {
    Relation::new(
        a.item.id.clone(),
        b.item.id.clone(),
        relation_type,
        mean_similarity(evidence),
        format_reason(evidence),
    )
    .ok()
}

/// `A` is one or two levels more abstract than `B` with matching theme and
/// subject. Emitted as `A → B`.
pub fn evaluate_hierarchy(a: &Goal, b: &Goal, t: &RuleThresholds) -> Option<Relation> {
    let gap = b.level().checked_sub(a.level())?;
    if gap < t.hierarchy_min_level_gap || gap > t.hierarchy_max_level_gap {
        return None;
    }
    let theme = check_strict(a, Field::Theme, b, Field::Theme, t.hierarchy_theme)?;
    let subject = check_strict(a, Field::Subject, b, Field::Subject, t.hierarchy_subject)?;
    build(a, b, RelationType::Hierarchy, &[theme, subject])
}

fn means_end_evidence(a: &Goal, b: &Goal, t: &RuleThresholds) -> Vec<Evidence> {
    let mut fired = Vec::new();
    if let Some(e) = check(a, Field::Action, b, Field::Theme, t.means_end_action_theme) {
        fired.push(e);
    }
    if let (Some(target), Some(action)) = (
        check(a, Field::Target, b, Field::Subject, t.means_end_target_subject),
        check(a, Field::Action, b, Field::Theme, t.means_end_joint_action_theme),
    ) {
        fired.push(Evidence::new(
            format!("{}+{}", target.name, action.name),
            target.similarity.min(action.similarity),
        ));
    }
    if b.has_outcome() {
        let outcome = check(a, Field::Target, b, Field::Theme, t.means_end_outcome_target_theme);
        if let Some(e) = outcome {
            fired.push(Evidence::new(format!("outcome+{}", e.name), e.similarity));
        }
    }
    if let Some(e) = check(a, Field::Action, b, Field::Subject, t.means_end_action_subject) {
        fired.push(e);
    }
    fired
}

/// `A` enables `B`. Emitted as `A → B`.
pub fn evaluate_means_end(a: &Goal, b: &Goal, t: &RuleThresholds) -> Option<Relation> {
    if a.level() + 1 < b.level() {
        return None;
    }
    if !(a.has_actions() || a.has_targets())
        || !is_purposive(b)
        || is_parallel(a, b, &t.path_delimiter)
    {
        return None;
    }
    if is_lexical_duplicate(a, b, t) {
        return None;
    }
    let fired = means_end_evidence(a, b, t);
    if fired.is_empty() {
        return None;
    }
    if cross_cluster(a, b)
        && fired.len() < t.cross_cluster_min_patterns
        && a.shared_domains(b).len() < t.cross_cluster_min_shared_domains
    {
        debug!(
            "means_end {} -> {} rejected: cross-cluster with {} pattern(s)",
            a.item.id,
            b.item.id,
            fired.len()
        );
        return None;
    }
    build(a, b, RelationType::MeansEnd, &fired)
}

/// `A` blocks or gates `B`'s issue. Emitted as `A → B`.
pub fn evaluate_dependency(a: &Goal, b: &Goal, t: &RuleThresholds) -> Option<Relation> {
    if !b.has_issues() || a.level() > b.level() + 1 {
        return None;
    }
    let mut fired = Vec::new();
    if a.has_actions() {
        if let Some(e) = check(a, Field::Theme, b, Field::Issue, t.dependency_theme_issue) {
            fired.push(e);
        }
        if let Some(e) = check(a, Field::Action, b, Field::Issue, t.dependency_action_issue) {
            fired.push(e);
        }
    }
    if let Some(e) = check(a, Field::Target, b, Field::Conditions, t.dependency_target_conditions) {
        fired.push(e);
    }
    if fired.is_empty() {
        return None;
    }
    build(a, b, RelationType::Dependency, &fired)
}

/// `A` causes `B`'s conditions. Emitted as `A → B`.
pub fn evaluate_causal(a: &Goal, b: &Goal, t: &RuleThresholds) -> Option<Relation> {
    let both_abstract = a.level() <= 2 && b.level() <= 2;
    if !(same_cluster(a, b) || both_abstract) {
        return None;
    }
    if !(a.has_actions() || a.has_targets()) || !b.has_conditions() {
        return None;
    }
    if a.level().abs_diff(b.level()) > t.causal_max_level_gap {
        return None;
    }
    let mut fired = Vec::new();
    if let Some(e) = check(a, Field::Action, b, Field::Conditions, t.causal_action_conditions) {
        fired.push(e);
    }
    if a.has_outcome() {
        if let Some(e) = check(a, Field::Target, b, Field::Theme, t.causal_outcome_target_theme) {
            fired.push(Evidence::new(format!("outcome+{}", e.name), e.similarity));
        }
    }
    if fired.is_empty() {
        return None;
    }
    build(a, b, RelationType::Causal, &fired)
}

type PairRule = fn(&Goal, &Goal, &RuleThresholds) -> Option<Relation>;

fn rule_for(relation_type: RelationType) -> Option<PairRule> {
    match relation_type {
        RelationType::Hierarchy => Some(evaluate_hierarchy as PairRule),
        RelationType::MeansEnd => Some(evaluate_means_end as PairRule),
        RelationType::Dependency => Some(evaluate_dependency as PairRule),
        RelationType::Causal => Some(evaluate_causal as PairRule),
        _ => None,
    }
}

fn extract_with(goals: &[Goal], t: &RuleThresholds, rules: &[PairRule]) -> Vec<Relation> {
    let mut relations: Vec<Relation> = (0..goals.len())
        .into_par_iter()
        .flat_map_iter(|i| {
            let a = &goals[i];
            goals
                .iter()
                .enumerate()
                .filter(move |(j, b)| *j != i && passes_gate(a, b))
                .flat_map(move |(_, b)| rules.iter().filter_map(move |rule| rule(a, b, t)))
        })
        .collect();
    sort_relations(&mut relations);
    relations.dedup_by(|x, y| x.sort_key() == y.sort_key());
    relations
}

pub fn extract_hierarchy_relations(goals: &[Goal], t: &RuleThresholds) -> Vec<Relation> {
    extract_with(goals, t, &[evaluate_hierarchy as PairRule])
}

pub fn extract_means_end_relations(goals: &[Goal], t: &RuleThresholds) -> Vec<Relation> {
    extract_with(goals, t, &[evaluate_means_end as PairRule])
}

pub fn extract_dependency_relations(goals: &[Goal], t: &RuleThresholds) -> Vec<Relation> {
    extract_with(goals, t, &[evaluate_dependency as PairRule])
}

pub fn extract_causal_relations(goals: &[Goal], t: &RuleThresholds) -> Vec<Relation> {
    extract_with(goals, t, &[evaluate_causal as PairRule])
}

/// Every rule-based type in one pass.
pub fn extract_all(goals: &[Goal], t: &RuleThresholds) -> Vec<Relation> {
    let rules: Vec<PairRule> = RelationType::RULE_BASED
        .iter()
        .filter_map(|rt| rule_for(*rt))
        .collect();
    let relations = extract_with(goals, t, &rules);
    debug!(
        "Rule extraction over {} goals produced {} relations",
        goals.len(),
        relations.len()
    );
    relations
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(angle_deg: f32) -> Vec<f32> {
        let r = angle_deg.to_radians();
        vec![r.cos(), r.sin()]
    }

    /// A unit vector whose cosine with `[1, 0]` is `c`.
    fn with_cos(c: f32) -> Vec<f32> {
        vec![c, (1.0 - c * c).sqrt()]
    }

    fn means_end_pair() -> (Goal, Goal) {
        let a = Goal::new("A", "roll out the new build to production", 2)
            .with_cluster(0)
            .with_domains(["work"])
            .with_actions(["deploy service"])
            .with_field_embedding(Field::Action, vec![1.0, 0.0])
            .with_field_embedding(Field::Theme, unit(90.0));
        let b = Goal::new("B", "have the service running for customers", 2)
            .with_cluster(0)
            .with_domains(["work"])
            .with_theme("deploy service")
            .with_field_embedding(Field::Theme, with_cos(0.85));
        (a, b)
    }

    #[test]
    fn test_means_end_action_theme() {
        let (a, b) = means_end_pair();
        let t = RuleThresholds::default();
        let relations = extract_all(&[a, b], &t);
        assert_eq!(relations.len(), 1);
        let r = &relations[0];
        assert_eq!(r.relation_type, RelationType::MeansEnd);
        assert_eq!((r.source_id.as_str(), r.target_id.as_str()), ("A", "B"));
        assert!(r.evidence.contains("action→theme=0.850"));
    }

    #[test]
    fn test_gate_blocks_every_rule() {
        let t = RuleThresholds::default();
        let shared = unit(0.0);
        let mut a = Goal::new("A", "concrete", 4)
            .with_path("x")
            .with_domains(["a"])
            .with_actions(["do"])
            .with_targets(["thing"])
            .with_outcomes(["done"])
            .with_conditions(["c"])
            .with_issues(["i"]);
        let mut b = Goal::new("B", "abstract", 2)
            .with_path("y")
            .with_domains(["b"])
            .with_actions(["do"])
            .with_targets(["thing"])
            .with_outcomes(["done"])
            .with_conditions(["c"])
            .with_issues(["i"]);
        for field in Field::GOAL_FIELDS {
            a = a.with_field_embedding(field, shared.clone());
            b = b.with_field_embedding(field, shared.clone());
        }
        for rt in RelationType::RULE_BASED {
            let rule = rule_for(rt).unwrap();
            let relations = extract_with(&[a.clone(), b.clone()], &t, &[rule]);
            assert!(relations.is_empty(), "{} fired for a gated pair", rt);
        }
    }

    #[test]
    fn test_hierarchy_direction_and_thresholds() {
        let t = RuleThresholds::default();
        let parent = Goal::new("P", "stay healthy", 1)
            .with_domains(["health"])
            .with_field_embedding(Field::Theme, with_cos(0.9))
            .with_field_embedding(Field::Subject, with_cos(0.8));
        let child = Goal::new("C", "run weekly", 3)
            .with_domains(["health"])
            .with_field_embedding(Field::Theme, vec![1.0, 0.0])
            .with_field_embedding(Field::Subject, vec![1.0, 0.0]);
        let relations = extract_hierarchy_relations(&[child.clone(), parent.clone()], &t);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].source_id, "P");
        assert_eq!(relations[0].target_id, "C");
        assert!(relations[0].evidence.starts_with("theme→theme=0.900"));

        let too_far = Goal::new("F", "x", 4)
            .with_domains(["health"])
            .with_field_embedding(Field::Theme, vec![1.0, 0.0])
            .with_field_embedding(Field::Subject, vec![1.0, 0.0]);
        assert!(extract_hierarchy_relations(&[parent, too_far], &t).is_empty());
    }

    #[test]
    fn test_cross_cluster_means_end_needs_more_evidence() {
        let t = RuleThresholds::default();
        let (a, b) = means_end_pair();
        let b = b.with_cluster(1);
        assert!(extract_means_end_relations(&[a.clone(), b.clone()], &t).is_empty());

        let a2 = a.with_domains(["work", "ops"]);
        let b2 = b.with_domains(["work", "ops"]);
        assert_eq!(extract_means_end_relations(&[a2, b2], &t).len(), 1);
    }

    #[test]
    fn test_parallel_tasks_follow_configured_delimiter() {
        let (a, b) = means_end_pair();
        let a = a.with_path("work/infra");
        let b = b.with_path("work/infra/k8s").with_actions(["watch rollout"]);
        let a_to_b = |relations: &[Relation]| {
            relations
                .iter()
                .any(|r| r.source_id == "A" && r.target_id == "B")
        };

        let arrows = RuleThresholds::default();
        assert!(a_to_b(&extract_means_end_relations(&[a.clone(), b.clone()], &arrows)));

        let slashes = RuleThresholds {
            path_delimiter: "/".to_string(),
            ..RuleThresholds::default()
        };
        assert!(!a_to_b(&extract_means_end_relations(&[a, b], &slashes)));
    }

    #[test]
    fn test_lexical_duplicates_are_not_means_end() {
        let t = RuleThresholds::default();
        let (a, mut b) = means_end_pair();
        b.item.text = a.item.text.clone();
        assert!(extract_means_end_relations(&[a, b], &t).is_empty());
    }

    #[test]
    fn test_dependency_rule() {
        let t = RuleThresholds::default();
        let a = Goal::new("A", "set up ci", 3)
            .with_path("work")
            .with_actions(["configure pipeline"])
            .with_field_embedding(Field::Action, vec![1.0, 0.0]);
        let b = Goal::new("B", "releases are blocked", 3)
            .with_path("work")
            .with_issues(["no automated tests"])
            .with_field_embedding(Field::Issue, with_cos(0.8));
        let relations = extract_dependency_relations(&[a.clone(), b], &t);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].evidence, "action→issue=0.800");

        let no_issue = Goal::new("C", "x", 3).with_path("work");
        assert!(extract_dependency_relations(&[a, no_issue], &t).is_empty());
    }

    #[test]
    fn test_causal_rule_requires_cluster_or_abstract_levels() {
        let t = RuleThresholds::default();
        let a = Goal::new("A", "skip sleep", 3)
            .with_domains(["health"])
            .with_actions(["stay up late"])
            .with_field_embedding(Field::Action, vec![1.0, 0.0]);
        let b = Goal::new("B", "feel tired", 4)
            .with_domains(["health"])
            .with_conditions(["when sleep deprived"])
            .with_field_embedding(Field::Conditions, with_cos(0.9));
        assert!(extract_causal_relations(&[a.clone(), b.clone()], &t).is_empty());

        let relations =
            extract_causal_relations(&[a.with_cluster(3), b.with_cluster(3)], &t);
        assert_eq!(relations.len(), 1);
        assert_eq!(relations[0].relation_type, RelationType::Causal);
    }

    #[test]
    fn test_extraction_is_pure() {
        let t = RuleThresholds::default();
        let mut goals = Vec::new();
        for i in 0..8u8 {
            let g = Goal::new(format!("g{}", i), format!("goal number {}", i), 1 + i % 4)
                .with_domains(["shared"])
                .with_actions([format!("act{}", i)])
                .with_targets([format!("target{}", i)])
                .with_issues(if i % 2 == 0 { vec!["issue".to_string()] } else { vec![] })
                .with_conditions(["cond"])
                .with_outcomes(["out"]);
            let g = Field::GOAL_FIELDS.iter().fold(g, |g, f| {
                g.with_field_embedding(*f, unit(i as f32 * 4.0 + *f as u8 as f32))
            });
            goals.push(g);
        }
        let first = extract_all(&goals, &t);
        let second = extract_all(&goals, &t);
        assert_eq!(first, second);
        let mut sorted = first.clone();
        sort_relations(&mut sorted);
        assert_eq!(first, sorted);
    }
}
