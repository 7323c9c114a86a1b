//! Near-duplicate detection between goal statements.

use mindgraph_core::{Field, Goal, RuleThresholds};
use similar::TextDiff;

use super::evidence::field_similarity;

const SUFFIXES: &[&str] = &["ing", "ed", "es", "s"];

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Character-level similarity ratio in `[0, 1]`.
pub fn text_ratio(a: &str, b: &str) -> f64 {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    TextDiff::from_chars(a.as_str(), b.as_str()).ratio() as f64
}

/// Crude stem of the leading verb of an action phrase.
pub fn verb_stem(action: &str) -> Option<String> {
    let verb = action.split_whitespace().next()?.to_lowercase();
    let verb: String = verb.chars().filter(|c| c.is_alphanumeric()).collect();
    for suffix in SUFFIXES {
        if let Some(stem) = verb.strip_suffix(suffix) {
            if stem.len() >= 3 {
                return Some(stem.to_string());
            }
        }
    }
    (!verb.is_empty()).then_some(verb)
}

fn first_nonempty(values: &[String]) -> Option<String> {
    values
        .iter()
        .map(|v| normalize(v))
        .find(|v| !v.is_empty())
}

/// Same verb stem on the first action and the same first target.
pub fn same_verb_and_target(a: &Goal, b: &Goal) -> bool {
    let stems = (
        first_nonempty(&a.action).and_then(|s| verb_stem(&s)),
        first_nonempty(&b.action).and_then(|s| verb_stem(&s)),
    );
    let targets = (first_nonempty(&a.target), first_nonempty(&b.target));
    matches!(stems, (Some(x), Some(y)) if x == y) && matches!(targets, (Some(x), Some(y)) if x == y)
}

/// Any of: near-identical text, same verb stem and target, near-identical
/// theme embedding.
pub fn is_lexical_duplicate(a: &Goal, b: &Goal, thresholds: &RuleThresholds) -> bool {
    if text_ratio(&a.item.text, &b.item.text) >= thresholds.lexical_text_ratio {
        return true;
    }
    if same_verb_and_target(a, b) {
        return true;
    }
    field_similarity(a, Field::Theme, b, Field::Theme)
        .is_some_and(|s| s >= thresholds.lexical_theme_similarity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_ratio() {
        assert!(text_ratio("Deploy the API service", "deploy the  api service") > 0.99);
        assert!(text_ratio("learn piano", "fix the roof") < 0.5);
    }

    #[test]
    fn test_verb_stem() {
        assert_eq!(verb_stem("Deploying service").as_deref(), Some("deploy"));
        assert_eq!(verb_stem("deployed it").as_deref(), Some("deploy"));
        assert_eq!(verb_stem("runs").as_deref(), Some("run"));
        assert_eq!(verb_stem("is").as_deref(), Some("is"));
        assert!(verb_stem("   ").is_none());
    }

    #[test]
    fn test_duplicate_by_verb_and_target() {
        let t = RuleThresholds::default();
        let a = Goal::new("a", "roll out the api", 3)
            .with_actions(["deploy service"])
            .with_targets(["API"]);
        let b = Goal::new("b", "get the backend live this week", 3)
            .with_actions(["deploying to prod"])
            .with_targets(["api "]);
        assert!(is_lexical_duplicate(&a, &b, &t));
        let c = b.clone().with_targets(["database"]);
        assert!(!is_lexical_duplicate(&a, &c, &t));
    }

    #[test]
    fn test_duplicate_by_theme_similarity() {
        let t = RuleThresholds::default();
        let a = Goal::new("a", "one thing", 2).with_field_embedding(Field::Theme, vec![1.0, 0.0]);
        let b = Goal::new("b", "something else", 2)
            .with_field_embedding(Field::Theme, vec![0.99, 0.05]);
        assert!(is_lexical_duplicate(&a, &b, &t));
    }
}
