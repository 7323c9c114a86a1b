use mindgraph_core::Item;
use serde::{Deserialize, Serialize};

use crate::error::{ClusterError, Result};

/// One clustered item as written to the tabular output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteredRow {
    pub id: String,
    pub path: String,
    pub text: String,
    pub cluster: i32,
}

pub fn clustered_rows(items: &[Item], labels: &[i32]) -> Result<Vec<ClusteredRow>> {
    if items.len() != labels.len() {
        return Err(ClusterError::InvalidInput(format!(
            "{} items but {} labels",
            items.len(),
            labels.len()
        )));
    }
    Ok(items
        .iter()
        .zip(labels)
        .map(|(item, label)| ClusteredRow {
            id: item.id.clone(),
            path: item.path.clone(),
            text: item.text.clone(),
            cluster: *label,
        })
        .collect())
}

/// Write labels back onto the items.
pub fn apply_labels(items: &mut [Item], labels: &[i32]) -> Result<()> {
    if items.len() != labels.len() {
        return Err(ClusterError::InvalidInput(format!(
            "{} items but {} labels",
            items.len(),
            labels.len()
        )));
    }
    for (item, label) in items.iter_mut().zip(labels) {
        item.cluster = Some(*label);
    }
    Ok(())
}

/// JSON lines, one row per line.
pub fn rows_to_json_lines(rows: &[ClusteredRow]) -> Result<String> {
    let mut out = String::new();
    for row in rows {
        out.push_str(&serde_json::to_string(row).map_err(mindgraph_core::MindGraphError::from)?);
        out.push('\n');
    }
    Ok(out)
}

pub fn rows_from_json_lines(s: &str) -> Result<Vec<ClusteredRow>> {
    s.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| ClusterError::Core(mindgraph_core::MindGraphError::from(e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_carry_cluster_column() {
        let mut items = vec![Item::new("a", "alpha").with_path("x"), Item::new("b", "beta")];
        apply_labels(&mut items, &[1, 0]).unwrap();
        assert_eq!(items[0].cluster, Some(1));

        let rows = clustered_rows(&items, &[1, 0]).unwrap();
        let text = rows_to_json_lines(&rows).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("\"cluster\":1"));
        assert_eq!(rows_from_json_lines(&text).unwrap(), rows);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(clustered_rows(&[Item::new("a", "x")], &[]).is_err());
    }
}
