//! Temporal grouping of normalized message records.

use chrono::{DateTime, Duration, Utc};
use mindgraph_core::{MessageRecord, PipelineConfig};
use serde::{Deserialize, Serialize};

/// Consecutive records from one path with no long gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageGroup {
    pub group_id: String,
    pub path: String,
    pub records: Vec<MessageRecord>,
}

impl MessageGroup {
    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.records.first().map(|r| r.start_time)
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.records.iter().map(|r| r.end_time).max()
    }

    pub fn text(&self) -> String {
        self.records
            .iter()
            .map(|r| r.text.trim())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Grouping limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupingPolicy {
    pub max_gap: Duration,
    pub max_group_size: usize,
}

impl GroupingPolicy {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            max_gap: Duration::minutes(config.group_gap_minutes),
            max_group_size: config.max_group_size,
        }
    }
}

/// Sort records by start time and split them into groups. A new group starts
/// when the path changes, when the gap since the previous record's end
/// exceeds `max_gap`, or when the current group is full. Group ids are
/// `group_<n>` in temporal order.
pub fn group_messages(records: &[MessageRecord], policy: GroupingPolicy) -> Vec<MessageGroup> {
    let mut sorted: Vec<&MessageRecord> = records.iter().collect();
    sorted.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.path.cmp(&b.path)));

    let max_size = policy.max_group_size.max(1);
    let mut groups: Vec<MessageGroup> = Vec::new();
    for record in sorted {
        let split = match groups.last() {
            None => true,
            Some(current) => {
                let last_end = current.records.last().map(|r| r.end_time);
                current.path != record.path
                    || current.len() >= max_size
                    || last_end.is_some_and(|end| record.start_time - end > policy.max_gap)
            }
        };
        if split {
            groups.push(MessageGroup {
                group_id: format!("group_{}", groups.len()),
                path: record.path.clone(),
                records: Vec::new(),
            });
        }
        if let Some(current) = groups.last_mut() {
            current.records.push(record.clone());
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn policy(gap: i64, size: usize) -> GroupingPolicy {
        GroupingPolicy {
            max_gap: Duration::minutes(gap),
            max_group_size: size,
        }
    }

    #[test]
    fn test_gap_splits_groups() {
        let records = vec![
            MessageRecord::new("chat", at(0), "a"),
            MessageRecord::new("chat", at(5), "b"),
            MessageRecord::new("chat", at(120), "c"),
        ];
        let groups = group_messages(&records, policy(30, 10));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].text(), "a\nb");
        assert_eq!(groups[1].group_id, "group_1");
    }

    #[test]
    fn test_unsorted_input_and_path_change() {
        let records = vec![
            MessageRecord::new("b", at(10), "third"),
            MessageRecord::new("a", at(0), "first"),
            MessageRecord::new("a", at(5), "second"),
        ];
        let groups = group_messages(&records, policy(30, 10));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].path, "a");
        assert_eq!(groups[0].len(), 2);
        assert_eq!(groups[1].text(), "third");
    }

    #[test]
    fn test_size_cap() {
        let records: Vec<MessageRecord> = (0..5)
            .map(|i| MessageRecord::new("p", at(i), format!("m{}", i)))
            .collect();
        let groups = group_messages(&records, policy(30, 2));
        assert_eq!(groups.iter().map(MessageGroup::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn test_empty_input() {
        assert!(group_messages(&[], policy(30, 2)).is_empty());
    }
}
