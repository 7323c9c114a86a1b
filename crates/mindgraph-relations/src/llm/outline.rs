//! Recursive-descent parser for Markdown bullet outlines.
//!
//! Nesting follows indentation (a tab counts as four spaces). A bullet may
//! start with an `[ID]` tag. Non-bullet `key: value` lines directly below a
//! bullet become properties of that bullet.

use mindgraph_core::{MindGraphError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const TAB_WIDTH: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineNode {
    /// Nesting depth, 1 for top-level bullets.
    pub level: usize,
    pub id: Option<String>,
    pub text: String,
    pub properties: BTreeMap<String, String>,
    pub children: Vec<OutlineNode>,
}

impl OutlineNode {
    /// Number of nodes in this subtree, including itself.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(OutlineNode::size).sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Bullet { indent: usize, content: String },
    Property { indent: usize, key: String, value: String },
}

impl Line {
    fn indent(&self) -> usize {
        match self {
            Line::Bullet { indent, .. } | Line::Property { indent, .. } => *indent,
        }
    }
}

pub struct OutlineParser {
    bullet: Regex,
    tag: Regex,
    property: Regex,
}

impl OutlineParser {
    pub fn new() -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| MindGraphError::Parse(format!("invalid outline pattern: {}", e)))
        };
        Ok(Self {
            bullet: compile(r"^(?:[-*+]|\d+[.)])\s+(.*)$")?,
            tag: compile(r"^\[([^\]]+)\]\s*[:\-]?\s*(.*)$")?,
            property: compile(r"^([A-Za-z_][A-Za-z0-9_\-]*)\s*:\s*(.*)$")?,
        })
    }

    /// Parse an outline into its top-level nodes. Headings, prose and code
    /// fence markers are skipped.
    pub fn parse(&self, text: &str) -> Vec<OutlineNode> {
        let lines = self.tokenize(text);
        let mut pos = 0;
        let mut roots = Vec::new();
        while pos < lines.len() {
            let before = pos;
            roots.extend(self.parse_level(&lines, &mut pos, None, 1));
            if pos == before {
                // Stray property before the first bullet.
                pos += 1;
            }
        }
        roots
    }

    fn tokenize(&self, text: &str) -> Vec<Line> {
        text.lines()
            .filter_map(|raw| {
                let indent = indentation(raw);
                let body = raw.trim();
                if body.is_empty() || body.starts_with("```") || body.starts_with('#') {
                    return None;
                }
                if let Some(caps) = self.bullet.captures(body) {
                    return Some(Line::Bullet {
                        indent,
                        content: caps[1].trim().to_string(),
                    });
                }
                self.property.captures(body).map(|caps| Line::Property {
                    indent,
                    key: caps[1].to_lowercase(),
                    value: caps[2].trim().to_string(),
                })
            })
            .collect()
    }

    /// Sibling bullets deeper than `parent_indent`, each with its subtree.
    fn parse_level(
        &self,
        lines: &[Line],
        pos: &mut usize,
        parent_indent: Option<usize>,
        level: usize,
    ) -> Vec<OutlineNode> {
        let mut nodes: Vec<OutlineNode> = Vec::new();
        while let Some(line) = lines.get(*pos) {
            if parent_indent.is_some_and(|p| line.indent() <= p) {
                break;
            }
            match line {
                Line::Bullet { indent, content } => {
                    *pos += 1;
                    let mut node = self.node(content, level);
                    while let Some(Line::Property { key, value, .. }) = lines.get(*pos) {
                        node.properties.insert(key.clone(), value.clone());
                        *pos += 1;
                    }
                    if node.id.is_none() {
                        node.id = node.properties.get("id").cloned();
                    }
                    node.children = self.parse_level(lines, pos, Some(*indent), level + 1);
                    nodes.push(node);
                }
                Line::Property { key, value, .. } => match nodes.last_mut() {
                    Some(last) => {
                        last.properties.insert(key.clone(), value.clone());
                        *pos += 1;
                    }
                    None => break,
                },
            }
        }
        nodes
    }

    fn node(&self, content: &str, level: usize) -> OutlineNode {
        let content = content.trim_matches('*').trim();
        let (id, text) = match self.tag.captures(content) {
            Some(caps) => (Some(caps[1].trim().to_string()), caps[2].trim().to_string()),
            None => (None, content.to_string()),
        };
        OutlineNode {
            level,
            id: id.filter(|id| !id.is_empty()),
            text: text.trim_matches('*').trim().to_string(),
            properties: BTreeMap::new(),
            children: Vec::new(),
        }
    }
}

fn indentation(line: &str) -> usize {
    line.chars()
        .take_while(|c| c.is_whitespace())
        .map(|c| if c == '\t' { TAB_WIDTH } else { 1 })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Vec<OutlineNode> {
        OutlineParser::new().unwrap().parse(text)
    }

    #[test]
    fn test_nested_outline() {
        let text = "\
# Goals
- [NEW] Stay healthy
  level: 2
  - [i1] Run three times a week
  - [i2] Cook at home
- [NEW2] Grow career
\t* [i3] Learn Rust
";
        let roots = parse(text);
        assert_eq!(roots.len(), 2);
        assert_eq!(roots[0].id.as_deref(), Some("NEW"));
        assert_eq!(roots[0].text, "Stay healthy");
        assert_eq!(roots[0].properties.get("level").map(String::as_str), Some("2"));
        assert_eq!(roots[0].children.len(), 2);
        assert_eq!(roots[0].children[1].id.as_deref(), Some("i2"));
        assert_eq!(roots[0].children[1].level, 2);
        assert_eq!(roots[1].children[0].text, "Learn Rust");
        assert_eq!(roots.iter().map(OutlineNode::size).sum::<usize>(), 5);
    }

    #[test]
    fn test_fenced_numbered_outline() {
        let text = "```markdown\n1. **[G1] Top**\n   2. [i1]: child\n```";
        let roots = parse(text);
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id.as_deref(), Some("G1"));
        assert_eq!(roots[0].text, "Top");
        assert_eq!(roots[0].children[0].id.as_deref(), Some("i1"));
        assert_eq!(roots[0].children[0].text, "child");
    }

    #[test]
    fn test_uneven_indentation() {
        let text = "- a\n    - b\n  - c\n      - d\n- e";
        let roots = parse(text);
        assert_eq!(roots.len(), 2);
        let a = &roots[0];
        assert_eq!(a.children.iter().map(|n| n.text.as_str()).collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(a.children[1].children[0].text, "d");
        assert_eq!(a.children[1].children[0].level, 3);
    }

    #[test]
    fn test_id_from_property() {
        let roots = parse("- Untagged goal\n  id: g7\n  status: open");
        assert_eq!(roots[0].id.as_deref(), Some("g7"));
        assert_eq!(roots[0].properties.len(), 2);
    }

    #[test]
    fn test_stray_lines_are_skipped() {
        let roots = parse("Here is the tree:\nnote: ignore me\n- [x] only");
        assert_eq!(roots.len(), 1);
        assert_eq!(roots[0].id.as_deref(), Some("x"));
    }
}
