//! Tree traversal helpers for downstream consumers.
//!
//! Extraction code works in terms of "find the nodes of these kinds and
//! flatten the text under them"; this module is that interface boundary.

use crate::nodes::{KindSet, NodeChild, NodeKind, WikiNode};

impl WikiNode {
    /// Iterates over the direct child nodes matching `kinds`.
    pub fn find_children(&self, kinds: KindSet) -> impl Iterator<Item = &WikiNode> {
        self.children
            .iter()
            .filter_map(NodeChild::as_node)
            .filter(move |node| node.kind.is(kinds))
    }

    /// Collects all descendant nodes matching `kinds`, in document order.
    /// Argument groups are searched as well as children.
    pub fn find_descendants(&self, kinds: KindSet) -> Vec<&WikiNode> {
        let mut found = Vec::new();
        collect(self, kinds, &mut found);
        found
    }
}

/// Preorder collection over children and argument groups.
fn collect<'n>(node: &'n WikiNode, kinds: KindSet, found: &mut Vec<&'n WikiNode>) {
    let groups = node
        .args
        .iter()
        .chain(node.definition.iter())
        .chain(core::iter::once(&node.children));
    for group in groups {
        for child in group {
            if let NodeChild::Node(child) = child {
                if child.kind.is(kinds) {
                    found.push(child);
                }
                collect(child, kinds, found);
            }
        }
    }
}

/// The result of flattening a subtree to text.
#[derive(Debug, Default)]
pub struct Flattened {
    /// The joined text content.
    pub text: String,
    /// Link targets encountered, when recording was requested.
    pub links: Vec<String>,
    /// Category link targets encountered, when recording was requested.
    pub categories: Vec<String>,
}

/// Joins all descendant text under `node`, optionally recording which
/// links and categories were encountered along the way.
///
/// Links contribute their display text (or their target when there is
/// none); templates and parser functions contribute the text of their
/// arguments, which is usually only meaningful after expansion.
pub fn flatten_text(node: &WikiNode, record_links: bool) -> Flattened {
    let mut out = Flattened::default();
    flatten(node, record_links, &mut out);
    out
}

fn flatten(node: &WikiNode, record_links: bool, out: &mut Flattened) {
    match node.kind {
        // These argument slots hold structural metadata (page title, item
        // prefix, tag name), not content.
        NodeKind::Root | NodeKind::ListItem | NodeKind::Html => {
            flatten_group(&node.children, record_links, out);
            if let Some(definition) = &node.definition {
                flatten_group(definition, record_links, out);
            }
        }
        NodeKind::MagicWord => {}
        NodeKind::Url => {
            // Display text if present, otherwise the target.
            let group = node.args.get(1).or_else(|| node.args.first());
            if let Some(group) = group {
                flatten_group(group, record_links, out);
            }
            flatten_group(&node.children, record_links, out);
        }
        NodeKind::Link | NodeKind::Media => {
            let target = node.args.first().map(|arg| group_text(arg)).unwrap_or_default();
            if record_links {
                let trimmed = target.trim();
                if let Some(category) = trimmed
                    .trim_start_matches(':')
                    .strip_prefix("Category:")
                    .or_else(|| trimmed.strip_prefix("category:"))
                {
                    out.categories.push(category.trim().to_string());
                } else {
                    out.links.push(trimmed.to_string());
                }
            }
            // Display text if present, otherwise the target.
            if let Some(display) = node.args.get(1) {
                flatten_group(display, record_links, out);
            } else {
                out.text.push_str(&target);
            }
            // Link trail.
            flatten_group(&node.children, record_links, out);
        }
        _ => {
            for group in node.args.iter().chain(node.definition.iter()) {
                flatten_group(group, record_links, out);
            }
            flatten_group(&node.children, record_links, out);
        }
    }
}

fn flatten_group(group: &[NodeChild], record_links: bool, out: &mut Flattened) {
    for child in group {
        match child {
            NodeChild::Text(text) => out.text.push_str(text),
            NodeChild::Node(node) => flatten(node, record_links, out),
        }
    }
}

/// The text of a single argument group, ignoring nested nodes' structure.
fn group_text(group: &[NodeChild]) -> String {
    let mut out = Flattened::default();
    flatten_group(group, false, &mut out);
    out.text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn find_by_kind_mask() {
        let out = parse("Test", "==A==\n{{t1}}\n===B===\n{{t2|x}}\n[[link]]\n");
        let templates = out.root.find_descendants(KindSet::TEMPLATE);
        assert_eq!(templates.len(), 2);
        let both = out.root.find_descendants(KindSet::TEMPLATE | KindSet::LINK);
        assert_eq!(both.len(), 3);
        let sections = out.root.find_children(KindSet::LEVEL2).count();
        assert_eq!(sections, 1);
    }

    #[test]
    fn flatten_records_links_and_categories() {
        let out = parse("Test", "see [[target|shown]] in [[Category:Things]]\n");
        let flat = flatten_text(&out.root, true);
        assert!(flat.text.contains("shown"));
        assert!(!flat.text.contains("target"));
        assert_eq!(flat.links, vec!["target"]);
        assert_eq!(flat.categories, vec!["Things"]);
    }

    #[test]
    fn flatten_without_display_uses_target() {
        let out = parse("Test", "[[word]]s\n");
        let flat = flatten_text(&out.root, false);
        assert_eq!(flat.text, "words\n");
    }
}
