//! # Bounded-Depth Key Search
//!
//! Every element visited is checked for `key` before its children are
//! searched, so a match on a parent precedes matches inside it. Lists consume
//! a level of depth like elements do.

use crate::node::Node;

/// Collect every value stored under `key` reachable within `max_depth` levels.
#[must_use]
pub fn find_all<'a>(node: &'a Node, key: &str, max_depth: usize) -> Vec<&'a Node> {
    let mut found = Vec::new();
    search(node, key, max_depth, &mut found);
    found
}

fn search<'a>(node: &'a Node, key: &str, depth: usize, found: &mut Vec<&'a Node>) {
    if depth == 0 {
        return;
    }
    let depth = depth - 1;

    match node {
        Node::Element(element) => {
            if let Some(value) = element.get(key) {
                found.push(value);
            }
            for (_, child) in element.iter() {
                if child.is_container() {
                    search(child, key, depth, found);
                }
            }
        }
        Node::List(items) => {
            for item in items.iter().filter(|item| item.is_container()) {
                search(item, key, depth, found);
            }
        }
        Node::Text(_) => {}
    }
}
