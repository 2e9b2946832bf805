//! # Envelope Tree Nodes
//!
//! An element keeps its entries in document order: attributes first, then
//! child elements in order of first appearance, then text content.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::INNER_TEXT;

/// A node of a parsed envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Text-only element, attribute value, or empty element.
    Text(String),
    /// Element with attributes and/or children.
    Element(Element),
    /// Repeated sibling elements sharing one name.
    List(Vec<Node>),
}

impl Node {
    /// Text of this node.
    ///
    /// Returns the string for a text node and the [`INNER_TEXT`] entry for an
    /// element carrying both attributes and text.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Node::Text(text) => Some(text),
            Node::Element(element) => element.get(INNER_TEXT).and_then(Node::as_text),
            Node::List(_) => None,
        }
    }

    /// The string of a [`Node::Text`].
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Node::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The element of a [`Node::Element`].
    #[must_use]
    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            _ => None,
        }
    }

    /// The items of a [`Node::List`].
    #[must_use]
    pub fn as_list(&self) -> Option<&[Node]> {
        match self {
            Node::List(items) => Some(items),
            _ => None,
        }
    }

    /// Look up a direct entry of an element node.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.as_element().and_then(|element| element.get(key))
    }

    /// Whether the search descends into this node.
    pub(crate) fn is_container(&self) -> bool {
        matches!(self, Node::Element(_) | Node::List(_))
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Text(text.to_string())
    }
}

impl Serialize for Node {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Node::Text(text) => serializer.serialize_str(text),
            Node::Element(element) => element.serialize(serializer),
            Node::List(items) => items.serialize(serializer),
        }
    }
}

/// Ordered mapping of names to nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    entries: Vec<(String, Node)>,
}

impl Element {
    /// Create an empty element.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entry, folding repeated names into a [`Node::List`].
    pub fn insert(&mut self, key: String, value: Node) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, Node::List(items))) => items.push(value),
            Some((_, existing)) => {
                let first = std::mem::replace(existing, Node::List(Vec::with_capacity(2)));
                if let Node::List(items) = existing {
                    items.push(first);
                    items.push(value);
                }
            }
            None => self.entries.push((key, value)),
        }
    }

    /// Get an entry by name.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Node> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| value)
    }

    /// Whether an entry with this name exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Entries in document order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Node)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Entry names in document order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the element has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove and return an entry.
    pub(crate) fn remove(&mut self, key: &str) -> Option<Node> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }
}

impl Serialize for Element {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
