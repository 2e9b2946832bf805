//! # Envelope Parser
//!
//! Streams the document with `quick-xml` and folds it into a [`Node`] tree.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

use crate::node::{Element, Node};
use crate::search;
use crate::{DEFAULT_SEARCH_DEPTH, INNER_TEXT};

/// Errors from parsing an envelope.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The document is not well-formed XML.
    #[error("malformed XML: {0}")]
    Syntax(String),

    /// The document has no root element.
    #[error("document has no root element")]
    Empty,
}

/// A parsed envelope.
///
/// The root is a mapping from the (prefix-stripped) document element name to
/// its node, so a search at depth 1 inspects exactly that mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEnvelope {
    root: Node,
}

impl ParsedEnvelope {
    /// Parse a raw XML document.
    pub fn parse(document: &str) -> Result<Self, ParseError> {
        let mut reader = Reader::from_str(document);
        reader.config_mut().trim_text(false);

        let mut stack: Vec<OpenElement> = Vec::new();
        let mut root: Option<Node> = None;
        let mut root_name = String::new();

        loop {
            let event = reader.read_event().map_err(|e| {
                ParseError::Syntax(format!(
                    "{} at position {}",
                    e,
                    reader.buffer_position()
                ))
            })?;

            match event {
                Event::Start(start) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(ParseError::Syntax("multiple root elements".into()));
                    }
                    stack.push(OpenElement::from_start(&start)?);
                }
                Event::Empty(start) => {
                    if root.is_some() && stack.is_empty() {
                        return Err(ParseError::Syntax("multiple root elements".into()));
                    }
                    let element = OpenElement::from_start(&start)?;
                    close(element, &mut stack, &mut root, &mut root_name);
                }
                Event::End(_) => match stack.pop() {
                    Some(element) => close(element, &mut stack, &mut root, &mut root_name),
                    None => return Err(ParseError::Syntax("unexpected closing tag".into())),
                },
                Event::Text(text) => {
                    let text = text
                        .unescape()
                        .map_err(|e| ParseError::Syntax(e.to_string()))?;
                    match stack.last_mut() {
                        Some(open) => open.text.push_str(&text),
                        None if text.trim().is_empty() => {}
                        None => {
                            return Err(ParseError::Syntax(
                                "text outside of root element".into(),
                            ))
                        }
                    }
                }
                Event::CData(cdata) => {
                    let bytes = cdata.into_inner();
                    let text = std::str::from_utf8(&bytes)
                        .map_err(|e| ParseError::Syntax(e.to_string()))?;
                    match stack.last_mut() {
                        Some(open) => {
                            open.text.push_str(text);
                            open.has_cdata = true;
                        }
                        None => {
                            return Err(ParseError::Syntax(
                                "CDATA outside of root element".into(),
                            ))
                        }
                    }
                }
                Event::Eof => break,
                // Declarations, comments, processing instructions and doctypes
                // carry nothing the tree exposes.
                _ => {}
            }
        }

        if let Some(open) = stack.last() {
            return Err(ParseError::Syntax(format!(
                "unclosed element <{}>",
                open.name
            )));
        }

        let node = root.ok_or(ParseError::Empty)?;
        let mut element = Element::new();
        element.insert(root_name, node);

        Ok(Self {
            root: Node::Element(element),
        })
    }

    /// The root mapping.
    #[must_use]
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// All values stored under `key` within `max_depth` levels, in document
    /// order.
    ///
    /// Depth is consumed before a node is inspected: `max_depth == 0` returns
    /// nothing and `max_depth == 1` inspects only the root mapping.
    #[must_use]
    pub fn find_all(&self, key: &str, max_depth: usize) -> Vec<&Node> {
        search::find_all(&self.root, key, max_depth)
    }

    /// [`ParsedEnvelope::find_all`] with [`DEFAULT_SEARCH_DEPTH`].
    #[must_use]
    pub fn find(&self, key: &str) -> Vec<&Node> {
        self.find_all(key, DEFAULT_SEARCH_DEPTH)
    }

    /// The tree as JSON, for diagnostics.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&self.root).unwrap_or_default()
    }
}

/// An element whose closing tag has not been read yet.
struct OpenElement {
    name: String,
    element: Element,
    text: String,
    has_cdata: bool,
}

impl OpenElement {
    fn from_start(start: &BytesStart<'_>) -> Result<Self, ParseError> {
        let name = local_name(start.name().as_ref())?;
        let mut element = Element::new();

        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| ParseError::Syntax(e.to_string()))?;
            let key = local_name(attribute.key.as_ref())?;
            let value = attribute
                .unescape_value()
                .map_err(|e| ParseError::Syntax(e.to_string()))?;
            element.insert(key, Node::Text(value.into_owned()));
        }

        Ok(Self {
            name,
            element,
            text: String::new(),
            has_cdata: false,
        })
    }

    fn into_node(self) -> Node {
        let OpenElement {
            mut element,
            text,
            has_cdata,
            ..
        } = self;

        let blank = text.trim().is_empty() && !has_cdata;
        if element.is_empty() {
            return Node::Text(text);
        }
        if !blank {
            element.insert(INNER_TEXT.to_string(), Node::Text(text));
        }
        if element.len() == 1 && element.contains_key(INNER_TEXT) {
            if let Some(text) = element.remove(INNER_TEXT) {
                return text;
            }
        }
        Node::Element(element)
    }
}

/// Attach a finished element to its parent, or make it the document root.
fn close(
    open: OpenElement,
    stack: &mut [OpenElement],
    root: &mut Option<Node>,
    root_name: &mut String,
) {
    let name = open.name.clone();
    let node = open.into_node();
    match stack.last_mut() {
        Some(parent) => parent.element.insert(name, node),
        None => {
            *root_name = name;
            *root = Some(node);
        }
    }
}

/// Strip a namespace prefix: `eb:Action` becomes `Action`.
fn local_name(raw: &[u8]) -> Result<String, ParseError> {
    let name = std::str::from_utf8(raw).map_err(|e| ParseError::Syntax(e.to_string()))?;
    Ok(match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.to_string(),
    })
}
