//! The `Node` tree carried by binary frames.

use std::fmt;

/// Content of a node.
///
/// Equality is wire equality: a `Text` and a `Bytes` holding the same octets
/// compare equal, because the writer emits raw text as a byte blob and the
/// reader hands byte blobs back uninterpreted.
#[derive(Debug, Clone, Default)]
pub enum NodeContent {
    #[default]
    None,
    Text(String),
    Bytes(Vec<u8>),
    Nodes(Vec<Node>),
}

impl PartialEq for NodeContent {
    fn eq(&self, other: &Self) -> bool {
        use NodeContent::*;
        match (self, other) {
            (None, None) => true,
            (Text(a), Text(b)) => a == b,
            (Bytes(a), Bytes(b)) => a == b,
            (Text(a), Bytes(b)) | (Bytes(b), Text(a)) => a.as_bytes() == b.as_slice(),
            (Nodes(a), Nodes(b)) => a == b,
            _ => false,
        }
    }
}

impl NodeContent {
    pub fn is_none(&self) -> bool {
        matches!(self, NodeContent::None)
    }
}

/// One element of the protocol tree: `[description, attributes, content]`.
///
/// Attribute keys are unique; order is insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Node {
    pub tag: String,
    attrs: Vec<(String, String)>,
    pub content: NodeContent,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            content: NodeContent::None,
        }
    }

    /// Set an attribute, replacing an existing value for the same key in place.
    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(key, value);
        self
    }

    /// Set an attribute only when `value` is present.
    pub fn with_attr_opt(self, key: impl Into<String>, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.with_attr(key, v),
            None => self,
        }
    }

    pub fn with_content(mut self, content: NodeContent) -> Self {
        self.content = content;
        self
    }

    pub fn with_children(self, children: Vec<Node>) -> Self {
        self.with_content(NodeContent::Nodes(children))
    }

    pub fn set_attr(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((key, value)),
        }
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn attrs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn attr_count(&self) -> usize {
        self.attrs.len()
    }

    /// Child nodes, or an empty slice for any other content shape.
    pub fn children(&self) -> &[Node] {
        match &self.content {
            NodeContent::Nodes(children) => children,
            _ => &[],
        }
    }

    /// Raw content bytes of a text or blob node.
    pub fn content_bytes(&self) -> Option<&[u8]> {
        match &self.content {
            NodeContent::Bytes(b) => Some(b),
            NodeContent::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Content as text, if it is text or a UTF-8 blob.
    pub fn content_str(&self) -> Option<&str> {
        match &self.content {
            NodeContent::Text(s) => Some(s),
            NodeContent::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Number of entries in the node's list header: description, two per
    /// attribute and one for content.
    pub(crate) fn list_size(&self) -> usize {
        1 + 2 * self.attrs.len() + usize::from(!self.content.is_none())
    }

    pub(crate) fn from_parts(
        tag: String,
        attrs: Vec<(String, String)>,
        content: NodeContent,
    ) -> Self {
        Self {
            tag,
            attrs,
            content,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.tag)?;
        for (k, v) in &self.attrs {
            write!(f, " {k}=\"{v}\"")?;
        }
        match &self.content {
            NodeContent::None => write!(f, "/>"),
            NodeContent::Text(s) => write!(f, ">{s}</{}>", self.tag),
            NodeContent::Bytes(b) => write!(f, ">[{} bytes]</{}>", b.len(), self.tag),
            NodeContent::Nodes(children) => {
                write!(f, ">")?;
                for child in children {
                    write!(f, "{child}")?;
                }
                write!(f, "</{}>", self.tag)
            }
        }
    }
}
