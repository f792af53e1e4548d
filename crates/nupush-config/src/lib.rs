//! Registry configuration (`nuget.config`) handling for nupush.
//!
//! This crate parses an existing configuration document into an ordered
//! element tree, merges a registry source and its credentials into it
//! without disturbing unrelated entries, and re-serializes the result
//! deterministically. The merge is additive-idempotent: running it twice
//! with identical inputs produces identical output.
//!
//! # Example
//!
//! ```
//! use nupush_config::merge;
//! use nupush_types::{Credentials, RegistryEndpoint};
//!
//! let endpoint = RegistryEndpoint::derive(Some("acme"), None);
//! let credentials = Credentials {
//!     username: "octocat".to_string(),
//!     password: "t0ken".to_string(),
//! };
//!
//! let rendered = merge(None, &endpoint, &credentials).expect("merge");
//! assert!(rendered.contains("packageSourceCredentials"));
//! ```

use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use nupush_types::{Credentials, PublishError, RegistryEndpoint};

/// Default configuration file name
pub const CONFIG_FILE: &str = "nuget.config";

/// Get the configuration file path for a directory
pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// A node in the configuration document tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A nested element
    Element(Element),
    /// Non-blank character data
    Text(String),
    /// A comment, preserved verbatim
    Comment(String),
}

/// An element with ordered attributes and children. Attribute and child
/// order is preserved across a parse/render round trip; indentation
/// whitespace is normalized on rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Element name
    pub name: String,
    /// Attributes in document order
    pub attributes: Vec<(String, String)>,
    /// Child nodes in document order
    pub children: Vec<Node>,
}

impl Element {
    /// Create an empty element.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Create an element with the given attributes.
    pub fn with_attrs<'a>(
        name: &str,
        attrs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Self {
        Self {
            name: name.to_string(),
            attributes: attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            children: Vec::new(),
        }
    }

    /// Create an element whose only child is a text node.
    pub fn with_text(name: &str, text: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: Vec::new(),
            children: vec![Node::Text(text.to_string())],
        }
    }

    /// Value of the named attribute, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set (or append) an attribute value.
    pub fn set_attr(&mut self, name: &str, value: &str) {
        if let Some(slot) = self.attributes.iter_mut().find(|(k, _)| k == name) {
            slot.1 = value.to_string();
        } else {
            self.attributes.push((name.to_string(), value.to_string()));
        }
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find_map(|n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }

    /// First child element with the given name, creating it at the end
    /// of the child list when absent.
    pub fn ensure_child(&mut self, name: &str) -> &mut Element {
        let idx = self
            .children
            .iter()
            .position(|n| matches!(n, Node::Element(e) if e.name == name));
        let idx = match idx {
            Some(idx) => idx,
            None => {
                self.children.push(Node::Element(Element::new(name)));
                self.children.len() - 1
            }
        };
        match &mut self.children[idx] {
            Node::Element(e) => e,
            _ => unreachable!("index points at an element"),
        }
    }

    /// Child elements with the given name.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> {
        self.children.iter().filter_map(move |n| match n {
            Node::Element(e) if e.name == name => Some(e),
            _ => None,
        })
    }
}

/// A parsed configuration document: comments that precede the root
/// element, then the root element itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Comments before the root element
    pub preamble: Vec<Node>,
    /// The root element
    pub root: Element,
}

fn config_parse(detail: impl std::fmt::Display) -> PublishError {
    PublishError::ConfigParse {
        detail: detail.to_string(),
    }
}

fn render_failure(detail: impl std::fmt::Display) -> PublishError {
    PublishError::Io(std::io::Error::other(detail.to_string()))
}

fn element_from(e: &BytesStart<'_>) -> Result<Element, PublishError> {
    let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
    let mut attributes = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(config_parse)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).to_string();
        let value = attr.unescape_value().map_err(config_parse)?.to_string();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        children: Vec::new(),
    })
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, node: Node) -> Result<(), PublishError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        return Ok(());
    }
    match node {
        Node::Element(e) => {
            if root.is_some() {
                return Err(config_parse("multiple root elements"));
            }
            *root = Some(e);
            Ok(())
        }
        // Whitespace-only text never reaches here; anything else outside
        // the root element is malformed.
        Node::Text(text) => Err(config_parse(format!(
            "unexpected text outside the root element: {text:?}"
        ))),
        Node::Comment(_) => Ok(()),
    }
}

/// Parse a configuration document. Fails with
/// [`PublishError::ConfigParse`] on malformed input; the caller never
/// regenerates over an unparseable document.
pub fn parse_document(xml: &str) -> Result<Document, PublishError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;
    let mut preamble: Vec<Node> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => stack.push(element_from(&e)?),
            Ok(Event::Empty(e)) => {
                attach(&mut stack, &mut root, Node::Element(element_from(&e)?))?;
            }
            Ok(Event::End(_)) => {
                let done = stack.pop().ok_or_else(|| config_parse("unbalanced end tag"))?;
                attach(&mut stack, &mut root, Node::Element(done))?;
            }
            Ok(Event::Text(t)) => {
                let text = t.xml_content().map_err(config_parse)?.to_string();
                if !text.trim().is_empty() {
                    attach(&mut stack, &mut root, Node::Text(text.trim().to_string()))?;
                }
            }
            Ok(Event::CData(t)) => {
                let text = String::from_utf8_lossy(t.as_ref()).to_string();
                if !text.trim().is_empty() {
                    attach(&mut stack, &mut root, Node::Text(text))?;
                }
            }
            Ok(Event::Comment(c)) => {
                let comment = Node::Comment(String::from_utf8_lossy(c.as_ref()).to_string());
                if stack.is_empty() && root.is_none() {
                    preamble.push(comment);
                } else {
                    attach(&mut stack, &mut root, comment)?;
                }
            }
            Ok(Event::Eof) => break,
            // Declarations, processing instructions, doctypes.
            Ok(_) => {}
            Err(e) => return Err(config_parse(e)),
        }
    }

    if !stack.is_empty() {
        return Err(config_parse("unclosed element"));
    }

    match root {
        Some(root) => Ok(Document { preamble, root }),
        None => Err(config_parse("no root element")),
    }
}

fn write_node<W: std::io::Write>(writer: &mut Writer<W>, node: &Node) -> Result<(), PublishError> {
    match node {
        Node::Element(e) => write_element_into(writer, e),
        Node::Text(t) => writer
            .write_event(Event::Text(BytesText::new(t)))
            .map_err(render_failure),
        Node::Comment(c) => writer
            .write_event(Event::Comment(BytesText::from_escaped(c.as_str())))
            .map_err(render_failure),
    }
}

fn write_element_into<W: std::io::Write>(
    writer: &mut Writer<W>,
    elem: &Element,
) -> Result<(), PublishError> {
    let mut start = BytesStart::new(elem.name.as_str());
    for (key, value) in &elem.attributes {
        start.push_attribute((key.as_str(), value.as_str()));
    }

    if elem.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(render_failure);
    }

    writer.write_event(Event::Start(start)).map_err(render_failure)?;
    for child in &elem.children {
        write_node(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(elem.name.as_str())))
        .map_err(render_failure)
}

/// Render an element tree as a standalone document with a declaration,
/// two-space indentation, and a trailing newline.
pub fn render_element(root: &Element) -> Result<String, PublishError> {
    render_document(&Document {
        preamble: Vec::new(),
        root: root.clone(),
    })
}

/// Render a parsed document. The output re-parses to an equivalent tree.
pub fn render_document(doc: &Document) -> Result<String, PublishError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
        .map_err(render_failure)?;
    for node in &doc.preamble {
        write_node(&mut writer, node)?;
    }
    write_element_into(&mut writer, &doc.root)?;

    let mut rendered =
        String::from_utf8(writer.into_inner()).map_err(render_failure)?;
    rendered.push('\n');
    Ok(rendered)
}

fn skeleton() -> Document {
    let mut root = Element::new("configuration");
    root.children.push(Node::Element(Element::new("packageSources")));
    root.children
        .push(Node::Element(Element::new("packageSourceCredentials")));
    Document {
        preamble: Vec::new(),
        root,
    }
}

fn set_add_value(entry: &mut Element, key: &str, value: &str) {
    for child in entry.children.iter_mut() {
        if let Node::Element(e) = child
            && e.name == "add"
            && e.attr("key") == Some(key)
        {
            e.set_attr("value", value);
            return;
        }
    }
    entry
        .children
        .push(Node::Element(Element::with_attrs("add", [("key", key), ("value", value)])));
}

/// Merge a registry source and its credentials into an existing
/// configuration document (or a fresh skeleton when `existing` is absent
/// or blank) and return the rendered result.
///
/// Sources are deduplicated by URL *value*: when the endpoint's index URL
/// already has a source entry, that entry's key — whatever it is — is
/// adopted for the credential lookup and no source is added. Credential
/// entries are updated in place; sibling entries under the same key are
/// left untouched, as is everything unrelated in the document.
///
/// The file is read-then-rewritten without a lock; exactly one
/// invocation per working directory is assumed.
pub fn merge(
    existing: Option<&str>,
    endpoint: &RegistryEndpoint,
    credentials: &Credentials,
) -> Result<String, PublishError> {
    let mut doc = match existing.map(str::trim).filter(|s| !s.is_empty()) {
        Some(xml) => parse_document(xml)?,
        None => skeleton(),
    };

    if doc.root.name != "configuration" {
        return Err(config_parse(format!(
            "expected <configuration> root, found <{}>",
            doc.root.name
        )));
    }

    let sources = doc.root.ensure_child("packageSources");
    let existing_key = sources.children_named("add").find_map(|e| {
        (e.attr("value") == Some(endpoint.server_index_url.as_str()))
            .then(|| e.attr("key").unwrap_or(&endpoint.source_name).to_string())
    });
    let key = match existing_key {
        Some(key) => key,
        None => {
            sources.children.push(Node::Element(Element::with_attrs(
                "add",
                [
                    ("key", endpoint.source_name.as_str()),
                    ("value", endpoint.server_index_url.as_str()),
                ],
            )));
            endpoint.source_name.clone()
        }
    };

    let entry = doc
        .root
        .ensure_child("packageSourceCredentials")
        .ensure_child(&key);
    set_add_value(entry, "Username", &credentials.username);
    set_add_value(entry, "ClearTextPassword", &credentials.password);

    render_document(&doc)
}

/// Read an existing configuration file, treating a missing or blank file
/// as absent.
pub fn read_existing(path: &Path) -> Result<Option<String>, PublishError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(path)?;
    let trimmed = content.trim();
    Ok(if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    })
}
