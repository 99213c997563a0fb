//! Owned XML element tree with resolved namespaces.
//!
//! Signature verification and claim extraction read the same tree, so the
//! element whose signature was checked is the element the claims come from.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;

use crate::error::{StepUpError, StepUpResult};

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Deepest element nesting `parse` accepts. SAML responses stay far below it.
pub const MAX_DEPTH: usize = 128;

/// An XML element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    /// Prefix as written in the document.
    pub prefix: Option<String>,
    /// Local name.
    pub local: String,
    /// Resolved namespace URI (empty when unqualified).
    pub ns: String,
    /// Attributes, excluding namespace declarations.
    pub attributes: Vec<Attribute>,
    /// Child nodes in document order.
    pub children: Vec<Node>,
}

/// An attribute with its resolved namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub prefix: Option<String>,
    pub local: String,
    pub ns: String,
    pub value: String,
}

/// A child node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
}

/// Parse a document into its root element.
///
/// Comments, processing instructions and the XML declaration are dropped.
/// Documents with a DOCTYPE, or nested deeper than [`MAX_DEPTH`], are
/// refused.
pub fn parse(xml: &str) -> StepUpResult<Element> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut stack: Vec<Element> = Vec::new();
    let mut scopes: Vec<HashMap<String, String>> = vec![HashMap::new()];
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(StepUpError::Xml("document nested too deeply".to_string()));
                }
                let (element, scope) = open_element(&e, current_scope(&scopes))?;
                scopes.push(scope);
                stack.push(element);
            }
            Ok(Event::Empty(e)) => {
                if stack.len() >= MAX_DEPTH {
                    return Err(StepUpError::Xml("document nested too deeply".to_string()));
                }
                let (element, _) = open_element(&e, current_scope(&scopes))?;
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| StepUpError::Xml("unexpected end tag".to_string()))?;
                scopes.pop();
                attach(&mut stack, &mut root, element)?;
            }
            Ok(Event::Text(e)) => {
                let raw = std::str::from_utf8(&e)
                    .map_err(|e| StepUpError::Xml(format!("invalid UTF-8: {}", e)))?;
                let normalized = normalize_line_endings(raw);
                let text = quick_xml::escape::unescape(&normalized)
                    .map_err(|e| StepUpError::Xml(format!("bad text escape: {}", e)))?;
                push_text(&mut stack, &text)?;
            }
            Ok(Event::CData(e)) => {
                let text = std::str::from_utf8(&e)
                    .map_err(|e| StepUpError::Xml(format!("invalid UTF-8: {}", e)))?;
                push_text(&mut stack, &normalize_line_endings(text))?;
            }
            Ok(Event::DocType(_)) => {
                return Err(StepUpError::Xml("DOCTYPE is not allowed".to_string()));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(StepUpError::Xml(format!("XML parse error: {}", e))),
        }
    }

    if !stack.is_empty() {
        return Err(StepUpError::Xml("unclosed element at end of document".to_string()));
    }

    root.ok_or_else(|| StepUpError::Xml("document has no root element".to_string()))
}

fn current_scope(scopes: &[HashMap<String, String>]) -> &HashMap<String, String> {
    // The stack always starts with the empty document scope.
    &scopes[scopes.len() - 1]
}

fn open_element(
    start: &BytesStart<'_>,
    parent_scope: &HashMap<String, String>,
) -> StepUpResult<(Element, HashMap<String, String>)> {
    let mut scope = parent_scope.clone();
    let mut raw_attributes = Vec::new();

    for attr in start.attributes() {
        let attr = attr.map_err(|e| StepUpError::Xml(format!("attribute error: {}", e)))?;
        let key = std::str::from_utf8(attr.key.as_ref())
            .map_err(|e| StepUpError::Xml(format!("invalid UTF-8 in attribute: {}", e)))?
            .to_string();
        let raw = std::str::from_utf8(&attr.value)
            .map_err(|e| StepUpError::Xml(format!("invalid UTF-8 in attribute: {}", e)))?;
        // Attribute value normalization: each literal line end, tab or
        // newline becomes one space.
        let normalized = normalize_line_endings(raw).replace(['\t', '\n'], " ");
        let value = quick_xml::escape::unescape(&normalized)
            .map_err(|e| StepUpError::Xml(format!("bad attribute escape: {}", e)))?
            .into_owned();

        if key == "xmlns" {
            scope.insert(String::new(), value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            scope.insert(prefix.to_string(), value);
        } else {
            raw_attributes.push((key, value));
        }
    }

    let name = std::str::from_utf8(start.name().as_ref())
        .map_err(|e| StepUpError::Xml(format!("invalid UTF-8 in element name: {}", e)))?
        .to_string();
    let (prefix, local) = split_qname(&name);
    let ns = resolve(&scope, prefix.as_deref(), true)?;

    let mut attributes = Vec::with_capacity(raw_attributes.len());
    for (key, value) in raw_attributes {
        let (prefix, local) = split_qname(&key);
        // Unprefixed attributes are never in the default namespace.
        let ns = match prefix.as_deref() {
            Some(_) => resolve(&scope, prefix.as_deref(), false)?,
            None => String::new(),
        };
        attributes.push(Attribute {
            prefix,
            local,
            ns,
            value,
        });
    }

    Ok((
        Element {
            prefix,
            local,
            ns,
            attributes,
            children: Vec::new(),
        },
        scope,
    ))
}

fn resolve(
    scope: &HashMap<String, String>,
    prefix: Option<&str>,
    use_default: bool,
) -> StepUpResult<String> {
    match prefix {
        Some("xml") => Ok(XML_NS.to_string()),
        Some(p) => scope
            .get(p)
            .cloned()
            .ok_or_else(|| StepUpError::Xml(format!("unbound namespace prefix '{}'", p))),
        None if use_default => Ok(scope.get("").cloned().unwrap_or_default()),
        None => Ok(String::new()),
    }
}

fn split_qname(name: &str) -> (Option<String>, String) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.to_string()),
    }
}

fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    element: Element,
) -> StepUpResult<()> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Element(element));
        return Ok(());
    }
    if root.is_some() {
        return Err(StepUpError::Xml("document has more than one root element".to_string()));
    }
    *root = Some(element);
    Ok(())
}

fn push_text(stack: &mut [Element], text: &str) -> StepUpResult<()> {
    match stack.last_mut() {
        Some(parent) => {
            if let Some(Node::Text(existing)) = parent.children.last_mut() {
                existing.push_str(text);
            } else {
                parent.children.push(Node::Text(text.to_string()));
            }
            Ok(())
        }
        None if text.trim().is_empty() => Ok(()),
        None => Err(StepUpError::Xml("text outside the root element".to_string())),
    }
}

impl Element {
    /// Qualified name as written.
    pub fn qname(&self) -> String {
        match self.prefix {
            Some(ref p) => format!("{}:{}", p, self.local),
            None => self.local.clone(),
        }
    }

    /// Whether this element has the given namespace and local name.
    pub fn is(&self, ns: &str, local: &str) -> bool {
        self.ns == ns && self.local == local
    }

    /// Value of an unqualified attribute.
    pub fn attr(&self, local: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.ns.is_empty() && a.local == local)
            .map(|a| a.value.as_str())
    }

    /// Child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// First child element with the given name.
    pub fn child(&self, ns: &str, local: &str) -> Option<&Element> {
        self.elements().find(|e| e.is(ns, local))
    }

    /// All child elements with the given name.
    pub fn children_named<'a>(
        &'a self,
        ns: &'a str,
        local: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.elements().filter(move |e| e.is(ns, local))
    }

    /// Concatenated text content of this element and its descendants.
    pub fn text(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for node in &self.children {
            match node {
                Node::Text(t) => out.push_str(t),
                Node::Element(e) => e.collect_text(out),
            }
        }
    }

    /// Number of elements in this subtree carrying `ID="id"`.
    pub fn count_id(&self, id: &str) -> usize {
        let own = usize::from(self.attr("ID") == Some(id));
        own + self.elements().map(|e| e.count_id(id)).sum::<usize>()
    }

    /// First element in this subtree (depth first) carrying `ID="id"`.
    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.attr("ID") == Some(id) {
            return Some(self);
        }
        self.elements().find_map(|e| e.find_by_id(id))
    }
}
