//! Exclusive XML Canonicalization 1.0, without comments.
//!
//! Works on the resolved tree, so the namespaces an element visibly uses are
//! known without walking its ancestors.

use std::collections::BTreeMap;

use super::tree::{Element, Node};

/// Canonicalize `element` as the apex of a document subset.
///
/// `omit` names one descendant (the enveloped signature) left out of the
/// output together with its subtree.
pub fn canonicalize(element: &Element, omit: Option<&Element>) -> String {
    let mut out = String::new();
    write_element(&mut out, element, &BTreeMap::new(), omit);
    out
}

fn write_element(
    out: &mut String,
    element: &Element,
    rendered: &BTreeMap<String, String>,
    omit: Option<&Element>,
) {
    // Visibly utilized namespaces; "" is the default namespace.
    let mut utilized: BTreeMap<String, String> = BTreeMap::new();
    utilized.insert(
        element.prefix.clone().unwrap_or_default(),
        element.ns.clone(),
    );
    for attr in &element.attributes {
        if let Some(ref prefix) = attr.prefix {
            if prefix != "xml" {
                utilized.insert(prefix.clone(), attr.ns.clone());
            }
        }
    }

    let mut in_output = rendered.clone();
    let qname = element.qname();
    out.push('<');
    out.push_str(&qname);

    for (prefix, uri) in &utilized {
        let current = rendered.get(prefix);
        let needed = match current {
            Some(existing) => existing != uri,
            // An empty default namespace needs no declaration at the apex.
            None => !(prefix.is_empty() && uri.is_empty()),
        };
        if !needed {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attribute(uri));
        out.push('"');
        in_output.insert(prefix.clone(), uri.clone());
    }

    let mut attributes: Vec<_> = element.attributes.iter().collect();
    attributes.sort_by(|a, b| (&a.ns, &a.local).cmp(&(&b.ns, &b.local)));
    for attr in attributes {
        out.push(' ');
        if let Some(ref prefix) = attr.prefix {
            out.push_str(prefix);
            out.push(':');
        }
        out.push_str(&attr.local);
        out.push_str("=\"");
        out.push_str(&escape_attribute(&attr.value));
        out.push('"');
    }
    out.push('>');

    for node in &element.children {
        match node {
            Node::Text(text) => out.push_str(&escape_text(text)),
            Node::Element(child) => {
                if omit.is_some_and(|o| std::ptr::eq(o, child)) {
                    continue;
                }
                write_element(out, child, &in_output, omit);
            }
        }
    }

    out.push_str("</");
    out.push_str(&qname);
    out.push('>');
}

fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_attribute(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmldsig::tree::parse;

    #[test]
    fn test_attributes_sorted_and_empty_elements_expanded() {
        let root = parse(r#"<root b="2" a="1"><child/></root>"#).unwrap();
        assert_eq!(
            canonicalize(&root, None),
            r#"<root a="1" b="2"><child></child></root>"#
        );
    }

    #[test]
    fn test_only_utilized_namespaces_rendered() {
        let xml = r#"<p:a xmlns:p="urn:p" xmlns:q="urn:q" xmlns:unused="urn:u"><q:b>t</q:b><p:c/></p:a>"#;
        let root = parse(xml).unwrap();
        assert_eq!(
            canonicalize(&root, None),
            r#"<p:a xmlns:p="urn:p"><q:b xmlns:q="urn:q">t</q:b><p:c></p:c></p:a>"#
        );
    }

    #[test]
    fn test_subset_renders_inherited_namespace() {
        let xml = r#"<p:a xmlns:p="urn:p"><p:b ID="x">v</p:b></p:a>"#;
        let root = parse(xml).unwrap();
        let inner = root.find_by_id("x").unwrap();
        assert_eq!(
            canonicalize(inner, None),
            r#"<p:b xmlns:p="urn:p" ID="x">v</p:b>"#
        );
    }

    #[test]
    fn test_omit_subtree() {
        let root = parse(r#"<a><b/><sig><x/></sig><c/></a>"#).unwrap();
        let sig = root.child("", "sig").unwrap();
        assert_eq!(canonicalize(&root, Some(sig)), "<a><b></b><c></c></a>");
    }

    #[test]
    fn test_escaping() {
        let root = parse("<a v=\"&quot;&amp;&lt;&#9;\">&lt;&amp;&gt;\"</a>").unwrap();
        assert_eq!(
            canonicalize(&root, None),
            "<a v=\"&quot;&amp;&lt;&#x9;\">&lt;&amp;&gt;\"</a>"
        );
    }

    #[test]
    fn test_default_namespace_undeclared_when_changed() {
        let root = parse(r#"<a xmlns="urn:d"><b xmlns=""/></a>"#).unwrap();
        assert_eq!(
            canonicalize(&root, None),
            r#"<a xmlns="urn:d"><b xmlns=""></b></a>"#
        );
    }

    #[test]
    fn test_canonical_form_is_stable() {
        let xml = r#"<p:a xmlns:p="urn:p"  z="1"
            y="2"><p:b/>  </p:a>"#;
        let first = canonicalize(&parse(xml).unwrap(), None);
        let second = canonicalize(&parse(&first).unwrap(), None);
        assert_eq!(first, second);
    }
}
