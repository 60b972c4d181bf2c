use std::collections::HashSet;
use std::fmt::Write as _;

use scraper::{ElementRef, Html};
use serde_json::Value;
use sxd_document::dom::{self, ChildOfElement, ChildOfRoot, Document};
use sxd_document::Package;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{Context, Value as XPathValue, XPath};

use super::css::ElementIndex;
use super::{ExtractionError, ExtractionResult};
use crate::schema::{build_xpath, CssTarget, ExtractionRule, RuleKind};

/// A parsed HTML or XML document ready for node selection.
///
/// XPath always runs on an `sxd-document` tree. For HTML that tree mirrors
/// the html5ever parse kept in `html`, element for element in document order,
/// so nodes picked by a `scraper` selector can be located in the mirror.
pub struct MarkupDocument {
    html: Option<Html>,
    package: Package,
}

impl MarkupDocument {
    #[must_use]
    pub fn parse_html(body: &str) -> Self {
        let html = Html::parse_document(body);
        let package = Package::new();
        {
            let doc = package.as_document();
            let root = mirror_element(&doc, html.root_element());
            doc.root().append_child(root);
        }
        Self {
            html: Some(html),
            package,
        }
    }

    pub fn parse_xml(body: &str) -> ExtractionResult<Self> {
        let package = sxd_document::parser::parse(body).map_err(|e| ExtractionError::Parse {
            doc_type: "xml",
            reason: format!("{e:?}"),
        })?;
        Ok(Self {
            html: None,
            package,
        })
    }

    /// Selects the rule's node set and evaluates its value expression on
    /// every selected node. The value expression is compiled once per call.
    pub fn resolve(&self, rule: &ExtractionRule) -> ExtractionResult<Vec<Value>> {
        let doc = self.package.as_document();
        let context = Context::new();
        let nodes = self.select(&doc, &context, rule)?;
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let value = compile(&rule.name, &rule.value)?;
        let mut values = Vec::with_capacity(nodes.len());
        for node in nodes {
            let result = evaluate(&rule.name, &value, &context, node)?;
            values.push(Value::String(stringify(result)));
        }
        Ok(values)
    }

    fn select<'d>(
        &self,
        doc: &Document<'d>,
        context: &Context<'d>,
        rule: &ExtractionRule,
    ) -> ExtractionResult<Vec<Node<'d>>> {
        let xpath = match &rule.kind {
            RuleKind::Css {
                target: CssTarget::Html(selector),
                ..
            } => {
                let html = self.html.as_ref().ok_or_else(|| ExtractionError::ExtractionType {
                    field: rule.name.clone(),
                    reason: "HTML selector applied to an XML document".to_string(),
                })?;
                return Ok(self.select_html(doc, html, selector));
            }
            RuleKind::Css {
                target: CssTarget::Xml(selectors),
                ..
            } => {
                let index = ElementIndex::new(doc);
                return Ok(index.select(selectors).into_iter().map(Node::Element).collect());
            }
            RuleKind::XPath(xpath) => compile(&rule.name, xpath)?,
            other => {
                return Err(ExtractionError::ExtractionType {
                    field: rule.name.clone(),
                    reason: format!("\"{}\" rules do not apply to markup documents", other.as_str()),
                })
            }
        };

        match evaluate(&rule.name, &xpath, context, doc.root())? {
            XPathValue::Nodeset(nodes) => Ok(nodes.document_order()),
            _ => Err(ExtractionError::ExtractionType {
                field: rule.name.clone(),
                reason: "the result of HTML/XML extraction was not a node set".to_string(),
            }),
        }
    }

    fn select_html<'d>(
        &self,
        doc: &Document<'d>,
        html: &Html,
        selector: &scraper::Selector,
    ) -> Vec<Node<'d>> {
        let selected: HashSet<_> = html.select(selector).map(|el| el.id()).collect();
        if selected.is_empty() {
            return Vec::new();
        }

        let mirrored = ElementIndex::new(doc);
        html.root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .zip(mirrored.elements())
            .filter(|(source, _)| selected.contains(&source.id()))
            .map(|(_, element)| Node::Element(*element))
            .collect()
    }
}

fn mirror_element<'d>(doc: &Document<'d>, source: ElementRef<'_>) -> dom::Element<'d> {
    let target = doc.create_element(source.value().name());
    for (name, value) in source.value().attrs() {
        target.set_attribute_value(name, value);
    }
    for child in source.children() {
        if let Some(element) = ElementRef::wrap(child) {
            target.append_child(mirror_element(doc, element));
        } else if let Some(text) = child.value().as_text() {
            target.append_child(doc.create_text(text));
        }
    }
    target
}

fn compile(field: &str, expression: &str) -> ExtractionResult<XPath> {
    build_xpath(expression).map_err(|e| ExtractionError::Evaluation {
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn evaluate<'d>(
    field: &str,
    xpath: &XPath,
    context: &Context<'d>,
    node: impl Into<Node<'d>>,
) -> ExtractionResult<XPathValue<'d>> {
    xpath
        .evaluate(context, node)
        .map_err(|e| ExtractionError::Evaluation {
            field: field.to_string(),
            reason: e.to_string(),
        })
}

/// Numbers come back from XPath as floats; integral ones print as integers.
fn stringify(value: XPathValue<'_>) -> String {
    match value {
        XPathValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
            format!("{}", n as i64)
        }
        XPathValue::Number(n) => n.to_string(),
        XPathValue::Boolean(b) => b.to_string(),
        XPathValue::String(s) => s,
        XPathValue::Nodeset(nodes) => nodes.document_order().into_iter().map(node_text).collect(),
    }
}

/// Text and attribute nodes yield their raw value; elements are serialised.
fn node_text(node: Node<'_>) -> String {
    match node {
        Node::Element(element) => {
            let mut out = String::new();
            write_element(element, &mut out);
            out
        }
        Node::Attribute(attribute) => attribute.value().to_string(),
        Node::Text(text) => text.text().to_string(),
        Node::Root(root) => {
            let mut out = String::new();
            for child in root.children() {
                if let ChildOfRoot::Element(element) = child {
                    write_element(element, &mut out);
                }
            }
            out
        }
        other => other.string_value(),
    }
}

fn write_element(element: dom::Element<'_>, out: &mut String) {
    let name = element.name().local_part();
    let _ = write!(out, "<{name}");
    for attribute in element.attributes() {
        let _ = write!(
            out,
            " {}=\"{}\"",
            attribute.name().local_part(),
            escape(attribute.value(), true)
        );
    }

    let children = element.children();
    if children.is_empty() {
        out.push_str("/>");
        return;
    }

    out.push('>');
    for child in children {
        match child {
            ChildOfElement::Element(el) => write_element(el, out),
            ChildOfElement::Text(text) => out.push_str(&escape(text.text(), false)),
            ChildOfElement::Comment(comment) => {
                let _ = write!(out, "<!--{}-->", comment.text());
            }
            ChildOfElement::ProcessingInstruction(_) => {}
        }
    }
    let _ = write!(out, "</{name}>");
}

fn escape(text: &str, attribute: bool) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' if attribute => escaped.push_str("&quot;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DocumentType, ExtractionSchema};
    use serde_json::json;

    fn rule(doc_type: DocumentType, definition: Value) -> ExtractionRule {
        let extract = json!({ "field": definition });
        ExtractionSchema::from_config(doc_type, extract.as_object().unwrap())
            .unwrap()
            .rules
            .remove(0)
    }

    const PAGE: &str = r#"
        <html>
        <body>
            <ul class="items">
                <li><a href="/one" title="One">First &amp; best</a></li>
                <li><a href="/two" title="Two">Second</a></li>
                <li><a href="/three" title="Three">Third</a></li>
            </ul>
            <p id="count">3 items</p>
        </body>
        </html>
    "#;

    #[test]
    fn test_css_attribute_values() {
        let doc = MarkupDocument::parse_html(PAGE);
        let values = doc
            .resolve(&rule(DocumentType::Html, json!({"css": "ul.items a", "value": "@href"})))
            .unwrap();
        assert_eq!(values, vec![json!("/one"), json!("/two"), json!("/three")]);
    }

    #[test]
    fn test_text_is_not_reescaped() {
        let doc = MarkupDocument::parse_html(PAGE);
        let values = doc
            .resolve(&rule(DocumentType::Html, json!({"css": "li:first-child a", "value": "string(.)"})))
            .unwrap();
        assert_eq!(values, vec![json!("First & best")]);
    }

    #[test]
    fn test_xpath_on_html() {
        let doc = MarkupDocument::parse_html(PAGE);
        let values = doc
            .resolve(&rule(DocumentType::Html, json!({"xpath": "//li/a", "value": "@title"})))
            .unwrap();
        assert_eq!(values, vec![json!("One"), json!("Two"), json!("Three")]);
    }

    #[test]
    fn test_integral_numbers_are_normalized() {
        let doc = MarkupDocument::parse_html(PAGE);
        let values = doc
            .resolve(&rule(DocumentType::Html, json!({"css": "ul", "value": "count(li)"})))
            .unwrap();
        assert_eq!(values, vec![json!("3")]);

        let values = doc
            .resolve(&rule(DocumentType::Html, json!({"css": "ul", "value": "count(li) div 2"})))
            .unwrap();
        assert_eq!(values, vec![json!("1.5")]);
    }

    #[test]
    fn test_default_value_serializes_element() {
        let doc = MarkupDocument::parse_html(PAGE);
        let values = doc
            .resolve(&rule(DocumentType::Html, json!({"css": "#count"})))
            .unwrap();
        assert_eq!(values, vec![json!("<p id=\"count\">3 items</p>")]);
    }

    #[test]
    fn test_non_nodeset_is_extraction_type_error() {
        let doc = MarkupDocument::parse_html(PAGE);
        let err = doc
            .resolve(&rule(DocumentType::Html, json!({"xpath": "count(//li)"})))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::ExtractionType { .. }));
    }

    #[test]
    fn test_xml_css_with_default_namespace() {
        let feed = r#"<?xml version="1.0" encoding="UTF-8"?>
            <feed xmlns="http://www.w3.org/2005/Atom">
                <entry><title>Alpha</title><link href="http://example.com/a"/></entry>
                <entry><title>Beta</title><link href="http://example.com/b"/></entry>
            </feed>"#;
        let doc = MarkupDocument::parse_xml(feed).unwrap();

        let titles = doc
            .resolve(&rule(DocumentType::Xml, json!({"css": "entry > title", "value": "string(.)"})))
            .unwrap();
        assert_eq!(titles, vec![json!("Alpha"), json!("Beta")]);

        let links = doc
            .resolve(&rule(DocumentType::Xml, json!({"css": "entry link", "value": "@href"})))
            .unwrap();
        assert_eq!(links, vec![json!("http://example.com/a"), json!("http://example.com/b")]);
    }

    const CATALOG: &str = r#"<catalog>
        <book><title>One</title></book>
        <magazine><title>Two</title></magazine>
        <book class="new"><title>Three</title></book>
        <book><title>Four</title></book>
        <magazine><title>Five</title></magazine>
    </catalog>"#;

    #[test]
    fn test_xml_css_structural_pseudo_classes() {
        let doc = MarkupDocument::parse_xml(CATALOG).unwrap();
        let titles = |css: &str| {
            doc.resolve(&rule(DocumentType::Xml, json!({"css": css, "value": "string(title)"})))
                .unwrap()
        };

        assert_eq!(
            titles("catalog > :nth-child(2n+1)"),
            vec![json!("One"), json!("Three"), json!("Five")]
        );
        assert_eq!(titles("book:nth-of-type(2)"), vec![json!("Three")]);
        assert_eq!(titles("book:not(.new)"), vec![json!("One"), json!("Four")]);
        assert_eq!(titles("magazine:last-of-type"), vec![json!("Five")]);
    }

    #[test]
    fn test_html_and_xml_share_selector_grammar() {
        let definition = json!({"css": "book:not(.new):nth-of-type(odd)", "value": "string(title)"});
        let xml = MarkupDocument::parse_xml(CATALOG).unwrap();
        let html = MarkupDocument::parse_html(CATALOG);

        let from_xml = xml.resolve(&rule(DocumentType::Xml, definition.clone())).unwrap();
        let from_html = html.resolve(&rule(DocumentType::Html, definition)).unwrap();
        assert_eq!(from_xml, vec![json!("One"), json!("Four")]);
        assert_eq!(from_xml, from_html);
    }

    #[test]
    fn test_value_xpath_applies_to_each_node() {
        let doc = MarkupDocument::parse_xml(CATALOG).unwrap();
        let values = doc
            .resolve(&rule(DocumentType::Xml, json!({"xpath": "/catalog/*", "value": "name()"})))
            .unwrap();
        assert_eq!(values.len(), 5);
        assert_eq!(values[1], json!("magazine"));
    }

    #[test]
    fn test_xml_xpath_text_nodes() {
        let doc = MarkupDocument::parse_xml("<rss><item><title>A &amp; B</title></item></rss>").unwrap();
        let values = doc
            .resolve(&rule(DocumentType::Xml, json!({"xpath": "//item", "value": "title/text()"})))
            .unwrap();
        assert_eq!(values, vec![json!("A & B")]);
    }

    #[test]
    fn test_invalid_xml_is_parse_error() {
        assert!(matches!(
            MarkupDocument::parse_xml("<rss><item></rss>"),
            Err(ExtractionError::Parse { .. })
        ));
    }
}
