//! CSS selector matching over `sxd-document` trees.
//!
//! HTML documents are matched by scraper directly. XML documents have no
//! html5ever tree, so their elements are wrapped here and handed to the same
//! `selectors` matcher scraper uses.

use std::collections::HashMap;
use std::fmt;

use scraper::selector::{CssLocalName, CssString, NonTSPseudoClass, PseudoElement, Simple};
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::bloom::BloomFilter;
use selectors::matching::{self, ElementSelectorFlags, MatchingContext};
use selectors::parser::{SelectorImpl, SelectorList};
use selectors::{Element, OpaqueElement};
use sxd_document::dom::{self, ChildOfElement, ChildOfRoot, Document, ParentOfChild};

type Namespace = <Simple as SelectorImpl>::NamespaceUrl;

/// Every element of a document in document order.
///
/// Matching identifies elements by address, so each one needs a stable slot.
pub(crate) struct ElementIndex<'d> {
    elements: Vec<dom::Element<'d>>,
    positions: HashMap<dom::Element<'d>, usize>,
}

impl<'d> ElementIndex<'d> {
    pub(crate) fn new(doc: &Document<'d>) -> Self {
        fn walk<'d>(element: dom::Element<'d>, out: &mut Vec<dom::Element<'d>>) {
            out.push(element);
            for child in element.children() {
                if let ChildOfElement::Element(el) = child {
                    walk(el, out);
                }
            }
        }

        let mut elements = Vec::new();
        for child in doc.root().children() {
            if let ChildOfRoot::Element(el) = child {
                walk(el, &mut elements);
            }
        }
        let positions = elements.iter().enumerate().map(|(i, el)| (*el, i)).collect();
        Self {
            elements,
            positions,
        }
    }

    pub(crate) fn elements(&self) -> &[dom::Element<'d>] {
        &self.elements
    }

    /// Elements matching any selector of the list, in document order.
    pub(crate) fn select(&self, selectors: &SelectorList<Simple>) -> Vec<dom::Element<'d>> {
        let mut caches = matching::SelectorCaches::default();
        let mut context = MatchingContext::new(
            matching::MatchingMode::Normal,
            None,
            &mut caches,
            matching::QuirksMode::NoQuirks,
            matching::NeedsSelectorFlags::No,
            matching::MatchingForInvalidation::No,
        );

        (0..self.elements.len())
            .map(|position| XmlElement {
                index: self,
                position,
            })
            .filter(|element| {
                selectors
                    .slice()
                    .iter()
                    .any(|s| matching::matches_selector(s, 0, None, element, &mut context))
            })
            .map(|element| element.node())
            .collect()
    }

    fn wrap(&self, element: dom::Element<'d>) -> Option<XmlElement<'_, 'd>> {
        self.positions.get(&element).map(|&position| XmlElement {
            index: self,
            position,
        })
    }
}

#[derive(Clone, Copy)]
struct XmlElement<'a, 'd> {
    index: &'a ElementIndex<'d>,
    position: usize,
}

impl<'d> XmlElement<'_, 'd> {
    fn node(&self) -> dom::Element<'d> {
        self.index.elements[self.position]
    }

    fn attribute(&self, name: &str) -> Option<&'d str> {
        self.node().attribute_value(name)
    }
}

impl fmt::Debug for XmlElement<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("XmlElement")
            .field(&self.node().name().local_part())
            .field(&self.position)
            .finish()
    }
}

/// XML names are case sensitive and carry no HTML-only state, so links,
/// slots and non-tree pseudo-classes never match.
impl Element for XmlElement<'_, '_> {
    type Impl = Simple;

    fn opaque(&self) -> OpaqueElement {
        OpaqueElement::new(&self.index.elements[self.position])
    }

    fn parent_element(&self) -> Option<Self> {
        match self.node().parent()? {
            ParentOfChild::Element(parent) => self.index.wrap(parent),
            ParentOfChild::Root(_) => None,
        }
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        // Preceding siblings come back in document order.
        self.node()
            .preceding_siblings()
            .into_iter()
            .rev()
            .find_map(|sibling| sibling.element())
            .and_then(|sibling| self.index.wrap(sibling))
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.node()
            .following_siblings()
            .into_iter()
            .find_map(|sibling| sibling.element())
            .and_then(|sibling| self.index.wrap(sibling))
    }

    fn first_element_child(&self) -> Option<Self> {
        self.node()
            .children()
            .into_iter()
            .find_map(|child| child.element())
            .and_then(|child| self.index.wrap(child))
    }

    fn is_html_element_in_html_document(&self) -> bool {
        false
    }

    /// Names match by local part, so default namespaces (Atom, RSS 1.0)
    /// need no prefixes in selectors.
    fn has_local_name(&self, local_name: &CssLocalName) -> bool {
        self.node().name().local_part() == &*local_name.0
    }

    fn has_namespace(&self, ns: &Namespace) -> bool {
        let ns: &str = ns;
        self.node().name().namespace_uri().unwrap_or("") == ns
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.node().name() == other.node().name()
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&Namespace>,
        local_name: &CssLocalName,
        operation: &AttrSelectorOperation<&CssString>,
    ) -> bool {
        self.node().attributes().iter().any(|attribute| {
            let name = attribute.name();
            let in_namespace = match ns {
                NamespaceConstraint::Any => true,
                NamespaceConstraint::Specific(url) => {
                    let url: &str = url;
                    name.namespace_uri().unwrap_or("") == url
                }
            };
            in_namespace && name.local_part() == &*local_name.0 && operation.eval_str(attribute.value())
        })
    }

    fn match_non_ts_pseudo_class(
        &self,
        _pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, Simple>,
    ) -> bool {
        false
    }

    fn match_pseudo_element(
        &self,
        _pe: &PseudoElement,
        _context: &mut MatchingContext<'_, Simple>,
    ) -> bool {
        false
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}

    fn is_link(&self) -> bool {
        false
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.attribute("id")
            .is_some_and(|value| case_sensitivity.eq(id.0.as_bytes(), value.as_bytes()))
    }

    fn has_class(&self, name: &CssLocalName, case_sensitivity: CaseSensitivity) -> bool {
        self.attribute("class").is_some_and(|classes| {
            classes
                .split_whitespace()
                .any(|class| case_sensitivity.eq(name.0.as_bytes(), class.as_bytes()))
        })
    }

    fn has_custom_state(&self, _name: &CssLocalName) -> bool {
        false
    }

    fn imported_part(&self, _name: &CssLocalName) -> Option<CssLocalName> {
        None
    }

    fn is_part(&self, _name: &CssLocalName) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        self.node().children().iter().all(|child| match child {
            ChildOfElement::Element(_) => false,
            ChildOfElement::Text(text) => text.text().is_empty(),
            ChildOfElement::Comment(_) | ChildOfElement::ProcessingInstruction(_) => true,
        })
    }

    fn is_root(&self) -> bool {
        matches!(self.node().parent(), Some(ParentOfChild::Root(_)))
    }

    fn add_element_unique_hashes(&self, _filter: &mut BloomFilter) -> bool {
        false
    }
}
