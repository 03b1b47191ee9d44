//! End-to-end pipeline coverage: whole documents through scanner,
//! stages and builder, in both construction modes.

use glob::glob;

use xylem::{
    builder::{BuildOutput, ContentFilter, FilterVerdict},
    config::{
        CREATE_ENTITY_REF_NODES_FEATURE, DEFER_NODE_EXPANSION_FEATURE,
        DOCUMENT_CLASS_NAME_PROPERTY, NAMESPACE_PREFIXES_FEATURE, VALIDATION_FEATURE,
    },
    dom::{Document, NodeId, NodeType},
    error::XmlError,
    event::{Attribute, QName},
    parser::{DomParser, SaxParser},
    sax::SaxContentHandler,
};

fn parse_tree(parser: &mut DomParser, text: &str) -> Document {
    match parser.parse_str(text, None).expect("parse succeeds") {
        BuildOutput::Tree(doc) => doc,
        BuildOutput::Deferred(store) => store.materialize(),
    }
}

#[test]
fn eager_and_deferred_trees_match_over_fixtures() {
    let mut seen = 0;
    for entry in glob("tests/cases/*.xml").expect("glob pattern") {
        let path = entry.expect("fixture path");
        let text = std::fs::read_to_string(&path).expect("fixture readable");

        let mut eager = DomParser::new();
        eager.set_feature(VALIDATION_FEATURE, true).unwrap();
        let eager_doc = parse_tree(&mut eager, &text);

        let mut deferred = DomParser::new();
        deferred.set_feature(VALIDATION_FEATURE, true).unwrap();
        deferred
            .set_feature(DEFER_NODE_EXPANSION_FEATURE, true)
            .unwrap();
        let deferred_doc = parse_tree(&mut deferred, &text);

        assert_eq!(
            eager_doc.outline(),
            deferred_doc.outline(),
            "trees diverge for {}",
            path.display()
        );
        seen += 1;
    }
    assert!(seen >= 5, "fixture directory is missing cases");
}

#[test]
fn dtd_defaulted_attribute_is_unspecified() {
    let mut parser = DomParser::new();
    parser.set_feature(VALIDATION_FEATURE, true).unwrap();
    let doc = parse_tree(
        &mut parser,
        "<!DOCTYPE memo [<!ATTLIST memo priority (low|high) \"low\">]><memo/>",
    );
    let root = doc.document_element().unwrap();
    let attr = doc.get_attribute(root, "priority").unwrap();
    assert_eq!(attr.value, "low");
    assert!(!attr.specified);
    assert_eq!(attr.decl_type.as_deref(), Some("ENUMERATION"));
}

#[test]
fn dtd_id_attribute_is_tagged() {
    let mut parser = DomParser::new();
    parser.set_feature(VALIDATION_FEATURE, true).unwrap();
    let doc = parse_tree(
        &mut parser,
        "<!DOCTYPE e [<!ATTLIST e name ID #IMPLIED>]><e name=\"n1\"/>",
    );
    let root = doc.document_element().unwrap();
    let attr = doc.get_attribute(root, "name").unwrap();
    assert!(attr.is_id);
    assert!(attr.specified);
}

#[test]
fn internal_subset_is_reconstructed() {
    let mut parser = DomParser::new();
    let doc = parse_tree(
        &mut parser,
        "<!DOCTYPE doc [<!ENTITY greeting \"hello\"><!-- subset note -->]><doc>&greeting;</doc>",
    );
    let dt = doc.doctype().unwrap();
    let subset = doc.internal_subset(dt).unwrap();
    assert!(subset.contains("<!ENTITY greeting \"hello\">"));
    assert!(subset.contains("<!-- subset note -->"));
}

#[test]
fn entity_collapse_round_trip() {
    let mut parser = DomParser::new();
    parser
        .set_feature(CREATE_ENTITY_REF_NODES_FEATURE, false)
        .unwrap();
    let doc = parse_tree(
        &mut parser,
        "<!DOCTYPE d [<!ENTITY x \"X\">]><d>A&x;B</d>",
    );
    let root = doc.document_element().unwrap();
    let kids = doc.child_nodes(root);
    assert_eq!(kids.len(), 1);
    assert_eq!(doc.node_type(kids[0]), NodeType::Text);
    assert_eq!(doc.text_data(kids[0]), "AXB");
}

#[test]
fn retained_entity_reference_holds_expansion() {
    let mut parser = DomParser::new();
    let doc = parse_tree(
        &mut parser,
        "<!DOCTYPE d [<!ENTITY x \"<i>in</i>\">]><d>&x;</d>",
    );
    let root = doc.document_element().unwrap();
    let kids = doc.child_nodes(root);
    assert_eq!(kids.len(), 1);
    assert_eq!(doc.node_type(kids[0]), NodeType::EntityReference);
    assert!(doc.is_read_only(kids[0]));
    let inner = doc.child_nodes(kids[0]);
    assert_eq!(doc.node_name(inner[0]).as_ref(), "i");
    // The declaration under the doctype was backfilled as well.
    let dt = doc.doctype().unwrap();
    let decl = doc.find_entity_decl(dt, "x").unwrap();
    assert_eq!(doc.child_nodes(decl).len(), 1);
}

#[test]
fn namespace_binding_reaches_the_tree() {
    let mut parser = DomParser::new();
    let doc = parse_tree(
        &mut parser,
        "<a:root xmlns:a=\"urn:a\"><a:kid at=\"1\"/></a:root>",
    );
    let root = doc.document_element().unwrap();
    assert_eq!(
        doc.element_name(root).unwrap().uri.as_deref(),
        Some("urn:a")
    );
    let kid = doc.child_nodes(root)[0];
    assert_eq!(doc.element_name(kid).unwrap().uri.as_deref(), Some("urn:a"));
    // The unprefixed attribute stays in no namespace.
    assert!(doc.get_attribute(kid, "at").unwrap().name.uri.is_none());
}

#[test]
fn undeclared_prefix_is_fatal_only_with_namespaces_on() {
    let mut parser = DomParser::new();
    assert!(parser.parse_str("<no:root/>", None).is_err());

    let mut parser = DomParser::new();
    parser
        .set_feature(xylem::config::NAMESPACES_FEATURE, false)
        .unwrap();
    assert!(parser.parse_str("<no:root/>", None).is_ok());
}

#[test]
fn xml_11_pipeline_is_selected_per_parse() {
    let mut parser = DomParser::new();
    // U+0008 is only reachable through a character reference in 1.1.
    let text11 = "<?xml version=\"1.1\"?><a>&#8;</a>";
    assert!(parser.parse_str(text11, None).is_ok());
    let text10 = "<?xml version=\"1.0\"?><a>&#8;</a>";
    assert!(parser.parse_str(text10, None).is_err());
    // And back again: the 1.0 pipeline still works afterwards.
    assert!(parser.parse_str("<a/>", None).is_ok());
}

#[test]
fn document_class_name_selects_the_variant() {
    let mut parser = DomParser::new();
    parser
        .set_property(DOCUMENT_CLASS_NAME_PROPERTY, "deferred")
        .unwrap();
    let output = parser.parse_str("<a/>", None).unwrap();
    assert!(matches!(output, BuildOutput::Deferred(_)));

    let err = parser
        .set_property(DOCUMENT_CLASS_NAME_PROPERTY, "com.example.Document")
        .unwrap_err();
    assert!(matches!(err, XmlError::PropertyNotSupported(_)));
}

struct DropFilter(&'static str);

impl ContentFilter for DropFilter {
    fn start_element_check(&mut self, doc: &Document, element: NodeId) -> FilterVerdict {
        if doc.node_name(element).as_ref() == self.0 {
            FilterVerdict::Reject
        } else {
            FilterVerdict::Accept
        }
    }

    fn accept_node(&mut self, _doc: &Document, _node: NodeId) -> FilterVerdict {
        FilterVerdict::Accept
    }
}

#[test]
fn filter_applies_through_a_full_parse() {
    let mut parser = DomParser::new();
    parser.set_filter(Some(Box::new(DropFilter("secret"))));
    let doc = parse_tree(
        &mut parser,
        "<doc><keep/><secret><nested>hidden</nested></secret><tail/></doc>",
    );
    let root = doc.document_element().unwrap();
    let names: Vec<String> = doc
        .child_nodes(root)
        .into_iter()
        .map(|n| doc.node_name(n).to_string())
        .collect();
    assert_eq!(names, ["keep", "tail"]);
}

#[derive(Default)]
struct Trace(std::rc::Rc<std::cell::RefCell<Vec<String>>>);

impl SaxContentHandler for Trace {
    fn start_element(&mut self, name: &QName, attributes: &[&Attribute]) {
        let attrs: Vec<String> = attributes.iter().map(|a| a.name.raw.to_string()).collect();
        self.0
            .borrow_mut()
            .push(format!("<{} [{}]>", name.raw, attrs.join(",")));
    }

    fn end_element(&mut self, name: &QName) {
        self.0.borrow_mut().push(format!("</{}>", name.raw));
    }

    fn characters(&mut self, text: &str) {
        self.0.borrow_mut().push(format!("#{text}"));
    }
}

#[test]
fn sax_surface_filters_xmlns_attributes() {
    let text = "<root xmlns=\"urn:x\" id=\"1\">hi</root>";

    let calls = std::rc::Rc::new(std::cell::RefCell::new(vec![]));
    let mut parser = SaxParser::new();
    parser.set_content_handler(Box::new(Trace(calls.clone())));
    parser.parse_str(text, None).unwrap();
    assert_eq!(
        *calls.borrow(),
        vec!["<root [id]>", "#hi", "</root>"]
    );

    let calls = std::rc::Rc::new(std::cell::RefCell::new(vec![]));
    let mut parser = SaxParser::new();
    parser.set_feature(NAMESPACE_PREFIXES_FEATURE, true).unwrap();
    parser.set_content_handler(Box::new(Trace(calls.clone())));
    parser.parse_str(text, None).unwrap();
    assert_eq!(
        *calls.borrow(),
        vec!["<root [xmlns,id]>", "#hi", "</root>"]
    );
}

#[test]
fn config_error_kinds_are_distinct() {
    let mut parser = DomParser::new();
    assert!(matches!(
        parser.set_feature("urn:not-a-feature", true),
        Err(XmlError::FeatureNotRecognized(_))
    ));
    assert!(matches!(
        parser.set_feature(xylem::config::LOAD_EXTERNAL_DTD_FEATURE, true),
        Err(XmlError::FeatureNotSupported(_))
    ));
    assert!(matches!(
        parser.set_property("urn:not-a-property", "x"),
        Err(XmlError::PropertyNotRecognized(_))
    ));
}

#[test]
fn chunked_character_data_coalesces() {
    // Character references force the scanner to emit separate chunks;
    // the tree must still hold a single text node.
    let mut parser = DomParser::new();
    let doc = parse_tree(&mut parser, "<a>ab&#99;def</a>");
    let root = doc.document_element().unwrap();
    let kids = doc.child_nodes(root);
    assert_eq!(kids.len(), 1);
    assert_eq!(doc.text_data(kids[0]), "abcdef");
}

#[test]
fn unparsed_entity_and_notation_reach_the_doctype() {
    let mut parser = DomParser::new();
    let doc = parse_tree(
        &mut parser,
        "<!DOCTYPE d [<!NOTATION gif PUBLIC \"image/gif\"><!ENTITY pic SYSTEM \"p.gif\" NDATA gif>]><d/>",
    );
    let dt = doc.doctype().unwrap();
    let kinds: Vec<NodeType> = doc
        .child_nodes(dt)
        .into_iter()
        .map(|n| doc.node_type(n))
        .collect();
    assert!(kinds.contains(&NodeType::Notation));
    assert!(kinds.contains(&NodeType::Entity));
    let pic = doc.find_entity_decl(dt, "pic").unwrap();
    assert_eq!(doc.entity_notation_name(pic).map(|n| n.as_ref()), Some("gif"));
}
