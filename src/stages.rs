//! Pipeline stages between the scanner and the consumer.
//!
//! A stage receives one event and emits zero or more events downstream;
//! stages may augment or rewrite events but never reorder them. The
//! stage list itself is assembled by the configuration from feature
//! state and rebuilt on reset, so the pipeline shape is a pure function
//! of configuration.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::{
    error::{ParseDiagnostic, SharedErrorReporter, XmlError, XmlErrorCode, XmlSeverity},
    event::{
        ATTRIBUTE_DECLARED, ATTRIBUTE_PSVI, Attribute, Augmentations, ContentSpec, DefaultDecl,
        ELEMENT_PSVI, QName, TypeInfo, XmlEvent,
    },
};

/// One component in the document-side chain.
pub trait PipelineStage {
    fn name(&self) -> &'static str;

    /// Drop per-document state before the next parse.
    fn reset(&mut self);

    /// Consume one event, push results downstream.
    fn process(&mut self, event: XmlEvent, out: &mut Vec<XmlEvent>) -> Result<(), XmlError>;
}

/// Run one event through every stage in order. `out` receives the
/// events leaving the last stage.
pub fn dispatch(
    stages: &mut [Box<dyn PipelineStage>],
    event: XmlEvent,
    out: &mut Vec<XmlEvent>,
) -> Result<(), XmlError> {
    out.clear();
    out.push(event);
    let mut next = Vec::new();
    for stage in stages {
        next.clear();
        for ev in out.drain(..) {
            stage.process(ev, &mut next)?;
        }
        std::mem::swap(out, &mut next);
    }
    Ok(())
}

/// This is the namespace for the special xml: prefix predefined in the
/// XML Namespace specification.
const XML_URI: &str = crate::dom::XML_XML_NAMESPACE;
const XMLNS_URI: &str = crate::dom::XML_NS_NAMESPACE;

/// Namespace binder: resolves prefixes to URIs over a scope stack and
/// rejects undeclared prefixes and reserved-prefix misuse.
///
/// Full namespace-URI semantics (relative URI deprecation and the like)
/// are out of scope; binding and scoping are what downstream consumers
/// rely on.
pub struct NamespaceBinder {
    reporter: SharedErrorReporter,
    /// One frame per open element: the declarations it introduced.
    scopes: Vec<Vec<(Option<Rc<str>>, Option<Rc<str>>)>>,
}

impl NamespaceBinder {
    pub fn new(reporter: SharedErrorReporter) -> Self {
        NamespaceBinder {
            reporter,
            scopes: Vec::new(),
        }
    }

    fn fatal(&self, code: XmlErrorCode, message: String) -> XmlError {
        self.reporter.borrow_mut().fatal(ParseDiagnostic {
            code,
            message,
            system_id: None,
            line: 0,
            column: 0,
        })
    }

    fn lookup(&self, prefix: Option<&str>) -> Option<Rc<str>> {
        match prefix {
            Some("xml") => return Some(Rc::from(XML_URI)),
            Some("xmlns") => return Some(Rc::from(XMLNS_URI)),
            _ => {}
        }
        for scope in self.scopes.iter().rev() {
            for (p, uri) in scope.iter().rev() {
                if p.as_deref() == prefix {
                    return uri.clone();
                }
            }
        }
        None
    }

    fn push_scope(&mut self, attributes: &crate::event::Attributes) -> Result<(), XmlError> {
        let mut frame = vec![];
        for attr in attributes {
            if !attr.name.is_xmlns() {
                continue;
            }
            let (prefix, uri) = if attr.name.raw.as_ref() == "xmlns" {
                (None, attr.value.as_str())
            } else {
                (Some(attr.name.local.clone()), attr.value.as_str())
            };
            if let Some(p) = prefix.as_deref() {
                if p == "xmlns" {
                    return Err(self.fatal(
                        XmlErrorCode::NamespaceReservedPrefix,
                        "the xmlns prefix cannot be declared".into(),
                    ));
                }
                if p == "xml" && uri != XML_URI {
                    return Err(self.fatal(
                        XmlErrorCode::NamespaceReservedPrefix,
                        "the xml prefix is bound permanently".into(),
                    ));
                }
                if uri.is_empty() {
                    // XML 1.1 permits undeclaring a prefix; in 1.0 this
                    // is an error, reported but bound as undeclared.
                    self.reporter.borrow_mut().report(
                        XmlSeverity::Error,
                        ParseDiagnostic {
                            code: XmlErrorCode::NamespaceEmptyBinding,
                            message: format!("prefix \"{p}\" bound to the empty string"),
                            system_id: None,
                            line: 0,
                            column: 0,
                        },
                    );
                }
            }
            let uri = if uri.is_empty() {
                None
            } else {
                Some(Rc::from(uri))
            };
            frame.push((prefix, uri));
        }
        self.scopes.push(frame);
        Ok(())
    }

    fn bind_element(&mut self, name: &mut QName) -> Result<(), XmlError> {
        match name.prefix.as_deref() {
            Some(prefix) => {
                let Some(uri) = self.lookup(Some(prefix)) else {
                    return Err(self.fatal(
                        XmlErrorCode::NamespaceUndeclaredPrefix,
                        format!("prefix \"{prefix}\" is not declared"),
                    ));
                };
                name.uri = Some(uri);
            }
            None => {
                name.uri = self.lookup(None);
            }
        }
        Ok(())
    }

    fn bind_attributes(
        &mut self,
        attributes: &mut crate::event::Attributes,
    ) -> Result<(), XmlError> {
        for attr in attributes.iter_mut() {
            if attr.name.is_xmlns() {
                attr.name.uri = Some(Rc::from(XMLNS_URI));
            } else if let Some(prefix) = attr.name.prefix.clone() {
                let Some(uri) = self.lookup(Some(prefix.as_ref())) else {
                    return Err(self.fatal(
                        XmlErrorCode::NamespaceUndeclaredPrefix,
                        format!("prefix \"{prefix}\" is not declared"),
                    ));
                };
                attr.name.uri = Some(uri);
            }
            // Unprefixed attributes are in no namespace.
        }
        // No two attributes may share an expanded name.
        for i in 0..attributes.len() {
            for j in i + 1..attributes.len() {
                let a = attributes.get(i).expect("index in range");
                let b = attributes.get(j).expect("index in range");
                if a.name.uri == b.name.uri && a.name.local == b.name.local && a.name.uri.is_some()
                {
                    return Err(self.fatal(
                        XmlErrorCode::AttributeRedefined,
                        format!(
                            "attributes \"{}\" and \"{}\" have the same expanded name",
                            a.name.raw, b.name.raw
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl PipelineStage for NamespaceBinder {
    fn name(&self) -> &'static str {
        "namespace-binder"
    }

    fn reset(&mut self) {
        self.scopes.clear();
    }

    fn process(&mut self, event: XmlEvent, out: &mut Vec<XmlEvent>) -> Result<(), XmlError> {
        match event {
            XmlEvent::StartElement {
                mut name,
                mut attributes,
                augmentations,
            } => {
                self.push_scope(&attributes)?;
                self.bind_element(&mut name)?;
                self.bind_attributes(&mut attributes)?;
                out.push(XmlEvent::StartElement {
                    name,
                    attributes,
                    augmentations,
                });
            }
            XmlEvent::EmptyElement {
                mut name,
                mut attributes,
                augmentations,
            } => {
                self.push_scope(&attributes)?;
                self.bind_element(&mut name)?;
                self.bind_attributes(&mut attributes)?;
                self.scopes.pop();
                out.push(XmlEvent::EmptyElement {
                    name,
                    attributes,
                    augmentations,
                });
            }
            XmlEvent::EndElement {
                mut name,
                augmentations,
            } => {
                self.bind_element(&mut name)?;
                self.scopes.pop();
                out.push(XmlEvent::EndElement {
                    name,
                    augmentations,
                });
            }
            other => out.push(other),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct AttDef {
    name: String,
    type_keyword: Rc<str>,
    default: DefaultDecl,
}

/// DTD validator stage.
///
/// Grammar bookkeeping only: attribute defaulting with the declared
/// augmentation, ID-type tagging, required-attribute checks and
/// ignorable-whitespace classification for element-only content.
/// Content-model matching belongs to a grammar engine, not here.
pub struct DtdValidator {
    reporter: SharedErrorReporter,
    content_specs: HashMap<String, ContentSpec>,
    attlists: HashMap<String, Vec<AttDef>>,
    /// Content spec of each open element, for whitespace classification.
    element_stack: Vec<Option<ContentSpec>>,
}

impl DtdValidator {
    pub fn new(reporter: SharedErrorReporter) -> Self {
        DtdValidator {
            reporter,
            content_specs: HashMap::new(),
            attlists: HashMap::new(),
            element_stack: Vec::new(),
        }
    }

    fn augment_attributes(&mut self, element: &QName, attributes: &mut crate::event::Attributes) {
        let Some(defs) = self.attlists.get(element.raw.as_ref()) else {
            return;
        };
        for def in defs {
            if let Some(pos) = attributes
                .iter()
                .position(|a| a.name.raw.as_ref() == def.name)
            {
                let attr = attributes.get_mut(pos).expect("position in range");
                attr.decl_type = Some(def.type_keyword.clone());
                attr.augmentations.set_flag(ATTRIBUTE_DECLARED);
                continue;
            }
            match &def.default {
                DefaultDecl::Required => {
                    self.reporter.borrow_mut().report(
                        XmlSeverity::Error,
                        ParseDiagnostic {
                            code: XmlErrorCode::AttributeWithoutValue,
                            message: format!(
                                "required attribute \"{}\" of element \"{}\" is missing",
                                def.name, element.raw
                            ),
                            system_id: None,
                            line: 0,
                            column: 0,
                        },
                    );
                }
                DefaultDecl::Implied => {}
                DefaultDecl::Fixed(value) | DefaultDecl::Value(value) => {
                    let mut attr = Attribute::new(QName::from_raw(&def.name), value.clone());
                    attr.specified = false;
                    attr.decl_type = Some(def.type_keyword.clone());
                    attr.augmentations.set_flag(ATTRIBUTE_DECLARED);
                    attributes.push(attr);
                }
            }
        }
    }

    fn spec_of(&self, element: &QName) -> Option<ContentSpec> {
        self.content_specs.get(element.raw.as_ref()).copied()
    }
}

impl PipelineStage for DtdValidator {
    fn name(&self) -> &'static str {
        "dtd-validator"
    }

    fn reset(&mut self) {
        self.content_specs.clear();
        self.attlists.clear();
        self.element_stack.clear();
    }

    fn process(&mut self, event: XmlEvent, out: &mut Vec<XmlEvent>) -> Result<(), XmlError> {
        match event {
            XmlEvent::ElementDecl { name, spec, model } => {
                self.content_specs.entry(name.clone()).or_insert(spec);
                out.push(XmlEvent::ElementDecl { name, spec, model });
            }
            XmlEvent::AttributeDecl {
                element,
                attribute,
                att_type,
                default,
            } => {
                let defs = self.attlists.entry(element.clone()).or_default();
                // First declaration of an attribute wins.
                if !defs.iter().any(|d| d.name == attribute) {
                    defs.push(AttDef {
                        name: attribute.clone(),
                        type_keyword: Rc::from(att_type.keyword()),
                        default: default.clone(),
                    });
                }
                out.push(XmlEvent::AttributeDecl {
                    element,
                    attribute,
                    att_type,
                    default,
                });
            }
            XmlEvent::StartElement {
                name,
                mut attributes,
                augmentations,
            } => {
                self.augment_attributes(&name, &mut attributes);
                self.element_stack.push(self.spec_of(&name));
                out.push(XmlEvent::StartElement {
                    name,
                    attributes,
                    augmentations,
                });
            }
            XmlEvent::EmptyElement {
                name,
                mut attributes,
                augmentations,
            } => {
                self.augment_attributes(&name, &mut attributes);
                out.push(XmlEvent::EmptyElement {
                    name,
                    attributes,
                    augmentations,
                });
            }
            XmlEvent::EndElement { name, augmentations } => {
                self.element_stack.pop();
                out.push(XmlEvent::EndElement {
                    name,
                    augmentations,
                });
            }
            XmlEvent::Characters {
                text,
                augmentations,
            } => {
                let element_only = self
                    .element_stack
                    .last()
                    .copied()
                    .flatten()
                    .is_some_and(|spec| spec == ContentSpec::Children);
                if element_only && text.chars().all(crate::chvalid::is_xml_whitespace) {
                    out.push(XmlEvent::IgnorableWhitespace { text });
                } else {
                    out.push(XmlEvent::Characters {
                        text,
                        augmentations,
                    });
                }
            }
            other => out.push(other),
        }
        Ok(())
    }
}

/// Source of type information for the schema-validation stage. The
/// actual schema engine is an external collaborator; anything
/// satisfying this trait can stand in for it.
pub trait TypeProvider {
    fn element_type(&mut self, name: &QName) -> Option<TypeInfo>;
    fn attribute_type(&mut self, element: &QName, attribute: &QName) -> Option<TypeInfo>;
}

/// Shared handle to a type provider; the configuration keeps one and
/// hands it to every rebuilt schema stage.
pub type SharedTypeProvider = Rc<RefCell<dyn TypeProvider>>;

/// Schema validator hook: a pass-through stage that attaches PSVI
/// augmentations from a pluggable [`TypeProvider`]. With no provider
/// installed every event passes unchanged.
pub struct SchemaValidatorStage {
    provider: Option<SharedTypeProvider>,
}

impl SchemaValidatorStage {
    pub fn new(provider: Option<SharedTypeProvider>) -> Self {
        SchemaValidatorStage { provider }
    }

    fn annotate(
        provider: &mut dyn TypeProvider,
        name: &QName,
        attributes: &mut crate::event::Attributes,
        augmentations: &mut Augmentations,
    ) {
        if let Some(info) = provider.element_type(name) {
            augmentations.set_type_info(ELEMENT_PSVI, info);
        }
        for attr in attributes.iter_mut() {
            if let Some(info) = provider.attribute_type(name, &attr.name) {
                attr.augmentations.set_type_info(ATTRIBUTE_PSVI, info);
            }
        }
    }
}

impl PipelineStage for SchemaValidatorStage {
    fn name(&self) -> &'static str {
        "schema-validator"
    }

    fn reset(&mut self) {}

    fn process(&mut self, event: XmlEvent, out: &mut Vec<XmlEvent>) -> Result<(), XmlError> {
        let Some(provider) = self.provider.as_ref() else {
            out.push(event);
            return Ok(());
        };
        let mut provider = provider.borrow_mut();
        match event {
            XmlEvent::StartElement {
                name,
                mut attributes,
                mut augmentations,
            } => {
                Self::annotate(&mut *provider, &name, &mut attributes, &mut augmentations);
                out.push(XmlEvent::StartElement {
                    name,
                    attributes,
                    augmentations,
                });
            }
            XmlEvent::EmptyElement {
                name,
                mut attributes,
                mut augmentations,
            } => {
                Self::annotate(&mut *provider, &name, &mut attributes, &mut augmentations);
                out.push(XmlEvent::EmptyElement {
                    name,
                    attributes,
                    augmentations,
                });
            }
            XmlEvent::EndElement {
                name,
                mut augmentations,
            } => {
                if let Some(info) = provider.element_type(&name) {
                    augmentations.set_type_info(ELEMENT_PSVI, info);
                }
                out.push(XmlEvent::EndElement {
                    name,
                    augmentations,
                });
            }
            other => out.push(other),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::shared_reporter;
    use crate::event::Attributes;

    fn start_el(raw: &str, attrs: Vec<(&str, &str)>) -> XmlEvent {
        let mut attributes = Attributes::new();
        for (n, v) in attrs {
            attributes.push(Attribute::new(QName::from_raw(n), v));
        }
        XmlEvent::StartElement {
            name: QName::from_raw(raw),
            attributes,
            augmentations: Augmentations::new(),
        }
    }

    #[test]
    fn binder_resolves_nested_scopes() {
        let mut binder = NamespaceBinder::new(shared_reporter());
        let mut out = vec![];
        binder
            .process(
                start_el("root", vec![("xmlns", "urn:default"), ("xmlns:a", "urn:a")]),
                &mut out,
            )
            .unwrap();
        let XmlEvent::StartElement { name, .. } = &out[0] else {
            panic!("expected start element");
        };
        assert_eq!(name.uri.as_deref(), Some("urn:default"));

        out.clear();
        binder.process(start_el("a:kid", vec![]), &mut out).unwrap();
        let XmlEvent::StartElement { name, .. } = &out[0] else {
            panic!("expected start element");
        };
        assert_eq!(name.uri.as_deref(), Some("urn:a"));
    }

    #[test]
    fn binder_rejects_undeclared_prefix() {
        let mut binder = NamespaceBinder::new(shared_reporter());
        let mut out = vec![];
        let err = binder
            .process(start_el("nope:root", vec![]), &mut out)
            .unwrap_err();
        assert!(matches!(
            err,
            XmlError::Fatal(d) if d.code == XmlErrorCode::NamespaceUndeclaredPrefix
        ));
    }

    #[test]
    fn binder_binds_xml_prefix_implicitly() {
        let mut binder = NamespaceBinder::new(shared_reporter());
        let mut out = vec![];
        binder
            .process(start_el("root", vec![("xml:lang", "en")]), &mut out)
            .unwrap();
        let XmlEvent::StartElement { attributes, .. } = &out[0] else {
            panic!("expected start element");
        };
        assert_eq!(
            attributes.get(0).unwrap().name.uri.as_deref(),
            Some(XML_URI)
        );
    }

    #[test]
    fn dtd_validator_defaults_attributes() {
        let mut validator = DtdValidator::new(shared_reporter());
        let mut out = vec![];
        validator
            .process(
                XmlEvent::AttributeDecl {
                    element: "e".into(),
                    attribute: "kind".into(),
                    att_type: crate::event::AttType::Cdata,
                    default: DefaultDecl::Value("std".into()),
                },
                &mut out,
            )
            .unwrap();
        out.clear();
        validator.process(start_el("e", vec![]), &mut out).unwrap();
        let XmlEvent::StartElement { attributes, .. } = &out[0] else {
            panic!("expected start element");
        };
        let attr = attributes.find_raw("kind").unwrap();
        assert_eq!(attr.value, "std");
        assert!(!attr.specified);
        assert!(attr.augmentations.flag(ATTRIBUTE_DECLARED));
        assert_eq!(attr.decl_type.as_deref(), Some("CDATA"));
    }

    #[test]
    fn dtd_validator_classifies_ignorable_whitespace() {
        let mut validator = DtdValidator::new(shared_reporter());
        let mut out = vec![];
        validator
            .process(
                XmlEvent::ElementDecl {
                    name: "list".into(),
                    spec: ContentSpec::Children,
                    model: "(item*)".into(),
                },
                &mut out,
            )
            .unwrap();
        out.clear();
        validator
            .process(start_el("list", vec![]), &mut out)
            .unwrap();
        out.clear();
        validator
            .process(
                XmlEvent::Characters {
                    text: "\n  ".into(),
                    augmentations: Augmentations::new(),
                },
                &mut out,
            )
            .unwrap();
        assert!(matches!(out[0], XmlEvent::IgnorableWhitespace { .. }));

        // Non-whitespace text passes through even in element content.
        out.clear();
        validator
            .process(
                XmlEvent::Characters {
                    text: "data".into(),
                    augmentations: Augmentations::new(),
                },
                &mut out,
            )
            .unwrap();
        assert!(matches!(out[0], XmlEvent::Characters { .. }));
    }

    #[test]
    fn dispatch_chains_stages() {
        let reporter = shared_reporter();
        let mut stages: Vec<Box<dyn PipelineStage>> = vec![
            Box::new(DtdValidator::new(reporter.clone())),
            Box::new(NamespaceBinder::new(reporter.clone())),
            Box::new(SchemaValidatorStage::new(None)),
        ];
        let mut out = vec![];
        dispatch(
            &mut stages,
            start_el("root", vec![("xmlns", "urn:x")]),
            &mut out,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        let XmlEvent::StartElement { name, .. } = &out[0] else {
            panic!("expected start element");
        };
        assert_eq!(name.uri.as_deref(), Some("urn:x"));
    }
}
