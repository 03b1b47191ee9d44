//! The Event Contract.
//!
//! A scanning/validation stack delivers a fixed, ordered set of
//! structural callbacks to a downstream consumer. Two equivalent shapes
//! exist: the [`DocumentHandler`]/[`DtdHandler`] traits (the consumer
//! surface) and the owned [`XmlEvent`] enum (the transport between
//! pipeline stages). [`deliver`] translates the enum into trait calls
//! one to one.

use std::rc::Rc;

use crate::error::XmlError;

pub mod augment;
pub mod qname;

pub use augment::{
    ATTRIBUTE_DECLARED, ATTRIBUTE_PSVI, AugValue, Augmentations, ELEMENT_PSVI, ENTITY_SKIPPED,
    TypeInfo,
};
pub use qname::{Attribute, Attributes, QName, split_qname2};

use crate::chvalid::XmlVersion;

/// Source position attached to document-level boundaries and reported
/// diagnostics.
#[derive(Debug, Clone, Default)]
pub struct Locator {
    pub public_id: Option<Rc<str>>,
    pub system_id: Option<Rc<str>>,
    pub base_system_id: Option<Rc<str>>,
    pub line: u32,
    pub column: u32,
}

/// Identifies an external resource (entity, external subset).
#[derive(Debug, Clone, Default)]
pub struct ResourceId {
    pub public_id: Option<Rc<str>>,
    pub system_id: Option<Rc<str>>,
    pub base_system_id: Option<Rc<str>>,
    /// System id resolved against the base; what base-URI tracking uses.
    pub expanded_system_id: Option<Rc<str>>,
}

/// Declared attribute type, production [54].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttType {
    Cdata,
    Id,
    Idref,
    Idrefs,
    Entity,
    Entities,
    Nmtoken,
    Nmtokens,
    Notation(Vec<String>),
    Enumeration(Vec<String>),
}

impl AttType {
    /// The DOM-visible type keyword.
    pub fn keyword(&self) -> &'static str {
        match self {
            AttType::Cdata => "CDATA",
            AttType::Id => "ID",
            AttType::Idref => "IDREF",
            AttType::Idrefs => "IDREFS",
            AttType::Entity => "ENTITY",
            AttType::Entities => "ENTITIES",
            AttType::Nmtoken => "NMTOKEN",
            AttType::Nmtokens => "NMTOKENS",
            AttType::Notation(_) => "NOTATION",
            AttType::Enumeration(_) => "ENUMERATION",
        }
    }
}

impl std::fmt::Display for AttType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttType::Notation(names) => {
                write!(f, "NOTATION ({})", names.join("|"))
            }
            AttType::Enumeration(tokens) => write!(f, "({})", tokens.join("|")),
            other => write!(f, "{}", other.keyword()),
        }
    }
}

/// Declared attribute default, production [60].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultDecl {
    Required,
    Implied,
    Fixed(String),
    Value(String),
}

impl DefaultDecl {
    /// The defaulted value to materialize when the attribute is absent.
    pub fn default_value(&self) -> Option<&str> {
        match self {
            DefaultDecl::Fixed(v) | DefaultDecl::Value(v) => Some(v),
            _ => None,
        }
    }
}

/// Coarse shape of an element content model; enough for
/// ignorable-whitespace classification without content-model matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSpec {
    Empty,
    Any,
    /// `(#PCDATA ...)`.
    Mixed,
    /// Element-only content; whitespace between children is ignorable.
    Children,
}

/// Document-side structural callbacks, in strict document order.
///
/// Every callback receives the event's augmentations and may fail; the
/// cancellation signal propagates unchanged through all stages.
#[allow(unused_variables)]
pub trait DocumentHandler {
    fn start_document(
        &mut self,
        locator: &Locator,
        encoding: Option<&str>,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn xml_decl(
        &mut self,
        version: XmlVersion,
        encoding: Option<&str>,
        standalone: Option<bool>,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn doctype_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn start_element(
        &mut self,
        name: &QName,
        attributes: &mut Attributes,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    /// Default routing: a start immediately followed by the matching end.
    fn empty_element(
        &mut self,
        name: &QName,
        attributes: &mut Attributes,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.start_element(name, attributes, augs)?;
        self.end_element(name, augs)
    }

    fn end_element(&mut self, name: &QName, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn characters(&mut self, text: &str, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn ignorable_whitespace(
        &mut self,
        text: &str,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn comment(&mut self, text: &str, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn processing_instruction(
        &mut self,
        target: &str,
        data: Option<&str>,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn start_cdata(&mut self, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn end_cdata(&mut self, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn start_general_entity(
        &mut self,
        name: &str,
        identifier: Option<&ResourceId>,
        encoding: Option<&str>,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    /// Text declaration of an external parsed entity, delivered right
    /// after the corresponding `start_general_entity`.
    fn text_decl(
        &mut self,
        version: Option<&str>,
        encoding: Option<&str>,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn end_general_entity(&mut self, name: &str, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn end_document(&mut self, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }
}

/// DTD-side callbacks. Comments and processing instructions inside the
/// DTD are reported through the ordinary [`DocumentHandler`] methods
/// between `start_dtd` and `end_dtd`.
#[allow(unused_variables)]
pub trait DtdHandler {
    fn start_dtd(&mut self, locator: &Locator, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn end_dtd(&mut self, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn start_external_subset(
        &mut self,
        identifier: &ResourceId,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn end_external_subset(&mut self, augs: &mut Augmentations) -> Result<(), XmlError> {
        Ok(())
    }

    fn element_decl(
        &mut self,
        name: &str,
        spec: ContentSpec,
        model: &str,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn attribute_decl(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &AttType,
        default: &DefaultDecl,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn internal_entity_decl(
        &mut self,
        name: &str,
        value: &str,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn external_entity_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        notation: &str,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn notation_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }
}

/// The full consumer surface at the tail of the pipeline.
pub trait PipelineConsumer: DocumentHandler + DtdHandler {}

impl<T: DocumentHandler + DtdHandler> PipelineConsumer for T {}

/// Owned event for transport between pipeline stages.
///
/// Variants mirror the handler callbacks exactly; a stage may rewrite,
/// augment, drop, or re-emit events, but never reorder them.
#[derive(Debug, Clone)]
pub enum XmlEvent {
    StartDocument {
        locator: Locator,
        encoding: Option<String>,
    },
    XmlDecl {
        version: XmlVersion,
        encoding: Option<String>,
        standalone: Option<bool>,
    },
    DoctypeDecl {
        name: String,
        public_id: Option<String>,
        system_id: Option<String>,
    },
    StartElement {
        name: QName,
        attributes: Attributes,
        augmentations: Augmentations,
    },
    EmptyElement {
        name: QName,
        attributes: Attributes,
        augmentations: Augmentations,
    },
    EndElement {
        name: QName,
        augmentations: Augmentations,
    },
    Characters {
        text: String,
        augmentations: Augmentations,
    },
    IgnorableWhitespace {
        text: String,
    },
    Comment {
        text: String,
    },
    ProcessingInstruction {
        target: String,
        data: Option<String>,
    },
    StartCdata,
    EndCdata,
    StartGeneralEntity {
        name: Rc<str>,
        identifier: Option<ResourceId>,
        encoding: Option<String>,
        augmentations: Augmentations,
    },
    TextDecl {
        version: Option<String>,
        encoding: Option<String>,
    },
    EndGeneralEntity {
        name: Rc<str>,
        augmentations: Augmentations,
    },
    EndDocument,
    StartDtd {
        locator: Locator,
    },
    EndDtd,
    StartExternalSubset {
        identifier: ResourceId,
    },
    EndExternalSubset,
    ElementDecl {
        name: String,
        spec: ContentSpec,
        model: String,
    },
    AttributeDecl {
        element: String,
        attribute: String,
        att_type: AttType,
        default: DefaultDecl,
    },
    InternalEntityDecl {
        name: String,
        value: String,
    },
    ExternalEntityDecl {
        name: String,
        identifier: ResourceId,
    },
    UnparsedEntityDecl {
        name: String,
        identifier: ResourceId,
        notation: String,
    },
    NotationDecl {
        name: String,
        identifier: ResourceId,
    },
}

impl XmlEvent {
    /// Short tag for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            XmlEvent::StartDocument { .. } => "startDocument",
            XmlEvent::XmlDecl { .. } => "xmlDecl",
            XmlEvent::DoctypeDecl { .. } => "doctypeDecl",
            XmlEvent::StartElement { .. } => "startElement",
            XmlEvent::EmptyElement { .. } => "emptyElement",
            XmlEvent::EndElement { .. } => "endElement",
            XmlEvent::Characters { .. } => "characters",
            XmlEvent::IgnorableWhitespace { .. } => "ignorableWhitespace",
            XmlEvent::Comment { .. } => "comment",
            XmlEvent::ProcessingInstruction { .. } => "processingInstruction",
            XmlEvent::StartCdata => "startCDATA",
            XmlEvent::EndCdata => "endCDATA",
            XmlEvent::StartGeneralEntity { .. } => "startGeneralEntity",
            XmlEvent::TextDecl { .. } => "textDecl",
            XmlEvent::EndGeneralEntity { .. } => "endGeneralEntity",
            XmlEvent::EndDocument => "endDocument",
            XmlEvent::StartDtd { .. } => "startDTD",
            XmlEvent::EndDtd => "endDTD",
            XmlEvent::StartExternalSubset { .. } => "startExternalSubset",
            XmlEvent::EndExternalSubset => "endExternalSubset",
            XmlEvent::ElementDecl { .. } => "elementDecl",
            XmlEvent::AttributeDecl { .. } => "attributeDecl",
            XmlEvent::InternalEntityDecl { .. } => "internalEntityDecl",
            XmlEvent::ExternalEntityDecl { .. } => "externalEntityDecl",
            XmlEvent::UnparsedEntityDecl { .. } => "unparsedEntityDecl",
            XmlEvent::NotationDecl { .. } => "notationDecl",
        }
    }
}

/// Translate one owned event into the matching consumer callback.
pub fn deliver(event: XmlEvent, consumer: &mut dyn PipelineConsumer) -> Result<(), XmlError> {
    let mut augs = Augmentations::new();
    match event {
        XmlEvent::StartDocument { locator, encoding } => {
            consumer.start_document(&locator, encoding.as_deref(), &mut augs)
        }
        XmlEvent::XmlDecl {
            version,
            encoding,
            standalone,
        } => consumer.xml_decl(version, encoding.as_deref(), standalone, &mut augs),
        XmlEvent::DoctypeDecl {
            name,
            public_id,
            system_id,
        } => consumer.doctype_decl(&name, public_id.as_deref(), system_id.as_deref(), &mut augs),
        XmlEvent::StartElement {
            name,
            mut attributes,
            mut augmentations,
        } => consumer.start_element(&name, &mut attributes, &mut augmentations),
        XmlEvent::EmptyElement {
            name,
            mut attributes,
            mut augmentations,
        } => consumer.empty_element(&name, &mut attributes, &mut augmentations),
        XmlEvent::EndElement {
            name,
            mut augmentations,
        } => consumer.end_element(&name, &mut augmentations),
        XmlEvent::Characters {
            text,
            mut augmentations,
        } => consumer.characters(&text, &mut augmentations),
        XmlEvent::IgnorableWhitespace { text } => consumer.ignorable_whitespace(&text, &mut augs),
        XmlEvent::Comment { text } => consumer.comment(&text, &mut augs),
        XmlEvent::ProcessingInstruction { target, data } => {
            consumer.processing_instruction(&target, data.as_deref(), &mut augs)
        }
        XmlEvent::StartCdata => consumer.start_cdata(&mut augs),
        XmlEvent::EndCdata => consumer.end_cdata(&mut augs),
        XmlEvent::StartGeneralEntity {
            name,
            identifier,
            encoding,
            mut augmentations,
        } => consumer.start_general_entity(
            &name,
            identifier.as_ref(),
            encoding.as_deref(),
            &mut augmentations,
        ),
        XmlEvent::TextDecl { version, encoding } => {
            consumer.text_decl(version.as_deref(), encoding.as_deref(), &mut augs)
        }
        XmlEvent::EndGeneralEntity {
            name,
            mut augmentations,
        } => consumer.end_general_entity(&name, &mut augmentations),
        XmlEvent::EndDocument => consumer.end_document(&mut augs),
        XmlEvent::StartDtd { locator } => consumer.start_dtd(&locator, &mut augs),
        XmlEvent::EndDtd => consumer.end_dtd(&mut augs),
        XmlEvent::StartExternalSubset { identifier } => {
            consumer.start_external_subset(&identifier, &mut augs)
        }
        XmlEvent::EndExternalSubset => consumer.end_external_subset(&mut augs),
        XmlEvent::ElementDecl { name, spec, model } => {
            consumer.element_decl(&name, spec, &model, &mut augs)
        }
        XmlEvent::AttributeDecl {
            element,
            attribute,
            att_type,
            default,
        } => consumer.attribute_decl(&element, &attribute, &att_type, &default, &mut augs),
        XmlEvent::InternalEntityDecl { name, value } => {
            consumer.internal_entity_decl(&name, &value, &mut augs)
        }
        XmlEvent::ExternalEntityDecl { name, identifier } => {
            consumer.external_entity_decl(&name, &identifier, &mut augs)
        }
        XmlEvent::UnparsedEntityDecl {
            name,
            identifier,
            notation,
        } => consumer.unparsed_entity_decl(&name, &identifier, &notation, &mut augs),
        XmlEvent::NotationDecl { name, identifier } => {
            consumer.notation_decl(&name, &identifier, &mut augs)
        }
    }
}
