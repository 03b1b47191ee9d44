//! SAX-shaped event consumers.
//!
//! [`SaxAdapter`] sits at the tail of the pipeline and forwards the
//! Event Contract one to one into user-supplied handler traits, split
//! into the content, lexical and declaration surfaces. The only logic
//! of any subtlety here is attribute filtering: with the
//! namespace-prefixes feature off, `xmlns` and `xmlns:*` declaration
//! attributes are withheld from the reported attribute list.

use crate::{
    chvalid::XmlVersion,
    error::XmlError,
    event::{
        AttType, Attribute, Attributes, Augmentations, ContentSpec, DefaultDecl, DocumentHandler,
        DtdHandler, ENTITY_SKIPPED, Locator, QName, ResourceId,
    },
};

/// Content callbacks.
#[allow(unused_variables)]
pub trait SaxContentHandler {
    fn start_document(&mut self, locator: &Locator) {}
    fn end_document(&mut self) {}
    fn start_element(&mut self, name: &QName, attributes: &[&Attribute]) {}
    fn end_element(&mut self, name: &QName) {}
    fn characters(&mut self, text: &str) {}
    fn ignorable_whitespace(&mut self, text: &str) {}
    fn processing_instruction(&mut self, target: &str, data: Option<&str>) {}
    /// An entity whose expansion was not included.
    fn skipped_entity(&mut self, name: &str) {}
}

/// Lexical callbacks: comments, CDATA brackets, entity boundaries, DTD
/// brackets.
#[allow(unused_variables)]
pub trait SaxLexicalHandler {
    fn comment(&mut self, text: &str) {}
    fn start_cdata(&mut self) {}
    fn end_cdata(&mut self) {}
    fn start_entity(&mut self, name: &str) {}
    fn end_entity(&mut self, name: &str) {}
    fn start_dtd(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {}
    fn end_dtd(&mut self) {}
}

/// DTD declaration callbacks.
#[allow(unused_variables)]
pub trait SaxDeclHandler {
    fn element_decl(&mut self, name: &str, model: &str) {}
    fn attribute_decl(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &str,
        mode: Option<&str>,
        value: Option<&str>,
    ) {
    }
    fn internal_entity_decl(&mut self, name: &str, value: &str) {}
    fn external_entity_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
    ) {
    }
    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        notation: &str,
    ) {
    }
    fn notation_decl(&mut self, name: &str, public_id: Option<&str>, system_id: Option<&str>) {}
}

/// Event-contract consumer that forwards into the SAX handler traits.
#[derive(Default)]
pub struct SaxAdapter {
    pub content: Option<Box<dyn SaxContentHandler>>,
    pub lexical: Option<Box<dyn SaxLexicalHandler>>,
    pub decl: Option<Box<dyn SaxDeclHandler>>,
    /// Report xmlns declaration attributes to the content handler.
    namespace_prefixes: bool,
    /// Doctype info cached between `doctype_decl` and `start_dtd`.
    pending_doctype: Option<(String, Option<String>, Option<String>)>,
}

impl SaxAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_namespace_prefixes(&mut self, value: bool) {
        self.namespace_prefixes = value;
    }

    fn report_start_element(&mut self, name: &QName, attributes: &Attributes) {
        let Some(content) = self.content.as_mut() else {
            return;
        };
        let filtered: Vec<&Attribute> = attributes
            .iter()
            .filter(|a| self.namespace_prefixes || !a.name.is_xmlns())
            .collect();
        content.start_element(name, &filtered);
    }
}

impl DocumentHandler for SaxAdapter {
    fn start_document(
        &mut self,
        locator: &Locator,
        _encoding: Option<&str>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.pending_doctype = None;
        if let Some(content) = self.content.as_mut() {
            content.start_document(locator);
        }
        Ok(())
    }

    fn xml_decl(
        &mut self,
        _version: XmlVersion,
        _encoding: Option<&str>,
        _standalone: Option<bool>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        Ok(())
    }

    fn doctype_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.pending_doctype = Some((
            name.to_string(),
            public_id.map(str::to_string),
            system_id.map(str::to_string),
        ));
        Ok(())
    }

    fn start_element(
        &mut self,
        name: &QName,
        attributes: &mut Attributes,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.report_start_element(name, attributes);
        Ok(())
    }

    fn end_element(&mut self, name: &QName, _augs: &mut Augmentations) -> Result<(), XmlError> {
        if let Some(content) = self.content.as_mut() {
            content.end_element(name);
        }
        Ok(())
    }

    fn characters(&mut self, text: &str, _augs: &mut Augmentations) -> Result<(), XmlError> {
        if let Some(content) = self.content.as_mut() {
            content.characters(text);
        }
        Ok(())
    }

    fn ignorable_whitespace(
        &mut self,
        text: &str,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if let Some(content) = self.content.as_mut() {
            content.ignorable_whitespace(text);
        }
        Ok(())
    }

    fn comment(&mut self, text: &str, _augs: &mut Augmentations) -> Result<(), XmlError> {
        if let Some(lexical) = self.lexical.as_mut() {
            lexical.comment(text);
        }
        Ok(())
    }

    fn processing_instruction(
        &mut self,
        target: &str,
        data: Option<&str>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if let Some(content) = self.content.as_mut() {
            content.processing_instruction(target, data);
        }
        Ok(())
    }

    fn start_cdata(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        if let Some(lexical) = self.lexical.as_mut() {
            lexical.start_cdata();
        }
        Ok(())
    }

    fn end_cdata(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        if let Some(lexical) = self.lexical.as_mut() {
            lexical.end_cdata();
        }
        Ok(())
    }

    fn start_general_entity(
        &mut self,
        name: &str,
        _identifier: Option<&ResourceId>,
        _encoding: Option<&str>,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if augs.flag(ENTITY_SKIPPED) {
            if let Some(content) = self.content.as_mut() {
                content.skipped_entity(name);
            }
        } else if let Some(lexical) = self.lexical.as_mut() {
            lexical.start_entity(name);
        }
        Ok(())
    }

    fn end_general_entity(&mut self, name: &str, augs: &mut Augmentations) -> Result<(), XmlError> {
        // The skipped case was already reported at the start boundary.
        if !augs.flag(ENTITY_SKIPPED)
            && let Some(lexical) = self.lexical.as_mut()
        {
            lexical.end_entity(name);
        }
        Ok(())
    }

    fn end_document(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        if let Some(content) = self.content.as_mut() {
            content.end_document();
        }
        Ok(())
    }
}

impl DtdHandler for SaxAdapter {
    fn start_dtd(&mut self, _locator: &Locator, _augs: &mut Augmentations) -> Result<(), XmlError> {
        if let Some(lexical) = self.lexical.as_mut() {
            let (name, public_id, system_id) = match self.pending_doctype.as_ref() {
                Some((n, p, s)) => (n.as_str(), p.as_deref(), s.as_deref()),
                None => ("", None, None),
            };
            lexical.start_dtd(name, public_id, system_id);
        }
        Ok(())
    }

    fn end_dtd(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        if let Some(lexical) = self.lexical.as_mut() {
            lexical.end_dtd();
        }
        Ok(())
    }

    fn element_decl(
        &mut self,
        name: &str,
        _spec: ContentSpec,
        model: &str,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if let Some(decl) = self.decl.as_mut() {
            decl.element_decl(name, model);
        }
        Ok(())
    }

    fn attribute_decl(
        &mut self,
        element: &str,
        attribute: &str,
        att_type: &AttType,
        default: &DefaultDecl,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if let Some(decl) = self.decl.as_mut() {
            let (mode, value) = match default {
                DefaultDecl::Required => (Some("#REQUIRED"), None),
                DefaultDecl::Implied => (Some("#IMPLIED"), None),
                DefaultDecl::Fixed(v) => (Some("#FIXED"), Some(v.as_str())),
                DefaultDecl::Value(v) => (None, Some(v.as_str())),
            };
            decl.attribute_decl(element, attribute, &att_type.to_string(), mode, value);
        }
        Ok(())
    }

    fn internal_entity_decl(
        &mut self,
        name: &str,
        value: &str,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if let Some(decl) = self.decl.as_mut() {
            decl.internal_entity_decl(name, value);
        }
        Ok(())
    }

    fn external_entity_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if let Some(decl) = self.decl.as_mut() {
            decl.external_entity_decl(
                name,
                identifier.public_id.as_deref(),
                identifier.system_id.as_deref(),
            );
        }
        Ok(())
    }

    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        notation: &str,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if let Some(decl) = self.decl.as_mut() {
            decl.unparsed_entity_decl(
                name,
                identifier.public_id.as_deref(),
                identifier.system_id.as_deref(),
                notation,
            );
        }
        Ok(())
    }

    fn notation_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        if let Some(decl) = self.decl.as_mut() {
            decl.notation_decl(
                name,
                identifier.public_id.as_deref(),
                identifier.system_id.as_deref(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        calls: std::rc::Rc<std::cell::RefCell<Vec<String>>>,
    }

    impl SaxContentHandler for Recorder {
        fn start_element(&mut self, name: &QName, attributes: &[&Attribute]) {
            let attrs: Vec<String> = attributes
                .iter()
                .map(|a| a.name.raw.to_string())
                .collect();
            self.calls
                .borrow_mut()
                .push(format!("start {} [{}]", name.raw, attrs.join(",")));
        }

        fn skipped_entity(&mut self, name: &str) {
            self.calls.borrow_mut().push(format!("skipped {name}"));
        }
    }

    fn element_with_xmlns() -> (QName, Attributes) {
        let mut attributes = Attributes::new();
        attributes.push(Attribute::new(QName::from_raw("xmlns"), "urn:x"));
        attributes.push(Attribute::new(QName::from_raw("xmlns:a"), "urn:a"));
        attributes.push(Attribute::new(QName::from_raw("id"), "1"));
        (QName::from_raw("root"), attributes)
    }

    #[test]
    fn xmlns_attributes_withheld_by_default() {
        let calls = std::rc::Rc::new(std::cell::RefCell::new(vec![]));
        let mut adapter = SaxAdapter::new();
        adapter.content = Some(Box::new(Recorder {
            calls: calls.clone(),
        }));
        let (name, mut attrs) = element_with_xmlns();
        adapter
            .start_element(&name, &mut attrs, &mut Augmentations::new())
            .unwrap();
        assert_eq!(calls.borrow()[0], "start root [id]");
    }

    #[test]
    fn xmlns_attributes_reported_when_prefixes_on() {
        let calls = std::rc::Rc::new(std::cell::RefCell::new(vec![]));
        let mut adapter = SaxAdapter::new();
        adapter.set_namespace_prefixes(true);
        adapter.content = Some(Box::new(Recorder {
            calls: calls.clone(),
        }));
        let (name, mut attrs) = element_with_xmlns();
        adapter
            .start_element(&name, &mut attrs, &mut Augmentations::new())
            .unwrap();
        assert_eq!(calls.borrow()[0], "start root [xmlns,xmlns:a,id]");
    }

    #[test]
    fn skipped_entities_use_the_content_surface() {
        let calls = std::rc::Rc::new(std::cell::RefCell::new(vec![]));
        let mut adapter = SaxAdapter::new();
        adapter.content = Some(Box::new(Recorder {
            calls: calls.clone(),
        }));
        let mut augs = Augmentations::new();
        augs.set_flag(ENTITY_SKIPPED);
        adapter
            .start_general_entity("chap", None, None, &mut augs)
            .unwrap();
        assert_eq!(calls.borrow()[0], "skipped chap");
    }
}
