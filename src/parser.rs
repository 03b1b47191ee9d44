//! High-level parser front-ends over the pipeline configuration.
//!
//! [`DomParser`] builds a tree (eager or deferred), [`SaxParser`]
//! forwards events into user handlers. Both are thin drivers: they own
//! a [`PipelineConfig`], snapshot it into a consumer per parse, and
//! expose the abort handle for cross-thread cancellation.

use std::io::Read;
use std::rc::Rc;

use crate::{
    abort::AbortHandle,
    builder::{BuildOutput, ContentFilter, DomBuilder},
    config::{NAMESPACE_PREFIXES_FEATURE, PipelineConfig},
    error::{ErrorHandler, SharedErrorReporter, XmlError},
    input::{decode_bytes, decode_reader},
    sax::SaxAdapter,
    stages::SharedTypeProvider,
};

/// Tree-building parser.
pub struct DomParser {
    config: PipelineConfig,
    filter: Option<Box<dyn ContentFilter>>,
}

impl Default for DomParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DomParser {
    pub fn new() -> Self {
        DomParser {
            config: PipelineConfig::new(),
            filter: None,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut PipelineConfig {
        &mut self.config
    }

    pub fn set_feature(&mut self, id: &str, value: bool) -> Result<(), XmlError> {
        self.config.set_feature(id, value)
    }

    pub fn feature(&self, id: &str) -> Result<bool, XmlError> {
        self.config.feature(id)
    }

    pub fn set_property(&mut self, id: &str, value: &str) -> Result<(), XmlError> {
        self.config.set_property(id, value)
    }

    pub fn property(&self, id: &str) -> Result<String, XmlError> {
        self.config.property(id)
    }

    pub fn set_filter(&mut self, filter: Option<Box<dyn ContentFilter>>) {
        self.filter = filter;
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.config.set_error_handler(handler);
    }

    pub fn set_type_provider(&mut self, provider: Option<SharedTypeProvider>) {
        self.config.set_type_provider(provider);
    }

    pub fn reporter(&self) -> SharedErrorReporter {
        self.config.reporter()
    }

    /// Handle another thread can use to cancel an in-progress parse.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.config.abort_token())
    }

    /// Parse decoded text. The outcome is either the arena tree or the
    /// compact deferred store, per configuration.
    pub fn parse_str(
        &mut self,
        text: &str,
        system_id: Option<&str>,
    ) -> Result<BuildOutput, XmlError> {
        self.parse_decoded(text, None, system_id)
    }

    /// Parse raw bytes; the encoding is sniffed from BOM or the XML
    /// declaration.
    pub fn parse_bytes(
        &mut self,
        bytes: &[u8],
        system_id: Option<&str>,
    ) -> Result<BuildOutput, XmlError> {
        let decoded = decode_bytes(bytes, None)?;
        self.parse_decoded(&decoded.text, Some(decoded.encoding), system_id)
    }

    /// Drain and parse a reader. The abort token is honored between
    /// buffer refills as well as per event.
    pub fn parse_reader(
        &mut self,
        reader: &mut dyn Read,
        system_id: Option<&str>,
    ) -> Result<BuildOutput, XmlError> {
        let token = self.config.abort_token();
        let decoded = decode_reader(reader, None, &token)?;
        self.parse_decoded(&decoded.text, Some(decoded.encoding), system_id)
    }

    fn parse_decoded(
        &mut self,
        text: &str,
        encoding: Option<&str>,
        system_id: Option<&str>,
    ) -> Result<BuildOutput, XmlError> {
        // A fresh parse re-arms the token; an abort handle stays valid
        // across parses.
        self.config.abort_token().reset();
        let mut builder = DomBuilder::new(self.config.builder_config());
        builder.set_abort_token(self.config.abort_token());
        builder.set_filter(self.filter.take());
        let result = self
            .config
            .parse(text, encoding, system_id.map(Rc::from), &mut builder);
        self.filter = builder.take_filter();
        result?;
        builder
            .take_output()
            .ok_or_else(|| XmlError::Invariant("parse produced no document".into()))
    }
}

/// Event-forwarding parser.
pub struct SaxParser {
    config: PipelineConfig,
    adapter: SaxAdapter,
}

impl Default for SaxParser {
    fn default() -> Self {
        Self::new()
    }
}

impl SaxParser {
    pub fn new() -> Self {
        SaxParser {
            config: PipelineConfig::new(),
            adapter: SaxAdapter::new(),
        }
    }

    pub fn set_feature(&mut self, id: &str, value: bool) -> Result<(), XmlError> {
        self.config.set_feature(id, value)
    }

    pub fn feature(&self, id: &str) -> Result<bool, XmlError> {
        self.config.feature(id)
    }

    pub fn set_content_handler(&mut self, handler: Box<dyn crate::sax::SaxContentHandler>) {
        self.adapter.content = Some(handler);
    }

    pub fn set_lexical_handler(&mut self, handler: Box<dyn crate::sax::SaxLexicalHandler>) {
        self.adapter.lexical = Some(handler);
    }

    pub fn set_decl_handler(&mut self, handler: Box<dyn crate::sax::SaxDeclHandler>) {
        self.adapter.decl = Some(handler);
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.config.set_error_handler(handler);
    }

    pub fn reporter(&self) -> SharedErrorReporter {
        self.config.reporter()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle::new(self.config.abort_token())
    }

    pub fn parse_str(&mut self, text: &str, system_id: Option<&str>) -> Result<(), XmlError> {
        self.config.abort_token().reset();
        let prefixes = self
            .config
            .feature(NAMESPACE_PREFIXES_FEATURE)
            .unwrap_or(false);
        self.adapter.set_namespace_prefixes(prefixes);
        let adapter = &mut self.adapter;
        self.config
            .parse(text, None, system_id.map(Rc::from), adapter)
    }

    pub fn parse_bytes(&mut self, bytes: &[u8], system_id: Option<&str>) -> Result<(), XmlError> {
        let decoded = decode_bytes(bytes, None)?;
        self.config.abort_token().reset();
        let prefixes = self
            .config
            .feature(NAMESPACE_PREFIXES_FEATURE)
            .unwrap_or(false);
        self.adapter.set_namespace_prefixes(prefixes);
        let adapter = &mut self.adapter;
        self.config.parse(
            &decoded.text,
            Some(decoded.encoding),
            system_id.map(Rc::from),
            adapter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::BuildOutput;

    #[test]
    fn parse_str_builds_a_tree() {
        let mut parser = DomParser::new();
        let output = parser.parse_str("<a><b>text</b></a>", None).unwrap();
        let doc = match output {
            BuildOutput::Tree(doc) => doc,
            BuildOutput::Deferred(_) => panic!("expected an eager tree"),
        };
        let root = doc.document_element().unwrap();
        assert_eq!(doc.node_name(root).as_ref(), "a");
    }

    #[test]
    fn deferred_feature_switches_output() {
        let mut parser = DomParser::new();
        parser
            .set_feature(crate::config::DEFER_NODE_EXPANSION_FEATURE, true)
            .unwrap();
        let output = parser.parse_str("<a/>", None).unwrap();
        assert!(matches!(output, BuildOutput::Deferred(_)));
    }

    #[test]
    fn fatal_errors_surface() {
        let mut parser = DomParser::new();
        let err = parser.parse_str("<a><b></a>", None).unwrap_err();
        assert!(matches!(err, XmlError::Fatal(_)));
        assert!(parser.reporter().borrow().fatal_seen());
    }
}
