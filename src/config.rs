//! Pipeline configuration: the recognized feature/property vocabulary
//! and the assembly of scanner, stages and consumer into a running
//! parse.
//!
//! Setters are validated synchronously: an unknown id and a recognized
//! but unsupported value are distinct error kinds, and critical ids are
//! locked while a parse is in progress. Mutations mark the settings
//! changed; the stage list is rebuilt lazily on the next parse, so the
//! pipeline shape is always a pure function of configuration state.
//! The XML 1.1 scanner is constructed once, on first contact with a
//! 1.1 document; both version pipelines share the error reporter and
//! the stage list.

use std::cell::Cell;
use std::rc::Rc;

use const_format::concatcp;

use crate::{
    abort::{AbortToken, PoisonConsumer},
    builder::{BuilderConfig, BuilderVariant},
    chvalid::XmlVersion,
    error::{ErrorHandler, SharedErrorReporter, XmlError, shared_reporter},
    event::{PipelineConsumer, deliver},
    scanner::DocumentScanner,
    stages::{
        DtdValidator, NamespaceBinder, PipelineStage, SchemaValidatorStage, SharedTypeProvider,
        dispatch,
    },
};

/// Prefix of every recognized feature id.
pub const FEATURE_PREFIX: &str = "http://xylem.rs/xml/features/";
/// Prefix of every recognized property id.
pub const PROPERTY_PREFIX: &str = "http://xylem.rs/xml/properties/";

pub const NAMESPACES_FEATURE: &str = concatcp!(FEATURE_PREFIX, "namespaces");
pub const VALIDATION_FEATURE: &str = concatcp!(FEATURE_PREFIX, "validation");
pub const SCHEMA_VALIDATION_FEATURE: &str = concatcp!(FEATURE_PREFIX, "validation/schema");
pub const LOAD_EXTERNAL_DTD_FEATURE: &str = concatcp!(FEATURE_PREFIX, "load-external-dtd");
pub const CREATE_ENTITY_REF_NODES_FEATURE: &str =
    concatcp!(FEATURE_PREFIX, "dom/create-entity-ref-nodes");
pub const INCLUDE_COMMENTS_FEATURE: &str = concatcp!(FEATURE_PREFIX, "include-comments");
pub const CREATE_CDATA_NODES_FEATURE: &str = concatcp!(FEATURE_PREFIX, "create-cdata-nodes");
pub const INCLUDE_IGNORABLE_WHITESPACE_FEATURE: &str =
    concatcp!(FEATURE_PREFIX, "dom/include-ignorable-whitespace");
pub const DEFER_NODE_EXPANSION_FEATURE: &str = concatcp!(FEATURE_PREFIX, "dom/defer-node-expansion");
/// SAX surface: report xmlns attributes to content handlers.
pub const NAMESPACE_PREFIXES_FEATURE: &str = concatcp!(FEATURE_PREFIX, "namespace-prefixes");

pub const DOCUMENT_CLASS_NAME_PROPERTY: &str =
    concatcp!(PROPERTY_PREFIX, "dom/document-class-name");

/// Ids that cannot be flipped while a parse is running.
const CRITICAL_FEATURES: [&str; 4] = [
    NAMESPACES_FEATURE,
    VALIDATION_FEATURE,
    SCHEMA_VALIDATION_FEATURE,
    DEFER_NODE_EXPANSION_FEATURE,
];

/// Central feature/property registry plus the wired pipeline.
pub struct PipelineConfig {
    reporter: SharedErrorReporter,
    abort: AbortToken,
    in_progress: Rc<Cell<bool>>,
    settings_changed: bool,

    namespaces: bool,
    validation: bool,
    schema_validation: bool,
    load_external_dtd: bool,
    create_entity_ref_nodes: bool,
    include_comments: bool,
    create_cdata_nodes: bool,
    include_ignorable_whitespace: bool,
    defer_node_expansion: bool,
    namespace_prefixes: bool,
    document_class: BuilderVariant,

    scanner_10: DocumentScanner,
    scanner_11: Option<DocumentScanner>,
    stages: Vec<Box<dyn PipelineStage>>,
    type_provider: Option<SharedTypeProvider>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        let reporter = shared_reporter();
        let abort = AbortToken::new();
        let mut scanner_10 = DocumentScanner::new(XmlVersion::Xml10, reporter.clone());
        scanner_10.set_abort_token(abort.clone());
        PipelineConfig {
            reporter,
            abort,
            in_progress: Rc::new(Cell::new(false)),
            settings_changed: true,
            namespaces: true,
            validation: false,
            schema_validation: false,
            load_external_dtd: false,
            create_entity_ref_nodes: true,
            include_comments: true,
            create_cdata_nodes: true,
            include_ignorable_whitespace: true,
            defer_node_expansion: false,
            namespace_prefixes: false,
            document_class: BuilderVariant::Native,
            scanner_10,
            scanner_11: None,
            stages: Vec::new(),
            type_provider: None,
        }
    }

    pub fn reporter(&self) -> SharedErrorReporter {
        self.reporter.clone()
    }

    pub fn abort_token(&self) -> AbortToken {
        self.abort.clone()
    }

    pub fn set_error_handler(&mut self, handler: ErrorHandler) {
        self.reporter.borrow_mut().set_handler(handler);
    }

    pub fn set_type_provider(&mut self, provider: Option<SharedTypeProvider>) {
        self.type_provider = provider;
        self.settings_changed = true;
    }

    fn check_not_parsing(&self, id: &str) -> Result<(), XmlError> {
        if self.in_progress.get() && CRITICAL_FEATURES.contains(&id) {
            Err(XmlError::ConfigDuringParse(id.to_string()))
        } else {
            Ok(())
        }
    }

    /// Set a feature flag. Unknown ids and recognized-but-unsupported
    /// states report distinct error kinds, synchronously.
    pub fn set_feature(&mut self, id: &str, value: bool) -> Result<(), XmlError> {
        self.check_not_parsing(id)?;
        match id {
            NAMESPACES_FEATURE => self.namespaces = value,
            VALIDATION_FEATURE => self.validation = value,
            SCHEMA_VALIDATION_FEATURE => self.schema_validation = value,
            LOAD_EXTERNAL_DTD_FEATURE => {
                // External subsets are never fetched by this pipeline.
                if value {
                    return Err(XmlError::FeatureNotSupported(id.to_string()));
                }
                self.load_external_dtd = false;
            }
            CREATE_ENTITY_REF_NODES_FEATURE => self.create_entity_ref_nodes = value,
            INCLUDE_COMMENTS_FEATURE => self.include_comments = value,
            CREATE_CDATA_NODES_FEATURE => self.create_cdata_nodes = value,
            INCLUDE_IGNORABLE_WHITESPACE_FEATURE => self.include_ignorable_whitespace = value,
            DEFER_NODE_EXPANSION_FEATURE => self.defer_node_expansion = value,
            NAMESPACE_PREFIXES_FEATURE => self.namespace_prefixes = value,
            _ => return Err(XmlError::FeatureNotRecognized(id.to_string())),
        }
        self.settings_changed = true;
        Ok(())
    }

    pub fn feature(&self, id: &str) -> Result<bool, XmlError> {
        match id {
            NAMESPACES_FEATURE => Ok(self.namespaces),
            VALIDATION_FEATURE => Ok(self.validation),
            SCHEMA_VALIDATION_FEATURE => Ok(self.schema_validation),
            LOAD_EXTERNAL_DTD_FEATURE => Ok(self.load_external_dtd),
            CREATE_ENTITY_REF_NODES_FEATURE => Ok(self.create_entity_ref_nodes),
            INCLUDE_COMMENTS_FEATURE => Ok(self.include_comments),
            CREATE_CDATA_NODES_FEATURE => Ok(self.create_cdata_nodes),
            INCLUDE_IGNORABLE_WHITESPACE_FEATURE => Ok(self.include_ignorable_whitespace),
            DEFER_NODE_EXPANSION_FEATURE => Ok(self.defer_node_expansion),
            NAMESPACE_PREFIXES_FEATURE => Ok(self.namespace_prefixes),
            _ => Err(XmlError::FeatureNotRecognized(id.to_string())),
        }
    }

    /// Set a string-valued property.
    pub fn set_property(&mut self, id: &str, value: &str) -> Result<(), XmlError> {
        self.check_not_parsing(id)?;
        match id {
            DOCUMENT_CLASS_NAME_PROPERTY => {
                let Some(variant) = BuilderVariant::from_class_name(value) else {
                    return Err(XmlError::PropertyNotSupported(format!(
                        "{id} = \"{value}\""
                    )));
                };
                self.document_class = variant;
            }
            _ => return Err(XmlError::PropertyNotRecognized(id.to_string())),
        }
        self.settings_changed = true;
        Ok(())
    }

    pub fn property(&self, id: &str) -> Result<String, XmlError> {
        match id {
            DOCUMENT_CLASS_NAME_PROPERTY => Ok(match self.document_class {
                BuilderVariant::Generic => "generic",
                BuilderVariant::Native => "native",
                BuilderVariant::Deferred => "deferred",
            }
            .to_string()),
            _ => Err(XmlError::PropertyNotRecognized(id.to_string())),
        }
    }

    /// The builder-feature snapshot for the next parse.
    pub fn builder_config(&self) -> BuilderConfig {
        let variant = if self.defer_node_expansion {
            BuilderVariant::Deferred
        } else {
            self.document_class
        };
        BuilderConfig {
            variant,
            namespace_aware: self.namespaces,
            create_entity_ref_nodes: self.create_entity_ref_nodes,
            include_comments: self.include_comments,
            create_cdata_nodes: self.create_cdata_nodes,
            include_ignorable_whitespace: self.include_ignorable_whitespace,
        }
    }

    /// Rebuild the stage list from the declarative description if any
    /// setting changed since the last parse.
    pub fn reset(&mut self) {
        if !self.settings_changed {
            for stage in &mut self.stages {
                stage.reset();
            }
            return;
        }
        let mut stages: Vec<Box<dyn PipelineStage>> = Vec::new();
        if self.validation {
            stages.push(Box::new(DtdValidator::new(self.reporter.clone())));
        }
        if self.namespaces {
            stages.push(Box::new(NamespaceBinder::new(self.reporter.clone())));
        }
        if self.schema_validation {
            // The schema stage joins as the new tail when enabled.
            stages.push(Box::new(SchemaValidatorStage::new(
                self.type_provider.clone(),
            )));
        }
        log::debug!(
            "pipeline stages: [{}]",
            stages
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>()
                .join(" -> ")
        );
        self.stages = stages;
        self.settings_changed = false;
    }

    /// Run one parse: sniff the version, pick that version's scanner,
    /// and stream scanner events through the stage list into the
    /// consumer. After an abort is observed, remaining deliveries go to
    /// the poison consumer so any in-flight callback unwinds with the
    /// cancellation signal.
    pub fn parse(
        &mut self,
        text: &str,
        encoding: Option<&str>,
        system_id: Option<Rc<str>>,
        consumer: &mut dyn PipelineConsumer,
    ) -> Result<(), XmlError> {
        self.reset();
        self.reporter.borrow_mut().reset();

        let version = DocumentScanner::sniff_version(text);
        if version == XmlVersion::Xml11 && self.scanner_11.is_none() {
            log::debug!("constructing the XML 1.1 scanner");
            let mut scanner = DocumentScanner::new(XmlVersion::Xml11, self.reporter.clone());
            scanner.set_abort_token(self.abort.clone());
            self.scanner_11 = Some(scanner);
        }

        let scanner = match version {
            XmlVersion::Xml10 => &mut self.scanner_10,
            XmlVersion::Xml11 => self.scanner_11.as_mut().expect("constructed above"),
        };
        scanner.reset();
        scanner.set_system_id(system_id);
        let stages = &mut self.stages;
        let abort = self.abort.clone();

        self.in_progress.set(true);
        let mut buffer = Vec::new();
        let mut poison = PoisonConsumer;
        let result = scanner.scan_document(text, encoding, &mut |event| {
            if abort.is_aborted() {
                return deliver(event, &mut poison);
            }
            dispatch(stages, event, &mut buffer)?;
            for ev in buffer.drain(..) {
                deliver(ev, consumer)?;
            }
            Ok(())
        });
        self.in_progress.set(false);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_and_unsupported_are_distinct() {
        let mut config = PipelineConfig::new();
        assert!(matches!(
            config.set_feature("http://example.com/feature", true),
            Err(XmlError::FeatureNotRecognized(_))
        ));
        assert!(matches!(
            config.set_feature(LOAD_EXTERNAL_DTD_FEATURE, true),
            Err(XmlError::FeatureNotSupported(_))
        ));
        assert!(matches!(
            config.set_property("http://example.com/property", "x"),
            Err(XmlError::PropertyNotRecognized(_))
        ));
        assert!(matches!(
            config.set_property(DOCUMENT_CLASS_NAME_PROPERTY, "reflective.Thing"),
            Err(XmlError::PropertyNotSupported(_))
        ));
    }

    #[test]
    fn critical_ids_locked_while_parsing() {
        let mut config = PipelineConfig::new();
        config.in_progress.set(true);
        assert!(matches!(
            config.set_feature(NAMESPACES_FEATURE, false),
            Err(XmlError::ConfigDuringParse(_))
        ));
        // Non-critical ids stay settable mid-parse.
        config.set_feature(INCLUDE_COMMENTS_FEATURE, false).unwrap();
        config.in_progress.set(false);
        config.set_feature(NAMESPACES_FEATURE, false).unwrap();
    }

    #[test]
    fn document_class_round_trip() {
        let mut config = PipelineConfig::new();
        config
            .set_property(DOCUMENT_CLASS_NAME_PROPERTY, "deferred")
            .unwrap();
        assert_eq!(
            config.property(DOCUMENT_CLASS_NAME_PROPERTY).unwrap(),
            "deferred"
        );
        assert_eq!(
            config.builder_config().variant,
            BuilderVariant::Deferred
        );
    }

    #[test]
    fn defaults_match_vocabulary() {
        let config = PipelineConfig::new();
        assert!(config.feature(NAMESPACES_FEATURE).unwrap());
        assert!(!config.feature(VALIDATION_FEATURE).unwrap());
        assert!(config.feature(CREATE_ENTITY_REF_NODES_FEATURE).unwrap());
        assert!(!config.feature(DEFER_NODE_EXPANSION_FEATURE).unwrap());
        assert!(config.feature("bogus").is_err());
    }

    #[test]
    fn stage_list_follows_features() {
        let mut config = PipelineConfig::new();
        config.reset();
        assert_eq!(config.stages.len(), 1); // namespace binder only
        config.set_feature(VALIDATION_FEATURE, true).unwrap();
        config.set_feature(SCHEMA_VALIDATION_FEATURE, true).unwrap();
        config.reset();
        let names: Vec<&str> = config.stages.iter().map(|s| s.name()).collect();
        assert_eq!(
            names,
            ["dtd-validator", "namespace-binder", "schema-validator"]
        );
        // Unchanged settings keep the same list on the next reset.
        config.reset();
        assert_eq!(config.stages.len(), 3);
    }
}
