//! Event-driven tree construction.
//!
//! [`DomBuilder`] consumes the Event Contract and drives either eager
//! construction into the arena [`Document`] or deferred construction
//! into the compact [`DeferredStore`], selected once per parse. It owns
//! the insertion cursor, the pending-text coalescing buffer, CDATA
//! state, DTD internal-subset reconstruction, entity-reference
//! expansion and splicing, base-URI propagation into entity content,
//! and the live content-filter checkpoints.

use std::rc::Rc;

use crate::{
    abort::AbortToken,
    chvalid::XmlVersion,
    dom::{
        AttrRecord, Document, NodeId, NodeType, XML_NS_NAMESPACE, XML_XML_NAMESPACE,
        deferred::{DeferredId, DeferredStore},
    },
    error::{DomError, XmlError},
    event::{
        ATTRIBUTE_DECLARED, ATTRIBUTE_PSVI, AttType, Attributes, Augmentations, ContentSpec,
        DefaultDecl, DocumentHandler, DtdHandler, ELEMENT_PSVI, Locator, QName, ResourceId,
        TypeInfo,
    },
};

pub mod filter;

pub use filter::{ContentFilter, FilterVerdict, WhatToShow};

/// Closed set of tree-builder variants, selected at configuration time
/// through the `document-class-name` property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuilderVariant {
    /// Plain tree without type-info, id-attribute or read-only
    /// bookkeeping.
    Generic,
    /// Full bookkeeping: declared types, id attributes, read-only
    /// entity subtrees, internal-subset capture.
    #[default]
    Native,
    /// Compact index-addressed construction, materialized on demand.
    Deferred,
}

impl BuilderVariant {
    /// Resolve a `document-class-name` property value; unknown names are
    /// rejected at configuration time.
    pub fn from_class_name(name: &str) -> Option<BuilderVariant> {
        match name {
            "generic" => Some(BuilderVariant::Generic),
            "native" => Some(BuilderVariant::Native),
            "deferred" => Some(BuilderVariant::Deferred),
            _ => None,
        }
    }
}

/// Feature snapshot taken by the builder at the start of a parse.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    pub variant: BuilderVariant,
    pub namespace_aware: bool,
    pub create_entity_ref_nodes: bool,
    pub include_comments: bool,
    pub create_cdata_nodes: bool,
    pub include_ignorable_whitespace: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        BuilderConfig {
            variant: BuilderVariant::Native,
            namespace_aware: true,
            create_entity_ref_nodes: true,
            include_comments: true,
            create_cdata_nodes: true,
            include_ignorable_whitespace: true,
        }
    }
}

/// What a finished parse produced.
#[derive(Debug)]
pub enum BuildOutput {
    Tree(Document),
    Deferred(DeferredStore),
}

impl BuildOutput {
    /// The arena form, materializing a deferred store if necessary.
    pub fn into_document(self) -> Document {
        match self {
            BuildOutput::Tree(doc) => doc,
            BuildOutput::Deferred(store) => store.materialize(),
        }
    }
}

/// The tree-building state machine.
pub struct DomBuilder {
    config: BuilderConfig,
    filter: Option<Box<dyn ContentFilter>>,
    abort: AbortToken,

    // Eager construction state.
    doc: Option<Document>,
    current_node: Option<NodeId>,
    current_cdata: Option<NodeId>,
    /// The document element; the filter is never consulted for it.
    root_element: Option<NodeId>,
    doctype: Option<NodeId>,
    current_entity_decl: Option<NodeId>,

    // Deferred construction state.
    store: Option<DeferredStore>,
    current_index: Option<DeferredId>,
    current_cdata_index: Option<DeferredId>,
    doctype_index: Option<DeferredId>,
    deferred_entity_decl: Option<DeferredId>,

    // State shared by both modes.
    pending_text: String,
    /// True when the next characters callback must not assume the last
    /// child is continuable text. Forced true after any node removal or
    /// skip so buffered data is not lost.
    first_chunk: bool,
    in_dtd: bool,
    in_dtd_external_subset: bool,
    in_cdata_section: bool,
    /// Suppresses filter checkpoints inside an expanded entity.
    in_entity_ref: bool,
    filter_reject: bool,
    rejected_element_depth: u32,
    /// Per-element record of pending SKIP decisions, so the matching
    /// end-element knows whether children were attached a level up.
    skipped_elem_stack: Vec<bool>,
    base_uri_stack: Vec<Rc<str>>,
    internal_subset: Option<String>,
}

impl DomBuilder {
    pub fn new(config: BuilderConfig) -> Self {
        DomBuilder {
            config,
            filter: None,
            abort: AbortToken::new(),
            doc: None,
            current_node: None,
            current_cdata: None,
            root_element: None,
            doctype: None,
            current_entity_decl: None,
            store: None,
            current_index: None,
            current_cdata_index: None,
            doctype_index: None,
            deferred_entity_decl: None,
            pending_text: String::new(),
            first_chunk: false,
            in_dtd: false,
            in_dtd_external_subset: false,
            in_cdata_section: false,
            in_entity_ref: false,
            filter_reject: false,
            rejected_element_depth: 0,
            skipped_elem_stack: Vec::new(),
            base_uri_stack: Vec::new(),
            internal_subset: None,
        }
    }

    pub fn set_filter(&mut self, filter: Option<Box<dyn ContentFilter>>) {
        self.filter = filter;
    }

    /// Hand the filter back to the owner, e.g. between parses.
    pub fn take_filter(&mut self) -> Option<Box<dyn ContentFilter>> {
        self.filter.take()
    }

    pub fn set_abort_token(&mut self, token: AbortToken) {
        self.abort = token;
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    fn deferred(&self) -> bool {
        self.config.variant == BuilderVariant::Deferred
    }

    fn native(&self) -> bool {
        self.config.variant == BuilderVariant::Native
    }

    /// Take the finished document; `None` before the first parse or
    /// after the output was already taken.
    pub fn take_output(&mut self) -> Option<BuildOutput> {
        if let Some(store) = self.store.take() {
            return Some(BuildOutput::Deferred(store));
        }
        self.doc.take().map(BuildOutput::Tree)
    }

    /// Drop all document-scoped state; required before reusing the
    /// builder for another document.
    pub fn reset(&mut self) {
        self.doc = None;
        self.current_node = None;
        self.current_cdata = None;
        self.root_element = None;
        self.doctype = None;
        self.current_entity_decl = None;
        self.store = None;
        self.current_index = None;
        self.current_cdata_index = None;
        self.doctype_index = None;
        self.deferred_entity_decl = None;
        self.pending_text.clear();
        self.first_chunk = false;
        self.in_dtd = false;
        self.in_dtd_external_subset = false;
        self.in_cdata_section = false;
        self.in_entity_ref = false;
        self.filter_reject = false;
        self.rejected_element_depth = 0;
        self.skipped_elem_stack.clear();
        self.base_uri_stack.clear();
        self.internal_subset = None;
    }

    // Internal helpers.

    fn doc_mut(&mut self) -> &mut Document {
        // Only reachable from callbacks after start_document.
        self.doc.as_mut().expect("document not started")
    }

    fn doc_ref(&self) -> &Document {
        self.doc.as_ref().expect("document not started")
    }

    fn store_mut(&mut self) -> &mut DeferredStore {
        self.store.as_mut().expect("document not started")
    }

    fn store_ref(&self) -> &DeferredStore {
        self.store.as_ref().expect("document not started")
    }

    fn cursor(&self) -> NodeId {
        self.current_node.expect("no insertion point")
    }

    fn cursor_index(&self) -> DeferredId {
        self.current_index.expect("no insertion point")
    }

    fn invariant(result: Result<(), DomError>, what: &str) -> Result<(), XmlError> {
        result.map_err(|e| XmlError::Invariant(format!("{what}: {e}")))
    }

    fn filter_mask(&self) -> Option<WhatToShow> {
        self.filter.as_ref().map(|f| f.what_to_show())
    }

    /// Post-construction filter checkpoint for `node`; `Accept` when no
    /// filter applies.
    fn accept_node(&mut self, node: NodeId) -> FilterVerdict {
        match (self.filter.as_mut(), self.doc.as_ref()) {
            (Some(filter), Some(doc)) => filter.accept_node(doc, node),
            _ => FilterVerdict::Accept,
        }
    }

    fn start_element_check(&mut self, node: NodeId) -> FilterVerdict {
        match (self.filter.as_mut(), self.doc.as_ref()) {
            (Some(filter), Some(doc)) => filter.start_element_check(doc, node),
            _ => FilterVerdict::Accept,
        }
    }

    /// Flush the pending coalescing buffer into the cursor's last child
    /// and run the text filter checkpoint.
    ///
    /// When the first characters call of a run arrives, its data lands
    /// in a fresh text node. On the next chunk the node's data moves
    /// into the buffer and subsequent chunks append there; this flush
    /// writes the buffer back. If a filter removes or skips a node,
    /// `first_chunk` must be forced true by the caller so no buffered
    /// data is lost.
    fn set_character_data(&mut self, saw_chars: bool) -> Result<(), XmlError> {
        self.first_chunk = saw_chars;

        let Some(current) = self.current_node else {
            return Ok(());
        };
        let Some(child) = self.doc_ref().last_child(current) else {
            return Ok(());
        };
        let child_is_text = self.doc_ref().node_type(child) == NodeType::Text;
        if !self.pending_text.is_empty() {
            if child_is_text {
                let data = std::mem::take(&mut self.pending_text);
                self.doc_mut().set_text_data(child, data);
            } else {
                self.pending_text.clear();
            }
        }

        if !self.in_entity_ref
            && child_is_text
            && self.filter_mask().is_some_and(|m| m.shows(NodeType::Text))
        {
            match self.accept_node(child) {
                FilterVerdict::Interrupt => return Err(XmlError::Cancelled),
                // Text has no children, so reject reduces to skip.
                FilterVerdict::Reject | FilterVerdict::Skip => {
                    let doc = self.doc_mut();
                    Self::invariant(doc.remove_child(current, child), "removing filtered text")?;
                }
                FilterVerdict::Accept => {}
            }
        }
        Ok(())
    }

    /// Stamp `xml:base` (elements) or the base-URI slot (processing
    /// instructions) onto a node promoted out of an entity whose base
    /// differs from the document's.
    fn handle_base_uri(&mut self, node: NodeId, base: Option<&Rc<str>>) {
        if !self.native() {
            return;
        }
        let base = base
            .cloned()
            .or_else(|| self.base_uri_stack.last().cloned());
        let Some(base) = base else { return };
        let namespace_aware = self.config.namespace_aware;
        let doc = self.doc_mut();
        if doc.document_uri().is_some_and(|uri| uri.as_ref() == base.as_ref()) {
            return;
        }
        match doc.node_type(node) {
            NodeType::Element => {
                // An explicit xml:base wins over the entity's base.
                let already = if namespace_aware {
                    doc.get_attribute_ns(node, Some(XML_XML_NAMESPACE), "base")
                        .is_some()
                } else {
                    doc.get_attribute(node, "xml:base").is_some()
                };
                if already {
                    return;
                }
                let mut name = QName::from_raw("xml:base");
                if namespace_aware {
                    name.uri = Some(Rc::from(XML_XML_NAMESPACE));
                }
                let attr = AttrRecord::new(name, base.as_ref());
                doc.set_attribute_node_ns(node, attr);
            }
            NodeType::ProcessingInstruction => {
                doc.set_pi_base_uri(node, base);
            }
            _ => {}
        }
    }

    /// Resolve an attribute's declared type from its augmentations:
    /// PSVI member type preferred over its type, else the DTD declared
    /// type string. Returns `(type_name, is_id)`.
    fn resolve_attr_type(&self, attr: &crate::event::Attribute) -> (Option<Rc<str>>, bool) {
        let psvi = attr.augmentations.type_info(ATTRIBUTE_PSVI);
        if let Some(psvi) = psvi.filter(|_| self.config.namespace_aware) {
            let ty = psvi.effective_type().cloned();
            return (ty, psvi.is_id);
        }
        let declared = attr.augmentations.flag(ATTRIBUTE_DECLARED);
        if declared {
            let ty = attr.decl_type.clone();
            let id = ty.as_deref() == Some("ID");
            (ty, id)
        } else {
            (None, false)
        }
    }

    fn element_psvi_type(&self, augs: &Augmentations) -> Option<TypeInfo> {
        augs.type_info(ELEMENT_PSVI).cloned()
    }

    fn append_to_cursor(&mut self, node: NodeId, what: &str) -> Result<(), XmlError> {
        let current = self.cursor();
        let doc = self.doc_mut();
        Self::invariant(doc.append_child(current, node), what)
    }

    /// Quote a literal for internal-subset reconstruction the way the
    /// declaration scanner saw it.
    fn push_quoted(out: &mut String, value: &str) {
        let quote = if value.contains('"') { '\'' } else { '"' };
        out.push(quote);
        out.push_str(value);
        out.push(quote);
    }

    fn subset_push(&mut self, piece: &str) {
        if self.in_dtd_external_subset {
            return;
        }
        if let Some(subset) = self.internal_subset.as_mut() {
            subset.push_str(piece);
        }
    }

    fn subset_external_id(out: &mut String, identifier: &ResourceId) {
        if let Some(public) = identifier.public_id.as_deref() {
            out.push_str("PUBLIC ");
            Self::push_quoted(out, public);
            if let Some(system) = identifier.system_id.as_deref() {
                out.push(' ');
                Self::push_quoted(out, system);
            }
        } else if let Some(system) = identifier.system_id.as_deref() {
            out.push_str("SYSTEM ");
            Self::push_quoted(out, system);
        }
    }

    fn find_deferred_entity_decl(&self, doctype: DeferredId, name: &str) -> Option<DeferredId> {
        let store = self.store_ref();
        store.children_of(doctype).into_iter().find(|&n| {
            store.node_kind(n) == NodeType::Entity
                && store.node_name(n).is_some_and(|s| s.as_ref() == name)
        })
    }

    /// Deferred-mode counterpart of [`Self::handle_base_uri`]; elements
    /// promoted out of an entity get an `xml:base` attribute row.
    fn handle_deferred_base_uri(&mut self, node: DeferredId, base: Option<&Rc<str>>) {
        let Some(base) = base else { return };
        let store = self.store_mut();
        if store.document_uri().is_some_and(|uri| uri.as_ref() == base.as_ref()) {
            return;
        }
        if store.node_kind(node) != NodeType::Element || store.has_attribute(node, "xml:base") {
            return;
        }
        store.set_deferred_attribute(
            node,
            Rc::from("xml:base"),
            Some(Rc::from(XML_XML_NAMESPACE)),
            base.clone(),
            true,
            false,
            None,
        );
    }

    /// Create the entity declaration node under the doctype unless a
    /// declaration of that name already exists (first one wins).
    fn add_entity_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        notation: Option<&str>,
    ) -> Result<(), XmlError> {
        if name.starts_with('%') {
            return Ok(());
        }
        if self.deferred() {
            let Some(dt) = self.doctype_index else {
                return Ok(());
            };
            let store = self.store_mut();
            let exists = store.children_of(dt).into_iter().any(|n| {
                store.node_kind(n) == NodeType::Entity
                    && store.node_name(n).is_some_and(|s| s.as_ref() == name)
            });
            if exists {
                return Ok(());
            }
            let entity = store.create_entity_decl(
                Rc::from(name),
                public_id.map(Rc::from),
                system_id.map(Rc::from),
                notation.map(Rc::from),
            );
            store.append_child(dt, entity);
            return Ok(());
        }
        if !self.native() {
            return Ok(());
        }
        let Some(dt) = self.doctype else {
            return Ok(());
        };
        if self.doc_mut().find_entity_decl(dt, name).is_some() {
            return Ok(());
        }
        let doc = self.doc_mut();
        let entity = doc.create_entity_decl(
            Rc::from(name),
            public_id.map(Rc::from),
            system_id.map(Rc::from),
            notation.map(Rc::from),
        );
        Self::invariant(doc.append_child(dt, entity), "adding entity declaration")
    }
}

impl DocumentHandler for DomBuilder {
    fn start_document(
        &mut self,
        locator: &Locator,
        encoding: Option<&str>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        self.reset();
        log::trace!("startDocument ({:?})", self.config.variant);
        if self.deferred() {
            let mut store = DeferredStore::new();
            store.set_document_uri(locator.system_id.clone());
            store.set_input_encoding(encoding.map(Rc::from));
            self.current_index = Some(store.document());
            self.store = Some(store);
        } else {
            let mut doc = Document::new();
            doc.set_document_uri(locator.system_id.clone());
            doc.set_input_encoding(encoding.map(Rc::from));
            self.current_node = Some(doc.root());
            self.doc = Some(doc);
        }
        Ok(())
    }

    fn xml_decl(
        &mut self,
        version: XmlVersion,
        encoding: Option<&str>,
        standalone: Option<bool>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        let version = Some(Rc::from(version.as_str()));
        let encoding = encoding.map(Rc::from);
        if self.deferred() {
            self.store_mut().set_xml_decl(version, encoding, standalone);
        } else {
            self.doc_mut().set_xml_decl(version, encoding, standalone);
        }
        Ok(())
    }

    fn doctype_decl(
        &mut self,
        name: &str,
        public_id: Option<&str>,
        system_id: Option<&str>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        if self.deferred() {
            let store = self.store_mut();
            let dt = store.create_doctype(
                Rc::from(name),
                public_id.map(Rc::from),
                system_id.map(Rc::from),
            );
            store.append_child(DeferredId::DOCUMENT, dt);
            self.doctype_index = Some(dt);
        } else if self.native() {
            let doc = self.doc_mut();
            let dt = doc.create_document_type(
                Rc::from(name),
                public_id.map(Rc::from),
                system_id.map(Rc::from),
            );
            Self::invariant(doc.append_child(NodeId::DOCUMENT, dt), "adding doctype")?;
            self.doctype = Some(dt);
        }
        Ok(())
    }

    fn start_element(
        &mut self,
        name: &QName,
        attributes: &mut Attributes,
        augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        if self.deferred() {
            let el = {
                let uri = if self.config.namespace_aware {
                    name.uri.clone()
                } else {
                    None
                };
                self.store_mut().create_element(uri, name.raw.clone())
            };
            // Reverse order: the store prepends, so document order is
            // restored when the attribute chain is walked forward.
            for i in (0..attributes.len()).rev() {
                let attr = attributes.get(i).expect("attribute index in range");
                let (ty, id) = self.resolve_attr_type(attr);
                self.store_mut().set_deferred_attribute(
                    el,
                    attr.name.raw.clone(),
                    attr.name.uri.clone(),
                    Rc::from(attr.value.as_str()),
                    attr.specified,
                    id,
                    ty,
                );
            }
            let current = self.cursor_index();
            self.store_mut().append_child(current, el);
            self.current_index = Some(el);
            return Ok(());
        }

        if self.filter_reject {
            self.rejected_element_depth += 1;
            return Ok(());
        }

        let el = self.doc_mut().create_element(name.clone());
        let mut seen_schema_default = false;
        for i in 0..attributes.len() {
            let attr = attributes.get(i).expect("attribute index in range");
            let specified = attr.specified;
            let (ty, id) = self.resolve_attr_type(attr);
            let record = AttrRecord::new(attr.name.clone(), attr.value.clone());
            // A schema-defaulted attribute that is unprefixed but
            // namespace-qualified must insert through the namespace
            // path, or it could overwrite another attribute with the
            // same local name.
            let name = &attr.name;
            let ns_significant = name.uri.is_some()
                && name.uri.as_deref() != Some(XML_NS_NAMESPACE)
                && name.prefix.is_none();
            let doc = self.doc_mut();
            let slot = if !specified && (seen_schema_default || ns_significant) {
                seen_schema_default = true;
                doc.set_attribute_node_ns(el, record)
            } else {
                doc.set_attribute_node(el, record)
            };
            if self.native() {
                let doc = self.doc_mut();
                doc.set_attribute_type(el, slot, ty);
                if id {
                    doc.set_id_attribute(el, slot);
                }
                // The specified flag must be assigned after the value;
                // value assignment flips it to true as a side effect.
                doc.set_attribute_specified(el, slot, specified);
            }
        }
        self.set_character_data(false)?;

        if self.config.namespace_aware
            && self.native()
            && let Some(info) = self.element_psvi_type(augs)
        {
            self.doc_mut().set_element_type_info(el, info);
        }

        if self.filter.is_some() && !self.in_entity_ref {
            if self.root_element.is_none() {
                // The root element is never subject to filtering.
                self.root_element = Some(el);
            } else {
                match self.start_element_check(el) {
                    FilterVerdict::Interrupt => return Err(XmlError::Cancelled),
                    FilterVerdict::Reject => {
                        self.filter_reject = true;
                        self.rejected_element_depth = 0;
                        return Ok(());
                    }
                    FilterVerdict::Skip => {
                        // Children will attach to the current cursor;
                        // buffered text must not be lost.
                        self.first_chunk = true;
                        self.skipped_elem_stack.push(true);
                        return Ok(());
                    }
                    FilterVerdict::Accept => {
                        if !self.skipped_elem_stack.is_empty() {
                            self.skipped_elem_stack.push(false);
                        }
                    }
                }
            }
        }
        self.append_to_cursor(el, "appending element")?;
        self.current_node = Some(el);
        Ok(())
    }

    fn end_element(&mut self, _name: &QName, augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        if self.deferred() {
            if let Some(info) = self.element_psvi_type(augs) {
                let current = self.cursor_index();
                let ty = info.effective_type().cloned();
                self.store_mut().set_type_info(current, ty);
            }
            let current = self.cursor_index();
            self.current_index = self.store_mut().parent_of(current);
            return Ok(());
        }

        // Union member types only become known at end of element.
        if self.config.namespace_aware
            && self.native()
            && !self.filter_reject
            && let Some(info) = self.element_psvi_type(augs)
        {
            let current = self.cursor();
            self.doc_mut().set_element_type_info(current, info);
        }

        if self.filter.is_some() {
            if self.filter_reject {
                if self.rejected_element_depth == 0 {
                    self.filter_reject = false;
                } else {
                    self.rejected_element_depth -= 1;
                }
                return Ok(());
            }
            if let Some(skipped) = self.skipped_elem_stack.pop()
                && skipped
            {
                // Children already sit a level up; nothing to do.
                return Ok(());
            }
            self.set_character_data(false)?;
            let current = self.cursor();
            if Some(current) != self.root_element
                && !self.in_entity_ref
                && self.filter_mask().is_some_and(|m| m.shows(NodeType::Element))
            {
                match self.accept_node(current) {
                    FilterVerdict::Interrupt => return Err(XmlError::Cancelled),
                    FilterVerdict::Reject => {
                        let doc = self.doc_mut();
                        let parent = doc.parent_node(current).ok_or_else(|| {
                            XmlError::Invariant("rejected element has no parent".into())
                        })?;
                        Self::invariant(
                            doc.remove_child(parent, current),
                            "removing rejected element",
                        )?;
                        self.current_node = Some(parent);
                        return Ok(());
                    }
                    FilterVerdict::Skip => {
                        self.first_chunk = true;
                        let doc = self.doc_mut();
                        let parent = doc.parent_node(current).ok_or_else(|| {
                            XmlError::Invariant("skipped element has no parent".into())
                        })?;
                        for child in doc.child_nodes(current) {
                            Self::invariant(
                                doc.append_child(parent, child),
                                "splicing skipped element's child",
                            )?;
                        }
                        Self::invariant(
                            doc.remove_child(parent, current),
                            "removing skipped element",
                        )?;
                        self.current_node = Some(parent);
                        return Ok(());
                    }
                    FilterVerdict::Accept => {}
                }
            }
            self.current_node = self.doc_mut().parent_node(current);
        } else {
            self.set_character_data(false)?;
            let current = self.cursor();
            self.current_node = self.doc_mut().parent_node(current);
        }
        Ok(())
    }

    fn characters(&mut self, text: &str, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        if self.deferred() {
            // Normalization is the materializer's job in deferred mode.
            if self.in_cdata_section && self.config.create_cdata_nodes {
                if self.current_cdata_index.is_none() {
                    let cs = self.store_mut().create_cdata_section(Rc::from(text));
                    let current = self.cursor_index();
                    self.store_mut().append_child(current, cs);
                    self.current_cdata_index = Some(cs);
                    self.current_index = Some(cs);
                } else {
                    let txt = self.store_mut().create_text_node(Rc::from(text));
                    let current = self.cursor_index();
                    self.store_mut().append_child(current, txt);
                }
            } else if !self.in_dtd {
                if text.is_empty() {
                    return Ok(());
                }
                let txt = self.store_mut().create_text_node(Rc::from(text));
                let current = self.cursor_index();
                self.store_mut().append_child(current, txt);
            }
            return Ok(());
        }

        if self.filter_reject {
            return Ok(());
        }
        if self.in_cdata_section && self.config.create_cdata_nodes {
            if let Some(cdata) = self.current_cdata {
                self.doc_mut().append_text_data(cdata, text);
            } else {
                let current = self.cursor();
                let doc = self.doc_mut();
                let cdata = doc.create_cdata_section(text);
                Self::invariant(doc.append_child(current, cdata), "appending CDATA section")?;
                self.current_cdata = Some(cdata);
                self.current_node = Some(cdata);
            }
        } else if !self.in_dtd {
            // A union-typed element can produce an empty characters
            // call; it must not disturb coalescing state.
            if text.is_empty() {
                return Ok(());
            }
            let current = self.cursor();
            let last_text = self
                .doc_ref()
                .last_child(current)
                .filter(|&c| self.doc_ref().node_type(c) == NodeType::Text);
            if let Some(child) = last_text {
                // Collect the run in the pending buffer, taking over
                // the node's data on the first extra chunk.
                if self.first_chunk {
                    let prior = self.doc_mut().take_text_data(child);
                    self.pending_text.push_str(&prior);
                    self.first_chunk = false;
                }
                self.pending_text.push_str(text);
            } else {
                self.first_chunk = true;
                let doc = self.doc_mut();
                let node = doc.create_text_node(text);
                Self::invariant(doc.append_child(current, node), "appending text")?;
            }
        }
        Ok(())
    }

    fn ignorable_whitespace(
        &mut self,
        text: &str,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        if !self.config.include_ignorable_whitespace || self.filter_reject {
            return Ok(());
        }
        if self.deferred() {
            let txt = self.store_mut().create_text_node(Rc::from(text));
            let current = self.cursor_index();
            self.store_mut().append_child(current, txt);
            return Ok(());
        }
        let current = self.cursor();
        let doc = self.doc_mut();
        match doc.last_child(current) {
            Some(child) if doc.node_type(child) == NodeType::Text => {
                doc.append_text_data(child, text);
            }
            _ => {
                let node = doc.create_text_node(text);
                Self::invariant(doc.append_child(current, node), "appending whitespace")?;
            }
        }
        Ok(())
    }

    fn comment(&mut self, text: &str, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        if self.in_dtd {
            if self.internal_subset.is_some() && !self.in_dtd_external_subset {
                let mut piece = String::from("<!--");
                piece.push_str(text);
                piece.push_str("-->");
                self.subset_push(&piece);
            }
            return Ok(());
        }
        if !self.config.include_comments || self.filter_reject {
            return Ok(());
        }
        if self.deferred() {
            let node = self.store_mut().create_comment(Rc::from(text));
            let current = self.cursor_index();
            self.store_mut().append_child(current, node);
            return Ok(());
        }
        self.set_character_data(false)?;
        let current = self.cursor();
        let doc = self.doc_mut();
        let node = doc.create_comment(text);
        Self::invariant(doc.append_child(current, node), "appending comment")?;
        if !self.in_entity_ref
            && self.filter_mask().is_some_and(|m| m.shows(NodeType::Comment))
        {
            match self.accept_node(node) {
                FilterVerdict::Interrupt => return Err(XmlError::Cancelled),
                // Comments have no children: reject reduces to skip.
                FilterVerdict::Reject | FilterVerdict::Skip => {
                    let doc = self.doc_mut();
                    Self::invariant(doc.remove_child(current, node), "removing filtered comment")?;
                    self.first_chunk = true;
                }
                FilterVerdict::Accept => {}
            }
        }
        Ok(())
    }

    fn processing_instruction(
        &mut self,
        target: &str,
        data: Option<&str>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        if self.in_dtd {
            if self.internal_subset.is_some() && !self.in_dtd_external_subset {
                let mut piece = String::from("<?");
                piece.push_str(target);
                if let Some(data) = data {
                    piece.push(' ');
                    piece.push_str(data);
                }
                piece.push_str("?>");
                self.subset_push(&piece);
            }
            return Ok(());
        }
        if self.filter_reject {
            return Ok(());
        }
        if self.deferred() {
            let node = self
                .store_mut()
                .create_processing_instruction(Rc::from(target), data.map(Rc::from));
            let current = self.cursor_index();
            self.store_mut().append_child(current, node);
            return Ok(());
        }
        self.set_character_data(false)?;
        let current = self.cursor();
        let doc = self.doc_mut();
        let node = doc.create_processing_instruction(Rc::from(target), data.map(str::to_owned));
        Self::invariant(doc.append_child(current, node), "appending PI")?;
        if !self.in_entity_ref
            && self
                .filter_mask()
                .is_some_and(|m| m.shows(NodeType::ProcessingInstruction))
        {
            match self.accept_node(node) {
                FilterVerdict::Interrupt => return Err(XmlError::Cancelled),
                FilterVerdict::Reject | FilterVerdict::Skip => {
                    let doc = self.doc_mut();
                    Self::invariant(doc.remove_child(current, node), "removing filtered PI")?;
                    self.first_chunk = true;
                }
                FilterVerdict::Accept => {}
            }
        }
        Ok(())
    }

    fn start_cdata(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        self.in_cdata_section = true;
        if !self.deferred() {
            if self.filter_reject {
                return Ok(());
            }
            if self.config.create_cdata_nodes {
                self.set_character_data(false)?;
            }
        }
        Ok(())
    }

    fn end_cdata(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        self.in_cdata_section = false;
        if self.deferred() {
            if self.current_cdata_index.is_some() {
                let current = self.cursor_index();
                self.current_index = self.store_mut().parent_of(current);
                self.current_cdata_index = None;
            }
            return Ok(());
        }
        if self.filter_reject {
            return Ok(());
        }
        let Some(cdata) = self.current_cdata else {
            return Ok(());
        };
        if !self.in_entity_ref
            && self
                .filter_mask()
                .is_some_and(|m| m.shows(NodeType::CDATASection))
        {
            match self.accept_node(cdata) {
                FilterVerdict::Interrupt => return Err(XmlError::Cancelled),
                // CDATA sections have no child structure to keep.
                FilterVerdict::Reject | FilterVerdict::Skip => {
                    let doc = self.doc_mut();
                    let parent = doc.parent_node(cdata).ok_or_else(|| {
                        XmlError::Invariant("CDATA section has no parent".into())
                    })?;
                    Self::invariant(
                        doc.remove_child(parent, cdata),
                        "removing filtered CDATA section",
                    )?;
                    self.current_node = Some(parent);
                    self.current_cdata = None;
                    return Ok(());
                }
                FilterVerdict::Accept => {}
            }
        }
        let current = self.cursor();
        self.current_node = self.doc_mut().parent_node(current);
        self.current_cdata = None;
        Ok(())
    }

    fn start_general_entity(
        &mut self,
        name: &str,
        identifier: Option<&ResourceId>,
        encoding: Option<&str>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        let base = identifier.and_then(|id| id.expanded_system_id.clone());
        if let Some(base) = base.clone() {
            self.base_uri_stack.push(base);
        }
        if self.deferred() {
            let er = self
                .store_mut()
                .create_entity_reference(Rc::from(name), base);
            if let Some(dt) = self.doctype_index {
                let decl = self.find_deferred_entity_decl(dt, name);
                if let Some(decl) = decl {
                    self.deferred_entity_decl = Some(decl);
                    if let Some(encoding) = encoding {
                        self.store_mut()
                            .set_entity_input_encoding(decl, Rc::from(encoding));
                    }
                }
            }
            let current = self.cursor_index();
            self.store_mut().append_child(current, er);
            self.current_index = Some(er);
            return Ok(());
        }

        if self.filter_reject {
            return Ok(());
        }
        self.set_character_data(true)?;
        let er = self
            .doc_mut()
            .create_entity_reference(Rc::from(name), base);
        if self.native()
            && let Some(dt) = self.doctype
        {
            self.current_entity_decl = self.doc_mut().find_entity_decl(dt, name);
            if let (Some(decl), Some(encoding)) = (self.current_entity_decl, encoding) {
                self.doc_mut()
                    .set_entity_input_encoding(decl, Rc::from(encoding));
            }
        }
        self.in_entity_ref = true;
        self.append_to_cursor(er, "appending entity reference")?;
        // The expansion becomes the reference's children in both retain
        // modes; a retained reference goes read-only at the end call.
        self.current_node = Some(er);
        Ok(())
    }

    fn text_decl(
        &mut self,
        version: Option<&str>,
        encoding: Option<&str>,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        if self.in_dtd {
            return Ok(());
        }
        if self.deferred() {
            if let Some(decl) = self.deferred_entity_decl {
                self.store_mut().set_entity_info(
                    decl,
                    version.map(Rc::from),
                    encoding.map(Rc::from),
                );
            }
        } else if let Some(decl) = self.current_entity_decl
            && !self.filter_reject
        {
            self.doc_mut()
                .set_entity_xml_info(decl, version.map(Rc::from), encoding.map(Rc::from));
        }
        Ok(())
    }

    fn end_general_entity(&mut self, name: &str, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        self.base_uri_stack.pop();

        if self.deferred() {
            if let Some(dt) = self.doctype_index {
                self.deferred_entity_decl = self.find_deferred_entity_decl(dt, name);
            }
            let er = self.cursor_index();
            if let Some(decl) = self.deferred_entity_decl
                && self.store_ref().last_child_of(decl).is_none()
            {
                // First expansion backfills the declaration's children
                // with a copy of the expansion.
                let children = self.store_ref().children_of(er);
                for child in children {
                    let copy = self.store_mut().clone_subtree(child);
                    self.store_mut().append_child(decl, copy);
                }
            }
            if self.config.create_entity_ref_nodes {
                self.store_mut().set_read_only(er);
                self.current_index = self.store_ref().parent_of(er);
            } else {
                // Promote the children before the reference, then drop
                // the reference by resetting the last-child head.
                let er_base = self.store_ref().node_uri(er).cloned();
                for child in self.store_ref().children_of(er) {
                    self.handle_deferred_base_uri(child, er_base.as_ref());
                }
                let store = self.store_mut();
                let parent = store
                    .parent_of(er)
                    .expect("entity reference has a parent");
                let mut child = store.last_child_of(er);
                let last_child = child;
                let mut prev = er;
                while let Some(c) = child {
                    let sibling = store.real_prev_sibling_of(c);
                    store.insert_before(parent, c, prev);
                    prev = c;
                    child = sibling;
                }
                if last_child.is_some() {
                    store.set_as_last_child(parent, last_child);
                } else {
                    let sibling = store.real_prev_sibling_of(prev);
                    store.set_as_last_child(parent, sibling);
                }
                self.current_index = Some(parent);
            }
            self.deferred_entity_decl = None;
            return Ok(());
        }

        if self.filter_reject {
            return Ok(());
        }
        self.set_character_data(true)?;

        // Backfill the entity declaration's children on the first
        // expansion of this entity.
        if self.native()
            && let Some(dt) = self.doctype
        {
            let decl = self.doc_mut().find_entity_decl(dt, name);
            if let Some(decl) = decl
                && self.doc_mut().first_child(decl).is_none()
            {
                let er = self.cursor();
                let doc = self.doc_mut();
                doc.set_read_only(decl, false, true);
                for child in doc.child_nodes(er) {
                    let copy = doc.clone_subtree(child);
                    Self::invariant(
                        doc.append_child(decl, copy),
                        "backfilling entity declaration",
                    )?;
                }
                doc.set_read_only(decl, true, true);
            }
            self.current_entity_decl = None;
        }

        self.in_entity_ref = false;
        let mut remove_entity_ref = false;
        if self.config.create_entity_ref_nodes {
            let er = self.cursor();
            if self.native() {
                self.doc_mut().set_read_only(er, true, true);
            }
            if self
                .filter_mask()
                .is_some_and(|m| m.shows(NodeType::EntityReference))
            {
                match self.accept_node(er) {
                    FilterVerdict::Interrupt => return Err(XmlError::Cancelled),
                    FilterVerdict::Reject => {
                        let doc = self.doc_mut();
                        let parent = doc.parent_node(er).ok_or_else(|| {
                            XmlError::Invariant("entity reference has no parent".into())
                        })?;
                        Self::invariant(
                            doc.remove_child(parent, er),
                            "removing rejected entity reference",
                        )?;
                        self.current_node = Some(parent);
                        return Ok(());
                    }
                    FilterVerdict::Skip => {
                        self.first_chunk = true;
                        remove_entity_ref = true;
                    }
                    FilterVerdict::Accept => {
                        self.current_node = self.doc_mut().parent_node(er);
                    }
                }
            } else {
                self.current_node = self.doc_mut().parent_node(er);
            }
        }

        if !self.config.create_entity_ref_nodes || remove_entity_ref {
            // Splice the reference's children into its place,
            // coalescing text across the boundary.
            let er = self.cursor();
            let er_base = self.doc_mut().entity_reference_base_uri(er).cloned();
            let doc = self.doc_mut();
            let parent = doc
                .parent_node(er)
                .ok_or_else(|| XmlError::Invariant("entity reference has no parent".into()))?;
            let children = doc.child_nodes(er);
            if !children.is_empty() {
                let prev = doc.previous_sibling(er);
                let mut rest = &children[..];
                if let (Some(prev), Some(&first)) = (prev, children.first())
                    && doc.node_type(prev) == NodeType::Text
                    && doc.node_type(first) == NodeType::Text
                {
                    let data = doc.text_data(first).to_owned();
                    doc.append_text_data(prev, &data);
                    Self::invariant(doc.remove_child(er, first), "merging entity text")?;
                    rest = &children[1..];
                }
                let promoted: Vec<NodeId> = rest.to_vec();
                for child in &promoted {
                    Self::invariant(
                        doc.insert_before(parent, *child, Some(er)),
                        "promoting entity child",
                    )?;
                }
                for child in promoted {
                    self.handle_base_uri(child, er_base.as_ref());
                }
            }
            let doc = self.doc_mut();
            Self::invariant(doc.remove_child(parent, er), "removing entity reference")?;
            self.current_node = Some(parent);
        }
        Ok(())
    }

    fn end_document(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        if self.deferred() {
            self.current_index = None;
        } else {
            self.set_character_data(false)?;
            self.current_node = None;
        }
        log::trace!("endDocument");
        Ok(())
    }
}

impl DtdHandler for DomBuilder {
    fn start_dtd(&mut self, locator: &Locator, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        self.in_dtd = true;
        if let Some(base) = locator.base_system_id.clone() {
            self.base_uri_stack.push(base);
        }
        if self.deferred() || self.native() {
            self.internal_subset = Some(String::with_capacity(1024));
        }
        Ok(())
    }

    fn end_dtd(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        self.in_dtd = false;
        self.base_uri_stack.pop();
        let subset = self
            .internal_subset
            .take()
            .filter(|subset| !subset.is_empty());
        let Some(subset) = subset else {
            return Ok(());
        };
        if self.deferred() {
            if let Some(dt) = self.doctype_index {
                self.store_mut().set_internal_subset(dt, Rc::from(subset));
            }
        } else if let Some(dt) = self.doctype {
            self.doc_mut().set_internal_subset(dt, subset);
        }
        Ok(())
    }

    fn start_external_subset(
        &mut self,
        identifier: &ResourceId,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        if let Some(base) = identifier.base_system_id.clone() {
            self.base_uri_stack.push(base);
        }
        self.in_dtd_external_subset = true;
        Ok(())
    }

    fn end_external_subset(&mut self, _augs: &mut Augmentations) -> Result<(), XmlError> {
        self.abort.check()?;
        self.in_dtd_external_subset = false;
        self.base_uri_stack.pop();
        Ok(())
    }

    fn element_decl(
        &mut self,
        name: &str,
        _spec: ContentSpec,
        model: &str,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        let mut piece = String::from("<!ELEMENT ");
        piece.push_str(name);
        piece.push(' ');
        piece.push_str(model);
        piece.push_str(">\n");
        self.subset_push(&piece);
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
        self.abort.check()?;
        let mut piece = String::from("<!ATTLIST ");
        piece.push_str(element);
        piece.push(' ');
        piece.push_str(attribute);
        piece.push(' ');
        piece.push_str(&att_type.to_string());
        match default {
            DefaultDecl::Required => piece.push_str(" #REQUIRED"),
            DefaultDecl::Implied => piece.push_str(" #IMPLIED"),
            DefaultDecl::Fixed(value) => {
                piece.push_str(" #FIXED ");
                Self::push_quoted(&mut piece, value);
            }
            DefaultDecl::Value(value) => {
                piece.push(' ');
                Self::push_quoted(&mut piece, value);
            }
        }
        piece.push_str(">\n");
        self.subset_push(&piece);
        Ok(())
    }

    fn internal_entity_decl(
        &mut self,
        name: &str,
        value: &str,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        let mut piece = String::from("<!ENTITY ");
        if let Some(pe_name) = name.strip_prefix('%') {
            piece.push_str("% ");
            piece.push_str(pe_name);
        } else {
            piece.push_str(name);
        }
        piece.push(' ');
        Self::push_quoted(&mut piece, value);
        piece.push_str(">\n");
        self.subset_push(&piece);
        self.add_entity_decl(name, None, None, None)
    }

    fn external_entity_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        let mut piece = String::from("<!ENTITY ");
        if let Some(pe_name) = name.strip_prefix('%') {
            piece.push_str("% ");
            piece.push_str(pe_name);
        } else {
            piece.push_str(name);
        }
        piece.push(' ');
        Self::subset_external_id(&mut piece, identifier);
        piece.push_str(">\n");
        self.subset_push(&piece);
        self.add_entity_decl(
            name,
            identifier.public_id.as_deref(),
            identifier.system_id.as_deref(),
            None,
        )
    }

    fn unparsed_entity_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        notation: &str,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        let mut piece = String::from("<!ENTITY ");
        piece.push_str(name);
        piece.push(' ');
        Self::subset_external_id(&mut piece, identifier);
        piece.push_str(" NDATA ");
        piece.push_str(notation);
        piece.push_str(">\n");
        self.subset_push(&piece);
        self.add_entity_decl(
            name,
            identifier.public_id.as_deref(),
            identifier.system_id.as_deref(),
            Some(notation),
        )
    }

    fn notation_decl(
        &mut self,
        name: &str,
        identifier: &ResourceId,
        _augs: &mut Augmentations,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        let mut piece = String::from("<!NOTATION ");
        piece.push_str(name);
        piece.push(' ');
        Self::subset_external_id(&mut piece, identifier);
        piece.push_str(">\n");
        self.subset_push(&piece);

        if self.deferred() {
            if let Some(dt) = self.doctype_index {
                let store = self.store_mut();
                let exists = store.children_of(dt).into_iter().any(|n| {
                    store.node_kind(n) == NodeType::Notation
                        && store.node_name(n).is_some_and(|s| s.as_ref() == name)
                });
                if !exists {
                    let node = store.create_notation_decl(
                        Rc::from(name),
                        identifier.public_id.clone(),
                        identifier.system_id.clone(),
                    );
                    store.append_child(dt, node);
                }
            }
            return Ok(());
        }
        if self.native()
            && let Some(dt) = self.doctype
        {
            let doc = self.doc_mut();
            let exists = doc.child_nodes(dt).into_iter().any(|n| {
                doc.node_type(n) == NodeType::Notation && doc.node_name(n).as_ref() == name
            });
            if !exists {
                let node = doc.create_notation(
                    Rc::from(name),
                    identifier.public_id.clone(),
                    identifier.system_id.clone(),
                );
                Self::invariant(doc.append_child(dt, node), "adding notation declaration")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Attribute;

    fn augs() -> Augmentations {
        Augmentations::new()
    }

    fn start_doc(b: &mut DomBuilder) {
        b.start_document(&Locator::default(), None, &mut augs())
            .unwrap();
    }

    fn start_el(b: &mut DomBuilder, name: &str) {
        b.start_element(&QName::from_raw(name), &mut Attributes::new(), &mut augs())
            .unwrap();
    }

    fn end_el(b: &mut DomBuilder, name: &str) {
        b.end_element(&QName::from_raw(name), &mut augs()).unwrap();
    }

    fn chars(b: &mut DomBuilder, text: &str) {
        b.characters(text, &mut augs()).unwrap();
    }

    fn finish(b: &mut DomBuilder) -> Document {
        b.end_document(&mut augs()).unwrap();
        b.take_output().expect("builder produced output").into_document()
    }

    fn config(variant: BuilderVariant) -> BuilderConfig {
        BuilderConfig {
            variant,
            ..BuilderConfig::default()
        }
    }

    /// Chunked character callbacks coalesce into exactly one text node.
    #[test]
    fn text_coalescing_across_chunks() {
        for variant in [BuilderVariant::Native, BuilderVariant::Deferred] {
            let mut b = DomBuilder::new(config(variant));
            start_doc(&mut b);
            start_el(&mut b, "root");
            for chunk in ["ab", "c", "def"] {
                chars(&mut b, chunk);
            }
            end_el(&mut b, "root");
            let doc = finish(&mut b);
            let root = doc.document_element().unwrap();
            let kids = doc.child_nodes(root);
            assert_eq!(kids.len(), 1, "variant {variant:?}");
            assert_eq!(doc.node_type(kids[0]), NodeType::Text);
            assert_eq!(doc.text_data(kids[0]), "abcdef");
        }
    }

    /// With create-entity-ref-nodes off, an entity expansion between two
    /// text runs collapses into one coalesced text node.
    #[test]
    fn entity_splice_round_trip() {
        for variant in [BuilderVariant::Native, BuilderVariant::Deferred] {
            let mut b = DomBuilder::new(BuilderConfig {
                variant,
                create_entity_ref_nodes: false,
                ..BuilderConfig::default()
            });
            start_doc(&mut b);
            start_el(&mut b, "root");
            chars(&mut b, "A");
            b.start_general_entity("e", None, None, &mut augs()).unwrap();
            chars(&mut b, "X");
            b.end_general_entity("e", &mut augs()).unwrap();
            chars(&mut b, "B");
            end_el(&mut b, "root");
            let doc = finish(&mut b);
            let root = doc.document_element().unwrap();
            let kids = doc.child_nodes(root);
            assert_eq!(kids.len(), 1, "variant {variant:?}");
            assert_eq!(doc.text_data(kids[0]), "AXB");
        }
    }

    /// Retained entity references keep the expansion as read-only
    /// children.
    #[test]
    fn retained_entity_reference_is_read_only() {
        let mut b = DomBuilder::new(config(BuilderVariant::Native));
        start_doc(&mut b);
        start_el(&mut b, "root");
        b.start_general_entity("e", None, None, &mut augs()).unwrap();
        chars(&mut b, "X");
        b.end_general_entity("e", &mut augs()).unwrap();
        end_el(&mut b, "root");
        let doc = finish(&mut b);
        let root = doc.document_element().unwrap();
        let kids = doc.child_nodes(root);
        assert_eq!(kids.len(), 1);
        assert_eq!(doc.node_type(kids[0]), NodeType::EntityReference);
        assert!(doc.is_read_only(kids[0]));
        let inner = doc.child_nodes(kids[0]);
        assert_eq!(doc.text_data(inner[0]), "X");
        assert!(doc.is_read_only(inner[0]));
    }

    struct VerdictFilter {
        start: Vec<(&'static str, FilterVerdict)>,
        end: Vec<(&'static str, FilterVerdict)>,
    }

    impl ContentFilter for VerdictFilter {
        fn start_element_check(&mut self, doc: &Document, element: NodeId) -> FilterVerdict {
            let name = doc.node_name(element);
            self.start
                .iter()
                .find(|(n, _)| *n == name.as_ref())
                .map(|(_, v)| *v)
                .unwrap_or_default()
        }

        fn accept_node(&mut self, doc: &Document, node: NodeId) -> FilterVerdict {
            let name = doc.node_name(node);
            self.end
                .iter()
                .find(|(n, _)| *n == name.as_ref())
                .map(|(_, v)| *v)
                .unwrap_or_default()
        }
    }

    /// Rejecting an element at start suppresses its entire subtree and
    /// construction resumes cleanly at the matching end.
    #[test]
    fn filter_reject_suppresses_subtree() {
        let mut b = DomBuilder::new(config(BuilderVariant::Native));
        b.set_filter(Some(Box::new(VerdictFilter {
            start: vec![("drop", FilterVerdict::Reject)],
            end: vec![],
        })));
        start_doc(&mut b);
        start_el(&mut b, "root");
        start_el(&mut b, "keep");
        end_el(&mut b, "keep");
        start_el(&mut b, "drop");
        start_el(&mut b, "nested");
        chars(&mut b, "invisible");
        start_el(&mut b, "deeper");
        end_el(&mut b, "deeper");
        end_el(&mut b, "nested");
        end_el(&mut b, "drop");
        start_el(&mut b, "after");
        end_el(&mut b, "after");
        end_el(&mut b, "root");
        let doc = finish(&mut b);
        let root = doc.document_element().unwrap();
        let names: Vec<String> = doc
            .child_nodes(root)
            .into_iter()
            .map(|n| doc.node_name(n).to_string())
            .collect();
        assert_eq!(names, ["keep", "after"]);
    }

    /// Skipping an element keeps its children, in order, at its former
    /// position.
    #[test]
    fn filter_skip_preserves_child_order() {
        let mut b = DomBuilder::new(config(BuilderVariant::Native));
        b.set_filter(Some(Box::new(VerdictFilter {
            start: vec![],
            end: vec![("wrap", FilterVerdict::Skip)],
        })));
        start_doc(&mut b);
        start_el(&mut b, "root");
        start_el(&mut b, "wrap");
        for child in ["c1", "c2", "c3"] {
            start_el(&mut b, child);
            end_el(&mut b, child);
        }
        end_el(&mut b, "wrap");
        end_el(&mut b, "root");
        let doc = finish(&mut b);
        let root = doc.document_element().unwrap();
        let names: Vec<String> = doc
            .child_nodes(root)
            .into_iter()
            .map(|n| doc.node_name(n).to_string())
            .collect();
        assert_eq!(names, ["c1", "c2", "c3"]);
    }

    /// A skip verdict at start attaches children directly to the parent.
    #[test]
    fn filter_skip_at_start() {
        let mut b = DomBuilder::new(config(BuilderVariant::Native));
        b.set_filter(Some(Box::new(VerdictFilter {
            start: vec![("wrap", FilterVerdict::Skip)],
            end: vec![],
        })));
        start_doc(&mut b);
        start_el(&mut b, "root");
        chars(&mut b, "pre");
        start_el(&mut b, "wrap");
        start_el(&mut b, "inner");
        end_el(&mut b, "inner");
        end_el(&mut b, "wrap");
        chars(&mut b, "post");
        end_el(&mut b, "root");
        let doc = finish(&mut b);
        let root = doc.document_element().unwrap();
        let kinds: Vec<NodeType> = doc
            .child_nodes(root)
            .into_iter()
            .map(|n| doc.node_type(n))
            .collect();
        assert_eq!(
            kinds,
            [NodeType::Text, NodeType::Element, NodeType::Text]
        );
    }

    /// The filter interrupt verdict raises the cancellation signal.
    #[test]
    fn filter_interrupt_cancels() {
        let mut b = DomBuilder::new(config(BuilderVariant::Native));
        b.set_filter(Some(Box::new(VerdictFilter {
            start: vec![("bomb", FilterVerdict::Interrupt)],
            end: vec![],
        })));
        start_doc(&mut b);
        start_el(&mut b, "root");
        let err = b
            .start_element(&QName::from_raw("bomb"), &mut Attributes::new(), &mut augs())
            .unwrap_err();
        assert!(err.is_cancelled());
    }

    /// A DTD-defaulted attribute keeps specified = false even though its
    /// value assignment would otherwise flip the flag.
    #[test]
    fn defaulted_attribute_stays_unspecified() {
        let mut b = DomBuilder::new(config(BuilderVariant::Native));
        start_doc(&mut b);
        let mut attrs = Attributes::new();
        let mut defaulted = Attribute::new(QName::from_raw("kind"), "fallback");
        defaulted.specified = false;
        defaulted.decl_type = Some(Rc::from("CDATA"));
        defaulted.augmentations.set_flag(ATTRIBUTE_DECLARED);
        attrs.push(defaulted);
        let mut explicit = Attribute::new(QName::from_raw("name"), "x");
        explicit.decl_type = Some(Rc::from("ID"));
        explicit.augmentations.set_flag(ATTRIBUTE_DECLARED);
        attrs.push(explicit);
        b.start_element(&QName::from_raw("root"), &mut attrs, &mut augs())
            .unwrap();
        end_el(&mut b, "root");
        let doc = finish(&mut b);
        let root = doc.document_element().unwrap();
        let kind = doc.get_attribute(root, "kind").unwrap();
        assert!(!kind.specified);
        assert_eq!(kind.decl_type.as_deref(), Some("CDATA"));
        let name = doc.get_attribute(root, "name").unwrap();
        assert!(name.specified);
        assert!(name.is_id);
    }

    /// Chunked CDATA content lands in a single section node; with the
    /// feature off it joins the surrounding text run.
    #[test]
    fn cdata_section_runs() {
        for variant in [BuilderVariant::Native, BuilderVariant::Deferred] {
            let mut b = DomBuilder::new(config(variant));
            start_doc(&mut b);
            start_el(&mut b, "root");
            b.start_cdata(&mut augs()).unwrap();
            chars(&mut b, "x");
            chars(&mut b, "y");
            b.end_cdata(&mut augs()).unwrap();
            end_el(&mut b, "root");
            let doc = finish(&mut b);
            let root = doc.document_element().unwrap();
            let kids = doc.child_nodes(root);
            assert_eq!(kids.len(), 1, "variant {variant:?}");
            assert_eq!(doc.node_type(kids[0]), NodeType::CDATASection);
            assert_eq!(doc.text_data(kids[0]), "xy");
        }

        let mut b = DomBuilder::new(BuilderConfig {
            create_cdata_nodes: false,
            ..BuilderConfig::default()
        });
        start_doc(&mut b);
        start_el(&mut b, "root");
        chars(&mut b, "a");
        b.start_cdata(&mut augs()).unwrap();
        chars(&mut b, "b");
        b.end_cdata(&mut augs()).unwrap();
        chars(&mut b, "c");
        end_el(&mut b, "root");
        let doc = finish(&mut b);
        let root = doc.document_element().unwrap();
        let kids = doc.child_nodes(root);
        assert_eq!(kids.len(), 1);
        assert_eq!(doc.text_data(kids[0]), "abc");
    }

    /// Comments and declarations inside the DTD reconstruct the internal
    /// subset literally and create no tree nodes.
    #[test]
    fn internal_subset_reconstruction() {
        let mut b = DomBuilder::new(config(BuilderVariant::Native));
        start_doc(&mut b);
        b.doctype_decl("root", None, None, &mut augs()).unwrap();
        b.start_dtd(&Locator::default(), &mut augs()).unwrap();
        b.internal_entity_decl("e", "v", &mut augs()).unwrap();
        b.comment("note", &mut augs()).unwrap();
        b.attribute_decl(
            "root",
            "id",
            &AttType::Id,
            &DefaultDecl::Implied,
            &mut augs(),
        )
        .unwrap();
        b.end_dtd(&mut augs()).unwrap();
        start_el(&mut b, "root");
        end_el(&mut b, "root");
        let doc = finish(&mut b);
        let dt = doc.doctype().unwrap();
        let subset = doc.internal_subset(dt).unwrap();
        assert_eq!(
            subset,
            "<!ENTITY e \"v\">\n<!--note--><!ATTLIST root id ID #IMPLIED>\n"
        );
        assert!(doc.find_entity_decl(dt, "e").is_some());
    }

    /// The first expansion of an entity backfills its declaration node
    /// with a read-only copy of the expansion.
    #[test]
    fn entity_declaration_backfill() {
        let mut b = DomBuilder::new(config(BuilderVariant::Native));
        start_doc(&mut b);
        b.doctype_decl("root", None, None, &mut augs()).unwrap();
        b.start_dtd(&Locator::default(), &mut augs()).unwrap();
        b.internal_entity_decl("e", "X", &mut augs()).unwrap();
        b.end_dtd(&mut augs()).unwrap();
        start_el(&mut b, "root");
        b.start_general_entity("e", None, None, &mut augs()).unwrap();
        chars(&mut b, "X");
        b.end_general_entity("e", &mut augs()).unwrap();
        end_el(&mut b, "root");
        let doc = finish(&mut b);
        let dt = doc.doctype().unwrap();
        let decl = doc.find_entity_decl(dt, "e").unwrap();
        let decl_kids = doc.child_nodes(decl);
        assert_eq!(decl_kids.len(), 1);
        assert_eq!(doc.text_data(decl_kids[0]), "X");
        assert!(doc.is_read_only(decl_kids[0]));
    }

    /// The deferred store and the eager builder produce identical trees
    /// for the same event sequence.
    #[test]
    fn deferred_matches_eager() {
        let drive = |variant: BuilderVariant| -> Document {
            let mut b = DomBuilder::new(BuilderConfig {
                variant,
                create_entity_ref_nodes: false,
                ..BuilderConfig::default()
            });
            start_doc(&mut b);
            b.doctype_decl("root", None, Some("root.dtd"), &mut augs())
                .unwrap();
            b.start_dtd(&Locator::default(), &mut augs()).unwrap();
            b.internal_entity_decl("e", "X", &mut augs()).unwrap();
            b.end_dtd(&mut augs()).unwrap();
            start_el(&mut b, "root");
            chars(&mut b, "A");
            b.start_general_entity("e", None, None, &mut augs()).unwrap();
            chars(&mut b, "X");
            b.end_general_entity("e", &mut augs()).unwrap();
            chars(&mut b, "B");
            b.comment("c", &mut augs()).unwrap();
            let mut attrs = Attributes::new();
            attrs.push(Attribute::new(QName::from_raw("a"), "1"));
            attrs.push(Attribute::new(QName::from_raw("b"), "2"));
            b.start_element(&QName::from_raw("child"), &mut attrs, &mut augs())
                .unwrap();
            b.start_cdata(&mut augs()).unwrap();
            chars(&mut b, "literal<>&");
            b.end_cdata(&mut augs()).unwrap();
            b.end_element(&QName::from_raw("child"), &mut augs())
                .unwrap();
            b.processing_instruction("pi", Some("data"), &mut augs())
                .unwrap();
            end_el(&mut b, "root");
            finish(&mut b)
        };
        let eager = drive(BuilderVariant::Native);
        let deferred = drive(BuilderVariant::Deferred);
        assert_eq!(eager.outline(), deferred.outline());
    }
}
