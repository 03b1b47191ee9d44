//! Arena-backed document tree.
//!
//! Nodes are rows in a flat growable arena addressed by [`NodeId`];
//! parent/child/sibling relationships are index links. This is the
//! primary tree representation; the compact store in [`deferred`]
//! materializes into it on demand.
//!
//! Structural constraints follow the DOM hierarchy rules: every
//! non-document node has exactly one parent outside a transient splice,
//! a document holds at most one element and one doctype, and read-only
//! subtrees reject mutation once the document-wide check is enabled.

use std::rc::Rc;

use crate::{
    error::DomError,
    event::{QName, TypeInfo},
};

pub mod deferred;

/// This is the namespace for the special xml: prefix predefined in the
/// XML Namespace specification.
pub const XML_XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";
pub const XML_NS_NAMESPACE: &str = "http://www.w3.org/2000/xmlns/";

/// Node kind vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    Element,
    /// Attributes are rows in the deferred store; in the arena they
    /// live in per-element attribute lists instead of the child tree.
    Attribute,
    Text,
    CDATASection,
    EntityReference,
    Entity,
    ProcessingInstruction,
    Comment,
    Document,
    DocumentType,
    Notation,
}

/// Handle into the node arena. The document root is always index 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub const DOCUMENT: NodeId = NodeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// One attribute owned by an element record.
#[derive(Debug, Clone)]
pub struct AttrRecord {
    pub name: QName,
    pub value: String,
    pub specified: bool,
    pub is_id: bool,
    /// Declared type keyword, `None` when the attribute was not declared.
    pub decl_type: Option<Rc<str>>,
}

impl AttrRecord {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        AttrRecord {
            name,
            value: value.into(),
            specified: true,
            is_id: false,
            decl_type: None,
        }
    }
}

#[derive(Debug, Clone)]
enum NodePayload {
    Document,
    DocumentType {
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
        internal_subset: Option<String>,
    },
    Element {
        name: QName,
        attrs: Vec<AttrRecord>,
        type_info: Option<TypeInfo>,
    },
    Text {
        data: String,
    },
    CDATASection {
        data: String,
    },
    Comment {
        data: String,
    },
    ProcessingInstruction {
        target: Rc<str>,
        data: Option<String>,
        base_uri: Option<Rc<str>>,
    },
    EntityReference {
        name: Rc<str>,
        base_uri: Option<Rc<str>>,
    },
    Entity {
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
        notation_name: Option<Rc<str>>,
        input_encoding: Option<Rc<str>>,
        xml_version: Option<Rc<str>>,
        xml_encoding: Option<Rc<str>>,
    },
    Notation {
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
    },
}

impl NodePayload {
    fn node_type(&self) -> NodeType {
        match self {
            NodePayload::Document => NodeType::Document,
            NodePayload::DocumentType { .. } => NodeType::DocumentType,
            NodePayload::Element { .. } => NodeType::Element,
            NodePayload::Text { .. } => NodeType::Text,
            NodePayload::CDATASection { .. } => NodeType::CDATASection,
            NodePayload::Comment { .. } => NodeType::Comment,
            NodePayload::ProcessingInstruction { .. } => NodeType::ProcessingInstruction,
            NodePayload::EntityReference { .. } => NodeType::EntityReference,
            NodePayload::Entity { .. } => NodeType::Entity,
            NodePayload::Notation { .. } => NodeType::Notation,
        }
    }
}

#[derive(Debug, Clone)]
struct NodeRecord {
    payload: NodePayload,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
    read_only: bool,
}

impl NodeRecord {
    fn new(payload: NodePayload) -> Self {
        NodeRecord {
            payload,
            parent: None,
            first_child: None,
            last_child: None,
            prev_sibling: None,
            next_sibling: None,
            read_only: false,
        }
    }
}

/// Return `true` if `parent` and `child` are allowed to be parent and
/// child. Entity and notation declarations hang off the doctype record,
/// matching the compact store's layout.
fn check_vertical_hierarchy(parent: NodeType, child: NodeType) -> bool {
    use NodeType::*;
    match parent {
        Element | EntityReference | Entity => matches!(
            child,
            Element | Text | Comment | ProcessingInstruction | CDATASection | EntityReference
        ),
        Document => matches!(
            child,
            Element | ProcessingInstruction | Comment | DocumentType
        ),
        DocumentType => matches!(child, Entity | Notation),
        _ => false,
    }
}

/// The arena document.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<NodeRecord>,
    doctype: Option<NodeId>,
    document_element: Option<NodeId>,
    document_uri: Option<Rc<str>>,
    input_encoding: Option<Rc<str>>,
    xml_encoding: Option<Rc<str>>,
    xml_version: Option<Rc<str>>,
    xml_standalone: Option<bool>,
    /// When set, mutations under a read-only node fail instead of being
    /// silently applied.
    read_only_check: bool,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Document {
            nodes: vec![NodeRecord::new(NodePayload::Document)],
            doctype: None,
            document_element: None,
            document_uri: None,
            input_encoding: None,
            xml_encoding: None,
            xml_version: None,
            xml_standalone: None,
            read_only_check: false,
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId::DOCUMENT
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    // document-wide metadata

    pub fn set_document_uri(&mut self, uri: Option<Rc<str>>) {
        self.document_uri = uri;
    }

    pub fn document_uri(&self) -> Option<&Rc<str>> {
        self.document_uri.as_ref()
    }

    pub fn set_input_encoding(&mut self, encoding: Option<Rc<str>>) {
        self.input_encoding = encoding;
    }

    pub fn input_encoding(&self) -> Option<&Rc<str>> {
        self.input_encoding.as_ref()
    }

    pub fn set_xml_decl(
        &mut self,
        version: Option<Rc<str>>,
        encoding: Option<Rc<str>>,
        standalone: Option<bool>,
    ) {
        self.xml_version = version;
        self.xml_encoding = encoding;
        self.xml_standalone = standalone;
    }

    pub fn xml_version(&self) -> Option<&Rc<str>> {
        self.xml_version.as_ref()
    }

    pub fn xml_standalone(&self) -> Option<bool> {
        self.xml_standalone
    }

    pub fn doctype(&self) -> Option<NodeId> {
        self.doctype
    }

    pub fn document_element(&self) -> Option<NodeId> {
        self.document_element
    }

    pub fn enable_read_only_check(&mut self) {
        self.read_only_check = true;
    }

    pub fn disable_read_only_check(&mut self) {
        self.read_only_check = false;
    }

    pub fn is_enabled_read_only_check(&self) -> bool {
        self.read_only_check
    }

    // node creation

    fn push(&mut self, payload: NodePayload) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(NodeRecord::new(payload));
        id
    }

    pub fn create_element(&mut self, name: QName) -> NodeId {
        self.push(NodePayload::Element {
            name,
            attrs: Vec::new(),
            type_info: None,
        })
    }

    pub fn create_text_node(&mut self, data: impl Into<String>) -> NodeId {
        self.push(NodePayload::Text { data: data.into() })
    }

    pub fn create_cdata_section(&mut self, data: impl Into<String>) -> NodeId {
        self.push(NodePayload::CDATASection { data: data.into() })
    }

    pub fn create_comment(&mut self, data: impl Into<String>) -> NodeId {
        self.push(NodePayload::Comment { data: data.into() })
    }

    pub fn create_processing_instruction(
        &mut self,
        target: Rc<str>,
        data: Option<String>,
    ) -> NodeId {
        self.push(NodePayload::ProcessingInstruction {
            target,
            data,
            base_uri: None,
        })
    }

    pub fn create_entity_reference(&mut self, name: Rc<str>, base_uri: Option<Rc<str>>) -> NodeId {
        self.push(NodePayload::EntityReference { name, base_uri })
    }

    pub fn create_document_type(
        &mut self,
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
    ) -> NodeId {
        self.push(NodePayload::DocumentType {
            name,
            public_id,
            system_id,
            internal_subset: None,
        })
    }

    pub fn create_entity_decl(
        &mut self,
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
        notation_name: Option<Rc<str>>,
    ) -> NodeId {
        self.push(NodePayload::Entity {
            name,
            public_id,
            system_id,
            notation_name,
            input_encoding: None,
            xml_version: None,
            xml_encoding: None,
        })
    }

    pub fn create_notation(
        &mut self,
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
    ) -> NodeId {
        self.push(NodePayload::Notation {
            name,
            public_id,
            system_id,
        })
    }

    // navigation

    fn record(&self, id: NodeId) -> &NodeRecord {
        &self.nodes[id.index()]
    }

    fn record_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        &mut self.nodes[id.index()]
    }

    pub fn node_type(&self, id: NodeId) -> NodeType {
        self.record(id).payload.node_type()
    }

    pub fn parent_node(&self, id: NodeId) -> Option<NodeId> {
        self.record(id).parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.record(id).first_child
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.record(id).last_child
    }

    pub fn previous_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.record(id).prev_sibling
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.record(id).next_sibling
    }

    pub fn child_nodes(&self, id: NodeId) -> Vec<NodeId> {
        let mut res = vec![];
        let mut child = self.first_child(id);
        while let Some(c) = child {
            child = self.next_sibling(c);
            res.push(c);
        }
        res
    }

    pub fn node_name(&self, id: NodeId) -> Rc<str> {
        match &self.record(id).payload {
            NodePayload::Document => Rc::from("#document"),
            NodePayload::DocumentType { name, .. } => name.clone(),
            NodePayload::Element { name, .. } => name.raw.clone(),
            NodePayload::Text { .. } => Rc::from("#text"),
            NodePayload::CDATASection { .. } => Rc::from("#cdata-section"),
            NodePayload::Comment { .. } => Rc::from("#comment"),
            NodePayload::ProcessingInstruction { target, .. } => target.clone(),
            NodePayload::EntityReference { name, .. } => name.clone(),
            NodePayload::Entity { name, .. } => name.clone(),
            NodePayload::Notation { name, .. } => name.clone(),
        }
    }

    pub fn node_value(&self, id: NodeId) -> Option<&str> {
        match &self.record(id).payload {
            NodePayload::Text { data }
            | NodePayload::CDATASection { data }
            | NodePayload::Comment { data } => Some(data),
            NodePayload::ProcessingInstruction { data, .. } => data.as_deref(),
            _ => None,
        }
    }

    pub fn element_name(&self, id: NodeId) -> Option<&QName> {
        match &self.record(id).payload {
            NodePayload::Element { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn is_read_only(&self, id: NodeId) -> bool {
        self.record(id).read_only
    }

    /// Mark a node, and optionally its whole subtree, (non-)read-only.
    pub fn set_read_only(&mut self, id: NodeId, read_only: bool, deep: bool) {
        self.record_mut(id).read_only = read_only;
        if deep {
            let mut stack = self.child_nodes(id);
            while let Some(n) = stack.pop() {
                self.record_mut(n).read_only = read_only;
                stack.extend(self.child_nodes(n));
            }
        }
    }

    fn check_writable(&self, id: NodeId) -> Result<(), DomError> {
        if self.read_only_check && self.record(id).read_only {
            Err(DomError::NoModificationAllowed)
        } else {
            Ok(())
        }
    }

    // mutation

    fn detach(&mut self, child: NodeId) {
        let (parent, prev, next) = {
            let rec = self.record(child);
            (rec.parent, rec.prev_sibling, rec.next_sibling)
        };
        if let Some(p) = prev {
            self.record_mut(p).next_sibling = next;
        } else if let Some(par) = parent {
            self.record_mut(par).first_child = next;
        }
        if let Some(n) = next {
            self.record_mut(n).prev_sibling = prev;
        } else if let Some(par) = parent {
            self.record_mut(par).last_child = prev;
        }
        let rec = self.record_mut(child);
        rec.parent = None;
        rec.prev_sibling = None;
        rec.next_sibling = None;
        if let Some(par) = parent
            && par == NodeId::DOCUMENT
        {
            if self.document_element == Some(child) {
                self.document_element = None;
            }
            if self.doctype == Some(child) {
                self.doctype = None;
            }
        }
    }

    fn check_insertion(&self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if !check_vertical_hierarchy(self.node_type(parent), self.node_type(child)) {
            return Err(DomError::HierarchyRequest);
        }
        // A document holds at most one element and one doctype.
        if parent == NodeId::DOCUMENT {
            match self.node_type(child) {
                NodeType::Element if self.document_element.is_some() => {
                    return Err(DomError::HierarchyRequest);
                }
                NodeType::DocumentType if self.doctype.is_some() => {
                    return Err(DomError::HierarchyRequest);
                }
                _ => {}
            }
        }
        // The child must not be an ancestor of the parent.
        let mut cursor = Some(parent);
        while let Some(n) = cursor {
            if n == child {
                return Err(DomError::HierarchyRequest);
            }
            cursor = self.parent_node(n);
        }
        Ok(())
    }

    fn note_document_child(&mut self, parent: NodeId, child: NodeId) {
        if parent == NodeId::DOCUMENT {
            match self.node_type(child) {
                NodeType::Element => self.document_element = Some(child),
                NodeType::DocumentType => self.doctype = Some(child),
                _ => {}
            }
        }
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        self.check_writable(parent)?;
        self.check_insertion(parent, child)?;
        self.detach(child);
        let last = self.record(parent).last_child;
        {
            let rec = self.record_mut(child);
            rec.parent = Some(parent);
            rec.prev_sibling = last;
        }
        if let Some(last) = last {
            self.record_mut(last).next_sibling = Some(child);
        } else {
            self.record_mut(parent).first_child = Some(child);
        }
        self.record_mut(parent).last_child = Some(child);
        self.note_document_child(parent, child);
        Ok(())
    }

    /// Insert `child` before `ref_child`; with no reference node this is
    /// an append.
    pub fn insert_before(
        &mut self,
        parent: NodeId,
        child: NodeId,
        ref_child: Option<NodeId>,
    ) -> Result<(), DomError> {
        let Some(ref_child) = ref_child else {
            return self.append_child(parent, child);
        };
        if self.parent_node(ref_child) != Some(parent) {
            return Err(DomError::NotFound);
        }
        self.check_writable(parent)?;
        self.check_insertion(parent, child)?;
        self.detach(child);
        let prev = self.record(ref_child).prev_sibling;
        {
            let rec = self.record_mut(child);
            rec.parent = Some(parent);
            rec.prev_sibling = prev;
            rec.next_sibling = Some(ref_child);
        }
        self.record_mut(ref_child).prev_sibling = Some(child);
        if let Some(prev) = prev {
            self.record_mut(prev).next_sibling = Some(child);
        } else {
            self.record_mut(parent).first_child = Some(child);
        }
        self.note_document_child(parent, child);
        Ok(())
    }

    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), DomError> {
        if self.parent_node(child) != Some(parent) {
            return Err(DomError::NotFound);
        }
        self.check_writable(parent)?;
        self.detach(child);
        Ok(())
    }

    /// Deep-copy the subtree rooted at `src`; the copy is detached and
    /// never read-only.
    pub fn clone_subtree(&mut self, src: NodeId) -> NodeId {
        let payload = self.record(src).payload.clone();
        let copy = self.push(payload);
        let children = self.child_nodes(src);
        for child in children {
            let child_copy = self.clone_subtree(child);
            // The copy mirrors a valid subtree, so linking cannot fail.
            let _ = self.append_child(copy, child_copy);
        }
        copy
    }

    // character data

    pub fn text_data(&self, id: NodeId) -> &str {
        match &self.record(id).payload {
            NodePayload::Text { data }
            | NodePayload::CDATASection { data }
            | NodePayload::Comment { data } => data,
            _ => "",
        }
    }

    pub fn append_text_data(&mut self, id: NodeId, text: &str) {
        if let NodePayload::Text { data } | NodePayload::CDATASection { data } =
            &mut self.record_mut(id).payload
        {
            data.push_str(text);
        }
    }

    pub fn set_text_data(&mut self, id: NodeId, text: String) {
        if let NodePayload::Text { data } | NodePayload::CDATASection { data } =
            &mut self.record_mut(id).payload
        {
            *data = text;
        }
    }

    /// Take the node's character data, leaving it empty. Used when a
    /// coalescing run takes over an existing text node's content.
    pub fn take_text_data(&mut self, id: NodeId) -> String {
        if let NodePayload::Text { data } | NodePayload::CDATASection { data } =
            &mut self.record_mut(id).payload
        {
            std::mem::take(data)
        } else {
            String::new()
        }
    }

    // attributes

    fn element_attrs(&self, el: NodeId) -> &[AttrRecord] {
        match &self.record(el).payload {
            NodePayload::Element { attrs, .. } => attrs,
            _ => &[],
        }
    }

    fn element_attrs_mut(&mut self, el: NodeId) -> Option<&mut Vec<AttrRecord>> {
        match &mut self.record_mut(el).payload {
            NodePayload::Element { attrs, .. } => Some(attrs),
            _ => None,
        }
    }

    pub fn attributes(&self, el: NodeId) -> &[AttrRecord] {
        self.element_attrs(el)
    }

    /// Add or replace an attribute by raw lexical name; returns its slot.
    pub fn set_attribute_node(&mut self, el: NodeId, attr: AttrRecord) -> usize {
        let Some(attrs) = self.element_attrs_mut(el) else {
            return 0;
        };
        if let Some(pos) = attrs.iter().position(|a| a.name.raw == attr.name.raw) {
            attrs[pos] = attr;
            pos
        } else {
            attrs.push(attr);
            attrs.len() - 1
        }
    }

    /// Add or replace an attribute by (namespace URI, local name);
    /// returns its slot. This is the insertion path that must be used
    /// for namespace-significant defaulted attributes so they cannot
    /// overwrite a same-local-name attribute added by raw name.
    pub fn set_attribute_node_ns(&mut self, el: NodeId, attr: AttrRecord) -> usize {
        let Some(attrs) = self.element_attrs_mut(el) else {
            return 0;
        };
        if let Some(pos) = attrs
            .iter()
            .position(|a| a.name.uri == attr.name.uri && a.name.local == attr.name.local)
        {
            attrs[pos] = attr;
            pos
        } else {
            attrs.push(attr);
            attrs.len() - 1
        }
    }

    pub fn get_attribute(&self, el: NodeId, raw: &str) -> Option<&AttrRecord> {
        self.element_attrs(el)
            .iter()
            .find(|a| a.name.raw.as_ref() == raw)
    }

    pub fn get_attribute_ns(
        &self,
        el: NodeId,
        uri: Option<&str>,
        local: &str,
    ) -> Option<&AttrRecord> {
        self.element_attrs(el)
            .iter()
            .find(|a| a.name.uri.as_deref() == uri && a.name.local.as_ref() == local)
    }

    /// Assign an attribute's value. Mirrors the DOM side effect: setting
    /// a value always flips `specified` on, which is why the builder
    /// assigns the real `specified` flag afterwards.
    pub fn set_attribute_value(&mut self, el: NodeId, slot: usize, value: String) {
        if let Some(attrs) = self.element_attrs_mut(el)
            && let Some(attr) = attrs.get_mut(slot)
        {
            attr.value = value;
            attr.specified = true;
        }
    }

    pub fn set_attribute_specified(&mut self, el: NodeId, slot: usize, specified: bool) {
        if let Some(attrs) = self.element_attrs_mut(el)
            && let Some(attr) = attrs.get_mut(slot)
        {
            attr.specified = specified;
        }
    }

    pub fn set_attribute_type(&mut self, el: NodeId, slot: usize, decl_type: Option<Rc<str>>) {
        if let Some(attrs) = self.element_attrs_mut(el)
            && let Some(attr) = attrs.get_mut(slot)
        {
            attr.decl_type = decl_type;
        }
    }

    /// Mark the attribute in `slot` as this element's ID attribute.
    pub fn set_id_attribute(&mut self, el: NodeId, slot: usize) {
        if let Some(attrs) = self.element_attrs_mut(el)
            && let Some(attr) = attrs.get_mut(slot)
        {
            attr.is_id = true;
        }
    }

    pub fn set_element_type_info(&mut self, el: NodeId, info: TypeInfo) {
        if let NodePayload::Element { type_info, .. } = &mut self.record_mut(el).payload {
            *type_info = Some(info);
        }
    }

    pub fn element_type_info(&self, el: NodeId) -> Option<&TypeInfo> {
        match &self.record(el).payload {
            NodePayload::Element { type_info, .. } => type_info.as_ref(),
            _ => None,
        }
    }

    // doctype, entities, notations

    pub fn set_internal_subset(&mut self, doctype: NodeId, subset: String) {
        if let NodePayload::DocumentType {
            internal_subset, ..
        } = &mut self.record_mut(doctype).payload
        {
            *internal_subset = Some(subset);
        }
    }

    pub fn internal_subset(&self, doctype: NodeId) -> Option<&str> {
        match &self.record(doctype).payload {
            NodePayload::DocumentType {
                internal_subset, ..
            } => internal_subset.as_deref(),
            _ => None,
        }
    }

    pub fn doctype_public_id(&self, doctype: NodeId) -> Option<&Rc<str>> {
        match &self.record(doctype).payload {
            NodePayload::DocumentType { public_id, .. } => public_id.as_ref(),
            _ => None,
        }
    }

    pub fn doctype_system_id(&self, doctype: NodeId) -> Option<&Rc<str>> {
        match &self.record(doctype).payload {
            NodePayload::DocumentType { system_id, .. } => system_id.as_ref(),
            _ => None,
        }
    }

    /// Find an entity declaration by name among the doctype's children.
    pub fn find_entity_decl(&self, doctype: NodeId, name: &str) -> Option<NodeId> {
        self.child_nodes(doctype).into_iter().find(|&n| {
            self.node_type(n) == NodeType::Entity && self.node_name(n).as_ref() == name
        })
    }

    pub fn set_entity_input_encoding(&mut self, entity: NodeId, encoding: Rc<str>) {
        if let NodePayload::Entity { input_encoding, .. } = &mut self.record_mut(entity).payload {
            *input_encoding = Some(encoding);
        }
    }

    pub fn set_entity_xml_info(
        &mut self,
        entity: NodeId,
        version: Option<Rc<str>>,
        encoding: Option<Rc<str>>,
    ) {
        if let NodePayload::Entity {
            xml_version,
            xml_encoding,
            ..
        } = &mut self.record_mut(entity).payload
        {
            if version.is_some() {
                *xml_version = version;
            }
            if encoding.is_some() {
                *xml_encoding = encoding;
            }
        }
    }

    pub fn entity_notation_name(&self, entity: NodeId) -> Option<&Rc<str>> {
        match &self.record(entity).payload {
            NodePayload::Entity { notation_name, .. } => notation_name.as_ref(),
            _ => None,
        }
    }

    pub fn entity_reference_base_uri(&self, id: NodeId) -> Option<&Rc<str>> {
        match &self.record(id).payload {
            NodePayload::EntityReference { base_uri, .. } => base_uri.as_ref(),
            _ => None,
        }
    }

    pub fn set_pi_base_uri(&mut self, id: NodeId, uri: Rc<str>) {
        if let NodePayload::ProcessingInstruction { base_uri, .. } = &mut self.record_mut(id).payload
        {
            *base_uri = Some(uri);
        }
    }

    // diagnostics

    /// Indented structural dump used by tests and the CLI. Two documents
    /// with the same outline are structurally and content-identical.
    pub fn outline(&self) -> String {
        let mut out = String::new();
        self.outline_node(self.root(), 0, &mut out);
        out
    }

    fn outline_node(&self, id: NodeId, depth: usize, out: &mut String) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        match &self.record(id).payload {
            NodePayload::Document => out.push_str("#document"),
            NodePayload::DocumentType {
                name,
                public_id,
                system_id,
                internal_subset,
            } => {
                out.push_str("doctype ");
                out.push_str(name);
                if let Some(p) = public_id {
                    out.push_str(&format!(" PUBLIC \"{p}\""));
                }
                if let Some(s) = system_id {
                    out.push_str(&format!(" SYSTEM \"{s}\""));
                }
                if let Some(subset) = internal_subset {
                    out.push_str(&format!(" [{subset}]"));
                }
            }
            NodePayload::Element {
                name,
                attrs,
                type_info,
            } => {
                out.push_str(&format!("element {}", name.raw));
                for attr in attrs {
                    out.push_str(&format!(" {}=\"{}\"", attr.name.raw, attr.value));
                    if !attr.specified {
                        out.push_str("(defaulted)");
                    }
                    if attr.is_id {
                        out.push_str("(id)");
                    }
                }
                if let Some(info) = type_info
                    && let Some(ty) = info.effective_type()
                {
                    out.push_str(&format!(" : {ty}"));
                }
            }
            NodePayload::Text { data } => out.push_str(&format!("text {data:?}")),
            NodePayload::CDATASection { data } => out.push_str(&format!("cdata {data:?}")),
            NodePayload::Comment { data } => out.push_str(&format!("comment {data:?}")),
            NodePayload::ProcessingInstruction { target, data, .. } => {
                out.push_str(&format!("pi {target}"));
                if let Some(d) = data {
                    out.push_str(&format!(" {d:?}"));
                }
            }
            NodePayload::EntityReference { name, .. } => {
                out.push_str(&format!("entity-ref {name}"));
            }
            NodePayload::Entity { name, .. } => out.push_str(&format!("entity {name}")),
            NodePayload::Notation { name, .. } => out.push_str(&format!("notation {name}")),
        }
        out.push('\n');
        for child in self.child_nodes(id) {
            self.outline_node(child, depth + 1, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_doc() -> (Document, NodeId) {
        let mut doc = Document::new();
        let root = doc.create_element(QName::from_raw("root"));
        doc.append_child(NodeId::DOCUMENT, root).unwrap();
        (doc, root)
    }

    #[test]
    fn append_and_navigate() {
        let (mut doc, root) = text_doc();
        let a = doc.create_element(QName::from_raw("a"));
        let b = doc.create_element(QName::from_raw("b"));
        doc.append_child(root, a).unwrap();
        doc.append_child(root, b).unwrap();
        assert_eq!(doc.first_child(root), Some(a));
        assert_eq!(doc.last_child(root), Some(b));
        assert_eq!(doc.next_sibling(a), Some(b));
        assert_eq!(doc.previous_sibling(b), Some(a));
        assert_eq!(doc.parent_node(a), Some(root));
        assert_eq!(doc.document_element(), Some(root));
    }

    #[test]
    fn document_allows_one_element() {
        let (mut doc, _root) = text_doc();
        let second = doc.create_element(QName::from_raw("other"));
        assert_eq!(
            doc.append_child(NodeId::DOCUMENT, second),
            Err(DomError::HierarchyRequest)
        );
    }

    #[test]
    fn insert_before_links() {
        let (mut doc, root) = text_doc();
        let a = doc.create_text_node("a");
        let c = doc.create_text_node("c");
        doc.append_child(root, a).unwrap();
        doc.append_child(root, c).unwrap();
        let b = doc.create_text_node("b");
        doc.insert_before(root, b, Some(c)).unwrap();
        let names: Vec<String> = doc
            .child_nodes(root)
            .into_iter()
            .map(|n| doc.text_data(n).to_string())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn remove_child_unlinks() {
        let (mut doc, root) = text_doc();
        let a = doc.create_text_node("a");
        let b = doc.create_text_node("b");
        doc.append_child(root, a).unwrap();
        doc.append_child(root, b).unwrap();
        doc.remove_child(root, a).unwrap();
        assert_eq!(doc.first_child(root), Some(b));
        assert_eq!(doc.previous_sibling(b), None);
        assert_eq!(doc.parent_node(a), None);
    }

    #[test]
    fn read_only_rejects_mutation_when_checked() {
        let (mut doc, root) = text_doc();
        let er = doc.create_entity_reference(Rc::from("e"), None);
        doc.append_child(root, er).unwrap();
        let t = doc.create_text_node("x");
        doc.append_child(er, t).unwrap();
        doc.set_read_only(er, true, true);
        doc.enable_read_only_check();
        let more = doc.create_text_node("y");
        assert_eq!(
            doc.append_child(er, more),
            Err(DomError::NoModificationAllowed)
        );
    }

    #[test]
    fn ns_attribute_path_does_not_collide_with_raw_path() {
        let (mut doc, root) = text_doc();
        // Same local name, one bound to a namespace, one not.
        let plain = AttrRecord::new(QName::from_raw("form"), "plain");
        let mut qualified = QName::from_raw("form");
        qualified.uri = Some(Rc::from("http://example.com/s"));
        let defaulted = AttrRecord::new(qualified, "qualified");
        doc.set_attribute_node(root, plain);
        doc.set_attribute_node_ns(root, defaulted);
        assert_eq!(doc.attributes(root).len(), 2);
    }

    #[test]
    fn clone_subtree_is_deep_and_detached() {
        let (mut doc, root) = text_doc();
        let el = doc.create_element(QName::from_raw("kid"));
        doc.append_child(root, el).unwrap();
        let t = doc.create_text_node("payload");
        doc.append_child(el, t).unwrap();
        let copy = doc.clone_subtree(el);
        assert_eq!(doc.parent_node(copy), None);
        let copy_kids = doc.child_nodes(copy);
        assert_eq!(copy_kids.len(), 1);
        assert_eq!(doc.text_data(copy_kids[0]), "payload");
    }
}
