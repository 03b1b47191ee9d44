//! Compact, index-addressed node store for deferred tree construction.
//!
//! Rows live in parallel vectors; links are row indexes. Appending a
//! child is O(1) prepend bookkeeping: the child records its parent and
//! the parent's previous last-child, and becomes the new last-child
//! head. Child chains are therefore stored last-first and reversed at
//! materialization. Attributes are pushed by the builder in reverse
//! document order for the same reason, so walking the attribute chain
//! at materialization restores document order.
//!
//! The original implementation grows fixed-size chunks to avoid copies;
//! a growable vector already amortizes that, so the rows here are flat.

use std::rc::Rc;

use super::{AttrRecord, Document, NodeId, NodeType};
use crate::event::QName;

/// Handle into the deferred row store. Row 0 is the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeferredId(u32);

impl DeferredId {
    pub const DOCUMENT: DeferredId = DeferredId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

const FLAG_ATTR_SPECIFIED: u8 = 0b0001;
const FLAG_ATTR_ID: u8 = 0b0010;
const FLAG_READ_ONLY: u8 = 0b0100;

/// Entity declaration details; rare enough to live out of line.
#[derive(Debug, Clone, Default)]
struct EntityXmlInfo {
    version: Option<Rc<str>>,
    encoding: Option<Rc<str>>,
    notation: Option<Rc<str>>,
}

/// The deferred node store.
#[derive(Debug, Default)]
pub struct DeferredStore {
    kind: Vec<NodeType>,
    /// Element/attr qname, PI target, entity/notation/doctype/ER name.
    name: Vec<Option<Rc<str>>>,
    /// Character data, attribute value, entity input encoding, doctype
    /// internal subset.
    value: Vec<Option<Rc<str>>>,
    /// Namespace URI, system id, or entity-reference base URI.
    uri: Vec<Option<Rc<str>>>,
    /// Attr declared type, entity notation name, public id, element
    /// type name.
    second: Vec<Option<Rc<str>>>,
    flags: Vec<u8>,
    parent: Vec<Option<DeferredId>>,
    prev_sibling: Vec<Option<DeferredId>>,
    /// Head of the reversed child chain.
    last_child: Vec<Option<DeferredId>>,
    /// Element rows: most recently pushed attribute row.
    attr_head: Vec<Option<DeferredId>>,
    ext: Vec<Option<Box<EntityXmlInfo>>>,

    xml_version: Option<Rc<str>>,
    xml_encoding: Option<Rc<str>>,
    xml_standalone: Option<bool>,
    document_uri: Option<Rc<str>>,
    input_encoding: Option<Rc<str>>,
}

impl DeferredStore {
    pub fn new() -> Self {
        let mut store = DeferredStore::default();
        store.push_row(NodeType::Document, None, None, None, None);
        store
    }

    pub fn len(&self) -> usize {
        self.kind.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kind.len() <= 1
    }

    pub fn document(&self) -> DeferredId {
        DeferredId::DOCUMENT
    }

    fn push_row(
        &mut self,
        kind: NodeType,
        name: Option<Rc<str>>,
        value: Option<Rc<str>>,
        uri: Option<Rc<str>>,
        second: Option<Rc<str>>,
    ) -> DeferredId {
        let id = DeferredId(self.kind.len() as u32);
        self.kind.push(kind);
        self.name.push(name);
        self.value.push(value);
        self.uri.push(uri);
        self.second.push(second);
        self.flags.push(0);
        self.parent.push(None);
        self.prev_sibling.push(None);
        self.last_child.push(None);
        self.attr_head.push(None);
        self.ext.push(None);
        id
    }

    // document metadata

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

    pub fn set_document_uri(&mut self, uri: Option<Rc<str>>) {
        self.document_uri = uri;
    }

    pub fn set_input_encoding(&mut self, encoding: Option<Rc<str>>) {
        self.input_encoding = encoding;
    }

    // row creation

    pub fn create_element(&mut self, uri: Option<Rc<str>>, rawname: Rc<str>) -> DeferredId {
        self.push_row(NodeType::Element, Some(rawname), None, uri, None)
    }

    /// Record one attribute for `el`. The builder calls this in reverse
    /// document order; each call prepends, so the chain reads forward.
    pub fn set_deferred_attribute(
        &mut self,
        el: DeferredId,
        rawname: Rc<str>,
        uri: Option<Rc<str>>,
        value: Rc<str>,
        specified: bool,
        is_id: bool,
        decl_type: Option<Rc<str>>,
    ) -> DeferredId {
        let attr = self.push_row(NodeType::Attribute, Some(rawname), Some(value), uri, decl_type);
        let mut flags = 0;
        if specified {
            flags |= FLAG_ATTR_SPECIFIED;
        }
        if is_id {
            flags |= FLAG_ATTR_ID;
        }
        self.flags[attr.index()] = flags;
        self.parent[attr.index()] = Some(el);
        self.prev_sibling[attr.index()] = self.attr_head[el.index()];
        self.attr_head[el.index()] = Some(attr);
        attr
    }

    pub fn create_text_node(&mut self, data: Rc<str>) -> DeferredId {
        self.push_row(NodeType::Text, None, Some(data), None, None)
    }

    pub fn create_cdata_section(&mut self, data: Rc<str>) -> DeferredId {
        self.push_row(NodeType::CDATASection, None, Some(data), None, None)
    }

    pub fn create_comment(&mut self, data: Rc<str>) -> DeferredId {
        self.push_row(NodeType::Comment, None, Some(data), None, None)
    }

    pub fn create_processing_instruction(
        &mut self,
        target: Rc<str>,
        data: Option<Rc<str>>,
    ) -> DeferredId {
        self.push_row(NodeType::ProcessingInstruction, Some(target), data, None, None)
    }

    pub fn create_entity_reference(
        &mut self,
        name: Rc<str>,
        base_uri: Option<Rc<str>>,
    ) -> DeferredId {
        self.push_row(NodeType::EntityReference, Some(name), None, base_uri, None)
    }

    pub fn create_doctype(
        &mut self,
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
    ) -> DeferredId {
        self.push_row(NodeType::DocumentType, Some(name), None, system_id, public_id)
    }

    pub fn set_internal_subset(&mut self, doctype: DeferredId, subset: Rc<str>) {
        self.value[doctype.index()] = Some(subset);
    }

    pub fn create_entity_decl(
        &mut self,
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
        notation_name: Option<Rc<str>>,
    ) -> DeferredId {
        let id = self.push_row(NodeType::Entity, Some(name), None, system_id, public_id);
        if let Some(notation) = notation_name {
            self.ext[id.index()] = Some(Box::new(EntityXmlInfo {
                notation: Some(notation),
                ..Default::default()
            }));
        }
        id
    }

    pub fn create_notation_decl(
        &mut self,
        name: Rc<str>,
        public_id: Option<Rc<str>>,
        system_id: Option<Rc<str>>,
    ) -> DeferredId {
        self.push_row(NodeType::Notation, Some(name), None, system_id, public_id)
    }

    pub fn set_entity_info(
        &mut self,
        entity: DeferredId,
        version: Option<Rc<str>>,
        encoding: Option<Rc<str>>,
    ) {
        let slot = self.ext[entity.index()].get_or_insert_with(Default::default);
        if version.is_some() {
            slot.version = version;
        }
        if encoding.is_some() {
            slot.encoding = encoding;
        }
    }

    pub fn set_entity_input_encoding(&mut self, entity: DeferredId, encoding: Rc<str>) {
        self.value[entity.index()] = Some(encoding);
    }

    /// Element type name recorded at end-element from PSVI.
    pub fn set_type_info(&mut self, el: DeferredId, type_name: Option<Rc<str>>) {
        self.second[el.index()] = type_name;
    }

    pub fn set_read_only(&mut self, id: DeferredId) {
        self.flags[id.index()] |= FLAG_READ_ONLY;
    }

    // links

    pub fn node_kind(&self, id: DeferredId) -> NodeType {
        self.kind[id.index()]
    }

    pub fn node_name(&self, id: DeferredId) -> Option<&Rc<str>> {
        self.name[id.index()].as_ref()
    }

    /// The URI column: namespace URI, system id, or entity-reference
    /// base URI depending on the row kind.
    pub fn node_uri(&self, id: DeferredId) -> Option<&Rc<str>> {
        self.uri[id.index()].as_ref()
    }

    pub fn document_uri(&self) -> Option<&Rc<str>> {
        self.document_uri.as_ref()
    }

    pub fn has_attribute(&self, el: DeferredId, rawname: &str) -> bool {
        let mut cursor = self.attr_head[el.index()];
        while let Some(attr) = cursor {
            if self.name[attr.index()].as_deref() == Some(rawname) {
                return true;
            }
            cursor = self.prev_sibling[attr.index()];
        }
        false
    }

    pub fn parent_of(&self, id: DeferredId) -> Option<DeferredId> {
        self.parent[id.index()]
    }

    pub fn last_child_of(&self, id: DeferredId) -> Option<DeferredId> {
        self.last_child[id.index()]
    }

    /// Previous sibling in the reversed chain.
    pub fn real_prev_sibling_of(&self, id: DeferredId) -> Option<DeferredId> {
        self.prev_sibling[id.index()]
    }

    /// O(1) append: prepend to the reversed child chain.
    pub fn append_child(&mut self, parent: DeferredId, child: DeferredId) {
        self.parent[child.index()] = Some(parent);
        self.prev_sibling[child.index()] = self.last_child[parent.index()];
        self.last_child[parent.index()] = Some(child);
    }

    /// Insert `new` directly before `ref_child` in the sibling chain.
    pub fn insert_before(&mut self, parent: DeferredId, new: DeferredId, ref_child: DeferredId) {
        self.parent[new.index()] = Some(parent);
        self.prev_sibling[new.index()] = self.prev_sibling[ref_child.index()];
        self.prev_sibling[ref_child.index()] = Some(new);
    }

    /// Reset the parent's last-child head, dropping everything the old
    /// head chain reached after `child`.
    pub fn set_as_last_child(&mut self, parent: DeferredId, child: Option<DeferredId>) {
        self.last_child[parent.index()] = child;
    }

    /// Children in document order (the stored chain is reversed).
    pub fn children_of(&self, id: DeferredId) -> Vec<DeferredId> {
        let mut out = vec![];
        let mut cursor = self.last_child[id.index()];
        while let Some(c) = cursor {
            out.push(c);
            cursor = self.prev_sibling[c.index()];
        }
        out.reverse();
        out
    }

    /// Deep-copy a subtree (with attributes); the copy is detached.
    pub fn clone_subtree(&mut self, src: DeferredId) -> DeferredId {
        let copy = self.push_row(
            self.kind[src.index()],
            self.name[src.index()].clone(),
            self.value[src.index()].clone(),
            self.uri[src.index()].clone(),
            self.second[src.index()].clone(),
        );
        self.flags[copy.index()] = self.flags[src.index()];
        self.ext[copy.index()] = self.ext[src.index()].clone();

        // Attribute chain, preserving order.
        let mut attrs = vec![];
        let mut cursor = self.attr_head[src.index()];
        while let Some(a) = cursor {
            attrs.push(a);
            cursor = self.prev_sibling[a.index()];
        }
        for attr in attrs.into_iter().rev() {
            let is_id = self.flags[attr.index()] & FLAG_ATTR_ID != 0;
            let specified = self.flags[attr.index()] & FLAG_ATTR_SPECIFIED != 0;
            self.set_deferred_attribute(
                copy,
                self.name[attr.index()].clone().unwrap_or_else(|| Rc::from("")),
                self.uri[attr.index()].clone(),
                self.value[attr.index()].clone().unwrap_or_else(|| Rc::from("")),
                specified,
                is_id,
                self.second[attr.index()].clone(),
            );
        }

        for child in self.children_of(src) {
            let child_copy = self.clone_subtree(child);
            self.append_child(copy, child_copy);
        }
        copy
    }

    // materialization

    /// Expand the compact store into the arena representation. Adjacent
    /// text rows coalesce into single text nodes and attribute order is
    /// restored, so the result is indistinguishable from an eagerly
    /// built document.
    pub fn materialize(&self) -> Document {
        let mut doc = Document::new();
        doc.set_xml_decl(
            self.xml_version.clone(),
            self.xml_encoding.clone(),
            self.xml_standalone,
        );
        doc.set_document_uri(self.document_uri.clone());
        doc.set_input_encoding(self.input_encoding.clone());
        self.materialize_children(DeferredId::DOCUMENT, NodeId::DOCUMENT, &mut doc);
        doc
    }

    fn materialize_children(&self, src: DeferredId, dst: NodeId, doc: &mut Document) {
        let mut last_text: Option<NodeId> = None;
        for child in self.children_of(src) {
            match self.node_kind(child) {
                NodeType::Text => {
                    let data = self.value[child.index()].as_deref().unwrap_or("");
                    if let Some(text) = last_text {
                        doc.append_text_data(text, data);
                    } else {
                        let text = doc.create_text_node(data);
                        let _ = doc.append_child(dst, text);
                        last_text = Some(text);
                    }
                    continue;
                }
                _ => last_text = None,
            }
            let node = self.materialize_node(child, doc);
            let _ = doc.append_child(dst, node);
            if self.flags[child.index()] & FLAG_READ_ONLY != 0 {
                doc.set_read_only(node, true, true);
            }
        }
    }

    fn materialize_node(&self, src: DeferredId, doc: &mut Document) -> NodeId {
        let name = |slot: &Option<Rc<str>>| slot.clone().unwrap_or_else(|| Rc::from(""));
        match self.node_kind(src) {
            NodeType::Element => {
                let qname = QName::from_raw(&name(&self.name[src.index()]))
                    .with_uri(self.uri[src.index()].clone());
                let el = doc.create_element(qname);
                // Walking the attr chain head-first yields document
                // order because the builder pushed in reverse.
                let mut cursor = self.attr_head[src.index()];
                while let Some(attr) = cursor {
                    let mut record = AttrRecord::new(
                        QName::from_raw(&name(&self.name[attr.index()]))
                            .with_uri(self.uri[attr.index()].clone()),
                        self.value[attr.index()].as_deref().unwrap_or(""),
                    );
                    record.specified = self.flags[attr.index()] & FLAG_ATTR_SPECIFIED != 0;
                    record.is_id = self.flags[attr.index()] & FLAG_ATTR_ID != 0;
                    record.decl_type = self.second[attr.index()].clone();
                    let slot = doc.set_attribute_node(el, record);
                    if self.flags[attr.index()] & FLAG_ATTR_ID != 0 {
                        doc.set_id_attribute(el, slot);
                    }
                    cursor = self.prev_sibling[attr.index()];
                }
                if let Some(type_name) = self.second[src.index()].clone() {
                    doc.set_element_type_info(
                        el,
                        crate::event::TypeInfo {
                            type_name: Some(type_name),
                            member_type_name: None,
                            is_id: false,
                        },
                    );
                }
                self.materialize_children(src, el, doc);
                el
            }
            NodeType::CDATASection => {
                // Chunks after the first were appended as nested text
                // rows; fold them back into the section data.
                let mut data = self.value[src.index()].as_deref().unwrap_or("").to_owned();
                for child in self.children_of(src) {
                    if self.node_kind(child) == NodeType::Text {
                        data.push_str(self.value[child.index()].as_deref().unwrap_or(""));
                    }
                }
                doc.create_cdata_section(data)
            }
            NodeType::Comment => {
                doc.create_comment(self.value[src.index()].as_deref().unwrap_or(""))
            }
            NodeType::ProcessingInstruction => doc.create_processing_instruction(
                name(&self.name[src.index()]),
                self.value[src.index()].as_deref().map(str::to_owned),
            ),
            NodeType::EntityReference => {
                let er = doc.create_entity_reference(
                    name(&self.name[src.index()]),
                    self.uri[src.index()].clone(),
                );
                self.materialize_children(src, er, doc);
                er
            }
            NodeType::DocumentType => {
                let dt = doc.create_document_type(
                    name(&self.name[src.index()]),
                    self.second[src.index()].clone(),
                    self.uri[src.index()].clone(),
                );
                if let Some(subset) = self.value[src.index()].as_deref() {
                    doc.set_internal_subset(dt, subset.to_owned());
                }
                self.materialize_children(src, dt, doc);
                dt
            }
            NodeType::Entity => {
                let info = self.ext[src.index()].as_deref();
                let entity = doc.create_entity_decl(
                    name(&self.name[src.index()]),
                    self.second[src.index()].clone(),
                    self.uri[src.index()].clone(),
                    info.and_then(|i| i.notation.clone()),
                );
                if let Some(encoding) = self.value[src.index()].clone() {
                    doc.set_entity_input_encoding(entity, encoding);
                }
                if let Some(info) = info {
                    doc.set_entity_xml_info(entity, info.version.clone(), info.encoding.clone());
                }
                self.materialize_children(src, entity, doc);
                entity
            }
            NodeType::Notation => doc.create_notation(
                name(&self.name[src.index()]),
                self.second[src.index()].clone(),
                self.uri[src.index()].clone(),
            ),
            NodeType::Text | NodeType::Document | NodeType::Attribute => {
                // Text is handled by the coalescing loop; document and
                // attribute rows never enter a child chain.
                doc.create_text_node("")
            }
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_child_is_prepend_bookkeeping() {
        let mut store = DeferredStore::new();
        let el = store.create_element(None, Rc::from("root"));
        store.append_child(DeferredId::DOCUMENT, el);
        let a = store.create_text_node(Rc::from("a"));
        let b = store.create_text_node(Rc::from("b"));
        store.append_child(el, a);
        store.append_child(el, b);
        assert_eq!(store.last_child_of(el), Some(b));
        assert_eq!(store.real_prev_sibling_of(b), Some(a));
        assert_eq!(store.children_of(el), vec![a, b]);
    }

    #[test]
    fn materialize_coalesces_text_rows() {
        let mut store = DeferredStore::new();
        let el = store.create_element(None, Rc::from("root"));
        store.append_child(DeferredId::DOCUMENT, el);
        for chunk in ["ab", "c", "def"] {
            let t = store.create_text_node(Rc::from(chunk));
            store.append_child(el, t);
        }
        let doc = store.materialize();
        let root = doc.document_element().unwrap();
        let kids = doc.child_nodes(root);
        assert_eq!(kids.len(), 1);
        assert_eq!(doc.text_data(kids[0]), "abcdef");
    }

    #[test]
    fn attribute_order_is_document_order() {
        let mut store = DeferredStore::new();
        let el = store.create_element(None, Rc::from("e"));
        store.append_child(DeferredId::DOCUMENT, el);
        // The builder pushes attributes in reverse document order.
        for name in ["c", "b", "a"] {
            store.set_deferred_attribute(
                el,
                Rc::from(name),
                None,
                Rc::from("v"),
                true,
                false,
                None,
            );
        }
        let doc = store.materialize();
        let root = doc.document_element().unwrap();
        let names: Vec<&str> = doc
            .attributes(root)
            .iter()
            .map(|a| a.name.raw.as_ref())
            .collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn insert_before_and_last_child_rewire() {
        let mut store = DeferredStore::new();
        let el = store.create_element(None, Rc::from("e"));
        store.append_child(DeferredId::DOCUMENT, el);
        let er = store.create_entity_reference(Rc::from("ref"), None);
        store.append_child(el, er);
        let x = store.create_text_node(Rc::from("x"));
        store.append_child(er, x);
        // Splice: move x before er, then drop er from the chain.
        store.insert_before(el, x, er);
        store.set_as_last_child(el, Some(x));
        assert_eq!(store.children_of(el), vec![x]);
    }
}
