//! Structural augmentations: the out-of-band metadata side-channel
//! attached to events and to individual attributes.
//!
//! Producers (the DTD validator, a schema validator) attach entries
//! under well-known keys; the tree builder reads them but never writes.

use std::rc::Rc;

/// Post-schema-validation type information attached to an element or
/// attribute. Produced by a schema-validator stage; the builder only
/// consumes it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeInfo {
    pub type_name: Option<Rc<str>>,
    /// Union member type, available only once validation of the item is
    /// complete; preferred over `type_name` when present.
    pub member_type_name: Option<Rc<str>>,
    pub is_id: bool,
}

impl TypeInfo {
    /// The effective type for DOM bookkeeping: the union member type if
    /// the declared type is a union, else the declared type.
    pub fn effective_type(&self) -> Option<&Rc<str>> {
        self.member_type_name.as_ref().or(self.type_name.as_ref())
    }
}

/// Element-level PSVI.
pub const ELEMENT_PSVI: &str = "ELEMENT_PSVI";
/// Attribute-level PSVI.
pub const ATTRIBUTE_PSVI: &str = "ATTRIBUTE_PSVI";
/// Set when the attribute was declared in the DTD.
pub const ATTRIBUTE_DECLARED: &str = "ATTRIBUTE_DECLARED";
/// Set on entity boundary events when the entity was not expanded.
pub const ENTITY_SKIPPED: &str = "ENTITY_SKIPPED";

#[derive(Debug, Clone, PartialEq)]
pub enum AugValue {
    Flag(bool),
    Type(TypeInfo),
}

/// A small keyed map. The entry count is tiny (at most a handful per
/// event), so a vector beats a hash map here.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Augmentations {
    items: Vec<(&'static str, AugValue)>,
}

impl Augmentations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &'static str, value: AugValue) {
        if let Some(slot) = self.items.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.items.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&AugValue> {
        self.items.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    pub fn set_flag(&mut self, key: &'static str) {
        self.put(key, AugValue::Flag(true));
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.get(key), Some(AugValue::Flag(true)))
    }

    pub fn set_type_info(&mut self, key: &'static str, info: TypeInfo) {
        self.put(key, AugValue::Type(info));
    }

    pub fn type_info(&self, key: &str) -> Option<&TypeInfo> {
        match self.get(key) {
            Some(AugValue::Type(info)) => Some(info),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_replaces_existing_key() {
        let mut augs = Augmentations::new();
        augs.put(ATTRIBUTE_DECLARED, AugValue::Flag(false));
        augs.set_flag(ATTRIBUTE_DECLARED);
        assert!(augs.flag(ATTRIBUTE_DECLARED));
        assert_eq!(augs.items.len(), 1);
    }

    #[test]
    fn member_type_preferred() {
        let info = TypeInfo {
            type_name: Some("listOfInts".into()),
            member_type_name: Some("int".into()),
            is_id: false,
        };
        assert_eq!(info.effective_type().map(|t| t.as_ref()), Some("int"));
    }
}
