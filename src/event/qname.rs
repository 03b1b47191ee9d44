//! Qualified names and attribute lists.

use std::rc::Rc;

use super::augment::Augmentations;

/// Split a QName into an optional prefix and a local part.
///
/// A leading or trailing colon does not split; `split_qname2(":a")` and
/// `split_qname2("a:")` both return `None` and the raw name is used
/// whole, to be rejected later by name validation where appropriate.
pub fn split_qname2(name: &str) -> Option<(&str, &str)> {
    let pos = name.find(':')?;
    if pos == 0 || pos + 1 == name.len() {
        return None;
    }
    // Only the first colon splits; "a:b:c" has prefix "a".
    Some((&name[..pos], &name[pos + 1..]))
}

/// A qualified name: raw lexical form plus its split and (after
/// namespace binding) the bound URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QName {
    pub prefix: Option<Rc<str>>,
    pub local: Rc<str>,
    pub raw: Rc<str>,
    pub uri: Option<Rc<str>>,
}

impl QName {
    /// Build from a raw lexical name, splitting on the first colon.
    pub fn from_raw(raw: &str) -> Self {
        match split_qname2(raw) {
            Some((prefix, local)) => QName {
                prefix: Some(Rc::from(prefix)),
                local: Rc::from(local),
                raw: Rc::from(raw),
                uri: None,
            },
            None => QName {
                prefix: None,
                local: Rc::from(raw),
                raw: Rc::from(raw),
                uri: None,
            },
        }
    }

    /// A name known to carry no prefix.
    pub fn plain(raw: &str) -> Self {
        QName {
            prefix: None,
            local: Rc::from(raw),
            raw: Rc::from(raw),
            uri: None,
        }
    }

    pub fn with_uri(mut self, uri: Option<Rc<str>>) -> Self {
        self.uri = uri;
        self
    }

    /// `true` for `xmlns` and `xmlns:*` attribute names.
    pub fn is_xmlns(&self) -> bool {
        self.raw.as_ref() == "xmlns" || self.prefix.as_deref() == Some("xmlns")
    }
}

impl std::fmt::Display for QName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

/// One attribute as carried by a start-element event.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: QName,
    pub value: String,
    /// `false` only for attributes supplied by declaration defaulting.
    pub specified: bool,
    /// DTD-declared type keyword ("ID", "CDATA", ...), set by the DTD
    /// validator alongside the `ATTRIBUTE_DECLARED` augmentation.
    pub decl_type: Option<Rc<str>>,
    pub augmentations: Augmentations,
}

impl Attribute {
    pub fn new(name: QName, value: impl Into<String>) -> Self {
        Attribute {
            name,
            value: value.into(),
            specified: true,
            decl_type: None,
            augmentations: Augmentations::new(),
        }
    }
}

/// Attribute list in document order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    items: Vec<Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, attr: Attribute) {
        self.items.push(attr);
    }

    pub fn get(&self, index: usize) -> Option<&Attribute> {
        self.items.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Attribute> {
        self.items.get_mut(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attribute> {
        self.items.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Attribute> {
        self.items.iter_mut()
    }

    /// Look up by raw lexical name.
    pub fn find_raw(&self, raw: &str) -> Option<&Attribute> {
        self.items.iter().find(|a| a.name.raw.as_ref() == raw)
    }

    /// Look up by namespace URI and local name.
    pub fn find_ns(&self, uri: Option<&str>, local: &str) -> Option<&Attribute> {
        self.items
            .iter()
            .find(|a| a.name.uri.as_deref() == uri && a.name.local.as_ref() == local)
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qname_splitting() {
        let q = QName::from_raw("ns:local");
        assert_eq!(q.prefix.as_deref(), Some("ns"));
        assert_eq!(q.local.as_ref(), "local");
        assert_eq!(q.raw.as_ref(), "ns:local");

        let plain = QName::from_raw("doc");
        assert!(plain.prefix.is_none());
        assert_eq!(plain.local.as_ref(), "doc");

        assert!(split_qname2(":x").is_none());
        assert!(split_qname2("x:").is_none());
        assert_eq!(split_qname2("a:b:c"), Some(("a", "b:c")));
    }

    #[test]
    fn xmlns_detection() {
        assert!(QName::from_raw("xmlns").is_xmlns());
        assert!(QName::from_raw("xmlns:svg").is_xmlns());
        assert!(!QName::from_raw("xml:base").is_xmlns());
    }
}
