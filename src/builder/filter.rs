//! Live content-filter protocol.
//!
//! A filter is consulted at well-defined checkpoints, after a node's
//! construction completes: element start (before the element is
//! appended), element end, comment, processing instruction, CDATA
//! section, entity-reference boundary, and coalesced text runs. It is
//! never consulted inside an expanded entity reference and never for
//! the document's root element.
//!
//! Filtering applies to eager construction only; deferred parses ignore
//! the filter entirely.

use crate::dom::{Document, NodeId, NodeType};

const SHOW_ELEMENT: u32 = 0x0000_0001;
const SHOW_TEXT: u32 = 0x0000_0004;
const SHOW_CDATA_SECTION: u32 = 0x0000_0008;
const SHOW_ENTITY_REFERENCE: u32 = 0x0000_0010;
const SHOW_PROCESSING_INSTRUCTION: u32 = 0x0000_0040;
const SHOW_COMMENT: u32 = 0x0000_0080;
const SHOW_ALL: u32 = 0xFFFF_FFFF;

/// Bitmask of node kinds the filter wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WhatToShow(u32);

impl WhatToShow {
    pub const ALL: WhatToShow = WhatToShow(SHOW_ALL);
    pub const ELEMENT: WhatToShow = WhatToShow(SHOW_ELEMENT);
    pub const TEXT: WhatToShow = WhatToShow(SHOW_TEXT);
    pub const CDATA_SECTION: WhatToShow = WhatToShow(SHOW_CDATA_SECTION);
    pub const ENTITY_REFERENCE: WhatToShow = WhatToShow(SHOW_ENTITY_REFERENCE);
    pub const PROCESSING_INSTRUCTION: WhatToShow = WhatToShow(SHOW_PROCESSING_INSTRUCTION);
    pub const COMMENT: WhatToShow = WhatToShow(SHOW_COMMENT);

    pub fn union(self, other: WhatToShow) -> WhatToShow {
        WhatToShow(self.0 | other.0)
    }

    pub fn shows(self, kind: NodeType) -> bool {
        let bit = match kind {
            NodeType::Element => SHOW_ELEMENT,
            NodeType::Text => SHOW_TEXT,
            NodeType::CDATASection => SHOW_CDATA_SECTION,
            NodeType::EntityReference => SHOW_ENTITY_REFERENCE,
            NodeType::ProcessingInstruction => SHOW_PROCESSING_INSTRUCTION,
            NodeType::Comment => SHOW_COMMENT,
            _ => return false,
        };
        self.0 & bit != 0
    }
}

/// Outcome of a filter checkpoint.
///
/// For node kinds without children, `Skip` and `Reject` are equivalent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterVerdict {
    #[default]
    Accept,
    /// Remove this node but keep its children, spliced into its former
    /// position in order.
    Skip,
    /// Remove this node and everything under it.
    Reject,
    /// Abort the parse immediately via the cancellation signal.
    Interrupt,
}

/// Pluggable content filter.
pub trait ContentFilter {
    /// Which node kinds to surface. Checkpoints for kinds outside the
    /// mask are skipped without consulting the filter.
    fn what_to_show(&self) -> WhatToShow {
        WhatToShow::ALL
    }

    /// Element checkpoint at start-tag time, after attributes are in
    /// place but before the element joins the tree. Rejecting here
    /// suppresses the whole subtree without constructing it.
    fn start_element_check(&mut self, doc: &Document, element: NodeId) -> FilterVerdict {
        let _ = (doc, element);
        FilterVerdict::Accept
    }

    /// Post-construction checkpoint for every shown node kind.
    fn accept_node(&mut self, doc: &Document, node: NodeId) -> FilterVerdict;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mask_composition() {
        let mask = WhatToShow::ELEMENT.union(WhatToShow::COMMENT);
        assert!(mask.shows(NodeType::Element));
        assert!(mask.shows(NodeType::Comment));
        assert!(!mask.shows(NodeType::Text));
        assert!(WhatToShow::ALL.shows(NodeType::EntityReference));
        assert!(!WhatToShow::ALL.shows(NodeType::Document));
    }
}
