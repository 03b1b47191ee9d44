//! The abort/interrupt protocol.
//!
//! Two cooperating mechanisms unwind an in-progress parse:
//! - a cloneable atomic token, checked at the top of every tree-builder
//!   entry point, at each event delivery in the pipeline driver, and
//!   between buffer refills at the input boundary;
//! - a poison consumer substituted for the real handlers once the token
//!   is observed, so any callback still in flight raises the
//!   cancellation signal instead of mutating builder state.
//!
//! The signal itself is [`XmlError::Cancelled`]: payload-free and
//! distinguishable from every document error, so callers can tell
//! "parsing was cancelled" from "parsing failed".

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use crate::{
    error::XmlError,
    event::{
        AttType, Attributes, Augmentations, ContentSpec, DefaultDecl, DocumentHandler, DtdHandler,
        Locator, QName, ResourceId,
    },
};

/// Shared cancellation token. Cloned into the input layer, the pipeline
/// driver and the tree builder; any clone can observe an abort.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Raise the cancellation signal if the token has been triggered.
    pub fn check(&self) -> Result<(), XmlError> {
        if self.is_aborted() {
            Err(XmlError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn trigger(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Re-arm for the next parse. Only the owning parser calls this,
    /// never a concurrent aborter.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Handle given to callers (and other threads) to cancel a parse.
///
/// `abort` returns immediately; the blocked `parse` call observes the
/// cancellation at its next callback delivery or input refill and
/// returns [`XmlError::Cancelled`]. Aborting a parse that has already
/// finished is a no-op (the abort race is lost and the completed result
/// stands).
#[derive(Debug, Clone)]
pub struct AbortHandle {
    token: AbortToken,
}

impl AbortHandle {
    pub fn new(token: AbortToken) -> Self {
        Self { token }
    }

    pub fn abort(&self) {
        log::debug!("abort requested");
        self.token.trigger();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_aborted()
    }
}

/// Consumer whose every callback raises the cancellation signal.
///
/// Substituted for the real consumer once an abort is observed, so an
/// event already past the driver's token check still unwinds instead of
/// reaching the builder.
#[derive(Debug, Default)]
pub struct PoisonConsumer;

macro_rules! poisoned {
    ($($name:ident ( $($arg:ident : $ty:ty),* );)*) => {
        $(fn $name(&mut self, $(_: $ty,)* _: &mut Augmentations) -> Result<(), XmlError> {
            Err(XmlError::Cancelled)
        })*
    };
}

impl DocumentHandler for PoisonConsumer {
    poisoned! {
        start_document(locator: &Locator, encoding: Option<&str>);
        xml_decl(version: crate::chvalid::XmlVersion, encoding: Option<&str>, standalone: Option<bool>);
        doctype_decl(name: &str, public_id: Option<&str>, system_id: Option<&str>);
        start_element(name: &QName, attributes: &mut Attributes);
        empty_element(name: &QName, attributes: &mut Attributes);
        end_element(name: &QName);
        characters(text: &str);
        ignorable_whitespace(text: &str);
        comment(text: &str);
        processing_instruction(target: &str, data: Option<&str>);
        start_cdata();
        end_cdata();
        start_general_entity(name: &str, identifier: Option<&ResourceId>, encoding: Option<&str>);
        text_decl(version: Option<&str>, encoding: Option<&str>);
        end_general_entity(name: &str);
        end_document();
    }
}

impl DtdHandler for PoisonConsumer {
    poisoned! {
        start_dtd(locator: &Locator);
        end_dtd();
        start_external_subset(identifier: &ResourceId);
        end_external_subset();
        element_decl(name: &str, spec: ContentSpec, model: &str);
        attribute_decl(element: &str, attribute: &str, att_type: &AttType, default: &DefaultDecl);
        internal_entity_decl(name: &str, value: &str);
        external_entity_decl(name: &str, identifier: &ResourceId);
        unparsed_entity_decl(name: &str, identifier: &ResourceId, notation: &str);
        notation_decl(name: &str, identifier: &ResourceId);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{XmlEvent, deliver};

    #[test]
    fn token_round_trip() {
        let token = AbortToken::new();
        let handle = AbortHandle::new(token.clone());
        assert!(token.check().is_ok());
        handle.abort();
        assert!(matches!(token.check(), Err(XmlError::Cancelled)));
        token.reset();
        assert!(token.check().is_ok());
    }

    #[test]
    fn poison_consumer_cancels_everything() {
        let mut poison = PoisonConsumer;
        let err = deliver(XmlEvent::EndDocument, &mut poison).unwrap_err();
        assert!(err.is_cancelled());
        let err = deliver(
            XmlEvent::Comment {
                text: "c".into(),
            },
            &mut poison,
        )
        .unwrap_err();
        assert!(err.is_cancelled());
    }
}
