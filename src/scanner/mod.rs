//! Document scanner: decoded characters in, the Event Contract out.
//!
//! One function per production, errors named after the production that
//! failed. The scanner expands internal general entities itself (with a
//! recursion guard) and brackets each expansion with entity boundary
//! events; external entities are declared but never fetched, so their
//! references are reported skipped.

use std::collections::HashMap;
use std::rc::Rc;

use crate::{
    abort::AbortToken,
    chvalid::{self, XmlVersion},
    error::{ParseDiagnostic, SharedErrorReporter, XmlError, XmlErrorCode, XmlSeverity},
    event::{Attribute, Attributes, Augmentations, ENTITY_SKIPPED, Locator, QName, XmlEvent},
};

pub mod dtd;

/// Hard limit on nested entity expansion.
const MAX_ENTITY_DEPTH: usize = 32;

/// A declared general or parameter entity.
#[derive(Debug, Clone)]
pub enum EntityDef {
    Internal(String),
    External {
        public_id: Option<String>,
        system_id: Option<String>,
    },
    Unparsed {
        public_id: Option<String>,
        system_id: Option<String>,
        notation: String,
    },
}

/// Declared entities, general and parameter, first declaration wins.
#[derive(Debug, Default)]
pub struct EntityTables {
    pub general: HashMap<String, EntityDef>,
    pub parameter: HashMap<String, EntityDef>,
}

impl EntityTables {
    pub fn declare_general(&mut self, name: &str, def: EntityDef) {
        self.general.entry(name.to_string()).or_insert(def);
    }

    pub fn declare_parameter(&mut self, name: &str, def: EntityDef) {
        self.parameter.entry(name.to_string()).or_insert(def);
    }
}

/// Character cursor over decoded input with position tracking.
pub(crate) struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    line: u32,
    column: u32,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Cursor {
            text,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    pub(crate) fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pos >= self.text.len()
    }

    pub(crate) fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub(crate) fn starts_with(&self, prefix: &str) -> bool {
        self.rest().starts_with(prefix)
    }

    pub(crate) fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    pub(crate) fn advance(&mut self, n_bytes: usize) {
        let target = self.pos + n_bytes;
        while self.pos < target && self.bump().is_some() {}
    }

    /// Skip white space; `true` if any was consumed.
    pub(crate) fn skip_ws(&mut self) -> bool {
        let mut seen = false;
        while self.peek().is_some_and(chvalid::is_xml_whitespace) {
            self.bump();
            seen = true;
        }
        seen
    }

    pub(crate) fn scan_name(&mut self) -> Option<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(c) if chvalid::is_name_start_char(c) => {
                self.bump();
            }
            _ => return None,
        }
        while self.peek().is_some_and(chvalid::is_name_char) {
            self.bump();
        }
        Some(&self.text[start..self.pos])
    }

    /// Byte offset of the next `<` or `&`, relative to the cursor.
    pub(crate) fn find_markup(&self) -> Option<usize> {
        memchr::memchr2(b'<', b'&', self.rest().as_bytes())
    }

    pub(crate) fn find(&self, needle: &str) -> Option<usize> {
        self.rest().find(needle)
    }

    pub(crate) fn locator(&self, system_id: Option<Rc<str>>) -> Locator {
        Locator {
            public_id: None,
            system_id,
            base_system_id: None,
            line: self.line,
            column: self.column,
        }
    }
}

/// Sink the scanner pushes events into.
pub type EventSink<'s> = dyn FnMut(XmlEvent) -> Result<(), XmlError> + 's;

/// The per-version document scanner. The XML 1.1 instance is built
/// lazily by the configuration on first contact with a 1.1 document.
pub struct DocumentScanner {
    version: XmlVersion,
    reporter: SharedErrorReporter,
    abort: AbortToken,
    system_id: Option<Rc<str>>,
    entities: EntityTables,
    entity_depth: usize,
}

impl DocumentScanner {
    pub fn new(version: XmlVersion, reporter: SharedErrorReporter) -> Self {
        DocumentScanner {
            version,
            reporter,
            abort: AbortToken::new(),
            system_id: None,
            entities: EntityTables::default(),
            entity_depth: 0,
        }
    }

    pub fn version(&self) -> XmlVersion {
        self.version
    }

    pub fn set_abort_token(&mut self, token: AbortToken) {
        self.abort = token;
    }

    pub fn set_system_id(&mut self, system_id: Option<Rc<str>>) {
        self.system_id = system_id;
    }

    pub fn reset(&mut self) {
        self.entities = EntityTables::default();
        self.entity_depth = 0;
    }

    fn fatal(&self, cursor: &Cursor<'_>, code: XmlErrorCode, message: String) -> XmlError {
        self.reporter.borrow_mut().fatal(ParseDiagnostic {
            code,
            message,
            system_id: self.system_id.as_deref().map(str::to_string),
            line: cursor.line,
            column: cursor.column,
        })
    }

    fn warn(&self, cursor: &Cursor<'_>, code: XmlErrorCode, message: String) {
        self.reporter.borrow_mut().report(
            XmlSeverity::Error,
            ParseDiagnostic {
                code,
                message,
                system_id: self.system_id.as_deref().map(str::to_string),
                line: cursor.line,
                column: cursor.column,
            },
        );
    }

    /// Sniff the version from the XML declaration without consuming
    /// input. Used by the configuration to pick the version pipeline.
    pub fn sniff_version(text: &str) -> XmlVersion {
        let Some(decl) = text.strip_prefix("<?xml") else {
            return XmlVersion::Xml10;
        };
        let Some(end) = decl.find("?>") else {
            return XmlVersion::Xml10;
        };
        if decl[..end].contains("\"1.1\"") || decl[..end].contains("'1.1'") {
            XmlVersion::Xml11
        } else {
            XmlVersion::Xml10
        }
    }

    /// Scan a complete document, pushing events in document order.
    pub fn scan_document(
        &mut self,
        text: &str,
        encoding: Option<&str>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        let mut cursor = Cursor::new(text);
        sink(XmlEvent::StartDocument {
            locator: cursor.locator(self.system_id.clone()),
            encoding: encoding.map(str::to_string),
        })?;

        if cursor.starts_with("<?xml")
            && cursor.rest()[5..]
                .chars()
                .next()
                .is_some_and(chvalid::is_xml_whitespace)
        {
            self.scan_xml_decl(&mut cursor, sink)?;
        }

        // Prolog misc and an optional DOCTYPE.
        let mut seen_doctype = false;
        loop {
            self.abort.check()?;
            cursor.skip_ws();
            if cursor.starts_with("<!--") {
                self.scan_comment(&mut cursor, sink)?;
            } else if cursor.starts_with("<?") {
                self.scan_pi(&mut cursor, sink)?;
            } else if cursor.starts_with("<!DOCTYPE") {
                if seen_doctype {
                    return Err(self.fatal(
                        &cursor,
                        XmlErrorCode::DoctypeNotFinished,
                        "only one document type declaration is allowed".into(),
                    ));
                }
                seen_doctype = true;
                self.scan_doctype(&mut cursor, sink)?;
            } else {
                break;
            }
        }

        if !cursor.starts_with("<") {
            return Err(self.fatal(
                &cursor,
                XmlErrorCode::DocumentEmpty,
                "document has no root element".into(),
            ));
        }
        self.scan_element(&mut cursor, sink)?;

        // Trailing misc.
        loop {
            cursor.skip_ws();
            if cursor.starts_with("<!--") {
                self.scan_comment(&mut cursor, sink)?;
            } else if cursor.starts_with("<?") {
                self.scan_pi(&mut cursor, sink)?;
            } else {
                break;
            }
        }
        if !cursor.is_empty() {
            return Err(self.fatal(
                &cursor,
                XmlErrorCode::ExtraContent,
                "extra content at the end of the document".into(),
            ));
        }
        sink(XmlEvent::EndDocument)
    }

    fn scan_xml_decl(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance(5);
        let mut version = None;
        let mut encoding = None;
        let mut standalone = None;
        loop {
            cursor.skip_ws();
            if cursor.starts_with("?>") {
                cursor.advance(2);
                break;
            }
            let Some(name) = cursor.scan_name() else {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::XmlDeclNotFinished,
                    "malformed XML declaration".into(),
                ));
            };
            cursor.skip_ws();
            if cursor.peek() != Some('=') {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::EqualRequired,
                    format!("expected '=' after \"{name}\""),
                ));
            }
            cursor.bump();
            cursor.skip_ws();
            let value = self.scan_literal(cursor)?;
            match name {
                "version" => match value.as_str() {
                    "1.0" => version = Some(XmlVersion::Xml10),
                    "1.1" => version = Some(XmlVersion::Xml11),
                    other => {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::UnsupportedVersion,
                            format!("unsupported XML version \"{other}\""),
                        ));
                    }
                },
                "encoding" => encoding = Some(value),
                "standalone" => match value.as_str() {
                    "yes" => standalone = Some(true),
                    "no" => standalone = Some(false),
                    other => {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::StandaloneValue,
                            format!("standalone accepts \"yes\" or \"no\", not \"{other}\""),
                        ));
                    }
                },
                other => {
                    return Err(self.fatal(
                        cursor,
                        XmlErrorCode::XmlDeclNotFinished,
                        format!("unexpected \"{other}\" in XML declaration"),
                    ));
                }
            }
        }
        let Some(version) = version else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::VersionMissing,
                "XML declaration is missing the version".into(),
            ));
        };
        self.version = version;
        sink(XmlEvent::XmlDecl {
            version,
            encoding,
            standalone,
        })
    }

    fn scan_literal(&mut self, cursor: &mut Cursor<'_>) -> Result<String, XmlError> {
        let quote = match cursor.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::LiteralNotFinished,
                    "expected a quoted literal".into(),
                ));
            }
        };
        cursor.bump();
        let Some(end) = cursor.rest().find(quote) else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::LiteralNotFinished,
                "unterminated literal".into(),
            ));
        };
        let value = cursor.rest()[..end].to_string();
        cursor.advance(end + 1);
        Ok(value)
    }

    fn scan_comment(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance(4);
        let Some(end) = cursor.find("-->") else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::CommentNotFinished,
                "unterminated comment".into(),
            ));
        };
        let text = &cursor.rest()[..end];
        if text.contains("--") {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::HyphenInComment,
                "\"--\" is not allowed inside a comment".into(),
            ));
        }
        if text.ends_with('-') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::HyphenInComment,
                "comment must not end with \"-\"".into(),
            ));
        }
        let text = text.to_string();
        cursor.advance(end + 3);
        sink(XmlEvent::Comment { text })
    }

    fn scan_pi(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance(2);
        let Some(target) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::PINotFinished,
                "processing instruction has no target".into(),
            ));
        };
        if target.eq_ignore_ascii_case("xml") {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::ReservedPITarget,
                "\"xml\" is a reserved processing-instruction target".into(),
            ));
        }
        let target = target.to_string();
        let had_space = cursor.skip_ws();
        let Some(end) = cursor.find("?>") else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::PINotFinished,
                format!("unterminated processing instruction \"{target}\""),
            ));
        };
        let data = &cursor.rest()[..end];
        if !data.is_empty() && !had_space {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::SpaceRequired,
                "white space required after the PI target".into(),
            ));
        }
        let data = if data.is_empty() && !had_space {
            None
        } else {
            Some(data.to_string())
        };
        cursor.advance(end + 2);
        sink(XmlEvent::ProcessingInstruction { target, data })
    }

    fn scan_doctype(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance("<!DOCTYPE".len());
        if !cursor.skip_ws() {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::SpaceRequired,
                "white space required after DOCTYPE".into(),
            ));
        }
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "DOCTYPE requires a root element name".into(),
            ));
        };
        let name = name.to_string();
        cursor.skip_ws();
        let (public_id, system_id) = self.scan_external_id(cursor, false)?;
        cursor.skip_ws();

        sink(XmlEvent::DoctypeDecl {
            name: name.clone(),
            public_id: public_id.clone(),
            system_id: system_id.clone(),
        })?;
        sink(XmlEvent::StartDtd {
            locator: cursor.locator(self.system_id.clone()),
        })?;

        if cursor.peek() == Some('[') {
            cursor.bump();
            let Some(end) = self.find_subset_end(cursor) else {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::DoctypeNotFinished,
                    "unterminated internal subset".into(),
                ));
            };
            let subset = &cursor.rest()[..end];
            let mut dtd = dtd::DtdScanner::new(
                self.version,
                self.reporter.clone(),
                self.system_id.clone(),
            );
            dtd.scan_internal_subset(subset, &mut self.entities, sink)?;
            cursor.advance(end + 1);
            cursor.skip_ws();
        }
        if cursor.peek() != Some('>') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::DoctypeNotFinished,
                "expected '>' to close DOCTYPE".into(),
            ));
        }
        cursor.bump();
        sink(XmlEvent::EndDtd)
    }

    /// Find the `]` closing the internal subset, skipping quoted
    /// literals and comments.
    fn find_subset_end(&self, cursor: &Cursor<'_>) -> Option<usize> {
        let rest = cursor.rest();
        let bytes = rest.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b']' => return Some(i),
                b'"' | b'\'' => {
                    let quote = bytes[i];
                    i += 1;
                    while i < bytes.len() && bytes[i] != quote {
                        i += 1;
                    }
                    i += 1;
                }
                b'<' if rest[i..].starts_with("<!--") => {
                    i += rest[i..].find("-->").map(|p| p + 3)?;
                }
                _ => i += 1,
            }
        }
        None
    }

    /// `SYSTEM 'sys'` or `PUBLIC 'pub' 'sys'`; the system literal is
    /// optional when `public_alone` allows it (notation declarations).
    pub(crate) fn scan_external_id(
        &mut self,
        cursor: &mut Cursor<'_>,
        public_alone: bool,
    ) -> Result<(Option<String>, Option<String>), XmlError> {
        if cursor.starts_with("SYSTEM") {
            cursor.advance(6);
            if !cursor.skip_ws() {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::SpaceRequired,
                    "white space required after SYSTEM".into(),
                ));
            }
            let system = self.scan_literal(cursor)?;
            Ok((None, Some(system)))
        } else if cursor.starts_with("PUBLIC") {
            cursor.advance(6);
            if !cursor.skip_ws() {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::SpaceRequired,
                    "white space required after PUBLIC".into(),
                ));
            }
            let public = self.scan_literal(cursor)?;
            if let Some(bad) = public.chars().find(|&c| !chvalid::is_pubid_char(c)) {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::InvalidChar,
                    format!("invalid character '{bad}' in public identifier"),
                ));
            }
            let had_space = cursor.skip_ws();
            if matches!(cursor.peek(), Some('"' | '\'')) && had_space {
                let system = self.scan_literal(cursor)?;
                Ok((Some(public), Some(system)))
            } else if public_alone {
                Ok((Some(public), None))
            } else {
                Err(self.fatal(
                    cursor,
                    XmlErrorCode::LiteralNotFinished,
                    "PUBLIC requires a system literal here".into(),
                ))
            }
        } else {
            Ok((None, None))
        }
    }

    fn scan_element(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        self.abort.check()?;
        cursor.bump(); // consume '<'
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "expected an element name after '<'".into(),
            ));
        };
        let name = QName::from_raw(name);
        let mut attributes = Attributes::new();
        loop {
            let had_space = cursor.skip_ws();
            match cursor.peek() {
                Some('>') => {
                    cursor.bump();
                    sink(XmlEvent::StartElement {
                        name: name.clone(),
                        attributes,
                        augmentations: Augmentations::new(),
                    })?;
                    self.scan_content(cursor, sink, false)?;
                    // scan_content stops at "</".
                    cursor.advance(2);
                    let Some(end_name) = cursor.scan_name() else {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::NameRequired,
                            "expected a name in the end tag".into(),
                        ));
                    };
                    if end_name != name.raw.as_ref() {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::TagNameMismatch,
                            format!(
                                "end tag \"{end_name}\" does not match start tag \"{}\"",
                                name.raw
                            ),
                        ));
                    }
                    cursor.skip_ws();
                    if cursor.peek() != Some('>') {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::GtRequired,
                            format!("end tag \"{end_name}\" is not closed"),
                        ));
                    }
                    cursor.bump();
                    return sink(XmlEvent::EndElement {
                        name,
                        augmentations: Augmentations::new(),
                    });
                }
                Some('/') => {
                    cursor.bump();
                    if cursor.peek() != Some('>') {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::TagNotFinished,
                            format!("start tag \"{}\" is not closed", name.raw),
                        ));
                    }
                    cursor.bump();
                    return sink(XmlEvent::EmptyElement {
                        name,
                        attributes,
                        augmentations: Augmentations::new(),
                    });
                }
                Some(c) if chvalid::is_name_start_char(c) => {
                    if !had_space {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::SpaceRequired,
                            "white space required between attributes".into(),
                        ));
                    }
                    let attr = self.scan_attribute(cursor)?;
                    if attributes.find_raw(attr.name.raw.as_ref()).is_some() {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::AttributeRedefined,
                            format!("attribute \"{}\" redefined", attr.name.raw),
                        ));
                    }
                    attributes.push(attr);
                }
                _ => {
                    return Err(self.fatal(
                        cursor,
                        XmlErrorCode::TagNotFinished,
                        format!("start tag \"{}\" is not closed", name.raw),
                    ));
                }
            }
        }
    }

    fn scan_attribute(&mut self, cursor: &mut Cursor<'_>) -> Result<Attribute, XmlError> {
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "expected an attribute name".into(),
            ));
        };
        let name = QName::from_raw(name);
        cursor.skip_ws();
        if cursor.peek() != Some('=') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::AttributeWithoutValue,
                format!("attribute \"{}\" has no value", name.raw),
            ));
        }
        cursor.bump();
        cursor.skip_ws();
        let value = self.scan_attribute_value(cursor, &name)?;
        Ok(Attribute::new(name, value))
    }

    /// AttValue production: quotes, char/entity references, `<` ban,
    /// white-space normalization.
    fn scan_attribute_value(
        &mut self,
        cursor: &mut Cursor<'_>,
        name: &QName,
    ) -> Result<String, XmlError> {
        let quote = match cursor.peek() {
            Some(q @ ('"' | '\'')) => q,
            _ => {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::AttributeNotFinished,
                    format!("attribute \"{}\" value is not quoted", name.raw),
                ));
            }
        };
        cursor.bump();
        let mut value = String::new();
        let mut depth = 0;
        self.scan_attribute_content(cursor, Some(quote), &mut value, &mut depth)?;
        Ok(value)
    }

    /// `quote` is `None` when scanning entity replacement text, which
    /// ends at end of input instead of a closing quote.
    fn scan_attribute_content(
        &mut self,
        cursor: &mut Cursor<'_>,
        quote: Option<char>,
        value: &mut String,
        depth: &mut usize,
    ) -> Result<(), XmlError> {
        loop {
            match cursor.peek() {
                None => {
                    return if quote.is_none() {
                        Ok(())
                    } else {
                        Err(self.fatal(
                            cursor,
                            XmlErrorCode::AttributeNotFinished,
                            "unterminated attribute value".into(),
                        ))
                    };
                }
                Some(c) if Some(c) == quote => {
                    cursor.bump();
                    return Ok(());
                }
                Some('<') => {
                    return Err(self.fatal(
                        cursor,
                        XmlErrorCode::LtInAttribute,
                        "'<' is not allowed in attribute values".into(),
                    ));
                }
                Some('&') => {
                    if cursor.starts_with("&#") {
                        value.push(self.scan_char_ref(cursor)?);
                    } else {
                        let (name, replacement) = self.resolve_entity_in_literal(cursor)?;
                        // Predefined entities expand to the literal
                        // character; the result is never re-scanned.
                        if let Some(text) = predefined_entity(&name) {
                            value.push_str(text);
                            continue;
                        }
                        match replacement {
                            Some(text) => {
                                if *depth >= MAX_ENTITY_DEPTH {
                                    return Err(self.fatal(
                                        cursor,
                                        XmlErrorCode::EntityLoop,
                                        format!("entity \"{name}\" expands too deeply"),
                                    ));
                                }
                                *depth += 1;
                                let mut nested = Cursor::new(&text);
                                self.scan_attribute_content(&mut nested, None, value, depth)?;
                                *depth -= 1;
                            }
                            None => {
                                self.warn(
                                    cursor,
                                    XmlErrorCode::UndeclaredEntity,
                                    format!("entity \"{name}\" was not declared"),
                                );
                            }
                        }
                    }
                }
                // Attribute-value normalization folds white space.
                Some(c) if chvalid::is_xml_whitespace(c) => {
                    cursor.bump();
                    value.push(' ');
                }
                Some(c) => {
                    cursor.bump();
                    value.push(c);
                }
            }
        }
    }

    /// `&name;` inside a literal: predefined and internal entities
    /// resolve to replacement text, anything else reports and skips.
    fn resolve_entity_in_literal(
        &mut self,
        cursor: &mut Cursor<'_>,
    ) -> Result<(String, Option<String>), XmlError> {
        cursor.bump(); // '&'
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "expected an entity name after '&'".into(),
            ));
        };
        let name = name.to_string();
        if cursor.peek() != Some(';') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::EntityNotFinished,
                format!("entity reference \"{name}\" is missing ';'"),
            ));
        }
        cursor.bump();
        if let Some(predefined) = predefined_entity(&name) {
            return Ok((name, Some(predefined.to_string())));
        }
        match self.entities.general.get(&name) {
            Some(EntityDef::Internal(text)) => {
                let text = text.clone();
                Ok((name, Some(text)))
            }
            _ => Ok((name, None)),
        }
    }

    fn scan_char_ref(&mut self, cursor: &mut Cursor<'_>) -> Result<char, XmlError> {
        cursor.advance(2); // "&#"
        let hex = cursor.peek() == Some('x');
        if hex {
            cursor.bump();
        }
        let mut code: u32 = 0;
        let mut digits = 0;
        while let Some(c) = cursor.peek() {
            let digit = if hex {
                c.to_digit(16)
            } else {
                c.to_digit(10)
            };
            let Some(digit) = digit else { break };
            code = code.saturating_mul(if hex { 16 } else { 10 }).saturating_add(digit);
            digits += 1;
            cursor.bump();
        }
        if digits == 0 || cursor.peek() != Some(';') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::InvalidCharRef,
                "malformed character reference".into(),
            ));
        }
        cursor.bump();
        let c = char::from_u32(code).filter(|&c| chvalid::is_char(c, self.version));
        c.ok_or_else(|| {
            self.fatal(
                cursor,
                XmlErrorCode::InvalidCharRef,
                format!("character reference &#{code}; is outside the allowed range"),
            )
        })
    }

    /// Element content: text, markup, nested elements, entity
    /// expansion. Returns with the cursor at a `</` that closes the
    /// enclosing element, or at end of input when `allow_eof` is set
    /// (scanning entity replacement text).
    fn scan_content(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
        allow_eof: bool,
    ) -> Result<(), XmlError> {
        loop {
            self.abort.check()?;
            let markup = cursor.find_markup();
            let text_len = markup.unwrap_or_else(|| cursor.rest().len());
            if text_len > 0 {
                let text = &cursor.rest()[..text_len];
                if let Some(pos) = text.find("]]>") {
                    cursor.advance(pos);
                    return Err(self.fatal(
                        cursor,
                        XmlErrorCode::InvalidChar,
                        "\"]]>\" is not allowed in character content".into(),
                    ));
                }
                if let Some(bad) = text.chars().find(|&c| !chvalid::is_char(c, self.version)) {
                    return Err(self.fatal(
                        cursor,
                        XmlErrorCode::InvalidChar,
                        format!("invalid character U+{:04X} in content", bad as u32),
                    ));
                }
                let owned = text.to_string();
                cursor.advance(text_len);
                sink(XmlEvent::Characters {
                    text: owned,
                    augmentations: Augmentations::new(),
                })?;
            }
            if markup.is_none() {
                return if allow_eof {
                    Ok(())
                } else {
                    Err(self.fatal(
                        cursor,
                        XmlErrorCode::DocumentEnd,
                        "unexpected end of document inside element content".into(),
                    ))
                };
            }
            if cursor.starts_with("</") {
                return Ok(());
            } else if cursor.starts_with("<!--") {
                self.scan_comment(cursor, sink)?;
            } else if cursor.starts_with("<![CDATA[") {
                self.scan_cdata(cursor, sink)?;
            } else if cursor.starts_with("<?") {
                self.scan_pi(cursor, sink)?;
            } else if cursor.starts_with("<") {
                self.scan_element(cursor, sink)?;
            } else if cursor.starts_with("&#") {
                let c = self.scan_char_ref(cursor)?;
                sink(XmlEvent::Characters {
                    text: c.to_string(),
                    augmentations: Augmentations::new(),
                })?;
            } else if cursor.starts_with("&") {
                self.scan_entity_ref(cursor, sink)?;
            }
        }
    }

    fn scan_cdata(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance("<![CDATA[".len());
        let Some(end) = cursor.find("]]>") else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::CDATANotFinished,
                "unterminated CDATA section".into(),
            ));
        };
        let text = cursor.rest()[..end].to_string();
        cursor.advance(end + 3);
        sink(XmlEvent::StartCdata)?;
        if !text.is_empty() {
            sink(XmlEvent::Characters {
                text,
                augmentations: Augmentations::new(),
            })?;
        }
        sink(XmlEvent::EndCdata)
    }

    /// General entity reference in content: expand internal entities
    /// recursively between boundary events; report external and
    /// undeclared entities as skipped.
    fn scan_entity_ref(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.bump(); // '&'
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "expected an entity name after '&'".into(),
            ));
        };
        let name: Rc<str> = Rc::from(name);
        if cursor.peek() != Some(';') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::EntityNotFinished,
                format!("entity reference \"{name}\" is missing ';'"),
            ));
        }
        cursor.bump();

        if let Some(predefined) = predefined_entity(&name) {
            return sink(XmlEvent::Characters {
                text: predefined.to_string(),
                augmentations: Augmentations::new(),
            });
        }
        if self.entity_depth >= MAX_ENTITY_DEPTH {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::EntityLoop,
                format!("entity \"{name}\" expands too deeply"),
            ));
        }
        match self.entities.general.get(name.as_ref()).cloned() {
            Some(EntityDef::Internal(replacement)) => {
                sink(XmlEvent::StartGeneralEntity {
                    name: name.clone(),
                    identifier: None,
                    encoding: None,
                    augmentations: Augmentations::new(),
                })?;
                self.entity_depth += 1;
                let mut nested = Cursor::new(&replacement);
                let scanned = self.scan_content(&mut nested, sink, true);
                self.entity_depth -= 1;
                scanned?;
                if !nested.is_empty() {
                    return Err(self.fatal(
                        &nested,
                        XmlErrorCode::TagNameMismatch,
                        format!("entity \"{name}\" is not well-formed"),
                    ));
                }
                sink(XmlEvent::EndGeneralEntity {
                    name,
                    augmentations: Augmentations::new(),
                })
            }
            Some(EntityDef::External { .. }) | Some(EntityDef::Unparsed { .. }) | None => {
                if self.entities.general.get(name.as_ref()).is_none() {
                    self.warn(
                        cursor,
                        XmlErrorCode::UndeclaredEntity,
                        format!("entity \"{name}\" was not declared"),
                    );
                }
                // Not fetched: report the boundary with the skipped mark.
                let mut augs = Augmentations::new();
                augs.set_flag(ENTITY_SKIPPED);
                sink(XmlEvent::StartGeneralEntity {
                    name: name.clone(),
                    identifier: None,
                    encoding: None,
                    augmentations: augs.clone(),
                })?;
                sink(XmlEvent::EndGeneralEntity {
                    name,
                    augmentations: augs,
                })
            }
        }
    }

    pub fn entities_mut(&mut self) -> &mut EntityTables {
        &mut self.entities
    }
}

/// The five predefined entities.
pub fn predefined_entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::shared_reporter;

    fn scan(text: &str) -> Result<Vec<String>, XmlError> {
        let mut scanner = DocumentScanner::new(XmlVersion::Xml10, shared_reporter());
        let mut events = vec![];
        scanner.scan_document(text, None, &mut |ev| {
            let label = match &ev {
                XmlEvent::StartElement { name, .. } => format!("start {}", name.raw),
                XmlEvent::EmptyElement { name, .. } => format!("empty {}", name.raw),
                XmlEvent::EndElement { name, .. } => format!("end {}", name.raw),
                XmlEvent::Characters { text, .. } => format!("chars {text:?}"),
                XmlEvent::Comment { text } => format!("comment {text:?}"),
                XmlEvent::ProcessingInstruction { target, .. } => format!("pi {target}"),
                XmlEvent::StartGeneralEntity { name, .. } => format!("start-ent {name}"),
                XmlEvent::EndGeneralEntity { name, .. } => format!("end-ent {name}"),
                other => other.kind_name().to_string(),
            };
            events.push(label);
            Ok(())
        })?;
        Ok(events)
    }

    #[test]
    fn simple_document() {
        let events = scan("<a x=\"1\"><b/>hi</a>").unwrap();
        assert_eq!(
            events,
            [
                "startDocument",
                "start a",
                "empty b",
                "chars \"hi\"",
                "end a",
                "endDocument"
            ]
        );
    }

    #[test]
    fn predefined_and_char_refs() {
        let events = scan("<a>&lt;&#65;&amp;</a>").unwrap();
        assert_eq!(
            events,
            [
                "startDocument",
                "start a",
                "chars \"<\"",
                "chars \"A\"",
                "chars \"&\"",
                "end a",
                "endDocument"
            ]
        );
    }

    #[test]
    fn internal_entity_expansion() {
        let events =
            scan("<!DOCTYPE a [<!ENTITY e \"x<b/>y\">]><a>&e;</a>").unwrap();
        assert_eq!(
            events,
            [
                "startDocument",
                "doctypeDecl",
                "startDTD",
                "internalEntityDecl",
                "endDTD",
                "start a",
                "start-ent e",
                "chars \"x\"",
                "empty b",
                "chars \"y\"",
                "end-ent e",
                "end a",
                "endDocument"
            ]
        );
    }

    #[test]
    fn mismatched_tags_are_fatal() {
        let err = scan("<a></b>").unwrap_err();
        assert!(matches!(err, XmlError::Fatal(d) if d.code == XmlErrorCode::TagNameMismatch));
    }

    #[test]
    fn cdata_brackets() {
        let events = scan("<a><![CDATA[x < y & z]]></a>").unwrap();
        assert_eq!(
            events,
            [
                "startDocument",
                "start a",
                "startCDATA",
                "chars \"x < y & z\"",
                "endCDATA",
                "end a",
                "endDocument"
            ]
        );
    }

    #[test]
    fn attribute_value_normalization_and_refs() {
        let mut scanner = DocumentScanner::new(XmlVersion::Xml10, shared_reporter());
        let mut captured = None;
        scanner
            .scan_document("<a t=\"x\ny&amp;&#66;\"/>", None, &mut |ev| {
                if let XmlEvent::EmptyElement { attributes, .. } = &ev {
                    captured = Some(attributes.get(0).unwrap().value.clone());
                }
                Ok(())
            })
            .unwrap();
        assert_eq!(captured.as_deref(), Some("x y&B"));
    }

    #[test]
    fn duplicate_attribute_rejected() {
        let err = scan("<a x=\"1\" x=\"2\"/>").unwrap_err();
        assert!(matches!(err, XmlError::Fatal(d) if d.code == XmlErrorCode::AttributeRedefined));
    }

    #[test]
    fn version_sniffing() {
        assert_eq!(
            DocumentScanner::sniff_version("<?xml version=\"1.1\"?><a/>"),
            XmlVersion::Xml11
        );
        assert_eq!(
            DocumentScanner::sniff_version("<a/>"),
            XmlVersion::Xml10
        );
    }

    #[test]
    fn undeclared_entity_reported_skipped() {
        let events = scan("<a>&nope;</a>").unwrap();
        assert!(events.contains(&"start-ent nope".to_string()));
        assert!(events.contains(&"end-ent nope".to_string()));
    }
}
