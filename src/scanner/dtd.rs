//! Internal-subset scanner: markup declarations in, DTD declaration
//! events out, entity tables filled as a side effect.
//!
//! Parameter entities are expanded between declarations only; a
//! reference inside a markup declaration is a well-formedness violation
//! in the internal subset and is reported as such.

use std::rc::Rc;

use super::{Cursor, EntityDef, EntityTables, EventSink, predefined_entity};
use crate::{
    chvalid::{self, XmlVersion},
    error::{ParseDiagnostic, SharedErrorReporter, XmlError, XmlErrorCode, XmlSeverity},
    event::{AttType, ContentSpec, DefaultDecl, ResourceId, XmlEvent},
};

const MAX_PE_DEPTH: usize = 16;

pub struct DtdScanner {
    version: XmlVersion,
    reporter: SharedErrorReporter,
    system_id: Option<Rc<str>>,
    pe_depth: usize,
}

impl DtdScanner {
    pub fn new(
        version: XmlVersion,
        reporter: SharedErrorReporter,
        system_id: Option<Rc<str>>,
    ) -> Self {
        DtdScanner {
            version,
            reporter,
            system_id,
            pe_depth: 0,
        }
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

    fn error(&self, cursor: &Cursor<'_>, code: XmlErrorCode, message: String) {
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

    /// Scan the text between `[` and `]` of a DOCTYPE declaration.
    pub fn scan_internal_subset(
        &mut self,
        subset: &str,
        entities: &mut EntityTables,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        let mut cursor = Cursor::new(subset);
        self.scan_decls(&mut cursor, entities, sink)
    }

    fn scan_decls(
        &mut self,
        cursor: &mut Cursor<'_>,
        entities: &mut EntityTables,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        loop {
            cursor.skip_ws();
            if cursor.is_empty() {
                return Ok(());
            }
            if cursor.starts_with("%") {
                self.scan_pe_reference(cursor, entities, sink)?;
            } else if cursor.starts_with("<!ELEMENT") {
                self.scan_element_decl(cursor, sink)?;
            } else if cursor.starts_with("<!ATTLIST") {
                self.scan_attlist_decl(cursor, sink)?;
            } else if cursor.starts_with("<!ENTITY") {
                self.scan_entity_decl(cursor, entities, sink)?;
            } else if cursor.starts_with("<!NOTATION") {
                self.scan_notation_decl(cursor, sink)?;
            } else if cursor.starts_with("<!--") {
                self.scan_comment(cursor, sink)?;
            } else if cursor.starts_with("<?") {
                self.scan_pi(cursor, sink)?;
            } else {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::DoctypeNotFinished,
                    "unexpected content in the internal subset".into(),
                ));
            }
        }
    }

    fn scan_pe_reference(
        &mut self,
        cursor: &mut Cursor<'_>,
        entities: &mut EntityTables,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.bump(); // '%'
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "expected a parameter entity name after '%'".into(),
            ));
        };
        let name = name.to_string();
        if cursor.peek() != Some(';') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::EntityNotFinished,
                format!("parameter entity reference \"%{name};\" is missing ';'"),
            ));
        }
        cursor.bump();
        if self.pe_depth >= MAX_PE_DEPTH {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::EntityLoop,
                format!("parameter entity \"%{name};\" expands too deeply"),
            ));
        }
        match entities.parameter.get(&name).cloned() {
            Some(EntityDef::Internal(replacement)) => {
                self.pe_depth += 1;
                let mut nested = Cursor::new(&replacement);
                let result = self.scan_decls(&mut nested, entities, sink);
                self.pe_depth -= 1;
                result
            }
            Some(_) => {
                // External parameter entities are not fetched.
                self.error(
                    cursor,
                    XmlErrorCode::UndeclaredEntity,
                    format!("external parameter entity \"%{name};\" was not loaded"),
                );
                Ok(())
            }
            None => {
                self.error(
                    cursor,
                    XmlErrorCode::UndeclaredEntity,
                    format!("parameter entity \"%{name};\" was not declared"),
                );
                Ok(())
            }
        }
    }

    fn require_ws(&self, cursor: &mut Cursor<'_>, context: &str) -> Result<(), XmlError> {
        if !cursor.skip_ws() {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::SpaceRequired,
                format!("white space required {context}"),
            ));
        }
        Ok(())
    }

    fn require_gt(&self, cursor: &mut Cursor<'_>, what: &str) -> Result<(), XmlError> {
        cursor.skip_ws();
        if cursor.peek() != Some('>') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::GtRequired,
                format!("expected '>' to close the {what} declaration"),
            ));
        }
        cursor.bump();
        Ok(())
    }

    fn scan_quoted(&self, cursor: &mut Cursor<'_>) -> Result<String, XmlError> {
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

    /// EntityValue / AttValue literal inside a declaration: character
    /// and predefined references expand, a parameter-entity reference
    /// is reported (internal subset restriction) and kept literal.
    fn scan_decl_literal(&self, cursor: &mut Cursor<'_>) -> Result<String, XmlError> {
        let raw = self.scan_quoted(cursor)?;
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw.as_str();
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            rest = &rest[amp..];
            let Some(semi) = rest.find(';') else {
                out.push_str(rest);
                rest = "";
                break;
            };
            let entity = &rest[1..semi];
            if let Some(code) = entity.strip_prefix('#') {
                let parsed = if let Some(hex) = code.strip_prefix('x') {
                    u32::from_str_radix(hex, 16).ok()
                } else {
                    code.parse::<u32>().ok()
                };
                match parsed
                    .and_then(char::from_u32)
                    .filter(|&c| chvalid::is_char(c, self.version))
                {
                    Some(c) => out.push(c),
                    None => {
                        return Err(self.fatal(
                            cursor,
                            XmlErrorCode::InvalidCharRef,
                            format!("malformed character reference \"&{entity};\""),
                        ));
                    }
                }
            } else if let Some(text) = predefined_entity(entity) {
                out.push_str(text);
            } else {
                // Bypassed general entity: kept literal.
                out.push_str(&rest[..semi + 1]);
            }
            rest = &rest[semi + 1..];
        }
        out.push_str(rest);
        let has_pe_ref = out.match_indices('%').any(|(i, _)| {
            let tail = &out[i + 1..];
            tail.chars().next().is_some_and(chvalid::is_name_start_char) && tail.contains(';')
        });
        if has_pe_ref {
            self.error(
                cursor,
                XmlErrorCode::PERefInInternalSubset,
                "parameter-entity references are not allowed inside declarations in the internal subset"
                    .into(),
            );
        }
        Ok(out)
    }

    fn scan_external_id(
        &self,
        cursor: &mut Cursor<'_>,
        public_alone: bool,
    ) -> Result<Option<ResourceId>, XmlError> {
        if cursor.starts_with("SYSTEM") {
            cursor.advance(6);
            self.require_ws(cursor, "after SYSTEM")?;
            let system = self.scan_quoted(cursor)?;
            Ok(Some(ResourceId {
                public_id: None,
                system_id: Some(Rc::from(system.as_str())),
                base_system_id: self.system_id.clone(),
                expanded_system_id: Some(Rc::from(system.as_str())),
            }))
        } else if cursor.starts_with("PUBLIC") {
            cursor.advance(6);
            self.require_ws(cursor, "after PUBLIC")?;
            let public = self.scan_quoted(cursor)?;
            if let Some(bad) = public.chars().find(|&c| !chvalid::is_pubid_char(c)) {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::InvalidChar,
                    format!("invalid character '{bad}' in public identifier"),
                ));
            }
            let had_space = cursor.skip_ws();
            if matches!(cursor.peek(), Some('"' | '\'')) && had_space {
                let system = self.scan_quoted(cursor)?;
                Ok(Some(ResourceId {
                    public_id: Some(Rc::from(public.as_str())),
                    system_id: Some(Rc::from(system.as_str())),
                    base_system_id: self.system_id.clone(),
                    expanded_system_id: Some(Rc::from(system.as_str())),
                }))
            } else if public_alone {
                Ok(Some(ResourceId {
                    public_id: Some(Rc::from(public.as_str())),
                    system_id: None,
                    base_system_id: self.system_id.clone(),
                    expanded_system_id: None,
                }))
            } else {
                Err(self.fatal(
                    cursor,
                    XmlErrorCode::LiteralNotFinished,
                    "PUBLIC requires a system literal here".into(),
                ))
            }
        } else {
            Ok(None)
        }
    }

    fn scan_element_decl(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance("<!ELEMENT".len());
        self.require_ws(cursor, "after ELEMENT")?;
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "element declaration requires a name".into(),
            ));
        };
        let name = name.to_string();
        self.require_ws(cursor, "after the element name")?;
        let (spec, model) = if cursor.starts_with("EMPTY") {
            cursor.advance(5);
            (ContentSpec::Empty, "EMPTY".to_string())
        } else if cursor.starts_with("ANY") {
            cursor.advance(3);
            (ContentSpec::Any, "ANY".to_string())
        } else if cursor.peek() == Some('(') {
            let model = self.scan_content_model(cursor)?;
            let spec = if model.contains("#PCDATA") {
                ContentSpec::Mixed
            } else {
                ContentSpec::Children
            };
            (spec, model)
        } else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::ElementDeclNotFinished,
                format!("element \"{name}\" has no content specification"),
            ));
        };
        self.require_gt(cursor, "element")?;
        sink(XmlEvent::ElementDecl { name, spec, model })
    }

    /// Capture a parenthesized content model literally, including the
    /// trailing occurrence indicator.
    fn scan_content_model(&self, cursor: &mut Cursor<'_>) -> Result<String, XmlError> {
        let mut model = String::new();
        let mut depth = 0usize;
        loop {
            let Some(c) = cursor.peek() else {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::ElementDeclNotFinished,
                    "unterminated content model".into(),
                ));
            };
            match c {
                '(' => depth += 1,
                ')' => depth -= 1,
                '>' => {
                    return Err(self.fatal(
                        cursor,
                        XmlErrorCode::ElementDeclNotFinished,
                        "unterminated content model".into(),
                    ));
                }
                _ => {}
            }
            model.push(c);
            cursor.bump();
            if depth == 0 {
                if matches!(cursor.peek(), Some('?' | '*' | '+')) {
                    model.push(cursor.bump().expect("peeked"));
                }
                return Ok(model);
            }
        }
    }

    fn scan_attlist_decl(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance("<!ATTLIST".len());
        self.require_ws(cursor, "after ATTLIST")?;
        let Some(element) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "attribute-list declaration requires an element name".into(),
            ));
        };
        let element = element.to_string();
        loop {
            let had_space = cursor.skip_ws();
            if cursor.peek() == Some('>') {
                cursor.bump();
                return Ok(());
            }
            if !had_space {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::SpaceRequired,
                    "white space required before an attribute definition".into(),
                ));
            }
            let Some(attribute) = cursor.scan_name() else {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::AttlistDeclNotFinished,
                    format!("malformed attribute definition for \"{element}\""),
                ));
            };
            let attribute = attribute.to_string();
            self.require_ws(cursor, "after the attribute name")?;
            let att_type = self.scan_att_type(cursor)?;
            self.require_ws(cursor, "after the attribute type")?;
            let default = self.scan_default_decl(cursor)?;
            sink(XmlEvent::AttributeDecl {
                element: element.clone(),
                attribute,
                att_type,
                default,
            })?;
        }
    }

    fn scan_att_type(&self, cursor: &mut Cursor<'_>) -> Result<AttType, XmlError> {
        // Longest keywords first; IDREFS must win over IDREF over ID.
        const KEYWORDS: [(&str, AttType); 7] = [
            ("CDATA", AttType::Cdata),
            ("IDREFS", AttType::Idrefs),
            ("IDREF", AttType::Idref),
            ("ID", AttType::Id),
            ("ENTITIES", AttType::Entities),
            ("ENTITY", AttType::Entity),
            ("NMTOKENS", AttType::Nmtokens),
        ];
        for (keyword, ty) in KEYWORDS {
            if cursor.starts_with(keyword) {
                cursor.advance(keyword.len());
                return Ok(ty);
            }
        }
        if cursor.starts_with("NMTOKEN") {
            cursor.advance(7);
            return Ok(AttType::Nmtoken);
        }
        if cursor.starts_with("NOTATION") {
            cursor.advance(8);
            self.require_ws(cursor, "after NOTATION")?;
            let names = self.scan_name_group(cursor)?;
            return Ok(AttType::Notation(names));
        }
        if cursor.peek() == Some('(') {
            let tokens = self.scan_name_group(cursor)?;
            return Ok(AttType::Enumeration(tokens));
        }
        Err(self.fatal(
            cursor,
            XmlErrorCode::AttlistDeclNotFinished,
            "unrecognized attribute type".into(),
        ))
    }

    fn scan_name_group(&self, cursor: &mut Cursor<'_>) -> Result<Vec<String>, XmlError> {
        if cursor.peek() != Some('(') {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::AttlistDeclNotFinished,
                "expected '(' to open the token group".into(),
            ));
        }
        cursor.bump();
        let mut names = vec![];
        loop {
            cursor.skip_ws();
            let start = cursor.pos;
            while cursor
                .peek()
                .is_some_and(|c| chvalid::is_name_char(c))
            {
                cursor.bump();
            }
            if cursor.pos == start {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::NameRequired,
                    "expected a token in the group".into(),
                ));
            }
            names.push(cursor.text[start..cursor.pos].to_string());
            cursor.skip_ws();
            match cursor.peek() {
                Some('|') => {
                    cursor.bump();
                }
                Some(')') => {
                    cursor.bump();
                    return Ok(names);
                }
                _ => {
                    return Err(self.fatal(
                        cursor,
                        XmlErrorCode::AttlistDeclNotFinished,
                        "expected '|' or ')' in the token group".into(),
                    ));
                }
            }
        }
    }

    fn scan_default_decl(&self, cursor: &mut Cursor<'_>) -> Result<DefaultDecl, XmlError> {
        if cursor.starts_with("#REQUIRED") {
            cursor.advance(9);
            Ok(DefaultDecl::Required)
        } else if cursor.starts_with("#IMPLIED") {
            cursor.advance(8);
            Ok(DefaultDecl::Implied)
        } else if cursor.starts_with("#FIXED") {
            cursor.advance(6);
            self.require_ws(cursor, "after #FIXED")?;
            Ok(DefaultDecl::Fixed(self.scan_decl_literal(cursor)?))
        } else {
            Ok(DefaultDecl::Value(self.scan_decl_literal(cursor)?))
        }
    }

    fn scan_entity_decl(
        &mut self,
        cursor: &mut Cursor<'_>,
        entities: &mut EntityTables,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance("<!ENTITY".len());
        self.require_ws(cursor, "after ENTITY")?;
        let parameter = if cursor.peek() == Some('%') {
            cursor.bump();
            self.require_ws(cursor, "after '%'")?;
            true
        } else {
            false
        };
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "entity declaration requires a name".into(),
            ));
        };
        let name = name.to_string();
        self.require_ws(cursor, "after the entity name")?;

        if matches!(cursor.peek(), Some('"' | '\'')) {
            let value = self.scan_decl_literal(cursor)?;
            self.require_gt(cursor, "entity")?;
            let reported = if parameter {
                format!("%{name}")
            } else {
                name.clone()
            };
            if parameter {
                entities.declare_parameter(&name, EntityDef::Internal(value.clone()));
            } else {
                entities.declare_general(&name, EntityDef::Internal(value.clone()));
            }
            return sink(XmlEvent::InternalEntityDecl {
                name: reported,
                value,
            });
        }

        let Some(identifier) = self.scan_external_id(cursor, false)? else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::EntityDeclNotFinished,
                format!("entity \"{name}\" has neither a value nor an external identifier"),
            ));
        };
        let mut notation = None;
        let had_space = cursor.skip_ws();
        if cursor.starts_with("NDATA") {
            if parameter {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::EntityDeclNotFinished,
                    "parameter entities cannot be unparsed".into(),
                ));
            }
            if !had_space {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::SpaceRequired,
                    "white space required before NDATA".into(),
                ));
            }
            cursor.advance(5);
            self.require_ws(cursor, "after NDATA")?;
            let Some(n) = cursor.scan_name() else {
                return Err(self.fatal(
                    cursor,
                    XmlErrorCode::NameRequired,
                    "NDATA requires a notation name".into(),
                ));
            };
            notation = Some(n.to_string());
        }
        self.require_gt(cursor, "entity")?;

        let public_id = identifier.public_id.as_deref().map(str::to_string);
        let system_id = identifier.system_id.as_deref().map(str::to_string);
        if let Some(notation) = notation {
            entities.declare_general(
                &name,
                EntityDef::Unparsed {
                    public_id,
                    system_id,
                    notation: notation.clone(),
                },
            );
            sink(XmlEvent::UnparsedEntityDecl {
                name,
                identifier,
                notation,
            })
        } else {
            let def = EntityDef::External {
                public_id,
                system_id,
            };
            let reported = if parameter {
                entities.declare_parameter(&name, def);
                format!("%{name}")
            } else {
                entities.declare_general(&name, def);
                name
            };
            sink(XmlEvent::ExternalEntityDecl {
                name: reported,
                identifier,
            })
        }
    }

    fn scan_notation_decl(
        &mut self,
        cursor: &mut Cursor<'_>,
        sink: &mut EventSink<'_>,
    ) -> Result<(), XmlError> {
        cursor.advance("<!NOTATION".len());
        self.require_ws(cursor, "after NOTATION")?;
        let Some(name) = cursor.scan_name() else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NameRequired,
                "notation declaration requires a name".into(),
            ));
        };
        let name = name.to_string();
        self.require_ws(cursor, "after the notation name")?;
        let Some(identifier) = self.scan_external_id(cursor, true)? else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::NotationDeclNotFinished,
                format!("notation \"{name}\" requires an external identifier"),
            ));
        };
        self.require_gt(cursor, "notation")?;
        sink(XmlEvent::NotationDecl { name, identifier })
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
                "unterminated comment in the internal subset".into(),
            ));
        };
        let text = cursor.rest()[..end].to_string();
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
        let target = target.to_string();
        cursor.skip_ws();
        let Some(end) = cursor.find("?>") else {
            return Err(self.fatal(
                cursor,
                XmlErrorCode::PINotFinished,
                format!("unterminated processing instruction \"{target}\""),
            ));
        };
        let data = cursor.rest()[..end].to_string();
        cursor.advance(end + 2);
        sink(XmlEvent::ProcessingInstruction {
            target,
            data: if data.is_empty() { None } else { Some(data) },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::shared_reporter;

    fn scan_subset(subset: &str) -> (Vec<XmlEvent>, EntityTables) {
        let mut scanner = DtdScanner::new(XmlVersion::Xml10, shared_reporter(), None);
        let mut entities = EntityTables::default();
        let mut events = vec![];
        scanner
            .scan_internal_subset(subset, &mut entities, &mut |ev| {
                events.push(ev);
                Ok(())
            })
            .unwrap();
        (events, entities)
    }

    #[test]
    fn element_and_attlist_decls() {
        let (events, _) = scan_subset(
            "<!ELEMENT root (a, b*)>\n<!ATTLIST root id ID #IMPLIED kind (x|y) \"x\">",
        );
        assert!(matches!(
            &events[0],
            XmlEvent::ElementDecl { name, spec: ContentSpec::Children, model }
                if name == "root" && model == "(a, b*)"
        ));
        assert!(matches!(
            &events[1],
            XmlEvent::AttributeDecl { attribute, att_type: AttType::Id, default: DefaultDecl::Implied, .. }
                if attribute == "id"
        ));
        assert!(matches!(
            &events[2],
            XmlEvent::AttributeDecl { att_type: AttType::Enumeration(tokens), default: DefaultDecl::Value(v), .. }
                if tokens == &["x", "y"] && v == "x"
        ));
    }

    #[test]
    fn mixed_content_classified() {
        let (events, _) = scan_subset("<!ELEMENT p (#PCDATA | em)*>");
        assert!(matches!(
            &events[0],
            XmlEvent::ElementDecl { spec: ContentSpec::Mixed, model, .. }
                if model == "(#PCDATA | em)*"
        ));
    }

    #[test]
    fn entity_declarations_fill_tables() {
        let (events, entities) = scan_subset(
            "<!ENTITY e \"text\">\n<!ENTITY ext SYSTEM \"chap.xml\">\n<!ENTITY pic SYSTEM \"p.gif\" NDATA gif>\n<!NOTATION gif PUBLIC \"GIF\">",
        );
        assert_eq!(events.len(), 4);
        assert!(matches!(
            entities.general.get("e"),
            Some(EntityDef::Internal(v)) if v == "text"
        ));
        assert!(matches!(
            entities.general.get("ext"),
            Some(EntityDef::External { system_id: Some(s), .. }) if s == "chap.xml"
        ));
        assert!(matches!(
            entities.general.get("pic"),
            Some(EntityDef::Unparsed { notation, .. }) if notation == "gif"
        ));
        assert!(matches!(
            &events[3],
            XmlEvent::NotationDecl { name, .. } if name == "gif"
        ));
    }

    #[test]
    fn parameter_entity_expands_between_decls() {
        let (events, entities) = scan_subset(
            "<!ENTITY % decls '<!ELEMENT a EMPTY>'>\n%decls;",
        );
        assert!(entities.parameter.contains_key("decls"));
        assert!(matches!(
            &events[1],
            XmlEvent::ElementDecl { name, spec: ContentSpec::Empty, .. } if name == "a"
        ));
    }

    #[test]
    fn char_refs_expand_in_entity_values() {
        let (_, entities) = scan_subset("<!ENTITY e \"a&#65;b&lt;\">");
        assert!(matches!(
            entities.general.get("e"),
            Some(EntityDef::Internal(v)) if v == "aAb<"
        ));
    }

    #[test]
    fn first_declaration_wins() {
        let (_, entities) = scan_subset("<!ENTITY e \"one\"><!ENTITY e \"two\">");
        assert!(matches!(
            entities.general.get("e"),
            Some(EntityDef::Internal(v)) if v == "one"
        ));
    }
}
