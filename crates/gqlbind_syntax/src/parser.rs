//! Recursive descent parser for GraphQL executable documents.
//!
//! Type-system definitions are reported as unsupported and skipped; the
//! parser keeps going so that every problem in a file is reported at once.

use crate::ast::*;
use crate::lexer::{block_string_value, string_value, Lexer};
use crate::token::{Token, TokenKind};
use gqlbind_core::{diagnostics::codes, DiagnosticBag, Span};

/// Parser for executable documents.
pub struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    prev_end: u32,
    diagnostics: DiagnosticBag,
}

/// Result of parsing.
pub struct ParseResult {
    pub document: Document,
    pub diagnostics: DiagnosticBag,
}

impl ParseResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics.has_errors()
    }
}

/// Parses a source string into a document.
pub fn parse(source: &str) -> ParseResult {
    let mut parser = Parser::new(source);
    let document = parser.parse_document();
    ParseResult {
        document,
        diagnostics: parser.diagnostics,
    }
}

impl<'a> Parser<'a> {
    /// Creates a new parser.
    pub fn new(source: &'a str) -> Self {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        Self {
            lexer,
            current,
            prev_end: 0,
            diagnostics: DiagnosticBag::new(),
        }
    }

    #[inline]
    fn at(&self) -> TokenKind {
        self.current.kind
    }

    #[inline]
    fn at_kind(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn advance(&mut self) {
        self.prev_end = self.current.span.end;
        self.current = self.lexer.next_token();
    }

    fn expect(&mut self, kind: TokenKind) -> bool {
        if self.at_kind(kind) {
            self.advance();
            true
        } else {
            self.error_expected(kind);
            false
        }
    }

    fn current_text(&self) -> &'a str {
        self.lexer.span_text(self.current.span)
    }

    /// Span from `start` to the end of the last consumed token.
    #[inline]
    fn span_from(&self, start: u32) -> Span {
        Span::new(start, self.prev_end.max(start))
    }

    /// Skips the current token if nothing was consumed since `before`.
    fn ensure_progress(&mut self, before: u32) {
        if self.current.span.start == before && !self.at_kind(TokenKind::Eof) {
            self.advance();
        }
    }

    fn error(&mut self, message: &str) {
        self.diagnostics.error(
            codes::INVALID_SYNTAX,
            message,
            self.current.span,
            message.to_string(),
        );
    }

    fn error_expected(&mut self, expected: TokenKind) {
        let (code, found) = if self.at_kind(TokenKind::Eof) {
            (codes::UNEXPECTED_EOF, "end of input".to_string())
        } else {
            (codes::UNEXPECTED_TOKEN, format!("`{}`", self.current_text()))
        };
        self.diagnostics.error(
            code,
            "unexpected token",
            self.current.span,
            format!("expected {expected}, found {found}"),
        );
    }

    /// Parses a document.
    pub fn parse_document(&mut self) -> Document {
        let start = self.current.span.start;
        let mut definitions = Vec::new();

        while !self.at_kind(TokenKind::Eof) {
            let before = self.current.span.start;
            if let Some(def) = self.parse_definition() {
                definitions.push(def);
            }
            self.ensure_progress(before);
        }

        Document {
            definitions,
            span: self.span_from(start),
        }
    }

    fn parse_definition(&mut self) -> Option<Definition> {
        match self.at() {
            TokenKind::Query
            | TokenKind::Mutation
            | TokenKind::Subscription
            | TokenKind::LBrace => Some(Definition::Operation(self.parse_operation())),
            TokenKind::Fragment => Some(Definition::Fragment(self.parse_fragment_definition())),
            kind if kind.is_type_system_keyword() => {
                self.skip_type_system_definition();
                None
            }
            TokenKind::StringLiteral | TokenKind::BlockStringLiteral => {
                // A description only ever precedes a type-system definition.
                self.advance();
                if self.at().is_type_system_keyword() {
                    self.skip_type_system_definition();
                } else {
                    self.error("expected definition");
                }
                None
            }
            _ => {
                self.error("expected definition");
                None
            }
        }
    }

    /// Reports and skips a type-system definition up to the next executable one.
    fn skip_type_system_definition(&mut self) {
        let start = self.current.span.start;
        let keyword = self.current_text();
        self.advance();

        let mut depth = 0usize;
        loop {
            match self.at() {
                TokenKind::Eof => break,
                TokenKind::LBrace | TokenKind::LParen => depth += 1,
                TokenKind::RBrace | TokenKind::RParen => depth = depth.saturating_sub(1),
                TokenKind::Query
                | TokenKind::Mutation
                | TokenKind::Subscription
                | TokenKind::Fragment
                    if depth == 0 =>
                {
                    break
                }
                kind if depth == 0 && kind.is_type_system_keyword() => break,
                _ => {}
            }
            self.advance();
        }

        self.diagnostics.error(
            codes::UNSUPPORTED_DEFINITION,
            "unsupported definition",
            self.span_from(start),
            format!("`{keyword}` definitions are not allowed in operation documents"),
        );
    }

    fn parse_name(&mut self) -> Name {
        let span = self.current.span;
        if self.at().is_name_like() {
            let value = self.current_text().to_string();
            self.advance();
            Name::new(value, span)
        } else {
            self.error_expected(TokenKind::Name);
            Name::new(String::new(), Span::empty(span.start))
        }
    }

    fn parse_operation(&mut self) -> OperationDefinition {
        let start = self.current.span.start;

        if self.at_kind(TokenKind::LBrace) {
            let selection_set = self.parse_selection_set();
            return OperationDefinition {
                operation: OperationType::Query,
                name: None,
                variables: Vec::new(),
                directives: Vec::new(),
                selection_set,
                shorthand: true,
                span: self.span_from(start),
            };
        }

        let operation = match self.at() {
            TokenKind::Mutation => OperationType::Mutation,
            TokenKind::Subscription => OperationType::Subscription,
            _ => OperationType::Query,
        };
        self.advance();

        let name = if self.at().is_name_like() {
            Some(self.parse_name())
        } else {
            None
        };

        let variables = if self.at_kind(TokenKind::LParen) {
            self.advance();
            let vars = self.parse_variable_definitions();
            self.expect(TokenKind::RParen);
            vars
        } else {
            Vec::new()
        };

        let directives = self.parse_directives();
        let selection_set = self.parse_selection_set();

        OperationDefinition {
            operation,
            name,
            variables,
            directives,
            selection_set,
            shorthand: false,
            span: self.span_from(start),
        }
    }

    fn parse_variable_definitions(&mut self) -> Vec<VariableDefinition> {
        let mut vars = Vec::new();
        while !self.at_kind(TokenKind::RParen) && !self.at_kind(TokenKind::Eof) {
            let before = self.current.span.start;
            vars.push(self.parse_variable_definition());
            self.ensure_progress(before);
        }
        vars
    }

    fn parse_variable_definition(&mut self) -> VariableDefinition {
        let start = self.current.span.start;
        self.expect(TokenKind::Dollar);
        let name = self.parse_name();
        self.expect(TokenKind::Colon);
        let ty = self.parse_type();

        let default_value = if self.at_kind(TokenKind::Eq) {
            self.advance();
            Some(self.parse_value())
        } else {
            None
        };

        let directives = self.parse_directives();

        VariableDefinition {
            name,
            ty,
            default_value,
            directives,
            span: self.span_from(start),
        }
    }

    fn parse_type(&mut self) -> Type {
        let start = self.current.span.start;

        let base = if self.at_kind(TokenKind::LBracket) {
            self.advance();
            let inner = self.parse_type();
            self.expect(TokenKind::RBracket);
            Type::List(Box::new(inner), self.span_from(start))
        } else {
            Type::Named(self.parse_name())
        };

        if self.at_kind(TokenKind::Bang) {
            self.advance();
            Type::NonNull(Box::new(base), self.span_from(start))
        } else {
            base
        }
    }

    fn parse_fragment_definition(&mut self) -> FragmentDefinition {
        let start = self.current.span.start;
        self.advance(); // fragment

        if self.at_kind(TokenKind::On) {
            self.error("fragment name cannot be `on`");
        }
        let name = self.parse_name();
        self.expect(TokenKind::On);
        let type_condition = self.parse_name();
        let directives = self.parse_directives();
        let selection_set = self.parse_selection_set();

        FragmentDefinition {
            name,
            type_condition,
            directives,
            selection_set,
            span: self.span_from(start),
        }
    }

    fn parse_selection_set(&mut self) -> SelectionSet {
        let start = self.current.span.start;
        if !self.expect(TokenKind::LBrace) {
            return SelectionSet {
                selections: Vec::new(),
                span: Span::empty(start),
            };
        }

        let mut selections = Vec::new();
        while !self.at_kind(TokenKind::RBrace) && !self.at_kind(TokenKind::Eof) {
            let before = self.current.span.start;
            if let Some(selection) = self.parse_selection() {
                selections.push(selection);
            }
            self.ensure_progress(before);
        }
        self.expect(TokenKind::RBrace);

        if selections.is_empty() {
            self.diagnostics.error(
                codes::INVALID_SYNTAX,
                "empty selection set",
                self.span_from(start),
                "a selection set must select at least one field",
            );
        }

        SelectionSet {
            selections,
            span: self.span_from(start),
        }
    }

    fn parse_selection(&mut self) -> Option<Selection> {
        let start = self.current.span.start;

        if self.at_kind(TokenKind::Spread) {
            self.advance();
            let selection = if self.at_kind(TokenKind::On) {
                self.advance();
                let type_condition = Some(self.parse_name());
                let directives = self.parse_directives();
                let selection_set = self.parse_selection_set();
                Selection::InlineFragment(InlineFragment {
                    type_condition,
                    directives,
                    selection_set,
                    span: self.span_from(start),
                })
            } else if self.at_kind(TokenKind::LBrace) || self.at_kind(TokenKind::At) {
                let directives = self.parse_directives();
                let selection_set = self.parse_selection_set();
                Selection::InlineFragment(InlineFragment {
                    type_condition: None,
                    directives,
                    selection_set,
                    span: self.span_from(start),
                })
            } else {
                let name = self.parse_name();
                let directives = self.parse_directives();
                Selection::FragmentSpread(FragmentSpread {
                    name,
                    directives,
                    span: self.span_from(start),
                })
            };
            return Some(selection);
        }

        if !self.at().is_name_like() {
            self.error("expected selection");
            return None;
        }

        Some(Selection::Field(self.parse_field()))
    }

    fn parse_field(&mut self) -> Field {
        let start = self.current.span.start;

        let first_name = self.parse_name();
        let (alias, name) = if self.at_kind(TokenKind::Colon) {
            self.advance();
            (Some(first_name), self.parse_name())
        } else {
            (None, first_name)
        };

        let arguments = self.parse_optional_arguments();
        let directives = self.parse_directives();

        let selection_set = if self.at_kind(TokenKind::LBrace) {
            Some(self.parse_selection_set())
        } else {
            None
        };

        Field {
            alias,
            name,
            arguments,
            directives,
            selection_set,
            span: self.span_from(start),
        }
    }

    fn parse_directives(&mut self) -> Vec<Directive> {
        let mut directives = Vec::new();
        while self.at_kind(TokenKind::At) {
            directives.push(self.parse_directive());
        }
        directives
    }

    fn parse_directive(&mut self) -> Directive {
        let start = self.current.span.start;
        self.advance(); // @

        let name = self.parse_name();
        let arguments = self.parse_optional_arguments();

        Directive {
            name,
            arguments,
            span: self.span_from(start),
        }
    }

    fn parse_optional_arguments(&mut self) -> Vec<Argument> {
        if !self.at_kind(TokenKind::LParen) {
            return Vec::new();
        }
        self.advance();

        let mut args = Vec::new();
        while !self.at_kind(TokenKind::RParen) && !self.at_kind(TokenKind::Eof) {
            let before = self.current.span.start;
            args.push(self.parse_argument());
            self.ensure_progress(before);
        }
        self.expect(TokenKind::RParen);
        args
    }

    fn parse_argument(&mut self) -> Argument {
        let start = self.current.span.start;
        let name = self.parse_name();
        self.expect(TokenKind::Colon);
        let value = self.parse_value();
        Argument {
            name,
            value,
            span: self.span_from(start),
        }
    }

    fn parse_value(&mut self) -> Value {
        let start = self.current.span.start;

        match self.at() {
            TokenKind::Dollar => {
                self.advance();
                Value::Variable(self.parse_name())
            }
            TokenKind::IntLiteral => {
                let text = self.current_text();
                let value = match text.parse::<i64>() {
                    Ok(value) => value,
                    Err(_) => {
                        self.error("integer literal out of range");
                        0
                    }
                };
                self.advance();
                Value::Int(value, self.span_from(start))
            }
            TokenKind::FloatLiteral => {
                let text = self.current_text();
                let value = match text.parse::<f64>() {
                    Ok(value) if value.is_finite() => value,
                    _ => {
                        self.error("float literal out of range");
                        0.0
                    }
                };
                self.advance();
                Value::Float(value, self.span_from(start))
            }
            TokenKind::StringLiteral | TokenKind::BlockStringLiteral => {
                let text = self.current_text();
                let decoded = if self.at_kind(TokenKind::BlockStringLiteral) {
                    block_string_value(text)
                } else {
                    string_value(text)
                };
                let value = decoded.unwrap_or_else(|| {
                    self.error("invalid escape sequence in string");
                    String::new()
                });
                self.advance();
                Value::String(value, self.span_from(start))
            }
            TokenKind::True => {
                self.advance();
                Value::Boolean(true, self.span_from(start))
            }
            TokenKind::False => {
                self.advance();
                Value::Boolean(false, self.span_from(start))
            }
            TokenKind::Null => {
                self.advance();
                Value::Null(self.span_from(start))
            }
            TokenKind::LBracket => {
                self.advance();
                let mut values = Vec::new();
                while !self.at_kind(TokenKind::RBracket) && !self.at_kind(TokenKind::Eof) {
                    let before = self.current.span.start;
                    values.push(self.parse_value());
                    self.ensure_progress(before);
                }
                self.expect(TokenKind::RBracket);
                Value::List(values, self.span_from(start))
            }
            TokenKind::LBrace => {
                self.advance();
                let mut fields = Vec::new();
                while !self.at_kind(TokenKind::RBrace) && !self.at_kind(TokenKind::Eof) {
                    let before = self.current.span.start;
                    let name = self.parse_name();
                    self.expect(TokenKind::Colon);
                    let value = self.parse_value();
                    fields.push((name, value));
                    self.ensure_progress(before);
                }
                self.expect(TokenKind::RBrace);
                Value::Object(fields, self.span_from(start))
            }
            kind if kind.is_name_like() => Value::Enum(self.parse_name()),
            _ => {
                self.error("expected value");
                Value::Null(Span::empty(start))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Document {
        let result = parse(source);
        assert!(
            !result.has_errors(),
            "unexpected diagnostics: {:?}",
            result.diagnostics.iter().map(ToString::to_string).collect::<Vec<_>>()
        );
        result.document
    }

    #[test]
    fn test_parse_named_query() {
        let doc = parse_ok("query GetUser($id: ID!) { user(id: $id) { id name } }");
        let op = doc.operation("GetUser").expect("operation");
        assert_eq!(op.operation, OperationType::Query);
        assert_eq!(op.variables.len(), 1);
        assert_eq!(op.variables[0].ty.to_string(), "ID!");
        assert_eq!(op.selection_set.selections.len(), 1);
    }

    #[test]
    fn test_parse_shorthand_query() {
        let doc = parse_ok("{ me { id } }");
        let op = doc.operations().next().expect("operation");
        assert!(op.shorthand);
        assert!(op.name.is_none());
    }

    #[test]
    fn test_parse_fragment_and_spreads() {
        let doc = parse_ok(
            r#"
            query Feed {
              posts { ...PostFields author { ...UserFields } }
            }
            fragment PostFields on Post { id title ...UserFields }
            fragment UserFields on User { id }
            "#,
        );
        assert_eq!(doc.fragments().count(), 2);
        let op = doc.operation("Feed").expect("operation");
        assert_eq!(
            op.selection_set.fragment_spreads(),
            vec!["PostFields", "UserFields"]
        );
        let frag = doc.fragment("PostFields").expect("fragment");
        assert_eq!(frag.type_condition.value, "Post");
    }

    #[test]
    fn test_parse_inline_fragment_and_directives() {
        let doc = parse_ok(
            "query Q($skip: Boolean = false) { node { ... on User @include(if: true) { name } ... @skip(if: $skip) { id } } }",
        );
        let op = doc.operation("Q").expect("operation");
        assert!(op.variables[0].default_value.is_some());
        let Selection::Field(node) = &op.selection_set.selections[0] else {
            panic!("expected field");
        };
        let inner = &node.selection_set.as_ref().expect("selection set").selections;
        assert!(matches!(&inner[0], Selection::InlineFragment(f) if f.type_condition.is_some()));
        assert!(matches!(&inner[1], Selection::InlineFragment(f) if f.type_condition.is_none()));
        assert!(inner[0].directives()[0].is("include"));
    }

    #[test]
    fn test_parse_alias_and_client_directive() {
        let doc = parse_ok("query Q { me { handle: name isSelected @client } }");
        let op = doc.operation("Q").expect("operation");
        let Selection::Field(me) = &op.selection_set.selections[0] else {
            panic!("expected field");
        };
        let fields = &me.selection_set.as_ref().expect("selection set").selections;
        let Selection::Field(handle) = &fields[0] else {
            panic!("expected field");
        };
        assert_eq!(handle.response_key(), "handle");
        assert_eq!(handle.name.value, "name");
        let Selection::Field(selected) = &fields[1] else {
            panic!("expected field");
        };
        assert!(selected.has_directive("client"));
    }

    #[test]
    fn test_parse_values() {
        let doc = parse_ok(
            r#"query Q { search(first: 10, ratio: 0.5, text: "a\"b", tags: [A, B], filter: { active: true, owner: null }) { id } }"#,
        );
        let op = doc.operation("Q").expect("operation");
        let Selection::Field(search) = &op.selection_set.selections[0] else {
            panic!("expected field");
        };
        assert_eq!(search.arguments.len(), 5);
        assert!(matches!(search.arguments[0].value, Value::Int(10, _)));
        assert!(matches!(&search.arguments[2].value, Value::String(s, _) if s == "a\"b"));
        assert!(matches!(&search.arguments[3].value, Value::List(items, _) if items.len() == 2));
        assert!(matches!(&search.arguments[4].value, Value::Object(fields, _) if fields.len() == 2));
    }

    #[test]
    fn test_keywords_are_valid_field_names() {
        let doc = parse_ok("query Q { type query fragment: on }");
        let op = doc.operation("Q").expect("operation");
        assert_eq!(op.selection_set.selections.len(), 3);
    }

    #[test]
    fn test_rejects_type_system_definitions() {
        let result = parse("type User { id: ID }\nquery Q { me { id } }");
        assert!(result.has_errors());
        let found: Vec<_> = result.diagnostics.iter().map(|d| d.code.as_str()).collect();
        assert_eq!(found, vec![codes::UNSUPPORTED_DEFINITION]);
        assert!(result.document.operation("Q").is_some());
    }

    #[test]
    fn test_reports_missing_brace() {
        let result = parse("query Q { me { id }");
        assert!(result.has_errors());
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.code == codes::UNEXPECTED_EOF));
    }

    #[test]
    fn test_recovers_from_garbage() {
        let result = parse("query Q { ) id } fragment F on T { id }");
        assert!(result.has_errors());
        assert!(result.document.fragment("F").is_some());
    }

    #[test]
    fn test_definition_spans_cover_source_text() {
        let source = "fragment A on User { id }\n\nquery Q { ...A }";
        let doc = parse_ok(source);
        let spans: Vec<_> = doc.definitions.iter().map(|d| d.span().slice(source)).collect();
        assert_eq!(spans, vec!["fragment A on User { id }", "query Q { ...A }"]);
    }
}
