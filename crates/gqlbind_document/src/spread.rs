//! Fragment spread scanning.
//!
//! Spreads are found on the token stream, so the scan works on bare
//! selection bodies as well as on complete definitions, and never matches
//! text inside strings or comments.

use gqlbind_core::Span;
use gqlbind_syntax::lexer::tokenize;
use gqlbind_syntax::TokenKind;

/// A `...Name` occurrence in source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadRef {
    pub name: String,
    pub span: Span,
}

/// Returns every fragment spread in `text`, in source order, duplicates included.
pub fn scan_spreads(text: &str) -> Vec<SpreadRef> {
    let tokens = tokenize(text);
    tokens
        .windows(2)
        .filter(|pair| {
            pair[0].kind == TokenKind::Spread
                && pair[1].kind.is_name_like()
                && pair[1].kind != TokenKind::On
        })
        .map(|pair| SpreadRef {
            name: pair[1].span.slice(text).to_string(),
            span: pair[0].span.merge(pair[1].span),
        })
        .collect()
}

/// Returns the names of fragments spread in `text`, first occurrence only.
pub fn fragment_spreads(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for spread in scan_spreads(text) {
        if !names.contains(&spread.name) {
            names.push(spread.name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spreads_in_bare_body() {
        assert_eq!(fragment_spreads("...A\nname"), vec!["A"]);
        assert_eq!(fragment_spreads("id"), Vec::<String>::new());
    }

    #[test]
    fn test_spreads_first_occurrence_order() {
        let text = "query Q { a { ...B ...A } b { ...B } }";
        assert_eq!(fragment_spreads(text), vec!["B", "A"]);
        assert_eq!(scan_spreads(text).len(), 3);
    }

    #[test]
    fn test_inline_fragments_are_not_spreads() {
        let text = "node { ... on User { ...UserFields } ... @include(if: $x) { id } }";
        assert_eq!(fragment_spreads(text), vec!["UserFields"]);
    }

    #[test]
    fn test_strings_and_comments_are_ignored() {
        let text = "search(q: \"...Fake\") # ...AlsoFake\n...Real";
        assert_eq!(fragment_spreads(text), vec!["Real"]);
    }

    #[test]
    fn test_spread_span() {
        let text = "{ ...Frag }";
        let spreads = scan_spreads(text);
        assert_eq!(spreads[0].span.slice(text), "...Frag");
    }
}
