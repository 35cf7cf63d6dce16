//! Structural mark scanning.
//!
//! The chunker only needs a handful of marks to make its decisions: the
//! triple-backtick fence delimiter and the brackets/parentheses of inline
//! links and images. This module lexes exactly those with `logos` and treats
//! everything else as opaque text.
//!
//! Fence counting follows the usual non-overlapping left-to-right rule, so
//! four backticks count as one delimiter and six as two.

use logos::Logos;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    #[token("```")]
    Fence,

    // Shorter backtick runs get their own tokens so a partial fence never
    // needs lexer fallback.
    #[token("``")]
    DoubleBacktick,

    #[token("`")]
    Backtick,

    #[token("[")]
    OpenBracket,

    #[token("]")]
    CloseBracket,

    #[token("(")]
    OpenParen,

    #[token(")")]
    CloseParen,

    #[regex(r"[^`\[\]()]+")]
    Text,
}

/// Positions and counts of the structural marks in a piece of text.
///
/// All positions are byte offsets of the (single-byte) mark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Marks {
    /// Number of triple-backtick delimiters.
    pub fences: usize,
    /// Offset of the last `[`.
    pub last_open_bracket: Option<usize>,
    /// Offset of the last `]`.
    pub last_close_bracket: Option<usize>,
    /// Offset of the last `(`.
    pub last_open_paren: Option<usize>,
    /// Offset of the last `)`.
    pub last_close_paren: Option<usize>,
}

impl Marks {
    /// Scan `text` in a single pass.
    pub fn scan(text: &str) -> Self {
        let mut marks = Marks::default();
        let mut lexer = Mark::lexer(text);

        while let Some(result) = lexer.next() {
            let start = lexer.span().start;
            match result {
                Ok(Mark::Fence) => marks.fences += 1,
                Ok(Mark::OpenBracket) => marks.last_open_bracket = Some(start),
                Ok(Mark::CloseBracket) => marks.last_close_bracket = Some(start),
                Ok(Mark::OpenParen) => marks.last_open_paren = Some(start),
                Ok(Mark::CloseParen) => marks.last_close_paren = Some(start),
                Ok(Mark::DoubleBacktick | Mark::Backtick | Mark::Text) | Err(()) => {}
            }
        }

        marks
    }
}

/// Number of triple-backtick delimiters in `text`.
#[inline]
pub fn fence_count(text: &str) -> usize {
    Marks::scan(text).fences
}

/// Whether `text` contains an even number of fence delimiters.
///
/// This is the single completeness rule shared by the chunker and the
/// converters: a block with an odd count still has a code block open.
#[inline]
pub fn fences_balanced(text: &str) -> bool {
    fence_count(text) % 2 == 0
}

/// Returns the prefix of `text` that is safe to display.
///
/// Cuts before the last `[` when its link or image is still being typed:
/// - no `]` after it, or the `]` is the final character (destination not
///   started yet);
/// - `](` was seen but the destination has no closing `)` yet.
///
/// Otherwise the whole text is returned.
pub fn withhold_incomplete_link(text: &str) -> &str {
    let marks = Marks::scan(text);
    let Some(open) = marks.last_open_bracket else {
        return text;
    };

    let close = match marks.last_close_bracket {
        Some(close) if close > open && close + 1 != text.len() => close,
        _ => return &text[..open],
    };

    if let Some(paren) = marks.last_open_paren {
        let destination_open = paren == close + 1;
        let destination_closed = marks.last_close_paren.is_some_and(|p| p > paren);
        if destination_open && !destination_closed {
            return &text[..open];
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("", 0; "empty")]
    #[test_case("plain text", 0; "no fences")]
    #[test_case("```rust\nfn main() {}\n```", 2; "closed block")]
    #[test_case("```\nopen", 1; "open block")]
    #[test_case("````", 1; "four backticks")]
    #[test_case("`````", 1; "five backticks")]
    #[test_case("``````", 2; "six backticks")]
    #[test_case("inline `code` and ``more``", 0; "inline code")]
    fn test_fence_count(input: &str, expected: usize) {
        assert_eq!(fence_count(input), expected);
    }

    #[test]
    fn test_fences_balanced() {
        assert!(fences_balanced("no code"));
        assert!(fences_balanced("```\na\n```"));
        assert!(!fences_balanced("```\na"));
    }

    #[test]
    fn test_marks_positions() {
        let marks = Marks::scan("[a](b) [c]");
        assert_eq!(marks.last_open_bracket, Some(7));
        assert_eq!(marks.last_close_bracket, Some(9));
        assert_eq!(marks.last_open_paren, Some(3));
        assert_eq!(marks.last_close_paren, Some(5));
    }

    #[test]
    fn test_marks_multibyte_text() {
        let marks = Marks::scan("héllo [wörld");
        assert_eq!(marks.last_open_bracket, Some(7));
        assert_eq!(marks.fences, 0);
    }

    #[test_case("see [label", "see "; "bracket not closed")]
    #[test_case("see [label]", "see "; "destination not started")]
    #[test_case("see [label](http://ex", "see "; "destination open")]
    #[test_case("see ![alt](img.png", "see !"; "image destination open")]
    #[test_case("see [label](url)", "see [label](url)"; "link complete")]
    #[test_case("see [label] here", "see [label] here"; "reference style text")]
    #[test_case("[a](b) and [c", "[a](b) and "; "second link open")]
    #[test_case("no links (at all", "no links (at all"; "paren without link")]
    #[test_case("[a](b) then (x", "[a](b) then (x"; "paren not after bracket")]
    fn test_withhold_incomplete_link(input: &str, expected: &str) {
        assert_eq!(withhold_incomplete_link(input), expected);
    }
}
