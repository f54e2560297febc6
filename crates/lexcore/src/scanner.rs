//! Single-pass lexical scanner.
//!
//! The scanner walks the text once, left to right, and carries a small state
//! machine over `Default`, `LineComment`, `BlockComment` and `Literal(delim)`.
//! Every byte is classified exactly once, so a `//` inside a string stays part
//! of the string and a quote inside a comment never opens a literal.
//!
//! Priority inside `Default` at each position:
//! line comment, block comment, string literal, keyword, number, call-site
//! identifier, plain.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

use crate::token::{Category, Span};

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "function",
    "return",
    "if",
    "else",
    "for",
    "while",
    "var",
    "let",
    "const",
    "class",
    "import",
    "export",
    "from",
    "true",
    "false",
    "null",
    "undefined",
];

lazy_static! {
    static ref WORD: Regex =
        Regex::new(r"^[A-Za-z0-9_$]+").expect("Invalid WORD regex pattern");
    static ref NUMBER: Regex =
        Regex::new(r"^([0-9]+)(?:\.[0-9]+)?").expect("Invalid NUMBER regex pattern");
    static ref IDENTIFIER: Regex =
        Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*").expect("Invalid IDENTIFIER regex pattern");
    static ref DEFAULT_TOKENIZER: Tokenizer = Tokenizer::default();
}

/// Tokenize with the default keyword set.
pub fn tokenize(text: &str) -> Vec<Span> {
    DEFAULT_TOKENIZER.tokenize(text)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Default,
    LineComment,
    BlockComment,
    Literal(u8),
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    keywords: HashSet<String>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::with_keywords(DEFAULT_KEYWORDS.iter().copied())
    }
}

impl Tokenizer {
    pub fn with_keywords<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keywords: keywords.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_keyword(&self, word: &str) -> bool {
        self.keywords.contains(word)
    }

    /// Classify `text` into contiguous, non-overlapping spans.
    ///
    /// An empty input yields no spans. Otherwise the spans start at 0, end at
    /// `text.len()`, and each one begins where the previous one ended.
    pub fn tokenize(&self, text: &str) -> Vec<Span> {
        let bytes = text.as_bytes();
        let len = bytes.len();
        let mut out = SpanSink::default();
        let mut state = State::Default;
        let mut token_start = 0;
        let mut pos = 0;

        while pos < len {
            match state {
                State::Default => {
                    let b = bytes[pos];
                    let next = bytes.get(pos + 1).copied();
                    match b {
                        b'/' if next == Some(b'/') => {
                            token_start = pos;
                            pos += 2;
                            state = State::LineComment;
                        }
                        b'/' if next == Some(b'*') => {
                            token_start = pos;
                            pos += 2;
                            state = State::BlockComment;
                        }
                        b'"' | b'\'' | b'`' => {
                            token_start = pos;
                            pos += 1;
                            state = State::Literal(b);
                        }
                        _ if is_word_byte(b) => {
                            pos = self.scan_word(text, pos, &mut out);
                        }
                        _ => {
                            let end = plain_run_end(bytes, pos);
                            out.push(pos, end, Category::Plain);
                            pos = end;
                        }
                    }
                }
                State::LineComment => {
                    let end = text[pos..].find('\n').map_or(len, |i| pos + i);
                    out.push(token_start, end, Category::Comment);
                    pos = end;
                    state = State::Default;
                }
                State::BlockComment => {
                    let end = text[pos..].find("*/").map_or(len, |i| pos + i + 2);
                    out.push(token_start, end, Category::Comment);
                    pos = end;
                    state = State::Default;
                }
                State::Literal(delim) => {
                    let end = bytes[pos..]
                        .iter()
                        .position(|&c| c == delim)
                        .map_or(len, |i| pos + i + 1);
                    out.push(token_start, end, Category::String);
                    pos = end;
                    state = State::Default;
                }
            }
        }

        // A comment or literal opener at the very end of the text.
        if state != State::Default {
            let category = match state {
                State::Literal(_) => Category::String,
                _ => Category::Comment,
            };
            out.push(token_start, len, category);
        }

        out.finish()
    }

    /// Classify the word starting at `pos` and return the position after it.
    fn scan_word(&self, text: &str, pos: usize, out: &mut SpanSink) -> usize {
        let bytes = text.as_bytes();
        let rest = &text[pos..];
        let word_end = pos + WORD.find(rest).map_or(1, |m| m.end());

        if bytes[pos].is_ascii_digit() {
            if let Some(caps) = NUMBER.captures(rest) {
                let full_end = pos + caps.get(0).map_or(0, |m| m.end());
                let int_end = pos + caps.get(1).map_or(0, |m| m.end());
                // `\b` semantics: the number must not run into a word character.
                // A decimal glued to letters (`3.14px`) still yields its integer part.
                if !bytes.get(full_end).copied().is_some_and(is_word_byte) {
                    out.push(pos, full_end, Category::Number);
                    return full_end;
                }
                if int_end < full_end {
                    out.push(pos, int_end, Category::Number);
                    return int_end;
                }
            }
            out.push(pos, word_end, Category::Plain);
            return word_end;
        }

        let ident_end = pos + IDENTIFIER.find(rest).map_or(0, |m| m.end());
        if ident_end != word_end {
            out.push(pos, word_end, Category::Plain);
            return word_end;
        }

        let word = &text[pos..word_end];
        let category = if self.is_keyword(word) {
            Category::Keyword
        } else if bytes.get(word_end) == Some(&b'(') {
            Category::IdentifierCall
        } else {
            Category::Plain
        };
        out.push(pos, word_end, category);
        word_end
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

/// End of a run of bytes that cannot open any other token.
///
/// Stops only on ASCII bytes, so the returned offset is a char boundary.
fn plain_run_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start + 1;
    while end < bytes.len() {
        let b = bytes[end];
        if b == b'/' || b == b'"' || b == b'\'' || b == b'`' || is_word_byte(b) {
            break;
        }
        end += 1;
    }
    end
}

/// Collects spans, dropping empty ones and merging adjacent plain runs.
#[derive(Default)]
struct SpanSink {
    spans: Vec<Span>,
}

impl SpanSink {
    fn push(&mut self, start: usize, end: usize, category: Category) {
        if start >= end {
            return;
        }
        if category == Category::Plain {
            if let Some(last) = self.spans.last_mut() {
                if last.category == Category::Plain && last.end == start {
                    last.end = end;
                    return;
                }
            }
        }
        self.spans.push(Span::new(start, end, category));
    }

    fn finish(self) -> Vec<Span> {
        self.spans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(text: &str) -> Vec<(&str, Category)> {
        tokenize(text)
            .into_iter()
            .map(|s| (s.text(text), s.category))
            .collect()
    }

    #[test]
    fn test_number_glued_to_letters_is_plain() {
        assert_eq!(categories("1abc"), vec![("1abc", Category::Plain)]);
    }

    #[test]
    fn test_decimal_glued_to_letters_keeps_integer_part() {
        assert_eq!(
            categories("3.14px"),
            vec![("3", Category::Number), (".14px", Category::Plain)]
        );
    }

    #[test]
    fn test_identifier_with_digits_is_not_a_number() {
        assert_eq!(
            categories("x1 = 2"),
            vec![("x1 = ", Category::Plain), ("2", Category::Number)]
        );
    }

    #[test]
    fn test_keyword_before_paren_stays_keyword() {
        assert_eq!(
            categories("if(a)"),
            vec![("if", Category::Keyword), ("(a)", Category::Plain)]
        );
    }

    #[test]
    fn test_call_requires_paren_immediately_after() {
        assert_eq!(
            categories("foo (1)"),
            vec![
                ("foo (", Category::Plain),
                ("1", Category::Number),
                (")", Category::Plain),
            ]
        );
    }

    #[test]
    fn test_dollar_identifiers() {
        assert_eq!(
            categories("$el()"),
            vec![("$el", Category::IdentifierCall), ("()", Category::Plain)]
        );
    }

    #[test]
    fn test_custom_keywords() {
        let tokenizer = Tokenizer::with_keywords(["fn", "let"]);
        let text = "fn main";
        let spans = tokenizer.tokenize(text);
        assert_eq!(spans[0].category, Category::Keyword);
        assert_eq!(spans[0].text(text), "fn");
        assert!(!tokenizer.is_keyword("function"));
    }

    #[test]
    fn test_trailing_opener_at_end_of_text() {
        assert_eq!(categories("a \""), vec![("a ", Category::Plain), ("\"", Category::String)]);
        assert_eq!(categories("a //"), vec![("a ", Category::Plain), ("//", Category::Comment)]);
    }
}
