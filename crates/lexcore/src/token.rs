use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Display class of a highlighted region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Comment,
    String,
    Keyword,
    Number,
    IdentifierCall,
    Plain,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Comment => "comment",
            Category::String => "string",
            Category::Keyword => "keyword",
            Category::Number => "number",
            Category::IdentifierCall => "identifier-call",
            Category::Plain => "plain",
        }
    }
}

/// A classified `[start, end)` byte range of the source text.
///
/// Offsets always fall on UTF-8 character boundaries, so `&source[span.range()]`
/// never panics for the text the span was produced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub category: Category,
}

impl Span {
    pub fn new(start: usize, end: usize, category: Category) -> Self {
        Self {
            start,
            end,
            category,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.range()]
    }
}

/// Cut a span sequence into one list per line of `source`.
///
/// Spans that cross a newline are split at it; the newline bytes themselves are
/// not part of any line. Offsets stay absolute. There is always one entry per
/// `source.split('\n')` item, so an empty document yields a single empty line.
pub fn split_lines(source: &str, spans: &[Span]) -> Vec<Vec<Span>> {
    let mut lines = Vec::new();
    let mut cursor = 0;
    let mut line_start = 0;

    for line in source.split('\n') {
        let line_end = line_start + line.len();
        let mut pieces = Vec::new();

        let mut i = cursor;
        while i < spans.len() && spans[i].start < line_end {
            let span = spans[i];
            let start = span.start.max(line_start);
            let end = span.end.min(line_end);
            if start < end {
                pieces.push(Span::new(start, end, span.category));
            }
            i += 1;
        }

        let next_start = line_end + 1;
        while cursor < spans.len() && spans[cursor].end <= next_start {
            cursor += 1;
        }

        lines.push(pieces);
        line_start = next_start;
    }

    lines
}
