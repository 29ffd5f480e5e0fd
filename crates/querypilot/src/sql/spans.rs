use std::borrow::Cow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKind {
    Code,
    SingleQuoted,
    DoubleQuoted,
    BacktickQuoted,
    LineComment,
    BlockComment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span<'a> {
    pub kind: SpanKind,
    pub text: &'a str,
}

impl Span<'_> {
    #[must_use]
    pub const fn is_code(&self) -> bool {
        matches!(self.kind, SpanKind::Code)
    }

    /// Body of a quoted span without its delimiters, `None` for code and comments.
    #[must_use]
    pub fn quoted_body(&self) -> Option<&str> {
        match self.kind {
            SpanKind::SingleQuoted | SpanKind::DoubleQuoted | SpanKind::BacktickQuoted => {
                let inner = &self.text[1..];
                let delimiter = self.text.as_bytes()[0] as char;
                Some(inner.strip_suffix(delimiter).unwrap_or(inner))
            }
            _ => None,
        }
    }
}

/// Splits SQL text into code, quoted and comment spans.
///
/// Quotes are closed by the same delimiter; a doubled delimiter (`''`, `""`) is an escape.
/// Unterminated literals and comments run to the end of the input. Concatenating the
/// `text` of every span yields the input unchanged.
#[must_use]
pub fn split_spans(sql: &str) -> Vec<Span<'_>> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut start = 0;
    let mut index = 0;

    while index < bytes.len() {
        let (kind, end) = match bytes[index] {
            b'\'' => (SpanKind::SingleQuoted, quoted_end(bytes, index, b'\'')),
            b'"' => (SpanKind::DoubleQuoted, quoted_end(bytes, index, b'"')),
            b'`' => (SpanKind::BacktickQuoted, quoted_end(bytes, index, b'`')),
            b'-' if bytes.get(index + 1) == Some(&b'-') => {
                (SpanKind::LineComment, line_comment_end(bytes, index))
            }
            b'/' if bytes.get(index + 1) == Some(&b'*') => {
                (SpanKind::BlockComment, block_comment_end(bytes, index))
            }
            _ => {
                index += 1;
                continue;
            }
        };

        if start < index {
            spans.push(Span {
                kind: SpanKind::Code,
                text: &sql[start..index],
            });
        }
        spans.push(Span {
            kind,
            text: &sql[index..end],
        });
        index = end;
        start = end;
    }

    if start < bytes.len() {
        spans.push(Span {
            kind: SpanKind::Code,
            text: &sql[start..],
        });
    }

    spans
}

/// Applies `rewrite` to every code span and reassembles the query.
///
/// Returns the input borrowed when no span changed.
pub fn rewrite_code_spans<'a, F>(sql: &'a str, mut rewrite: F) -> Cow<'a, str>
where
    F: FnMut(&str) -> Cow<'_, str>,
{
    let spans = split_spans(sql);
    let mut output = String::with_capacity(sql.len());
    let mut changed = false;

    for span in &spans {
        if span.is_code() {
            let rewritten = rewrite(span.text);
            if rewritten != span.text {
                changed = true;
            }
            output.push_str(&rewritten);
        } else {
            output.push_str(span.text);
        }
    }

    if changed {
        Cow::Owned(output)
    } else {
        Cow::Borrowed(sql)
    }
}

/// Code spans joined by a single space, for pattern searches that must ignore literals.
#[must_use]
pub fn code_text(sql: &str) -> String {
    split_spans(sql)
        .iter()
        .map(|span| if span.is_code() { span.text } else { " " })
        .collect()
}

fn quoted_end(bytes: &[u8], open: usize, delimiter: u8) -> usize {
    let mut index = open + 1;
    while index < bytes.len() {
        if bytes[index] == delimiter {
            if bytes.get(index + 1) == Some(&delimiter) {
                index += 2;
                continue;
            }
            return index + 1;
        }
        index += 1;
    }
    bytes.len()
}

fn line_comment_end(bytes: &[u8], open: usize) -> usize {
    bytes[open..]
        .iter()
        .position(|byte| *byte == b'\n')
        .map_or(bytes.len(), |offset| open + offset)
}

fn block_comment_end(bytes: &[u8], open: usize) -> usize {
    let mut index = open + 2;
    while index + 1 < bytes.len() {
        if bytes[index] == b'*' && bytes[index + 1] == b'/' {
            return index + 2;
        }
        index += 1;
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::{SpanKind, code_text, rewrite_code_spans, split_spans};
    use std::borrow::Cow;

    fn kinds(sql: &str) -> Vec<(SpanKind, &str)> {
        split_spans(sql)
            .into_iter()
            .map(|span| (span.kind, span.text))
            .collect()
    }

    #[test]
    fn splits_literals_and_comments() {
        let sql = "SELECT 'a''b', \"col\" -- note\nFROM t /* c */";
        assert_eq!(
            kinds(sql),
            vec![
                (SpanKind::Code, "SELECT "),
                (SpanKind::SingleQuoted, "'a''b'"),
                (SpanKind::Code, ", "),
                (SpanKind::DoubleQuoted, "\"col\""),
                (SpanKind::Code, " "),
                (SpanKind::LineComment, "-- note"),
                (SpanKind::Code, "\nFROM t "),
                (SpanKind::BlockComment, "/* c */"),
            ]
        );
    }

    #[test]
    fn unterminated_literal_runs_to_end() {
        let spans = split_spans("SELECT 'open");
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[1].kind, SpanKind::SingleQuoted);
        assert_eq!(spans[1].text, "'open");
        assert_eq!(spans[1].quoted_body(), Some("open"));
    }

    #[test]
    fn spans_reassemble_to_input() {
        for sql in [
            "",
            "SELECT 1",
            "SELECT `x` FROM \"t\" WHERE a = 'it''s' -- trailing",
            "/* only comment",
            "héllo 'wörld' ✓",
        ] {
            let joined: String = split_spans(sql).iter().map(|span| span.text).collect();
            assert_eq!(joined, sql);
        }
    }

    #[test]
    fn rewrite_touches_code_only_and_borrows_when_unchanged() {
        let sql = "SELECT x, 'x' FROM t";
        let rewritten = rewrite_code_spans(sql, |code| Cow::Owned(code.replace('x', "y")));
        assert_eq!(rewritten, "SELECT y, 'x' FROM t");

        let untouched = rewrite_code_spans(sql, |code| Cow::Borrowed(code));
        assert!(matches!(untouched, Cow::Borrowed(_)));
    }

    #[test]
    fn code_text_blanks_out_literals() {
        assert_eq!(code_text("a 'b' c"), "a   c");
    }
}
