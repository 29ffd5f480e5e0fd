use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{NoExpand, Regex};

use super::spans::{Span, SpanKind, rewrite_code_spans, split_spans};

const TIME_FILTER_TOKEN: &str = "$__timeFilter";

/// Runs every sanitizer rule in order: qualifier markers first, then time filter repair.
#[must_use]
pub fn sanitize(sql: &str) -> String {
    let stripped = strip_qualifier_markers(sql);
    fix_time_filter_syntax(&stripped)
}

/// Drops the `@` decoration that some generators put in front of database names.
///
/// `@metrics.cpu` becomes `metrics.cpu` and `FROM @metrics` becomes `FROM metrics`.
/// Session variables (`@@x`), markers glued to a preceding identifier and anything
/// inside literals or comments are left alone.
#[must_use]
pub fn strip_qualifier_markers(sql: &str) -> String {
    rewrite_code_spans(sql, strip_markers_in_code).into_owned()
}

/// Rewrites malformed `$__timeFilter` invocations to the bare macro token.
#[must_use]
pub fn fix_time_filter_syntax(sql: &str) -> String {
    let spans = split_spans(sql);
    let mut output = String::with_capacity(sql.len());
    let mut changed = false;

    for (index, span) in spans.iter().enumerate() {
        let fixed = match span.kind {
            SpanKind::Code => fix_code_span(span.text),
            SpanKind::SingleQuoted | SpanKind::DoubleQuoted
                if index > 0 && follows_predicate_keyword(&spans[index - 1]) =>
            {
                unquote_stray_macro(span)
            }
            _ => Cow::Borrowed(span.text),
        };
        if fixed != span.text {
            changed = true;
        }
        output.push_str(&fixed);
    }

    if changed { output } else { sql.to_string() }
}

fn strip_markers_in_code(code: &str) -> Cow<'_, str> {
    let bytes = code.as_bytes();
    let mut output = String::new();
    let mut copied_until = 0;

    for (index, byte) in bytes.iter().enumerate() {
        if *byte == b'@' && is_strippable_marker(bytes, index) {
            output.push_str(&code[copied_until..index]);
            copied_until = index + 1;
        }
    }

    if copied_until == 0 {
        return Cow::Borrowed(code);
    }
    output.push_str(&code[copied_until..]);
    Cow::Owned(output)
}

fn is_strippable_marker(bytes: &[u8], index: usize) -> bool {
    if let Some(previous) = index.checked_sub(1).map(|position| bytes[position])
        && (previous == b'@' || is_identifier_byte(previous))
    {
        return false;
    }

    let Some(&first) = bytes.get(index + 1) else {
        return false;
    };
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return false;
    }

    let mut end = index + 1;
    while end < bytes.len() && is_identifier_byte(bytes[end]) {
        end += 1;
    }

    match bytes.get(end) {
        None | Some(b'.') => true,
        Some(&next) => next.is_ascii_whitespace() || matches!(next, b',' | b')' | b';'),
    }
}

fn is_identifier_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

fn replace_with_token<'a>(regex: &Regex, text: Cow<'a, str>) -> Cow<'a, str> {
    let fixed = match regex.replace_all(&text, NoExpand(TIME_FILTER_TOKEN)) {
        Cow::Borrowed(_) => None,
        Cow::Owned(fixed) => Some(fixed),
    };
    fixed.map_or(text, Cow::Owned)
}

fn fix_code_span(code: &str) -> Cow<'_, str> {
    let braced = braced_macro_regex().replace_all(code, "$$$1");
    let balanced = replace_with_token(balanced_call_regex(), braced);
    let repaired = replace_with_token(unbalanced_call_regex(), balanced);

    if repaired == code {
        Cow::Borrowed(code)
    } else {
        Cow::Owned(repaired.into_owned())
    }
}

/// True when `previous` is code ending in a keyword that must be followed by a predicate.
fn follows_predicate_keyword(previous: &Span<'_>) -> bool {
    if !previous.is_code() {
        return false;
    }
    let trimmed = previous.text.trim_end();
    let word_start = trimmed
        .rfind(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
        .map_or(0, |position| position + 1);
    let last_word = &trimmed[word_start..];
    ["WHERE", "AND", "OR", "ON", "HAVING", "NOT"]
        .iter()
        .any(|keyword| last_word.eq_ignore_ascii_case(keyword))
}

/// `WHERE '$__timeFilter'` is a predicate wrapped in quotes by mistake.
/// The same literal anywhere else is text and stays quoted.
fn unquote_stray_macro<'a>(span: &Span<'a>) -> Cow<'a, str> {
    let Some(body) = span.quoted_body() else {
        return Cow::Borrowed(span.text);
    };
    let terminated = span.text.len() >= 2 && span.text.ends_with(&span.text[..1]);
    if terminated && quoted_macro_regex().is_match(body.trim()) {
        Cow::Owned(TIME_FILTER_TOKEN.to_string())
    } else {
        Cow::Borrowed(span.text)
    }
}

fn braced_macro_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\$\{(__(?:timeFilter|timeField|timeFrom|timeTo|interval))\}")
            .expect("braced macro regex must compile")
    })
}

fn balanced_call_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\$__timeFilter\s*\(\s*(?:[A-Za-z_][A-Za-z0-9_.]*)?\s*\)")
            .expect("balanced call regex must compile")
    })
}

fn unbalanced_call_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\$__timeFilter\s*\(\s*(?:[A-Za-z_][A-Za-z0-9_.]*)?")
            .expect("unbalanced call regex must compile")
    })
}

fn quoted_macro_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"^\$__timeFilter(?:\s*\(\s*(?:[A-Za-z_][A-Za-z0-9_.]*)?\s*\))?$")
            .expect("quoted macro regex must compile")
    })
}
