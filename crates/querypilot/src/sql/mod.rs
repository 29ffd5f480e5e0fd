pub mod sanitize;
pub mod spans;

pub use sanitize::{fix_time_filter_syntax, sanitize, strip_qualifier_markers};
pub use spans::{Span, SpanKind, code_text, rewrite_code_spans, split_spans};
