/// One line of a parsed SSE frame — either an `event:` name or a `data:` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Parse a single SSE line (`"event: init"` / `"data: {...}"`). Lines that
/// match neither prefix (blank separators, comments) yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_event_and_data_lines() {
        assert_eq!(parse_sse_line("event: init"), Some(SseParsed::Event("init".to_string())));
        assert_eq!(
            parse_sse_line("data: {\"sid\":7}"),
            Some(SseParsed::Data("{\"sid\":7}".to_string()))
        );
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert_eq!(parse_sse_line(""), None);
        assert_eq!(parse_sse_line(": keep-alive"), None);
    }
}
