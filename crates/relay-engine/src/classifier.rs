//! Failure classification from transcoder diagnostics.

use regex::{Regex, RegexBuilder};

use relay_ipc::FailureKind;

/// Maximum diagnostic text retained per subprocess.
pub const DIAGNOSTIC_BUFFER_LIMIT: usize = 16 * 1024;

/// Built-in rules, evaluated in order.
const DEFAULT_RULES: &[(&str, FailureKind)] = &[
    (r"Connection refused", FailureKind::ConnectionRefused),
    (
        r"401 Unauthorized|Invalid data found when processing input",
        FailureKind::AuthOrInvalidStream,
    ),
    (r"No route to host", FailureKind::HostUnreachable),
];

/// Bounded accumulation of diagnostic text. Oldest text is trimmed first.
#[derive(Debug, Clone)]
pub struct DiagnosticBuffer {
    text: String,
    limit: usize,
}

impl DiagnosticBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
        }
    }

    /// Append a chunk, trimming from the front past the limit.
    pub fn push(&mut self, chunk: &str) {
        self.text.push_str(chunk);

        if self.text.len() > self.limit {
            let mut cut = self.text.len() - self.limit;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
        }
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// The last non-empty line, for error reports.
    pub fn last_line(&self) -> Option<&str> {
        self.text.lines().rev().map(str::trim).find(|line| !line.is_empty())
    }
}

impl Default for DiagnosticBuffer {
    fn default() -> Self {
        Self::new(DIAGNOSTIC_BUFFER_LIMIT)
    }
}

struct Rule {
    pattern: Regex,
    kind: FailureKind,
}

/// Ordered (pattern, kind) table. The first matching rule wins.
pub struct ErrorClassifier {
    rules: Vec<Rule>,
}

impl ErrorClassifier {
    /// Build a classifier from case-insensitive patterns.
    pub fn with_rules(rules: &[(&str, FailureKind)]) -> Result<Self, regex::Error> {
        let rules = rules
            .iter()
            .map(|(pattern, kind)| {
                let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
                Ok(Rule { pattern, kind: *kind })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self { rules })
    }

    /// Classify accumulated diagnostic text.
    pub fn classify(&self, text: &str) -> Option<FailureKind> {
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(text))
            .map(|rule| rule.kind)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::with_rules(DEFAULT_RULES).expect("built-in classification patterns are valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_signatures() {
        let classifier = ErrorClassifier::default();

        assert_eq!(
            classifier.classify("[tcp @ 0x55] Connection to tcp://cam:554 failed: Connection refused"),
            Some(FailureKind::ConnectionRefused)
        );
        assert_eq!(
            classifier.classify("method DESCRIBE failed: 401 Unauthorized"),
            Some(FailureKind::AuthOrInvalidStream)
        );
        assert_eq!(
            classifier.classify("rtsp://cam: Invalid data found when processing input"),
            Some(FailureKind::AuthOrInvalidStream)
        );
        assert_eq!(
            classifier.classify("Connection to tcp://10.0.0.9:554 failed: No route to host"),
            Some(FailureKind::HostUnreachable)
        );
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let classifier = ErrorClassifier::default();
        assert_eq!(
            classifier.classify("CONNECTION REFUSED"),
            Some(FailureKind::ConnectionRefused)
        );
    }

    #[test]
    fn test_first_rule_in_declaration_order_wins() {
        let classifier = ErrorClassifier::default();
        let text = "No route to host\n401 Unauthorized\nConnection refused\n";

        assert_eq!(classifier.classify(text), Some(FailureKind::ConnectionRefused));
    }

    #[test]
    fn test_unrelated_text_is_not_classified() {
        let classifier = ErrorClassifier::default();
        assert_eq!(classifier.classify("deprecated pixel format used"), None);
    }

    #[test]
    fn test_signature_split_across_chunks() {
        let classifier = ErrorClassifier::default();
        let mut buffer = DiagnosticBuffer::default();

        buffer.push("method DESCRIBE failed: 401 Unauth");
        assert_eq!(classifier.classify(buffer.as_str()), None);

        buffer.push("orized\n");
        assert_eq!(
            classifier.classify(buffer.as_str()),
            Some(FailureKind::AuthOrInvalidStream)
        );
    }

    #[test]
    fn test_buffer_trims_oldest_text() {
        let mut buffer = DiagnosticBuffer::new(8);
        buffer.push("abcdef");
        buffer.push("ghij");

        assert_eq!(buffer.as_str(), "cdefghij");
    }

    #[test]
    fn test_buffer_trims_on_char_boundary() {
        let mut buffer = DiagnosticBuffer::new(4);
        buffer.push("aé");
        buffer.push("bcd");

        assert!(buffer.as_str().len() <= 4);
        assert!(buffer.as_str().ends_with("bcd"));
    }

    #[test]
    fn test_last_line() {
        let mut buffer = DiagnosticBuffer::default();
        buffer.push("first\nsecond\n\n");
        assert_eq!(buffer.last_line(), Some("second"));
    }
}
