use once_cell::sync::Lazy;
use regex::Regex;

/// Success line from the server's `do_command` verb: `#-1:  => value`.
static SUCCESS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[#\-\d]+:\s*=>\s*(.+)$").unwrap());

/// Explicit error line from `eval()`: `** error_info` (always a failure).
static ERROR_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\*\*\s+(.+)$").unwrap());

/// Runtime traceback frame: `#obj:verb ... line N:`.
static TRACEBACK_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#[^:]+:.*line\s+\d+:").unwrap());

/// The classified result of one evaluation request.
///
/// Produced fresh per `eval()` call and never persisted. The first three
/// variants are what the server actually said; the last two cover text the
/// classifier could not place and a completely silent server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    /// The expression evaluated to a value, e.g. `Success("2")`.
    Success(String),
    /// The server rejected the expression at compile time (`** ...` line).
    CompileError(String),
    /// The expression raised at runtime; carries the full traceback text.
    RuntimeError(String),
    /// Non-empty response text that matched no known shape.
    Unclassified(String),
    /// The server sent nothing before the read deadline.
    NoResponse,
}

impl EvalOutcome {
    /// Whether this outcome is a successful evaluation.
    pub fn is_success(&self) -> bool {
        matches!(self, EvalOutcome::Success(_))
    }

    /// The value (on success) or error message carried by this outcome.
    pub fn message(&self) -> &str {
        match self {
            EvalOutcome::Success(v) => v,
            EvalOutcome::CompileError(m) => m,
            EvalOutcome::RuntimeError(m) => m,
            EvalOutcome::Unclassified(m) => m,
            EvalOutcome::NoResponse => "(no response)",
        }
    }

    /// Collapse into the `(success, value_or_message)` shape test suites
    /// assert against.
    pub fn into_pair(self) -> (bool, String) {
        let success = self.is_success();
        let message = match self {
            EvalOutcome::Success(v) => v,
            EvalOutcome::CompileError(m) => m,
            EvalOutcome::RuntimeError(m) => m,
            EvalOutcome::Unclassified(m) => m,
            EvalOutcome::NoResponse => "(no response)".to_string(),
        };
        (success, message)
    }
}

/// Classify accumulated response text into an [`EvalOutcome`].
///
/// Rules are applied in a fixed order; the first match wins:
///
/// 1. success line (`<caller>: => <value>`)
/// 2. explicit error line (`** <message>`)
/// 3. runtime traceback (frame lines, closed by `(End of traceback)`)
/// 4. non-empty leftover text is `Unclassified`, empty text is `NoResponse`
///
/// The ordering matters: a traceback can mention `**` in verb source, and a
/// successful result can quote error text, so success is always checked
/// first and the fallback last.
pub fn classify(response: &str) -> EvalOutcome {
    if let Some(caps) = SUCCESS_PATTERN.captures(response) {
        return EvalOutcome::Success(caps[1].trim().to_string());
    }

    if let Some(caps) = ERROR_PATTERN.captures(response) {
        return EvalOutcome::CompileError(caps[1].trim().to_string());
    }

    if TRACEBACK_PATTERN.is_match(response) {
        return EvalOutcome::RuntimeError(response.trim().to_string());
    }

    let trimmed = response.trim();
    if trimmed.is_empty() {
        EvalOutcome::NoResponse
    } else {
        EvalOutcome::Unclassified(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_success_line() {
        let outcome = classify("#-1:  => 2\n");
        assert_eq!(outcome, EvalOutcome::Success("2".to_string()));
    }

    #[test]
    fn classifies_success_with_string_value() {
        let outcome = classify("#-1:  => \"héllo wörld\"\n");
        assert_eq!(outcome, EvalOutcome::Success("\"héllo wörld\"".to_string()));
    }

    #[test]
    fn classifies_success_with_list_value() {
        let outcome = classify("#-1:  => {1, {2, 3}, \"x\"}\n");
        assert_eq!(
            outcome,
            EvalOutcome::Success("{1, {2, 3}, \"x\"}".to_string())
        );
    }

    #[test]
    fn classifies_i64_boundary_values() {
        let outcome = classify("#-1:  => 9223372036854775807\n");
        assert_eq!(
            outcome,
            EvalOutcome::Success("9223372036854775807".to_string())
        );
        let outcome = classify("#-1:  => -9223372036854775808\n");
        assert_eq!(
            outcome,
            EvalOutcome::Success("-9223372036854775808".to_string())
        );
    }

    #[test]
    fn classifies_compile_error() {
        let outcome = classify("** Line 1: syntax error {\"1 +\"}\n");
        assert_eq!(
            outcome,
            EvalOutcome::CompileError("Line 1: syntax error {\"1 +\"}".to_string())
        );
    }

    #[test]
    fn classifies_runtime_traceback() {
        let response = "#-1:Input to EVAL (this == #-1), line 1:  Division by zero\n\
                        (End of traceback)\n";
        match classify(response) {
            EvalOutcome::RuntimeError(text) => {
                assert!(text.contains("Division by zero"));
                assert!(text.contains("(End of traceback)"));
            }
            other => panic!("expected RuntimeError, got {:?}", other),
        }
    }

    #[test]
    fn success_takes_precedence_over_error_marker() {
        // A value that happens to contain "** text" on a later line must not
        // demote a real success.
        let response = "#-1:  => \"ok\"\n** leftover noise\n";
        assert_eq!(classify(response), EvalOutcome::Success("\"ok\"".to_string()));
    }

    #[test]
    fn error_takes_precedence_over_traceback() {
        let response = "** Line 2: parse error\n#-1:verb (this == #-1), line 2: detail\n";
        assert_eq!(
            classify(response),
            EvalOutcome::CompileError("Line 2: parse error".to_string())
        );
    }

    #[test]
    fn unparseable_text_is_unclassified() {
        let outcome = classify("I don't understand that.\n");
        assert_eq!(
            outcome,
            EvalOutcome::Unclassified("I don't understand that.".to_string())
        );
    }

    #[test]
    fn empty_text_is_no_response() {
        assert_eq!(classify(""), EvalOutcome::NoResponse);
        assert_eq!(classify("  \n \n"), EvalOutcome::NoResponse);
    }

    #[test]
    fn pair_shape_for_callers() {
        assert_eq!(classify("#-1:  => 2\n").into_pair(), (true, "2".to_string()));
        let (success, message) = classify("** E_DIV {\"Division by zero\"}\n").into_pair();
        assert!(!success);
        assert!(message.contains("Division by zero"));
        assert_eq!(
            classify("").into_pair(),
            (false, "(no response)".to_string())
        );
    }
}
