//! Retry and repeat-detection rules applied before the environment is touched.

/// Re-prompt sent after a response with no parseable action.
pub const PARSE_RETRY_OBSERVATION: &str =
    "Failed to parse action from your response, make sure you provide a valid action.";

/// Re-prompt sent after an action that repeats the last executed one.
pub const REPEAT_OBSERVATION: &str = "The action is the same as the last one, you MUST provide a DIFFERENT SQL code or Python Code or different action.";

/// Default number of parse failures tolerated in a run; the next one is fatal.
pub const DEFAULT_MAX_PARSE_RETRIES: u32 = 3;

/// Outcome of a response that carried no action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailureDecision {
    Retry,
    Fatal,
}

/// Decide on a parse failure given the cumulative count *after* incrementing it.
///
/// The count is cumulative across the run and never resets on success.
pub fn on_parse_failure(retry_count: u32, max_retries: u32) -> ParseFailureDecision {
    if retry_count > max_retries {
        ParseFailureDecision::Fatal
    } else {
        ParseFailureDecision::Retry
    }
}

/// Outcome of comparing a proposed action with the last executed one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepeatDecision {
    /// Hand the action to the environment.
    Execute,
    /// First repeat: warn the agent without executing.
    Warn,
    /// Repeat after a warning.
    Fatal,
}

/// Compare renderings of the last executed action and the proposed one.
pub fn check_repeat(last: Option<&str>, proposed: &str, already_warned: bool) -> RepeatDecision {
    match last {
        Some(last) if last == proposed => {
            if already_warned {
                RepeatDecision::Fatal
            } else {
                RepeatDecision::Warn
            }
        }
        _ => RepeatDecision::Execute,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_failures_become_fatal_after_threshold() {
        let decisions: Vec<_> = (1..=4)
            .map(|count| on_parse_failure(count, DEFAULT_MAX_PARSE_RETRIES))
            .collect();
        assert_eq!(
            decisions,
            vec![
                ParseFailureDecision::Retry,
                ParseFailureDecision::Retry,
                ParseFailureDecision::Retry,
                ParseFailureDecision::Fatal,
            ]
        );
    }

    #[test]
    fn zero_retries_makes_first_failure_fatal() {
        assert_eq!(on_parse_failure(1, 0), ParseFailureDecision::Fatal);
    }

    #[test]
    fn first_action_always_executes() {
        assert_eq!(check_repeat(None, "Bash(ls)", false), RepeatDecision::Execute);
        assert_eq!(check_repeat(None, "Bash(ls)", true), RepeatDecision::Execute);
    }

    #[test]
    fn repeat_warns_then_fails() {
        assert_eq!(
            check_repeat(Some("Bash(ls)"), "Bash(ls)", false),
            RepeatDecision::Warn
        );
        assert_eq!(
            check_repeat(Some("Bash(ls)"), "Bash(ls)", true),
            RepeatDecision::Fatal
        );
    }

    #[test]
    fn differing_rendering_executes_even_after_warning() {
        assert_eq!(
            check_repeat(Some("Bash(ls)"), "Bash(ls -la)", true),
            RepeatDecision::Execute
        );
    }
}
