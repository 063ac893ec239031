//! Guidance text the agentic loop injects between model turns.
//!
//! These are plain user-role turns; the model reads them as instructions
//! and the end user never sees them.

/// Returned when the model ends the budget without producing any text.
pub const BUDGET_FALLBACK_RESPONSE: &str = "I'm sorry, I could not complete the analysis within the \
allowed number of data lookups. Please try a more specific question.";

/// After a failed tool call that may still be retried.
pub fn retry_guidance(tool_name: &str, attempt_index: u32, max_retries: u32) -> String {
    format!(
        "The last call to `{}` failed (attempt {} of {}). Read the error message carefully, \
         fix the cause and try again, or take a different approach.",
        tool_name, attempt_index, max_retries
    )
}

/// After a successful tool call that was not the first of the conversation.
pub fn progress_guidance(calls_used: usize, max_tool_calls: usize) -> String {
    format!(
        "You obtained data successfully. You have used {} of {} available tool calls.",
        calls_used, max_tool_calls
    )
}

/// Once the call budget is spent.
pub fn budget_exhausted_guidance(max_tool_calls: usize) -> String {
    format!(
        "You have reached the maximum of {} tool calls for this request. Do not call any more tools; \
         answer now with the information you already have.",
        max_tool_calls
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guidance_mentions_counts() {
        assert!(retry_guidance("execute_sql_query", 1, 2).contains("attempt 1 of 2"));
        assert!(progress_guidance(3, 10).contains("3 of 10"));
        assert!(budget_exhausted_guidance(10).contains("maximum of 10"));
    }
}
