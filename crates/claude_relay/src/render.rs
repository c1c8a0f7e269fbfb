//! Text shaping for chat replies: length limits, error blocks, help.

/// Largest message body sent to the chat surface.
pub const DEFAULT_MAX_MESSAGE_CHARS: usize = 39_000;
pub const TRUNCATION_SUFFIX: &str = "\n\n_(response truncated)_";

const ERROR_PREFIX: &str = ":warning: Claude run failed:\n```\n";
const ERROR_SUFFIX: &str = "\n```";

/// Bound `text` to `max_chars` characters, marking the cut with [`TRUNCATION_SUFFIX`].
/// Allocation: one String. Complexity: O(n) chars.
pub fn truncate_for_chat(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_owned();
    }
    let suffix_chars = TRUNCATION_SUFFIX.chars().count();
    if max_chars <= suffix_chars {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - suffix_chars).collect();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Code-fenced error message, bounded to `max_chars` overall.
pub fn render_error_block(message: &str, max_chars: usize) -> String {
    let fence_chars = ERROR_PREFIX.chars().count() + ERROR_SUFFIX.chars().count();
    let body = message.trim().replace("```", "'''");
    let body = truncate_for_chat(&body, max_chars.saturating_sub(fence_chars));
    format!("{ERROR_PREFIX}{body}{ERROR_SUFFIX}")
}

pub fn help_text() -> String {
    [
        "Hi! Send me a message and I'll run it through Claude in this thread.",
        "Follow-up messages in the same thread continue the conversation.",
        "",
        "Commands:",
        "- `stop`: interrupt the task running in this thread",
        "- `reset`: forget this thread's conversation and start fresh",
        "- `help`: show this message",
    ]
    .join("\n")
}
