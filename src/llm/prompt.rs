use crate::models::ChatMessage;

const CONTEXT_PLACEHOLDER: &str = "{context}";

/// Chat-template control tokens that must never reach the model from user or document text.
const CONTROL_TOKENS: &[&str] = &["<|im_start|>", "<|im_end|>", "<|im_sep|>", "<|endoftext|>"];

/// Strip chat-template control tokens from untrusted text.
pub fn sanitize_for_prompt(text: &str) -> String {
    let mut out = text.to_string();
    for token in CONTROL_TOKENS {
        if out.contains(token) {
            out = out.replace(token, "");
        }
    }
    out
}

/// Keep at most `max_chars` characters (not bytes).
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((end, _)) => s[..end].to_string(),
        None => s.to_string(),
    }
}

/// Render the system instructions with the grounding context.
///
/// The configured prompt may carry a `{context}` placeholder; without one the
/// sources are appended after the instructions.
pub fn render_system_prompt(system_prompt: &str, context: &str) -> String {
    let instructions = dedent(system_prompt);
    if instructions.contains(CONTEXT_PLACEHOLDER) {
        instructions.replace(CONTEXT_PLACEHOLDER, context)
    } else {
        format!("{}\n\nSources:\n{context}", instructions.trim_end())
    }
}

/// System message followed by the user question.
pub fn build_messages(system_prompt: &str, context: &str, question: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(render_system_prompt(system_prompt, context)),
        ChatMessage::user(question),
    ]
}

/// Remove the common leading indentation of every non-blank line.
fn dedent(text: &str) -> String {
    let indent = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);
    text.lines()
        .map(|l| {
            if l.trim().is_empty() {
                ""
            } else {
                l.get(indent..).unwrap_or_else(|| l.trim_start())
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}
