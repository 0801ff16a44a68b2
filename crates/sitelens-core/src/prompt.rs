//! System prompt composition

use crate::context::ContextBlock;
use crate::types::{ChatTurn, Role, trailing_window};

/// Conversation turns forwarded to the completion provider
pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Built-in advisor persona used when no prompt file is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are the AI marketing advisor for a digital marketing agency that builds automated client \
acquisition systems for small and mid-sized businesses.

Personality: sharp, direct and useful. Sound like an experienced colleague, not a scripted bot.

In this chat:
1. Learn what the business does and where it operates.
2. Understand their current marketing: what they run today and what is not working.
3. Give specific, actionable observations based on what they share.
4. If they share a website, give honest feedback on what you would fix (SEO, conversion, positioning).
5. After three to five exchanges, offer a free 20 minute strategy call with the team.

Rules:
- Keep every reply to 2-4 sentences.
- Skip filler openers such as \"Great question!\".
- Be honest and tactful when something sounds ineffective.
- Services offered: outbound email, LinkedIn lead generation, Google Ads, local SEO, AI automation, social media.
- Never quote prices; point pricing questions to the strategy call.
- Redirect questions outside marketing back to their growth goals.
- When a WEBSITE ANALYSIS block follows, treat it as the only source of facts about the site.";

/// Preamble followed by the website context, when there is one
pub fn compose_system_prompt(preamble: &str, context: Option<&ContextBlock>) -> String {
    match context {
        Some(block) => format!("{}\n\n{}", preamble.trim_end(), block.as_str()),
        None => preamble.trim_end().to_string(),
    }
}

/// Full message list for the completion provider: one system message, then
/// the last `window` user/assistant turns.
///
/// System turns supplied by the client are dropped so they cannot replace the
/// preamble or imitate a website block.
pub fn compose_messages(
    preamble: &str,
    context: Option<&ContextBlock>,
    turns: &[ChatTurn],
    window: usize,
) -> Vec<ChatTurn> {
    let conversation: Vec<ChatTurn> = turns
        .iter()
        .filter(|turn| turn.role != Role::System)
        .cloned()
        .collect();

    let mut messages = Vec::with_capacity(window + 1);
    messages.push(ChatTurn::system(compose_system_prompt(preamble, context)));
    messages.extend_from_slice(trailing_window(&conversation, window));
    messages
}
