use crate::memory::most_common;

const PERSONA: &str = "You are a casual, friendly AI companion called 'The Missing Link'. Be conversational and natural - not formal or robotic. Match the user's energy and message length. If they send a short message, keep your response short. If they're chatty, you can be more detailed. Be empathetic but speak like a friend, not a therapist.";

/// Recalled texts quoted into the prompt.
const MAX_CONTEXT_SNIPPETS: usize = 2;
/// Emotions considered for the "recent emotional patterns" line.
const RECENT_EMOTION_WINDOW: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTier {
	/// Inclusive upper bound on the user's word count.
	pub max_words: usize,
	pub max_tokens: u32,
	pub guidance: &'static str,
}

const TIERS: &[ReplyTier] = &[
	ReplyTier { max_words: 5, max_tokens: 50, guidance: "Keep your response brief - just a few words or a short sentence." },
	ReplyTier { max_words: 15, max_tokens: 150, guidance: "Keep your response concise - 1-2 sentences max." },
	ReplyTier { max_words: usize::MAX, max_tokens: 300, guidance: "You can give a more detailed response, but stay conversational." },
];

pub fn tier_for(message: &str) -> ReplyTier {
	let words = message.split_whitespace().count();
	*TIERS.iter().find(|t| words <= t.max_words).unwrap_or(&TIERS[TIERS.len() - 1])
}

pub struct PromptInputs<'a> {
	pub message: &'a str,
	pub user_name: Option<&'a str>,
	pub recalled: &'a [String],
	/// Oldest first.
	pub recent_emotions: &'a [String],
}

/// System prompt plus the token cap for the reply.
pub fn build_system_prompt(inputs: &PromptInputs<'_>) -> (String, u32) {
	let tier = tier_for(inputs.message);
	let mut prompt = format!("{} {}", PERSONA, tier.guidance);
	if let Some(name) = inputs.user_name.filter(|n| !n.is_empty()) {
		prompt.push_str(&format!(" The user's name is {}.", name));
	}
	if !inputs.recalled.is_empty() {
		let snippets: Vec<&str> = inputs.recalled.iter().take(MAX_CONTEXT_SNIPPETS).map(String::as_str).collect();
		prompt.push_str(&format!(" Context from past chats: {}", snippets.join("; ")));
	}
	let window = &inputs.recent_emotions[inputs.recent_emotions.len().saturating_sub(RECENT_EMOTION_WINDOW)..];
	let top = most_common(window.iter(), 2);
	if !top.is_empty() {
		let parts: Vec<String> = top.iter().map(|(e, c)| format!("{} ({})", e, c)).collect();
		prompt.push_str(&format!(" Recent emotional patterns: {}", parts.join(", ")));
	}
	(prompt, tier.max_tokens)
}
