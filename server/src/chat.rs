use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ApiError, ApiResult};
use crate::llm::{ChatModel, CompletionRequest, Message, TEMPERATURE};
use crate::memory::{Role, UserMetadata};
use crate::prompt::{build_system_prompt, PromptInputs};
use crate::AppState;

/// Turns forwarded to the model after the system prompt, the current
/// message included.
pub const CONTEXT_TURNS: usize = 6;
const SUMMARY_TAIL: usize = 5;

pub const NOT_CONFIGURED_REPLY: &str = "⚠️ The AI service is not properly configured. Please check the API key.";
pub const NO_RESPONSE_REPLY: &str = "I'm having trouble generating a response right now. Please try again.";
pub const FAILURE_REPLY: &str = "I'm experiencing some technical difficulties. Please try again in a moment.";

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummarySnapshot {
	pub total_messages: u64,
	pub recent_emotions: Vec<String>,
	pub recent_patterns: Vec<String>,
	pub dominant_themes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
	pub reply: String,
	pub metadata: UserMetadata,
	pub summary: SummarySnapshot,
	pub detected_emotion: String,
	pub recalled_context: usize,
}

/// One request: validate, remember, recall, prompt, respond, persist.
/// Nothing is rolled back if a later step fails.
pub async fn handle_chat(state: &AppState, req: ChatRequest) -> ApiResult<ChatResponse> {
	let message = req.message.trim().to_string();
	if message.is_empty() {
		return Err(ApiError::BadRequest("Message cannot be empty".to_string()));
	}
	let name = req.name.as_deref().map(str::trim).unwrap_or("");

	// Encode outside the lock; the embedder is a network call.
	let query_vec = state.recall.encode(&message).await;

	let (messages, max_tokens, recalled_count) = {
		let mut mem = state.memory.lock().await;
		mem.set_name(name)?;
		let recalled = state.recall.recall(&message, query_vec.as_deref(), &mem.embeddings);
		let recent_emotions = mem.summary.recent_emotions(SUMMARY_TAIL);
		let (system, max_tokens) = build_system_prompt(&PromptInputs {
			message: &message,
			user_name: mem.metadata.name.as_deref(),
			recalled: &recalled,
			recent_emotions: &recent_emotions,
		});
		let mut messages = vec![Message::system(system)];
		messages.extend(mem.recent_history(CONTEXT_TURNS - 1).iter().map(Message::from));
		messages.push(Message { role: "user", content: message.clone() });
		(messages, max_tokens, recalled.len())
	};
	debug!(recalled = recalled_count, turns = messages.len(), max_tokens, strategy = state.recall.kind(), "prompt assembled");

	let reply = generate_reply(state.llm.as_deref(), messages, max_tokens).await;
	let reply_vec = state.recall.encode(&reply).await;
	let emotion = state.lexicon.classify_emotion(&message);

	// both turns go in together so concurrent requests never interleave
	let mut mem = state.memory.lock().await;
	mem.append_turn(Role::User, &message, query_vec);
	mem.append_turn(Role::Assistant, &reply, reply_vec);
	mem.record_user_message(&state.lexicon, &message, &emotion)?;
	mem.persist_conversation()?;

	Ok(ChatResponse {
		reply,
		metadata: mem.metadata.clone(),
		summary: SummarySnapshot {
			total_messages: mem.summary.total_messages,
			recent_emotions: mem.summary.recent_emotions(SUMMARY_TAIL),
			recent_patterns: mem.summary.recent_patterns(SUMMARY_TAIL),
			dominant_themes: mem.summary.dominant_themes.clone(),
		},
		detected_emotion: emotion,
		recalled_context: recalled_count,
	})
}

/// Model failures never propagate: each degrades to a fixed reply.
async fn generate_reply(model: Option<&dyn ChatModel>, messages: Vec<Message>, max_tokens: u32) -> String {
	let Some(model) = model else {
		warn!("chat model not configured");
		return NOT_CONFIGURED_REPLY.to_string();
	};
	match model.complete(CompletionRequest { messages, max_tokens, temperature: TEMPERATURE }).await {
		Ok(Some(text)) if !text.is_empty() => text,
		Ok(_) => {
			warn!("chat model returned no choices");
			NO_RESPONSE_REPLY.to_string()
		}
		Err(err) => {
			warn!(%err, "chat model call failed");
			FAILURE_REPLY.to_string()
		}
	}
}
