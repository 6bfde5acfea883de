use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::Config;
use crate::embeddings::{Embedder, HttpEmbedder};
use crate::memory::{EmbeddingRecord, Role};
use crate::vector_index;

pub const MAX_RECALL: usize = 3;
pub const MIN_SIMILARITY: f32 = 0.3;
/// Shared words must be longer than this to count as overlap.
const MIN_OVERLAP_WORD_LEN: usize = 3;

/// How past user turns are retrieved for a new message.
#[async_trait]
pub trait RecallStrategy: Send + Sync {
	/// `"embedding"` or `"keyword"`.
	fn kind(&self) -> &'static str;

	/// Vector stored alongside a turn. `None` when this strategy keeps no
	/// vectors or encoding failed.
	async fn encode(&self, text: &str) -> Option<Vec<f32>>;

	/// Up to three earlier user texts, most relevant first.
	fn recall(&self, query: &str, query_vec: Option<&[f32]>, past: &[EmbeddingRecord]) -> Vec<String>;
}

pub struct EmbeddingRecall {
	embedder: Arc<dyn Embedder>,
}

impl EmbeddingRecall {
	pub fn new(embedder: Arc<dyn Embedder>) -> Self { Self { embedder } }
}

#[async_trait]
impl RecallStrategy for EmbeddingRecall {
	fn kind(&self) -> &'static str { "embedding" }

	async fn encode(&self, text: &str) -> Option<Vec<f32>> {
		match self.embedder.embed(text).await {
			Ok(v) => Some(v),
			Err(err) => {
				warn!(model = self.embedder.model_id(), %err, "embedding failed");
				None
			}
		}
	}

	fn recall(&self, query: &str, query_vec: Option<&[f32]>, past: &[EmbeddingRecord]) -> Vec<String> {
		match query_vec {
			Some(q) => vector_index::search_user_records(past, q, MAX_RECALL, MIN_SIMILARITY)
				.into_iter()
				.map(|(i, _)| past[i].content.clone())
				.collect(),
			// The model was unreachable for this message; lexical overlap still works.
			None => keyword_overlap(query, past),
		}
	}
}

pub struct KeywordRecall;

#[async_trait]
impl RecallStrategy for KeywordRecall {
	fn kind(&self) -> &'static str { "keyword" }

	async fn encode(&self, _text: &str) -> Option<Vec<f32>> {
		None
	}

	fn recall(&self, query: &str, _query_vec: Option<&[f32]>, past: &[EmbeddingRecord]) -> Vec<String> {
		keyword_overlap(query, past)
	}
}

fn word_set(text: &str) -> HashSet<String> {
	text.to_lowercase().split_whitespace().map(|w| w.to_string()).collect()
}

/// Rank past user texts by count of shared words longer than three
/// characters; equal scores keep conversation order.
pub fn keyword_overlap(query: &str, past: &[EmbeddingRecord]) -> Vec<String> {
	let query_words = word_set(query);
	let mut scored: Vec<(&str, usize)> = past
		.iter()
		.filter(|rec| rec.kind == Role::User)
		.filter_map(|rec| {
			let overlap = word_set(&rec.content)
				.intersection(&query_words)
				.filter(|w| w.chars().count() > MIN_OVERLAP_WORD_LEN)
				.count();
			(overlap > 0).then_some((rec.content.as_str(), overlap))
		})
		.collect();
	scored.sort_by(|a, b| b.1.cmp(&a.1));
	scored.into_iter().take(MAX_RECALL).map(|(c, _)| c.to_string()).collect()
}

/// Embedding recall when an embedder is configured and answers a test encode,
/// keyword overlap otherwise.
pub async fn select(config: &Config) -> Arc<dyn RecallStrategy> {
	let Some(url) = config.embedding_url.as_deref() else {
		info!("no embedding endpoint configured, using keyword recall");
		return Arc::new(KeywordRecall);
	};
	let embedder = match HttpEmbedder::new(url, &config.embedding_model, config.embedding_api_key.clone(), Duration::from_secs(config.upstream_timeout_secs)) {
		Ok(e) => e,
		Err(err) => {
			warn!(%err, "failed to build embedding client, using keyword recall");
			return Arc::new(KeywordRecall);
		}
	};
	match embedder.embed("ping").await {
		Ok(v) => {
			info!(model = %config.embedding_model, dim = v.len(), "embedding recall enabled");
			Arc::new(EmbeddingRecall::new(Arc::new(embedder)))
		}
		Err(err) => {
			warn!(%err, "embedding endpoint unavailable, using keyword recall");
			Arc::new(KeywordRecall)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::embeddings::testing::{BrokenEmbedder, LetterEmbedder};

	fn user(content: &str, embedding: Option<Vec<f32>>) -> EmbeddingRecord {
		EmbeddingRecord { kind: Role::User, content: content.to_string(), embedding, message_id: 0 }
	}

	fn assistant(content: &str) -> EmbeddingRecord {
		EmbeddingRecord { kind: Role::Assistant, content: content.to_string(), embedding: None, message_id: 0 }
	}

	#[test]
	fn keyword_overlap_ranks_by_shared_long_words() {
		let past = vec![
			user("my garden is lovely", None),
			assistant("garden talk is lovely"),
			user("the garden needs water and sunlight", None),
			user("cats are fun", None),
			user("sunlight in the garden makes flowers", None),
		];
		let got = keyword_overlap("Garden sunlight for flowers", &past);
		assert_eq!(got, vec![
			"sunlight in the garden makes flowers".to_string(),
			"the garden needs water and sunlight".to_string(),
			"my garden is lovely".to_string(),
		]);
	}

	#[test]
	fn keyword_overlap_ignores_short_words() {
		let past = vec![user("the cat sat on a mat", None)];
		assert!(keyword_overlap("the cat and the mat", &past).is_empty());
	}

	#[test]
	fn keyword_overlap_caps_at_three() {
		let past: Vec<EmbeddingRecord> = (0..6).map(|i| user(&format!("weekend plans {}", i), None)).collect();
		let got = keyword_overlap("weekend hiking", &past);
		assert_eq!(got.len(), MAX_RECALL);
		assert_eq!(got[0], "weekend plans 0");
	}

	#[tokio::test]
	async fn embedding_recall_uses_similarity_threshold() {
		let strategy = EmbeddingRecall::new(Arc::new(LetterEmbedder));
		let past = vec![
			user("aaaa", Some(LetterEmbedder::vector("aaaa"))),
			user("zzzz", Some(LetterEmbedder::vector("zzzz"))),
			user("aaab", Some(LetterEmbedder::vector("aaab"))),
		];
		let q = strategy.encode("aaaa").await;
		assert!(q.is_some());
		let got = strategy.recall("aaaa", q.as_deref(), &past);
		assert_eq!(got, vec!["aaaa".to_string(), "aaab".to_string()]);
	}

	#[tokio::test]
	async fn broken_embedder_degrades_to_keyword_overlap() {
		let strategy = EmbeddingRecall::new(Arc::new(BrokenEmbedder));
		let q = strategy.encode("weekend hiking").await;
		assert!(q.is_none());
		let past = vec![user("weekend trip", None)];
		assert_eq!(strategy.recall("weekend hiking", None, &past), vec!["weekend trip".to_string()]);
	}

	#[tokio::test]
	async fn select_without_endpoint_is_keyword() {
		let cfg = Config::offline("/tmp/unused");
		assert_eq!(select(&cfg).await.kind(), "keyword");
		assert!(KeywordRecall.encode("x").await.is_none());
	}
}
