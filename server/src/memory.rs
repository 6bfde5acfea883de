use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lexicon::Lexicon;
use crate::storage;

pub const HISTORY_FILE: &str = "chat_history.json";
pub const EMBEDDINGS_FILE: &str = "embeddings.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const SUMMARY_FILE: &str = "summary.json";

pub const EMOTION_CAP: usize = 50;
pub const PATTERN_CAP: usize = 100;
pub const KEYWORD_CAP: usize = 100;
pub const THEME_COUNT: usize = 5;
/// Themes are only recomputed once the keyword pool is larger than this.
pub const THEME_MIN_POOL: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
	User,
	Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
	pub role: Role,
	pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
	#[serde(rename = "type")]
	pub kind: Role,
	pub content: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub embedding: Option<Vec<f32>>,
	pub message_id: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMetadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub last_updated: Option<DateTime<Utc>>,
}

/// Rolling aggregate over user messages. Every list is a FIFO ring trimmed
/// from the front.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
	#[serde(default)]
	pub total_messages: u64,
	#[serde(default)]
	pub dominant_emotions: VecDeque<String>,
	#[serde(default)]
	pub emotion_count: BTreeMap<String, u64>,
	#[serde(default)]
	pub life_patterns: VecDeque<String>,
	#[serde(default)]
	pub keywords: VecDeque<String>,
	#[serde(default)]
	pub dominant_themes: Vec<String>,
	#[serde(default = "Utc::now")]
	pub last_updated: DateTime<Utc>,
}

impl Default for Summary {
	fn default() -> Self {
		Self {
			total_messages: 0,
			dominant_emotions: VecDeque::new(),
			emotion_count: BTreeMap::new(),
			life_patterns: VecDeque::new(),
			keywords: VecDeque::new(),
			dominant_themes: Vec::new(),
			last_updated: Utc::now(),
		}
	}
}

fn push_bounded<T>(ring: &mut VecDeque<T>, item: T, cap: usize) {
	ring.push_back(item);
	while ring.len() > cap { ring.pop_front(); }
}

fn trim_front<T>(ring: &mut VecDeque<T>, cap: usize) {
	while ring.len() > cap { ring.pop_front(); }
}

fn tail<T: Clone>(ring: &VecDeque<T>, n: usize) -> Vec<T> {
	ring.iter().skip(ring.len().saturating_sub(n)).cloned().collect()
}

/// Most frequent items first; equal counts keep first-seen order.
pub fn most_common<'a, I>(items: I, n: usize) -> Vec<(String, usize)>
where
	I: IntoIterator<Item = &'a String>,
{
	let mut order: Vec<&String> = Vec::new();
	let mut counts: HashMap<&String, usize> = HashMap::new();
	for it in items {
		let c = counts.entry(it).or_insert(0);
		if *c == 0 { order.push(it); }
		*c += 1;
	}
	let mut ranked: Vec<(String, usize)> = order.into_iter().map(|k| (k.clone(), counts[k])).collect();
	ranked.sort_by(|a, b| b.1.cmp(&a.1));
	ranked.truncate(n);
	ranked
}

impl Summary {
	pub fn update(&mut self, lexicon: &Lexicon, text: &str, emotion: &str) {
		self.total_messages += 1;
		self.last_updated = Utc::now();
		push_bounded(&mut self.dominant_emotions, emotion.to_string(), EMOTION_CAP);
		*self.emotion_count.entry(emotion.to_string()).or_insert(0) += 1;
		for tag in lexicon.detect_patterns(text) {
			push_bounded(&mut self.life_patterns, tag, PATTERN_CAP);
		}
		for kw in lexicon.extract_keywords(text) {
			push_bounded(&mut self.keywords, kw, KEYWORD_CAP);
		}
		if self.keywords.len() > THEME_MIN_POOL {
			self.dominant_themes = most_common(self.keywords.iter(), THEME_COUNT).into_iter().map(|(w, _)| w).collect();
		}
	}

	/// Re-apply ring caps, for documents written by older builds.
	fn normalize(&mut self) {
		trim_front(&mut self.dominant_emotions, EMOTION_CAP);
		trim_front(&mut self.life_patterns, PATTERN_CAP);
		trim_front(&mut self.keywords, KEYWORD_CAP);
		self.dominant_themes.truncate(THEME_COUNT);
	}

	pub fn recent_emotions(&self, n: usize) -> Vec<String> { tail(&self.dominant_emotions, n) }

	pub fn recent_patterns(&self, n: usize) -> Vec<String> { tail(&self.life_patterns, n) }
}

/// Owns the conversational memory files under one directory. Each mutation
/// rewrites only the files it touched.
pub struct MemoryStore {
	dir: PathBuf,
	pub history: Vec<ChatTurn>,
	pub embeddings: Vec<EmbeddingRecord>,
	pub metadata: UserMetadata,
	pub summary: Summary,
}

impl MemoryStore {
	pub fn open(dir: &Path) -> Result<Self> {
		std::fs::create_dir_all(dir)?;
		let mut summary: Summary = storage::load_or(&dir.join(SUMMARY_FILE), Summary::default());
		summary.normalize();
		Ok(Self {
			dir: dir.to_path_buf(),
			history: storage::load_or(&dir.join(HISTORY_FILE), Vec::new()),
			embeddings: storage::load_or(&dir.join(EMBEDDINGS_FILE), Vec::new()),
			metadata: storage::load_or(&dir.join(METADATA_FILE), UserMetadata::default()),
			summary,
		})
	}

	/// Store `name` if it differs from the current one. Returns whether it changed.
	pub fn set_name(&mut self, name: &str) -> Result<bool> {
		if name.is_empty() || self.metadata.name.as_deref() == Some(name) {
			return Ok(false);
		}
		self.metadata.name = Some(name.to_string());
		self.metadata.last_updated = Some(Utc::now());
		storage::save(&self.dir.join(METADATA_FILE), &self.metadata)?;
		Ok(true)
	}

	/// Append a turn to history and its parallel record. Not persisted until
	/// `persist_conversation`.
	pub fn append_turn(&mut self, role: Role, content: &str, embedding: Option<Vec<f32>>) {
		self.history.push(ChatTurn { role, content: content.to_string() });
		let message_id = self.embeddings.len() as u64;
		self.embeddings.push(EmbeddingRecord { kind: role, content: content.to_string(), embedding, message_id });
	}

	pub fn recent_history(&self, n: usize) -> &[ChatTurn] {
		&self.history[self.history.len().saturating_sub(n)..]
	}

	pub fn record_user_message(&mut self, lexicon: &Lexicon, text: &str, emotion: &str) -> Result<()> {
		self.summary.update(lexicon, text, emotion);
		storage::save(&self.dir.join(SUMMARY_FILE), &self.summary)
	}

	pub fn persist_conversation(&self) -> Result<()> {
		storage::save(&self.dir.join(HISTORY_FILE), &self.history)?;
		storage::save(&self.dir.join(EMBEDDINGS_FILE), &self.embeddings)
	}

	pub fn reset(&mut self) -> Result<()> {
		self.history.clear();
		self.embeddings.clear();
		self.metadata = UserMetadata::default();
		self.summary = Summary::default();
		self.persist_conversation()?;
		storage::save(&self.dir.join(METADATA_FILE), &self.metadata)?;
		storage::save(&self.dir.join(SUMMARY_FILE), &self.summary)
	}
}
