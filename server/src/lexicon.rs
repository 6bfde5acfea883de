use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const NEUTRAL: &str = "neutral";

/// One row of a keyword table. Row order is significant: it breaks ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRow {
	pub label: String,
	pub keywords: Vec<String>,
}

/// Keyword tables driving emotion tagging, life-pattern tagging and theme
/// extraction. Loadable from JSON so deployments can swap vocabularies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lexicon {
	pub emotions: Vec<KeywordRow>,
	pub patterns: Vec<KeywordRow>,
	#[serde(default)]
	pub stop_words: Vec<String>,
	#[serde(default = "default_min_keyword_len")]
	pub min_keyword_len: usize,
	#[serde(skip)]
	stop_set: HashSet<String>,
}

fn default_min_keyword_len() -> usize { 4 }

fn rows(table: &[(&str, &[&str])]) -> Vec<KeywordRow> {
	table.iter().map(|(label, kws)| KeywordRow { label: label.to_string(), keywords: kws.iter().map(|k| k.to_string()).collect() }).collect()
}

impl Default for Lexicon {
	fn default() -> Self {
		let emotions: &[(&str, &[&str])] = &[
			("sad", &["sad", "lonely", "hurt", "depressed", "down", "upset", "crying", "tears", "grief", "sorrow"]),
			("happy", &["happy", "excited", "joy", "great", "awesome", "wonderful", "amazing", "fantastic", "love", "thrilled"]),
			("angry", &["angry", "mad", "furious", "annoyed", "frustrated", "irritated", "rage", "hate", "pissed"]),
			("anxious", &["anxious", "worried", "nervous", "stressed", "panic", "fear", "scared", "overwhelmed"]),
			("grateful", &["grateful", "thankful", "blessed", "appreciate", "lucky", "fortunate"]),
			("confused", &["confused", "lost", "unclear", "don't understand", "puzzled", "bewildered"]),
			("hopeful", &["hopeful", "optimistic", "looking forward", "excited about", "can't wait", "positive"]),
		];
		let patterns: &[(&str, &[&str])] = &[
			("work_stress", &["work", "job", "boss", "deadline", "meeting", "project", "office", "career"]),
			("relationships", &["relationship", "partner", "boyfriend", "girlfriend", "dating", "marriage", "family"]),
			("health", &["health", "doctor", "sick", "exercise", "diet", "sleep", "tired", "energy"]),
			("personal_growth", &["learning", "growth", "change", "improve", "better", "goal", "dream", "future"]),
			("social", &["friends", "social", "party", "hangout", "lonely", "people", "community"]),
			("financial", &["money", "budget", "expensive", "cheap", "save", "spend", "financial", "cost"]),
		];
		let stop_words = [
			"the", "and", "but", "for", "are", "with", "this", "that", "have", "was", "were", "been", "their", "said",
			"each", "which", "what", "where", "when", "why", "how", "all", "any", "can", "had", "her", "his", "him",
			"she", "you", "your", "they", "them", "than", "then", "now", "will", "would", "could", "should", "just",
			"like", "time", "very", "even", "back", "after", "use", "two", "way", "may", "say", "new", "want",
			"because", "good", "first", "well", "year", "work", "life", "day", "get", "has", "old", "see", "more",
			"go", "no", "up", "out", "if", "about", "who", "oil", "sit", "not",
		];
		Self::new(rows(emotions), rows(patterns), stop_words.iter().map(|s| s.to_string()).collect(), default_min_keyword_len())
	}
}

impl Lexicon {
	pub fn new(emotions: Vec<KeywordRow>, patterns: Vec<KeywordRow>, stop_words: Vec<String>, min_keyword_len: usize) -> Self {
		let mut lex = Self { emotions, patterns, stop_words, min_keyword_len, stop_set: HashSet::new() };
		lex.reindex();
		lex
	}

	pub fn from_file(path: &Path) -> Result<Self> {
		let raw = std::fs::read(path).with_context(|| format!("read lexicon {}", path.display()))?;
		let mut lex: Lexicon = serde_json::from_slice(&raw).with_context(|| format!("parse lexicon {}", path.display()))?;
		lex.reindex();
		Ok(lex)
	}

	fn reindex(&mut self) {
		for row in self.emotions.iter_mut().chain(self.patterns.iter_mut()) {
			for kw in row.keywords.iter_mut() { *kw = kw.to_lowercase(); }
		}
		self.stop_set = self.stop_words.iter().map(|w| w.to_lowercase()).collect();
	}

	/// All labels `classify_emotion` can return.
	pub fn emotion_labels(&self) -> Vec<&str> {
		let mut out: Vec<&str> = self.emotions.iter().map(|r| r.label.as_str()).collect();
		if !out.contains(&NEUTRAL) { out.push(NEUTRAL); }
		out
	}

	/// Label with the most keyword hits; the earlier row wins a tie.
	pub fn classify_emotion(&self, text: &str) -> String {
		let lower = text.to_lowercase();
		let mut best: Option<(&str, usize)> = None;
		for row in &self.emotions {
			let score = row.keywords.iter().filter(|kw| lower.contains(kw.as_str())).count();
			if score == 0 { continue; }
			if best.map_or(true, |(_, s)| score > s) {
				best = Some((&row.label, score));
			}
		}
		best.map(|(label, _)| label.to_string()).unwrap_or_else(|| NEUTRAL.to_string())
	}

	/// Every pattern with at least one keyword present, in table order.
	pub fn detect_patterns(&self, text: &str) -> Vec<String> {
		let lower = text.to_lowercase();
		self.patterns
			.iter()
			.filter(|row| row.keywords.iter().any(|kw| lower.contains(kw.as_str())))
			.map(|row| row.label.clone())
			.collect()
	}

	/// Alphabetic words of at least `min_keyword_len` letters that are not stop words.
	pub fn extract_keywords(&self, text: &str) -> Vec<String> {
		static WORD: OnceLock<Regex> = OnceLock::new();
		let re = WORD.get_or_init(|| Regex::new(r"\b[a-zA-Z]+\b").expect("word regex"));
		let lower = text.to_lowercase();
		re.find_iter(&lower)
			.map(|m| m.as_str())
			.filter(|w| w.len() >= self.min_keyword_len && !self.stop_set.contains(*w))
			.map(|w| w.to_string())
			.collect()
	}
}
