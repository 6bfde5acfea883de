use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_MAX_APK_MB: u64 = 100;

#[derive(Debug, Clone)]
pub struct Config {
	pub bind: SocketAddr,
	pub data_dir: PathBuf,
	pub groq_api_key: Option<String>,
	pub groq_model: String,
	pub groq_base_url: String,
	pub embedding_url: Option<String>,
	pub embedding_model: String,
	pub embedding_api_key: Option<String>,
	pub lexicon_path: Option<PathBuf>,
	pub max_apk_size: u64,
	pub upstream_timeout_secs: u64,
}

impl Config {
	pub fn load() -> anyhow::Result<Self> {
		let _ = dotenvy::dotenv();
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Build from any key lookup. Invalid numbers fall back to defaults; an
	/// unparsable bind address is an error.
	pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
		let non_empty = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
		let mut cfg = Self::offline(non_empty("DATA_DIR").unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()));

		let port = non_empty("PORT").and_then(|p| p.parse::<u16>().ok());
		let bind = match port {
			Some(p) => format!("0.0.0.0:{}", p),
			None => non_empty("HTTP_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
		};
		cfg.bind = bind.parse().with_context(|| format!("invalid bind address '{}'", bind))?;

		cfg.groq_api_key = non_empty("GROQ_API_KEY");
		if let Some(v) = non_empty("GROQ_MODEL") { cfg.groq_model = v; }
		if let Some(v) = non_empty("GROQ_BASE_URL") { cfg.groq_base_url = v; }
		cfg.embedding_url = non_empty("EMBEDDING_URL");
		if let Some(v) = non_empty("EMBEDDING_MODEL") { cfg.embedding_model = v; }
		cfg.embedding_api_key = non_empty("EMBEDDING_API_KEY");
		cfg.lexicon_path = non_empty("LEXICON_PATH").map(PathBuf::from);
		let max_apk_mb = non_empty("MAX_APK_SIZE_MB").and_then(|v| v.parse::<u64>().ok()).unwrap_or(DEFAULT_MAX_APK_MB);
		cfg.max_apk_size = max_apk_mb.saturating_mul(1024 * 1024);
		if let Some(secs) = non_empty("UPSTREAM_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
			cfg.upstream_timeout_secs = secs;
		}
		Ok(cfg)
	}

	/// Defaults with no upstream services configured.
	pub fn offline(data_dir: impl Into<PathBuf>) -> Self {
		Self {
			bind: SocketAddr::from(([127, 0, 0, 1], 8000)),
			data_dir: data_dir.into(),
			groq_api_key: None,
			groq_model: "llama3-70b-8192".to_string(),
			groq_base_url: "https://api.groq.com/openai/v1".to_string(),
			embedding_url: None,
			embedding_model: "all-MiniLM-L6-v2".to_string(),
			embedding_api_key: None,
			lexicon_path: None,
			max_apk_size: DEFAULT_MAX_APK_MB * 1024 * 1024,
			upstream_timeout_secs: 60,
		}
	}
}
