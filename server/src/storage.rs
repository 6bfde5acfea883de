use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Load a JSON document, returning `fallback` when the file is missing or
/// unreadable.
pub fn load_or<T: DeserializeOwned>(path: &Path, fallback: T) -> T {
	if !path.exists() {
		return fallback;
	}
	match fs::read(path).map_err(anyhow::Error::from).and_then(|raw| serde_json::from_slice::<T>(&raw).map_err(anyhow::Error::from)) {
		Ok(v) => v,
		Err(err) => {
			warn!(path = %path.display(), %err, "failed to load json file, using fallback");
			fallback
		}
	}
}

/// Rewrite `path` wholesale: pretty JSON into a sibling temp file, then rename.
pub fn save<T: Serialize>(path: &Path, data: &T) -> Result<()> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			fs::create_dir_all(parent)?;
		}
	}
	let body = serde_json::to_vec_pretty(data)?;
	let tmp = path.with_extension("json.tmp");
	fs::write(&tmp, body).with_context(|| format!("write {}", tmp.display()))?;
	fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))?;
	Ok(())
}

/// Rename, falling back to copy + remove when source and target live on
/// different filesystems.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
	if fs::rename(from, to).is_ok() {
		return Ok(());
	}
	fs::copy(from, to).with_context(|| format!("copy {} -> {}", from.display(), to.display()))?;
	fs::remove_file(from).with_context(|| format!("remove {}", from.display()))?;
	Ok(())
}
