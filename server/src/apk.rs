use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::storage;

pub const REGISTRY_FILE: &str = "apk_registry.json";
pub const STORAGE_DIR: &str = "apk_storage";
pub const APK_MIME: &str = "application/vnd.android.package-archive";
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
	Release,
	Beta,
	Archive,
}

impl Channel {
	pub const ALL: [Channel; 3] = [Channel::Release, Channel::Beta, Channel::Archive];

	pub fn as_str(self) -> &'static str {
		match self {
			Channel::Release => "release",
			Channel::Beta => "beta",
			Channel::Archive => "archive",
		}
	}

	fn dir_name(self) -> &'static str {
		match self {
			Channel::Release => "releases",
			Channel::Beta => "beta",
			Channel::Archive => "archive",
		}
	}
}

impl fmt::Display for Channel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

impl FromStr for Channel {
	type Err = ApiError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim() {
			"release" => Ok(Channel::Release),
			"beta" => Ok(Channel::Beta),
			"archive" => Ok(Channel::Archive),
			_ => Err(ApiError::BadRequest("Invalid channel. Must be 'release', 'beta', or 'archive'".to_string())),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApkRecord {
	pub apk_id: String,
	pub filename: String,
	pub original_filename: String,
	pub version: String,
	pub channel: Channel,
	pub upload_date: DateTime<Utc>,
	pub file_size: u64,
	pub file_hash: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub download_count: u64,
	pub is_active: bool,
	pub file_path: PathBuf,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub deleted_date: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub archived_date: Option<DateTime<Utc>>,
}

/// Public shape of a record: no server-side path.
#[derive(Debug, Clone, Serialize)]
pub struct ApkView {
	pub apk_id: String,
	pub filename: String,
	pub original_filename: String,
	pub version: String,
	pub channel: Channel,
	pub upload_date: DateTime<Utc>,
	pub file_size: u64,
	pub file_hash: String,
	pub description: String,
	pub download_count: u64,
	pub is_active: bool,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub deleted_date: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub archived_date: Option<DateTime<Utc>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub download_url: Option<String>,
}

pub fn download_url(apk_id: &str) -> String { format!("/apk/download/{}", apk_id) }

impl ApkRecord {
	pub fn view(&self, with_url: bool) -> ApkView {
		ApkView {
			apk_id: self.apk_id.clone(),
			filename: self.filename.clone(),
			original_filename: self.original_filename.clone(),
			version: self.version.clone(),
			channel: self.channel,
			upload_date: self.upload_date,
			file_size: self.file_size,
			file_hash: self.file_hash.clone(),
			description: self.description.clone(),
			download_count: self.download_count,
			is_active: self.is_active,
			deleted_date: self.deleted_date,
			archived_date: self.archived_date,
			download_url: with_url.then(|| download_url(&self.apk_id)),
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApkRegistry {
	#[serde(default)]
	pub apks: Vec<ApkRecord>,
	#[serde(default)]
	pub last_updated: Option<DateTime<Utc>>,
	#[serde(default)]
	pub total_uploads: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApkValidation {
	pub file_size: u64,
	pub file_hash: String,
	pub mime_type: &'static str,
}

/// Extension and size are enforced; the MIME sniff only warns.
pub fn validate_apk(path: &Path, original_filename: &str, max_size: u64) -> ApiResult<ApkValidation> {
	if !original_filename.to_lowercase().ends_with(".apk") {
		return Err(ApiError::BadRequest("File must have .apk extension".to_string()));
	}
	let file_size = fs::metadata(path).map_err(anyhow::Error::from)?.len();
	if file_size > max_size {
		return Err(ApiError::BadRequest(format!("File size ({} bytes) exceeds maximum allowed size ({} bytes)", file_size, max_size)));
	}
	let mut file = fs::File::open(path).map_err(anyhow::Error::from)?;
	let mut hasher = Sha256::new();
	let mut head = Vec::with_capacity(4);
	let mut buf = [0u8; 8192];
	loop {
		let n = file.read(&mut buf).map_err(anyhow::Error::from)?;
		if n == 0 { break; }
		if head.len() < 4 {
			let take = (4 - head.len()).min(n);
			head.extend_from_slice(&buf[..take]);
		}
		hasher.update(&buf[..n]);
	}
	let mime_type = if head.as_slice() == ZIP_MAGIC {
		APK_MIME
	} else {
		warn!(file = original_filename, "upload does not look like a zip archive");
		"application/octet-stream"
	};
	Ok(ApkValidation { file_size, file_hash: format!("{:x}", hasher.finalize()), mime_type })
}

/// Bumps the last dotted segment; non-numeric tails restart at 1.0.1.
pub fn next_version(latest: Option<&str>) -> String {
	let Some(latest) = latest else { return "1.0.0".to_string() };
	let mut parts: Vec<String> = latest.split('.').map(|s| s.to_string()).collect();
	match parts.last().and_then(|p| p.parse::<u64>().ok()) {
		Some(n) => {
			if let Some(last) = parts.last_mut() { *last = (n + 1).to_string(); }
			parts.join(".")
		}
		None => "1.0.1".to_string(),
	}
}

fn valid_version(v: &str) -> bool {
	!v.is_empty() && v.len() <= 64 && !v.contains("..") && v.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+'))
}

/// Client-supplied name with any directory components removed.
fn bare_file_name(original: &str) -> &str {
	original.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(original)
}

/// A staged upload on disk, removed on drop unless it has been moved away.
pub struct StagedUpload {
	path: PathBuf,
}

impl StagedUpload {
	pub fn new(dir: &Path) -> Self {
		Self { path: dir.join(format!("temp_{}.apk", Uuid::new_v4())) }
	}

	pub fn path(&self) -> &Path { &self.path }
}

impl Drop for StagedUpload {
	fn drop(&mut self) {
		if self.path.exists() {
			let _ = fs::remove_file(&self.path);
		}
	}
}

pub struct UploadRequest<'a> {
	pub original_filename: &'a str,
	pub version: Option<&'a str>,
	pub channel: Channel,
	pub description: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
	pub files_cleaned: usize,
	pub records_removed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApkStats {
	pub total_apks: usize,
	pub active_apks: usize,
	pub inactive_apks: usize,
	pub total_size: u64,
	pub total_size_mb: f64,
	pub channels: BTreeMap<&'static str, usize>,
	pub channel_sizes: BTreeMap<&'static str, u64>,
	pub total_downloads: u64,
	pub total_uploads: u64,
}

/// JSON-backed APK registry plus the `apk_storage/{releases,beta,archive}` tree.
pub struct ApkStore {
	root: PathBuf,
	registry_path: PathBuf,
	max_size: u64,
	registry: ApkRegistry,
}

impl ApkStore {
	pub fn open(data_dir: &Path, max_size: u64) -> Result<Self> {
		let root = data_dir.join(STORAGE_DIR);
		for ch in Channel::ALL {
			fs::create_dir_all(root.join(ch.dir_name()))?;
		}
		let registry_path = data_dir.join(REGISTRY_FILE);
		let registry = storage::load_or(&registry_path, ApkRegistry::default());
		info!(apks = registry.apks.len(), root = %root.display(), "apk registry loaded");
		Ok(Self { root, registry_path, max_size, registry })
	}

	pub fn staging_dir(&self) -> &Path { &self.root }

	pub fn max_size(&self) -> u64 { self.max_size }

	pub fn channel_dir(&self, channel: Channel) -> PathBuf { self.root.join(channel.dir_name()) }

	pub fn records(&self) -> &[ApkRecord] { &self.registry.apks }

	fn persist(&mut self) -> Result<()> {
		self.registry.last_updated = Some(Utc::now());
		storage::save(&self.registry_path, &self.registry)
	}

	pub fn get(&self, apk_id: &str) -> Option<&ApkRecord> {
		self.registry.apks.iter().find(|a| a.apk_id == apk_id)
	}

	fn get_mut(&mut self, apk_id: &str) -> Option<&mut ApkRecord> {
		self.registry.apks.iter_mut().find(|a| a.apk_id == apk_id)
	}

	pub fn latest(&self, channel: Channel) -> Option<&ApkRecord> {
		self.registry.apks.iter().filter(|a| a.is_active && a.channel == channel).max_by_key(|a| a.upload_date)
	}

	fn active_version_exists(&self, version: &str, channel: Channel) -> bool {
		self.registry.apks.iter().any(|a| a.is_active && a.channel == channel && a.version == version)
	}

	/// Validate the staged file and register it. The staged file is moved
	/// into the channel directory only once every check has passed.
	pub fn upload(&mut self, staged: &Path, req: UploadRequest<'_>) -> ApiResult<ApkRecord> {
		let original = bare_file_name(req.original_filename);
		let checked = validate_apk(staged, original, self.max_size)?;
		if self.registry.apks.iter().any(|a| a.is_active && a.file_hash == checked.file_hash) {
			return Err(ApiError::Conflict("APK with identical content already exists".to_string()));
		}
		let version = match req.version.map(str::trim).filter(|v| !v.is_empty()) {
			Some(v) => v.to_string(),
			None => next_version(self.latest(req.channel).map(|a| a.version.as_str())),
		};
		if !valid_version(&version) {
			return Err(ApiError::BadRequest(format!("Invalid version '{}'", version)));
		}
		if self.active_version_exists(&version, req.channel) {
			return Err(ApiError::Conflict(format!("Version {} already exists in {} channel", version, req.channel)));
		}

		let apk_id = Uuid::new_v4().to_string();
		let stem = original.rsplit_once('.').map(|(s, _)| s).unwrap_or(original);
		let mut filename = format!("{}-v{}.apk", stem, version);
		let dir = self.channel_dir(req.channel);
		// a soft-deleted upload may still own this name
		if dir.join(&filename).exists() {
			filename = format!("{}-v{}-{}.apk", stem, version, &apk_id[..8]);
		}
		let final_path = dir.join(&filename);
		storage::move_file(staged, &final_path)?;

		let record = ApkRecord {
			apk_id,
			filename,
			original_filename: original.to_string(),
			version,
			channel: req.channel,
			upload_date: Utc::now(),
			file_size: checked.file_size,
			file_hash: checked.file_hash,
			description: req.description.to_string(),
			download_count: 0,
			is_active: true,
			file_path: final_path,
			deleted_date: None,
			archived_date: None,
		};
		self.registry.apks.push(record.clone());
		self.registry.total_uploads += 1;
		self.persist()?;
		info!(apk_id = %record.apk_id, version = %record.version, channel = %record.channel, size = record.file_size, mime = checked.mime_type, "apk uploaded");
		Ok(record)
	}

	/// Newest first.
	pub fn list(&self, channel: Option<Channel>, active_only: bool) -> Vec<ApkView> {
		let mut out: Vec<ApkView> = self
			.registry
			.apks
			.iter()
			.filter(|a| channel.map_or(true, |c| a.channel == c))
			.filter(|a| !active_only || a.is_active)
			.map(|a| a.view(false))
			.collect();
		out.sort_by(|a, b| b.upload_date.cmp(&a.upload_date));
		out
	}

	/// Count the download and hand back the file to stream.
	pub fn begin_download(&mut self, apk_id: &str) -> ApiResult<(PathBuf, String)> {
		let rec = self.get_mut(apk_id).ok_or_else(|| ApiError::NotFound("APK not found".to_string()))?;
		if !rec.is_active {
			return Err(ApiError::Gone("APK is no longer available".to_string()));
		}
		if !rec.file_path.exists() {
			return Err(ApiError::NotFound("APK file not found on disk".to_string()));
		}
		rec.download_count += 1;
		let out = (rec.file_path.clone(), rec.filename.clone());
		self.persist()?;
		Ok(out)
	}

	/// Mark inactive; the file stays until `cleanup`.
	pub fn soft_delete(&mut self, apk_id: &str) -> ApiResult<()> {
		let rec = self.get_mut(apk_id).ok_or_else(|| ApiError::NotFound("APK not found".to_string()))?;
		rec.is_active = false;
		if rec.deleted_date.is_none() {
			rec.deleted_date = Some(Utc::now());
		}
		self.persist()?;
		Ok(())
	}

	/// Drop records deleted more than `days_old` days ago, with their files.
	pub fn cleanup(&mut self, days_old: i64) -> Result<CleanupReport> {
		// a threshold older than any representable date expires nothing
		let cutoff = Duration::try_days(days_old).and_then(|age| Utc::now().checked_sub_signed(age));
		let expired = |a: &ApkRecord| !a.is_active && matches!((a.deleted_date, cutoff), (Some(d), Some(c)) if d < c);
		let mut files_cleaned = 0usize;
		for apk in self.registry.apks.iter().filter(|a| expired(a)) {
			if !apk.file_path.exists() {
				continue;
			}
			match fs::remove_file(&apk.file_path) {
				Ok(()) => {
					info!(path = %apk.file_path.display(), "removed inactive apk");
					files_cleaned += 1;
				}
				Err(err) => error!(path = %apk.file_path.display(), %err, "failed to remove inactive apk"),
			}
		}
		let before = self.registry.apks.len();
		self.registry.apks.retain(|a| !expired(a));
		let records_removed = before - self.registry.apks.len();
		if records_removed > 0 {
			self.persist()?;
		}
		Ok(CleanupReport { files_cleaned, records_removed })
	}

	/// Keep the `keep` newest active uploads of release and beta; move the
	/// rest into the archive channel. Returns how many were moved.
	pub fn archive(&mut self, keep: usize) -> Result<usize> {
		let archive_dir = self.channel_dir(Channel::Archive);
		let mut archived = 0usize;
		for channel in [Channel::Release, Channel::Beta] {
			let mut idx: Vec<usize> = (0..self.registry.apks.len())
				.filter(|&i| self.registry.apks[i].is_active && self.registry.apks[i].channel == channel)
				.collect();
			idx.sort_by(|&a, &b| self.registry.apks[b].upload_date.cmp(&self.registry.apks[a].upload_date));
			for &i in idx.iter().skip(keep) {
				let version = {
					let apk = &self.registry.apks[i];
					if !apk.file_path.exists() {
						warn!(apk_id = %apk.apk_id, path = %apk.file_path.display(), "skipping archive, file missing");
						continue;
					}
					self.archive_version(&apk.version, channel, &apk.apk_id)
				};
				let apk = &mut self.registry.apks[i];
				let mut new_name = format!("archived_{}", apk.filename);
				if archive_dir.join(&new_name).exists() {
					new_name = format!("archived_{}_{}", &apk.apk_id[..8.min(apk.apk_id.len())], apk.filename);
				}
				let new_path = archive_dir.join(&new_name);
				if let Err(err) = storage::move_file(&apk.file_path, &new_path) {
					warn!(apk_id = %apk.apk_id, %err, "failed to archive apk");
					continue;
				}
				info!(version = %apk.version, from = %channel, "archived apk");
				apk.channel = Channel::Archive;
				apk.version = version;
				apk.file_path = new_path;
				apk.filename = new_name;
				apk.archived_date = Some(Utc::now());
				archived += 1;
			}
		}
		if archived > 0 {
			self.persist()?;
		}
		Ok(archived)
	}

	/// Version an archived record takes so that active archive versions stay
	/// unique; release and beta may both hold the same version.
	fn archive_version(&self, version: &str, from: Channel, apk_id: &str) -> String {
		if !self.active_version_exists(version, Channel::Archive) {
			return version.to_string();
		}
		let tagged = format!("{}-{}", version, from);
		if !self.active_version_exists(&tagged, Channel::Archive) {
			return tagged;
		}
		format!("{}-{}", tagged, &apk_id[..8.min(apk_id.len())])
	}

	pub fn stats(&self) -> ApkStats {
		let apks = &self.registry.apks;
		let mut channels: BTreeMap<&'static str, usize> = Channel::ALL.iter().map(|c| (c.as_str(), 0)).collect();
		let mut channel_sizes: BTreeMap<&'static str, u64> = Channel::ALL.iter().map(|c| (c.as_str(), 0)).collect();
		let mut total_size = 0u64;
		for a in apks.iter().filter(|a| a.is_active) {
			total_size += a.file_size;
			*channels.entry(a.channel.as_str()).or_insert(0) += 1;
			*channel_sizes.entry(a.channel.as_str()).or_insert(0) += a.file_size;
		}
		let active_apks = apks.iter().filter(|a| a.is_active).count();
		ApkStats {
			total_apks: apks.len(),
			active_apks,
			inactive_apks: apks.len() - active_apks,
			total_size,
			total_size_mb: (total_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0,
			channels,
			channel_sizes,
			total_downloads: apks.iter().map(|a| a.download_count).sum(),
			total_uploads: self.registry.total_uploads,
		}
	}

	/// Distinct channels present in a listing, sorted.
	pub fn channels_of(views: &[ApkView]) -> Vec<Channel> {
		views.iter().map(|v| v.channel).collect::<BTreeSet<_>>().into_iter().collect()
	}
}
