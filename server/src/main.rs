use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Result;
use axum::{
	body::Body,
	extract::{DefaultBodyLimit, Multipart, Path, Query, State},
	http::header::{CONTENT_DISPOSITION, CONTENT_TYPE},
	response::Response,
	routing::{delete, get, post},
	Json, Router,
};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::io::ReaderStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod apk;
mod chat;
mod config;
mod embeddings;
mod error;
mod lexicon;
mod llm;
mod memory;
mod prompt;
mod recall;
mod storage;
mod vector_index;

use apk::{ApkStore, Channel, StagedUpload, UploadRequest, APK_MIME};
use chat::{ChatRequest, ChatResponse};
use config::Config;
use error::{ApiError, ApiResult};
use lexicon::Lexicon;
use llm::{ChatModel, GroqClient};
use memory::MemoryStore;
use recall::RecallStrategy;

/// Slack above the APK limit for multipart framing and text fields.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Parser, Debug)]
#[command(name = "companion-server", version, about = "Conversational companion with persistent memory and an APK distribution registry")]
struct Cli {
	/// Bind address, overrides PORT / HTTP_BIND
	#[arg(long)]
	bind: Option<SocketAddr>,

	/// Data directory root, overrides DATA_DIR
	#[arg(long)]
	data_dir: Option<PathBuf>,
}

struct AppState {
	config: Config,
	memory: AsyncMutex<MemoryStore>,
	apks: AsyncMutex<ApkStore>,
	recall: Arc<dyn RecallStrategy>,
	llm: Option<Arc<dyn ChatModel>>,
	lexicon: Lexicon,
}

#[tokio::main]
async fn main() -> Result<()> {
	init_tracing();
	let cli = Cli::parse();
	let mut config = Config::load()?;
	if let Some(bind) = cli.bind { config.bind = bind; }
	if let Some(dir) = cli.data_dir { config.data_dir = dir; }

	let bind_addr = config.bind;
	let state = build_state(config).await?;
	let app = build_router(state);
	let listener = tokio::net::TcpListener::bind(bind_addr).await?;
	info!(%bind_addr, "Starting HTTP server");
	axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
	info!("Shutdown complete");
	Ok(())
}

fn init_tracing() {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let fmt_layer = fmt::layer().with_target(false).with_ansi(false).with_writer(std::io::stderr);
	tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}

async fn build_state(config: Config) -> Result<Arc<AppState>> {
	let lexicon = match config.lexicon_path.as_deref() {
		Some(path) => Lexicon::from_file(path).unwrap_or_else(|err| {
			warn!(path = %path.display(), %err, "failed to load lexicon, using built-in tables");
			Lexicon::default()
		}),
		None => Lexicon::default(),
	};
	info!(emotions = ?lexicon.emotion_labels(), "lexicon ready");
	let memory = MemoryStore::open(&config.data_dir)?;
	let apks = ApkStore::open(&config.data_dir, config.max_apk_size)?;
	let recall = recall::select(&config).await;
	let llm: Option<Arc<dyn ChatModel>> = match GroqClient::from_config(&config) {
		Ok(Some(client)) => {
			info!(model = %config.groq_model, "chat model configured");
			Some(Arc::new(client))
		}
		Ok(None) => {
			warn!("GROQ_API_KEY not set, chat will answer with a configuration notice");
			None
		}
		Err(err) => {
			warn!(%err, "failed to build chat model client");
			None
		}
	};
	info!(data_dir = %config.data_dir.display(), history = memory.history.len(), apks = apks.records().len(), memory_type = recall.kind(), "state ready");
	Ok(Arc::new(AppState {
		config,
		memory: AsyncMutex::new(memory),
		apks: AsyncMutex::new(apks),
		recall,
		llm,
		lexicon,
	}))
}

fn build_router(state: Arc<AppState>) -> Router {
	let body_limit = usize::try_from(state.config.max_apk_size).unwrap_or(usize::MAX).saturating_add(MULTIPART_OVERHEAD);
	Router::new()
		.route("/", get(root))
		.route("/history", get(history))
		.route("/chat", post(chat_route))
		.route("/reset", post(reset))
		.route("/apk/upload", post(apk_upload))
		.route("/apk/list", get(apk_list))
		.route("/apk/download/:apk_id", get(apk_download))
		.route("/apk/latest", get(apk_latest))
		.route("/apk/info/:apk_id", get(apk_info))
		.route("/apk/delete/:apk_id", delete(apk_delete))
		.route("/apk/stats", get(apk_stats))
		.route("/apk/cleanup", post(apk_cleanup))
		.route("/apk/archive", post(apk_archive))
		.layer(DefaultBodyLimit::max(body_limit))
		.layer(CorsLayer::permissive())
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}

async fn root(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
	Json(json!({
		"message": "Companion server is running",
		"status": "healthy",
		"llm_available": state.llm.is_some(),
		"embeddings_available": state.recall.kind() == "embedding",
		"memory_type": state.recall.kind(),
	}))
}

async fn history(State(state): State<Arc<AppState>>) -> Json<JsonValue> {
	let mem = state.memory.lock().await;
	Json(json!({ "history": mem.history, "metadata": mem.metadata, "summary": mem.summary }))
}

async fn chat_route(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> ApiResult<Json<ChatResponse>> {
	chat::handle_chat(&state, req).await.map(Json)
}

async fn reset(State(state): State<Arc<AppState>>) -> ApiResult<Json<JsonValue>> {
	state.memory.lock().await.reset()?;
	info!("memory reset");
	Ok(Json(json!({ "message": "Memory reset successfully" })))
}

#[derive(Debug, Default, Deserialize)]
struct UploadQuery {
	version: Option<String>,
	channel: Option<String>,
	description: Option<String>,
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
	ApiError::BadRequest(format!("Invalid multipart body: {}", err))
}

/// Streams the `file` part to a staged temp file, enforcing the size limit
/// as bytes arrive, then hands it to the registry.
async fn apk_upload(State(state): State<Arc<AppState>>, Query(mut fields): Query<UploadQuery>, mut multipart: Multipart) -> ApiResult<Json<JsonValue>> {
	if let Some(ch) = fields.channel.as_deref() {
		ch.parse::<Channel>()?;
	}
	let (staging_dir, max_size) = {
		let apks = state.apks.lock().await;
		(apks.staging_dir().to_path_buf(), apks.max_size())
	};
	let staged = StagedUpload::new(&staging_dir);
	let mut original_filename: Option<String> = None;

	while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
		let name = field.name().unwrap_or_default().to_string();
		match name.as_str() {
			"file" => {
				original_filename = Some(field.file_name().unwrap_or_default().to_string());
				let mut out = tokio::fs::File::create(staged.path()).await.map_err(anyhow::Error::from)?;
				let mut written = 0u64;
				while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
					written += chunk.len() as u64;
					if written > max_size {
						return Err(ApiError::BadRequest(format!("File size exceeds maximum allowed size ({} bytes)", max_size)));
					}
					out.write_all(&chunk).await.map_err(anyhow::Error::from)?;
				}
				out.flush().await.map_err(anyhow::Error::from)?;
			}
			"version" => fields.version = Some(field.text().await.map_err(multipart_error)?),
			"channel" => fields.channel = Some(field.text().await.map_err(multipart_error)?),
			"description" => fields.description = Some(field.text().await.map_err(multipart_error)?),
			_ => {}
		}
	}

	let Some(original_filename) = original_filename else {
		return Err(ApiError::BadRequest("No file provided".to_string()));
	};
	let channel = match fields.channel.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
		Some(ch) => ch.parse::<Channel>()?,
		None => Channel::Release,
	};
	let record = state.apks.lock().await.upload(
		staged.path(),
		UploadRequest {
			original_filename: &original_filename,
			version: fields.version.as_deref(),
			channel,
			description: fields.description.as_deref().unwrap_or_default(),
		},
	)?;
	Ok(Json(json!({
		"message": "APK uploaded successfully",
		"apk_id": record.apk_id,
		"version": record.version,
		"channel": record.channel,
		"file_size": record.file_size,
		"download_url": apk::download_url(&record.apk_id),
	})))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
	channel: Option<String>,
	active_only: Option<bool>,
}

async fn apk_list(State(state): State<Arc<AppState>>, Query(q): Query<ListQuery>) -> ApiResult<Json<JsonValue>> {
	let channel = q.channel.as_deref().map(str::parse::<Channel>).transpose()?;
	let apks = state.apks.lock().await.list(channel, q.active_only.unwrap_or(true));
	let channels = ApkStore::channels_of(&apks);
	Ok(Json(json!({ "total_count": apks.len(), "channels": channels, "apks": apks })))
}

async fn apk_download(State(state): State<Arc<AppState>>, Path(apk_id): Path<String>) -> ApiResult<Response> {
	let (path, filename) = state.apks.lock().await.begin_download(&apk_id)?;
	let file = tokio::fs::File::open(&path).await.map_err(anyhow::Error::from)?;
	info!(%apk_id, file = %filename, "serving apk download");
	let response = axum::http::Response::builder()
		.header(CONTENT_TYPE, APK_MIME)
		.header(CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename.replace('"', "_")))
		.body(Body::from_stream(ReaderStream::new(file)))
		.map_err(anyhow::Error::from)?;
	Ok(response)
}

#[derive(Debug, Default, Deserialize)]
struct LatestQuery {
	channel: Option<String>,
}

async fn apk_latest(State(state): State<Arc<AppState>>, Query(q): Query<LatestQuery>) -> ApiResult<Json<JsonValue>> {
	let channel = q.channel.as_deref().map(str::parse::<Channel>).transpose()?.unwrap_or(Channel::Release);
	let apks = state.apks.lock().await;
	let latest = apks.latest(channel).ok_or_else(|| ApiError::NotFound(format!("No APK found in {} channel", channel)))?;
	Ok(Json(json!(latest.view(true))))
}

async fn apk_info(State(state): State<Arc<AppState>>, Path(apk_id): Path<String>) -> ApiResult<Json<JsonValue>> {
	let apks = state.apks.lock().await;
	let rec = apks.get(&apk_id).ok_or_else(|| ApiError::NotFound("APK not found".to_string()))?;
	Ok(Json(json!(rec.view(true))))
}

async fn apk_delete(State(state): State<Arc<AppState>>, Path(apk_id): Path<String>) -> ApiResult<Json<JsonValue>> {
	state.apks.lock().await.soft_delete(&apk_id)?;
	info!(%apk_id, "apk marked inactive");
	Ok(Json(json!({ "message": "APK marked as deleted", "apk_id": apk_id })))
}

async fn apk_stats(State(state): State<Arc<AppState>>) -> Json<apk::ApkStats> {
	Json(state.apks.lock().await.stats())
}

#[derive(Debug, Default, Deserialize)]
struct CleanupQuery {
	days_old: Option<i64>,
}

async fn apk_cleanup(State(state): State<Arc<AppState>>, Query(q): Query<CleanupQuery>) -> ApiResult<Json<JsonValue>> {
	let days_old = q.days_old.unwrap_or(30);
	if days_old < 1 {
		return Err(ApiError::BadRequest("days_old must be at least 1".to_string()));
	}
	let report = state.apks.lock().await.cleanup(days_old)?;
	info!(days_old, files = report.files_cleaned, records = report.records_removed, "apk cleanup finished");
	Ok(Json(json!({
		"message": format!("Cleaned up {} inactive APKs", report.records_removed),
		"files_cleaned": report.files_cleaned,
		"records_removed": report.records_removed,
		"days_old_threshold": days_old,
	})))
}

#[derive(Debug, Default, Deserialize)]
struct ArchiveQuery {
	keep_versions: Option<i64>,
}

async fn apk_archive(State(state): State<Arc<AppState>>, Query(q): Query<ArchiveQuery>) -> ApiResult<Json<JsonValue>> {
	let keep = q.keep_versions.unwrap_or(3);
	if keep < 1 {
		return Err(ApiError::BadRequest("keep_versions must be at least 1".to_string()));
	}
	let archived = state.apks.lock().await.archive(keep as usize)?;
	info!(keep, archived, "apk archive finished");
	Ok(Json(json!({
		"message": format!("Archived {} old versions", archived),
		"versions_archived": archived,
		"versions_kept_per_channel": keep,
	})))
}

async fn shutdown_signal() {
	let _ = signal::ctrl_c().await;
	info!("Shutdown signal received");
}

#[cfg(test)]
mod test_support {
	use super::*;
	use std::path::Path as FsPath;

	pub fn state_with(dir: &FsPath, llm: Option<Arc<dyn ChatModel>>, recall: Arc<dyn RecallStrategy>) -> Arc<AppState> {
		state_with_config(Config::offline(dir), llm, recall)
	}

	pub fn state_with_config(config: Config, llm: Option<Arc<dyn ChatModel>>, recall: Arc<dyn RecallStrategy>) -> Arc<AppState> {
		let memory = MemoryStore::open(&config.data_dir).unwrap();
		let apks = ApkStore::open(&config.data_dir, config.max_apk_size).unwrap();
		Arc::new(AppState {
			config,
			memory: AsyncMutex::new(memory),
			apks: AsyncMutex::new(apks),
			recall,
			llm,
			lexicon: Lexicon::default(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::extract::State as AxState;
	use axum::http::{Request, StatusCode};
	use axum::response::IntoResponse;
	use tower::ServiceExt;

	use crate::llm::testing::ScriptedModel;
	use crate::recall::KeywordRecall;
	use crate::test_support::{state_with, state_with_config};

	const BOUNDARY: &str = "companion-test-boundary";

	fn offline_state(dir: &std::path::Path) -> Arc<AppState> {
		state_with(dir, None, Arc::new(KeywordRecall))
	}

	fn apk_bytes(tag: &str) -> Vec<u8> {
		let mut b = b"PK\x03\x04".to_vec();
		b.extend_from_slice(tag.as_bytes());
		b
	}

	fn multipart_body(filename: &str, bytes: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
		let mut body = Vec::new();
		for (name, value) in fields {
			body.extend_from_slice(format!("--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n", BOUNDARY, name, value).as_bytes());
		}
		body.extend_from_slice(format!("--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n", BOUNDARY, filename).as_bytes());
		body.extend_from_slice(bytes);
		body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
		body
	}

	async fn upload(state: &Arc<AppState>, uri: &str, filename: &str, bytes: &[u8], fields: &[(&str, &str)]) -> Response {
		let req = Request::builder()
			.method("POST")
			.uri(uri)
			.header(CONTENT_TYPE, format!("multipart/form-data; boundary={}", BOUNDARY))
			.body(Body::from(multipart_body(filename, bytes, fields)))
			.unwrap();
		build_router(state.clone()).oneshot(req).await.unwrap()
	}

	async fn body_bytes(resp: Response) -> Vec<u8> {
		axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()
	}

	async fn body_json(resp: Response) -> JsonValue {
		serde_json::from_slice(&body_bytes(resp).await).unwrap()
	}

	async fn staged_leftovers(state: &Arc<AppState>) -> usize {
		let dir = state.apks.lock().await.staging_dir().to_path_buf();
		std::fs::read_dir(dir).unwrap().filter_map(|e| e.ok()).filter(|e| e.file_name().to_string_lossy().starts_with("temp_")).count()
	}

	#[tokio::test]
	async fn test_root_reports_capabilities() {
		let dir = tempfile::tempdir().unwrap();
		let Json(v) = root(AxState(offline_state(dir.path()))).await;
		assert_eq!(v["status"], "healthy");
		assert_eq!(v["llm_available"], false);
		assert_eq!(v["embeddings_available"], false);
		assert_eq!(v["memory_type"], "keyword");
	}

	#[tokio::test]
	async fn test_chat_history_and_reset() {
		let dir = tempfile::tempdir().unwrap();
		let model: Arc<dyn ChatModel> = Arc::new(ScriptedModel::replying("glad to hear it"));
		let state = state_with(dir.path(), Some(model), Arc::new(KeywordRecall));
		let Json(resp) = chat_route(AxState(state.clone()), Json(ChatRequest { message: "I am so happy today".into(), name: Some("Sam".into()) })).await.unwrap();
		assert_eq!(resp.reply, "glad to hear it");
		assert_eq!(resp.detected_emotion, "happy");

		let Json(h) = history(AxState(state.clone())).await;
		assert_eq!(h["history"].as_array().unwrap().len(), 2);
		assert_eq!(h["history"][0]["role"], "user");
		assert_eq!(h["metadata"]["name"], "Sam");
		assert_eq!(h["summary"]["total_messages"], 1);

		reset(AxState(state.clone())).await.unwrap();
		let Json(h) = history(AxState(state.clone())).await;
		assert!(h["history"].as_array().unwrap().is_empty());
		assert!(h["metadata"]["name"].is_null());
		assert_eq!(h["summary"]["total_messages"], 0);
		assert!(dir.path().join("chat_history.json").exists());
	}

	#[tokio::test]
	async fn test_empty_chat_is_bad_request() {
		let dir = tempfile::tempdir().unwrap();
		let err = chat_route(AxState(offline_state(dir.path())), Json(ChatRequest { message: "".into(), name: None })).await.unwrap_err();
		assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_upload_then_download_streams_file() {
		let dir = tempfile::tempdir().unwrap();
		let state = offline_state(dir.path());
		let bytes = apk_bytes("companion build");
		let resp = upload(&state, "/apk/upload", "companion.apk", &bytes, &[("version", "2.1.0"), ("channel", "beta"), ("description", "nightly")]).await;
		assert_eq!(resp.status(), StatusCode::OK);
		let v = body_json(resp).await;
		assert_eq!(v["version"], "2.1.0");
		assert_eq!(v["channel"], "beta");
		assert_eq!(v["file_size"], bytes.len() as u64);
		let id = v["apk_id"].as_str().unwrap().to_string();
		assert_eq!(v["download_url"], format!("/apk/download/{}", id));

		let req = Request::builder().uri(format!("/apk/download/{}", id)).body(Body::empty()).unwrap();
		let resp = build_router(state.clone()).oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
		assert_eq!(resp.headers()[CONTENT_TYPE], APK_MIME);
		assert_eq!(resp.headers()[CONTENT_DISPOSITION], "attachment; filename=\"companion-v2.1.0.apk\"");
		assert_eq!(body_bytes(resp).await, bytes);

		let Json(info) = apk_info(AxState(state.clone()), Path(id.clone())).await.unwrap();
		assert_eq!(info["download_count"], 1);
		assert_eq!(info["description"], "nightly");
		assert!(info.get("file_path").is_none());
		assert_eq!(staged_leftovers(&state).await, 0);
	}

	#[tokio::test]
	async fn test_upload_fields_from_query_and_default_channel() {
		let dir = tempfile::tempdir().unwrap();
		let state = offline_state(dir.path());
		let resp = upload(&state, "/apk/upload?version=0.9.0", "app.apk", &apk_bytes("q"), &[]).await;
		assert_eq!(resp.status(), StatusCode::OK);
		let v = body_json(resp).await;
		assert_eq!(v["version"], "0.9.0");
		assert_eq!(v["channel"], "release");
	}

	#[tokio::test]
	async fn test_upload_rejections_leave_no_temp_files() {
		let dir = tempfile::tempdir().unwrap();
		let mut config = Config::offline(dir.path());
		config.max_apk_size = 32;
		let state = state_with_config(config, None, Arc::new(KeywordRecall));

		let ok = upload(&state, "/apk/upload", "app.apk", &apk_bytes("a"), &[]).await;
		assert_eq!(ok.status(), StatusCode::OK);

		let dup = upload(&state, "/apk/upload", "other.apk", &apk_bytes("a"), &[("version", "5.0.0")]).await;
		assert_eq!(dup.status(), StatusCode::CONFLICT);
		assert_eq!(body_json(dup).await["error"]["code"], "CONFLICT");

		let same_version = upload(&state, "/apk/upload", "app.apk", &apk_bytes("b"), &[("version", "1.0.0")]).await;
		assert_eq!(same_version.status(), StatusCode::CONFLICT);

		let wrong_ext = upload(&state, "/apk/upload", "app.zip", &apk_bytes("c"), &[]).await;
		assert_eq!(wrong_ext.status(), StatusCode::BAD_REQUEST);

		let too_big = upload(&state, "/apk/upload", "big.apk", &vec![7u8; 64], &[]).await;
		assert_eq!(too_big.status(), StatusCode::BAD_REQUEST);

		let bad_channel = upload(&state, "/apk/upload", "app.apk", &apk_bytes("d"), &[("channel", "nightly")]).await;
		assert_eq!(bad_channel.status(), StatusCode::BAD_REQUEST);

		assert_eq!(staged_leftovers(&state).await, 0);
		let Json(stats) = apk_stats(AxState(state.clone())).await;
		assert_eq!(stats.total_apks, 1);
		assert_eq!(stats.total_uploads, 1);
	}

	#[tokio::test]
	async fn test_soft_delete_hides_from_listing() {
		let dir = tempfile::tempdir().unwrap();
		let state = offline_state(dir.path());
		let v = body_json(upload(&state, "/apk/upload", "app.apk", &apk_bytes("x"), &[]).await).await;
		let id = v["apk_id"].as_str().unwrap().to_string();

		apk_delete(AxState(state.clone()), Path(id.clone())).await.unwrap();
		let Json(list) = apk_list(AxState(state.clone()), Query(ListQuery::default())).await.unwrap();
		assert_eq!(list["total_count"], 0);
		let Json(all) = apk_list(AxState(state.clone()), Query(ListQuery { channel: None, active_only: Some(false) })).await.unwrap();
		assert_eq!(all["total_count"], 1);
		assert_eq!(all["channels"], json!(["release"]));

		let Json(info) = apk_info(AxState(state.clone()), Path(id.clone())).await.unwrap();
		assert_eq!(info["is_active"], false);
		let gone = apk_download(AxState(state.clone()), Path(id.clone())).await.unwrap_err();
		assert_eq!(gone.into_response().status(), StatusCode::GONE);
		let missing = apk_delete(AxState(state.clone()), Path("nope".into())).await.unwrap_err();
		assert_eq!(missing.into_response().status(), StatusCode::NOT_FOUND);
	}

	#[tokio::test]
	async fn test_latest_and_archive() {
		let dir = tempfile::tempdir().unwrap();
		let state = offline_state(dir.path());
		let none = apk_latest(AxState(state.clone()), Query(LatestQuery::default())).await.unwrap_err();
		assert_eq!(none.into_response().status(), StatusCode::NOT_FOUND);

		for tag in ["one", "two", "three"] {
			let resp = upload(&state, "/apk/upload", "app.apk", &apk_bytes(tag), &[]).await;
			assert_eq!(resp.status(), StatusCode::OK);
		}
		let Json(latest) = apk_latest(AxState(state.clone()), Query(LatestQuery { channel: Some("release".into()) })).await.unwrap();
		assert_eq!(latest["version"], "1.0.2");
		assert!(latest["download_url"].as_str().unwrap().starts_with("/apk/download/"));

		let Json(out) = apk_archive(AxState(state.clone()), Query(ArchiveQuery { keep_versions: Some(1) })).await.unwrap();
		assert_eq!(out["versions_archived"], 2);
		assert_eq!(out["versions_kept_per_channel"], 1);
		let Json(release) = apk_list(AxState(state.clone()), Query(ListQuery { channel: Some("release".into()), active_only: None })).await.unwrap();
		assert_eq!(release["total_count"], 1);
		let Json(archived) = apk_list(AxState(state.clone()), Query(ListQuery { channel: Some("archive".into()), active_only: None })).await.unwrap();
		assert_eq!(archived["total_count"], 2);

		let bad = apk_archive(AxState(state.clone()), Query(ArchiveQuery { keep_versions: Some(0) })).await.unwrap_err();
		assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);
	}

	#[tokio::test]
	async fn test_cleanup_threshold_validation() {
		let dir = tempfile::tempdir().unwrap();
		let state = offline_state(dir.path());
		let bad = apk_cleanup(AxState(state.clone()), Query(CleanupQuery { days_old: Some(0) })).await.unwrap_err();
		assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);
		let Json(out) = apk_cleanup(AxState(state.clone()), Query(CleanupQuery::default())).await.unwrap();
		assert_eq!(out["days_old_threshold"], 30);
		assert_eq!(out["records_removed"], 0);
	}

	#[tokio::test]
	async fn test_cleanup_with_huge_threshold_succeeds() {
		let dir = tempfile::tempdir().unwrap();
		let state = offline_state(dir.path());
		let v = body_json(upload(&state, "/apk/upload", "app.apk", &apk_bytes("kept"), &[]).await).await;
		let id = v["apk_id"].as_str().unwrap().to_string();
		apk_delete(AxState(state.clone()), Path(id.clone())).await.unwrap();

		let req = Request::builder().method("POST").uri("/apk/cleanup?days_old=100000000").body(Body::empty()).unwrap();
		let resp = build_router(state.clone()).oneshot(req).await.unwrap();
		assert_eq!(resp.status(), StatusCode::OK);
		let out = body_json(resp).await;
		assert_eq!(out["days_old_threshold"], 100_000_000);
		assert_eq!(out["records_removed"], 0);
		assert!(state.apks.lock().await.get(&id).is_some());
	}

	#[tokio::test]
	async fn test_list_rejects_unknown_channel() {
		let dir = tempfile::tempdir().unwrap();
		let state = offline_state(dir.path());
		let err = apk_list(AxState(state), Query(ListQuery { channel: Some("alpha".into()), active_only: None })).await.unwrap_err();
		assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
	}
}
