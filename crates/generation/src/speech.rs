//! Narration synthesis (CosyVoice over the DashScope duplex WebSocket)
//!
//! One session per clip:
//! 1. `run-task` with the voice parameters
//! 2. wait for `task-started`
//! 3. one `continue-task` per text, then `finish-task`
//! 4. a reader task appends binary frames to the output file until
//!    `task-finished` or `task-failed`

use async_trait::async_trait;
use fairytale_common::config::SpeechConfig;
use fairytale_common::errors::{AppError, Result};
use fairytale_common::metrics::record_vendor_request;
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

const SERVICE: &str = "cosyvoice";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Trait for text-to-speech
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Audio container, also the file extension
    fn format(&self) -> &str;

    /// Synthesize `texts` in order into `output`, replacing any existing file
    async fn synthesize(&self, texts: &[String], output: &Path) -> Result<()>;
}

/// Voice parameters sent with `run-task`
#[derive(Debug, Clone)]
pub struct VoiceParams {
    pub model: String,
    pub voice: String,
    pub format: String,
    pub sample_rate: u32,
    pub volume: u32,
    pub rate: f32,
    pub pitch: f32,
}

impl From<&SpeechConfig> for VoiceParams {
    fn from(config: &SpeechConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            format: config.format.clone(),
            sample_rate: config.sample_rate,
            volume: config.volume,
            rate: config.rate,
            pitch: config.pitch,
        }
    }
}

pub fn run_task_command(task_id: &str, params: &VoiceParams) -> Value {
    json!({
        "header": {
            "action": "run-task",
            "task_id": task_id,
            "streaming": "duplex"
        },
        "payload": {
            "task_group": "audio",
            "task": "tts",
            "function": "SpeechSynthesizer",
            "model": params.model,
            "parameters": {
                "text_type": "PlainText",
                "voice": params.voice,
                "format": params.format,
                "sample_rate": params.sample_rate,
                "volume": params.volume,
                "rate": params.rate,
                "pitch": params.pitch
            },
            "input": {}
        }
    })
}

pub fn continue_task_command(task_id: &str, text: &str) -> Value {
    json!({
        "header": {
            "action": "continue-task",
            "task_id": task_id,
            "streaming": "duplex"
        },
        "payload": {
            "input": { "text": text }
        }
    })
}

pub fn finish_task_command(task_id: &str) -> Value {
    json!({
        "header": {
            "action": "finish-task",
            "task_id": task_id,
            "streaming": "duplex"
        },
        "payload": {
            "input": {}
        }
    })
}

#[derive(Debug, Deserialize)]
struct ServerEvent {
    header: EventHeader,
}

#[derive(Debug, Deserialize)]
struct EventHeader {
    #[serde(default)]
    event: String,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
}

/// Server events the session reacts to
#[derive(Debug, PartialEq, Eq)]
pub enum TaskEvent {
    Started,
    ResultGenerated,
    Finished,
    Failed(String),
    Unknown(String),
}

pub fn parse_event(text: &str) -> Result<TaskEvent> {
    let event: ServerEvent = serde_json::from_str(text)
        .map_err(|e| AppError::malformed(SERVICE, format!("event: {}", e)))?;

    Ok(match event.header.event.as_str() {
        "task-started" => TaskEvent::Started,
        "result-generated" => TaskEvent::ResultGenerated,
        "task-finished" => TaskEvent::Finished,
        "task-failed" => TaskEvent::Failed(format!(
            "{}: {}",
            event.header.error_code.unwrap_or_default(),
            event
                .header
                .error_message
                .unwrap_or_else(|| "unknown error".to_string())
        )),
        other => TaskEvent::Unknown(other.to_string()),
    })
}

fn stream_error(message: impl Into<String>) -> AppError {
    AppError::Stream {
        message: message.into(),
    }
}

/// Drain the socket into `file` until the task finishes
async fn read_events(
    mut stream: SplitStream<WsStream>,
    mut file: File,
    started: oneshot::Sender<()>,
) -> Result<u64> {
    let mut started = Some(started);
    let mut written = 0u64;

    while let Some(message) = stream.next().await {
        match message.map_err(|e| stream_error(format!("receive: {}", e)))? {
            Message::Binary(audio) => {
                file.write_all(&audio).await?;
                written += audio.len() as u64;
            }
            Message::Text(text) => match parse_event(&text)? {
                TaskEvent::Started => {
                    if let Some(tx) = started.take() {
                        let _ = tx.send(());
                    }
                }
                TaskEvent::ResultGenerated => {}
                TaskEvent::Finished => {
                    file.flush().await?;
                    return Ok(written);
                }
                TaskEvent::Failed(reason) => {
                    return Err(AppError::upstream(SERVICE, format!("task failed: {}", reason)));
                }
                TaskEvent::Unknown(name) => warn!(event = %name, "Unexpected CosyVoice event"),
            },
            Message::Close(frame) => {
                return Err(stream_error(format!(
                    "socket closed before task-finished: {:?}",
                    frame
                )));
            }
            _ => {}
        }
    }

    Err(stream_error("socket ended before task-finished"))
}

/// Aborts the reader when the session is dropped (e.g. on timeout)
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn join_reader(reader: JoinHandle<Result<u64>>) -> Result<u64> {
    reader.await.map_err(|e| AppError::Internal {
        message: format!("speech reader task: {}", e),
    })?
}

/// CosyVoice client
pub struct CosyVoiceClient {
    api_key: String,
    ws_url: String,
    params: VoiceParams,
    timeout: Duration,
}

impl CosyVoiceClient {
    pub fn new(config: &SpeechConfig) -> Self {
        Self {
            api_key: config.api_key.clone(),
            ws_url: config.ws_url.clone(),
            params: VoiceParams::from(config),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    async fn connect(&self) -> Result<WsStream> {
        let mut request = self
            .ws_url
            .as_str()
            .into_client_request()
            .map_err(|e| stream_error(format!("bad url {}: {}", self.ws_url, e)))?;

        let authorization = HeaderValue::from_str(&format!("bearer {}", self.api_key))
            .map_err(|e| AppError::Configuration {
                message: format!("speech api key is not a valid header: {}", e),
            })?;
        let headers = request.headers_mut();
        headers.insert("Authorization", authorization);
        headers.insert("X-DashScope-DataInspection", HeaderValue::from_static("enable"));

        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| stream_error(format!("connect to {}: {}", self.ws_url, e)))?;
        Ok(ws)
    }

    async fn session(&self, texts: &[String], file: File) -> Result<u64> {
        let (mut sink, stream) = self.connect().await?.split();
        let task_id = Uuid::new_v4().simple().to_string();

        let (started_tx, started_rx) = oneshot::channel();
        let reader = tokio::spawn(read_events(stream, file, started_tx));
        let _guard = AbortOnDrop(reader.abort_handle());

        let send = |command: Value| Message::Text(command.to_string());

        sink.send(send(run_task_command(&task_id, &self.params)))
            .await
            .map_err(|e| stream_error(format!("send run-task: {}", e)))?;

        if started_rx.await.is_err() {
            // Reader ended before task-started; surface its error
            join_reader(reader).await?;
            return Err(stream_error("task ended before it started"));
        }
        debug!(task_id = %task_id, "CosyVoice task started");

        for text in texts {
            sink.send(send(continue_task_command(&task_id, text)))
                .await
                .map_err(|e| stream_error(format!("send continue-task: {}", e)))?;
        }
        sink.send(send(finish_task_command(&task_id)))
            .await
            .map_err(|e| stream_error(format!("send finish-task: {}", e)))?;

        let written = join_reader(reader).await?;
        let _ = sink.close().await;
        Ok(written)
    }
}

#[async_trait]
impl SpeechSynthesizer for CosyVoiceClient {
    fn format(&self) -> &str {
        &self.params.format
    }

    #[instrument(skip(self, texts), fields(output = %output.display(), voice = %self.params.voice))]
    async fn synthesize(&self, texts: &[String], output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = File::create(output).await.map_err(|e| AppError::Storage {
            message: format!("create {}: {}", output.display(), e),
        })?;

        let result = match tokio::time::timeout(self.timeout, self.session(texts, file)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::UpstreamTimeout {
                service: SERVICE.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };

        record_vendor_request(SERVICE, result.is_ok());
        let bytes = result?;
        debug!(bytes, "Narration written");
        Ok(())
    }
}

/// Synthesizer writing placeholder audio, for tests
pub struct MockSpeechSynthesizer {
    fail: bool,
}

impl MockSpeechSynthesizer {
    pub fn new() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

impl Default for MockSpeechSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeechSynthesizer {
    fn format(&self) -> &str {
        "mp3"
    }

    async fn synthesize(&self, texts: &[String], output: &Path) -> Result<()> {
        if self.fail {
            return Err(AppError::upstream("mock", "voice unavailable"));
        }
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(output, texts.concat().as_bytes()).await?;
        Ok(())
    }
}
