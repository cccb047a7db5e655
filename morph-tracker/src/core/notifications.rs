/*!
Pluggable outputs for unlock notices
*/

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use morph_ledger::{ModelId, PlayerId};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::config::{NoticeConfig, NoticeSinkKind};
use crate::core::host::{Host, Message};

pub type SinkError = Box<dyn std::error::Error + Send + Sync>;

/// A model newly unlocked by a kill.
#[derive(Debug, Clone, Serialize)]
pub struct UnlockNotice {
    pub player: PlayerId,
    pub model: ModelId,
    pub world: String,
    pub unlocked_at: DateTime<Utc>,
}

impl UnlockNotice {
    pub fn new(player: PlayerId, model: ModelId, world: impl Into<String>) -> Self {
        Self {
            player,
            model,
            world: world.into(),
            unlocked_at: Utc::now(),
        }
    }
}

/// Trait for notice outputs
#[async_trait]
pub trait NoticeSink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open files, connections, etc.
    async fn initialize(&mut self) -> Result<(), SinkError>;

    async fn deliver(&mut self, notice: &UnlockNotice) -> Result<(), SinkError>;

    async fn finalize(&mut self) -> Result<(), SinkError>;
}

/// Configured sinks, not yet running. [`NoticeDispatcher::start`] moves each sink onto
/// its own task.
pub struct NoticeDispatcher {
    sinks: Vec<Box<dyn NoticeSink>>,
}

impl NoticeDispatcher {
    /// The in-game chat sink is always installed; `configs` add the optional ones.
    pub fn new(configs: &[NoticeConfig], host: Arc<dyn Host>) -> Self {
        let mut sinks: Vec<Box<dyn NoticeSink>> = vec![Box::new(ChatSink::new(host))];

        for config in configs.iter().filter(|c| c.enabled) {
            let sink: Box<dyn NoticeSink> = match &config.sink {
                NoticeSinkKind::Journal { path, pretty } => Box::new(JournalSink::new(path.clone(), *pretty)),
                NoticeSinkKind::Webhook { url, auth_token } => {
                    Box::new(WebhookSink::new(url.clone(), auth_token.clone()))
                }
            };
            sinks.push(sink);
        }

        info!("Initialized notice dispatcher with {} sinks", sinks.len());
        Self { sinks }
    }

    pub fn with_sinks(sinks: Vec<Box<dyn NoticeSink>>) -> Self {
        Self { sinks }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    /// Initialize every sink, dropping the ones that fail.
    pub async fn initialize(&mut self) {
        let mut ready: Vec<Box<dyn NoticeSink>> = Vec::with_capacity(self.sinks.len());
        for mut sink in self.sinks.drain(..) {
            match sink.initialize().await {
                Ok(()) => {
                    info!("Initialized notice sink: {}", sink.name());
                    ready.push(sink);
                }
                Err(e) => warn!("Notice sink {} disabled: {}", sink.name(), e),
            }
        }
        self.sinks = ready;
    }

    /// Spawn one delivery task per sink. Must be called inside a Tokio runtime.
    pub fn start(self) -> NoticeFanout {
        let lanes = self
            .sinks
            .into_iter()
            .map(|sink| {
                let (tx, rx) = mpsc::unbounded_channel();
                let name = sink.name();
                SinkLane {
                    name,
                    tx,
                    task: tokio::spawn(run_lane(sink, rx)),
                }
            })
            .collect();
        NoticeFanout {
            lanes: Mutex::new(lanes),
        }
    }
}

struct SinkLane {
    name: &'static str,
    tx: mpsc::UnboundedSender<UnlockNotice>,
    task: JoinHandle<()>,
}

/// Running sinks. Publishing never waits on a sink, and a stuck sink only holds
/// back its own queue.
pub struct NoticeFanout {
    lanes: Mutex<Vec<SinkLane>>,
}

impl NoticeFanout {
    pub fn publish(&self, notice: UnlockNotice) {
        for lane in self.lanes.lock().iter() {
            if lane.tx.send(notice.clone()).is_err() {
                warn!("Notice sink {} has stopped, dropping unlock of {}", lane.name, notice.model);
            }
        }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.lanes.lock().iter().map(|lane| lane.name).collect()
    }

    /// Close every queue, let the sinks drain and finalize, and abort the ones still
    /// busy after `grace`. Later publishes are dropped.
    pub async fn finalize(&self, grace: Duration) {
        let lanes = std::mem::take(&mut *self.lanes.lock());
        let mut aborts = Vec::with_capacity(lanes.len());
        let mut tasks = Vec::with_capacity(lanes.len());
        for lane in lanes {
            aborts.push((lane.name, lane.task.abort_handle()));
            tasks.push(lane.task);
        }

        if tokio::time::timeout(grace, join_all(tasks)).await.is_err() {
            for (name, abort) in aborts {
                if !abort.is_finished() {
                    warn!("Notice sink {} did not drain in {:?}, aborting", name, grace);
                    abort.abort();
                }
            }
        }
    }
}

async fn run_lane(mut sink: Box<dyn NoticeSink>, mut notices: mpsc::UnboundedReceiver<UnlockNotice>) {
    while let Some(notice) = notices.recv().await {
        if let Err(e) = sink.deliver(&notice).await {
            error!(
                "Sink {} failed to deliver unlock of {} for {}: {}",
                sink.name(),
                notice.model,
                notice.player,
                e
            );
        }
    }
    if let Err(e) = sink.finalize().await {
        warn!("Sink {} failed to finalize: {}", sink.name(), e);
    }
}

/// Tells the killer in chat.
pub struct ChatSink {
    host: Arc<dyn Host>,
}

impl ChatSink {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl NoticeSink for ChatSink {
    fn name(&self) -> &'static str {
        "Chat"
    }

    async fn initialize(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn deliver(&mut self, notice: &UnlockNotice) -> Result<(), SinkError> {
        let message = Message::raw("Unlocked: ").colored(notice.model.as_str(), "aqua");
        self.host.send_message(&notice.player, &message);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Unlock history as JSON lines, appended to one file.
pub struct JournalSink {
    path: PathBuf,
    pretty: bool,
    file: Option<File>,
}

impl JournalSink {
    pub fn new(path: PathBuf, pretty: bool) -> Self {
        Self {
            path,
            pretty,
            file: None,
        }
    }

    fn encode(&self, notice: &UnlockNotice) -> serde_json::Result<Vec<u8>> {
        let mut line = if self.pretty {
            serde_json::to_vec_pretty(notice)?
        } else {
            serde_json::to_vec(notice)?
        };
        line.push(b'\n');
        Ok(line)
    }
}

#[async_trait]
impl NoticeSink for JournalSink {
    fn name(&self) -> &'static str {
        "Journal"
    }

    async fn initialize(&mut self) -> Result<(), SinkError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        self.file = Some(file);
        Ok(())
    }

    async fn deliver(&mut self, notice: &UnlockNotice) -> Result<(), SinkError> {
        let line = self.encode(notice)?;
        let file = self.file.as_mut().ok_or("journal is not open")?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), SinkError> {
        if let Some(file) = self.file.take() {
            file.sync_all().await?;
        }
        Ok(())
    }
}

/// Per-request limit for webhook calls.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// POSTs each notice as JSON to `url`.
pub struct WebhookSink {
    url: String,
    auth_token: Option<String>,
    client: Option<reqwest::Client>,
}

impl WebhookSink {
    pub fn new(url: String, auth_token: Option<String>) -> Self {
        Self {
            url,
            auth_token,
            client: None,
        }
    }
}

#[async_trait]
impl NoticeSink for WebhookSink {
    fn name(&self) -> &'static str {
        "Webhook"
    }

    async fn initialize(&mut self) -> Result<(), SinkError> {
        reqwest::Url::parse(&self.url)?;
        self.client = Some(reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build()?);
        Ok(())
    }

    async fn deliver(&mut self, notice: &UnlockNotice) -> Result<(), SinkError> {
        let client = self.client.as_ref().ok_or("webhook client is not initialized")?;
        let request = match &self.auth_token {
            Some(token) => client.post(&self.url).bearer_auth(token),
            None => client.post(&self.url),
        };
        request.json(notice).send().await?.error_for_status()?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
