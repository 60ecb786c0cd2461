//! Interaction recording and memory context
//!
//! Finished turns are handed to a detached worker over an unbounded channel.
//! Submitting never waits on the store, and a failing store only shows up in
//! the log.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, mpsc};

use crate::error::{ChatError, Result};

const LOG_FILE: &str = "interactions.jsonl";
const SUMMARY_RESPONSE_CHARS: usize = 200;
/// Most recent interactions kept in memory per user
const TAIL_CAPACITY: usize = 50;

type TailIndex = HashMap<String, VecDeque<Interaction>>;

/// One finished conversation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user_id: String,
    pub user_message: String,
    pub ai_response: String,
    pub tools_used: Vec<String>,
    pub recorded_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(
        user_id: impl Into<String>,
        user_message: impl Into<String>,
        ai_response: impl Into<String>,
        tools_used: Vec<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            user_message: user_message.into(),
            ai_response: ai_response.into(),
            tools_used,
            recorded_at: Utc::now(),
        }
    }
}

/// Long-term sink for finished turns
#[async_trait]
pub trait InteractionRecorder: Send + Sync {
    async fn record(&self, interaction: &Interaction) -> Result<()>;
}

/// Source of remembered context for a caller
#[async_trait]
pub trait MemoryContext: Send + Sync {
    /// Summary relevant to `query`, or `None` when nothing is known.
    async fn load_context(&self, user_id: &str, query: &str, limit: usize) -> Result<Option<String>>;
}

/// Non-blocking handle to a detached recorder worker
#[derive(Debug, Clone)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<Interaction>,
}

impl RecorderHandle {
    /// Start the worker on the current runtime.
    pub fn spawn(recorder: Arc<dyn InteractionRecorder>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Interaction>();

        tokio::spawn(async move {
            while let Some(interaction) = rx.recv().await {
                match recorder.record(&interaction).await {
                    Ok(()) => debug!("Recorded interaction for {}", interaction.user_id),
                    Err(e) => warn!("Failed to record interaction for {}: {}", interaction.user_id, e),
                }
            }
            debug!("Recorder worker stopped");
        });

        Self { tx }
    }

    /// Queue an interaction and return immediately.
    pub fn submit(&self, interaction: Interaction) {
        if let Err(e) = self.tx.send(interaction) {
            warn!("Recorder worker is gone, dropping interaction for {}", e.0.user_id);
        }
    }
}

/// Append-only JSONL interaction log that doubles as a memory source
///
/// The file is scanned once, on the first memory lookup, into a per-user
/// tail of the last `TAIL_CAPACITY` entries. Later writes update the tail in
/// place, so lookups never re-read the file.
pub struct JsonlInteractionLog {
    path: PathBuf,
    /// Serializes appends with the tail index; `None` until first loaded
    tails: Mutex<Option<TailIndex>>,
}

impl JsonlInteractionLog {
    /// Open (creating the directory if needed) the log under `data_dir`.
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join(LOG_FILE),
            tails: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable interaction for `user_id`, oldest first. Reads the
    /// whole file.
    pub async fn interactions_for(&self, user_id: &str) -> Result<Vec<Interaction>> {
        let mut interactions = Vec::new();
        self.scan(|interaction| {
            if interaction.user_id == user_id {
                interactions.push(interaction);
            }
        })
        .await?;
        Ok(interactions)
    }

    /// The last `limit` interactions for `user_id` (at most `TAIL_CAPACITY`),
    /// oldest first.
    pub async fn recent_for(&self, user_id: &str, limit: usize) -> Result<Vec<Interaction>> {
        let mut tails = self.tails.lock().await;
        if tails.is_none() {
            *tails = Some(self.load_tails().await?);
        }

        let recent: Vec<Interaction> = tails
            .as_ref()
            .and_then(|index| index.get(user_id))
            .map(|tail| {
                let start = tail.len().saturating_sub(limit);
                tail.iter().skip(start).cloned().collect()
            })
            .unwrap_or_default();
        Ok(recent)
    }

    async fn load_tails(&self) -> Result<TailIndex> {
        let mut index = TailIndex::new();
        self.scan(|interaction| push_tail(&mut index, interaction)).await?;
        debug!("Loaded interaction tails for {} users", index.len());
        Ok(index)
    }

    /// Stream the log line by line, skipping unreadable entries.
    async fn scan(&self, mut visit: impl FnMut(Interaction)) -> Result<()> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mut lines = BufReader::new(file).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Interaction>(&line) {
                Ok(interaction) => visit(interaction),
                Err(e) => debug!("Skipping unreadable interaction line: {}", e),
            }
        }
        Ok(())
    }
}

fn push_tail(index: &mut TailIndex, interaction: Interaction) {
    let tail = index.entry(interaction.user_id.clone()).or_default();
    if tail.len() == TAIL_CAPACITY {
        tail.pop_front();
    }
    tail.push_back(interaction);
}

#[async_trait]
impl InteractionRecorder for JsonlInteractionLog {
    async fn record(&self, interaction: &Interaction) -> Result<()> {
        let line = serde_json::to_string(interaction)?;

        let mut tails = self.tails.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| ChatError::Storage(format!("Failed to open {}: {}", self.path.display(), e)))?;
        file.write_all(format!("{}\n", line).as_bytes()).await?;
        file.flush().await?;

        if let Some(index) = tails.as_mut() {
            push_tail(index, interaction.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl MemoryContext for JsonlInteractionLog {
    async fn load_context(&self, user_id: &str, _query: &str, limit: usize) -> Result<Option<String>> {
        if limit == 0 {
            return Ok(None);
        }
        let interactions = self.recent_for(user_id, limit).await?;
        if interactions.is_empty() {
            return Ok(None);
        }

        let lines: Vec<String> = interactions.iter().map(summarize).collect();
        Ok(Some(format!("Recent conversations:\n{}", lines.join("\n"))))
    }
}

fn summarize(interaction: &Interaction) -> String {
    let response: String = interaction.ai_response.chars().take(SUMMARY_RESPONSE_CHARS).collect();
    let ellipsis = if interaction.ai_response.chars().count() > SUMMARY_RESPONSE_CHARS {
        "..."
    } else {
        ""
    };

    let mut line = format!(
        "- [{}] User: {} | Assistant: {}{}",
        interaction.recorded_at.format("%Y-%m-%d"),
        interaction.user_message,
        response,
        ellipsis
    );
    if !interaction.tools_used.is_empty() {
        line.push_str(&format!(" (tools: {})", interaction.tools_used.join(", ")));
    }
    line
}
