// ===============================
// src/commands.rs
// ===============================
//
// Command scheduler: long-poll pesan masuk, cek admin, dispatch /add /remove /list.
// Cursor eksplisit: poll berikutnya mulai tepat setelah update terakhir yang diproses.
//
use std::sync::Arc;

use rand::Rng;
use thiserror::Error;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::domain::{InboundMessage, UpdateBatch};
use crate::format;
use crate::metrics::{COMMANDS, UPDATE_POLL_FAILURES};
use crate::ports::{MessageSink, MessageSource, NicknameSource};
use crate::registry::{Registry, RegistryError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Add(String),
    Remove(usize),
    List,
    Help,
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Add(_) => "add",
            Command::Remove(_) => "remove",
            Command::List => "list",
            Command::Help => "help",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("message is not a command")]
    NotACommand,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("usage: /add <encryptedUid>")]
    AddUsage,
    #[error("usage: /remove <number>")]
    RemoveUsage,
}

/// Parse berbasis prefix pada kata pertama; sufiks `@namabot` diabaikan.
pub fn parse_command(text: &str) -> Result<Command, CommandError> {
    let text = text.trim();
    if !text.starts_with('/') {
        return Err(CommandError::NotACommand);
    }
    let (word, rest) = match text.split_once(char::is_whitespace) {
        Some((w, r)) => (w, r.trim()),
        None => (text, ""),
    };
    let word = word.split_once('@').map_or(word, |(head, _)| head);

    if word.starts_with("/add") {
        if rest.is_empty() {
            return Err(CommandError::AddUsage);
        }
        Ok(Command::Add(rest.to_string()))
    } else if word.starts_with("/remove") {
        if rest.is_empty() || !rest.chars().all(|c| c.is_ascii_digit()) {
            return Err(CommandError::RemoveUsage);
        }
        rest.parse::<usize>().map(Command::Remove).map_err(|_| CommandError::RemoveUsage)
    } else if word.starts_with("/list") {
        Ok(Command::List)
    } else if word == "/help" || word == "/start" {
        Ok(Command::Help)
    } else {
        Err(CommandError::Unknown(word.to_string()))
    }
}

#[derive(Clone, Debug)]
pub struct CommandCfg {
    pub admins: Vec<i64>,
    pub retries: u32,
    pub retry_delay: Duration,
    /// jeda antar long-poll
    pub idle_delay: Duration,
}

pub struct CommandScheduler {
    registry: Arc<Registry>,
    source: Arc<dyn MessageSource>,
    sink: Arc<dyn MessageSink>,
    nicknames: Arc<dyn NicknameSource>,
    cfg: CommandCfg,
    cursor: Option<i64>,
}

impl CommandScheduler {
    pub fn new(
        registry: Arc<Registry>,
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn MessageSink>,
        nicknames: Arc<dyn NicknameSource>,
        cfg: CommandCfg,
    ) -> Self {
        Self { registry, source, sink, nicknames, cfg, cursor: None }
    }

    #[cfg(test)]
    pub fn cursor(&self) -> Option<i64> { self.cursor }

    fn is_admin(&self, sender: i64) -> bool { self.cfg.admins.contains(&sender) }

    /// Mutasi registry (termasuk tulis file) di thread blocking, bukan di worker async.
    async fn mutate<T, F>(&self, f: F) -> Result<T, String>
    where
        F: FnOnce(&Registry) -> Result<T, RegistryError> + Send + 'static,
        T: Send + 'static,
    {
        let registry = self.registry.clone();
        match tokio::task::spawn_blocking(move || f(registry.as_ref())).await {
            Ok(res) => res.map_err(|e| e.to_string()),
            Err(e) => {
                error!(error = %e, "registry task failed");
                Err(format!("registry task failed: {e}"))
            }
        }
    }

    /// Balasan untuk satu pesan; `None` kalau pesan diabaikan.
    pub async fn handle(&self, msg: &InboundMessage) -> Option<String> {
        if !self.is_admin(msg.sender_id) {
            warn!(sender = msg.sender_id, "sender is not an admin");
            COMMANDS.with_label_values(&["any", "denied"]).inc();
            return Some(format::permission_denied());
        }

        let cmd = match parse_command(&msg.text) {
            Ok(c) => c,
            Err(CommandError::NotACommand) => {
                debug!(sender = msg.sender_id, "non-command message ignored");
                return None;
            }
            Err(CommandError::AddUsage) => {
                COMMANDS.with_label_values(&["add", "usage"]).inc();
                return Some(format::add_usage());
            }
            Err(CommandError::RemoveUsage) => {
                COMMANDS.with_label_values(&["remove", "usage"]).inc();
                return Some(format::remove_usage());
            }
            Err(CommandError::Unknown(word)) => {
                debug!(%word, "unknown command");
                COMMANDS.with_label_values(&["unknown", "usage"]).inc();
                return Some(format::help());
            }
        };
        let label = cmd.label();
        info!(sender = msg.sender_id, command = label, "command received");

        let (reply, ok) = match cmd {
            Command::Add(id) => {
                let new_id = id.clone();
                match self.mutate(move |reg| reg.try_add(&new_id)).await {
                    Ok(()) => {
                        let nick = self.nicknames.fetch_nickname(&id).await;
                        self.registry.set_nickname(&id, nick);
                        (format::added(&id), true)
                    }
                    Err(reason) => (format::add_failed(&id, &reason), false),
                }
            }
            Command::Remove(index) => {
                match self.mutate(move |reg| reg.try_remove_by_index(index)).await {
                    Ok(removed) => {
                        let nick = self.registry.nickname(&removed);
                        (format::removed(index, &removed, &nick), true)
                    }
                    Err(reason) => (format::remove_failed(index, &reason), false),
                }
            }
            Command::List => {
                let entries: Vec<(String, String)> = self
                    .registry
                    .list()
                    .into_iter()
                    .map(|id| {
                        let nick = self.registry.nickname(&id);
                        (id, nick)
                    })
                    .collect();
                (format::list_reply(&entries), true)
            }
            Command::Help => (format::help(), true),
        };
        COMMANDS.with_label_values(&[label, if ok { "ok" } else { "rejected" }]).inc();
        Some(reply)
    }

    /// Proses batch sesuai urutan terima; balasan dikirim ke chat pengirim.
    async fn process_batch(&self, batch: &UpdateBatch) {
        for msg in &batch.messages {
            if let Some(reply) = self.handle(msg).await {
                if !self.sink.send(&reply, msg.sender_id).await {
                    error!(sender = msg.sender_id, "failed to deliver command reply");
                }
            }
        }
    }

    /// Satu long-poll dengan retry terbatas. false kalau semua percobaan gagal;
    /// cursor tidak berubah sehingga poll berikutnya mulai dari posisi yang sama.
    pub async fn poll_once(&mut self) -> bool {
        let attempts = self.cfg.retries.max(1);
        for attempt in 1..=attempts {
            debug!(attempt, cursor = ?self.cursor, "waiting for updates");
            match self.source.poll_updates(self.cursor).await {
                Ok(batch) => {
                    self.process_batch(&batch).await;
                    if let Some(next) = batch.next_cursor {
                        self.cursor = Some(next);
                    }
                    return true;
                }
                Err(e) => {
                    UPDATE_POLL_FAILURES.inc();
                    warn!(attempt, attempts, error = %e, "update poll failed");
                    if attempt < attempts {
                        // jangan simpan ThreadRng melewati .await
                        let max_jitter = self.cfg.retry_delay.as_millis() as u64 / 4;
                        let jitter = rand::thread_rng().gen_range(0..=max_jitter);
                        sleep(self.cfg.retry_delay + Duration::from_millis(jitter)).await;
                    }
                }
            }
        }
        error!(attempts, cursor = ?self.cursor, "giving up on this poll, resuming from last cursor");
        false
    }

    pub async fn run(mut self) {
        info!(admins = ?self.cfg.admins, "command listener started");
        loop {
            self.poll_once().await;
            sleep(self.cfg.idle_delay).await;
        }
    }
}
