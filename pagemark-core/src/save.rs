//! Save state machine and the autosave debouncer.
//!
//! `idle -> saving -> {saved, error}`, `error -> saving` on retry. The tracker
//! is pure bookkeeping; the request itself is sent by the caller between
//! [`SaveTracker::begin`] and [`SaveTracker::finish`], with the payload
//! assembled synchronously right after `begin`.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::SaveError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

/// Proof that a save was started, carrying the edit generation whose state
/// the payload reflects.
#[derive(Debug)]
#[must_use = "a started save must be settled with SaveTracker::finish"]
pub struct SaveTicket {
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveSettled {
    /// The request succeeded. `resave` is set when edits landed while it was
    /// in flight and still need a save of their own.
    Saved { resave: bool },
    Failed,
}

#[derive(Debug, Default)]
pub struct SaveTracker {
    status: SaveStatus,
    dirty: bool,
    generation: u64,
    last_error: Option<String>,
}

impl SaveTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SaveStatus {
        self.status
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn needs_save(&self) -> bool {
        self.dirty || self.status == SaveStatus::Error
    }

    /// Notes a markup mutation. Returns `true` when the debounce timer should
    /// be (re)started; while a request is in flight the follow-up is decided
    /// when it settles instead.
    pub fn mark_dirty(&mut self) -> bool {
        self.dirty = true;
        self.generation += 1;
        self.status != SaveStatus::Saving
    }

    /// Starts a save. `Ok(None)` means there is nothing to save.
    pub fn begin(&mut self) -> Result<Option<SaveTicket>, SaveError> {
        if self.status == SaveStatus::Saving {
            return Err(SaveError::InFlight);
        }
        if !self.needs_save() {
            return Ok(None);
        }
        self.status = SaveStatus::Saving;
        debug!(generation = self.generation, "save started");
        Ok(Some(SaveTicket {
            generation: self.generation,
        }))
    }

    pub fn finish(&mut self, ticket: SaveTicket, outcome: Result<(), String>) -> SaveSettled {
        match outcome {
            Ok(()) => {
                let resave = self.generation != ticket.generation;
                if !resave {
                    self.dirty = false;
                }
                self.status = SaveStatus::Saved;
                self.last_error = None;
                info!(resave, "markups saved");
                SaveSettled::Saved { resave }
            }
            Err(message) => {
                info!(error = %message, "markup save failed");
                self.status = SaveStatus::Error;
                self.last_error = Some(message);
                SaveSettled::Failed
            }
        }
    }

    /// Forgets pending edits after an authoritative external overwrite.
    pub fn reset_clean(&mut self) {
        self.dirty = false;
        self.status = SaveStatus::Idle;
        self.last_error = None;
    }
}

/// Message sent when a debounce period elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveDue {
    seq: u64,
}

/// Single-slot cancellable timer. Scheduling always supersedes the pending
/// timer; a superseded timer that already fired is recognised by its
/// sequence number and ignored.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    seq: u64,
    pending: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<AutosaveDue>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> (Self, mpsc::UnboundedReceiver<AutosaveDue>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let debouncer = Self {
            delay,
            seq: 0,
            pending: None,
            tx,
        };
        (debouncer, rx)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn schedule(&mut self) {
        self.cancel();
        self.seq += 1;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("no async runtime; autosave waits for an explicit save");
            return;
        };
        let seq = self.seq;
        let delay = self.delay;
        let tx = self.tx.clone();
        self.pending = Some(runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(AutosaveDue { seq });
        }));
        debug!(seq, delay_ms = delay.as_millis() as u64, "autosave scheduled");
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Whether a timer was scheduled and not yet accepted or cancelled. Stays
    /// true after the timer fired until its message is accepted.
    pub fn is_scheduled(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether `due` came from the most recently scheduled timer.
    pub fn accept(&mut self, due: AutosaveDue) -> bool {
        if due.seq != self.seq || self.pending.is_none() {
            return false;
        }
        self.pending = None;
        true
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
