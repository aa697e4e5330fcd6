//! Recording side channel (component G): start/stop/cancel commands over
//! the extension JSON channel, with interleaved binary video chunks
//! demarcated by preceding `recordingData` metadata frames.
//!
//! The "last binary metadata tabId" is a process-wide single slot, as
//! spec'd: a binary frame with no preceding metadata is dropped rather
//! than guessed at.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::{Error, Result};
use crate::extension::ExtensionLink;
use crate::target::TabId;

/// Outcome of a completed `stopRecording`.
#[derive(Debug, Clone)]
pub struct StopOutcome {
    pub path: PathBuf,
    pub size: u64,
    pub duration: Duration,
}

struct Session {
    output_path: PathBuf,
    chunks: Vec<Bytes>,
    started_at: Instant,
    started_at_wall: DateTime<Utc>,
    stop_waiter: Option<oneshot::Sender<Result<StopOutcome>>>,
}

/// Owns every in-progress recording, keyed by `tabId` per spec (the
/// metadata frame labels chunks by `tabId`, not by client session).
#[derive(Default)]
pub struct RecordingManager {
    sessions: DashMap<TabId, Session>,
    last_binary_tab: Mutex<Option<TabId>>,
    final_chunk_timeout: Duration,
}

impl RecordingManager {
    pub fn new(final_chunk_timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            last_binary_tab: Mutex::new(None),
            final_chunk_timeout,
        }
    }

    pub fn start(&self, tab_id: TabId, output_path: PathBuf) -> Result<DateTime<Utc>> {
        if self.sessions.contains_key(&tab_id) {
            return Err(Error::recording(format!(
                "tab {tab_id} is already recording"
            )));
        }
        let started_at_wall = Utc::now();
        self.sessions.insert(
            tab_id,
            Session {
                output_path,
                chunks: Vec::new(),
                started_at: Instant::now(),
                started_at_wall,
                stop_waiter: None,
            },
        );
        Ok(started_at_wall)
    }

    /// Handle an inbound `{"method":"recordingData","params":{tabId, final}}`
    /// envelope. `final:true` triggers immediate finalization — no binary
    /// frame follows it.
    pub fn note_metadata(&self, tab_id: TabId, is_final: bool) {
        {
            let mut slot = self.last_binary_tab.lock().unwrap();
            *slot = if is_final { None } else { Some(tab_id) };
        }
        if is_final {
            self.finalize(tab_id);
        }
    }

    /// Route an inbound binary frame to the recording labeled by the most
    /// recent metadata frame. Drops it (with a warning) if none is
    /// pending — this is the spec's explicit discard-over-misroute rule.
    pub fn handle_binary(&self, data: Bytes) {
        let tab_id = self.last_binary_tab.lock().unwrap().take();
        match tab_id {
            Some(tab_id) => match self.sessions.get_mut(&tab_id) {
                Some(mut session) => session.chunks.push(data),
                None => warn!(tab_id, "binary frame for a tab with no active recording, dropping"),
            },
            None => warn!("binary frame with no preceding recordingData metadata, dropping"),
        }
    }

    fn finalize(&self, tab_id: TabId) {
        let Some((_, mut session)) = self.sessions.remove(&tab_id) else {
            return;
        };
        let outcome = self.write_file(&mut session);
        if let Some(waiter) = session.stop_waiter.take() {
            let _ = waiter.send(outcome);
        }
    }

    fn write_file(&self, session: &mut Session) -> Result<StopOutcome> {
        let total_len: usize = session.chunks.iter().map(|c| c.len()).sum();
        let mut buf = Vec::with_capacity(total_len);
        for chunk in &session.chunks {
            buf.extend_from_slice(chunk);
        }
        if let Some(parent) = session.output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&session.output_path, &buf)?;
        Ok(StopOutcome {
            path: session.output_path.clone(),
            size: buf.len() as u64,
            duration: session.started_at.elapsed(),
        })
    }

    /// Ask the extension to stop recording `tab_id` and wait for the
    /// `final:true` marker that actually completes the file. Fails with a
    /// timeout if no final marker arrives within the configured window.
    ///
    /// The `stopRecording` acknowledgement is fired in the background:
    /// completion is driven entirely by the `final:true` metadata frame
    /// arriving over the ordinary extension reader loop, not by this
    /// call's own response.
    pub async fn stop(&self, tab_id: TabId, extension: Arc<ExtensionLink>) -> Result<StopOutcome> {
        let (tx, rx) = oneshot::channel();
        {
            let mut session = self
                .sessions
                .get_mut(&tab_id)
                .ok_or_else(|| Error::recording(format!("no active recording for tab {tab_id}")))?;
            session.stop_waiter = Some(tx);
        }

        tokio::spawn(async move {
            let _ = extension.send_control("stopRecording", json!({ "tabId": tab_id })).await;
        });

        match tokio::time::timeout(self.final_chunk_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::recording("stop waiter dropped before resolution")),
            Err(_) => {
                self.sessions.remove(&tab_id);
                Err(Error::timeout("recording data"))
            }
        }
    }

    pub fn cancel(&self, tab_id: TabId) -> bool {
        self.sessions.remove(&tab_id).is_some()
    }

    pub fn is_recording(&self, tab_id: TabId) -> bool {
        self.sessions.contains_key(&tab_id)
    }

    pub fn started_at(&self, tab_id: TabId) -> Option<DateTime<Utc>> {
        self.sessions.get(&tab_id).map(|s| s.started_at_wall)
    }

    /// Extension disconnected mid-recording: no partial file is ever
    /// written, every pending `stop` fails, and the accumulator is
    /// cleared.
    pub fn extension_disconnected(&self) {
        let tab_ids: Vec<TabId> = self.sessions.iter().map(|e| *e.key()).collect();
        for tab_id in tab_ids {
            if let Some((_, mut session)) = self.sessions.remove(&tab_id) {
                if let Some(waiter) = session.stop_waiter.take() {
                    let _ = waiter.send(Err(Error::recording("Extension disconnected")));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn stray_binary_without_metadata_is_dropped() {
        let mgr = RecordingManager::new(Duration::from_secs(1));
        mgr.handle_binary(Bytes::from_static(b"abc"));
        // no panic, nothing recorded anywhere to assert against directly;
        // the absence of a session to route into is the point.
    }

    #[test]
    fn binary_without_active_session_is_dropped() {
        let mgr = RecordingManager::new(Duration::from_secs(1));
        mgr.note_metadata(42, false);
        mgr.handle_binary(Bytes::from_static(b"abc"));
    }

    #[tokio::test]
    async fn final_marker_concatenates_and_writes_file() {
        let out = NamedTempFile::new().unwrap();
        let path = out.path().to_path_buf();
        std::fs::remove_file(&path).ok();

        let mgr = RecordingManager::new(Duration::from_secs(1));
        mgr.start(42, path.clone()).unwrap();

        mgr.note_metadata(42, false);
        mgr.handle_binary(Bytes::from_static(&[1, 2, 3]));
        mgr.note_metadata(42, false);
        mgr.handle_binary(Bytes::from_static(&[4, 5, 6]));

        let (tx, rx) = oneshot::channel();
        {
            let mut session = mgr.sessions.get_mut(&42).unwrap();
            session.stop_waiter = Some(tx);
        }
        mgr.note_metadata(42, true);

        let outcome = rx.await.unwrap().unwrap();
        assert_eq!(outcome.size, 6);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn cancel_discards_without_writing() {
        let mgr = RecordingManager::new(Duration::from_secs(1));
        mgr.start(7, PathBuf::from("/tmp/does-not-matter.mp4")).unwrap();
        assert!(mgr.cancel(7));
        assert!(!mgr.is_recording(7));
    }

    #[test]
    fn extension_disconnect_fails_pending_stop_without_partial_file() {
        let mgr = RecordingManager::new(Duration::from_secs(1));
        let path = PathBuf::from("/tmp/cdp-relay-test-should-not-exist.mp4");
        std::fs::remove_file(&path).ok();
        mgr.start(9, path.clone()).unwrap();

        let (tx, mut rx) = oneshot::channel();
        {
            let mut session = mgr.sessions.get_mut(&9).unwrap();
            session.stop_waiter = Some(tx);
        }

        mgr.extension_disconnected();
        assert!(rx.try_recv().unwrap().is_err());
        assert!(!path.exists());
    }
}
