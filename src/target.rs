//! Target manager (component D): source of truth for "what tabs exist and
//! what targetId each maps to". Synthesizes the target-lifecycle half of
//! the events the router fans out; session minting stays with the router
//! (see `src/router.rs`), which is the sole owner of `Session` records.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

pub type TabId = i64;

/// `TargetInfo` shape required by spec: carries exactly the fields a CDP
/// client expects from `Target.targetCreated`/`Target.getTargets`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TargetInfo {
    #[serde(rename = "targetId")]
    pub target_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub url: String,
    pub attached: bool,
    #[serde(rename = "browserContextId")]
    pub browser_context_id: String,
    #[serde(rename = "canAccessOpener")]
    pub can_access_opener: bool,
}

impl TargetInfo {
    fn new(target_id: String, tab_id: TabId, url: String, title: String) -> Self {
        let _ = tab_id; // tabId is extension-internal and never serialized to clients
        Self {
            target_id,
            kind: "page".to_string(),
            title,
            url,
            attached: true,
            browser_context_id: "default".to_string(),
            can_access_opener: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TargetState {
    Attached,
    Frozen { deadline: Instant },
}

struct TargetRecord {
    tab_id: TabId,
    url: String,
    title: String,
    state: TargetState,
}

/// A target-level lifecycle notification for the router to fan out.
/// `sessionId` is deliberately absent: the router mints or reaps
/// per-client session ids when it sees `Created`/`Destroyed`.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetEvent {
    Created(TargetInfo),
    InfoChanged(TargetInfo),
    Destroyed { target_id: String },
}

/// Owns every `Target` record. Mutated only here; shared for reads with
/// the router via [`TargetManager::snapshot`] and [`TargetManager::get`].
pub struct TargetManager {
    targets: HashMap<String, TargetRecord>,
    tab_to_target: HashMap<TabId, String>,
    next_id: AtomicU64,
    freeze_timeout: Duration,
}

impl TargetManager {
    pub fn new(freeze_timeout: Duration) -> Self {
        Self {
            targets: HashMap::new(),
            tab_to_target: HashMap::new(),
            next_id: AtomicU64::new(1),
            freeze_timeout,
        }
    }

    fn mint_target_id(&self) -> String {
        format!("T-{:x}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// `tabAttached(tabId, url, title)`. Reuses the existing `targetId` if
    /// the tab was frozen (extension reconnecting to a tab it dropped),
    /// mints a fresh one otherwise.
    pub fn tab_attached(&mut self, tab_id: TabId, url: String, title: String) -> Vec<TargetEvent> {
        if let Some(target_id) = self.tab_to_target.get(&tab_id).cloned() {
            if let Some(record) = self.targets.get_mut(&target_id) {
                let was_frozen = matches!(record.state, TargetState::Frozen { .. });
                record.url = url.clone();
                record.title = title.clone();
                record.state = TargetState::Attached;
                let info = TargetInfo::new(target_id.clone(), tab_id, url, title);
                return vec![if was_frozen {
                    TargetEvent::Created(info)
                } else {
                    TargetEvent::InfoChanged(info)
                }];
            }
        }

        let target_id = self.mint_target_id();
        let info = TargetInfo::new(target_id.clone(), tab_id, url.clone(), title.clone());
        self.targets.insert(
            target_id.clone(),
            TargetRecord {
                tab_id,
                url,
                title,
                state: TargetState::Attached,
            },
        );
        self.tab_to_target.insert(tab_id, target_id);
        vec![TargetEvent::Created(info)]
    }

    /// `tabNavigated(tabId, url, title)`. Same `targetId`, updated fields.
    pub fn tab_navigated(&mut self, tab_id: TabId, url: String, title: String) -> Vec<TargetEvent> {
        let Some(target_id) = self.tab_to_target.get(&tab_id).cloned() else {
            warn!(tab_id, "tabNavigated for unknown tab, ignoring");
            return Vec::new();
        };
        let Some(record) = self.targets.get_mut(&target_id) else {
            return Vec::new();
        };
        record.url = url.clone();
        record.title = title.clone();
        let info = TargetInfo::new(target_id, tab_id, url, title);
        vec![TargetEvent::InfoChanged(info)]
    }

    /// `tabDetached(tabId, reason)`: the tab genuinely closed. Drops the
    /// record outright (not frozen — a fresh attach mints a new id).
    pub fn tab_detached(&mut self, tab_id: TabId, reason: &str) -> Vec<TargetEvent> {
        let Some(target_id) = self.tab_to_target.remove(&tab_id) else {
            return Vec::new();
        };
        self.targets.remove(&target_id);
        debug!(tab_id, target_id = %target_id, reason, "tab detached");
        vec![TargetEvent::Destroyed { target_id }]
    }

    /// The extension link dropped. Every attached target freezes: the
    /// relay tells clients it is gone (so Playwright re-enters its
    /// disconnected state cleanly) while privately keeping the
    /// `tabId -> targetId` mapping alive for `freeze_timeout`, in case the
    /// extension comes back attached to the same tab.
    pub fn extension_disconnected(&mut self) -> Vec<TargetEvent> {
        let deadline = Instant::now() + self.freeze_timeout;
        let mut events = Vec::new();
        for (target_id, record) in self.targets.iter_mut() {
            if matches!(record.state, TargetState::Attached) {
                record.state = TargetState::Frozen { deadline };
                events.push(TargetEvent::Destroyed {
                    target_id: target_id.clone(),
                });
            }
        }
        events
    }

    /// Drop any frozen target whose freeze window has elapsed. No event is
    /// emitted: clients were already told it was destroyed when it froze.
    /// Called periodically from a background sweep task.
    pub fn sweep_expired_freezes(&mut self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .targets
            .iter()
            .filter_map(|(id, record)| match record.state {
                TargetState::Frozen { deadline } if now >= deadline => Some(id.clone()),
                _ => None,
            })
            .collect();
        for target_id in &expired {
            if let Some(record) = self.targets.remove(target_id) {
                self.tab_to_target.remove(&record.tab_id);
            }
        }
        expired.len()
    }

    pub fn get(&self, target_id: &str) -> Option<TargetInfo> {
        self.targets.get(target_id).map(|record| {
            TargetInfo::new(
                target_id.to_string(),
                record.tab_id,
                record.url.clone(),
                record.title.clone(),
            )
        })
    }

    /// The extension-owned `tabId` backing this target, used to tag
    /// commands forwarded to the extension (see `src/extension_protocol.rs`).
    pub fn tab_id_for(&self, target_id: &str) -> Option<TabId> {
        self.targets.get(target_id).map(|record| record.tab_id)
    }

    /// Reverse lookup used when an inbound extension event is tagged with
    /// a bare `tabId` rather than a session tag.
    pub fn tab_id_to_target(&self, tab_id: TabId) -> Option<String> {
        self.tab_to_target.get(&tab_id).cloned()
    }

    /// Current view for `Target.getTargets`: only targets the extension is
    /// actively attached to, matching what a real CDP browser would report.
    pub fn snapshot(&self) -> Vec<TargetInfo> {
        self.targets
            .iter()
            .filter(|(_, record)| matches!(record.state, TargetState::Attached))
            .map(|(id, record)| TargetInfo::new(id.clone(), record.tab_id, record.url.clone(), record.title.clone()))
            .collect()
    }
}
