//! Router (component E) — the heart of the relay. Joins the client
//! registry, the extension channel, and the target manager: routes
//! client commands to the extension (or answers them locally), fans
//! extension events out to the clients attached to their target, and
//! turns target-manager transitions into the CDP events Playwright
//! expects.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::{DashMap, DashSet};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::client::{ClientHandle, ClientRegistry};
use crate::config::{Config, ExtensionWaitPolicy};
use crate::error::Error;
use crate::extension::{Expired, ExtensionLink, Resolution};
use crate::extension_protocol;
use crate::intercept::{lookup, InterceptedMethod};
use crate::recording::RecordingManager;
use crate::target::{TabId, TargetEvent, TargetManager};
use crate::wire::{Envelope, Kind, CLOSE_NORMAL, CLOSE_POLICY_VIOLATION};

struct SessionRecord {
    client_id: String,
    target_id: String,
}

/// Everything the router needs to join components A–D, behind one shared
/// handle cloned into every connection task.
pub struct Router {
    pub clients: ClientRegistry,
    pub extension: Arc<ExtensionLink>,
    pub recordings: RecordingManager,
    targets: Mutex<TargetManager>,
    sessions: DashMap<String, SessionRecord>,
    /// targetId -> set of client-visible sessionIds currently attached.
    target_sessions: DashMap<String, DashSet<String>>,
    next_session: AtomicU64,
    pub version: String,
    wait_policy: ExtensionWaitPolicy,
    extension_wait_grace: Duration,
    pub client_backpressure_limit: usize,
    pub auth_token: Option<String>,
}

impl Router {
    pub fn new(config: &Config, version: impl Into<String>) -> Self {
        Self {
            clients: ClientRegistry::new(),
            extension: Arc::new(ExtensionLink::new(Duration::from_secs(
                config.extension_command_timeout_secs,
            ))),
            recordings: RecordingManager::new(Duration::from_secs(
                config.recording_final_chunk_timeout_secs,
            )),
            targets: Mutex::new(TargetManager::new(Duration::from_secs(
                config.target_freeze_timeout_secs,
            ))),
            sessions: DashMap::new(),
            target_sessions: DashMap::new(),
            next_session: AtomicU64::new(1),
            version: version.into(),
            wait_policy: config.extension_wait_policy,
            extension_wait_grace: Duration::from_secs(config.extension_wait_grace_secs),
            client_backpressure_limit: config.client_backpressure_limit_bytes,
            auth_token: config.token.clone(),
        }
    }

    pub fn wait_policy(&self) -> ExtensionWaitPolicy {
        self.wait_policy
    }

    /// Whether a new `/cdp/<id>` upgrade should be rejected outright
    /// because no extension is connected and the configured policy does
    /// not allow queueing. `QueueWithGracePeriod` instead accepts the
    /// socket; target events simply begin once the extension attaches.
    pub async fn should_reject_new_client(&self) -> bool {
        self.wait_policy == ExtensionWaitPolicy::RejectImmediately && !self.extension.is_connected().await
    }

    /// Resolve a recording request's target tab: explicit `tabId` wins,
    /// then `sessionId`, then (per spec) "first connected tab".
    pub fn resolve_tab_id(&self, tab_id: Option<TabId>, session_id: Option<&str>) -> Option<TabId> {
        if let Some(tab_id) = tab_id {
            return Some(tab_id);
        }
        if let Some(session_id) = session_id {
            let target_id = self.sessions.get(session_id)?.target_id.clone();
            return self.tab_id_for_target(&target_id);
        }
        let first = self.targets.lock().unwrap().snapshot().into_iter().next()?;
        self.tab_id_for_target(&first.target_id)
    }

    fn mint_session_id(&self) -> String {
        format!("s{}", self.next_session.fetch_add(1, Ordering::SeqCst))
    }

    // ---- (1) client -> extension -------------------------------------------------

    /// Handle one CDP request frame from a client. Intercepted methods are
    /// answered locally; everything else is rewritten and forwarded.
    pub async fn handle_client_command(&self, client: &Arc<ClientHandle>, envelope: Envelope) {
        let Ok(Kind::Command) = envelope.classify() else {
            // A client sent a bare response/event, which makes no sense
            // inbound from a client; ignore rather than tear down the link.
            warn!(client = %client.id, "client sent a non-command envelope, ignoring");
            return;
        };
        let id = envelope.id.expect("classify guarantees id for Command");
        let method = envelope.method.clone().expect("classify guarantees method for Command");
        let params = envelope.params.clone().unwrap_or(Value::Null);

        if let Some(intercepted) = lookup(&method) {
            self.handle_local_command(client, id, intercepted, params, envelope.session_id);
            return;
        }

        let session_id = envelope.session_id.clone();
        let ext_tag = self.extension_tag_for_session(session_id.as_deref());

        let mut result = self
            .extension
            .dispatch_to_client(client.id.clone(), id, &method, params.clone(), session_id.clone(), ext_tag.clone())
            .await;

        // Under `QueueWithGracePeriod`, a command that arrives while the
        // extension is idle waits for at most one grace interval for it to
        // (re)connect before failing, rather than failing immediately.
        if matches!(result, Err(Error::ExtensionUnavailable))
            && self.wait_policy == ExtensionWaitPolicy::QueueWithGracePeriod
            && self.extension.wait_for_connection(self.extension_wait_grace).await
        {
            result = self
                .extension
                .dispatch_to_client(client.id.clone(), id, &method, params, session_id.clone(), ext_tag)
                .await;
        }

        if let Err(err) = result {
            let response = Envelope::error(id, err.to_cdp_error()).with_session(session_id);
            let _ = client.deliver_envelope(&response);
        }
    }

    fn extension_tag_for_session(&self, session_id: Option<&str>) -> Option<String> {
        let session_id = session_id?;
        let target_id = self.sessions.get(session_id)?.target_id.clone();
        self.tab_id_for_target(&target_id).map(|t| t.to_string())
    }

    fn tab_id_for_target(&self, target_id: &str) -> Option<TabId> {
        self.targets.lock().unwrap().tab_id_for(target_id)
    }

    fn handle_local_command(
        &self,
        client: &Arc<ClientHandle>,
        id: u64,
        method: InterceptedMethod,
        params: Value,
        session_id: Option<String>,
    ) {
        if let InterceptedMethod::TargetSetAutoAttach = method {
            // The ack must reach the client before any synthesized
            // `Target.attachedToTarget` events for targets that already
            // exist at setAutoAttach time (spec §8 scenario 1).
            client.auto_attach.store(true, Ordering::SeqCst);
            let response = Envelope::result(id, json!({})).with_session(session_id);
            let _ = client.deliver_envelope(&response);
            self.attach_client_to_all(client);
            return;
        }

        let response = match method {
            InterceptedMethod::TargetSetAutoAttach => unreachable!("handled above"),
            InterceptedMethod::TargetGetTargets => {
                let infos = self.targets.lock().unwrap().snapshot();
                Envelope::result(id, json!({ "targetInfos": infos }))
            }
            InterceptedMethod::TargetAttachToTarget => match params.get("targetId").and_then(Value::as_str) {
                Some(target_id) => match self.attach_client_to_target(client, target_id) {
                    Some(session_id) => Envelope::result(id, json!({ "sessionId": session_id })),
                    None => Envelope::error(id, Error::target_not_found(target_id).to_cdp_error()),
                },
                None => Envelope::error(id, Error::protocol("attachToTarget requires targetId").to_cdp_error()),
            },
            InterceptedMethod::TargetDetachFromTarget => {
                let target_session = params
                    .get("sessionId")
                    .and_then(Value::as_str)
                    .or(session_id.as_deref());
                match target_session {
                    Some(sid) => {
                        self.detach_session(sid);
                        Envelope::result(id, json!({}))
                    }
                    None => Envelope::error(id, Error::protocol("detachFromTarget requires sessionId").to_cdp_error()),
                }
            }
            InterceptedMethod::BrowserGetVersion => Envelope::result(
                id,
                json!({
                    "protocolVersion": "1.3",
                    "product": format!("CdpRelay/{}", self.version),
                    "revision": "r0",
                    "userAgent": format!("CdpRelay/{} (extension-backed)", self.version),
                    "jsVersion": "0",
                }),
            ),
            InterceptedMethod::BrowserClose | InterceptedMethod::BrowserSetDownloadBehavior => {
                Envelope::result(id, json!({}))
            }
        };
        let _ = client.deliver_envelope(&response.with_session(session_id));
    }

    fn attach_client_to_all(&self, client: &Arc<ClientHandle>) {
        let already: DashSet<String> = client
            .sessions
            .iter()
            .filter_map(|s| self.sessions.get(s.as_str()).map(|r| r.target_id.clone()))
            .collect();
        let targets = self.targets.lock().unwrap().snapshot();
        for info in targets {
            if already.contains(&info.target_id) {
                continue;
            }
            self.mint_and_announce(client, &info.target_id, &info.url, &info.title);
        }
    }

    fn attach_client_to_target(&self, client: &Arc<ClientHandle>, target_id: &str) -> Option<String> {
        let info = self.targets.lock().unwrap().get(target_id)?;
        Some(self.mint_and_announce(client, target_id, &info.url, &info.title))
    }

    fn mint_and_announce(&self, client: &Arc<ClientHandle>, target_id: &str, _url: &str, _title: &str) -> String {
        let session_id = self.mint_session_id();
        self.sessions.insert(
            session_id.clone(),
            SessionRecord {
                client_id: client.id.clone(),
                target_id: target_id.to_string(),
            },
        );
        self.target_sessions
            .entry(target_id.to_string())
            .or_default()
            .insert(session_id.clone());
        client.sessions.insert(session_id.clone());

        let Some(info) = self.targets.lock().unwrap().get(target_id) else {
            return session_id;
        };
        let event = Envelope::event(
            "Target.attachedToTarget",
            json!({
                "sessionId": session_id,
                "targetInfo": info,
                "waitingForDebugger": false,
            }),
        );
        let _ = client.deliver_envelope(&event);
        session_id
    }

    fn detach_session(&self, session_id: &str) {
        if let Some((_, record)) = self.sessions.remove(session_id) {
            if let Some(set) = self.target_sessions.get(&record.target_id) {
                set.remove(session_id);
            }
            if let Some(client) = self.clients.get(&record.client_id) {
                client.sessions.remove(session_id);
            }
        }
    }

    // ---- (2)/(3) extension -> clients ---------------------------------------------

    /// Handle one inbound frame from the `/extension` socket.
    pub async fn handle_extension_inbound(&self, envelope: Envelope) {
        match envelope.classify() {
            Ok(Kind::Response) => self.handle_extension_response(envelope),
            Ok(Kind::Command) => {
                warn!("extension sent a command envelope, which it should never do, ignoring")
            }
            Ok(Kind::Event) => self.handle_extension_event(envelope).await,
            Err(err) => warn!(%err, "malformed extension frame"),
        }
    }

    fn handle_extension_response(&self, envelope: Envelope) {
        let id = envelope.id.expect("classify guarantees id for Response");
        match self.extension.resolve(id, envelope.result, envelope.error) {
            Resolution::ToClient { client_id, envelope } => self.deliver_to(&client_id, &envelope),
            Resolution::Delivered => {}
            Resolution::Unknown => debug!(id, "late or unknown extension response"),
        }
    }

    async fn handle_extension_event(&self, envelope: Envelope) {
        let method = envelope.method.clone().unwrap_or_default();
        let params = envelope.params.clone().unwrap_or(Value::Null);

        if !extension_protocol::is_cdp_method(&method) {
            self.handle_control_notification(&method, params);
            return;
        }

        let tab_id = envelope
            .session_id
            .as_deref()
            .and_then(|s| s.parse::<TabId>().ok())
            .or_else(|| params.get("tabId").and_then(Value::as_i64));

        let Some(tab_id) = tab_id else {
            warn!(method, "CDP event from extension carries no tab tag, dropping");
            return;
        };
        let Some(target_id) = self.targets.lock().unwrap().tab_id_to_target(tab_id) else {
            debug!(tab_id, "CDP event for an untracked tab, dropping");
            return;
        };
        self.fan_out_event(&target_id, &method, params);
    }

    fn fan_out_event(&self, target_id: &str, method: &str, params: Value) {
        let Some(sessions) = self.target_sessions.get(target_id) else {
            return;
        };
        for session_id in sessions.iter() {
            let Some(record) = self.sessions.get(session_id.as_str()) else {
                continue;
            };
            let event = Envelope::event(method, params.clone()).with_session(Some(session_id.clone()));
            self.deliver_to(&record.client_id, &event);
        }
    }

    fn handle_control_notification(&self, method: &str, params: Value) {
        match method {
            extension_protocol::TAB_ATTACHED => {
                let (Some(tab_id), url, title) = (
                    params.get("tabId").and_then(Value::as_i64),
                    params.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
                    params.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                ) else {
                    return;
                };
                let events = self.targets.lock().unwrap().tab_attached(tab_id, url, title);
                self.apply_target_events(events);
            }
            extension_protocol::TAB_NAVIGATED => {
                let (Some(tab_id), url, title) = (
                    params.get("tabId").and_then(Value::as_i64),
                    params.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
                    params.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                ) else {
                    return;
                };
                let events = self.targets.lock().unwrap().tab_navigated(tab_id, url, title);
                self.apply_target_events(events);
            }
            extension_protocol::TAB_DETACHED => {
                let Some(tab_id) = params.get("tabId").and_then(Value::as_i64) else {
                    return;
                };
                let reason = params.get("reason").and_then(Value::as_str).unwrap_or("unknown");
                let events = self.targets.lock().unwrap().tab_detached(tab_id, reason);
                self.apply_target_events(events);
            }
            extension_protocol::RECORDING_DATA => {
                let Some(tab_id) = params.get("tabId").and_then(Value::as_i64) else {
                    return;
                };
                let is_final = params.get("final").and_then(Value::as_bool).unwrap_or(false);
                self.recordings.note_metadata(tab_id, is_final);
            }
            other => warn!(method = other, "unknown control notification from extension"),
        }
    }

    /// Translate target-manager transitions into the client-facing events
    /// spec'd for component D, minting/reaping sessions as needed.
    fn apply_target_events(&self, events: Vec<TargetEvent>) {
        for event in events {
            match event {
                TargetEvent::Created(info) => {
                    self.broadcast(&Envelope::event("Target.targetCreated", json!({ "targetInfo": info })));
                    for client in self.clients.all() {
                        if client.auto_attach.load(Ordering::SeqCst) {
                            self.mint_and_announce(&client, &info.target_id, &info.url, &info.title);
                        }
                    }
                }
                TargetEvent::InfoChanged(info) => {
                    self.broadcast(&Envelope::event("Target.targetInfoChanged", json!({ "targetInfo": info })));
                }
                TargetEvent::Destroyed { target_id } => {
                    if let Some((_, sessions)) = self.target_sessions.remove(&target_id) {
                        for session_id in sessions.iter() {
                            if let Some((_, record)) = self.sessions.remove(session_id.as_str()) {
                                if let Some(client) = self.clients.get(&record.client_id) {
                                    client.sessions.remove(session_id.as_str());
                                    let detach = Envelope::event(
                                        "Target.detachedFromTarget",
                                        json!({ "sessionId": session_id.as_str() }),
                                    );
                                    self.deliver_to(&client.id, &detach);
                                }
                            }
                        }
                    }
                    self.broadcast(&Envelope::event(
                        "Target.targetDestroyed",
                        json!({ "targetId": target_id }),
                    ));
                }
            }
        }
    }

    // ---- (4) extension link lifecycle ----------------------------------------------

    /// The extension connected. Re-announces nothing by itself — targets
    /// only reappear once the extension reports `tabAttached` again, per
    /// the frozen-target reattachment path.
    pub async fn on_extension_connected(&self, orphaned: Vec<(String, u64, Option<String>)>) {
        self.fail_orphaned(orphaned, Error::ExtensionReplaced);
    }

    /// The extension link dropped (socket closed, or replaced). Every
    /// attached target freezes and is reported to clients as destroyed;
    /// every in-flight request fails; every recording is abandoned
    /// without a partial file.
    pub async fn on_extension_disconnected(&self, orphaned: Vec<(String, u64, Option<String>)>) {
        self.fail_orphaned(orphaned, Error::ExtensionUnavailable);
        let events = self.targets.lock().unwrap().extension_disconnected();
        self.apply_target_events(events);
        self.recordings.extension_disconnected();
    }

    fn fail_orphaned(&self, orphaned: Vec<(String, u64, Option<String>)>, err: Error) {
        for (client_id, orig_id, session_id) in orphaned {
            let envelope = Envelope::error(orig_id, err.to_cdp_error()).with_session(session_id);
            self.deliver_to(&client_id, &envelope);
        }
    }

    // ---- client lifecycle -----------------------------------------------------------

    /// A client's socket closed. Synthesize detaches for every session it
    /// held; if it was the last client on a target, nothing further
    /// happens at the extension level (the extension owns attach/detach
    /// of the underlying tab independent of client count).
    pub fn on_client_disconnected(&self, client: &Arc<ClientHandle>) {
        let sessions: Vec<String> = client.sessions.iter().map(|s| s.clone()).collect();
        for session_id in sessions {
            self.detach_session(&session_id);
        }
        self.clients.remove(&client.id);
    }

    // ---- shared helpers ---------------------------------------------------------------

    fn deliver_to(&self, client_id: &str, envelope: &Envelope) {
        if let Some(client) = self.clients.get(client_id) {
            if client.deliver_envelope(envelope).is_err() {
                client.fail(CLOSE_POLICY_VIOLATION, "backpressure limit exceeded");
                self.on_client_disconnected(&client);
            }
        }
    }

    fn broadcast(&self, envelope: &Envelope) {
        for client in self.clients.all() {
            self.deliver_to(&client.id, envelope);
        }
    }

    /// Periodic maintenance: reap extension requests past their deadline
    /// and targets that have been frozen past their freeze window. Meant
    /// to be called from a background task on a short interval.
    pub fn run_maintenance_tick(&self) {
        for expired in self.extension.sweep_expired() {
            let Expired::ClientBound { client_id, orig_id, session_id } = expired;
            let envelope = Envelope::error(orig_id, Error::timeout("extension request").to_cdp_error())
                .with_session(session_id);
            self.deliver_to(&client_id, &envelope);
        }
        let dropped = self.targets.lock().unwrap().sweep_expired_freezes();
        if dropped > 0 {
            info!(dropped, "dropped frozen targets past their freeze window");
        }
    }

    /// Reject a new client connection because the extension is `idle` and
    /// the configured wait policy does not allow queueing.
    pub fn reject_reason(&self) -> &'static str {
        "extension not connected"
    }

    /// Full relay teardown, run once when the process receives a shutdown
    /// signal (see `server::run`): broadcast a synthesized detach+destroy
    /// for every live target to every attached client (reusing the same
    /// transition the extension's own disconnect produces), close every
    /// client socket, then close the extension link last.
    pub async fn shutdown(&self) {
        let events = self.targets.lock().unwrap().extension_disconnected();
        self.apply_target_events(events);
        for client in self.clients.all() {
            client.fail(CLOSE_NORMAL, "server shutting down");
        }
        self.extension.close("server shutting down").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientFrame;
    use crate::client::ClientFrame as CF;
    use tokio::sync::mpsc;

    fn test_config() -> Config {
        let mut c = Config::default();
        c.extension_command_timeout_secs = 1;
        c.target_freeze_timeout_secs = 1;
        c
    }

    fn register_client(router: &Router, label: &str) -> (Arc<ClientHandle>, mpsc::UnboundedReceiver<ClientFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = router.clients.register(label.to_string(), label.to_string(), tx, 1 << 20);
        (handle, rx)
    }

    fn drain_texts(rx: &mut mpsc::UnboundedReceiver<ClientFrame>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            if let CF::Text(t) = frame {
                out.push(t);
            }
        }
        out
    }

    #[tokio::test]
    async fn auto_attach_then_target_created_yields_attached_to_target() {
        let router = Router::new(&test_config(), "0.1.0");
        let (client, mut rx) = register_client(&router, "a");

        router
            .handle_client_command(
                &client,
                Envelope::parse(r#"{"id":1,"method":"Target.setAutoAttach","params":{"autoAttach":true,"flatten":true}}"#).unwrap(),
            )
            .await;
        let acked = drain_texts(&mut rx);
        assert_eq!(acked.len(), 1);
        assert!(acked[0].contains("\"id\":1"));

        router.handle_control_notification(
            extension_protocol::TAB_ATTACHED,
            json!({"tabId": 42, "url": "https://a", "title": "A"}),
        );

        let frames = drain_texts(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("Target.targetCreated"));
        assert!(frames[1].contains("Target.attachedToTarget"));
    }

    #[tokio::test]
    async fn set_auto_attach_acks_before_announcing_preexisting_targets() {
        let router = Router::new(&test_config(), "0.1.0");
        let (client, mut rx) = register_client(&router, "a");

        router.handle_control_notification(
            extension_protocol::TAB_ATTACHED,
            json!({"tabId": 42, "url": "https://a", "title": "A"}),
        );

        router
            .handle_client_command(
                &client,
                Envelope::parse(r#"{"id":1,"method":"Target.setAutoAttach","params":{"autoAttach":true,"flatten":true}}"#).unwrap(),
            )
            .await;

        let frames = drain_texts(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].contains("\"id\":1") && frames[0].contains("\"result\""));
        assert!(frames[1].contains("Target.attachedToTarget"));
    }

    #[tokio::test]
    async fn two_clients_get_distinct_sessions_for_same_target() {
        let router = Router::new(&test_config(), "0.1.0");
        let (a, mut rx_a) = register_client(&router, "a");
        let (b, mut rx_b) = register_client(&router, "b");

        a.auto_attach.store(true, Ordering::SeqCst);
        b.auto_attach.store(true, Ordering::SeqCst);

        router.handle_control_notification(
            extension_protocol::TAB_ATTACHED,
            json!({"tabId": 42, "url": "https://a", "title": "A"}),
        );

        let frames_a = drain_texts(&mut rx_a);
        let frames_b = drain_texts(&mut rx_b);
        let sid_a = Envelope::parse(&frames_a[1]).unwrap().params.unwrap()["sessionId"]
            .as_str()
            .unwrap()
            .to_string();
        let sid_b = Envelope::parse(&frames_b[1]).unwrap().params.unwrap()["sessionId"]
            .as_str()
            .unwrap()
            .to_string();
        assert_ne!(sid_a, sid_b);
    }

    #[tokio::test]
    async fn extension_disconnect_detaches_every_session() {
        let router = Router::new(&test_config(), "0.1.0");
        let (client, mut rx) = register_client(&router, "a");
        client.auto_attach.store(true, Ordering::SeqCst);

        router.handle_control_notification(
            extension_protocol::TAB_ATTACHED,
            json!({"tabId": 42, "url": "https://a", "title": "A"}),
        );
        drain_texts(&mut rx);

        router.on_extension_disconnected(Vec::new()).await;
        let frames = drain_texts(&mut rx);
        assert!(frames.iter().any(|f| f.contains("Target.detachedFromTarget")));
        assert!(frames.iter().any(|f| f.contains("Target.targetDestroyed")));
        assert!(client.sessions.is_empty());
    }

    #[tokio::test]
    async fn grace_period_policy_waits_for_extension_before_failing() {
        let mut config = test_config();
        config.extension_wait_policy = ExtensionWaitPolicy::QueueWithGracePeriod;
        config.extension_wait_grace_secs = 5;
        let router = Arc::new(Router::new(&config, "0.1.0"));
        let (client, mut rx) = register_client(&router, "a");

        let router2 = router.clone();
        let client2 = client.clone();
        let handle = tokio::spawn(async move {
            router2
                .handle_client_command(
                    &client2,
                    Envelope::parse(r#"{"id":1,"method":"Page.enable","params":{}}"#).unwrap(),
                )
                .await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let (ext_tx, mut ext_rx) = mpsc::unbounded_channel();
        router.extension.bind(ext_tx).await;

        handle.await.unwrap();

        let forwarded = ext_rx.recv().await.unwrap();
        let crate::extension::ExtensionFrame::Text(text) = forwarded else {
            panic!("expected a forwarded command frame");
        };
        assert!(text.contains("Page.enable"));
        assert!(drain_texts(&mut rx).is_empty(), "no error should reach the client");
    }

    #[tokio::test]
    async fn reject_immediately_policy_fails_client_command_right_away() {
        let router = Router::new(&test_config(), "0.1.0");
        let (client, mut rx) = register_client(&router, "a");

        router
            .handle_client_command(
                &client,
                Envelope::parse(r#"{"id":1,"method":"Page.enable","params":{}}"#).unwrap(),
            )
            .await;

        let frames = drain_texts(&mut rx);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("\"error\""));
    }

    #[tokio::test]
    async fn browser_get_version_answered_locally() {
        let router = Router::new(&test_config(), "9.9.9");
        let (client, mut rx) = register_client(&router, "a");
        router
            .handle_client_command(
                &client,
                Envelope::parse(r#"{"id":5,"method":"Browser.getVersion","params":{}}"#).unwrap(),
            )
            .await;
        let frames = drain_texts(&mut rx);
        assert!(frames[0].contains("9.9.9"));
    }
}
