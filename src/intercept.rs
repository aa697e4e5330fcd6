//! The intercepted-method table (part of component E): CDP methods the
//! relay answers itself instead of forwarding to the extension, because
//! `chrome.debugger` has no equivalent for them.
//!
//! This is a fixed, documented set by design (see spec notes on scope
//! creep): adding an entry here changes wire semantics for every client,
//! so the table is a compile-time `phf::Map` rather than anything a
//! runtime code path could mutate.

/// A CDP method the router answers locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterceptedMethod {
    TargetSetAutoAttach,
    TargetGetTargets,
    TargetAttachToTarget,
    TargetDetachFromTarget,
    BrowserGetVersion,
    BrowserClose,
    BrowserSetDownloadBehavior,
}

static INTERCEPTED: phf::Map<&'static str, InterceptedMethod> = phf::phf_map! {
    "Target.setAutoAttach" => InterceptedMethod::TargetSetAutoAttach,
    "Target.getTargets" => InterceptedMethod::TargetGetTargets,
    "Target.attachToTarget" => InterceptedMethod::TargetAttachToTarget,
    "Target.detachFromTarget" => InterceptedMethod::TargetDetachFromTarget,
    "Browser.getVersion" => InterceptedMethod::BrowserGetVersion,
    "Browser.close" => InterceptedMethod::BrowserClose,
    "Browser.setDownloadBehavior" => InterceptedMethod::BrowserSetDownloadBehavior,
};

/// Look up whether `method` is answered locally.
pub fn lookup(method: &str) -> Option<InterceptedMethod> {
    INTERCEPTED.get(method).copied()
}
