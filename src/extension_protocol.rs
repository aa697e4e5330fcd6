//! The `/extension` wire contract.
//!
//! The extension-side debugger proxy (component F) is a browser-sandboxed
//! JavaScript artifact with no Rust runtime to host it — it is out of
//! scope for this crate as code, but its wire contract is not: everything
//! this relay sends to or expects from it is documented here so the
//! contract has one authoritative source, and so [`crate::testutil::mock_extension`]
//! has something precise to implement against.
//!
//! ## Discriminating control frames from CDP frames
//!
//! Every CDP method name is `Domain.method` (contains a `.`). The
//! lifecycle and recording control methods defined below never do. The
//! router uses exactly that to decide, for a method-only (no `id`)
//! envelope arriving from the extension, whether it is a real CDP event
//! to fan out to clients or a control notification to interpret itself.
//!
//! ## Outbound (relay → extension)
//!
//! - Any non-intercepted CDP command is forwarded **unmodified in shape**:
//!   `{id, method, params, sessionId}`, where `sessionId` is the
//!   extension-visible "flat session" tag the router minted for the
//!   target (never a client-visible session id — see `src/router.rs`).
//!   The extension is expected to resolve the tag to a `chrome.debugger`
//!   target and call `chrome.debugger.sendCommand`.
//! - [`START_RECORDING`], [`STOP_RECORDING`], [`IS_RECORDING`],
//!   [`CANCEL_RECORDING`]: control commands, answered like any CDP
//!   command (`{id, result}` / `{id, error}`), but routed locally by the
//!   relay rather than tied to a CDP session.
//!
//! ## Inbound (extension → relay)
//!
//! - Any method-only envelope whose method contains a `.` is a CDP event
//!   forwarded from `chrome.debugger`'s `onEvent`, tagged with either the
//!   flat session the command path established or (for events that
//!   precede any attach) a bare target identifier.
//! - [`TAB_ATTACHED`], [`TAB_DETACHED`], [`TAB_NAVIGATED`]: target
//!   lifecycle signals consumed by `src/target.rs`.
//! - [`RECORDING_DATA`]: the metadata half of a recording chunk pair
//!   (see `src/recording.rs`); the binary frame that follows (or doesn't,
//!   for `final:true`) carries the chunk itself.

/// Start recording a tab. Params: `{tabId?, sessionId?, outputPath}`.
pub const START_RECORDING: &str = "startRecording";
/// Stop recording; completion is signalled by a `final:true` [`RECORDING_DATA`]
/// frame, not by this command's own response.
pub const STOP_RECORDING: &str = "stopRecording";
/// Query whether a tab is currently recording. Params: `{tabId?, sessionId?}`.
pub const IS_RECORDING: &str = "isRecording";
/// Abort a recording without writing a file. Params: `{tabId?, sessionId?}`.
pub const CANCEL_RECORDING: &str = "cancelRecording";

/// A tab gained a `chrome.debugger` attachment. Params: `{tabId, url, title}`.
pub const TAB_ATTACHED: &str = "tabAttached";
/// A tab lost its attachment (closed, user detach, navigation away from a
/// debuggable context). Params: `{tabId, reason}`.
pub const TAB_DETACHED: &str = "tabDetached";
/// A tab navigated while still attached. Params: `{tabId, url, title}`.
pub const TAB_NAVIGATED: &str = "tabNavigated";
/// Routing label preceding (or concluding) a binary recording chunk.
/// Params: `{tabId, final}`.
pub const RECORDING_DATA: &str = "recordingData";

/// True if `method` is a CDP method name (`Domain.method`) rather than
/// one of this module's control methods.
pub fn is_cdp_method(method: &str) -> bool {
    method.contains('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_methods_are_not_mistaken_for_cdp() {
        for m in [
            START_RECORDING,
            STOP_RECORDING,
            IS_RECORDING,
            CANCEL_RECORDING,
            TAB_ATTACHED,
            TAB_DETACHED,
            TAB_NAVIGATED,
            RECORDING_DATA,
        ] {
            assert!(!is_cdp_method(m), "{m} should not look like a CDP method");
        }
    }

    #[test]
    fn cdp_methods_are_recognized() {
        assert!(is_cdp_method("Page.enable"));
        assert!(is_cdp_method("Runtime.evaluate"));
    }
}
