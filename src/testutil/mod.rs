//! Test doubles, gated behind the `test-util` feature.
//!
//! The real extension-side debugger proxy (component F) is out of scope
//! for this crate — see `src/extension_protocol.rs`. This module ships
//! the mock that stands in for it in integration tests, the same role
//! `cdp::mock::MockCdpConnection` plays for the teacher's CDP layer.

pub mod mock_extension;
