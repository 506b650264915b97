//! # rc-core
//!
//! Shared protocol library for the remote-control fleet administration
//! system.
//!
//! This crate contains:
//! - **Wire types**: [`Message`], [`MessageOptions`], [`Response`] — the
//!   JSON text frames exchanged between `rc-client` and `rc-server`.
//! - **Signature**: request authentication via a directory of Ed25519
//!   keys (`signature::create_sig` / `signature::check_sig`).
//! - **Error**: [`RcError`] — typed, `thiserror`-based error hierarchy
//!   shared by both binaries.

pub mod error;
pub mod protocol;
pub mod signature;

pub use error::RcError;
pub use protocol::{Message, MessageOptions, Response};
pub use signature::{SIGNATURE_HEADER_NAME, check_sig, create_sig};
