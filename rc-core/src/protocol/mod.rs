//! Wire types exchanged between `rc-client` and `rc-server`.
//!
//! Both [`Message`] and [`Response`] round-trip through canonical,
//! key-ordered JSON text frames: struct fields encode in declaration
//! order, and [`MessageOptions::env`](message::MessageOptions::env) is a
//! `BTreeMap` rather than a `HashMap` so its keys encode in sorted order
//! too. Together these make `encode(decode(encode(m)))` byte-for-byte
//! stable.

pub mod message;
pub mod response;

pub use message::{Message, MessageOptions};
pub use response::Response;
