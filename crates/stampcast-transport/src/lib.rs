//! Stampcast transport layer
//!
//! The chat platform is an external collaborator reached through the
//! [`Transport`] trait. [`LocalTransport`] implements it on top of a directory
//! tree so the whole system runs without a network service:
//!
//! ```text
//! <root>/media/                 staged media, addressed by key
//! <root>/outbox/<chat_id>/      everything sent or edited
//! <root>/inbox/<chat_id>/       files dropped here become private-chat events
//! <root>/inbox/channel-<id>/    files dropped here become channel-post events
//! ```

pub mod local;
pub mod traits;

pub use local::LocalTransport;
pub use traits::{ChatKind, InboundEvent, Transport, TransportError, TransportResult};
