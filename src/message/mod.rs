//! Message envelope construction and serialization
//!
//! This module separates the wire format from send processing:
//!
//! - [`envelope`] - the JSON structure placed on the wire, plus the
//!   reserved message type identifiers
//! - [`builder`] - the pipeline that assembles envelopes from a payload
//!   and server-side options, then serializes them
//!
//! Processing options ([`MessageOptions`]) and the wire form ([`Envelope`])
//! are distinct types, which is what keeps options like `exclude_clients`
//! or `transform` off the wire.

pub mod builder;
pub mod envelope;

pub use builder::{MessageBuilder, MessageOptions, MessagePayload, MetadataSelection, Transform};
pub use envelope::{message_types, Envelope};
