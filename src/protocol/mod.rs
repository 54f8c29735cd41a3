//! Wire Protocol
//!
//! One open-ended `Envelope` type carries every message between the
//! coordinator and its workers, so the protocol stays extensible without
//! versioning each frame. Commands that mutate durable worker state carry a
//! sequence id and are only considered delivered once the matching `Ack`
//! comes back; fire-and-forget commands never carry one.
//!
//! ## Submodules
//! - **`types`**: The `Envelope`/`Command` tagged union and sequence ids.
//! - **`codec`**: Length-prefixed bincode framing over any async byte stream.

pub mod codec;
pub mod types;
