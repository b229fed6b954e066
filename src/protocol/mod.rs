//! Wire protocol: message types, framing encoder, replaying decoder.
//!
//! Layouts (all integers big-endian):
//!
//! ```text
//! request  = [1B op code][4B sequence id][1B argc]
//!            argc × ([1B null-flag] [value if flag == 1])
//!
//! reply    = [1B discriminator] body
//!   response      = [1B op code][4B sequence id][4B payload length][value]
//!   notification  = [4B registration id][value]
//!   cache         = [1B command]
//! ```
//!
//! The response payload-length field is advisory only: decoding relies on
//! the codec's self-description to find the end of the value, and a length
//! mismatch is logged, not fatal.

mod decoder;
mod encoder;
mod frame;

pub use decoder::{ReplyDecoder, RequestDecoder};
pub use encoder::{encode_cache_directive, encode_notification, encode_request, encode_response};
pub use frame::{CacheCommand, Notification, Reply, Request, Response, DEFAULT_REGISTRY};

/// Reply discriminator: a response correlated to a request.
pub const REPLY_RESPONSE: u8 = 0;
/// Reply discriminator: an unsolicited notification envelope.
pub const REPLY_NOTIFICATION: u8 = 1;
/// Reply discriminator: a cache directive.
pub const REPLY_CACHE: u8 = 2;

/// Cache directive command: flush the bean-name reference tables.
pub const CACHE_FLUSH_NAMES: u8 = 0;

/// Upper bound accepted for the advisory response payload-length field.
/// A larger claim is structural corruption.
pub const MAX_PAYLOAD_HINT: u32 = 64 * 1024 * 1024;
