//! Wire protocol for the automation channel.
//!
//! Messages are opaque to the proxy core apart from their routing id and
//! optional correlation token. JSON is only the carrier.

mod framing;
mod message;
mod token;

pub use framing::{FrameReader, MAX_FRAME_LEN, MAX_HEADER_LINE, decode_body, encode_frame, write_message};
pub use message::{HELLO, Message};
pub use token::{CallToken, RoutingId};
