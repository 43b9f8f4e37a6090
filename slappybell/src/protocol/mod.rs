//! SlappyBell line protocol.

pub mod listing;
pub mod message;
pub mod parser;
pub mod text;

pub use listing::{FileListing, StoredFile};
pub use message::{Message, MessageKind, NOTIFY_PREFIX, RESPONSE_PREFIX, ResultCode};
pub use parser::MessageParser;
pub use text::{Utf8Decoder, drain_utf8_lossy};
