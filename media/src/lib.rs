//! Inline image attachments for pixelchat.
//!
//! Converts an arbitrary user-selected picture into a small [`InlineImage`]
//! that can be embedded directly in a chat message:
//!
//! ```text
//! raw bytes ─> decode ─> bounded_dimensions ─> resize ─> encode ─> base64
//! ```
//!
//! Every call decodes into its own buffer and draws into a fresh surface,
//! so nothing is shared between transcodes.

mod transcode;

pub use pixelchat_protocol::InlineImage;
pub use transcode::{
    DEFAULT_MAX_DIMENSION, ImageTranscoder, TranscodeError, Transcoded, bounded_dimensions,
};
