//! Digest notifications for newly saved items.
//!
//! - [`DigestBatcher`]: packs items into size-bounded messages
//! - [`render_message`]: Markdown/HTML bodies and the MIME document
//! - [`DigestSender`]: dispatch, with [`Outbox`] as the built-in sender

pub mod batcher;
pub mod outbox;
pub mod render;

pub use batcher::{Bundle, DigestBatcher, DigestEntry, DigestItem, DigestSource, Message};
pub use outbox::{DigestSender, Outbox};
pub use render::{render_message, subject_line, RenderedMessage};

use crate::domain::ContentItem;

impl DigestItem for ContentItem {
    fn byte_size(&self) -> usize {
        self.media.len()
    }
}
