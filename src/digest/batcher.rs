//! Size-bounded digest packing.
//!
//! Items are packed greedily, in source order and then item order, into
//! messages no larger than a byte cap. Each message holds one bundle per
//! contributing source. An item bigger than the cap on its own still goes
//! out, alone in its message.
//!
//! Numbering happens once everything is placed: a source's bundles are
//! numbered 1..K across messages, its items 1..N, and messages 1..M.

use std::collections::HashMap;

use tracing::warn;

/// Anything that can be packed into a digest
pub trait DigestItem {
    /// Bytes this item adds to a message
    fn byte_size(&self) -> usize;
}

/// A source's newly saved items, in save order
#[derive(Debug, Clone)]
pub struct DigestSource<T> {
    pub name: String,
    pub title: String,
    pub items: Vec<T>,
}

impl<T> DigestSource<T> {
    pub fn new(name: impl Into<String>, title: impl Into<String>, items: Vec<T>) -> Self {
        Self {
            name: name.into(),
            title: title.into(),
            items,
        }
    }
}

/// An item placed in a bundle, with its position within the source
#[derive(Debug, Clone)]
pub struct DigestEntry<T> {
    pub item: T,
    /// 1-based position among the source's items
    pub seq: usize,
    /// Number of items the source contributed
    pub total: usize,
}

/// A contiguous run of one source's items inside a message
#[derive(Debug, Clone)]
pub struct Bundle<T> {
    pub source: String,
    pub title: String,
    /// 1-based bundle number within the source
    pub index: usize,
    /// Number of bundles the source was split into
    pub count: usize,
    /// Number of items the source contributed
    pub source_total: usize,
    pub entries: Vec<DigestEntry<T>>,
}

impl<T: DigestItem> Bundle<T> {
    pub fn byte_size(&self) -> usize {
        self.entries.iter().map(|e| e.item.byte_size()).sum()
    }
}

impl<T> Bundle<T> {
    /// "(i/k)" when the source spans several bundles, empty otherwise
    pub fn sequence_label(&self) -> String {
        if self.count == 1 {
            String::new()
        } else {
            format!("({}/{})", self.index, self.count)
        }
    }
}

/// One outgoing digest message
#[derive(Debug, Clone)]
pub struct Message<T> {
    /// 1-based message number
    pub index: usize,
    /// Number of messages in the digest
    pub count: usize,
    pub bundles: Vec<Bundle<T>>,
}

impl<T: DigestItem> Message<T> {
    pub fn byte_size(&self) -> usize {
        self.bundles.iter().map(Bundle::byte_size).sum()
    }
}

impl<T> Message<T> {
    fn empty() -> Self {
        Self {
            index: 0,
            count: 0,
            bundles: Vec::new(),
        }
    }

    pub fn item_count(&self) -> usize {
        self.bundles.iter().map(|b| b.entries.len()).sum()
    }
}

/// Packs sources into size-bounded messages
#[derive(Debug, Clone, Copy)]
pub struct DigestBatcher {
    max_message_bytes: usize,
}

impl DigestBatcher {
    pub fn new(max_message_bytes: usize) -> Self {
        Self { max_message_bytes }
    }

    pub fn max_message_bytes(&self) -> usize {
        self.max_message_bytes
    }

    /// Pack items into messages. Sources are taken in case-insensitive
    /// name order; sources without items contribute nothing.
    pub fn pack<T: DigestItem>(&self, mut sources: Vec<DigestSource<T>>) -> Vec<Message<T>> {
        sources.sort_by_key(|s| s.name.to_lowercase());

        let mut messages = Vec::new();
        let mut current = Message::empty();
        let mut current_size = 0usize;

        for source in sources {
            let total = source.items.len();
            for (i, item) in source.items.into_iter().enumerate() {
                let size = item.byte_size();

                if current_size + size > self.max_message_bytes && !current.bundles.is_empty() {
                    messages.push(std::mem::replace(&mut current, Message::empty()));
                    current_size = 0;
                }
                if size > self.max_message_bytes {
                    warn!(
                        source = %source.name,
                        item = i + 1,
                        size,
                        max = self.max_message_bytes,
                        "Item exceeds the message size cap, sending it alone"
                    );
                }

                let entry = DigestEntry {
                    item,
                    seq: i + 1,
                    total,
                };
                match current.bundles.last_mut() {
                    Some(bundle) if bundle.source == source.name => bundle.entries.push(entry),
                    _ => current.bundles.push(Bundle {
                        source: source.name.clone(),
                        title: source.title.clone(),
                        index: 0,
                        count: 0,
                        source_total: total,
                        entries: vec![entry],
                    }),
                }
                current_size += size;
            }
        }
        if !current.bundles.is_empty() {
            messages.push(current);
        }

        number(&mut messages);
        messages
    }
}

fn number<T>(messages: &mut [Message<T>]) {
    let mut bundle_counts: HashMap<String, usize> = HashMap::new();
    for bundle in messages.iter_mut().flat_map(|m| m.bundles.iter_mut()) {
        let seen = bundle_counts.entry(bundle.source.clone()).or_default();
        *seen += 1;
        bundle.index = *seen;
    }
    for bundle in messages.iter_mut().flat_map(|m| m.bundles.iter_mut()) {
        bundle.count = bundle_counts[&bundle.source];
    }

    let count = messages.len();
    for (i, message) in messages.iter_mut().enumerate() {
        message.index = i + 1;
        message.count = count;
    }
}
