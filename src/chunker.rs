//! Splitting items into request-sized chunks

use crate::types::TranslationItem;

/// Fixed per-item cost added to source and key length (JSON framing, separators)
pub const ITEM_OVERHEAD_CHARS: usize = 16;

/// An ordered group of items sent as one batch request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    /// Indices into the item slice, ascending
    pub indices: Vec<usize>,
    /// Summed character cost of the items
    pub char_cost: usize,
}

impl Chunk {
    /// Number of items in the chunk
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True if the chunk holds no items
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Character cost of an item against the batch budget
pub fn item_cost(item: &TranslationItem) -> usize {
    item.source_text.chars().count() + item.key_len() + ITEM_OVERHEAD_CHARS
}

/// Greedily group `items` into chunks of at most `max_items` items and `max_chars` cost
///
/// A new chunk starts when the next item would exceed either bound. An item whose
/// cost alone exceeds `max_chars` still gets a chunk of its own, so no item is
/// ever dropped. Chunk order follows input order.
pub fn chunk(items: &[TranslationItem], max_chars: usize, max_items: usize) -> Vec<Chunk> {
    let max_items = max_items.max(1);
    let mut chunks = Vec::new();
    let mut current = Chunk {
        indices: Vec::new(),
        char_cost: 0,
    };

    for (index, item) in items.iter().enumerate() {
        let cost = item_cost(item);
        let over_items = current.len() >= max_items;
        let over_chars = current.char_cost.saturating_add(cost) > max_chars;

        if !current.is_empty() && (over_items || over_chars) {
            chunks.push(std::mem::replace(
                &mut current,
                Chunk {
                    indices: Vec::new(),
                    char_cost: 0,
                },
            ));
        }

        current.indices.push(index);
        current.char_cost += cost;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    tracing::debug!(
        items = items.len(),
        chunks = chunks.len(),
        max_items,
        max_chars,
        "Split items into chunks"
    );
    chunks
}
