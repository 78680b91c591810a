//! Session ordering builder.
//!
//! The card order is computed once at session creation and frozen: card ids
//! in ascending order, optionally permuted with the session seed. MODERATE
//! grouping is derived at read time by chunking the frozen order — the
//! shuffle happens once globally, never again inside a group, so a group's
//! contents follow directly from (order, group_size, group_index).

use uuid::Uuid;

use crate::shuffle;

/// Build the frozen card order for a new session.
pub fn build_card_order(mut card_ids: Vec<Uuid>, randomize: bool, seed: u64) -> Vec<Uuid> {
    card_ids.sort();
    if randomize {
        shuffle::shuffle(&mut card_ids, seed);
    }
    card_ids
}

/// Number of groups a frozen order splits into.
pub fn group_count(order_len: usize, group_size: usize) -> usize {
    let size = group_size.max(1);
    order_len.div_ceil(size)
}

/// The contiguous chunk of the frozen order for a group index.
/// Empty when the group index is past the end.
pub fn group_slice(order: &[Uuid], group_size: usize, group_index: usize) -> &[Uuid] {
    let size = group_size.max(1);
    let start = group_index.saturating_mul(size);
    if start >= order.len() {
        return &[];
    }
    let end = (start + size).min(order.len());
    &order[start..end]
}
