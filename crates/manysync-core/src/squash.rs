//! Combining pending messages.
//!
//! Squashing two messages from the same stream yields one message whose
//! clock is the union of both clocks and whose changes are the first
//! message's changes followed by the second's. Because document engines
//! apply changes idempotently and order-independently, the result is
//! equivalent to delivering both messages.

use std::collections::HashMap;

use crate::clock::VectorClock;
use crate::message::{Changes, Incoming, Message};

/// Combine two messages into one.
///
/// The result carries changes iff either input did.
#[must_use]
pub fn squash<C>(a: Message<C>, b: Message<C>) -> Message<C> {
    let (a_clock, a_changes) = into_clock_and_changes(a);
    let (b_clock, b_changes) = into_clock_and_changes(b);
    let clock = a_clock.union(&b_clock);

    let changes = match (a_changes, b_changes) {
        (Some(mut first), Some(second)) => {
            first.extend(second);
            Some(first)
        }
        (Some(only), None) | (None, Some(only)) => Some(only),
        (None, None) => None,
    };

    match changes {
        Some(changes) => Message::WithChanges { clock, changes },
        None => Message::ClockOnly { clock },
    }
}

/// Left fold of [`squash`] over `messages`; `None` for an empty input.
pub fn squash_all<C, I>(messages: I) -> Option<Message<C>>
where
    I: IntoIterator<Item = Message<C>>,
{
    messages.into_iter().reduce(squash)
}

/// Squash every peer's messages in `batch` into one entry per peer.
///
/// Peers keep the position of their first message; each peer's messages
/// are squashed in arrival order.
#[must_use]
pub fn coalesce<C>(batch: Vec<Incoming<C>>) -> Vec<Incoming<C>> {
    let mut slots: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Incoming<C>> = Vec::with_capacity(batch.len());

    for Incoming { peer_id, message } in batch {
        if let Some(&idx) = slots.get(&peer_id) {
            let slot = &mut out[idx];
            let previous = std::mem::replace(&mut slot.message, Message::request());
            slot.message = squash(previous, message);
        } else {
            slots.insert(peer_id.clone(), out.len());
            out.push(Incoming { peer_id, message });
        }
    }

    out
}

fn into_clock_and_changes<C>(
    message: Message<C>,
) -> (VectorClock, Option<Changes<C>>) {
    match message {
        Message::ClockOnly { clock } => (clock, None),
        Message::WithChanges { clock, changes } => (clock, Some(changes)),
    }
}
