//! The mutation step shared by every store.
//!
//! A store runs [`apply`] inside its exclusive transaction, between reading
//! the current entry for a key and writing back the result together with the
//! updated node state.

use crate::entry::{merge, Entry};
use crate::node::{ClockError, NodeState};

/// Merge `incoming` into `current` and advance the node clock.
///
/// Returns the entry to store. On return `state.counter` equals the winner's
/// new counter, and `state.remote_counter` has absorbed `incoming.counter`
/// if the entry originated on another node.
///
/// # Errors
///
/// Returns `ClockError::Exhausted` if the winner's counter has no successor;
/// `state` is then left untouched.
pub fn apply(
    state: &mut NodeState,
    current: Option<Entry>,
    incoming: Entry,
) -> Result<Entry, ClockError> {
    let remote = (incoming.process_id != state.process_id).then_some(incoming.counter);

    let current = current.unwrap_or_else(|| incoming.clone());
    let mut winner = merge(incoming, current);

    let counter = state.next_counter(winner.counter)?;
    if let Some(observed) = remote {
        state.observe_remote(observed);
    }
    winner.counter = counter;
    state.counter = counter;

    Ok(winner)
}
