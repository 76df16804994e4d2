// src/pipeline/payload.rs

//! Bounded payload serialization.
//!
//! Shrinks `changes.text.old/new` until the encoded event fits `max_bytes`,
//! binary-searching the total character budget and splitting it between the
//! two sides proportionally by length with carry-over when one saturates.

use crate::error::{AppError, Result};
use crate::models::Event;

fn encoded_len(event: &Event) -> Result<usize> {
    Ok(serde_json::to_vec(event)?.len())
}

/// Truncate a string to at most `chars` characters.
fn truncate_chars(input: &str, chars: usize) -> String {
    input.chars().take(chars).collect()
}

/// Split a total character budget proportionally between the two sides.
fn allocate(total_budget: usize, old_len: usize, new_len: usize) -> (usize, usize) {
    let total = old_len + new_len;
    if total == 0 {
        return (0, 0);
    }
    let old_share = (total_budget * old_len) / total;
    let mut old_alloc = old_share.min(old_len);
    let mut new_alloc = (total_budget - old_alloc).min(new_len);
    // Carry unused budget back to the other side.
    if old_alloc + new_alloc < total_budget {
        old_alloc = (total_budget - new_alloc).min(old_len);
    }
    (old_alloc, new_alloc)
}

fn with_budget(event: &Event, old_full: &str, new_full: &str, budget: usize) -> Event {
    let old_len = old_full.chars().count();
    let new_len = new_full.chars().count();
    let (old_alloc, new_alloc) = allocate(budget, old_len, new_len);

    let mut shrunk = event.clone();
    if let Some(changes) = shrunk.changes.as_mut() {
        if let Some(text) = changes.text.as_mut() {
            text.old = truncate_chars(old_full, old_alloc);
            text.new = truncate_chars(new_full, new_alloc);
        }
    }
    shrunk.payload_truncated = true;
    shrunk
}

/// Return an event whose JSON encoding is at most `max_bytes`.
///
/// Unchanged when it already fits. Fails when nothing is truncatable or when
/// even a zero text budget does not fit. Idempotent: a limited event fits,
/// so a second application returns it as-is.
pub fn limit_payload_bytes(event: &Event, max_bytes: usize) -> Result<Event> {
    if encoded_len(event)? <= max_bytes {
        return Ok(event.clone());
    }

    let (old_full, new_full) = match event.changes.as_ref().and_then(|c| c.text.as_ref()) {
        Some(text) => (text.old.clone(), text.new.clone()),
        None => {
            return Err(AppError::Payload(format!(
                "payload exceeds {max_bytes} bytes and has no truncatable field"
            )))
        }
    };

    let total = old_full.chars().count() + new_full.chars().count();

    if encoded_len(&with_budget(event, &old_full, &new_full, 0))? > max_bytes {
        return Err(AppError::Payload(format!(
            "payload exceeds {max_bytes} bytes even with empty change texts"
        )));
    }

    // Largest budget T in [0, total] whose encoding fits.
    let mut low = 0usize;
    let mut high = total;
    let mut best = with_budget(event, &old_full, &new_full, 0);

    while low <= high {
        let mid = low + (high - low) / 2;
        let candidate = with_budget(event, &old_full, &new_full, mid);
        if encoded_len(&candidate)? <= max_bytes {
            best = candidate;
            if mid == total {
                break;
            }
            low = mid + 1;
        } else {
            if mid == 0 {
                break;
            }
            high = mid - 1;
        }
    }

    Ok(best)
}
