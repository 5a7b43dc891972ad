//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Mailcast.
//
// Mailcast is free software: you can redistribute it and/or modify it under
// the terms of  the GNU General Public License as  published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailcast is distributed  in the hope that it will  be useful, but WITHOUT
// ANY  WARRANTY; without  even  the implied  warranty  of MERCHANTABILITY  or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along
// with Mailcast. If not, see <http://www.gnu.org/licenses/>.

//! Translation between a session's private sequence numbers and persistent
//! UIDs, over the session's snapshot of the mailbox.
//!
//! The snapshot is a strictly increasing vector of UIDs; the sequence number
//! of a message is its 1-based position in the vector. Both directions
//! accept the `0` sentinel (IMAP `*`) for "the highest-numbered message".
//!
//! Nothing here locks or allocates; these are the pure kernels that the
//! session handle's resolvers are built from.

use crate::model::{Seq, Uid};

/// Translate a sequence-number range into a UID range.
///
/// The `0` sentinel resolves to the last message. A point range whose start
/// lies beyond the end of the snapshot does not resolve; a wider range has
/// its stop clamped to the last message instead.
///
/// Returns `None` if the snapshot is empty or the range does not resolve.
pub(super) fn seq_to_uid(uid_map: &[Uid], seq: Seq) -> Option<Seq> {
    let last = match uid_map.last() {
        Some(uid) => uid.0.get(),
        None => return None,
    };

    let start = if 0 == seq.start {
        last
    } else if seq.start as usize > uid_map.len() {
        return None;
    } else {
        uid_map[seq.start as usize - 1].0.get()
    };

    if seq.is_point() {
        return Some(Seq::point(start));
    }

    let stop = if 0 == seq.stop || seq.stop as usize > uid_map.len() {
        last
    } else {
        uid_map[seq.stop as usize - 1].0.get()
    };

    Some(Seq { start, stop })
}

/// Translate a UID range into a sequence-number range.
///
/// The `0` sentinel resolves to the last position. A start beyond the
/// highest UID does not resolve; a start below the lowest is clamped to
/// position 1. Range bounds which name an expunged UID bind to the nearest
/// position that keeps the range's meaning: the smallest position at or
/// above the start, the largest at or below the stop. A *point* range,
/// however, addresses one specific message and only resolves if that exact
/// UID is present.
///
/// Returns `None` if the snapshot is empty, the range does not resolve, or
/// the resolved range is empty.
pub(super) fn uid_to_seq(uid_map: &[Uid], seq: Seq) -> Option<Seq> {
    if uid_map.is_empty() {
        return None;
    }

    let len = uid_map.len() as u32;
    let first = uid_map[0].0.get();
    let last = uid_map[uid_map.len() - 1].0.get();

    let start = if 0 == seq.start {
        len
    } else if seq.start > last {
        return None;
    } else if seq.start < first {
        if seq.is_point() {
            return None;
        }
        1
    } else {
        let pos = position_at_or_above(uid_map, seq.start);
        if seq.is_point() && uid_map[pos as usize - 1].0.get() != seq.start {
            return None;
        }
        pos
    };

    if seq.is_point() {
        return Some(Seq::point(start));
    }

    let stop = if 0 == seq.stop || seq.stop > last {
        len
    } else if seq.stop < first {
        return None;
    } else {
        let pos = position_at_or_above(uid_map, seq.stop);
        if uid_map[pos as usize - 1].0.get() != seq.stop {
            // The stop UID was expunged; "up to and including X" then means
            // up to the last message below X.
            pos - 1
        } else {
            pos
        }
    };

    if start > stop {
        return None;
    }

    Some(Seq { start, stop })
}

/// The 1-based position of the smallest UID ≥ `uid`.
///
/// The caller has already established that such a UID exists.
fn position_at_or_above(uid_map: &[Uid], uid: u32) -> u32 {
    uid_map.partition_point(|u| u.0.get() < uid) as u32 + 1
}
