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

//! The contract between the update core and the embedding server's
//! connection layer.

use crate::model::{Flag, Seqnum, Uid};

/// An untagged response queued for a session, flushed by `sync`.
///
/// Each value corresponds to exactly one RFC 3501 §7.3/§7.4 response line.
/// `Exists` and `Recent` are distinct values rather than one compound status
/// because some clients require `RECENT` to arrive as its own response
/// directly after `EXISTS`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnsolicitedResponse {
    /// `* <n> EXISTS` --- the total message count after insertion.
    Exists(u32),
    /// `* <n> RECENT` --- the session's current `\Recent` count.
    Recent(u32),
    /// `* <seqnum> EXPUNGE` --- the message's sequence number from before its
    /// removal.
    Expunge(Seqnum),
    /// `* <seqnum> FETCH (FLAGS (...) UID <uid>)` --- a flag update, addressed
    /// by the session's current sequence number for the message.
    ///
    /// `flags` includes `\Recent` when this session considers the message
    /// recent.
    Fetch {
        seqnum: Seqnum,
        uid: Uid,
        flags: Vec<Flag>,
    },
}

/// What the update core requires of the embedding server: a way to emit an
/// untagged response on one session's connection.
///
/// The implementation is captured when the session's handle is created and
/// invoked with the handle's internal lock held, so it must not call back
/// into the update core, and it must not block indefinitely. Emission
/// failures are the transport's own concern; a transport that has lost its
/// connection should discard responses and arrange for the session to be
/// torn down by the server's usual means.
pub trait UpdateTransport: Send + Sync {
    fn send_update(&self, response: UnsolicitedResponse);
}
