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

//! The update-coordination core: fan-out of mailbox mutations to the
//! sessions selected on that mailbox.
//!
//! ## Architecture
//!
//! A process holds one [`Manager`], which maps each mailbox key to a shared
//! entry. The shared entry tracks the set of [`SessionHandle`]s currently
//! selected on that mailbox. When the embedding server mutates a mailbox ---
//! delivers a message, changes flags, expunges --- it reports the mutation to
//! the `Manager` (or, for flag changes and removals, to its own handle,
//! which reaches its siblings through the shared entry). The mutation is
//! *queued* into each member session; nothing is written to any connection
//! at that point.
//!
//! Each session drains its queues by calling [`SessionHandle::sync`] after
//! every command, or implicitly while blocked in [`SessionHandle::idle`].
//! This split is what lets a session keep its private sequence-number
//! snapshot stable for the duration of a command: an expungement performed
//! by one session is only allowed to renumber another session's messages at
//! that other session's own synchronisation points, and only when that
//! session declares renumbering safe (`sync(true)`).
//!
//! ## Locking
//!
//! Three lock levels, always acquired outermost-first:
//!
//! 1. The `Manager`'s registry lock (write to register or destroy an entry,
//!    read for fan-out lookup).
//! 2. A shared entry's membership lock (write for join/leave, read for
//!    fan-out iteration).
//! 3. A session handle's state lock (write for queue mutation and `sync`,
//!    read for the resolvers).
//!
//! Fan-out takes the membership read lock and then each member's state
//! write lock inside the loop. Nothing that holds a state lock ever calls
//! back into the shared entry or the `Manager`, so the ordering cannot
//! invert. External hooks are invoked only after all registry and
//! membership locks have been released.
//!
//! ## Idling
//!
//! A session entering `IDLE` installs a single-slot wake channel and parks
//! in a loop that flushes on every wakeup. Wakeups are coalesced: any number
//! of queued mutations between two loop iterations produce one flush. The
//! wake channel does not exist before `idle` is entered, so the caller must
//! perform one `sync` *after* any command processing and *before* idling in
//! a loop of the shape used by the `IDLE` command implementation:
//!
//! ```ignore
//! handle.sync(true);          // flush everything queued so far
//! handle.idle(&done);         // park; flushes on each wakeup until `done`
//! ```

mod handle;
mod manager;
mod seqmap;
mod transport;

#[cfg(test)]
pub(crate) mod test_prelude;

pub use self::handle::SessionHandle;
pub use self::manager::{
    ExternalHooks, MailboxKey, Manager, ManagerConfig, UpdateEvent,
    UpdateKind,
};
pub use self::transport::{UnsolicitedResponse, UpdateTransport};
