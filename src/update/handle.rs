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

//! The per-session handle: the session's private view of a mailbox and its
//! queues of not-yet-delivered updates.

use std::collections::BTreeSet;
use std::mem;
use std::ptr;
use std::sync::{Arc, RwLock, Weak};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use log::debug;

use super::manager::{MailboxKey, Manager};
use super::seqmap;
use super::transport::{UnsolicitedResponse, UpdateTransport};
use crate::model::{Flag, SearchCriteria, Seq, SeqSet, Seqnum, Uid};
use crate::support::error::Error;

/// One queued flag update. The queue holds at most one of these per UID;
/// later updates replace earlier ones.
#[derive(Clone, Debug)]
struct FlagsUpdate {
    uid: Uid,
    flags: Vec<Flag>,
}

/// The registry node for one mailbox key: the set of sessions currently
/// selected on it.
///
/// Membership is held weakly so that the `Manager`'s table remains the
/// authoritative root of the object graph; a handle is kept alive by the
/// server task that obtained it, not by the registry.
pub(super) struct Shared<K: MailboxKey> {
    pub(super) key: K,
    pub(super) members: RwLock<Vec<Weak<SessionHandle<K>>>>,
}

/// A single session's view of one selected mailbox.
///
/// The handle owns the session's private sequence-number snapshot and the
/// queues of updates other sessions (or the embedder's own operations) have
/// fanned out to it. A handle moves between "selected" and "idling" as the
/// session enters and leaves [`SessionHandle::idle`], and is retired by
/// [`SessionHandle::close`]; a closed handle is inert but safe to call.
pub struct SessionHandle<K: MailboxKey> {
    manager: Manager<K>,
    shared: Arc<Shared<K>>,
    transport: Arc<dyn UpdateTransport>,
    state: RwLock<SessionState>,
}

struct SessionState {
    /// The UIDs this session currently sees, strictly increasing. The
    /// sequence number of a message is its 1-based index here.
    uid_map: Vec<Uid>,
    /// The messages this session considers `\Recent`. A member is either in
    /// `uid_map` or still waiting in `pending_created`.
    recent: BTreeSet<Uid>,
    /// Whether the recent set grew since the last `RECENT` report.
    has_new_recent: bool,
    /// UIDs expunged elsewhere but still holding their sequence numbers
    /// here until a `sync(true)`.
    pending_expunge: SeqSet,
    /// UIDs delivered elsewhere but not yet announced by `EXISTS` here.
    pending_created: SeqSet,
    /// Queued flag updates, at most one per UID.
    pending_flags: Vec<FlagsUpdate>,
    /// Installed while the session is in `idle`; a single-slot channel so
    /// that any number of enqueues between wakeups collapse into one.
    idle_wake: Option<Sender<()>>,
}

impl SessionState {
    /// Wake the idle loop, if one is running. Must be called with the state
    /// lock held (i.e. from within a queue mutation).
    fn wake(&self) {
        if let Some(ref wake) = self.idle_wake {
            // A full slot means a wakeup is already pending; coalesce.
            let _ = wake.try_send(());
        }
    }
}

impl<K: MailboxKey> SessionHandle<K> {
    pub(super) fn new(
        manager: Manager<K>,
        shared: Arc<Shared<K>>,
        transport: Arc<dyn UpdateTransport>,
        uid_map: Vec<Uid>,
        recent: &SeqSet,
    ) -> Arc<Self> {
        assert!(
            uid_map.windows(2).all(|w| w[0] < w[1]),
            "initial UID snapshot not strictly increasing"
        );

        let recent = recent
            .iter()
            .filter_map(Uid::of)
            .collect::<BTreeSet<Uid>>();
        debug_assert!(
            recent.iter().all(|uid| uid_map.binary_search(uid).is_ok()),
            "initial recent set not a subset of the snapshot"
        );

        Arc::new(SessionHandle {
            manager,
            shared,
            transport,
            state: RwLock::new(SessionState {
                uid_map,
                recent,
                has_new_recent: false,
                pending_expunge: SeqSet::new(),
                pending_created: SeqSet::new(),
                pending_flags: Vec::new(),
                idle_wake: None,
            }),
        })
    }

    /// Resolve a client-supplied sequence set into a UID set addressable by
    /// the backend.
    ///
    /// If `uid` is true the set already contains UIDs; it is normalised (`*`
    /// sentinels become the last UID, and a range left reversed by that
    /// substitution is swapped, so that `N:*` with `N` past the end still
    /// addresses the highest message as RFC 3501 requires). Otherwise each
    /// range is translated from sequence numbers; ranges that no longer
    /// resolve are dropped, since RFC 3501 says references to expunged
    /// messages are to be ignored.
    ///
    /// Returns [`Error::NoMessages`] if the session's snapshot is empty or
    /// nothing resolved. The returned set may still name UIDs the backend
    /// has already expunged; the backend must skip the misses.
    pub fn resolve_seq(
        &self,
        uid: bool,
        set: &SeqSet,
    ) -> Result<SeqSet, Error> {
        let state = self.state.read().unwrap();

        let last = match state.uid_map.last() {
            Some(last) => last.0.get(),
            None => return Err(Error::NoMessages),
        };

        let mut result = SeqSet::new();
        if uid {
            for &seq in set.parts() {
                let start = if 0 == seq.start { last } else { seq.start };
                let stop = if 0 == seq.stop { last } else { seq.stop };
                // add_range re-orders bounds left reversed by the sentinel
                // substitution rather than dropping them.
                result.add_range(start, stop);
            }
        } else {
            for &seq in set.parts() {
                if let Some(resolved) = seqmap::seq_to_uid(&state.uid_map, seq)
                {
                    result.add_range(resolved.start, resolved.stop);
                }
            }
        }

        if result.is_empty() {
            Err(Error::NoMessages)
        } else {
            Ok(result)
        }
    }

    /// Rewrite `criteria` so that no sequence-number criterion remains:
    /// every `seq_num` set is resolved to UIDs and merged into the `uid`
    /// set, recursively through negations and disjunctions.
    ///
    /// Sets that fail to resolve become empty (match nothing), mirroring how
    /// a search over expunged messages behaves.
    pub fn resolve_criteria(&self, criteria: &mut SearchCriteria) {
        if let Some(uid_set) = criteria.uid.take() {
            criteria.uid =
                Some(self.resolve_seq(true, &uid_set).unwrap_or_default());
        }

        if let Some(seq_set) = criteria.seq_num.take() {
            let resolved =
                self.resolve_seq(false, &seq_set).unwrap_or_default();
            match criteria.uid {
                Some(ref mut uid_set) => uid_set.add_set(&resolved),
                None => criteria.uid = Some(resolved),
            }
        }

        for not in &mut criteria.not {
            self.resolve_criteria(not);
        }
        for &mut (ref mut left, ref mut right) in &mut criteria.or {
            self.resolve_criteria(left);
            self.resolve_criteria(right);
        }
    }

    /// Return the sequence number this session currently assigns to `uid`,
    /// or `None` if the message is not addressable here.
    pub fn uid_as_seq(&self, uid: Uid) -> Option<Seqnum> {
        let state = self.state.read().unwrap();
        seqmap::uid_to_seq(&state.uid_map, Seq::point(uid.0.get()))
            .and_then(|seq| Seqnum::of(seq.start))
    }

    /// Return whether this session considers `uid` to be `\Recent`.
    pub fn is_recent(&self, uid: Uid) -> bool {
        self.state.read().unwrap().recent.contains(&uid)
    }

    /// Return the number of messages in this session's snapshot.
    pub fn msgs_count(&self) -> usize {
        self.state.read().unwrap().uid_map.len()
    }

    /// Flush this session's pending updates to its transport.
    ///
    /// Flag updates are always delivered, then (only if `expunge` is true)
    /// expungements, then message creations. `sync(true)` MUST NOT be called
    /// while a command addressing messages by sequence number is in flight:
    /// delivering `EXPUNGE` renumbers the messages under the command. The
    /// one exception is `COPY`, whose addressing has been resolved to UIDs
    /// by the time it runs. `sync(false)` is always safe.
    pub fn sync(&self, expunge: bool) {
        let mut guard = self.state.write().unwrap();
        let state = &mut *guard;

        for upd in mem::take(&mut state.pending_flags) {
            let seqnum =
                seqmap::uid_to_seq(&state.uid_map, Seq::point(upd.uid.0.get()))
                    .and_then(|seq| Seqnum::of(seq.start));
            if let Some(seqnum) = seqnum {
                self.transport.send_update(UnsolicitedResponse::Fetch {
                    seqnum,
                    uid: upd.uid,
                    flags: upd.flags,
                });
            }
            // No sequence number: the message was expunged in this session
            // and the update is moot.
        }

        if expunge && !state.pending_expunge.is_empty() {
            let expunged_uids = mem::take(&mut state.pending_expunge);

            // A message expunged before this session ever assigned it a
            // sequence number is stillborn: the client never saw it, so it
            // is neither announced nor expunged.
            if !state.pending_created.is_empty() {
                let mut live = SeqSet::new();
                for uid in state
                    .pending_created
                    .iter()
                    .filter(|&uid| !expunged_uids.contains(uid))
                {
                    live.add_num(uid);
                }
                state.pending_created = live;
            }

            let mut expunged_seqnums = Vec::<Seqnum>::new();
            let mut index = 0u32;
            state.uid_map.retain(|uid| {
                index += 1;
                if expunged_uids.contains(uid.0.get()) {
                    expunged_seqnums.push(Seqnum::of(index).unwrap());
                    false
                } else {
                    true
                }
            });

            state
                .recent
                .retain(|uid| !expunged_uids.contains(uid.0.get()));

            // Descending order, so that earlier responses do not renumber
            // the messages named by later ones.
            for &seqnum in expunged_seqnums.iter().rev() {
                self.transport
                    .send_update(UnsolicitedResponse::Expunge(seqnum));
            }
        }

        if !state.pending_created.is_empty() {
            for uid in mem::take(&mut state.pending_created).iter() {
                let uid = match Uid::of(uid) {
                    Some(uid) => uid,
                    None => continue,
                };
                // UIDs are assigned monotonically, so the new ones all sort
                // after the snapshot.
                debug_assert!(state.uid_map.last() < Some(&uid));
                state.uid_map.push(uid);
            }

            self.transport.send_update(UnsolicitedResponse::Exists(
                state.uid_map.len() as u32,
            ));
            if state.has_new_recent {
                state.has_new_recent = false;
                self.transport.send_update(UnsolicitedResponse::Recent(
                    state.recent.len() as u32,
                ));
            }
        }
    }

    /// Block until `done` fires, flushing all pending updates (including
    /// expungements --- an idling session has no command in flight) every time
    /// the session is woken by an enqueued update.
    ///
    /// The wake channel only exists while this call is running; the caller
    /// must `sync` once after its last command and before idling so that
    /// updates queued in between are not stranded. Dropping the `done`
    /// sender cancels the idle the same way an explicit signal does.
    pub fn idle(&self, done: &Receiver<()>) {
        let wake = {
            let mut state = self.state.write().unwrap();
            let (wake_send, wake_recv) = bounded(1);
            state.idle_wake = Some(wake_send);
            wake_recv
        };

        loop {
            select! {
                recv(wake) -> _ => self.sync(true),
                recv(done) -> _ => break,
            }
        }

        self.state.write().unwrap().idle_wake = None;
    }

    /// Fan a flag change out to every session selected on this mailbox.
    ///
    /// To be called by the embedder after it has committed the new flag list
    /// for `uid` to its store. `flags` is the complete new flag list and
    /// must not include `\Recent` (that flag is per-session; this module
    /// appends it where appropriate). `silent` corresponds to
    /// `FLAGS.SILENT`: the originating session is skipped, and only the
    /// originating session, so a non-silent `STORE` still echoes the update
    /// back to its issuer.
    pub fn flags_changed(&self, uid: Uid, flags: &[Flag], silent: bool) {
        debug_assert!(
            !flags.contains(&Flag::Recent),
            "\\Recent must not be stored"
        );

        let members = self.shared.members.read().unwrap();
        for member in members.iter().filter_map(Weak::upgrade) {
            if silent && ptr::eq(&*member, self) {
                continue;
            }
            member.enqueue_flags(uid, flags);
        }
    }

    /// Fan a single removed message out to every session selected on this
    /// mailbox, the originator included. The expungement is only delivered
    /// to each session at its next `sync(true)`.
    pub fn removed(&self, uid: Uid) {
        self.removed_set(&SeqSet::just(uid.0.get()));
    }

    /// Set form of [`SessionHandle::removed`].
    pub fn removed_set(&self, uids: &SeqSet) {
        let members = self.shared.members.read().unwrap();
        for member in members.iter().filter_map(Weak::upgrade) {
            member.enqueue_removed(uids);
        }
    }

    /// Retire this handle: the session has unselected the mailbox or
    /// disconnected.
    ///
    /// Removes the handle from the mailbox's membership; the last member out
    /// also retires the registry entry itself. Calling this more than once,
    /// or after the mailbox was destroyed, is harmless.
    pub fn close(&self) {
        let mut evicted = false;
        {
            let registry = self.manager.registry();
            let mut registry = registry.write().unwrap();
            let mut members = self.shared.members.write().unwrap();

            members.retain(|weak| match weak.upgrade() {
                Some(member) => !ptr::eq(&*member, self),
                None => false,
            });

            if members.is_empty() {
                // The key may already map to a newer entry if the mailbox
                // was destroyed and re-selected while this handle lingered;
                // only evict our own entry.
                let ours = registry
                    .get(&self.shared.key)
                    .map_or(false, |entry| Arc::ptr_eq(entry, &self.shared));
                if ours {
                    registry.remove(&self.shared.key);
                    evicted = true;
                }
            }
        }

        if evicted {
            debug!(
                "last session closed on {:?}; entry retired",
                self.shared.key
            );
            self.manager.notify_unsubscribe(&self.shared.key);
        }
    }

    /// Queue a flag update for this session, replacing any queued update for
    /// the same UID, and adding `\Recent` if this session considers the
    /// message recent.
    pub(super) fn enqueue_flags(&self, uid: Uid, flags: &[Flag]) {
        let mut state = self.state.write().unwrap();

        let mut flags = flags.to_vec();
        if state.recent.contains(&uid) {
            flags.push(Flag::Recent);
        }

        match state.pending_flags.iter_mut().find(|upd| upd.uid == uid) {
            Some(upd) => upd.flags = flags,
            None => state.pending_flags.push(FlagsUpdate { uid, flags }),
        }

        state.wake();
    }

    /// Queue newly created messages for this session, optionally granting it
    /// the `\Recent` ownership of them.
    pub(super) fn enqueue_created(&self, uids: &SeqSet, grant_recent: bool) {
        let mut state = self.state.write().unwrap();

        state.pending_created.add_set(uids);
        if grant_recent {
            for uid in uids.iter().filter_map(Uid::of) {
                state.recent.insert(uid);
            }
            state.has_new_recent = true;
        }

        state.wake();
    }

    /// Queue removed messages for this session.
    pub(super) fn enqueue_removed(&self, uids: &SeqSet) {
        let mut state = self.state.write().unwrap();
        state.pending_expunge.add_set(uids);
        state.wake();
    }
}
