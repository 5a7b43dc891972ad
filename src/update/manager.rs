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

//! The process-wide registry of selected mailboxes and the entry points the
//! embedding server calls when mailbox contents change.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, RwLock, Weak};

use crossbeam_channel::Sender;
use log::{debug, warn};

use super::handle::{SessionHandle, Shared};
use super::transport::UpdateTransport;
use crate::model::{Flag, SeqSet, Uid};

/// The bounds a mailbox key must satisfy: an opaque identity,
/// equality-comparable and hashable, unique within the process for the
/// lifetime of a logical mailbox.
///
/// A common instance is a string of the form `username \0 mailbox-name`.
/// Note that under that scheme a rename must destroy *both* the source and
/// target keys; nothing else needs to be encoded.
pub trait MailboxKey:
    Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static
{
}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> MailboxKey
    for T
{
}

/// Callbacks fired when a mailbox key gains its first selected session and
/// loses its last one.
///
/// Embedders that replicate updates between processes use these to start and
/// stop listening for cross-process events on the key. The callbacks are
/// invoked outside the registry's locks, but still synchronously on the
/// calling session's task; they should be quick.
pub trait ExternalHooks<K>: Send + Sync {
    fn subscribe(&self, key: &K);
    fn unsubscribe(&self, key: &K);
}

/// What kind of change an [`UpdateEvent`] describes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    NewMessage,
    MailboxDestroyed,
}

/// A record of one fan-out entry point having been called, published to the
/// configured sink.
///
/// This is the cross-process replication tap: it is purely passive and does
/// not drive local fan-out. `uids` is empty for `MailboxDestroyed`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdateEvent<K> {
    pub kind: UpdateKind,
    pub key: K,
    pub uids: SeqSet,
}

/// Optional collaborators for a [`Manager`].
pub struct ManagerConfig<K> {
    /// Where to publish [`UpdateEvent`]s, if anywhere.
    pub sink: Option<Sender<UpdateEvent<K>>>,
    /// Subscription hooks, if any.
    pub hooks: Option<Box<dyn ExternalHooks<K>>>,
}

impl<K> Default for ManagerConfig<K> {
    fn default() -> Self {
        ManagerConfig {
            sink: None,
            hooks: None,
        }
    }
}

/// The process-wide update coordinator.
///
/// One `Manager` exists per server process. It maps each mailbox key to the
/// set of sessions currently selected on that mailbox and fans mutations out
/// to them. `Manager` is a cheap handle; clones share the same registry.
pub struct Manager<K: MailboxKey> {
    inner: Arc<ManagerInner<K>>,
}

impl<K: MailboxKey> Clone for Manager<K> {
    fn clone(&self) -> Self {
        Manager {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ManagerInner<K: MailboxKey> {
    handles: RwLock<HashMap<K, Arc<Shared<K>>>>,
    sink: Option<Sender<UpdateEvent<K>>>,
    hooks: Option<Box<dyn ExternalHooks<K>>>,
}

impl<K: MailboxKey> Default for Manager<K> {
    fn default() -> Self {
        Manager::new()
    }
}

impl<K: MailboxKey> Manager<K> {
    pub fn new() -> Self {
        Manager::with_config(ManagerConfig::default())
    }

    pub fn with_config(config: ManagerConfig<K>) -> Self {
        Manager {
            inner: Arc::new(ManagerInner {
                handles: RwLock::new(HashMap::new()),
                sink: config.sink,
                hooks: config.hooks,
            }),
        }
    }

    /// Register a session that has just selected the mailbox identified by
    /// `key`, and return its handle.
    ///
    /// `uids` is the snapshot of all message UIDs currently in the mailbox,
    /// in ascending order. `recent` holds the UIDs carrying a persistent
    /// `\Recent` flag; the caller must clear that persistent flag in its
    /// store once it has been passed here, so that no two selections receive
    /// the same value. `transport` is this session's emitter for untagged
    /// responses, captured for the life of the handle.
    pub fn mailbox(
        &self,
        key: K,
        transport: Arc<dyn UpdateTransport>,
        uids: Vec<Uid>,
        recent: &SeqSet,
    ) -> Arc<SessionHandle<K>> {
        let (handle, shared, created) = {
            let mut handles = self.inner.handles.write().unwrap();

            let (shared, created) = match handles.get(&key) {
                Some(shared) => (Arc::clone(shared), false),
                None => {
                    let shared = Arc::new(Shared {
                        key: key.clone(),
                        members: RwLock::new(Vec::new()),
                    });
                    handles.insert(key, Arc::clone(&shared));
                    (shared, true)
                },
            };

            let handle = SessionHandle::new(
                self.clone(),
                Arc::clone(&shared),
                transport,
                uids,
                recent,
            );
            shared.members.write().unwrap().push(Arc::downgrade(&handle));

            (handle, shared, created)
        };

        if created {
            debug!("first session selected on {:?}", shared.key);
            if let Some(ref hooks) = self.inner.hooks {
                hooks.subscribe(&shared.key);
            }
        }

        handle
    }

    /// Dispatch updates for a single message newly added to the mailbox
    /// (UID already assigned and committed to the store).
    ///
    /// Returns true if no currently-selected session took `\Recent`
    /// ownership of the message, in which case the caller must store a
    /// persistent `\Recent` flag for the next selection to pick up.
    pub fn new_message(&self, key: &K, uid: Uid) -> bool {
        let uids = SeqSet::just(uid.0.get());
        self.emit(UpdateKind::NewMessage, key, uids.clone());
        self.fan_out_created(key, &uids)
    }

    /// Set form of [`Manager::new_message`], for bulk insertion.
    pub fn new_messages(&self, key: &K, uids: &SeqSet) -> bool {
        debug_assert!(uids.is_resolved());
        self.emit(UpdateKind::NewMessage, key, uids.clone());
        self.fan_out_created(key, uids)
    }

    /// Note that `key` no longer identifies a live mailbox, because the
    /// mailbox was deleted or renamed.
    ///
    /// To be called after the physical deletion, for every removed mailbox
    /// on `DELETE` and for *both* the source and target keys on `RENAME`.
    /// Sessions still holding handles keep them; their fan-out simply finds
    /// no members any more, and their eventual `close` calls are no-ops.
    pub fn mailbox_destroyed(&self, key: &K) {
        self.emit(UpdateKind::MailboxDestroyed, key, SeqSet::new());

        let removed = {
            let mut handles = self.inner.handles.write().unwrap();
            match handles.remove(key) {
                Some(shared) => {
                    shared.members.write().unwrap().clear();
                    true
                },
                None => false,
            }
        };

        if removed {
            debug!("mailbox {:?} destroyed while selected", key);
            if let Some(ref hooks) = self.inner.hooks {
                hooks.unsubscribe(key);
            }
        }
    }

    /// Dispatch expunge updates for messages learned to be removed through
    /// an external channel (e.g. another process replicating through the
    /// subscription hooks). A no-op for keys with no selected session.
    pub fn removed_set(&self, key: &K, uids: &SeqSet) {
        self.for_each_member(key, |member| member.enqueue_removed(uids));
    }

    /// Dispatch a flag update learned through an external channel. Unlike
    /// `SessionHandle::flags_changed` there is no originating session, so
    /// every member receives the update.
    pub fn flags_changed(&self, key: &K, uid: Uid, flags: &[Flag]) {
        self.for_each_member(key, |member| member.enqueue_flags(uid, flags));
    }

    fn fan_out_created(&self, key: &K, uids: &SeqSet) -> bool {
        let mut granted = false;
        self.for_each_member(key, |member| {
            // Exactly one currently-selected session observes the new
            // messages as \Recent.
            member.enqueue_created(uids, !granted);
            granted = true;
        });
        !granted
    }

    fn for_each_member(
        &self,
        key: &K,
        mut f: impl FnMut(&Arc<SessionHandle<K>>),
    ) {
        let handles = self.inner.handles.read().unwrap();
        let shared = match handles.get(key) {
            Some(shared) => shared,
            // The mailbox has no selected session (or was destroyed in a
            // race with this event); nothing to do.
            None => return,
        };

        let members = shared.members.read().unwrap();
        for member in members.iter().filter_map(Weak::upgrade) {
            f(&member);
        }
    }

    fn emit(&self, kind: UpdateKind, key: &K, uids: SeqSet) {
        if let Some(ref sink) = self.inner.sink {
            let event = UpdateEvent {
                kind,
                key: key.clone(),
                uids,
            };
            if sink.send(event).is_err() {
                warn!("update sink disconnected; dropping {:?} event", kind);
            }
        }
    }

    pub(super) fn registry(&self) -> &RwLock<HashMap<K, Arc<Shared<K>>>> {
        &self.inner.handles
    }

    pub(super) fn notify_unsubscribe(&self, key: &K) {
        if let Some(ref hooks) = self.inner.hooks {
            hooks.unsubscribe(key);
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    use super::super::test_prelude::*;
    use super::super::transport::UnsolicitedResponse;
    use super::*;
    use crate::model::Seqnum;

    #[test]
    fn new_message_fans_out_with_single_recency_owner() {
        let setup = set_up(&[6]);

        assert!(
            !setup.manager.new_message(&setup.key, Uid::u(7)),
            "a selected session took ownership, so the store must not \
             persist \\Recent"
        );

        // Exactly one of the two sessions owns \Recent for UID 7
        let a_recent = setup.a.is_recent(Uid::u(7));
        let b_recent = setup.b.is_recent(Uid::u(7));
        assert!(a_recent ^ b_recent);

        setup.a.sync(false);
        let mut expected = vec![UnsolicitedResponse::Exists(2)];
        if a_recent {
            expected.push(UnsolicitedResponse::Recent(1));
        }
        assert_eq!(expected, setup.ta.take());

        setup.b.sync(false);
        let mut expected = vec![UnsolicitedResponse::Exists(2)];
        if b_recent {
            expected.push(UnsolicitedResponse::Recent(1));
        }
        assert_eq!(expected, setup.tb.take());

        assert_eq!(2, setup.a.msgs_count());
        assert_eq!(2, setup.b.msgs_count());
    }

    #[test]
    fn new_message_with_nobody_selected_persists_recent() {
        let manager = Manager::<String>::new();
        assert!(manager.new_message(&"u\0INBOX".to_owned(), Uid::u(1)));
        assert!(manager
            .new_messages(&"u\0INBOX".to_owned(), &"1:3".parse().unwrap()));
    }

    #[test]
    fn new_messages_set_form_grants_recency_once() {
        let setup = set_up(&[6]);

        assert!(!setup
            .manager
            .new_messages(&setup.key, &"7:9".parse().unwrap()));

        let owner = if setup.a.is_recent(Uid::u(7)) {
            &setup.a
        } else {
            &setup.b
        };
        for uid in 7..=9 {
            assert!(owner.is_recent(Uid::u(uid)));
        }

        owner.sync(false);
        let t = if setup.a.is_recent(Uid::u(7)) {
            &setup.ta
        } else {
            &setup.tb
        };
        assert_eq!(
            vec![
                UnsolicitedResponse::Exists(4),
                UnsolicitedResponse::Recent(3),
            ],
            t.take()
        );
    }

    #[test]
    fn unknown_key_fan_out_is_a_no_op() {
        let setup = set_up(&[6]);
        let other = "someone-else\0INBOX".to_owned();

        setup.manager.removed_set(&other, &"6".parse().unwrap());
        setup
            .manager
            .flags_changed(&other, Uid::u(6), &[Flag::Seen]);

        setup.a.sync(true);
        assert!(setup.ta.is_empty());
        assert_eq!(1, setup.a.msgs_count());
    }

    #[test]
    fn external_ingestion_reaches_every_member() {
        let setup = set_up(&[6, 7]);

        setup
            .manager
            .flags_changed(&setup.key, Uid::u(6), &[Flag::Seen]);
        setup.manager.removed_set(&setup.key, &"7".parse().unwrap());

        for (handle, transport) in
            &[(&setup.a, &setup.ta), (&setup.b, &setup.tb)]
        {
            handle.sync(true);
            assert_eq!(
                vec![
                    UnsolicitedResponse::Fetch {
                        seqnum: Seqnum::u(1),
                        uid: Uid::u(6),
                        flags: vec![Flag::Seen],
                    },
                    UnsolicitedResponse::Expunge(Seqnum::u(2)),
                ],
                transport.take()
            );
        }
    }

    #[test]
    fn close_retires_the_entry_when_the_last_member_leaves() {
        let setup = set_up(&[6]);

        setup.a.close();
        // B is still selected; fan-out still works
        assert!(!setup.manager.new_message(&setup.key, Uid::u(7)));
        assert!(setup.b.is_recent(Uid::u(7)));

        setup.b.close();
        // Nobody selected any more
        assert!(setup.manager.new_message(&setup.key, Uid::u(8)));

        // Closing again is harmless
        setup.a.close();
        setup.b.close();
    }

    #[test]
    fn destroyed_mailbox_detaches_existing_handles() {
        let setup = set_up(&[6]);

        setup.manager.mailbox_destroyed(&setup.key);

        // Events for the dead key go nowhere
        assert!(setup.manager.new_message(&setup.key, Uid::u(7)));
        setup.a.sync(true);
        assert!(setup.ta.is_empty());

        // The stale handles' own fan-out finds no members either
        setup.a.flags_changed(Uid::u(6), &[Flag::Seen], false);
        setup.b.sync(true);
        assert!(setup.tb.is_empty());

        // And their close calls are idempotent no-ops
        setup.a.close();
        setup.b.close();
    }

    #[test]
    fn stale_close_does_not_evict_a_recreated_entry() {
        let setup = set_up(&[6]);

        setup.manager.mailbox_destroyed(&setup.key);

        // The mailbox is re-created and re-selected under the same key
        let transport = RecordingTransport::new();
        let replacement = setup.manager.mailbox(
            setup.key.clone(),
            transport.clone(),
            vec![Uid::u(1)],
            &SeqSet::new(),
        );

        // A's close is from the pre-destruction era and must not tear down
        // the replacement's registration
        setup.a.close();
        assert!(!setup.manager.new_message(&setup.key, Uid::u(2)));
        replacement.sync(false);
        assert_eq!(
            vec![
                UnsolicitedResponse::Exists(2),
                UnsolicitedResponse::Recent(1),
            ],
            transport.take()
        );
    }

    #[test]
    fn subscription_hooks_fire_on_first_select_and_last_close() {
        struct CountingHooks {
            subscribes: AtomicUsize,
            unsubscribes: AtomicUsize,
        }
        impl ExternalHooks<String> for Arc<CountingHooks> {
            fn subscribe(&self, _: &String) {
                self.subscribes.fetch_add(1, SeqCst);
            }
            fn unsubscribe(&self, _: &String) {
                self.unsubscribes.fetch_add(1, SeqCst);
            }
        }

        let hooks = Arc::new(CountingHooks {
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
        });
        let manager = Manager::with_config(ManagerConfig {
            sink: None,
            hooks: Some(Box::new(Arc::clone(&hooks))),
        });

        let key = "u\0INBOX".to_owned();
        let a = manager.mailbox(
            key.clone(),
            RecordingTransport::new(),
            vec![],
            &SeqSet::new(),
        );
        assert_eq!(1, hooks.subscribes.load(SeqCst));

        // A second selection of the same key does not re-subscribe
        let b = manager.mailbox(
            key.clone(),
            RecordingTransport::new(),
            vec![],
            &SeqSet::new(),
        );
        assert_eq!(1, hooks.subscribes.load(SeqCst));

        a.close();
        assert_eq!(0, hooks.unsubscribes.load(SeqCst));
        b.close();
        assert_eq!(1, hooks.unsubscribes.load(SeqCst));

        // Re-selecting subscribes anew
        let c = manager.mailbox(
            key.clone(),
            RecordingTransport::new(),
            vec![],
            &SeqSet::new(),
        );
        assert_eq!(2, hooks.subscribes.load(SeqCst));

        // Destruction also unsubscribes
        manager.mailbox_destroyed(&key);
        assert_eq!(2, hooks.unsubscribes.load(SeqCst));
        c.close();
        assert_eq!(2, hooks.unsubscribes.load(SeqCst));
    }

    #[test]
    fn update_sink_sees_fan_out_calls() {
        let (sink, events) = crossbeam_channel::unbounded();
        let manager = Manager::with_config(ManagerConfig {
            sink: Some(sink),
            hooks: None,
        });
        let key = "u\0INBOX".to_owned();

        // Events flow whether or not anybody is selected
        manager.new_message(&key, Uid::u(3));
        manager.new_messages(&key, &"4:6".parse().unwrap());
        manager.mailbox_destroyed(&key);

        assert_eq!(
            vec![
                UpdateEvent {
                    kind: UpdateKind::NewMessage,
                    key: key.clone(),
                    uids: "3".parse().unwrap(),
                },
                UpdateEvent {
                    kind: UpdateKind::NewMessage,
                    key: key.clone(),
                    uids: "4:6".parse().unwrap(),
                },
                UpdateEvent {
                    kind: UpdateKind::MailboxDestroyed,
                    key: key.clone(),
                    uids: SeqSet::new(),
                },
            ],
            events.try_iter().collect::<Vec<_>>()
        );
    }

    #[test]
    fn recency_ownership_is_exclusive_under_concurrency() {
        let setup = set_up(&[]);
        let manager = setup.manager.clone();
        let key = setup.key.clone();

        let deliverer = std::thread::spawn(move || {
            let mut unowned = 0;
            for uid in 1..=100u32 {
                if manager.new_message(&key, Uid::u(uid)) {
                    unowned += 1;
                }
            }
            unowned
        });

        // Concurrently churn syncs on both sessions
        let churn = {
            let a = Arc::clone(&setup.a);
            let b = Arc::clone(&setup.b);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    a.sync(true);
                    b.sync(true);
                }
            })
        };

        let unowned = deliverer.join().unwrap();
        churn.join().unwrap();
        assert_eq!(0, unowned, "two sessions were selected throughout");

        setup.a.sync(false);
        setup.b.sync(false);

        for uid in 1..=100u32 {
            let uid = Uid::u(uid);
            assert!(
                !(setup.a.is_recent(uid) && setup.b.is_recent(uid)),
                "both sessions consider {:?} recent",
                uid
            );
            assert!(
                setup.a.is_recent(uid) || setup.b.is_recent(uid),
                "nobody took recency for {:?}",
                uid
            );
        }

        assert_eq!(100, setup.a.msgs_count());
        assert_eq!(100, setup.b.msgs_count());
    }
}
