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

//! Shared scaffolding for the update-core tests: a transport that records
//! what would have been written to the wire, and a two-session setup on one
//! mailbox.

use std::sync::{Arc, Mutex};

use super::handle::SessionHandle;
use super::manager::Manager;
use super::transport::{UnsolicitedResponse, UpdateTransport};
use crate::model::{SeqSet, Uid};

/// An `UpdateTransport` that appends every emitted response to a list.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    updates: Mutex<Vec<UnsolicitedResponse>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(RecordingTransport::default())
    }

    /// Drain and return everything emitted so far.
    pub fn take(&self) -> Vec<UnsolicitedResponse> {
        std::mem::take(&mut *self.updates.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        self.updates.lock().unwrap().is_empty()
    }
}

impl UpdateTransport for RecordingTransport {
    fn send_update(&self, response: UnsolicitedResponse) {
        self.updates.lock().unwrap().push(response);
    }
}

pub(crate) struct Setup {
    pub manager: Manager<String>,
    pub key: String,
    pub a: Arc<SessionHandle<String>>,
    pub ta: Arc<RecordingTransport>,
    pub b: Arc<SessionHandle<String>>,
    pub tb: Arc<RecordingTransport>,
}

/// Two sessions selected on the same mailbox, which contains the given
/// UIDs and nothing `\Recent`.
pub(crate) fn set_up(uids: &[u32]) -> Setup {
    set_up_with_recent(uids, &[])
}

/// Like `set_up`, but the first session is selected with the given
/// persistent `\Recent` UIDs (as the first selector, it is the one the
/// store's recency hand-off goes to).
pub(crate) fn set_up_with_recent(uids: &[u32], recent: &[u32]) -> Setup {
    let manager = Manager::new();
    let key = "azure\0INBOX".to_owned();

    let uids = uids
        .iter()
        .copied()
        .map(|uid| Uid::of(uid).unwrap())
        .collect::<Vec<_>>();
    let mut recent_set = SeqSet::new();
    for &uid in recent {
        recent_set.add_num(uid);
    }

    let ta = RecordingTransport::new();
    let a = manager.mailbox(
        key.clone(),
        ta.clone(),
        uids.clone(),
        &recent_set,
    );

    let tb = RecordingTransport::new();
    let b = manager.mailbox(key.clone(), tb.clone(), uids, &SeqSet::new());

    Setup {
        manager,
        key,
        a,
        ta,
        b,
        tb,
    }
}
