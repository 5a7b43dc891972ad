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

//! Mailcast is the update-coordination core of an IMAP4rev1 server.
//!
//! IMAP requires every session selected on a mailbox to observe changes made
//! by other sessions --- new messages, flag changes, expungements --- while each
//! session addresses messages through sequence numbers that are private to it
//! and must not shift underneath an in-flight command. Mailcast implements
//! exactly that coordination layer and nothing else: a process-wide
//! [`Manager`] fans mailbox mutations out to per-session [`SessionHandle`]s,
//! each of which owns a private sequence-number snapshot, a per-session
//! `\Recent` set, and queues of pending updates which are flushed to the
//! session's transport at well-defined synchronisation points.
//!
//! The surrounding server supplies everything else --- the wire parser, the
//! message store, authentication --- and talks to Mailcast through two narrow
//! surfaces: it calls the [`Manager`] when messages change, and it receives
//! untagged responses through an [`UpdateTransport`] it provides per session.
//!
//! See the [`update`] module for the architecture and locking discipline.

pub mod model;
pub mod support;
pub mod update;

pub use crate::model::{Flag, SearchCriteria, Seq, SeqSet, Seqnum, Uid};
pub use crate::support::error::Error;
pub use crate::update::{
    ExternalHooks, MailboxKey, Manager, ManagerConfig, SessionHandle,
    UnsolicitedResponse, UpdateEvent, UpdateKind, UpdateTransport,
};
