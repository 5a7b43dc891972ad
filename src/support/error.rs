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

use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Sequence-set resolution produced an empty set.
    ///
    /// UID commands must treat this as success with no results; sequence
    /// number commands must propagate it to the client as `NO`.
    #[error("No messages matched")]
    NoMessages,
    #[error("Unknown system flag")]
    UnknownSystemFlag,
    #[error("Flag keyword contains forbidden characters")]
    InvalidKeyword,
    #[error("Malformed sequence set")]
    BadSeqSet,
}
