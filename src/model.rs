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

//! The data model shared by every part of the crate: message identifiers,
//! sequence sets, flags, and the identifier-bearing part of the search
//! grammar.
//!
//! Nothing here does I/O or locking; these are plain values.

use std::convert::TryFrom;
use std::fmt;
use std::mem;
use std::num::NonZeroU32;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::support::error::Error;

/// `NonZeroU32::new` for literals known to be non-zero, usable in `const`
/// position.
const fn nz(v: u32) -> NonZeroU32 {
    match NonZeroU32::new(v) {
        Some(n) => n,
        None => panic!("nz(0)"),
    }
}

/// Uniquely identifies a message within a single mailbox.
///
/// UIDs start at 1 and increase monotonically as messages are added to the
/// mailbox. UIDs are never reused within a UIDVALIDITY epoch. The value 0 is
/// reserved and invalid, which is what makes `NonZeroU32` the right
/// representation.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Uid(pub NonZeroU32);

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Uid").field(&self.0.get()).finish()
    }
}

impl Uid {
    pub const MIN: Self = Uid(nz(1));
    pub const MAX: Self = Uid(nz(u32::MAX));

    pub fn of(uid: u32) -> Option<Self> {
        NonZeroU32::new(uid).map(Uid)
    }

    pub fn next(self) -> Option<Self> {
        self.0.get().checked_add(1).and_then(Uid::of)
    }

    pub fn saturating_next(self) -> Self {
        self.next().unwrap_or(Self::MAX)
    }

    #[cfg(test)]
    pub fn u(uid: u32) -> Self {
        Uid::of(uid).unwrap()
    }
}

impl TryFrom<u32> for Uid {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl From<Uid> for u32 {
    fn from(uid: Uid) -> u32 {
        uid.0.get()
    }
}

/// The sequence number of a message: one plus the number of other messages
/// preceding it in a session's point-in-time snapshot of the mailbox.
///
/// Sequence numbers are session-private. Two sessions selected on the same
/// mailbox will in general disagree about which message a given sequence
/// number names, because each shifts its numbering only at its own
/// synchronisation points.
#[derive(
    Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct Seqnum(pub NonZeroU32);

impl fmt::Debug for Seqnum {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Seqnum").field(&self.0.get()).finish()
    }
}

impl Seqnum {
    pub const MIN: Self = Seqnum(nz(1));
    pub const MAX: Self = Seqnum(nz(u32::MAX));

    pub fn of(seqnum: u32) -> Option<Self> {
        NonZeroU32::new(seqnum).map(Seqnum)
    }

    #[cfg(test)]
    pub fn u(seqnum: u32) -> Self {
        Seqnum::of(seqnum).unwrap()
    }

    /// The 0-based position in a snapshot vector corresponding to this
    /// sequence number.
    pub fn to_index(self) -> usize {
        self.0.get() as usize - 1
    }

    /// The sequence number corresponding to a 0-based snapshot position.
    pub fn from_index(ix: usize) -> Self {
        let seqnum = u32::try_from(ix + 1)
            .expect("mailbox too large for sequence numbering");
        Seqnum(NonZeroU32::new(seqnum).unwrap())
    }
}

impl TryFrom<u32> for Seqnum {
    type Error = ();

    fn try_from(v: u32) -> Result<Self, ()> {
        Self::of(v).ok_or(())
    }
}

impl From<Seqnum> for u32 {
    fn from(seqnum: Seqnum) -> u32 {
        seqnum.0.get()
    }
}

/// A single inclusive range within a sequence set.
///
/// Either bound may be the sentinel 0, which encodes the IMAP `*` wildcard
/// ("the highest-numbered message"). Before resolution against a concrete
/// snapshot, a range such as `10:*` is represented as `Seq { start: 10,
/// stop: 0 }`.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash,
)]
pub struct Seq {
    pub start: u32,
    pub stop: u32,
}

impl Seq {
    pub fn point(n: u32) -> Self {
        Seq { start: n, stop: n }
    }

    /// Create a range from bounds in wire order, normalising so that the
    /// numerically lesser bound comes first (RFC 3501 allows `4:2`) and the
    /// `*` sentinel, which compares greatest, comes last.
    pub fn range(a: u32, b: u32) -> Self {
        if effective(a) <= effective(b) {
            Seq { start: a, stop: b }
        } else {
            Seq { start: b, stop: a }
        }
    }

    /// Whether this is a one-element range (in the pre-resolution sense;
    /// `*:*` is a point even though its value is not yet known).
    pub fn is_point(&self) -> bool {
        self.start == self.stop
    }

    /// Whether the range contains `n`, treating a sentinel bound as the
    /// maximum possible value.
    pub fn contains(&self, n: u32) -> bool {
        effective(self.start) <= n && n <= effective(self.stop)
    }

    fn len(&self) -> u64 {
        u64::from(effective(self.stop)) - u64::from(effective(self.start)) + 1
    }

    fn has_sentinel(&self) -> bool {
        0 == self.start || 0 == self.stop
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fn bound(f: &mut fmt::Formatter, v: u32) -> fmt::Result {
            if 0 == v {
                write!(f, "*")
            } else {
                write!(f, "{}", v)
            }
        }

        bound(f, self.start)?;
        if !self.is_point() {
            write!(f, ":")?;
            bound(f, self.stop)?;
        }
        Ok(())
    }
}

/// The value a bound sorts and compares as: `*` stands for the highest
/// message and so compares greater than every concrete value.
fn effective(v: u32) -> u32 {
    if 0 == v {
        u32::MAX
    } else {
        v
    }
}

/// An IMAP sequence set: a union of inclusive ranges of sequence numbers or
/// UIDs.
///
/// The set is kept as a minimal ordered list of ranges; inserting merges
/// overlapping and adjacent ranges. Ranges containing the `*` sentinel are
/// preserved verbatim until they are resolved against a snapshot (see
/// `SessionHandle::resolve_seq`); a sentinel bound sorts as the greatest
/// possible value.
///
/// The `Display` format is the minimal IMAP wire form. Note that IMAP has no
/// representation for an empty sequence set; `Display` produces an empty
/// string in that case, which is invalid on the wire.
#[derive(
    Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq,
)]
#[serde(transparent)]
pub struct SeqSet {
    parts: Vec<Seq>,
}

impl SeqSet {
    /// Create a new, empty set.
    pub fn new() -> Self {
        SeqSet::default()
    }

    /// Create a set containing just the given number.
    pub fn just(n: u32) -> Self {
        let mut this = SeqSet::new();
        this.add_num(n);
        this
    }

    /// Create a set containing a single range.
    pub fn range(start: u32, stop: u32) -> Self {
        let mut this = SeqSet::new();
        this.add_range(start, stop);
        this
    }

    /// Add a single number to the set.
    pub fn add_num(&mut self, n: u32) {
        self.insert(Seq::point(n));
    }

    /// Add an inclusive range to the set. The bounds may be given in either
    /// order and may be the `*` sentinel.
    pub fn add_range(&mut self, start: u32, stop: u32) {
        self.insert(Seq::range(start, stop));
    }

    /// Add every range of `other` to this set.
    pub fn add_set(&mut self, other: &SeqSet) {
        for &seq in &other.parts {
            self.insert(seq);
        }
    }

    fn insert(&mut self, seq: Seq) {
        // Find the insertion point, then fuse with any neighbours the new
        // range overlaps or abuts.
        let mut ix = self
            .parts
            .partition_point(|p| effective(p.start) < effective(seq.start));

        if ix > 0 && effective(self.parts[ix - 1].stop).saturating_add(1)
            >= effective(seq.start)
        {
            ix -= 1;
        } else {
            self.parts.insert(ix, seq);
        }

        let merged = &mut self.parts[ix];
        if effective(seq.stop) > effective(merged.stop) {
            merged.stop = seq.stop;
        }
        if effective(seq.start) < effective(merged.start) {
            merged.start = seq.start;
        }

        while ix + 1 < self.parts.len()
            && effective(self.parts[ix].stop).saturating_add(1)
                >= effective(self.parts[ix + 1].start)
        {
            let following = self.parts.remove(ix + 1);
            if effective(following.stop) > effective(self.parts[ix].stop) {
                self.parts[ix].stop = following.stop;
            }
        }
    }

    /// Return whether the given number is a member of the set, with sentinel
    /// bounds standing for the maximum possible value.
    pub fn contains(&self, n: u32) -> bool {
        self.parts.iter().any(|seq| seq.contains(n))
    }

    /// Return whether this set is empty.
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Return the number of elements the set expands to.
    ///
    /// Sentinel bounds count as the maximum possible value, so this is only
    /// really meaningful for resolved sets.
    pub fn count(&self) -> u64 {
        self.parts.iter().map(Seq::len).sum()
    }

    /// Return an iterator over the individual elements of the set, in
    /// strictly ascending order.
    ///
    /// Must only be called on resolved sets; ranges still containing the `*`
    /// sentinel have no enumerable elements.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        debug_assert!(self.is_resolved());
        self.parts
            .iter()
            .flat_map(|seq| seq.start..=seq.stop)
    }

    /// Return the ranges making up this set.
    pub fn parts(&self) -> &[Seq] {
        &self.parts
    }

    /// Return whether no range in the set contains the `*` sentinel.
    pub fn is_resolved(&self) -> bool {
        self.parts.iter().all(|seq| !seq.has_sentinel())
    }
}

impl fmt::Display for SeqSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (ix, seq) in self.parts.iter().enumerate() {
            if 0 != ix {
                write!(f, ",")?;
            }
            write!(f, "{}", seq)?;
        }
        Ok(())
    }
}

impl FromStr for SeqSet {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self, Error> {
        fn bound(r: &str) -> Result<u32, Error> {
            if "*" == r {
                Ok(0)
            } else {
                // "01" and friends are not valid seq-numbers, and neither is
                // an explicit 0.
                match r.parse::<u32>() {
                    Ok(v) if 0 != v && !r.starts_with('0') => Ok(v),
                    _ => Err(Error::BadSeqSet),
                }
            }
        }

        let mut this = SeqSet::new();
        for part in raw.split(',') {
            let mut subs = part.split(':');
            match (subs.next(), subs.next(), subs.next()) {
                (Some(only), None, None) => this.add_num(bound(only)?),
                (Some(start), Some(stop), None) => {
                    this.add_range(bound(start)?, bound(stop)?)
                },
                _ => return Err(Error::BadSeqSet),
            }
        }

        Ok(this)
    }
}

/// A message flag.
///
/// System flags are represented as top-level enum values. Keywords are in the
/// `Keyword` case.
///
/// `Recent` is the per-session `\Recent` pseudo-flag. It is never persisted
/// and the embedder must never pass it in to `FlagsChanged`; the update core
/// itself appends it when delivering flag updates to a session that
/// considers the message recent.
///
/// The `Display` format of this type is the exact string value that would be
/// sent over the wire. `FromStr` does the reverse conversion, and also
/// understands non-standard casing of the system flags.
#[derive(Clone, Serialize, Deserialize)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Recent,
    Seen,
    Keyword(String),
}

/// The system flags and their wire names sans backslash, for parsing.
const SYSTEM_FLAGS: &[(&str, Flag)] = &[
    ("Answered", Flag::Answered),
    ("Deleted", Flag::Deleted),
    ("Draft", Flag::Draft),
    ("Flagged", Flag::Flagged),
    ("Recent", Flag::Recent),
    ("Seen", Flag::Seen),
];

impl Flag {
    /// The exact wire form of this flag.
    pub fn name(&self) -> &str {
        match self {
            Flag::Answered => "\\Answered",
            Flag::Deleted => "\\Deleted",
            Flag::Draft => "\\Draft",
            Flag::Flagged => "\\Flagged",
            Flag::Recent => "\\Recent",
            Flag::Seen => "\\Seen",
            Flag::Keyword(kw) => kw,
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl FromStr for Flag {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        if let Some(bare) = s.strip_prefix('\\') {
            return SYSTEM_FLAGS
                .iter()
                .find(|&&(name, _)| name.eq_ignore_ascii_case(bare))
                .map(|&(_, ref flag)| flag.clone())
                .ok_or(Error::UnknownSystemFlag);
        }

        if !s.is_empty() && s.bytes().all(keyword_char) {
            Ok(Flag::Keyword(s.to_owned()))
        } else {
            Err(Error::InvalidKeyword)
        }
    }
}

/// Whether `ch` may appear in a flag keyword: printable ASCII minus the
/// RFC 3501 atom-specials.
fn keyword_char(ch: u8) -> bool {
    const ATOM_SPECIALS: &[u8] = b"(){%*\"\\]";
    ch.is_ascii_graphic() && !ATOM_SPECIALS.contains(&ch)
}

impl PartialEq for Flag {
    fn eq(&self, other: &Flag) -> bool {
        match (self, other) {
            // Keywords compare ASCII case-insensitively; clients expect
            // NotJunk and NOTJUNK to be one flag.
            (Flag::Keyword(a), Flag::Keyword(b)) => a.eq_ignore_ascii_case(b),
            _ => mem::discriminant(self) == mem::discriminant(other),
        }
    }
}

impl Eq for Flag {}

/// The identifier-bearing portion of an RFC 3501 search criterion tree.
///
/// Content criteria (text matches, dates, sizes, flags) never need
/// session-level coordination and are evaluated by the embedder; the update
/// core only concerns itself with the parts that mention sequence numbers or
/// UIDs, directly or under negation/disjunction, so that they can be
/// rewritten into pure-UID form before the backend sees them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchCriteria {
    /// Messages named by sequence number. `None` after resolution.
    pub seq_num: Option<SeqSet>,
    /// Messages named by UID.
    pub uid: Option<SeqSet>,
    /// Negated sub-criteria.
    pub not: Vec<SearchCriteria>,
    /// Disjunctive sub-criteria pairs (IMAP `OR`).
    pub or: Vec<(SearchCriteria, SearchCriteria)>,
}
