//
// mailstore - folder module
//
// Copyright 2026 mailstore contributors
//
// This file is part of mailstore.
//
// mailstore is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// mailstore is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with mailstore. If not, see <http://www.gnu.org/licenses/>.
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Folder paths, properties and the IMAP folder descriptor consumed by
//! reconciliation.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind, Result};

/// The canonical root Inbox name. At most one root folder matching
/// [`is_inbox_name`] may exist, and it must carry this exact form.
pub const CANONICAL_INBOX: &str = "INBOX";

/// IMAP Inbox predicate: `INBOX` is case-insensitive on the wire.
pub fn is_inbox_name(name: &str) -> bool {
    name.eq_ignore_ascii_case(CANONICAL_INBOX)
}

/// Row id of a folder in `FolderTable`.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[repr(transparent)]
pub struct FolderId(pub i64);

impl fmt::Display for FolderId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

impl rusqlite::types::ToSql for FolderId {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        self.0.to_sql()
    }
}

impl rusqlite::types::FromSql for FolderId {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

/// Path of a folder within the mailbox hierarchy, with `/` as separator.
///
/// Paths are non-empty lists of non-empty segments; anything else is
/// rejected with [`ErrorKind::BadParameters`].
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct FolderPath(Vec<String>);

impl FolderPath {
    pub fn new(segments: Vec<String>) -> Result<Self> {
        if segments.is_empty() || segments.iter().any(String::is_empty) {
            return Err(Error::new("Malformed folder path: empty segment")
                .set_kind(ErrorKind::BadParameters));
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Last path segment.
    pub fn basename(&self) -> &str {
        // Invariant: the segment list is never empty.
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Parent path, or `None` for a root-level folder.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() < 2 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn child(&self, name: &str) -> Result<Self> {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self::new(segments)
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Display for FolderPath {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(&self.0.join("/"))
    }
}

impl FromStr for FolderPath {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        Self::new(input.split('/').map(str::to_string).collect())
    }
}

bitflags::bitflags! {
    /// IMAP mailbox attribute flags as reported by `LIST`, persisted in the
    /// folder row.
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
    pub struct FolderAttributes: u32 {
        const NO_SELECT       = 0b0000_0001;
        const NO_INFERIORS    = 0b0000_0010;
        const MARKED          = 0b0000_0100;
        const UNMARKED        = 0b0000_1000;
        const HAS_CHILDREN    = 0b0001_0000;
        const HAS_NO_CHILDREN = 0b0010_0000;
        const SUBSCRIBED      = 0b0100_0000;
    }
}

impl rusqlite::types::ToSql for FolderAttributes {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        Ok(rusqlite::types::ToSqlOutput::from(i64::from(self.bits())))
    }
}

impl rusqlite::types::FromSql for FolderAttributes {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        i64::column_result(value).map(|bits| Self::from_bits_truncate(bits as u32))
    }
}

/// The mutable half of a folder row: everything reconciled from the IMAP
/// session plus the unread counter.
///
/// `select_examine_total` and `status_total` are kept apart on purpose:
/// `STATUS` and `SELECT`/`EXAMINE` carry overlapping but non-equal subsets
/// of folder state at different moments of the session, and neither may
/// clobber the other's last observation.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct FolderProperties {
    pub attributes: FolderAttributes,
    /// Message count last observed on `SELECT`/`EXAMINE`.
    pub select_examine_total: usize,
    /// Message count last observed on `STATUS`.
    pub status_total: usize,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    pub unread_count: usize,
}

impl FolderProperties {
    /// Best known message count: the `SELECT`/`EXAMINE` observation wins,
    /// zero meaning "never selected" and falling back to `STATUS`.
    pub fn message_count(&self) -> usize {
        if self.select_examine_total == 0 {
            self.status_total
        } else {
            self.select_examine_total
        }
    }
}

/// Folder state carried by an IMAP `LIST`/`STATUS`/`SELECT` response,
/// consumed by folder creation and property reconciliation.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ImapFolder {
    pub path: FolderPath,
    /// `EXISTS` count from a `SELECT`/`EXAMINE` response.
    pub select_examine_messages: usize,
    /// `MESSAGES` count from a `STATUS` response.
    pub status_messages: usize,
    pub uid_validity: Option<u32>,
    pub uid_next: Option<u32>,
    pub attributes: FolderAttributes,
    /// Unread count as accounted by the session layer.
    pub email_unread: usize,
    pub unseen: usize,
    pub recent: usize,
}

impl ImapFolder {
    pub fn new(path: FolderPath) -> Self {
        Self {
            path,
            select_examine_messages: 0,
            status_messages: 0,
            uid_validity: None,
            uid_next: None,
            attributes: FolderAttributes::default(),
            email_unread: 0,
            unseen: 0,
            recent: 0,
        }
    }
}

/// `uid_validity`/`uid_next` "unknown" sentinel in the folder row.
pub(crate) const UID_SENTINEL: i64 = -1;

pub(crate) fn uid_to_sql(uid: Option<u32>) -> i64 {
    uid.map_or(UID_SENTINEL, i64::from)
}

pub(crate) fn uid_from_sql(value: i64) -> Option<u32> {
    u32::try_from(value).ok()
}
