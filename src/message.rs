//
// mailstore - message module
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

//! The message row model.
//!
//! A row may be partially populated; `fields` records which logical fields
//! hold real data. Callers state the fields they require and get an
//! incomplete-message error when the row cannot satisfy them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::utils::UnixTimestamp;

/// Row id of a message in `MessageTable`. Doubles as the `docid` of the
/// message's full-text-search row.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[repr(transparent)]
pub struct MessageRowId(pub i64);

impl fmt::Display for MessageRowId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(fmt)
    }
}

impl rusqlite::types::ToSql for MessageRowId {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        self.0.to_sql()
    }
}

impl rusqlite::types::FromSql for MessageRowId {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        i64::column_result(value).map(Self)
    }
}

bitflags::bitflags! {
    /// Which logical fields of a message row have been populated.
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
    pub struct MessageFields: u32 {
        const MESSAGE_ID   = 0b0000_0000_0001;
        const IN_REPLY_TO  = 0b0000_0000_0010;
        const INTERNALDATE = 0b0000_0000_0100;
        const SUBJECT      = 0b0000_0000_1000;
        const ORIGINATORS  = 0b0000_0001_0000;
        const RECEIVERS    = 0b0000_0010_0000;
        const CC           = 0b0000_0100_0000;
        const BCC          = 0b0000_1000_0000;
        const BODY         = 0b0001_0000_0000;
        const ATTACHMENT   = 0b0010_0000_0000;
        const FLAGS        = 0b0100_0000_0000;
    }
}

impl MessageFields {
    /// The fields mirrored into the full-text index, plus what a valid
    /// message row always carries; the minimum the indexer loads per row.
    pub const INDEXABLE: Self = Self::MESSAGE_ID
        .union(Self::INTERNALDATE)
        .union(Self::SUBJECT)
        .union(Self::ORIGINATORS)
        .union(Self::RECEIVERS)
        .union(Self::CC)
        .union(Self::BCC)
        .union(Self::BODY)
        .union(Self::ATTACHMENT);
}

impl rusqlite::types::ToSql for MessageFields {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        Ok(rusqlite::types::ToSqlOutput::from(i64::from(self.bits())))
    }
}

impl rusqlite::types::FromSql for MessageFields {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        i64::column_result(value).map(|bits| Self::from_bits_truncate(bits as u32))
    }
}

bitflags::bitflags! {
    /// IMAP system flags of a message.
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
    pub struct MessageFlags: u32 {
        const SEEN     = 0b0000_0001;
        const ANSWERED = 0b0000_0010;
        const FLAGGED  = 0b0000_0100;
        const DELETED  = 0b0000_1000;
        const DRAFT    = 0b0001_0000;
        const RECENT   = 0b0010_0000;
    }
}

impl rusqlite::types::ToSql for MessageFlags {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        Ok(rusqlite::types::ToSqlOutput::from(i64::from(self.bits())))
    }
}

impl rusqlite::types::FromSql for MessageFlags {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        i64::column_result(value).map(|bits| Self::from_bits_truncate(bits as u32))
    }
}

/// An attachment as recorded in the message row; the bytes themselves live
/// outside the store.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
}

/// The list of attachments of a message row, stored as a JSON value in the
/// `attachment` column.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct AttachmentList(pub Vec<Attachment>);

impl AttachmentList {
    /// The attachment names as indexed by full-text search.
    pub fn search_text(&self) -> String {
        self.0
            .iter()
            .map(|a| a.name.as_str())
            .collect::<Vec<&str>>()
            .join(" ")
    }
}

impl rusqlite::types::ToSql for AttachmentList {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        let v = serde_json::to_string(self)
            .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
        Ok(rusqlite::types::ToSqlOutput::from(v))
    }
}

impl rusqlite::types::FromSql for AttachmentList {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        let s: String = rusqlite::types::FromSql::column_result(value)?;
        if s.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&s).map_err(|err| rusqlite::types::FromSqlError::Other(Box::new(err)))
    }
}

/// A cached message row.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageRowId,
    /// RFC 822 `Message-ID` header value.
    pub message_id: String,
    pub in_reply_to: String,
    /// Server-assigned internal date.
    pub internal_date: UnixTimestamp,
    pub subject: String,
    pub from_field: String,
    pub receivers: String,
    pub cc: String,
    pub bcc: String,
    pub body: String,
    pub attachments: AttachmentList,
    pub flags: MessageFlags,
    /// Which of the logical fields above hold real data.
    pub fields: MessageFields,
}

impl Message {
    /// Whether this row can satisfy a caller that requires `fields`.
    pub fn satisfies(&self, fields: MessageFields) -> bool {
        self.fields.contains(fields)
    }
}
