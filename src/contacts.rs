//
// mailstore - contacts module
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

//! Contact rows, loaded en masse when the account store opens.
//!
//! Extraction heuristics live with the session layer; the store only loads
//! and persists what it is handed.

use std::fmt;

use serde::{Deserialize, Serialize};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
    pub struct ContactFlags: u32 {
        /// Remote images in mail from this contact may load without asking.
        const ALWAYS_LOAD_REMOTE_IMAGES = 0b0000_0001;
    }
}

impl rusqlite::types::ToSql for ContactFlags {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput> {
        Ok(rusqlite::types::ToSqlOutput::from(i64::from(self.bits())))
    }
}

impl rusqlite::types::FromSql for ContactFlags {
    fn column_result(value: rusqlite::types::ValueRef) -> rusqlite::types::FromSqlResult<Self> {
        i64::column_result(value).map(|bits| Self::from_bits_truncate(bits as u32))
    }
}

/// A contact row.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Contact {
    pub email: String,
    pub real_name: Option<String>,
    /// Highest importance ever observed for this contact; updates only
    /// raise it.
    pub highest_importance: u32,
    pub normalized_email: Option<String>,
    pub flags: ContactFlags,
}

impl Contact {
    pub fn new(email: String) -> Self {
        let normalized_email = Some(normalize_email(&email));
        Self {
            email,
            normalized_email,
            ..Self::default()
        }
    }

    /// The key this contact is indexed under in memory.
    pub fn key(&self) -> String {
        self.normalized_email
            .clone()
            .unwrap_or_else(|| normalize_email(&self.email))
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.real_name.as_deref() {
            Some(name) if !name.is_empty() => write!(fmt, "{} <{}>", name, self.email),
            _ => self.email.fmt(fmt),
        }
    }
}

/// Address normalization used for contact lookup: trimmed,
/// ASCII-lowercased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}
