//
// mailstore - search module
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

//! Compiling human-typed queries into field-scoped full-text phrases, and
//! executing them against `MessageSearchTable`.

use std::{borrow::Cow, collections::BTreeSet, rc::Rc};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::folders;
use crate::{
    error::Result,
    folder::FolderPath,
    message::MessageRowId,
    utils::{
        sqlite3::{
            params,
            rusqlite::types::{ToSql, Value},
            Transaction,
        },
        UnixTimestamp,
    },
};

/// A search-result identifier: the message row id plus the internal date
/// the result list is ordered by, for pagination stability.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SearchResultId {
    pub id: MessageRowId,
    pub internal_date: UnixTimestamp,
}

/// An indexed message column a query token can be scoped to, or
/// [`SearchField::Any`] for unscoped tokens.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SearchField {
    Any,
    Attachment,
    Bcc,
    Body,
    Cc,
    From,
    Subject,
    To,
}

impl SearchField {
    /// The `MessageSearchTable` column this field scopes to.
    pub fn column(self) -> Option<&'static str> {
        match self {
            Self::Any => None,
            Self::Attachment => Some("attachment"),
            Self::Bcc => Some("bcc"),
            Self::Body => Some("body"),
            Self::Cc => Some("cc"),
            Self::From => Some("from_field"),
            Self::Subject => Some("subject"),
            Self::To => Some("receivers"),
        }
    }
}

/// The localized field-name table the compiler recognizes in `key:value`
/// tokens, plus the localized word for "me".
#[derive(Clone, Debug)]
pub struct SearchFieldNames {
    fields: IndexMap<String, SearchField>,
    /// Lowercased; compared against lowercased values of address fields.
    pub me: String,
}

impl Default for SearchFieldNames {
    fn default() -> Self {
        let mut fields = IndexMap::new();
        for (name, field) in [
            ("attachment", SearchField::Attachment),
            ("bcc", SearchField::Bcc),
            ("body", SearchField::Body),
            ("cc", SearchField::Cc),
            ("from", SearchField::From),
            ("subject", SearchField::Subject),
            ("to", SearchField::To),
        ] {
            fields.insert(name.to_string(), field);
        }
        Self {
            fields,
            me: "me".to_string(),
        }
    }
}

impl SearchFieldNames {
    /// Registers a translated name for a field, for localized queries.
    pub fn insert_alias(&mut self, name: &str, field: SearchField) {
        self.fields.insert(name.to_lowercase(), field);
    }

    fn lookup(&self, key: &str) -> Option<SearchField> {
        self.fields.get(key).copied()
    }
}

/// A human-typed search query and its compiled per-field phrases.
#[derive(Clone, Debug)]
pub struct TextSearchQuery {
    pub raw: String,
    phrases: IndexMap<SearchField, String>,
    parsed: bool,
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '%' | '*' | '\\')
}

fn balance_quotes(raw: &str) -> Cow<'_, str> {
    if raw.matches('"').count() % 2 == 0 {
        return Cow::Borrowed(raw);
    }
    // Odd number of quotes: the last one is dropped.
    let idx = raw.rfind('"').unwrap();
    let mut balanced = raw.to_string();
    balanced.replace_range(idx..=idx, " ");
    Cow::Owned(balanced)
}

impl TextSearchQuery {
    pub fn new<S: Into<String>>(raw: S) -> Self {
        Self {
            raw: raw.into(),
            phrases: IndexMap::new(),
            parsed: false,
        }
    }

    /// Compiled phrases per field; empty until [`Self::compile`] runs.
    pub fn phrases(&self) -> &IndexMap<SearchField, String> {
        &self.phrases
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    /// Parses the raw query into per-field phrases. Idempotent: a second
    /// call is a no-op.
    pub fn compile(&mut self, names: &SearchFieldNames, own_email: &str) {
        if self.parsed {
            return;
        }
        self.parsed = true;
        let balanced = balance_quotes(&self.raw).into_owned();
        let mut in_quote = false;
        let mut token = String::new();
        for c in balanced.chars() {
            if c == '"' {
                self.flush_token(&mut token, in_quote, names, own_email);
                in_quote = !in_quote;
            } else if !in_quote && is_delimiter(c) {
                self.flush_token(&mut token, false, names, own_email);
            } else {
                token.push(c);
            }
        }
        self.flush_token(&mut token, in_quote, names, own_email);
    }

    fn flush_token(
        &mut self,
        token: &mut String,
        quoted: bool,
        names: &SearchFieldNames,
        own_email: &str,
    ) {
        let token = std::mem::take(token);
        if quoted {
            // [ref:FIXME]: drop this workaround when quoted field scopes
            // are supported.
            let token = token.replace(':', " ");
            if !token.is_empty() {
                self.append(SearchField::Any, &token);
            }
            return;
        }
        let lower = token.to_lowercase();
        if token.is_empty()
            || matches!(lower.as_str(), "and" | "or" | "not" | "near")
            || lower.starts_with("near/")
        {
            return;
        }
        let token = token.strip_prefix('-').unwrap_or(&token);
        if token.is_empty() {
            return;
        }
        if let Some((key, value)) = token.split_once(':') {
            if value.trim().is_empty() {
                self.append(SearchField::Any, key);
                return;
            }
            match names.lookup(&key.to_lowercase()) {
                Some(field) => {
                    let value = if matches!(
                        field,
                        SearchField::Bcc | SearchField::Cc | SearchField::From | SearchField::To
                    ) && value.to_lowercase() == names.me
                    {
                        own_email
                    } else {
                        value
                    };
                    self.append(field, value);
                }
                None => self.append(SearchField::Any, token),
            }
            return;
        }
        self.append(SearchField::Any, token);
    }

    fn append(&mut self, field: SearchField, token: &str) {
        // Quoted prefix match.
        let wrapped = format!("\"{}*\"", token);
        self.phrases
            .entry(field)
            .and_modify(|phrase| {
                phrase.push(' ');
                phrase.push_str(&wrapped);
            })
            .or_insert(wrapped);
    }

    /// The full-text `MATCH` expression for the compiled phrases: each
    /// token of a scoped phrase carries its column prefix.
    pub(crate) fn match_expression(&self) -> String {
        let mut expression = String::new();
        for (field, phrase) in &self.phrases {
            for token in phrase_tokens(phrase) {
                if !expression.is_empty() {
                    expression.push(' ');
                }
                if let Some(column) = field.column() {
                    expression.push_str(column);
                    expression.push(':');
                }
                expression.push_str(token);
            }
        }
        expression
    }
}

/// Splits a compiled phrase back into its quoted tokens. Tokens may carry
/// embedded spaces, so the split tracks quoting instead of using
/// whitespace.
fn phrase_tokens(phrase: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_quote = false;
    for (i, c) in phrase.char_indices() {
        match c {
            '"' => {
                in_quote = !in_quote;
                if start.is_none() {
                    start = Some(i);
                }
            }
            ' ' if !in_quote => {
                if let Some(s) = start.take() {
                    tokens.push(&phrase[s..i]);
                }
            }
            _ => {
                if start.is_none() {
                    start = Some(i);
                }
            }
        }
    }
    if let Some(s) = start {
        tokens.push(&phrase[s..]);
    }
    tokens
}

/// Builds the sub-select excluding blacklisted folders (and, with the
/// `None` sentinel, folderless messages). Empty string for an empty
/// blacklist.
///
/// Resolution passes `create = true`: a blacklisted path that does not
/// exist yet gets a folder row, keeping semantics stable across early
/// startup. Do not change without test coverage.
pub(crate) fn blacklist_condition(
    tx: &Transaction,
    folder_blacklist: &[Option<FolderPath>],
) -> Result<String> {
    let mut folder_ids: Vec<i64> = Vec::new();
    let mut folderless = false;
    for entry in folder_blacklist {
        match entry {
            None => folderless = true,
            Some(path) => {
                if let Some(id) = folders::fetch_folder_id(tx, path, true)? {
                    folder_ids.push(id.0);
                }
            }
        }
    }
    let mut sql = String::new();
    if !folder_ids.is_empty() {
        sql.push_str(
            "SELECT message_id FROM MessageLocationTable WHERE remove_marker = 0 AND folder_id \
             IN (",
        );
        for (n, id) in folder_ids.iter().enumerate() {
            if n > 0 {
                sql.push(',');
            }
            sql.push_str(&id.to_string());
        }
        sql.push(')');
    }
    if folderless {
        if !sql.is_empty() {
            sql.push_str(" UNION ");
        }
        sql.push_str(
            "SELECT id FROM MessageTable WHERE id NOT IN (SELECT message_id FROM \
             MessageLocationTable WHERE remove_marker = 0)",
        );
    }
    Ok(sql)
}

/// Runs a compiled search, newest first.
///
/// The internal-date index is forced; without it the planner falls back to
/// a full scan to satisfy the ordering, which does not survive large
/// mailboxes. `limit == 0` means no limit and omits the pagination binds.
pub(crate) fn search_tx(
    tx: &Transaction,
    match_expression: &str,
    folder_blacklist: &[Option<FolderPath>],
    search_ids: Option<&[MessageRowId]>,
    limit: usize,
    offset: usize,
) -> Result<SmallVec<[SearchResultId; 512]>> {
    let blacklist = blacklist_condition(tx, folder_blacklist)?;
    let mut sql = String::from(
        "SELECT id, internaldate_time_t FROM MessageTable INDEXED BY \
         MessageTableInternalDateTimeTIndex WHERE id IN (SELECT docid FROM MessageSearchTable \
         WHERE MessageSearchTable MATCH ?)",
    );
    if !blacklist.is_empty() {
        sql.push_str(" AND id NOT IN (");
        sql.push_str(&blacklist);
        sql.push(')');
    }
    let id_values = search_ids.map(|ids| {
        Rc::new(
            ids.iter()
                .map(|id| Value::from(id.0))
                .collect::<Vec<Value>>(),
        )
    });
    if id_values.is_some() {
        sql.push_str(" AND id IN rarray(?)");
    }
    sql.push_str(" ORDER BY internaldate_time_t DESC");
    if limit > 0 {
        sql.push_str(" LIMIT ? OFFSET ?");
    }
    let match_expression = match_expression.to_string();
    let limit = limit as i64;
    let offset = offset as i64;
    let mut binds: Vec<&dyn ToSql> = vec![&match_expression];
    if let Some(values) = id_values.as_ref() {
        binds.push(values);
    }
    if limit > 0 {
        binds.push(&limit);
        binds.push(&offset);
    }
    let mut stmt = tx.prepare(&sql)?;
    let mut rows = stmt.query(binds.as_slice())?;
    let mut results = SmallVec::new();
    while let Some(row) = rows.next()? {
        results.push(SearchResultId {
            id: row.get(0)?,
            internal_date: row.get::<_, i64>(1)?.max(0) as UnixTimestamp,
        });
    }
    Ok(results)
}

/// Column order of `MessageSearchTable`, which `offsets()` indexes into.
const FTS_COLUMNS: usize = 7;

/// Extracts the literal substrings that made rows in `ids` match, for
/// highlighting.
pub(crate) fn search_matches_tx(
    tx: &Transaction,
    match_expression: &str,
    raw_query: &str,
    ids: &[MessageRowId],
) -> Result<BTreeSet<String>> {
    let mut matches = BTreeSet::new();
    if !match_expression.is_empty() {
        let id_values = Rc::new(
            ids.iter()
                .map(|id| Value::from(id.0))
                .collect::<Vec<Value>>(),
        );
        let mut stmt = tx.prepare(
            "SELECT offsets(MessageSearchTable), body, attachment, subject, from_field, \
             receivers, cc, bcc FROM MessageSearchTable WHERE docid IN rarray(?1) AND \
             MessageSearchTable MATCH ?2;",
        )?;
        let mut rows = stmt.query(params![id_values, match_expression])?;
        while let Some(row) = rows.next()? {
            let offsets: String = row.get(0)?;
            let mut columns: Vec<String> = Vec::with_capacity(FTS_COLUMNS);
            for n in 0..FTS_COLUMNS {
                columns.push(row.get(n + 1)?);
            }
            extract_offsets(&offsets, &columns, &mut matches);
        }
    }
    // The tokenizer discards some tokens outright (email local parts and
    // the like); cover those with the literal words of the raw query.
    for word in raw_query.split_whitespace() {
        let word = word.trim_matches('"');
        if !word.is_empty() {
            matches.insert(word.to_lowercase());
        }
    }
    Ok(matches)
}

/// Parses an `offsets()` result, a flat sequence of
/// `(column, term, byte_offset, size)` quadruples. Malformed offsets mean
/// no matches for the row, not a failure.
fn extract_offsets(offsets: &str, columns: &[String], out: &mut BTreeSet<String>) {
    let numbers: std::result::Result<Vec<usize>, _> =
        offsets.split_whitespace().map(str::parse).collect();
    let Ok(numbers) = numbers else {
        return;
    };
    for quad in numbers.chunks_exact(4) {
        let (column, byte_offset, size) = (quad[0], quad[2], quad[3]);
        let Some(text) = columns.get(column) else {
            continue;
        };
        let Some(slice) = text.as_bytes().get(byte_offset..byte_offset + size) else {
            continue;
        };
        out.insert(String::from_utf8_lossy(slice).to_lowercase());
    }
}
