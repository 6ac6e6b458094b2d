//
// mailstore - account store
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

//! The account-level mail store.
//!
//! [`AccountStore`] is the system of record for everything the rest of the
//! client reads: the IMAP session layer writes folder and message state
//! into it, the UI queries it. One store per account, one embedded
//! database file per store, all access through short transactions on the
//! database gateway.

pub(crate) mod folders;
pub mod indexer;
pub mod registry;
pub mod search;
#[cfg(test)]
mod tests;

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    path::PathBuf,
    rc::Rc,
    sync::{Arc, Mutex},
};

use smallvec::SmallVec;

use crate::{
    contacts::{normalize_email, Contact},
    error::{Error, ErrorKind, Result, ResultIntoError},
    folder::{FolderId, FolderPath, FolderProperties, ImapFolder},
    message::{Message, MessageFields, MessageFlags, MessageRowId},
    store::{
        indexer::{NullProgressMonitor, ProgressMonitor},
        registry::{FolderRegistry, LocalFolder},
        search::{SearchFieldNames, SearchResultId, TextSearchQuery},
    },
    utils::{
        sqlite3::{
            params,
            rusqlite::types::Value,
            Database, DatabaseDescription, OpenOptions, Transaction, TransactionOutcome,
        },
        CancelToken, UnixTimestamp,
    },
};

const DB: DatabaseDescription = DatabaseDescription {
    name: "mailstore.db",
    identifier: None,
    application_prefix: "mailstore",
    init_script: Some(
        "PRAGMA foreign_keys = true;
    PRAGMA encoding = 'UTF-8';

    CREATE TABLE IF NOT EXISTS FolderTable (
                id                     INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id              INTEGER REFERENCES FolderTable(id) ON DELETE CASCADE,
                name                   TEXT NOT NULL,
                attributes             INTEGER NOT NULL DEFAULT 0,
                last_seen_total        INTEGER NOT NULL DEFAULT 0,
                last_seen_status_total INTEGER NOT NULL DEFAULT 0,
                uid_validity           INTEGER NOT NULL DEFAULT -1,
                uid_next               INTEGER NOT NULL DEFAULT -1,
                unread_count           INTEGER NOT NULL DEFAULT 0,
                UNIQUE (parent_id, name)
               );
    CREATE TABLE IF NOT EXISTS MessageTable (
                id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id          TEXT NOT NULL DEFAULT '',
                in_reply_to         TEXT NOT NULL DEFAULT '',
                internaldate_time_t INTEGER NOT NULL DEFAULT 0,
                subject             TEXT NOT NULL DEFAULT '',
                from_field          TEXT NOT NULL DEFAULT '',
                receivers           TEXT NOT NULL DEFAULT '',
                cc                  TEXT NOT NULL DEFAULT '',
                bcc                 TEXT NOT NULL DEFAULT '',
                body                TEXT NOT NULL DEFAULT '',
                attachment          TEXT NOT NULL DEFAULT '',
                flags               INTEGER NOT NULL DEFAULT 0,
                fields_bitmask      INTEGER NOT NULL DEFAULT 0
               );
    CREATE INDEX IF NOT EXISTS MessageTableInternalDateTimeTIndex ON
        MessageTable(internaldate_time_t);
    CREATE INDEX IF NOT EXISTS MessageTableMessageIdIndex ON MessageTable(message_id);
    CREATE INDEX IF NOT EXISTS MessageTableInReplyToIndex ON MessageTable(in_reply_to);
    CREATE TABLE IF NOT EXISTS MessageLocationTable (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id    INTEGER NOT NULL REFERENCES MessageTable(id) ON DELETE CASCADE,
                folder_id     INTEGER NOT NULL REFERENCES FolderTable(id) ON DELETE CASCADE,
                remove_marker INTEGER NOT NULL DEFAULT 0
               );
    CREATE INDEX IF NOT EXISTS MessageLocationMessageIdIndex ON
        MessageLocationTable(message_id);
    CREATE INDEX IF NOT EXISTS MessageLocationFolderIdIndex ON
        MessageLocationTable(folder_id);
    CREATE VIRTUAL TABLE IF NOT EXISTS MessageSearchTable USING fts4(
                body, attachment, subject, from_field, receivers, cc, bcc
               );
    CREATE TABLE IF NOT EXISTS ContactTable (
                email              TEXT PRIMARY KEY,
                real_name          TEXT,
                highest_importance INTEGER NOT NULL DEFAULT 0,
                normalized_email   TEXT,
                flags              INTEGER NOT NULL DEFAULT 0
               );",
    ),
    version: 1,
};

const MESSAGE_COLUMNS: &str = "id, message_id, in_reply_to, internaldate_time_t, subject, \
                               from_field, receivers, cc, bcc, body, attachment, flags, \
                               fields_bitmask";

/// Message-to-folder mappings returned by Message-ID lookup. A message
/// appears once per containing folder; a `None` path marks an orphan.
pub type MessageIdMatches = Vec<(Message, Option<FolderPath>)>;

/// Static description of the account this store mirrors.
#[derive(Clone, Debug)]
pub struct AccountInfo {
    pub name: Arc<str>,
    /// The user's own address; expanded for "me" in search queries.
    pub primary_email: String,
}

/// Events the store emits towards the rest of the client.
#[derive(Clone, Debug)]
pub enum StoreEvent {
    /// The outbox collaborator reported a send.
    EmailSent(Message),
    /// A folder's unread count changed through cross-folder propagation.
    UnreadUpdated { folder: FolderPath, unread: usize },
}

/// A boxed closure consuming store events, owned by whoever created the
/// store.
#[derive(Clone)]
pub struct StoreEventConsumer(Arc<dyn Fn(&str, StoreEvent) + Send + Sync>);

impl StoreEventConsumer {
    pub fn new(consumer: Arc<dyn Fn(&str, StoreEvent) + Send + Sync>) -> Self {
        Self(consumer)
    }

    pub fn send(&self, account: &str, event: StoreEvent) {
        (self.0)(account, event)
    }
}

impl fmt::Debug for StoreEventConsumer {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str("StoreEventConsumer")
    }
}

/// The folder the SMTP sender drains. The store only relays its send
/// reports as [`StoreEvent::EmailSent`].
#[derive(Debug)]
pub struct OutboxFolder {
    account: Arc<str>,
    consumer: StoreEventConsumer,
}

impl OutboxFolder {
    fn new(account: Arc<str>, consumer: StoreEventConsumer) -> Self {
        Self { account, consumer }
    }

    pub fn mark_sent(&self, message: Message) {
        self.consumer
            .send(&self.account, StoreEvent::EmailSent(message));
    }
}

/// The virtual folder presenting search results. Owns the localized
/// field-name table and caches the most recent compiled query.
#[derive(Debug)]
pub struct SearchFolder {
    field_names: SearchFieldNames,
    query: Mutex<Option<TextSearchQuery>>,
}

impl SearchFolder {
    fn new(field_names: SearchFieldNames) -> Self {
        Self {
            field_names,
            query: Mutex::new(None),
        }
    }

    /// The raw query the folder currently presents, if any.
    pub fn last_query(&self) -> Option<String> {
        self.query
            .lock()
            .unwrap()
            .as_ref()
            .map(|query| query.raw.clone())
    }

    fn compile(&self, raw: &str, own_email: &str) -> TextSearchQuery {
        let mut lck = self.query.lock().unwrap();
        if let Some(query) = lck.as_mut() {
            if query.raw == raw {
                // Compilation is idempotent; this is a no-op for an
                // already-parsed query.
                query.compile(&self.field_names, own_email);
                return query.clone();
            }
        }
        let mut query = TextSearchQuery::new(raw);
        query.compile(&self.field_names, own_email);
        *lck = Some(query.clone());
        query
    }
}

/// The per-account mail store.
#[derive(Debug)]
pub struct AccountStore {
    info: AccountInfo,
    event_consumer: StoreEventConsumer,
    progress: Arc<dyn ProgressMonitor>,
    field_names: SearchFieldNames,
    db: Mutex<Option<Database>>,
    registry: FolderRegistry,
    contacts: Mutex<HashMap<String, Contact>>,
    cancel: Mutex<CancelToken>,
    indexer_task: Mutex<Option<smol::Task<()>>>,
    outbox: Mutex<Option<Arc<OutboxFolder>>>,
    search_folder: Mutex<Option<Arc<SearchFolder>>>,
}

impl AccountStore {
    pub fn new(info: AccountInfo, event_consumer: StoreEventConsumer) -> Self {
        Self {
            info,
            event_consumer,
            progress: Arc::new(NullProgressMonitor),
            field_names: SearchFieldNames::default(),
            db: Mutex::new(None),
            registry: FolderRegistry::new(),
            contacts: Mutex::new(HashMap::new()),
            cancel: Mutex::new(CancelToken::new()),
            indexer_task: Mutex::new(None),
            outbox: Mutex::new(None),
            search_folder: Mutex::new(None),
        }
    }

    /// Replaces the progress monitor the background indexer reports to.
    /// Takes effect on the next open.
    pub fn set_progress_monitor(&mut self, progress: Arc<dyn ProgressMonitor>) {
        self.progress = progress;
    }

    /// Replaces the search field-name table, e.g. with a localized one.
    /// Takes effect on the next open.
    pub fn set_search_field_names(&mut self, field_names: SearchFieldNames) {
        self.field_names = field_names;
    }

    pub fn info(&self) -> &AccountInfo {
        &self.info
    }

    pub fn is_open(&self) -> bool {
        self.db.lock().map(|db| db.is_some()).unwrap_or(false)
    }

    fn database(&self) -> Result<Database> {
        self.db
            .lock()?
            .clone()
            .ok_or_else(|| Error::new("Account store is not open").set_kind(ErrorKind::NotOpen))
    }

    /// Opens the account's database, deletes non-canonical Inbox
    /// duplicates, loads contacts, schedules the background indexer and
    /// constructs the outbox and search-folder collaborators.
    ///
    /// With `data_dir` unset the database is placed in the XDG data
    /// directory. `schema_dir` may hold `version-NNN.sql` upgrade scripts.
    pub async fn open(
        &self,
        data_dir: Option<PathBuf>,
        schema_dir: Option<PathBuf>,
    ) -> Result<()> {
        if self.is_open() {
            return Err(
                Error::new(format!("Account {} is already open", self.info.name))
                    .set_kind(ErrorKind::AlreadyOpen),
            );
        }
        let description = DatabaseDescription {
            identifier: Some(self.info.name.to_string().into()),
            ..DB.clone()
        };
        let database = smol::unblock(move || {
            Database::open(
                description,
                data_dir.as_deref(),
                schema_dir.as_deref(),
                OpenOptions::default(),
            )
        })
        .await
        .chain_err_summary(|| format!("Could not open mail store of account {}", self.info.name))?;

        database
            .write(None, |tx| {
                folders::delete_duplicate_inboxes(tx).map(TransactionOutcome::Commit)
            })
            .await?;

        let contacts = database.read(None, load_contacts).await?;
        log::trace!(
            "Loaded {} contacts for account {}",
            contacts.len(),
            self.info.name
        );
        *self.contacts.lock()? = contacts;

        let cancel = CancelToken::new();
        *self.cancel.lock()? = cancel.clone();
        *self.indexer_task.lock()? = Some(smol::spawn(indexer::run(
            database.clone(),
            Arc::clone(&self.progress),
            cancel,
        )));

        *self.outbox.lock()? = Some(Arc::new(OutboxFolder::new(
            Arc::clone(&self.info.name),
            self.event_consumer.clone(),
        )));
        *self.search_folder.lock()? = Some(Arc::new(SearchFolder::new(self.field_names.clone())));

        *self.db.lock()? = Some(database);
        Ok(())
    }

    /// Closes the store: drops the database handle, cancels background
    /// work, disconnects the outbox and releases the collaborators.
    /// Idempotent.
    pub async fn close(&self) -> Result<()> {
        let database = self.db.lock()?.take();
        self.cancel.lock()?.cancel();
        let task = self.indexer_task.lock()?.take();
        if let Some(task) = task {
            task.await;
        }
        *self.outbox.lock()? = None;
        *self.search_folder.lock()? = None;
        self.registry.clear();
        drop(database);
        Ok(())
    }

    pub fn outbox(&self) -> Option<Arc<OutboxFolder>> {
        self.outbox.lock().ok().and_then(|lck| lck.clone())
    }

    pub fn search_folder(&self) -> Option<Arc<SearchFolder>> {
        self.search_folder.lock().ok().and_then(|lck| lck.clone())
    }

    // Folder CRUD and reconciliation.

    /// Mirrors `folder` into the store, creating missing ancestors on the
    /// way. An already-present folder is returned untouched; its state is
    /// owned by the reconciliation operations.
    pub async fn clone_folder(
        &self,
        folder: &ImapFolder,
        cancel: Option<&CancelToken>,
    ) -> Result<FolderId> {
        let db = self.database()?;
        let folder = folder.clone();
        let outcome = db
            .write(cancel, move |tx| {
                folders::clone_folder(tx, &folder).map(TransactionOutcome::Commit)
            })
            .await?;
        Ok(outcome.into_inner())
    }

    /// Deletes the folder at `path` together with its location rows.
    /// Returns `false` (after rolling back) when the path does not
    /// resolve or the folder still has children. Orphaned messages stay
    /// in `MessageTable` for a later GC pass; other folders may still
    /// reference them.
    pub async fn delete_folder(
        &self,
        path: &FolderPath,
        cancel: Option<&CancelToken>,
    ) -> Result<bool> {
        let db = self.database()?;
        let path = path.clone();
        let outcome = db
            .write(cancel, move |tx| {
                let Some(id) = folders::fetch_folder_id(tx, &path, false)? else {
                    return Ok(TransactionOutcome::Rollback(false));
                };
                if folders::child_count(tx, id)? > 0 {
                    log::debug!("Not deleting folder {}: it has children", path);
                    return Ok(TransactionOutcome::Rollback(false));
                }
                folders::delete_folder_rows(tx, id)?;
                Ok(TransactionOutcome::Commit(true))
            })
            .await?;
        Ok(outcome.into_inner())
    }

    /// Reconciles folder state from an IMAP `STATUS` response and
    /// refreshes a live handle's in-memory properties.
    pub async fn update_folder_status(
        &self,
        folder: &ImapFolder,
        update_uid_info: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let db = self.database()?;
        let moved = folder.clone();
        let outcome = db
            .write(cancel, move |tx| {
                let Some(id) = folders::fetch_folder_id(tx, &moved.path, false)? else {
                    return Err(
                        Error::new(format!("No folder {} in the store", moved.path))
                            .set_kind(ErrorKind::NotFound),
                    );
                };
                folders::update_folder_status(tx, id, &moved, update_uid_info)?;
                folders::folder_properties(tx, id).map(TransactionOutcome::Commit)
            })
            .await?;
        if let Some(handle) = self.registry.get_local_folder(&folder.path) {
            handle.set_properties(outcome.into_inner());
        }
        Ok(())
    }

    /// Reconciles folder state from a `SELECT`/`EXAMINE` response and
    /// refreshes a live handle's in-memory properties.
    pub async fn update_folder_select_examine(
        &self,
        folder: &ImapFolder,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let db = self.database()?;
        let moved = folder.clone();
        let outcome = db
            .write(cancel, move |tx| {
                let Some(id) = folders::fetch_folder_id(tx, &moved.path, false)? else {
                    return Err(
                        Error::new(format!("No folder {} in the store", moved.path))
                            .set_kind(ErrorKind::NotFound),
                    );
                };
                folders::update_folder_select_examine(tx, id, &moved)?;
                folders::folder_properties(tx, id).map(TransactionOutcome::Commit)
            })
            .await?;
        if let Some(handle) = self.registry.get_local_folder(&folder.path) {
            handle.set_properties(outcome.into_inner());
        }
        Ok(())
    }

    /// Returns the live handle for `path`, loading the folder row and
    /// installing a handle if none is cached.
    pub async fn local_folder(
        &self,
        path: &FolderPath,
        cancel: Option<&CancelToken>,
    ) -> Result<Arc<LocalFolder>> {
        if let Some(handle) = self.registry.get_local_folder(path) {
            return Ok(handle);
        }
        let db = self.database()?;
        let moved = path.clone();
        let (id, properties) = db
            .read(cancel, move |tx| {
                let Some(id) = folders::fetch_folder_id(tx, &moved, false)? else {
                    return Err(Error::new(format!("No folder {} in the store", moved))
                        .set_kind(ErrorKind::NotFound));
                };
                folders::folder_properties(tx, id).map(|properties| (id, properties))
            })
            .await?;
        Ok(self.registry.create_local_folder(path, id, properties))
    }

    /// Returns the live handle for `path` without touching the database.
    pub fn get_local_folder(&self, path: &FolderPath) -> Option<Arc<LocalFolder>> {
        self.registry.get_local_folder(path)
    }

    /// All folders in the store with their persisted properties.
    pub async fn list_folders(
        &self,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<(FolderPath, FolderProperties)>> {
        let db = self.database()?;
        db.read(cancel, |tx| {
            Ok(folders::list_folders(tx)?
                .into_iter()
                .map(|(_, path, properties)| (path, properties))
                .collect())
        })
        .await
    }

    // Message persistence.

    /// Inserts a message row and its containment row under `path`,
    /// creating the folder if needed. The full-text row is left to the
    /// background indexer.
    pub async fn store_message(
        &self,
        path: &FolderPath,
        message: &Message,
        cancel: Option<&CancelToken>,
    ) -> Result<MessageRowId> {
        let db = self.database()?;
        let path = path.clone();
        let message = message.clone();
        let outcome = db
            .write(cancel, move |tx| {
                let folder_id = folders::fetch_folder_id(tx, &path, true)?.ok_or_else(|| {
                    Error::new(format!("Could not resolve folder {}", path))
                        .set_kind(ErrorKind::NotFound)
                })?;
                tx.execute(
                    "INSERT INTO MessageTable (message_id, in_reply_to, internaldate_time_t, \
                     subject, from_field, receivers, cc, bcc, body, attachment, flags, \
                     fields_bitmask) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    params![
                        message.message_id,
                        message.in_reply_to,
                        message.internal_date as i64,
                        message.subject,
                        message.from_field,
                        message.receivers,
                        message.cc,
                        message.bcc,
                        message.body,
                        message.attachments,
                        message.flags,
                        message.fields,
                    ],
                )
                .chain_err_summary(|| {
                    format!("Could not insert message {}", message.message_id)
                })?;
                let id = MessageRowId(tx.last_insert_rowid());
                tx.execute(
                    "INSERT INTO MessageLocationTable (message_id, folder_id, remove_marker) \
                     VALUES (?1, ?2, 0)",
                    params![id, folder_id],
                )?;
                Ok(TransactionOutcome::Commit(id))
            })
            .await?;
        Ok(outcome.into_inner())
    }

    /// Adds a containment row for an existing message; a message may live
    /// in any number of folders.
    pub async fn link_message(
        &self,
        path: &FolderPath,
        id: MessageRowId,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let db = self.database()?;
        let path = path.clone();
        db.write(cancel, move |tx| {
            let folder_id = folders::fetch_folder_id(tx, &path, true)?.ok_or_else(|| {
                Error::new(format!("Could not resolve folder {}", path))
                    .set_kind(ErrorKind::NotFound)
            })?;
            tx.execute(
                "INSERT INTO MessageLocationTable (message_id, folder_id, remove_marker) VALUES \
                 (?1, ?2, 0)",
                params![id, folder_id],
            )?;
            Ok(TransactionOutcome::Commit(()))
        })
        .await?;
        Ok(())
    }

    /// Sets or clears the tombstone marker on the location rows of `ids`
    /// under `path`. Tombstoned rows are invisible to containment queries
    /// but still count for unread arithmetic until expunged.
    pub async fn mark_remove_pending(
        &self,
        path: &FolderPath,
        ids: &[MessageRowId],
        marker: bool,
        cancel: Option<&CancelToken>,
    ) -> Result<usize> {
        let db = self.database()?;
        let path = path.clone();
        let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
        let outcome = db
            .write(cancel, move |tx| {
                let Some(folder_id) = folders::fetch_folder_id(tx, &path, false)? else {
                    return Err(Error::new(format!("No folder {} in the store", path))
                        .set_kind(ErrorKind::NotFound));
                };
                let values = Rc::new(ids.iter().copied().map(Value::from).collect::<Vec<Value>>());
                let changed = tx.execute(
                    "UPDATE MessageLocationTable SET remove_marker = ?1 WHERE folder_id = ?2 AND \
                     message_id IN rarray(?3);",
                    params![marker as i64, folder_id, values],
                )?;
                Ok(TransactionOutcome::Commit(changed))
            })
            .await?;
        Ok(outcome.into_inner())
    }

    /// Loads a message row by id, failing with
    /// [`ErrorKind::IncompleteMessage`] when the row does not satisfy
    /// `required_fields`.
    pub async fn get_message(
        &self,
        id: MessageRowId,
        required_fields: MessageFields,
        cancel: Option<&CancelToken>,
    ) -> Result<Message> {
        let db = self.database()?;
        db.read(cancel, move |tx| {
            let mut stmt = tx.prepare(&format!(
                "SELECT {} FROM MessageTable WHERE id = ?1;",
                MESSAGE_COLUMNS
            ))?;
            let mut rows: Vec<Message> = stmt
                .query_map(params![id], message_from_row)?
                .collect::<std::result::Result<_, _>>()?;
            let Some(message) = rows.pop() else {
                return Err(Error::new(format!("No message row with id {}", id))
                    .set_kind(ErrorKind::NotFound));
            };
            if !message.satisfies(required_fields) {
                return Err(Error::new(format!(
                    "Message {} is missing required fields {:?}",
                    id,
                    required_fields.difference(message.fields)
                ))
                .set_kind(ErrorKind::IncompleteMessage));
            }
            Ok(message)
        })
        .await
    }

    /// Looks up messages by RFC 822 Message-ID (matching `message_id` or
    /// `in_reply_to`) and maps each hit to the folders containing it, with
    /// `None` standing for an orphan message.
    ///
    /// A hit on `folder_blacklist` (where `None` blacklists orphans) or an
    /// intersection with `flag_blacklist` suppresses the whole message,
    /// including mappings already produced for it. Returns `None` when
    /// nothing survives.
    #[allow(clippy::too_many_arguments)]
    pub async fn search_message_id(
        &self,
        message_id: &str,
        required_fields: MessageFields,
        partial_ok: bool,
        folder_blacklist: &[Option<FolderPath>],
        flag_blacklist: Option<MessageFlags>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<MessageIdMatches>> {
        let db = self.database()?;
        let message_id = message_id.to_string();
        let blacklist = folder_blacklist.to_vec();
        db.read(cancel, move |tx| {
            let messages: Vec<Message> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM MessageTable WHERE message_id = ?1 OR in_reply_to = ?1;",
                    MESSAGE_COLUMNS
                ))?;
                let rows = stmt
                    .query_map(params![message_id], message_from_row)?
                    .collect::<std::result::Result<_, _>>()?;
                rows
            };
            let mut results: MessageIdMatches = Vec::new();
            for message in messages {
                if !partial_ok && !message.satisfies(required_fields) {
                    continue;
                }
                if let Some(flags) = flag_blacklist {
                    if message.flags.intersects(flags) {
                        continue;
                    }
                }
                let folder_ids: Vec<FolderId> = {
                    let mut stmt = tx.prepare(
                        "SELECT folder_id FROM MessageLocationTable WHERE message_id = ?1 AND \
                         remove_marker = 0;",
                    )?;
                    let rows = stmt
                        .query_map(params![message.id], |row| row.get(0))?
                        .collect::<std::result::Result<_, _>>()?;
                    rows
                };
                if folder_ids.is_empty() {
                    if blacklist.iter().any(Option::is_none) {
                        continue;
                    }
                    results.push((message, None));
                    continue;
                }
                let mut paths = Vec::with_capacity(folder_ids.len());
                let mut suppressed = false;
                for folder_id in folder_ids {
                    let Some(path) = folders::find_folder_path(tx, folder_id)? else {
                        continue;
                    };
                    if blacklist.iter().any(|entry| entry.as_ref() == Some(&path)) {
                        suppressed = true;
                        break;
                    }
                    paths.push(path);
                }
                if suppressed {
                    continue;
                }
                for path in paths {
                    results.push((message.clone(), Some(path)));
                }
            }
            Ok(if results.is_empty() {
                None
            } else {
                Some(results)
            })
        })
        .await
    }

    // Search.

    fn compile_query(&self, raw: &str) -> Result<TextSearchQuery> {
        let folder = self
            .search_folder
            .lock()?
            .clone()
            .ok_or_else(|| Error::new("Account store is not open").set_kind(ErrorKind::NotOpen))?;
        Ok(folder.compile(raw, &self.info.primary_email))
    }

    /// Full-text search over all cached messages, newest first. `limit ==
    /// 0` means no limit. `search_ids`, when given, restricts the result
    /// to that id set. Returns `None` for an empty result or a query that
    /// compiles to no phrases.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
        folder_blacklist: &[Option<FolderPath>],
        search_ids: Option<&[MessageRowId]>,
        cancel: Option<&CancelToken>,
    ) -> Result<Option<SmallVec<[SearchResultId; 512]>>> {
        let compiled = self.compile_query(query)?;
        if compiled.is_empty() {
            return Ok(None);
        }
        let db = self.database()?;
        let match_expression = compiled.match_expression();
        let blacklist = folder_blacklist.to_vec();
        let ids = search_ids.map(<[MessageRowId]>::to_vec);
        let results = db
            .read(cancel, move |tx| {
                search::search_tx(
                    tx,
                    &match_expression,
                    &blacklist,
                    ids.as_deref(),
                    limit,
                    offset,
                )
            })
            .await?;
        Ok(if results.is_empty() {
            None
        } else {
            Some(results)
        })
    }

    /// The literal substrings that made the rows in `ids` match `query`,
    /// lowercased, for UI highlighting.
    pub async fn get_search_matches(
        &self,
        query: &str,
        ids: &[MessageRowId],
        cancel: Option<&CancelToken>,
    ) -> Result<BTreeSet<String>> {
        let compiled = self.compile_query(query)?;
        let db = self.database()?;
        let match_expression = compiled.match_expression();
        let raw = compiled.raw.clone();
        let ids = ids.to_vec();
        db.read(cancel, move |tx| {
            search::search_matches_tx(tx, &match_expression, &raw, &ids)
        })
        .await
    }

    // Unread propagation.

    /// Propagates unread-status changes reported by the folder at
    /// `source` to every other folder containing the affected messages.
    /// `updates` maps message row ids to their new unread state.
    ///
    /// Tombstoned locations still count: a message marked for removal
    /// affects unread arithmetic until the removal commits. The source
    /// folder is skipped, having already accounted for the change
    /// locally.
    pub async fn unread_updated(
        &self,
        source: &FolderPath,
        updates: &BTreeMap<MessageRowId, bool>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let db = self.database()?;
        let live: HashMap<FolderPath, Arc<LocalFolder>> = self
            .registry
            .live_folders()
            .into_iter()
            .map(|handle| (handle.path().clone(), handle))
            .collect();
        let source = source.clone();
        let updates = updates.clone();
        let handles = live.clone();
        let outcome = db
            .write(cancel, move |tx| {
                let mut deltas: BTreeMap<FolderPath, i64> = BTreeMap::new();
                for (&id, &unread) in &updates {
                    let folder_ids: Vec<FolderId> = {
                        let mut stmt = tx.prepare(
                            "SELECT folder_id FROM MessageLocationTable WHERE message_id = ?1;",
                        )?;
                        let rows = stmt
                            .query_map(params![id], |row| row.get(0))?
                            .collect::<std::result::Result<_, _>>()?;
                        rows
                    };
                    for folder_id in folder_ids {
                        let Some(path) = folders::find_folder_path(tx, folder_id)? else {
                            continue;
                        };
                        if path == source {
                            continue;
                        }
                        *deltas.entry(path).or_insert(0) += if unread { 1 } else { -1 };
                    }
                }
                let mut totals: Vec<(FolderPath, usize)> = Vec::with_capacity(deltas.len());
                for (path, delta) in deltas {
                    if delta == 0 {
                        continue;
                    }
                    let total = match handles.get(&path) {
                        Some(handle) => handle.do_add_to_unread_count(tx, delta)?,
                        None => {
                            let Some(id) = folders::fetch_folder_id(tx, &path, false)? else {
                                continue;
                            };
                            folders::add_to_unread_count(tx, id, delta)?
                        }
                    };
                    totals.push((path, total));
                }
                Ok(TransactionOutcome::Commit(totals))
            })
            .await?;
        for (path, unread) in outcome.into_inner() {
            if let Some(handle) = live.get(&path) {
                handle.set_unread_count(unread);
            }
            self.event_consumer.send(
                &self.info.name,
                StoreEvent::UnreadUpdated {
                    folder: path,
                    unread,
                },
            );
        }
        Ok(())
    }

    // Search index backfill.

    /// Runs one indexing batch immediately, returning the number of rows
    /// processed. The scheduled variant runs in the background after
    /// open.
    pub async fn populate_index_batch(
        &self,
        limit: usize,
        cancel: Option<&CancelToken>,
    ) -> Result<usize> {
        let db = self.database()?;
        indexer::populate_batch(&db, limit, cancel).await
    }

    // Contacts.

    pub fn get_contact(&self, email: &str) -> Option<Contact> {
        self.contacts
            .lock()
            .ok()?
            .get(&normalize_email(email))
            .cloned()
    }

    pub fn contacts(&self) -> Vec<Contact> {
        self.contacts
            .lock()
            .map(|lck| lck.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Upserts a contact row and the in-memory map. `highest_importance`
    /// never decreases.
    pub async fn update_contact(
        &self,
        contact: &Contact,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        let db = self.database()?;
        let mut contact = contact.clone();
        if contact.normalized_email.is_none() {
            contact.normalized_email = Some(normalize_email(&contact.email));
        }
        if let Some(existing) = self.get_contact(&contact.email) {
            contact.highest_importance =
                contact.highest_importance.max(existing.highest_importance);
        }
        let moved = contact.clone();
        db.write(cancel, move |tx| {
            tx.execute(
                "INSERT OR REPLACE INTO ContactTable (email, real_name, highest_importance, \
                 normalized_email, flags) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    moved.email,
                    moved.real_name,
                    moved.highest_importance as i64,
                    moved.normalized_email,
                    moved.flags,
                ],
            )
            .chain_err_summary(|| format!("Could not store contact {}", moved.email))?;
            Ok(TransactionOutcome::Commit(()))
        })
        .await?;
        self.contacts.lock()?.insert(contact.key(), contact);
        Ok(())
    }
}

fn message_from_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        message_id: row.get(1)?,
        in_reply_to: row.get(2)?,
        internal_date: row.get::<_, i64>(3)?.max(0) as UnixTimestamp,
        subject: row.get(4)?,
        from_field: row.get(5)?,
        receivers: row.get(6)?,
        cc: row.get(7)?,
        bcc: row.get(8)?,
        body: row.get(9)?,
        attachments: row.get(10)?,
        flags: row.get(11)?,
        fields: row.get(12)?,
    })
}

/// Loads every contact row. Damaged rows are logged and skipped; one bad
/// contact must not fail the whole open.
fn load_contacts(tx: &Transaction) -> Result<HashMap<String, Contact>> {
    let mut contacts = HashMap::new();
    let mut stmt = tx.prepare(
        "SELECT email, real_name, highest_importance, normalized_email, flags FROM ContactTable;",
    )?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let loaded: rusqlite::Result<Contact> = (|| {
            Ok(Contact {
                email: row.get(0)?,
                real_name: row.get(1)?,
                highest_importance: row.get::<_, i64>(2)?.max(0) as u32,
                normalized_email: row.get(3)?,
                flags: row.get(4)?,
            })
        })();
        match loaded {
            Ok(contact) => {
                contacts.insert(contact.key(), contact);
            }
            Err(err) => {
                log::error!("Could not load contact row: {}", err);
            }
        }
    }
    Ok(contacts)
}
