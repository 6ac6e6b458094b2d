//
// mailstore - lib.rs
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

#![deny(
    unsafe_op_in_unsafe_fn,
    /* groups */
    clippy::correctness,
    clippy::suspicious,
    /* restriction */
    clippy::dbg_macro,
    /* rustdoc */
    rustdoc::broken_intra_doc_links
)]
#![allow(clippy::option_if_let_else, clippy::missing_const_for_fn)]

//! The local per-account mail store of an IMAP-backed mail client.
//!
//! This crate mirrors a subset of server-side mailbox state into a
//! per-account embedded sqlite3 database and serves every read request the
//! rest of the client issues:
//! - a folder tree reconciled against IMAP `STATUS` and `SELECT`/`EXAMINE`
//!   responses (see [`AccountStore::update_folder_status`] and
//!   [`AccountStore::update_folder_select_examine`]),
//! - message-to-folder containment, including tombstoned locations pending
//!   removal,
//! - live folder handles cached in a weak-reference registry with
//!   automatic cleanup (see module [`store::registry`]),
//! - indexed full-text search with a compiler from human-typed queries to
//!   field-scoped phrases (see module [`store::search`]),
//! - background backfill of the search index in cooperative batches (see
//!   module [`store::indexer`]),
//! - cross-folder unread-count propagation (see
//!   [`AccountStore::unread_updated`]).
//!
//! The IMAP wire protocol, the SMTP sender and anything user-facing live
//! elsewhere; the store only consumes their descriptors and emits
//! [`StoreEvent`]s back at them.

pub mod contacts;
pub mod error;
pub mod folder;
pub mod message;
pub mod store;
pub mod utils;

pub use contacts::{Contact, ContactFlags};
pub use error::{Error, ErrorKind, IntoError, Result, ResultIntoError};
pub use folder::{
    is_inbox_name, FolderAttributes, FolderId, FolderPath, FolderProperties, ImapFolder,
    CANONICAL_INBOX,
};
pub use message::{
    Attachment, AttachmentList, Message, MessageFields, MessageFlags, MessageRowId,
};
pub use store::{
    indexer::{NullProgressMonitor, ProgressMonitor},
    registry::{FolderRegistry, LocalFolder},
    search::{SearchField, SearchFieldNames, SearchResultId, TextSearchQuery},
    AccountInfo, AccountStore, MessageIdMatches, OutboxFolder, SearchFolder, StoreEvent,
    StoreEventConsumer,
};
pub use utils::{CancelToken, UnixTimestamp};

pub extern crate indexmap;
pub extern crate log;
pub extern crate rusqlite;
pub extern crate smallvec;
pub extern crate smol;
