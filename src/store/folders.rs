//
// mailstore - folder table operations
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

//! `FolderTable` operations: path resolution, hierarchy creation and the
//! STATUS vs SELECT/EXAMINE reconciliation split.
//!
//! Every function here runs inside a transaction supplied by the caller.

use crate::{
    error::{Result, ResultIntoError},
    folder::{
        is_inbox_name, uid_from_sql, uid_to_sql, FolderAttributes, FolderId, FolderPath,
        FolderProperties, ImapFolder, CANONICAL_INBOX,
    },
    utils::sqlite3::{params, Transaction},
};

fn lookup_child(tx: &Transaction, parent: Option<FolderId>, name: &str) -> Result<Option<FolderId>> {
    let result = match parent {
        Some(parent_id) => {
            let mut stmt =
                tx.prepare("SELECT id FROM FolderTable WHERE parent_id = ?1 AND name = ?2;")?;
            let mut rows: Vec<FolderId> = stmt
                .query_map(params![parent_id, name], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            rows.pop()
        }
        None => {
            let mut stmt =
                tx.prepare("SELECT id FROM FolderTable WHERE parent_id IS NULL AND name = ?1;")?;
            let mut rows: Vec<FolderId> = stmt
                .query_map(params![name], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            rows.pop()
        }
    };
    Ok(result)
}

fn insert_minimal(tx: &Transaction, parent: Option<FolderId>, name: &str) -> Result<FolderId> {
    tx.execute(
        "INSERT INTO FolderTable (parent_id, name, attributes, last_seen_total, \
         last_seen_status_total, uid_validity, uid_next, unread_count) VALUES (?1, ?2, 0, 0, 0, \
         -1, -1, 0)",
        params![parent, name],
    )
    .chain_err_summary(|| format!("Could not insert folder row for {}", name))?;
    Ok(FolderId(tx.last_insert_rowid()))
}

/// Walks `path` from the root, resolving each segment by
/// `(parent_id, name)`.
///
/// With `create` set, missing segments are inserted as minimal rows with
/// null counts. A row whose id equals its parent id is corruption; it is
/// logged and treated as not found.
pub(crate) fn fetch_folder_id(
    tx: &Transaction,
    path: &FolderPath,
    create: bool,
) -> Result<Option<FolderId>> {
    let mut parent: Option<FolderId> = None;
    for segment in path.segments() {
        let id = match lookup_child(tx, parent, segment)? {
            Some(id) => id,
            None if !create => return Ok(None),
            None => insert_minimal(tx, parent, segment)?,
        };
        if Some(id) == parent {
            log::error!("loop in database: folder {} is its own parent", id);
            return Ok(None);
        }
        parent = Some(id);
    }
    Ok(parent)
}

/// Resolves the parent of `path`; `None` means `path` is at the root.
pub(crate) fn fetch_parent_id(
    tx: &Transaction,
    path: &FolderPath,
    create: bool,
) -> Result<Option<FolderId>> {
    match path.parent() {
        None => Ok(None),
        Some(parent_path) => fetch_folder_id(tx, &parent_path, create),
    }
}

/// Reconstructs a folder path by walking parent pointers upward.
pub(crate) fn find_folder_path(tx: &Transaction, folder_id: FolderId) -> Result<Option<FolderPath>> {
    let mut segments: Vec<String> = Vec::new();
    let mut current = folder_id;
    loop {
        let mut stmt = tx.prepare("SELECT parent_id, name FROM FolderTable WHERE id = ?1;")?;
        let mut rows: Vec<(Option<FolderId>, String)> = stmt
            .query_map(params![current], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        let Some((parent_id, name)) = rows.pop() else {
            return Ok(None);
        };
        if parent_id == Some(current) {
            log::error!("loop in database: folder {} is its own parent", current);
            return Ok(None);
        }
        segments.push(name);
        match parent_id {
            Some(parent) => current = parent,
            None => break,
        }
    }
    segments.reverse();
    FolderPath::new(segments).map(Some)
}

/// Reads the reconcilable half of a folder row.
pub(crate) fn folder_properties(tx: &Transaction, folder_id: FolderId) -> Result<FolderProperties> {
    let mut stmt = tx.prepare(
        "SELECT attributes, last_seen_total, last_seen_status_total, uid_validity, uid_next, \
         unread_count FROM FolderTable WHERE id = ?1;",
    )?;
    let mut rows: Vec<FolderProperties> = stmt
        .query_map(params![folder_id], |row| {
            Ok(FolderProperties {
                attributes: row.get::<_, FolderAttributes>(0)?,
                select_examine_total: row.get::<_, i64>(1)? as usize,
                status_total: row.get::<_, i64>(2)? as usize,
                uid_validity: uid_from_sql(row.get(3)?),
                uid_next: uid_from_sql(row.get(4)?),
                unread_count: row.get::<_, i64>(5)?.max(0) as usize,
            })
        })?
        .collect::<std::result::Result<_, _>>()?;
    rows.pop().ok_or_else(|| {
        crate::error::Error::new(format!("No folder row with id {}", folder_id))
            .set_kind(crate::error::ErrorKind::NotFound)
    })
}

/// Mirrors a folder into the store: ensures the ancestor rows exist
/// (idempotently), then inserts the leaf row with the descriptor's
/// properties.
///
/// An existing leaf row is returned as is. Its counts and UID markers
/// belong to STATUS and SELECT/EXAMINE reconciliation, which record them
/// on separate fields; overwriting both at once from a LIST descriptor
/// would clobber whichever of the two was fresher.
pub(crate) fn clone_folder(tx: &Transaction, folder: &ImapFolder) -> Result<FolderId> {
    let parent = fetch_parent_id(tx, &folder.path, true)?;
    let name = folder.path.basename();
    if let Some(id) = lookup_child(tx, parent, name)? {
        log::debug!("Folder {} is already in the store", folder.path);
        return Ok(id);
    }
    tx.execute(
        "INSERT INTO FolderTable (parent_id, name, attributes, last_seen_total, \
         last_seen_status_total, uid_validity, uid_next, unread_count) VALUES (?1, ?2, ?3, ?4, \
         ?5, ?6, ?7, ?8)",
        params![
            parent,
            name,
            folder.attributes,
            folder.select_examine_messages as i64,
            folder.status_messages as i64,
            uid_to_sql(folder.uid_validity),
            uid_to_sql(folder.uid_next),
            folder.email_unread as i64,
        ],
    )
    .chain_err_summary(|| format!("Could not insert folder row {}", folder.path))?;
    Ok(FolderId(tx.last_insert_rowid()))
}

pub(crate) fn child_count(tx: &Transaction, folder_id: FolderId) -> Result<usize> {
    let count: i64 = tx.query_row(
        "SELECT COUNT(*) FROM FolderTable WHERE parent_id = ?1;",
        params![folder_id],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// Deletes a folder row and its location rows. Messages orphaned by this
/// stay in `MessageTable`; other folders may still reference them.
pub(crate) fn delete_folder_rows(tx: &Transaction, folder_id: FolderId) -> Result<()> {
    tx.execute(
        "DELETE FROM MessageLocationTable WHERE folder_id = ?1;",
        params![folder_id],
    )?;
    tx.execute("DELETE FROM FolderTable WHERE id = ?1;", params![folder_id])?;
    Ok(())
}

/// Reconciliation from a `STATUS` response: attributes, unread count and
/// the STATUS-observed total. UID markers only when `update_uid_info` is
/// set. Never touches `last_seen_total`; that belongs to SELECT/EXAMINE.
pub(crate) fn update_folder_status(
    tx: &Transaction,
    folder_id: FolderId,
    folder: &ImapFolder,
    update_uid_info: bool,
) -> Result<()> {
    if update_uid_info {
        tx.execute(
            "UPDATE FolderTable SET attributes = ?1, unread_count = ?2, last_seen_status_total = \
             ?3, uid_validity = ?4, uid_next = ?5 WHERE id = ?6;",
            params![
                folder.attributes,
                folder.email_unread as i64,
                folder.status_messages as i64,
                uid_to_sql(folder.uid_validity),
                uid_to_sql(folder.uid_next),
                folder_id
            ],
        )
    } else {
        tx.execute(
            "UPDATE FolderTable SET attributes = ?1, unread_count = ?2, last_seen_status_total = \
             ?3 WHERE id = ?4;",
            params![
                folder.attributes,
                folder.email_unread as i64,
                folder.status_messages as i64,
                folder_id
            ],
        )
    }
    .chain_err_summary(|| format!("Could not reconcile STATUS for folder {}", folder.path))?;
    Ok(())
}

/// Reconciliation from a `SELECT`/`EXAMINE` response: UID markers and the
/// selected total. Never touches `last_seen_status_total`.
pub(crate) fn update_folder_select_examine(
    tx: &Transaction,
    folder_id: FolderId,
    folder: &ImapFolder,
) -> Result<()> {
    tx.execute(
        "UPDATE FolderTable SET uid_validity = ?1, uid_next = ?2, last_seen_total = ?3 WHERE id = \
         ?4;",
        params![
            uid_to_sql(folder.uid_validity),
            uid_to_sql(folder.uid_next),
            folder.select_examine_messages as i64,
            folder_id
        ],
    )
    .chain_err_summary(|| {
        format!("Could not reconcile SELECT/EXAMINE for folder {}", folder.path)
    })?;
    Ok(())
}

/// Applies an unread-count delta to a folder row, clamping at zero, and
/// returns the new total.
pub(crate) fn add_to_unread_count(
    tx: &Transaction,
    folder_id: FolderId,
    delta: i64,
) -> Result<usize> {
    tx.execute(
        "UPDATE FolderTable SET unread_count = MAX(0, unread_count + ?1) WHERE id = ?2;",
        params![delta, folder_id],
    )?;
    let unread: i64 = tx.query_row(
        "SELECT unread_count FROM FolderTable WHERE id = ?1;",
        params![folder_id],
        |row| row.get(0),
    )?;
    Ok(unread.max(0) as usize)
}

/// Deletes root folders matching the Inbox predicate that are not the
/// canonical form, together with their location rows. Runs once per open.
pub(crate) fn delete_duplicate_inboxes(tx: &Transaction) -> Result<usize> {
    let roots: Vec<(FolderId, String)> = {
        let mut stmt = tx.prepare("SELECT id, name FROM FolderTable WHERE parent_id IS NULL;")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<_, _>>()?;
        rows
    };
    let mut deleted = 0;
    for (id, name) in roots {
        if is_inbox_name(&name) && name != CANONICAL_INBOX {
            log::info!("Deleting duplicate Inbox folder row {:?} (id {})", name, id);
            delete_folder_rows(tx, id)?;
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// All folders in the store as `(id, path, properties)`, skipping rows
/// whose path cannot be reconstructed.
pub(crate) fn list_folders(
    tx: &Transaction,
) -> Result<Vec<(FolderId, FolderPath, FolderProperties)>> {
    let ids: Vec<FolderId> = {
        let mut stmt = tx.prepare("SELECT id FROM FolderTable ORDER BY id;")?;
        let rows = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        rows
    };
    let mut folders = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(path) = find_folder_path(tx, id)? else {
            continue;
        };
        let properties = folder_properties(tx, id)?;
        folders.push((id, path, properties));
    }
    Ok(folders)
}
