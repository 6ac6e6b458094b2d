//
// mailstore - background search indexer
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

//! Backfilling `MessageSearchTable` for message rows that are not in the
//! full-text index yet.
//!
//! Runs a while after the account opens, in bounded batches with small
//! sleeps in between so interactive operations do not starve. An index gap
//! from a damaged row is tolerable; a lost batch is not, so per-row
//! failures are logged and skipped.

use std::{sync::Arc, time::Duration};

use crate::{
    error::{ErrorKind, Result, ResultIntoError},
    message::{AttachmentList, MessageRowId},
    utils::{
        futures::sleep_unless_cancelled,
        sqlite3::{params, Database, Transaction, TransactionOutcome},
        CancelToken,
    },
};

/// Receives indexing progress. All methods have no-op defaults.
pub trait ProgressMonitor: Send + Sync + std::fmt::Debug {
    /// The work interval is `[0, total]`.
    fn begin(&self, _total: usize) {}
    fn advance(&self, _delta: usize) {}
    fn finish(&self) {}
}

/// Monitor that discards all progress reports.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullProgressMonitor;

impl ProgressMonitor for NullProgressMonitor {}

/// Delay between account open and the first indexing batch.
pub(crate) const START_DELAY: Duration = Duration::from_secs(30);
/// Rows per batch.
pub(crate) const BATCH_LIMIT: usize = 100;
/// Pause between batches, yielding CPU to interactive work.
pub(crate) const BATCH_SLEEP: Duration = Duration::from_millis(50);

/// The background indexing task. Spawned by the account store at open;
/// stopped through `cancel` at close. The progress monitor is finished on
/// every exit path.
pub(crate) async fn run(db: Database, progress: Arc<dyn ProgressMonitor>, cancel: CancelToken) {
    if !sleep_unless_cancelled(START_DELAY, &cancel).await {
        progress.finish();
        return;
    }
    let total = match db
        .read(Some(&cancel), |tx| {
            let count: i64 =
                tx.query_row("SELECT COUNT(*) FROM MessageTable;", [], |row| row.get(0))?;
            Ok(count.max(0) as usize)
        })
        .await
    {
        Ok(total) => total,
        Err(err) => {
            if err.kind != ErrorKind::Cancelled {
                log::error!("Could not count messages for search indexing: {}", err);
            }
            progress.finish();
            return;
        }
    };
    progress.begin(total);
    loop {
        match populate_batch(&db, BATCH_LIMIT, Some(&cancel)).await {
            Ok(processed) => {
                progress.advance(processed);
                if processed < BATCH_LIMIT {
                    break;
                }
            }
            Err(err) => {
                if err.kind != ErrorKind::Cancelled {
                    log::error!("Search index batch failed: {}", err);
                }
                break;
            }
        }
        if !sleep_unless_cancelled(BATCH_SLEEP, &cancel).await {
            break;
        }
    }
    progress.finish();
    log::trace!("Search indexer finished");
}

/// Indexes up to `limit` messages missing from `MessageSearchTable`.
/// Returns how many rows the batch processed (including rows skipped for
/// per-row errors).
pub(crate) async fn populate_batch(
    db: &Database,
    limit: usize,
    cancel: Option<&CancelToken>,
) -> Result<usize> {
    db.write(cancel, move |tx| {
        let ids: Vec<MessageRowId> = {
            let mut stmt = tx.prepare(
                "SELECT id FROM MessageTable WHERE id NOT IN (SELECT docid FROM \
                 MessageSearchTable) LIMIT ?1;",
            )?;
            let rows = stmt
                .query_map(params![limit as i64], |row| row.get(0))?
                .collect::<std::result::Result<_, _>>()?;
            rows
        };
        for &id in &ids {
            if let Err(err) = index_message(tx, id) {
                log::error!("Could not index message {} for search: {}", id, err);
            }
        }
        Ok(TransactionOutcome::Commit(ids.len()))
    })
    .await
    .map(TransactionOutcome::into_inner)
}

/// Inserts the full-text row for one message, mirroring its indexable
/// fields.
pub(crate) fn index_message(tx: &Transaction, id: MessageRowId) -> Result<()> {
    let (subject, from_field, receivers, cc, bcc, body, attachments) = tx
        .query_row(
            "SELECT subject, from_field, receivers, cc, bcc, body, attachment FROM MessageTable \
             WHERE id = ?1;",
            params![id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, AttachmentList>(6)?,
                ))
            },
        )
        .chain_err_summary(|| format!("Could not load message {} for indexing", id))?;
    tx.execute(
        "INSERT INTO MessageSearchTable (docid, body, attachment, subject, from_field, \
         receivers, cc, bcc) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            body,
            attachments.search_text(),
            subject,
            from_field,
            receivers,
            cc,
            bcc
        ],
    )
    .chain_err_summary(|| format!("Could not insert search row for message {}", id))?;
    Ok(())
}
