//
// mailstore - sqlite3 gateway
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

//! The gateway that owns the embedded database file.
//!
//! All access goes through [`Database::read`] and [`Database::write`], which
//! run short-lived transaction callbacks on the blocking thread pool. The
//! account is the sole writer; read snapshots may overlap writers.

use std::{
    borrow::Cow,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use rusqlite::TransactionBehavior;
pub use rusqlite::{self, params, Connection, Transaction};

use crate::{
    error::{Error, ErrorKind, Result, ResultIntoError},
    utils::CancelToken,
};

/// A database description.
#[derive(Clone, Debug)]
pub struct DatabaseDescription {
    /// Database file name.
    pub name: &'static str,
    /// Optional identifier string to qualify the file name with, e.g. an
    /// account name.
    pub identifier: Option<Cow<'static, str>>,
    /// Prefix for the XDG data directory fallback.
    pub application_prefix: &'static str,
    /// Script to initialize an empty database file with. Must create the
    /// current schema; older files are brought up by upgrade scripts
    /// instead (see [`Database::open`]).
    pub init_script: Option<&'static str>,
    /// Current schema version.
    pub version: u32,
}

impl DatabaseDescription {
    fn file_name(&self) -> String {
        self.identifier.as_ref().map_or_else(
            || self.name.to_string(),
            |id| format!("{}_{}", id, self.name),
        )
    }

    /// Returns the database file path, either inside `data_dir` or in the
    /// XDG data directory for [`Self::application_prefix`].
    pub fn db_path(&self, data_dir: Option<&Path>) -> Result<PathBuf> {
        match data_dir {
            Some(dir) => Ok(dir.join(self.file_name())),
            None => {
                let base = xdg::BaseDirectories::with_prefix(self.application_prefix)
                    .map_err(|err| Error::new(err.to_string()))?;
                base.place_data_file(self.file_name())
                    .map_err(|err| Error::new(err.to_string()))
            }
        }
    }
}

/// Flags for opening a database file.
#[derive(Clone, Copy, Debug)]
pub struct OpenOptions {
    /// Create the data directory if it is missing.
    pub create_directories: bool,
    /// Create the database file if it is missing.
    pub create_file: bool,
    /// Run an integrity check after opening.
    pub check_corruption: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create_directories: true,
            create_file: true,
            check_corruption: true,
        }
    }
}

/// What a read-write transaction callback decided, carrying the callback's
/// return value either way.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TransactionOutcome<T> {
    /// Persist the changes made by the callback.
    Commit(T),
    /// Discard every change made by the callback; the value reports the
    /// precondition failure to the caller.
    Rollback(T),
}

impl<T> TransactionOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Commit(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Self::Commit(v) | Self::Rollback(v) => v,
        }
    }
}

/// Handle to an opened database file.
///
/// Cloning is cheap; all clones refer to the same file. Connections are
/// opened per transaction and released on every exit path.
#[derive(Clone, Debug)]
pub struct Database {
    description: Arc<DatabaseDescription>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (creating and upgrading if requested) the described database.
    ///
    /// Blocking; run it through `smol::unblock` from async contexts.
    pub fn open(
        description: DatabaseDescription,
        data_dir: Option<&Path>,
        schema_dir: Option<&Path>,
        options: OpenOptions,
    ) -> Result<Self> {
        if let Some(dir) = data_dir {
            if !dir.exists() {
                if !options.create_directories {
                    return Err(Error::new(format!(
                        "Data directory {} doesn't exist",
                        dir.display()
                    ))
                    .set_kind(ErrorKind::NotFound));
                }
                fs::create_dir_all(dir)?;
            }
        }
        let db_path = description.db_path(data_dir)?;
        let set_mode = !db_path.exists();
        if set_mode && !options.create_file {
            return Err(
                Error::new(format!("Database {} doesn't exist", db_path.display()))
                    .set_kind(ErrorKind::NotFound),
            );
        }
        if set_mode {
            log::info!(
                "Creating {} database in {}",
                description.name,
                db_path.display()
            );
        }
        let mut conn = Connection::open(&db_path)?;
        rusqlite::vtab::array::load_module(&conn)?;
        if set_mode {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let file = fs::File::open(&db_path)?;
                let metadata = file.metadata()?;
                let mut permissions = metadata.permissions();

                permissions.set_mode(0o600); // Read/write for owner only.
                file.set_permissions(permissions)?;
            }
        }
        if options.check_corruption {
            integrity_check(&conn)?;
        }
        let mut version: u32 =
            conn.pragma_query_value(None, "user_version", |row| row.get::<_, i64>(0))? as u32;
        if version == 0 {
            if let Some(script) = description.init_script {
                conn.execute_batch(script)
                    .chain_err_summary(|| "Could not initialize database schema")?;
            }
            conn.pragma_update(None, "user_version", description.version)?;
            version = description.version;
        }
        if let Some(dir) = schema_dir {
            version = apply_schema_upgrades(&mut conn, dir, version)?;
        }
        if version != description.version {
            return Err(Error::new(format!(
                "Database version mismatch, is {} but expected {}.",
                version, description.version
            )));
        }
        drop(conn);
        Ok(Self {
            description: Arc::new(description),
            path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn description(&self) -> &DatabaseDescription {
        &self.description
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(self.path.as_ref())?;
        rusqlite::vtab::array::load_module(&conn)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        // Writers on separate connections serialize by waiting instead of
        // failing with SQLITE_BUSY.
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    /// Runs `callback` inside a read transaction on the blocking pool.
    ///
    /// The transaction commits on success so that resolution side effects
    /// remain visible (see the folder blacklist resolution in search).
    pub async fn read<T, F>(&self, cancel: Option<&CancelToken>, callback: F) -> Result<T>
    where
        F: FnOnce(&Transaction) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        if let Some(token) = cancel {
            token.check()?;
        }
        let cancel = cancel.cloned();
        let this = self.clone();
        smol::unblock(move || {
            let mut conn = this.connect()?;
            let tx = conn.transaction()?;
            let value = callback(&tx)?;
            if let Some(token) = cancel.as_ref() {
                token.check()?;
            }
            tx.commit()?;
            Ok(value)
        })
        .await
    }

    /// Runs `callback` inside an immediate read-write transaction on the
    /// blocking pool, committing or rolling back per its outcome.
    ///
    /// A cancellation observed after the callback rolls the transaction
    /// back; no partial write survives.
    pub async fn write<T, F>(
        &self,
        cancel: Option<&CancelToken>,
        callback: F,
    ) -> Result<TransactionOutcome<T>>
    where
        F: FnOnce(&Transaction) -> Result<TransactionOutcome<T>> + Send + 'static,
        T: Send + 'static,
    {
        if let Some(token) = cancel {
            token.check()?;
        }
        let cancel = cancel.cloned();
        let this = self.clone();
        smol::unblock(move || {
            let mut conn = this.connect()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let outcome = callback(&tx)?;
            if let Some(token) = cancel.as_ref() {
                if token.is_cancelled() {
                    tx.rollback()?;
                    return Err(
                        Error::new("Operation was cancelled.").set_kind(ErrorKind::Cancelled)
                    );
                }
            }
            match outcome {
                TransactionOutcome::Commit(_) => tx.commit()?,
                TransactionOutcome::Rollback(_) => tx.rollback()?,
            }
            Ok(outcome)
        })
        .await
    }
}

fn integrity_check(conn: &Connection) -> Result<()> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(Error::new("Database file failed its integrity check")
            .set_details(result)
            .set_kind(ErrorKind::Corruption));
    }
    Ok(())
}

/// Applies `version-NNN.sql` scripts found in `schema_dir`, in ascending
/// order, skipping versions at or below `current`. Each script runs in its
/// own transaction and bumps `user_version` on success.
fn apply_schema_upgrades(conn: &mut Connection, schema_dir: &Path, current: u32) -> Result<u32> {
    let mut scripts: Vec<(u32, PathBuf)> = Vec::new();
    for entry in fs::read_dir(schema_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(stem) = name
            .strip_prefix("version-")
            .and_then(|rest| rest.strip_suffix(".sql"))
        {
            if let Ok(version) = stem.parse::<u32>() {
                scripts.push((version, entry.path()));
            }
        }
    }
    scripts.sort_unstable_by_key(|(version, _)| *version);
    let mut version = current;
    for (script_version, path) in scripts {
        if script_version <= version {
            continue;
        }
        log::info!(
            "Upgrading database schema to version {} from {}",
            script_version,
            path.display()
        );
        let script = fs::read_to_string(&path)?;
        let tx = conn.transaction()?;
        tx.execute_batch(&script)
            .chain_err_summary(|| format!("Could not apply schema upgrade {}", path.display()))?;
        tx.pragma_update(None, "user_version", script_version)?;
        tx.commit()?;
        version = script_version;
    }
    Ok(version)
}
