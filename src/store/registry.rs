//
// mailstore - folder registry
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

//! Live folder handles and the weak-reference registry that caches them.
//!
//! The registry guarantees at most one live handle per path: concurrent
//! requests for the same path observe the same [`LocalFolder`], and once
//! every caller drops its handle the map entry is reclaimed by the handle's
//! drop observer. There is no explicit release call.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use crate::{
    error::Result,
    folder::{FolderId, FolderPath, FolderProperties},
    utils::sqlite3::Transaction,
};

pub(crate) type RegistryMap = Mutex<HashMap<FolderPath, Weak<LocalFolder>>>;

/// A live, cached per-folder handle.
///
/// Obtained through the account store; shared between the store and
/// whoever requested it. The registry only keeps a weak back-reference.
#[derive(Debug)]
pub struct LocalFolder {
    id: FolderId,
    path: FolderPath,
    properties: Mutex<FolderProperties>,
    registry: Weak<RegistryMap>,
}

impl LocalFolder {
    pub fn id(&self) -> FolderId {
        self.id
    }

    pub fn path(&self) -> &FolderPath {
        &self.path
    }

    /// Snapshot of the in-memory folder properties.
    pub fn properties(&self) -> FolderProperties {
        *self.properties.lock().unwrap()
    }

    pub fn unread_count(&self) -> usize {
        self.properties.lock().unwrap().unread_count
    }

    pub fn message_count(&self) -> usize {
        self.properties.lock().unwrap().message_count()
    }

    pub(crate) fn set_properties(&self, properties: FolderProperties) {
        *self.properties.lock().unwrap() = properties;
    }

    pub(crate) fn set_unread_count(&self, unread: usize) {
        self.properties.lock().unwrap().unread_count = unread;
    }

    /// Applies an unread-count delta to this folder's row within the
    /// caller's transaction and returns the persisted total.
    pub(crate) fn do_add_to_unread_count(&self, tx: &Transaction, delta: i64) -> Result<usize> {
        super::folders::add_to_unread_count(tx, self.id, delta)
    }
}

impl Drop for LocalFolder {
    fn drop(&mut self) {
        // Last strong reference is gone; evict our map entry unless a
        // replacement handle was installed under the same path meanwhile.
        if let Some(map) = self.registry.upgrade() {
            if let Ok(mut map) = map.lock() {
                if let Some(weak) = map.get(&self.path) {
                    if weak.strong_count() == 0 {
                        map.remove(&self.path);
                    }
                }
            }
        }
    }
}

/// Weak-reference index from folder path to live folder handle.
#[derive(Debug, Default)]
pub struct FolderRegistry {
    map: Arc<RegistryMap>,
}

impl FolderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live handle for `path` if one exists.
    pub fn get_local_folder(&self, path: &FolderPath) -> Option<Arc<LocalFolder>> {
        self.map.lock().unwrap().get(path).and_then(Weak::upgrade)
    }

    /// Returns the cached handle for `path`, refreshing its properties, or
    /// installs a new one.
    ///
    /// The map update happens synchronously so a follow-up lookup by the
    /// same caller observes the same handle.
    pub fn create_local_folder(
        &self,
        path: &FolderPath,
        id: FolderId,
        properties: FolderProperties,
    ) -> Arc<LocalFolder> {
        let mut map = self.map.lock().unwrap();
        if let Some(existing) = map.get(path).and_then(Weak::upgrade) {
            existing.set_properties(properties);
            return existing;
        }
        let handle = Arc::new(LocalFolder {
            id,
            path: path.clone(),
            properties: Mutex::new(properties),
            registry: Arc::downgrade(&self.map),
        });
        map.insert(path.clone(), Arc::downgrade(&handle));
        handle
    }

    /// Snapshot of all currently live handles.
    pub fn live_folders(&self) -> Vec<Arc<LocalFolder>> {
        self.map
            .lock()
            .unwrap()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map
            .lock()
            .unwrap()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        self.map.lock().unwrap().clear();
    }
}
