//
// mailstore - utilities
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

//! Helpers shared by the store internals.

pub mod futures;
pub mod sqlite3;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{Error, ErrorKind, Result};

/// Seconds since the UNIX epoch, the representation of IMAP `INTERNALDATE`
/// values in the store.
pub type UnixTimestamp = u64;

/// Cooperative cancellation flag shared between a caller and an in-flight
/// operation.
///
/// Cancellation is observed at transaction boundaries only: a cancelled
/// token makes the next boundary fail with [`ErrorKind::Cancelled`],
/// rolling back any partially applied read-write work.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::new("Operation was cancelled.").set_kind(ErrorKind::Cancelled));
        }
        Ok(())
    }
}
