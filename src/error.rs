//
// mailstore - error module
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

//! An error object for the mail store.

use std::{borrow::Cow, error, fmt, io, result, sync::Arc};

pub type Result<T> = result::Result<T, Error>;

/// Classification of a store error, for callers that dispatch on failure
/// cause rather than message text.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ErrorKind {
    /// The account store is already open.
    AlreadyOpen,
    /// The operation requires an open account store.
    NotOpen,
    /// A folder path or message could not be resolved.
    NotFound,
    /// Malformed input (empty path segment, mixed identifier types).
    BadParameters,
    /// A message row does not satisfy the fields the caller required.
    IncompleteMessage,
    /// The database file failed its integrity check.
    Corruption,
    /// The operation was cancelled through its cancellation token.
    Cancelled,
    /// Uncategorized database error, passed through from sqlite3.
    Sqlite,
    /// An invariant the store relies upon did not hold.
    Bug,
    #[default]
    None,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.write_str(match self {
            Self::AlreadyOpen => "Account store is already open",
            Self::NotOpen => "Account store is not open",
            Self::NotFound => "Not found",
            Self::BadParameters => "Bad parameters",
            Self::IncompleteMessage => "Message does not satisfy required fields",
            Self::Corruption => "Database corruption",
            Self::Cancelled => "Operation was cancelled",
            Self::Sqlite => "Database error",
            Self::Bug => "Bug, please report this",
            Self::None => "Error",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Error {
    pub summary: Cow<'static, str>,
    pub details: Option<Cow<'static, str>>,
    pub inner: Option<Arc<dyn error::Error + Send + Sync + 'static>>,
    pub kind: ErrorKind,
}

pub trait IntoError {
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>;

    fn set_err_kind(self, kind: ErrorKind) -> Error;
}

pub trait ResultIntoError<T> {
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>;

    fn chain_err_kind(self, kind: ErrorKind) -> Result<T>;
}

impl<I: Into<Error>> IntoError for I {
    #[inline]
    fn set_err_summary<M>(self, msg: M) -> Error
    where
        M: Into<Cow<'static, str>>,
    {
        let err: Error = self.into();
        err.set_summary(msg)
    }

    #[inline]
    fn set_err_kind(self, kind: ErrorKind) -> Error {
        let err: Error = self.into();
        err.set_kind(kind)
    }
}

impl<T, I: Into<Error>> ResultIntoError<T> for result::Result<T, I> {
    #[inline]
    fn chain_err_summary<M, F>(self, msg_fn: F) -> Result<T>
    where
        F: Fn() -> M,
        M: Into<Cow<'static, str>>,
    {
        self.map_err(|err| err.set_err_summary(msg_fn()))
    }

    #[inline]
    fn chain_err_kind(self, kind: ErrorKind) -> Result<T> {
        self.map_err(|err| err.set_err_kind(kind))
    }
}

impl Error {
    pub fn new<M>(msg: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        Self {
            summary: msg.into(),
            details: None,
            inner: None,
            kind: ErrorKind::default(),
        }
    }

    pub fn set_summary<M>(mut self, summary: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        if self.summary.is_empty() {
            self.summary = summary.into();
        } else {
            self.summary = format!("{}. {}", summary.into(), self.summary).into();
        }
        self
    }

    pub fn set_details<M>(mut self, details: M) -> Self
    where
        M: Into<Cow<'static, str>>,
    {
        self.details = Some(details.into());
        self
    }

    pub fn set_inner(
        mut self,
        inner: Option<Arc<dyn error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.inner = inner;
        self
    }

    pub fn set_kind(mut self, kind: ErrorKind) -> Self {
        self.kind = kind;
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", self.summary)?;
        if let Some(details) = self.details.as_ref() {
            write!(fmt, "\n{}", details)?;
        }
        if let Some(inner) = self.inner.as_ref() {
            write!(fmt, "\nCaused by: {}", inner)?;
        }
        if self.kind != ErrorKind::None {
            write!(fmt, "\nKind: {}", self.kind)?;
        }
        Ok(())
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.inner.as_ref().map(|s| &(*(*s)) as _)
    }
}

impl From<io::Error> for Error {
    #[inline]
    fn from(err: io::Error) -> Self {
        Self::new(err.to_string()).set_inner(Some(Arc::new(err)))
    }
}

impl From<rusqlite::Error> for Error {
    #[inline]
    fn from(err: rusqlite::Error) -> Self {
        Self::new(err.to_string())
            .set_inner(Some(Arc::new(err)))
            .set_kind(ErrorKind::Sqlite)
    }
}

impl From<serde_json::Error> for Error {
    #[inline]
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string()).set_inner(Some(Arc::new(err)))
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    #[inline]
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::new(err.to_string()).set_kind(ErrorKind::Bug)
    }
}

impl From<&str> for Error {
    #[inline]
    fn from(err: &str) -> Self {
        Self::new(err.to_string())
    }
}

impl From<String> for Error {
    #[inline]
    fn from(err: String) -> Self {
        Self::new(err)
    }
}
