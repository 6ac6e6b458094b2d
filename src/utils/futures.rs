//
// mailstore - future utilities
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

use std::time::Duration;

use super::CancelToken;

/// Sleep that wakes up early when `cancel` is triggered. Returns `false`
/// when the sleep ended by cancellation.
///
/// Polls the token every 500ms at most; precise enough for the load-shaping
/// delays it is used for.
pub async fn sleep_unless_cancelled(dur: Duration, cancel: &CancelToken) -> bool {
    const POLL_STEP: Duration = Duration::from_millis(500);

    let mut remaining = dur;
    while !remaining.is_zero() {
        if cancel.is_cancelled() {
            return false;
        }
        let step = remaining.min(POLL_STEP);
        smol::Timer::after(step).await;
        remaining = remaining.saturating_sub(step);
    }
    !cancel.is_cancelled()
}
