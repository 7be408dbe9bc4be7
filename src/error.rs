/*
 * This file is part of libtrace.
 *
 * libtrace is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program. If not, see <https://www.gnu.org/licenses/>.
 *
*/

use std::fmt;

pub type ProfileResult<T> = Result<T, ProfileError>;

/// Lifecycle-level errors. Pool exhaustion is *not* one of these: it is
/// logged and the triggering event is silently dropped, per spec, never
/// surfaced through a `Result`.
#[derive(Debug)]
pub enum ProfileError {
    /// `initialize` called on an already-initialized profiler.
    AlreadyInitialized,
    /// An API entry point was used before `initialize`.
    NotInitialized,
    /// The supplied buffer is too small to hold even the reserved slot.
    BufferTooSmall { bytes: usize },
    /// `finalize` observed state that violates the shape invariants of
    /// §3.6: a non-empty root list, or a free-list count that doesn't
    /// match the number of slots minus those still legitimately in use.
    InconsistentFinalizeState {
        root_nonempty: bool,
        expected_free: usize,
        found_free: usize,
        corrupt_sibling: bool,
    },
}

impl fmt::Display for ProfileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInitialized => write!(f, "profiler is already initialized"),
            Self::NotInitialized => write!(f, "profiler has not been initialized"),
            Self::BufferTooSmall { bytes } => {
                write!(f, "profile buffer too small ({bytes} bytes, need at least 128)")
            }
            Self::InconsistentFinalizeState {
                root_nonempty,
                expected_free,
                found_free,
                corrupt_sibling,
            } => write!(
                f,
                "profile module state inconsistent on finalize (root_nonempty={root_nonempty}, \
                 expected {expected_free} free slots, found {found_free}, corrupt_sibling={corrupt_sibling})"
            ),
        }
    }
}

impl std::error::Error for ProfileError {}
