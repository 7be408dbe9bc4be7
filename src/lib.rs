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

//! `libtrace`: an in-process, lock-free hierarchical profiling engine.
//!
//! Captures nested timed spans ("blocks") and event markers (log, lock,
//! wait, signal, end-of-frame) across many threads, assembles them into
//! per-thread trees, and streams them as a fixed-size binary record log to
//! a user-supplied sink through a dedicated background writer.
//!
//! The [`api`] module is the usual entry point: initialize a process-wide
//! profiler once, then call its free functions from anywhere. Every type
//! underneath it — [`config::Profiler`], [`context::Context`], [`pool::Pool`]
//! — is also independently constructible, which is how this crate's own test
//! suite exercises the engine without a global singleton in the way.

#![deny(unused_imports)]

mod clock;
mod context;
mod error;
mod event;
mod io;
mod mem;
mod pool;
mod record;
mod registry;
mod root;
mod sync;
mod tree;

pub mod api;
pub mod config;

pub use clock::{Clock, SystemClock};
pub use config::{Config, Profiler};
pub use error::{ProfileError, ProfileResult};
pub use io::Sink;
pub use record::{
    BlockData, Record, FIRST_USER_ID, ID_ENDFRAME, ID_ENDOFSTREAM, ID_LOCK, ID_LOCKCONTINUE,
    ID_LOGCONTINUE, ID_LOGMESSAGE, ID_SIGNAL, ID_SYSTEMINFO, ID_TRYLOCK, ID_TRYLOCKCONTINUE,
    ID_UNLOCK, ID_UNLOCKCONTINUE, ID_WAIT, NAME_LEN,
};
