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

//! The public, process-wide entry points. A thin free-function layer over a
//! single [`Profiler`] behind a [`OnceLock`], mirroring the shape of the
//! original C API (free functions over file-level static state) while
//! keeping `Profiler` itself fully instantiable outside the singleton —
//! every test in this crate builds its own `Profiler` directly and never
//! touches `PROFILER`. Every function here is a direct delegation to the
//! identically named `Profiler` method; the fast-path gating (no-op when
//! disabled) lives on `Profiler` itself, not duplicated here.

use crate::{
    config::{Config, Profiler},
    error::{ProfileError, ProfileResult},
    io::Sink,
};
use std::sync::OnceLock;

static PROFILER: OnceLock<Profiler> = OnceLock::new();

fn profiler() -> Option<&'static Profiler> {
    PROFILER.get()
}

/// Initializes the process-wide profiler. Returns
/// [`ProfileError::AlreadyInitialized`] if called more than once — the
/// engine has no notion of reconfiguration, only fresh setup.
pub fn initialize(config: Config) -> ProfileResult<()> {
    let profiler = Profiler::new(config)?;
    PROFILER
        .set(profiler)
        .map_err(|_| ProfileError::AlreadyInitialized)
}

/// Starts or stops the background I/O thread. No-op before `initialize`.
pub fn enable(flag: bool) -> ProfileResult<()> {
    profiler().ok_or(ProfileError::NotInitialized)?.enable(flag);
    Ok(())
}

/// Drains the I/O thread, checks the shape invariants, and reports any
/// violation. See [`Profiler::finalize`].
pub fn finalize() -> ProfileResult<()> {
    profiler().ok_or(ProfileError::NotInitialized)?.finalize()
}

/// Installs the sink that the I/O thread writes every record to.
pub fn set_sink(sink: Sink) -> ProfileResult<()> {
    profiler().ok_or(ProfileError::NotInitialized)?.set_sink(sink);
    Ok(())
}

/// Sets the I/O thread's drain poll interval in milliseconds.
pub fn set_wait_interval_ms(ms: u64) -> ProfileResult<()> {
    profiler()
        .ok_or(ProfileError::NotInitialized)?
        .set_wait_interval_ms(ms);
    Ok(())
}

/// Forcibly closes every span still open on the calling thread. Hosts that
/// tear threads down without running Rust destructors (e.g. an `abort`-style
/// exit) should call this explicitly; ordinary threads get it for free from
/// the thread-local current-slot guard's `Drop` impl.
pub fn thread_finalize() {
    if let Some(p) = profiler() {
        p.thread_finalize();
    }
}

/// Invoked by the thread-local current-slot guard on thread exit.
pub(crate) fn thread_exit_finalize() {
    thread_finalize();
}

/// Opens a new span under the calling thread's currently open span, or as a
/// new root if none is open. Returns `None` (and does nothing) when
/// profiling is disabled, not yet initialized, or the pool is exhausted.
pub fn begin_block(name: &[u8]) -> Option<u32> {
    profiler()?.begin_block(name)
}

/// Closes the calling thread's currently open span. A no-op if none is
/// open, not yet initialized, or profiling is disabled.
pub fn end_block() {
    if let Some(p) = profiler() {
        p.end_block();
    }
}

/// Splits the current span at a processor-migration boundary.
pub fn update_block() {
    if let Some(p) = profiler() {
        p.update_block();
    }
}

pub fn log(name: &[u8]) -> Option<u32> {
    profiler()?.log(name)
}

pub fn trylock(name: &[u8]) -> Option<u32> {
    profiler()?.trylock(name)
}

pub fn lock(name: &[u8]) -> Option<u32> {
    profiler()?.lock(name)
}

pub fn unlock(name: &[u8]) -> Option<u32> {
    profiler()?.unlock(name)
}

pub fn wait(name: &[u8]) -> Option<u32> {
    profiler()?.wait(name)
}

pub fn signal(name: &[u8]) -> Option<u32> {
    profiler()?.signal(name)
}

pub fn end_frame(counter: i32) -> Option<u32> {
    profiler()?.end_frame(counter)
}

#[cfg(test)]
mod tests {
    // The global singleton can only be initialized once per process, so it
    // is exercised end-to-end by `tests/scenarios.rs` instead of here: a
    // unit test in this module would race every other test binary sharing
    // the same `PROFILER`.
}
