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

//! Plain configuration data and the long-lived `Profiler` service that owns
//! a pool, a clock and the background I/O thread built from it.

use crate::{
    clock::{Clock, SystemClock},
    context::Context,
    error::{ProfileError, ProfileResult},
    event,
    io::{IoThread, Sink},
    pool::Pool,
    registry::Flag,
    tree,
};
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};

const MIN_BUFFER_BYTES: usize = 128; // room for the reserved slot plus one usable record

/// Plain configuration for a [`Profiler`]. Holds no behavior of its own;
/// `Profiler::new` is what turns it into a running engine.
pub struct Config {
    pub identifier: String,
    pub buffer_size: usize,
    pub wait_interval_ms: u64,
    pub clock: Box<dyn Clock>,
}

impl Config {
    /// A config using the default [`SystemClock`].
    pub fn new(identifier: impl Into<String>, buffer_size: usize) -> Self {
        Self {
            identifier: identifier.into(),
            buffer_size,
            wait_interval_ms: 100,
            clock: Box::new(SystemClock::new()),
        }
    }
}

/// The profiling engine: a pool, a root list, a clock and (once enabled) a
/// background I/O thread, reachable either as a standalone value (as tests
/// construct it) or through the process-wide singleton in `api`.
pub struct Profiler {
    identifier: String,
    ctx: Arc<Context>,
    enabled: Flag,
    io: Mutex<Option<IoThread>>,
    pending_sink: Mutex<Option<Sink>>,
    wait_interval: Mutex<Duration>,
}

impl Profiler {
    /// Builds a pool of `config.buffer_size / 64` records (capped at 65535
    /// slots) and wires up the shared context. Profiling starts disabled;
    /// call [`Profiler::enable`] to start the I/O thread.
    pub fn new(config: Config) -> ProfileResult<Self> {
        if config.buffer_size < MIN_BUFFER_BYTES {
            return Err(ProfileError::BufferTooSmall {
                bytes: config.buffer_size,
            });
        }
        let pool = Pool::new(config.buffer_size);
        let ctx = Arc::new(Context::new(pool, config.clock));
        log::debug!(
            "profiler '{}' initialized with {} usable slots",
            config.identifier,
            ctx.pool.usable_capacity()
        );
        Ok(Self {
            identifier: config.identifier,
            ctx,
            enabled: Flag::new(false),
            io: Mutex::new(None),
            pending_sink: Mutex::new(None),
            wait_interval: Mutex::new(Duration::from_millis(config.wait_interval_ms.max(1))),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    /// Installs the sink that will receive every 64-byte record from the
    /// next time the I/O thread is (re)started. Taking effect only on the
    /// next `enable(true)` keeps the sink handoff lock-free on the hot
    /// path: producers never touch it.
    pub fn set_sink(&self, sink: Sink) {
        *self.pending_sink.lock() = Some(sink);
    }

    /// Sets the drain poll interval, floored to 1ms per spec.
    pub fn set_wait_interval_ms(&self, ms: u64) {
        *self.wait_interval.lock() = Duration::from_millis(ms.max(1));
    }

    /// Starts or stops the background I/O thread. A redundant call (enable
    /// while already enabled, or vice versa) is a no-op.
    pub fn enable(&self, flag: bool) {
        let was_enabled = self.enabled.get();
        if flag && !was_enabled {
            self.enabled.set(true);
            let sink = self.pending_sink.lock().take();
            let wait = *self.wait_interval.lock();
            let worker = IoThread::spawn(self.ctx.clone(), sink, wait);
            *self.io.lock() = Some(worker);
            log::info!("profiling enabled for '{}'", self.identifier);
        } else if !flag && was_enabled {
            self.enabled.set(false);
            if let Some(worker) = self.io.lock().take() {
                worker.join();
            }
            log::info!("profiling disabled for '{}'", self.identifier);
        }
    }

    /// Stops the I/O thread (if running), drains one last time, and checks
    /// the §7 shape invariants: free-list length equal to usable capacity,
    /// an empty root list, and no free-list element with a nonzero
    /// `sibling`. Violations are logged and returned as an error; finalize
    /// never panics, per spec's "no exceptions" rule.
    pub fn finalize(&self) -> ProfileResult<()> {
        self.enable(false);
        let (found_free, clean) = self.ctx.pool.free_list_census();
        let expected_free = self.ctx.pool.usable_capacity();
        let root_nonempty = !self.ctx.root.is_empty();
        if found_free != expected_free || !clean || root_nonempty {
            log::error!(
                "profiler '{}' finalize found inconsistent state: expected {} free slots, found {}, \
                 root_nonempty={}, corrupt_sibling={}",
                self.identifier,
                expected_free,
                found_free,
                root_nonempty,
                !clean,
            );
            return Err(ProfileError::InconsistentFinalizeState {
                root_nonempty,
                expected_free,
                found_free,
                corrupt_sibling: !clean,
            });
        }
        Ok(())
    }

    /// A point-in-time snapshot of pool/root-list health. Used by
    /// `finalize`'s own checks and exposed publicly so a host (or a test)
    /// can observe the same numbers without forcing a finalize.
    pub fn diagnostics(&self) -> Diagnostics {
        let (free_slots, free_list_clean) = self.ctx.pool.free_list_census();
        Diagnostics {
            usable_capacity: self.ctx.pool.usable_capacity(),
            free_slots,
            free_list_clean,
            root_empty: self.ctx.root.is_empty(),
        }
    }

    // The span/event API below is intentionally duplicated in shape by the
    // free functions in `api`: those operate on the process-wide singleton,
    // these on any standalone `Profiler` — the same fast path (return
    // immediately, untouched, when disabled) applies either way, per spec
    // §4.7.

    pub fn begin_block(&self, name: &[u8]) -> Option<u32> {
        if !self.is_enabled() {
            return None;
        }
        tree::begin_block(&self.ctx, name)
    }

    pub fn end_block(&self) {
        if !self.is_enabled() {
            return;
        }
        tree::end_block(&self.ctx)
    }

    pub fn update_block(&self) {
        if !self.is_enabled() {
            return;
        }
        tree::update_block(&self.ctx)
    }

    pub fn log(&self, name: &[u8]) -> Option<u32> {
        if !self.is_enabled() {
            return None;
        }
        event::log(&self.ctx, name)
    }

    pub fn trylock(&self, name: &[u8]) -> Option<u32> {
        if !self.is_enabled() {
            return None;
        }
        event::trylock(&self.ctx, name)
    }

    pub fn lock(&self, name: &[u8]) -> Option<u32> {
        if !self.is_enabled() {
            return None;
        }
        event::lock(&self.ctx, name)
    }

    pub fn unlock(&self, name: &[u8]) -> Option<u32> {
        if !self.is_enabled() {
            return None;
        }
        event::unlock(&self.ctx, name)
    }

    pub fn wait(&self, name: &[u8]) -> Option<u32> {
        if !self.is_enabled() {
            return None;
        }
        event::wait(&self.ctx, name)
    }

    pub fn signal(&self, name: &[u8]) -> Option<u32> {
        if !self.is_enabled() {
            return None;
        }
        event::signal(&self.ctx, name)
    }

    pub fn end_frame(&self, counter: i32) -> Option<u32> {
        if !self.is_enabled() {
            return None;
        }
        event::end_frame(&self.ctx, counter)
    }

    /// Forcibly closes every span still open on the calling thread,
    /// regardless of whether profiling is currently enabled — a thread
    /// exiting mid-span should not leak its slot just because `enable(false)`
    /// happened to race it.
    pub fn thread_finalize(&self) {
        tree::thread_finalize(&self.ctx)
    }
}

/// A point-in-time snapshot of the pool and root-list state, per spec §7's
/// consistency checks.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostics {
    pub usable_capacity: usize,
    pub free_slots: usize,
    pub free_list_clean: bool,
    pub root_empty: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_too_small_is_rejected() {
        let cfg = Config::new("test", 16);
        assert!(matches!(
            Profiler::new(cfg),
            Err(ProfileError::BufferTooSmall { bytes: 16 })
        ));
    }

    #[test]
    fn finalize_on_a_quiescent_profiler_is_clean() {
        let profiler = Profiler::new(Config::new("test", 8 * 64)).unwrap();
        assert!(profiler.finalize().is_ok());
    }

    #[test]
    fn enable_disable_round_trips_without_a_sink() {
        let profiler = Profiler::new(Config::new("test", 8 * 64)).unwrap();
        profiler.enable(true);
        assert!(profiler.is_enabled());
        profiler.enable(false);
        assert!(!profiler.is_enabled());
    }
}
