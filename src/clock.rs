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

//! Concrete clock, thread-id and processor-id sources. spec.md treats these
//! as external collaborators; this module supplies the default
//! implementation so the crate is runnable standalone, while keeping the
//! clock itself pluggable (tests inject a deterministic one).

use std::time::Instant;

/// A source of monotonic tick counts. `now_ticks()` values are only ever
/// compared to each other or to `ground_time`, never interpreted as wall
/// time.
pub trait Clock: Send + Sync {
    fn now_ticks(&self) -> i64;
    fn ticks_per_second(&self) -> i64;
}

/// The default clock: nanoseconds since an arbitrary `Instant` fixed at
/// construction.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ticks(&self) -> i64 {
        self.epoch.elapsed().as_nanos() as i64
    }

    fn ticks_per_second(&self) -> i64 {
        1_000_000_000
    }
}

/// Hashes the current thread's `ThreadId` down to a `u32`. `ThreadId`
/// exposes no stable integer accessor, so its `Debug` representation
/// (`ThreadId(N)`) is parsed out; this is stable across the threads of a
/// single process for the lifetime of the process.
pub fn current_thread_id() -> u32 {
    let id = std::thread::current().id();
    let rendered = format!("{id:?}");
    let digits: String = rendered.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse::<u64>().unwrap_or(0) as u32
}

/// The logical CPU the calling thread is currently running on.
#[cfg(unix)]
pub fn current_processor() -> u32 {
    let cpu = unsafe { libc::sched_getcpu() };
    if cpu < 0 {
        0
    } else {
        cpu as u32
    }
}

#[cfg(not(unix))]
pub fn current_processor() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_monotonic() {
        let c = SystemClock::new();
        let a = c.now_ticks();
        let b = c.now_ticks();
        assert!(b >= a);
        assert_eq!(c.ticks_per_second(), 1_000_000_000);
    }

    #[test]
    fn thread_id_is_stable_within_a_thread() {
        let a = current_thread_id();
        let b = current_thread_id();
        assert_eq!(a, b);
    }
}
