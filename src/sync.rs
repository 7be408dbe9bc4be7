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

use std::{cell::Cell, hint::spin_loop, thread};

/// Exponential backoff for the CAS retry loops in `pool`, `root` and
/// `event`. Spins a few times, then falls back to yielding to the scheduler
/// so a contended allocator doesn't peg a core.
pub struct Backoff {
    cur: Cell<u8>,
}

impl Backoff {
    const MAX_SPIN: u8 = 6;
    const MAX_YIELD: u8 = 8;

    pub fn new() -> Self {
        Self { cur: Cell::new(0) }
    }

    pub fn snooze(&self) {
        if self.cur.get() <= Self::MAX_SPIN {
            for _ in 0..1 << self.cur.get() {
                spin_loop();
            }
        } else {
            thread::yield_now();
        }
        if self.cur.get() <= Self::MAX_YIELD {
            self.cur.set(self.cur.get() + 1)
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
