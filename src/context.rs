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

//! The state shared by every producer thread and the I/O thread: the pool,
//! the root list, the id/sequence counter and the clock. Bundled here so
//! `tree`, `event` and `io` don't each thread five parameters through
//! every call.

use {
    crate::{clock::Clock, pool::Pool, root::RootList},
    std::sync::atomic::AtomicI32,
};

pub struct Context {
    pub pool: Pool,
    pub root: RootList,
    /// assigns span ids and event sequence numbers from one shared space,
    /// starting at [`crate::record::FIRST_USER_ID`].
    pub counter: AtomicI32,
    pub clock: Box<dyn Clock>,
    pub ground_time: i64,
}

impl Context {
    pub fn new(pool: Pool, clock: Box<dyn Clock>) -> Self {
        let ground_time = clock.now_ticks();
        Self {
            pool,
            root: RootList::new(),
            counter: AtomicI32::new(crate::record::FIRST_USER_ID),
            clock,
            ground_time,
        }
    }

    #[inline]
    pub fn next_id(&self) -> i32 {
        self.counter.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
    }

    #[inline]
    pub fn now(&self) -> i64 {
        self.clock.now_ticks() - self.ground_time
    }
}
