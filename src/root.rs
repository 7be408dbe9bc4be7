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

//! The lock-free root handoff list: completed per-thread trees wait here
//! until the I/O thread drains them.

use {
    crate::{mem::CachePadded, pool::Pool},
    std::sync::atomic::{AtomicU32, Ordering},
};

/// Head of the root list, linked through each root record's `sibling`
/// field. Unlike the free-list head, the high bits are left unused: a
/// swap-to-zero on drain/splice makes ABA infeasible in practice without a
/// tag (see DESIGN.md for the open-question resolution).
pub struct RootList {
    head: CachePadded<AtomicU32>,
}

impl RootList {
    pub const fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicU32::new(0)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == 0
    }

    /// Publishes a completed outermost tree. Splices any concurrently
    /// published list onto the tail of `block`'s sibling chain before
    /// retrying, so no tree published before a drain is ever lost.
    pub fn put_root(&self, pool: &Pool, block: u32) {
        loop {
            if self
                .head
                .compare_exchange(0, block, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            let sibling = loop {
                let s = self.head.load(Ordering::Acquire);
                if s == 0 {
                    break 0;
                }
                if self
                    .head
                    .compare_exchange(s, 0, Ordering::AcqRel, Ordering::Relaxed)
                    .is_ok()
                {
                    break s;
                }
            };
            if sibling != 0 {
                // SAFETY: `block` is exclusively owned by this thread (it
                // is the just-closed root of its open tree); `sibling`
                // (and the chain reachable from it) was just unlinked from
                // the root head and is not yet visible to any other
                // producer or the I/O thread.
                let self_sibling = unsafe { (*pool.get(block)).sibling } as u32;
                if self_sibling != 0 {
                    let mut leaf = self_sibling;
                    loop {
                        let next = unsafe { (*pool.get(leaf)).sibling };
                        if next == 0 {
                            break;
                        }
                        leaf = next as u32;
                    }
                    unsafe {
                        (*pool.get(sibling)).previous = leaf as u16;
                        (*pool.get(leaf)).sibling = sibling as u16;
                    }
                } else {
                    unsafe { (*pool.get(block)).sibling = sibling as u16 };
                }
            }
        }
    }

    /// Atomically captures the whole list (swap head to 0) and returns the
    /// slot of its first element, or 0 if empty.
    pub fn drain(&self) -> u32 {
        loop {
            let block = self.head.load(Ordering::Acquire);
            if block == 0 {
                return 0;
            }
            if self
                .head
                .compare_exchange(block, 0, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return block;
            }
        }
    }
}

impl Default for RootList {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain_len(pool: &Pool, mut slot: u32) -> usize {
        let mut n = 0;
        while slot != 0 {
            n += 1;
            slot = unsafe { (*pool.get(slot)).sibling as u32 };
        }
        n
    }

    #[test]
    fn single_publish_then_drain() {
        let pool = Pool::new(8 * 64);
        let root = RootList::new();
        let a = pool.allocate().unwrap();
        root.put_root(&pool, a);
        assert!(!root.is_empty());
        let drained = root.drain();
        assert_eq!(drained, a);
        assert!(root.is_empty());
    }

    #[test]
    fn concurrent_publishes_are_all_present_at_drain() {
        let pool = Pool::new(64 * 64);
        let root = RootList::new();
        let slots: Vec<u32> = (0..16).map(|_| pool.allocate().unwrap()).collect();
        for &s in &slots {
            root.put_root(&pool, s);
        }
        let head = root.drain();
        assert_eq!(chain_len(&pool, head), slots.len());
    }
}
