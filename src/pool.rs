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

//! The fixed-capacity record pool and its lock-free, tagged free list.

use {
    crate::{mem::CachePadded, record::Record, sync::Backoff},
    std::{
        cell::UnsafeCell,
        sync::atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

/// A pool can never exceed this many slots, per spec §3.2/§6.3: slots are
/// addressed by a 16-bit index and slot 0 is reserved, so `u16::MAX` (not
/// `u16::MAX + 1`) is the usable ceiling.
pub const MAX_SLOTS: usize = u16::MAX as usize;

/// A fixed-capacity pool of 64-byte records, backed by a lock-free tagged
/// free list. Slot 0 is reserved and never allocated.
pub struct Pool {
    records: Box<[UnsafeCell<Record>]>,
    /// low 16 bits: head slot (0 == empty). high 16 bits: ABA tag.
    free_head: CachePadded<AtomicU32>,
    /// monotonic tag source, OR-ed into the high bits of every head write.
    loop_id: CachePadded<AtomicU32>,
    /// fires the "pool exhausted" log line exactly once.
    warned: AtomicBool,
}

// SAFETY: every slot in `records` is owned, at any instant, by exactly one
// of: the free list, the allocating thread's open tree (until it publishes
// the slot via `put_root`), or the I/O thread (once drained). Access to a
// slot's fields is therefore never concurrent with another writer in
// practice, even though the `UnsafeCell` accesses below are not visible to
// the type system as synchronized. This is the same "intrusive index
// structure, external invariant" tradeoff the reference codebase's own
// lock-free queue (`engine::sync::queue::Queue`) makes with raw pointer
// derefs under `crossbeam_epoch::Guard` protection — here the protection is
// the handoff protocol itself rather than an epoch.
unsafe impl Sync for Pool {}

impl Pool {
    /// Builds a pool sized for `buffer_size / 64` records, capped at
    /// [`MAX_SLOTS`]. Slots `1..n-1` are threaded onto the free list via
    /// their `child` field; the terminal slot's `child` is 0.
    pub fn new(buffer_size: usize) -> Self {
        let mut n = buffer_size / core::mem::size_of::<Record>();
        if n > MAX_SLOTS {
            n = MAX_SLOTS;
        }
        // slot 0 is always reserved, so a pool must hold at least 2 slots
        // to be useful; a pool of 0 or 1 slots simply never allocates.
        let mut records = Vec::with_capacity(n.max(1));
        for i in 0..n.max(1) {
            let mut r = Record::zeroed();
            if i > 0 {
                r.child = if i + 1 < n { (i + 1) as u16 } else { 0 };
            }
            records.push(UnsafeCell::new(r));
        }
        Self {
            records: records.into_boxed_slice(),
            free_head: CachePadded::new(AtomicU32::new(if n > 1 { 1 } else { 0 })),
            loop_id: CachePadded::new(AtomicU32::new(0)),
            warned: AtomicBool::new(false),
        }
    }

    /// Total slot count, including the reserved slot 0.
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Number of slots actually usable for allocation (capacity minus the
    /// reserved slot 0).
    pub fn usable_capacity(&self) -> usize {
        self.capacity().saturating_sub(1)
    }

    #[inline]
    pub(crate) fn get(&self, slot: u32) -> *mut Record {
        debug_assert!(slot != 0 && (slot as usize) < self.records.len());
        self.records[slot as usize].get()
    }

    fn next_tag(&self) -> u32 {
        self.loop_id.fetch_add(1, Ordering::Relaxed).wrapping_add(1) & 0xFFFF
    }

    fn warn_exhausted(&self) {
        if self
            .warned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            if self.capacity() < MAX_SLOTS {
                log::error!(
                    "profile blocks exhausted ({} slots); increase profile memory block size",
                    self.usable_capacity()
                );
            } else {
                log::error!("profile blocks exhausted; decrease profile output wait time");
            }
        }
    }

    /// Pops a slot off the free list, zeroes it, and returns its index.
    /// Returns `None` (and logs a one-shot warning) if the pool is
    /// exhausted; callers must silently drop the event.
    pub fn allocate(&self) -> Option<u32> {
        let backoff = Backoff::new();
        loop {
            let head = self.free_head.load(Ordering::Acquire);
            let slot = head & 0xFFFF;
            if slot == 0 {
                self.warn_exhausted();
                return None;
            }
            // SAFETY: `slot` was observed reachable from the free list; no
            // thread other than a concurrent allocate/release touches this
            // field while the slot is still logically free (see the impl
            // Sync safety note above).
            let next = unsafe { (*self.get(slot)).child } as u32;
            let tag = self.next_tag();
            let new_head = next | (tag << 16);
            if self
                .free_head
                .compare_exchange_weak(head, new_head, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                unsafe { (*self.get(slot)).reset() };
                return Some(slot);
            }
            backoff.snooze();
        }
    }

    /// Pushes the entire `child`-linked chain from `root` to `leaf` onto
    /// the free list in a single CAS.
    pub fn release(&self, root: u32, leaf: u32) {
        debug_assert_eq!(
            unsafe { (*self.get(leaf)).sibling },
            0,
            "released chain leaf must have sibling == 0"
        );
        let backoff = Backoff::new();
        loop {
            let tag = self.next_tag();
            let last = self.free_head.load(Ordering::Acquire);
            // SAFETY: `leaf` is exclusively owned by the caller at this
            // point (it is no longer reachable from the root list).
            unsafe { (*self.get(leaf)).child = (last & 0xFFFF) as u16 };
            let new_head = root | (tag << 16);
            if self
                .free_head
                .compare_exchange_weak(last, new_head, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            backoff.snooze();
        }
    }

    /// Walks the free list, returning the count of distinct slots and
    /// `true` if every slot encountered had `sibling == 0` (the invariant
    /// checked at finalize).
    pub fn free_list_census(&self) -> (usize, bool) {
        let mut count = 0usize;
        let mut clean = true;
        let mut slot = self.free_head.load(Ordering::Acquire) & 0xFFFF;
        let mut seen = std::collections::HashSet::new();
        while slot != 0 {
            if !seen.insert(slot) {
                // a cycle; treat as inconsistent and stop.
                clean = false;
                break;
            }
            count += 1;
            let rec = unsafe { &*self.get(slot) };
            if rec.sibling != 0 {
                clean = false;
            }
            slot = rec.child as u32;
        }
        (count, clean)
    }
}
