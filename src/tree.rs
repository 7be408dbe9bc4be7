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

//! The per-thread, intrusive tree of currently-open spans. Every operation
//! here assumes the caller already checked the enabled flag: these are the
//! mutating internals, not the public fast-path gate.

use crate::{
    clock::current_processor,
    context::Context,
    record::NAME_LEN,
};
use std::cell::Cell;

struct CurrentSlot(Cell<u32>);

impl Drop for CurrentSlot {
    fn drop(&mut self) {
        // a thread exiting with an open span: run the same forced-close
        // loop a host would run explicitly via `thread_finalize()`, so a
        // leaked span doesn't wedge the next `finalize()` consistency
        // check.
        if self.0.get() != 0 {
            crate::api::thread_exit_finalize();
        }
    }
}

thread_local! {
    static CURRENT: CurrentSlot = const { CurrentSlot(Cell::new(0)) };
}

/// The innermost open span on the calling thread, or 0 if none.
pub fn current() -> u32 {
    CURRENT.with(|c| c.0.get())
}

pub(crate) fn set_current(v: u32) {
    CURRENT.with(|c| c.0.set(v));
}

fn name_slice(buf: &[u8; NAME_LEN]) -> &[u8] {
    let n = buf.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
    &buf[..n]
}

/// Rewrites the sibling-list links so `slot` becomes the new first child of
/// `parent`. Shared by `begin_block` and `event::put_event`, which both need
/// to splice a freshly built record (or record chain) into an already-open
/// span.
pub(crate) fn link_as_child(ctx: &Context, parent: u32, slot: u32) {
    let parent_id = unsafe { (*ctx.pool.get(parent)).payload.id };
    let parent_child = unsafe { (*ctx.pool.get(parent)).child };
    let rec = unsafe { &mut *ctx.pool.get(slot) };
    rec.payload.parent_id = parent_id;
    rec.previous = parent as u16;
    rec.sibling = parent_child;
    if parent_child != 0 {
        unsafe { (*ctx.pool.get(parent_child as u32)).previous = slot as u16 };
    }
    unsafe { (*ctx.pool.get(parent)).child = slot as u16 };
}

/// Opens a new span. Becomes a new root of the thread's open tree if
/// nothing is currently open, otherwise the new first-child of the
/// current block.
pub fn begin_block(ctx: &Context, name: &[u8]) -> Option<u32> {
    let parent = current();
    let slot = ctx.pool.allocate()?;
    let id = ctx.next_id();
    let start = ctx.now();
    let processor = current_processor();
    let thread = crate::clock::current_thread_id();
    if parent == 0 {
        // SAFETY: `slot` was just allocated; this thread is its sole
        // owner until it is published via `put_root` or re-parented by a
        // sibling `begin_block`.
        let rec = unsafe { &mut *ctx.pool.get(slot) };
        rec.payload.id = id;
        rec.payload.set_name(name);
        rec.payload.processor = processor;
        rec.payload.thread = thread;
        rec.payload.start = start;
    } else {
        let rec = unsafe { &mut *ctx.pool.get(slot) };
        rec.payload.id = id;
        rec.payload.set_name(name);
        rec.payload.processor = processor;
        rec.payload.thread = thread;
        rec.payload.start = start;
        link_as_child(ctx, parent, slot);
    }
    set_current(slot);
    Some(slot)
}

/// Closes the current span. If it was an outermost root of this thread's
/// tree, publishes the whole tree to the root list; otherwise walks the
/// sibling list backwards to find the true parent. If the parent's
/// recorded processor no longer matches the live one, the parent itself is
/// split at this point (ended and reopened), exactly mirroring the
/// migration-split behavior of `update_block`.
pub fn end_block(ctx: &Context) {
    let idx = current();
    if idx == 0 {
        return;
    }
    let end = ctx.now();
    unsafe { (*ctx.pool.get(idx)).payload.end = end };

    let previous = unsafe { (*ctx.pool.get(idx)).previous };
    if previous == 0 {
        ctx.root.put_root(&ctx.pool, idx);
        set_current(0);
        return;
    }

    // walk the sibling list backwards until we find the slot whose
    // `child` pointer actually names the node we're looking at — that
    // slot is the true parent (see spec §4.2).
    let mut idx_k = idx;
    let mut prev_k = unsafe { (*ctx.pool.get(idx_k)).previous } as u32;
    while unsafe { (*ctx.pool.get(prev_k)).child } as u32 != idx_k {
        idx_k = prev_k;
        prev_k = unsafe { (*ctx.pool.get(idx_k)).previous } as u32;
    }
    let parent_index = prev_k;
    set_current(parent_index);

    let parent_processor = unsafe { (*ctx.pool.get(parent_index)).payload.processor };
    if parent_processor != current_processor() {
        let name = unsafe { (*ctx.pool.get(parent_index)).payload.name };
        end_block(ctx);
        begin_block(ctx, name_slice(&name));
    }
}

/// Forcibly closes every span still open on the calling thread. Called
/// automatically by [`CurrentSlot`]'s `Drop` impl when a thread exits with
/// an open tree, and callable manually via `api::thread_finalize()` for
/// hosts that tear threads down without running Rust destructors.
///
/// Warns on every forced close; if ending a block ever leaves `current()`
/// unchanged (a corrupted `previous` chain pointing at itself), logs an
/// error and breaks rather than looping forever.
pub fn thread_finalize(ctx: &Context) {
    loop {
        let slot = current();
        if slot == 0 {
            break;
        }
        log::warn!("thread exiting with open profile span at slot {slot}; force-closing");
        end_block(ctx);
        if current() == slot {
            log::error!(
                "profile thread-finalize detected a self-reference at slot {slot}; breaking cleanup loop"
            );
            break;
        }
    }
}

/// Splits the current span at a processor migration boundary: ends it and
/// reopens it under the same name, so each half records the CPU it
/// actually ran on.
pub fn update_block(ctx: &Context) {
    let idx = current();
    if idx == 0 {
        return;
    }
    let processor = unsafe { (*ctx.pool.get(idx)).payload.processor };
    let live = current_processor();
    if processor == live {
        return;
    }
    let name = unsafe { (*ctx.pool.get(idx)).payload.name };
    end_block(ctx);
    begin_block(ctx, name_slice(&name));
}
