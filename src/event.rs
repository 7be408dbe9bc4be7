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

//! Event (message) records: log, trylock, lock, unlock, wait, signal and
//! end-of-frame. Unlike a span, an event is a single `put_event` call with
//! no matching "end" — its `end` field carries a sequence number (or, for
//! end-of-frame, the caller's own frame counter) rather than a timestamp.

use crate::{
    clock::{current_processor, current_thread_id},
    context::Context,
    record::{ID_ENDFRAME, ID_LOCK, ID_LOGMESSAGE, ID_SIGNAL, ID_TRYLOCK, ID_UNLOCK, ID_WAIT, NAME_LEN},
    tree,
};

/// Builds and publishes an event record (and, if `name` overflows a single
/// `name` field and `chain` is set, its continuation chain), then attaches
/// the whole thing to the current open span or, if none is open, straight
/// to the root list.
///
/// Only log/trylock/lock/unlock chain continuations: their continuation ids
/// (master + 1) are reserved and collide with nothing else. `wait` and
/// `signal` do not chain — `wait`'s master-id-plus-one would collide with
/// `signal`'s own id — so oversized names there are simply truncated.
fn put_event(ctx: &Context, id: i32, name: &[u8], chain: bool) -> Option<u32> {
    let master = ctx.pool.allocate()?;
    let processor = current_processor();
    let thread = current_thread_id();
    let start = ctx.now();

    let first_chunk_len = name.len().min(NAME_LEN);
    {
        let rec = unsafe { &mut *ctx.pool.get(master) };
        rec.payload.id = id;
        rec.payload.processor = processor;
        rec.payload.thread = thread;
        rec.payload.start = start;
        rec.payload.set_name(&name[..first_chunk_len]);
    }
    let master_end = ctx.next_id();
    unsafe { (*ctx.pool.get(master)).payload.end = master_end };

    if chain && name.len() > NAME_LEN {
        if let Err(()) = build_continuations(ctx, id + 1, &name[NAME_LEN..], processor, thread, start, master, master_end) {
            // could not allocate a continuation mid-message: drop the whole
            // event rather than publish a truncated one, same fast-fail
            // rule as pool exhaustion elsewhere.
            release_chain(ctx, master);
            return None;
        }
    }

    let parent = tree::current();
    if parent != 0 {
        tree::link_as_child(ctx, parent, master);
    } else {
        ctx.root.put_root(&ctx.pool, master);
    }
    Some(master)
}

/// Chains continuation records onto `prev`'s `child` field, one per
/// remaining `NAME_LEN`-byte chunk of `rest`. Each continuation's
/// `parent_id` is the previous segment's `end` sequence number.
fn build_continuations(
    ctx: &Context,
    cont_id: i32,
    rest: &[u8],
    processor: u32,
    thread: u32,
    start: i64,
    mut prev: u32,
    mut prev_end: i32,
) -> Result<(), ()> {
    let mut remaining = rest;
    while !remaining.is_empty() {
        let chunk_len = remaining.len().min(NAME_LEN);
        let slot = ctx.pool.allocate().ok_or(())?;
        {
            let rec = unsafe { &mut *ctx.pool.get(slot) };
            rec.payload.id = cont_id;
            rec.payload.parent_id = prev_end;
            rec.payload.processor = processor;
            rec.payload.thread = thread;
            rec.payload.start = start;
            rec.payload.set_name(&remaining[..chunk_len]);
        }
        let end = ctx.next_id();
        unsafe { (*ctx.pool.get(slot)).payload.end = end };
        unsafe { (*ctx.pool.get(prev)).child = slot as u16 };
        prev = slot;
        prev_end = end;
        remaining = &remaining[chunk_len..];
    }
    Ok(())
}

/// Releases an event record and its `child`-chained continuation tail back
/// to the pool. The chain never has `sibling` set (events are leaves), so
/// `child` alone is the walk to find the leaf `Pool::release` needs.
fn release_chain(ctx: &Context, root: u32) {
    let mut leaf = root;
    loop {
        let next = unsafe { (*ctx.pool.get(leaf)).child };
        if next == 0 {
            break;
        }
        leaf = next as u32;
    }
    ctx.pool.release(root, leaf);
}

pub fn log(ctx: &Context, name: &[u8]) -> Option<u32> {
    put_event(ctx, ID_LOGMESSAGE, name, true)
}

pub fn trylock(ctx: &Context, name: &[u8]) -> Option<u32> {
    put_event(ctx, ID_TRYLOCK, name, true)
}

pub fn lock(ctx: &Context, name: &[u8]) -> Option<u32> {
    put_event(ctx, ID_LOCK, name, true)
}

pub fn unlock(ctx: &Context, name: &[u8]) -> Option<u32> {
    put_event(ctx, ID_UNLOCK, name, true)
}

pub fn wait(ctx: &Context, name: &[u8]) -> Option<u32> {
    put_event(ctx, ID_WAIT, name, false)
}

pub fn signal(ctx: &Context, name: &[u8]) -> Option<u32> {
    put_event(ctx, ID_SIGNAL, name, false)
}

/// Marks an end of frame. Unlike every other event, `end` carries the
/// caller's own counter rather than a sequence number drawn from the
/// shared id/sequence space.
pub fn end_frame(ctx: &Context, counter: i32) -> Option<u32> {
    let master = ctx.pool.allocate()?;
    let processor = current_processor();
    let thread = current_thread_id();
    let start = ctx.now();
    {
        let rec = unsafe { &mut *ctx.pool.get(master) };
        rec.payload.id = ID_ENDFRAME;
        rec.payload.processor = processor;
        rec.payload.thread = thread;
        rec.payload.start = start;
        rec.payload.end = counter;
    }
    let parent = tree::current();
    if parent != 0 {
        tree::link_as_child(ctx, parent, master);
    } else {
        ctx.root.put_root(&ctx.pool, master);
    }
    Some(master)
}
