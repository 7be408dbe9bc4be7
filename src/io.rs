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

//! The background I/O thread: periodically drains the root list, flattens
//! each drained tree into a single `child`-linked chain, streams the
//! flattened records to the sink, and recycles the whole chain in one CAS.

use crate::{context::Context, record::Record, tree};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::{sync::Arc, thread::JoinHandle, time::Duration};

/// A byte-consuming sink. Boxed so `Config::set_sink` can take any
/// `FnMut(&[u8]) + Send` closure, matching spec §6.1's "sink may be null"
/// contract: `None` still drains and recycles, it simply emits nothing.
pub type Sink = Box<dyn FnMut(&[u8; 64]) + Send>;

const SYSINFO_EVERY: u32 = 11;

/// Owns the background worker's handle and its exit-semaphore sender. A
/// zero-capacity `crossbeam_channel` doubles as both a "stop now" signal and
/// a timeout source via `recv_timeout`, mirroring how the reference
/// codebase hands a dedicated worker thread a channel it can both wait and
/// be told to exit on (`server/src/coredb/lock.rs`'s `recv_timeout`-driven
/// test harness; `libstress`'s `Workpool` for the worker/`Drop`-join shape).
pub struct IoThread {
    exit_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl IoThread {
    /// Spawns the worker. `wait_interval` is the drain poll period (floored
    /// to 1ms by the caller, per spec §6.3).
    pub fn spawn(ctx: Arc<Context>, sink: Option<Sink>, wait_interval: Duration) -> Self {
        let (exit_tx, exit_rx) = bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name("libtrace-io".into())
            .spawn(move || run(ctx, sink, wait_interval, exit_rx))
            .expect("failed to spawn libtrace I/O thread");
        Self {
            exit_tx,
            handle: Some(handle),
        }
    }

    /// Signals the worker to stop and blocks until it has drained one last
    /// time and emitted the terminator record.
    pub fn join(mut self) {
        let _ = self.exit_tx.send(());
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

fn run(ctx: Arc<Context>, mut sink: Option<Sink>, wait_interval: Duration, exit_rx: Receiver<()>) {
    let mut sysinfo_counter: u32 = 0;
    loop {
        match exit_rx.recv_timeout(wait_interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        drain_once(&ctx, &mut sink, &mut sysinfo_counter);
    }
    // final drain: bare, with no self-accounting spans. `drain_once` opens
    // "profile_io"/"process" and publishes that pair to the root list on
    // close — fine mid-run, since the next timer tick drains it, but fatal
    // here: nothing ever drains again after `run()` returns, so those two
    // slots (and a non-empty root list) would outlive the I/O thread and
    // fail every consistency check in `Profiler::finalize`. Loop until
    // empty since a producer may still be publishing as we shut down.
    while !ctx.root.is_empty() {
        drain_bare(&ctx, &mut sink);
    }
    emit(&mut sink, &Record::zeroed());
}

/// The drain + reparent + release core shared by `drain_once` and the
/// shutdown path in `run`: captures the root list, flattens and streams
/// each tree, and returns the whole chain to the free list.
fn drain_bare(ctx: &Context, sink: &mut Option<Sink>) {
    let mut head = ctx.root.drain();
    while head != 0 {
        let next_root = unsafe { (*ctx.pool.get(head)).sibling } as u32;
        unsafe { (*ctx.pool.get(head)).sibling = 0 };
        let leaf = process_subtree(ctx, sink, head);
        ctx.pool.release(head, leaf);
        head = next_root;
    }
}

/// One pass of the I/O thread's loop body (spec §4.6 steps 2-7), wrapped in
/// a self-accounting "profile_io" span with a nested "process" span so the
/// profiler's own overhead shows up in its output, exactly as an ordinary
/// producer thread's spans would.
fn drain_once(ctx: &Context, sink: &mut Option<Sink>, sysinfo_counter: &mut u32) {
    if ctx.root.is_empty() {
        return;
    }
    let _ = tree::begin_block(ctx, b"profile_io");
    let _ = tree::begin_block(ctx, b"process");

    drain_bare(ctx, sink);

    *sysinfo_counter += 1;
    if *sysinfo_counter > SYSINFO_EVERY - 1 {
        *sysinfo_counter = 0;
        let mut rec = Record::zeroed();
        rec.payload.id = crate::record::ID_SYSTEMINFO;
        rec.payload.start = ctx.clock.ticks_per_second();
        rec.payload.set_name(b"sysinfo");
        emit(sink, &rec);
    }

    tree::end_block(ctx); // process
    tree::end_block(ctx); // profile_io
}

/// The depth-first reparenting walk of spec §4.6.1: emits `block`, then
/// recursively flattens its children and siblings into a single
/// `child`-linked chain, returning the slot that ends up at the tail of
/// that chain (the "leaf" `Pool::release` needs).
fn process_subtree(ctx: &Context, sink: &mut Option<Sink>, block: u32) -> u32 {
    let (child, sibling) = unsafe {
        let rec = &*ctx.pool.get(block);
        (rec.child as u32, rec.sibling as u32)
    };
    emit_slot(ctx, sink, block);

    if child != 0 {
        let leaf_child = process_subtree(ctx, sink, child);
        if sibling != 0 {
            unsafe { (*ctx.pool.get(block)).sibling = 0 };
            let leaf_sibling = process_subtree(ctx, sink, sibling);
            unsafe {
                (*ctx.pool.get(leaf_sibling)).child = child as u16;
                (*ctx.pool.get(block)).child = sibling as u16;
            }
        }
        leaf_child
    } else if sibling != 0 {
        unsafe { (*ctx.pool.get(block)).sibling = 0 };
        let leaf_sibling = process_subtree(ctx, sink, sibling);
        unsafe { (*ctx.pool.get(block)).child = sibling as u16 };
        leaf_sibling
    } else {
        block
    }
}

fn emit_slot(ctx: &Context, sink: &mut Option<Sink>, slot: u32) {
    let bytes = unsafe { (*ctx.pool.get(slot)).to_wire_bytes() };
    if let Some(s) = sink {
        s(&bytes);
    }
}

fn emit(sink: &mut Option<Sink>, rec: &Record) {
    let bytes = rec.to_wire_bytes();
    if let Some(s) = sink {
        s(&bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::pool::Pool;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    struct FakeClock(AtomicI64);
    impl Clock for FakeClock {
        fn now_ticks(&self) -> i64 {
            self.0.fetch_add(1, Ordering::Relaxed)
        }
        fn ticks_per_second(&self) -> i64 {
            1_000_000_000
        }
    }

    fn ctx(slots: usize) -> Context {
        Context::new(Pool::new(slots * 64), Box::new(FakeClock(AtomicI64::new(0))))
    }

    #[test]
    fn two_nested_spans_drain_in_depth_first_order() {
        let ctx = ctx(16);
        let root = tree::begin_block(&ctx, b"root").unwrap();
        let child = tree::begin_block(&ctx, b"child").unwrap();
        tree::end_block(&ctx); // close child
        tree::end_block(&ctx); // close root, publish

        let root_id = unsafe { (*ctx.pool.get(root)).payload.id };
        let child_id = unsafe { (*ctx.pool.get(child)).payload.id };

        let seen: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let mut sink: Option<Sink> = Some(Box::new(move |bytes: &[u8; 64]| {
            let id = i32::from_ne_bytes(bytes[0..4].try_into().unwrap());
            seen_clone.lock().unwrap().push(id);
        }));
        let mut counter = 0u32;
        drain_once(&ctx, &mut sink, &mut counter);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen, vec![root_id, child_id]);
        assert!(ctx.root.is_empty());
        let (free_count, clean) = ctx.pool.free_list_census();
        assert_eq!(free_count, ctx.pool.usable_capacity());
        assert!(clean);
    }

    #[test]
    fn sysinfo_record_emitted_every_eleventh_drain() {
        let ctx = ctx(8);
        let ids: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let ids_clone = ids.clone();
        let mut sink: Option<Sink> = Some(Box::new(move |bytes: &[u8; 64]| {
            ids_clone
                .lock()
                .unwrap()
                .push(i32::from_ne_bytes(bytes[0..4].try_into().unwrap()));
        }));
        let mut counter = 0u32;
        // force ten empty-root passes by calling drain_once directly after
        // seeding one root each time, and confirm the 11th carries a
        // sysinfo record.
        for _ in 0..10 {
            let r = tree::begin_block(&ctx, b"x").unwrap();
            tree::end_block(&ctx);
            let _ = r;
            drain_once(&ctx, &mut sink, &mut counter);
        }
        ids.lock().unwrap().clear();
        let r = tree::begin_block(&ctx, b"x").unwrap();
        tree::end_block(&ctx);
        let _ = r;
        drain_once(&ctx, &mut sink, &mut counter);
        assert!(ids.lock().unwrap().contains(&crate::record::ID_SYSTEMINFO));
    }

    #[test]
    fn shutdown_emits_a_terminator_record() {
        let ctx = Arc::new(ctx(8));
        let ids: Arc<Mutex<Vec<i32>>> = Arc::new(Mutex::new(Vec::new()));
        let ids_clone = ids.clone();
        let sink: Option<Sink> = Some(Box::new(move |bytes: &[u8; 64]| {
            ids_clone
                .lock()
                .unwrap()
                .push(i32::from_ne_bytes(bytes[0..4].try_into().unwrap()));
        }));
        let worker = IoThread::spawn(ctx, sink, Duration::from_millis(1));
        worker.join();
        assert_eq!(*ids.lock().unwrap().last().unwrap(), crate::record::ID_ENDOFSTREAM);
    }
}
