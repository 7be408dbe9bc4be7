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

//! The 64-byte record: a 58-byte wire payload plus 6 bytes of in-memory
//! link fields that are never emitted to the sink.

use core::mem;

/// Bytes of the fixed-width `name` field.
pub const NAME_LEN: usize = 26;

/// End-of-stream terminator, written once on `finalize`.
pub const ID_ENDOFSTREAM: i32 = 0;
/// Synthetic system-info record emitted every 11th drain iteration.
pub const ID_SYSTEMINFO: i32 = 1;
/// `profile_log`.
pub const ID_LOGMESSAGE: i32 = 2;
pub const ID_LOGCONTINUE: i32 = 3;
/// `profile_end_frame`.
pub const ID_ENDFRAME: i32 = 4;
pub const ID_TRYLOCK: i32 = 5;
pub const ID_TRYLOCKCONTINUE: i32 = 6;
pub const ID_LOCK: i32 = 7;
pub const ID_LOCKCONTINUE: i32 = 8;
pub const ID_UNLOCK: i32 = 9;
pub const ID_UNLOCKCONTINUE: i32 = 10;
pub const ID_WAIT: i32 = 11;
pub const ID_SIGNAL: i32 = 12;

/// User-assigned span ids are drawn from this floor upward.
pub const FIRST_USER_ID: i32 = 128;

/// The 58-byte wire payload. `repr(C, packed)` so the layout matches the
/// spec exactly regardless of target: no inter-field or trailing padding.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct BlockData {
    pub id: i32,
    pub parent_id: i32,
    pub processor: u32,
    pub thread: u32,
    pub start: i64,
    pub end: i64,
    pub name: [u8; NAME_LEN],
}

const _: () = assert!(mem::size_of::<BlockData>() == 58, "BlockData must be 58 bytes");

// A manual impl, not `#[derive(Debug)]`: the derived impl would borrow each
// field by reference, which is unsound on a packed struct whose multi-byte
// fields aren't guaranteed aligned. Copying each field out by value first
// sidesteps that.
impl core::fmt::Debug for BlockData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let (id, parent_id, processor, thread, start, end) =
            (self.id, self.parent_id, self.processor, self.thread, self.start, self.end);
        f.debug_struct("BlockData")
            .field("id", &id)
            .field("parent_id", &parent_id)
            .field("processor", &processor)
            .field("thread", &thread)
            .field("start", &start)
            .field("end", &end)
            .field("name", &self.name)
            .finish()
    }
}

impl BlockData {
    pub const fn zeroed() -> Self {
        Self {
            id: 0,
            parent_id: 0,
            processor: 0,
            thread: 0,
            start: 0,
            end: 0,
            name: [0u8; NAME_LEN],
        }
    }

    /// Copies up to `NAME_LEN` bytes of `s` into `name`, NUL-padding the
    /// remainder. Not required to be NUL-terminated when `s` fills the
    /// whole field, per spec.
    pub fn set_name(&mut self, s: &[u8]) {
        let n = s.len().min(NAME_LEN);
        let mut buf = [0u8; NAME_LEN];
        buf[..n].copy_from_slice(&s[..n]);
        self.name = buf;
    }
}

/// The full 64-byte record: payload plus the in-memory link fields used to
/// thread the free list, the per-thread open tree, and the root list.
/// `previous`/`sibling`/`child` are overwritten by the reparenting walk
/// before the record is emitted and must be treated as undefined by
/// consumers past offset 58.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct Record {
    pub payload: BlockData,
    pub previous: u16,
    pub sibling: u16,
    pub child: u16,
}

const _: () = assert!(mem::size_of::<Record>() == 64, "Record must be 64 bytes");
const _: () = assert!(mem::offset_of!(Record, payload) == 0, "payload must start at offset 0");

impl Record {
    pub const fn zeroed() -> Self {
        Self {
            payload: BlockData::zeroed(),
            previous: 0,
            sibling: 0,
            child: 0,
        }
    }

    /// Zeroes every field, including the link fields. Called by the
    /// allocator on every `allocate()` so a recycled slot never leaks data
    /// from its previous occupant.
    pub fn reset(&mut self) {
        *self = Self::zeroed();
    }

    /// Copies out the 64-byte wire representation. Always used in favor of
    /// transmuting a reference, since `payload` is packed and the compiler
    /// cannot guarantee the alignment a `&[u8; 64]` reference would need.
    pub fn to_wire_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        unsafe {
            core::ptr::copy_nonoverlapping(
                self as *const Record as *const u8,
                out.as_mut_ptr(),
                64,
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_offsets() {
        assert_eq!(mem::size_of::<BlockData>(), 58);
        assert_eq!(mem::size_of::<Record>(), 64);
        assert_eq!(mem::offset_of!(Record, payload), 0);
    }

    #[test]
    fn set_name_pads_with_nul() {
        let mut b = BlockData::zeroed();
        b.set_name(b"root");
        assert_eq!(&b.name[..4], b"root");
        assert!(b.name[4..].iter().all(|&x| x == 0));
    }

    #[test]
    fn set_name_truncates_and_need_not_terminate() {
        let mut b = BlockData::zeroed();
        let long = [b'A'; 40];
        b.set_name(&long);
        assert_eq!(b.name, [b'A'; NAME_LEN]);
    }

    #[test]
    fn wire_bytes_round_trip_payload() {
        let mut r = Record::zeroed();
        r.payload.id = 42;
        r.payload.set_name(b"hello");
        r.previous = 7;
        let bytes = r.to_wire_bytes();
        assert_eq!(bytes.len(), 64);
        assert_eq!(i32::from_ne_bytes(bytes[0..4].try_into().unwrap()), 42);
    }
}
