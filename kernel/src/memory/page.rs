/*
 * Copyright 2024 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! The physical page allocator.
//!
//! Frames are handed out and reclaimed in units of [`PAGE_SIZE`]. The free list is threaded
//! through the frames themselves: a free frame's first machine word holds the address of the
//! next free frame (or null), so the allocator needs no side table.
//!
//! Boot is two-phase, mirroring the fact that only the first 4 MiB of physical memory are mapped
//! by the boot page directory before [`crate::memory::vm::setup_kvm`] runs:
//! - Phase 1 ([`init`]) seeds the free list directly, without taking the lock, for the range the
//!   boot mapping already covers.
//! - Phase 2 ([`enable_lock`] followed by [`free_range`]) adds the rest of physical memory once
//!   the kernel's own page tables are live and ordinary kernel-virtual addressing works for all
//!   of memory up to [`PHYSTOP`].

use crate::{memory::VirtAddr, sync::spin::IntSpin};
use core::{
	ptr,
	sync::atomic::{AtomicBool, Ordering},
};
use utils::limits::PAGE_SIZE;

/// The highest physical address managed by the allocator.
///
/// Physical memory at or above this address is never added to the free list: this keeps the
/// kernel's direct-mapped view of memory (`[KERNEL_BEGIN, KERNEL_BEGIN + PHYSTOP)`) inside the
/// 1 GiB kernelspace window used by this 32-bit target.
pub const PHYSTOP: usize = 224 * 1024 * 1024;

/// A free frame, as interpreted while it sits on the free list.
///
/// Only the first word is meaningful; the rest of the frame is left untouched until handed out
/// by [`alloc_page`].
#[repr(C)]
struct Run {
	next: *mut Run,
}

/// Allocator state.
struct State {
	/// Head of the free list, or null if empty.
	freelist: *mut Run,
}

// SAFETY: `State` is only ever reached through `FREE_LIST`, which serialises access with a lock
// once phase 2 begins; phase 1 runs before any other CPU/thread can observe the allocator.
unsafe impl Send for State {}

/// Whether phase 2 of boot has begun.
///
/// During phase 1, a single thread of control owns the allocator outright: interrupts are
/// disabled and no other CPU exists. [`with_list`] skips the spinlock entirely while this is
/// false, since [`enable_lock`] itself is the only thing allowed to run concurrently with it, and
/// it never touches the free list.
static USE_LOCK: AtomicBool = AtomicBool::new(false);

/// The free list, behind the allocator's spinlock.
static FREE_LIST: IntSpin<State> = IntSpin::new(State {
	freelist: ptr::null_mut(),
});

/// Runs the given closure against the free list, locking it only once phase 2 has begun.
///
/// During phase 1, [`USE_LOCK`] is still false: a single thread of control owns the allocator
/// outright, so taking the lock would be redundant (and, before the kernel's own page tables are
/// live, `FREE_LIST` has not necessarily been touched through the locked path even once).
fn with_list<R>(f: impl FnOnce(&mut State) -> R) -> R {
	if USE_LOCK.load(Ordering::Acquire) {
		let mut guard = FREE_LIST.lock();
		f(&mut guard)
	} else {
		// SAFETY: phase 1 runs with a single thread of control and interrupts disabled, so no
		// other context of execution can observe or mutate the free list concurrently.
		let state = unsafe { FREE_LIST.get_mut_unchecked() };
		f(state)
	}
}

/// Poison byte written into a frame just before it is linked onto the free list.
///
/// A read of stale, freed memory that still holds this pattern is a strong signal of
/// use-after-free.
const POISON: u8 = 0xa5;

/// Links the frame at kernel-virtual address `va` onto the free list.
///
/// # Panics
///
/// Panics if `va` is not page-aligned, lies below the kernel image's end (`memory::kernel_end`),
/// or has a physical address at or above [`PHYSTOP`].
fn free_one(va: VirtAddr) {
	assert!(
		va.is_aligned_to(PAGE_SIZE),
		"free_page: address is not page-aligned"
	);
	assert!(
		va >= crate::memory::kernel_end(),
		"free_page: address below kernel end"
	);
	let pa = va
		.kernel_to_physical()
		.expect("free_page: address not in kernel space");
	assert!(pa.0 < PHYSTOP, "free_page: address at or above PHYSTOP");
	// SAFETY: the caller guarantees unique ownership of the frame being freed.
	unsafe {
		ptr::write_bytes(va.as_ptr::<u8>(), POISON, PAGE_SIZE);
	}
	let run = va.as_ptr::<Run>();
	with_list(|state| {
		// SAFETY: `run` points to a full, owned frame.
		unsafe {
			(*run).next = state.freelist;
		}
		state.freelist = run;
	});
}

/// Phase 1 of boot: seeds the free list over `[start, end)`, without locking.
///
/// `start` and `end` are kernel-virtual addresses; both are rounded to page boundaries. Must be
/// called exactly once, before [`enable_lock`], while interrupts are disabled and no other
/// thread of control exists.
pub fn init(start: VirtAddr, end: VirtAddr) {
	free_range(start, end);
}

/// Phase 2 of boot: switches the allocator to taking its spinlock.
///
/// Must be called after the kernel's own page tables (which map all of physical memory up to
/// [`PHYSTOP`]) are installed, and before [`free_range`] is used to add the remainder of memory.
pub fn enable_lock() {
	USE_LOCK.store(true, Ordering::Release);
}

/// Adds every page-aligned frame in `[start, end)` to the free list.
///
/// `start` is rounded up and `end` is rounded down to page boundaries; a partial frame at either
/// end is left unclaimed.
pub fn free_range(start: VirtAddr, end: VirtAddr) {
	let mut addr = start.align_to(PAGE_SIZE);
	while addr + PAGE_SIZE <= end {
		free_one(addr);
		addr = addr + PAGE_SIZE;
	}
}

/// Allocates one 4 KiB frame and returns its kernel-virtual address, or `None` if the allocator
/// is exhausted.
///
/// The returned frame's contents are unspecified (they still hold the poison pattern written on
/// free, or uninitialised boot memory for frames never freed).
pub fn alloc_page() -> Option<VirtAddr> {
	with_list(|state| {
		let run = state.freelist;
		if run.is_null() {
			return None;
		}
		// SAFETY: `run` came off the free list, so it points to an owned, unused frame.
		state.freelist = unsafe { (*run).next };
		Some(VirtAddr::from(run))
	})
}

/// Returns a frame previously obtained from [`alloc_page`] (or added by [`free_range`]) to the
/// free list.
///
/// # Panics
///
/// Panics if `va` is not page-aligned, lies below the kernel image's end (`memory::kernel_end`),
/// or has a physical address at or above [`PHYSTOP`] — per contract, only frames within the
/// kernel's direct-mapped physical view may be passed here.
pub fn free_page(va: VirtAddr) {
	free_one(va);
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn alloc_free_roundtrip() {
		let a = alloc_page().expect("allocator exhausted in test");
		let b = alloc_page().expect("allocator exhausted in test");
		assert_ne!(a, b);
		free_page(a);
		free_page(b);
		// The two frames just freed must be available again (LIFO, so in reverse order).
		let c = alloc_page().expect("allocator exhausted in test");
		let d = alloc_page().expect("allocator exhausted in test");
		assert!((c == a && d == b) || (c == b && d == a));
		free_page(c);
		free_page(d);
	}
}
