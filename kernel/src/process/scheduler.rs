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

//! The scheduler picks a `Runnable` process from the process table and resumes it on the current
//! CPU, using the kernel-thread context switch primitive [`swtch`].
//!
//! This build targets a single core (`NCPU = 1`): there is exactly one [`Cpu`] descriptor, no
//! SMP bring-up and no per-CPU affinity. Multi-core support, along with any form of priority
//! scheduling, is out of scope; every `Runnable` process is treated equally and the scheduler
//! simply round-robins the process table looking for one to run.

use crate::{
	arch::x86,
	arch::x86::gdt::Gdt,
	memory::vm,
	process,
	process::{Pid, Proc, State, NPROC},
	sync::spin::{IntSpinGuard, Spin},
};
use core::{cell::UnsafeCell, ptr};
use utils::limits::PAGE_SIZE;

/// Saved, callee-saved kernel thread state for [`swtch`].
///
/// Field order matters: it is exactly the layout `swtch` (`arch/x86/src/swtch.s`) pushes to the
/// stack, so that the stack pointer at the point of a context switch doubles as a `*mut Context`.
#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct Context {
	edi: u32,
	esi: u32,
	ebx: u32,
	ebp: u32,
	/// Where execution resumes when this context is switched back in.
	eip: u32,
}

impl Context {
	/// Returns a zeroed context that resumes at `entry` when first switched to.
	pub const fn starting_at(entry: extern "C" fn()) -> Self {
		Self {
			edi: 0,
			esi: 0,
			ebx: 0,
			ebp: 0,
			eip: entry as usize as u32,
		}
	}
}

unsafe extern "C" {
	/// Saves the current callee-saved registers and the live stack pointer at `*old` (turning
	/// `*old` into a pointer at the just-built [`Context`]), then loads `new` into `%esp`, pops a
	/// [`Context`] off it and `ret`s into its `eip`.
	///
	/// Deliberately takes `old` one level of indirection deeper than `new`: `new` is already a
	/// `Context` pointer (built once, on a real stack, by [`Context::starting_at`] or a prior
	/// `swtch`), while `old` is the address of the pointer-sized slot (a `Cpu::scheduler` or
	/// `Proc::context` field) that should receive the continuation point being left behind.
	///
	/// # Safety
	///
	/// `new` must point to a `Context` sitting atop a live kernel stack (its `eip` followed
	/// immediately, in memory, by whatever that stack should resume executing), and `old` must be
	/// valid to write a pointer to.
	fn swtch(old: *mut *mut Context, new: *mut Context);
}

/// Per-CPU state. This build has a single instance, reflecting `NCPU = 1`.
pub struct Cpu {
	/// This CPU's GDT, including its private TSS and TLS entries.
	pub gdt: Gdt,
	/// Where the scheduler loop's own continuation point is stashed while a process runs.
	///
	/// Null until the first `swtch` out of [`scheduler`] fills it in with a pointer to a
	/// [`Context`] sitting on the scheduler loop's own stack.
	scheduler: UnsafeCell<*mut Context>,
	/// The process currently running on this CPU, if any.
	current: UnsafeCell<*mut Proc>,
}

// SAFETY: there is only one CPU; every access to the interior-mutable fields happens with
// interrupts disabled (inside a process table critical section), which on a single core rules
// out concurrent access from another context of execution.
unsafe impl Sync for Cpu {}

impl Cpu {
	const fn new() -> Self {
		Self {
			gdt: Gdt::new(),
			scheduler: UnsafeCell::new(ptr::null_mut()),
			current: UnsafeCell::new(ptr::null_mut()),
		}
	}
}

/// The sole CPU descriptor.
static CPU: Cpu = Cpu::new();

/// Returns this CPU's descriptor.
///
/// With `NCPU = 1` there is nothing to index by APIC ID: this always returns the same instance.
pub fn per_cpu() -> &'static Cpu {
	&CPU
}

/// Returns the process currently running on this CPU, if any.
pub fn current() -> Option<*mut Proc> {
	// SAFETY: reads of `current` only ever race with a write from the same CPU, and since this
	// build is single-core that can only happen across an interrupt; callers that care about a
	// stable answer across a trap read this with interrupts disabled (true of all the process
	// table critical sections that call into this module).
	let cur = unsafe { *CPU.current.get() };
	(!cur.is_null()).then_some(cur)
}

fn set_current(proc: *mut Proc) {
	unsafe {
		*CPU.current.get() = proc;
	}
}

/// Test-only hook that makes `proc` appear as "the process running on this CPU", without going
/// through an actual `swtch` dispatch.
///
/// Exists because `fork`/`wait`/`grow_proc` all gate on [`current`]; tests that want to exercise
/// their process-table bookkeeping directly (rather than driving a real scheduler loop) use this
/// to stand in for dispatch. Pass a null pointer to clear it again.
#[cfg(test)]
pub(crate) fn set_current_for_test(proc: *mut Proc) {
	set_current(proc);
}

/// Returns the PID of the process currently running on this CPU, or `0` if none (used by the
/// `strace` tracing feature and by the `getpid` syscall).
pub fn current_pid() -> Pid {
	unsafe { current().map(|p| (*p).pid).unwrap_or(0) }
}

/// The scheduler loop: runs forever on this CPU, repeatedly picking a `Runnable` process and
/// switching into it.
///
/// Never returns. Must be entered with no locks held.
pub fn scheduler() -> ! {
	loop {
		x86::sti();
		let guard = process::PROC_TABLE.lock();
		let (table, int_state) = guard.leak();
		// SAFETY: the lock above is held (leaked, not dropped) for the whole scan, matching the
		// process table's locking discipline.
		for proc in unsafe { (*table).iter_mut() } {
			if proc.state != State::Runnable {
				continue;
			}
			set_current(proc as *mut Proc);
			proc.state = State::Running;
			let dir = proc.pgdir.expect("scheduler: runnable process has no address space");
			let kstack_top = proc.kstack.expect("scheduler: runnable process has no kernel stack") + PAGE_SIZE;
			// SAFETY: `proc` is `Running`, and its context/kernel stack were set up either by
			// `alloc_proc` (first run, resuming at `fork_ret`) or by a previous `sched()` call.
			unsafe {
				vm::switch_uvm(kstack_top, process::pgdir_phys(dir));
				swtch(CPU.scheduler.get(), proc.context);
			}
			set_current(ptr::null_mut());
		}
		// SAFETY: matches the `lock()` above; `fork_ret` may already have released this lock on
		// behalf of a process that never returned through `sched()` during this pass, in which
		// case this is a harmless unlock-of-unlocked (single core: nothing else could have taken
		// the lock in between without also being the one pass currently executing).
		unsafe {
			process::PROC_TABLE.unlock(int_state);
		}
	}
}

/// Switches from the currently running process back to the scheduler loop.
///
/// The caller must hold the process table lock (possibly leaked across this call, as the
/// scheduler loop itself does) and the current process must not be `Running` (it is expected to
/// have just transitioned to `Sleeping`, `Runnable` or `Zombie`).
///
/// # Safety
///
/// Must only be called from a context running as a process (i.e. [`current`] is `Some`), with
/// interrupts disabled.
pub unsafe fn sched() {
	let proc = unsafe { current().expect("sched: no current process") };
	unsafe {
		assert_ne!(
			(*proc).state,
			State::Running,
			"sched: process is still marked running"
		);
	}
	assert!(
		!x86::is_interrupt_enabled(),
		"sched: interrupts are enabled"
	);
	unsafe {
		swtch(&mut (*proc).context, *CPU.scheduler.get());
	}
}

/// Voluntarily gives up the CPU for one scheduling round.
pub fn yield_() {
	let guard = process::PROC_TABLE.lock();
	let (_table, int_state) = guard.leak();
	let proc = unsafe { current().expect("yield_: no current process") };
	unsafe {
		(*proc).state = State::Runnable;
		sched();
	}
	unsafe {
		process::PROC_TABLE.unlock(int_state);
	}
}

/// Puts the currently running process to sleep on channel `chan`, assuming the process table
/// lock is already held by the caller (and continues to be held on return).
///
/// For waits whose condition lives in the process table itself (a parent waiting on a child's
/// state in [`process::wait`]); other callers should go through [`sleep`] instead.
///
/// # Safety
///
/// The process table lock must already be held (e.g. leaked across this call).
pub unsafe fn sleep_table_locked(chan: usize) {
	let proc = unsafe { current().expect("sleep: no current process") };
	unsafe {
		(*proc).chan = chan;
		(*proc).state = State::Sleeping;
		sched();
		(*proc).chan = 0;
	}
}

/// Puts the currently running process to sleep on channel `chan`, atomically releasing the
/// resource lock `guard` while it sleeps and reacquiring an equivalent lock before returning.
///
/// `chan` is an opaque address: any two unrelated pieces of kernel state must use distinct
/// values so unrelated sleepers are not spuriously woken by each other's [`wakeup`]. Passing the
/// address of the resource being waited on (a buffer, a log, a disk request slot) is the usual
/// convention.
///
/// The caller must re-check its wait condition in a loop after `sleep` returns: per the
/// concurrency model this preserves, a sleeper can wake up without its condition having become
/// true (another process may have consumed what it was waiting for first).
pub fn sleep<'m, T>(chan: usize, guard: IntSpinGuard<'m, T>) -> IntSpinGuard<'m, T> {
	// Acquire the process table lock before releasing `guard`, so no wakeup between checking the
	// condition and registering as a sleeper can be missed.
	let table_guard = process::PROC_TABLE.lock();
	let (_table, int_state) = table_guard.leak();
	let resource_lock = guard.release();
	unsafe {
		sleep_table_locked(chan);
	}
	unsafe {
		process::PROC_TABLE.unlock(int_state);
	}
	resource_lock.lock()
}

/// Wakes every process sleeping on channel `chan`, moving it from `Sleeping` to `Runnable`.
///
/// A no-op if nothing is sleeping on `chan`.
pub fn wakeup(chan: usize) {
	let mut table = process::PROC_TABLE.lock();
	for proc in table.iter_mut() {
		if proc.state == State::Sleeping && proc.chan == chan {
			proc.state = State::Runnable;
		}
	}
}

/// Entry point for a process's very first turn on the CPU.
///
/// Reached via `swtch`'s `ret` the first time a freshly-forked (or the very first, `init`)
/// process is scheduled: see [`Context::starting_at`] and `arch/x86/src/trap.s`'s `trapret`
/// label, which this function falls through to once it returns. Releases the process table lock
/// acquired (and leaked) by [`scheduler`] before this process's context was switched into: for
/// every other process, that release instead happens at the bottom of the scheduler's scan, once
/// it returns through [`sched`].
pub extern "C" fn fork_ret() {
	static FIRST: core::sync::atomic::AtomicBool = core::sync::atomic::AtomicBool::new(true);
	// SAFETY: reached exactly once per process's first scheduling, with the table lock held by
	// the scheduler's leaked guard.
	unsafe {
		process::PROC_TABLE.unlock(true);
	}
	if FIRST.swap(false, core::sync::atomic::Ordering::AcqRel) {
		process::run_first_process_init();
	}
}

/// Returns a raw pointer to the scheduler's lock over the process table, for use by
/// [`Spin::lock`]/[`Spin::unlock`] pairs that must cross a context switch.
pub fn table_lock() -> &'static Spin<[Proc; NPROC], false> {
	&process::PROC_TABLE
}
