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

//! The process table: a fixed-size array of process slots, guarded by one spinlock, and the
//! operations (`fork`, `exit`, `wait`, `kill`, `grow_proc`) that mutate it.
//!
//! There is no inode, directory or open-file layer in this build (the filesystem surface stops
//! at the buffer cache and the log): a process slot therefore carries no current-directory handle
//! or open-file table, unlike a general-purpose Unix. Every other part of the process data model
//! is present.

pub mod scheduler;

use crate::{
	arch::x86::{idt::IntFrame, paging::Table},
	fs,
	memory::{page, vm, PhysAddr, VirtAddr},
	sync::spin::Spin,
};
use core::{
	mem::size_of,
	ptr,
	ptr::NonNull,
	sync::atomic::{AtomicI32, Ordering},
};
use utils::{
	errno::{EResult, Errno},
	limits::PAGE_SIZE,
};

/// A process identifier.
pub type Pid = i32;

/// The number of process slots.
pub const NPROC: usize = 64;

/// The pid of the very first process, to which orphaned children are re-parented.
pub const INIT_PID: Pid = 1;

/// The placeholder first user program: an infinite self-jump.
///
/// There is no loader and no userspace program image in this build; `user_init` needs only
/// *some* code to schedule so the rest of the process machinery (context switch, trap return,
/// preemption) can be exercised end to end.
const INITCODE: [u8; 2] = [0xeb, 0xfe];

/// A process's lifecycle state.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum State {
	/// The slot holds no process; every resource handle is `None`.
	#[default]
	Unused,
	/// [`alloc_proc`] has reserved the slot but setup is not complete.
	Embryo,
	/// Blocked, waiting for a [`scheduler::wakeup`] on `chan`.
	Sleeping,
	/// Eligible to be dispatched by the scheduler.
	Runnable,
	/// Currently executing on the (sole) CPU.
	Running,
	/// Exited; waiting to be reaped by [`wait`].
	Zombie,
}

/// A process-table slot.
///
/// Fields are meaningless (and left at their default) while `state == Unused`; conversely, a slot
/// is `Unused` exactly when `pgdir` and `kstack` are both `None`.
#[derive(Clone, Copy)]
pub struct Proc {
	/// Lifecycle state.
	pub state: State,
	/// Process identifier. Meaningless while `Unused`.
	pub pid: Pid,
	/// Set by [`kill`]; observed and acted on at the next trap return to user mode.
	pub killed: bool,
	/// Size, in bytes, of the user address space.
	pub sz: usize,
	/// The process's page directory.
	pub pgdir: Option<NonNull<Table>>,
	/// Base of the one-frame kernel stack.
	pub kstack: Option<VirtAddr>,
	/// Saved kernel-thread context, used by [`scheduler::sched`]/[`scheduler::scheduler`].
	///
	/// Points into this process's own kernel stack; null while `Unused`.
	pub context: *mut scheduler::Context,
	/// Pointer to the trap frame at the top of the kernel stack.
	pub trapframe: Option<NonNull<IntFrame>>,
	/// The channel this process is sleeping on, meaningful only while `Sleeping`.
	pub chan: usize,
	/// Parent's pid, or `None` for the initial process.
	pub parent: Option<Pid>,
	/// A short, nul-padded name, for diagnostics only.
	pub name: [u8; 16],
	/// The interval, in ticks, set by the `alarm` syscall; `0` if no alarm is armed.
	pub alarm_interval: u32,
	/// The userspace address to redirect execution to once the alarm fires.
	pub alarm_handler: usize,
	/// Ticks remaining before the alarm fires next.
	pub alarm_remaining: u32,
	/// Set once the alarm has redirected this process's trap frame to `alarm_handler`.
	///
	/// There is no `sigreturn` in this build's syscall surface, so an alarm fires at most once:
	/// nothing ever restores the trap frame the redirection overwrote.
	pub alarm_fired: bool,
}

impl Proc {
	/// Returns an `Unused` slot.
	const fn unused() -> Self {
		Self {
			state: State::Unused,
			pid: 0,
			killed: false,
			sz: 0,
			pgdir: None,
			kstack: None,
			context: ptr::null_mut(),
			trapframe: None,
			chan: 0,
			parent: None,
			name: [0; 16],
			alarm_interval: 0,
			alarm_handler: 0,
			alarm_remaining: 0,
			alarm_fired: false,
		}
	}
}

/// The process table, guarded by a single interrupt-disabling spinlock.
///
/// Every state mutation, and every `sleep`/`wakeup` pair, holds this lock.
pub static PROC_TABLE: Spin<[Proc; NPROC], false> = Spin::new([Proc::unused(); NPROC]);

/// The next pid to hand out. Pid `0` is never assigned; the first process allocated gets
/// [`INIT_PID`].
static NEXT_PID: AtomicI32 = AtomicI32::new(1);

fn next_pid() -> Pid {
	NEXT_PID.fetch_add(1, Ordering::Relaxed)
}

/// Releases every resource owned by `proc` and resets it to `Unused`.
///
/// Used both by [`wait`] reaping a zombie child and by [`fork`] unwinding a failed attempt.
fn reset_to_unused(proc: &mut Proc) {
	if let Some(kstack) = proc.kstack.take() {
		page::free_page(kstack);
	}
	if let Some(dir) = proc.pgdir.take() {
		vm::free_vm(dir);
	}
	proc.context = ptr::null_mut();
	proc.trapframe = None;
	proc.sz = 0;
	proc.pid = 0;
	proc.killed = false;
	proc.parent = None;
	proc.chan = 0;
	proc.alarm_interval = 0;
	proc.alarm_handler = 0;
	proc.alarm_remaining = 0;
	proc.alarm_fired = false;
	proc.state = State::Unused;
}

/// Sets every `Sleeping` process whose channel is `chan` to `Runnable`.
///
/// Identical to [`scheduler::wakeup`], but operating on a table the caller already holds the lock
/// for (used by [`exit`], which cannot call back into [`scheduler::wakeup`] without deadlocking
/// against its own held lock).
unsafe fn wakeup_locked(table: *mut [Proc; NPROC], chan: usize) {
	let table = unsafe { &mut *table };
	for p in table.iter_mut() {
		if p.state == State::Sleeping && p.chan == chan {
			p.state = State::Runnable;
		}
	}
}

/// Returns the address of the slot holding `pid`, if any non-`Unused` slot does.
unsafe fn proc_addr_by_pid(table: *mut [Proc; NPROC], pid: Pid) -> Option<usize> {
	let table = unsafe { &mut *table };
	table
		.iter_mut()
		.find(|p| p.state != State::Unused && p.pid == pid)
		.map(|p| p as *mut Proc as usize)
}

unsafe extern "C" {
	/// The trap-return assembly stub (`arch/x86/src/trap.s`), reached as the "return address"
	/// below a freshly built kernel stack, and directly by the scheduler on a process's very
	/// first run, once [`scheduler::fork_ret`] returns.
	fn trapret();
}

/// Returns the physical address of `dir`, for loading into `cr3`.
pub(crate) fn pgdir_phys(dir: NonNull<Table>) -> PhysAddr {
	VirtAddr::from(dir)
		.kernel_to_physical()
		.expect("process page directory is not kernel-mapped")
}

/// Finds an `Unused` slot, marks it `Embryo`, assigns it a pid, and lays out a fresh kernel stack
/// so that its first scheduling resumes at [`scheduler::fork_ret`] and falls through to
/// `trapret`.
///
/// The stack, from high to low address: the [`IntFrame`] trap frame, one `usize` holding
/// `trapret`'s address, then a [`scheduler::Context`] whose `eip` is `fork_ret`. `swtch`'s `ret`
/// lands in `fork_ret`; `fork_ret`'s own epilogue `ret` then pops the `trapret` address and jumps
/// there, falling through into the trap-return path without ever being called.
///
/// Returns `None` if there is no free slot or the kernel-stack frame cannot be allocated, in
/// which case the slot is reverted to `Unused`.
fn alloc_proc() -> Option<NonNull<Proc>> {
	let mut table = PROC_TABLE.lock();
	let proc = table.iter_mut().find(|p| p.state == State::Unused)?;
	proc.state = State::Embryo;
	proc.pid = next_pid();
	let Some(kstack) = page::alloc_page() else {
		proc.state = State::Unused;
		proc.pid = 0;
		return None;
	};
	proc.kstack = Some(kstack);
	let mut sp = kstack + PAGE_SIZE;
	sp = sp - size_of::<IntFrame>();
	let trapframe = sp;
	proc.trapframe = NonNull::new(trapframe.as_ptr::<IntFrame>());
	sp = sp - size_of::<usize>();
	// SAFETY: `sp` is within the freshly allocated, exclusively owned kernel stack.
	unsafe {
		*sp.as_ptr::<usize>() = trapret as usize;
	}
	sp = sp - size_of::<scheduler::Context>();
	let ctx_ptr = sp.as_ptr::<scheduler::Context>();
	// SAFETY: `ctx_ptr` sits within the same freshly allocated stack, correctly aligned since
	// every slot laid out above is machine-word sized, and not yet observed by anyone else.
	unsafe {
		ptr::write(ctx_ptr, scheduler::Context::starting_at(scheduler::fork_ret));
	}
	proc.context = ctx_ptr;
	NonNull::new(proc as *mut Proc)
}

fn find_proc_mut(table: &mut [Proc; NPROC], pid: Pid) -> Option<&mut Proc> {
	table.iter_mut().find(|p| p.state != State::Unused && p.pid == pid)
}

/// Creates the very first process from the embedded [`INITCODE`] image and marks it `Runnable`.
///
/// Called exactly once, from the boot sequence, before the scheduler loop starts.
pub fn user_init() {
	let mut proc = alloc_proc().expect("user_init: out of memory");
	// SAFETY: `proc` was just allocated; nothing else can reach it yet.
	let proc = unsafe { proc.as_mut() };
	let dir = vm::setup_kvm().expect("user_init: out of memory");
	proc.pgdir = Some(dir);
	vm::init_uvm(dir, &INITCODE).expect("user_init: out of memory");
	proc.sz = PAGE_SIZE;
	// SAFETY: `trapframe` was set up by `alloc_proc`.
	let tf = unsafe { proc.trapframe.unwrap().as_mut() };
	IntFrame::exec(tf, 0, PAGE_SIZE);
	proc.name[..9].copy_from_slice(b"initcode\0");
	let pid = proc.pid;
	let mut table = PROC_TABLE.lock();
	find_proc_mut(&mut table, pid)
		.expect("user_init: slot vanished")
		.state = State::Runnable;
}

/// Runs the filesystem and log initialisation that needs a process context capable of sleeping
/// (waiting on disk interrupts).
///
/// Called exactly once, the first time any process is scheduled — see
/// [`scheduler::fork_ret`]'s doc comment.
pub fn run_first_process_init() {
	let sb = fs::superblock::read(fs::DEV0);
	fs::log::init(fs::DEV0, &sb);
	fs::log::recover_from_log();
}

/// Grows (`delta >= 0`) or shrinks (`delta < 0`) the current process's address space by `delta`
/// bytes, reinstalling the hardware page-directory register on success.
///
/// Returns `None` on allocation failure, leaving the address space untouched.
pub fn grow_proc(delta: isize) -> Option<usize> {
	let proc = scheduler::current()?;
	// SAFETY: `current()` only ever returns the process running on this CPU.
	let proc = unsafe { &mut *proc };
	let dir = proc.pgdir.expect("grow_proc: process has no address space");
	let old_sz = proc.sz;
	let new_sz = if delta >= 0 {
		vm::alloc_uvm(dir, old_sz, old_sz + delta as usize)?
	} else {
		vm::dealloc_uvm(dir, old_sz, old_sz.saturating_sub((-delta) as usize))
	};
	proc.sz = new_sz;
	// SAFETY: `dir` is this process's own, currently bound, address space.
	unsafe {
		vm::switch_uvm(proc.kstack.unwrap() + PAGE_SIZE, pgdir_phys(dir));
	}
	Some(new_sz)
}

/// Duplicates the calling process into a new child, which starts `Runnable` and observes `0` as
/// the return value of its own `fork`.
///
/// Returns `None` on allocation failure, in which case nothing acquired for the child survives.
pub fn fork() -> Option<Pid> {
	let parent = scheduler::current()?;
	// SAFETY: this is the process running on this CPU.
	let parent = unsafe { &mut *parent };
	let mut child = alloc_proc()?;
	// SAFETY: just allocated, not reachable from anywhere else yet.
	let child = unsafe { child.as_mut() };
	let parent_dir = parent.pgdir.expect("fork: parent has no address space");
	let Some(new_dir) = vm::copy_uvm(parent_dir, parent.sz) else {
		reset_to_unused(child);
		return None;
	};
	child.pgdir = Some(new_dir);
	child.sz = parent.sz;
	// SAFETY: both trap frames were set up by `alloc_proc`.
	unsafe {
		let parent_tf = parent.trapframe.unwrap().as_ref().clone();
		let child_tf = child.trapframe.unwrap().as_ptr();
		ptr::write(child_tf, parent_tf);
		// The child sees `0` as `fork`'s return value.
		(*child_tf).set_syscall_return(Ok(0));
	}
	child.parent = Some(parent.pid);
	child.name = parent.name;
	let pid = child.pid;
	{
		let mut _table = PROC_TABLE.lock();
		child.state = State::Runnable;
	}
	Some(pid)
}

/// Reparents `proc`'s children to [`INIT_PID`], wakes `proc`'s parent (and `init`, if a
/// reparented child was already a zombie), and marks `proc` itself `Zombie`.
///
/// Factored out of [`exit`] so this bookkeeping can be exercised without the context switch that
/// follows it in `exit` (which requires a live scheduler loop to switch back into).
///
/// # Safety
///
/// The process table lock must already be held (leaked) by the caller, and `table_ptr` must be
/// the table it guards.
unsafe fn exit_locked(table_ptr: *mut [Proc; NPROC], proc: &mut Proc) {
	let pid = proc.pid;
	unsafe {
		if let Some(ppid) = proc.parent {
			if let Some(addr) = proc_addr_by_pid(table_ptr, ppid) {
				wakeup_locked(table_ptr, addr);
			}
		}
		let mut adopted_zombie = false;
		let table = &mut *table_ptr;
		for p in table.iter_mut() {
			if p.state != State::Unused && p.parent == Some(pid) {
				p.parent = Some(INIT_PID);
				adopted_zombie |= p.state == State::Zombie;
			}
		}
		if adopted_zombie {
			if let Some(addr) = proc_addr_by_pid(table_ptr, INIT_PID) {
				wakeup_locked(table_ptr, addr);
			}
		}
		proc.state = State::Zombie;
	}
}

/// Terminates the calling process: reparents its children to [`INIT_PID`], wakes its parent (and
/// `init`, if a reparented child was already a zombie), marks itself `Zombie`, and switches to
/// the scheduler. Never returns.
pub fn exit() -> ! {
	let proc = scheduler::current().expect("exit: no current process");
	// SAFETY: this is the process running on this CPU.
	let proc = unsafe { &mut *proc };
	let guard = PROC_TABLE.lock();
	let (table_ptr, _int_state) = guard.leak();
	// SAFETY: the process-table lock above is held (leaked) for the remainder of this function.
	// `sched` below never returns here (the process is `Zombie`), so it is deliberately never
	// unlocked: the next process the scheduler dispatches inherits responsibility for it, exactly
	// as every other `sched` caller does.
	unsafe {
		exit_locked(table_ptr, proc);
		scheduler::sched();
	}
	unreachable!("exit: a zombie process was rescheduled");
}

/// Waits for any child to become `Zombie`, reaps it (freeing its kernel stack and address space)
/// and returns its pid.
///
/// Returns `None` if the calling process has no children at all. Otherwise sleeps until `exit`
/// wakes it.
pub fn wait() -> Option<Pid> {
	let proc = scheduler::current().expect("wait: no current process");
	let self_addr = proc as usize;
	// SAFETY: this is the process running on this CPU.
	let pid = unsafe { (*proc).pid };
	let guard = PROC_TABLE.lock();
	let (table_ptr, int_state) = guard.leak();
	loop {
		// SAFETY: the lock is held (leaked) across this whole loop, including the call to
		// `sleep_table_locked`, which requires and preserves exactly that.
		let table = unsafe { &mut *table_ptr };
		let mut have_children = false;
		let mut reaped = None;
		for p in table.iter_mut() {
			if p.state == State::Unused || p.parent != Some(pid) {
				continue;
			}
			have_children = true;
			if p.state == State::Zombie {
				reaped = Some(p.pid);
				reset_to_unused(p);
				break;
			}
		}
		if let Some(child_pid) = reaped {
			unsafe {
				PROC_TABLE.unlock(int_state);
			}
			return Some(child_pid);
		}
		if !have_children {
			unsafe {
				PROC_TABLE.unlock(int_state);
			}
			return None;
		}
		unsafe {
			scheduler::sleep_table_locked(self_addr);
		}
	}
}

/// Marks the process identified by `pid` as killed; if it is `Sleeping`, promotes it to
/// `Runnable` so it observes the flag on its next trap return.
///
/// This may spuriously wake a sleeper blocked on a non-cancellable condition (disk I/O); such a
/// sleeper simply re-checks its wait condition and re-sleeps, per the convention every sleeper in
/// this kernel already follows.
///
/// Returns [`Errno::ESRCH`] if no such process exists.
pub fn kill(pid: Pid) -> EResult<()> {
	let mut table = PROC_TABLE.lock();
	for p in table.iter_mut() {
		if p.state != State::Unused && p.pid == pid {
			p.killed = true;
			if p.state == State::Sleeping {
				p.state = State::Runnable;
			}
			return Ok(());
		}
	}
	Err(Errno::ESRCH)
}

#[cfg(test)]
mod test {
	use super::*;
	use core::ptr;

	/// Builds a process slot that looks like `user_init`'s, far enough along to be forked from,
	/// and makes it look `Running` without a real scheduler dispatch.
	fn spawn_test_current() -> NonNull<Proc> {
		let mut proc = alloc_proc().expect("alloc_proc failed in test");
		// SAFETY: just allocated, not reachable from anywhere else yet.
		let proc_mut = unsafe { proc.as_mut() };
		let dir = vm::setup_kvm().expect("setup_kvm failed in test");
		proc_mut.pgdir = Some(dir);
		vm::init_uvm(dir, &INITCODE).expect("init_uvm failed in test");
		proc_mut.sz = PAGE_SIZE;
		// SAFETY: `trapframe` was set up by `alloc_proc`.
		let tf = unsafe { proc_mut.trapframe.unwrap().as_mut() };
		IntFrame::exec(tf, 0, PAGE_SIZE);
		{
			let mut table = PROC_TABLE.lock();
			find_proc_mut(&mut table, proc_mut.pid).unwrap().state = State::Running;
		}
		scheduler::set_current_for_test(proc.as_ptr());
		proc
	}

	#[test_case]
	fn fork_exit_wait_round_trip() {
		let parent = spawn_test_current();
		// SAFETY: the slot `spawn_test_current` just set up.
		let parent_pid = unsafe { parent.as_ref().pid };

		let child_pid = fork().expect("fork failed");
		assert_ne!(child_pid, parent_pid);
		{
			let mut table = PROC_TABLE.lock();
			let parent_sz = find_proc_mut(&mut table, parent_pid).unwrap().sz;
			let child = find_proc_mut(&mut table, child_pid).expect("child slot missing");
			assert_eq!(child.parent, Some(parent_pid));
			assert_eq!(child.state, State::Runnable);
			assert_eq!(child.sz, parent_sz);
		}

		// There is no live scheduler loop to switch into in a test, so the terminal context
		// switch `exit` performs cannot run here; drive the same table bookkeeping directly
		// instead, stopping short of `sched`.
		{
			let guard = PROC_TABLE.lock();
			let (table_ptr, int_state) = guard.leak();
			// SAFETY: `table_ptr` is the table just locked (and leaked) above.
			unsafe {
				let addr = proc_addr_by_pid(table_ptr, child_pid).expect("child slot vanished");
				let child = &mut *(addr as *mut Proc);
				exit_locked(table_ptr, child);
				PROC_TABLE.unlock(int_state);
			}
		}

		let reaped = wait().expect("wait found no zombie child to reap");
		assert_eq!(reaped, child_pid);
		{
			let mut table = PROC_TABLE.lock();
			assert!(
				find_proc_mut(&mut table, child_pid).is_none(),
				"a reaped child's pid must not remain assigned to any slot"
			);
		}

		scheduler::set_current_for_test(ptr::null_mut());
		let mut table = PROC_TABLE.lock();
		reset_to_unused(find_proc_mut(&mut table, parent_pid).expect("parent slot vanished"));
	}

	#[test_case]
	fn wait_with_no_children_returns_none() {
		let parent = spawn_test_current();
		// SAFETY: the slot `spawn_test_current` just set up.
		let parent_pid = unsafe { parent.as_ref().pid };

		assert_eq!(wait(), None);

		scheduler::set_current_for_test(ptr::null_mut());
		let mut table = PROC_TABLE.lock();
		reset_to_unused(find_proc_mut(&mut table, parent_pid).expect("parent slot vanished"));
	}
}
