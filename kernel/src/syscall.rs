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

//! The ten system calls this kernel exposes to userspace.
//!
//! There is no VFS, no signal delivery machinery and no `exec` in this build, unlike the system
//! this was distilled from: every handler here only touches the process table, the scheduler or
//! the tick counter.

use crate::{
	arch::x86::idt::IntFrame,
	memory::{vm, VirtAddr},
	process,
	process::{scheduler, Pid},
	time,
};
use macros::syscall;
use utils::errno::{EResult, Errno};

#[syscall]
pub fn fork() -> Result<i32, Errno> {
	process::fork().map(|pid| pid as i32).ok_or(Errno::EAGAIN)
}

#[syscall]
pub fn exit() -> Result<i32, Errno> {
	process::exit()
}

#[syscall]
pub fn wait() -> Result<i32, Errno> {
	process::wait().map(|pid| pid as i32).ok_or(Errno::ECHILD)
}

#[syscall]
pub fn kill(pid: i32) -> Result<i32, Errno> {
	process::kill(pid as Pid).map(|()| 0)
}

#[syscall]
pub fn getpid() -> Result<i32, Errno> {
	Ok(scheduler::current_pid())
}

#[syscall]
pub fn sbrk(delta: i32) -> Result<i32, Errno> {
	process::grow_proc(delta as isize)
		.map(|sz| sz as i32)
		.ok_or(Errno::ENOMEM)
}

#[syscall]
pub fn sleep(ticks: u32) -> Result<i32, Errno> {
	time::sleep_ticks(ticks as u64);
	Ok(0)
}

#[syscall]
pub fn uptime() -> Result<i32, Errno> {
	Ok(time::uptime() as i32)
}

#[syscall]
pub fn date(buf: u32) -> Result<i32, Errno> {
	let proc = scheduler::current().ok_or(Errno::ESRCH)?;
	// SAFETY: `current()` only ever returns the process running on this CPU.
	let dir = unsafe { (*proc).pgdir }.expect("date: process has no address space");
	let date = time::read_rtc_date();
	// SAFETY: `RtcDate` is `repr(C)` and contains no padding that would leak uninitialised bytes
	// meaningfully, since every field is written by `read_rtc_date`.
	let bytes = unsafe {
		core::slice::from_raw_parts(
			&date as *const time::RtcDate as *const u8,
			core::mem::size_of::<time::RtcDate>(),
		)
	};
	vm::copy_out(dir, VirtAddr(buf as usize), bytes).ok_or(Errno::EFAULT)?;
	Ok(0)
}

/// Arms a one-shot alarm: after `ticks` timer interrupts have elapsed while this process is
/// running, its next trap return jumps to `handler` instead of back to its interrupted code.
///
/// There is no `sigreturn` in this build's syscall surface, so `handler` is never resumed from:
/// an armed alarm fires exactly once per `alarm` call. Passing `ticks == 0` disarms it.
#[syscall]
pub fn alarm(ticks: u32, handler: u32) -> Result<i32, Errno> {
	let proc = scheduler::current().ok_or(Errno::ESRCH)?;
	// SAFETY: `current()` only ever returns the process running on this CPU.
	let proc = unsafe { &mut *proc };
	proc.alarm_interval = ticks;
	proc.alarm_remaining = ticks;
	proc.alarm_handler = handler as usize;
	proc.alarm_fired = false;
	Ok(0)
}

/// Dispatches the syscall numbered `id`, reading its arguments out of `frame`.
///
/// Returns [`Errno::EINVAL`] if `id` does not name one of the ten syscalls above.
pub fn dispatch(id: usize, frame: &IntFrame) -> EResult<usize> {
	match id {
		1 => fork(frame),
		2 => exit(frame),
		3 => wait(frame),
		4 => kill(frame),
		5 => getpid(frame),
		6 => sbrk(frame),
		7 => sleep(frame),
		8 => uptime(frame),
		9 => date(frame),
		10 => alarm(frame),
		_ => Err(Errno::EINVAL),
	}
	.map(|v| v as usize)
}
