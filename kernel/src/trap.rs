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

//! Trap dispatch: every exception, IRQ and `int 0x80` system call lands here via the assembly
//! stubs in `arch/x86/src/trap.s`, which build an [`IntFrame`] on the interrupted stack and call
//! [`trap_handler`].
//!
//! - Vector `0x20` (the PIT, IRQ0): advances the tick count and yields if a process was
//!   interrupted.
//! - Vectors `0x2e`/`0x2f` (the two IDE IRQs): forwarded to the disk driver.
//! - Vector `0x80`: dispatched to the syscall table.
//! - Every other vector: the interrupted context did something the kernel does not handle, so it
//!   panics naming the exception.

use crate::{
	arch::{self, x86::idt::IntFrame},
	fs, process, syscall, time,
};

unsafe extern "C" {
	/// The `int 0x80` entry stub (`arch/x86/src/trap.s`), registered directly into the IDT by
	/// [`crate::arch::x86::idt::init`].
	pub fn syscall_int();
}

#[unsafe(no_mangle)]
extern "C" fn trap_handler(frame: &mut IntFrame) {
	match frame.int {
		0x20 => {
			time::tick();
			arch::end_of_interrupt(0);
			if let Some(proc) = process::scheduler::current() {
				// SAFETY: `current()` only ever returns the process running on this CPU.
				let proc = unsafe { &mut *proc };
				if proc.state == process::State::Running {
					if frame.is_user() && proc.alarm_interval != 0 && !proc.alarm_fired {
						proc.alarm_remaining = proc.alarm_remaining.saturating_sub(1);
						if proc.alarm_remaining == 0 {
							proc.alarm_fired = true;
							frame.set_program_counter(proc.alarm_handler);
						}
					}
					process::scheduler::yield_();
				}
			}
		}
		0x2e => {
			fs::disk::interrupt();
			arch::end_of_interrupt(14);
		}
		0x2f => {
			fs::disk::interrupt();
			arch::end_of_interrupt(15);
		}
		0x80 => {
			let id = frame.get_syscall_id();
			let ret = syscall::dispatch(id, frame);
			frame.set_syscall_return(ret);
		}
		_ => crate::panic::with_frame(frame),
	}
	// A killed process observes the flag on its next return to user mode.
	if frame.is_user() {
		if let Some(proc) = process::scheduler::current() {
			// SAFETY: `current()` only ever returns the process running on this CPU.
			if unsafe { (*proc).killed } {
				process::exit();
			}
		}
	}
}
