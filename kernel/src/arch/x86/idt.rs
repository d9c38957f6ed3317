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

//! The IDT (Interrupt Descriptor Table) is a table under the x86 architecture
//! storing the list of interrupt handlers, allowing to catch and handle
//! interruptions.

use crate::{
	arch::x86::{DEFAULT_FLAGS, cli, gdt, pic, sti},
	trap::syscall_int,
};
use core::{arch::asm, ffi::c_void, mem::size_of, ptr::addr_of};
use utils::errno::EResult;

/// Flag telling that the interrupt is present, ring 0.
const ID_RING0_PRESENT: u8 = 0x8e;
/// Flag telling that the interrupt is present, ring 3 (reachable from userspace via `int`).
const ID_RING3_PRESENT: u8 = 0xee;

/// The IDT vector index for system calls.
pub const SYSCALL_ENTRY: usize = 0x80;
/// The number of entries into the IDT.
pub const ENTRIES_COUNT: usize = 0x81;

/// Interruption stack frame, with saved register state, built by the trap entry stubs in
/// `arch/x86/src/trap.s`.
///
/// Field order matters: it mirrors the order in which the assembly stub pushes registers, low
/// address to high, so that the value of `%esp` at the point the stub calls into Rust is exactly
/// a `&mut IntFrame`.
#[repr(C)]
#[allow(missing_docs)]
#[derive(Clone, Debug, Default)]
pub struct IntFrame {
	pub rax: u32,
	pub rbx: u32,
	pub rcx: u32,
	pub rdx: u32,
	pub rsi: u32,
	pub rdi: u32,
	pub rbp: u32,

	pub gs: u32,
	pub fs: u32,

	/// Interruption vector number.
	pub int: u32,
	/// Error code, if any (0 for vectors that do not carry one).
	pub code: u32,

	pub rip: u32,
	pub cs: u32,
	pub rflags: u32,
	pub rsp: u32,
	pub ss: u32,
}

impl IntFrame {
	/// Tells whether the interrupted context was running in user mode.
	pub const fn is_user(&self) -> bool {
		self.cs as usize & 0b11 == 3
	}

	/// Returns the ID of the system call being executed.
	#[inline]
	pub const fn get_syscall_id(&self) -> usize {
		self.rax as usize
	}

	/// Returns the value of the `n`th argument of the syscall being executed.
	///
	/// If `n` exceeds the number of registers used for argument passing, the function returns
	/// `0`.
	#[inline]
	pub const fn get_syscall_arg(&self, n: u8) -> usize {
		(match n {
			0 => self.rbx,
			1 => self.rcx,
			2 => self.rdx,
			3 => self.rsi,
			4 => self.rdi,
			5 => self.rbp,
			_ => 0,
		}) as usize
	}

	/// Sets the return value of a system call.
	pub fn set_syscall_return(&mut self, value: EResult<usize>) {
		self.rax = value.map(|v| v as _).unwrap_or_else(|e| (-e.as_int()) as _);
	}

	/// Returns the user stack address at the time of the trap.
	pub fn get_stack_address(&self) -> usize {
		self.rsp as usize
	}

	/// Returns the address of the instruction to be executed when the interrupt handler returns.
	pub fn get_program_counter(&self) -> usize {
		self.rip as usize
	}

	/// Sets the address of the instruction to be executed when the interrupt handler returns.
	pub fn set_program_counter(&mut self, val: usize) {
		self.rip = val as _;
	}

	/// Sets the values of `frame` so that it can be used to begin the execution of a program.
	///
	/// Arguments:
	/// - `pc` is the program counter
	/// - `sp` is the stack pointer
	pub fn exec(frame: &mut Self, pc: usize, sp: usize) {
		*frame = IntFrame {
			rip: pc as _,
			cs: (gdt::USER_CS | 3) as _,
			rflags: DEFAULT_FLAGS as _,
			rsp: sp as _,
			ss: (gdt::USER_DS | 3) as _,
			..Default::default()
		};
	}
}

/// An IDT header.
#[repr(C, packed)]
struct InterruptDescriptorTable {
	/// The size of the IDT in bytes, minus 1.
	size: u16,
	/// The address to the beginning of the IDT.
	offset: u32,
}

/// An IDT entry.
#[repr(C)]
#[derive(Clone, Copy)]
struct InterruptDescriptor {
	/// Bits 0..16 of the address to the handler for the interrupt.
	offset0: u16,
	/// The code segment selector to execute the interrupt.
	selector: u16,
	/// Must be set to zero.
	zero0: u8,
	/// Interrupt handler flags.
	flags: u8,
	/// Bits 16..32 of the address to the handler for the interrupt.
	offset1: u16,
}

impl InterruptDescriptor {
	/// Returns a placeholder entry.
	const fn placeholder() -> Self {
		Self {
			offset0: 0,
			selector: 0,
			zero0: 0,
			flags: 0,
			offset1: 0,
		}
	}

	/// Creates an IDT entry.
	///
	/// Arguments:
	/// - `address` is the address of the handler.
	/// - `selector` is the segment selector to be used to handle the interrupt.
	/// - `flags` is the set of flags for the entry (see Intel documentation).
	fn new(address: *const c_void, selector: u16, flags: u8) -> Self {
		Self {
			offset0: (address as usize & 0xffff) as u16,
			selector,
			zero0: 0,
			flags,
			offset1: ((address as usize >> 16) & 0xffff) as u16,
		}
	}
}

unsafe extern "C" {
	fn error0();
	fn error1();
	fn error2();
	fn error3();
	fn error4();
	fn error5();
	fn error6();
	fn error7();
	fn error8();
	fn error9();
	fn error10();
	fn error11();
	fn error12();
	fn error13();
	fn error14();
	fn error15();
	fn error16();
	fn error17();
	fn error18();
	fn error19();
	fn error20();
	fn error21();
	fn error22();
	fn error23();
	fn error24();
	fn error25();
	fn error26();
	fn error27();
	fn error28();
	fn error29();
	fn error30();
	fn error31();

	fn irq0();
	fn irq1();
	fn irq2();
	fn irq3();
	fn irq4();
	fn irq5();
	fn irq6();
	fn irq7();
	fn irq8();
	fn irq9();
	fn irq10();
	fn irq11();
	fn irq12();
	fn irq13();
	fn irq14();
	fn irq15();
}

/// The list of IDT entries.
static mut IDT_ENTRIES: [InterruptDescriptor; ENTRIES_COUNT] =
	[InterruptDescriptor::placeholder(); ENTRIES_COUNT];

/// Executes the given function `f` with maskable interruptions disabled, restoring the previous
/// state on return.
pub fn wrap_disable_interrupts<T, F: FnOnce() -> T>(f: F) -> T {
	let int = super::is_interrupt_enabled();
	cli();
	let res = f();
	if int {
		sti();
	}
	res
}

/// Initializes the IDT and remaps the PIC.
///
/// This function must be called only once at kernel initialization. When returning, maskable
/// interrupts are disabled by default.
pub fn init() {
	cli();
	pic::init(0x20, 0x28);
	// SAFETY: called only once at boot, before interrupts are enabled.
	unsafe {
		IDT_ENTRIES[0x00] = InterruptDescriptor::new(error0 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x01] = InterruptDescriptor::new(error1 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x02] = InterruptDescriptor::new(error2 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x03] = InterruptDescriptor::new(error3 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x04] = InterruptDescriptor::new(error4 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x05] = InterruptDescriptor::new(error5 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x06] = InterruptDescriptor::new(error6 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x07] = InterruptDescriptor::new(error7 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x08] = InterruptDescriptor::new(error8 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x09] = InterruptDescriptor::new(error9 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x0a] = InterruptDescriptor::new(error10 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x0b] = InterruptDescriptor::new(error11 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x0c] = InterruptDescriptor::new(error12 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x0d] = InterruptDescriptor::new(error13 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x0e] = InterruptDescriptor::new(error14 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x0f] = InterruptDescriptor::new(error15 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x10] = InterruptDescriptor::new(error16 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x11] = InterruptDescriptor::new(error17 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x12] = InterruptDescriptor::new(error18 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x13] = InterruptDescriptor::new(error19 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x14] = InterruptDescriptor::new(error20 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x15] = InterruptDescriptor::new(error21 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x16] = InterruptDescriptor::new(error22 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x17] = InterruptDescriptor::new(error23 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x18] = InterruptDescriptor::new(error24 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x19] = InterruptDescriptor::new(error25 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x1a] = InterruptDescriptor::new(error26 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x1b] = InterruptDescriptor::new(error27 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x1c] = InterruptDescriptor::new(error28 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x1d] = InterruptDescriptor::new(error29 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x1e] = InterruptDescriptor::new(error30 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x1f] = InterruptDescriptor::new(error31 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x20] = InterruptDescriptor::new(irq0 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x21] = InterruptDescriptor::new(irq1 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x22] = InterruptDescriptor::new(irq2 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x23] = InterruptDescriptor::new(irq3 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x24] = InterruptDescriptor::new(irq4 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x25] = InterruptDescriptor::new(irq5 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x26] = InterruptDescriptor::new(irq6 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x27] = InterruptDescriptor::new(irq7 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x28] = InterruptDescriptor::new(irq8 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x29] = InterruptDescriptor::new(irq9 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x2a] = InterruptDescriptor::new(irq10 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x2b] = InterruptDescriptor::new(irq11 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x2c] = InterruptDescriptor::new(irq12 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x2d] = InterruptDescriptor::new(irq13 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x2e] = InterruptDescriptor::new(irq14 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		IDT_ENTRIES[0x2f] = InterruptDescriptor::new(irq15 as _, gdt::KERNEL_CS as u16, ID_RING0_PRESENT);
		// System calls: reachable from ring 3 via `int 0x80`.
		IDT_ENTRIES[SYSCALL_ENTRY] =
			InterruptDescriptor::new(syscall_int as _, gdt::KERNEL_CS as u16, ID_RING3_PRESENT);
		let idt = InterruptDescriptorTable {
			size: (size_of::<InterruptDescriptor>() * ENTRIES_COUNT - 1) as u16,
			offset: addr_of!(IDT_ENTRIES) as _,
		};
		asm!("lidt [{}]", in(reg) &idt);
	}
}
