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

//! The Multiboot2 entry point, reached directly from the bootloader in 32 bit protected mode,
//! flat unpaged. It sets up a 4 MiB-page identity+higher-half mapping just long enough to jump
//! into the kernel at its linked, higher-half address, loads a temporary flat GDT, and calls
//! [`kernel_main`](crate::kernel_main).
//!
//! This build only targets `x86` (`NCPU = 1`, no long mode).

use crate::arch::x86::paging::Table;
use core::{arch::global_asm, sync::atomic::AtomicUsize};

/// Boot stack size
#[cfg(debug_assertions)]
pub const BOOT_STACK_SIZE: usize = 262144; // rustc in debug mode is greedy
/// Boot stack size
#[cfg(not(debug_assertions))]
pub const BOOT_STACK_SIZE: usize = 32768;

/// The paging object used to remap the kernel to higher memory.
///
/// Maps only the first 4 MiB of physical memory, both at address 0 (so the jump out of the
/// bootloader's identity mapping doesn't fault) and at `KERNEL_BEGIN` (0xc0000000), the kernel's
/// linked higher-half address. This deliberately covers no more than phase 1 of the physical page
/// allocator needs (`memory::page::init`): the rest of physical memory, up to `PHYSTOP`, is only
/// reachable once `memory::vm::setup_kvm` builds and binds a real, page-allocator-backed kernel
/// directory.
///
/// The static is marked as **mutable** because the CPU will set the dirty flag.
#[unsafe(no_mangle)]
#[unsafe(link_section = ".boot.data")]
static mut REMAP: Table = const {
	use crate::arch::x86::paging::{FLAG_PAGE_SIZE, FLAG_PRESENT, FLAG_WRITE};

	let mut dir = Table::zeroed();
	// 4 MiB entry covering [0, 4 MiB)
	let ent = FLAG_PAGE_SIZE | FLAG_WRITE | FLAG_PRESENT;
	dir.0[0] = AtomicUsize::new(ent);
	dir.0[768] = AtomicUsize::new(ent);
	dir
};

// Common initialization code
global_asm!(
	r#"
.code32
.section .boot.text, "ax"

# Multiboot2 kernel header
.align 8
header:
	# Multiboot2 magic
	.long 0xe85250d6
	# Architecture (x86)
	.long 0
	# Header length
	.long (header_end - header)
	.long -(0xe85250d6 + (header_end - header))

# The entry tag, setting the entry point of the kernel.
.align 8
entry_address_tag:
	.short 3
	.short 0
	.long (entry_address_tag_end - entry_address_tag)
	.long multiboot_entry
entry_address_tag_end:

# End tag
.align 8
	.short 0
	.short 0
	.long 8
header_end:

.section .boot.stack, "aw"

.align 8

boot_stack:
.size boot_stack, {BOOT_STACK_SIZE}
.skip {BOOT_STACK_SIZE}
boot_stack_begin:
"#,
	BOOT_STACK_SIZE = const(BOOT_STACK_SIZE)
);

global_asm!(
	r#"
.section .boot.text

.global multiboot_entry
.hidden complete_flush
.type multiboot_entry, @function

multiboot_entry:
	mov esp, offset boot_stack_begin
	xor ebp, ebp
	push 0
	popfd

	# Stash multiboot info
	push ebx
	push eax

    # Set page directory
    mov eax, offset {REMAP}
	mov cr3, eax

    # Enable PSE
	mov eax, cr4
	or eax, 0x10
	mov cr4, eax

    # Enable paging and write protect
	mov eax, cr0
	or eax, 0x80010000
	mov cr0, eax

	# Load GDT
	lgdt [gdt]
	push 8 # kernel code segment
	mov eax, offset complete_flush
	push eax
	retf
complete_flush:
	mov ax, 16 # kernel data segment
	mov ds, ax
	mov es, ax
	mov ss, ax

	mov ax, 0
	mov fs, ax
	mov gs, ax

	# Update stack
    add esp, 0xc0000000

	call kernel_main
	# cannot return
	ud2

.section .boot.data

.align 8
gdt_entries:
	.long 0, 0
	.long 0x0000ffff, 0x00cf9a00 # code
	.long 0x0000ffff, 0x00cf9200 # data
gdt:
	.word gdt - gdt_entries - 1
	.long 0xc0000000 + gdt_entries
"#,
	REMAP = sym REMAP
);
