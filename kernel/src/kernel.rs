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

//! Maestro is a Unix kernel written in Rust. This reference documents
//! interfaces for modules and the kernel's internals.
//!
//! # Features
//!
//! The crate has the following features:
//! - `strace`: if enabled, the kernel traces system calls. This is a debug feature.

#![no_std]
#![no_main]
#![feature(adt_const_params)]
#![feature(alloc_layout_extra)]
#![feature(allocator_api)]
#![feature(allow_internal_unstable)]
#![feature(array_chunks)]
#![feature(custom_test_frameworks)]
#![feature(debug_closure_helpers)]
#![feature(lang_items)]
#![feature(likely_unlikely)]
#![feature(negative_impls)]
#![feature(non_null_from_ref)]
#![feature(offset_of_enum)]
#![feature(once_cell_try)]
#![feature(pointer_is_aligned_to)]
#![feature(ptr_metadata)]
#![feature(strict_provenance_lints)]
#![feature(unsigned_nonzero_div_ceil)]
#![deny(fuzzy_provenance_casts)]
#![deny(missing_docs)]
#![allow(clippy::tabs_in_doc_comments)]
#![allow(dead_code)]
#![allow(incomplete_features)]
#![allow(internal_features)]
#![allow(unsafe_op_in_unsafe_fn)]
#![test_runner(crate::selftest::runner)]
#![reexport_test_harness_main = "kernel_selftest"]

pub mod arch;
mod boot;
pub mod cmdline;
#[macro_use]
pub mod config;
pub mod debug;
pub mod device;
pub mod fs;
pub mod logger;
pub mod memory;
pub mod multiboot;
#[macro_use]
pub mod panic;
pub mod power;
#[macro_use]
pub mod print;
pub mod process;
pub mod selftest;
pub mod sync;
pub mod syscall;
pub mod time;

use crate::{
	arch::x86::{gdt, paging, tss},
	logger::LOGGER,
	memory::{VirtAddr, page, vm},
	process::scheduler,
};
use core::ffi::c_void;
pub use utils;

/// The kernel's name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
/// Current kernel version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// An inner function is required to ensure everything in scope is dropped before the scheduler
/// loop, which never returns, takes over.
fn kernel_main_inner(magic: u32, multiboot_ptr: *const c_void) {
	// Architecture-specific initialization: SSE, IDT, PIC remap.
	arch::init();
	gdt::flush();
	tss::init();

	println!("Boot {NAME} version {VERSION}");

	// Read multiboot information
	let boot_info = unsafe { multiboot::read(magic, multiboot_ptr) };

	// Parse bootloader command line arguments
	let cmdline = boot_info.cmdline.unwrap_or_default();
	let args_parser = cmdline::ArgsParser::parse(cmdline).expect("could not parse command line");
	LOGGER.lock().silent = args_parser.is_silent();

	println!("Setup memory management");
	// Phase 1: seed the free list over the 4 MiB the boot page directory already maps (see
	// `boot::REMAP`), from the end of the kernel image to the end of that mapping.
	let boot_mapped_end = memory::KERNEL_BEGIN + (4 * 1024 * 1024);
	page::init(memory::kernel_end(), boot_mapped_end);
	// Build the canonical kernel region shared by every address space, using phase 1's pool.
	vm::init();
	// Install a real kernel directory mapping all of physical memory up to `PHYSTOP`, and switch
	// to it: only then is the rest of physical memory reachable through the kernel's linear view.
	let kdir = vm::setup_kvm().expect("out of memory building the kernel page directory");
	let kdir_pa = VirtAddr::from(kdir).kernel_to_physical().unwrap();
	unsafe {
		paging::bind(kdir_pa);
	}
	// Phase 2: the rest of physical memory is now mapped, so it can join the free list under lock.
	page::enable_lock();
	page::free_range(boot_mapped_end, memory::KERNEL_BEGIN + page::PHYSTOP);

	// Perform kernel self-tests, now that the allocator is fully up.
	#[cfg(test)]
	kernel_selftest();

	println!("Setup storage");
	fs::disk::init();

	println!("Setup time management");
	arch::x86::timer::init(time::TIMER_FREQUENCY);

	println!("Setup processes");
	process::user_init();
}

/// This is the main function of the Rust source code, responsible for the
/// initialization of the kernel.
///
/// When calling this function, the CPU must be in Protected Mode, with the boot page directory
/// (see `boot::REMAP`) bound and mapping the kernel at both address `0` and
/// [`memory::KERNEL_BEGIN`].
///
/// Arguments:
/// - `magic` is the magic number passed by Multiboot.
/// - `multiboot_ptr` is the pointer to the Multiboot booting information structure.
#[unsafe(no_mangle)]
pub extern "C" fn kernel_main(magic: u32, multiboot_ptr: *const c_void) -> ! {
	kernel_main_inner(magic, multiboot_ptr);
	// Never returns: picks a `Runnable` process (the one `user_init` just created) and resumes
	// it forever.
	scheduler::scheduler()
}
