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

//! Utility library shared across the kernel and its build tooling.
//!
//! This crate stays deliberately small: the kernel keeps its core data structures (the process
//! table, the buffer cache, the log) as fixed-size arrays, so it has no need for the full
//! collection/allocator surface of a hosted `utils` crate.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod errno;
pub mod limits;

use core::{fmt, slice, str};

/// Wrapper used to display a byte slice that is expected to be a string, but may not be valid
/// UTF-8.
///
/// Invalid sequences are replaced with the Unicode replacement character.
pub struct DisplayableStr<'s>(pub &'s [u8]);

impl fmt::Display for DisplayableStr<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut buf = self.0;
		loop {
			match str::from_utf8(buf) {
				Ok(s) => return f.write_str(s),
				Err(e) => {
					let (valid, rest) = buf.split_at(e.valid_up_to());
					// Safe because `valid` has just been validated
					f.write_str(unsafe { str::from_utf8_unchecked(valid) })?;
					f.write_char(char::REPLACEMENT_CHARACTER)?;
					let after = rest.get(1..).unwrap_or(&[]);
					if after.is_empty() {
						return Ok(());
					}
					buf = after;
				}
			}
		}
	}
}

impl fmt::Debug for DisplayableStr<'_> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}", self.0 as &[u8])
	}
}

/// Returns the length of the nul-terminated string starting at `ptr`.
///
/// # Safety
///
/// `ptr` must point to a valid, nul-terminated sequence of bytes.
pub unsafe fn strlen(ptr: *const u8) -> usize {
	let mut i = 0;
	while *ptr.add(i) != 0 {
		i += 1;
	}
	i
}

/// Builds a string slice from a nul-terminated, pointer.
///
/// # Safety
///
/// `ptr` must point to a valid, nul-terminated sequence of bytes that outlives the returned
/// reference, and the content does not need to be valid UTF-8 (invalid sequences are not
/// rejected, callers should use [`DisplayableStr`] for display).
pub unsafe fn str_from_ptr<'s>(ptr: *const u8) -> &'s [u8] {
	let len = strlen(ptr);
	slice::from_raw_parts(ptr, len)
}

/// Returns the value of `ptr`, rounded up to the next multiple of `align`.
///
/// `align` must be a power of two.
pub fn align(ptr: *mut u8, align: usize) -> *mut u8 {
	let addr = ptr as usize;
	let aligned = (addr + align - 1) & !(align - 1);
	aligned as *mut u8
}
