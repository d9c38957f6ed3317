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

//! Error codes returned by kernel operations, modelled after the POSIX `errno` values a syscall
//! handler must be able to report back to userspace in `eax`.

use core::fmt;

/// A kernel error code.
///
/// Variants are named after their POSIX counterpart so syscall handlers can return them
/// directly; [`Errno::as_int`] gives the positive numeric value expected on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(i32)]
pub enum Errno {
	/// Operation not permitted.
	EPERM = 1,
	/// No such file or directory.
	ENOENT = 2,
	/// No such process.
	ESRCH = 3,
	/// Interrupted system call.
	EINTR = 4,
	/// I/O error.
	EIO = 5,
	/// Try again.
	EAGAIN = 11,
	/// Out of memory.
	ENOMEM = 12,
	/// Permission denied.
	EACCES = 13,
	/// Bad address.
	EFAULT = 14,
	/// Device or resource busy.
	EBUSY = 16,
	/// Invalid argument.
	EINVAL = 22,
	/// No child processes.
	ECHILD = 10,
	/// Math result not representable / resource limits exceeded.
	ERANGE = 34,
}

impl Errno {
	/// Returns the positive numeric value of the error code.
	pub const fn as_int(self) -> i32 {
		self as i32
	}
}

impl fmt::Display for Errno {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{self:?} ({})", self.as_int())
	}
}

/// Shorthand for a [`Result`] whose error is a kernel [`Errno`].
pub type EResult<T> = Result<T, Errno>;

/// An out-of-memory condition.
///
/// Kept distinct from [`Errno`] because allocation failure is the one error every layer has to
/// be able to propagate, including code that runs before `errno` values are meaningful (such as
/// the physical page allocator).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AllocError;

impl From<AllocError> for Errno {
	fn from(_: AllocError) -> Self {
		Errno::ENOMEM
	}
}

impl fmt::Display for AllocError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "allocation failed")
	}
}

/// Shorthand for a [`Result`] whose error is [`AllocError`].
pub type AllocResult<T> = Result<T, AllocError>;
