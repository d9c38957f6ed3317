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

//! The kernel console: a thin wrapper around COM1, used by [`crate::logger`] and `println!`.
//!
//! There is no VGA text-mode output or keyboard input here: this kernel has no interactive
//! console, only kernel diagnostics.

use super::serial;

/// Writes `buf` to the console.
pub fn write(buf: &[u8]) {
	serial::PORTS[0].lock().write(buf);
}
