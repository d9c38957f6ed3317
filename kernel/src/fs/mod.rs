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

//! The block I/O stack: a bounded LRU [`bcache`] of disk blocks, a single-outstanding-request PIO
//! [`disk`] driver, and a write-ahead redo [`log`] that groups filesystem operations into
//! committed transactions.
//!
//! What sits above the log (inodes, directories, the on-disk layout beyond the [`superblock`])
//! is out of scope: this module only goes as far as handing the log and recovery code a working
//! `read_block`/`write_block` and a parsed superblock.

pub mod bcache;
pub mod disk;
pub mod log;
pub mod superblock;

/// The size in bytes of a filesystem block, and of a disk sector.
pub const BSIZE: usize = 512;

/// The only disk device this build talks to.
pub const DEV0: u32 = 0;
