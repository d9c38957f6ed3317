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

//! The superblock, stored in block 1, describes the on-disk layout: filesystem size, inode and
//! bitmap regions, and where the log lives. Everything past the log (inodes, directories, the
//! bitmap) is produced by an external `mkfs` tool and consumed by layers above this one; this
//! reader only extracts what the log needs to find its own region.

use crate::fs::bcache;

/// On-disk superblock layout, as written by `mkfs` and read once at boot.
///
/// Field order is the on-disk wire format: do not reorder.
#[derive(Clone, Copy, Debug, Default)]
#[repr(C)]
pub struct Superblock {
	/// Size of the filesystem, in blocks.
	pub size: u32,
	/// Number of data blocks.
	pub nblocks: u32,
	/// Number of inodes.
	pub ninodes: u32,
	/// Number of log blocks, not counting the header block.
	pub nlog: u32,
	/// Block number of the first log block (the header).
	pub logstart: u32,
	/// Block number of the first inode block.
	pub inodestart: u32,
	/// Block number of the first free-bitmap block.
	pub bmapstart: u32,
}

/// Reads and returns the superblock of device `dev` from block 1.
pub fn read(dev: u32) -> Superblock {
	let buf = bcache::read_block(dev, 1);
	let mut sb = Superblock::default();
	let data = buf.data();
	sb.size = u32::from_ne_bytes(data[0..4].try_into().unwrap());
	sb.nblocks = u32::from_ne_bytes(data[4..8].try_into().unwrap());
	sb.ninodes = u32::from_ne_bytes(data[8..12].try_into().unwrap());
	sb.nlog = u32::from_ne_bytes(data[12..16].try_into().unwrap());
	sb.logstart = u32::from_ne_bytes(data[16..20].try_into().unwrap());
	sb.inodestart = u32::from_ne_bytes(data[20..24].try_into().unwrap());
	sb.bmapstart = u32::from_ne_bytes(data[24..28].try_into().unwrap());
	bcache::release(buf);
	sb
}
