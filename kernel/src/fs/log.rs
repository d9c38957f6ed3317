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

//! A write-ahead redo log that groups filesystem operations into transactions committed
//! atomically to disk.
//!
//! The log region is a header block (an `n` followed by up to [`LOGSIZE`] home-block numbers)
//! followed by `LOGSIZE` data blocks, all on [`super::DEV0`]. A transaction is durable the
//! instant the header naming its blocks is written; [`recover_from_log`] replays any transaction
//! whose header survived a crash uncommitted-to-home.

use crate::{
	fs::{bcache, bcache::BufGuard, superblock::Superblock, BSIZE},
	process::scheduler,
	sync::spin::IntSpin,
};
use core::mem::size_of;

/// Upper bound on the number of distinct blocks a single filesystem operation may write.
///
/// Mirrors the role of the original design's constant of the same name: the reservation scheme
/// in [`begin_op`] uses it to guarantee that any admitted batch of concurrent operations can
/// still fit in the log.
const MAXOPBLOCKS: usize = 10;

/// Capacity of the in-memory and on-disk log header's block-number array.
///
/// Sized so that three operations' worth of blocks always fit, leaving room for one to be
/// committing while up to two more accumulate.
const LOGSIZE: usize = (MAXOPBLOCKS + 1) * 3;

/// On-disk/in-memory log header: a count followed by that many home-block numbers.
///
/// `#[repr(C)]` because [`write_head`]/[`read_head`] reinterpret it as the first
/// `size_of::<LogHeader>()` bytes of the header block; must fit in [`BSIZE`].
#[repr(C)]
#[derive(Clone, Copy)]
struct LogHeader {
	n: u32,
	block: [u32; LOGSIZE],
}

const _: () = assert!(size_of::<LogHeader>() <= BSIZE);

impl LogHeader {
	const fn zeroed() -> Self {
		Self {
			n: 0,
			block: [0; LOGSIZE],
		}
	}
}

/// The log's mutable state, guarded by a single spinlock.
struct Log {
	/// Device the log lives on.
	dev: u32,
	/// Block number of the header; the `LOGSIZE` data blocks immediately follow it.
	start: u32,
	/// Number of filesystem operations currently between `begin_op` and `end_op`.
	outstanding: u32,
	/// Set for the duration of `commit()`, excluding it from the lock.
	committing: bool,
	/// In-memory copy of the header; authoritative until written to disk.
	header: LogHeader,
}

/// Channel used to wait for the log to have room, or to stop committing.
fn chan() -> usize {
	&LOG as *const IntSpin<Log> as usize
}

static LOG: IntSpin<Log> = IntSpin::new(Log {
	dev: 0,
	start: 0,
	outstanding: 0,
	committing: false,
	header: LogHeader::zeroed(),
});

/// Initializes the log from the superblock's log region. Called once at boot, before any
/// `begin_op`.
pub fn init(dev: u32, sb: &Superblock) {
	assert!(
		sb.nlog as usize <= LOGSIZE,
		"log: device log region ({} blocks) exceeds in-memory capacity ({LOGSIZE})",
		sb.nlog
	);
	let mut log = LOG.lock();
	log.dev = dev;
	log.start = sb.logstart;
	log.outstanding = 0;
	log.committing = false;
	log.header = LogHeader::zeroed();
}

fn read_head(dev: u32, start: u32) -> LogHeader {
	let buf = bcache::read_block(dev, start);
	let mut header = LogHeader::zeroed();
	let data = buf.data();
	header.n = u32::from_ne_bytes(data[0..4].try_into().unwrap());
	for i in 0..LOGSIZE {
		let off = 4 + i * 4;
		header.block[i] = u32::from_ne_bytes(data[off..off + 4].try_into().unwrap());
	}
	bcache::release(buf);
	header
}

fn write_head(dev: u32, start: u32, header: &LogHeader) {
	let mut buf = bcache::read_block(dev, start);
	{
		let data = buf.data_mut();
		data[0..4].copy_from_slice(&header.n.to_ne_bytes());
		for i in 0..LOGSIZE {
			let off = 4 + i * 4;
			data[off..off + 4].copy_from_slice(&header.block[i].to_ne_bytes());
		}
	}
	bcache::write_block(&mut buf);
	bcache::release(buf);
}

/// Replays the log at boot. If the persisted header has `n > 0`, the prior transaction committed
/// (its header was written) but may not have finished `install_trans` before the crash; replaying
/// is always safe since it overwrites home blocks with the very contents already named as
/// committed.
pub fn recover_from_log() {
	let (dev, start) = {
		let log = LOG.lock();
		(log.dev, log.start)
	};
	let header = read_head(dev, start);
	if header.n > 0 {
		install_trans(dev, start, &header);
	}
	write_head(dev, start, &LogHeader::zeroed());
}

/// Copies each logged block from its log slot to its home location.
fn install_trans(dev: u32, start: u32, header: &LogHeader) {
	for i in 0..header.n as usize {
		let log_buf = bcache::read_block(dev, start + 1 + i as u32);
		let mut dst = bcache::read_block(dev, header.block[i]);
		*dst.data_mut() = *log_buf.data();
		bcache::write_block(&mut dst);
		bcache::release(dst);
		bcache::release(log_buf);
	}
}

/// Copies each logged block's current cached contents to its log slot on disk.
fn write_log(dev: u32, start: u32, header: &LogHeader) {
	for i in 0..header.n as usize {
		let mut log_buf = bcache::read_block(dev, start + 1 + i as u32);
		let src = bcache::read_block(dev, header.block[i]);
		*log_buf.data_mut() = *src.data();
		bcache::write_block(&mut log_buf);
		bcache::release(src);
		bcache::release(log_buf);
	}
}

/// Reserves room in the log for a new filesystem operation, sleeping until the log is not
/// committing and there is enough space for every currently-admitted operation plus this one to
/// each write up to [`MAXOPBLOCKS`] blocks.
pub fn begin_op() {
	let mut guard = LOG.lock();
	loop {
		let would_fit =
			(guard.outstanding as usize + 1) * MAXOPBLOCKS + guard.header.n as usize <= LOGSIZE;
		if guard.committing || !would_fit {
			guard = scheduler::sleep(chan(), guard);
			continue;
		}
		guard.outstanding += 1;
		break;
	}
}

/// Ends a filesystem operation. The last `end_op` for the currently outstanding batch runs the
/// commit; every call wakes anyone waiting for room or for the commit to finish.
pub fn end_op() {
	let commit_args = {
		let mut guard = LOG.lock();
		guard.outstanding -= 1;
		assert!(!guard.committing, "log: end_op during commit");
		if guard.outstanding == 0 {
			guard.committing = true;
			Some((guard.dev, guard.start, guard.header))
		} else {
			scheduler::wakeup(chan());
			None
		}
	};
	if let Some((dev, start, header)) = commit_args {
		commit(dev, start, &header);
		let mut guard = LOG.lock();
		guard.header.n = 0;
		guard.committing = false;
		scheduler::wakeup(chan());
	}
}

/// Commits the current transaction: logs every dirty block, writes the header naming them (the
/// linearisation point), installs each block to its home location, then clears the header.
fn commit(dev: u32, start: u32, header: &LogHeader) {
	if header.n == 0 {
		return;
	}
	write_log(dev, start, header);
	write_head(dev, start, header);
	install_trans(dev, start, header);
	write_head(dev, start, &LogHeader::zeroed());
}

/// Records that `buf` was modified as part of the current operation: absorbs repeat writes to
/// the same block within the transaction into a single log slot, and marks the buffer dirty so
/// the cache cannot reclaim it before the commit installs it.
///
/// Must be called inside a `begin_op`/`end_op` pair, in place of [`bcache::write_block`].
pub fn log_write(buf: &BufGuard) {
	let mut guard = LOG.lock();
	let n = guard.header.n as usize;
	let slot = (0..n).find(|&i| guard.header.block[i] == buf.blockno());
	let slot = match slot {
		Some(i) => i,
		None => {
			assert!(n < LOGSIZE, "log: transaction exceeds LOGSIZE blocks");
			guard.header.n += 1;
			n
		}
	};
	guard.header.block[slot] = buf.blockno();
	bcache::set_dirty(buf.index_in_cache());
}

#[cfg(test)]
mod test {
	use super::*;

	#[test_case]
	fn begin_end_op_roundtrip() {
		begin_op();
		let buf = bcache::read_block(super::super::DEV0, 10);
		log_write(&buf);
		bcache::release(buf);
		end_op();
		assert_eq!(LOG.lock().header.n, 0);
	}

	#[test_case]
	fn log_absorption_single_slot() {
		begin_op();
		let a = bcache::read_block(super::super::DEV0, 11);
		log_write(&a);
		bcache::release(a);
		let b = bcache::read_block(super::super::DEV0, 11);
		log_write(&b);
		bcache::release(b);
		end_op();
	}

	#[test_case]
	fn recover_from_log_replays_uncommitted_header() {
		let dev = super::super::DEV0;
		let start = 40;
		{
			let mut log = LOG.lock();
			log.dev = dev;
			log.start = start;
			log.outstanding = 0;
			log.committing = false;
			log.header = LogHeader::zeroed();
		}

		// Simulate a crash right after a transaction's header was written but before
		// `install_trans` ran: give each home block contents that differ from what its log slot
		// holds, then write a header naming both as logged.
		let home_blocks = [200u32, 201u32];
		for (i, &home) in home_blocks.iter().enumerate() {
			let mut home_buf = bcache::read_block(dev, home);
			home_buf.data_mut().fill(0x00);
			bcache::write_block(&mut home_buf);
			bcache::release(home_buf);

			let mut log_buf = bcache::read_block(dev, start + 1 + i as u32);
			log_buf.data_mut().fill(0xcc + i as u8);
			bcache::write_block(&mut log_buf);
			bcache::release(log_buf);
		}
		let mut header = LogHeader::zeroed();
		header.n = home_blocks.len() as u32;
		for (i, &home) in home_blocks.iter().enumerate() {
			header.block[i] = home;
		}
		write_head(dev, start, &header);

		recover_from_log();

		for (i, &home) in home_blocks.iter().enumerate() {
			let buf = bcache::read_block(dev, home);
			assert_eq!(
				buf.data()[0],
				0xcc + i as u8,
				"recovery must install the logged contents to the home block"
			);
			bcache::release(buf);
		}
		let header_after = read_head(dev, start);
		assert_eq!(
			header_after.n, 0,
			"recovery must clear the header once its transaction is installed"
		);

		*LOG.lock() = Log {
			dev: 0,
			start: 0,
			outstanding: 0,
			committing: false,
			header: LogHeader::zeroed(),
		};
	}

	#[test_case]
	fn recover_from_log_is_a_noop_on_a_clean_header() {
		let dev = super::super::DEV0;
		let start = 40;
		{
			let mut log = LOG.lock();
			log.dev = dev;
			log.start = start;
			log.header = LogHeader::zeroed();
		}
		// Write the clean header explicitly rather than relying on the backing block's raw
		// contents already being zero.
		write_head(dev, start, &LogHeader::zeroed());

		// A header with `n == 0` (the steady state once every transaction has fully committed)
		// must not touch any home block.
		recover_from_log();
		let header = read_head(dev, start);
		assert_eq!(header.n, 0);

		*LOG.lock() = Log {
			dev: 0,
			start: 0,
			outstanding: 0,
			committing: false,
			header: LogHeader::zeroed(),
		};
	}
}
