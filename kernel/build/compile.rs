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

//! Some parts of the kernel are implemented in C and assembly language. Those parts are compiled
//! by the code present in this module.

use crate::{Env, target::Target, util::list_c_files};
use std::{
	io,
	path::{Path, PathBuf},
};

/// Compiles the C and assembly code that are parts of the kernel's codebase.
pub fn compile_c(env: &Env, target: &Target) -> io::Result<()> {
	let files: Vec<PathBuf> = list_c_files(Path::new("src"))?
		.into_iter()
		.chain(list_c_files(&target.src())?)
		.collect();
	for f in &files {
		println!("cargo:rerun-if-changed={}", f.display());
	}
	cc::Build::new()
		.flag("-nostdlib")
		.flag("-ffreestanding")
		.flag("-fno-stack-protector")
		.flag("-mno-red-zone")
		.flag("-Wall")
		.flag("-Wextra")
		.flag("-Wno-unused-command-line-argument")
		.flag("-Werror")
		.pic(false)
		.target(&target.triplet)
		.debug(env.is_debug())
		.opt_level(env.opt_level)
		.files(files)
		.compile("casm");
	// Necessary to get access from dependencies
	println!("cargo:rustc-link-arg=-lcasm");
	Ok(())
}
