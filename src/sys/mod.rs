// xml2sav - converts XML dataset descriptions to SPSS system files.
// Copyright (C) 2025 The xml2sav authors.
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <http://www.gnu.org/licenses/>.

//! Writing system files.
//!
//! "System files" are the binary format for SPSS data files.  This module
//! writes the subset of the format that the converter produces:
//! uncompressed, little-endian, UTF-8 encoded files with a back-patched
//! case count.

pub mod records;
pub mod write;

pub use write::{WriteOptions, Writer};

/// The system-missing value, written for numeric fields with no usable
/// value.
pub const SYSMIS: f64 = f64::MIN;
