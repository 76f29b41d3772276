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

//! # xml2sav
//!
//! xml2sav converts a custom XML description of one or more statistical
//! datasets into SPSS "system files", the binary `.sav` format read by SPSS
//! and compatible software.  Each `<sav>` element in the input document
//! becomes one output file.
//!
//! The converter makes two passes over the input.  The first pass
//! ([lengths::scan]) records the maximum observed width of every value, so
//! that string variables declared without an explicit width can be sized
//! exactly.  The second pass ([xsav::parse_xsav]) rebuilds each dataset's
//! dictionary and drives the system-file encoder in [sys].
//!
//! Output is always uncompressed and UTF-8 encoded.

pub mod calendar;
pub mod dictionary;
pub mod identifier;
pub mod lengths;
pub mod settings;
pub mod sys;
pub mod xsav;
