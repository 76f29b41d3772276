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

//! Raw binary records in [mod@binrw] format.

use binrw::BinWrite;

/// Offset of [RawHeader::n_cases] from the start of the file, where the
/// real case count is patched in when a dataset completes.
pub const NCASES_OFFSET: u64 = 80;

/// Raw file header (176 bytes).
#[derive(BinWrite)]
pub struct RawHeader {
    /// Magic number, `$FL2`.
    pub magic: [u8; 4],

    /// Eye-catcher string identifying the producing software.
    pub eye_catcher: [u8; 60],

    /// Layout code, always 2.
    pub layout_code: u32,

    /// Number of variable positions per case, in 8-byte slots.
    pub nominal_case_size: u32,

    /// Compression type; 0 for uncompressed.
    pub compression_code: u32,

    /// 1-based position of the weight variable, or 0 if unweighted.
    pub weight_index: u32,

    /// Number of cases, or -1 when not yet known.
    pub n_cases: i32,

    /// Compression bias, 100.0 by convention.
    pub bias: f64,

    /// `dd mmm yy` creation date.
    pub creation_date: [u8; 9],

    /// `HH:MM:SS` creation time.
    pub creation_time: [u8; 8],

    /// File label, padded on the right with spaces.
    #[bw(pad_after = 3)]
    pub file_label: [u8; 64],
}

/// Raw variable record, written after a `2` record-type word.
///
/// One of these is written per segment of every variable, followed by
/// ⌈width/8⌉ − 1 continuation records (`width` −1) for segments wider than
/// 8 bytes.
#[derive(Clone, BinWrite)]
pub struct RawVariableRecord {
    /// 0 for a numeric variable, the segment width in bytes for a string
    /// segment, or −1 for a continuation record.
    pub width: i32,

    /// 1 when a variable label follows the record.
    pub has_variable_label: u32,

    /// Number of missing values; always 0 here.
    pub n_missing_values: u32,

    /// Packed print format.
    pub print_format: u32,

    /// Packed write format, identical to the print format.
    pub write_format: u32,

    /// 8-byte short name, padded with spaces.
    pub name: [u8; 8],
}
