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

//! Dates and times in system files.
//!
//! SPSS measures time as a count of seconds from 14 Oct 1582, the start of
//! the Gregorian calendar.  Case values arrive as text in `D-MMM-YYYY` or
//! `D-MMM-YYYY HH:MM:SS` form with English month abbreviations.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, ParseError};

/// Seconds from 14 Oct 1582, the SPSS epoch, to 1 Jan 1970, the Unix epoch.
pub const EPOCH_OFFSET: i64 = 12_219_379_200;

const DATE: &str = "%d-%b-%Y";
const DATE_TIME: &str = "%d-%b-%Y %H:%M:%S";

/// Parses a `D-MMM-YYYY` date, for example `2-Jan-2006`, and returns it as
/// seconds since the SPSS epoch.
pub fn parse_date(s: &str) -> Result<f64, ParseError> {
    Ok(from_unix(
        NaiveDate::parse_from_str(s, DATE)?.and_time(NaiveTime::MIN),
    ))
}

/// Parses a `D-MMM-YYYY HH:MM:SS` timestamp, for example
/// `2-Jan-2006 15:04:05`, and returns it as seconds since the SPSS epoch.
pub fn parse_date_time(s: &str) -> Result<f64, ParseError> {
    Ok(from_unix(NaiveDateTime::parse_from_str(s, DATE_TIME)?))
}

fn from_unix(date_time: NaiveDateTime) -> f64 {
    (date_time.and_utc().timestamp() + EPOCH_OFFSET) as f64
}
