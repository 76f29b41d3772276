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

//! Variable names.
//!
//! Long variable names are cleaned into [Identifier]s, which compare
//! case-insensitively the way SPSS treats variable names.  The system file
//! format additionally needs an 8-byte uppercase "short name" per physical
//! variable record; [ShortNames] hands those out uniquely.

use std::{
    collections::HashSet,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
};

use rand::Rng;
use unicase::UniCase;

/// A cleaned variable name.
///
/// Identifiers are case-insensitive for equality, ordering, and hashing.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identifier(pub UniCase<String>);

impl Identifier {
    /// Maximum length of an identifier, in bytes.
    pub const MAX_LEN: usize = 64;

    /// Reduces `name` to a legal variable name: strips every character that
    /// is not an ASCII letter, digit, `#`, `$`, `_`, or `.`; substitutes
    /// `illegal` for a name with nothing left; prefixes `@` when the first
    /// character is not a letter; and truncates to [MAX_LEN](Self::MAX_LEN)
    /// bytes.
    pub fn clean(name: &str) -> Identifier {
        let mut cleaned = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '#' | '$' | '_' | '.'))
            .collect::<String>();
        if cleaned.is_empty() {
            cleaned = String::from("illegal");
        }
        if !cleaned.as_bytes()[0].is_ascii_alphabetic() {
            cleaned.insert(0, '@');
        }
        cleaned.truncate(Self::MAX_LEN);
        Identifier(UniCase::new(cleaned))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_ref()
    }
}

impl PartialEq<str> for Identifier {
    fn eq(&self, other: &str) -> bool {
        self.0.eq(&UniCase::new(other))
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", self.0)
    }
}

impl Debug for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{:?}", self.0)
    }
}

/// Allocator for 8-byte short names, unique within one dataset.
#[derive(Debug, Default)]
pub struct ShortNames(HashSet<String>);

impl ShortNames {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an unused short name derived from `name` and records it as
    /// used.
    ///
    /// The candidate is `name` uppercased and truncated to 8 bytes.  On a
    /// collision, a trailing decimal suffix is appended or incremented,
    /// re-truncating the prefix to keep the result within 8 bytes; when no
    /// room for a prefix remains, `@` followed by a random number is tried
    /// instead.
    pub fn assign(&mut self, name: &Identifier) -> String {
        let mut short = name.as_str().to_ascii_uppercase();
        short.truncate(8);
        while self.0.contains(&short) {
            short = Self::bump(&short);
        }
        self.0.insert(short.clone());
        short
    }

    fn bump(short: &str) -> String {
        let digits_start = short.len() - short.bytes().rev().take_while(u8::is_ascii_digit).count();
        let (prefix, digits) = short.split_at(digits_start);
        if digits.is_empty() {
            return format!("{}2", &prefix[..prefix.len().min(7)]);
        }
        // At most 8 digits, so the increment cannot overflow.
        let number = (digits.parse::<u64>().unwrap() + 1).to_string();
        if number.len() >= 8 {
            return Self::random();
        }
        let prefix_len = prefix.len().min(8 - number.len());
        if prefix_len == 0 {
            Self::random()
        } else {
            format!("{}{number}", &prefix[..prefix_len])
        }
    }

    fn random() -> String {
        format!("@{}", rand::thread_rng().gen_range(0..10_000_000))
    }
}
