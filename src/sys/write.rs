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

//! The system-file encoder.
//!
//! [WriteOptions::write_writer] writes a [Dictionary] out as the header and
//! metadata records of a system file and returns a [Writer] that appends
//! case records.  Dropping or [finish](Writer::finish)ing the writer seeks
//! back into the header and patches the real case count in.

use std::io::{Cursor, Seek, SeekFrom, Write};

use binrw::{BinWrite, Error as BinError};
use chrono::{Local, NaiveDateTime};
use itertools::zip_eq;
use smallvec::SmallVec;
use thiserror::Error as ThisError;

use crate::{
    calendar,
    dictionary::{Case, Dictionary, Format, VarWidth, Variable},
    identifier::{Identifier, ShortNames},
    sys::{
        records::{RawHeader, RawVariableRecord, NCASES_OFFSET},
        SYSMIS,
    },
};

/// Eye-catcher string written into every file header.
const PRODUCT: &str = "@(#) SPSS DATA FILE - xml2sav 2.0";

/// A fatal error from the encoder.
#[derive(Debug, ThisError)]
pub enum Error {
    /// An I/O error.
    #[error(transparent)]
    Write(#[from] BinError),

    /// A value label for a numeric variable whose value is not a number.
    #[error("Value label value {value:?} for numeric variable {variable} does not parse as a number.")]
    InvalidLabelValue { variable: Identifier, value: String },
}

/// A non-fatal problem with one case value.  The affected field is written
/// as system-missing (or truncated, for strings) and encoding continues.
#[derive(Debug, ThisError)]
pub enum Warning {
    #[error("Truncated string value for {variable} to {width} bytes.")]
    TruncatedString { variable: Identifier, width: usize },

    #[error("Cannot parse value {value:?} for {variable} as a number; set as missing.")]
    InvalidNumber { variable: Identifier, value: String },

    #[error("Cannot parse value {value:?} for {variable}: {error}; set as missing.")]
    InvalidDate {
        variable: Identifier,
        value: String,
        error: chrono::ParseError,
    },
}

/// Options for writing a system file.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    /// Date and time written to the file header.
    pub timestamp: NaiveDateTime,

    /// File label.
    ///
    /// Only the first 64 bytes are written.
    pub file_label: String,

    /// Display-width ceiling for string variables.
    pub max_print_string_width: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            file_label: String::new(),
            max_print_string_width: 40,
        }
    }
}

impl WriteOptions {
    /// Constructs a new set of default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `self` with the timestamp to be written set to `timestamp`.
    pub fn with_timestamp(self, timestamp: NaiveDateTime) -> Self {
        Self { timestamp, ..self }
    }

    /// Returns `self` with the file label set to `file_label`.
    pub fn with_file_label(self, file_label: impl Into<String>) -> Self {
        Self {
            file_label: file_label.into(),
            ..self
        }
    }

    /// Returns `self` with the display-width ceiling set to `width`.
    pub fn with_max_print_string_width(self, width: u32) -> Self {
        Self {
            max_print_string_width: width,
            ..self
        }
    }

    /// Writes `dictionary` to `writer` as the header and metadata records of
    /// a system file.  Returns a [Writer] for appending cases to the new
    /// file.
    pub fn write_writer<W>(self, dictionary: &Dictionary, mut writer: W) -> Result<Writer<W>, Error>
    where
        W: Write + Seek,
    {
        DictionaryWriter::new(&self, &mut writer, dictionary).write()?;
        Ok(Writer::new(writer))
    }

    /// Returns a [WriteOptions] with every member set to a fixed value, so
    /// that running at different times won't change what's written.
    #[cfg(test)]
    pub(crate) fn reproducible() -> Self {
        use chrono::NaiveDate;
        WriteOptions::new()
            .with_timestamp(
                NaiveDate::from_ymd_opt(2016, 5, 1)
                    .unwrap()
                    .and_hms_opt(12, 34, 56)
                    .unwrap(),
            )
            .with_file_label("xml2sav test file")
    }
}

fn fixed_str<const N: usize>(s: &str) -> [u8; N] {
    let mut bytes = s.as_bytes().to_vec();
    bytes.resize(N, b' ');
    bytes.try_into().unwrap()
}

struct DictionaryWriter<'a, W> {
    options: &'a WriteOptions,
    short_names: Vec<SmallVec<[String; 1]>>,
    writer: &'a mut W,
    dictionary: &'a Dictionary,
}

impl<'a, W> DictionaryWriter<'a, W>
where
    W: Write + Seek,
{
    fn new(options: &'a WriteOptions, writer: &'a mut W, dictionary: &'a Dictionary) -> Self {
        let mut generator = ShortNames::new();
        let short_names = dictionary
            .iter()
            .map(|variable| {
                variable
                    .width
                    .segments()
                    .map(|_| generator.assign(&variable.name))
                    .collect()
            })
            .collect();
        Self {
            options,
            short_names,
            writer,
            dictionary,
        }
    }

    fn write(&mut self) -> Result<(), Error> {
        self.write_header()?;
        self.write_variables()?;
        self.write_value_labels()?;
        self.write_display_parameters()?;
        self.write_long_variable_names()?;
        self.write_very_long_strings()?;
        self.write_encoding()?;
        self.write_long_string_value_labels()?;
        Ok((999u32, 0u32).write_le(self.writer)?)
    }

    fn write_header(&mut self) -> Result<(), BinError> {
        let header = RawHeader {
            magic: *b"$FL2",
            eye_catcher: fixed_str(PRODUCT),
            layout_code: 2,
            nominal_case_size: self.dictionary.case_size() as u32,
            compression_code: 0,
            weight_index: 0,
            n_cases: -1,
            bias: 100.0,
            creation_date: fixed_str(&self.options.timestamp.format("%d %b %y").to_string()),
            creation_time: fixed_str(&self.options.timestamp.format("%H:%M:%S").to_string()),
            file_label: fixed_str(&self.options.file_label),
        };
        header.write_le(self.writer)
    }

    fn write_variables(&mut self) -> Result<(), BinError> {
        for (variable, names) in zip_eq(self.dictionary.iter(), &self.short_names) {
            let format = raw_format(variable);
            for (segment, (width, name)) in zip_eq(variable.width.segments(), names).enumerate() {
                let record = RawVariableRecord {
                    width: width.as_string_width().map_or(0, |w| w as i32),
                    has_variable_label: (segment == 0 && variable.label.is_some()) as u32,
                    n_missing_values: 0,
                    print_format: format,
                    write_format: format,
                    name: fixed_str(name),
                };
                (2u32, record).write_le(self.writer)?;

                if segment == 0 {
                    if let Some(label) = &variable.label {
                        let len = label.len();
                        (len as u32, label.as_bytes()).write_le(self.writer)?;
                        // NUL padding to the next 4-byte boundary.
                        for _ in len..len.next_multiple_of(4) {
                            0u8.write_le(self.writer)?;
                        }
                    }
                }

                // Extended string parts for segments wider than 8 bytes.
                let continuation = (
                    2u32,
                    RawVariableRecord {
                        width: -1,
                        has_variable_label: 0,
                        n_missing_values: 0,
                        print_format: 0,
                        write_format: 0,
                        name: *b"        ",
                    },
                );
                for _ in 1..width.n_chunks().unwrap() {
                    continuation.write_le(self.writer)?;
                }
            }
        }
        Ok(())
    }

    /// Writes value label records, except for long string variables, which
    /// get their own record type (subtype 21).
    fn write_value_labels(&mut self) -> Result<(), Error> {
        for variable in self.dictionary.iter() {
            if variable.value_labels.is_empty() || variable.width.is_long_string() {
                continue;
            }
            (3u32, variable.value_labels.len() as u32).write_le(self.writer)?;
            for label in &variable.value_labels {
                match variable.width {
                    VarWidth::Numeric => {
                        let value: f64 =
                            label.value.parse().map_err(|_| Error::InvalidLabelValue {
                                variable: variable.name.clone(),
                                value: label.value.clone(),
                            })?;
                        value.write_le(self.writer)?;
                    }
                    VarWidth::String(_) => {
                        let value = label.value.as_bytes();
                        let value = &value[..value.len().min(8)];
                        value.write_le(self.writer)?;
                        for _ in value.len()..8 {
                            b' '.write_le(self.writer)?;
                        }
                    }
                }
                let len = label.desc.len().min(120);
                (len as u8, &label.desc.as_bytes()[..len]).write_le(self.writer)?;
                // Spaces until the length byte plus the description fill a
                // multiple of 8 bytes.
                for _ in 1 + len..(1 + len).next_multiple_of(8) {
                    b' '.write_le(self.writer)?;
                }
            }
            (4u32, 1u32, variable.case_index()).write_le(self.writer)?;
        }
        Ok(())
    }

    fn write_display_parameters(&mut self) -> Result<(), BinError> {
        let count = self
            .dictionary
            .iter()
            .map(|variable| variable.width.segments().len())
            .sum::<usize>() as u32
            * 3;
        (7u32, 11u32, 4u32, count).write_le(self.writer)?;
        for variable in self.dictionary.iter() {
            for (segment, _) in variable.width.segments().enumerate() {
                let (width, alignment) = match variable.width {
                    VarWidth::String(width) if segment == 0 => {
                        (width.min(self.options.max_print_string_width), 0u32)
                    }
                    VarWidth::String(_) => (8, 0),
                    VarWidth::Numeric => (8, 1),
                };
                (variable.measure.code(), width, alignment).write_le(self.writer)?;
            }
        }
        Ok(())
    }

    fn write_long_variable_names(&mut self) -> Result<(), BinError> {
        let mut body = Vec::new();
        for (index, (variable, names)) in
            zip_eq(self.dictionary.iter(), &self.short_names).enumerate()
        {
            if index > 0 {
                body.push(b'\t');
            }
            body.extend_from_slice(names[0].as_bytes());
            body.push(b'=');
            body.extend_from_slice(variable.name.as_str().as_bytes());
        }
        (7u32, 13u32, 1u32, body.len() as u32, body.as_slice()).write_le(self.writer)
    }

    fn write_very_long_strings(&mut self) -> Result<(), BinError> {
        let mut body = Vec::new();
        for (variable, names) in zip_eq(self.dictionary.iter(), &self.short_names) {
            if variable.width.is_very_long_string() {
                let width = variable.width.as_string_width().unwrap();
                body.extend_from_slice(&fixed_str::<8>(&names[0]));
                body.push(b'=');
                let mut decimal = width.to_string().into_bytes();
                decimal.resize(5, 0);
                body.extend_from_slice(&decimal);
                body.extend_from_slice(&[0, b'\t']);
            }
        }
        if body.is_empty() {
            return Ok(());
        }
        (7u32, 14u32, 1u32, body.len() as u32, body.as_slice()).write_le(self.writer)
    }

    fn write_encoding(&mut self) -> Result<(), BinError> {
        (7u32, 20u32, 1u32, 5u32, *b"UTF-8").write_le(self.writer)
    }

    fn write_long_string_value_labels(&mut self) -> Result<(), BinError> {
        let mut body = Vec::new();
        let mut cursor = Cursor::new(&mut body);
        for (variable, names) in zip_eq(self.dictionary.iter(), &self.short_names) {
            if variable.value_labels.is_empty() || !variable.width.is_long_string() {
                continue;
            }
            let name = names[0].as_bytes();
            (
                name.len() as u32,
                name,
                variable.width.as_string_width().unwrap() as u32,
                variable.value_labels.len() as u32,
            )
                .write_le(&mut cursor)?;
            for label in &variable.value_labels {
                (
                    label.value.len() as u32,
                    label.value.as_bytes(),
                    label.desc.len() as u32,
                    label.desc.as_bytes(),
                )
                    .write_le(&mut cursor)?;
            }
        }
        if body.is_empty() {
            return Ok(());
        }
        (7u32, 21u32, 1u32, body.len() as u32, body.as_slice()).write_le(self.writer)
    }
}

fn raw_format(variable: &Variable) -> u32 {
    match variable.width {
        VarWidth::String(width) => (variable.format.code() << 16) | (width << 8),
        VarWidth::Numeric => {
            (variable.format.code() << 16)
                | ((variable.print_width as u32) << 8)
                | variable.decimals as u32
        }
    }
}

/// Writes case records to a system file and back-patches the header's case
/// count.
pub struct Writer<W>
where
    W: Write + Seek,
{
    inner: Option<W>,
    n_cases: i32,
}

impl<W> Writer<W>
where
    W: Write + Seek,
{
    fn new(inner: W) -> Self {
        Self {
            inner: Some(inner),
            n_cases: 0,
        }
    }

    /// Number of cases written so far.
    pub fn n_cases(&self) -> i32 {
        self.n_cases
    }

    /// Writes one case.  `case` must parallel `dictionary`, which must be
    /// the dictionary this writer was created with.  Unparsable values are
    /// reported to `warn` and written as system-missing.
    ///
    /// # Panic
    ///
    /// Panics if [try_finish](Self::try_finish) has been called.
    pub fn write_case(
        &mut self,
        dictionary: &Dictionary,
        case: &Case,
        warn: &mut dyn FnMut(Warning),
    ) -> Result<(), BinError> {
        let writer = self.inner.as_mut().unwrap();
        for (variable, value) in zip_eq(dictionary.iter(), case.values()) {
            let value = value.as_deref().or(variable.default.as_deref());
            match value {
                None => match variable.width {
                    VarWidth::Numeric => SYSMIS.write_le(writer)?,
                    VarWidth::String(_) => {
                        for _ in 0..variable.width.n_slots() * 8 {
                            b' '.write_le(writer)?;
                        }
                    }
                },
                Some(value) => match (variable.width, variable.format) {
                    (VarWidth::String(_), _) => write_string(writer, variable, value, warn)?,
                    (VarWidth::Numeric, Format::Date | Format::DateTime) => {
                        write_date(writer, variable, value, warn)?
                    }
                    (VarWidth::Numeric, _) => write_number(writer, variable, value, warn)?,
                },
            }
        }
        self.n_cases += 1;
        Ok(())
    }

    /// Finishes writing the file: patches the case count into the header
    /// and flushes the underlying writer, which is returned.
    pub fn finish(mut self) -> Result<Option<W>, BinError> {
        self.try_finish()
    }

    /// Like [finish](Self::finish), but leaves `self` usable only for
    /// another `try_finish`, which will do nothing.
    pub fn try_finish(&mut self) -> Result<Option<W>, BinError> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(None);
        };
        inner.seek(SeekFrom::Start(NCASES_OFFSET))?;
        self.n_cases.write_le(&mut inner)?;
        inner.flush()?;
        Ok(Some(inner))
    }
}

impl<W> Drop for Writer<W>
where
    W: Write + Seek,
{
    fn drop(&mut self) {
        let _ = self.try_finish();
    }
}

fn write_string<W>(
    writer: &mut W,
    variable: &Variable,
    value: &str,
    warn: &mut dyn FnMut(Warning),
) -> Result<(), BinError>
where
    W: Write + Seek,
{
    let width = variable.width.as_string_width().unwrap();
    let mut bytes = value.as_bytes();
    if bytes.len() > width {
        bytes = &bytes[..width];
        warn(Warning::TruncatedString {
            variable: variable.name.clone(),
            width,
        });
    }
    for segment in variable.width.segments() {
        let (data, rest) = bytes.split_at(bytes.len().min(255));
        bytes = rest;
        data.write_le(writer)?;
        for _ in data.len()..segment.n_chunks().unwrap() * 8 {
            b' '.write_le(writer)?;
        }
    }
    Ok(())
}

fn write_number<W>(
    writer: &mut W,
    variable: &Variable,
    value: &str,
    warn: &mut dyn FnMut(Warning),
) -> Result<(), BinError>
where
    W: Write + Seek,
{
    let number = if value.is_empty() {
        SYSMIS
    } else {
        match value.parse() {
            Ok(number) => number,
            Err(_) => {
                warn(Warning::InvalidNumber {
                    variable: variable.name.clone(),
                    value: value.into(),
                });
                SYSMIS
            }
        }
    };
    number.write_le(writer)
}

fn write_date<W>(
    writer: &mut W,
    variable: &Variable,
    value: &str,
    warn: &mut dyn FnMut(Warning),
) -> Result<(), BinError>
where
    W: Write + Seek,
{
    let number = if value.is_empty() {
        SYSMIS
    } else {
        let parsed = match variable.format {
            Format::Date => calendar::parse_date(value),
            _ => calendar::parse_date_time(value),
        };
        match parsed {
            Ok(seconds) => seconds,
            Err(error) => {
                warn(Warning::InvalidDate {
                    variable: variable.name.clone(),
                    value: value.into(),
                    error,
                });
                SYSMIS
            }
        }
    };
    number.write_le(writer)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use crate::{
        dictionary::{Case, Dictionary, Format, Label, Measure, VarWidth, Variable},
        identifier::Identifier,
        sys::{records::NCASES_OFFSET, SYSMIS},
    };

    use super::{DictionaryWriter, Warning, WriteOptions};

    fn numeric(name: &str) -> Variable {
        let mut variable = Variable::new(Identifier::clean(name), VarWidth::Numeric, Format::F);
        variable.print_width = 8;
        variable.decimals = 2;
        variable
    }

    fn string(name: &str, width: u32) -> Variable {
        Variable::new(Identifier::clean(name), VarWidth::String(width), Format::A)
    }

    fn dictionary(variables: impl IntoIterator<Item = Variable>) -> Dictionary {
        let mut dictionary = Dictionary::new(50 * 1024);
        for variable in variables {
            dictionary.add_var(variable).unwrap();
        }
        dictionary
    }

    fn write_metadata(dictionary: &Dictionary) -> Vec<u8> {
        let mut raw = Vec::new();
        let mut cursor = Cursor::new(&mut raw);
        DictionaryWriter::new(&WriteOptions::reproducible(), &mut cursor, dictionary)
            .write()
            .unwrap();
        raw
    }

    fn le32(raw: &[u8], offset: usize) -> i32 {
        i32::from_le_bytes(raw[offset..offset + 4].try_into().unwrap())
    }

    fn lef64(raw: &[u8], offset: usize) -> f64 {
        f64::from_le_bytes(raw[offset..offset + 8].try_into().unwrap())
    }

    /// Returns the offset just past the `(7, subtype)` introducer of the
    /// given extension record.
    fn find_subrecord(raw: &[u8], subtype: u32) -> Option<usize> {
        let mut pattern = Vec::new();
        pattern.extend_from_slice(&7u32.to_le_bytes());
        pattern.extend_from_slice(&subtype.to_le_bytes());
        raw.windows(8)
            .position(|window| window == pattern)
            .map(|position| position + 8)
    }

    #[test]
    fn header() {
        let dictionary = dictionary([numeric("x"), string("s", 10)]);
        let raw = write_metadata(&dictionary);

        assert_eq!(&raw[0..4], b"$FL2");
        assert!(raw[4..64].starts_with(b"@(#) SPSS DATA FILE - xml2sav 2.0"));
        assert_eq!(le32(&raw, 64), 2, "layout code");
        assert_eq!(le32(&raw, 68), 3, "one numeric slot plus two string slots");
        assert_eq!(le32(&raw, 72), 0, "no compression");
        assert_eq!(le32(&raw, 76), 0, "no weight variable");
        assert_eq!(le32(&raw, NCASES_OFFSET as usize), -1, "ncases placeholder");
        assert_eq!(lef64(&raw, 84), 100.0, "bias");
        assert_eq!(&raw[92..101], b"01 May 16");
        assert_eq!(&raw[101..109], b"12:34:56");
        assert!(raw[109..173].starts_with(b"xml2sav test file"));
        assert_eq!(&raw[173..176], &[0, 0, 0]);
    }

    #[test]
    fn variable_records() {
        let dictionary = dictionary([
            numeric("x"),
            string("a", 1),
            string("b", 8),
            string("c", 15),
            string("d", 255),
            string("e", 256),
        ]);
        let raw = write_metadata(&dictionary);

        let mut expected = vec![0, 1, 8, 15, -1];
        expected.push(255);
        expected.extend(std::iter::repeat(-1).take(31));
        expected.push(255);
        expected.extend(std::iter::repeat(-1).take(31));
        expected.push(4);

        let mut offset = 176;
        let mut widths = Vec::new();
        while le32(&raw, offset) == 2 {
            widths.push(le32(&raw, offset + 4));
            offset += 36;
        }
        assert_eq!(widths, expected);
    }

    #[test]
    fn variable_record_formats() {
        let dictionary = dictionary([numeric("x"), string("s", 12)]);
        let raw = write_metadata(&dictionary);

        // Numeric: F format, print width 8, 2 decimals.
        assert_eq!(le32(&raw, 176 + 16), (5 << 16) | (8 << 8) | 2);
        assert_eq!(le32(&raw, 176 + 20), le32(&raw, 176 + 16));
        // String: A format with the declared width.
        assert_eq!(le32(&raw, 176 + 36 + 16), (1 << 16) | (12 << 8));
    }

    #[test]
    fn variable_label_padding() {
        let mut variable = numeric("x");
        variable.label = Some(String::from("Years"));
        let raw = write_metadata(&dictionary([variable]));

        // The label follows the first variable record: length, text, then
        // NUL padding to a 4-byte boundary.
        assert_eq!(le32(&raw, 212), 5);
        assert_eq!(&raw[216..221], b"Years");
        assert_eq!(&raw[221..224], &[0, 0, 0]);
        assert_eq!(le32(&raw, 176 + 8), 1, "has_variable_label");
    }

    #[test]
    fn short_value_labels() {
        let mut sex = string("sex", 1);
        sex.value_labels = vec![
            Label {
                value: String::from("M"),
                desc: String::from("Male"),
            },
            Label {
                value: String::from("F"),
                desc: String::from("Female"),
            },
        ];
        let dictionary = dictionary([numeric("x"), sex]);
        let raw = write_metadata(&dictionary);

        let offset = 176 + 2 * 36;
        assert_eq!(le32(&raw, offset), 3, "value label record");
        assert_eq!(le32(&raw, offset + 4), 2, "two labels");
        assert_eq!(&raw[offset + 8..offset + 16], b"M       ");
        assert_eq!(raw[offset + 16], 4);
        assert_eq!(&raw[offset + 17..offset + 21], b"Male");
        assert_eq!(&raw[offset + 21..offset + 24], b"   ");
        assert_eq!(&raw[offset + 24..offset + 32], b"F       ");
        assert_eq!(raw[offset + 32], 6);
        assert_eq!(&raw[offset + 33..offset + 39], b"Female");
        assert_eq!(raw[offset + 39], b' ');
        assert_eq!(le32(&raw, offset + 40), 4, "variable record");
        assert_eq!(le32(&raw, offset + 44), 1, "one variable");
        assert_eq!(le32(&raw, offset + 48), 2, "index of sex");
    }

    #[test]
    fn numeric_value_labels() {
        let mut x = numeric("x");
        x.value_labels = vec![Label {
            value: String::from("1.5"),
            desc: String::from("一half"),
        }];
        let raw = write_metadata(&dictionary([x]));

        let offset = 176 + 36;
        assert_eq!(le32(&raw, offset), 3);
        assert_eq!(lef64(&raw, offset + 8), 1.5);
        // The description is 7 bytes of UTF-8; 1 + 7 fills a block exactly.
        assert_eq!(raw[offset + 16], 7);
        assert_eq!(&raw[offset + 17..offset + 24], "一half".as_bytes());
        assert_eq!(le32(&raw, offset + 24), 4);
    }

    #[test]
    fn value_label_description_clamp() {
        let mut x = numeric("x");
        x.value_labels = vec![Label {
            value: String::from("1"),
            desc: "d".repeat(121),
        }];
        let raw = write_metadata(&dictionary([x]));

        let offset = 176 + 36;
        assert_eq!(raw[offset + 16], 120);
        assert_eq!(&raw[offset + 17..offset + 137], "d".repeat(120).as_bytes());
        assert_eq!(&raw[offset + 137..offset + 144], b"       ");
        assert_eq!(le32(&raw, offset + 144), 4);
    }

    #[test]
    fn invalid_numeric_label_value_is_fatal() {
        let mut x = numeric("x");
        x.value_labels = vec![Label {
            value: String::from("not a number"),
            desc: String::from("oops"),
        }];
        let dictionary = dictionary([x]);
        let result = WriteOptions::reproducible().write_writer(&dictionary, Cursor::new(Vec::new()));
        assert!(matches!(
            result,
            Err(super::Error::InvalidLabelValue { .. })
        ));
    }

    #[test]
    fn display_parameters() {
        let mut scale = numeric("x");
        scale.measure = Measure::Scale;
        let dictionary = dictionary([scale, string("s", 100), string("v", 300)]);
        let raw = write_metadata(&dictionary);

        let offset = find_subrecord(&raw, 11).unwrap();
        assert_eq!(le32(&raw, offset), 4, "element size");
        assert_eq!(le32(&raw, offset + 4), 4 * 3, "three ints per segment");
        let ints = (0..12)
            .map(|i| le32(&raw, offset + 8 + 4 * i))
            .collect::<Vec<_>>();
        assert_eq!(
            ints,
            vec![
                3, 8, 1, // numeric, scale, right-aligned
                1, 40, 0, // string, width capped at 40
                1, 40, 0, // first segment of the very long string
                1, 8, 0, // later segments always display as width 8
            ]
        );
    }

    #[test]
    fn long_variable_names() {
        let dictionary = dictionary([numeric("x"), numeric("Very_Long_Name")]);
        let raw = write_metadata(&dictionary);

        let offset = find_subrecord(&raw, 13).unwrap();
        assert_eq!(le32(&raw, offset), 1, "element size");
        let len = le32(&raw, offset + 4) as usize;
        assert_eq!(
            &raw[offset + 8..offset + 8 + len],
            b"X=x\tVERY_LON=Very_Long_Name"
        );
    }

    #[test]
    fn very_long_string_record() {
        let raw = write_metadata(&dictionary([string("v", 500), string("s", 255)]));

        let offset = find_subrecord(&raw, 14).unwrap();
        let len = le32(&raw, offset + 4) as usize;
        assert_eq!(
            &raw[offset + 8..offset + 8 + len],
            b"V       =500\x00\x00\x00\t"
        );

        let raw = write_metadata(&dictionary([string("s", 255)]));
        assert_eq!(find_subrecord(&raw, 14), None);
    }

    #[test]
    fn encoding_record() {
        let raw = write_metadata(&dictionary([numeric("x")]));
        let offset = find_subrecord(&raw, 20).unwrap();
        assert_eq!(le32(&raw, offset), 1);
        assert_eq!(le32(&raw, offset + 4), 5);
        assert_eq!(&raw[offset + 8..offset + 13], b"UTF-8");
    }

    #[test]
    fn long_string_value_labels() {
        let mut city = string("city", 20);
        city.value_labels = vec![Label {
            value: String::from("AMS"),
            desc: String::from("Amsterdam"),
        }];
        let raw = write_metadata(&dictionary([city]));

        let offset = find_subrecord(&raw, 21).unwrap();
        let len = le32(&raw, offset + 4) as usize;
        let mut expected = Vec::new();
        expected.extend_from_slice(&4i32.to_le_bytes());
        expected.extend_from_slice(b"CITY");
        expected.extend_from_slice(&20i32.to_le_bytes());
        expected.extend_from_slice(&1i32.to_le_bytes());
        expected.extend_from_slice(&3i32.to_le_bytes());
        expected.extend_from_slice(b"AMS");
        expected.extend_from_slice(&9i32.to_le_bytes());
        expected.extend_from_slice(b"Amsterdam");
        assert_eq!(&raw[offset + 8..offset + 8 + len], expected.as_slice());

        // Short-string labels don't appear in a subtype-21 record.
        let mut sex = string("sex", 1);
        sex.value_labels = vec![Label {
            value: String::from("M"),
            desc: String::from("Male"),
        }];
        let raw = write_metadata(&dictionary([sex]));
        assert_eq!(find_subrecord(&raw, 21), None);
    }

    #[test]
    fn termination_record() {
        let raw = write_metadata(&dictionary([numeric("x")]));
        assert_eq!(le32(&raw, raw.len() - 8), 999);
        assert_eq!(le32(&raw, raw.len() - 4), 0);
    }

    #[test]
    fn numeric_cases_and_ncases_patch() {
        let dictionary = dictionary([numeric("x")]);
        let mut writer = WriteOptions::reproducible()
            .write_writer(&dictionary, Cursor::new(Vec::new()))
            .unwrap();
        let mut warn = |_: Warning| panic!("unexpected warning");

        let mut case = Case::new(&dictionary);
        case.set(0, String::from("1.5"));
        writer.write_case(&dictionary, &case, &mut warn).unwrap();
        case.clear();
        case.set(0, String::from("2.5"));
        writer.write_case(&dictionary, &case, &mut warn).unwrap();
        case.clear();
        writer.write_case(&dictionary, &case, &mut warn).unwrap();

        let raw = writer.finish().unwrap().unwrap().into_inner();
        assert_eq!(le32(&raw, NCASES_OFFSET as usize), 3);
        let cases = raw.len() - 24;
        assert_eq!(lef64(&raw, cases), 1.5);
        assert_eq!(lef64(&raw, cases + 8), 2.5);
        assert_eq!(lef64(&raw, cases + 16), SYSMIS);
    }

    #[test]
    fn string_case_segments() {
        let dictionary = dictionary([string("v", 500)]);
        let mut writer = WriteOptions::reproducible()
            .write_writer(&dictionary, Cursor::new(Vec::new()))
            .unwrap();

        let mut case = Case::new(&dictionary);
        case.set(0, "x".repeat(500));
        writer
            .write_case(&dictionary, &case, &mut |_| panic!())
            .unwrap();

        let raw = writer.finish().unwrap().unwrap().into_inner();
        let start = raw.len() - 504;
        // First segment: 255 data bytes padded to 32 slots.
        assert_eq!(&raw[start..start + 255], "x".repeat(255).as_bytes());
        assert_eq!(raw[start + 255], b' ');
        // Second segment: the remaining 245 bytes padded to 31 slots.
        assert_eq!(
            &raw[start + 256..start + 256 + 245],
            "x".repeat(245).as_bytes()
        );
        assert_eq!(&raw[start + 501..], b"   ");
    }

    #[test]
    fn string_truncation_warns() {
        let dictionary = dictionary([string("s", 4)]);
        let mut writer = WriteOptions::reproducible()
            .write_writer(&dictionary, Cursor::new(Vec::new()))
            .unwrap();

        let mut warnings = Vec::new();
        let mut case = Case::new(&dictionary);
        case.set(0, String::from("abcdef"));
        writer
            .write_case(&dictionary, &case, &mut |warning| warnings.push(warning))
            .unwrap();

        assert!(matches!(
            warnings.as_slice(),
            [Warning::TruncatedString { width: 4, .. }]
        ));
        let raw = writer.finish().unwrap().unwrap().into_inner();
        assert_eq!(&raw[raw.len() - 8..], b"abcd    ");
    }

    #[test]
    fn missing_and_default_values() {
        let mut fallback = numeric("d");
        fallback.default = Some(String::from("7"));
        let dictionary = dictionary([string("s", 10), fallback]);
        let mut writer = WriteOptions::reproducible()
            .write_writer(&dictionary, Cursor::new(Vec::new()))
            .unwrap();

        let case = Case::new(&dictionary);
        writer
            .write_case(&dictionary, &case, &mut |_| panic!())
            .unwrap();

        let raw = writer.finish().unwrap().unwrap().into_inner();
        let start = raw.len() - 24;
        assert_eq!(&raw[start..start + 16], " ".repeat(16).as_bytes());
        assert_eq!(lef64(&raw, start + 16), 7.0);
    }

    #[test]
    fn bad_values_warn_and_write_sysmis() {
        let date = Variable::new(Identifier::clean("d"), VarWidth::Numeric, Format::Date);
        let dictionary = dictionary([numeric("x"), date]);
        let mut writer = WriteOptions::reproducible()
            .write_writer(&dictionary, Cursor::new(Vec::new()))
            .unwrap();

        let mut warnings = Vec::new();
        let mut case = Case::new(&dictionary);
        case.set(0, String::from("four"));
        case.set(1, String::from("garbage"));
        writer
            .write_case(&dictionary, &case, &mut |warning| warnings.push(warning))
            .unwrap();

        // Empty values are missing without a warning.
        case.clear();
        case.set(0, String::new());
        case.set(1, String::new());
        writer
            .write_case(&dictionary, &case, &mut |warning| warnings.push(warning))
            .unwrap();

        assert!(matches!(
            warnings.as_slice(),
            [Warning::InvalidNumber { .. }, Warning::InvalidDate { .. }]
        ));
        let raw = writer.finish().unwrap().unwrap().into_inner();
        let start = raw.len() - 32;
        for field in 0..4 {
            assert_eq!(lef64(&raw, start + 8 * field), SYSMIS);
        }
    }

    #[test]
    fn date_case_values() {
        let date = Variable::new(Identifier::clean("d"), VarWidth::Numeric, Format::Date);
        let stamp = Variable::new(Identifier::clean("t"), VarWidth::Numeric, Format::DateTime);
        let dictionary = dictionary([date, stamp]);
        let mut writer = WriteOptions::reproducible()
            .write_writer(&dictionary, Cursor::new(Vec::new()))
            .unwrap();

        let mut case = Case::new(&dictionary);
        case.set(0, String::from("2-Jan-2006"));
        case.set(1, String::from("2-Jan-2006 15:04:05"));
        writer
            .write_case(&dictionary, &case, &mut |_| panic!())
            .unwrap();

        let raw = writer.finish().unwrap().unwrap().into_inner();
        let start = raw.len() - 16;
        assert_eq!(lef64(&raw, start), 13355539200.0);
        assert_eq!(lef64(&raw, start + 8), 13355593445.0);
    }
}
