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

//! The string-length discovery pass.
//!
//! Before generating any output, the converter previews the whole input
//! document once and records, per dataset, the maximum observed UTF-8 byte
//! length of every variable's values.  The second pass uses the resulting
//! [StringWidths] to size string variables that were declared without an
//! explicit width.

use std::{collections::HashMap, io::BufRead};

use quick_xml::{
    events::{attributes::AttrError, BytesStart, Event},
    Reader,
};
use thiserror::Error as ThisError;

/// Maximum observed value widths in bytes, keyed by dataset name, then by
/// variable name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringWidths(HashMap<String, HashMap<String, usize>>);

impl StringWidths {
    /// Looks up the maximum observed width for `variable` in `dataset`.
    ///
    /// A variable that never appeared in a `<val>` element has no entry,
    /// which the caller must treat as fatal unless the variable declares an
    /// explicit width.
    pub fn get(&self, dataset: &str, variable: &str) -> Result<usize, LookupError> {
        let widths = self
            .0
            .get(dataset)
            .ok_or_else(|| LookupError::UnknownDataset(dataset.into()))?;
        widths
            .get(variable)
            .copied()
            .ok_or_else(|| LookupError::UnknownVariable {
                dataset: dataset.into(),
                variable: variable.into(),
            })
    }
}

/// A failed [StringWidths] lookup.
#[derive(Clone, Debug, ThisError, PartialEq, Eq)]
pub enum LookupError {
    #[error("Can not find sav section with name {0}.")]
    UnknownDataset(String),

    #[error("Can not find variable {variable} in sav section {dataset}; no values were observed and no width is declared.")]
    UnknownVariable { dataset: String, variable: String },
}

/// A fatal error in the discovery pass.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Attr(#[from] AttrError),

    #[error("<{element}> element does not have a {attribute} attribute.")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
}

fn name_attribute(element: &BytesStart, element_name: &'static str) -> Result<String, Error> {
    match element.try_get_attribute("name")? {
        Some(attribute) => Ok(attribute
            .unescape_value()
            .map_err(quick_xml::Error::from)?
            .into_owned()),
        None => Err(Error::MissingAttribute {
            element: element_name,
            attribute: "name",
        }),
    }
}

/// Scans the XML stream once and returns the maximum observed width of
/// every value, per dataset and variable.  Elements other than `<sav>` and
/// `<val>` are not interpreted here.
pub fn scan<R>(reader: R) -> Result<StringWidths, Error>
where
    R: BufRead,
{
    let mut reader = Reader::from_reader(reader);
    let mut buf = Vec::new();
    let mut widths = StringWidths::default();
    let mut dataset: Option<(String, HashMap<String, usize>)> = None;
    let mut value: Option<(String, usize)> = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => match e.name().as_ref() {
                b"sav" => dataset = Some((name_attribute(&e, "sav")?, HashMap::new())),
                b"val" if dataset.is_some() => value = Some((name_attribute(&e, "val")?, 0)),
                _ => (),
            },
            Event::Empty(e) => match e.name().as_ref() {
                b"sav" => {
                    let name = name_attribute(&e, "sav")?;
                    widths.0.insert(name, HashMap::new());
                }
                b"val" => {
                    if let Some((_, observed)) = &mut dataset {
                        record(observed, name_attribute(&e, "val")?, 0);
                    }
                }
                _ => (),
            },
            Event::Text(e) => {
                if let Some((_, len)) = &mut value {
                    *len += e.unescape().map_err(quick_xml::Error::from)?.len();
                }
            }
            Event::CData(e) => {
                if let Some((_, len)) = &mut value {
                    *len += e.len();
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"val" => {
                    if let (Some((_, observed)), Some((name, len))) = (&mut dataset, value.take()) {
                        record(observed, name, len);
                    }
                }
                b"sav" => {
                    if let Some((name, observed)) = dataset.take() {
                        widths.0.insert(name, observed);
                    }
                }
                _ => (),
            },
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }

    Ok(widths)
}

fn record(observed: &mut HashMap<String, usize>, name: String, len: usize) {
    let entry = observed.entry(name).or_insert(0);
    *entry = (*entry).max(len);
}

#[cfg(test)]
mod tests {
    use super::{scan, LookupError};

    const SAMPLE: &str = r#"<doc>
        <sav name="one">
            <dict><var type="string" name="s"/><var type="string" name="t"/></dict>
            <case><val name="s">short</val><val name="t"/></case>
            <case><val name="s">a much longer value</val></case>
        </sav>
        <sav name="two">
            <dict><var type="string" name="s"/></dict>
            <case><val name="s">xy</val></case>
        </sav>
    </doc>"#;

    #[test]
    fn observed_widths() {
        let widths = scan(SAMPLE.as_bytes()).unwrap();
        assert_eq!(widths.get("one", "s"), Ok(19));
        assert_eq!(widths.get("one", "t"), Ok(0));
        assert_eq!(widths.get("two", "s"), Ok(2));
    }

    #[test]
    fn lookups_fail_for_unseen_names() {
        let widths = scan(SAMPLE.as_bytes()).unwrap();
        assert_eq!(
            widths.get("three", "s"),
            Err(LookupError::UnknownDataset(String::from("three")))
        );
        assert_eq!(
            widths.get("one", "u"),
            Err(LookupError::UnknownVariable {
                dataset: String::from("one"),
                variable: String::from("u"),
            })
        );
    }

    #[test]
    fn widths_measure_utf8_bytes() {
        let widths = scan(
            r#"<sav name="s"><case><val name="v">héllo</val></case></sav>"#.as_bytes(),
        )
        .unwrap();
        assert_eq!(widths.get("s", "v"), Ok(6));
    }

    #[test]
    fn entities_count_unescaped() {
        let widths =
            scan(r#"<sav name="s"><case><val name="v">a&lt;b</val></case></sav>"#.as_bytes())
                .unwrap();
        assert_eq!(widths.get("s", "v"), Ok(3));
    }

    #[test]
    fn scanning_twice_is_identical() {
        assert_eq!(
            scan(SAMPLE.as_bytes()).unwrap(),
            scan(SAMPLE.as_bytes()).unwrap()
        );
    }

    #[test]
    fn missing_sav_name_is_fatal() {
        assert!(scan(r#"<sav><case/></sav>"#.as_bytes()).is_err());
    }
}
