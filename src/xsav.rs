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

//! The XML event driver.
//!
//! [parse_xsav] pulls events out of the input document and sequences the
//! encoder: `<sav>` opens an output file, `</dict>` seals the dictionary
//! and writes the metadata records, each `</case>` appends one case
//! record, and `</sav>` back-patches the case count and closes the file.
//!
//! Elements that are not part of the schema are ignored, so a document may
//! carry its own annotations.

use std::{
    io::{self, Seek, Write},
    path::{Path, PathBuf},
    str::{FromStr, Utf8Error},
};

use quick_xml::{
    events::{attributes::AttrError, BytesStart, Event},
    Reader,
};
use thiserror::Error as ThisError;

use crate::{
    dictionary::{AddVarError, Case, Dictionary, Format, Label, Measure, VarWidth, Variable},
    identifier::Identifier,
    lengths::{LookupError, StringWidths},
    settings::Settings,
    sys::write::{self, WriteOptions, Writer},
};

/// A fatal conversion error.  The run stops and the current dataset is
/// abandoned.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Attr(#[from] AttrError),

    #[error(transparent)]
    Utf8(#[from] Utf8Error),

    #[error("Can not create output file: {0}")]
    Create(#[from] io::Error),

    #[error(transparent)]
    Write(#[from] write::Error),

    #[error(transparent)]
    AddVar(#[from] AddVarError),

    #[error(transparent)]
    UnsizedVariable(#[from] LookupError),

    #[error("<{element}> element does not have a {attribute} attribute.")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },

    #[error("Invalid {attribute} attribute {value:?} on <{element}>.")]
    InvalidAttribute {
        element: &'static str,
        attribute: &'static str,
        value: String,
    },

    #[error("Unknown value for measure {0:?}.")]
    UnknownMeasure(String),

    #[error("<{0}> element without knowing to which sav file it belongs.")]
    OutsideDataset(&'static str),

    #[error("Adding variable {0:?} while the dictionary is already finished.")]
    VariableAfterDict(String),

    #[error("<{0}> element before the dictionary is finished.")]
    BeforeDict(&'static str),

    #[error("Duplicate <dict> element in sav section {0}.")]
    DuplicateDict(String),

    #[error("Can not find the variable named {0}.")]
    UnknownVariable(String),
}

/// A non-fatal conversion problem, reported through the diagnostic sink.
#[derive(Debug, ThisError)]
pub enum Warning {
    #[error("Change variable name {from:?} to {to}.")]
    NameChanged { from: String, to: Identifier },

    #[error("Dropped value for unknown variable {0}.")]
    UnknownVariable(String),

    #[error(transparent)]
    Case(#[from] write::Warning),
}

/// Converts the XML document from `reader`, writing one system file per
/// `<sav>` element.
///
/// `input` is the input file's path; each dataset `S` is written to
/// `<input minus extension>_<S>.sav`, obtained from `open`, which may
/// substitute any seekable sink (tests use in-memory buffers).  `widths`
/// carries the result of the discovery pass, or `None` in single-pass mode.
/// Non-fatal problems are reported to `warn`.
pub fn parse_xsav<R, W, F, G>(
    reader: R,
    input: &Path,
    widths: Option<&StringWidths>,
    settings: &Settings,
    mut open: F,
    mut warn: G,
) -> Result<(), Error>
where
    R: io::BufRead,
    W: Write + Seek,
    F: FnMut(&Path) -> io::Result<W>,
    G: FnMut(Warning),
{
    let mut reader = Reader::from_reader(reader);
    let mut buf = Vec::new();
    let mut driver = Driver {
        input,
        widths,
        settings,
        dataset: None,
        variable: None,
        val_name: None,
        text: None,
    };

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => driver.start(&e, &mut open)?,
            Event::Empty(e) => {
                driver.start(&e, &mut open)?;
                driver.end(e.name().as_ref(), &mut warn)?;
            }
            Event::Text(e) => driver.text(&e.unescape().map_err(quick_xml::Error::from)?),
            Event::CData(e) => driver.text(std::str::from_utf8(&e)?),
            Event::End(e) => driver.end(e.name().as_ref(), &mut warn)?,
            Event::Eof => break,
            _ => (),
        }
        buf.clear();
    }
    Ok(())
}

/// Per-dataset state: everything owned by one `<sav>` region.  Dropped as
/// a whole at `</sav>`, which closes the output file.
struct DatasetState<W>
where
    W: Write + Seek,
{
    name: String,
    dictionary: Dictionary,
    /// The output sink, until the dictionary is sealed.
    sink: Option<W>,
    /// The case writer, after the dictionary is sealed.
    writer: Option<Writer<W>>,
    case: Option<Case>,
}

/// A `<var>` element being assembled, attributes still in textual form.
struct VarBuilder {
    name: String,
    kind: String,
    width: Option<String>,
    decimals: Option<String>,
    measure: Option<String>,
    label: Option<String>,
    default: Option<String>,
    labels: Vec<Label>,
    /// The `value` attribute of a pending nested `<label>`.
    label_value: Option<String>,
}

struct Driver<'a, W>
where
    W: Write + Seek,
{
    input: &'a Path,
    widths: Option<&'a StringWidths>,
    settings: &'a Settings,
    dataset: Option<DatasetState<W>>,
    variable: Option<VarBuilder>,
    /// The `name` attribute of a pending `<val>`.
    val_name: Option<String>,
    /// Character data accumulated for a pending `<val>` or `<label>`.
    text: Option<String>,
}

impl<'a, W> Driver<'a, W>
where
    W: Write + Seek,
{
    fn start(
        &mut self,
        e: &BytesStart,
        open: &mut impl FnMut(&Path) -> io::Result<W>,
    ) -> Result<(), Error> {
        match e.name().as_ref() {
            b"sav" => {
                let name = required_attribute(e, "sav", "name")?;
                let path = output_path(self.input, &name);
                let sink = open(&path)?;
                self.dataset = Some(DatasetState {
                    name,
                    dictionary: Dictionary::new(self.settings.max_string_length),
                    sink: Some(sink),
                    writer: None,
                    case: None,
                });
            }
            b"var" => {
                let Some(dataset) = &self.dataset else {
                    return Err(Error::OutsideDataset("var"));
                };
                if dataset.writer.is_some() {
                    return Err(Error::VariableAfterDict(required_attribute(
                        e, "var", "name",
                    )?));
                }
                self.variable = Some(VarBuilder {
                    name: required_attribute(e, "var", "name")?,
                    kind: optional_attribute(e, "type")?.unwrap_or_default(),
                    width: optional_attribute(e, "width")?,
                    decimals: optional_attribute(e, "decimals")?,
                    measure: optional_attribute(e, "measure")?,
                    label: optional_attribute(e, "label")?,
                    default: optional_attribute(e, "default")?,
                    labels: Vec::new(),
                    label_value: None,
                });
            }
            b"label" => {
                if let Some(variable) = &mut self.variable {
                    variable.label_value =
                        Some(optional_attribute(e, "value")?.unwrap_or_default());
                    self.text = Some(String::new());
                }
            }
            b"case" => {
                let dataset = self
                    .dataset
                    .as_mut()
                    .ok_or(Error::OutsideDataset("case"))?;
                let case = dataset.case.as_mut().ok_or(Error::BeforeDict("case"))?;
                case.clear();
            }
            b"val" => {
                let dataset = self.dataset.as_ref().ok_or(Error::OutsideDataset("val"))?;
                if dataset.case.is_none() {
                    return Err(Error::BeforeDict("val"));
                }
                self.val_name = Some(required_attribute(e, "val", "name")?);
                self.text = Some(String::new());
            }
            _ => (),
        }
        Ok(())
    }

    fn text(&mut self, s: &str) {
        if let Some(text) = &mut self.text {
            text.push_str(s);
        }
    }

    fn end(&mut self, name: &[u8], warn: &mut impl FnMut(Warning)) -> Result<(), Error> {
        match name {
            b"label" => {
                if let Some(variable) = &mut self.variable {
                    if let Some(value) = variable.label_value.take() {
                        let desc = self.text.take().unwrap_or_default();
                        variable.labels.push(Label { value, desc });
                    }
                }
            }
            b"var" => {
                let Some(builder) = self.variable.take() else {
                    return Ok(());
                };
                let dataset = self.dataset.as_mut().ok_or(Error::OutsideDataset("var"))?;
                let variable = builder.build(&dataset.name, self.widths, self.settings, warn)?;
                dataset.dictionary.add_var(variable)?;
            }
            b"dict" => {
                let Some(dataset) = &mut self.dataset else {
                    return Ok(());
                };
                let Some(sink) = dataset.sink.take() else {
                    return Err(Error::DuplicateDict(dataset.name.clone()));
                };
                let writer = WriteOptions::new()
                    .with_file_label(format!("Export with xml2sav: {}", self.input.display()))
                    .with_max_print_string_width(self.settings.max_print_string_width)
                    .write_writer(&dataset.dictionary, sink)?;
                dataset.writer = Some(writer);
                dataset.case = Some(Case::new(&dataset.dictionary));
            }
            b"val" => {
                let Some(name) = self.val_name.take() else {
                    return Ok(());
                };
                let body = self.text.take().unwrap_or_default();
                let Some(dataset) = &mut self.dataset else {
                    return Ok(());
                };
                match dataset.dictionary.get_index_of(&name) {
                    Some(index) => {
                        if let Some(case) = &mut dataset.case {
                            case.set(index, body);
                        }
                    }
                    None if self.settings.ignore_missing_var => {
                        warn(Warning::UnknownVariable(name))
                    }
                    None => return Err(Error::UnknownVariable(name)),
                }
            }
            b"case" => {
                if let Some(DatasetState {
                    dictionary,
                    writer: Some(writer),
                    case: Some(case),
                    ..
                }) = &mut self.dataset
                {
                    writer
                        .write_case(dictionary, case, &mut |warning| {
                            warn(Warning::Case(warning))
                        })
                        .map_err(write::Error::from)?;
                }
            }
            b"sav" => {
                if let Some(mut dataset) = self.dataset.take() {
                    if let Some(writer) = dataset.writer.take() {
                        writer.finish().map_err(write::Error::from)?;
                    }
                }
            }
            _ => (),
        }
        Ok(())
    }
}

impl VarBuilder {
    fn build(
        self,
        dataset: &str,
        widths: Option<&StringWidths>,
        settings: &Settings,
        warn: &mut impl FnMut(Warning),
    ) -> Result<Variable, Error> {
        let name = Identifier::clean(&self.name);
        if name.as_str() != self.name {
            warn(Warning::NameChanged {
                from: self.name.clone(),
                to: name.clone(),
            });
        }

        let mut variable = match self.kind.as_str() {
            "numeric" => {
                let mut variable = Variable::new(name, VarWidth::Numeric, Format::F);
                variable.print_width =
                    parse_attribute("var", "width", self.width)?.unwrap_or(8);
                variable.decimals =
                    parse_attribute("var", "decimals", self.decimals)?.unwrap_or(2);
                variable
            }
            "date" => {
                let mut variable = Variable::new(name, VarWidth::Numeric, Format::Date);
                variable.print_width = 11;
                variable.measure = Measure::Scale;
                variable
            }
            "datetime" => {
                let mut variable = Variable::new(name, VarWidth::Numeric, Format::DateTime);
                variable.print_width = 20;
                variable.measure = Measure::Scale;
                variable
            }
            // Anything else is a string.
            _ => {
                let width = match parse_attribute::<u32>("var", "width", self.width)? {
                    Some(width) => width,
                    None => match widths {
                        Some(widths) => widths.get(dataset, &self.name)? as u32,
                        None => settings.default_string_length,
                    },
                };
                // A variable whose observed values are all empty still
                // needs one byte of storage.
                let width = width.max(1);
                let mut variable = Variable::new(name, VarWidth::String(width), Format::A);
                variable.print_width =
                    width.min(settings.max_print_string_width).min(255) as u8;
                variable
            }
        };

        if let Some(measure) = &self.measure {
            variable.measure = match measure.as_str() {
                "scale" => Measure::Scale,
                "nominal" => Measure::Nominal,
                "ordinal" => Measure::Ordinal,
                _ => return Err(Error::UnknownMeasure(measure.clone())),
            };
        }
        variable.label = self.label.filter(|label| !label.is_empty());
        variable.default = self.default;
        variable.value_labels = self.labels;
        Ok(variable)
    }
}

fn output_path(input: &Path, dataset: &str) -> PathBuf {
    PathBuf::from(format!(
        "{}_{dataset}.sav",
        input.with_extension("").display()
    ))
}

fn optional_attribute(
    element: &BytesStart,
    attribute: &'static str,
) -> Result<Option<String>, Error> {
    match element.try_get_attribute(attribute)? {
        Some(value) => Ok(Some(
            value
                .unescape_value()
                .map_err(quick_xml::Error::from)?
                .into_owned(),
        )),
        None => Ok(None),
    }
}

fn required_attribute(
    element: &BytesStart,
    name: &'static str,
    attribute: &'static str,
) -> Result<String, Error> {
    optional_attribute(element, attribute)?.ok_or(Error::MissingAttribute {
        element: name,
        attribute,
    })
}

fn parse_attribute<T>(
    element: &'static str,
    attribute: &'static str,
    value: Option<String>,
) -> Result<Option<T>, Error>
where
    T: FromStr,
{
    match value {
        None => Ok(None),
        Some(value) => match value.parse() {
            Ok(parsed) => Ok(Some(parsed)),
            Err(_) => Err(Error::InvalidAttribute {
                element,
                attribute,
                value,
            }),
        },
    }
}
