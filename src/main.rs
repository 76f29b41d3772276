/* xml2sav - converts XML dataset descriptions to SPSS system files.
 * Copyright (C) 2025 The xml2sav authors.
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>. */

use std::{
    cell::RefCell,
    fmt::Arguments,
    fs::File,
    io::{stdin, BufRead, BufReader, BufWriter, Seek, Write},
    path::PathBuf,
};

use anyhow::Result;
use clap::Parser;

use xml2sav::{lengths, settings::Settings, xsav::parse_xsav};

/// Converts a custom XML dataset description into SPSS system files, one
/// `.sav` file per `<sav>` element.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input `.xsav` document.
    input: PathBuf,

    /// Pause and wait for enter after finishing.
    #[arg(long)]
    pause: bool,

    /// Don't write diagnostics to a log file next to the input.
    #[arg(long = "nolog")]
    no_log: bool,

    /// Don't determine lengths of string variables; give unsized string
    /// variables the default width.
    #[arg(long = "single")]
    single_pass: bool,

    /// Ignore values in cases for variables that are not declared in the
    /// dictionary.
    #[arg(long = "ignore")]
    ignore_missing_var: bool,

    /// Width for string variables declared without one when scanning is
    /// disabled.
    #[arg(long, default_value_t = 2048)]
    default_string_length: u32,

    /// Maximum declared width of a string variable.
    #[arg(long, default_value_t = 50 * 1024)]
    max_string_length: u32,

    /// Display-width ceiling for string variables.
    #[arg(long, default_value_t = 40)]
    max_print_string_width: u32,
}

/// Writes diagnostics to stderr and, unless suppressed, to a log file.
struct Diagnostics {
    log: Option<File>,
}

impl Diagnostics {
    fn note(&mut self, message: Arguments) {
        eprintln!("{message}");
        if let Some(log) = &mut self.log {
            let _ = writeln!(log, "{message}");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings {
        single_pass: cli.single_pass,
        ignore_missing_var: cli.ignore_missing_var,
        default_string_length: cli.default_string_length,
        max_string_length: cli.max_string_length,
        max_print_string_width: cli.max_print_string_width,
    };

    let log = if cli.no_log {
        None
    } else {
        Some(File::create(cli.input.with_extension("log"))?)
    };
    let diagnostics = RefCell::new(Diagnostics { log });

    let mut input = BufReader::new(File::open(&cli.input)?);
    diagnostics
        .borrow_mut()
        .note(format_args!("Reading {}", cli.input.display()));

    let widths = if settings.single_pass {
        None
    } else {
        diagnostics
            .borrow_mut()
            .note(format_args!("Pass 1, determining maximum length of strings"));
        let widths = lengths::scan(&mut input)?;
        input.rewind()?;
        diagnostics
            .borrow_mut()
            .note(format_args!("Pass 2, generating sav files"));
        Some(widths)
    };

    parse_xsav(
        &mut input,
        &cli.input,
        widths.as_ref(),
        &settings,
        |path| {
            diagnostics
                .borrow_mut()
                .note(format_args!("Writing {}", path.display()));
            File::create(path).map(BufWriter::new)
        },
        |warning| {
            diagnostics
                .borrow_mut()
                .note(format_args!("warning: {warning}"))
        },
    )?;

    if cli.pause {
        println!("Press enter to continue.");
        let _ = stdin().lock().read_line(&mut String::new());
    }
    Ok(())
}
