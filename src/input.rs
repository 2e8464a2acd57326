use crate::errors::FixError;
use anyhow::Result;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

pub const MISSING_ARGUMENT_NOTICE: &str = "File path not provided as a command-line argument.";
pub const DROP_PROMPT: &str = "Drag & drop file here to enter file path: ";

/// Use the positional argument verbatim, otherwise ask for a path.
pub fn resolve_path<R, W>(
    arg: Option<PathBuf>,
    input: &mut R,
    output: &mut W,
) -> Result<PathBuf>
where
    R: BufRead,
    W: Write,
{
    if let Some(path) = arg {
        return Ok(path);
    }

    writeln!(output, "{MISSING_ARGUMENT_NOTICE}")?;
    loop {
        write!(output, "{DROP_PROMPT}")?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(FixError::EmptyInput.into());
        }
        let cleaned = clean_dropped_path(&line);
        if !cleaned.is_empty() {
            return Ok(PathBuf::from(cleaned));
        }
    }
}

/// Terminals escape spaces and quotes with backslashes when a file is
/// dropped onto them; strip those along with surrounding whitespace.
pub fn clean_dropped_path(raw: &str) -> String {
    raw.replace('\\', "").trim().to_string()
}

/// Base name used for the remote upload. Both separators are honoured so a
/// Windows path resolves the same way on every platform.
pub fn remote_file_name(path: &Path) -> Result<String, FixError> {
    let raw = path.to_string_lossy();
    raw.rsplit(['/', '\\'])
        .next()
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| FixError::NoFileName(raw.into_owned()))
}
