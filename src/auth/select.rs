use super::cache::CachedAccount;
use crate::errors::FixError;
use anyhow::Result;
use std::io::{BufRead, Write};

pub const PICK_ACCOUNT_PROMPT: &str = "Pick the account you want to use to proceed:";

/// Parse a numeric account selection, rejecting anything outside `0..count`.
pub fn parse_selection(input: &str, count: usize) -> Result<usize, FixError> {
    let trimmed = input.trim();
    trimmed
        .parse::<usize>()
        .ok()
        .filter(|index| *index < count)
        .ok_or_else(|| FixError::InvalidSelection {
            input: trimmed.to_string(),
            count,
        })
}

/// Resolve a preset `--account` value, matching an index or a username
/// (case-insensitively).
pub fn match_preset(preset: &str, accounts: &[CachedAccount]) -> Result<usize, FixError> {
    if let Some(index) = accounts
        .iter()
        .position(|account| account.username.eq_ignore_ascii_case(preset))
    {
        return Ok(index);
    }
    parse_selection(preset, accounts.len())
}

/// Print the numbered account list and read one selection.
pub fn choose_account<R, W>(
    accounts: &[CachedAccount],
    input: &mut R,
    output: &mut W,
) -> Result<usize>
where
    R: BufRead,
    W: Write,
{
    writeln!(output, "{PICK_ACCOUNT_PROMPT}")?;
    for (index, account) in accounts.iter().enumerate() {
        writeln!(output, "{index}. {}", account.username)?;
    }
    write!(output, "> ")?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(parse_selection(&line, accounts.len())?)
}
