//! Interactive entry of the pattern size.

use checkercal_core::PatternSpec;
use log::warn;
use std::io::{BufRead, Write};

#[derive(thiserror::Error, Debug)]
pub enum PromptError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("input ended before a valid pattern size was entered")]
    EndOfInput,
    #[error("no valid pattern size after {0} attempts")]
    TooManyAttempts(usize),
}

/// Ask for the inner-corner counts until a valid pair is entered.
///
/// Each attempt reads one line for the columns and one for the rows. Invalid
/// input is reported on `output` and the attempt starts over, at most
/// `max_attempts` times.
pub fn prompt_pattern<R, W>(
    input: &mut R,
    output: &mut W,
    max_attempts: usize,
) -> Result<PatternSpec, PromptError>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    for _ in 0..max_attempts {
        let cols = read_count(input, output, "inner corners per row (e.g. 9): ")?;
        let rows = read_count(input, output, "inner corners per column (e.g. 6): ")?;
        let (Some(cols), Some(rows)) = (cols, rows) else {
            writeln!(output, "please enter whole numbers")?;
            continue;
        };
        match PatternSpec::new(cols, rows) {
            Ok(pattern) => return Ok(pattern),
            Err(err) => {
                warn!("rejected pattern size: {err}");
                writeln!(output, "{err}")?;
            }
        }
    }
    Err(PromptError::TooManyAttempts(max_attempts))
}

fn read_count<R, W>(input: &mut R, output: &mut W, label: &str) -> Result<Option<u32>, PromptError>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    write!(output, "{label}")?;
    output.flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Err(PromptError::EndOfInput);
    }
    Ok(line.trim().parse().ok())
}
