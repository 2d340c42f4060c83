// file: src/cli/prompt.rs
// version: 1.0.0
// guid: 1a2b3c4d-5e6f-4a7b-8c9d-0e1f2a3b4c5d

//! Interactive prompts

use crate::config::validate_username;
use crate::error::{BootstrapError, Result};
use colored::Colorize;
use std::io::{BufRead, Write};

const MAX_ATTEMPTS: usize = 3;

/// Ask for the admin account name; an empty answer keeps `default`
pub fn prompt_admin_user<R: BufRead, W: Write>(input: &mut R, output: &mut W, default: &str) -> Result<String> {
    for _ in 0..MAX_ATTEMPTS {
        write!(
            output,
            "{} [{}]: ",
            "Administrative account name".bold(),
            default.cyan()
        )?;
        output.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(BootstrapError::invalid_argument(
                "no answer given for the admin account name",
            ));
        }

        let answer = match line.trim() {
            "" => default,
            name => name,
        };
        match validate_username(answer) {
            Ok(()) => return Ok(answer.to_string()),
            Err(e) => writeln!(output, "{} {}", "✗".red(), e)?,
        }
    }

    Err(BootstrapError::invalid_argument(format!(
        "no valid admin account name after {} attempts",
        MAX_ATTEMPTS
    )))
}

/// Yes/no confirmation, defaulting to no
pub fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> Result<bool> {
    write!(output, "{} [y/N]: ", question.yellow())?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}
