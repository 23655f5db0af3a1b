//! Command-line parsing with write-permission annotations.
//!
//! A command line is split on unquoted spaces. Double quotes group words and
//! are removed from the resulting argument. Two annotations grant write
//! access to a path for the duration of the command:
//!
//! - `+path`: the path is granted and the word is dropped, so the program
//!   never sees it.
//! - `<path>`: the path is granted and passed to the program without the
//!   angle brackets. `<>` grants nothing and passes an empty argument.
//!
//! Annotations are recognized on the word as typed, so a quoted `"+x"` is the
//! plain argument `+x`.

use std::ffi::{CString, NulError};

/// The result of parsing one command line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedCommand {
    /// Arguments handed to the program, program name first
    pub argv: Vec<String>,
    /// Paths granted for writing, in the order they appeared
    pub write_grants: Vec<String>,
}

impl ParsedCommand {
    /// The program to run, if the line named one.
    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Returns true if there is nothing to run.
    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Arguments as C strings for `execvp`. The caller appends the null
    /// terminator of the pointer array.
    pub fn argv_cstrings(&self) -> Result<Vec<CString>, NulError> {
        self.argv.iter().map(|a| CString::new(a.as_str())).collect()
    }

    fn push(&mut self, word: Word) {
        if word.raw.starts_with('+') {
            let path = &word.value[1..];
            if path.is_empty() {
                tracing::debug!("empty write annotation ignored");
            } else {
                self.write_grants.push(path.to_string());
            }
            return;
        }

        if word.raw.starts_with('<') {
            if word.raw.len() >= 2 && word.raw.ends_with('>') {
                let path = &word.value[1..word.value.len() - 1];
                if !path.is_empty() {
                    self.write_grants.push(path.to_string());
                }
                self.argv.push(path.to_string());
                return;
            }
            tracing::debug!(word = %word.raw, "unterminated annotation treated as plain text");
        }

        self.argv.push(word.value);
    }
}

/// One word as typed (`raw`) and with quotes removed (`value`).
#[derive(Debug, Default)]
struct Word {
    raw: String,
    value: String,
}

/// Parse a command line into arguments and write grants.
///
/// A trailing newline is ignored. An unterminated quote extends to the end of
/// the line.
pub fn parse(line: &str) -> ParsedCommand {
    let line = line.strip_suffix('\n').unwrap_or(line);
    let line = line.strip_suffix('\r').unwrap_or(line);

    let mut parsed = ParsedCommand::default();
    for word in split_words(line) {
        parsed.push(word);
    }
    parsed
}

fn split_words(line: &str) -> Vec<Word> {
    let mut words = Vec::new();
    let mut current = Word::default();
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.raw.push(c);
            }
            ' ' | '\t' if !quoted => {
                if !current.raw.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            _ => {
                current.raw.push(c);
                current.value.push(c);
            }
        }
    }
    if !current.raw.is_empty() {
        words.push(current);
    }

    words
}
