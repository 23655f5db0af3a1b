//! Interactive consent: asking the user about one path and one mode.

use std::io::{self, Read, Write};

use crate::audit::Target;
use crate::permissions::AccessMode;

/// Outcome of one prompt cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsentDecision {
    /// Refuse this request
    Deny,
    /// Allow this request only
    AllowOnce,
    /// Allow, and grant the path for the rest of the invocation
    AllowAndRemember,
}

impl ConsentDecision {
    /// Interpret a typed answer: `y`, `n` or `r`, in either case.
    ///
    /// Returns `None` for anything else.
    pub fn from_response(line: &str) -> Option<Self> {
        match line.trim_start().chars().next()? {
            'y' | 'Y' => Some(ConsentDecision::AllowOnce),
            'n' | 'N' => Some(ConsentDecision::Deny),
            'r' | 'R' => Some(ConsentDecision::AllowAndRemember),
            _ => None,
        }
    }

    /// Returns true unless the decision is [`ConsentDecision::Deny`].
    pub fn is_allowed(self) -> bool {
        !matches!(self, ConsentDecision::Deny)
    }
}

/// A pending request for a single mode.
#[derive(Clone, Copy, Debug)]
pub struct ConsentRequest<'a> {
    /// Requested path
    pub path: &'a [u8],
    /// [`AccessMode::Read`] or [`AccessMode::Write`]
    pub mode: AccessMode,
    /// File or directory
    pub target: Target,
}

impl ConsentRequest<'_> {
    /// The question put to the user.
    pub fn question(&self) -> String {
        let path = String::from_utf8_lossy(self.path);
        match self.target {
            Target::File => format!("> pola request : {} access to {path} [N/y/r] ? ", self.mode),
            Target::Directory => format!("> pola request : access to {path} [N/y/r] ? "),
        }
    }
}

/// Something that can put a question to the user and read one answer.
pub trait Prompter {
    /// Show `question` and wait for one line. `Ok(None)` means end of input.
    fn ask(&mut self, question: &str) -> io::Result<Option<String>>;
}

impl<P: Prompter + ?Sized> Prompter for &mut P {
    fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        (**self).ask(question)
    }
}

impl<P: Prompter + ?Sized> Prompter for Box<P> {
    fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        (**self).ask(question)
    }
}

/// Prompts over a pair of byte streams, usually the terminal.
///
/// Input is read one byte at a time and never past the end of the answer,
/// so whatever follows stays available to the confined program.
#[derive(Debug)]
pub struct TerminalPrompter<R, W> {
    input: R,
    output: W,
}

impl<R, W> TerminalPrompter<R, W> {
    /// Create a prompter reading answers from `input` and writing questions
    /// to `output`.
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// Everything written so far.
    pub fn output(&self) -> &W {
        &self.output
    }

    /// Take the streams back.
    pub fn into_parts(self) -> (R, W) {
        (self.input, self.output)
    }
}

impl<R: Read, W: Write> Prompter for TerminalPrompter<R, W> {
    fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        self.output.write_all(question.as_bytes())?;
        self.output.flush()?;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.input.read(&mut byte) {
                Ok(0) if line.is_empty() => return Ok(None),
                Ok(0) => break,
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => line.push(byte[0]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

/// Drives the prompt for one request until a recognized answer arrives.
///
/// Unrecognized answers re-prompt, at most `max_attempts` times in total.
/// End of input, a read error or running out of attempts all deny.
#[derive(Clone, Copy, Debug)]
pub struct ConsentProtocol {
    max_attempts: u32,
}

impl Default for ConsentProtocol {
    fn default() -> Self {
        Self::new(3)
    }
}

impl ConsentProtocol {
    /// Create a protocol allowing `max_attempts` prompts per request (at least one).
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Prompts allowed per request.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Ask about `request` and return the user's decision.
    pub fn decide<P: Prompter + ?Sized>(
        &self,
        prompter: &mut P,
        request: &ConsentRequest<'_>,
    ) -> ConsentDecision {
        let question = request.question();

        for attempt in 1..=self.max_attempts {
            match prompter.ask(&question) {
                Ok(Some(answer)) => match ConsentDecision::from_response(&answer) {
                    Some(decision) => {
                        tracing::debug!(?decision, attempt, "consent answered");
                        return decision;
                    }
                    None => tracing::debug!(answer = %answer, attempt, "unrecognized consent input"),
                },
                Ok(None) => {
                    tracing::debug!("end of input while prompting, denying");
                    return ConsentDecision::Deny;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read consent answer, denying");
                    return ConsentDecision::Deny;
                }
            }
        }

        tracing::warn!(
            attempts = self.max_attempts,
            "no recognized consent answer, denying"
        );
        ConsentDecision::Deny
    }
}
