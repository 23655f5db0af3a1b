//! Raw descriptor streams for the consent prompt.
//!
//! The confined program owns the stdio buffers, so questions and answers go
//! straight through `read(2)`/`write(2)`.

use std::ffi::CStr;
use std::io::{self, Read, Write};
use std::os::fd::{IntoRawFd, RawFd};

use libc::c_int;
use pola::{FilesystemGateway, Prompter, RealGateway, TerminalPrompter};

/// An unowned file descriptor.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FdStream(pub(crate) RawFd);

impl Read for FdStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() bytes.
        let n = unsafe { libc::read(self.0, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }
}

impl Write for FdStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // SAFETY: buf is valid for buf.len() bytes.
        let n = unsafe { libc::write(self.0, buf.as_ptr().cast(), buf.len()) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(n as usize)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

type Prompt = TerminalPrompter<FdStream, FdStream>;

const TTY: &CStr = c"/dev/tty";

/// Prompts on the terminal, opened the first time a question is asked.
///
/// A process that never prompts never holds a descriptor for it. Once
/// opened, the terminal stays open for the life of the process.
#[derive(Debug)]
pub(crate) struct LazyTerminal {
    real: RealGateway,
    prompt: Option<Prompt>,
}

impl LazyTerminal {
    pub(crate) fn new(real: RealGateway) -> Self {
        Self { real, prompt: None }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.prompt.is_some()
    }
}

impl Prompter for LazyTerminal {
    fn ask(&mut self, question: &str) -> io::Result<Option<String>> {
        let Self { real, prompt } = self;
        prompt.get_or_insert_with(|| open_prompt(real)).ask(question)
    }
}

/// Prompt on the controlling terminal, or on stdin/stderr if there is none.
fn open_prompt(real: &mut RealGateway) -> Prompt {
    let flags: c_int = libc::O_RDWR | libc::O_NOCTTY | libc::O_CLOEXEC;
    match real.open(TTY, flags, 0) {
        Ok(tty) => {
            let fd = tty.into_raw_fd();
            TerminalPrompter::new(FdStream(fd), FdStream(fd))
        }
        Err(e) => {
            tracing::debug!(error = %e, "no controlling terminal, prompting on stdio");
            TerminalPrompter::new(FdStream(libc::STDIN_FILENO), FdStream(libc::STDERR_FILENO))
        }
    }
}
