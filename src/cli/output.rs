use std::io::{self, Write};

/// Result of writing to an output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputStatus {
    /// Write completed.
    Written,
    /// Stream was closed by the reader, e.g. `cryptainer list | head -1`.
    BrokenPipe,
}

fn write_text(handle: &mut impl Write, text: &str, newline: bool) -> io::Result<OutputStatus> {
    let result = handle
        .write_all(text.as_bytes())
        .and_then(|_| if newline { handle.write_all(b"\n") } else { Ok(()) })
        .and_then(|_| handle.flush());
    match result {
        Ok(()) => Ok(OutputStatus::Written),
        Err(error) if error.kind() == io::ErrorKind::BrokenPipe => Ok(OutputStatus::BrokenPipe),
        Err(error) => Err(error),
    }
}

/// Writes text and a newline to stdout.
pub(crate) fn stdout_line(text: &str) -> io::Result<OutputStatus> {
    write_text(&mut io::stdout().lock(), text, true)
}

/// Writes text and a newline to stderr.
pub(crate) fn stderr_line(text: &str) -> io::Result<OutputStatus> {
    write_text(&mut io::stderr().lock(), text, true)
}

/// Writes a prompt to stderr without a trailing newline.
pub(crate) fn stderr_prompt(text: &str) -> io::Result<OutputStatus> {
    write_text(&mut io::stderr().lock(), text, false)
}
