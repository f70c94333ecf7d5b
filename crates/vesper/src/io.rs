//! Output abstraction for the `show:` statement.
//!
//! Embedders implement [`PrintWriter`] to capture or redirect program
//! output; the interpreter never touches stdout directly.

use std::io::Write as _;

/// Sink for `show:` output.
pub trait PrintWriter {
    /// Writes one rendered value, without a trailing newline.
    fn write(&mut self, text: &str);

    /// Terminates the current `show:` line.
    fn newline(&mut self);
}

/// Default writer: stdout.
#[derive(Debug, Default)]
pub struct StdPrint;

impl PrintWriter for StdPrint {
    fn write(&mut self, text: &str) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(text.as_bytes());
    }

    fn newline(&mut self) {
        let mut stdout = std::io::stdout().lock();
        let _ = stdout.write_all(b"\n");
        let _ = stdout.flush();
    }
}

/// Collects all output into a string; useful for tests and embedding.
#[derive(Debug, Default)]
pub struct CollectStringPrint(String);

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl PrintWriter for CollectStringPrint {
    fn write(&mut self, text: &str) {
        self.0.push_str(text);
    }

    fn newline(&mut self) {
        self.0.push('\n');
    }
}

/// Discards all output.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn write(&mut self, _text: &str) {}

    fn newline(&mut self) {}
}
