//! Migration tool interface
//!
//! Operations are blocking and report status as text written to a caller-supplied
//! stream. Callers run them through
//! [`SessionProvider::run_sync`](crate::session::SessionProvider::run_sync).

use crate::error::MigrationError;
use crate::session::SyncConnection;
use std::io::{self, Write};
use std::path::Path;

/// Upgrade target naming the latest revision
pub const HEAD_TARGET: &str = "head";

pub trait MigrationTool: Send + Sync {
    /// Describe the head revision(s) declared by the migration scripts
    fn heads(&self, config: &Path, out: &mut dyn Write) -> Result<(), MigrationError>;

    /// Describe the revision currently applied to the database
    fn current(
        &self,
        config: &Path,
        conn: &mut dyn SyncConnection,
        out: &mut dyn Write,
    ) -> Result<(), MigrationError>;

    /// Apply pending scripts up to `target` (a revision id or [`HEAD_TARGET`])
    fn upgrade(
        &self,
        config: &Path,
        conn: &mut dyn SyncConnection,
        target: &str,
        out: &mut dyn Write,
    ) -> Result<(), MigrationError>;
}

/// Resettable text sink shared between consecutive tool calls
#[derive(Debug, Default)]
pub struct OutputBuffer {
    buf: Vec<u8>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return everything written so far and reset the buffer
    pub fn take_text(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        self.buf.clear();
        text
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

impl Write for OutputBuffer {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_text_resets_buffer() {
        let mut buffer = OutputBuffer::new();
        writeln!(buffer, "Revision ID: abc").unwrap();

        assert_eq!(buffer.take_text(), "Revision ID: abc\n");
        assert!(buffer.is_empty());

        write!(buffer, "second").unwrap();
        assert_eq!(buffer.take_text(), "second");
    }
}
