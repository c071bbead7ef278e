//! Short notification sound for newly detected versions

use std::io::Write;

use crate::errors::UpdateError;

/// Plays a notification sound. Failures are ignored by callers.
pub trait Chime: Send + Sync {
    fn play(&self) -> Result<(), UpdateError>;
}

/// Rings the terminal bell on stderr
#[derive(Debug, Default)]
pub struct TerminalBell;

impl Chime for TerminalBell {
    fn play(&self) -> Result<(), UpdateError> {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct Silent;

impl Chime for Silent {
    fn play(&self) -> Result<(), UpdateError> {
        Ok(())
    }
}
