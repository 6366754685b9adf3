//! Container remuxing collaborator for YouTube downloads.
//!
//! Remuxing itself is an out-of-scope external collaborator (named in
//! the scheme's purpose statement); this module only defines the seam
//! the download manager calls through, plus the documented
//! fallback-to-raw-file behavior on failure.

use std::path::Path;

use crate::error::Result;

/// Remuxes the downloaded container at `input` into `output`.
///
/// # Errors
///
/// Implementations should return an error for any remux failure; the
/// download manager treats this as recoverable and falls back to moving
/// the raw file to `output` instead.
pub trait Remuxer: Send + Sync {
    /// Performs the remux.
    fn remux(&self, input: &Path, output: &Path) -> Result<()>;
}

/// A [`Remuxer`] that always fails, forcing the raw-file fallback.
///
/// No remuxing collaborator ships with this crate — the scheme names it
/// as an external dependency — so this is the default until a host
/// application supplies a real one.
#[derive(Default)]
pub struct NoRemuxer;

impl Remuxer for NoRemuxer {
    fn remux(&self, _input: &Path, _output: &Path) -> Result<()> {
        Err(crate::error::Error::unimplemented(
            "no remux collaborator configured",
        ))
    }
}

/// Remuxes `input` into `output`, falling back to moving the raw file on
/// failure.
///
/// # Errors
///
/// Returns an error only if both the remux and the fallback move fail.
pub fn remux_with_fallback(remuxer: &dyn Remuxer, input: &Path, output: &Path) -> Result<()> {
    match remuxer.remux(input, output) {
        Ok(()) => Ok(()),
        Err(err) => {
            log::warn!("remux failed, falling back to raw file: {err}");
            std::fs::rename(input, output).map_err(Into::into)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_remuxer_falls_back_to_moving_the_raw_file() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.raw");
        let output = dir.path().join("out.m4a");
        std::fs::write(&input, b"raw bytes").unwrap();

        remux_with_fallback(&NoRemuxer, &input, &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"raw bytes");
        assert!(!input.exists());
    }
}
