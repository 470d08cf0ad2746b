//! Error type of the command-line front end

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Device(#[from] qspif_core::Error),

    #[error("progress bar template: {0}")]
    Template(#[from] indicatif::style::TemplateError),

    #[error("image of {len} bytes at 0x{offset:X} does not fit a {size} byte device")]
    ImageTooLarge { len: u64, offset: u64, size: u64 },

    #[error("offset 0x{offset:X} is not aligned to the {unit} byte erase unit")]
    Misaligned { offset: u64, unit: u64 },

    #[error("verify failed at 0x{0:X}")]
    VerifyMismatch(u64),
}

impl CliError {
    pub fn io(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
