use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("could not make code at {address:#x} writable: {source}")]
    Protect { address: usize, source: io::Error },

    #[error("sigaction({signal}) failed: {source}")]
    Signal { signal: i32, source: io::Error },

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(&'static str),

    #[error("sampling engine refused to start writing to {}: {reason}", .path.display())]
    EngineStart { path: PathBuf, reason: String },

    #[error("invalid output path: {}", .0.display())]
    InvalidPath(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
