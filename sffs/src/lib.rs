//! SFFS: a small log-structured filesystem for raw NOR-flash-like
//! devices.
//!
//! The value of this crate is the on-flash layout, the sector/page
//! state machines, and the copy-on-write write path that keeps at
//! least one valid copy of every file block across a power loss,
//! using only monotone bit-clearing flash operations (see
//! [`metadata`] and [`file`]). Everything below it — the actual flash
//! chip — is abstracted behind [`storage::Flash`].

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod debug;
mod file;
mod fs;
mod layout;
mod locator;
pub mod master;
pub mod metadata;
mod reclaim;

pub use debug::debug_print;
pub use file::{file_remove, file_size, FileHandle, OpenMode};
pub use fs::{Filesystem, FormatOptions, MountOptions};
pub use layout::Layout;

use core::fmt;

/// Errors the filesystem core distinguishes (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Lookup failed: no such file, no such block, no erased page.
    NotFound,
    /// The allocator and reclamation both failed to yield an erased page.
    NoSpace,
    /// A magic mismatch or an out-of-enum state byte was read from flash.
    Corrupt,
    /// The underlying flash driver reported a failure.
    Io(storage::Error),
    /// file_id 0 where a user file is required, a zero-length buffer
    /// where one is required, or a length that would overflow.
    InvalidArg,
}

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Error {
        Error::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotFound => write!(f, "not found"),
            Error::NoSpace => write!(f, "no space left on device"),
            Error::Corrupt => write!(f, "corrupt metadata"),
            Error::Io(e) => write!(f, "flash driver error: {:?}", e),
            Error::InvalidArg => write!(f, "invalid argument"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;
