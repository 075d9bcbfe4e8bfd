//! `tdsbridge` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    sni::{AllocError, BufferTooSmall, CorruptPacket, OpenError},
    transport::{ReadError, StateError, WriteError, config::ParseError},
};

#[cfg(feature = "native")]
use crate::sni::LoadError;

/// A specialized [`Result`] type for `tdsbridge` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `tdsbridge` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }
}

/// All possible error kind from `tdsbridge` library.
pub enum ErrorKind {
    /// Malformed server target spec.
    Target(ParseError),
    /// The open call did not yield a usable handle.
    Connect(OpenError),
    /// Null native resource; the transport is assumed broken.
    Alloc(AllocError),
    /// Fatal native write status.
    Write(WriteError),
    /// Fatal native read status.
    Read(ReadError),
    /// A received packet could not be drained.
    CorruptPacket(CorruptPacket),
    /// The destination buffer cannot hold the received payload.
    BufferTooSmall(BufferTooSmall),
    /// Operation issued outside its valid lifecycle state.
    State(StateError),
    /// Bridge-level socket failure.
    Io(io::Error),
    /// The native library could not be loaded.
    #[cfg(feature = "native")]
    Load(LoadError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Target(e));
from!(<OpenError>e => ErrorKind::Connect(e));
from!(<AllocError>e => ErrorKind::Alloc(e));
from!(<WriteError>e => ErrorKind::Write(e));
from!(<ReadError>e => ErrorKind::Read(e));
from!(<CorruptPacket>e => ErrorKind::CorruptPacket(e));
from!(<BufferTooSmall>e => ErrorKind::BufferTooSmall(e));
from!(<StateError>e => ErrorKind::State(e));
from!(<io::Error>e => ErrorKind::Io(e));

#[cfg(feature = "native")]
from!(<LoadError>e => ErrorKind::Load(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Target(e) => e.fmt(f),
            Self::Connect(e) => e.fmt(f),
            Self::Alloc(e) => e.fmt(f),
            Self::Write(e) => e.fmt(f),
            Self::Read(e) => e.fmt(f),
            Self::CorruptPacket(e) => e.fmt(f),
            Self::BufferTooSmall(e) => e.fmt(f),
            Self::State(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            #[cfg(feature = "native")]
            Self::Load(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
