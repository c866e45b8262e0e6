// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error::Error as StdError;
use std::fmt;
use std::ops::Deref;
use std::result;

/// `SeekErrorKind` is a list of generic reasons why a seek may fail.
#[derive(Debug)]
pub enum SeekErrorKind {
    /// The stream is not seekable at all.
    Unseekable,
    /// The stream can only be seeked forward.
    ForwardOnly,
    /// The timestamp to seek to is out of range.
    OutOfRange,
    /// The track ID provided is invalid.
    InvalidTrack,
}

impl SeekErrorKind {
    fn as_str(&self) -> &'static str {
        match *self {
            SeekErrorKind::Unseekable => "stream is not seekable",
            SeekErrorKind::ForwardOnly => "stream can only be seeked forward",
            SeekErrorKind::OutOfRange => "requested seek timestamp is out-of-range for stream",
            SeekErrorKind::InvalidTrack => "invalid track id",
        }
    }
}

/// `SacdError` enumerates all errors reported by this crate. Variant granularity follows the
/// propagation policy: per-frame decode failures are absorbed by the caller (silence
/// substitution); everything else is structural and propagates.
#[derive(Debug)]
pub enum SacdError {
    /// An IO error occurred while reading, writing, or seeking the stream.
    IoError(Box<dyn StdError>),
    /// An IO error occurred while reading, writing, or seeking the stream that is retryable.
    IoInterruptedError(Box<dyn StdError>),
    /// The stream contained malformed data and could not be decoded or demuxed.
    DecodeError(&'static str),
    /// The stream could not be seeked.
    SeekError(SeekErrorKind),
    /// An unsupported container or codec feature was encountered.
    Unsupported(&'static str),
    /// A default or user-defined limit was reached while decoding or demuxing the stream.
    LimitError(&'static str),
    /// A malformed container (bad magic, unsupported version, chunk size violation).
    ContainerFormat(&'static str),
    /// A short read from the underlying media; frame iteration should stop.
    TruncatedRead(&'static str),
    /// A DST frame failed to decode (rice overflow, bad coefficient, AC non-flush, ...).
    /// Non-fatal: the caller substitutes silence and continues with the next frame.
    DstDecode(&'static str),
    /// A partial or missing audio sector inside a track; the frame is marked invalid and
    /// iteration resumes at the next sector.
    SectorBadRead(&'static str),
    /// A configuration value is invalid for the requested operation (e.g. `USER` converter
    /// without supplied coefficients).
    ConfigInvalid(&'static str),
    /// An internal invariant was violated; should not occur on well-formed input.
    Internal(&'static str),
    /// The demuxer or decoder needs to be reset before continuing.
    ResetRequired,
    EndOfFile,
    Other(&'static str),
}

impl fmt::Display for SacdError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            SacdError::IoError(ref err) => write!(f, "io error {:?}", err),
            SacdError::IoInterruptedError(ref err) => write!(f, "io error {:?}", err),
            SacdError::DecodeError(msg) => write!(f, "malformed stream: {}", msg),
            SacdError::SeekError(ref kind) => write!(f, "seek error: {}", kind.as_str()),
            SacdError::Unsupported(feature) => write!(f, "unsupported feature: {}", feature),
            SacdError::LimitError(constraint) => write!(f, "limit reached: {}", constraint),
            SacdError::ContainerFormat(msg) => write!(f, "malformed container: {}", msg),
            SacdError::TruncatedRead(msg) => write!(f, "truncated read: {}", msg),
            SacdError::DstDecode(msg) => write!(f, "dst decode error: {}", msg),
            SacdError::SectorBadRead(msg) => write!(f, "bad sector read: {}", msg),
            SacdError::ConfigInvalid(msg) => write!(f, "invalid configuration: {}", msg),
            SacdError::Internal(msg) => write!(f, "internal error: {}", msg),
            SacdError::ResetRequired => write!(f, "decoder needs to be reset"),
            SacdError::EndOfFile => write!(f, "unexpected end of file"),
            SacdError::Other(msg) => write!(f, "other error: {}", msg),
        }
    }
}

impl StdError for SacdError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match *self {
            SacdError::IoError(ref err) => Some(err.deref()),
            SacdError::IoInterruptedError(ref err) => Some(err.deref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SacdError {
    fn from(err: std::io::Error) -> SacdError {
        match err.kind() {
            std::io::ErrorKind::Interrupted => SacdError::IoInterruptedError(Box::new(err)),
            std::io::ErrorKind::UnexpectedEof => SacdError::EndOfFile,
            _ => SacdError::IoError(Box::new(err)),
        }
    }
}

pub type Result<T> = result::Result<T, SacdError>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(SacdError::DecodeError(desc))
}

/// Convenience function to create a seek error.
pub fn seek_error<T>(kind: SeekErrorKind) -> Result<T> {
    Err(SacdError::SeekError(kind))
}

/// Convenience function to create an unsupported feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(SacdError::Unsupported(feature))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(SacdError::LimitError(constraint))
}

/// Convenience function to create a reset-required error.
pub fn reset_error<T>() -> Result<T> {
    Err(SacdError::ResetRequired)
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(SacdError::EndOfFile)
}

/// Convenience function to create a container-format error.
pub fn container_error<T>(desc: &'static str) -> Result<T> {
    Err(SacdError::ContainerFormat(desc))
}

/// Convenience function to create a truncated-read error.
pub fn truncated_error<T>(desc: &'static str) -> Result<T> {
    Err(SacdError::TruncatedRead(desc))
}

/// Convenience function to create a DST decode error.
pub fn dst_error<T>(desc: &'static str) -> Result<T> {
    Err(SacdError::DstDecode(desc))
}

/// Convenience function to create a bad-sector-read error.
pub fn sector_error<T>(desc: &'static str) -> Result<T> {
    Err(SacdError::SectorBadRead(desc))
}

/// Convenience function to create an invalid-configuration error.
pub fn config_error<T>(desc: &'static str) -> Result<T> {
    Err(SacdError::ConfigInvalid(desc))
}

/// Convenience function to create an internal-invariant error.
pub fn internal_error<T>(desc: &'static str) -> Result<T> {
    Err(SacdError::Internal(desc))
}
