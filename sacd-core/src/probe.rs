// Symphonia
// Copyright (c) 2019-2022 The Project Symphonia Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `probe` module provides support structures to allow a `FormatReader` to be found and
//! instantiated from a registered start-of-stream marker.

use crate::errors::Result;
use crate::formats::{FormatOptions, FormatReader};
use crate::io::MediaSourceStream;

/// How a format reader may be instantiated once its marker has been matched.
pub enum Instantiate {
    /// Create a new instance given the media source stream and options.
    Format(fn(MediaSourceStream, &FormatOptions) -> Result<Box<dyn FormatReader>>),
}

/// A `QueryDescriptor` associates a short name and one or more start-of-stream byte markers with
/// an `Instantiate` function.
pub trait QueryDescriptor {
    fn query() -> &'static [Descriptor];
    fn score(_context: &[u8]) -> u8 {
        255
    }
}

/// A single registration entry: short name, extensions, mime-types, and marker bytes.
pub struct Descriptor {
    pub short_name: &'static str,
    pub long_name: &'static str,
    pub extensions: &'static [&'static str],
    pub mime_types: &'static [&'static str],
    pub markers: &'static [&'static [u8]],
    pub inst: Instantiate,
}

/// Convenience macro for declaring a `support_format!` entry inside a `QueryDescriptor` impl.
#[macro_export]
macro_rules! support_format {
    ($short_name:expr, $long_name:expr, $exts:expr, $mimes:expr, $markers:expr) => {
        $crate::probe::Descriptor {
            short_name: $short_name,
            long_name: $long_name,
            extensions: $exts,
            mime_types: $mimes,
            markers: $markers,
            inst: $crate::probe::Instantiate::Format(|mss, fopts| {
                Ok(Box::new(Self::try_new(mss, fopts)?))
            }),
        }
    };
}
