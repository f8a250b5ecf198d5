// This file is part of cfir-rs.
// Copyright (c) 2017-2018 Sebastian Jastrzebski <sebby2k@gmail.com>. All rights reserved.
// Portions (c) 2017 Phil Vachon <phil@security-embedded.com>
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

pub mod complex;
pub mod derotator;
pub mod fir;
pub mod sample_buf;

use std::sync::Arc;

use thiserror::Error;

/// Errors reported when constructing a filter instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum Error {
    #[error("filter requires at least one coefficient")]
    EmptyTaps,
    #[error("real and imaginary coefficient vectors differ in length")]
    TapLengthMismatch,
    #[error("decimation factor must be non-zero")]
    ZeroDecimation,
    #[error("sampling rate must be non-zero")]
    ZeroSamplingRate,
}

/// Back-pressure signal from [`DirectFir::push`]: both window slots are
/// occupied. The rejected buffer rides back to the caller, which keeps
/// its reference and retries after draining output.
#[derive(Debug, Error)]
#[error("both sample buffer slots are occupied")]
pub struct Busy(pub Arc<SampleBuf>);

pub use self::derotator::Derotator;
pub use self::fir::DirectFir;
pub use self::sample_buf::SampleBuf;
