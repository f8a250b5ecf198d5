// This file is part of cfir-rs.
// Copyright (c) 2017-2018 Sebastian Jastrzebski <sebby2k@gmail.com>. All rights reserved.
// Portions (c) 2017 Phil Vachon <phil@security-embedded.com>
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::fmt;

/// A contiguous block of interleaved complex Q.15 samples handed to the
/// filter by an upstream producer.
///
/// Producers share a buffer by wrapping it in an `Arc`; dropping a handle
/// releases that holder's reference. The filter adopts the caller's
/// reference on a successful push and drops it once the last sample the
/// tap window needs from the buffer has been consumed.
pub struct SampleBuf {
    data: Box<[i16]>,
}

impl SampleBuf {
    /// Wraps an interleaved real-then-imag Q.15 sequence.
    ///
    /// Panics if the storage length is odd.
    pub fn from_interleaved(data: Vec<i16>) -> SampleBuf {
        assert!(
            data.len() % 2 == 0,
            "interleaved storage must hold re/im pairs"
        );
        SampleBuf {
            data: data.into_boxed_slice(),
        }
    }

    /// Builds a buffer from `(re, im)` pairs.
    pub fn from_pairs(samples: &[(i16, i16)]) -> SampleBuf {
        let mut data = Vec::with_capacity(samples.len() * 2);
        for &(re, im) in samples {
            data.push(re);
            data.push(im);
        }
        SampleBuf {
            data: data.into_boxed_slice(),
        }
    }

    /// Number of complex samples in the buffer.
    pub fn nr_samples(&self) -> usize {
        self.data.len() / 2
    }

    /// Interleaved sample storage, `2 * nr_samples()` values.
    pub fn data(&self) -> &[i16] {
        &self.data
    }
}

impl fmt::Debug for SampleBuf {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("SampleBuf")
            .field("nr_samples", &self.nr_samples())
            .finish()
    }
}
