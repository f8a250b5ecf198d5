// This file is part of cfir-rs.
// Copyright (c) 2017-2018 Sebastian Jastrzebski <sebby2k@gmail.com>. All rights reserved.
// Portions (c) 2017 Phil Vachon <phil@security-embedded.com>
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::f64::consts::PI;

use tracing::debug;

use super::complex::{cmul_q15_q15, cmul_q15_q30, Q15_ONE};

/// Carrier derotator: multiplies the decimated output stream by a complex
/// exponential to shift the signal of interest to baseband.
///
/// The decimation factor is folded into the per-output-sample phase
/// increment at construction time, so the filter kernel pays exactly one
/// complex multiply per output sample rather than per input sample. The
/// phase vector norm drifts slowly with Q.15 rounding and is never
/// renormalized.
#[derive(Debug)]
pub struct Derotator {
    // Configuration
    incr_re: i32,
    incr_im: i32,
    // Runtime State
    rot_re: i32,
    rot_im: i32,
}

impl Derotator {
    /// Computes the increment `exp(-j * 2pi * freq_shift / sampling_rate
    /// * decimation)` in double precision and quantizes it to Q.15,
    /// truncating toward zero. The phase starts at `(1.0, 0.0)`.
    ///
    /// `freq_shift` is the signed shift in Hz, `sampling_rate` the input
    /// rate in Hz, `decimation` the output-rate divisor.
    pub fn new(sampling_rate: u32, freq_shift: i32, decimation: usize) -> Derotator {
        let fwt0 = 2.0 * PI * freq_shift as f64 / sampling_rate as f64;
        let theta = -fwt0 * decimation as f64;
        let q15 = Q15_ONE as f64;
        let incr_re = (theta.cos() * q15) as i32;
        let incr_im = (theta.sin() * q15) as i32;
        debug!(
            incr_re,
            incr_im,
            "derotation increment: {:.6}, {:.6}",
            incr_re as f64 / q15,
            incr_im as f64 / q15
        );
        Derotator {
            incr_re,
            incr_im,
            rot_re: Q15_ONE,
            rot_im: 0,
        }
    }

    /// Rotates one Q.15 sample by the current phase, returning Q.30, and
    /// steps the phase for the following output sample.
    #[inline]
    pub fn rotate(&mut self, re: i32, im: i32) -> (i32, i32) {
        let out = cmul_q15_q30(re, im, self.rot_re, self.rot_im);
        let (rot_re, rot_im) =
            cmul_q15_q15(self.rot_re, self.rot_im, self.incr_re, self.incr_im);
        self.rot_re = rot_re;
        self.rot_im = rot_im;
        out
    }

    /// Rewinds the phase to `(1.0, 0.0)`, keeping the increment.
    pub fn reset(&mut self) {
        self.rot_re = Q15_ONE;
        self.rot_im = 0;
    }

    /// Current phase vector in Q.15.
    pub fn phase(&self) -> (i32, i32) {
        (self.rot_re, self.rot_im)
    }

    /// Per-output-sample phase increment in Q.15.
    pub fn increment(&self) -> (i32, i32) {
        (self.incr_re, self.incr_im)
    }
}
