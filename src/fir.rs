// This file is part of cfir-rs.
// Copyright (c) 2017-2018 Sebastian Jastrzebski <sebby2k@gmail.com>. All rights reserved.
// Portions (c) 2017 Phil Vachon <phil@security-embedded.com>
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

use std::cmp;
use std::sync::Arc;

use tracing::debug;

use super::complex::{cmul_q15_q30, round_q30_q15};
use super::derotator::Derotator;
use super::sample_buf::SampleBuf;
use super::{Busy, Error};

// ----------------------------------------------------------------------------
// Direct-form complex FIR with integer decimation.
//
// Input arrives as ref-counted buffers of interleaved complex Q.15
// samples, at most two queued at a time: `active` holds the cursor,
// `next` the immediately following buffer. The convolution kernel walks
// the tap window straight across the seam between the two, so samples
// are never copied or re-blocked on ingest. The cost is a hard cap of
// two queued buffers; `full` and the `Busy` push result give the
// upstream producer its back-pressure signal.
//
// The cursor advances by the decimation factor between outputs. The
// active buffer is retired as soon as the cursor lands on or past its
// end, which releases the producer's buffer at the earliest possible
// moment.
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct DirectFir {
    // Configuration
    taps_re: Vec<i16>,
    taps_im: Vec<i16>,
    // Interleaved (re, -im) / (im, re) tap pairs feeding the madd kernel.
    // Left empty when an imaginary tap equals i16::MIN, whose negation
    // does not fit; such a filter runs the scalar kernel only.
    taps_madd_re: Vec<i16>,
    taps_madd_im: Vec<i16>,
    decimation: usize,
    derotator: Option<Derotator>,
    // Runtime State
    active: Option<Arc<SampleBuf>>,
    next: Option<Arc<SampleBuf>>,
    sample_offset: usize,
    nr_samples_queued: usize,
}

impl DirectFir {
    /// Creates a filter from parallel Q.15 coefficient vectors and an
    /// integer decimation factor. Coefficients are copied into owned
    /// storage; they are immutable for the life of the instance.
    pub fn new(taps_re: &[i16], taps_im: &[i16], decimation: usize) -> Result<DirectFir, Error> {
        if taps_re.is_empty() || taps_im.is_empty() {
            return Err(Error::EmptyTaps);
        }
        if taps_re.len() != taps_im.len() {
            return Err(Error::TapLengthMismatch);
        }
        if decimation == 0 {
            return Err(Error::ZeroDecimation);
        }
        debug!(
            nr_taps = taps_re.len(),
            decimation, "preparing direct FIR"
        );
        let (taps_madd_re, taps_madd_im) = build_madd_taps(taps_re, taps_im);
        Ok(DirectFir {
            taps_re: taps_re.to_vec(),
            taps_im: taps_im.to_vec(),
            taps_madd_re,
            taps_madd_im,
            decimation,
            derotator: None,
            active: None,
            next: None,
            sample_offset: 0,
            nr_samples_queued: 0,
        })
    }

    /// Creates a filter that additionally derotates its output by
    /// `-freq_shift` Hz. The phase increment is computed for the
    /// decimated output rate, one rotation step per output sample.
    pub fn with_derotation(
        taps_re: &[i16],
        taps_im: &[i16],
        decimation: usize,
        sampling_rate: u32,
        freq_shift: i32,
    ) -> Result<DirectFir, Error> {
        if sampling_rate == 0 {
            return Err(Error::ZeroSamplingRate);
        }
        let mut fir = DirectFir::new(taps_re, taps_im, decimation)?;
        fir.derotator = Some(Derotator::new(sampling_rate, freq_shift, decimation));
        Ok(fir)
    }

    /// Queues a sample buffer behind the filter window.
    ///
    /// On success the caller's reference is adopted by the filter and
    /// dropped once the buffer has been fully consumed. When both slots
    /// are occupied the buffer is handed back inside [`Busy`] and no
    /// state changes.
    ///
    /// Panics if the buffer is empty or already held in either slot.
    pub fn push(&mut self, buf: Arc<SampleBuf>) -> Result<(), Busy> {
        assert!(buf.nr_samples() > 0, "pushed buffer holds no samples");
        if let Some(active) = &self.active {
            assert!(!Arc::ptr_eq(active, &buf), "buffer is already queued");
        }
        if let Some(next) = &self.next {
            assert!(!Arc::ptr_eq(next, &buf), "buffer is already queued");
        }
        let nr_samples = buf.nr_samples();
        if self.active.is_none() {
            debug_assert!(self.next.is_none());
            self.active = Some(buf);
        } else if self.next.is_none() {
            self.next = Some(buf);
        } else {
            return Err(Busy(buf));
        }
        self.nr_samples_queued += nr_samples;
        debug!(
            nr_samples,
            nr_samples_queued = self.nr_samples_queued,
            full = self.next.is_some(),
            "queued sample buffer"
        );
        Ok(())
    }

    /// Writes up to `out.len() / 2` decimated complex samples in
    /// interleaved Q.15 order and returns the number of complex samples
    /// produced. Producing fewer than requested (or zero) means the
    /// queued input is exhausted; it is not an error.
    pub fn process(&mut self, out: &mut [i16]) -> usize {
        let nr_out_samples = out.len() / 2;
        for i in 0..nr_out_samples {
            match self.process_sample() {
                Some((re, im)) => {
                    out[2 * i] = re;
                    out[2 * i + 1] = im;
                }
                None => return i,
            }
        }
        nr_out_samples
    }

    /// Readiness check: whether at least one output can be produced,
    /// plus a lower-bound estimate of producible outputs given the
    /// current queue. The estimate ignores decimation; it is advisory.
    pub fn can_process(&self) -> (bool, usize) {
        (
            self.nr_samples_queued >= self.taps_re.len(),
            self.nr_samples_queued / self.taps_re.len(),
        )
    }

    /// Back-pressure predicate for the upstream producer: true when both
    /// window slots are occupied.
    pub fn full(&self) -> bool {
        self.next.is_some()
    }

    /// Drops both queued buffers, rewinds the cursor and, if derotating,
    /// the phase. Taps and increment survive; the instance behaves like
    /// a freshly constructed one.
    pub fn reset(&mut self) {
        self.active = None;
        self.next = None;
        self.sample_offset = 0;
        self.nr_samples_queued = 0;
        if let Some(derotator) = &mut self.derotator {
            derotator.reset();
        }
    }

    /// Number of filter coefficients.
    pub fn nr_taps(&self) -> usize {
        self.taps_re.len()
    }

    /// Configured decimation factor.
    pub fn decimation(&self) -> usize {
        self.decimation
    }

    /// Complex samples queued across both slots, minus the consumed
    /// prefix of the active buffer.
    pub fn nr_samples_queued(&self) -> usize {
        self.nr_samples_queued
    }

    // ------------------------------------------------------------------------
    // Convolution kernel: one output sample per call.
    //
    // The tap window covers at most two spans: from the cursor to the end
    // of the active buffer, then from the start of the next buffer. Each
    // span is a plain dot product of interleaved samples against the tap
    // vector, accumulated in Q.30 with wraparound.
    // ------------------------------------------------------------------------

    /// Computes one decimated output sample, or `None` when fewer than
    /// `nr_taps` samples remain across both slots. State is untouched in
    /// the `None` case.
    fn process_sample(&mut self) -> Option<(i16, i16)> {
        let nr_taps = self.taps_re.len();
        if self.nr_samples_queued < nr_taps {
            return None;
        }
        let active = self
            .active
            .as_ref()
            .expect("queued samples without an active buffer");

        let avail = active.nr_samples() - self.sample_offset;
        let take = cmp::min(avail, nr_taps);
        let span = &active.data()[2 * self.sample_offset..2 * (self.sample_offset + take)];
        let (mut acc_re, mut acc_im) = self.dot_span(span, 0);

        if take < nr_taps {
            // The window straddles the seam; the remaining taps continue
            // at the start of the next buffer.
            let next = self
                .next
                .as_ref()
                .expect("window straddles a missing buffer");
            let rest = nr_taps - take;
            let (re, im) = self.dot_span(&next.data()[..2 * rest], take);
            acc_re = acc_re.wrapping_add(re);
            acc_im = acc_im.wrapping_add(im);
        }

        self.advance_cursor();

        let mut out_re = round_q30_q15(acc_re);
        let mut out_im = round_q30_q15(acc_im);
        if let Some(derotator) = &mut self.derotator {
            let (re, im) = derotator.rotate(out_re, out_im);
            out_re = round_q30_q15(re);
            out_im = round_q30_q15(im);
        }
        Some((out_re as i16, out_im as i16))
    }

    /// Steps the cursor by the decimation factor, retiring the active
    /// buffer as soon as the cursor lands on or past its end. Retirement
    /// drops the filter's reference and promotes `next` into the active
    /// slot.
    fn advance_cursor(&mut self) {
        let active_len = self
            .active
            .as_ref()
            .expect("cursor advance without an active buffer")
            .nr_samples();
        let new_off = self.sample_offset + self.decimation;
        if new_off >= active_len {
            let carry = new_off - active_len;
            match self.next.take() {
                Some(promoted) if carry < promoted.nr_samples() => {
                    self.active = Some(promoted);
                    self.sample_offset = carry;
                }
                // The stride steps past everything still queued; a
                // promoted buffer would be dead as well.
                _ => {
                    self.active = None;
                    self.sample_offset = 0;
                }
            }
        } else {
            self.sample_offset = new_off;
        }
        self.nr_samples_queued = self.nr_samples_queued.saturating_sub(self.decimation);
        if self.active.is_none() {
            self.nr_samples_queued = 0;
        }
    }

    /// Convolves one contiguous span of interleaved samples against the
    /// tap vector starting at `tap_base`, returning Q.30 partial sums.
    #[inline]
    fn dot_span(&self, data: &[i16], tap_base: usize) -> (i32, i32) {
        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            if !self.taps_madd_re.is_empty() && is_x86_feature_detected!("avx2") {
                return unsafe { self.dot_span_avx2(data, tap_base) };
            }
        }
        self.dot_span_scalar(data, tap_base)
    }

    #[inline]
    fn dot_span_scalar(&self, data: &[i16], tap_base: usize) -> (i32, i32) {
        let mut acc_re = 0i32;
        let mut acc_im = 0i32;
        for (k, sample) in data.chunks_exact(2).enumerate() {
            let s_re = sample[0] as i32;
            let s_im = sample[1] as i32;
            let c_re = self.taps_re[tap_base + k] as i32;
            let c_im = self.taps_im[tap_base + k] as i32;
            let (f_re, f_im) = cmul_q15_q30(c_re, c_im, s_re, s_im);
            acc_re = acc_re.wrapping_add(f_re);
            acc_im = acc_im.wrapping_add(f_im);
        }
        (acc_re, acc_im)
    }

    // Eight complex samples per iteration: one madd against the (re, -im)
    // pairs accumulates the real lanes, one against the (im, re) pairs
    // the imaginary lanes. Wraparound addition is order-independent, so
    // the result is bit-identical to the scalar loop.
    #[target_feature(enable = "avx2")]
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    unsafe fn dot_span_avx2(&self, data: &[i16], tap_base: usize) -> (i32, i32) {
        #[cfg(target_arch = "x86")]
        use std::arch::x86::*;
        #[cfg(target_arch = "x86_64")]
        use std::arch::x86_64::*;

        let take = data.len() / 2;
        let madd_re = &self.taps_madd_re[2 * tap_base..2 * (tap_base + take)];
        let madd_im = &self.taps_madd_im[2 * tap_base..2 * (tap_base + take)];

        let mut acc_re_v = _mm256_setzero_si256();
        let mut acc_im_v = _mm256_setzero_si256();
        let mut i = 0usize;
        while i + 16 <= data.len() {
            let s_v = _mm256_loadu_si256(data.as_ptr().add(i) as *const _);
            let c_re_v = _mm256_loadu_si256(madd_re.as_ptr().add(i) as *const _);
            acc_re_v = _mm256_add_epi32(acc_re_v, _mm256_madd_epi16(s_v, c_re_v));
            let c_im_v = _mm256_loadu_si256(madd_im.as_ptr().add(i) as *const _);
            acc_im_v = _mm256_add_epi32(acc_im_v, _mm256_madd_epi16(s_v, c_im_v));
            i += 16;
        }

        let mut va = [0i32; 8];
        _mm256_storeu_si256(va.as_mut_ptr() as *mut _, acc_re_v);
        let mut acc_re = va.iter().fold(0i32, |sum, &v| sum.wrapping_add(v));
        _mm256_storeu_si256(va.as_mut_ptr() as *mut _, acc_im_v);
        let mut acc_im = va.iter().fold(0i32, |sum, &v| sum.wrapping_add(v));

        for k in i / 2..take {
            let s_re = data[2 * k] as i32;
            let s_im = data[2 * k + 1] as i32;
            let c_re = self.taps_re[tap_base + k] as i32;
            let c_im = self.taps_im[tap_base + k] as i32;
            let (f_re, f_im) = cmul_q15_q30(c_re, c_im, s_re, s_im);
            acc_re = acc_re.wrapping_add(f_re);
            acc_im = acc_im.wrapping_add(f_im);
        }
        (acc_re, acc_im)
    }
}

fn build_madd_taps(taps_re: &[i16], taps_im: &[i16]) -> (Vec<i16>, Vec<i16>) {
    if taps_im.iter().any(|&c_im| c_im == i16::MIN) {
        return (Vec::new(), Vec::new());
    }
    let mut madd_re = Vec::with_capacity(taps_re.len() * 2);
    let mut madd_im = Vec::with_capacity(taps_re.len() * 2);
    for (&c_re, &c_im) in taps_re.iter().zip(taps_im.iter()) {
        madd_re.push(c_re);
        madd_re.push(-c_im);
        madd_im.push(c_im);
        madd_im.push(c_re);
    }
    (madd_re, madd_im)
}
