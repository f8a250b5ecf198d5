// This file is part of cfir-rs.
// Copyright (c) 2017-2018 Sebastian Jastrzebski <sebby2k@gmail.com>. All rights reserved.
// Portions (c) 2017 Phil Vachon <phil@security-embedded.com>
// Licensed under the GPLv3. See LICENSE file in the project root for full license text.

// Fixed-point conventions: samples and coefficients are Q.15 signed
// 16-bit, carried through arithmetic as i32. A Q.15 x Q.15 product is
// Q.30; accumulation stays in Q.30 with two's-complement wraparound.
// Scaling the coefficients so the accumulated sum fits 32 bits is the
// filter designer's responsibility, not a runtime check.

/// Number of fractional bits in a Q.15 value.
pub const Q15_SHIFT: i32 = 15;

/// 1.0 in Q.15.
pub const Q15_ONE: i32 = 1 << Q15_SHIFT;

/// Rounds a Q.30 value to Q.15: add half an output LSB, then arithmetic
/// shift right.
#[inline]
pub fn round_q30_q15(x: i32) -> i32 {
    x.wrapping_add(1 << (Q15_SHIFT - 1)) >> Q15_SHIFT
}

/// Complex multiply of two Q.15 values, leaving both parts in Q.30.
#[inline]
pub fn cmul_q15_q30(a_re: i32, a_im: i32, b_re: i32, b_im: i32) -> (i32, i32) {
    (
        a_re.wrapping_mul(b_re).wrapping_sub(a_im.wrapping_mul(b_im)),
        a_re.wrapping_mul(b_im).wrapping_add(a_im.wrapping_mul(b_re)),
    )
}

/// Complex multiply of two Q.15 values, rounded back to Q.15.
#[inline]
pub fn cmul_q15_q15(a_re: i32, a_im: i32, b_re: i32, b_im: i32) -> (i32, i32) {
    let (re, im) = cmul_q15_q30(a_re, a_im, b_re, b_im);
    (round_q30_q15(re), round_q30_q15(im))
}
