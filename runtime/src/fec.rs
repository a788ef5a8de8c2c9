// Licensed under the Apache-2.0 license

//! Forward error correction for fragmented image delivery.
//!
//! Systematic Cauchy Reed-Solomon code over GF(2^16). The first `N`
//! fragments are the image itself. Parity fragment `i` is
//! `P_i = sum_j D_j / (x_i + y_j)` with `y_j = j` and `x_i = N + i`, every
//! payload read as little-endian 16-bit symbols. Any square submatrix of a
//! Cauchy matrix is invertible, so any `N` of the `N + R` fragments rebuild
//! the image.
//!
//! The inverse of a square Cauchy system has a closed form, so decoding
//! keeps two coefficient vectors in RAM instead of a matrix.

use alloc::vec;
use alloc::vec::Vec;

use crate::bitmap::MAX_FRAGMENTS;

/// x^16 + x^12 + x^3 + x + 1
const POLY: u32 = 0x1_100B;

/// Bytes per code symbol. Fragment sizes must be a multiple of this.
pub const SYMBOL_SIZE: usize = 2;

// Every data and parity point must be a distinct field element.
const _: () = assert!(MAX_FRAGMENTS <= 1 << 16);

pub fn mul(a: u16, b: u16) -> u16 {
    let mut a = a as u32;
    let mut b = b;
    let mut product = 0u32;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        b >>= 1;
        a <<= 1;
        if a & 0x1_0000 != 0 {
            a ^= POLY;
        }
    }
    product as u16
}

/// Multiplicative inverse, `a^(2^16 - 2)`. Zero maps to zero.
pub fn inv(a: u16) -> u16 {
    let mut result = 1u16;
    let mut base = a;
    let mut exp = 0xFFFEu32;
    while exp != 0 {
        if exp & 1 != 0 {
            result = mul(result, base);
        }
        base = mul(base, base);
        exp >>= 1;
    }
    result
}

pub fn data_point(column: usize) -> u16 {
    column as u16
}

pub fn parity_point(data_count: usize, row: usize) -> u16 {
    (data_count + row) as u16
}

/// Weight of data column `column` in parity row `row`.
pub fn coefficient(data_count: usize, row: usize, column: usize) -> u16 {
    inv(parity_point(data_count, row) ^ data_point(column))
}

/// `acc += c * src`, symbol by symbol. Both slices hold whole symbols.
pub fn mul_acc(acc: &mut [u8], src: &[u8], c: u16) {
    for (a, s) in acc
        .chunks_exact_mut(SYMBOL_SIZE)
        .zip(src.chunks_exact(SYMBOL_SIZE))
    {
        let value = u16::from_le_bytes([a[0], a[1]]) ^ mul(c, u16::from_le_bytes([s[0], s[1]]));
        a.copy_from_slice(&value.to_le_bytes());
    }
}

/// `buf *= c`, symbol by symbol.
pub fn scale(buf: &mut [u8], c: u16) {
    for a in buf.chunks_exact_mut(SYMBOL_SIZE) {
        let value = mul(c, u16::from_le_bytes([a[0], a[1]]));
        a.copy_from_slice(&value.to_le_bytes());
    }
}

/// Inverts every element of `values` with a single field inversion.
/// `prefix` is scratch of the same length. No element may be zero.
pub fn batch_inv(values: &mut [u16], prefix: &mut [u16]) {
    let mut acc = 1u16;
    for (p, &v) in prefix.iter_mut().zip(values.iter()) {
        *p = acc;
        acc = mul(acc, v);
    }
    let mut inv_acc = inv(acc);
    for (v, &p) in values.iter_mut().zip(prefix.iter()).rev() {
        let value = *v;
        *v = mul(inv_acc, p);
        inv_acc = mul(inv_acc, value);
    }
}

/// Computes parity fragment `parity_index` (0-based) of `data`, split into
/// fragments of `fragment_size` bytes. The last fragment is zero padded.
pub fn encode_parity(data: &[u8], fragment_size: usize, parity_index: usize, out: &mut [u8]) {
    let data_count = data.len().div_ceil(fragment_size);
    let x = parity_point(data_count, parity_index);
    let mut coefficients: Vec<u16> = (0..data_count).map(|c| x ^ data_point(c)).collect();
    let mut prefix = vec![0u16; data_count];
    batch_inv(&mut coefficients, &mut prefix);

    let mut padded = vec![0u8; fragment_size];
    out[..fragment_size].fill(0);
    for (fragment, &c) in data.chunks(fragment_size).zip(&coefficients) {
        padded.fill(0);
        padded[..fragment.len()].copy_from_slice(fragment);
        mul_acc(&mut out[..fragment_size], &padded, c);
    }
}

/// Sender side: splits `image` into zero padded data fragments and appends
/// `redundancy` parity fragments.
pub fn encode_fragments(
    image: &[u8],
    fragment_size: usize,
    redundancy: usize,
) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let data = image
        .chunks(fragment_size)
        .map(|chunk| {
            let mut fragment = vec![0u8; fragment_size];
            fragment[..chunk.len()].copy_from_slice(chunk);
            fragment
        })
        .collect();
    let parity = (0..redundancy)
        .map(|j| {
            let mut fragment = vec![0u8; fragment_size];
            encode_parity(image, fragment_size, j, &mut fragment);
            fragment
        })
        .collect();
    (data, parity)
}

/// Inverse of the square Cauchy system `A_ab = 1 / (x_a + y_b)` formed by
/// `m` parity rows and the `m` missing data columns.
///
/// `(A^-1)_ba = ex_a * ey_b / (x_a + y_b)` where
/// `ex_a = prod_k (x_a + y_k) / prod_{k != a} (x_a + x_k)` and
/// `ey_b = prod_k (y_b + x_k) / prod_{k != b} (y_b + y_k)`.
pub struct CauchyInverse {
    xs: Vec<u16>,
    ys: Vec<u16>,
    ex: Vec<u16>,
    ey: Vec<u16>,
}

impl CauchyInverse {
    /// `xs` and `ys` must have the same length and hold distinct points.
    pub fn new(xs: Vec<u16>, ys: Vec<u16>) -> Self {
        let ex = Self::weights(&xs, &ys);
        let ey = Self::weights(&ys, &xs);
        CauchyInverse { xs, ys, ex, ey }
    }

    fn weights(own: &[u16], other: &[u16]) -> Vec<u16> {
        own.iter()
            .enumerate()
            .map(|(a, &p)| {
                let num = other.iter().fold(1, |acc, &q| mul(acc, p ^ q));
                let den = own
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != a)
                    .fold(1, |acc, (_, &q)| mul(acc, p ^ q));
                mul(num, inv(den))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.xs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.xs.is_empty()
    }

    /// Weight of right-hand side `row` in unknown `column`, without the
    /// `ey_column` factor shared by the whole column.
    pub fn row_weight(&self, column: usize, row: usize) -> u16 {
        mul(self.ex[row], inv(self.xs[row] ^ self.ys[column]))
    }

    pub fn column_factor(&self, column: usize) -> u16 {
        self.ey[column]
    }

    /// Solves for unknown `column` into `out`, given the right-hand sides
    /// `rhs[a]` of every row.
    pub fn solve_into(&self, column: usize, rhs: &[&[u8]], out: &mut [u8]) {
        out.fill(0);
        for (row, value) in rhs.iter().enumerate() {
            mul_acc(out, value, self.row_weight(column, row));
        }
        scale(out, self.column_factor(column));
    }
}
