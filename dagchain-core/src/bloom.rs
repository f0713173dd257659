//! Bloom filter for container membership.
//!
//! A container publishes `{max_elements, error_rate, bits}`; anyone holding
//! those three values rebuilds an identical filter. Bit count and hash count
//! follow the optimal-parameter formulas:
//!
//! - m = -n * ln(p) / ln(2)^2
//! - k = (m / n) * ln(2)

use crate::{DagError, Result};
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::LN_2;
use std::io::Cursor;

/// Largest bit array a filter may carry (128 MiB).
pub const MAX_FILTER_BITS: usize = 1 << 30;

/// Published form of a filter, stored with each container record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BloomFilterSettings {
    pub max_elements: u64,
    pub error_rate: f64,
    /// Hex-encoded bit array, least significant bit first.
    #[serde(default)]
    pub bits: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BloomFilter {
    max_elements: u64,
    error_rate: f64,
    hash_count: usize,
    bits: BitVec<u8, Lsb0>,
}

fn optimal_parameters(max_elements: u64, error_rate: f64) -> (usize, usize) {
    let n = max_elements as f64;
    let m = (-n * error_rate.ln() / (LN_2 * LN_2)).ceil().max(8.0) as usize;
    let k = ((m as f64 / n) * LN_2).round() as usize;
    (m, k.clamp(1, 32))
}

/// Validated (m, k) for published parameters. Nothing is allocated here.
fn checked_parameters(max_elements: u64, error_rate: f64) -> Result<(usize, usize)> {
    if max_elements == 0 {
        return Err(DagError::InvalidRequest(
            "bloom filter max_elements must be positive".to_string(),
        ));
    }
    if !(error_rate > 0.0 && error_rate < 1.0) {
        return Err(DagError::InvalidRequest(format!(
            "bloom filter error_rate out of range: {}",
            error_rate
        )));
    }

    let (size_bits, hash_count) = optimal_parameters(max_elements, error_rate);
    if size_bits > MAX_FILTER_BITS {
        return Err(DagError::InvalidRequest(format!(
            "bloom filter too large. bits={} max={}",
            size_bits, MAX_FILTER_BITS
        )));
    }
    Ok((size_bits, hash_count))
}

fn murmur_hash(element: &[u8], seed: u32) -> u64 {
    let mut cursor = Cursor::new(element);
    // Reading from an in-memory cursor cannot fail.
    murmur3::murmur3_x64_128(&mut cursor, seed).unwrap_or(0) as u64
}

/// Double hashing: h(i) = h1 + i * h2.
fn hash_positions(element: &[u8], hash_count: usize, size_bits: usize) -> impl Iterator<Item = usize> {
    let h1 = murmur_hash(element, 0);
    let h2 = murmur_hash(element, 1);

    (0..hash_count as u64)
        .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % size_bits as u64) as usize)
}

impl BloomFilter {
    pub fn new(max_elements: u64, error_rate: f64) -> Result<Self> {
        let (size_bits, hash_count) = checked_parameters(max_elements, error_rate)?;
        Ok(Self {
            max_elements,
            error_rate,
            hash_count,
            bits: bitvec![u8, Lsb0; 0; size_bits],
        })
    }

    /// Rebuilds a published filter. The bit array is decoded before anything
    /// sized by the published parameters is allocated.
    pub fn from_settings(settings: &BloomFilterSettings) -> Result<Self> {
        let bytes = hex::decode(settings.bits.trim()).map_err(|error| {
            DagError::IndexInconsistency(format!("bloom filter bits are not hex: {}", error))
        })?;
        if bytes.is_empty() {
            return Self::new(settings.max_elements, settings.error_rate);
        }

        let (size_bits, hash_count) = checked_parameters(settings.max_elements, settings.error_rate)
            .map_err(|error| DagError::IndexInconsistency(error.to_string()))?;
        if size_bits.div_ceil(8) != bytes.len() {
            return Err(DagError::IndexInconsistency(format!(
                "bloom filter bits length mismatch. expected={} actual={}",
                size_bits.div_ceil(8),
                bytes.len()
            )));
        }

        let mut bits = BitVec::<u8, Lsb0>::from_vec(bytes);
        bits.truncate(size_bits);
        Ok(Self {
            max_elements: settings.max_elements,
            error_rate: settings.error_rate,
            hash_count,
            bits,
        })
    }

    pub fn to_settings(&self) -> BloomFilterSettings {
        BloomFilterSettings {
            max_elements: self.max_elements,
            error_rate: self.error_rate,
            bits: hex::encode(self.bits.as_raw_slice()),
        }
    }

    pub fn insert(&mut self, element: &[u8]) {
        for position in hash_positions(element, self.hash_count, self.bits.len()) {
            self.bits.set(position, true);
        }
    }

    /// False positives are possible; false negatives are not.
    pub fn contains(&self, element: &[u8]) -> bool {
        hash_positions(element, self.hash_count, self.bits.len()).all(|position| self.bits[position])
    }

    pub fn size_bits(&self) -> usize {
        self.bits.len()
    }

    pub fn hash_count(&self) -> usize {
        self.hash_count
    }
}
