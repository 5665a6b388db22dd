//! On-disk reputation database.
//!
//! A fixed-footprint probabilistic classifier: five tables of 2^24 two-bit
//! slots (4 MiB each, 20 MiB total). An address is classified by reading the
//! same logical key from all five tables and taking the value only when they
//! agree; any disagreement — including the all-zero default — reads as
//! [`Reputation::Unknown`]. Keys are derived from the textual address bytes
//! by iterating MD5 1001 times; the iteration count hardens brute-force
//! pre-image search of the database and must not change, or existing DB
//! files become unreadable.

use md5::{Digest, Md5};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Slots per table: one per 24-bit key.
const TABLE_SLOTS: usize = 256 * 256 * 256;
/// Bytes per table: four two-bit slots per byte.
const TABLE_BYTES: usize = TABLE_SLOTS / 4;
/// Exact on-disk size of a database file.
pub const DB_SIZE: usize = TABLE_BYTES * 5;

const TABLES: usize = 5;
const MD5_ROUNDS: usize = 1000;

#[derive(Debug, Error)]
pub enum IpdbError {
    #[error("failed to read reputation database: {0}")]
    Io(#[from] std::io::Error),

    #[error("reputation database has wrong size: expected {DB_SIZE} bytes, got {0}")]
    WrongSize(usize),
}

// ── Reputation classes ───────────────────────────────────────────────────────

/// Two-bit reputation class, in increasing severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Reputation {
    Unknown  = 0,
    Low      = 1,
    Medium   = 2,
    Critical = 3,
}

impl Reputation {
    fn from_slot(v: u8) -> Self {
        match v & 0b11 {
            1 => Reputation::Low,
            2 => Reputation::Medium,
            3 => Reputation::Critical,
            _ => Reputation::Unknown,
        }
    }
}

// ── Database ─────────────────────────────────────────────────────────────────

/// In-memory reputation database. Immutable after load; lookups take `&self`
/// and the daemon shares one instance across all probe threads without a lock.
pub struct Ipdb {
    data: Vec<u8>,
}

impl Ipdb {
    /// Reads a database file fully into memory.
    ///
    /// # Errors
    /// Any read failure or size mismatch is returned as-is; the caller treats
    /// both as fatal. No partially-loaded database is ever constructed.
    pub fn open(path: &Path) -> Result<Self, IpdbError> {
        let data = fs::read(path)?;
        Self::from_bytes(data)
    }

    /// Wraps an already-materialised byte buffer, validating its size.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, IpdbError> {
        if data.len() != DB_SIZE {
            return Err(IpdbError::WrongSize(data.len()));
        }
        Ok(Self { data })
    }

    /// An all-zero database: every lookup returns `Unknown`. Starting point
    /// for builders.
    pub fn empty() -> Self {
        Self { data: vec![0u8; DB_SIZE] }
    }

    /// Derives the five 24-bit table keys for an address.
    ///
    /// The digest schedule is MD5 applied 1001 times to the textual address
    /// bytes; the keys are little-endian 3-byte groups at digest offsets
    /// 0, 3, 6, 9 and 12.
    fn derive_keys(ip: &[u8]) -> [u32; TABLES] {
        let mut digest = Md5::digest(ip);
        for _ in 0..MD5_ROUNDS {
            digest = Md5::digest(&digest);
        }

        let mut keys = [0u32; TABLES];
        for (i, key) in keys.iter_mut().enumerate() {
            *key = u32::from(digest[i * 3])
                | u32::from(digest[i * 3 + 1]) << 8
                | u32::from(digest[i * 3 + 2]) << 16;
        }
        keys
    }

    /// Reads the two-bit slot `key` of table `table`.
    fn slot(&self, table: usize, key: u32) -> u8 {
        let offset = table * TABLE_BYTES + (key / 4) as usize;
        let shift = (key % 4) * 2;
        (self.data[offset] >> shift) & 0b11
    }

    /// Writes the two-bit slot `key` of table `table`.
    fn set_slot(&mut self, table: usize, key: u32, value: u8) {
        let offset = table * TABLE_BYTES + (key / 4) as usize;
        let shift = (key % 4) * 2;
        self.data[offset] &= !(0b11 << shift);
        self.data[offset] |= (value & 0b11) << shift;
    }

    /// Classifies an address by five-way vote.
    ///
    /// Returns the common class when all five tables agree and `Unknown` on
    /// any disagreement. Lookups are deterministic for a given database.
    pub fn get(&self, ip: &str) -> Reputation {
        let keys = Self::derive_keys(ip.as_bytes());
        let first = self.slot(0, keys[0]);
        for (table, &key) in keys.iter().enumerate().skip(1) {
            if self.slot(table, key) != first {
                return Reputation::Unknown;
            }
        }
        Reputation::from_slot(first)
    }

    /// Records a class for an address in all five tables.
    ///
    /// This is the builder-side write path; the daemon itself never mutates
    /// a loaded database.
    pub fn set(&mut self, ip: &str, class: Reputation) {
        let keys = Self::derive_keys(ip.as_bytes());
        for (table, &key) in keys.iter().enumerate() {
            self.set_slot(table, key, class as u8);
        }
    }

    /// The raw backing bytes, for writing a built database out.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}
