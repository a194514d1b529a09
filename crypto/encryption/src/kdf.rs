// Copyright (c) 2024 The Botho Foundation

//! Memory-hard passphrase stretching (ROMix over SHA-512).

use crate::{hash, Error};
use bth_util_binary::{BinaryReader, BinaryWriter, FormatError};
use rand_core::{OsRng, RngCore};
use std::time::{Duration, Instant};
use tracing::debug;
use zeroize::Zeroizing;

/// Serialized tag of the ROMix variant.
pub const KDF_ROMIX_PREFIX: u16 = 0xC100;

const HASH_OUTPUT_BYTES: usize = 64;
const KDF_OUTPUT_BYTES: usize = 32;
const SALT_BYTES: usize = 32;
const MIN_MEMORY_BYTES: u32 = 1024;
const CALIBRATION_KEY: &[u8] = b"This is an example key to test KDF iteration speed";

/// Cost targets used when creating a new KDF.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KdfSettings {
    /// Wall-clock time one full derivation should take.
    pub target_compute: Duration,
    /// Upper bound for the lookup table.
    pub max_memory_bytes: u32,
}

impl KdfSettings {
    /// Minimal parameters (1 iteration, 1 KiB); used for tests and for
    /// wallets whose passphrase is empty anyway.
    pub fn fast() -> Self {
        Self {
            target_compute: Duration::ZERO,
            max_memory_bytes: MIN_MEMORY_BYTES,
        }
    }
}

impl Default for KdfSettings {
    fn default() -> Self {
        Self {
            target_compute: Duration::from_millis(250),
            max_memory_bytes: 32 * 1024 * 1024,
        }
    }
}

/// ROMix key derivation parameters.
///
/// Stateless given its parameters: [`KdfRomix::derive_key`] is a pure
/// function of `(passphrase, salt, iterations, memory_target)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KdfRomix {
    iterations: u32,
    memory_target: u32,
    salt: Vec<u8>,
    id: [u8; 32],
}

impl KdfRomix {
    /// Draw a fresh salt and calibrate cost parameters to `settings`.
    pub fn initialize(settings: &KdfSettings) -> Self {
        let mut salt = vec![0u8; SALT_BYTES];
        OsRng.fill_bytes(&mut salt);

        if settings.target_compute.is_zero() {
            return Self::with_params(1, MIN_MEMORY_BYTES, salt);
        }

        let target = settings.target_compute.as_secs_f64();
        let mut memory = MIN_MEMORY_BYTES;
        let mut elapsed = 0.0;
        let mut probe = Zeroizing::new(CALIBRATION_KEY.to_vec());
        while elapsed <= target / 4.0 && memory < settings.max_memory_bytes {
            memory = memory.saturating_mul(2);
            let start = Instant::now();
            probe = romix_once(&probe, &salt, memory);
            elapsed = start.elapsed().as_secs_f64();
        }

        let mut rounds: u32 = 1;
        let mut all_rounds = 0.0;
        while all_rounds < 0.02 {
            rounds = rounds.saturating_mul(2);
            let start = Instant::now();
            for _ in 0..rounds {
                romix_once(CALIBRATION_KEY, &salt, memory);
            }
            all_rounds = start.elapsed().as_secs_f64();
        }
        let per_round = all_rounds / rounds as f64;
        let iterations = ((target / (per_round + 0.0005)) as u32).max(1);

        debug!(iterations, memory, "Calibrated KDF");
        Self::with_params(iterations, memory, salt)
    }

    /// Use known parameters, e.g. read back from storage.
    pub fn with_params(iterations: u32, memory_target: u32, salt: Vec<u8>) -> Self {
        let mut writer = BinaryWriter::with_capacity(salt.len() + 8);
        writer
            .put_bytes(&salt)
            .put_u32(iterations)
            .put_u32(memory_target);
        let id = hash::hash256(writer.as_slice());
        Self {
            iterations,
            memory_target,
            salt,
            id,
        }
    }

    /// Stretch `passphrase` into a 32-byte key.
    pub fn derive_key(&self, passphrase: &[u8]) -> Zeroizing<Vec<u8>> {
        let mut key = Zeroizing::new(passphrase.to_vec());
        for _ in 0..self.iterations {
            key = romix_once(&key, &self.salt, self.memory_target);
        }
        key
    }

    /// Content hash of the parameters.
    pub fn id(&self) -> &[u8; 32] {
        &self.id
    }

    /// Number of ROMix rounds.
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Lookup table size in bytes.
    pub fn memory_target(&self) -> u32 {
        self.memory_target
    }

    /// Salt mixed into every round.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// True if both describe the same derivation.
    pub fn is_same(&self, other: &KdfRomix) -> bool {
        self.iterations == other.iterations
            && self.memory_target == other.memory_target
            && self.salt == other.salt
    }

    /// `var_int(len) || u16 prefix || u32 iterations || u32 memory || var_bytes(salt)`
    pub fn serialize(&self) -> Vec<u8> {
        let mut body = BinaryWriter::with_capacity(self.salt.len() + 12);
        body.put_u16(KDF_ROMIX_PREFIX)
            .put_u32(self.iterations)
            .put_u32(self.memory_target)
            .put_var_bytes(&self.salt);

        let mut out = BinaryWriter::with_capacity(body.len() + 1);
        out.put_var_bytes(body.as_slice());
        out.into_vec()
    }

    /// Parse the output of [`KdfRomix::serialize`].
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let mut reader = BinaryReader::new(data);
        let declared = reader.get_var_int()? as usize;
        if declared != reader.remaining() {
            return Err(FormatError::LengthMismatch {
                declared,
                found: reader.remaining(),
            }
            .into());
        }

        let prefix = reader.get_u16()?;
        if prefix != KDF_ROMIX_PREFIX {
            return Err(FormatError::Invalid(format!("unexpected KDF prefix 0x{prefix:04x}")).into());
        }
        let iterations = reader.get_u32()?;
        let memory_target = reader.get_u32()?;
        let salt = reader.get_var_bytes()?.to_vec();
        if !reader.is_empty() {
            return Err(FormatError::Invalid("trailing bytes after KDF".into()).into());
        }
        if memory_target < HASH_OUTPUT_BYTES as u32 {
            return Err(FormatError::Invalid(format!("KDF memory {memory_target} too small")).into());
        }
        Ok(Self::with_params(iterations, memory_target, salt))
    }
}

/// One ROMix pass: fill a lookup table with chained SHA-512 hashes, then walk
/// it with data-dependent lookups.
fn romix_once(password: &[u8], salt: &[u8], memory_target: u32) -> Zeroizing<Vec<u8>> {
    let memory = memory_target as usize;
    let sequence_count = (memory / HASH_OUTPUT_BYTES).max(1);
    let mut table = Zeroizing::new(vec![0u8; sequence_count * HASH_OUTPUT_BYTES]);

    let mut salted = Zeroizing::new(Vec::with_capacity(password.len() + salt.len()));
    salted.extend_from_slice(password);
    salted.extend_from_slice(salt);
    table[..HASH_OUTPUT_BYTES].copy_from_slice(&hash::sha512(&salted));

    for slot in 1..sequence_count {
        let (done, rest) = table.split_at_mut(slot * HASH_OUTPUT_BYTES);
        let previous = &done[(slot - 1) * HASH_OUTPUT_BYTES..];
        rest[..HASH_OUTPUT_BYTES].copy_from_slice(&hash::sha512(previous));
    }

    let last = (sequence_count - 1) * HASH_OUTPUT_BYTES;
    let mut x = Zeroizing::new([0u8; HASH_OUTPUT_BYTES]);
    x.copy_from_slice(&table[last..last + HASH_OUTPUT_BYTES]);
    let mut y = Zeroizing::new([0u8; HASH_OUTPUT_BYTES]);

    for _ in 0..sequence_count / 2 {
        let mut tail = [0u8; 4];
        tail.copy_from_slice(&x[HASH_OUTPUT_BYTES - 4..]);
        let index = u32::from_le_bytes(tail) as usize % sequence_count;
        let v = &table[index * HASH_OUTPUT_BYTES..(index + 1) * HASH_OUTPUT_BYTES];
        for (out, (a, b)) in y.iter_mut().zip(x.iter().zip(v)) {
            *out = a ^ b;
        }
        *x = hash::sha512(&y[..]);
    }

    Zeroizing::new(x[..KDF_OUTPUT_BYTES].to_vec())
}
