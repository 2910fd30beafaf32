//! Deterministic randomness for a generation run.
//!
//! A run owns exactly one generator, seeded from a BLAKE3 hash of the song
//! name, and passes it by `&mut` to every stage that draws random numbers.
//! The same song name therefore always reproduces the same beatmap as long as
//! the order of draws does not change.

use rand::SeedableRng;
use rand_pcg::Pcg32;

/// Generator type threaded through the pipeline.
pub type SynthRng = Pcg32;

/// Derives the 64-bit run seed from a song name.
pub fn song_seed(song_name: &str) -> u64 {
    let hash = blake3::hash(song_name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}

/// Creates a PCG32 generator from an explicit seed.
pub fn create_rng(seed: u64) -> SynthRng {
    Pcg32::seed_from_u64(seed)
}

/// Creates the run generator for a song.
pub fn song_rng(song_name: &str) -> SynthRng {
    create_rng(song_seed(song_name))
}
