//! Load-time and configuration errors
//!
//! Register accesses never fail from the host's point of view; only machine
//! assembly (ROM images, handler tables) reports errors.

use thiserror::Error;

/// Errors raised while assembling a machine
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ROM bank size must be a power of two so accesses can be mirrored
    #[error("ROM{bank} size {size:#x} is not a power of two")]
    RomSizeNotPowerOfTwo { bank: usize, size: u32 },

    /// Image does not fit in the bank at the requested offset
    #[error("ROM{bank} image of {len:#x} bytes does not fit at offset {offset:#x} (bank size {size:#x})")]
    RomTooLarge {
        bank: usize,
        offset: u32,
        len: usize,
        size: u32,
    },

    /// Requested file offset is past the end of the image file
    #[error("offset {offset:#x} is past the end of {path} ({len:#x} bytes)")]
    RomOffsetTooLarge {
        path: String,
        offset: u64,
        len: u64,
    },

    /// Bank index outside the configured banks
    #[error("no ROM bank {0}")]
    RomBankMissing(usize),

    /// Two handler table entries claim the same address
    #[error("handler {first} ({first_lo:#010x}-{first_hi:#010x}) overlaps {second} ({second_lo:#010x}-{second_hi:#010x})")]
    OverlappingHandlers {
        first: &'static str,
        first_lo: u32,
        first_hi: u32,
        second: &'static str,
        second_lo: u32,
        second_hi: u32,
    },

    /// Failure reading an image from disk
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
