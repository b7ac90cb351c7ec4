//! Canon EOS (DIGIC) Peripheral Emulation Core
//!
//! This crate emulates the memory-mapped peripherals of Canon DIGIC camera
//! SoCs. The ARM core is emulated elsewhere and talks to this crate through
//! the [`Cpu`] trait and [`Emu::access`].
//!
//! # Architecture
//!
//! - `bus`: address decoding, first-match handler table
//! - `peripherals`: register files (interrupts, timers, DMA, storage, flash,
//!   display, system registers)
//! - `ticker`: periodic time base driving timers, deferred interrupts and
//!   CF DMA
//! - `emu`: machine orchestrator
//!
//! # Memory Map (DIGIC 4/5)
//!
//! | Address Range           | Region                      |
//! |-------------------------|-----------------------------|
//! | 0xC0000000              | Flash interface             |
//! | 0xC0200000 - 0xC0201FFF | Interrupt controller        |
//! | 0xC0210000 - 0xC0243FFF | Timers, DIGIC clock, HPTimer|
//! | 0xC0500000 - 0xC062FFFF | CF DMA, SD DMA, CF ATA      |
//! | 0xC0800000              | TIO debug UART              |
//! | 0xC0A10000 - 0xC0A4FFFF | DMA channels 1-4            |
//! | 0xC0C00000 - 0xC0C2FFFF | SDIO                        |
//! | 0xC0F00000 - 0xC0FFFFFF | EDMAC, display, image engine|
//! | 0xD0000000 - 0xDFFFFFFF | DIGIC 6 registers           |
//! | 0xF0000000 - 0xFFFFFFFF | ROM1, ROM0 (NOR flash)      |
//!
//! # Logging
//!
//! Register traces go to the `eos::io` target at debug level, debug console
//! output to `eos::tio` at info level.

pub mod bus;
pub mod config;
pub mod cpu;
pub mod error;
pub mod peripherals;
pub mod ticker;
mod emu;

#[cfg(test)]
mod test_support;

#[cfg(test)]
mod machine_integration_test;

pub use bus::{AccessOp, Bus, Handler, PeripheralKind};
pub use config::{ColorMatrix, DisplayKind, ModelConfig, RomBankConfig};
pub use cpu::Cpu;
pub use emu::Emu;
pub use error::ConfigError;
pub use peripherals::{AtaDevice, CardLed, DisplaySink, FrameBuffer, SdCard};
pub use ticker::BackgroundTicker;
