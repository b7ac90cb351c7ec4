//! Per-model machine configuration
//!
//! Everything that differs between camera bodies and that the peripheral
//! core needs to know lives here: ROM layout, interrupt line numbers, the
//! OS tick timer, display output kind and the flash emulation switch.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Number of ROM banks (ROM0 at 0xF8000000, ROM1 at 0xF0000000)
pub const ROM_BANKS: usize = 2;

/// One memory-mapped ROM bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RomBankConfig {
    /// Bus address of the first byte
    pub base: u32,
    /// Bank size in bytes (power of two, mirrored across the window)
    pub size: u32,
}

/// Video output the compositor renders for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DisplayKind {
    /// Built-in LCD
    #[default]
    Lcd,
    /// HDMI 1080i
    Hdmi1080,
    /// HDMI 480p
    Hdmi480,
    /// Composite PAL
    SdPal,
    /// Composite NTSC
    SdNtsc,
}

/// YUV to RGB conversion coefficients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ColorMatrix {
    /// ITU-R BT.601
    Bt601,
    /// ITU-R BT.709
    #[default]
    Bt709,
}

/// Camera model description
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ModelConfig {
    /// Model name, used to pick model-specific GPIO constants
    pub name: String,
    /// DIGIC generation (3, 4, 5, 6)
    pub digic_version: u8,
    /// ROM0 and ROM1
    pub rom: [RomBankConfig; ROM_BANKS],
    /// Interrupt raised by the OS tick timer
    pub timer_interrupt: u32,
    /// Interrupt raised by the HPTimer bank
    pub hptimer_interrupt: u32,
    /// Timer index the OS uses as its tick source
    pub os_timer_id: usize,
    /// SD controller interrupt line
    pub sd_driver_interrupt: u32,
    /// SD DMA completion interrupt line
    pub sd_dma_interrupt: u32,
    /// CF controller interrupt line
    pub cf_driver_interrupt: u32,
    /// CF DMA completion interrupt line
    pub cf_dma_interrupt: u32,
    /// Emulate the NOR command protocol; when off, ROM is plain memory
    pub flash_state_machine: bool,
    /// GPIO register driving the card activity LED
    pub card_led_address: Option<u32>,
    /// Active video output
    pub display: DisplayKind,
    /// YUV matrix used by the compositor
    pub color_matrix: ColorMatrix,
    /// Background ticker period in microseconds
    pub tick_period_us: u64,
}

impl ModelConfig {
    /// Check the parts of the layout the peripherals rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (bank, rom) in self.rom.iter().enumerate() {
            if !rom.size.is_power_of_two() {
                return Err(ConfigError::RomSizeNotPowerOfTwo {
                    bank,
                    size: rom.size,
                });
            }
        }
        Ok(())
    }

    /// Whether this body uses the DIGIC 6 register layout
    pub fn is_digic6(&self) -> bool {
        self.digic_version == 6
    }
}

impl Default for ModelConfig {
    /// A generic DIGIC 5 body
    fn default() -> Self {
        Self {
            name: "DIGIC5".to_string(),
            digic_version: 5,
            rom: [
                RomBankConfig {
                    base: 0xF800_0000,
                    size: 0x0100_0000,
                },
                RomBankConfig {
                    base: 0xF000_0000,
                    size: 0x0080_0000,
                },
            ],
            timer_interrupt: 0x0A,
            hptimer_interrupt: 0x10,
            os_timer_id: 2,
            sd_driver_interrupt: 0x4B,
            sd_dma_interrupt: 0x32,
            cf_driver_interrupt: 0x82,
            cf_dma_interrupt: 0xE3,
            flash_state_machine: true,
            card_led_address: None,
            display: DisplayKind::Lcd,
            color_matrix: ColorMatrix::Bt709,
            tick_period_us: 0x100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let cfg = ModelConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(!cfg.is_digic6());
        assert_eq!(cfg.tick_period_us, 256);
    }

    #[test]
    fn test_rejects_odd_rom_size() {
        let mut cfg = ModelConfig::default();
        cfg.rom[1].size = 0x0060_0000;
        match cfg.validate() {
            Err(ConfigError::RomSizeNotPowerOfTwo { bank, size }) => {
                assert_eq!(bank, 1);
                assert_eq!(size, 0x0060_0000);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
