//! Canon EOS (DIGIC) Peripheral Emulation
//!
//! This module contains the memory-mapped peripheral controllers:
//! - Flash interface (0xC0000000) and NOR ROM banks (0xF0000000, 0xF8000000)
//! - Interrupt controller (0xC0200000, 0xC0201000, 0xD4011000)
//! - Timers (0xC0210000, 0xD4000240), DIGIC clock and HPTimers (0xC0243000)
//! - DMA (0xC0A10000-0xC0A40000) and EDMAC (0xC0F04000, 0xC0F26000, 0xC0F30000)
//! - SDIO (0xC0C00000 ...) and SD DMA
//! - CF/ATA (0xC0600000) and CF DMA (0xC0500000)
//! - Display palette and VRAM registers (0xC0F14000)
//! - TIO debug UART (0xC0800000)
//! - Clock enable, power, GPIO and other fixed-value registers

pub mod cfata;
pub mod display;
pub mod dma;
pub mod edmac;
pub mod flash;
pub mod hptimer;
pub mod interrupt;
pub mod sdio;
pub mod system;
pub mod timer;
pub mod tio;

pub use cfata::{AtaDevice, CfController};
pub use display::{CardLed, Display, DisplayCompositor, DisplaySink, FrameBuffer};
pub use dma::DmaEngine;
pub use edmac::EdmacEngine;
pub use flash::{FlashController, FlashInterface};
pub use hptimer::{HpTimerBank, HpTimerPort};
pub use interrupt::{IntEngine, InterruptController, Interrupts, IrqDomain};
pub use sdio::{SdCard, SdioController};
pub use system::{BasicRegs, CardLedRegister, Digic6Regs, Engio, Gpio, PowerControl};
pub use timer::{FreeRunningClock, TimerBank, TimerPort};
pub use tio::Tio;

use std::fmt;

use crate::bus::{io_log, io_trace_enabled, AccessOp, PeripheralKind};
use crate::config::ModelConfig;
use crate::cpu::Cpu;

/// Everything a register access needs besides the peripheral itself
pub struct IoContext<'a> {
    /// Handler table name, for trace output
    pub name: &'static str,
    /// Which register file the handler selected
    pub kind: PeripheralKind,
    /// Per-entry handler parameter (instance, bank or generation)
    pub param: u32,
    /// IRQ domain and CPU
    pub irq: &'a Interrupts,
    pub model: &'a ModelConfig,
}

impl IoContext<'_> {
    pub fn cpu(&self) -> &dyn Cpu {
        self.irq.cpu()
    }

    /// Trace a register read
    pub fn log_read(&self, addr: u32, ret: u32, msg: impl fmt::Display) {
        if io_trace_enabled() {
            io_log(self.name, self.cpu().current_pc(), addr, AccessOp::Read, ret, msg);
        }
    }

    /// Trace a register write
    pub fn log_write(&self, addr: u32, value: u32, msg: impl fmt::Display) {
        if io_trace_enabled() {
            io_log(self.name, self.cpu().current_pc(), addr, AccessOp::Write, value, msg);
        }
    }
}

/// A memory-mapped register file.
///
/// Addresses are absolute bus addresses; implementations mask out the
/// offsets they decode. Reads may have side effects.
pub trait Peripheral {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32;
    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32);
}

/// Peripheral subsystem containing all register files
#[derive(Debug)]
pub struct Peripherals {
    /// Flash interface register (0xC0000000)
    pub flash_if: FlashInterface,
    /// NOR flash over the two ROM banks
    pub flash: FlashController,
    /// Interrupt controller ports
    pub intengine: IntEngine,
    /// Timer and DIGIC clock ports
    pub timers: TimerPort,
    /// HPTimer port
    pub hptimers: HpTimerPort,
    /// Generic DMA channels
    pub dma: DmaEngine,
    /// Image-pipeline DMA and its connection matrix
    pub edmac: EdmacEngine,
    /// SD host controller and SD DMA
    pub sdio: SdioController,
    /// CF/ATA host and CF DMA
    pub cf: CfController,
    /// Display palette and VRAM pointers
    pub display: Display,
    /// Debug UART
    pub tio: Tio,
    /// Clock enable and boot-time constants
    pub basic: BasicRegs,
    /// Power control register file
    pub power: PowerControl,
    /// GPIO constants and card LED
    pub gpio: Gpio,
    /// DIGIC 6 system registers
    pub digic6: Digic6Regs,
    /// Image engine catch-all
    pub engio: Engio,
}

impl Peripherals {
    /// Create the peripheral set for a model
    pub fn new(model: &ModelConfig) -> Self {
        Self {
            flash_if: FlashInterface::new(),
            flash: FlashController::new(model),
            intengine: IntEngine,
            timers: TimerPort,
            hptimers: HpTimerPort,
            dma: DmaEngine::new(),
            edmac: EdmacEngine::new(),
            sdio: SdioController::new(),
            cf: CfController::new(),
            display: Display::new(model.color_matrix),
            tio: Tio::new(),
            basic: BasicRegs::new(),
            power: PowerControl::new(),
            gpio: Gpio::new(),
            digic6: Digic6Regs::new(),
            engio: Engio,
        }
    }

    /// Register file serving a handler kind
    pub fn device_mut(&mut self, kind: PeripheralKind) -> &mut dyn Peripheral {
        match kind {
            PeripheralKind::FlashIf => &mut self.flash_if,
            PeripheralKind::Rom => &mut self.flash,
            PeripheralKind::IntEngine | PeripheralKind::IntEngineVx => &mut self.intengine,
            PeripheralKind::Timers | PeripheralKind::DigicClock => &mut self.timers,
            PeripheralKind::HpTimer => &mut self.hptimers,
            PeripheralKind::Dma => &mut self.dma,
            PeripheralKind::Edmac | PeripheralKind::ChannelSwitch => &mut self.edmac,
            PeripheralKind::Sdio | PeripheralKind::SdDma => &mut self.sdio,
            PeripheralKind::CfAta | PeripheralKind::CfDma => &mut self.cf,
            PeripheralKind::Display => &mut self.display,
            PeripheralKind::Tio => &mut self.tio,
            PeripheralKind::Basic => &mut self.basic,
            PeripheralKind::Power => &mut self.power,
            PeripheralKind::Gpio => &mut self.gpio,
            PeripheralKind::Digic6 => &mut self.digic6,
            PeripheralKind::Engio => &mut self.engio,
        }
    }
}
