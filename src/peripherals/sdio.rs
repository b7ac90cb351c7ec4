//! SD host controller and SD DMA
//!
//! SDIO registers: 0xC0C00000, 0xC0C10000, 0xC0C20000, 0xC8060000
//! SD DMA registers: 0xC0510000, 0xC0530000, 0xC8020000
//!
//! All instances share one controller. Commands are executed synchronously
//! against the attached [`SdCard`]; data phases copy the whole transfer
//! through guest memory at once and then report completion through the
//! data-available status bit.
//!
//! Command flags seen from firmware:
//! - 0x01, 0x11: no response expected
//! - 0x04, 0x14: read with data phase
//! - 0x13: write with data phase (started from irq enable or SD DMA)

use bitflags::bitflags;
use thiserror::Error;

use super::{IoContext, Peripheral};
use crate::bus::PeripheralKind;

bitflags! {
    /// SDIO status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SdioStatus: u32 {
        /// Command complete
        const OK = 0x0000_0001;
        const ERROR = 0x0000_0002;
        /// Data phase finished
        const DATA_AVAILABLE = 0x0020_0000;
    }
}

/// SDIO register offsets (offset & 0xFFF)
mod regs {
    pub const DMA_ENABLE: u32 = 0x08;
    pub const CMD_FLAGS: u32 = 0x0C;
    pub const STATUS: u32 = 0x10;
    pub const IRQ_FLAGS: u32 = 0x14;
    pub const CMD_LO: u32 = 0x20;
    pub const CMD_HI: u32 = 0x24;
    pub const RESPONSE0: u32 = 0x34;
    pub const RESPONSE3: u32 = 0x40;
    pub const WRITE_BLOCK_SIZE: u32 = 0x5C;
    pub const READ_BLOCK_SIZE: u32 = 0x68;
    pub const TRANSFER_COUNT: u32 = 0x7C;
    pub const TRANSFERRED_BLOCKS: u32 = 0x80;
}

/// SD DMA register offsets (offset & 0x1F)
mod dma_regs {
    pub const ADDR: u32 = 0x00;
    pub const COUNT: u32 = 0x04;
    pub const FLAGS: u32 = 0x10;
    pub const STATUS: u32 = 0x14;
    pub const START: u32 = 0x18;
}

/// Command flag values with special handling
mod cmd_flags {
    pub const NO_RESPONSE: u32 = 0x01;
    pub const NO_RESPONSE_ALT: u32 = 0x11;
    pub const READ: u32 = 0x04;
    pub const READ_ALT: u32 = 0x14;
    pub const WRITE: u32 = 0x13;
}

/// One SD command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdRequest {
    /// Command index (0-63)
    pub cmd: u8,
    pub arg: u32,
}

/// Card response payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdResponse {
    None,
    /// R1/R3/R6/R7 body
    Short([u8; 4]),
    /// R2 (CID/CSD)
    Long([u8; 16]),
}

/// Card-side command failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CardError {
    #[error("illegal command CMD{0}")]
    IllegalCommand(u8),
    #[error("no card inserted")]
    NoCard,
}

/// SD card model the controller talks to
pub trait SdCard: Send {
    fn do_command(&mut self, request: SdRequest) -> Result<SdResponse, CardError>;
    fn read_byte(&mut self) -> u8;
    fn write_byte(&mut self, value: u8);
    /// True while a read data phase has bytes pending
    fn data_ready(&self) -> bool;
}

/// SD host controller state
pub struct SdioController {
    card: Option<Box<dyn SdCard>>,
    status: SdioStatus,
    cmd_flags: u32,
    cmd_lo: u32,
    cmd_hi: u32,
    irq_flags: u32,
    response: [u32; 4],
    read_block_size: u32,
    write_block_size: u32,
    transfer_count: u32,
    dma_enabled: bool,
    dma_addr: u32,
    dma_count: u32,
}

impl SdioController {
    pub fn new() -> Self {
        Self {
            card: None,
            status: SdioStatus::empty(),
            cmd_flags: 0,
            cmd_lo: 0,
            cmd_hi: 0,
            irq_flags: 0,
            response: [0; 4],
            read_block_size: 0,
            write_block_size: 0,
            transfer_count: 0,
            dma_enabled: false,
            dma_addr: 0,
            dma_count: 0,
        }
    }

    pub fn attach(&mut self, card: Box<dyn SdCard>) {
        self.card = Some(card);
    }

    pub fn status(&self) -> SdioStatus {
        self.status
    }

    pub fn response(&self) -> [u32; 4] {
        self.response
    }

    /// Decode the command registers
    fn request(&self) -> SdRequest {
        SdRequest {
            cmd: ((self.cmd_hi >> 8) & !0x40) as u8,
            arg: (self.cmd_lo >> 8) | ((self.cmd_hi & 0xFF) << 24),
        }
    }

    fn send_command(&mut self) {
        let request = self.request();
        let result = match self.card.as_mut() {
            Some(card) => card.do_command(request),
            None => Err(CardError::NoCard),
        };
        let response = match result {
            Ok(r) => r,
            Err(e) => {
                log::debug!("[SDIO] CMD{} failed: {}", request.cmd, e);
                self.status |= SdioStatus::ERROR;
                return;
            }
        };

        if self.cmd_flags != cmd_flags::NO_RESPONSE && self.cmd_flags != cmd_flags::NO_RESPONSE_ALT {
            // Card bytes land at offset 4 of a zeroed buffer; registers are
            // big-endian words taken from it.
            let mut buf = [0u8; 24];
            match response {
                SdResponse::None => {
                    self.status |= SdioStatus::ERROR;
                    return;
                }
                SdResponse::Short(bytes) => {
                    buf[4..8].copy_from_slice(&bytes);
                    self.response = [rword(&buf, 5), rword(&buf, 1), 0, 0];
                }
                SdResponse::Long(bytes) => {
                    buf[4..20].copy_from_slice(&bytes);
                    self.response = [rword(&buf, 16), rword(&buf, 12), rword(&buf, 8), rword(&buf, 4)];
                }
            }
        }
        self.status |= SdioStatus::OK;
    }

    fn read_data(&mut self, io: &IoContext<'_>) {
        if self.status.contains(SdioStatus::DATA_AVAILABLE) {
            return;
        }
        let Some(card) = self.card.as_mut() else {
            return;
        };
        if !card.data_ready() {
            return;
        }

        if !self.dma_enabled {
            // PIO reads are not modeled; drain the card so it stays in sync
            let len = u64::from(self.transfer_count) * u64::from(self.read_block_size);
            for _ in 0..len {
                card.read_byte();
            }
            return;
        }

        for i in 0..self.dma_count / 4 {
            let word = [card.read_byte(), card.read_byte(), card.read_byte(), card.read_byte()];
            io.cpu().write_phys(self.dma_addr.wrapping_add(i * 4), &word);
        }
        self.status |= SdioStatus::DATA_AVAILABLE;
    }

    fn write_data(&mut self, io: &IoContext<'_>) {
        if self.status.contains(SdioStatus::DATA_AVAILABLE) {
            return;
        }
        assert!(
            self.dma_enabled,
            "SDIO write of {}x{} bytes without DMA would corrupt the card image",
            self.transfer_count,
            self.write_block_size
        );
        let Some(card) = self.card.as_mut() else {
            return;
        };

        let mut word = [0u8; 4];
        for i in 0..self.dma_count / 4 {
            io.cpu().read_phys(self.dma_addr.wrapping_add(i * 4), &mut word);
            for b in word {
                card.write_byte(b);
            }
        }
        self.status |= SdioStatus::DATA_AVAILABLE;
    }

    /// Raise the completion interrupts if the current operation finished
    /// successfully and firmware asked for an interrupt.
    fn trigger_interrupt(&self, io: &IoContext<'_>) {
        let has_data_phase = self.cmd_flags == cmd_flags::WRITE || self.cmd_flags == cmd_flags::READ_ALT;
        if has_data_phase && !self.status.contains(SdioStatus::DATA_AVAILABLE) {
            return;
        }

        let ok = (self.status & (SdioStatus::OK | SdioStatus::ERROR)) == SdioStatus::OK;
        if ok && self.irq_flags != 0 {
            assert!(io.model.sd_driver_interrupt != 0, "model has no SD interrupt");
            io.irq.trigger(io.model.sd_driver_interrupt, 0);
            if self.dma_enabled {
                assert!(io.model.sd_dma_interrupt != 0, "model has no SD DMA interrupt");
                io.irq.trigger(io.model.sd_dma_interrupt, 0);
            }
        }
    }

    fn read_host(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let off = addr & 0xFFF;
        let (ret, msg) = match off {
            regs::STATUS => (self.status.bits(), "Status"),
            regs::RESPONSE0..=regs::RESPONSE3 if off & 3 == 0 => {
                (self.response[((off - regs::RESPONSE0) >> 2) as usize], "Response")
            }
            regs::TRANSFERRED_BLOCKS => (
                self.dma_count.checked_div(self.read_block_size).unwrap_or(0),
                "transferred blocks",
            ),
            regs::CMD_FLAGS => (self.cmd_flags, "Command flags?"),
            regs::IRQ_FLAGS => (self.irq_flags, "irq enable?"),
            _ => (0, ""),
        };
        io.log_read(addr, ret, msg);
        ret
    }

    fn write_host(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let msg = match addr & 0xFFF {
            regs::DMA_ENABLE => {
                self.dma_enabled = value != 0;
                "DMA"
            }
            regs::CMD_FLAGS => {
                self.cmd_flags = value;
                self.status = SdioStatus::empty();
                self.send_command();
                if value == cmd_flags::READ_ALT || value == cmd_flags::READ {
                    self.read_data(io);
                }
                self.trigger_interrupt(io);
                "Command flags?"
            }
            regs::STATUS => {
                self.status = SdioStatus::from_bits_retain(value);
                "Status"
            }
            regs::IRQ_FLAGS => {
                self.irq_flags = value;
                if self.cmd_flags == cmd_flags::WRITE && self.dma_enabled && value != 0 {
                    self.write_data(io);
                }
                // firmware may enable the interrupt after the transfer already finished
                self.trigger_interrupt(io);
                "irq enable?"
            }
            regs::CMD_LO => {
                self.cmd_lo = value;
                "cmd_lo"
            }
            regs::CMD_HI => {
                self.cmd_hi = value;
                "cmd_hi"
            }
            regs::WRITE_BLOCK_SIZE => {
                self.write_block_size = value;
                "write block size"
            }
            regs::READ_BLOCK_SIZE => {
                self.read_block_size = value;
                "read block size"
            }
            regs::TRANSFER_COUNT => {
                self.transfer_count = value;
                "transfer block count"
            }
            _ => "",
        };
        io.log_write(addr, value, msg);
    }

    fn read_dma(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let (ret, msg) = match addr & 0x1F {
            dma_regs::ADDR => (self.dma_addr, "Transfer memory address"),
            dma_regs::COUNT => (self.dma_count, "Transfer byte count"),
            dma_regs::STATUS => (if self.dma_enabled { 0x81 } else { 0 }, "Status?"),
            _ => (0, ""),
        };
        io.log_read(addr, ret, msg);
        ret
    }

    fn write_dma(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let msg = match addr & 0x1F {
            dma_regs::ADDR => {
                self.dma_addr = value;
                "Transfer memory address"
            }
            dma_regs::COUNT => {
                self.dma_count = value;
                "Transfer byte count"
            }
            dma_regs::FLAGS => {
                self.dma_enabled = value & 1 != 0;
                "Flags/Status"
            }
            dma_regs::START => {
                if self.cmd_flags == cmd_flags::WRITE {
                    self.write_data(io);
                    self.trigger_interrupt(io);
                }
                "Transfer start?"
            }
            _ => "",
        };
        io.log_write(addr, value, msg);
    }
}

/// Big-endian word at `n`
fn rword(buf: &[u8; 24], n: usize) -> u32 {
    u32::from_be_bytes([buf[n], buf[n + 1], buf[n + 2], buf[n + 3]])
}

impl Default for SdioController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SdioController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdioController")
            .field("card", &self.card.is_some())
            .field("status", &self.status)
            .field("cmd_flags", &self.cmd_flags)
            .field("dma_enabled", &self.dma_enabled)
            .field("dma_addr", &self.dma_addr)
            .field("dma_count", &self.dma_count)
            .finish_non_exhaustive()
    }
}

impl Peripheral for SdioController {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        match io.kind {
            PeripheralKind::SdDma => self.read_dma(io, addr),
            _ => self.read_host(io, addr),
        }
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        match io.kind {
            PeripheralKind::SdDma => self.write_dma(io, addr, value),
            _ => self.write_host(io, addr, value),
        }
    }
}
