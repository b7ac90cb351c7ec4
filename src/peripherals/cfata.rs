//! CompactFlash host (ATA task file) and CF DMA
//!
//! CF ATA registers: 0xC0600000, 0xC0620000
//! CF DMA registers: 0xC0500000
//!
//! DMA transfers are not performed by the register handler. Starting one
//! only records a request. The background ticker drains it word by word while
//! the drive asserts DRQ, so a drive that fills its buffer slowly simply
//! takes more ticks.
//!
//! CF state has its own lock, separate from the IRQ lock. Interrupts owed by
//! CF are returned to the caller and raised after the CF lock is released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{IoContext, Peripheral};
use crate::bus::PeripheralKind;
use crate::config::ModelConfig;
use crate::cpu::Cpu;

/// ATA status: data request
pub const DRQ_STAT: u8 = 0x08;

/// CF DMA register offsets (offset & 0x1F)
mod dma_regs {
    pub const ADDR: u32 = 0x00;
    /// Write: byte count. Read: bytes transferred so far
    pub const COUNT: u32 = 0x04;
    pub const COMMAND: u32 = 0x10;
    pub const STATUS: u32 = 0x14;
}

/// DMA command values
mod dma_cmd {
    pub const WRITE_START: u32 = 0x3D;
    pub const READ_START: u32 = 0x39;
    pub const READ_START_ALT: u32 = 0x21;
}

/// CF ATA register offsets (offset & 0xFFFF)
mod regs {
    pub const DMA_READY: u32 = 0x8104;
    pub const INT_ENABLE: u32 = 0x8040;
    pub const INT_STATUS: u32 = 0x8044;
    /// Task file at 0x21F0 (data) .. 0x21F7 (command/status)
    pub const TASK_FILE: u32 = 0x21F0;
    /// Second task file mapping
    pub const TASK_FILE_ALT: u32 = 0x2000;
    pub const DEVICE_CONTROL: u32 = 0x23F6;
    pub const DEVICE_CONTROL_ALT: u32 = 0x200E;
}

/// `interrupt_enabled` bits
mod int_bits {
    pub const DRIVER: u32 = 0x0200_0001;
    pub const DMA: u32 = 0x0001_0000;
}

const TASK_FILE_NAMES: [&str; 8] = [
    "ATA data port",
    "ATA feature/error",
    "ATA sector count",
    "ATA LBAlo",
    "ATA LBAmid",
    "ATA LBAhi",
    "ATA drive/head port",
    "ATA command/status",
];

/// ATA drive as seen through the task-file registers.
pub trait AtaDevice: Send {
    /// Read task-file register 1..=7. Reading 7 (status) acknowledges the
    /// drive's interrupt.
    fn read_register(&mut self, offset: u8) -> u8;
    fn write_register(&mut self, offset: u8, value: u8);
    fn read_data16(&mut self) -> u16;
    fn write_data16(&mut self, value: u16);
    /// Alternate status (no side effects)
    fn status(&self) -> u8;
    fn write_device_control(&mut self, value: u8);

    fn read_data32(&mut self) -> u32 {
        let lo = u32::from(self.read_data16());
        let hi = u32::from(self.read_data16());
        lo | (hi << 16)
    }

    fn write_data32(&mut self, value: u32) {
        self.write_data16(value as u16);
        self.write_data16((value >> 16) as u16);
    }

    fn data_ready(&self) -> bool {
        self.status() & DRQ_STAT != 0
    }
}

/// CF host state, guarded by the CF lock
#[derive(Default)]
pub struct CfState {
    device: Option<Box<dyn AtaDevice>>,
    dma_addr: u32,
    dma_count: u32,
    /// Bytes moved by the current DMA transfer
    dma_done: u32,
    read_request: bool,
    write_request: bool,
    /// Host interrupt enable mask (0x8040)
    interrupt_enabled: u32,
    /// nIEN clear in the device control register
    ata_interrupt_enabled: bool,
    /// A command was issued with interrupts enabled and status not yet read
    pending_interrupt: bool,
}

impl CfState {
    fn transfer_pending(&self) -> bool {
        self.read_request || self.write_request
    }

    fn drive_ready(&self) -> bool {
        self.device.as_ref().map_or(false, |d| d.data_ready())
    }

    /// Interrupts to raise for a finished transfer or command
    fn completion_interrupts(&self, model: &ModelConfig, out: &mut Vec<u32>) {
        if self.interrupt_enabled & int_bits::DRIVER != 0 {
            assert!(model.cf_driver_interrupt != 0, "model has no CF interrupt");
            out.push(model.cf_driver_interrupt);
        }
        if self.interrupt_enabled & int_bits::DMA != 0 {
            assert!(model.cf_dma_interrupt != 0, "model has no CF DMA interrupt");
            out.push(model.cf_dma_interrupt);
        }
    }

    /// Move drive data into guest memory while DRQ holds.
    /// Returns true once the whole transfer is done.
    fn drain_read(&mut self, cpu: &dyn Cpu) -> bool {
        assert!(
            self.dma_count % 4 == 0,
            "CF DMA count {:#x} is not a multiple of 4",
            self.dma_count
        );
        log::debug!(
            "[CFDMA] reading {} of {} bytes to {:#010x}",
            self.dma_count - self.dma_done.min(self.dma_count),
            self.dma_count,
            self.dma_addr.wrapping_add(self.dma_done)
        );
        while self.dma_done < self.dma_count && self.drive_ready() {
            let Some(device) = self.device.as_mut() else {
                break;
            };
            let value = device.read_data32();
            cpu.write_u32(self.dma_addr.wrapping_add(self.dma_done), value);
            self.dma_done += 4;
        }
        self.dma_done >= self.dma_count
    }

    /// Move guest memory to the drive while DRQ holds.
    /// Returns true once the whole transfer is done.
    fn drain_write(&mut self, cpu: &dyn Cpu) -> bool {
        assert!(
            self.dma_count % 4 == 0,
            "CF DMA count {:#x} is not a multiple of 4",
            self.dma_count
        );
        while self.dma_done < self.dma_count && self.drive_ready() {
            let Some(device) = self.device.as_mut() else {
                break;
            };
            let value = cpu.read_u32(self.dma_addr.wrapping_add(self.dma_done));
            device.write_data32(value);
            self.dma_done += 4;
        }
        self.dma_done >= self.dma_count
    }

    /// One ticker pass: advance pending transfers, flush a pending
    /// command interrupt. Returns the interrupt ids to raise.
    pub fn service(&mut self, cpu: &dyn Cpu, model: &ModelConfig) -> Vec<u32> {
        let mut ids = Vec::new();

        if self.read_request && self.drain_read(cpu) {
            self.read_request = false;
            self.completion_interrupts(model, &mut ids);
        }
        if self.write_request && self.drain_write(cpu) {
            self.write_request = false;
            self.completion_interrupts(model, &mut ids);
        }
        if self.pending_interrupt && self.interrupt_enabled == 1 {
            self.completion_interrupts(model, &mut ids);
            self.pending_interrupt = false;
        }
        ids
    }

    /// A DMA start with no drive behind the port can never complete
    fn assert_dma_target(&self, command: u32) {
        assert!(
            self.device.is_some(),
            "CF DMA command {:#x} with no ATA device attached",
            command
        );
    }

    fn read_dma(&mut self, addr: u32) -> (u32, &'static str) {
        match addr & 0x1F {
            dma_regs::ADDR => (self.dma_addr, "Transfer memory address"),
            dma_regs::COUNT => (self.dma_done, "Transfer byte count"),
            dma_regs::COMMAND => (0, "Unknown transfer command"),
            dma_regs::STATUS => (3, "DMA status?"),
            _ => (0, ""),
        }
    }

    fn write_dma(&mut self, addr: u32, value: u32) -> &'static str {
        match addr & 0x1F {
            dma_regs::ADDR => {
                self.dma_addr = value;
                "Transfer memory address"
            }
            dma_regs::COUNT => {
                self.dma_count = value;
                "Transfer byte count"
            }
            dma_regs::COMMAND => match value {
                dma_cmd::WRITE_START => {
                    self.assert_dma_target(value);
                    self.dma_done = 0;
                    self.write_request = true;
                    "DMA write start"
                }
                dma_cmd::READ_START | dma_cmd::READ_START_ALT => {
                    self.assert_dma_target(value);
                    self.dma_done = 0;
                    self.read_request = true;
                    "DMA read start"
                }
                _ => "Unknown transfer command",
            },
            _ => "",
        }
    }

    fn read_ata(&mut self, addr: u32) -> (u32, &'static str) {
        let off = addr & 0xFFFF;
        match off {
            regs::DMA_READY => (if self.transfer_pending() { 0 } else { 4 }, "CFDMA ready maybe?"),
            regs::INT_ENABLE => (0, "Interrupt enable?"),
            regs::INT_STATUS => (self.interrupt_enabled, "Interrupt related?"),
            regs::TASK_FILE | regs::TASK_FILE_ALT => {
                let ret = self.device.as_mut().map_or(0, |d| d.read_data16());
                (u32::from(ret), TASK_FILE_NAMES[0])
            }
            0x21F1..=0x21F7 | 0x2001..=0x2007 => {
                let reg = (off & 0xF) as u8;
                let ret = self.device.as_mut().map_or(0, |d| d.read_register(reg));
                if reg == 7 {
                    self.pending_interrupt = false;
                }
                (u32::from(ret), TASK_FILE_NAMES[reg as usize])
            }
            regs::DEVICE_CONTROL | regs::DEVICE_CONTROL_ALT => {
                let ret = self.device.as_ref().map_or(0, |d| d.status());
                (u32::from(ret), "ATA alternate status")
            }
            _ => (0, ""),
        }
    }

    fn write_ata(&mut self, addr: u32, value: u32) -> &'static str {
        let off = addr & 0xFFFF;
        match off {
            regs::INT_ENABLE => {
                self.interrupt_enabled = value;
                "Interrupt enable?"
            }
            regs::INT_STATUS => "Interrupt related?",
            regs::TASK_FILE | regs::TASK_FILE_ALT => {
                if let Some(d) = self.device.as_mut() {
                    d.write_data16(value as u16);
                }
                TASK_FILE_NAMES[0]
            }
            0x21F1..=0x21F7 | 0x2001..=0x2007 => {
                let reg = (off & 0xF) as u8;
                if let Some(d) = self.device.as_mut() {
                    d.write_register(reg, value as u8);
                }
                if reg == 7 && self.ata_interrupt_enabled {
                    self.pending_interrupt = true;
                }
                TASK_FILE_NAMES[reg as usize]
            }
            regs::DEVICE_CONTROL | regs::DEVICE_CONTROL_ALT => {
                if let Some(d) = self.device.as_mut() {
                    d.write_device_control(value as u8);
                }
                self.ata_interrupt_enabled = value & 2 == 0;
                if value & 4 != 0 {
                    "ATA device control: soft reset"
                } else if self.ata_interrupt_enabled {
                    "ATA device control: int enable"
                } else {
                    "ATA device control: int disable"
                }
            }
            _ => "",
        }
    }
}

impl std::fmt::Debug for CfState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CfState")
            .field("device", &self.device.is_some())
            .field("dma_addr", &self.dma_addr)
            .field("dma_count", &self.dma_count)
            .field("dma_done", &self.dma_done)
            .field("read_request", &self.read_request)
            .field("write_request", &self.write_request)
            .field("interrupt_enabled", &self.interrupt_enabled)
            .field("pending_interrupt", &self.pending_interrupt)
            .finish()
    }
}

/// CF host controller handle. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct CfController {
    state: Arc<Mutex<CfState>>,
}

impl CfController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the CF lock
    pub fn lock(&self) -> MutexGuard<'_, CfState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach(&self, device: Box<dyn AtaDevice>) {
        self.lock().device = Some(device);
    }

    /// Ticker entry point. The CF lock is released before interrupts are
    /// raised.
    pub fn service(&self, cpu: &dyn Cpu, model: &ModelConfig) -> Vec<u32> {
        self.lock().service(cpu, model)
    }
}

impl Peripheral for CfController {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let (ret, msg) = {
            let mut cf = self.lock();
            match io.kind {
                PeripheralKind::CfDma => cf.read_dma(addr),
                _ => cf.read_ata(addr),
            }
        };
        // data port at 0x21F0 is too chatty to trace
        if !(io.kind == PeripheralKind::CfAta && addr & 0xFFFF == regs::TASK_FILE) {
            io.log_read(addr, ret, msg);
        }
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let msg = {
            let mut cf = self.lock();
            match io.kind {
                PeripheralKind::CfDma => cf.write_dma(addr, value),
                _ => cf.write_ata(addr, value),
            }
        };
        if !(io.kind == PeripheralKind::CfAta && addr & 0xFFFF == regs::TASK_FILE) {
            io.log_write(addr, value, msg);
        }
    }
}
