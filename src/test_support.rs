//! Test doubles for the CPU, SD card and ATA drive

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{ModelConfig, RomBankConfig};
use crate::cpu::Cpu;
use crate::peripherals::cfata::{AtaDevice, DRQ_STAT};
use crate::peripherals::sdio::{CardError, SdCard, SdRequest, SdResponse};

const PAGE_SIZE: u32 = 0x1000;

/// Default model with small ROM banks
pub fn small_model() -> ModelConfig {
    let mut model = ModelConfig::default();
    model.name = "test".to_string();
    model.rom = [
        RomBankConfig {
            base: 0xF800_0000,
            size: 0x2_0000,
        },
        RomBankConfig {
            base: 0xF000_0000,
            size: 0x2_0000,
        },
    ];
    model
}

/// CPU with sparse RAM and an observable IRQ line
#[derive(Default)]
pub struct MockCpu {
    pages: Mutex<HashMap<u32, Box<[u8; PAGE_SIZE as usize]>>>,
    irq: AtomicBool,
    raises: AtomicU32,
    halted: AtomicBool,
}

impl MockCpu {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn irq_asserted(&self) -> bool {
        self.irq.load(Ordering::SeqCst)
    }

    pub fn raise_count(&self) -> u32 {
        self.raises.load(Ordering::SeqCst)
    }

    pub fn set_halted(&self, halted: bool) {
        self.halted.store(halted, Ordering::SeqCst);
    }
}

impl Cpu for MockCpu {
    fn read_phys(&self, addr: u32, buf: &mut [u8]) {
        let pages = self.pages.lock().unwrap();
        for (i, b) in buf.iter_mut().enumerate() {
            let a = addr.wrapping_add(i as u32);
            *b = pages
                .get(&(a / PAGE_SIZE))
                .map_or(0, |p| p[(a % PAGE_SIZE) as usize]);
        }
    }

    fn write_phys(&self, addr: u32, data: &[u8]) {
        let mut pages = self.pages.lock().unwrap();
        for (i, &b) in data.iter().enumerate() {
            let a = addr.wrapping_add(i as u32);
            let page = pages
                .entry(a / PAGE_SIZE)
                .or_insert_with(|| Box::new([0; PAGE_SIZE as usize]));
            page[(a % PAGE_SIZE) as usize] = b;
        }
    }

    fn raise_irq(&self) {
        self.irq.store(true, Ordering::SeqCst);
        self.raises.fetch_add(1, Ordering::SeqCst);
    }

    fn lower_irq(&self) {
        self.irq.store(false, Ordering::SeqCst);
    }

    fn current_pc(&self) -> u32 {
        0xFF0C_0000
    }

    fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }
}

/// SD card over a byte image.
///
/// - CMD0: no response
/// - CMD2: long response 00 01 .. 0F
/// - CMD17/18: read from byte address `arg`
/// - CMD24/25: writes are collected
/// - CMD60: illegal
/// - anything else: short response `[cmd, 00, 09, 00]`
pub struct MockCard {
    data: Vec<u8>,
    pos: usize,
    reading: bool,
    written: Arc<Mutex<Vec<u8>>>,
}

impl MockCard {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            reading: false,
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Bytes the host wrote, shared with the card
    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

impl SdCard for MockCard {
    fn do_command(&mut self, request: SdRequest) -> Result<SdResponse, CardError> {
        let status = [request.cmd, 0x00, 0x09, 0x00];
        match request.cmd {
            0 => Ok(SdResponse::None),
            2 => {
                let mut cid = [0u8; 16];
                for (i, b) in cid.iter_mut().enumerate() {
                    *b = i as u8;
                }
                Ok(SdResponse::Long(cid))
            }
            17 | 18 => {
                self.pos = request.arg as usize;
                self.reading = true;
                Ok(SdResponse::Short(status))
            }
            24 | 25 => {
                self.reading = false;
                Ok(SdResponse::Short(status))
            }
            60 => Err(CardError::IllegalCommand(60)),
            _ => Ok(SdResponse::Short(status)),
        }
    }

    fn read_byte(&mut self) -> u8 {
        let b = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        b
    }

    fn write_byte(&mut self, value: u8) {
        self.written.lock().unwrap().push(value);
    }

    fn data_ready(&self) -> bool {
        self.reading && self.pos < self.data.len()
    }
}

/// ATA drive streaming a byte image while its DRQ line is up
pub struct MockDrive {
    data: Vec<u8>,
    pos: usize,
    registers: [u8; 8],
    ready: Arc<AtomicBool>,
    written: Arc<Mutex<Vec<u8>>>,
}

impl MockDrive {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            pos: 0,
            registers: [0; 8],
            ready: Arc::new(AtomicBool::new(true)),
            written: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// DRQ line, shared with the drive
    pub fn ready(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ready)
    }

    pub fn written(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.written)
    }
}

impl AtaDevice for MockDrive {
    fn read_register(&mut self, offset: u8) -> u8 {
        match offset {
            7 => self.status(),
            n => self.registers[(n & 7) as usize],
        }
    }

    fn write_register(&mut self, offset: u8, value: u8) {
        self.registers[(offset & 7) as usize] = value;
    }

    fn read_data16(&mut self) -> u16 {
        let lo = self.data.get(self.pos).copied().unwrap_or(0);
        let hi = self.data.get(self.pos + 1).copied().unwrap_or(0);
        self.pos += 2;
        u16::from_le_bytes([lo, hi])
    }

    fn write_data16(&mut self, value: u16) {
        self.written.lock().unwrap().extend_from_slice(&value.to_le_bytes());
    }

    fn status(&self) -> u8 {
        // DRDY, plus DRQ while ready
        if self.ready.load(Ordering::SeqCst) {
            0x40 | DRQ_STAT
        } else {
            0x40
        }
    }

    fn write_device_control(&mut self, _value: u8) {}
}
