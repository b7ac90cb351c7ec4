//! TIO debug UART
//!
//! Memory-mapped at 0xC0800000. Firmware prints its debug console through
//! the TX register one byte at a time. Output is line-buffered and emitted
//! through `log` under the `eos::tio` target.
//!
//! 0xC0270000 is a single storage cell some bodies poll as a TIO enable flag.

use super::{IoContext, Peripheral};

/// Interrupt raised after every TX byte once firmware opts in
pub const TIO_INTERRUPT: u32 = 0x3A;

/// Value written to the interrupt register to request per-byte interrupts
const INTERRUPT_ENABLE_PATTERN: u32 = 0xFFFF_FFC4;

/// Register offsets (offset & 0xFF)
mod regs {
    pub const TX: u32 = 0x00;
    pub const RX: u32 = 0x04;
    pub const UNKNOWN_08: u32 = 0x08;
    /// Read: 3 while an RX byte is waiting, else 2. Write bit 0: consume.
    pub const RX_STATUS: u32 = 0x14;
    pub const INTERRUPT: u32 = 0x18;
}

/// Bit 8 of the RX latch: no byte pending
const RX_EMPTY: u32 = 0x100;

/// Debug UART state
#[derive(Debug, Clone)]
pub struct Tio {
    /// Low byte is the received character, bit 8 set when consumed
    rx: u32,
    interrupt_enabled: bool,
    /// Partial TX line
    line: Vec<u8>,
    /// Everything transmitted so far
    console: Vec<u8>,
    /// 0xC0270000 storage
    enable_cell: u32,
}

impl Tio {
    pub fn new() -> Self {
        Self {
            rx: RX_EMPTY,
            interrupt_enabled: false,
            line: Vec::new(),
            console: Vec::new(),
            enable_cell: 0,
        }
    }

    /// Offer one byte to firmware
    pub fn send_rx_byte(&mut self, byte: u8) {
        self.rx = u32::from(byte);
    }

    pub fn rx_pending(&self) -> bool {
        self.rx & RX_EMPTY == 0
    }

    /// All console output so far
    pub fn console(&self) -> String {
        String::from_utf8_lossy(&self.console).into_owned()
    }

    /// Drain and return console output
    pub fn take_console(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.console).into_owned();
        self.console.clear();
        out
    }

    fn transmit(&mut self, byte: u8) {
        self.console.push(byte);
        if byte == b'\n' {
            log::info!(target: "eos::tio", "{}", String::from_utf8_lossy(&self.line));
            self.line.clear();
        } else {
            self.line.push(byte);
        }
    }
}

impl Default for Tio {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for Tio {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        if io.param == 1 {
            return self.enable_cell;
        }
        match addr & 0xFF {
            regs::TX | regs::UNKNOWN_08 => 0,
            regs::RX => {
                let ret = self.rx & 0xFF;
                io.log_read(addr, ret, format_args!("Read byte: 0x{:02X}", ret));
                ret
            }
            regs::RX_STATUS => {
                if self.rx_pending() {
                    io.log_read(addr, 3, "Signalling RX indicator");
                    3
                } else {
                    2
                }
            }
            regs::INTERRUPT => {
                io.log_read(addr, 1, "interrupt related?");
                1
            }
            _ => {
                io.log_read(addr, 1, "");
                1
            }
        }
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        if io.param == 1 {
            self.enable_cell = value;
            return;
        }
        match addr & 0xFF {
            regs::TX => {
                self.transmit(value as u8);
                if self.interrupt_enabled {
                    io.irq.trigger(TIO_INTERRUPT, 0);
                }
            }
            regs::UNKNOWN_08 => {}
            regs::RX_STATUS => {
                if value & 1 != 0 {
                    self.rx |= RX_EMPTY;
                    io.log_write(addr, value, "Reset RX indicator");
                }
            }
            regs::INTERRUPT => {
                self.interrupt_enabled = value == INTERRUPT_ENABLE_PATTERN;
                let msg = if self.interrupt_enabled {
                    "enable interrupt?"
                } else {
                    "interrupt related?"
                };
                io.log_write(addr, value, msg);
            }
            _ => io.log_write(addr, value, ""),
        }
    }
}
