//! System register files
//!
//! Registers firmware polls during boot that only need to hold a value or
//! return a fixed constant:
//! - BASIC (0xC0100000, 0xC0400000, 0xC0720000): clock enable and boot flags
//! - Power (0xC0F01000): plain register file
//! - GPIO (0xC0220000): switch, connector and detect lines, card LED
//! - DIGIC6 (0xD0000000-0xDFFFFFFF): DIGIC 6 equivalents
//! - ENGIO (0xC0F00000-0xC0FFFFFF): image engine catch-all, reads 0
//!
//! Most constants were picked so that a specific body gets past a specific
//! boot check; the trace message names it.

use std::fmt;

use super::display::CardLed;
use super::{IoContext, Peripheral};

/// Bit names of the DIGIC 4/5 clock enable register
const CLOCK_MODULES: [&str; 32] = [
    "???", "LCLK", "ASIF?", "SD1", "???", "???", "???", "???", "PWM", "???", "Tmr0", "Tmr1", "Tmr2",
    "???", "???", "???", "???", "???", "???", "???", "???", "SIO", "???", "???", "DMA0", "ASIF",
    "???", "???", "SD2", "???", "???", "???",
];

/// Trace message listing the modules a clock enable value turns on
#[derive(Debug, Clone, Copy)]
pub struct ClockEnableTrace(pub u32);

impl fmt::Display for ClockEnableTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CLOCK_ENABLE: ")?;
        for (bit, name) in CLOCK_MODULES.iter().enumerate() {
            if self.0 & (1 << bit) != 0 {
                write!(f, "{} ", name)?;
            }
        }
        Ok(())
    }
}

/// BASIC register offsets (offset & 0xFFF)
mod basic_regs {
    /// param 0
    pub const BOOT_FLAG: u32 = 0x1C;
    /// param 2
    pub const SUSPEND: u32 = 0x008;
    /// param 1
    pub const CLOCK_ENABLE: u32 = 0x008;
    pub const INIT_A4: u32 = 0x0A4;
    pub const INIT_204: u32 = 0x204;
    pub const INIT_244: u32 = 0x244;
    pub const DISPLAY_INIT: u32 = 0x284;
}

/// Clock enable and boot-time constants
#[derive(Debug, Clone, Default)]
pub struct BasicRegs {
    clock_enable: u32,
}

impl BasicRegs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clock_enable(&self) -> u32 {
        self.clock_enable
    }
}

impl Peripheral for BasicRegs {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let off = addr & 0xFFF;
        let (ret, msg) = match (io.param, off) {
            (0, basic_regs::BOOT_FLAG) => (1, ""),
            (0, _) => (0, ""),
            (2, basic_regs::SUSPEND) => (0x100, "SUSPEND_BIT"),
            (2, _) => return 0,
            (_, basic_regs::CLOCK_ENABLE) => {
                io.log_read(addr, self.clock_enable, ClockEnableTrace(self.clock_enable));
                return self.clock_enable;
            }
            (_, basic_regs::INIT_A4) => (3, "A1100 init"),
            (_, basic_regs::INIT_244) => (1, ""),
            (_, basic_regs::INIT_204) => (2, ""),
            (_, basic_regs::DISPLAY_INIT) => (1, "5D3 display init?"),
            _ => (0, ""),
        };
        io.log_read(addr, ret, msg);
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let off = addr & 0xFFF;
        match (io.param, off) {
            (2, basic_regs::SUSPEND) => io.log_write(addr, value, "SUSPEND_BIT"),
            (2, _) => {}
            (1, basic_regs::CLOCK_ENABLE) => {
                self.clock_enable = value;
                io.log_write(addr, value, ClockEnableTrace(value));
            }
            _ => io.log_write(addr, value, ""),
        }
    }
}

/// Power control: 64 plain registers
#[derive(Debug, Clone)]
pub struct PowerControl {
    data: [u32; 64],
}

impl PowerControl {
    pub fn new() -> Self {
        Self { data: [0; 64] }
    }

    fn index(addr: u32) -> usize {
        ((addr & 0xFF) >> 2) as usize
    }
}

impl Default for PowerControl {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for PowerControl {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let ret = self.data[Self::index(addr)];
        io.log_read(addr, ret, "");
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        self.data[Self::index(addr)] = value;
        io.log_write(addr, value, "");
    }
}

/// Card activity LED register. Decodes the on/off codes each generation
/// writes and reads back the last value.
#[derive(Debug, Clone, Copy, Default)]
pub struct CardLedRegister {
    state: CardLed,
    stored: u32,
}

impl CardLedRegister {
    pub fn state(&self) -> CardLed {
        self.state
    }

    pub fn read(&self) -> u32 {
        self.stored
    }

    pub fn write(&mut self, value: u32, digic6: bool) {
        let decoded = if digic6 {
            match value {
                v if v & 0x0F_000F == 0x0D_0002 => Some(CardLed::On),
                v if v & 0x0F_000F == 0x0C_0003 => Some(CardLed::Off),
                0x8A_0075 => Some(CardLed::Off),
                _ => None,
            }
        } else {
            match value {
                0x46 | 0x13_8800 | 0x93_D800 => Some(CardLed::On),
                0x44 | 0x83_8C00 | 0x40 | 0x03_8C00 | 0x83_DC00 | 0x0E00_0000 => Some(CardLed::Off),
                _ => None,
            }
        };
        match decoded {
            Some(state) => self.state = state,
            None => log::warn!("unknown card LED code {:#x}", value),
        }
        self.stored = value;
    }
}

/// GPIO offsets with fixed answers (offset & 0xFFFF)
mod gpio_regs {
    pub const BOOT_0X10: u32 = 0xCB6C;
    pub const BOOT_ZERO: u32 = 0xFA04;
    pub const TOGGLE_A: u32 = 0xF100;
    pub const TOGGLE_B: u32 = 0xF198;
    pub const VSW_STATUS: u32 = 0xF480;
    pub const SD_DETECT: u32 = 0xF48C;
    pub const SRM_BUSY: u32 = 0x0098;
}

/// GPIO lines
#[derive(Debug, Clone)]
pub struct Gpio {
    /// Alternates 0/1 on each read of the toggle lines
    toggle: u32,
    srm_busy: u32,
    card_led: CardLedRegister,
}

impl Gpio {
    pub fn new() -> Self {
        Self {
            toggle: 0,
            srm_busy: 1,
            card_led: CardLedRegister::default(),
        }
    }

    pub fn card_led(&self) -> CardLed {
        self.card_led.state()
    }

    /// Fixed-answer lines; unlisted offsets read 1
    fn constant(model_name: &str, off: u32) -> (u32, &'static str) {
        match off {
            gpio_regs::BOOT_0X10 => (0x10, "5D3/6D expected to be 0x10"),
            gpio_regs::BOOT_ZERO => (0, "6D expected to be 0"),
            gpio_regs::VSW_STATUS if model_name == "5D2" || model_name == "50D" => {
                (0x6000, "VSW_STATUS 5D2/50D")
            }
            // /VSW_OPEN | /VSW_REVO high
            gpio_regs::VSW_STATUS => (0x4_0000 | 0x8_0000, "VSW_STATUS"),
            gpio_regs::SD_DETECT => (0x10C, "70D/6D SD detect?"),
            0x019C | 0x0080 => (0, "System check"),
            0x00DC => (0, "abort situation for FROMUTIL on 600D"),
            0x00B0 => (0, "FUNC SW OFF on 7D"),
            0x0024 => (0, "master woke up on 7D"),
            0x0108 => (1, "ERASE SW OFF"),
            0x010C => (1, "something from hotplug task on 60D"),
            0x0014 => (0, "/VSW_ON"),
            0x0168 => (0, "70D write protect"),
            // low = CF present
            0x301C | 0x3020 => (0, "CF detect"),
            0x0070 | 0x0164 | 0x0174 => (1, "VIDEO CONNECT"),
            0x00E8 | 0x0160 | 0x016C => (1, "MIC CONNECT"),
            0x015C | 0x017C => (0, "USB CONNECT"),
            0x0124 | 0x0138 | 0x0150 => (0, "HDMI CONNECT"),
            _ => (1, ""),
        }
    }
}

impl Default for Gpio {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for Gpio {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        if Some(addr) == io.model.card_led_address {
            let ret = self.card_led.read();
            io.log_read(addr, ret, "Card LED");
            return ret;
        }
        let off = addr & 0xFFFF;
        let (ret, msg) = match off {
            gpio_regs::TOGGLE_A | gpio_regs::TOGGLE_B => {
                let ret = self.toggle;
                self.toggle ^= 1;
                (ret, "")
            }
            gpio_regs::SRM_BUSY => (self.srm_busy, ""),
            _ => Self::constant(&io.model.name, off),
        };
        io.log_read(addr, ret, msg);
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        if Some(addr) == io.model.card_led_address {
            self.card_led.write(value, false);
            io.log_write(addr, value, "Card LED");
            return;
        }
        let msg = match addr & 0xFFFF {
            gpio_regs::SRM_BUSY => {
                self.srm_busy = value;
                if value & 0x02 != 0 {
                    "SRM_SetBusy"
                } else {
                    "SRM_ClearBusy"
                }
            }
            _ => "",
        };
        io.log_write(addr, value, msg);
    }
}

/// DIGIC 6 register addresses (full address match)
mod digic6_regs {
    pub const CLOCK_ENABLE: u32 = 0xD209_0008;
    pub const I2C_STATUS: u32 = 0xD605_0000;
}

/// DIGIC 6 system registers
#[derive(Debug, Clone, Default)]
pub struct Digic6Regs {
    clock_enable: u32,
    i2c_last: u32,
    card_led: CardLedRegister,
}

impl Digic6Regs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn card_led(&self) -> CardLed {
        self.card_led.state()
    }

    fn constant(addr: u32) -> Option<(u32, &'static str)> {
        let entry = match addr {
            0xD203_046C | 0xD203_086C => (1, "7D2 init"),
            0xD20B_053C => (0x10000, "PhySwBootSD"),
            0xD20B_F4A0 => (0x1007_7FFB, "PhySwKeyboard 0"),
            0xD20B_F4B0 => (0x0000_1425, "PhySw 1"),
            0xD20B_F4D8 => (0x20BB_4D30, "PhySw 2"),
            0xD20B_F4F0 => (0x0000_0840, "PhySw Internal Flash + "),
            // 0x10000 would mean no card
            0xD20B_0400 | 0xD20B_22A8 => (0, "SD detect"),
            0xD20B_210C => (0x10000, "CF detect"),
            0xD604_0000 => (0x0300_8000, ""),
            0xD989_0014 => (0x0002_0310, "Battery level maybe (ADC?)"),
            0xD02C_3004 | 0xD02C_3024 | 0xD02C_4004 | 0xD02C_4024 => (0xFF, "AVS??"),
            _ => return None,
        };
        Some(entry)
    }
}

impl Peripheral for Digic6Regs {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        if Some(addr) == io.model.card_led_address {
            let ret = self.card_led.read();
            io.log_read(addr, ret, "Card LED");
            return ret;
        }
        let (ret, msg) = match addr {
            // polled in tight loops
            0xD203_0000 | 0xD20F_0000 => return 0,
            digic6_regs::CLOCK_ENABLE => (self.clock_enable, "CLOCK_ENABLE"),
            digic6_regs::I2C_STATUS => {
                let ret = if self.i2c_last & 0x8000 != 0 { 0x0210_0100 } else { 0x0002_0000 };
                (ret, "I2C status?")
            }
            _ => Self::constant(addr).unwrap_or((0, "")),
        };
        io.log_read(addr, ret, msg);
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        if Some(addr) == io.model.card_led_address {
            self.card_led.write(value, io.model.is_digic6());
            io.log_write(addr, value, "Card LED");
            return;
        }
        let msg = match addr {
            0xD203_0000 | 0xD20F_0000 => return,
            digic6_regs::CLOCK_ENABLE => {
                self.clock_enable = value;
                "CLOCK_ENABLE"
            }
            digic6_regs::I2C_STATUS => {
                self.i2c_last = value;
                ""
            }
            _ => Self::constant(addr).map_or("", |(_, msg)| msg),
        };
        io.log_write(addr, value, msg);
    }
}

/// Image engine registers: accepted and traced, read as 0
#[derive(Debug, Clone, Copy, Default)]
pub struct Engio;

impl Peripheral for Engio {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        io.log_read(addr, 0, "");
        0
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        io.log_write(addr, value, "");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_enable_names() {
        assert_eq!(ClockEnableTrace(0).to_string(), "CLOCK_ENABLE: ");
        assert_eq!(ClockEnableTrace(0x0000_0402).to_string(), "CLOCK_ENABLE: LCLK Tmr0 ");
        assert_eq!(ClockEnableTrace(0x1000_0000).to_string(), "CLOCK_ENABLE: SD2 ");
    }

    #[test]
    fn test_card_led_codes() {
        let mut led = CardLedRegister::default();
        assert_eq!(led.state(), CardLed::Unknown);
        led.write(0x46, false);
        assert_eq!(led.state(), CardLed::On);
        assert_eq!(led.read(), 0x46);
        led.write(0x83_8C00, false);
        assert_eq!(led.state(), CardLed::Off);

        led.write(0x12_0D_0002, true);
        assert_eq!(led.state(), CardLed::On);
        led.write(0x8A_0075, true);
        assert_eq!(led.state(), CardLed::Off);
    }

    #[test]
    fn test_unknown_led_code_keeps_state() {
        let mut led = CardLedRegister::default();
        led.write(0x46, false);
        led.write(0x1234, false);
        assert_eq!(led.state(), CardLed::On);
        assert_eq!(led.read(), 0x1234);
    }

    #[test]
    fn test_gpio_constants() {
        assert_eq!(Gpio::constant("5D3", 0xCB6C).0, 0x10);
        assert_eq!(Gpio::constant("5D2", 0xF480).0, 0x6000);
        assert_eq!(Gpio::constant("5D3", 0xF480).0, 0xC0000);
        assert_eq!(Gpio::constant("5D3", 0x3020).0, 0);
        assert_eq!(Gpio::constant("5D3", 0x4444).0, 1);
    }

    #[test]
    fn test_digic6_constants() {
        assert_eq!(Digic6Regs::constant(0xD20B_210C), Some((0x10000, "CF detect")));
        assert_eq!(Digic6Regs::constant(0xD000_0000), None);
    }
}
