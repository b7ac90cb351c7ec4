//! General purpose timers and the DIGIC free-running clock
//!
//! DIGIC 4/5 timers: 0xC0210000 + 0x100 * id
//! DIGIC 6 timers:   0xD4000240 + 0x40 * (id - 3)
//! DIGIC clock:      0xC0242014 (DIGIC 6: 0xD400000C)
//!
//! Timers count in steps of 0x100 per ticker period and wrap to zero past
//! their reload value. Starting the timer the OS uses as its tick source
//! also arms the OS tick interrupt.

use super::{IoContext, Peripheral};
use crate::bus::PeripheralKind;

/// Number of timer slots (DIGIC 4/5 decode ids 0-15, DIGIC 6 uses 3-10)
pub const TIMER_COUNT: usize = 16;

/// Increment applied to clocks and counters on every tick
pub const TICK_STEP: u32 = 0x100;

/// Register offsets within one timer (offset & 0x1F)
mod regs {
    /// Write bit 0: start; write 0: stop and clear
    pub const CONTROL: u32 = 0x00;
    /// Reload (period) value
    pub const RELOAD: u32 = 0x08;
    /// Current count (read-only)
    pub const CURRENT: u32 = 0x0C;
    /// Interrupt enable (write-only, not modeled)
    pub const INT_ENABLE: u32 = 0x10;
}

/// 20-bit microsecond clock, quantized to [`TICK_STEP`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreeRunningClock {
    value: u32,
}

impl FreeRunningClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    /// Advance one tick; wraps modulo 0x100000
    pub fn advance(&mut self) {
        self.value = self.value.wrapping_add(TICK_STEP) & 0xFFF00;
    }
}

/// One general purpose timer
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer {
    /// Timer is counting
    pub enabled: bool,
    /// Current count
    pub current: u32,
    /// Count at which the timer wraps to zero
    pub reload: u32,
}

/// Bank of general purpose timers
#[derive(Debug, Clone)]
pub struct TimerBank {
    timers: [Timer; TIMER_COUNT],
}

impl TimerBank {
    pub fn new() -> Self {
        Self {
            timers: [Timer::default(); TIMER_COUNT],
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// Get a timer by index
    pub fn get(&self, id: usize) -> Option<&Timer> {
        self.timers.get(id)
    }

    /// Reload value of a timer (0 for ids outside the bank)
    pub fn reload(&self, id: usize) -> u32 {
        self.get(id).map_or(0, |t| t.reload)
    }

    pub fn start(&mut self, id: usize) {
        if let Some(t) = self.timers.get_mut(id) {
            t.enabled = true;
        }
    }

    pub fn stop(&mut self, id: usize) {
        if let Some(t) = self.timers.get_mut(id) {
            t.enabled = false;
            t.current = 0;
        }
    }

    pub fn set_reload(&mut self, id: usize, value: u32) {
        if let Some(t) = self.timers.get_mut(id) {
            t.reload = value;
        }
    }

    /// Advance every running timer by one tick
    pub fn advance(&mut self) {
        for t in self.timers.iter_mut().filter(|t| t.enabled) {
            t.current = t.current.wrapping_add(TICK_STEP);
            if t.current > t.reload {
                t.current = 0;
            }
        }
    }
}

impl Default for TimerBank {
    fn default() -> Self {
        Self::new()
    }
}

/// Register port for the timer bank and the DIGIC clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TimerPort;

impl TimerPort {
    /// Decode the timer index from a register address
    fn timer_id(param: u32, addr: u32) -> Option<usize> {
        let id = if param == 0 {
            ((addr & 0xF00) >> 8) as usize
        } else {
            (((addr & 0xFC0) >> 6) as usize).checked_sub(6)?
        };
        (id < TIMER_COUNT).then_some(id)
    }
}

impl Peripheral for TimerPort {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        if io.kind == PeripheralKind::DigicClock {
            return io.irq.lock().clock.value();
        }

        let Some(id) = Self::timer_id(io.param, addr) else {
            io.log_read(addr, 0, "no such timer");
            return 0;
        };
        let domain = io.irq.lock();
        let (ret, msg) = match addr & 0x1F {
            regs::CONTROL => (0, "ready"),
            regs::RELOAD => (domain.timers.reload(id), "reload"),
            regs::CURRENT => (
                domain.timers.get(id).map_or(0, |t| t.current),
                "current value",
            ),
            _ => (0, ""),
        };
        drop(domain);
        io.log_read(addr, ret, format_args!("Timer #{}: {}", id, msg));
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        if io.kind == PeripheralKind::DigicClock {
            io.log_write(addr, value, "DIGIC clock is read-only");
            return;
        }

        let Some(id) = Self::timer_id(io.param, addr) else {
            io.log_write(addr, value, "no such timer");
            return;
        };
        let mut guard = io.irq.lock();
        let domain = &mut *guard;
        let msg = match addr & 0x1F {
            regs::CONTROL if value & 1 != 0 => {
                domain.timers.start(id);
                if id == io.model.os_timer_id {
                    let delay = domain.timers.reload(id) >> 8;
                    domain
                        .intc
                        .trigger(io.model.timer_interrupt, delay, io.cpu());
                    "starting triggering"
                } else {
                    "starting"
                }
            }
            regs::CONTROL => {
                domain.timers.stop(id);
                "stopped"
            }
            regs::RELOAD => {
                domain.timers.set_reload(id, value);
                drop(guard);
                io.log_write(
                    addr,
                    value,
                    format_args!(
                        "Timer #{}: will trigger after {} ms",
                        id,
                        (u64::from(value) + 1) / 1000
                    ),
                );
                return;
            }
            regs::INT_ENABLE => "interrupt enable?",
            _ => "",
        };
        drop(guard);
        io.log_write(addr, value, format_args!("Timer #{}: {}", id, msg));
    }
}
