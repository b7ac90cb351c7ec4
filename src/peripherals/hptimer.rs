//! High-precision timers
//!
//! Memory-mapped at 0xC0243000. Eight compare channels match against the
//! free-running DIGIC clock; a match latches the channel's triggered flag
//! and raises the HPTimer interrupt.
//!
//! Channel i registers (i = 0..7):
//! - 0x160 + 0x10*i: active
//! - 0x164 + 0x10*i: output compare
//! - 0x264 + 0x10*i: write clears triggered
//! - 0x300: triggered mask (bit 2*i+4)

use std::fmt;

use super::{IoContext, Peripheral};

/// Number of compare channels
pub const HPTIMER_COUNT: usize = 8;

/// One compare channel
#[derive(Debug, Clone, Copy, Default)]
pub struct HpTimer {
    /// Compare is armed (raw register value, nonzero = active)
    pub active: u32,
    /// Clock value to match, a multiple of 0x100
    pub output_compare: u32,
    /// Latched match
    pub triggered: bool,
}

/// HPTimer bank
#[derive(Debug, Clone, Default)]
pub struct HpTimerBank {
    timers: [HpTimer; HPTIMER_COUNT],
}

impl HpTimerBank {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: usize) -> Option<&HpTimer> {
        self.timers.get(id)
    }

    /// Round a compare value up to the clock step so it can actually match
    pub fn quantize(value: u32) -> u32 {
        ((value & 0xFFFFF) + 0xFF) & 0xFFF00
    }

    pub fn set_compare(&mut self, id: usize, value: u32) {
        if let Some(t) = self.timers.get_mut(id) {
            t.output_compare = Self::quantize(value);
        }
    }

    pub fn set_active(&mut self, id: usize, value: u32) {
        if let Some(t) = self.timers.get_mut(id) {
            t.active = value;
        }
    }

    pub fn clear_triggered(&mut self, id: usize) {
        if let Some(t) = self.timers.get_mut(id) {
            t.triggered = false;
        }
    }

    /// Latch every active channel whose compare equals `clock`.
    /// Returns true if at least one channel matched.
    pub fn check(&mut self, clock: u32) -> bool {
        let mut any = false;
        for t in self.timers.iter_mut() {
            if t.active != 0 && t.output_compare == clock {
                t.triggered = true;
                any = true;
            }
        }
        any
    }

    /// Status register value
    pub fn triggered_mask(&self) -> u32 {
        self.timers
            .iter()
            .enumerate()
            .filter(|(_, t)| t.triggered)
            .fold(0, |acc, (i, _)| acc | 1 << (2 * i + 4))
    }
}

/// Register port for the HPTimer bank
#[derive(Debug, Clone, Copy, Default)]
pub struct HpTimerPort;

impl HpTimerPort {
    fn channel(addr: u32) -> Option<usize> {
        (((addr & 0xF0) >> 4) as usize)
            .checked_sub(6)
            .filter(|&id| id < HPTIMER_COUNT)
    }
}

/// What a port write did, rendered only when traced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HpTimerWrite {
    Active { id: usize, value: u32 },
    Compare { id: usize, delay: u32 },
    ResetTrigger { id: usize },
    Other,
}

impl fmt::Display for HpTimerWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            HpTimerWrite::Active { id, value: 1 } => write!(f, "HPTimer {}/8: active", id + 1),
            HpTimerWrite::Active { id, value: 0 } => write!(f, "HPTimer {}/8: inactive", id + 1),
            HpTimerWrite::Active { .. } => f.write_str("???"),
            HpTimerWrite::Compare { id, delay } => write!(
                f,
                "HPTimer {}/8: output compare (delay {} microseconds)",
                id + 1,
                delay
            ),
            HpTimerWrite::ResetTrigger { id } => write!(f, "HPTimer {}/8: reset trigger?", id + 1),
            HpTimerWrite::Other => Ok(()),
        }
    }
}

impl Peripheral for HpTimerPort {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let domain = io.irq.lock();
        let ch = Self::channel(addr);
        let (ret, msg) = match (addr & 0xFFF, ch) {
            (0x160..=0x1DF, Some(id)) if addr & 0xF == 0x0 => (
                domain.hptimers.get(id).map_or(0, |t| t.active),
                "status?",
            ),
            (0x160..=0x1DF, Some(id)) if addr & 0xF == 0x4 => (
                domain.hptimers.get(id).map_or(0, |t| t.output_compare),
                "output compare",
            ),
            (0x300, _) => (domain.hptimers.triggered_mask(), "which timer(s) triggered"),
            _ => (0, ""),
        };
        drop(domain);
        io.log_read(addr, ret, msg);
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let mut guard = io.irq.lock();
        let domain = &mut *guard;
        let ch = Self::channel(addr);
        let event = match (addr & 0xFFF, ch) {
            (0x160..=0x1DF, Some(id)) if addr & 0xF == 0x0 => {
                domain.hptimers.set_active(id, value);
                HpTimerWrite::Active { id, value }
            }
            (0x160..=0x1DF, Some(id)) if addr & 0xF == 0x4 => {
                domain.hptimers.set_compare(id, value);
                HpTimerWrite::Compare {
                    id,
                    delay: value.wrapping_sub(domain.clock.value()) & 0xFFFFF,
                }
            }
            (0x260..=0x2DF, Some(id)) if addr & 0xF == 0x4 => {
                domain.hptimers.clear_triggered(id);
                HpTimerWrite::ResetTrigger { id }
            }
            _ => HpTimerWrite::Other,
        };
        drop(guard);
        io.log_write(addr, value, event);
    }
}
