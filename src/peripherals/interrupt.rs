//! Interrupt controller
//!
//! Memory-mapped at 0xC0201000 (DIGIC 6 mirror at 0xD4011000), with an older
//! mask-based interface at 0xC0200000.
//!
//! Only one interrupt is in service at a time. Triggering a line that is
//! disabled, or while another interrupt is in service, defers it through a
//! per-line countdown that the background ticker drains. The controller,
//! the timers and the HPTimers share one lock ([`IrqDomain`]).

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::hptimer::HpTimerBank;
use super::timer::{FreeRunningClock, TimerBank};
use super::{IoContext, Peripheral};
use crate::bus::PeripheralKind;
use crate::cpu::Cpu;

/// Number of interrupt lines
pub const INTERRUPT_LINES: usize = 0x200;

/// Register offsets (INT interface, offset & 0xFFF)
mod regs {
    /// Current interrupt id (read clears)
    pub const REASON: u32 = 0x00;
    /// Current interrupt id shifted left by 2 (read clears)
    pub const REASON_SHIFTED: u32 = 0x04;
    /// Write an id to enable that line
    pub const ENABLE: u32 = 0x10;
    /// Write nonzero to drop the in-service interrupt
    pub const RESET: u32 = 0x200;
}

/// Register offsets (INTvx interface, offset & 0xF)
mod vx_regs {
    /// Write a mask of lines to enable
    pub const ENABLE_MASK: u32 = 0x8;
    /// Write a mask of lines to disable
    pub const DISABLE_MASK: u32 = 0xC;
}

/// Per-line state
#[derive(Debug, Clone, Copy, Default)]
struct Line {
    /// Line may be delivered
    enabled: bool,
    /// Ticks until a deferred delivery is attempted (0 = nothing pending)
    schedule: u32,
}

/// Interrupt controller state
#[derive(Debug, Clone)]
pub struct InterruptController {
    lines: Vec<Line>,
    /// Id of the interrupt in service (0 = none)
    active: u32,
}

impl InterruptController {
    /// Create a controller with every line disabled
    pub fn new() -> Self {
        Self {
            lines: vec![Line::default(); INTERRUPT_LINES],
            active: 0,
        }
    }

    /// Reset all lines and drop the in-service interrupt
    pub fn reset(&mut self) {
        self.lines.fill(Line::default());
        self.active = 0;
    }

    /// Interrupt currently in service
    pub fn active(&self) -> Option<u32> {
        (self.active != 0).then_some(self.active)
    }

    pub fn is_enabled(&self, id: u32) -> bool {
        self.line(id).map_or(false, |l| l.enabled)
    }

    /// Remaining countdown for a deferred interrupt
    pub fn scheduled(&self, id: u32) -> u32 {
        self.line(id).map_or(0, |l| l.schedule)
    }

    fn line(&self, id: u32) -> Option<&Line> {
        self.lines.get(id as usize)
    }

    /// Enable a line. Ids past the table are ignored.
    pub fn enable(&mut self, id: u32) {
        match self.lines.get_mut(id as usize) {
            Some(line) => line.enabled = true,
            None => log::warn!("enable of out-of-range interrupt {:#x}", id),
        }
    }

    /// Disable a line; drops it from service if it was the active one
    pub fn disable(&mut self, id: u32, cpu: &dyn Cpu) {
        if let Some(line) = self.lines.get_mut(id as usize) {
            line.enabled = false;
        }
        if self.active != 0 && self.active == id {
            self.active = 0;
            cpu.lower_irq();
        }
    }

    /// Request interrupt `id`, immediately if possible, otherwise after
    /// `delay` ticks (at least one).
    pub fn trigger(&mut self, id: u32, delay: u32, cpu: &dyn Cpu) {
        let active = self.active;
        let Some(line) = self.lines.get_mut(id as usize) else {
            log::warn!("trigger of out-of-range interrupt {:#x}", id);
            return;
        };

        if delay == 0 && line.enabled && active == 0 {
            log::trace!("trigger int {:#04x}", id);
            line.enabled = false;
            self.active = id;
            cpu.raise_irq();
        } else {
            log::trace!("trigger int {:#04x} (delayed)", id);
            let delay = if line.enabled { delay } else { 1 };
            line.schedule = delay.max(1);
        }
    }

    /// Read the in-service id (shifted left by `shift`) and drop it from
    /// service. Subsequent reads return 0 until the next delivery.
    pub fn acknowledge(&mut self, shift: u32, cpu: &dyn Cpu) -> u32 {
        let id = self.active;
        self.active = 0;
        cpu.lower_irq();
        id << shift
    }

    /// Drop the in-service interrupt without touching the CPU line
    pub fn clear_active(&mut self) {
        self.active = 0;
    }

    /// One ticker step over the deferred-interrupt countdowns.
    ///
    /// Lines are considered from the highest id down, with `timer_line`
    /// considered last so the OS tick never starves other lines. A
    /// delivered `timer_line` is re-armed with `timer_rearm` ticks.
    pub fn service_scheduled(&mut self, timer_line: u32, timer_rearm: u32, cpu: &dyn Cpu) {
        let timer = timer_line as usize;
        let order = (1..self.lines.len())
            .rev()
            .filter(|&pos| pos != timer)
            .chain((timer > 0 && timer < self.lines.len()).then_some(timer));

        for pos in order {
            let line = &mut self.lines[pos];
            if line.schedule == 1 && line.enabled && self.active == 0 {
                line.schedule = if pos == timer { timer_rearm } else { 0 };
                line.enabled = false;
                self.active = pos as u32;
                log::trace!("deliver scheduled int {:#04x}", pos);
                cpu.raise_irq();
            }
            if line.schedule > 1 {
                line.schedule -= 1;
            }
        }
    }

    /// Line ids covered by one INTvx mask register
    fn vx_ids(addr: u32, mask: u32) -> impl Iterator<Item = u32> {
        let base = (addr & 0xF0) >> 1;
        (0..32).filter(move |i| mask & (1 << i) != 0).map(move |i| base + i)
    }
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

/// State guarded by the IRQ lock: interrupt controller and the timers
/// that advance together on every tick.
#[derive(Debug, Clone, Default)]
pub struct IrqDomain {
    pub intc: InterruptController,
    pub clock: FreeRunningClock,
    pub timers: TimerBank,
    pub hptimers: HpTimerBank,
}

/// Shared handle to the IRQ domain and the CPU it signals.
///
/// Cloned into every component that raises interrupts and into the
/// background ticker.
#[derive(Clone)]
pub struct Interrupts {
    domain: Arc<Mutex<IrqDomain>>,
    cpu: Arc<dyn Cpu>,
}

impl Interrupts {
    pub fn new(cpu: Arc<dyn Cpu>) -> Self {
        Self {
            domain: Arc::new(Mutex::new(IrqDomain::default())),
            cpu,
        }
    }

    /// Take the IRQ lock
    pub fn lock(&self) -> MutexGuard<'_, IrqDomain> {
        self.domain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cpu(&self) -> &dyn Cpu {
        &*self.cpu
    }

    /// Request interrupt `id` after `delay` ticks (0 = now if possible)
    pub fn trigger(&self, id: u32, delay: u32) {
        self.lock().intc.trigger(id, delay, &*self.cpu);
    }
}

impl std::fmt::Debug for Interrupts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupts").finish_non_exhaustive()
    }
}

/// Register port for both interrupt controller interfaces
#[derive(Debug, Clone, Copy, Default)]
pub struct IntEngine;

impl IntEngine {
    fn read_int(&self, io: &IoContext<'_>, addr: u32) -> u32 {
        match addr & 0xFFF {
            off @ (regs::REASON | regs::REASON_SHIFTED) => {
                let shift = if off == regs::REASON { 0 } else { 2 };
                let ret = io.irq.lock().intc.acknowledge(shift, io.cpu());
                if ret == 0 && io.model.digic_version > 3 {
                    log::warn!("interrupt reason read with nothing in service");
                }
                if ret >> shift != io.model.timer_interrupt {
                    io.log_read(addr, ret, "requested int reason");
                }
                ret
            }
            regs::ENABLE => 0,
            regs::RESET => {
                io.log_read(addr, 0, "read after enabling interrupts");
                0
            }
            _ => {
                io.log_read(addr, 0, "");
                0
            }
        }
    }

    fn write_int(&self, io: &IoContext<'_>, addr: u32, value: u32) {
        match addr & 0xFFF {
            regs::ENABLE => {
                io.irq.lock().intc.enable(value);
                if value != io.model.timer_interrupt {
                    io.log_write(addr, value, "enabled interrupt");
                }
            }
            regs::RESET if value != 0 => {
                io.irq.lock().intc.clear_active();
                io.log_write(addr, value, "reset IRQ");
            }
            regs::REASON | regs::REASON_SHIFTED => {
                io.log_write(addr, value, "wrote int reason ???");
            }
            _ => io.log_write(addr, value, ""),
        }
    }

    fn write_vx(&self, io: &IoContext<'_>, addr: u32, value: u32) {
        let mut domain = io.irq.lock();
        match addr & 0xF {
            vx_regs::ENABLE_MASK => {
                for id in InterruptController::vx_ids(addr, value) {
                    domain.intc.enable(id);
                }
                drop(domain);
                io.log_write(addr, value, "enabled interrupts");
            }
            vx_regs::DISABLE_MASK => {
                for id in InterruptController::vx_ids(addr, value) {
                    domain.intc.disable(id, io.cpu());
                }
                drop(domain);
                io.log_write(addr, value, "reset interrupts");
            }
            _ => {
                drop(domain);
                io.log_write(addr, value, "");
            }
        }
    }
}

impl Peripheral for IntEngine {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        match io.kind {
            PeripheralKind::IntEngineVx => {
                io.log_read(addr, 0, "");
                0
            }
            _ => self.read_int(io, addr),
        }
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        match io.kind {
            PeripheralKind::IntEngineVx => self.write_vx(io, addr, value),
            _ => self.write_int(io, addr, value),
        }
    }
}
