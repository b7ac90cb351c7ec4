//! Address dispatcher for the EOS I/O space
//!
//! The bus routes each 32-bit register access to the peripheral owning the
//! address, using an ordered table of inclusive ranges. The first matching
//! entry wins, so specific windows precede the catch-all ones:
//!
//! ```text
//! 0xC0000000 - 0xC0001FFF : Flash interface
//! 0xC0200000 - 0xC0243FFF : Interrupts, timers, HPTimers, GPIO
//! 0xC0500000 - 0xC062FFFF : CF/SD DMA, CF/ATA
//! 0xC0800000 - 0xC0A400FF : TIO, DMA
//! 0xC0C00000 - 0xC8060FFF : SDIO
//! 0xC0F00000 - 0xC0FFFFFF : EDMAC, display, power, ENGIO catch-all
//! 0xD0000000 - 0xDFFFFFFF : DIGIC 6
//! 0xF0000000 - 0xFFFFFFFF : ROM1, ROM0
//! ```
//!
//! Accesses nobody claims are logged (rate-limited) and read as zero.

use std::fmt;

use crate::config::ModelConfig;
use crate::error::ConfigError;
use crate::peripherals::{Interrupts, IoContext, Peripherals};

/// Direction of a register access
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOp {
    Read,
    Write,
}

impl fmt::Display for AccessOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AccessOp::Read => "->",
            AccessOp::Write => "<-",
        })
    }
}

/// Register file a handler entry routes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeripheralKind {
    FlashIf,
    Rom,
    IntEngine,
    IntEngineVx,
    Timers,
    DigicClock,
    HpTimer,
    Dma,
    Edmac,
    ChannelSwitch,
    Sdio,
    SdDma,
    CfDma,
    CfAta,
    Display,
    Tio,
    Basic,
    Power,
    Gpio,
    Digic6,
    Engio,
}

/// One entry of the handler table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    /// Name used in trace output
    pub name: &'static str,
    /// First address (inclusive)
    pub lo: u32,
    /// Last address (inclusive)
    pub hi: u32,
    pub kind: PeripheralKind,
    /// Passed through to the peripheral (instance, bank, generation)
    pub param: u32,
}

impl Handler {
    pub const fn new(name: &'static str, lo: u32, hi: u32, kind: PeripheralKind, param: u32) -> Self {
        Self {
            name,
            lo,
            hi,
            kind,
            param,
        }
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.lo && addr <= self.hi
    }

    /// True if every address of `self` is already claimed by `other`
    fn shadowed_by(&self, other: &Handler) -> bool {
        other.lo <= self.lo && other.hi >= self.hi
    }
}

/// The standard EOS handler table
pub fn default_handlers() -> Vec<Handler> {
    use PeripheralKind as K;
    vec![
        Handler::new("FlashIF", 0xC000_0000, 0xC000_1FFF, K::FlashIf, 0),
        Handler::new("ROM0", 0xF800_0000, 0xFFFF_FFFF, K::Rom, 0),
        Handler::new("ROM1", 0xF000_0000, 0xF7FF_FFFF, K::Rom, 1),
        Handler::new("INTvx", 0xC020_0000, 0xC020_00FF, K::IntEngineVx, 0),
        Handler::new("INT", 0xC020_1000, 0xC020_1FFF, K::IntEngine, 0),
        Handler::new("INT", 0xD401_1000, 0xD401_1FFF, K::IntEngine, 1),
        Handler::new("TIMER", 0xC021_0000, 0xC021_0FFF, K::Timers, 0),
        Handler::new("TIMER", 0xD400_0240, 0xD400_0410, K::Timers, 1),
        Handler::new("TIMER", 0xC024_2014, 0xC024_2014, K::DigicClock, 0),
        Handler::new("TIMER", 0xD400_000C, 0xD400_000C, K::DigicClock, 1),
        Handler::new("HPTimer", 0xC024_3000, 0xC024_3FFF, K::HpTimer, 0),
        Handler::new("GPIO", 0xC022_0000, 0xC022_FFFF, K::Gpio, 0),
        Handler::new("BASIC", 0xC010_0000, 0xC010_0FFF, K::Basic, 0),
        Handler::new("BASIC", 0xC040_0000, 0xC040_0FFF, K::Basic, 1),
        Handler::new("BASIC", 0xC072_0000, 0xC072_0FFF, K::Basic, 2),
        Handler::new("SDIO0", 0xC0C0_0000, 0xC0C0_0FFF, K::Sdio, 0),
        Handler::new("SDIO1", 0xC0C1_0000, 0xC0C1_0FFF, K::Sdio, 1),
        Handler::new("SDIO2", 0xC0C2_0000, 0xC0C2_0FFF, K::Sdio, 2),
        Handler::new("SDIO6", 0xC806_0000, 0xC806_0FFF, K::Sdio, 6),
        Handler::new("CFDMA0", 0xC050_0000, 0xC050_0FFF, K::CfDma, 0),
        Handler::new("SDDMA1", 0xC051_0000, 0xC051_00FF, K::SdDma, 1),
        Handler::new("SDDMA3", 0xC053_0000, 0xC053_0FFF, K::SdDma, 3),
        Handler::new("SDDMA6", 0xC802_0000, 0xC802_00FF, K::SdDma, 6),
        Handler::new("CFATA0", 0xC060_0000, 0xC060_FFFF, K::CfAta, 0),
        Handler::new("CFATA2", 0xC062_0000, 0xC062_FFFF, K::CfAta, 2),
        Handler::new("TIO", 0xC080_0000, 0xC080_00FF, K::Tio, 0),
        Handler::new("TIO", 0xC027_0000, 0xC027_0000, K::Tio, 1),
        Handler::new("DMA1", 0xC0A1_0000, 0xC0A1_00FF, K::Dma, 1),
        Handler::new("DMA2", 0xC0A2_0000, 0xC0A2_00FF, K::Dma, 2),
        Handler::new("DMA3", 0xC0A3_0000, 0xC0A3_00FF, K::Dma, 3),
        Handler::new("DMA4", 0xC0A4_0000, 0xC0A4_00FF, K::Dma, 4),
        Handler::new("CHSW", 0xC0F0_5000, 0xC0F0_5FFF, K::ChannelSwitch, 0),
        Handler::new("EDMAC", 0xC0F0_4000, 0xC0F0_4FFF, K::Edmac, 0),
        Handler::new("EDMAC", 0xC0F2_6000, 0xC0F2_6FFF, K::Edmac, 1),
        Handler::new("EDMAC", 0xC0F3_0000, 0xC0F3_0FFF, K::Edmac, 2),
        Handler::new("Display", 0xC0F1_4000, 0xC0F1_4FFF, K::Display, 0),
        Handler::new("Power", 0xC0F0_1000, 0xC0F0_10FF, K::Power, 1),
        Handler::new("ENGIO", 0xC0F0_0000, 0xC0FF_FFFF, K::Engio, 0),
        Handler::new("Display", 0xD201_3800, 0xD201_381F, K::Display, 6),
        Handler::new("Display", 0xD201_8200, 0xD201_823F, K::Display, 6),
        Handler::new("Display", 0xD203_0108, 0xD203_0108, K::Display, 6),
        Handler::new("DIGIC6", 0xD000_0000, 0xDFFF_FFFF, K::Digic6, 0),
    ]
}

/// Log target for register traces
pub const IO_TARGET: &str = "eos::io";

/// Whether register traces are currently recorded
pub fn io_trace_enabled() -> bool {
    log::log_enabled!(target: IO_TARGET, log::Level::Debug)
}

/// Trace one register access at debug level. The message is only rendered
/// when the `eos::io` target is enabled.
pub fn io_log(module: &str, pc: u32, addr: u32, op: AccessOp, value: u32, msg: impl fmt::Display) {
    if !io_trace_enabled() {
        return;
    }
    let msg = msg.to_string();
    log::debug!(
        target: IO_TARGET,
        "[{:<10}] at 0x{:08X} [0x{:08X}] {} 0x{:<8X}{}{}",
        module,
        pc,
        addr,
        op,
        value,
        if msg.is_empty() { "" } else { " " },
        msg
    );
}

/// Rate limiter for unknown-address diagnostics
#[derive(Debug, Clone, Default)]
struct UnknownAccessLog {
    last_addr: Option<u32>,
    repeats: u32,
}

impl UnknownAccessLog {
    /// Maximum consecutive reports for the same address
    const MAX_REPEATS: u32 = 5;

    /// Returns true if this access should be reported
    fn note(&mut self, addr: u32) -> bool {
        if self.last_addr == Some(addr) {
            self.repeats = self.repeats.saturating_add(1);
        } else {
            self.last_addr = Some(addr);
            self.repeats = 0;
        }
        self.repeats < Self::MAX_REPEATS
    }
}

/// Address dispatcher
#[derive(Debug)]
pub struct Bus {
    handlers: Vec<Handler>,
    /// Register files
    pub peripherals: Peripherals,
    irq: Interrupts,
    model: ModelConfig,
    unknown: UnknownAccessLog,
}

impl Bus {
    /// Create a dispatcher over the standard handler table
    pub fn new(model: ModelConfig, irq: Interrupts) -> Self {
        let peripherals = Peripherals::new(&model);
        Self {
            handlers: default_handlers(),
            peripherals,
            irq,
            model,
            unknown: UnknownAccessLog::default(),
        }
    }

    /// Replace the handler table. Rejects tables containing an entry that
    /// an earlier entry fully covers, since it could never be reached.
    pub fn set_handlers(&mut self, handlers: Vec<Handler>) -> Result<(), ConfigError> {
        for (i, later) in handlers.iter().enumerate() {
            if let Some(earlier) = handlers[..i].iter().find(|h| later.shadowed_by(h)) {
                return Err(ConfigError::OverlappingHandlers {
                    first: earlier.name,
                    first_lo: earlier.lo,
                    first_hi: earlier.hi,
                    second: later.name,
                    second_lo: later.lo,
                    second_hi: later.hi,
                });
            }
        }
        self.handlers = handlers;
        Ok(())
    }

    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn interrupts(&self) -> &Interrupts {
        &self.irq
    }

    /// First handler claiming `addr`
    pub fn find(&self, addr: u32) -> Option<&Handler> {
        self.handlers.iter().find(|h| h.contains(addr))
    }

    /// Perform one register access. Writes return 0.
    pub fn access(&mut self, addr: u32, op: AccessOp, value: u32) -> u32 {
        let Some(handler) = self.find(addr).copied() else {
            if self.unknown.note(addr) {
                log::warn!(
                    "[???] at 0x{:08X} [0x{:08X}] {} 0x{:X}",
                    self.irq.cpu().current_pc(),
                    addr,
                    op,
                    value
                );
            }
            return 0;
        };

        let io = IoContext {
            name: handler.name,
            kind: handler.kind,
            param: handler.param,
            irq: &self.irq,
            model: &self.model,
        };
        let device = self.peripherals.device_mut(handler.kind);
        match op {
            AccessOp::Read => device.read(&io, addr),
            AccessOp::Write => {
                device.write(&io, addr, value);
                0
            }
        }
    }

    pub fn read(&mut self, addr: u32) -> u32 {
        self.access(addr, AccessOp::Read, 0)
    }

    pub fn write(&mut self, addr: u32, value: u32) {
        self.access(addr, AccessOp::Write, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockCpu;
    use std::sync::Arc;

    fn test_bus() -> Bus {
        let model = crate::test_support::small_model();
        let cpu = Arc::new(MockCpu::new());
        Bus::new(model, Interrupts::new(cpu))
    }

    #[test]
    fn test_default_table_has_no_dead_entries() {
        let mut bus = test_bus();
        assert!(bus.set_handlers(default_handlers()).is_ok());
    }

    #[test]
    fn test_first_match_wins() {
        let bus = test_bus();
        assert_eq!(bus.find(0xC0F0_4100).map(|h| h.kind), Some(PeripheralKind::Edmac));
        assert_eq!(bus.find(0xC0F1_4080).map(|h| h.kind), Some(PeripheralKind::Display));
        assert_eq!(bus.find(0xC0F7_0000).map(|h| h.kind), Some(PeripheralKind::Engio));
        assert_eq!(bus.find(0xD401_1000).map(|h| h.kind), Some(PeripheralKind::IntEngine));
        assert_eq!(bus.find(0xD200_0000).map(|h| h.kind), Some(PeripheralKind::Digic6));
        assert_eq!(bus.find(0xD201_8230).map(|h| (h.kind, h.param)), Some((PeripheralKind::Display, 6)));
        assert_eq!(bus.find(0xD203_0108).map(|h| h.kind), Some(PeripheralKind::Display));
        assert_eq!(bus.find(0xD203_0000).map(|h| h.kind), Some(PeripheralKind::Digic6));
        assert_eq!(bus.find(0xFFFF_FFFF).map(|h| (h.kind, h.param)), Some((PeripheralKind::Rom, 0)));
        assert_eq!(bus.find(0xF000_0000).map(|h| (h.kind, h.param)), Some((PeripheralKind::Rom, 1)));
    }

    #[test]
    fn test_inclusive_bounds() {
        let bus = test_bus();
        assert_eq!(bus.find(0xD400_0410).map(|h| h.kind), Some(PeripheralKind::Timers));
        assert_eq!(bus.find(0xD400_0414).map(|h| h.kind), Some(PeripheralKind::Digic6));
        assert_eq!(bus.find(0xC024_2014).map(|h| h.kind), Some(PeripheralKind::DigicClock));
        assert!(bus.find(0xC024_2018).is_none());
    }

    #[test]
    fn test_unknown_reads_zero() {
        let mut bus = test_bus();
        for _ in 0..10 {
            assert_eq!(bus.read(0x1234_0000), 0);
        }
        assert_eq!(bus.access(0x1234_5678, AccessOp::Write, 5), 0);
    }

    #[test]
    fn test_unknown_log_rate_limit() {
        let mut log = UnknownAccessLog::default();
        let reported = (0..10).filter(|_| log.note(0xC0DE_0000)).count();
        assert_eq!(reported, 5);
        assert!(log.note(0xC0DE_0004));
        assert!(log.note(0xC0DE_0000));
    }

    #[test]
    fn test_rejects_shadowed_entry() {
        let mut bus = test_bus();
        let table = vec![
            Handler::new("ENGIO", 0xC0F0_0000, 0xC0FF_FFFF, PeripheralKind::Engio, 0),
            Handler::new("Display", 0xC0F1_4000, 0xC0F1_4FFF, PeripheralKind::Display, 0),
        ];
        match bus.set_handlers(table) {
            Err(ConfigError::OverlappingHandlers { first, second, .. }) => {
                assert_eq!(first, "ENGIO");
                assert_eq!(second, "Display");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_power_register_roundtrip_through_bus() {
        let mut bus = test_bus();
        bus.write(0xC0F0_1010, 0xABCD);
        assert_eq!(bus.read(0xC0F0_1010), 0xABCD);
        assert_eq!(bus.read(0xC0F0_1014), 0);
    }
}
