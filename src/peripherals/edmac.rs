//! EDMAC (image-pipeline DMA) and its connection switch
//!
//! Channel registers: 0xC0F04000, 0xC0F26000, 0xC0F30000 (16 channels each,
//! 0x100 apart). Channel switch: 0xC0F05000.
//!
//! Channels with bit 3 set read from RAM into an image-engine connection;
//! the others write from a connection to RAM. Transfers are not performed,
//! only logged; starting a channel raises its completion interrupt.

use std::fmt;

use super::{IoContext, Peripheral};
use crate::bus::PeripheralKind;

/// Channel slots (three register blocks of 16)
pub const EDMAC_CHANNELS: usize = 48;

/// Read-connection slots decoded by the channel switch
pub const READ_CONNECTIONS: usize = 49;

/// Completion interrupt per channel; 0 means the channel is not mapped.
const INTERRUPT_IDS: [u32; 32] = [
    0x58, 0x59, 0x5A, 0x5B, 0x5C, 0x6D, 0xC0, 0x00, // write channels 0..6
    0x5D, 0x5E, 0x5F, 0x6E, 0xC1, 0xC8, 0x00, 0x00, // read channels 0..5
    0xF9, 0x83, 0x8A, 0x00, 0x00, 0x00, 0x00, 0x00, // write channels 7..9
    0x8B, 0x92, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // read channels 6..7
];

/// Channel register offsets (offset & 0xFF)
mod regs {
    pub const CONTROL: u32 = 0x00;
    pub const FLAGS: u32 = 0x04;
    pub const ADDR: u32 = 0x08;
    pub const SIZE_N: u32 = 0x0C;
    pub const SIZE_B: u32 = 0x10;
    pub const SIZE_A: u32 = 0x14;
    pub const OFF1B: u32 = 0x18;
    pub const OFF1C: u32 = 0x1C;
    pub const OFF1A: u32 = 0x20;
    pub const OFF2A: u32 = 0x24;
    pub const OFF3: u32 = 0x28;
}

/// Geometry and address registers of one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EdmacChannel {
    pub flags: u32,
    /// RAM address
    pub addr: u32,
    pub xn: u32,
    pub yn: u32,
    pub xb: u32,
    pub yb: u32,
    pub xa: u32,
    pub ya: u32,
    pub off1b: u32,
    pub off1c: u32,
    pub off1a: u32,
    pub off2a: u32,
    pub off3: u32,
}

impl EdmacChannel {
    /// Human-readable transfer geometry, omitting empty blocks
    fn geometry(&self) -> String {
        let mut out = String::new();
        for (tag, x, y) in [("A", self.xa, self.ya), ("B", self.xb, self.yb), ("N", self.xn, self.yn)] {
            if x != 0 || y != 0 {
                out.push_str(&format!("{}:{}x{}, ", tag, x, y + 1));
            }
        }
        out
    }
}

/// Which image-engine connections feed or drain each channel
#[derive(Debug, Clone)]
pub struct ConnectionMatrix {
    /// Read channel assigned to each read connection
    read_conn: [Option<usize>; READ_CONNECTIONS],
    /// Connection assigned to each write channel
    write_conn: [u32; EDMAC_CHANNELS],
}

impl ConnectionMatrix {
    pub fn new() -> Self {
        Self {
            read_conn: [None; READ_CONNECTIONS],
            write_conn: [0; EDMAC_CHANNELS],
        }
    }

    /// Connections a read channel feeds
    pub fn read_connections(&self, channel: usize) -> Vec<usize> {
        self.read_conn
            .iter()
            .enumerate()
            .filter(|(_, ch)| **ch == Some(channel))
            .map(|(conn, _)| conn)
            .collect()
    }

    /// Connection a write channel drains
    pub fn write_connection(&self, channel: usize) -> Option<u32> {
        self.write_conn.get(channel).copied()
    }

    /// Read channel number for a switch value (8-13, 24-29, 40-43)
    fn read_channel(value: u32) -> Option<usize> {
        let v = value as usize;
        match value {
            0..=5 => Some(v + 8),
            6..=11 => Some(v + 18),
            12..=15 => Some(v + 28),
            _ => None,
        }
    }

    /// Apply one channel-switch write. Returns the route it set up, if the
    /// offset is a known switch slot.
    pub fn write(&mut self, offset: u32, value: u32) -> Option<SwitchRoute> {
        match offset {
            0x020..=0x0E0 => {
                let conn = (((offset & 0xFF) - 0x20) >> 2) as usize;
                let channel = Self::read_channel(value);
                self.read_conn[conn] = channel;
                Some(SwitchRoute::Read { channel, conn })
            }
            0x000..=0x01C => {
                let channel = match (offset & 0x1F) >> 2 {
                    7 => 16,
                    ch => ch as usize,
                };
                self.write_conn[channel] = value;
                Some(SwitchRoute::Write { conn: value, channel })
            }
            0x200..=0x240 => {
                let pos = ((offset & 0x3F) >> 2) as usize;
                let channel = if pos <= 5 { pos + 17 } else { pos + 26 };
                self.write_conn[channel] = value;
                Some(SwitchRoute::Write { conn: value, channel })
            }
            _ => None,
        }
    }
}

/// One channel-switch assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchRoute {
    /// RAM feeds connection `conn` through read channel `channel`
    Read { channel: Option<usize>, conn: usize },
    /// Connection `conn` drains to RAM through write channel `channel`
    Write { conn: u32, channel: usize },
}

impl fmt::Display for SwitchRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SwitchRoute::Read { channel: Some(ch), conn } => {
                write!(f, "RAM -> RD#{} -> connection #{}", ch, conn)
            }
            SwitchRoute::Read { channel: None, conn } => {
                write!(f, "RAM -> (none) -> connection #{}", conn)
            }
            SwitchRoute::Write { conn, channel } => {
                write!(f, "connection #{} -> WR#{} -> RAM", conn, channel)
            }
        }
    }
}

impl Default for ConnectionMatrix {
    fn default() -> Self {
        Self::new()
    }
}

/// A started transfer, as last observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdmacTransfer {
    pub channel: usize,
    /// True for RAM -> connection
    pub is_read: bool,
    pub addr: u32,
    /// Connections involved
    pub connections: Vec<u32>,
    pub interrupt: u32,
}

/// EDMAC controller
#[derive(Debug, Clone)]
pub struct EdmacEngine {
    channels: Vec<EdmacChannel>,
    pub connections: ConnectionMatrix,
    last_transfer: Option<EdmacTransfer>,
}

impl EdmacEngine {
    pub fn new() -> Self {
        Self {
            channels: vec![EdmacChannel::default(); EDMAC_CHANNELS],
            connections: ConnectionMatrix::new(),
            last_transfer: None,
        }
    }

    pub fn channel(&self, ch: usize) -> Option<&EdmacChannel> {
        self.channels.get(ch)
    }

    pub fn last_transfer(&self) -> Option<&EdmacTransfer> {
        self.last_transfer.as_ref()
    }

    /// Channel number for a register address in block `param`
    pub fn channel_index(param: u32, addr: u32) -> usize {
        ((param << 4) | ((addr >> 8) & 0xF)) as usize
    }

    /// Completion interrupt for a channel.
    ///
    /// # Panics
    /// If the channel has no interrupt mapping; firmware never starts those.
    pub fn interrupt_for(channel: usize) -> u32 {
        match INTERRUPT_IDS.get(channel) {
            Some(&id) if id != 0 => id,
            _ => panic!("EDMAC channel {} has no completion interrupt", channel),
        }
    }

    fn start(&mut self, io: &IoContext<'_>, channel: usize) {
        let ch = self.channels[channel];
        let is_read = channel & 8 != 0;
        let connections: Vec<u32> = if is_read {
            self.connections
                .read_connections(channel)
                .into_iter()
                .map(|c| c as u32)
                .collect()
        } else {
            self.connections.write_connection(channel).into_iter().collect()
        };
        let conns: Vec<String> = connections.iter().map(|c| format!("#{}", c)).collect();
        log::info!(
            "[EDMAC#{}] Starting transfer {} 0x{:X} {} conn {}, {}flags=0x{:X}",
            channel,
            if is_read { "from" } else { "to" },
            ch.addr,
            if is_read { "to" } else { "from" },
            conns.join(" "),
            ch.geometry(),
            ch.flags
        );

        let interrupt = Self::interrupt_for(channel);
        self.last_transfer = Some(EdmacTransfer {
            channel,
            is_read,
            addr: ch.addr,
            connections,
            interrupt,
        });
        io.irq.trigger(interrupt, 0);
    }

    fn write_channel(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let channel = Self::channel_index(io.param, addr);
        assert!(channel < EDMAC_CHANNELS, "EDMAC channel {} out of range", channel);
        if addr & 0xFF == regs::CONTROL {
            if value == 1 {
                self.start(io, channel);
            }
            io.log_write(addr, value, format_args!("EDMAC#{} control/status", channel));
            return;
        }

        let ch = &mut self.channels[channel];
        let msg = match addr & 0xFF {
            regs::FLAGS => {
                ch.flags = value;
                "flags"
            }
            regs::ADDR => {
                ch.addr = value;
                "RAM address"
            }
            regs::SIZE_N => {
                ch.xn = value & 0xFFFF;
                ch.yn = value >> 16;
                "yn|xn"
            }
            regs::SIZE_B => {
                ch.xb = value & 0xFFFF;
                ch.yb = value >> 16;
                "yb|xb"
            }
            regs::SIZE_A => {
                ch.xa = value & 0xFFFF;
                ch.ya = value >> 16;
                "ya|xa"
            }
            regs::OFF1B => {
                ch.off1b = value;
                "off1b"
            }
            regs::OFF1C => {
                ch.off1c = value;
                "off1c"
            }
            regs::OFF1A => {
                ch.off1a = value;
                "off1a"
            }
            regs::OFF2A => {
                ch.off2a = value;
                "off2a"
            }
            regs::OFF3 => {
                ch.off3 = value;
                "off3"
            }
            _ => "",
        };
        io.log_write(addr, value, format_args!("EDMAC#{} {}", channel, msg));
    }
}

impl Default for EdmacEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for EdmacEngine {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        if io.kind == PeripheralKind::ChannelSwitch {
            panic!("EDMAC channel switch read at 0x{:08X} is not supported", addr);
        }
        let channel = Self::channel_index(io.param, addr);
        assert!(channel < EDMAC_CHANNELS, "EDMAC channel {} out of range", channel);
        let ret = match addr & 0xFF {
            regs::ADDR => self.channels[channel].addr,
            _ => 0,
        };
        io.log_read(addr, ret, format_args!("EDMAC#{}", channel));
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        if io.kind == PeripheralKind::ChannelSwitch {
            match self.connections.write(addr & 0xFFF, value) {
                Some(route) => io.log_write(addr, value, route),
                None => io.log_write(addr, value, ""),
            }
        } else {
            self.write_channel(io, addr, value);
        }
    }
}
