//! General purpose DMA
//!
//! Four channels at 0xC0A10000 + 0x10000 * (n - 1), n = 1..4.
//! A start command copies the whole transfer at once and schedules the
//! channel's completion interrupt proportionally to the length, because
//! firmware assumes DMA is not instantaneous.

use super::{IoContext, Peripheral};

/// Channels are numbered 1..=4; slot 0 is unused
pub const DMA_CHANNELS: usize = 5;

/// Completion interrupt per channel
const INTERRUPT_IDS: [u32; DMA_CHANNELS] = [0x00, 0x2F, 0x74, 0x75, 0x76];

/// Copy granularity
const BLOCK_SIZE: usize = 8192;

/// Bytes per tick of completion delay
const BYTES_PER_TICK: u32 = 10000;

/// Register offsets (offset & 0xFF)
mod regs {
    /// Write bit 0 to start
    pub const CONTROL: u32 = 0x08;
    pub const SRC: u32 = 0x18;
    pub const DST: u32 = 0x1C;
    pub const COUNT: u32 = 0x20;
}

/// One DMA channel
#[derive(Debug, Clone, Copy, Default)]
pub struct DmaChannel {
    pub src: u32,
    pub dst: u32,
    /// Transfer length in bytes
    pub count: u32,
}

/// DMA controller
#[derive(Debug, Clone, Default)]
pub struct DmaEngine {
    channels: [DmaChannel; DMA_CHANNELS],
}

impl DmaEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self, n: usize) -> Option<&DmaChannel> {
        self.channels.get(n)
    }

    /// Completion interrupt delay in ticks for a transfer length
    pub fn completion_delay(count: u32) -> u32 {
        count / BYTES_PER_TICK
    }

    fn start(&self, io: &IoContext<'_>, n: usize, flags: u32) {
        let ch = self.channels[n];
        log::info!(
            "[DMA{}] Copy [0x{:08X}] -> [0x{:08X}], length [0x{:08X}], flags [0x{:08X}]",
            n,
            ch.src,
            ch.dst,
            ch.count,
            flags
        );

        let mut buf = vec![0u8; BLOCK_SIZE];
        let mut remain = ch.count as usize;
        let (mut src, mut dst) = (ch.src, ch.dst);
        while remain > 0 {
            let len = remain.min(BLOCK_SIZE);
            io.cpu().read_phys(src, &mut buf[..len]);
            io.cpu().write_phys(dst, &buf[..len]);
            remain -= len;
            src = src.wrapping_add(len as u32);
            dst = dst.wrapping_add(len as u32);
        }

        io.irq
            .trigger(INTERRUPT_IDS[n], Self::completion_delay(ch.count));
    }
}

impl Peripheral for DmaEngine {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let Some(ch) = self.channels.get(io.param as usize) else {
            return 0;
        };
        match addr & 0xFF {
            regs::SRC => ch.src,
            regs::DST => ch.dst,
            regs::COUNT => ch.count,
            _ => {
                io.log_read(addr, 0, "");
                0
            }
        }
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let n = io.param as usize;
        if n == 0 || n >= DMA_CHANNELS {
            io.log_write(addr, value, "no such DMA channel");
            return;
        }
        let msg = match addr & 0xFF {
            regs::CONTROL if value & 1 != 0 => {
                self.start(io, n, value);
                return;
            }
            regs::SRC => {
                self.channels[n].src = value;
                "srcAddr"
            }
            regs::DST => {
                self.channels[n].dst = value;
                "dstAddr"
            }
            regs::COUNT => {
                self.channels[n].count = value;
                "count"
            }
            _ => "",
        };
        io.log_write(addr, value, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_delay() {
        assert_eq!(DmaEngine::completion_delay(0), 0);
        assert_eq!(DmaEngine::completion_delay(9999), 0);
        assert_eq!(DmaEngine::completion_delay(40000), 4);
    }

    #[test]
    fn test_interrupt_table() {
        assert_eq!(INTERRUPT_IDS[1], 0x2F);
        assert_eq!(INTERRUPT_IDS[4], 0x76);
    }

    #[test]
    fn test_channels_independent() {
        let engine = DmaEngine::new();
        assert_eq!(engine.channel(1).map(|c| c.count), Some(0));
        assert!(engine.channel(DMA_CHANNELS).is_none());
    }
}
