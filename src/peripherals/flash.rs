//! NOR flash ROM banks and the flash interface register
//!
//! ROM0 is mapped at 0xF8000000 and ROM1 at 0xF0000000. Each bank repeats
//! across its 128 MiB window (offsets are masked by the bank size).
//!
//! Writes drive a JEDEC-style command state machine per bank: unlock
//! cycles at word offsets 0x555/0x2AA, program, block erase with a
//! DQ6/DQ2 toggling busy phase, chip erase, and the unlock-bypass
//! shortcuts. Programming clears bits only (new = old & value).
//!
//! The flash interface register at 0xC0000000 only decodes the
//! write-enable command; reads report ready.

use super::{IoContext, Peripheral};
use crate::config::{ModelConfig, RomBankConfig, ROM_BANKS};
use crate::error::ConfigError;

/// Word offsets of the unlock cycles
const UNLOCK_ADDR_1: u32 = 0x555;
const UNLOCK_ADDR_2: u32 = 0x2AA;

/// Status reads that toggle before an erase reports completion
const ERASE_BUSY_READS: u32 = 0x10;

/// Status value reported when an erase completes (DQ7)
const ERASE_DONE: u32 = 0x80;

/// Command state of one flash bank
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    Read,
    Unlock2,
    Unlocked,
    Erase1,
    Erase2,
    Erase3,
    Program,
    UnlockBypass,
    UnlockBypassReset,
    UnlockBypassErase,
    BlockEraseBusy,
}

/// One ROM bank and its command state
#[derive(Debug, Clone)]
pub struct RomBank {
    /// Bus address of the bank
    pub base: u32,
    data: Vec<u8>,
    state: FlashState,
    /// Status reads served since the last block erase
    erase_reads: u32,
}

impl RomBank {
    /// Create an erased bank
    pub fn new(cfg: RomBankConfig) -> Self {
        Self {
            base: cfg.base,
            data: vec![0xFF; cfg.size as usize],
            state: FlashState::Read,
            erase_reads: 0,
        }
    }

    pub fn size(&self) -> u32 {
        self.data.len() as u32
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Offset of a bus address within the bank (mirrored)
    pub fn offset(&self, addr: u32) -> u32 {
        addr.wrapping_sub(self.base) & (self.size().wrapping_sub(1))
    }

    /// Copy an image into the bank
    pub fn load(&mut self, bank: usize, offset: u32, image: &[u8]) -> Result<(), ConfigError> {
        let start = offset as usize;
        let end = start.checked_add(image.len()).filter(|&end| end <= self.data.len());
        let Some(end) = end else {
            return Err(ConfigError::RomTooLarge {
                bank,
                offset,
                len: image.len(),
                size: self.size(),
            });
        };
        self.data[start..end].copy_from_slice(image);
        self.state = FlashState::Read;
        Ok(())
    }

    /// Little-endian word at a byte offset, wrapping inside the bank
    pub fn read_u32(&self, offset: u32) -> u32 {
        let mask = self.size().wrapping_sub(1);
        let mut bytes = [0u8; 4];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = self.data[(offset.wrapping_add(i as u32) & mask) as usize];
        }
        u32::from_le_bytes(bytes)
    }

    fn store_u32(&mut self, offset: u32, value: u32, program: bool) {
        let mask = self.size().wrapping_sub(1);
        for (i, b) in value.to_le_bytes().into_iter().enumerate() {
            let slot = &mut self.data[(offset.wrapping_add(i as u32) & mask) as usize];
            *slot = if program { *slot & b } else { b };
        }
    }

    /// Erase block size (bytes) at a word offset. 32 Mbit x16 parts have
    /// 4 Kword boot blocks at both ends and 32 Kword blocks between; other
    /// sizes are treated as uniform 32 Kword blocks.
    pub fn block_size(&self, word_offset: u32) -> u32 {
        if self.size() == 0x0040_0000 && (word_offset < 0x8000 || word_offset > 0x1F_0000) {
            4 * 1024 * 2
        } else {
            32 * 1024 * 2
        }
    }

    fn erase_block(&mut self, byte_offset: u32) {
        let block = self.block_size(byte_offset >> 1);
        let start = (byte_offset & !(block - 1)) as usize;
        let end = (start + block as usize).min(self.data.len());
        self.data[start..end].fill(0xFF);
        self.erase_reads = 0;
    }

    fn erase_chip(&mut self) {
        self.data.fill(0xFF);
    }

    /// Feed one command-cycle write. Returns a message for the trace log
    /// and whether the write violated the protocol.
    fn command(&mut self, byte_offset: u32, value: u32) -> (&'static str, bool) {
        use FlashState::*;
        let word_offset = byte_offset >> 1;
        let (next, msg, fail) = match (self.state, word_offset, value) {
            (Read, _, 0xF0) => (Read, "reset", false),
            (Read, UNLOCK_ADDR_1, 0xAA) => (Unlock2, "", false),
            (Read, _, 0xA0) => (Program, "UNLOCK BYPASS PROGRAM", false),
            (Read, _, 0x80) => (UnlockBypassErase, "", false),
            (Read, _, 0x90) => (UnlockBypassReset, "", false),
            (Read, _, 0x98) => (Read, "UNLOCK BYPASS CFI unhandled", false),
            (UnlockBypass, _, _) => (Read, "2nd UNLOCK BYPASS unhandled", false),
            (UnlockBypassReset, _, 0x00) => (Read, "UNLOCK BYPASS RESET", false),
            (Unlock2, UNLOCK_ADDR_2, 0x55) => (Unlocked, "", false),
            (Unlocked, _, 0x90) => (Read, "autoselect unhandled", false),
            (Unlocked, UNLOCK_ADDR_1, 0xA0) => (Program, "", false),
            (Unlocked, UNLOCK_ADDR_1, 0x20) => (Read, "UNLOCK BYPASS", false),
            (Unlocked, UNLOCK_ADDR_1, 0x80) => (Erase1, "", false),
            (Erase1, UNLOCK_ADDR_1, 0xAA) => (Erase2, "", false),
            (Erase2, UNLOCK_ADDR_2, 0x55) => (Erase3, "", false),
            (Erase3, UNLOCK_ADDR_1, 0x10) | (UnlockBypassErase, _, 0x10) => {
                self.erase_chip();
                (Read, "CHIP ERASE", false)
            }
            (Erase3, _, 0x30) | (UnlockBypassErase, _, 0x30) => {
                self.erase_block(byte_offset);
                (BlockEraseBusy, "BLOCK ERASE", false)
            }
            (Program, _, _) => {
                self.store_u32(byte_offset, value, true);
                (Read, "PROGRAM", false)
            }
            (BlockEraseBusy, _, _) => (BlockEraseBusy, "write while erase busy", false),
            _ => (Read, "unexpected command", true),
        };
        self.state = next;
        (msg, fail)
    }

    /// Serve a read according to the command state
    fn status_read(&mut self, byte_offset: u32) -> Option<u32> {
        match self.state {
            FlashState::Read => Some(self.read_u32(byte_offset)),
            FlashState::BlockEraseBusy if self.erase_reads < ERASE_BUSY_READS => {
                self.erase_reads += 1;
                let toggle = self.erase_reads & 1;
                Some((toggle << 6) | (toggle << 2))
            }
            FlashState::BlockEraseBusy => {
                self.state = FlashState::Read;
                Some(ERASE_DONE)
            }
            _ => None,
        }
    }
}

/// NOR flash over both ROM banks
#[derive(Debug, Clone)]
pub struct FlashController {
    banks: Vec<RomBank>,
    /// Emulate the command protocol; when off, banks behave as RAM
    state_machine: bool,
}

impl FlashController {
    pub fn new(model: &ModelConfig) -> Self {
        Self {
            banks: model.rom.iter().copied().map(RomBank::new).collect(),
            state_machine: model.flash_state_machine,
        }
    }

    pub fn bank(&self, n: usize) -> Option<&RomBank> {
        self.banks.get(n)
    }

    /// Load an image into bank `n` at byte `offset`
    pub fn load(&mut self, n: usize, offset: u32, image: &[u8]) -> Result<(), ConfigError> {
        self.banks
            .get_mut(n)
            .ok_or(ConfigError::RomBankMissing(n))?
            .load(n, offset, image)
    }

    pub fn set_state_machine(&mut self, enabled: bool) {
        self.state_machine = enabled;
    }
}

impl Peripheral for FlashController {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let n = io.param as usize;
        let Some(bank) = self.banks.get_mut(n) else {
            return 0;
        };
        let offset = bank.offset(addr);
        if !self.state_machine {
            return bank.read_u32(offset);
        }
        match bank.status_read(offset) {
            Some(ret) => ret,
            None => {
                log::warn!(
                    "[ROM{}:{:?}] at [0x{:08X}] read in unknown state [0x{:08X}]",
                    n,
                    bank.state(),
                    io.cpu().current_pc(),
                    offset >> 1
                );
                0
            }
        }
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let n = io.param as usize;
        let Some(bank) = self.banks.get_mut(n) else {
            return;
        };
        let offset = bank.offset(addr);
        if !self.state_machine {
            bank.store_u32(offset, value, false);
            return;
        }

        let before = bank.state();
        let (msg, fail) = bank.command(offset, value);
        if fail {
            log::warn!(
                "[ROM{}:{:?}] at [0x{:08X}] [0x{:08X}] -> [0x{:08X}] unexpected command",
                n,
                before,
                io.cpu().current_pc(),
                value,
                offset >> 1
            );
        } else if !msg.is_empty() {
            log::info!(
                "[ROM{}:{:?}] at [0x{:08X}] Command: {} [0x{:08X}]",
                n,
                before,
                io.cpu().current_pc(),
                msg,
                bank.base.wrapping_add(offset)
            );
        }
    }
}

/// Flash interface control register (0xC0000000)
#[derive(Debug, Clone, Default)]
pub struct FlashInterface {
    write_enabled: bool,
}

impl FlashInterface {
    /// Magic half-word enabling flash writes
    const WRITE_ENABLE_MAGIC: u32 = 0xD9C5;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }
}

impl Peripheral for FlashInterface {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        let ret = if addr & 0x1FF == 0x10 { 1 } else { 0 };
        io.log_read(addr, ret, "");
        ret
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let msg = if addr & 0x1FF != 0x10 {
            ""
        } else if (value | (value >> 16)) & 0xFFFF == Self::WRITE_ENABLE_MAGIC {
            self.write_enabled = true;
            "'Write enable' enabled"
        } else if value == 0 {
            self.write_enabled = false;
            "'Write enable' disabled"
        } else {
            "unknown command"
        };
        io.log_write(addr, value, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bank() -> RomBank {
        let mut b = RomBank::new(RomBankConfig {
            base: 0xF800_0000,
            size: 0x0002_0000,
        });
        let image: Vec<u8> = (0..0x2_0000u32).map(|i| (i * 7) as u8).collect();
        assert!(b.load(0, 0, &image).is_ok());
        b
    }

    fn unlock(b: &mut RomBank) {
        b.command(UNLOCK_ADDR_1 << 1, 0xAA);
        b.command(UNLOCK_ADDR_2 << 1, 0x55);
    }

    #[test]
    fn test_new_is_erased() {
        let b = RomBank::new(RomBankConfig {
            base: 0xF000_0000,
            size: 0x1000,
        });
        assert_eq!(b.state(), FlashState::Read);
        assert!(b.data().iter().all(|&x| x == 0xFF));
    }

    #[test]
    fn test_offset_mirrors() {
        let b = bank();
        assert_eq!(b.offset(0xF800_0010), 0x10);
        assert_eq!(b.offset(0xF802_0010), 0x10);
        assert_eq!(b.offset(0xFFFE_0004), 0x4);
    }

    #[test]
    fn test_load_too_large() {
        let mut b = bank();
        let image = vec![0u8; 0x100];
        assert!(matches!(
            b.load(1, 0x1FF80, &image),
            Err(ConfigError::RomTooLarge { bank: 1, .. })
        ));
    }

    #[test]
    fn test_program_ands_bits() {
        let mut b = bank();
        let old = b.read_u32(0x100);
        unlock(&mut b);
        b.command(UNLOCK_ADDR_1 << 1, 0xA0);
        assert_eq!(b.state(), FlashState::Program);
        b.command(0x100, 0x0F0F_F0F0);
        assert_eq!(b.state(), FlashState::Read);
        assert_eq!(b.read_u32(0x100), old & 0x0F0F_F0F0);
    }

    #[test]
    fn test_unlock_bypass_program() {
        let mut b = bank();
        b.command(0x40, 0xA0);
        b.command(0x40, 0);
        assert_eq!(b.read_u32(0x40), 0);
        assert_eq!(b.state(), FlashState::Read);
    }

    #[test]
    fn test_bad_unlock_resets() {
        let mut b = bank();
        b.command(UNLOCK_ADDR_1 << 1, 0xAA);
        let (_, fail) = b.command(0x10, 0x55);
        assert!(fail);
        assert_eq!(b.state(), FlashState::Read);
    }

    #[test]
    fn test_unexpected_value_in_read_fails() {
        let mut b = bank();
        let (_, fail) = b.command(0, 0x1234);
        assert!(fail);
        assert_eq!(b.state(), FlashState::Read);
    }

    #[test]
    fn test_block_erase_busy_sequence() {
        let mut b = bank();
        unlock(&mut b);
        b.command(UNLOCK_ADDR_1 << 1, 0x80);
        b.command(UNLOCK_ADDR_1 << 1, 0xAA);
        b.command(UNLOCK_ADDR_2 << 1, 0x55);
        assert_eq!(b.state(), FlashState::Erase3);
        b.command(0x1_0004, 0x30);
        assert_eq!(b.state(), FlashState::BlockEraseBusy);

        for i in 1..=ERASE_BUSY_READS {
            let expect = if i & 1 == 1 { 0x44 } else { 0 };
            assert_eq!(b.status_read(0), Some(expect));
        }
        assert_eq!(b.status_read(0), Some(ERASE_DONE));
        assert_eq!(b.state(), FlashState::Read);

        assert!(b.data()[0x1_0000..0x2_0000].iter().all(|&x| x == 0xFF));
        assert_ne!(b.read_u32(0x8), 0xFFFF_FFFF);
    }

    #[test]
    fn test_chip_erase() {
        let mut b = bank();
        unlock(&mut b);
        b.command(UNLOCK_ADDR_1 << 1, 0x80);
        b.command(UNLOCK_ADDR_1 << 1, 0xAA);
        b.command(UNLOCK_ADDR_2 << 1, 0x55);
        b.command(UNLOCK_ADDR_1 << 1, 0x10);
        assert_eq!(b.state(), FlashState::Read);
        assert!(b.data().iter().all(|&x| x == 0xFF));
    }

    #[test]
    fn test_unlock_bypass_erase_and_reset() {
        let mut b = bank();
        b.command(0, 0x80);
        assert_eq!(b.state(), FlashState::UnlockBypassErase);
        b.command(0, 0x10);
        assert!(b.data().iter().all(|&x| x == 0xFF));

        b.command(0, 0x90);
        assert_eq!(b.state(), FlashState::UnlockBypassReset);
        b.command(0, 0x00);
        assert_eq!(b.state(), FlashState::Read);
    }

    #[test]
    fn test_reads_in_command_states_are_zero() {
        let mut b = bank();
        b.command(UNLOCK_ADDR_1 << 1, 0xAA);
        assert_eq!(b.status_read(0), None);
    }

    #[test]
    fn test_block_size_boot_blocks() {
        let b = RomBank::new(RomBankConfig {
            base: 0xF800_0000,
            size: 0x0040_0000,
        });
        assert_eq!(b.block_size(0), 0x2000);
        assert_eq!(b.block_size(0x7FFF), 0x2000);
        assert_eq!(b.block_size(0x8000), 0x1_0000);
        assert_eq!(b.block_size(0x1F_0001), 0x2000);
    }
}
