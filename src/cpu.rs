//! CPU collaborator interface
//!
//! The ARM core itself is emulated elsewhere. Peripherals only need to move
//! bytes through guest physical memory, drive the single IRQ line, and read
//! the program counter for trace output.

/// Services the peripheral core requires from the CPU emulator.
///
/// Called from both the CPU thread (register accesses) and the background
/// ticker, so implementations must be shareable across threads.
pub trait Cpu: Send + Sync {
    /// Copy guest physical memory at `addr` into `buf`
    fn read_phys(&self, addr: u32, buf: &mut [u8]);

    /// Copy `data` into guest physical memory at `addr`
    fn write_phys(&self, addr: u32, data: &[u8]);

    /// Assert the CPU IRQ input
    fn raise_irq(&self);

    /// Deassert the CPU IRQ input
    fn lower_irq(&self);

    /// Program counter of the instruction making the current access
    fn current_pc(&self) -> u32;

    /// True while the CPU is stopped (e.g. by a debugger); the ticker idles
    fn is_halted(&self) -> bool {
        false
    }

    /// Read one little-endian word
    fn read_u32(&self, addr: u32) -> u32 {
        let mut buf = [0u8; 4];
        self.read_phys(addr, &mut buf);
        u32::from_le_bytes(buf)
    }

    /// Write one little-endian word
    fn write_u32(&self, addr: u32, value: u32) {
        self.write_phys(addr, &value.to_le_bytes());
    }
}
