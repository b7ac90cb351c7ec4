//! Machine orchestrator
//!
//! Owns the address dispatcher, the shared IRQ domain, the CF handle the
//! ticker drains, and the display compositor. The CPU emulator drives it
//! through [`Emu::access`]; a presentation layer pulls frames through
//! [`Emu::update_display`].

use std::path::Path;
use std::sync::Arc;

use crate::bus::{AccessOp, Bus};
use crate::config::ModelConfig;
use crate::cpu::Cpu;
use crate::error::ConfigError;
use crate::peripherals::{
    AtaDevice, CardLed, CfController, DisplayCompositor, DisplaySink, Interrupts, SdCard,
};
use crate::ticker::{self, BackgroundTicker};

/// Peripheral core of one camera body
#[derive(Debug)]
pub struct Emu {
    bus: Bus,
    irq: Interrupts,
    /// Shares state with the bus' CF controller
    cf: CfController,
    compositor: DisplayCompositor,
    ticker: Option<BackgroundTicker>,
}

impl Emu {
    /// Assemble the peripherals for `model`, signalling `cpu`
    pub fn new(model: ModelConfig, cpu: Arc<dyn Cpu>) -> Result<Self, ConfigError> {
        model.validate()?;
        log::info!(
            "{}: DIGIC {}, ROM0 {:#x} bytes, ROM1 {:#x} bytes",
            model.name,
            model.digic_version,
            model.rom[0].size,
            model.rom[1].size
        );

        let irq = Interrupts::new(cpu);
        let compositor = DisplayCompositor::new(model.color_matrix);
        let bus = Bus::new(model, irq.clone());
        let cf = bus.peripherals.cf.clone();
        Ok(Self {
            bus,
            irq,
            cf,
            compositor,
            ticker: None,
        })
    }

    /// One register access from the CPU. Writes return 0.
    pub fn access(&mut self, addr: u32, op: AccessOp, value: u32) -> u32 {
        self.bus.access(addr, op, value)
    }

    pub fn read(&mut self, addr: u32) -> u32 {
        self.bus.read(addr)
    }

    pub fn write(&mut self, addr: u32, value: u32) {
        self.bus.write(addr, value);
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus {
        &mut self.bus
    }

    pub fn interrupts(&self) -> &Interrupts {
        &self.irq
    }

    pub fn model(&self) -> &ModelConfig {
        self.bus.model()
    }

    /// Copy an image into ROM bank `bank` at `offset`
    pub fn load_rom(&mut self, bank: usize, offset: u32, image: &[u8]) -> Result<(), ConfigError> {
        self.bus.peripherals.flash.load(bank, offset, image)?;
        log::info!("ROM{}: loaded {:#x} bytes at offset {:#x}", bank, image.len(), offset);
        Ok(())
    }

    /// Load ROM bank `bank` from a dump file, starting `file_offset` bytes
    /// into the file. Data past the bank size is dropped.
    pub fn load_rom_file(
        &mut self,
        bank: usize,
        path: impl AsRef<Path>,
        file_offset: u64,
    ) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;

        let len = data.len() as u64;
        if file_offset > len {
            return Err(ConfigError::RomOffsetTooLarge {
                path: path.display().to_string(),
                offset: file_offset,
                len,
            });
        }

        let size = self
            .bus
            .peripherals
            .flash
            .bank(bank)
            .map(|b| b.size() as usize)
            .ok_or(ConfigError::RomBankMissing(bank))?;
        let image = &data[file_offset as usize..];
        if image.len() > size {
            log::warn!(
                "{}: {:#x} bytes, truncated to ROM{} size {:#x}",
                path.display(),
                image.len(),
                bank,
                size
            );
        }
        self.load_rom(bank, 0, &image[..image.len().min(size)])
    }

    pub fn attach_sd_card(&mut self, card: Box<dyn SdCard>) {
        self.bus.peripherals.sdio.attach(card);
    }

    pub fn attach_ata(&mut self, device: Box<dyn AtaDevice>) {
        self.cf.attach(device);
    }

    /// Run one ticker step on the calling thread
    pub fn tick(&self) {
        ticker::tick(&self.irq, &self.cf, self.bus.model());
    }

    /// Start the background ticker. No-op if it is already running.
    pub fn start_ticker(&mut self) -> std::io::Result<()> {
        if self.ticker.is_none() {
            let t = BackgroundTicker::spawn(self.irq.clone(), self.cf.clone(), self.bus.model().clone())?;
            self.ticker = Some(t);
        }
        Ok(())
    }

    pub fn stop_ticker(&mut self) {
        self.ticker = None;
    }

    pub fn ticker_running(&self) -> bool {
        self.ticker.as_ref().map_or(false, BackgroundTicker::is_running)
    }

    /// Card LED as driven through whichever register file the body uses
    pub fn card_led(&self) -> CardLed {
        let p = &self.bus.peripherals;
        if self.bus.model().is_digic6() {
            p.digic6.card_led()
        } else {
            p.gpio.card_led()
        }
    }

    /// Composite a frame into `sink`. Returns the changed row range.
    pub fn update_display(&mut self, sink: &mut dyn DisplaySink) -> Option<(usize, usize)> {
        let led = self.card_led();
        self.compositor.update(
            &self.bus.peripherals.display,
            self.bus.model(),
            self.irq.cpu(),
            led,
            sink,
        )
    }

    pub fn invalidate_display(&mut self) {
        self.compositor.invalidate();
    }

    /// Offer one byte to the debug UART
    pub fn send_tio_byte(&mut self, byte: u8) {
        self.bus.peripherals.tio.send_rx_byte(byte);
    }

    /// Debug console output so far
    pub fn console(&self) -> String {
        self.bus.peripherals.tio.console()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{small_model, MockCpu};
    use std::io::Write;

    fn emu() -> Emu {
        Emu::new(small_model(), Arc::new(MockCpu::new())).expect("valid model")
    }

    #[test]
    fn test_rejects_invalid_model() {
        let mut model = small_model();
        model.rom[0].size = 0x3000;
        let err = Emu::new(model, Arc::new(MockCpu::new())).unwrap_err();
        assert!(matches!(err, ConfigError::RomSizeNotPowerOfTwo { bank: 0, .. }));
    }

    #[test]
    fn test_load_rom_file_with_offset() {
        let mut emu = emu();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0xAA, 0xBB, 0x11, 0x22, 0x33, 0x44]).unwrap();

        emu.load_rom_file(1, file.path(), 2).unwrap();
        let base = emu.model().rom[1].base;
        emu.bus_mut().peripherals.flash.set_state_machine(false);
        assert_eq!(emu.read(base), 0x4433_2211);
    }

    #[test]
    fn test_load_rom_file_truncates() {
        let mut emu = emu();
        let size = emu.model().rom[1].size as usize;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&vec![0x5A; size + 0x100]).unwrap();
        emu.load_rom_file(1, file.path(), 0).unwrap();
        let bank = emu.bus().peripherals.flash.bank(1).unwrap();
        assert!(bank.data().iter().all(|&b| b == 0x5A));
    }

    #[test]
    fn test_load_rom_file_errors() {
        let mut emu = emu();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0; 16]).unwrap();

        let err = emu.load_rom_file(0, file.path(), 17).unwrap_err();
        assert!(matches!(err, ConfigError::RomOffsetTooLarge { offset: 17, len: 16, .. }));

        let err = emu.load_rom_file(5, file.path(), 0).unwrap_err();
        assert!(matches!(err, ConfigError::RomBankMissing(5)));

        let dir = tempfile::tempdir().unwrap();
        let err = emu.load_rom_file(0, dir.path().join("missing.bin"), 0).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_load_rom_too_large() {
        let mut emu = emu();
        let size = emu.model().rom[0].size as usize;
        let err = emu.load_rom(0, 4, &vec![0; size]).unwrap_err();
        assert!(matches!(err, ConfigError::RomTooLarge { bank: 0, offset: 4, .. }));
    }

    #[test]
    fn test_ticker_start_stop() {
        let mut emu = emu();
        emu.start_ticker().unwrap();
        assert!(emu.ticker_running());
        emu.stop_ticker();
        assert!(!emu.ticker_running());
    }
}
