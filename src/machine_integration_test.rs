//! Whole-machine tests driving peripherals through the register interface,
//! the way firmware does.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::cpu::Cpu;
use crate::peripherals::DisplaySink;
use crate::test_support::{small_model, MockCard, MockCpu, MockDrive};
use crate::{Emu, FrameBuffer};

const INT_REASON: u32 = 0xC020_1000;
const INT_ENABLE: u32 = 0xC020_1010;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn machine() -> (Arc<MockCpu>, Emu) {
    init_logging();
    let cpu = Arc::new(MockCpu::new());
    let emu = Emu::new(small_model(), cpu.clone()).expect("valid model");
    (cpu, emu)
}

fn active_interrupt(emu: &Emu) -> Option<u32> {
    emu.interrupts().lock().intc.active()
}

#[test]
fn test_dma_copy_with_delayed_completion() {
    let (cpu, mut emu) = machine();
    let pattern: Vec<u8> = (0..40_000u32).map(|i| (i * 7) as u8).collect();
    cpu.write_phys(0x0010_0000, &pattern);

    emu.write(INT_ENABLE, 0x74);
    emu.write(0xC0A2_0018, 0x0010_0000);
    emu.write(0xC0A2_001C, 0x0020_0000);
    emu.write(0xC0A2_0020, 40_000);
    emu.write(0xC0A2_0008, 1);

    let mut copied = vec![0u8; pattern.len()];
    cpu.read_phys(0x0020_0000, &mut copied);
    assert_eq!(copied, pattern);

    // 40000 bytes at 10000 bytes per tick
    for _ in 0..3 {
        emu.tick();
        assert_eq!(active_interrupt(&emu), None);
    }
    emu.tick();
    assert_eq!(active_interrupt(&emu), Some(0x74));
    assert!(cpu.irq_asserted());

    assert_eq!(emu.read(INT_REASON), 0x74);
    assert!(!cpu.irq_asserted());
    assert_eq!(emu.read(INT_REASON), 0);
}

#[test]
fn test_sd_single_block_read_over_dma() {
    let (cpu, mut emu) = machine();
    let block: Vec<u8> = (0..512u32).map(|i| (i ^ 0x5A) as u8).collect();
    emu.attach_sd_card(Box::new(MockCard::new(block.clone())));
    let model = emu.model().clone();
    emu.write(INT_ENABLE, model.sd_driver_interrupt);
    emu.write(INT_ENABLE, model.sd_dma_interrupt);

    emu.write(0xC051_0000, 0x0030_0000);
    emu.write(0xC051_0004, 512);
    emu.write(0xC051_0010, 1);
    assert_eq!(emu.read(0xC051_0014), 0x81);

    emu.write(0xC0C0_0068, 512);
    emu.write(0xC0C0_007C, 1);
    emu.write(0xC0C0_0014, 1);
    // CMD17, argument 0
    emu.write(0xC0C0_0024, 17 << 8);
    emu.write(0xC0C0_0020, 0);
    emu.write(0xC0C0_000C, 0x14);

    let mut data = vec![0u8; 512];
    cpu.read_phys(0x0030_0000, &mut data);
    assert_eq!(data, block);

    assert_eq!(emu.read(0xC0C0_0010), 0x0020_0001);
    assert_eq!(emu.read(0xC0C0_0034), 0x0009_0000);
    assert_eq!(emu.read(0xC0C0_0038), 0x0000_0011);
    assert_eq!(emu.read(0xC0C0_0080), 1);

    // a repeated interrupt enable retries the trigger but is not delivered twice
    emu.write(0xC0C0_0014, 1);
    emu.tick();
    assert_eq!(cpu.raise_count(), 1);

    // driver interrupt now, DMA interrupt once the first is acknowledged
    assert_eq!(emu.read(INT_REASON), model.sd_driver_interrupt);
    emu.tick();
    assert_eq!(active_interrupt(&emu), Some(model.sd_dma_interrupt));
    assert_eq!(cpu.raise_count(), 2);
}

#[test]
fn test_sd_write_starts_from_dma_register() {
    let (cpu, mut emu) = machine();
    let card = MockCard::new(vec![]);
    let written = card.written();
    emu.attach_sd_card(Box::new(card));
    cpu.write_phys(0x0040_0000, &[1, 2, 3, 4, 5, 6, 7, 8]);

    emu.write(0xC051_0000, 0x0040_0000);
    emu.write(0xC051_0004, 8);
    emu.write(0xC051_0010, 1);
    emu.write(0xC0C0_0024, 24 << 8);
    emu.write(0xC0C0_0020, 0);
    emu.write(0xC0C0_000C, 0x13);
    assert!(written.lock().unwrap().is_empty());

    emu.write(0xC051_0018, 1);
    assert_eq!(*written.lock().unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8]);
    assert_eq!(emu.read(0xC0C0_0010), 0x0020_0001);
}

#[test]
fn test_cf_dma_read_completes_on_ticker() {
    let (cpu, mut emu) = machine();
    let sector: Vec<u8> = (0..32u8).collect();
    let drive = MockDrive::new(sector.clone());
    let drq = drive.ready();
    drq.store(false, Ordering::SeqCst);
    emu.attach_ata(Box::new(drive));
    let model = emu.model().clone();
    emu.write(INT_ENABLE, model.cf_dma_interrupt);

    emu.write(0xC060_8040, 0x0001_0000);
    emu.write(0xC050_0000, 0x0050_0000);
    emu.write(0xC050_0004, 32);
    emu.write(0xC050_0010, 0x39);
    assert_eq!(emu.read(0xC060_8104), 0);

    // drive not ready yet: no progress
    emu.tick();
    assert_eq!(emu.read(0xC050_0004), 0);
    assert_eq!(active_interrupt(&emu), None);

    drq.store(true, Ordering::SeqCst);
    emu.tick();
    assert_eq!(emu.read(0xC050_0004), 32);
    assert_eq!(emu.read(0xC060_8104), 4);
    assert_eq!(active_interrupt(&emu), Some(model.cf_dma_interrupt));

    let mut data = vec![0u8; 32];
    cpu.read_phys(0x0050_0000, &mut data);
    assert_eq!(data, sector);
}

#[test]
fn test_flash_program_through_bus() {
    let (_cpu, mut emu) = machine();
    let base = emu.model().rom[1].base;
    let size = emu.model().rom[1].size;

    emu.write(base + 0x555 * 2, 0xAA);
    emu.write(base + 0x2AA * 2, 0x55);
    emu.write(base + 0x555 * 2, 0xA0);
    emu.write(base + 0x100, 0x1234_5678);

    assert_eq!(emu.read(base + 0x100), 0x1234_5678);
    // mirrored across the window
    assert_eq!(emu.read(base + size + 0x100), 0x1234_5678);
    // programming only clears bits
    emu.write(base + 0x555 * 2, 0xAA);
    emu.write(base + 0x2AA * 2, 0x55);
    emu.write(base + 0x555 * 2, 0xA0);
    emu.write(base + 0x100, 0xFFFF_0000);
    assert_eq!(emu.read(base + 0x100), 0x1234_0000);
}

#[test]
fn test_os_timer_interrupt_period() {
    let (_cpu, mut emu) = machine();
    let irq_line = emu.model().timer_interrupt;
    emu.write(INT_ENABLE, irq_line);
    emu.write(0xC021_0208, 0x300);
    emu.write(0xC021_0200, 1);
    assert_eq!(emu.read(0xC021_0208), 0x300);

    emu.tick();
    emu.tick();
    assert_eq!(active_interrupt(&emu), None);
    emu.tick();
    assert_eq!(active_interrupt(&emu), Some(irq_line));
    assert_eq!(emu.read(INT_REASON), irq_line);

    // re-armed from the reload value, counted down in the delivering pass
    assert_eq!(emu.interrupts().lock().intc.scheduled(irq_line), 2);

    // firmware re-enables the line from its handler
    emu.write(INT_ENABLE, irq_line);
    emu.tick();
    assert_eq!(active_interrupt(&emu), None);
    emu.tick();
    assert_eq!(active_interrupt(&emu), Some(irq_line));
}

#[test]
fn test_hptimer_fires_on_clock_match() {
    let (cpu, mut emu) = machine();
    let irq_line = emu.model().hptimer_interrupt;
    emu.write(INT_ENABLE, irq_line);
    emu.write(0xC024_3164, 0x4F0);
    emu.write(0xC024_3160, 1);
    assert_eq!(emu.read(0xC024_3164), 0x500);

    for _ in 0..4 {
        emu.tick();
    }
    assert!(!cpu.irq_asserted());
    emu.tick();
    assert_eq!(emu.read(0xC024_2014), 0x500);
    assert_eq!(active_interrupt(&emu), Some(irq_line));
    assert_eq!(emu.read(0xC024_3300), 0x10);

    emu.write(0xC024_3264, 1);
    assert_eq!(emu.read(0xC024_3300), 0);
}

#[test]
fn test_display_gray_frame() {
    let (cpu, mut emu) = machine();
    cpu.write_phys(0x0600_0000, &vec![0x80; 720 * 2 * 480]);
    emu.write(0xC0F1_40D0, 0x0500_0000);
    emu.write(0xC0F1_40E0, 0x0600_0000);

    let mut fb = FrameBuffer::new();
    assert_eq!(emu.update_display(&mut fb), Some((0, 479)));
    assert_eq!(fb.size(), (720, 480));
    assert!(fb.pixels().iter().all(|&p| p == 0x80_8080));
    assert_eq!(emu.update_display(&mut fb), None);

    // an overlay pixel with a palette color wins over the image
    emu.write(0xC0F1_4800 + 4 * 9, 0x03FF_0000);
    cpu.write_phys(0x0500_0000 + 960 * 2 + 5, &[9]);
    assert!(emu.update_display(&mut fb).is_some());
    assert_eq!(fb.pixels()[2 * 720 + 5], 0xFF_FFFF);
}

#[test]
fn test_tio_console_and_interrupt() {
    let (_cpu, mut emu) = machine();
    for b in b"boot\n" {
        emu.write(0xC080_0000, u32::from(*b));
    }
    assert_eq!(emu.console(), "boot\n");
    assert_eq!(active_interrupt(&emu), None);

    emu.write(INT_ENABLE, 0x3A);
    emu.write(0xC080_0018, 0xFFFF_FFC4);
    emu.write(0xC080_0000, u32::from(b'x'));
    assert_eq!(active_interrupt(&emu), Some(0x3A));

    assert_eq!(emu.read(0xC080_0014), 2);
    emu.send_tio_byte(b'y');
    assert_eq!(emu.read(0xC080_0014), 3);
    assert_eq!(emu.read(0xC080_0004), u32::from(b'y'));
    emu.write(0xC080_0014, 1);
    assert_eq!(emu.read(0xC080_0014), 2);
}

#[test]
fn test_system_registers() {
    let (_cpu, mut emu) = machine();
    emu.write(0xC040_0008, 0x1000_0402);
    assert_eq!(emu.read(0xC040_0008), 0x1000_0402);
    assert_eq!(emu.read(0xC072_0008), 0x100);
    assert_eq!(emu.read(0xC010_001C), 1);
    assert_eq!(emu.read(0xC022_F48C), 0x10C);
    assert_eq!(emu.read(0xC022_3020), 0);
    assert_eq!(emu.read(0xC022_F100), 0);
    assert_eq!(emu.read(0xC022_F100), 1);
    assert_eq!(emu.read(0xC0F0_0100), 0);
    assert_eq!(emu.read(0xD20B_210C), 0x10000);
    assert_eq!(emu.read(0x1234_0000), 0);
}

#[test]
fn test_card_led_reaches_display() {
    init_logging();
    let cpu = Arc::new(MockCpu::new());
    let mut model = small_model();
    model.card_led_address = Some(0xC022_006C);
    let mut emu = Emu::new(model, cpu).expect("valid model");

    emu.write(0xC022_006C, 0x46);
    assert_eq!(emu.card_led(), crate::CardLed::On);
    assert_eq!(emu.read(0xC022_006C), 0x46);

    let mut fb = FrameBuffer::new();
    emu.update_display(&mut fb);
    assert_eq!(fb.pixels()[472 * 720 + 712], 0xFF_0000);
}

#[test]
fn test_flash_interface_and_plain_rom_mode() {
    let (_cpu, mut emu) = machine();
    assert_eq!(emu.read(0xC000_0010), 1);
    emu.write(0xC000_0010, 0xD9C5_0000);
    assert!(emu.bus().peripherals.flash_if.write_enabled());
    emu.write(0xC000_0010, 0);
    assert!(!emu.bus().peripherals.flash_if.write_enabled());

    // with the protocol off, ROM writes land as plain memory
    emu.bus_mut().peripherals.flash.set_state_machine(false);
    let base = emu.model().rom[0].base;
    emu.write(base + 0x40, 0x0102_0304);
    assert_eq!(emu.read(base + 0x40), 0x0102_0304);
    emu.write(base + 0x40, 0xFFFF_FFFF);
    assert_eq!(emu.read(base + 0x40), 0xFFFF_FFFF);
}

#[test]
fn test_vx_mask_enable_and_disable() {
    let (cpu, mut emu) = machine();
    // 0xC0200008 covers ids 0x00-0x1F; bit 0x10 is the HPTimer line
    emu.write(0xC020_0008, 1 << 0x10);
    assert!(emu.interrupts().lock().intc.is_enabled(0x10));
    emu.interrupts().trigger(0x10, 0);
    assert!(cpu.irq_asserted());

    emu.write(0xC020_000C, 1 << 0x10);
    assert!(!cpu.irq_asserted());
    assert_eq!(active_interrupt(&emu), None);
}
