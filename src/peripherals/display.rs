//! Display controller and compositor
//!
//! Registers at 0xC0F14000:
//! - 0x0D0: bitmap (overlay) VRAM address
//! - 0x0E0: YUV 4:2:2 image VRAM address
//! - 0x080-0x0BC: 16-entry palette (bootloader 4 bpp mode)
//! - 0x800-0xBFC: 256-entry palette (8 bpp mode)
//!
//! Palette entries are written as opacity:Y:U:V with signed chroma and are
//! converted to RGB at write time. The compositor merges the 8-bit overlay
//! with the YUV plane underneath: index 0 is transparent.
//!
//! Pixels are packed 0x00RRGGBB.

use std::fmt;

use super::{IoContext, Peripheral};
use crate::config::{ColorMatrix, DisplayKind, ModelConfig};
use crate::cpu::Cpu;

/// Bitmap address used before firmware programs one
pub const DEFAULT_BMP_VRAM: u32 = 0x0800_0000;

/// Bitmap pitch in 4 bpp mode
const PITCH_4BIT: u32 = 360;
/// Bitmap pitch in 8 bpp mode
const PITCH_8BIT: u32 = 960;

/// Register offsets (offset & 0xFFF)
mod regs {
    pub const BMP_VRAM: u32 = 0x0D0;
    pub const YUV_VRAM: u32 = 0x0E0;
    pub const PALETTE_4BIT_START: u32 = 0x080;
    pub const PALETTE_4BIT_END: u32 = 0x0BC;
    pub const PALETTE_8BIT_START: u32 = 0x800;
    pub const PALETTE_8BIT_END: u32 = 0xBFC;
}

/// DIGIC 6 display registers (absolute addresses, handler param 6)
mod digic6_regs {
    /// Resolution, height << 16 | width
    pub const RESOLUTION: [u32; 4] = [0xD201_3800, 0xD201_381C, 0xD201_8200, 0xD201_8230];
    /// BMP VRAM >> 8; pitch follows the resolution width
    pub const BMP_VRAM_SHIFTED: u32 = 0xD203_0108;
    pub const BMP_VRAM: u32 = 0xD201_8228;
    pub const BMP_PITCH: u32 = 0xD201_822C;
}

/// Handler param of the DIGIC 6 display windows
pub const DIGIC6_DISPLAY: u32 = 6;

/// Fixed-point (>> 10) chroma contributions, indexed by the chroma byte
/// interpreted as a signed value.
#[derive(Clone)]
pub struct YuvTables {
    rv: [i32; 256],
    gu: [i32; 256],
    gv: [i32; 256],
    bu: [i32; 256],
}

impl YuvTables {
    pub fn new(matrix: ColorMatrix) -> Self {
        let (gu_k, bu_k, rv_k, gv_k) = match matrix {
            ColorMatrix::Bt709 => (-191, 1900, 1608, -478),
            ColorMatrix::Bt601 => (-352, 1812, 1437, -731),
        };
        let mut t = Self {
            rv: [0; 256],
            gu: [0; 256],
            gv: [0; 256],
            bu: [0; 256],
        };
        for i in 0..256 {
            let c = i32::from(i as u8 as i8);
            t.gu[i] = (gu_k * c) >> 10;
            t.bu[i] = (bu_k * c) >> 10;
            t.rv[i] = (rv_k * c) >> 10;
            t.gv[i] = (gv_k * c) >> 10;
        }
        t
    }

    /// Convert with signed chroma bytes
    pub fn to_rgb(&self, y: u8, u: u8, v: u8) -> u32 {
        let y = i32::from(y);
        let (u, v) = (u as usize, v as usize);
        let r = (y + self.rv[v]).clamp(0, 255) as u32;
        let g = (y + self.gu[u] + self.gv[v]).clamp(0, 255) as u32;
        let b = (y + self.bu[u]).clamp(0, 255) as u32;
        (r << 16) | (g << 8) | b
    }

    /// Convert with offset-binary chroma bytes (128 = no color), as stored
    /// in the UYVY image plane
    pub fn plane_to_rgb(&self, y: u8, u: u8, v: u8) -> u32 {
        self.to_rgb(y, u ^ 0x80, v ^ 0x80)
    }
}

impl std::fmt::Debug for YuvTables {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("YuvTables").finish_non_exhaustive()
    }
}

/// One palette slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaletteEntry {
    /// 0x00RRGGBB
    pub rgb: u32,
    /// Top byte of the register value; 3 is fully opaque
    pub opacity: u8,
}

impl PaletteEntry {
    fn from_register(value: u32, tables: &YuvTables) -> Self {
        Self {
            rgb: tables.to_rgb((value >> 16) as u8, (value >> 8) as u8, value as u8),
            opacity: (value >> 24) as u8,
        }
    }
}

/// Display register file
#[derive(Debug, Clone)]
pub struct Display {
    tables: YuvTables,
    bmp_vram: u32,
    yuv_vram: u32,
    palette_4bit: [PaletteEntry; 16],
    palette_8bit: [PaletteEntry; 256],
    /// Bootloader 4 bpp mode (last palette written was the 16-entry one)
    is_4bit: bool,
    bmp_pitch: u32,
    /// Output size programmed through the DIGIC 6 registers (0 = unset)
    width: u32,
    height: u32,
    /// Bumped on every state change so the compositor can redraw
    generation: u64,
}

impl Display {
    pub fn new(matrix: ColorMatrix) -> Self {
        Self {
            tables: YuvTables::new(matrix),
            bmp_vram: 0,
            yuv_vram: 0,
            palette_4bit: [PaletteEntry::default(); 16],
            palette_8bit: [PaletteEntry::default(); 256],
            is_4bit: false,
            bmp_pitch: PITCH_8BIT,
            width: 0,
            height: 0,
            generation: 0,
        }
    }

    /// Output size set by firmware, if both dimensions were programmed
    pub fn resolution(&self) -> Option<(usize, usize)> {
        (self.width != 0 && self.height != 0).then_some((self.width as usize, self.height as usize))
    }

    fn write_digic6(&mut self, addr: u32, value: u32) -> &'static str {
        match addr {
            a if digic6_regs::RESOLUTION.contains(&a) => {
                self.width = value & 0xFFFF;
                self.height = value >> 16;
                "Display resolution"
            }
            digic6_regs::BMP_VRAM_SHIFTED => {
                self.bmp_vram = value << 8;
                self.bmp_pitch = self.width;
                "BMP VRAM"
            }
            digic6_regs::BMP_VRAM => {
                self.bmp_vram = value;
                "BMP VRAM"
            }
            digic6_regs::BMP_PITCH => {
                self.bmp_pitch = value;
                "BMP pitch"
            }
            _ => "",
        }
    }

    pub fn bmp_vram(&self) -> u32 {
        self.bmp_vram
    }

    pub fn yuv_vram(&self) -> u32 {
        self.yuv_vram
    }

    pub fn is_4bit(&self) -> bool {
        self.is_4bit
    }

    pub fn bmp_pitch(&self) -> u32 {
        self.bmp_pitch
    }

    pub fn palette_8bit(&self) -> &[PaletteEntry; 256] {
        &self.palette_8bit
    }

    pub fn palette_4bit(&self) -> &[PaletteEntry; 16] {
        &self.palette_4bit
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

}

/// Trace text for a palette register write
#[derive(Debug, Clone, Copy)]
struct PaletteTrace {
    index: usize,
    entry: PaletteEntry,
    value: u32,
}

impl fmt::Display for PaletteTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value == 0 {
            return write!(f, "Palette[{:X}] -> empty", self.index);
        }
        let rgb = self.entry.rgb;
        write!(
            f,
            "Palette[{:X}] -> R{:03} G{:03} B{:03}{}",
            self.index,
            (rgb >> 16) & 0xFF,
            (rgb >> 8) & 0xFF,
            rgb & 0xFF,
            if self.entry.opacity != 3 { " transparent?" } else { "" }
        )
    }
}

impl Peripheral for Display {
    fn read(&mut self, io: &IoContext<'_>, addr: u32) -> u32 {
        io.log_read(addr, 0, "");
        0
    }

    fn write(&mut self, io: &IoContext<'_>, addr: u32, value: u32) {
        let off = addr & 0xFFF;
        self.generation += 1;
        if io.param == DIGIC6_DISPLAY {
            let msg = self.write_digic6(addr, value);
            io.log_write(addr, value, msg);
            return;
        }
        match off {
            regs::BMP_VRAM => {
                self.bmp_vram = value;
                io.log_write(addr, value, "BMP VRAM");
            }
            regs::YUV_VRAM => {
                self.yuv_vram = value;
                io.log_write(addr, value, "YUV VRAM");
            }
            regs::PALETTE_4BIT_START..=regs::PALETTE_4BIT_END => {
                let index = ((off - regs::PALETTE_4BIT_START) / 4) as usize;
                let entry = PaletteEntry::from_register(value, &self.tables);
                self.palette_4bit[index] = entry;
                self.is_4bit = true;
                self.bmp_pitch = PITCH_4BIT;
                io.log_write(addr, value, PaletteTrace { index, entry, value });
            }
            regs::PALETTE_8BIT_START..=regs::PALETTE_8BIT_END => {
                let index = ((off - regs::PALETTE_8BIT_START) / 4) as usize;
                let entry = PaletteEntry::from_register(value, &self.tables);
                self.palette_8bit[index] = entry;
                self.is_4bit = false;
                self.bmp_pitch = PITCH_8BIT;
                io.log_write(addr, value, PaletteTrace { index, entry, value });
            }
            _ => io.log_write(addr, value, ""),
        }
    }
}

/// Card activity LED as last driven through GPIO
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CardLed {
    /// Never driven; not drawn
    #[default]
    Unknown,
    On,
    Off,
}

/// Output resolution and image plane size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayGeometry {
    pub width: usize,
    pub height: usize,
    pub yuv_width: usize,
    pub yuv_height: usize,
}

impl DisplayGeometry {
    pub fn for_model(model: &ModelConfig) -> Self {
        let (width, height, yuv_width, yuv_height) = match model.display {
            DisplayKind::Lcd => (720, 480, 720, 480),
            DisplayKind::Hdmi1080 => (960, 540, 1920, 1080),
            DisplayKind::Hdmi480 => (720, 480, 720, 480),
            DisplayKind::SdPal => (720, 576, 540, 572),
            DisplayKind::SdNtsc => (720, 480, 540, 480),
        };
        // VxWorks bootloader output is half height
        let height = if model.digic_version < 4 { height / 2 } else { height };
        Self {
            width,
            height,
            yuv_width,
            yuv_height,
        }
    }

    /// Geometry for a model, with the output size replaced by the one the
    /// firmware programmed, if any
    pub fn for_display(model: &ModelConfig, display: &Display) -> Self {
        let geom = Self::for_model(model);
        match display.resolution() {
            Some((width, height)) => Self { width, height, ..geom },
            None => geom,
        }
    }
}

/// Presentation layer target: an RGB32 surface the compositor draws into
pub trait DisplaySink {
    fn resize(&mut self, width: usize, height: usize);
    fn size(&self) -> (usize, usize);
    /// Row-major 0x00RRGGBB pixels, `width` per row
    fn surface_mut(&mut self) -> &mut [u32];
    /// Rows `first..=last` changed
    fn blit_rows(&mut self, first: usize, last: usize);
}

/// In-memory [`DisplaySink`]
#[derive(Debug, Clone, Default)]
pub struct FrameBuffer {
    width: usize,
    height: usize,
    pixels: Vec<u32>,
    last_blit: Option<(usize, usize)>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pixels(&self) -> &[u32] {
        &self.pixels
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<u32> {
        if x >= self.width {
            return None;
        }
        self.pixels.get(y * self.width + x).copied()
    }

    /// Row range reported by the last update
    pub fn last_blit(&self) -> Option<(usize, usize)> {
        self.last_blit
    }
}

impl DisplaySink for FrameBuffer {
    fn resize(&mut self, width: usize, height: usize) {
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width * height];
    }

    fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    fn surface_mut(&mut self) -> &mut [u32] {
        &mut self.pixels
    }

    fn blit_rows(&mut self, first: usize, last: usize) {
        self.last_blit = Some((first, last));
    }
}

/// Converts guest VRAM into RGB rows, redrawing only rows whose source
/// bytes changed.
#[derive(Debug)]
pub struct DisplayCompositor {
    tables: YuvTables,
    /// Source bytes each row was last drawn from
    cache: Vec<Vec<u8>>,
    invalidate: bool,
    generation: u64,
    led: CardLed,
}

impl DisplayCompositor {
    pub fn new(matrix: ColorMatrix) -> Self {
        Self {
            tables: YuvTables::new(matrix),
            cache: Vec::new(),
            invalidate: true,
            generation: 0,
            led: CardLed::Unknown,
        }
    }

    /// Force a full redraw on the next update
    pub fn invalidate(&mut self) {
        self.invalidate = true;
    }

    /// Composite one frame. Returns the first and last redrawn row.
    pub fn update(
        &mut self,
        display: &Display,
        model: &ModelConfig,
        cpu: &dyn Cpu,
        led: CardLed,
        sink: &mut dyn DisplaySink,
    ) -> Option<(usize, usize)> {
        let geom = DisplayGeometry::for_display(model, display);
        let (width, height) = (geom.width, geom.height);

        if sink.size() != (width, height) {
            sink.resize(width, height);
            self.invalidate = true;
        }
        if self.cache.len() != height {
            self.cache = vec![Vec::new(); height];
            self.invalidate = true;
        }
        if display.generation() != self.generation {
            self.generation = display.generation();
            self.invalidate = true;
        }
        if led != self.led {
            self.led = led;
            for row in self.led_rows(height) {
                self.cache[row].clear();
            }
        }

        let bmp_base = match display.bmp_vram() {
            0 => DEFAULT_BMP_VRAM,
            addr => addr,
        };
        let pitch = display.bmp_pitch();
        let bmp_len = if display.is_4bit() { width.div_ceil(2) } else { width };
        let yuv_row_len = geom.yuv_width * 2;
        let use_yuv = !display.is_4bit() && display.yuv_vram() != 0;

        let mut dirty: Option<(usize, usize)> = None;
        let mut source = Vec::with_capacity(bmp_len + yuv_row_len);
        let mut line = vec![0u32; width];

        for i in 0..height {
            source.clear();
            source.resize(bmp_len, 0);
            cpu.read_phys(bmp_base.wrapping_add(i as u32 * pitch), &mut source);
            if use_yuv {
                let j = i * geom.yuv_height / height;
                source.resize(bmp_len + yuv_row_len, 0);
                let yuv_addr = display.yuv_vram().wrapping_add((j * yuv_row_len) as u32);
                cpu.read_phys(yuv_addr, &mut source[bmp_len..]);
            }

            if !self.invalidate && self.cache[i] == source {
                continue;
            }

            let (bmp, yuv) = source.split_at(bmp_len);
            if display.is_4bit() {
                self.draw_line4(display, bmp, &mut line);
            } else if use_yuv {
                self.draw_line8_yuv(display, bmp, yuv, yuv_row_len / width, &mut line);
            } else {
                Self::draw_line8(display, bmp, &mut line);
            }
            self.draw_led(i, width, height, &mut line);

            if let Some(dest) = sink.surface_mut().get_mut(i * width..(i + 1) * width) {
                dest.copy_from_slice(&line);
            }
            self.cache[i].clone_from(&source);
            dirty = Some(match dirty {
                Some((first, _)) => (first, i),
                None => (i, i),
            });
        }

        self.invalidate = false;
        if let Some((first, last)) = dirty {
            sink.blit_rows(first, last);
        }
        dirty
    }

    /// Bootloader mode: two pixels per byte, low nibble first
    fn draw_line4(&self, display: &Display, bmp: &[u8], line: &mut [u32]) {
        let palette = display.palette_4bit();
        for (x, px) in line.iter_mut().enumerate() {
            let byte = bmp[x / 2];
            let index = if x % 2 == 1 { byte >> 4 } else { byte & 0xF };
            *px = palette[index as usize].rgb;
        }
    }

    /// Overlay only; index 0 shows black
    fn draw_line8(display: &Display, bmp: &[u8], line: &mut [u32]) {
        let palette = display.palette_8bit();
        for (px, &index) in line.iter_mut().zip(bmp) {
            *px = match index {
                0 => 0,
                i => palette[i as usize].rgb,
            };
        }
    }

    /// Overlay over the UYVY plane. `step` is the plane byte advance per
    /// output pixel.
    fn draw_line8_yuv(&self, display: &Display, bmp: &[u8], yuv: &[u8], step: usize, line: &mut [u32]) {
        let palette = display.palette_8bit();
        for (x, (px, &index)) in line.iter_mut().zip(bmp).enumerate() {
            if index != 0 {
                *px = palette[index as usize].rgb;
                continue;
            }
            let pos = x * step;
            let word = pos & !3;
            let Some(uyvy) = yuv.get(word..word + 4) else {
                *px = 0;
                continue;
            };
            // U Y1 V Y2
            let y = if pos & 3 != 0 { uyvy[3] } else { uyvy[1] };
            *px = self.tables.plane_to_rgb(y, uyvy[0], uyvy[2]);
        }
    }

    /// Rows covered by the LED marker
    fn led_rows(&self, height: usize) -> std::ops::Range<usize> {
        height.saturating_sub(13)..height.saturating_sub(3)
    }

    /// LED marker: radius 5 disc with a black ring, 8 px from the
    /// bottom-right corner
    fn draw_led(&self, row: usize, width: usize, height: usize, line: &mut [u32]) {
        let color = match self.led {
            CardLed::Unknown => return,
            CardLed::On => 0xFF_0000,
            CardLed::Off => 0x40_4040,
        };
        if width < 16 || height < 16 {
            return;
        }
        let (cx, cy) = ((width - 8) as i32, (height - 8) as i32);
        let dy = row as i32 - cy;
        if !(-5..=5).contains(&dy) {
            return;
        }
        for dx in -5..=5i32 {
            let r2 = dx * dx + dy * dy;
            if r2 < 25 {
                line[(cx + dx) as usize] = if r2 >= 16 { 0 } else { color };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::MockCpu;

    const BMP: u32 = 0x0100_0000;
    const YUV: u32 = 0x0200_0000;

    fn display_with_planes(yuv: bool) -> Display {
        let mut d = Display::new(ColorMatrix::Bt709);
        d.bmp_vram = BMP;
        if yuv {
            d.yuv_vram = YUV;
        }
        d
    }

    #[test]
    fn test_gray_plane_is_uniform_gray() {
        let cpu = MockCpu::new();
        let model = ModelConfig::default();
        // bitmap stays zero; UYVY plane is all 0x80
        cpu.write_phys(YUV, &vec![0x80; 1440 * 480]);

        let display = display_with_planes(true);
        let mut comp = DisplayCompositor::new(ColorMatrix::Bt709);
        let mut fb = FrameBuffer::new();
        let dirty = comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb);

        assert_eq!(dirty, Some((0, 479)));
        assert_eq!(fb.size(), (720, 480));
        assert!(fb.pixels().iter().all(|&p| p == 0x80_8080));
    }

    #[test]
    fn test_unchanged_frame_not_redrawn() {
        let cpu = MockCpu::new();
        let model = ModelConfig::default();
        let display = display_with_planes(false);
        let mut comp = DisplayCompositor::new(ColorMatrix::Bt709);
        let mut fb = FrameBuffer::new();

        assert!(comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb).is_some());
        assert_eq!(comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb), None);

        cpu.write_phys(BMP + 10 * PITCH_8BIT + 3, &[1]);
        cpu.write_phys(BMP + 20 * PITCH_8BIT, &[1]);
        assert_eq!(
            comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb),
            Some((10, 20))
        );
        assert_eq!(fb.last_blit(), Some((10, 20)));

        comp.invalidate();
        assert_eq!(
            comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb),
            Some((0, 479))
        );
    }

    #[test]
    fn test_overlay_over_image() {
        let cpu = MockCpu::new();
        let model = ModelConfig::default();
        let tables = YuvTables::new(ColorMatrix::Bt709);
        let mut display = display_with_planes(true);
        // opaque white: Y=0xFF, U=V=0
        display.palette_8bit[5] = PaletteEntry::from_register(0x03FF_0000, &tables);
        cpu.write_phys(YUV, &[0x80, 0x10, 0x80, 0x10]);
        cpu.write_phys(BMP + 1, &[5]);

        let mut comp = DisplayCompositor::new(ColorMatrix::Bt709);
        let mut fb = FrameBuffer::new();
        comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb);
        assert_eq!(fb.pixel(0, 0), Some(0x10_1010));
        assert_eq!(fb.pixel(1, 0), Some(0xFF_FFFF));
    }

    #[test]
    fn test_four_bit_mode_nibbles() {
        let cpu = MockCpu::new();
        let model = ModelConfig::default();
        let tables = YuvTables::new(ColorMatrix::Bt709);
        let mut display = display_with_planes(false);
        display.palette_4bit[1] = PaletteEntry::from_register(0x03FF_0000, &tables);
        display.palette_4bit[2] = PaletteEntry::from_register(0x0340_0000, &tables);
        display.is_4bit = true;
        display.bmp_pitch = PITCH_4BIT;
        cpu.write_phys(BMP, &[0x21]);

        let mut comp = DisplayCompositor::new(ColorMatrix::Bt709);
        let mut fb = FrameBuffer::new();
        comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb);
        assert_eq!(fb.pixel(0, 0), Some(0xFF_FFFF));
        assert_eq!(fb.pixel(1, 0), Some(0x40_4040));
        assert_eq!(fb.pixel(2, 0), Some(0));
    }

    #[test]
    fn test_geometry_table() {
        let mut model = ModelConfig::default();
        model.display = DisplayKind::Hdmi1080;
        let g = DisplayGeometry::for_model(&model);
        assert_eq!((g.width, g.height, g.yuv_width, g.yuv_height), (960, 540, 1920, 1080));

        model.display = DisplayKind::Lcd;
        model.digic_version = 3;
        assert_eq!(DisplayGeometry::for_model(&model).height, 240);
    }

    #[test]
    fn test_digic6_resolution_overrides_table() {
        let mut model = ModelConfig::default();
        model.digic_version = 6;
        let mut display = Display::new(ColorMatrix::Bt709);
        assert_eq!(DisplayGeometry::for_display(&model, &display).width, 720);

        // width alone is not enough
        display.write_digic6(0xD201_3800, 0x0000_02D0);
        assert_eq!(display.resolution(), None);

        assert_eq!(display.write_digic6(0xD201_381C, 0x01E0_0280), "Display resolution");
        assert_eq!(display.resolution(), Some((640, 480)));
        let g = DisplayGeometry::for_display(&model, &display);
        assert_eq!((g.width, g.height, g.yuv_width), (640, 480, 720));

        display.write_digic6(0xD203_0108, 0x0001_2340);
        assert_eq!(display.bmp_vram(), 0x0123_4000);
        assert_eq!(display.bmp_pitch(), 640);
        display.write_digic6(0xD201_822C, 736);
        assert_eq!(display.bmp_pitch(), 736);
    }

    #[test]
    fn test_digic6_frame_uses_programmed_size() {
        let cpu = MockCpu::new();
        let mut model = ModelConfig::default();
        model.digic_version = 6;
        let mut display = Display::new(ColorMatrix::Bt709);
        display.write_digic6(0xD201_8230, (240 << 16) | 320);
        display.write_digic6(0xD201_8228, BMP);
        display.write_digic6(0xD201_822C, 320);

        let mut fb = FrameBuffer::new();
        let mut comp = DisplayCompositor::new(ColorMatrix::Bt709);
        assert_eq!(comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb), Some((0, 239)));
        assert_eq!(fb.size(), (320, 240));
    }

    #[test]
    fn test_palette_signed_chroma() {
        let tables = YuvTables::new(ColorMatrix::Bt709);
        // V = +127 pushes red up, green down
        let e = PaletteEntry::from_register(0x0380_007F, &tables);
        assert_eq!(e.opacity, 3);
        assert_eq!((e.rgb >> 16) & 0xFF, 255);
        assert!((e.rgb >> 8) & 0xFF < 0x80);
        assert_eq!(e.rgb & 0xFF, 0x80);
    }

    #[test]
    fn test_bt601_differs() {
        let a = YuvTables::new(ColorMatrix::Bt601).to_rgb(0x80, 0x20, 0x20);
        let b = YuvTables::new(ColorMatrix::Bt709).to_rgb(0x80, 0x20, 0x20);
        assert_ne!(a, b);
    }

    #[test]
    fn test_led_drawn_and_tracked() {
        let cpu = MockCpu::new();
        let model = ModelConfig::default();
        let display = display_with_planes(false);
        let mut comp = DisplayCompositor::new(ColorMatrix::Bt709);
        let mut fb = FrameBuffer::new();
        comp.update(&display, &model, &cpu, CardLed::Unknown, &mut fb);

        let dirty = comp.update(&display, &model, &cpu, CardLed::On, &mut fb);
        assert_eq!(dirty, Some((467, 476)));
        assert_eq!(fb.pixel(712, 472), Some(0xFF_0000));
        // ring
        assert_eq!(fb.pixel(716, 472), Some(0));
    }
}
