/// RGB color value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Pack this color into a single 3-3-2 byte. See [`quantize`].
    pub const fn quantize(self) -> u8 {
        quantize(self.r, self.g, self.b)
    }
}

/// Map a 24-bit color onto the packed 8-bit palette.
///
/// Red and green keep 3 bits, blue keeps 2, laid out as `rrrgggbb`. Renderers
/// decode frames with [`dequantize`], so this must stay bit-exact.
pub const fn quantize(r: u8, g: u8, b: u8) -> u8 {
    let red = (r as u32) * 8 / 256;
    let green = (g as u32) * 8 / 256;
    let blue = (b as u32) * 4 / 256;

    ((red << 5) | (green << 2) | blue) as u8
}

/// Expand a packed 3-3-2 byte back to a 24-bit color.
///
/// Each channel is scaled to the full 0..=255 range, so
/// `quantize(dequantize(c)) == c` for every byte.
pub const fn dequantize(packed: u8) -> Rgb {
    let red = (packed >> 5) as u32;
    let green = ((packed >> 2) & 0b111) as u32;
    let blue = (packed & 0b11) as u32;

    Rgb::new(
        (red * 255 / 7) as u8,
        (green * 255 / 7) as u8,
        (blue * 255 / 3) as u8,
    )
}

/// Standard xterm-256color ANSI palette.
const ANSI_COLORS: [Rgb; 16] = [
    Rgb::new(0, 0, 0),       // Black
    Rgb::new(205, 0, 0),     // Red
    Rgb::new(0, 205, 0),     // Green
    Rgb::new(205, 205, 0),   // Yellow
    Rgb::new(0, 0, 238),     // Blue
    Rgb::new(205, 0, 205),   // Magenta
    Rgb::new(0, 205, 205),   // Cyan
    Rgb::new(229, 229, 229), // White
    Rgb::new(127, 127, 127), // Bright Black
    Rgb::new(255, 0, 0),     // Bright Red
    Rgb::new(0, 255, 0),     // Bright Green
    Rgb::new(255, 255, 0),   // Bright Yellow
    Rgb::new(92, 92, 255),   // Bright Blue
    Rgb::new(255, 0, 255),   // Bright Magenta
    Rgb::new(0, 255, 255),   // Bright Cyan
    Rgb::new(255, 255, 255), // Bright White
];

/// Resolve an xterm-256 palette index to RGB.
///
/// 0..16 are the named ANSI colors, 16..232 the 6x6x6 cube and 232..256 the
/// grayscale ramp.
pub fn indexed_color(idx: u8) -> Rgb {
    let idx = idx as usize;
    if idx < 16 {
        ANSI_COLORS[idx]
    } else if idx < 232 {
        let n = idx - 16;
        let r = (n / 36) % 6;
        let g = (n / 6) % 6;
        let b = n % 6;
        let to_byte = |v: usize| if v == 0 { 0u8 } else { (55 + 40 * v) as u8 };
        Rgb::new(to_byte(r), to_byte(g), to_byte(b))
    } else {
        let v = (8 + 10 * (idx - 232)) as u8;
        Rgb::new(v, v, v)
    }
}
