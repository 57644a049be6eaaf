//! Named colors accepted by light commands

/// An `[r, g, b]` triple as sent in `rgb_color`
pub type Rgb = [u8; 3];

/// Color names and their RGB values, lowercase
pub const COLORS: &[(&str, Rgb)] = &[
    ("white", [255, 255, 255]),
    ("warm_white", [255, 214, 170]),
    ("red", [255, 0, 0]),
    ("green", [0, 255, 0]),
    ("blue", [0, 0, 255]),
    ("yellow", [255, 255, 0]),
    ("orange", [255, 165, 0]),
    ("purple", [128, 0, 128]),
    ("pink", [255, 192, 203]),
    ("cyan", [0, 255, 255]),
    ("magenta", [255, 0, 255]),
    ("lime", [50, 205, 50]),
    ("teal", [0, 128, 128]),
    ("indigo", [75, 0, 130]),
    ("violet", [238, 130, 238]),
    ("gold", [255, 215, 0]),
    ("coral", [255, 127, 80]),
    ("crimson", [220, 20, 60]),
    ("turquoise", [64, 224, 208]),
    ("lavender", [230, 230, 250]),
];

/// Resolve a color name, ignoring case and surrounding whitespace
///
/// Spaces and dashes are treated as underscores, so `"Warm White"` and
/// `"warm-white"` both resolve.
pub fn lookup_color(name: &str) -> Option<Rgb> {
    let key = name.trim().to_lowercase().replace([' ', '-'], "_");
    COLORS
        .iter()
        .find(|(color, _)| *color == key)
        .map(|(_, rgb)| *rgb)
}
