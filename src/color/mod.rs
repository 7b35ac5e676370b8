//! Mapping color tokens to normalized RGBA values.

mod names;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub use names::CssColors;

/// Four floating-point channels in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        let [r, g, b, a] = bytes.map(|c| f32::from(c) / 255.0);
        Self { r, g, b, a }
    }

    /// Quantizes the channels to 8 bits each.
    pub fn to_bytes(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a].map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
    }

    /// Lowercase `#rrggbb`, or `#rrggbbaa` when the color is not opaque.
    pub fn to_hex(self) -> String {
        let [r, g, b, a] = self.to_bytes();
        if a == 0xff {
            format!("#{r:02x}{g:02x}{b:02x}")
        } else {
            format!("#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }
}

/// A token together with the color it resolved to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedColor {
    pub token: String,
    pub rgba: Rgba,
}

/// Lookup service for named colors.
pub trait ColorDictionary: Send + Sync {
    fn lookup(&self, name: &str) -> Option<Rgba>;
}

/// Resolves color tokens captured from model source.
///
/// Supported forms are hex codes (`#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa`),
/// numeric vectors with three or four channels in `[0, 1]`, and names known
/// to the dictionary.
#[derive(Debug, Clone, Default)]
pub struct ColorResolver<D = CssColors> {
    dictionary: D,
}

impl<D: ColorDictionary> ColorResolver<D> {
    pub fn new(dictionary: D) -> Self {
        Self { dictionary }
    }

    pub fn resolve(&self, token: &str) -> Result<ResolvedColor, PipelineError> {
        let trimmed = token.trim();
        let rgba = if let Some(hex) = trimmed.strip_prefix('#') {
            parse_hex(hex)
        } else if trimmed.starts_with('[') {
            parse_vector(trimmed)
        } else {
            self.dictionary.lookup(trimmed)
        };
        rgba.map(|rgba| ResolvedColor {
            token: token.to_string(),
            rgba,
        })
        .ok_or_else(|| PipelineError::unknown_color(token))
    }

    /// Resolves every token in order, stopping at the first unknown one.
    pub fn resolve_all(&self, tokens: &[String]) -> Result<Vec<ResolvedColor>, PipelineError> {
        tokens.iter().map(|token| self.resolve(token)).collect()
    }
}

fn parse_hex(hex: &str) -> Option<Rgba> {
    if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |i: usize| u8::from_str_radix(&hex[i..=i], 16).ok();
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let bytes = match hex.len() {
        3 | 4 => {
            let mut out = [0xff; 4];
            for (i, slot) in out.iter_mut().take(hex.len()).enumerate() {
                *slot = nibble(i)? * 0x11;
            }
            out
        }
        6 | 8 => {
            let mut out = [0xff; 4];
            for (i, slot) in out.iter_mut().take(hex.len() / 2).enumerate() {
                *slot = byte(i * 2)?;
            }
            out
        }
        _ => return None,
    };
    Some(Rgba::from_bytes(bytes))
}

fn parse_vector(token: &str) -> Option<Rgba> {
    let inner = token.strip_prefix('[')?.strip_suffix(']')?;
    let channels = inner
        .split(',')
        .map(|part| part.trim().parse::<f32>().ok())
        .collect::<Option<Vec<_>>>()?;
    if channels.iter().any(|c| !(0.0..=1.0).contains(c)) {
        return None;
    }
    match channels[..] {
        [r, g, b] => Some(Rgba::new(r, g, b, 1.0)),
        [r, g, b, a] => Some(Rgba::new(r, g, b, a)),
        _ => None,
    }
}
