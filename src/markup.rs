//! Color markup in console text.
//!
//! `^0`..`^9` select a palette color, `^xRGB` a hex color, `^^` is a literal
//! caret and `^a` toggles the alternate character set (high bit). Anything
//! else after a caret is plain text.

use crate::error::Result;
use crate::vm::Exec;
use glam::{Vec2, Vec4};

const PALETTE: [[f32; 3]; 10] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [1.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
    [0.0, 1.0, 1.0],
    [1.0, 0.0, 1.0],
    [1.0, 1.0, 1.0],
    [0.5, 0.5, 0.5],
    [0.75, 0.75, 0.75],
];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    pub ch: u8,
    pub rgba: Vec4,
}

#[derive(Debug, Clone)]
pub struct Markup<'a> {
    text: &'a [u8],
    pos: usize,
    tint: Vec4,
    rgba: Vec4,
    mask: u8,
}

fn hex(c: u8) -> Option<f32> {
    (c as char).to_digit(16).map(|d| d as f32 / 15.0)
}

impl<'a> Markup<'a> {
    pub fn new(text: &'a [u8], tint: Vec4) -> Markup<'a> {
        Markup { text, pos: 0, tint, rgba: tint, mask: 0 }
    }

    fn color(&mut self, rgb: [f32; 3]) {
        self.rgba = Vec4::new(rgb[0], rgb[1], rgb[2], 1.0) * self.tint;
    }

    /// Consume a markup code at the cursor, returning whether one was there.
    fn code(&mut self) -> bool {
        let rest = &self.text[self.pos..];
        match rest {
            [b'^', d @ b'0'..=b'9', ..] => {
                self.color(PALETTE[(d - b'0') as usize]);
                self.pos += 2;
            }
            [b'^', b'x', r, g, b, ..] => match (hex(*r), hex(*g), hex(*b)) {
                (Some(r), Some(g), Some(b)) => {
                    self.color([r, g, b]);
                    self.pos += 5;
                }
                _ => return false,
            },
            [b'^', b'a', ..] => {
                self.mask ^= 0x80;
                self.pos += 2;
            }
            _ => return false,
        }
        true
    }
}

impl Iterator for Markup<'_> {
    type Item = Glyph;

    fn next(&mut self) -> Option<Glyph> {
        while self.pos < self.text.len() && self.code() {}
        let c = *self.text.get(self.pos)?;
        self.pos += 1;
        if c == b'^' && self.text.get(self.pos) == Some(&b'^') {
            self.pos += 1;
        }
        Some(Glyph { ch: c | self.mask, rgba: self.rgba })
    }
}

pub fn visible_len(s: &[u8]) -> usize {
    Markup::new(s, Vec4::ONE).count()
}

pub fn decolorize(s: &[u8]) -> Vec<u8> {
    Markup::new(s, Vec4::ONE).map(|g| g.ch).collect()
}

pub fn pf_strlennocol(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    e.ret_float(visible_len(&s) as f32);
    Ok(())
}

pub fn pf_strdecolorize(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    e.ret_tstring(&decolorize(&s));
    Ok(())
}

// float(string text, float allowcolors, optional vector size) stringwidth
pub fn pf_stringwidth(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    let colors = e.float(1) != 0.0;
    let size = if e.argc() > 2 { e.vector(2).truncate() } else { Vec2::ZERO };
    let size = if size.x == 0.0 { Vec2::splat(8.0) } else { size };
    let n = if colors { visible_len(&s) } else { s.len() };
    e.ret_float(n as f32 * size.x);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_invisible() {
        assert_eq!(visible_len(b"^1red^7white"), 8);
        assert_eq!(decolorize(b"^1red^7white"), b"redwhite");
        assert_eq!(decolorize(b"^xF00hot"), b"hot");
        assert_eq!(decolorize(b"a^^b"), b"a^b");
        assert_eq!(decolorize(b"^xZZ0"), b"^xZZ0");
        assert_eq!(decolorize(b"trail^"), b"trail^");
    }

    #[test]
    fn alternate_charset() {
        assert_eq!(decolorize(b"^aA^aA"), vec![b'A' | 0x80, b'A']);
    }

    #[test]
    fn colors_are_tinted() {
        let half = Vec4::new(1.0, 1.0, 1.0, 0.5);
        let g: Vec<Glyph> = Markup::new(b"a^2b^x0F0c", half).collect();
        assert_eq!(g[0].rgba, half);
        assert_eq!(g[1].rgba, Vec4::new(0.0, 1.0, 0.0, 0.5));
        assert_eq!(g[2].rgba, g[1].rgba);
    }
}
