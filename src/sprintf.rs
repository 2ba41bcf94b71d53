//! `sprintf` over the parameter registers.
//!
//! Directives follow C: `%[N$][flags][width][.precision][h|l|ll]conv` where
//! width and precision may be `*` or `*N$`. The source register of a numeric
//! conversion is read as float unless `l` says int, and `i`, `p`, `P` default
//! to int. `%v` and `%V` expand to three `%g`/`%G` directives with the same
//! flags, formatted recursively over the vector components.

use crate::error::Result;
use crate::strings::STRINGTEMP_LENGTH;
use crate::utils::lossy;
use crate::vm::Exec;
use glam::Vec3;

/// Output bound. Widths and precisions are clamped to it when parsed.
const LIMIT: usize = STRINGTEMP_LENGTH - 1;

/// Arguments after the format string.
pub trait FormatArgs {
    fn count(&self) -> usize;
    fn float(&self, n: usize) -> f32;
    fn int(&self, n: usize) -> i32;
    fn vector(&self, n: usize) -> Vec3;
    fn string(&self, n: usize) -> Vec<u8>;
}

/// A register value, for formatting outside of a builtin call.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Float(f32),
    Int(i32),
    Vector(Vec3),
    Str(Vec<u8>),
}

impl FormatArgs for [Value] {
    fn count(&self) -> usize {
        self.len()
    }

    fn float(&self, n: usize) -> f32 {
        match self.get(n) {
            Some(Value::Float(v)) => *v,
            Some(Value::Int(v)) => f32::from_bits(*v as u32),
            Some(Value::Vector(v)) => v.x,
            _ => 0.0,
        }
    }

    fn int(&self, n: usize) -> i32 {
        match self.get(n) {
            Some(Value::Int(v)) => *v,
            Some(Value::Float(v)) => v.to_bits() as i32,
            Some(Value::Vector(v)) => v.x.to_bits() as i32,
            _ => 0,
        }
    }

    fn vector(&self, n: usize) -> Vec3 {
        match self.get(n) {
            Some(Value::Vector(v)) => *v,
            _ => Vec3::ZERO,
        }
    }

    fn string(&self, n: usize) -> Vec<u8> {
        match self.get(n) {
            Some(Value::Str(s)) => s.clone(),
            _ => Vec::new(),
        }
    }
}

struct CallArgs<'a, 'b>(&'a Exec<'b>);

impl FormatArgs for CallArgs<'_, '_> {
    fn count(&self) -> usize {
        self.0.argc().saturating_sub(1)
    }

    fn float(&self, n: usize) -> f32 {
        if n < self.count() { self.0.float(n + 1) } else { 0.0 }
    }

    fn int(&self, n: usize) -> i32 {
        if n < self.count() { self.0.int(n + 1) } else { 0 }
    }

    fn vector(&self, n: usize) -> Vec3 {
        if n < self.count() { self.0.vector(n + 1) } else { Vec3::ZERO }
    }

    fn string(&self, n: usize) -> Vec<u8> {
        if n < self.count() { self.0.string(n + 1) } else { Vec::new() }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    alt: bool,
    zero: bool,
    left: bool,
    space: bool,
    plus: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

impl Flags {
    /// The directive text these flags came from, ending in `conv`.
    fn directive(&self, conv: u8) -> Vec<u8> {
        let mut d = vec![b'%'];
        for (set, c) in [(self.alt, b'#'), (self.zero, b'0'), (self.left, b'-'),
                         (self.space, b' '), (self.plus, b'+')] {
            if set {
                d.push(c);
            }
        }
        if let Some(w) = self.width {
            d.extend_from_slice(w.to_string().as_bytes());
        }
        if let Some(p) = self.precision {
            d.push(b'.');
            d.extend_from_slice(p.to_string().as_bytes());
        }
        d.push(conv);
        d
    }
}

fn number_at(fmt: &[u8], i: usize) -> Option<(usize, usize)> {
    let digits = fmt[i.min(fmt.len())..].iter().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let n = fmt[i..i + digits].iter().fold(0usize, |n, c| n.saturating_mul(10).saturating_add((c - b'0') as usize));
    Some((n, i + digits))
}

/// `N$` at `i`, as a zero-based argument index.
fn position_at(fmt: &[u8], i: usize) -> Option<(Option<usize>, usize)> {
    match number_at(fmt, i) {
        Some((0, j)) if fmt.get(j) == Some(&b'$') => None,
        Some((n, j)) if fmt.get(j) == Some(&b'$') => Some((Some(n - 1), j + 1)),
        _ => Some((None, i)),
    }
}

/// Value of a `*` or `*N$` width or precision, `i` just past the star.
fn star(fmt: &[u8], i: &mut usize, args: &(impl FormatArgs + ?Sized), next: &mut usize) -> Option<i32> {
    let (pos, j) = position_at(fmt, *i)?;
    if pos.is_none() && number_at(fmt, *i).is_some() {
        return None;
    }
    *i = j;
    let n = pos.unwrap_or_else(|| {
        *next += 1;
        *next - 1
    });
    Some(args.float(n) as i32)
}

/// Pad `body` to the field width. Zero padding goes between the prefix and
/// the digits.
fn field(prefix: &[u8], body: &[u8], fl: &Flags, zero_ok: bool) -> Vec<u8> {
    let len = prefix.len() + body.len();
    let width = fl.width.unwrap_or(0);
    let mut out = Vec::with_capacity(len.max(width));
    if len >= width {
        out.extend_from_slice(prefix);
        out.extend_from_slice(body);
    } else if fl.left {
        out.extend_from_slice(prefix);
        out.extend_from_slice(body);
        out.resize(width, b' ');
    } else if fl.zero && zero_ok {
        out.extend_from_slice(prefix);
        out.resize(width - body.len(), b'0');
        out.extend_from_slice(body);
    } else {
        out.resize(width - len, b' ');
        out.extend_from_slice(prefix);
        out.extend_from_slice(body);
    }
    out
}

fn sign(negative: bool, fl: &Flags) -> &'static [u8] {
    match (negative, fl.plus, fl.space) {
        (true, _, _) => b"-",
        (false, true, _) => b"+",
        (false, false, true) => b" ",
        _ => b"",
    }
}

fn with_precision(digits: String, zero: bool, fl: &Flags) -> String {
    match fl.precision {
        Some(0) if zero => String::new(),
        Some(p) if digits.len() < p => format!("{}{digits}", "0".repeat(p - digits.len())),
        _ => digits,
    }
}

fn signed(v: i64, fl: &Flags) -> Vec<u8> {
    let digits = with_precision(v.unsigned_abs().to_string(), v == 0, fl);
    field(sign(v < 0, fl), digits.as_bytes(), fl, fl.precision.is_none())
}

fn unsigned(v: u32, conv: u8, fl: &Flags) -> Vec<u8> {
    let digits = match conv {
        b'o' => format!("{v:o}"),
        b'x' => format!("{v:x}"),
        b'X' => format!("{v:X}"),
        _ => v.to_string(),
    };
    let mut digits = with_precision(digits, v == 0, fl);
    let prefix: &[u8] = match conv {
        b'o' if fl.alt && !digits.starts_with('0') => {
            digits.insert(0, '0');
            b""
        }
        b'x' if fl.alt && v != 0 => b"0x",
        b'X' if fl.alt && v != 0 => b"0X",
        _ => b"",
    };
    field(prefix, digits.as_bytes(), fl, fl.precision.is_none())
}

fn fixed(a: f64, p: usize, alt: bool) -> String {
    let mut s = format!("{a:.p$}");
    if alt && p == 0 {
        s.push('.');
    }
    s
}

fn exponent(a: f64, p: usize) -> i32 {
    let s = format!("{a:.p$e}");
    s.split_once('e').and_then(|(_, e)| e.parse().ok()).unwrap_or(0)
}

fn scientific(a: f64, p: usize, alt: bool) -> String {
    let s = format!("{a:.p$e}");
    let (mant, exp) = s.split_once('e').unwrap_or((&s, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let dot = if alt && p == 0 { "." } else { "" };
    format!("{mant}{dot}e{}{:02}", if exp < 0 { '-' } else { '+' }, exp.unsigned_abs())
}

fn strip_zeros(m: &str) -> &str {
    if m.contains('.') {
        m.trim_end_matches('0').trim_end_matches('.')
    } else {
        m
    }
}

fn general(a: f64, p: usize, alt: bool) -> String {
    let p = p.max(1);
    let x = if a == 0.0 { 0 } else { exponent(a, p - 1) };
    if x < -4 || x >= p as i32 {
        let s = scientific(a, p - 1, alt);
        if alt {
            return s;
        }
        match s.split_once('e') {
            Some((m, e)) => format!("{}e{e}", strip_zeros(m)),
            None => s,
        }
    } else {
        let s = fixed(a, (p as i32 - 1 - x) as usize, alt);
        if alt { s } else { strip_zeros(&s).to_string() }
    }
}

fn float(v: f64, conv: u8, fl: &Flags) -> Vec<u8> {
    let upper = conv.is_ascii_uppercase();
    let sign = sign(v.is_sign_negative() && !v.is_nan(), fl);
    let a = v.abs();
    let body = if a.is_nan() {
        "nan".to_string()
    } else if a.is_infinite() {
        "inf".to_string()
    } else {
        let p = fl.precision.unwrap_or(6);
        match conv.to_ascii_lowercase() {
            b'f' => fixed(a, p, fl.alt),
            b'e' => scientific(a, p, fl.alt),
            _ => general(a, p, fl.alt),
        }
    };
    let body = if upper { body.to_ascii_uppercase() } else { body };
    field(sign, body.as_bytes(), fl, a.is_finite())
}

/// One directive starting just past its `%`. Returns the output and the index
/// after the conversion character, or `None` when the directive is malformed.
fn directive(fmt: &[u8], mut i: usize, args: &(impl FormatArgs + ?Sized), next: &mut usize)
             -> Option<(Vec<u8>, usize)>
{
    if fmt.get(i) == Some(&b'%') {
        return Some((b"%".to_vec(), i + 1));
    }
    let (pos, j) = position_at(fmt, i)?;
    i = j;
    let mut fl = Flags::default();
    while let Some(&c) = fmt.get(i) {
        match c {
            b'#' => fl.alt = true,
            b'0' => fl.zero = true,
            b'-' => fl.left = true,
            b' ' => fl.space = true,
            b'+' => fl.plus = true,
            _ => break,
        }
        i += 1;
    }
    if fmt.get(i) == Some(&b'*') {
        i += 1;
        let w = star(fmt, &mut i, args, next)?;
        fl.left |= w < 0;
        fl.width = Some((w.unsigned_abs() as usize).min(LIMIT));
    } else if let Some((w, j)) = number_at(fmt, i) {
        fl.width = Some(w.min(LIMIT));
        i = j;
    }
    if fmt.get(i) == Some(&b'.') {
        i += 1;
        if fmt.get(i) == Some(&b'*') {
            i += 1;
            let p = star(fmt, &mut i, args, next)?;
            fl.precision = usize::try_from(p).ok().map(|p| p.min(LIMIT));
        } else if let Some((p, j)) = number_at(fmt, i) {
            fl.precision = Some(p.min(LIMIT));
            i = j;
        } else {
            fl.precision = Some(0);
        }
    }
    let mut float_src = None;
    loop {
        match fmt.get(i) {
            Some(b'h') => float_src = Some(true),
            Some(b'l') => float_src = Some(false),
            _ => break,
        }
        i += 1;
    }
    let conv = *fmt.get(i)?;
    i += 1;
    let float_src = float_src.unwrap_or(!matches!(conv, b'i' | b'p' | b'P'));
    let n = pos.unwrap_or_else(|| {
        *next += 1;
        *next - 1
    });
    let int_value = || if float_src { args.float(n) as i64 } else { args.int(n) as i64 };
    let out = match conv {
        b'd' | b'i' => signed(int_value(), &fl),
        b'o' | b'u' | b'x' | b'X' => unsigned(int_value() as u32, conv, &fl),
        b'p' | b'P' => {
            let hex = if conv == b'p' { b'x' } else { b'X' };
            unsigned(int_value() as u32, hex, &Flags { alt: true, ..fl })
        }
        b'e' | b'E' | b'f' | b'F' | b'g' | b'G' => {
            let v = if float_src { args.float(n) as f64 } else { args.int(n) as f64 };
            float(v, conv, &fl)
        }
        b'c' => field(b"", &[int_value() as u8], &fl, false),
        b's' => {
            let mut s = args.string(n);
            if let Some(p) = fl.precision {
                s.truncate(p);
            }
            field(b"", &s, &fl, false)
        }
        b'v' | b'V' => {
            let d = fl.directive(if conv == b'v' { b'g' } else { b'G' });
            let triple = [&d[..], b" ", &d[..], b" ", &d[..]].concat();
            let v = args.vector(n);
            let parts = [Value::Float(v.x), Value::Float(v.y), Value::Float(v.z)];
            format(&triple, &parts[..])
        }
        _ => return None,
    };
    Some((out, i))
}

/// Format `fmt` over `args`, bounded by the temp string length.
pub fn format(fmt: &[u8], args: &(impl FormatArgs + ?Sized)) -> Vec<u8> {
    let mut out = Vec::new();
    let mut next = 0;
    let mut i = 0;
    while i < fmt.len() && out.len() < LIMIT {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        match directive(fmt, i + 1, args, &mut next) {
            Some((piece, j)) => {
                out.extend_from_slice(&piece);
                i = j;
            }
            None => {
                qc_warn!("sprintf: invalid directive: {}", lossy(&fmt[i..]));
                break;
            }
        }
    }
    out.truncate(LIMIT);
    out
}

// string(string fmt, ...) sprintf
pub fn pf_sprintf(e: &mut Exec<'_>) -> Result<()> {
    let fmt = e.string(0);
    let out = format(&fmt, &CallArgs(e));
    e.ret_tstring(&out);
    Ok(())
}
