//! General builtins: math, strings, conversions, cvars, console and
//! entities.

use crate::error::Result;
use crate::progs::EType;
use crate::strings::STRINGTEMP_LENGTH;
use crate::utils::{ftoa, lossy, q_atof, q_atoi};
use crate::vm::Exec;
use chrono::{Local, Utc};
use glam::Vec3;
use rand::Rng;
use std::fmt::Write;

const MAX_TEMP: usize = STRINGTEMP_LENGTH - 1;

macro_rules! math1 {
    ($($name:ident => $f:expr),* $(,)?) => {
        $(pub fn $name(e: &mut Exec<'_>) -> Result<()> {
            let v = e.float(0);
            let f: fn(f32) -> f32 = $f;
            e.ret_float(f(v));
            Ok(())
        })*
    };
}

math1! {
    pf_floor => f32::floor,
    pf_ceil => f32::ceil,
    pf_fabs => f32::abs,
    pf_sin => f32::sin,
    pf_cos => f32::cos,
    pf_sqrt => f32::sqrt,
    pf_asin => f32::asin,
    pf_acos => f32::acos,
    pf_atan => f32::atan,
    pf_tan => f32::tan,
    pf_rint => |v| if v > 0.0 { (v + 0.5).trunc() } else { (v - 0.5).trunc() },
}

pub fn pf_atan2(e: &mut Exec<'_>) -> Result<()> {
    let (y, x) = (e.float(0), e.float(1));
    e.ret_float(y.atan2(x));
    Ok(())
}

pub fn pf_pow(e: &mut Exec<'_>) -> Result<()> {
    let (a, n) = (e.float(0), e.float(1));
    e.ret_float(a.powf(n));
    Ok(())
}

pub fn pf_random(e: &mut Exec<'_>) -> Result<()> {
    let r: f32 = e.host.rng.gen();
    e.ret_float(r);
    Ok(())
}

fn fold_floats(e: &mut Exec<'_>, name: &str, f: fn(f32, f32) -> f32) -> Result<()> {
    let n = e.argc();
    if n == 0 {
        qc_warn!("{name}: called without arguments");
        e.ret_float(0.0);
        return Ok(());
    }
    let v = (1..n).fold(e.float(0), |acc, i| f(acc, e.float(i)));
    e.ret_float(v);
    Ok(())
}

pub fn pf_min(e: &mut Exec<'_>) -> Result<()> {
    fold_floats(e, "min", f32::min)
}

pub fn pf_max(e: &mut Exec<'_>) -> Result<()> {
    fold_floats(e, "max", f32::max)
}

// float(float minimum, float val, float maximum) bound
pub fn pf_bound(e: &mut Exec<'_>) -> Result<()> {
    let (lo, v, hi) = (e.float(0), e.float(1), e.float(2));
    e.ret_float(v.max(lo).min(hi));
    Ok(())
}

// Vectors

pub fn pf_normalize(e: &mut Exec<'_>) -> Result<()> {
    let v = e.vector(0);
    e.ret_vector(v.normalize_or_zero());
    Ok(())
}

pub fn pf_vlen(e: &mut Exec<'_>) -> Result<()> {
    let v = e.vector(0);
    e.ret_float(v.length());
    Ok(())
}

/// Whole degrees of `atan2(y, x)` in `[0, 360)`. Truncates toward zero, but
/// values within rounding noise of an integer snap to it.
fn whole_degrees(y: f32, x: f32) -> f32 {
    let deg = (y as f64).atan2(x as f64).to_degrees();
    let deg = if (deg - deg.round()).abs() < 1e-4 { deg.round() } else { deg.trunc() };
    (if deg < 0.0 { deg + 360.0 } else { deg }) as f32
}

fn yaw(v: Vec3) -> f32 {
    if v.x == 0.0 && v.y == 0.0 {
        return 0.0;
    }
    whole_degrees(v.y, v.x)
}

pub fn pf_vectoyaw(e: &mut Exec<'_>) -> Result<()> {
    let v = e.vector(0);
    e.ret_float(yaw(v));
    Ok(())
}

/// Pitch, yaw and roll of a direction, whole degrees in `[0, 360)`.
pub fn vectoangles(v: Vec3) -> Vec3 {
    if v.x == 0.0 && v.y == 0.0 {
        let pitch = if v.z > 0.0 { 90.0 } else { 270.0 };
        return Vec3::new(pitch, 0.0, 0.0);
    }
    let forward = (v.x * v.x + v.y * v.y).sqrt();
    Vec3::new(whole_degrees(v.z, forward), yaw(v), 0.0)
}

pub fn pf_vectoangles(e: &mut Exec<'_>) -> Result<()> {
    let v = e.vector(0);
    e.ret_vector(vectoangles(v));
    Ok(())
}

// Conversions

/// `ftos` text: integers without a fraction, the rest with one decimal.
pub fn ftos(v: f32) -> String {
    if v == (v as i32) as f32 {
        format!("{}", v as i32)
    } else {
        format!("{v:5.1}")
    }
}

pub fn vtos(v: Vec3) -> String {
    format!("'{:5.1} {:5.1} {:5.1}'", v.x, v.y, v.z)
}

pub fn pf_ftos(e: &mut Exec<'_>) -> Result<()> {
    let s = ftos(e.float(0));
    e.ret_tstring(s.as_bytes());
    Ok(())
}

pub fn pf_vtos(e: &mut Exec<'_>) -> Result<()> {
    let s = vtos(e.vector(0));
    e.ret_tstring(s.as_bytes());
    Ok(())
}

pub fn pf_etos(e: &mut Exec<'_>) -> Result<()> {
    let s = format!("entity {}", e.edict(0));
    e.ret_tstring(s.as_bytes());
    Ok(())
}

pub fn pf_stof(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    e.ret_float(q_atof(&s));
    Ok(())
}

/// Parse `'x y z'`, quotes optional, missing components are zero.
pub fn parse_vector(s: &[u8]) -> Vec3 {
    let text = lossy(s);
    let mut it = text.split(|c: char| c.is_whitespace() || c == '\'')
                     .filter(|t| !t.is_empty())
                     .map(|t| q_atof(t.as_bytes()));
    Vec3::new(it.next().unwrap_or(0.0), it.next().unwrap_or(0.0), it.next().unwrap_or(0.0))
}

pub fn pf_stov(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    e.ret_vector(parse_vector(&s));
    Ok(())
}

pub fn pf_stoi(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    e.ret_int(q_atoi(&s));
    Ok(())
}

pub fn pf_itos(e: &mut Exec<'_>) -> Result<()> {
    let s = e.int(0).to_string();
    e.ret_tstring(s.as_bytes());
    Ok(())
}

pub fn pf_stoh(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    let v = s.iter()
             .skip_while(|c| c.is_ascii_whitespace())
             .map_while(|&c| (c as char).to_digit(16))
             .fold(0u32, |v, d| v.wrapping_shl(4) | d);
    e.ret_int(v as i32);
    Ok(())
}

pub fn pf_htos(e: &mut Exec<'_>) -> Result<()> {
    let s = format!("{:x}", e.int(0) as u32);
    e.ret_tstring(s.as_bytes());
    Ok(())
}

pub fn pf_ftoi(e: &mut Exec<'_>) -> Result<()> {
    let v = e.float(0) as i32;
    e.ret_int(v);
    Ok(())
}

pub fn pf_itof(e: &mut Exec<'_>) -> Result<()> {
    let v = e.int(0) as f32;
    e.ret_float(v);
    Ok(())
}

// Strings

pub fn pf_strlen(e: &mut Exec<'_>) -> Result<()> {
    let n = e.vm.strings.get(e.string_handle(0)).len();
    e.ret_float(n as f32);
    Ok(())
}

pub fn pf_strcat(e: &mut Exec<'_>) -> Result<()> {
    let s = e.strings_from(0);
    e.ret_tstring(&s);
    Ok(())
}

/// Byte range of `substring(s, start, length)`. A negative start counts from
/// the end, a negative length leaves that many bytes minus one at the end.
pub fn substring_range(len: usize, start: i32, length: i32) -> (usize, usize) {
    let len = len as i64;
    let mut start = start as i64;
    if start < 0 {
        start += len;
    }
    let start = start.clamp(0, len);
    let mut n = length as i64;
    if n < 0 {
        n += len - start + 1;
    }
    let end = (start + n.max(0)).min(len);
    (start as usize, end as usize)
}

// string(string s, float start, float length) substring
pub fn pf_substring(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    let (a, b) = substring_range(s.len(), e.float(1) as i32, e.float(2) as i32);
    e.ret_tstring(&s[a..b]);
    Ok(())
}

pub fn pf_strzone(e: &mut Exec<'_>) -> Result<()> {
    let parts: Vec<Vec<u8>> = (0..e.argc()).map(|i| e.string(i)).collect();
    let refs: Vec<&[u8]> = parts.iter().map(|p| p.as_slice()).collect();
    let h = e.vm.strings.zone(&refs);
    e.ret_string(h);
    Ok(())
}

pub fn pf_strunzone(e: &mut Exec<'_>) -> Result<()> {
    let h = e.string_handle(0);
    e.vm.strings.unzone(h);
    Ok(())
}

fn find(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from > hay.len() {
        return None;
    }
    if needle.is_empty() {
        return Some(from);
    }
    hay[from..].windows(needle.len()).position(|w| w == needle).map(|i| i + from)
}

// float(string str, string sub, float startpos) strstrofs
pub fn pf_strstrofs(e: &mut Exec<'_>) -> Result<()> {
    let (hay, needle) = (e.string(0), e.string(1));
    let from = if e.argc() > 2 { e.float(2).max(0.0) as usize } else { 0 };
    let at = find(&hay, &needle, from).map(|i| i as f32).unwrap_or(-1.0);
    e.ret_float(at);
    Ok(())
}

// float(string str, float index) str2chr
pub fn pf_str2chr(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    let i = e.float(1) as i64;
    let i = if i < 0 { i + s.len() as i64 } else { i };
    let c = usize::try_from(i).ok().and_then(|i| s.get(i)).copied().unwrap_or(0);
    e.ret_float(c as f32);
    Ok(())
}

pub fn pf_chr2str(e: &mut Exec<'_>) -> Result<()> {
    let s: Vec<u8> = (0..e.argc()).map(|i| e.float(i) as i32 as u8).collect();
    e.ret_tstring(&s);
    Ok(())
}

/// How `strconv` treats the high bit of one class of characters.
fn recolor(c: u8, mode: i32, nth: usize) -> u8 {
    match mode {
        1 => c | 0x80,
        2 => c & 0x7f,
        3 if nth % 2 == 0 => c | 0x80,
        3 => c & 0x7f,
        4 if nth % 2 == 0 => c & 0x7f,
        4 => c | 0x80,
        _ => c,
    }
}

/// `strconv`: `ccase` 1 lowers and 2 raises case; `redalpha` and `redchars`
/// set (1), clear (2) or alternate (3, 4) the high bit of letters and of the
/// other printable characters.
pub fn strconv(ccase: i32, redalpha: i32, redchars: i32, s: &[u8]) -> Vec<u8> {
    let (mut alpha, mut other) = (0, 0);
    s.iter().map(|&c| {
        let base = c & 0x7f;
        let high = c & 0x80;
        let base = match ccase {
            1 => base.to_ascii_lowercase(),
            2 => base.to_ascii_uppercase(),
            _ => base,
        };
        let c = base | high;
        if base.is_ascii_alphabetic() {
            alpha += 1;
            recolor(c, redalpha, alpha - 1)
        } else if base > b' ' && base < 0x7f {
            other += 1;
            recolor(c, redchars, other - 1)
        } else {
            c
        }
    }).collect()
}

pub fn pf_strconv(e: &mut Exec<'_>) -> Result<()> {
    let (ccase, ra, rc) = (e.float(0) as i32, e.float(1) as i32, e.float(2) as i32);
    let s = e.strings_from(3);
    e.ret_tstring(&strconv(ccase, ra, rc, &s));
    Ok(())
}

/// Pad to `|pad|` bytes: positive pads on the right, negative on the left.
pub fn strpad(pad: i32, s: &[u8]) -> Vec<u8> {
    let want = (pad.unsigned_abs() as usize).min(MAX_TEMP);
    if s.len() >= want {
        return s.to_vec();
    }
    let fill = vec![b' '; want - s.len()];
    if pad < 0 { [&fill[..], s].concat() } else { [s, &fill[..]].concat() }
}

// string(float pad, string str1, ...) strpad
pub fn pf_strpad(e: &mut Exec<'_>) -> Result<()> {
    let pad = e.float(0) as i32;
    let s = e.strings_from(1);
    e.ret_tstring(&strpad(pad, &s));
    Ok(())
}

fn info_pairs(info: &[u8]) -> Vec<(&[u8], &[u8])> {
    let info = info.strip_prefix(b"\\").unwrap_or(info);
    let parts: Vec<&[u8]> = info.split(|&c| c == b'\\').collect();
    parts.chunks(2).filter(|kv| !kv[0].is_empty())
                   .map(|kv| (kv[0], kv.get(1).copied().unwrap_or(&b""[..])))
                   .collect()
}

fn info_safe(op: &str, s: &[u8]) -> bool {
    if s.iter().any(|&c| c == b'\\' || c == b'"') {
        qc_warn!("{op}: illegal characters in \"{}\"", lossy(s));
        return false;
    }
    true
}

/// Set `key` in a `\key\value` info string, an empty value removes it.
pub fn info_set(info: &[u8], key: &[u8], value: &[u8]) -> Option<Vec<u8>> {
    if !info_safe("infoadd", key) || !info_safe("infoadd", value) {
        return None;
    }
    let mut out = Vec::new();
    let mut push = |k: &[u8], v: &[u8]| {
        for part in [&b"\\"[..], k, &b"\\"[..], v] {
            out.extend_from_slice(part);
        }
    };
    for (k, v) in info_pairs(info).into_iter().filter(|(k, _)| *k != key) {
        push(k, v);
    }
    if !value.is_empty() {
        push(key, value);
    }
    Some(out)
}

pub fn info_get<'a>(info: &'a [u8], key: &[u8]) -> Option<&'a [u8]> {
    info_pairs(info).into_iter().find(|(k, _)| *k == key).map(|(_, v)| v)
}

// string(string info, string key, string value, ...) infoadd
pub fn pf_infoadd(e: &mut Exec<'_>) -> Result<()> {
    let (info, key) = (e.string(0), e.string(1));
    let value = e.strings_from(2);
    match info_set(&info, &key, &value) {
        Some(s) => e.ret_tstring(&s),
        None => e.ret_tstring(&info),
    }
    Ok(())
}

pub fn pf_infoget(e: &mut Exec<'_>) -> Result<()> {
    let (info, key) = (e.string(0), e.string(1));
    if !info_safe("infoget", &key) {
        e.ret_null();
        return Ok(());
    }
    match info_get(&info, &key).map(|v| v.to_vec()) {
        Some(v) => e.ret_tstring(&v),
        None => e.ret_null(),
    }
    Ok(())
}

/// C `strncmp`, reduced to its sign.
fn compare(a: &[u8], b: &[u8], n: usize, fold: bool) -> f32 {
    let norm = |c: &u8| if fold { c.to_ascii_lowercase() } else { *c };
    let a = a.iter().take(n).map(norm);
    let b = b.iter().take(n).map(norm);
    match a.cmp(b) {
        std::cmp::Ordering::Less => -1.0,
        std::cmp::Ordering::Equal => 0.0,
        std::cmp::Ordering::Greater => 1.0,
    }
}

fn offset(s: &[u8], ofs: f32) -> &[u8] {
    &s[(ofs.max(0.0) as usize).min(s.len())..]
}

fn strncmp_args(e: &Exec<'_>) -> (Vec<u8>, Vec<u8>, usize) {
    let (a, b) = (e.string(0), e.string(1));
    let n = e.float(2).max(0.0) as usize;
    let a = if e.argc() > 3 { offset(&a, e.float(3)).to_vec() } else { a };
    let b = if e.argc() > 4 { offset(&b, e.float(4)).to_vec() } else { b };
    (a, b, n)
}

pub fn pf_strncmp(e: &mut Exec<'_>) -> Result<()> {
    let (a, b, n) = strncmp_args(e);
    e.ret_float(compare(&a, &b, n, false));
    Ok(())
}

pub fn pf_strcasecmp(e: &mut Exec<'_>) -> Result<()> {
    let (a, b) = (e.string(0), e.string(1));
    e.ret_float(compare(&a, &b, usize::MAX, true));
    Ok(())
}

pub fn pf_strncasecmp(e: &mut Exec<'_>) -> Result<()> {
    let (a, b, n) = strncmp_args(e);
    e.ret_float(compare(&a, &b, n, true));
    Ok(())
}

pub fn pf_strtolower(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0).to_ascii_lowercase();
    e.ret_tstring(&s);
    Ok(())
}

pub fn pf_strtoupper(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0).to_ascii_uppercase();
    e.ret_tstring(&s);
    Ok(())
}

/// Replace every occurrence of `search` in `subject`.
pub fn replace(search: &[u8], with: &[u8], subject: &[u8], fold: bool) -> Vec<u8> {
    if search.is_empty() {
        return subject.to_vec();
    }
    let hay = if fold { subject.to_ascii_lowercase() } else { subject.to_vec() };
    let needle = if fold { search.to_ascii_lowercase() } else { search.to_vec() };
    let mut out = Vec::with_capacity(subject.len());
    let mut i = 0;
    while let Some(at) = find(&hay, &needle, i) {
        out.extend_from_slice(&subject[i..at]);
        out.extend_from_slice(with);
        i = at + needle.len();
    }
    out.extend_from_slice(&subject[i..]);
    out
}

pub fn pf_strreplace(e: &mut Exec<'_>) -> Result<()> {
    let (s, r, subject) = (e.string(0), e.string(1), e.string(2));
    e.ret_tstring(&replace(&s, &r, &subject, false));
    Ok(())
}

pub fn pf_strireplace(e: &mut Exec<'_>) -> Result<()> {
    let (s, r, subject) = (e.string(0), e.string(1), e.string(2));
    e.ret_tstring(&replace(&s, &r, &subject, true));
    Ok(())
}

/// CRC-16/CCITT as Quake computes it: initial value `0xffff`, no final xor.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xffff_u16, |crc, &c| {
        (0..8).fold(crc ^ ((c as u16) << 8), |crc, _| {
            if crc & 0x8000 != 0 { (crc << 1) ^ 0x1021 } else { crc << 1 }
        })
    })
}

// float(float caseinsensitive, string s, ...) crc16
pub fn pf_crc16(e: &mut Exec<'_>) -> Result<()> {
    let fold = e.float(0) != 0.0;
    let s = e.strings_from(1);
    let s = if fold { s.to_ascii_lowercase() } else { s };
    e.ret_float(crc16(&s) as f32);
    Ok(())
}

fn uri_safe(c: u8) -> bool {
    c.is_ascii_alphanumeric() || b"!*().-_~".contains(&c)
}

pub fn uri_escape(s: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len());
    for &c in s {
        if uri_safe(c) {
            out.push(c);
        } else {
            out.extend_from_slice(format!("%{c:02X}").as_bytes());
        }
    }
    out
}

pub fn uri_unescape(s: &[u8]) -> Vec<u8> {
    let hex = |c: u8| (c as char).to_digit(16).map(|d| d as u8);
    let mut out = Vec::with_capacity(s.len());
    let mut i = 0;
    while i < s.len() {
        match (s[i], s.get(i + 1).copied().and_then(hex), s.get(i + 2).copied().and_then(hex)) {
            (b'%', Some(hi), Some(lo)) => {
                out.push(hi << 4 | lo);
                i += 3;
            }
            (c, _, _) => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

pub fn pf_uri_escape(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    e.ret_tstring(&uri_escape(&s));
    Ok(())
}

pub fn pf_uri_unescape(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    e.ret_tstring(&uri_unescape(&s));
    Ok(())
}

// string(float uselocaltime, string format, ...) strftime
pub fn pf_strftime(e: &mut Exec<'_>) -> Result<()> {
    let local = e.float(0) != 0.0;
    let fmt = e.strings_from(1);
    let fmt = lossy(&fmt);
    let mut out = String::new();
    let res = if local {
        write!(out, "{}", Local::now().format(&fmt))
    } else {
        write!(out, "{}", Utc::now().format(&fmt))
    };
    match res {
        Ok(()) => e.ret_tstring(out.as_bytes()),
        Err(_) => {
            qc_warn!("strftime: bad format \"{fmt}\"");
            e.ret_null();
        }
    }
    Ok(())
}

// Cvars

pub fn pf_cvar(e: &mut Exec<'_>) -> Result<()> {
    let name = e.string(0);
    let v = e.host.cvars.value(&lossy(&name));
    e.ret_float(v);
    Ok(())
}

pub fn pf_cvar_string(e: &mut Exec<'_>) -> Result<()> {
    let name = e.string(0);
    let s = e.host.cvars.string(&lossy(&name)).unwrap_or("").as_bytes().to_vec();
    e.ret_tstring(&s);
    Ok(())
}

pub fn pf_cvar_defstring(e: &mut Exec<'_>) -> Result<()> {
    let name = e.string(0);
    let s = e.host.cvars.default_string(&lossy(&name)).unwrap_or("").as_bytes().to_vec();
    e.ret_tstring(&s);
    Ok(())
}

pub fn pf_cvar_type(e: &mut Exec<'_>) -> Result<()> {
    let name = e.string(0);
    let bits = e.host.cvars.type_bits(&lossy(&name));
    e.ret_float(bits as f32);
    Ok(())
}

// void(string var, string val) cvar_set
pub fn pf_cvar_set(e: &mut Exec<'_>) -> Result<()> {
    let name = lossy(&e.string(0)).into_owned();
    let value = lossy(&e.string(1)).into_owned();
    if e.host.cvars.set(&name, &value) {
        e.vm.update_autocvar(&e.host.cvars, &name);
        if !e.host.dirty_autocvars.contains(&name) {
            e.host.dirty_autocvars.push(name);
        }
    }
    Ok(())
}

// Console

pub fn pf_print(e: &mut Exec<'_>) -> Result<()> {
    let s = e.strings_from(0);
    e.print(&s)
}

pub fn pf_dprint(e: &mut Exec<'_>) -> Result<()> {
    if e.host.cvars.value("developer") == 0.0 {
        return Ok(());
    }
    let s = e.strings_from(0);
    e.print(&s)
}

pub fn pf_localcmd(e: &mut Exec<'_>) -> Result<()> {
    let s = e.strings_from(0);
    debug!("localcmd: {}", lossy(&s).trim_end());
    e.host.cmdbuf.extend_from_slice(&s);
    Ok(())
}

// float(string name) checkcommand
pub fn pf_checkcommand(e: &mut Exec<'_>) -> Result<()> {
    let name = lossy(&e.string(0)).into_owned();
    let kind = if e.host.commands.contains(&name) {
        1.0
    } else if e.host.cvars.exists(&name) {
        2.0
    } else {
        0.0
    };
    e.ret_float(kind);
    Ok(())
}

pub fn pf_error(e: &mut Exec<'_>) -> Result<()> {
    let msg = lossy(&e.strings_from(0)).into_owned();
    log::error!("{} VM: error: {msg}", e.role());
    err!(ProgramError, msg)
}

pub fn pf_break(e: &mut Exec<'_>) -> Result<()> {
    qc_warn!("{} VM: break statement at {}", e.role(), e.vm.xstatement());
    Ok(())
}

pub fn pf_traceon(e: &mut Exec<'_>) -> Result<()> {
    e.vm.trace = true;
    Ok(())
}

pub fn pf_traceoff(e: &mut Exec<'_>) -> Result<()> {
    e.vm.trace = false;
    Ok(())
}

// Entities

pub fn pf_spawn(e: &mut Exec<'_>) -> Result<()> {
    let num = e.vm.edicts.alloc()?;
    e.ret_edict(num);
    Ok(())
}

pub fn pf_remove(e: &mut Exec<'_>) -> Result<()> {
    let num = e.edict(0);
    if !e.vm.edicts.free(num) {
        qc_warn!("remove: entity {num} is the world or already free");
    }
    Ok(())
}

pub fn pf_nextent(e: &mut Exec<'_>) -> Result<()> {
    let num = e.edict(0);
    let next = e.vm.edicts.next(num);
    e.ret_edict(next);
    Ok(())
}

/// `eprint` listing: one line per non-zero field.
pub fn describe_edict(e: &Exec<'_>, num: i32) -> Result<String> {
    let progs = &e.vm.progs;
    let vectors: Vec<usize> = progs.fielddefs.iter()
                                   .filter(|d| d.etype() == EType::Vector)
                                   .map(|d| d.ofs as usize)
                                   .collect();
    let mut out = format!("\nEDICT {num}:\n");
    for def in progs.fielddefs.iter() {
        let ofs = def.ofs as usize;
        let ty = def.etype();
        if ty == EType::Float && vectors.iter().any(|&v| (v..v + 3).contains(&ofs)) {
            continue;
        }
        let raw: Vec<i32> = (0..ty.size()).map(|i| e.vm.edicts.field(num, (ofs + i) as i32))
                                           .collect::<Result<_>>()?;
        if raw.iter().all(|&v| v == 0) {
            continue;
        }
        let value = match ty {
            EType::Float => ftoa(f32::from_bits(raw[0] as u32)),
            EType::Vector => vtos(Vec3::from_slice(&raw.iter().map(|&v| f32::from_bits(v as u32))
                                                           .collect::<Vec<_>>())),
            EType::String => lossy(e.vm.strings.get(raw[0])).into_owned(),
            EType::Entity => format!("entity {}", raw[0]),
            EType::Function => format!("{}()", e.vm.function_name(raw[0])),
            _ => format!("{}", raw[0]),
        };
        let _ = writeln!(out, "{:<15} {value}", progs.def_name(def));
    }
    Ok(out)
}

pub fn pf_eprint(e: &mut Exec<'_>) -> Result<()> {
    let num = e.edict(0);
    let text = describe_edict(e, num)?;
    e.print(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::guard::VmRole;
    use crate::host::testing::{Arg, Rig};
    use crate::logging::warning_count;
    use crate::progs::EType;
    use crate::qcasm::ProgsBuilder;

    fn rig() -> Rig {
        Rig::new(VmRole::Server)
    }

    #[test]
    fn number_formatting() {
        assert_eq!(ftos(3.0), "3");
        assert_eq!(ftos(-0.5), " -0.5");
        assert_eq!(ftos(2.3), "  2.3");
        assert_eq!(vtos(Vec3::new(1.0, -2.0, 0.5)), "'  1.0  -2.0   0.5'");
        let mut r = rig();
        r.args(&[Arg::F(42.0)]).call(pf_ftos).unwrap();
        assert_eq!(r.string(), "42");
        r.args(&[Arg::Ent(7)]).call(pf_etos).unwrap();
        assert_eq!(r.string(), "entity 7");
    }

    #[test]
    fn math() {
        let mut r = rig();
        r.args(&[Arg::F(2.5)]).call(pf_rint).unwrap();
        assert_eq!(r.float(), 3.0);
        r.args(&[Arg::F(-2.5)]).call(pf_rint).unwrap();
        assert_eq!(r.float(), -3.0);
        r.args(&[Arg::F(3.0), Arg::F(-1.0), Arg::F(7.0)]).call(pf_min).unwrap();
        assert_eq!(r.float(), -1.0);
        r.args(&[Arg::F(3.0), Arg::F(-1.0), Arg::F(7.0)]).call(pf_max).unwrap();
        assert_eq!(r.float(), 7.0);
        r.args(&[Arg::F(0.0), Arg::F(12.0), Arg::F(10.0)]).call(pf_bound).unwrap();
        assert_eq!(r.float(), 10.0);
        r.args(&[Arg::F(2.0), Arg::F(10.0)]).call(pf_pow).unwrap();
        assert_eq!(r.float(), 1024.0);
        r.args(&[Arg::V(Vec3::new(3.0, 4.0, 0.0))]).call(pf_vlen).unwrap();
        assert_eq!(r.float(), 5.0);
        r.args(&[Arg::V(Vec3::ZERO)]).call(pf_normalize).unwrap();
        assert_eq!(r.vector(), Vec3::ZERO);
        for _ in 0..100 {
            r.args(&[]).call(pf_random).unwrap();
            assert!((0.0..1.0).contains(&r.float()));
        }
    }

    #[test]
    fn angles() {
        assert_eq!(vectoangles(Vec3::new(0.0, 0.0, 5.0)), Vec3::new(90.0, 0.0, 0.0));
        assert_eq!(vectoangles(Vec3::new(0.0, -1.0, 0.0)), Vec3::new(0.0, 270.0, 0.0));
        assert_eq!(vectoangles(Vec3::new(1.0, 0.0, -1.0)), Vec3::new(315.0, 0.0, 0.0));
        assert_eq!(yaw(Vec3::new(-1.0, 0.0, 0.0)), 180.0);
    }

    #[test]
    fn conversions() {
        assert_eq!(parse_vector(b"'1 -2.5 3'"), Vec3::new(1.0, -2.5, 3.0));
        assert_eq!(parse_vector(b"7"), Vec3::new(7.0, 0.0, 0.0));
        let mut r = rig();
        r.args(&[Arg::s("ff")]).call(pf_stoh).unwrap();
        assert_eq!(r.int(), 255);
        r.args(&[Arg::I(255)]).call(pf_htos).unwrap();
        assert_eq!(r.string(), "ff");
        r.args(&[Arg::s("-12abc")]).call(pf_stoi).unwrap();
        assert_eq!(r.int(), -12);
        r.args(&[Arg::F(-7.9)]).call(pf_ftoi).unwrap();
        assert_eq!(r.int(), -7);
        r.args(&[Arg::I(3)]).call(pf_itof).unwrap();
        assert_eq!(r.float(), 3.0);
    }

    #[test]
    fn substrings() {
        assert_eq!(substring_range(5, 1, 3), (1, 4));
        assert_eq!(substring_range(5, 3, 10), (3, 5));
        assert_eq!(substring_range(5, -2, 2), (3, 5));
        assert_eq!(substring_range(5, 0, -1), (0, 5));
        assert_eq!(substring_range(5, 9, 1), (5, 5));
        let mut r = rig();
        r.args(&[Arg::s("hello world"), Arg::F(6.0), Arg::F(5.0)]).call(pf_substring).unwrap();
        assert_eq!(r.string(), "world");
        r.args(&[Arg::s("hello"), Arg::s("l"), Arg::F(3.0)]).call(pf_strstrofs).unwrap();
        assert_eq!(r.float(), 3.0);
        r.args(&[Arg::s("hello"), Arg::s("z"), Arg::F(0.0)]).call(pf_strstrofs).unwrap();
        assert_eq!(r.float(), -1.0);
        r.args(&[Arg::s("abc"), Arg::F(-1.0)]).call(pf_str2chr).unwrap();
        assert_eq!(r.float(), b'c' as f32);
        r.args(&[Arg::F(104.0), Arg::F(105.0)]).call(pf_chr2str).unwrap();
        assert_eq!(r.string(), "hi");
    }

    #[test]
    fn zone_and_unzone() {
        let mut r = rig();
        r.args(&[Arg::s("a"), Arg::s("b"), Arg::s("c")]).call(pf_strzone).unwrap();
        assert_eq!(r.string(), "abc");
        let h = r.int();
        assert_eq!(r.vm.strings.zoned_count(), 1);
        r.args(&[Arg::Str(h)]).call(pf_strunzone).unwrap();
        assert_eq!(r.vm.strings.zoned_count(), 0);
        let before = warning_count();
        r.args(&[Arg::Str(h)]).call(pf_strunzone).unwrap();
        assert_eq!(warning_count(), before + 1);
        r.args(&[Arg::Str(0)]).call(pf_strunzone).unwrap();
        assert_eq!(warning_count(), before + 1);
    }

    #[test]
    fn case_and_compare() {
        assert_eq!(compare(b"abc", b"abd", 2, false), 0.0);
        assert_eq!(compare(b"abc", b"abd", 3, false), -1.0);
        assert_eq!(compare(b"ABC", b"abc", 9, true), 0.0);
        assert_eq!(compare(b"b", b"a", 9, false), 1.0);
        let mut r = rig();
        r.args(&[Arg::s("xxhello"), Arg::s("hello"), Arg::F(5.0), Arg::F(2.0)])
         .call(pf_strncmp).unwrap();
        assert_eq!(r.float(), 0.0);
        r.args(&[Arg::s("MiXeD")]).call(pf_strtolower).unwrap();
        assert_eq!(r.string(), "mixed");
        r.args(&[Arg::s("MiXeD")]).call(pf_strtoupper).unwrap();
        assert_eq!(r.string(), "MIXED");
    }

    #[test]
    fn conversion_and_padding() {
        assert_eq!(strconv(2, 0, 0, b"abc1"), b"ABC1");
        assert_eq!(strconv(0, 1, 0, b"a1"), vec![b'a' | 0x80, b'1']);
        assert_eq!(strconv(0, 0, 1, b"a1"), vec![b'a', b'1' | 0x80]);
        assert_eq!(strconv(1, 2, 0, &[b'A' | 0x80]), b"a");
        assert_eq!(strconv(0, 3, 0, b"ab"), vec![b'a' | 0x80, b'b']);
        assert_eq!(strpad(5, b"ab"), b"ab   ");
        assert_eq!(strpad(-5, b"ab"), b"   ab");
        assert_eq!(strpad(1, b"abc"), b"abc");
    }

    #[test]
    fn info_strings() {
        let info = info_set(b"", b"name", b"ranger").unwrap();
        assert_eq!(info, b"\\name\\ranger");
        let info = info_set(&info, b"team", b"red").unwrap();
        let info = info_set(&info, b"name", b"fiend").unwrap();
        assert_eq!(info, b"\\team\\red\\name\\fiend");
        assert_eq!(info_get(&info, b"team"), Some(&b"red"[..]));
        assert_eq!(info_get(&info, b"skin"), None);
        assert_eq!(info_set(&info, b"team", b"").unwrap(), b"\\name\\fiend");
        let before = warning_count();
        assert_eq!(info_set(&info, b"bad\\key", b"x"), None);
        assert_eq!(info_set(&info, b"k", b"\"quoted\""), None);
        assert_eq!(warning_count(), before + 2);
    }

    #[test]
    fn replacing() {
        assert_eq!(replace(b"o", b"0", b"foo boo", false), b"f00 b00");
        assert_eq!(replace(b"FOO", b"x", b"foo Foo", true), b"x x");
        assert_eq!(replace(b"", b"x", b"abc", false), b"abc");
    }

    #[test]
    fn checksums_and_escapes() {
        assert_eq!(crc16(b"123456789"), 0x29b1);
        assert_eq!(uri_escape(b"a b/c"), b"a%20b%2Fc");
        assert_eq!(uri_unescape(b"a%20b%2fc%zz%"), b"a b/c%zz%");
        let mut r = rig();
        r.args(&[Arg::F(1.0), Arg::s("1234"), Arg::s("56789")]).call(pf_crc16).unwrap();
        assert_eq!(r.float(), 0x29b1 as f32);
    }

    #[test]
    fn strftime_formats() {
        let mut r = rig();
        r.args(&[Arg::F(0.0), Arg::s("%Y")]).call(pf_strftime).unwrap();
        assert_eq!(r.string().len(), 4);
    }

    #[test]
    fn cvars() {
        let mut r = rig();
        r.shared.cvars.register("sv_gravity", "800", 0, "");
        r.args(&[Arg::s("sv_gravity")]).call(pf_cvar).unwrap();
        assert_eq!(r.float(), 800.0);
        r.args(&[Arg::s("sv_gravity"), Arg::s("100")]).call(pf_cvar_set).unwrap();
        assert_eq!(r.shared.dirty_autocvars, vec!["sv_gravity".to_string()]);
        r.args(&[Arg::s("sv_gravity")]).call(pf_cvar_string).unwrap();
        assert_eq!(r.string(), "100");
        r.args(&[Arg::s("sv_gravity")]).call(pf_cvar_defstring).unwrap();
        assert_eq!(r.string(), "800");
        r.args(&[Arg::s("sv_gravity")]).call(pf_cvar_type).unwrap();
        assert_eq!(r.float(), 9.0);
        r.args(&[Arg::s("nope")]).call(pf_cvar_type).unwrap();
        assert_eq!(r.float(), 0.0);
    }

    #[test]
    fn console_output() {
        let mut r = rig();
        r.args(&[Arg::s("hello "), Arg::s("world\n")]).call(pf_print).unwrap();
        r.args(&[Arg::s("hidden\n")]).call(pf_dprint).unwrap();
        r.shared.cvars.set("developer", "1");
        r.args(&[Arg::s("shown\n")]).call(pf_dprint).unwrap();
        assert_eq!(r.output(), "hello world\nshown\n");
        r.args(&[Arg::s("map e1m1\n")]).call(pf_localcmd).unwrap();
        assert_eq!(r.shared.cmdbuf, b"map e1m1\n");
        r.shared.commands.insert("map".into());
        r.args(&[Arg::s("map")]).call(pf_checkcommand).unwrap();
        assert_eq!(r.float(), 1.0);
        r.args(&[Arg::s("developer")]).call(pf_checkcommand).unwrap();
        assert_eq!(r.float(), 2.0);
    }

    #[test]
    fn error_is_fatal() {
        let mut r = rig();
        let err = r.args(&[Arg::s("bad "), Arg::s("thing")]).call(pf_error).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ProgramError { msg: "bad thing".into() });
        assert!(err.is_fatal());
    }

    #[test]
    fn entities() {
        let mut b = ProgsBuilder::new();
        b.field("health", EType::Float);
        b.field("origin", EType::Vector);
        let mut r = Rig::with_progs(VmRole::Server, b.build().unwrap());
        r.args(&[]).call(pf_spawn).unwrap();
        let a = r.int();
        r.args(&[]).call(pf_spawn).unwrap();
        let c = r.int();
        assert_eq!((a, c), (1, 2));
        r.args(&[Arg::Ent(0)]).call(pf_nextent).unwrap();
        assert_eq!(r.int(), 1);
        r.args(&[Arg::Ent(a)]).call(pf_remove).unwrap();
        r.args(&[Arg::Ent(0)]).call(pf_nextent).unwrap();
        assert_eq!(r.int(), 2);
        let before = warning_count();
        r.args(&[Arg::Ent(0)]).call(pf_remove).unwrap();
        assert_eq!(warning_count(), before + 1);

        let health = r.vm.progs.find_field("health").unwrap().ofs as i32;
        r.vm.edicts.set_field(c, health, 50f32.to_bits() as i32).unwrap();
        r.args(&[Arg::Ent(c)]).call(pf_eprint).unwrap();
        let out = r.output();
        assert!(out.contains("EDICT 2:"));
        assert!(out.contains("health"));
        assert!(out.contains("50"));
        assert!(!out.contains("origin"));
    }
}
