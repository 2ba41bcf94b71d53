//! Miscellaneous Utilities

use std::borrow::Cow;

#[macro_export]
macro_rules! count_args {
    () => { 0 };
    ( $arg:ident ) => { 1 };
    ( $arg:ident, $($tail:ident),* ) => {
        1 + count_args!($($tail),*)
    }
}

/// Lossy view of a QuakeC string for logs and host-facing output.
pub fn lossy(s: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(s)
}

/// Truncate at the first NUL, the way C strings end.
pub fn until_nul(s: &[u8]) -> &[u8] {
    match s.iter().position(|&c| c == 0) {
        Some(n) => &s[..n],
        None => s,
    }
}

/// Quake's `atof`: optional sign, `0x` hex integers, otherwise a decimal with
/// an optional fraction. Trailing garbage is ignored, no exponents.
pub fn q_atof(s: &[u8]) -> f32 {
    let mut it = s.iter().copied().skip_while(|c| c.is_ascii_whitespace()).peekable();
    let sign = if it.peek() == Some(&b'-') {
        it.next();
        -1.0
    } else {
        1.0
    };
    let rest: Vec<u8> = it.collect();
    if rest.len() > 1 && rest[0] == b'0' && (rest[1] == b'x' || rest[1] == b'X') {
        let mut val: f64 = 0.0;
        for &c in &rest[2..] {
            let d = match c {
                b'0'..=b'9' => c - b'0',
                b'a'..=b'f' => c - b'a' + 10,
                b'A'..=b'F' => c - b'A' + 10,
                _ => break,
            };
            val = val * 16.0 + d as f64;
        }
        return (val * sign) as f32;
    }
    let mut val: f64 = 0.0;
    let mut decimal: Option<i32> = None;
    let mut total = 0;
    for &c in &rest {
        match c {
            b'.' if decimal.is_none() => decimal = Some(total),
            b'0'..=b'9' => {
                val = val * 10.0 + (c - b'0') as f64;
                total += 1;
            }
            _ => break,
        }
    }
    if let Some(d) = decimal {
        val /= 10f64.powi(total - d);
    }
    (val * sign) as f32
}

/// C `atoi` with wrapping overflow.
pub fn q_atoi(s: &[u8]) -> i32 {
    let mut it = s.iter().copied().skip_while(|c| c.is_ascii_whitespace()).peekable();
    let neg = match it.peek() {
        Some(b'-') => { it.next(); true }
        Some(b'+') => { it.next(); false }
        _ => false,
    };
    let mut val: i32 = 0;
    for c in it.take_while(|c| c.is_ascii_digit()) {
        val = val.wrapping_mul(10).wrapping_add((c - b'0') as i32);
    }
    if neg { val.wrapping_neg() } else { val }
}

/// Quake's float-to-string: integral values print without a fraction.
pub fn ftoa(v: f32) -> String {
    if v == (v as i32) as f32 {
        format!("{}", v as i32)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atof() {
        assert_eq!(q_atof(b"12.5"), 12.5);
        assert_eq!(q_atof(b"  -3"), -3.0);
        assert_eq!(q_atof(b"0x1f"), 31.0);
        assert_eq!(q_atof(b"7abc"), 7.0);
        assert_eq!(q_atof(b""), 0.0);
        assert_eq!(q_atof(b".25"), 0.25);
    }

    #[test]
    fn atoi() {
        assert_eq!(q_atoi(b"42"), 42);
        assert_eq!(q_atoi(b" -17x"), -17);
        assert_eq!(q_atoi(b"+3"), 3);
        assert_eq!(q_atoi(b"nope"), 0);
    }

    #[test]
    fn float_to_string() {
        assert_eq!(ftoa(5.0), "5");
        assert_eq!(ftoa(-2.0), "-2");
        assert_eq!(ftoa(1.5), "1.5");
    }

    #[test]
    fn nul_terminated() {
        assert_eq!(until_nul(b"ab\0cd"), b"ab");
        assert_eq!(until_nul(b"abc"), b"abc");
    }
}
