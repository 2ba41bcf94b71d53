//! Per-VM tokenizer state behind `tokenize`, `tokenize_console`,
//! `tokenizebyseparator` and `argv`.
//!
//! Every token remembers its byte range in the source string, quotes
//! included, for `argv_start_index` and `argv_end_index`.

use crate::error::Result;
use crate::vm::Exec;

pub const MAX_TOKENS: usize = 256;
const MAX_SEPARATORS: usize = 7;
const SPECIAL: &[u8] = b"{})(':";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: Vec<u8>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Tokens {
    toks: Vec<Token>,
}

/// Next token at or after `p`, `special` splits off the Quake punctuation
/// characters as tokens of their own.
fn next_token(s: &[u8], mut p: usize, special: bool) -> Option<Token> {
    loop {
        while p < s.len() && s[p] <= b' ' {
            p += 1;
        }
        if p >= s.len() {
            return None;
        }
        if s[p..].starts_with(b"//") {
            while p < s.len() && s[p] != b'\n' {
                p += 1;
            }
            continue;
        }
        break;
    }
    let start = p;
    if s[p] == b'"' {
        p += 1;
        let from = p;
        while p < s.len() && s[p] != b'"' {
            p += 1;
        }
        let text = s[from..p].to_vec();
        let end = (p + 1).min(s.len());
        return Some(Token { text, start, end });
    }
    if special && SPECIAL.contains(&s[p]) {
        return Some(Token { text: vec![s[p]], start, end: p + 1 });
    }
    while p < s.len() && s[p] > b' ' && !(special && SPECIAL.contains(&s[p])) {
        p += 1;
    }
    Some(Token { text: s[start..p].to_vec(), start, end: p })
}

impl Tokens {
    pub fn len(&self) -> usize {
        self.toks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.toks.is_empty()
    }

    pub fn clear(&mut self) {
        self.toks.clear();
    }

    fn push(&mut self, tok: Token) -> bool {
        if self.toks.len() >= MAX_TOKENS {
            qc_warn!("tokenize: more than {MAX_TOKENS} tokens, ignoring the rest");
            return false;
        }
        self.toks.push(tok);
        true
    }

    fn lex(&mut self, s: &[u8], special: bool) -> usize {
        self.toks.clear();
        let mut p = 0;
        while let Some(tok) = next_token(s, p, special) {
            p = tok.end;
            if !self.push(tok) {
                break;
            }
        }
        self.toks.len()
    }

    /// QuakeC-style tokenization, punctuation becomes separate tokens.
    pub fn tokenize(&mut self, s: &[u8]) -> usize {
        self.lex(s, true)
    }

    /// Console-style tokenization, only whitespace and quotes delimit.
    pub fn tokenize_console(&mut self, s: &[u8]) -> usize {
        self.lex(s, false)
    }

    /// Split on any of `seps`, keeping empty fields. Separators are tried
    /// in the order given at every position.
    pub fn tokenize_by_separator(&mut self, s: &[u8], seps: &[Vec<u8>]) -> usize {
        self.toks.clear();
        let seps: Vec<&[u8]> = seps.iter()
                                   .map(|v| v.as_slice())
                                   .filter(|v| !v.is_empty())
                                   .take(MAX_SEPARATORS)
                                   .collect();
        let mut p = 0;
        loop {
            let start = p;
            let mut hit = None;
            'scan: while p < s.len() {
                for sep in seps.iter() {
                    if s[p..].starts_with(sep) {
                        hit = Some(sep.len());
                        break 'scan;
                    }
                }
                p += 1;
            }
            if !self.push(Token { text: s[start..p].to_vec(), start, end: p }) {
                break;
            }
            match hit {
                Some(n) => p += n,
                None => break,
            }
        }
        self.toks.len()
    }

    /// Token `n`, negative numbers count from the end.
    pub fn get(&self, n: i32) -> Option<&Token> {
        let n = if n < 0 { n + self.toks.len() as i32 } else { n };
        usize::try_from(n).ok().and_then(|i| self.toks.get(i))
    }

    pub fn argv(&self, n: i32) -> Option<&[u8]> {
        self.get(n).map(|t| t.text.as_slice())
    }

    pub fn start_index(&self, n: i32) -> i32 {
        self.get(n).map(|t| t.start as i32).unwrap_or(-1)
    }

    pub fn end_index(&self, n: i32) -> i32 {
        self.get(n).map(|t| t.end as i32).unwrap_or(-1)
    }
}

// float(string s) tokenize
pub fn pf_tokenize(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    let n = e.vm.tokens.tokenize(&s);
    e.ret_float(n as f32);
    Ok(())
}

pub fn pf_tokenize_console(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    let n = e.vm.tokens.tokenize_console(&s);
    e.ret_float(n as f32);
    Ok(())
}

// float(string s, string sep1, ...) tokenizebyseparator
pub fn pf_tokenizebyseparator(e: &mut Exec<'_>) -> Result<()> {
    let s = e.string(0);
    let seps: Vec<Vec<u8>> = (1..e.argc()).map(|i| e.string(i)).collect();
    let n = e.vm.tokens.tokenize_by_separator(&s, &seps);
    e.ret_float(n as f32);
    Ok(())
}

pub fn pf_argv(e: &mut Exec<'_>) -> Result<()> {
    let n = e.float(0) as i32;
    match e.vm.tokens.argv(n).map(|s| s.to_vec()) {
        Some(s) => e.ret_tstring(&s),
        None => e.ret_null(),
    }
    Ok(())
}

pub fn pf_argv_start_index(e: &mut Exec<'_>) -> Result<()> {
    let n = e.float(0) as i32;
    let i = e.vm.tokens.start_index(n);
    e.ret_float(i as f32);
    Ok(())
}

pub fn pf_argv_end_index(e: &mut Exec<'_>) -> Result<()> {
    let n = e.float(0) as i32;
    let i = e.vm.tokens.end_index(n);
    e.ret_float(i as f32);
    Ok(())
}
