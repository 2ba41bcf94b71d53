//! QuakeC declarations for compilers targeting this VM.
//!
//! One `returntype name(args) = #N;` line per builtin, split into fully
//! implemented builtins and stubs, followed by engine constants.

use crate::ext;
use crate::registry::{Builtin, REGISTRY};
use std::io::{self, Write};

const STATS: &[(&str, i32)] = &[
    ("STAT_HEALTH", 0),
    ("STAT_FRAGS", 1),
    ("STAT_WEAPON", 2),
    ("STAT_AMMO", 3),
    ("STAT_ARMOR", 4),
    ("STAT_WEAPONFRAME", 5),
    ("STAT_SHELLS", 6),
    ("STAT_NAILS", 7),
    ("STAT_ROCKETS", 8),
    ("STAT_CELLS", 9),
    ("STAT_ACTIVEWEAPON", 10),
    ("STAT_TOTALSECRETS", 11),
    ("STAT_TOTALMONSTERS", 12),
    ("STAT_SECRETS", 13),
    ("STAT_MONSTERS", 14),
    ("STAT_ITEMS", 15),
    ("STAT_VIEWHEIGHT", 16),
];

const ENTITY_FLAGS: &[(&str, i32)] = &[
    ("FL_FLY", 1),
    ("FL_SWIM", 2),
    ("FL_CLIENT", 8),
    ("FL_INWATER", 16),
    ("FL_MONSTER", 32),
    ("FL_GODMODE", 64),
    ("FL_NOTARGET", 128),
    ("FL_ITEM", 256),
    ("FL_ONGROUND", 512),
    ("FL_PARTIALGROUND", 1024),
    ("FL_WATERJUMP", 2048),
    ("FL_JUMPRELEASED", 4096),
];

const KEYS: &[(&str, i32)] = &[
    ("K_TAB", 9),
    ("K_ENTER", 13),
    ("K_ESCAPE", 27),
    ("K_SPACE", 32),
    ("K_BACKSPACE", 127),
    ("K_UPARROW", 128),
    ("K_DOWNARROW", 129),
    ("K_LEFTARROW", 130),
    ("K_RIGHTARROW", 131),
    ("K_ALT", 132),
    ("K_CTRL", 133),
    ("K_SHIFT", 134),
    ("K_F1", 135),
    ("K_F2", 136),
    ("K_F3", 137),
    ("K_F4", 138),
    ("K_F5", 139),
    ("K_F6", 140),
    ("K_F7", 141),
    ("K_F8", 142),
    ("K_F9", 143),
    ("K_F10", 144),
    ("K_F11", 145),
    ("K_F12", 146),
    ("K_INS", 147),
    ("K_DEL", 148),
    ("K_PGDN", 149),
    ("K_PGUP", 150),
    ("K_HOME", 151),
    ("K_END", 152),
    ("K_MOUSE1", 200),
    ("K_MOUSE2", 201),
    ("K_MOUSE3", 202),
    ("K_PAUSE", 255),
];

fn roles(b: &Builtin) -> &'static str {
    match (b.server.is_some(), b.client.is_some()) {
        (true, true) => "",
        (true, false) => " (server only)",
        (false, true) => " (client only)",
        (false, false) => " (not implemented)",
    }
}

fn declaration(out: &mut impl Write, b: &Builtin) -> io::Result<()> {
    let (ret, args) = b.split_signature();
    if !b.desc.is_empty() || !roles(b).is_empty() {
        writeln!(out, "// {}{}", b.desc, roles(b))?;
    }
    writeln!(out, "{ret} {}{args} = #{};", b.name, b.number)
}

fn constants(out: &mut impl Write, title: &str, list: &[(&str, i32)]) -> io::Result<()> {
    writeln!(out, "\n// {title}")?;
    for (name, v) in list {
        writeln!(out, "const float {name} = {v};")?;
    }
    Ok(())
}

/// Builtins in number order, stubs and unimplemented ones last.
pub fn sections() -> (Vec<&'static Builtin>, Vec<&'static Builtin>) {
    let mut all: Vec<&Builtin> = REGISTRY.all().iter().collect();
    all.sort_by_key(|b| b.number);
    all.into_iter().partition(|b| b.is_implemented() && !b.stub)
}

pub fn dump_platform(out: &mut impl Write) -> io::Result<()> {
    let (implemented, stubs) = sections();
    writeln!(out, "// Generated by qcdump, do not edit.")?;
    writeln!(out, "// Numbers without documentation may change between builds, \
                   bind those with `= #0;` and builtinsupported.")?;
    writeln!(out, "\n// Extensions:")?;
    for name in ext::EXTENSIONS {
        writeln!(out, "//   {name}")?;
    }
    writeln!(out, "\n// Implemented builtins")?;
    for b in implemented {
        declaration(out, b)?;
    }
    writeln!(out, "\n// Stubs")?;
    for b in stubs {
        declaration(out, b)?;
    }
    constants(out, "Stats", STATS)?;
    constants(out, "Entity flags", ENTITY_FLAGS)?;
    constants(out, "Key codes", KEYS)?;
    Ok(())
}

/// One row per builtin: number, name, roles.
#[cfg(feature = "extra")]
pub fn summary_table() -> comfy_table::Table {
    let mut table = comfy_table::Table::new();
    table.load_preset(comfy_table::presets::UTF8_BORDERS_ONLY);
    table.set_header(vec!["#", "Name", "Server", "Client", "Stub"]);
    let (implemented, stubs) = sections();
    let mark = |b: bool| if b { "x" } else { "" };
    for b in implemented.into_iter().chain(stubs) {
        table.add_row(vec![b.number.to_string(),
                           b.name.to_string(),
                           mark(b.server.is_some()).to_string(),
                           mark(b.client.is_some()).to_string(),
                           mark(b.stub).to_string()]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dump() -> String {
        let mut out = Vec::new();
        dump_platform(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn declarations() {
        let text = dump();
        assert!(text.contains("\nfloat strlen(string s) = #114;\n"));
        assert!(text.contains("\nstring sprintf(string fmt, ...) = #627;\n"));
        assert!(text.contains("= #1023;"));
        let stubs = text.find("// Stubs").unwrap();
        let setmodel = text.find(" setmodel(").unwrap();
        let strlen = text.find(" strlen(").unwrap();
        assert!(strlen < stubs && stubs < setmodel);
        assert!(text.contains("const float FL_ONGROUND = 512;"));
        assert!(text.contains("const float K_ESCAPE = 27;"));
        assert!(text.contains("const float STAT_HEALTH = 0;"));
    }

    #[test]
    fn every_builtin_once() {
        let (a, b) = sections();
        assert_eq!(a.len() + b.len(), REGISTRY.all().len());
        assert!(a.windows(2).all(|w| w[0].number < w[1].number));
    }

    #[cfg(feature = "extra")]
    #[test]
    fn summary_lists_builtins() {
        let table = summary_table();
        let text = table.to_string();
        assert!(text.contains("strlen"));
        assert!(text.contains("checkbuiltin"));
    }
}
