//! Configuration variables.

use crate::utils::{ftoa, q_atof};
use fnv::FnvHashMap;

pub const CVAR_ARCHIVE: u32 = 1 << 0;
pub const CVAR_NOTIFY: u32 = 1 << 1;
pub const CVAR_SERVERINFO: u32 = 1 << 2;
pub const CVAR_USERINFO: u32 = 1 << 3;
pub const CVAR_ROM: u32 = 1 << 5;
pub const CVAR_LOCKED: u32 = 1 << 6;
pub const CVAR_REGISTERED: u32 = 1 << 7;
pub const CVAR_USERDEFINED: u32 = 1 << 15;
pub const CVAR_AUTOCVAR: u32 = 1 << 16;

// `cvar_type` result bits
pub const CVAR_TYPEFLAG_EXISTS: i32 = 1 << 0;
pub const CVAR_TYPEFLAG_SAVED: i32 = 1 << 1;
pub const CVAR_TYPEFLAG_PRIVATE: i32 = 1 << 2;
pub const CVAR_TYPEFLAG_ENGINE: i32 = 1 << 3;
pub const CVAR_TYPEFLAG_HASDESCRIPTION: i32 = 1 << 4;
pub const CVAR_TYPEFLAG_READONLY: i32 = 1 << 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Cvar {
    pub name: String,
    pub string: String,
    pub value: f32,
    pub default: String,
    pub flags: u32,
    pub description: &'static str,
}

impl Cvar {
    fn new(name: &str, default: &str, flags: u32, description: &'static str) -> Cvar {
        Cvar {
            name: name.to_string(),
            string: default.to_string(),
            value: q_atof(default.as_bytes()),
            default: default.to_string(),
            flags,
            description,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cvars {
    vars: FnvHashMap<String, Cvar>,
}

impl Default for Cvars {
    fn default() -> Self {
        Cvars::new()
    }
}

impl Cvars {
    /// The variables this VM consults itself.
    pub fn new() -> Cvars {
        let mut cv = Cvars { vars: FnvHashMap::default() };
        cv.register("pr_checkextension", "1", CVAR_REGISTERED,
                    "0 disables server extensions, 2 warns about every lazily bound builtin");
        cv.register("developer", "0", CVAR_REGISTERED, "print dprint output");
        cv.register("pr_runaway", &format!("{}", crate::vm::RUNAWAY_LIMIT), CVAR_REGISTERED,
                    "statements a single call may execute");
        cv
    }

    pub fn register(&mut self, name: &str, default: &str, flags: u32, description: &'static str) {
        self.vars.entry(name.to_string())
                 .or_insert_with(|| Cvar::new(name, default, flags, description));
    }

    pub fn get(&self, name: &str) -> Option<&Cvar> {
        self.vars.get(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Numeric value, `0` for unknown variables.
    pub fn value(&self, name: &str) -> f32 {
        self.vars.get(name).map(|v| v.value).unwrap_or(0.0)
    }

    pub fn string(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.string.as_str())
    }

    pub fn default_string(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|v| v.default.as_str())
    }

    /// Returns whether the variable exists and its value changed.
    pub fn set(&mut self, name: &str, value: &str) -> bool {
        let Some(var) = self.vars.get_mut(name) else {
            qc_warn!("Cvar_Set: variable {name} not found");
            return false;
        };
        if var.flags & CVAR_ROM != 0 {
            qc_warn!("{name} is read-only");
            return false;
        }
        if var.string == value {
            return false;
        }
        var.string = value.to_string();
        var.value = q_atof(value.as_bytes());
        true
    }

    pub fn set_value(&mut self, name: &str, value: f32) -> bool {
        self.set(name, &ftoa(value))
    }

    /// Create the variable if needed, flagged as an autocvar. An existing
    /// variable keeps its value.
    pub fn register_auto(&mut self, name: &str, default: &str) -> &Cvar {
        let var = self.vars.entry(name.to_string()).or_insert_with(|| {
            debug!("autocvar {name} created with default \"{default}\"");
            Cvar::new(name, default, CVAR_USERDEFINED, "")
        });
        var.flags |= CVAR_AUTOCVAR;
        var
    }

    pub fn flags(&self, name: &str) -> u32 {
        self.vars.get(name).map(|v| v.flags).unwrap_or(0)
    }

    /// DarkPlaces `cvar_type` bits.
    pub fn type_bits(&self, name: &str) -> i32 {
        let Some(var) = self.vars.get(name) else {
            return 0;
        };
        let mut bits = CVAR_TYPEFLAG_EXISTS;
        if var.flags & CVAR_ARCHIVE != 0 {
            bits |= CVAR_TYPEFLAG_SAVED;
        }
        if var.flags & CVAR_USERDEFINED == 0 {
            bits |= CVAR_TYPEFLAG_ENGINE;
        }
        if !var.description.is_empty() {
            bits |= CVAR_TYPEFLAG_HASDESCRIPTION;
        }
        if var.flags & CVAR_ROM != 0 {
            bits |= CVAR_TYPEFLAG_READONLY;
        }
        bits
    }

    /// Sorted variable names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.vars.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }
}
