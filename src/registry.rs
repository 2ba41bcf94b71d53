//! Builtin descriptors and per-VM dispatch tables.
//!
//! Every builtin has a name and optionally a documented number. Documented
//! numbers are stable and shared with other engines. Builtins without one get
//! an automatic number counting down from the top of the table; those are
//! only reachable through name-bound stubs and may change between builds.

use crate::error::Result;
use crate::guard::VmRole;
use crate::vm::{Exec, QcVm, MAX_BUILTINS};
use crate::{ext, files, markup, search, sprintf, strbuf, subrs, tokenize};
use fnv::FnvHashMap;
use std::fmt;

/// Slots below this are the classic Quake set, bound eagerly at load.
pub const BASE_BUILTINS: usize = 79;

pub type BuiltinFn = fn(&mut Exec<'_>) -> Result<()>;

#[derive(Clone, Copy)]
pub enum Slot {
    Unresolved,
    Resolved(BuiltinFn),
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Unresolved => write!(f, "Unresolved"),
            Slot::Resolved(p) => write!(f, "Resolved({:p})", *p as *const ()),
        }
    }
}

#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub server: Option<BuiltinFn>,
    pub client: Option<BuiltinFn>,
    /// `0` when the number is assigned automatically.
    pub documented: u16,
    /// Resolved number, documented or automatic.
    pub number: usize,
    /// QuakeC type, `"string(float f)"`.
    pub signature: &'static str,
    pub desc: &'static str,
    /// Implemented, but only partially.
    pub stub: bool,
}

impl fmt::Debug for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builtin")
         .field("name", &self.name)
         .field("number", &self.number)
         .field("server", &self.server.is_some())
         .field("client", &self.client.is_some())
         .field("stub", &self.stub)
         .finish()
    }
}

impl Builtin {
    pub fn implementation(&self, role: VmRole) -> Option<BuiltinFn> {
        match role {
            VmRole::Server => self.server,
            VmRole::Client => self.client,
        }
    }

    pub fn is_implemented(&self) -> bool {
        self.server.is_some() || self.client.is_some()
    }

    pub fn is_extension(&self) -> bool {
        self.number >= BASE_BUILTINS
    }

    /// `(return type, argument list)` of the signature.
    pub fn split_signature(&self) -> (&'static str, &'static str) {
        match self.signature.find('(') {
            Some(i) => (&self.signature[..i], &self.signature[i..]),
            None => (self.signature, "()"),
        }
    }
}

type Impls = (Option<BuiltinFn>, Option<BuiltinFn>);

fn both(f: BuiltinFn) -> Impls {
    (Some(f), Some(f))
}

fn server(f: BuiltinFn) -> Impls {
    (Some(f), None)
}

fn client(f: BuiltinFn) -> Impls {
    (None, Some(f))
}

fn none() -> Impls {
    (None, None)
}

macro_rules! builtins {
    ($(($name:literal, $impls:expr, $num:literal, $sig:literal, $desc:literal $(, $flag:ident)?)),* $(,)?) => {
        fn descriptors() -> Vec<Builtin> {
            vec![$({
                let (server, client) = $impls;
                Builtin {
                    name: $name,
                    server,
                    client,
                    documented: $num,
                    number: 0,
                    signature: $sig,
                    desc: $desc,
                    stub: builtins!(@flag $($flag)?),
                }
            }),*]
        }
    };
    (@flag) => { false };
    (@flag stub) => { true };
}

builtins! {
    ("setmodel", none(), 3, "void(entity e, string m)", "Set the model of an entity."),
    ("setsize", none(), 4, "void(entity e, vector min, vector max)", "Set the bounding box of an entity."),
    ("break", both(subrs::pf_break), 6, "void()", "Debugger trap, only reported.", stub),
    ("random", both(subrs::pf_random), 7, "float()", "Random number in [0, 1)."),
    ("sound", none(), 8, "void(entity e, float chan, string samp, float vol, float atten)", "Start a sound."),
    ("normalize", both(subrs::pf_normalize), 9, "vector(vector v)", ""),
    ("error", both(subrs::pf_error), 10, "void(string e, ...)", "Abort the program with a message."),
    ("vlen", both(subrs::pf_vlen), 12, "float(vector v)", ""),
    ("vectoyaw", both(subrs::pf_vectoyaw), 13, "float(vector v)", ""),
    ("spawn", both(subrs::pf_spawn), 14, "entity()", "Allocate a cleared entity."),
    ("remove", both(subrs::pf_remove), 15, "void(entity e)", "Free an entity."),
    ("traceline", none(), 16, "void(vector v1, vector v2, float nomonsters, entity forent)", "Trace a line through the world."),
    ("precache_sound", none(), 19, "string(string s)", ""),
    ("precache_model", none(), 20, "string(string s)", ""),
    ("dprint", both(subrs::pf_dprint), 25, "void(string s, ...)", "Print when developer is set."),
    ("ftos", both(subrs::pf_ftos), 26, "string(float f)", ""),
    ("vtos", both(subrs::pf_vtos), 27, "string(vector v)", ""),
    ("traceon", both(subrs::pf_traceon), 29, "void()", "Log every executed statement."),
    ("traceoff", both(subrs::pf_traceoff), 30, "void()", ""),
    ("eprint", both(subrs::pf_eprint), 31, "void(entity e)", "Print the fields of an entity."),
    ("rint", both(subrs::pf_rint), 36, "float(float v)", "Round to the nearest integer."),
    ("floor", both(subrs::pf_floor), 37, "float(float v)", ""),
    ("ceil", both(subrs::pf_ceil), 38, "float(float v)", ""),
    ("fabs", both(subrs::pf_fabs), 43, "float(float f)", ""),
    ("cvar", both(subrs::pf_cvar), 45, "float(string s)", "Numeric value of a cvar."),
    ("localcmd", server(subrs::pf_localcmd), 46, "void(string s, ...)", "Queue console text for the host.", stub),
    ("nextent", both(subrs::pf_nextent), 47, "entity(entity e)", "Next live entity, world when done."),
    ("particle", none(), 48, "void(vector o, vector d, float color, float count)", ""),
    ("vectoangles", both(subrs::pf_vectoangles), 51, "vector(vector v)", ""),
    ("cvar_set", both(subrs::pf_cvar_set), 72, "void(string var, string val)", ""),

    ("sin", both(subrs::pf_sin), 60, "float(float a)", ""),
    ("cos", both(subrs::pf_cos), 61, "float(float a)", ""),
    ("sqrt", both(subrs::pf_sqrt), 62, "float(float a)", ""),
    ("etos", both(subrs::pf_etos), 65, "string(entity ent)", ""),
    ("stof", both(subrs::pf_stof), 81, "float(string s)", ""),
    ("min", both(subrs::pf_min), 94, "float(float a, float b, ...)", ""),
    ("max", both(subrs::pf_max), 95, "float(float a, float b, ...)", ""),
    ("bound", both(subrs::pf_bound), 96, "float(float minimum, float val, float maximum)", ""),
    ("pow", both(subrs::pf_pow), 97, "float(float a, float n)", ""),
    ("checkextension", both(ext::pf_checkextension), 99, "float(string s)", "Whether an extension is supported."),
    ("fopen", both(files::pf_fopen), 110, "float(string filename, float mode)", "Open a file in the data directory."),
    ("fclose", both(files::pf_fclose), 111, "void(float fhandle)", ""),
    ("fgets", both(files::pf_fgets), 112, "string(float fhandle)", "Next line, null at end of file."),
    ("fputs", both(files::pf_fputs), 113, "void(float fhandle, string s, ...)", ""),
    ("strlen", both(subrs::pf_strlen), 114, "float(string s)", ""),
    ("strcat", both(subrs::pf_strcat), 115, "string(string s1, ...)", ""),
    ("substring", both(subrs::pf_substring), 116, "string(string s, float start, float length)", ""),
    ("stov", both(subrs::pf_stov), 117, "vector(string s)", ""),
    ("strzone", both(subrs::pf_strzone), 118, "string(string s, ...)", "Copy into a persistent string."),
    ("strunzone", both(subrs::pf_strunzone), 119, "void(string s)", ""),
    ("strstrofs", both(subrs::pf_strstrofs), 221, "float(string str, string sub, float startpos)", ""),
    ("str2chr", both(subrs::pf_str2chr), 222, "float(string str, float index)", ""),
    ("chr2str", both(subrs::pf_chr2str), 223, "string(float c, ...)", ""),
    ("strconv", both(subrs::pf_strconv), 224, "string(float ccase, float redalpha, float redchars, string str, ...)", ""),
    ("strpad", both(subrs::pf_strpad), 225, "string(float pad, string str1, ...)", ""),
    ("infoadd", both(subrs::pf_infoadd), 226, "string(string info, string key, string value, ...)", ""),
    ("infoget", both(subrs::pf_infoget), 227, "string(string info, string key)", ""),
    ("strncmp", both(subrs::pf_strncmp), 228, "float(string s1, string s2, float len, optional float s1ofs, optional float s2ofs)", ""),
    ("strcasecmp", both(subrs::pf_strcasecmp), 229, "float(string s1, string s2)", ""),
    ("strncasecmp", both(subrs::pf_strncasecmp), 230, "float(string s1, string s2, float len, optional float s1ofs, optional float s2ofs)", ""),
    ("stoi", both(subrs::pf_stoi), 259, "int(string)", ""),
    ("itos", both(subrs::pf_itos), 260, "string(int)", ""),
    ("stoh", both(subrs::pf_stoh), 261, "int(string)", ""),
    ("htos", both(subrs::pf_htos), 262, "string(int)", ""),
    ("checkcommand", both(subrs::pf_checkcommand), 294, "float(string name)", "1 for a command, 2 for a cvar."),
    ("print", both(subrs::pf_print), 339, "void(string s, ...)", "Print to the console."),
    ("tokenize", both(tokenize::pf_tokenize), 441, "float(string s)", ""),
    ("argv", both(tokenize::pf_argv), 442, "string(float n)", ""),
    ("search_begin", both(search::pf_search_begin), 444, "float(string pattern, float caseinsensitive, float quiet)", ""),
    ("search_end", both(search::pf_search_end), 445, "void(float handle)", ""),
    ("search_getsize", both(search::pf_search_getsize), 446, "float(float handle)", ""),
    ("search_getfilename", both(search::pf_search_getfilename), 447, "string(float handle, float num)", ""),
    ("cvar_string", both(subrs::pf_cvar_string), 448, "string(string varname)", ""),
    ("buf_create", both(strbuf::pf_buf_create), 460, "float()", ""),
    ("buf_del", both(strbuf::pf_buf_del), 461, "void(float bufhandle)", ""),
    ("buf_getsize", both(strbuf::pf_buf_getsize), 462, "float(float bufhandle)", ""),
    ("buf_copy", both(strbuf::pf_buf_copy), 463, "void(float bufhandle_from, float bufhandle_to)", ""),
    ("buf_sort", both(strbuf::pf_buf_sort), 464, "void(float bufhandle, float sortprefixlen, float backward)", ""),
    ("buf_implode", both(strbuf::pf_buf_implode), 465, "string(float bufhandle, string glue)", ""),
    ("bufstr_get", both(strbuf::pf_bufstr_get), 466, "string(float bufhandle, float string_index)", ""),
    ("bufstr_set", both(strbuf::pf_bufstr_set), 467, "void(float bufhandle, float string_index, string str)", ""),
    ("bufstr_add", both(strbuf::pf_bufstr_add), 468, "float(float bufhandle, string str, float order)", ""),
    ("bufstr_free", both(strbuf::pf_bufstr_free), 469, "void(float bufhandle, float string_index)", ""),
    ("asin", both(subrs::pf_asin), 471, "float(float s)", ""),
    ("acos", both(subrs::pf_acos), 472, "float(float c)", ""),
    ("atan", both(subrs::pf_atan), 473, "float(float t)", ""),
    ("atan2", both(subrs::pf_atan2), 474, "float(float c, float s)", ""),
    ("tan", both(subrs::pf_tan), 475, "float(float a)", ""),
    ("strlennocol", both(markup::pf_strlennocol), 476, "float(string s)", "Length without color codes."),
    ("strdecolorize", both(markup::pf_strdecolorize), 477, "string(string s)", ""),
    ("strftime", both(subrs::pf_strftime), 478, "string(float uselocaltime, string format, ...)", ""),
    ("tokenizebyseparator", both(tokenize::pf_tokenizebyseparator), 479, "float(string s, string separator1, ...)", ""),
    ("strtolower", both(subrs::pf_strtolower), 480, "string(string s)", ""),
    ("strtoupper", both(subrs::pf_strtoupper), 481, "string(string s)", ""),
    ("cvar_defstring", both(subrs::pf_cvar_defstring), 482, "string(string s)", ""),
    ("strreplace", both(subrs::pf_strreplace), 484, "string(string search, string replace, string subject)", ""),
    ("strireplace", both(subrs::pf_strireplace), 485, "string(string search, string replace, string subject)", ""),
    ("crc16", both(subrs::pf_crc16), 494, "float(float caseinsensitive, string s, ...)", ""),
    ("cvar_type", both(subrs::pf_cvar_type), 495, "float(string name)", ""),
    ("uri_escape", both(subrs::pf_uri_escape), 510, "string(string in)", ""),
    ("uri_unescape", both(subrs::pf_uri_unescape), 511, "string(string in)", ""),
    ("tokenize_console", both(tokenize::pf_tokenize_console), 514, "float(string str)", ""),
    ("argv_start_index", both(tokenize::pf_argv_start_index), 515, "float(float idx)", ""),
    ("argv_end_index", both(tokenize::pf_argv_end_index), 516, "float(float idx)", ""),
    ("buf_cvarlist", both(strbuf::pf_buf_cvarlist), 517, "void(float strbuf, string pattern, string antipattern)", ""),
    ("buf_loadfile", both(strbuf::pf_buf_loadfile), 535, "float(string filename, float bufhandle)", ""),
    ("buf_writefile", both(strbuf::pf_buf_writefile), 536, "float(float filehandle, float bufhandle, optional float startpos, optional float numstrings)", ""),
    ("sprintf", both(sprintf::pf_sprintf), 627, "string(string fmt, ...)", "Formatted string."),

    ("checkbuiltin", both(ext::pf_checkbuiltin), 0, "float(__variant funcref)", "Whether a builtin reference will work."),
    ("builtinsupported", both(ext::pf_builtinsupported), 0, "float(string builtinname)", "Number of a builtin, 0 if unknown."),
    ("ftoi", both(subrs::pf_ftoi), 0, "int(float)", ""),
    ("itof", both(subrs::pf_itof), 0, "float(int)", ""),
    ("search_getfilesize", both(search::pf_search_getfilesize), 0, "float(float handle, float num)", ""),
    ("search_getfilemtime", both(search::pf_search_getfilemtime), 0, "string(float handle, float num)", ""),
    ("stringwidth", client(markup::pf_stringwidth), 0, "float(string text, float usecolours, optional vector fontsize)", ""),
}

pub struct Registry {
    list: Vec<Builtin>,
    by_name: FnvHashMap<&'static str, usize>,
    documented: FnvHashMap<usize, usize>,
    auto: FnvHashMap<usize, usize>,
}

impl Registry {
    /// Assign numbers. Panics on a duplicated documented number or when the
    /// automatic range runs into the documented one.
    fn new(mut list: Vec<Builtin>) -> Registry {
        let mut by_name = FnvHashMap::default();
        let mut documented = FnvHashMap::default();
        let mut auto = FnvHashMap::default();
        let mut next_auto = MAX_BUILTINS - 1;
        for (i, b) in list.iter_mut().enumerate() {
            assert!(by_name.insert(b.name, i).is_none(), "builtin {} defined twice", b.name);
            if b.documented != 0 {
                b.number = b.documented as usize;
                assert!(documented.insert(b.number, i).is_none(),
                        "builtin number {} used twice", b.number);
            } else {
                b.number = next_auto;
                auto.insert(next_auto, i);
                next_auto -= 1;
            }
        }
        let max_documented = documented.keys().copied().max().unwrap_or(0);
        assert!(next_auto >= max_documented,
                "automatic builtin numbers overlap documented ones");
        Registry { list, by_name, documented, auto }
    }

    pub fn lookup(&self, number: usize) -> Option<&Builtin> {
        self.documented.get(&number)
                       .or_else(|| self.auto.get(&number))
                       .map(|&i| &self.list[i])
    }

    pub fn find(&self, name: &str) -> Option<&Builtin> {
        self.by_name.get(name).map(|&i| &self.list[i])
    }

    pub fn all(&self) -> &[Builtin] {
        &self.list
    }
}

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new(descriptors());
}

pub fn lookup(number: usize) -> Option<&'static Builtin> {
    REGISTRY.lookup(number)
}

pub fn find(name: &str) -> Option<&'static Builtin> {
    REGISTRY.find(name)
}

/// Bind the base set and, with extensions on, point slot-0 stubs at the
/// builtin of the same name.
pub fn install(vm: &mut QcVm) {
    let role = vm.role();
    for b in REGISTRY.all().iter().filter(|b| b.number < BASE_BUILTINS) {
        if let Some(f) = b.implementation(role) {
            vm.builtins[b.number] = Slot::Resolved(f);
        }
    }
    if !vm.extensions_enabled {
        return;
    }
    let mut patched = 0;
    for fnum in 1..vm.progs.functions.len() {
        let f = vm.progs.functions[fnum];
        if f.first_statement != 0 || f.parm_start != 0 || f.locals != 0 || f.numparms != 0 {
            continue;
        }
        let name = vm.progs.function_name(fnum).into_owned();
        match find(&name) {
            Some(b) => {
                trace!("{name} bound to builtin #{}", b.number);
                vm.progs.functions[fnum].first_statement = -(b.number as i32);
                patched += 1;
            }
            None => debug!("{role} VM: no builtin named {name}"),
        }
    }
    debug!("{role} VM: {patched} builtins bound by name");
}
