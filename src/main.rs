#[cfg(all(target_env = "musl", target_pointer_width = "64"))]
use jemallocator::Jemalloc;
#[cfg(all(target_env = "musl", target_pointer_width = "64"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use qcvm::logging::{setup_logging, warning_count};
use qcvm::stylize::Stylize;
use qcvm::{ext, Host, VmRole};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

const USAGE: &str = "usage: qcvm [--client] [--set NAME VALUE]... [GAMEDIR] [FUNCTION]...";

struct Opts {
    role: VmRole,
    gamedir: PathBuf,
    cvars: Vec<(String, String)>,
    functions: Vec<String>,
}

fn default_gamedir() -> PathBuf {
    dirs::data_local_dir().unwrap_or_else(|| PathBuf::from(".")).join("qcvm")
}

fn parse_args() -> Result<Opts, String> {
    let mut opts = Opts {
        role: VmRole::Server,
        gamedir: default_gamedir(),
        cvars: Vec::new(),
        functions: Vec::new(),
    };
    let mut positional = Vec::new();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--client" => opts.role = VmRole::Client,
            "--set" => match (args.next(), args.next()) {
                (Some(name), Some(value)) => opts.cvars.push((name, value)),
                _ => return Err("--set needs a name and a value".to_string()),
            },
            "-h" | "--help" => return Err(USAGE.to_string()),
            flag if flag.starts_with("--") => return Err(format!("unknown option {flag}\n{USAGE}")),
            _ => positional.push(arg),
        }
    }
    let mut positional = positional.into_iter();
    if let Some(dir) = positional.next() {
        opts.gamedir = PathBuf::from(dir);
    }
    opts.functions = positional.collect();
    if opts.functions.is_empty() {
        opts.functions.push(match opts.role {
            VmRole::Server => "worldspawn".to_string(),
            VmRole::Client => "CSQC_Init".to_string(),
        });
    }
    Ok(opts)
}

fn main() -> ExitCode {
    setup_logging();
    let opts = match parse_args() {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };
    let mut host = Host::new(&opts.gamedir);
    for (name, value) in opts.cvars.iter() {
        if !host.shared.cvars.exists(name) {
            host.shared.cvars.register(name, value, qcvm::cvar::CVAR_USERDEFINED, "");
        }
        host.set_cvar(name, value);
    }
    let disabled = ext::disabled(&host.shared.cvars, opts.role);
    if !disabled.is_empty() {
        eprintln!("{} {}", "disabled extensions:".style_stub(), disabled.join(" "));
    }
    let progs = opts.gamedir.join(match opts.role {
        VmRole::Server => "progs.dat",
        VmRole::Client => "csprogs.dat",
    });
    if let Err(e) = host.load_file(opts.role, &progs) {
        eprintln!("{} {}: {e}", "error:".style_error(), progs.display());
        return ExitCode::FAILURE;
    }
    for name in opts.functions.iter() {
        match host.execute(opts.role, name) {
            Ok(()) => eprintln!("{} {}", "ran".style_success(), name.style_builtin()),
            Err(e) => {
                eprintln!("{} {e}", "error:".style_error());
                return ExitCode::FAILURE;
            }
        }
    }
    let cmds = host.take_commands();
    if !cmds.is_empty() {
        eprint!("{}", String::from_utf8_lossy(&cmds));
    }
    if warning_count() > 0 {
        eprintln!("{} warnings", warning_count().style_number());
    }
    ExitCode::SUCCESS
}
