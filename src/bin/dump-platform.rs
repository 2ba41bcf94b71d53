use qcvm::logging::setup_logging;
use qcvm::platform::dump_platform;
use qcvm::stylize::Stylize;
use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Write};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logging();
    let args: Vec<String> = env::args().skip(1).collect();
    match &args[..] {
        [] => {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            dump_platform(&mut out)?;
            out.flush()?;
        }
        [flag] if flag == "--table" => {
            #[cfg(feature = "extra")]
            println!("{}", qcvm::platform::summary_table());
            #[cfg(not(feature = "extra"))]
            return Err("--table needs the `extra` feature".into());
        }
        [path] => {
            let mut out = BufWriter::new(File::create(path)?);
            dump_platform(&mut out)?;
            out.flush()?;
            eprintln!("{} {path}", "wrote".style_success());
        }
        _ => return Err(format!("usage: qcdump [--table | FILE], got {args:?}").into()),
    }
    Ok(())
}
