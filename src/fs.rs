//! File-path sandbox for the file builtins.
//!
//! Names are relative. Reads and writes go to `<gamedir>/data/<name>`; reads
//! of a few allow-listed asset paths fall back to `<gamedir>/<name>`.

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Game directory paths readable without a data copy. `*` stays within one
/// directory.
const FALLBACK_READS: &[&str] = &["configs/*.cfg", "particles/*", "huds/*", "models/*"];

#[derive(Debug, Clone)]
pub struct Sandbox {
    gamedir: PathBuf,
    fallback: GlobSet,
}

/// Whether bytecode may name this path at all.
pub fn is_safe_name(name: &str) -> bool {
    !(name.is_empty()
      || name.contains(':')
      || name.contains('\\')
      || name.starts_with('/')
      || name.split('/').any(|c| c == "..")
      || name.contains(".."))
}

impl Sandbox {
    pub fn new(gamedir: impl Into<PathBuf>) -> Sandbox {
        let mut b = GlobSetBuilder::new();
        for pat in FALLBACK_READS {
            match GlobBuilder::new(pat).literal_separator(true).build() {
                Ok(g) => { b.add(g); }
                Err(e) => warn!("bad fallback pattern {pat}: {e}"),
            }
        }
        let fallback = b.build().unwrap_or_else(|e| {
            warn!("fallback read list disabled: {e}");
            GlobSet::empty()
        });
        Sandbox { gamedir: gamedir.into(), fallback }
    }

    pub fn gamedir(&self) -> &Path {
        &self.gamedir
    }

    pub fn data_dir(&self) -> PathBuf {
        self.gamedir.join("data")
    }

    pub fn fallback_allowed(&self, name: &str) -> bool {
        self.fallback.is_match(name)
    }

    fn checked(&self, name: &str) -> Option<PathBuf> {
        if !is_safe_name(name) {
            qc_warn!("rejected unsafe file name \"{name}\"");
            return None;
        }
        Some(self.data_dir().join(name))
    }

    /// Path to read `name` from: the data copy if present, otherwise the
    /// game directory copy for allow-listed paths.
    pub fn read_path(&self, name: &str) -> Option<PathBuf> {
        let primary = self.checked(name)?;
        if primary.is_file() {
            return Some(primary);
        }
        if self.fallback_allowed(name) {
            let alt = self.gamedir.join(name);
            if alt.is_file() {
                return Some(alt);
            }
        }
        None
    }

    /// Path to write `name` to, creating parent directories.
    pub fn write_path(&self, name: &str) -> Option<PathBuf> {
        let path = self.checked(name)?;
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                qc_warn!("cannot create {}: {e}", parent.display());
                return None;
            }
        }
        Some(path)
    }

    pub fn read(&self, name: &str) -> io::Result<Vec<u8>> {
        match self.read_path(name) {
            Some(p) => fs::read(p),
            None => Err(io::ErrorKind::NotFound.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsafe_names() {
        for name in ["", "c:/x", "a\\b", "/etc/passwd", "../x", "a/../b", "a/..", "x..y"] {
            assert!(!is_safe_name(name), "{name}");
        }
        for name in ["a.txt", "dir/b.cfg", ".hidden"] {
            assert!(is_safe_name(name), "{name}");
        }
    }

    #[test]
    fn fallback_list() {
        let sb = Sandbox::new("/nonexistent");
        assert!(sb.fallback_allowed("configs/default.cfg"));
        assert!(!sb.fallback_allowed("configs/default.txt"));
        assert!(sb.fallback_allowed("particles/effects.txt"));
        assert!(sb.fallback_allowed("huds/main.hud"));
        assert!(sb.fallback_allowed("models/a.mdl"));
        assert!(!sb.fallback_allowed("config.cfg"));
        assert!(!sb.fallback_allowed("maps/e1m1.bsp"));
    }

    #[test]
    fn fallback_stays_in_one_directory() {
        let sb = Sandbox::new("/nonexistent");
        assert!(!sb.fallback_allowed("configs/a/b.cfg"));
        assert!(!sb.fallback_allowed("models/player/skin.mdl"));
        let dir = tempfile::tempdir().unwrap();
        let sb = Sandbox::new(dir.path());
        fs::create_dir_all(dir.path().join("configs/a")).unwrap();
        fs::write(dir.path().join("configs/a/b.cfg"), b"nested").unwrap();
        assert!(sb.read("configs/a/b.cfg").is_err());
    }

    #[test]
    fn reads_prefer_data() {
        let dir = tempfile::tempdir().unwrap();
        let sb = Sandbox::new(dir.path());
        fs::create_dir_all(dir.path().join("configs")).unwrap();
        fs::write(dir.path().join("configs/a.cfg"), b"game").unwrap();
        fs::write(dir.path().join("secret.txt"), b"secret").unwrap();
        assert_eq!(sb.read("configs/a.cfg").unwrap(), b"game");
        assert!(sb.read("secret.txt").is_err());
        let p = sb.write_path("configs/a.cfg").unwrap();
        fs::write(p, b"data").unwrap();
        assert_eq!(sb.read("configs/a.cfg").unwrap(), b"data");
    }
}
