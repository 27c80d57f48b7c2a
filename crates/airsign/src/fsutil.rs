use eyre::Context as _;
use rand::Rng as _;
use std::{
    fs::{self, OpenOptions},
    io::Write as _,
    path::{Path, PathBuf},
};

#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt as _, PermissionsExt as _};

pub const MODE_DIR_PRIVATE: u32 = 0o700;
pub const MODE_FILE_PRIVATE: u32 = 0o600;

fn is_symlink(p: &Path) -> eyre::Result<bool> {
    let md = fs::symlink_metadata(p).with_context(|| format!("stat {}", p.display()))?;
    Ok(md.file_type().is_symlink())
}

/// Create `dir` if needed and clamp it to 0700 on Unix. Symlinked directories are refused.
pub fn ensure_private_dir(dir: &Path) -> eyre::Result<()> {
    if dir.exists() {
        if is_symlink(dir)? {
            eyre::bail!("refusing to use symlinked directory: {}", dir.display());
        }
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        if !md.is_dir() {
            eyre::bail!("expected directory at {}", dir.display());
        }
    } else {
        fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    }

    #[cfg(unix)]
    {
        let md = fs::metadata(dir).with_context(|| format!("stat {}", dir.display()))?;
        if (md.permissions().mode() & 0o077) != 0 {
            fs::set_permissions(dir, fs::Permissions::from_mode(MODE_DIR_PRIVATE))
                .with_context(|| format!("chmod {MODE_DIR_PRIVATE:o} {}", dir.display()))?;
        }
    }

    Ok(())
}

fn tmp_path_for(parent: &Path, final_name: &Path) -> PathBuf {
    let base = final_name
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("file");
    let mut rand_bytes = [0_u8; 8];
    rand::rng().fill_bytes(&mut rand_bytes);
    parent.join(format!(".{base}.tmp.{}", hex::encode(rand_bytes)))
}

/// Write through a fresh temp file and rename over `path`, so readers never see a torn file.
pub fn write_atomic_restrictive(path: &Path, bytes: &[u8], mode: u32) -> eyre::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| eyre::eyre!("missing parent for {}", path.display()))?;
    ensure_private_dir(parent)?;

    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to write to symlink: {}", path.display());
    }

    let tmp = tmp_path_for(parent, path);
    let mut oo = OpenOptions::new();
    oo.create_new(true).write(true);
    #[cfg(unix)]
    {
        oo.mode(mode);
    }
    let mut f = oo
        .open(&tmp)
        .with_context(|| format!("open temp {}", tmp.display()))?;

    f.write_all(bytes)
        .with_context(|| format!("write {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("fsync {}", tmp.display()))?;
    drop(f);

    // `rename` is atomic on Unix. On Windows, this can fail if the destination exists.
    #[cfg(windows)]
    {
        if path.exists() {
            fs::remove_file(path).with_context(|| format!("remove existing {}", path.display()))?;
        }
    }

    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

pub fn write_string_atomic_restrictive(path: &Path, s: &str, mode: u32) -> eyre::Result<()> {
    write_atomic_restrictive(path, s.as_bytes(), mode)
}

/// Append one line to a private file, creating it 0600 if missing.
pub fn append_line_restrictive(path: &Path, line: &str) -> eyre::Result<()> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    if path.exists() && is_symlink(path)? {
        eyre::bail!("refusing to append to symlink: {}", path.display());
    }
    let mut oo = OpenOptions::new();
    oo.create(true).append(true);
    #[cfg(unix)]
    {
        oo.mode(MODE_FILE_PRIVATE);
    }
    let mut f = oo
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    f.write_all(format!("{line}\n").as_bytes())
        .with_context(|| format!("append {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_contents() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let p = tmp.path().join("nested").join("f.txt");
        write_string_atomic_restrictive(&p, "one", MODE_FILE_PRIVATE)?;
        write_string_atomic_restrictive(&p, "two", MODE_FILE_PRIVATE)?;
        assert_eq!(fs::read_to_string(&p)?, "two");
        #[cfg(unix)]
        {
            let mode = fs::metadata(&p)?.permissions().mode() & 0o777;
            assert_eq!(mode, MODE_FILE_PRIVATE);
        }
        Ok(())
    }

    #[test]
    fn append_adds_lines() -> eyre::Result<()> {
        let tmp = tempfile::tempdir()?;
        let p = tmp.path().join("log.jsonl");
        append_line_restrictive(&p, "a")?;
        append_line_restrictive(&p, "b")?;
        assert_eq!(fs::read_to_string(&p)?, "a\nb\n");
        Ok(())
    }
}
