use serde::{de::DeserializeOwned, Serialize};
use std::{
    env,
    fs::{self, File, ReadDir},
    io::BufReader,
    path::{Path, PathBuf},
};

pub mod error {
    use std::{io, path::PathBuf};

    pub type Result<T> = std::result::Result<T, self::Error>;

    type Msg = &'static str;

    #[derive(Debug, thiserror::Error)]
    pub enum Error {
        #[error("{0} ({1}): {2}")]
        SingleIO(Msg, PathBuf, #[source] io::Error),

        #[error("{0} (from='{1}', to='{2}'): {3}")]
        FromToIO(Msg, PathBuf, PathBuf, #[source] io::Error),

        #[error("Cannot serialize to JSON (dest='{0}'): {1}")]
        SerializeToJson(PathBuf, #[source] serde_json::Error),

        #[error("Cannot deserialize from JSON (src='{0}'): {1}")]
        DeserializeFromJson(PathBuf, #[source] serde_json::Error),
    }
}
pub use error::{Error, Result};

pub fn mkdir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::create_dir_all(dir).map_err(|e| Error::SingleIO("Cannot create dir", dir.to_owned(), e))
}

pub fn remove_dir_all(path: impl AsRef<Path>) -> Result<()> {
    let dir = path.as_ref();
    fs::remove_dir_all(dir).map_err(|e| Error::SingleIO("Cannot remove dir", dir.to_owned(), e))
}

pub fn read_to_string(filepath: impl AsRef<Path>) -> Result<String> {
    fs::read_to_string(&filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.as_ref().to_owned(), e))
}

pub fn read_dir(dir: impl AsRef<Path>) -> Result<ReadDir> {
    fs::read_dir(&dir).map_err(|e| Error::SingleIO("Cannot read dir", dir.as_ref().to_owned(), e))
}

/// Writes `contents` next to `filepath` first and then renames it into place,
/// so readers never observe a half-written file.
pub fn write_atomically_with_mkdir<P, C>(filepath: P, contents: C) -> Result<()>
where
    P: AsRef<Path>,
    C: AsRef<[u8]>,
{
    let filepath = filepath.as_ref();
    if let Some(dir) = filepath.parent() {
        self::mkdir_all(dir)?;
    }
    let mut tmp_name = filepath.file_name().unwrap_or_default().to_owned();
    tmp_name.push(".tmp");
    let tmp = filepath.with_file_name(tmp_name);

    fs::write(&tmp, contents)
        .map_err(|e| Error::SingleIO("Cannot write file", tmp.to_owned(), e))?;
    fs::rename(&tmp, filepath)
        .map_err(|e| Error::FromToIO("Cannot rename file", tmp, filepath.to_owned(), e))
}

pub fn write_json_with_mkdir<P, T>(filepath: P, data: &T) -> Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let s = serde_json::to_string_pretty(data)
        .map_err(|e| Error::SerializeToJson(filepath.as_ref().to_owned(), e))?;
    write_atomically_with_mkdir(filepath, s)
}

pub fn read_json_with_deserialize<P, T>(filepath: P) -> Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let filepath = filepath.as_ref();
    let f = File::open(filepath)
        .map_err(|e| Error::SingleIO("Cannot read file", filepath.to_owned(), e))?;
    serde_json::from_reader(BufReader::new(f))
        .map_err(|e| Error::DeserializeFromJson(filepath.to_owned(), e))
}

/// Recursively copies regular files and directories of `src_dir` into `dst_dir`.
/// Permission bits travel with each file. Symlinks are not followed and not copied.
/// Returns the number of copied files.
pub fn copy_tree(src_dir: impl AsRef<Path>, dst_dir: impl AsRef<Path>) -> Result<u64> {
    let (src_dir, dst_dir) = (src_dir.as_ref(), dst_dir.as_ref());
    self::mkdir_all(dst_dir)?;

    let mut num_copied = 0;
    for entry in self::read_dir(src_dir)? {
        let entry = entry.map_err(|e| {
            Error::FromToIO(
                "Cannot access dir entry on `copy_tree()`",
                src_dir.to_owned(),
                dst_dir.to_owned(),
                e,
            )
        })?;
        let dst = dst_dir.join(entry.file_name());
        let ty = entry
            .file_type()
            .map_err(|e| Error::SingleIO("Cannot get filetype on `copy_tree()`", entry.path(), e))?;

        if ty.is_symlink() {
            log::warn!("Skip symlink while copying: {}", entry.path().display());
        } else if ty.is_dir() {
            num_copied += self::copy_tree(entry.path(), dst)?;
        } else {
            fs::copy(entry.path(), &dst)
                .map_err(|e| Error::FromToIO("Cannot copy file", entry.path(), dst, e))?;
            num_copied += 1;
        }
    }
    Ok(num_copied)
}

#[cfg(unix)]
pub fn is_executable_file(path: impl AsRef<Path>) -> bool {
    use std::os::unix::fs::PermissionsExt;
    match fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_executable_file(path: impl AsRef<Path>) -> bool {
    path.as_ref().is_file()
}

/// Looks up `program` in each directory of `$PATH`, like a shell does.
pub fn find_in_path(program: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(program))
        .find(|candidate| self::is_executable_file(candidate))
}
