use std::{io, io::Write as _, path::Path};

/// Writes `contents` to a temp file in `dir` and renames it to `path`, so that readers
/// see either the old or the new contents, never a partial write.
///
/// `dir` must be on the same filesystem as `path`.
pub(crate) fn write_atomically(dir: &Path, path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
