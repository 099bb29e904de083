//! Gzip-compressed tar extraction confined to one directory.

use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::warn;

use super::{INSTALL_TARGET, InstallError};

/// Extracts a `.tar.gz` stream into `destination`.
///
/// Only regular files and directories are written; other entry kinds are
/// skipped with a warning. An entry whose path would leave `destination`
/// fails the whole extraction.
///
/// # Errors
///
/// Returns [`InstallError::UnsafePath`] for escaping entries and
/// [`InstallError::Archive`] when the stream is not a valid archive or a
/// file cannot be written.
pub fn extract_tar_gz<R: Read>(source: R, destination: &Path) -> Result<(), InstallError> {
    let mut archive = Archive::new(GzDecoder::new(source));
    let entries = archive.entries().map_err(archive_error)?;
    for item in entries {
        let mut entry = item.map_err(archive_error)?;
        let declared = entry.path().map_err(archive_error)?.into_owned();
        let Some(relative) = confined(&declared)? else {
            continue;
        };
        let target = destination.join(&relative);
        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&target).map_err(archive_error)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(archive_error)?;
                }
                entry.unpack(&target).map_err(archive_error)?;
            }
            other => {
                warn!(
                    target: INSTALL_TARGET,
                    path = %declared.display(),
                    kind = ?other,
                    "skipping unsupported archive entry"
                );
            }
        }
    }
    Ok(())
}

/// Relative form of an entry path, or `None` for the archive root.
fn confined(path: &Path) -> Result<Option<PathBuf>, InstallError> {
    let mut relative = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(InstallError::UnsafePath {
                    path: path.to_path_buf(),
                });
            }
        }
    }
    Ok((!relative.as_os_str().is_empty()).then_some(relative))
}

fn archive_error(source: std::io::Error) -> InstallError {
    InstallError::Archive {
        source: Arc::new(source),
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::plain("plugin/plugin.json", Some("plugin/plugin.json"))]
    #[case::dotted("./plugin/bin", Some("plugin/bin"))]
    #[case::absolute("/plugin/bin", Some("plugin/bin"))]
    #[case::root("./", None)]
    fn confines_entry_paths(#[case] path: &str, #[case] expected: Option<&str>) {
        let relative = confined(Path::new(path)).expect("confined");

        assert_eq!(relative.as_deref(), expected.map(Path::new));
    }

    #[rstest]
    #[case::parent("../escape")]
    #[case::nested_parent("plugin/../../escape")]
    fn rejects_escaping_paths(#[case] path: &str) {
        assert!(matches!(
            confined(Path::new(path)),
            Err(InstallError::UnsafePath { .. })
        ));
    }
}
