use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use super::conversion::ConversionError;

/// Zips every regular file below `staging_dir` into `archive_path`.
///
/// Entries are sorted by path, stored with `/` separators relative to the
/// staging root and carry the DOS epoch as timestamp, so identical staging
/// trees produce identical archives.
pub fn package_directory(staging_dir: &Path, archive_path: &Path) -> Result<u64, ConversionError> {
    let file = File::create(archive_path)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644);

    let mut entries = 0u64;
    for entry in WalkDir::new(staging_dir)
        .follow_links(false)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ConversionError::PackagingFailure(e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(staging_dir)
            .map_err(|e| ConversionError::PackagingFailure(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        writer.start_file(name.as_str(), options)?;
        writer.write_all(&std::fs::read(entry.path())?)?;
        debug!("Packed {}", name);
        entries += 1;
    }

    writer.finish()?.flush()?;
    Ok(entries)
}
