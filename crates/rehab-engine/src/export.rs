use std::collections::HashSet;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use rehab_contracts::assets::{closeup_filename, restoration_filename};
use rehab_contracts::session::SessionSnapshot;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::codec::{decode_base64, extension_for_mime};

pub const DEFAULT_ARCHIVE_NAME: &str = "bad_photo_rehab_gallery.zip";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub path: PathBuf,
    pub entries: Vec<String>,
}

pub fn export_archive(snapshot: &SessionSnapshot, out_path: &Path) -> Result<ArchiveSummary> {
    let Some(original) = snapshot.original_image.as_deref() else {
        bail!("nothing to export: the session has no uploaded photo");
    };

    let mut entries: Vec<(String, &str)> = Vec::new();
    let mut used = HashSet::new();
    entries.push((
        unique_name(
            &mut used,
            format!(
                "original_image.{}",
                extension_for_mime(&snapshot.original_mime_type)
            ),
        ),
        original,
    ));
    for asset in &snapshot.restoration_results {
        let name = unique_name(&mut used, format!("restored/{}", restoration_filename(asset)));
        entries.push((name, asset.data.as_str()));
    }
    for face in &snapshot.face_closeups {
        let name = unique_name(&mut used, format!("closeups/{}", closeup_filename(face)));
        entries.push((name, face.data.as_str()));
    }

    if let Some(parent) = out_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed creating {}", parent.display()))?;
    }
    let file = File::create(out_path)
        .with_context(|| format!("failed creating {}", out_path.display()))?;
    let mut writer = ZipWriter::new(file);
    // Images are already compressed.
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    for (name, data) in &entries {
        let bytes = decode_base64(data).with_context(|| format!("archive entry {name}"))?;
        writer
            .start_file(name.as_str(), options)
            .with_context(|| format!("failed starting archive entry {name}"))?;
        writer.write_all(&bytes)?;
    }
    writer.finish().context("failed finalizing archive")?;

    Ok(ArchiveSummary {
        path: out_path.to_path_buf(),
        entries: entries.into_iter().map(|(name, _)| name).collect(),
    })
}

fn unique_name(used: &mut HashSet<String>, name: String) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rfind('.') {
        Some(idx) => (&name[..idx], &name[idx..]),
        None => (name.as_str(), ""),
    };
    let mut counter = 2;
    loop {
        let candidate = format!("{stem}_{counter}{ext}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}
