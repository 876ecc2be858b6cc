//! `.secmdata` single-file container.
//!
//! ```text
//! experiment.secmdata (ZIP)
//! ├── mimetype          application/vnd.secm+zip, stored, first entry
//! ├── settings.json     settings snapshot
//! └── experiment.json   grid, geometry, timestamp
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::error::ExperimentError;
use super::settings::Settings;
use super::Experiment;

/// MIME type stored in the `mimetype` entry.
pub const SECM_MIMETYPE: &str = "application/vnd.secm+zip";

/// File extension of experiment containers.
pub const SECM_EXTENSION: &str = "secmdata";

/// Write `experiment` to `path`, replacing it atomically.
pub(crate) fn write_container(path: &Path, experiment: &Experiment) -> Result<(), ExperimentError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;

    {
        let mut zip_writer = ZipWriter::new(BufWriter::new(tmp.as_file_mut()));

        let stored = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .unix_permissions(0o644);
        zip_writer.start_file("mimetype", stored)?;
        zip_writer.write_all(SECM_MIMETYPE.as_bytes())?;

        let deflated = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(0o644);

        // settings go in before the grid
        zip_writer.start_file("settings.json", deflated)?;
        serde_json::to_writer_pretty(&mut zip_writer, &experiment.settings)?;

        zip_writer.start_file("experiment.json", deflated)?;
        serde_json::to_writer(&mut zip_writer, experiment)?;

        let mut inner = zip_writer.finish()?;
        inner.flush()?;
    }

    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a container written by [`write_container`].
pub(crate) fn read_container(path: &Path) -> Result<Experiment, ExperimentError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;

    let mut mimetype = String::new();
    archive
        .by_name("mimetype")
        .map_err(|_| ExperimentError::InvalidFormat("container missing mimetype".to_string()))?
        .read_to_string(&mut mimetype)?;
    if mimetype.trim() != SECM_MIMETYPE {
        return Err(ExperimentError::InvalidFormat(format!(
            "unexpected mimetype '{}'",
            mimetype.trim()
        )));
    }

    let settings: Settings = match archive.by_name("settings.json") {
        Ok(entry) => serde_json::from_reader(entry)?,
        Err(_) => Settings::default(),
    };

    let entry = archive.by_name("experiment.json").map_err(|_| {
        ExperimentError::InvalidFormat("container missing experiment.json".to_string())
    })?;
    let mut experiment: Experiment = serde_json::from_reader(entry)?;
    experiment.settings = settings;
    experiment.validate()?;
    experiment.path = Some(path.to_path_buf());
    experiment.saved = true;
    Ok(experiment)
}
