//! Writing a finished workbook to disk.

use std::fs;
use std::path::{Path, PathBuf};

use crate::assembler::WorkbookArtifact;
use crate::error::Result;

/// Where [`write_artifacts`] put the two files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub json: PathBuf,
    pub text: PathBuf,
}

/// Output paths for an input file: `<out_dir>/workbook-<stem>.json` and
/// `<out_dir>/workbook-<stem>.txt`.
pub fn artifact_paths(out_dir: &Path, input: &Path) -> ArtifactPaths {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "input".to_string());
    ArtifactPaths {
        json: out_dir.join(format!("workbook-{}.json", stem)),
        text: out_dir.join(format!("workbook-{}.txt", stem)),
    }
}

/// Write the structured and plain-text renderings of `artifact`.
///
/// Creates `out_dir` if needed. Both renderings are produced before either
/// file is written, so a serialization failure leaves nothing behind.
pub fn write_artifacts(artifact: &WorkbookArtifact, out_dir: &Path, input: &Path) -> Result<ArtifactPaths> {
    let paths = artifact_paths(out_dir, input);
    let json = artifact.to_json()?;
    let text = artifact.to_text();

    fs::create_dir_all(out_dir)?;
    fs::write(&paths.json, json)?;
    fs::write(&paths.text, text)?;
    tracing::info!(json = %paths.json.display(), text = %paths.text.display(), "workbook written");
    Ok(paths)
}
