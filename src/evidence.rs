//! Evidence capture on disk.
//!
//! Evidence files are date-bucketed and named after the track and the local
//! time of the trigger:
//!
//! `<base>/<YYYY-MM-DD>/<prefix>_<track_id>_<HHMMSS>.jpg`
//!
//! Folder creation is idempotent. Files are written to a temporary sibling and
//! renamed into place, so readers never observe a partial JPEG.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::{ImageFormat, RgbImage};
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use crate::config::StorageSettings;

pub const IMAGE_EXT: &str = "jpg";
pub const CAPTURE_PREFIX: &str = "capture_id";
pub const FRAMERECORD_PREFIX: &str = "framerecord_id";

/// Build `<base>/<YYYY-MM-DD>/<prefix>_<track_id>_<HHMMSS>.jpg`.
pub fn evidence_path(base: &Path, prefix: &str, track_id: u64, at: &DateTime<Local>) -> PathBuf {
    base.join(at.format("%Y-%m-%d").to_string()).join(format!(
        "{}_{}_{}.{}",
        prefix,
        track_id,
        at.format("%H%M%S"),
        IMAGE_EXT
    ))
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Jpeg)
        .context("encode jpeg")?;
    Ok(buf.into_inner())
}

/// Write `bytes` to `path`, creating parent folders as needed.
pub fn write_image_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create folder {}", parent.display()))?;
    }
    let tmp = path.with_extension(format!("{IMAGE_EXT}.tmp"));
    std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}

/// Images captured at the moment a track becomes persistent.
#[derive(Clone, Debug)]
pub struct EvidenceImages {
    /// Cropped detection or full raw frame, per `storage.captures.save_crop`.
    pub capture: RgbImage,
    /// Annotated frame, present when the frame-record archive is enabled.
    pub annotated: Option<RgbImage>,
}

/// Outcome of persisting evidence for one track.
#[derive(Clone, Debug)]
pub struct SavedEvidence {
    /// Encoded capture JPEG. Kept in memory so alerts can attach it even if the write failed.
    pub capture_jpeg: Vec<u8>,
    pub capture_sha256: String,
    /// Where the capture landed, if the write succeeded.
    pub capture_path: Option<PathBuf>,
    pub framerecord_path: Option<PathBuf>,
}

impl EvidenceImages {
    /// Encode and persist the evidence images.
    ///
    /// Only an encoding failure of the capture is returned as an error; write
    /// failures are logged and reflected as `None` paths.
    pub fn save(
        &self,
        storage: &StorageSettings,
        track_id: u64,
        at: &DateTime<Local>,
    ) -> Result<SavedEvidence> {
        let capture_jpeg = encode_jpeg(&self.capture)?;
        let capture_sha256 = hex::encode(Sha256::digest(&capture_jpeg));

        let path = evidence_path(&storage.captures_path, CAPTURE_PREFIX, track_id, at);
        let capture_path = match write_image_file(&path, &capture_jpeg) {
            Ok(()) => {
                log::info!("evidence saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::error!("evidence save failed for track {}: {:#}", track_id, e);
                None
            }
        };

        let framerecord_path = match (&self.annotated, &storage.framerecord_path) {
            (Some(annotated), Some(base)) => {
                let path = evidence_path(base, FRAMERECORD_PREFIX, track_id, at);
                match encode_jpeg(annotated).and_then(|bytes| write_image_file(&path, &bytes)) {
                    Ok(()) => {
                        log::info!("annotated frame saved: {}", path.display());
                        Some(path)
                    }
                    Err(e) => {
                        log::error!(
                            "annotated frame save failed for track {}: {:#}",
                            track_id,
                            e
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(SavedEvidence {
            capture_jpeg,
            capture_sha256,
            capture_path,
            framerecord_path,
        })
    }
}
