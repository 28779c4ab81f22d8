//! Destination paths for imported files.

use std::path::{Path, PathBuf};

use crate::library::{MediaKind, MediaTarget};
use crate::quality::ParsedQuality;

/// The file being imported, as the organizer sees it.
#[derive(Debug, Clone)]
pub struct IncomingFile<'a> {
    /// Where the download currently lives.
    pub path: &'a Path,
    pub slot_id: &'a str,
    pub release_title: &'a str,
    pub quality: &'a ParsedQuality,
}

impl IncomingFile<'_> {
    /// Lowercase extension of the downloaded file, if any.
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Computes where a file belongs in the library.
///
/// Implementations must be pure: the same inputs always give the same
/// path, and nothing is touched on disk.
pub trait Organizer: Send + Sync {
    fn destination_path(&self, library_root: &Path, target: &MediaTarget, file: &IncomingFile<'_>) -> PathBuf;
}

/// `Title (Year)/Title (Year) - quality [slot].ext` for movies and
/// `Title/Season NN/Title - SxxEyy - quality [slot].ext` for episodes.
#[derive(Debug, Clone, Default)]
pub struct TemplateOrganizer;

impl TemplateOrganizer {
    pub fn new() -> Self {
        Self
    }
}

impl Organizer for TemplateOrganizer {
    fn destination_path(&self, library_root: &Path, target: &MediaTarget, file: &IncomingFile<'_>) -> PathBuf {
        let title = sanitize(&target.title);
        let suffix = format!("{} [{}]", file.quality, sanitize(file.slot_id));

        let (dir, stem) = match (target.kind, target.season, target.episode) {
            (MediaKind::Episode, Some(season), Some(episode)) => (
                library_root
                    .join(&title)
                    .join(format!("Season {:02}", season)),
                format!("{} - S{:02}E{:02} - {}", title, season, episode, suffix),
            ),
            _ => {
                let folder = match target.year {
                    Some(year) => format!("{} ({})", title, year),
                    None => title.clone(),
                };
                let stem = format!("{} - {}", folder, suffix);
                (library_root.join(folder), stem)
            }
        };

        let file_name = match file.extension() {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem,
        };
        dir.join(file_name)
    }
}

/// Replace characters that are unsafe in file names.
fn sanitize(s: &str) -> String {
    let cleaned: String = s
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').to_string()
}
