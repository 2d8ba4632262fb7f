//! Upload, listing and deletion of files in the working folders.

use crate::paths::WorkDirs;
use serde::Serialize;
use std::path::Path;

pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "wav", "m4a", "flac", "aac", "ogg"];

/// A transcript available for download.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutputFile {
    pub name: String,
    pub path: String,
}

/// True for a single path component: no separators, not `.` or `..`.
pub fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
}

pub fn is_allowed_audio(name: &str) -> bool {
    match name.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Make an uploaded name safe to store: drop any client path, replace
/// reserved characters and whitespace, strip leading dots.
pub fn sanitize_file_name(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*') || c.is_whitespace() || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if is_plain_file_name(&cleaned) {
        Some(cleaned)
    } else {
        None
    }
}

fn sorted_names(dir: &Path, keep: impl Fn(&str) -> bool) -> Result<Vec<String>, String> {
    let entries = std::fs::read_dir(dir).map_err(|e| format!("Failed to read {}: {}", dir.display(), e))?;
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|n| keep(n))
        .collect();
    names.sort();
    Ok(names)
}

/// Audio files waiting in the upload folder.
pub fn list_pending(dirs: &WorkDirs) -> Result<Vec<String>, String> {
    sorted_names(&dirs.upload, is_allowed_audio)
}

/// Transcripts in the output folder, with their download route.
pub fn list_outputs(dirs: &WorkDirs) -> Result<Vec<OutputFile>, String> {
    Ok(sorted_names(&dirs.output, |n| n.ends_with(".txt"))?
        .into_iter()
        .map(|name| OutputFile {
            path: format!("/api/download/{}", name),
            name,
        })
        .collect())
}

/// Store an upload under its sanitised name and return that name.
pub fn save_upload(dirs: &WorkDirs, raw_name: &str, bytes: &[u8]) -> Result<String, String> {
    if !is_allowed_audio(raw_name) {
        return Err(format!("File type not allowed: {}", raw_name));
    }
    let name = sanitize_file_name(raw_name).ok_or_else(|| format!("Invalid file name: {}", raw_name))?;
    let path = dirs.upload.join(&name);
    std::fs::write(&path, bytes).map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;
    Ok(name)
}

/// Delete `name` from `dir`. Ok(false) when there was nothing to delete.
pub fn delete_file(dir: &Path, name: &str) -> Result<bool, String> {
    if !is_plain_file_name(name) {
        return Err(format!("Invalid file name: {}", name));
    }
    let path = dir.join(name);
    if !path.is_file() {
        return Ok(false);
    }
    std::fs::remove_file(&path).map_err(|e| format!("Failed to delete {}: {}", path.display(), e))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, WorkDirs) {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = WorkDirs::under(tmp.path());
        dirs.ensure().unwrap();
        (tmp, dirs)
    }

    #[test]
    fn plain_names() {
        assert!(is_plain_file_name("meeting.mp3"));
        assert!(is_plain_file_name("会議.wav"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../etc/passwd"));
        assert!(!is_plain_file_name("a\\b.mp3"));
    }

    #[test]
    fn audio_extensions_are_case_insensitive() {
        assert!(is_allowed_audio("a.MP3"));
        assert!(is_allowed_audio("b.ogg"));
        assert!(!is_allowed_audio("c.txt"));
        assert!(!is_allowed_audio("mp3"));
    }

    #[test]
    fn sanitize_strips_client_paths_and_reserved_chars() {
        assert_eq!(sanitize_file_name("C:\\Users\\me\\my talk.mp3").as_deref(), Some("my_talk.mp3"));
        assert_eq!(sanitize_file_name("../../.hidden.wav").as_deref(), Some("hidden.wav"));
        assert_eq!(sanitize_file_name("a?b.flac").as_deref(), Some("a_b.flac"));
        assert_eq!(sanitize_file_name(".."), None);
    }

    #[test]
    fn listings_filter_and_sort() {
        let (_tmp, dirs) = workspace();
        std::fs::write(dirs.upload.join("b.wav"), b"x").unwrap();
        std::fs::write(dirs.upload.join("a.mp3"), b"x").unwrap();
        std::fs::write(dirs.upload.join("notes.txt"), b"x").unwrap();
        std::fs::write(dirs.output.join("a.txt"), b"x").unwrap();
        std::fs::write(dirs.output.join("stray.log"), b"x").unwrap();

        assert_eq!(list_pending(&dirs).unwrap(), vec!["a.mp3", "b.wav"]);
        assert_eq!(
            list_outputs(&dirs).unwrap(),
            vec![OutputFile {
                name: "a.txt".into(),
                path: "/api/download/a.txt".into()
            }]
        );
    }

    #[test]
    fn upload_and_delete() {
        let (_tmp, dirs) = workspace();
        assert!(save_upload(&dirs, "evil.exe", b"x").is_err());
        let name = save_upload(&dirs, "my talk.m4a", b"data").unwrap();
        assert_eq!(name, "my_talk.m4a");
        assert!(dirs.upload.join(&name).is_file());

        assert_eq!(delete_file(&dirs.upload, &name), Ok(true));
        assert_eq!(delete_file(&dirs.upload, &name), Ok(false));
        assert!(delete_file(&dirs.upload, "../x").is_err());
    }
}
