use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::{matcher, parser, tagger};
use crate::models::{ExistingTrack, TrackRecord};

/// 출력 디렉토리에 이미 있는 곡의 색인. 이전 실행에서 받은 곡을 다시 받지 않는 데 쓴다.
#[derive(Debug, Default)]
pub struct ExistingIndex {
    by_key: HashMap<String, PathBuf>,
}

fn track_key(artist: &str, title: &str) -> String {
    format!("{}\u{1f}{}", matcher::normalize(artist), matcher::normalize(title))
}

impl ExistingIndex {
    pub fn from_files(files: &[ExistingTrack]) -> Self {
        let mut by_key = HashMap::new();
        for file in files {
            let (Some(artist), Some(title)) = (&file.artist, &file.title) else {
                continue;
            };
            by_key
                .entry(track_key(artist, title))
                .or_insert_with(|| file.path.clone());
        }
        Self { by_key }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    /// 같은 아티스트·제목의 파일이 이미 있으면 그 경로.
    pub fn find(&self, track: &TrackRecord) -> Option<&Path> {
        self.by_key
            .get(&track_key(&track.joined_artists(), &track.title))
            .map(PathBuf::as_path)
    }
}

/// 디렉토리를 재귀 탐색하여 모든 MP3 파일을 스캔한다.
/// 숨김 디렉토리(작업용 임시 디렉토리 포함)는 건너뛴다.
pub fn scan_directory(dir: &Path) -> Result<Vec<ExistingTrack>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    collect_mp3_files(dir, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    let untagged = files.iter().filter(|f| !f.has_tags).count();
    debug!(dir = %dir.display(), count = files.len(), untagged, "output directory scanned");
    Ok(files)
}

fn collect_mp3_files(dir: &Path, files: &mut Vec<ExistingTrack>) -> Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("{}은(는) 디렉토리가 아닙니다", dir.display());
    }

    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            if !is_hidden(&path) {
                collect_mp3_files(&path, files)?;
            }
        } else if is_mp3(&path) {
            files.push(load_existing(&path));
        }
    }

    Ok(())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// 확장자가 .mp3인지 확인한다 (대소문자 무시).
fn is_mp3(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("mp3"))
        .unwrap_or(false)
}

/// 태그를 먼저 보고, 태그가 없으면 파일명에서 아티스트와 제목을 추정한다.
fn load_existing(path: &Path) -> ExistingTrack {
    match tagger::read_tags(path) {
        Ok(Some(existing)) => return existing,
        Ok(None) => {}
        Err(e) => warn!(path = %path.display(), error = %e, "unreadable tag, falling back to filename"),
    }

    let parsed = parser::parse_filename(path);
    ExistingTrack {
        path: path.to_path_buf(),
        artist: parsed.as_ref().and_then(|p| p.artist.clone()),
        title: parsed.map(|p| p.title),
        has_tags: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tagger::write_tags;

    fn track(artist: &str, title: &str) -> TrackRecord {
        TrackRecord {
            title: title.to_string(),
            artists: vec![artist.to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let files = scan_directory(&dir.path().join("nope")).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn test_index_uses_tags_before_filename() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("renamed by hand.mp3");
        std::fs::write(&path, b"audio").unwrap();
        write_tags(&path, &track("IU", "Blueming"), None).unwrap();

        let files = scan_directory(dir.path()).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].has_tags);

        let index = ExistingIndex::from_files(&files);
        assert_eq!(index.find(&track("iu", "BLUEMING")), Some(path.as_path()));
    }

    #[test]
    fn test_index_falls_back_to_filename() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("IU - Good Day (2).mp3"), b"audio").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"text").unwrap();

        let index = ExistingIndex::from_files(&scan_directory(dir.path()).unwrap());
        assert_eq!(index.len(), 1);
        assert!(index.find(&track("IU", "Good Day")).is_some());
        assert!(index.find(&track("IU", "Blueming")).is_none());
    }

    #[test]
    fn test_hidden_scratch_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join(".likedl-abc");
        std::fs::create_dir(&scratch).unwrap();
        std::fs::write(scratch.join("IU - Blueming.mp3"), b"partial").unwrap();

        assert!(scan_directory(dir.path()).unwrap().is_empty());
    }
}
