use std::path::Path;

use id3::{Tag, TagLike, Version};
use tracing::warn;

use crate::error::TagError;
use crate::models::{DownloadResult, ExistingTrack, TrackRecord};
use crate::sources::LibrarySource;

/// 태그 기록 결과.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagOutcome {
    pub with_artwork: bool,
}

/// 앨범 아트를 받아 다운로드 결과 파일에 메타데이터를 기록한다.
/// 앨범 아트를 받지 못하면 아트 없이 태그만 기록한다.
pub fn tag_download(
    art_source: &dyn LibrarySource,
    result: &DownloadResult,
    track: &TrackRecord,
) -> Result<TagOutcome, TagError> {
    let artwork = track
        .cover_art_url
        .as_deref()
        .and_then(|url| match art_source.fetch_album_art(url) {
            Ok(data) if !data.is_empty() => Some(data),
            Ok(_) => {
                warn!(url, "album art response was empty");
                None
            }
            Err(e) => {
                warn!(url, error = %format!("{e:#}"), "album art download failed, tagging without it");
                None
            }
        });

    write_tags(&result.local_path, track, artwork.as_deref())?;
    Ok(TagOutcome {
        with_artwork: artwork.is_some(),
    })
}

/// TrackRecord를 파일에 ID3v2.4 태그로 기록한다. 기존 태그는 버린다.
pub fn write_tags(path: &Path, track: &TrackRecord, artwork: Option<&[u8]>) -> Result<(), TagError> {
    let mut tag = Tag::new();

    tag.set_title(&track.title);
    if !track.artists.is_empty() {
        tag.set_artist(track.joined_artists());
    }
    if !track.album.is_empty() {
        tag.set_album(&track.album);
    }
    if let Some(ref album_artist) = track.album_artist {
        tag.set_album_artist(album_artist);
    }
    if let Some(number) = track.track_number {
        tag.set_track(number);
    }
    if let Some(year) = track.year {
        tag.set_year(year);
    }
    if let Some(art_data) = artwork {
        tag.add_frame(id3::frame::Picture {
            mime_type: detect_mime_type(art_data),
            picture_type: id3::frame::PictureType::CoverFront,
            description: String::new(),
            data: art_data.to_vec(),
        });
    }

    tag.write_to_path(path, Version::Id3v24)?;
    Ok(())
}

/// 파일의 ID3 태그에서 제목과 아티스트를 읽는다.
/// 태그가 없거나 제목/아티스트가 모두 비어있으면 None을 반환한다.
pub fn read_tags(path: &Path) -> Result<Option<ExistingTrack>, TagError> {
    let tag = match Tag::read_from_path(path) {
        Ok(tag) => tag,
        Err(id3::Error {
            kind: id3::ErrorKind::NoTag,
            ..
        }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if tag.title().is_none() && tag.artist().is_none() {
        return Ok(None);
    }

    Ok(Some(ExistingTrack {
        path: path.to_path_buf(),
        title: tag.title().map(|s| s.to_string()),
        artist: tag.artist().map(|s| s.to_string()),
        has_tags: true,
    }))
}

/// 이미지 바이너리의 매직 바이트로 MIME 타입을 판별한다.
fn detect_mime_type(data: &[u8]) -> String {
    if data.starts_with(&[0x89, 0x50, 0x4E, 0x47]) {
        "image/png".to_string()
    } else {
        "image/jpeg".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::error::FetchError;
    use crate::models::AudioFormat;
    use crate::sources::TrackPage;

    const PNG: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 1, 2, 3];

    struct Artwork(Option<Vec<u8>>);

    impl LibrarySource for Artwork {
        fn saved_tracks(&self, _offset: u32, _limit: u32) -> Result<TrackPage, FetchError> {
            unreachable!("tagger never lists the library")
        }

        fn fetch_album_art(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
            self.0.clone().ok_or_else(|| anyhow::anyhow!("connection reset"))
        }
    }

    fn track(cover_art_url: Option<&str>) -> TrackRecord {
        TrackRecord {
            title: "Blueming".to_string(),
            artists: vec!["IU".to_string()],
            album: "Love poem".to_string(),
            duration_ms: 217_000,
            cover_art_url: cover_art_url.map(str::to_string),
            album_artist: Some("IU".to_string()),
            track_number: Some(3),
            year: Some(2019),
            ..Default::default()
        }
    }

    fn fake_mp3(dir: &Path) -> DownloadResult {
        let path: PathBuf = dir.join("IU - Blueming.mp3");
        std::fs::write(&path, [0xFFu8, 0xFB, 0x90, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
        DownloadResult {
            local_path: path,
            format: AudioFormat::Mp3,
            bitrate_kbps: 192,
        }
    }

    #[test]
    fn test_tags_with_artwork() {
        let dir = tempfile::tempdir().unwrap();
        let result = fake_mp3(dir.path());

        let outcome = tag_download(
            &Artwork(Some(PNG.to_vec())),
            &result,
            &track(Some("https://i.scdn.co/cover.png")),
        )
        .unwrap();
        assert!(outcome.with_artwork);

        let tag = Tag::read_from_path(&result.local_path).unwrap();
        assert_eq!(tag.title(), Some("Blueming"));
        assert_eq!(tag.artist(), Some("IU"));
        assert_eq!(tag.album(), Some("Love poem"));
        assert_eq!(tag.track(), Some(3));
        assert_eq!(tag.year(), Some(2019));
        let picture = tag.pictures().next().unwrap();
        assert_eq!(picture.mime_type, "image/png");
        assert_eq!(picture.data, PNG);
    }

    #[test]
    fn test_missing_cover_url_tags_without_artwork() {
        let dir = tempfile::tempdir().unwrap();
        let result = fake_mp3(dir.path());

        let outcome = tag_download(&Artwork(Some(PNG.to_vec())), &result, &track(None)).unwrap();
        assert!(!outcome.with_artwork);

        let tag = Tag::read_from_path(&result.local_path).unwrap();
        assert_eq!(tag.title(), Some("Blueming"));
        assert_eq!(tag.pictures().count(), 0);
    }

    #[test]
    fn test_failed_cover_download_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let result = fake_mp3(dir.path());

        let outcome = tag_download(&Artwork(None), &result, &track(Some("https://x/y.jpg"))).unwrap();
        assert!(!outcome.with_artwork);
        assert_eq!(
            Tag::read_from_path(&result.local_path).unwrap().artist(),
            Some("IU")
        );
    }

    #[test]
    fn test_read_tags_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let result = fake_mp3(dir.path());
        assert!(read_tags(&result.local_path).unwrap().is_none());

        write_tags(&result.local_path, &track(None), None).unwrap();
        let existing = read_tags(&result.local_path).unwrap().unwrap();
        assert_eq!(existing.title.as_deref(), Some("Blueming"));
        assert_eq!(existing.artist.as_deref(), Some("IU"));
    }

    #[test]
    fn test_detect_mime_type() {
        assert_eq!(detect_mime_type(PNG), "image/png");
        assert_eq!(detect_mime_type(&[0xFF, 0xD8, 0xFF]), "image/jpeg");
    }
}
