pub mod spotify;
pub mod youtube;

use std::path::{Path, PathBuf};

use crate::error::{DownloadError, FetchError, ResolveError};
use crate::models::TrackRecord;

/// 좋아요 목록의 한 페이지.
#[derive(Debug, Clone, Default)]
pub struct TrackPage {
    pub tracks: Vec<TrackRecord>,
    /// 다음 페이지의 offset. 마지막 페이지면 None.
    pub next_offset: Option<u32>,
    pub total: u32,
}

/// 음악 스트리밍 서비스의 사용자 라이브러리.
/// 세션은 호출마다 참조로 전달되며 여러 작업 스레드가 공유한다.
pub trait LibrarySource: Send + Sync {
    /// `offset`부터 최대 `limit`개의 좋아요 곡을 가져온다.
    fn saved_tracks(&self, offset: u32, limit: u32) -> Result<TrackPage, FetchError>;
    /// 앨범 아트 이미지를 다운로드한다.
    fn fetch_album_art(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// 동영상 검색 결과 한 건 (점수 매기기 전).
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEntry {
    pub id: String,
    pub title: String,
    pub channel: Option<String>,
    pub duration_ms: Option<u64>,
}

/// 동영상 공유 플랫폼의 검색 및 음원 추출 기능.
pub trait VideoSource: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoEntry>, ResolveError>;
    /// 음원 스트림을 `work_dir` 안에 내려받고 그 파일 경로를 반환한다.
    fn download_audio(&self, source_id: &str, work_dir: &Path) -> Result<PathBuf, DownloadError>;
}
