use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::Context;

use tracing::{debug, info, warn};

use crate::core::retry::RetryPolicy;
use crate::error::FetchError;
use crate::models::TrackRecord;
use crate::sources::{LibrarySource, TrackPage};

/// Spotify가 허용하는 최대 페이지 크기.
pub const PAGE_SIZE: u32 = 50;

/// 좋아요 목록을 페이지 단위로 지연 조회하는 반복자.
///
/// 페이지 요청이 재시도 끝에 실패하면 오류 하나를 내보내고 끝난다.
/// 이어서 받으려면 [`LikedTracks::pending_offset`] 값으로 [`LikedTracks::starting_at`]을 호출한다.
pub struct LikedTracks<'a> {
    source: &'a dyn LibrarySource,
    policy: RetryPolicy,
    buffer: VecDeque<TrackRecord>,
    next_offset: Option<u32>,
    failed_offset: Option<u32>,
    total: Option<u32>,
}

impl<'a> LikedTracks<'a> {
    pub fn new(source: &'a dyn LibrarySource, policy: RetryPolicy) -> Self {
        Self::starting_at(source, policy, 0)
    }

    pub fn starting_at(source: &'a dyn LibrarySource, policy: RetryPolicy, offset: u32) -> Self {
        Self {
            source,
            policy,
            buffer: VecDeque::new(),
            next_offset: Some(offset),
            failed_offset: None,
            total: None,
        }
    }

    /// 서버가 알려준 전체 곡 수. 첫 페이지를 받기 전에는 None.
    pub fn total(&self) -> Option<u32> {
        self.total
    }

    /// 아직 받지 못한 페이지의 offset. 실패한 페이지가 있으면 그 위치다.
    pub fn pending_offset(&self) -> Option<u32> {
        self.failed_offset.or(self.next_offset)
    }

    fn fetch_page(&self, offset: u32) -> Result<TrackPage, FetchError> {
        let mut attempt = 1;
        loop {
            match self.source.saved_tracks(offset, PAGE_SIZE) {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && self.policy.has_attempts_left(attempt) => {
                    let delay = self.policy.delay_after(attempt, e.retry_after());
                    warn!(offset, attempt, ?delay, error = %e, "page request failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) if e.is_retryable() => {
                    return Err(FetchError::Exhausted {
                        offset,
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Iterator for LikedTracks<'_> {
    type Item = Result<TrackRecord, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(track) = self.buffer.pop_front() {
                return Some(Ok(track));
            }

            let offset = self.next_offset?;
            match self.fetch_page(offset) {
                Ok(page) => {
                    debug!(offset, count = page.tracks.len(), total = page.total, "page fetched");
                    self.total = Some(page.total);
                    // offset이 앞으로 가지 않는 응답은 무한 반복을 막기 위해 마지막 페이지로 본다.
                    self.next_offset = page.next_offset.filter(|next| *next > offset);
                    self.buffer.extend(page.tracks);
                }
                Err(e) => {
                    self.next_offset = None;
                    self.failed_offset = Some(offset);
                    return Some(Err(e));
                }
            }
        }
    }
}

/// 전체 좋아요 목록.
#[derive(Debug, Default)]
pub struct Library {
    pub tracks: Vec<TrackRecord>,
    /// 중간 페이지를 받지 못해 목록이 잘렸으면 그 오류.
    pub truncated_by: Option<FetchError>,
}

/// 좋아요 목록을 끝까지(또는 `limit`개까지) 모은다.
///
/// 한 곡도 받지 못한 채 실패하면 목록 자체를 가져올 수 없는 것이므로 오류를 반환한다.
/// 일부를 받은 뒤의 실패는 경고로 남기고 받은 만큼으로 진행한다.
pub fn collect_library(
    source: &dyn LibrarySource,
    policy: RetryPolicy,
    limit: Option<usize>,
) -> Result<Library, FetchError> {
    let mut library = Library::default();
    let limit = limit.unwrap_or(usize::MAX);

    let mut liked = LikedTracks::new(source, policy);
    for item in liked.by_ref().take(limit) {
        match item {
            Ok(track) => library.tracks.push(track),
            Err(e) if library.tracks.is_empty() => return Err(e),
            Err(e) => library.truncated_by = Some(e),
        }
    }

    if let Some(e) = &library.truncated_by {
        warn!(
            fetched = library.tracks.len(),
            resume_offset = ?liked.pending_offset(),
            error = %e,
            "library listing truncated"
        );
    }
    info!(count = library.tracks.len(), total = ?liked.total(), "library fetched");
    Ok(library)
}

pub const PLAYLIST_INFO_FILE: &str = "playlist_info.json";

/// 받은 목록을 출력 디렉토리에 JSON으로 남긴다.
pub fn save_playlist_info(dir: &Path, tracks: &[TrackRecord]) -> anyhow::Result<PathBuf> {
    let path = dir.join(PLAYLIST_INFO_FILE);
    let json = serde_json::to_string_pretty(tracks)?;
    std::fs::write(&path, json)
        .with_context(|| format!("목록 파일을 저장할 수 없습니다: {}", path.display()))?;
    Ok(path)
}
