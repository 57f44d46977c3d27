use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// 좋아요 표시한 곡 하나의 메타데이터. 라이브러리 조회 결과로 생성되며 이후 변경되지 않는다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub title: String,
    pub artists: Vec<String>,
    pub album: String,
    pub duration_ms: u64,
    pub cover_art_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spotify_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album_artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    /// Spotify 인기도 (0-100). 곡 목록 파일에만 쓰인다.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<u32>,
}

impl TrackRecord {
    /// 아티스트 목록을 `", "`로 연결한다.
    pub fn joined_artists(&self) -> String {
        self.artists.join(", ")
    }

    /// 검색어 및 보고서에 쓰이는 `"{artists} - {title}"` 형식.
    pub fn summary(&self) -> String {
        format!("{} - {}", self.joined_artists(), self.title)
    }
}

/// 동영상 검색 결과 하나에 점수를 매긴 후보.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub source_id: String,
    pub title: String,
    pub duration_ms: u64,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
        }
    }

    /// ffmpeg `-c:a` 인코더 이름.
    pub fn encoder(self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "libmp3lame",
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// 다운로드와 변환이 끝난 최종 파일.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadResult {
    pub local_path: PathBuf,
    pub format: AudioFormat,
    pub bitrate_kbps: u32,
}

impl DownloadResult {
    pub fn filename(&self) -> &str {
        self.local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("알 수 없음")
    }
}

/// 곡 하나가 파이프라인에서 거치는 상태.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    Pending,
    Fetching,
    Matching,
    Downloading,
    Tagging,
    Done,
    Skipped,
    Unresolved,
    Failed,
}

impl fmt::Display for TrackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TrackState::Pending => "pending",
            TrackState::Fetching => "fetching",
            TrackState::Matching => "matching",
            TrackState::Downloading => "downloading",
            TrackState::Tagging => "tagging",
            TrackState::Done => "done",
            TrackState::Skipped => "skipped",
            TrackState::Unresolved => "unresolved",
            TrackState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 곡 하나의 최종 결과. 곡 단위 오류는 모두 이 값으로 변환되어 실행 컨트롤러로 올라온다.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackOutcome {
    Done {
        result: DownloadResult,
        /// 태그 기록이 불완전했다면 그 사유.
        tag_warning: Option<String>,
    },
    Skipped {
        existing: PathBuf,
    },
    Unresolved,
    Failed {
        stage: TrackState,
        reason: String,
    },
}

impl TrackOutcome {
    pub fn state(&self) -> TrackState {
        match self {
            TrackOutcome::Done { .. } => TrackState::Done,
            TrackOutcome::Skipped { .. } => TrackState::Skipped,
            TrackOutcome::Unresolved => TrackState::Unresolved,
            TrackOutcome::Failed { .. } => TrackState::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TrackOutcome::Done { .. } | TrackOutcome::Skipped { .. })
    }
}

/// 출력 디렉토리에 이미 존재하는 음원 파일.
#[derive(Debug, Clone)]
pub struct ExistingTrack {
    pub path: PathBuf,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub has_tags: bool,
}
