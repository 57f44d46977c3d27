use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// 인증 실패. 실행 전체를 중단시킨다.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Spotify {0}가 설정되지 않았습니다. 'likedl config'를 실행하거나 환경 변수를 지정하세요")]
    MissingCredential(&'static str),
    #[error("저장된 refresh token이 없습니다. 먼저 'likedl login'을 실행하세요")]
    NotLoggedIn,
    #[error("리다이렉트 URL에서 인증 코드를 찾을 수 없습니다: {0}")]
    MissingCode(String),
    #[error("Spotify 인증 서버가 요청을 거부했습니다 (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Spotify 인증 서버 연결에 실패했습니다")]
    Http(#[from] reqwest::Error),
}

/// 좋아요 목록 한 페이지 조회 실패.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("요청 한도를 초과했습니다")]
    RateLimited { retry_after: Option<Duration> },
    #[error("일시적인 오류가 발생했습니다: {0}")]
    Transient(String),
    #[error("Spotify API가 HTTP {status}을(를) 반환했습니다")]
    Status { status: u16 },
    #[error(transparent)]
    Auth(AuthError),
    #[error("Spotify 응답 파싱에 실패했습니다: {0}")]
    Decode(String),
    #[error("offset {offset} 페이지를 {attempts}회 시도했지만 가져오지 못했습니다: {last}")]
    Exhausted {
        offset: u32,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl FetchError {
    /// 같은 페이지를 다시 요청할 가치가 있는 오류인지 여부.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::RateLimited { .. } | FetchError::Transient(_))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<AuthError> for FetchError {
    /// 토큰 갱신 중 연결 오류는 다시 시도할 수 있다. 나머지 인증 오류는 그대로 전달한다.
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Http(e) => FetchError::Transient(format!("토큰 갱신 연결 실패: {e}")),
            other => FetchError::Auth(other),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Transient(e.to_string())
        }
    }
}

/// 동영상 검색 실패. "일치 항목 없음"은 오류가 아니라 `Resolution::Unresolved`로 표현된다.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("{tool} 실행에 실패했습니다 ({status}): {stderr}")]
    Tool {
        tool: &'static str,
        status: String,
        stderr: String,
    },
    #[error("검색 결과 파싱에 실패했습니다: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("{0}을(를) 찾을 수 없습니다. PATH에 설치하거나 경로 환경 변수를 지정하세요")]
    ToolNotFound(&'static str),
    #[error("음원 다운로드에 실패했습니다: {0}")]
    Source(String),
    #[error("ffmpeg 변환에 실패했습니다: {0}")]
    Transcode(String),
    #[error("예상한 출력 파일이 없습니다: {}", .0.display())]
    MissingOutput(PathBuf),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DownloadError {
    /// 네트워크 등 일시적 원인으로 볼 수 있어 다시 시도할 오류인지 여부.
    pub fn is_transient(&self) -> bool {
        matches!(self, DownloadError::Source(_))
    }
}

/// 태그 기록 실패. 곡은 완료로 처리되며 경고만 남는다.
#[derive(Debug, Error)]
pub enum TagError {
    #[error("ID3 태그 기록에 실패했습니다: {0}")]
    Write(#[from] id3::Error),
}
