use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, warn};

use crate::core::process;
use crate::core::renamer::Reservation;
use crate::core::retry::RetryPolicy;
use crate::error::DownloadError;
use crate::models::{AudioFormat, DownloadResult, MatchCandidate};
use crate::sources::VideoSource;

/// 작업용 임시 디렉토리 접두사. 스캐너는 `.`으로 시작하는 디렉토리를 건너뛴다.
pub const SCRATCH_PREFIX: &str = ".likedl-";

/// 내려받은 음원을 목표 형식으로 변환하는 외부 도구.
pub trait Transcoder: Send + Sync {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: AudioFormat,
        bitrate_kbps: u32,
    ) -> Result<(), DownloadError>;
}

pub struct Ffmpeg {
    path: PathBuf,
}

impl Ffmpeg {
    /// `FFMPEG_PATH` 또는 PATH에서 ffmpeg를 찾는다.
    pub fn locate() -> Result<Self, DownloadError> {
        process::find_executable("FFMPEG_PATH", "ffmpeg")
            .map(|path| Self { path })
            .ok_or(DownloadError::ToolNotFound("ffmpeg"))
    }
}

impl Transcoder for Ffmpeg {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        format: AudioFormat,
        bitrate_kbps: u32,
    ) -> Result<(), DownloadError> {
        let mut cmd = Command::new(&self.path);
        cmd.args(["-hide_banner", "-loglevel", "error", "-nostdin", "-y", "-i"])
            .arg(input)
            // 원본 동영상의 메타데이터와 썸네일 스트림은 버리고 태그는 따로 기록한다.
            .args(["-vn", "-map_metadata", "-1", "-c:a", format.encoder(), "-b:a"])
            .arg(format!("{}k", bitrate_kbps))
            .arg(output);

        let output_status = process::run(cmd)?;
        if !output_status.status.success() {
            return Err(DownloadError::Transcode(process::stderr_tail(&output_status)));
        }
        Ok(())
    }
}

/// 매칭된 후보의 음원을 받아 변환하고 예약된 경로에 놓는다.
pub struct FetchWorker<'a> {
    source: &'a dyn VideoSource,
    transcoder: &'a dyn Transcoder,
    policy: RetryPolicy,
    format: AudioFormat,
    bitrate_kbps: u32,
    cancel: &'a AtomicBool,
}

impl<'a> FetchWorker<'a> {
    pub fn new(
        source: &'a dyn VideoSource,
        transcoder: &'a dyn Transcoder,
        policy: RetryPolicy,
        format: AudioFormat,
        bitrate_kbps: u32,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            source,
            transcoder,
            policy,
            format,
            bitrate_kbps,
            cancel,
        }
    }

    /// 음원을 받고 변환한다.
    ///
    /// 중간 파일은 모두 출력 디렉토리 안의 임시 디렉토리에 만들어지며, 성공·실패와 관계없이
    /// 함수가 끝날 때 지워진다. 예약된 경로에는 변환이 끝난 파일만 옮겨진다.
    pub fn fetch(
        &self,
        candidate: &MatchCandidate,
        reservation: &Reservation<'_>,
    ) -> Result<DownloadResult, DownloadError> {
        let dest = reservation.path();
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(parent)?;

        let raw = self.download_with_retry(&candidate.source_id, scratch.path())?;

        let encoded = scratch
            .path()
            .join(format!("encoded.{}", self.format.extension()));
        self.transcoder
            .transcode(&raw, &encoded, self.format, self.bitrate_kbps)?;
        if !encoded.is_file() {
            return Err(DownloadError::MissingOutput(encoded));
        }

        std::fs::rename(&encoded, dest)?;
        debug!(source_id = %candidate.source_id, dest = %dest.display(), "audio stored");

        Ok(DownloadResult {
            local_path: dest.to_path_buf(),
            format: self.format,
            bitrate_kbps: self.bitrate_kbps,
        })
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// 실행이 취소되면 더 이상 다시 시도하지 않고 마지막 오류를 반환한다.
    fn download_with_retry(&self, source_id: &str, work_dir: &Path) -> Result<PathBuf, DownloadError> {
        let mut attempt = 1;
        loop {
            match self.source.download_audio(source_id, work_dir) {
                Ok(path) => return Ok(path),
                Err(e)
                    if e.is_transient()
                        && self.policy.has_attempts_left(attempt)
                        && !self.cancelled() =>
                {
                    let delay = self.policy.delay_after(attempt, None);
                    warn!(source_id, attempt, ?delay, error = %e, "download failed, retrying");
                    clear_dir(work_dir)?;
                    thread::sleep(delay);
                    if self.cancelled() {
                        debug!(source_id, "run cancelled, not retrying download");
                        return Err(e);
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 실패한 시도가 남긴 조각 파일을 지운다.
fn clear_dir(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(())
}
