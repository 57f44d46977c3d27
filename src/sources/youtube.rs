use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use crate::core::process;
use crate::error::{DownloadError, ResolveError};
use crate::sources::{VideoEntry, VideoSource};

/// 내려받은 원본 음원 파일의 이름 (확장자 제외).
const SOURCE_STEM: &str = "source";

/// `yt-dlp` 실행 파일을 통한 YouTube 검색 및 음원 추출.
pub struct YtDlp {
    path: PathBuf,
}

#[derive(Deserialize)]
struct SearchLine {
    id: String,
    title: Option<String>,
    channel: Option<String>,
    uploader: Option<String>,
    duration: Option<f64>,
}

impl YtDlp {
    /// `YT_DLP_PATH` 또는 PATH에서 yt-dlp를 찾는다.
    pub fn locate() -> Result<Self, DownloadError> {
        process::find_executable("YT_DLP_PATH", "yt-dlp")
            .map(|path| Self { path })
            .ok_or(DownloadError::ToolNotFound("yt-dlp"))
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.path);
        cmd.args(["--ignore-config", "--no-warnings"]);
        cmd
    }
}

fn watch_url(id: &str) -> String {
    format!("https://www.youtube.com/watch?v={}", id)
}

/// `--dump-json` 출력(한 줄에 JSON 하나)을 검색 결과 목록으로 변환한다.
pub fn parse_search_output(stdout: &str) -> Result<Vec<VideoEntry>, serde_json::Error> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let entry: SearchLine = serde_json::from_str(line)?;
            Ok(VideoEntry {
                title: entry.title.unwrap_or_default(),
                channel: entry.channel.or(entry.uploader),
                duration_ms: entry
                    .duration
                    .filter(|d| d.is_finite() && *d > 0.0)
                    .map(|d| (d * 1000.0).round() as u64),
                id: entry.id,
            })
        })
        .collect()
}

/// `work_dir`에서 `source.*` 파일을 찾는다.
fn find_source_file(work_dir: &Path) -> std::io::Result<Option<PathBuf>> {
    for entry in std::fs::read_dir(work_dir)? {
        let path = entry?.path();
        let is_source = path.file_stem().and_then(|s| s.to_str()) == Some(SOURCE_STEM);
        if is_source && path.is_file() {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

impl VideoSource for YtDlp {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoEntry>, ResolveError> {
        let mut cmd = self.command();
        cmd.args(["--flat-playlist", "--dump-json"])
            .arg(format!("ytsearch{}:{}", limit.max(1), query));

        let output = process::run(cmd)?;
        if !output.status.success() {
            return Err(ResolveError::Tool {
                tool: "yt-dlp",
                status: output.status.to_string(),
                stderr: process::stderr_tail(&output),
            });
        }

        let entries = parse_search_output(&String::from_utf8_lossy(&output.stdout))?;
        debug!(query, results = entries.len(), "search complete");
        Ok(entries)
    }

    fn download_audio(&self, source_id: &str, work_dir: &Path) -> Result<PathBuf, DownloadError> {
        let template = work_dir.join(format!("{}.%(ext)s", SOURCE_STEM));
        let mut cmd = self.command();
        cmd.args([
            "--quiet",
            "--no-playlist",
            "--no-part",
            "--force-overwrites",
            "-f",
            "bestaudio/best",
            "-o",
        ])
        .arg(&template)
        .arg(watch_url(source_id));

        let output = process::run(cmd)?;
        if !output.status.success() {
            return Err(DownloadError::Source(process::stderr_tail(&output)));
        }

        find_source_file(work_dir)?.ok_or_else(|| DownloadError::MissingOutput(template))
    }
}
