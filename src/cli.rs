use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use comfy_table::{Cell, Table};
use dialoguer::{Confirm, Input};
use tracing::warn;

use crate::config::{self, Config, SpotifyConfig};
use crate::core::library::{self, collect_library};
use crate::core::retry::RetryPolicy;
use crate::core::runner::{RunController, RunOptions, RunSummary, Services, TrackReport};
use crate::core::scanner::{self, ExistingIndex};
use crate::core::transcoder::Ffmpeg;
use crate::error::AuthError;
use crate::models::{TrackOutcome, TrackState};
use crate::sources::spotify::{self, SpotifySession};
use crate::sources::youtube::YtDlp;

#[derive(Parser)]
#[command(
    name = "likedl",
    version,
    about = "Spotify 좋아요 곡을 YouTube에서 찾아 태그된 MP3로 내려받는 도구"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub credentials: CredentialArgs,

    /// 로그를 자세히 출력 (-v: info, -vv: debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Args)]
pub struct CredentialArgs {
    /// Spotify 앱 Client ID
    #[arg(long, env = "SPOTIFY_CLIENT_ID", global = true, hide_env_values = true)]
    pub client_id: Option<String>,

    /// Spotify 앱 Client Secret
    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", global = true, hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Spotify 앱에 등록한 Redirect URI
    #[arg(long, env = "SPOTIFY_REDIRECT_URI", global = true)]
    pub redirect_uri: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 좋아요 곡을 내려받아 태그를 기록
    Download {
        /// 저장할 디렉토리
        #[arg(short, long, env = "LIKEDL_OUTPUT_DIR")]
        output_dir: Option<PathBuf>,
        /// MP3 비트레이트 (kbps)
        #[arg(long)]
        bitrate: Option<u32>,
        /// 동시에 처리할 곡 수 (1-8)
        #[arg(long)]
        workers: Option<usize>,
        /// 최근 좋아요 곡 N개만 처리
        #[arg(long)]
        limit: Option<usize>,
        /// 확인 없이 바로 다운로드
        #[arg(short, long)]
        yes: bool,
        /// 이미 있는 파일을 건너뛰지 않고 덮어쓰기
        #[arg(long)]
        overwrite: bool,
        /// playlist_info.json을 저장하지 않음
        #[arg(long)]
        no_playlist_info: bool,
    },
    /// Spotify 계정 인증 (refresh token 저장)
    Login,
    /// Spotify 자격증명 설정
    Config,
}

/// 명령을 실행하고 프로세스 종료 코드를 반환한다.
///
/// 명령줄과 환경 변수 값은 이번 실행에만 쓰인다. 설정 파일에는 디스크에서 읽은 내용에 refresh token만 더해 기록된다.
pub fn run(cli: Cli) -> Result<i32> {
    let mut stored = config::load_config();
    let mut cfg = effective_config(&stored, cli.credentials);

    match cli.command {
        Commands::Download {
            output_dir,
            bitrate,
            workers,
            limit,
            yes,
            overwrite,
            no_playlist_info,
        } => {
            if let Some(dir) = output_dir {
                cfg.download.output_dir = dir;
            }
            if let Some(bitrate) = bitrate {
                cfg.download.bitrate_kbps = bitrate;
            }
            if let Some(workers) = workers {
                cfg.download.workers = workers;
            }
            let opts = DownloadOpts {
                limit,
                yes,
                overwrite,
                save_playlist_info: !no_playlist_info,
            };
            cmd_download(&cfg, &mut stored, &opts)
        }
        Commands::Login => {
            cmd_login(&cfg.spotify, &mut stored)?;
            Ok(0)
        }
        Commands::Config => {
            cmd_config(&mut stored)?;
            Ok(0)
        }
    }
}

fn effective_config(stored: &Config, credentials: CredentialArgs) -> Config {
    let mut cfg = stored.clone();
    cfg.spotify.overlay(
        credentials.client_id,
        credentials.client_secret,
        credentials.redirect_uri,
    );
    cfg
}

struct DownloadOpts {
    limit: Option<usize>,
    yes: bool,
    overwrite: bool,
    save_playlist_info: bool,
}

fn cmd_download(cfg: &Config, stored: &mut Config, opts: &DownloadOpts) -> Result<i32> {
    let yt_dlp = YtDlp::locate()?;
    let ffmpeg = Ffmpeg::locate()?;

    let session = open_session(&cfg.spotify, stored)?;

    println!("Spotify에서 좋아요 목록을 가져오는 중...");
    let fetched = collect_library(&session, RetryPolicy::default(), opts.limit)
        .context("좋아요 목록을 가져오지 못했습니다")?;
    remember_refresh_token(stored, &session);

    if let Some(e) = &fetched.truncated_by {
        println!("경고: 목록 일부만 가져왔습니다 ({})", e);
    }
    let tracks = fetched.tracks;
    if tracks.is_empty() {
        println!("좋아요 표시한 곡이 없습니다.");
        return Ok(0);
    }
    println!("좋아요 곡 {}개를 찾았습니다.", tracks.len());

    let output_dir = cfg.download.output_dir.clone();
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("출력 디렉토리를 만들 수 없습니다: {}", output_dir.display()))?;

    if opts.save_playlist_info {
        let path = library::save_playlist_info(&output_dir, &tracks)?;
        println!("곡 목록을 저장했습니다: {}", path.display());
    }

    if !opts.yes {
        let proceed = Confirm::new()
            .with_prompt(format!("{}곡을 모두 다운로드할까요?", tracks.len()))
            .default(true)
            .interact()?;
        if !proceed {
            println!("다운로드를 취소했습니다.");
            return Ok(0);
        }
    }

    let existing = ExistingIndex::from_files(&scanner::scan_directory(&output_dir)?);
    if !existing.is_empty() {
        println!("출력 디렉토리에서 기존 곡 {}개를 확인했습니다.", existing.len());
    }

    let cancel = Arc::new(AtomicBool::new(false));
    install_interrupt_handler(Arc::clone(&cancel));

    let services = Services {
        library: &session,
        video: &yt_dlp,
        transcoder: &ffmpeg,
    };
    let options = RunOptions::from_config(&cfg.download, opts.overwrite);
    println!(
        "\n{}곡 다운로드 시작 (작업 {}개, {}kbps)",
        tracks.len(),
        options.workers,
        options.bitrate_kbps
    );
    println!("저장 위치: {}", display_dir(&output_dir));
    println!("{}", "-".repeat(50));

    let controller = RunController::new(services, options, existing, &cancel);
    let total = tracks.len();
    let summary = controller.run(&tracks, |index, report| print_progress(index, total, report));

    print_summary(&summary, &output_dir);
    remember_refresh_token(stored, &session);
    Ok(summary.exit_code())
}

/// 저장된 refresh token으로 세션을 열고, 없으면 대화형 인증을 진행한다.
fn open_session(spotify: &SpotifyConfig, stored: &mut Config) -> Result<SpotifySession> {
    match SpotifySession::new(spotify) {
        Ok(session) => Ok(session),
        Err(AuthError::NotLoggedIn) => {
            println!("저장된 Spotify 인증 정보가 없습니다. 먼저 인증을 진행합니다.\n");
            cmd_login(spotify, stored)
        }
        Err(e) => Err(e).context("Spotify 인증에 실패했습니다. 'likedl login'으로 다시 인증하세요."),
    }
}

/// Spotify가 refresh token을 새로 발급했으면 설정 파일에 반영한다.
fn remember_refresh_token(stored: &mut Config, session: &SpotifySession) {
    if let Err(e) = store_refresh_token(stored, session.refresh_token()) {
        warn!(error = ?e, "could not persist rotated refresh token");
    }
}

fn store_refresh_token(stored: &mut Config, token: String) -> Result<()> {
    if apply_refresh_token(stored, token) {
        config::save_config(stored)?;
    }
    Ok(())
}

/// 토큰이 바뀌었으면 `true`. 자격증명 필드는 건드리지 않는다.
fn apply_refresh_token(stored: &mut Config, token: String) -> bool {
    if stored.spotify.refresh_token.as_deref() == Some(token.as_str()) {
        return false;
    }
    stored.spotify.refresh_token = Some(token);
    true
}

fn install_interrupt_handler(cancel: Arc<AtomicBool>) {
    let result = ctrlc::set_handler(move || {
        if !cancel.swap(true, Ordering::SeqCst) {
            eprintln!("\n중단 요청을 받았습니다. 진행 중인 곡만 마치고 종료합니다...");
        }
    });
    if let Err(e) = result {
        warn!(error = %e, "could not install Ctrl-C handler");
    }
}

fn display_dir(dir: &Path) -> String {
    std::fs::canonicalize(dir)
        .unwrap_or_else(|_| dir.to_path_buf())
        .display()
        .to_string()
}

fn print_progress(index: usize, total: usize, report: &TrackReport) {
    let name = report.track.summary();
    let line = match &report.outcome {
        TrackOutcome::Done {
            result,
            tag_warning: None,
        } => format!("완료: {} -> {}", name, result.filename()),
        TrackOutcome::Done {
            result,
            tag_warning: Some(w),
        } => format!("완료 (태그 불완전: {}): {} -> {}", w, name, result.filename()),
        TrackOutcome::Skipped { existing } => format!(
            "건너뜀 (이미 있음: {}): {}",
            existing.file_name().unwrap_or_default().to_string_lossy(),
            name
        ),
        TrackOutcome::Unresolved => format!("찾지 못함: {}", name),
        TrackOutcome::Failed { stage, reason } => format!("실패 ({}): {}: {}", stage, name, reason),
    };
    println!("[{}/{}] {}", index + 1, total, line);
}

fn print_summary(summary: &RunSummary, output_dir: &Path) {
    println!("{}", "-".repeat(50));

    let mut table = Table::new();
    table.set_header(vec!["결과", "곡 수"]);
    table.add_row(vec![Cell::new("완료"), Cell::new(summary.done())]);
    table.add_row(vec![Cell::new("건너뜀 (이미 있음)"), Cell::new(summary.skipped())]);
    table.add_row(vec![Cell::new("찾지 못함"), Cell::new(summary.unresolved())]);
    table.add_row(vec![Cell::new("실패"), Cell::new(summary.failed())]);
    if !summary.cancelled.is_empty() {
        table.add_row(vec![Cell::new("취소됨"), Cell::new(summary.cancelled.len())]);
    }
    println!("{table}");

    let problems: Vec<&TrackReport> = summary
        .with_state(TrackState::Unresolved)
        .chain(summary.with_state(TrackState::Failed))
        .collect();
    if !problems.is_empty() {
        let mut table = Table::new();
        table.set_header(vec!["곡", "상태", "사유"]);
        for report in problems {
            let reason = match &report.outcome {
                TrackOutcome::Failed { reason, .. } => reason.as_str(),
                _ => "기준을 넘는 후보가 없습니다",
            };
            table.add_row(vec![
                Cell::new(report.track.summary()),
                Cell::new(report.outcome.state()),
                Cell::new(reason),
            ]);
        }
        println!("\n{table}");
    }

    println!("\n저장 위치: {}", display_dir(output_dir));
}

fn cmd_login(spotify: &SpotifyConfig, stored: &mut Config) -> Result<SpotifySession> {
    let url = spotify::authorize_url(spotify)?;

    println!("Spotify 계정 인증");
    println!("1. 아래 주소를 브라우저에서 열고 접근을 허용하세요:\n\n   {}\n", url);
    println!(
        "2. {} 로 이동한 주소 전체를 붙여넣으세요. (페이지가 열리지 않아도 괜찮습니다)\n",
        spotify.redirect_uri()
    );

    let pasted: String = Input::new()
        .with_prompt("리다이렉트된 주소")
        .interact_text()?;
    let code = spotify::extract_code(&pasted)?;

    let session = SpotifySession::from_authorization_code(spotify, &code)
        .context("인증 코드를 토큰으로 교환하지 못했습니다")?;

    store_refresh_token(stored, session.refresh_token())?;
    println!("\n인증 정보가 저장되었습니다!");
    Ok(session)
}

fn cmd_config(cfg: &mut Config) -> Result<()> {
    println!("Spotify API 설정");
    println!("(자격증명은 https://developer.spotify.com/dashboard 에서 발급받으세요)");
    println!(
        "(앱 설정의 Redirect URIs에 {} 를 추가하세요)\n",
        cfg.spotify.redirect_uri()
    );

    let current_id = cfg.spotify.client_id.clone().unwrap_or_default();
    let client_id: String = Input::new()
        .with_prompt("Client ID")
        .with_initial_text(current_id)
        .interact_text()?;

    let current_secret = cfg.spotify.client_secret.clone().unwrap_or_default();
    let client_secret: String = Input::new()
        .with_prompt("Client Secret")
        .with_initial_text(current_secret)
        .interact_text()?;

    let redirect_uri: String = Input::new()
        .with_prompt("Redirect URI")
        .with_initial_text(cfg.spotify.redirect_uri())
        .interact_text()?;

    let credentials_changed = cfg.spotify.client_id.as_deref() != Some(client_id.as_str());
    cfg.spotify = SpotifyConfig {
        client_id: Some(client_id),
        client_secret: Some(client_secret),
        redirect_uri: Some(redirect_uri),
        // 다른 앱의 refresh token은 쓸 수 없다.
        refresh_token: if credentials_changed {
            None
        } else {
            cfg.spotify.refresh_token.take()
        },
    };

    config::save_config(cfg)?;
    println!("\n설정이 저장되었습니다!");
    if cfg.spotify.refresh_token.is_none() {
        println!("이제 'likedl login'으로 계정을 인증하세요.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored_config() -> Config {
        let mut cfg = Config::default();
        cfg.spotify.client_id = Some("file-id".to_string());
        cfg.spotify.refresh_token = Some("old".to_string());
        cfg
    }

    #[test]
    fn test_refresh_token_does_not_persist_overlaid_secret() {
        let mut stored = stored_config();
        let effective = effective_config(
            &stored,
            CredentialArgs {
                client_id: None,
                client_secret: Some("env-secret".to_string()),
                redirect_uri: None,
            },
        );
        assert_eq!(effective.spotify.client_secret.as_deref(), Some("env-secret"));

        assert!(apply_refresh_token(&mut stored, "new".to_string()));

        assert_eq!(stored.spotify.refresh_token.as_deref(), Some("new"));
        assert_eq!(stored.spotify.client_id.as_deref(), Some("file-id"));
        assert_eq!(stored.spotify.client_secret, None);
        let written = toml::to_string_pretty(&stored).unwrap();
        assert!(!written.contains("env-secret"));
    }

    #[test]
    fn test_unchanged_refresh_token_is_not_rewritten() {
        let mut stored = stored_config();
        assert!(!apply_refresh_token(&mut stored, "old".to_string()));
    }

    #[test]
    fn test_download_flags_parse() {
        let cli = Cli::try_parse_from(["likedl", "download", "--yes", "--limit", "3", "--bitrate", "320"]).unwrap();
        match cli.command {
            Commands::Download { yes, limit, bitrate, overwrite, .. } => {
                assert!(yes);
                assert_eq!(limit, Some(3));
                assert_eq!(bitrate, Some(320));
                assert!(!overwrite);
            }
            _ => panic!("expected download"),
        }
    }
}
