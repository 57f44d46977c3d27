use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;

use tracing::{debug, info, warn};

use crate::config::DownloadConfig;
use crate::core::matcher::{MatchResolver, MatchSettings, Resolution};
use crate::core::renamer::OutputNamer;
use crate::core::retry::RetryPolicy;
use crate::core::scanner::ExistingIndex;
use crate::core::tagger;
use crate::core::transcoder::{FetchWorker, Transcoder};
use crate::models::{AudioFormat, TrackOutcome, TrackRecord, TrackState};
use crate::sources::{LibrarySource, VideoSource};

/// 처리한 곡이 있는데 하나도 성공하지 못했을 때의 종료 코드.
pub const EXIT_NOTHING_SUCCEEDED: i32 = 2;

/// 파이프라인이 사용하는 외부 서비스들. 실행 동안 모든 작업 스레드가 공유한다.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub library: &'a dyn LibrarySource,
    pub video: &'a dyn VideoSource,
    pub transcoder: &'a dyn Transcoder,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub output_dir: PathBuf,
    pub format: AudioFormat,
    pub bitrate_kbps: u32,
    pub workers: usize,
    pub overwrite: bool,
    pub matching: MatchSettings,
    pub retry: RetryPolicy,
}

impl RunOptions {
    pub fn from_config(cfg: &DownloadConfig, overwrite: bool) -> Self {
        Self {
            output_dir: cfg.output_dir.clone(),
            format: AudioFormat::Mp3,
            bitrate_kbps: cfg.bitrate_kbps,
            workers: cfg.worker_count(),
            overwrite,
            matching: MatchSettings::from(cfg),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackReport {
    pub track: TrackRecord,
    pub outcome: TrackOutcome,
}

/// 실행 결과 요약. 보고서는 라이브러리 순서를 따른다.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<TrackReport>,
    /// 취소되어 시작하지 못한 곡.
    pub cancelled: Vec<TrackRecord>,
}

impl RunSummary {
    fn count(&self, state: TrackState) -> usize {
        self.reports
            .iter()
            .filter(|r| r.outcome.state() == state)
            .count()
    }

    pub fn done(&self) -> usize {
        self.count(TrackState::Done)
    }

    pub fn skipped(&self) -> usize {
        self.count(TrackState::Skipped)
    }

    pub fn unresolved(&self) -> usize {
        self.count(TrackState::Unresolved)
    }

    pub fn failed(&self) -> usize {
        self.count(TrackState::Failed)
    }

    pub fn with_state(&self, state: TrackState) -> impl Iterator<Item = &TrackReport> {
        self.reports
            .iter()
            .filter(move |r| r.outcome.state() == state)
    }

    /// 한 곡이라도 완료(또는 이미 존재)했거나 처리할 곡이 없었으면 0.
    pub fn exit_code(&self) -> i32 {
        let total = self.reports.len() + self.cancelled.len();
        if total == 0 || self.reports.iter().any(|r| r.outcome.is_success()) {
            0
        } else {
            EXIT_NOTHING_SUCCEEDED
        }
    }
}

/// 곡 하나의 상태 전이를 기록한다.
struct Progress<'t> {
    track: &'t TrackRecord,
    state: TrackState,
}

impl<'t> Progress<'t> {
    fn new(track: &'t TrackRecord) -> Self {
        Self {
            track,
            state: TrackState::Pending,
        }
    }

    fn advance(&mut self, next: TrackState) {
        debug!(track = %self.track.summary(), from = %self.state, to = %next, "state transition");
        self.state = next;
    }

    fn finish(mut self, outcome: TrackOutcome) -> TrackOutcome {
        self.advance(outcome.state());
        outcome
    }

    fn fail(self, reason: impl ToString) -> TrackOutcome {
        let stage = self.state;
        self.finish(TrackOutcome::Failed {
            stage,
            reason: reason.to_string(),
        })
    }
}

/// 곡마다 매칭 → 다운로드 → 태그 순서를 진행하고 결과를 모으는 실행 컨트롤러.
pub struct RunController<'a> {
    services: Services<'a>,
    options: RunOptions,
    existing: ExistingIndex,
    namer: OutputNamer,
    cancel: &'a AtomicBool,
}

impl<'a> RunController<'a> {
    pub fn new(
        services: Services<'a>,
        options: RunOptions,
        existing: ExistingIndex,
        cancel: &'a AtomicBool,
    ) -> Self {
        let namer = OutputNamer::new(&options.output_dir, options.format, options.overwrite);
        Self {
            services,
            options,
            existing,
            namer,
            cancel,
        }
    }

    /// 모든 곡을 처리한다. 곡 단위 실패는 결과로 기록될 뿐 실행을 멈추지 않는다.
    /// 취소되면 새 곡은 시작하지 않고, 진행 중인 곡은 끝까지 처리한다.
    pub fn run<F>(&self, tracks: &[TrackRecord], on_finish: F) -> RunSummary
    where
        F: Fn(usize, &TrackReport) + Sync,
    {
        let workers = self.options.workers.clamp(1, tracks.len().max(1));
        info!(tracks = tracks.len(), workers, "starting run");

        let cursor = AtomicUsize::new(0);
        let finished: Mutex<Vec<(usize, TrackReport)>> = Mutex::new(Vec::with_capacity(tracks.len()));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if self.cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    let index = cursor.fetch_add(1, Ordering::SeqCst);
                    let Some(track) = tracks.get(index) else {
                        break;
                    };

                    let report = TrackReport {
                        track: track.clone(),
                        outcome: self.process(track),
                    };
                    on_finish(index, &report);
                    finished
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push((index, report));
                });
            }
        });

        let mut finished = finished.into_inner().unwrap_or_else(|e| e.into_inner());
        finished.sort_by_key(|(index, _)| *index);

        let mut summary = RunSummary::default();
        let mut next = 0;
        for (index, report) in finished {
            summary.cancelled.extend(tracks[next..index].iter().cloned());
            summary.reports.push(report);
            next = index + 1;
        }
        summary
            .cancelled
            .extend(tracks[next.min(tracks.len())..].iter().cloned());

        if !summary.cancelled.is_empty() {
            warn!(cancelled = summary.cancelled.len(), "run cancelled before all tracks started");
        }
        summary
    }

    /// 곡 하나를 끝 상태까지 진행한다.
    pub fn process(&self, track: &TrackRecord) -> TrackOutcome {
        let mut progress = Progress::new(track);

        if !self.options.overwrite {
            if let Some(existing) = self.existing.find(track) {
                return progress.finish(TrackOutcome::Skipped {
                    existing: existing.to_path_buf(),
                });
            }
        }

        progress.advance(TrackState::Fetching);
        progress.advance(TrackState::Matching);
        let resolver = MatchResolver::new(self.services.video, self.options.matching);
        let candidate = match resolver.resolve(track) {
            Ok(Resolution::Matched(candidate)) => candidate,
            Ok(Resolution::Unresolved { .. }) => return progress.finish(TrackOutcome::Unresolved),
            Err(e) => return progress.fail(e),
        };

        progress.advance(TrackState::Downloading);
        let worker = FetchWorker::new(
            self.services.video,
            self.services.transcoder,
            self.options.retry,
            self.options.format,
            self.options.bitrate_kbps,
            self.cancel,
        );
        let reservation = self.namer.reserve(track);
        let result = match worker.fetch(&candidate, &reservation) {
            Ok(result) => result,
            Err(e) => return progress.fail(e),
        };
        reservation.commit();

        progress.advance(TrackState::Tagging);
        let tag_warning = match tagger::tag_download(self.services.library, &result, track) {
            Ok(_) => None,
            Err(e) => {
                warn!(path = %result.local_path.display(), error = %e, "tagging failed");
                Some(e.to_string())
            }
        };

        progress.finish(TrackOutcome::Done {
            result,
            tag_warning,
        })
    }
}
