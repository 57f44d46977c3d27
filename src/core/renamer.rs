use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::models::{AudioFormat, TrackRecord};

/// 대부분의 파일 시스템이 허용하는 파일명 길이(255바이트)에서 접미사와 확장자 몫을 뺀 값.
const MAX_STEM_BYTES: usize = 200;

/// 파일명에 사용할 수 없는 문자를 `_`로 치환한다.
pub fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c == '/' || c == '\0' || c.is_control() {
                return '_';
            }
            if cfg!(target_os = "windows") && matches!(c, '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|') {
                return '_';
            }
            if cfg!(target_os = "macos") && c == ':' {
                return '_';
            }
            c
        })
        .collect()
}

fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// TrackRecord에서 `"{artists} - {title}"` 형식의 파일명 줄기(확장자 제외)를 만든다.
pub fn build_stem(track: &TrackRecord) -> String {
    let title = track.title.trim();
    let artists = track.joined_artists();
    let artists = artists.trim();

    let raw = match (artists.is_empty(), title.is_empty()) {
        (false, false) => format!("{} - {}", artists, title),
        (true, false) => title.to_string(),
        (false, true) => format!("{} - Unknown Track", artists),
        (true, true) => "Unknown Track".to_string(),
    };

    let sanitized = sanitize_filename(&raw);
    truncate_to_boundary(&sanitized, MAX_STEM_BYTES)
        .trim()
        .trim_end_matches('.')
        .to_string()
}

/// `n`번째 후보 파일명. 1이면 접미사 없이, 그 뒤로는 `" (n)"`을 붙인다.
pub fn build_filename(stem: &str, n: u32, format: AudioFormat) -> String {
    if n <= 1 {
        format!("{}.{}", stem, format.extension())
    } else {
        format!("{} ({}).{}", stem, n, format.extension())
    }
}

/// 출력 디렉토리의 파일명 배정. 동시에 도는 작업끼리 같은 이름을 받지 않도록 예약 목록을 잠근다.
pub struct OutputNamer {
    dir: PathBuf,
    format: AudioFormat,
    overwrite: bool,
    state: Mutex<NamerState>,
}

#[derive(Default)]
struct NamerState {
    /// 작업 중인 경로.
    reserved: HashSet<PathBuf>,
    /// 이번 실행에서 이미 기록한 경로. 덮어쓰기 모드에서도 다시 배정하지 않는다.
    written: HashSet<PathBuf>,
}

/// 예약된 출력 경로. 커밋하지 않고 drop되면 예약이 풀린다.
pub struct Reservation<'a> {
    namer: &'a OutputNamer,
    path: PathBuf,
    committed: bool,
}

impl OutputNamer {
    pub fn new(dir: impl Into<PathBuf>, format: AudioFormat, overwrite: bool) -> Self {
        Self {
            dir: dir.into(),
            format,
            overwrite,
            state: Mutex::new(NamerState::default()),
        }
    }

    /// 곡에 쓸 경로를 예약한다.
    /// 기존 파일과 겹치면 `(2)`, `(3)`… 접미사를 붙이고, 덮어쓰기 모드에서는 기본 이름을 그대로 쓴다.
    pub fn reserve(&self, track: &TrackRecord) -> Reservation<'_> {
        let stem = build_stem(track);
        let mut state = self.lock_state();

        let mut n = 1;
        let path = loop {
            let path = self.dir.join(build_filename(&stem, n, self.format));
            let taken = state.reserved.contains(&path) || state.written.contains(&path);
            let exists = path.exists() && !(self.overwrite && n == 1);
            if !taken && !exists {
                break path;
            }
            n += 1;
        };

        state.reserved.insert(path.clone());
        Reservation {
            namer: self,
            path,
            committed: false,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, NamerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Reservation<'_> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 파일을 실제로 기록했음을 알린다.
    pub fn commit(mut self) -> PathBuf {
        self.committed = true;
        let mut state = self.namer.lock_state();
        state.reserved.remove(&self.path);
        state.written.insert(self.path.clone());
        self.path.clone()
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.namer.lock_state().reserved.remove(&self.path);
        }
    }
}
