//! Test doubles for the external services.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::core::transcoder::Transcoder;
use crate::error::{DownloadError, FetchError, ResolveError};
use crate::models::{AudioFormat, TrackRecord};
use crate::sources::{LibrarySource, TrackPage, VideoEntry, VideoSource};

pub(crate) fn track(title: &str, artist: &str) -> TrackRecord {
    TrackRecord {
        title: title.to_string(),
        artists: vec![artist.to_string()],
        album: format!("{title} (Single)"),
        duration_ms: 200_000,
        ..Default::default()
    }
}

/// Returns the scripted responses in call order, then empty pages.
pub(crate) struct ScriptedLibrary {
    responses: Mutex<VecDeque<Result<TrackPage, FetchError>>>,
    pub(crate) calls: Mutex<Vec<u32>>,
}

impl ScriptedLibrary {
    pub(crate) fn new(responses: Vec<Result<TrackPage, FetchError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn single_page(tracks: Vec<TrackRecord>) -> Self {
        let total = tracks.len() as u32;
        Self::new(vec![Ok(TrackPage {
            tracks,
            next_offset: None,
            total,
        })])
    }
}

impl LibrarySource for ScriptedLibrary {
    fn saved_tracks(&self, offset: u32, _limit: u32) -> Result<TrackPage, FetchError> {
        self.calls.lock().unwrap().push(offset);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TrackPage::default()))
    }

    fn fetch_album_art(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        anyhow::bail!("no artwork in tests: {url}")
    }
}

/// Search results keyed by query; downloads can be made to fail a number of times.
#[derive(Default)]
pub(crate) struct FakeVideo {
    results: HashMap<String, Vec<VideoEntry>>,
    failures: Mutex<HashMap<String, u32>>,
    pub(crate) downloads: Mutex<Vec<String>>,
}

impl FakeVideo {
    pub(crate) fn with_results(mut self, query: &str, entries: Vec<VideoEntry>) -> Self {
        self.results.insert(query.to_string(), entries);
        self
    }

    /// The first `times` downloads of `source_id` fail. `u32::MAX` fails forever.
    pub(crate) fn failing(self, source_id: &str, times: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(source_id.to_string(), times);
        self
    }

    pub(crate) fn download_count(&self, source_id: &str) -> usize {
        self.downloads
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == source_id)
            .count()
    }
}

pub(crate) fn entry(id: &str, title: &str, duration_ms: u64) -> VideoEntry {
    VideoEntry {
        id: id.to_string(),
        title: title.to_string(),
        channel: None,
        duration_ms: Some(duration_ms),
    }
}

impl VideoSource for FakeVideo {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoEntry>, ResolveError> {
        Ok(self
            .results
            .get(query)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    fn download_audio(&self, source_id: &str, work_dir: &Path) -> Result<PathBuf, DownloadError> {
        self.downloads.lock().unwrap().push(source_id.to_string());

        let path = work_dir.join("source.webm");
        let mut failures = self.failures.lock().unwrap();
        if let Some(left) = failures.get_mut(source_id) {
            if *left > 0 {
                if *left != u32::MAX {
                    *left -= 1;
                }
                // leave a partial file behind like an interrupted download would
                std::fs::write(&path, b"partial")?;
                return Err(DownloadError::Source("connection reset by peer".to_string()));
            }
        }

        std::fs::write(&path, format!("audio for {source_id}"))?;
        Ok(path)
    }
}

/// Copies the input to the output, or writes half a file and fails.
pub(crate) struct FakeTranscoder {
    pub(crate) fail: bool,
}

impl Transcoder for FakeTranscoder {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        _format: AudioFormat,
        _bitrate_kbps: u32,
    ) -> Result<(), DownloadError> {
        if self.fail {
            std::fs::write(output, b"half an mp3")?;
            return Err(DownloadError::Transcode("Invalid data found when processing input".to_string()));
        }
        std::fs::copy(input, output)?;
        Ok(())
    }
}
