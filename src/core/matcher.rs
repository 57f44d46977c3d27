use std::time::Duration;

use tracing::debug;

use crate::config::DownloadConfig;
use crate::error::ResolveError;
use crate::models::{MatchCandidate, TrackRecord};
use crate::sources::{VideoEntry, VideoSource};

/// 곡 제목에 없는데 후보 제목에만 있으면 원곡이 아닐 가능성이 큰 표시.
const VARIANT_MARKERS: &[&str] = &[
    "cover",
    "remix",
    "live",
    "karaoke",
    "instrumental",
    "nightcore",
    "sped up",
    "slowed",
    "8d",
    "reverb",
];
const VARIANT_PENALTY: f64 = 0.15;

const TEXT_WEIGHT: f64 = 0.75;
const DURATION_WEIGHT: f64 = 0.25;
const UNKNOWN_DURATION_FACTOR: f64 = 0.5;

/// 제목 비교에서 무시하는 단어.
const IGNORED_TOKENS: &[&str] = &["feat", "ft", "featuring", "prod"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchSettings {
    /// 검색에서 가져올 후보 수.
    pub search_results: usize,
    /// 채택에 필요한 최소 점수 (0..=1).
    pub min_score: f64,
    /// 이 이상 길이가 다른 후보는 제외한다.
    pub duration_tolerance: Duration,
}

impl Default for MatchSettings {
    fn default() -> Self {
        Self::from(&DownloadConfig::default())
    }
}

impl From<&DownloadConfig> for MatchSettings {
    fn from(cfg: &DownloadConfig) -> Self {
        Self {
            search_results: cfg.search_results.max(1),
            min_score: cfg.min_score.clamp(0.0, 1.0),
            duration_tolerance: Duration::from_secs(cfg.duration_tolerance_secs),
        }
    }
}

/// 곡 하나에 대한 매칭 결과. 적합한 후보가 없는 것은 오류가 아니다.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Matched(MatchCandidate),
    Unresolved {
        /// 기준에 못 미친 최고 후보 (보고용).
        best: Option<MatchCandidate>,
    },
}

pub struct MatchResolver<'a> {
    source: &'a dyn VideoSource,
    settings: MatchSettings,
}

impl<'a> MatchResolver<'a> {
    pub fn new(source: &'a dyn VideoSource, settings: MatchSettings) -> Self {
        Self { source, settings }
    }

    pub fn resolve(&self, track: &TrackRecord) -> Result<Resolution, ResolveError> {
        let query = search_query(track);
        let entries = self.source.search(&query, self.settings.search_results)?;
        let resolution = select_best(track, &entries, &self.settings);
        match &resolution {
            Resolution::Matched(c) => {
                debug!(query = %query, source_id = %c.source_id, score = c.score, "candidate selected")
            }
            Resolution::Unresolved { best } => {
                debug!(query = %query, best_score = ?best.as_ref().map(|c| c.score), "no acceptable candidate")
            }
        }
        Ok(resolution)
    }
}

/// `"{artists} - {title}"` 형식의 검색어.
pub fn search_query(track: &TrackRecord) -> String {
    let artists = track.joined_artists();
    if artists.trim().is_empty() {
        return track.title.clone();
    }
    format!("{} - {}", artists, track.title)
}

/// 소문자로 바꾸고 문자·숫자가 아닌 것은 공백으로 바꾼 뒤 공백을 하나로 합친다.
pub fn normalize(s: &str) -> String {
    let mapped: String = s
        .chars()
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 정규화된 `haystack`에 `needle`이 단어 단위로 들어 있는지 확인한다.
fn contains_words(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", needle))
}

fn title_coverage(title: &str, haystack: &str) -> f64 {
    let normalized = normalize(title);
    let tokens: Vec<&str> = normalized
        .split_whitespace()
        .filter(|t| !IGNORED_TOKENS.contains(t))
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let found = tokens
        .iter()
        .filter(|t| contains_words(haystack, t))
        .count();
    found as f64 / tokens.len() as f64
}

/// 첫 번째(주) 아티스트는 가중치 2, 나머지는 1.
fn artist_coverage(artists: &[String], haystack: &str) -> f64 {
    let mut total = 0.0;
    let mut found = 0.0;
    for (i, artist) in artists.iter().enumerate() {
        let weight = if i == 0 { 2.0 } else { 1.0 };
        total += weight;
        if contains_words(haystack, &normalize(artist)) {
            found += weight;
        }
    }
    if total == 0.0 {
        0.0
    } else {
        found / total
    }
}

/// 허용 범위 밖이면 None. 범위 안에서는 1.0(일치)에서 0.5(경계)까지 선형으로 줄어든다.
fn duration_factor(track_ms: u64, candidate_ms: Option<u64>, tolerance: Duration) -> Option<f64> {
    let Some(candidate_ms) = candidate_ms else {
        return Some(UNKNOWN_DURATION_FACTOR);
    };
    let diff = track_ms.abs_diff(candidate_ms);
    let tolerance_ms = tolerance.as_millis() as u64;
    if diff > tolerance_ms {
        return None;
    }
    if tolerance_ms == 0 {
        return Some(1.0);
    }
    Some(1.0 - 0.5 * diff as f64 / tolerance_ms as f64)
}

fn variant_penalty(track_title: &str, candidate_title: &str) -> f64 {
    let track_title = normalize(track_title);
    let candidate_title = normalize(candidate_title);
    let count = VARIANT_MARKERS
        .iter()
        .filter(|m| contains_words(&candidate_title, m) && !contains_words(&track_title, m))
        .count();
    count as f64 * VARIANT_PENALTY
}

/// 후보 하나의 점수를 계산한다. 길이 차이가 허용 범위를 넘으면 None (후보 제외).
pub fn score_candidate(track: &TrackRecord, entry: &VideoEntry, settings: &MatchSettings) -> Option<f64> {
    let duration = duration_factor(track.duration_ms, entry.duration_ms, settings.duration_tolerance)?;

    let candidate_title = normalize(&entry.title);
    let haystack = match &entry.channel {
        Some(channel) => format!("{} {}", candidate_title, normalize(channel)),
        None => candidate_title.clone(),
    };

    let fuzzy = strsim::jaro_winkler(&normalize(&search_query(track)), &candidate_title);
    let text = 0.5 * title_coverage(&track.title, &haystack)
        + 0.3 * artist_coverage(&track.artists, &haystack)
        + 0.2 * fuzzy;

    let score = TEXT_WEIGHT * text + DURATION_WEIGHT * duration
        - variant_penalty(&track.title, &entry.title);
    Some(score.clamp(0.0, 1.0))
}

/// 가장 높은 점수의 후보를 고른다. 동점이면 검색 순위가 앞선 후보가 이긴다.
pub fn select_best(track: &TrackRecord, entries: &[VideoEntry], settings: &MatchSettings) -> Resolution {
    let mut best: Option<MatchCandidate> = None;

    for entry in entries {
        let Some(score) = score_candidate(track, entry, settings) else {
            debug!(source_id = %entry.id, duration_ms = ?entry.duration_ms, "candidate outside duration tolerance");
            continue;
        };
        if best.as_ref().is_some_and(|b| b.score >= score) {
            continue;
        }
        best = Some(MatchCandidate {
            source_id: entry.id.clone(),
            title: entry.title.clone(),
            duration_ms: entry.duration_ms.unwrap_or(track.duration_ms),
            score,
        });
    }

    match best {
        Some(candidate) if candidate.score >= settings.min_score => Resolution::Matched(candidate),
        best => Resolution::Unresolved { best },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueming() -> TrackRecord {
        TrackRecord {
            title: "Blueming".to_string(),
            artists: vec!["IU".to_string()],
            album: "Love poem".to_string(),
            duration_ms: 217_000,
            ..Default::default()
        }
    }

    fn entry(id: &str, title: &str, channel: Option<&str>, duration_ms: Option<u64>) -> VideoEntry {
        VideoEntry {
            id: id.to_string(),
            title: title.to_string(),
            channel: channel.map(str::to_string),
            duration_ms,
        }
    }

    fn fixture() -> Vec<VideoEntry> {
        vec![
            entry("cover", "Blueming - IU (Cover by someone)", Some("someone"), Some(217_000)),
            entry("official", "IU - Blueming (Audio)", Some("IU"), Some(217_400)),
            entry("mv", "[MV] IU _ Blueming", Some("1theK"), Some(260_000)),
            entry("vlog", "Random vlog", Some("vlogger"), Some(217_000)),
        ]
    }

    #[test]
    fn test_search_query() {
        let mut track = blueming();
        track.artists.push("Someone".to_string());
        assert_eq!(search_query(&track), "IU, Someone - Blueming");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  IU - Blueming (Audio)!! "), "iu blueming audio");
        assert_eq!(normalize("아이유 — 블루밍"), "아이유 블루밍");
    }

    #[test]
    fn test_selects_fixture_candidate() {
        let settings = MatchSettings::default();
        let resolution = select_best(&blueming(), &fixture(), &settings);
        let Resolution::Matched(candidate) = resolution else {
            panic!("expected a match, got {resolution:?}");
        };
        assert_eq!(candidate.source_id, "official");
        assert_eq!(candidate.duration_ms, 217_400);
        assert!(candidate.score >= settings.min_score);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let settings = MatchSettings::default();
        let first = select_best(&blueming(), &fixture(), &settings);
        for _ in 0..10 {
            assert_eq!(select_best(&blueming(), &fixture(), &settings), first);
        }
    }

    #[test]
    fn test_ties_go_to_earlier_rank() {
        let entries = vec![
            entry("first", "IU - Blueming", Some("IU"), Some(217_000)),
            entry("second", "IU - Blueming", Some("IU"), Some(217_000)),
        ];
        let Resolution::Matched(c) = select_best(&blueming(), &entries, &MatchSettings::default()) else {
            panic!("expected a match");
        };
        assert_eq!(c.source_id, "first");
    }

    #[test]
    fn test_duration_outside_tolerance_is_excluded() {
        let settings = MatchSettings::default();
        let mv = entry("mv", "IU - Blueming", Some("IU"), Some(260_000));
        assert_eq!(score_candidate(&blueming(), &mv, &settings), None);
        assert!(matches!(
            select_best(&blueming(), &[mv], &settings),
            Resolution::Unresolved { best: None }
        ));
    }

    #[test]
    fn test_unrelated_candidates_are_unresolved() {
        let entries = vec![
            entry("vlog", "Random vlog", Some("vlogger"), Some(217_000)),
            entry("cooking", "Cooking pasta at home", None, None),
        ];
        let resolution = select_best(&blueming(), &entries, &MatchSettings::default());
        let Resolution::Unresolved { best } = resolution else {
            panic!("expected unresolved, got {resolution:?}");
        };
        assert!(best.is_some_and(|b| b.score < 0.6));
    }

    #[test]
    fn test_variant_is_penalized() {
        let settings = MatchSettings::default();
        let original = entry("a", "IU - Blueming", Some("IU"), Some(217_000));
        let remix = entry("b", "IU - Blueming (Remix)", Some("IU"), Some(217_000));
        let a = score_candidate(&blueming(), &original, &settings).unwrap();
        let b = score_candidate(&blueming(), &remix, &settings).unwrap();
        assert!(a > b);
    }

    #[test]
    fn test_variant_in_track_title_is_not_penalized() {
        assert_eq!(variant_penalty("Blueming (Live)", "IU - Blueming Live"), 0.0);
        assert_eq!(variant_penalty("Blueming", "IU - Blueming Live"), VARIANT_PENALTY);
    }

    #[test]
    fn test_duration_factor() {
        let tol = Duration::from_secs(10);
        assert_eq!(duration_factor(200_000, Some(200_000), tol), Some(1.0));
        assert_eq!(duration_factor(200_000, Some(210_000), tol), Some(0.5));
        assert_eq!(duration_factor(200_000, Some(210_001), tol), None);
        assert_eq!(duration_factor(200_000, None, tol), Some(UNKNOWN_DURATION_FACTOR));
    }

    struct FixtureSearch;

    impl VideoSource for FixtureSearch {
        fn search(&self, query: &str, limit: usize) -> Result<Vec<VideoEntry>, ResolveError> {
            assert_eq!(query, "IU - Blueming");
            Ok(fixture().into_iter().take(limit).collect())
        }

        fn download_audio(
            &self,
            _source_id: &str,
            _work_dir: &std::path::Path,
        ) -> Result<std::path::PathBuf, crate::error::DownloadError> {
            unreachable!("resolver never downloads")
        }
    }

    #[test]
    fn test_resolver_uses_search_source() {
        let resolver = MatchResolver::new(&FixtureSearch, MatchSettings::default());
        let resolution = resolver.resolve(&blueming()).unwrap();
        assert!(matches!(resolution, Resolution::Matched(c) if c.source_id == "official"));
    }
}
