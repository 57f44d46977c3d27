use std::path::Path;

/// Artist and title recovered from an output filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub artist: Option<String>,
    pub title: String,
}

/// Parse a filename into artist and title.
///
/// Supported patterns:
/// - "Artist - Title.mp3"
/// - "Artist - Title (2).mp3" (collision suffix is dropped)
/// - "Title.mp3" (fallback)
pub fn parse_filename(path: &Path) -> Option<ParsedName> {
    let stem = path.file_stem().and_then(|s| s.to_str())?;
    let stem = strip_collision_suffix(stem.trim());
    if stem.is_empty() {
        return None;
    }

    if let Some(parsed) = try_artist_title(stem) {
        return Some(parsed);
    }

    Some(ParsedName {
        artist: None,
        title: stem.to_string(),
    })
}

/// Remove a trailing " (n)" added when two tracks share a name.
fn strip_collision_suffix(stem: &str) -> &str {
    let Some(open) = stem.rfind(" (") else {
        return stem;
    };
    let inner = &stem[open + 2..];
    match inner.strip_suffix(')') {
        Some(digits) if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => {
            stem[..open].trim_end()
        }
        _ => stem,
    }
}

fn try_artist_title(stem: &str) -> Option<ParsedName> {
    let (artist, title) = stem.split_once(" - ")?;
    let artist = artist.trim();
    let title = title.trim();

    if artist.is_empty() || title.is_empty() {
        return None;
    }

    Some(ParsedName {
        artist: Some(artist.to_string()),
        title: title.to_string(),
    })
}
