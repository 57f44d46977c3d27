use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::Context;
use base64::Engine;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::SpotifyConfig;
use crate::error::{AuthError, FetchError};
use crate::models::TrackRecord;
use crate::sources::{LibrarySource, TrackPage};

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const SAVED_TRACKS_URL: &str = "https://api.spotify.com/v1/me/tracks";
const SCOPE: &str = "user-library-read";

/// 만료 직전의 토큰으로 요청하지 않도록 두는 여유 시간.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Spotify 인증 세션.
///
/// 여러 작업 스레드가 공유하며, 액세스 토큰 갱신은 하나의 `Mutex` 안에서만 일어난다.
pub struct SpotifySession {
    client: reqwest::blocking::Client,
    credentials: Credentials,
    token: Mutex<TokenState>,
}

struct Credentials {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
}

struct TokenState {
    access_token: Option<String>,
    expires_at: Instant,
    refresh_token: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
    refresh_token: Option<String>,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct SavedTracksResponse {
    items: Vec<SavedItem>,
    next: Option<String>,
    offset: u32,
    limit: u32,
    total: u32,
}

#[derive(Deserialize)]
struct SavedItem {
    track: Option<SpotifyTrack>,
}

#[derive(Deserialize)]
struct SpotifyTrack {
    id: Option<String>,
    name: String,
    artists: Vec<SpotifyArtist>,
    album: SpotifyAlbum,
    duration_ms: u64,
    track_number: Option<u32>,
    popularity: Option<u32>,
}

#[derive(Deserialize)]
struct SpotifyArtist {
    name: String,
}

#[derive(Deserialize)]
struct SpotifyAlbum {
    name: String,
    #[serde(default)]
    artists: Vec<SpotifyArtist>,
    release_date: Option<String>,
    #[serde(default)]
    images: Vec<SpotifyImage>,
}

#[derive(Deserialize)]
struct SpotifyImage {
    url: String,
    width: Option<u32>,
}

impl Credentials {
    fn from_config(config: &SpotifyConfig) -> Result<Self, AuthError> {
        let client_id = config
            .client_id
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingCredential("client_id"))?;
        let client_secret = config
            .client_secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::MissingCredential("client_secret"))?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_uri: config.redirect_uri().to_string(),
        })
    }

    fn basic_auth(&self) -> String {
        let credentials = format!("{}:{}", self.client_id, self.client_secret);
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        format!("Basic {}", encoded)
    }
}

/// 사용자가 브라우저에서 열어야 할 인증 URL을 만든다.
pub fn authorize_url(config: &SpotifyConfig) -> Result<String, AuthError> {
    let creds = Credentials::from_config(config)?;
    let url = Url::parse_with_params(
        AUTHORIZE_URL,
        &[
            ("client_id", creds.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", creds.redirect_uri.as_str()),
            ("scope", SCOPE),
        ],
    )
    .map_err(|e| AuthError::MissingCode(e.to_string()))?;
    Ok(url.to_string())
}

/// 리다이렉트된 주소(또는 코드 자체)에서 인증 코드를 꺼낸다.
pub fn extract_code(input: &str) -> Result<String, AuthError> {
    let input = input.trim();
    let Ok(url) = Url::parse(input) else {
        if !input.is_empty() && !input.contains(['?', '&', '=', ' ']) {
            return Ok(input.to_string());
        }
        return Err(AuthError::MissingCode(input.to_string()));
    };

    let mut code = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => {
                return Err(AuthError::Rejected {
                    status: 400,
                    body: value.into_owned(),
                })
            }
            _ => {}
        }
    }
    code.filter(|c| !c.is_empty())
        .ok_or_else(|| AuthError::MissingCode(input.to_string()))
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

impl SpotifySession {
    /// 저장된 refresh token으로 세션을 연다. 첫 토큰 갱신이 실패하면 인증 오류다.
    pub fn new(config: &SpotifyConfig) -> Result<Self, AuthError> {
        let credentials = Credentials::from_config(config)?;
        let refresh_token = config
            .refresh_token
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or(AuthError::NotLoggedIn)?;

        let session = Self {
            client: reqwest::blocking::Client::new(),
            credentials,
            token: Mutex::new(TokenState {
                access_token: None,
                expires_at: Instant::now(),
                refresh_token,
            }),
        };
        session.access_token()?;
        Ok(session)
    }

    /// 인증 코드를 토큰으로 교환하여 세션을 만든다.
    pub fn from_authorization_code(config: &SpotifyConfig, code: &str) -> Result<Self, AuthError> {
        let credentials = Credentials::from_config(config)?;
        let client = reqwest::blocking::Client::new();
        let resp = request_token(
            &client,
            &credentials,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", credentials.redirect_uri.as_str()),
            ],
        )?;
        let refresh_token = resp.refresh_token.ok_or(AuthError::Rejected {
            status: 200,
            body: "응답에 refresh_token이 없습니다".to_string(),
        })?;
        info!("authorization code exchanged");

        Ok(Self {
            client,
            credentials,
            token: Mutex::new(TokenState {
                access_token: Some(resp.access_token),
                expires_at: Instant::now() + Duration::from_secs(resp.expires_in),
                refresh_token,
            }),
        })
    }

    /// 현재 refresh token. Spotify가 갱신 중에 새 토큰을 발급했을 수 있다.
    pub fn refresh_token(&self) -> String {
        self.lock_token().refresh_token.clone()
    }

    /// 유효한 액세스 토큰을 반환한다. 만료가 가까우면 먼저 갱신한다.
    pub fn access_token(&self) -> Result<String, AuthError> {
        let mut state = self.lock_token();
        if let Some(token) = &state.access_token {
            if Instant::now() + EXPIRY_MARGIN < state.expires_at {
                return Ok(token.clone());
            }
        }

        debug!("refreshing access token");
        let resp = request_token(
            &self.client,
            &self.credentials,
            &[
                ("grant_type", "refresh_token"),
                ("refresh_token", state.refresh_token.as_str()),
            ],
        )?;
        state.access_token = Some(resp.access_token.clone());
        state.expires_at = Instant::now() + Duration::from_secs(resp.expires_in);
        if let Some(rotated) = resp.refresh_token {
            state.refresh_token = rotated;
        }
        Ok(resp.access_token)
    }

    fn check_response(&self, offset: u32, status: StatusCode, headers: &HeaderMap) -> Result<(), FetchError> {
        if status == StatusCode::UNAUTHORIZED {
            warn!(offset, "access token rejected, will refresh");
            self.invalidate();
        }
        classify(status, parse_retry_after(headers))
    }

    /// 서버가 401을 돌려주면 다음 요청에서 토큰을 새로 받도록 비운다.
    fn invalidate(&self) {
        self.lock_token().access_token = None;
    }

    fn lock_token(&self) -> MutexGuard<'_, TokenState> {
        // 갱신 중 패닉이 나도 토큰 상태 자체는 일관적이다.
        self.token.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn request_token(
    client: &reqwest::blocking::Client,
    credentials: &Credentials,
    form: &[(&str, &str)],
) -> Result<TokenResponse, AuthError> {
    let resp = client
        .post(TOKEN_URL)
        .header("Authorization", credentials.basic_auth())
        .form(form)
        .send()?;

    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        return Err(AuthError::Rejected {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json()?)
}

/// 좋아요 목록 응답의 상태 코드를 페이지 단위 오류로 분류한다.
/// 401은 토큰을 새로 받은 뒤 다시 시도할 수 있으므로 일시적 오류로 본다.
fn classify(status: StatusCode, retry_after: Option<Duration>) -> Result<(), FetchError> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::UNAUTHORIZED => Err(FetchError::Transient("액세스 토큰이 만료되었습니다".to_string())),
        StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited { retry_after }),
        s if s.is_server_error() => Err(FetchError::Transient(format!("HTTP {}", s.as_u16()))),
        s => Err(FetchError::Status { status: s.as_u16() }),
    }
}

fn parse_year(release_date: &Option<String>) -> Option<i32> {
    release_date
        .as_ref()
        .and_then(|d| d.split('-').next())
        .and_then(|y| y.parse().ok())
}

fn convert_track(track: SpotifyTrack) -> TrackRecord {
    let cover_art_url = track
        .album
        .images
        .iter()
        .max_by_key(|img| img.width.unwrap_or(0))
        .map(|img| img.url.clone());

    let album_artist = track
        .album
        .artists
        .first()
        .or_else(|| track.artists.first())
        .map(|a| a.name.clone());

    TrackRecord {
        title: track.name,
        artists: track.artists.into_iter().map(|a| a.name).collect(),
        year: parse_year(&track.album.release_date),
        album: track.album.name,
        duration_ms: track.duration_ms,
        cover_art_url,
        spotify_id: track.id,
        album_artist,
        track_number: track.track_number,
        popularity: track.popularity,
    }
}

fn convert_page(resp: SavedTracksResponse) -> TrackPage {
    let next_offset = resp
        .next
        .as_ref()
        .map(|_| resp.offset + resp.limit.max(resp.items.len() as u32));
    let tracks = resp
        .items
        .into_iter()
        .filter_map(|item| item.track)
        .map(convert_track)
        .collect();

    TrackPage {
        tracks,
        next_offset,
        total: resp.total,
    }
}

impl LibrarySource for SpotifySession {
    fn saved_tracks(&self, offset: u32, limit: u32) -> Result<TrackPage, FetchError> {
        let token = self.access_token()?;
        let resp = self
            .client
            .get(SAVED_TRACKS_URL)
            .bearer_auth(token)
            .query(&[("limit", limit), ("offset", offset)])
            .send()?;

        self.check_response(offset, resp.status(), resp.headers())?;

        let body: SavedTracksResponse = resp.json()?;
        Ok(convert_page(body))
    }

    fn fetch_album_art(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let data = self
            .client
            .get(url)
            .send()
            .context("앨범 아트 다운로드에 실패했습니다")?
            .error_for_status()?
            .bytes()?
            .to_vec();

        Ok(data)
    }
}
