use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::{blocking::Client, header, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{FetchError, PostSnapshot, PostSource};
use crate::session::Session;

const API_BASE: &str = "https://i.instagram.com";
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
/// App id of the instagram.com web client; the profile endpoint rejects requests without it.
const WEB_APP_ID: &str = "936619743392459";
const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

lazy_static! {
    static ref HANDLE: Regex = Regex::new(r"^[A-Za-z0-9._]{1,30}$").unwrap();
}

pub fn post_url(shortcode: &str) -> String {
    format!("https://www.instagram.com/p/{shortcode}/")
}

pub fn is_valid_handle(account: &str) -> bool {
    HANDLE.is_match(account)
}

pub struct InstagramClient {
    client: Client,
    base_url: String,
    session: Session,
}

#[derive(Deserialize)]
struct ProfileInfoResponse {
    data: ProfileInfoData,
}
#[derive(Deserialize)]
struct ProfileInfoData {
    user: Option<ProfileUser>,
}
#[derive(Deserialize)]
struct ProfileUser {
    edge_owner_to_timeline_media: Edges<TimelineNode>,
}
#[derive(Deserialize)]
struct Edges<T> {
    #[serde(default = "Vec::new")]
    edges: Vec<Edge<T>>,
}
#[derive(Deserialize)]
struct Edge<T> {
    node: T,
}
#[derive(Deserialize)]
struct TimelineNode {
    shortcode: String,
    edge_media_to_caption: Option<Edges<CaptionNode>>,
}
#[derive(Deserialize)]
struct CaptionNode {
    text: String,
}

impl InstagramClient {
    pub fn new(session: Session, timeout: Duration) -> Result<Self, FetchError> {
        Self::with_base_url(session, timeout, API_BASE)
    }

    pub fn with_base_url(session: Session, timeout: Duration, base_url: &str) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    fn profile_info(&self, account: &str) -> Result<ProfileUser, FetchError> {
        if !is_valid_handle(account) {
            return Err(FetchError::InvalidAccount(account.to_string()));
        }

        let mut req = self
            .client
            .get(format!("{}/api/v1/users/web_profile_info/", self.base_url))
            .query(&[("username", account)])
            .header("x-ig-app-id", WEB_APP_ID)
            .header(header::COOKIE, self.session.cookie_header());
        if let Some(csrf) = self.session.csrf_token() {
            req = req.header("x-csrftoken", csrf);
        }

        let res = req.send()?;

        // A dead session gets bounced to the login page instead of a 401.
        if res.url().path().starts_with("/accounts/login") {
            return Err(FetchError::Unauthorized);
        }

        match res.status() {
            StatusCode::OK => {}
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(FetchError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => return Err(FetchError::RateLimited),
            s => return Err(FetchError::Status(s.as_u16())),
        }

        let body: ProfileInfoResponse = serde_json::from_str(&res.text()?)?;
        body.data.user.ok_or(FetchError::NotFound)
    }

    /// Fetches `account`'s profile to make sure the session is accepted.
    pub fn check_session(&self, account: &str) -> Result<(), FetchError> {
        self.profile_info(account).map(|_| ())
    }
}

impl PostSource for InstagramClient {
    fn fetch_latest(&self, account: &str) -> Result<Option<PostSnapshot>, FetchError> {
        let user = self.profile_info(account)?;

        let latest = match user.edge_owner_to_timeline_media.edges.into_iter().next() {
            Some(edge) => edge.node,
            None => return Ok(None),
        };

        let caption = latest
            .edge_media_to_caption
            .and_then(|c| c.edges.into_iter().next())
            .map(|e| e.node.text)
            .unwrap_or_default();

        debug!(account, shortcode = %latest.shortcode, "fetched latest post");

        Ok(Some(PostSnapshot {
            shortcode: latest.shortcode,
            caption,
        }))
    }
}
