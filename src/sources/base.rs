use thiserror::Error;

/// Latest post of a profile. Never persisted, only the shortcode ends up in state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostSnapshot {
    /// Post shortcode, the `/p/<shortcode>/` part of the URL.
    pub shortcode: String,
    /// Post caption. May be empty string if not exists.
    pub caption: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid account name {0:?}")]
    InvalidAccount(String),

    #[error("account not found")]
    NotFound,

    #[error("not authorized, session may be expired")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub trait PostSource {
    /// Latest post of `account`.
    /// `Ok(None)` if the profile has no posts.
    fn fetch_latest(&self, account: &str) -> Result<Option<PostSnapshot>, FetchError>;
}
