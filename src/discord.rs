use std::time::Duration;

use reqwest::{blocking::Client, StatusCode};
use serde::Serialize;
use thiserror::Error;

use crate::sources::{instagram::post_url, PostSnapshot};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_CAPTION_LIMIT: usize = 1000;
const TRUNCATION_MARKER: char = '…';

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("webhook rejected message: {status} {body}")]
    Rejected { status: u16, body: String },

    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub trait Deliver {
    /// Sends `content` to `webhook`. No retries.
    fn deliver(&self, webhook: &str, content: &str) -> Result<(), DeliveryError>;
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    content: &'a str,
}

/// Discord-compatible webhook sender.
pub struct WebhookNotifier {
    client: Client,
}

impl WebhookNotifier {
    pub fn new(timeout: Duration) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl Deliver for WebhookNotifier {
    fn deliver(&self, webhook: &str, content: &str) -> Result<(), DeliveryError> {
        let res = self
            .client
            .post(webhook)
            .json(&WebhookMessage { content })
            .send()?;

        match res.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            status => Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: res.text().unwrap_or_default(),
            }),
        }
    }
}

/// Cuts `caption` to `limit` chars plus a marker. Counts chars, not bytes.
pub fn truncate_caption(caption: &str, limit: usize) -> String {
    match caption.char_indices().nth(limit) {
        Some((cut, _)) => {
            let mut s = caption[..cut].to_string();
            s.push(TRUNCATION_MARKER);
            s
        }
        None => caption.to_string(),
    }
}

pub fn format_message(account: &str, post: &PostSnapshot, caption_limit: Option<usize>) -> String {
    let caption = match caption_limit {
        Some(limit) => truncate_caption(&post.caption, limit),
        None => post.caption.clone(),
    };

    format!(
        "New post from @{}:\n{}\n{}",
        account,
        caption,
        post_url(&post.shortcode)
    )
}
