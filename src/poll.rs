use std::{path::Path, thread, time::Duration};

use tracing::{error, info, warn};

use crate::{
    discord::{format_message, Deliver},
    map::AccountEntry,
    sources::{instagram::post_url, PostSource},
    state::{SeenState, StateError},
};

/// Outcome counts of one pass over the map.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    pub delivered: usize,
    pub unchanged: usize,
    pub no_posts: usize,
    pub fetch_failed: usize,
    pub delivery_failed: usize,
}

pub struct Poller<S, D> {
    source: S,
    notifier: D,
    /// Sleep before each account.
    delay: Duration,
    caption_limit: Option<usize>,
}

impl<S: PostSource, D: Deliver> Poller<S, D> {
    pub fn new(source: S, notifier: D, delay: Duration, caption_limit: Option<usize>) -> Self {
        Self {
            source,
            notifier,
            delay,
            caption_limit,
        }
    }

    /// Loads state, checks every entry once, saves state.
    ///
    /// State is saved even if every account failed.
    pub fn run(&self, entries: &[AccountEntry], state_path: &Path) -> Result<PassReport, StateError> {
        let mut state = SeenState::load(state_path)?;
        info!(accounts = entries.len(), known = state.len(), "starting poll pass");

        let report = self.run_pass(entries, &mut state);

        state.save(state_path)?;
        info!(?report, "poll pass done");

        Ok(report)
    }

    pub fn run_pass(&self, entries: &[AccountEntry], state: &mut SeenState) -> PassReport {
        let mut report = PassReport::default();

        for entry in entries {
            info!(account = %entry.account, "checking");
            if !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            self.check_account(entry, state, &mut report);
        }

        report
    }

    fn check_account(&self, entry: &AccountEntry, state: &mut SeenState, report: &mut PassReport) {
        let account = entry.account.as_str();

        let post = match self.source.fetch_latest(account) {
            Ok(Some(post)) => post,
            Ok(None) => {
                info!(account, "no posts found");
                report.no_posts += 1;
                return;
            }
            Err(e) => {
                error!(account, error = %e, "failed to fetch profile");
                report.fetch_failed += 1;
                return;
            }
        };

        if state.is_seen(account, &post.shortcode) {
            info!(account, shortcode = %post.shortcode, "no new posts");
            report.unchanged += 1;
            return;
        }

        let content = format_message(account, &post, self.caption_limit);

        match self.notifier.deliver(&entry.webhook, &content) {
            Ok(()) => {
                info!(account, url = %post_url(&post.shortcode), "posted to webhook");
                state.mark_delivered(account, &post.shortcode);
                report.delivered += 1;
            }
            Err(e) => {
                warn!(account, error = %e, "failed to post to webhook, will retry next pass");
                report.delivery_failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        discord::DeliveryError,
        map,
        sources::{FetchError, PostSnapshot},
    };
    use std::{cell::RefCell, collections::HashMap};

    /// account -> latest shortcode; `"!"` means fetch error.
    struct FakeSource(HashMap<&'static str, Option<&'static str>>);

    impl PostSource for FakeSource {
        fn fetch_latest(&self, account: &str) -> Result<Option<PostSnapshot>, FetchError> {
            match self.0.get(account) {
                Some(Some("!")) | None => Err(FetchError::NotFound),
                Some(Some(code)) => Ok(Some(PostSnapshot {
                    shortcode: code.to_string(),
                    caption: format!("caption of {code}"),
                })),
                Some(None) => Ok(None),
            }
        }
    }

    struct FakeNotifier {
        accept: bool,
        sent: RefCell<Vec<(String, String)>>,
    }

    impl FakeNotifier {
        fn new(accept: bool) -> Self {
            Self { accept, sent: RefCell::new(vec![]) }
        }
    }

    impl Deliver for &FakeNotifier {
        fn deliver(&self, webhook: &str, content: &str) -> Result<(), DeliveryError> {
            self.sent.borrow_mut().push((webhook.into(), content.into()));
            if self.accept {
                Ok(())
            } else {
                Err(DeliveryError::Rejected { status: 500, body: "nope".into() })
            }
        }
    }

    fn poller<'a>(
        posts: &[(&'static str, Option<&'static str>)],
        notifier: &'a FakeNotifier,
    ) -> Poller<FakeSource, &'a FakeNotifier> {
        let source = FakeSource(posts.iter().copied().collect());
        Poller::new(source, notifier, Duration::ZERO, Some(1000))
    }

    fn state_of(pairs: &[(&str, &str)]) -> SeenState {
        let mut s = SeenState::default();
        for (a, c) in pairs {
            s.mark_delivered(a, c);
        }
        s
    }

    #[test]
    fn test_unchanged_post_is_not_delivered() {
        let notifier = FakeNotifier::new(true);
        let poller = poller(&[("a", Some("X"))], &notifier);
        let mut state = state_of(&[("a", "X")]);

        let report = poller.run_pass(&map::parse("a|w1"), &mut state);

        assert!(notifier.sent.borrow().is_empty());
        assert_eq!(state, state_of(&[("a", "X")]));
        assert_eq!(report.unchanged, 1);
    }

    #[test]
    fn test_new_post_delivered_updates_state() {
        let notifier = FakeNotifier::new(true);
        let poller = poller(&[("a", Some("Y"))], &notifier);
        let mut state = SeenState::default();

        let report = poller.run_pass(&map::parse("a|w1"), &mut state);

        let sent = notifier.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "w1");
        assert_eq!(
            sent[0].1,
            "New post from @a:\ncaption of Y\nhttps://www.instagram.com/p/Y/"
        );
        assert_eq!(state, state_of(&[("a", "Y")]));
        assert_eq!(report.delivered, 1);
    }

    #[test]
    fn test_failed_delivery_keeps_state() {
        let notifier = FakeNotifier::new(false);
        let poller = poller(&[("a", Some("Y"))], &notifier);
        let mut state = SeenState::default();

        let report = poller.run_pass(&map::parse("a|w1"), &mut state);

        assert_eq!(notifier.sent.borrow().len(), 1);
        assert_eq!(state, SeenState::default());
        assert_eq!(report.delivery_failed, 1);
    }

    #[test]
    fn test_fetch_error_does_not_stop_others() {
        let notifier = FakeNotifier::new(true);
        let poller = poller(
            &[("bad", Some("!")), ("empty", None), ("good", Some("G"))],
            &notifier,
        );
        let mut state = state_of(&[("bad", "old")]);

        let report = poller.run_pass(&map::parse("bad|w0\nempty|w1\ngood|w2"), &mut state);

        assert_eq!(
            report,
            PassReport { delivered: 1, unchanged: 0, no_posts: 1, fetch_failed: 1, delivery_failed: 0 }
        );
        assert_eq!(state, state_of(&[("bad", "old"), ("good", "G")]));
    }

    #[test]
    fn test_run_persists_after_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_seen.json");
        let notifier = FakeNotifier::new(true);
        let poller = poller(&[("a", Some("Y"))], &notifier);

        poller.run(&map::parse("a|w1"), &path).unwrap();
        assert_eq!(SeenState::load(&path).unwrap(), state_of(&[("a", "Y")]));

        // second pass sees nothing new
        let report = poller.run(&map::parse("a|w1"), &path).unwrap();
        assert_eq!(report.unchanged, 1);
        assert_eq!(notifier.sent.borrow().len(), 1);
    }

    #[test]
    fn test_run_persists_empty_state_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_seen.json");
        let notifier = FakeNotifier::new(false);
        let poller = poller(&[("a", Some("Y"))], &notifier);

        poller.run(&map::parse("a|w1"), &path).unwrap();
        assert_eq!(SeenState::load(&path).unwrap(), SeenState::default());
        assert!(path.exists());
    }

    #[test]
    fn test_malformed_line_is_ignored_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_seen.json");
        let notifier = FakeNotifier::new(true);
        let poller = poller(&[("good", Some("G"))], &notifier);

        let entries = map::parse_required("onlyname\ngood|w2").unwrap();
        let report = poller.run(&entries, &path).unwrap();

        assert_eq!(report.delivered, 1);
        assert_eq!(notifier.sent.borrow().len(), 1);
        assert_eq!(SeenState::load(&path).unwrap(), state_of(&[("good", "G")]));
    }

    #[test]
    fn test_run_refuses_corrupt_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("last_seen.json");
        std::fs::write(&path, "garbage").unwrap();
        let notifier = FakeNotifier::new(true);
        let poller = poller(&[("a", Some("Y"))], &notifier);

        assert!(poller.run(&map::parse("a|w1"), &path).is_err());
        assert!(notifier.sent.borrow().is_empty());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "garbage");
    }
}
