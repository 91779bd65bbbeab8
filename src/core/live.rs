//! Live chat comment polling.
//!
//! Each poll fetches one page from the comment source, remembers what it
//! has already seen and picks a single comment to answer.

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rustc_hash::FxHashSet;

use crate::core::config::LiveSettings;
use crate::core::ports::{LiveCommentSource, LiveError};
use crate::schema::live_comment::LiveComment;

/// Bounded set of recently seen comments, keyed by author and text.
#[derive(Debug, Default)]
struct SeenWindow {
    capacity: usize,
    keys: FxHashSet<(String, String)>,
    order: VecDeque<(String, String)>,
}

impl SeenWindow {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Record `comment`; returns false if it was already in the window.
    fn insert(&mut self, comment: &LiveComment) -> bool {
        if self.capacity == 0 {
            return true;
        }
        let key = (comment.author.clone(), comment.text.clone());
        if !self.keys.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct LiveCommentPoller {
    source: Arc<dyn LiveCommentSource>,
    cursor: Option<String>,
    seen: SeenWindow,
    exclude_marker: String,
    rng: StdRng,
}

impl LiveCommentPoller {
    pub fn new(source: Arc<dyn LiveCommentSource>, settings: &LiveSettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            source,
            cursor: None,
            seen: SeenWindow::new(settings.dedup_capacity),
            exclude_marker: settings.exclude_marker.clone(),
            rng,
        }
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }

    /// Fetch one page and choose at most one new comment to answer.
    pub async fn poll_once(&mut self) -> Result<Option<LiveComment>, LiveError> {
        let page = self.source.fetch(self.cursor.as_deref()).await?;
        if let Some(next) = page.next_cursor {
            self.cursor = Some(next);
        }

        let mut candidates = Vec::new();
        for raw in page.items {
            let comment = match LiveComment::try_from(raw) {
                Ok(comment) => comment,
                Err(e) => {
                    warn!("ignoring live item: {}", LiveError::from(e));
                    continue;
                }
            };
            if comment.text.trim().is_empty() {
                continue;
            }
            if !self.seen.insert(&comment) {
                debug!("already seen comment from {}", comment.author);
                continue;
            }
            if !self.exclude_marker.is_empty() && comment.text.contains(&self.exclude_marker) {
                debug!("comment from {} carries the exclusion marker", comment.author);
                continue;
            }
            candidates.push(comment);
        }

        Ok(candidates.choose(&mut self.rng).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ports::LiveCommentPage;
    use crate::schema::live_comment::RawLiveItem;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct PagedSource {
        pages: Mutex<VecDeque<Result<LiveCommentPage, LiveError>>>,
        cursors: Mutex<Vec<Option<String>>>,
    }

    impl PagedSource {
        fn with_pages(pages: Vec<Result<LiveCommentPage, LiveError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into()),
                cursors: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LiveCommentSource for PagedSource {
        async fn fetch(&self, cursor: Option<&str>) -> Result<LiveCommentPage, LiveError> {
            self.cursors.lock().unwrap().push(cursor.map(str::to_string));
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LiveCommentPage::default()))
        }
    }

    fn item(author: &str, text: &str) -> RawLiveItem {
        RawLiveItem {
            author: Some(author.to_string()),
            icon_url: None,
            message: Some(text.to_string()),
            super_chat: None,
        }
    }

    fn page(items: Vec<RawLiveItem>, next: &str) -> Result<LiveCommentPage, LiveError> {
        Ok(LiveCommentPage {
            items,
            next_cursor: Some(next.to_string()),
        })
    }

    fn settings(dedup_capacity: usize) -> LiveSettings {
        LiveSettings {
            dedup_capacity,
            seed: Some(1),
            ..LiveSettings::default()
        }
    }

    #[tokio::test]
    async fn cursor_advances_between_polls() {
        let source = PagedSource::with_pages(vec![
            page(vec![item("a", "hi")], "p2"),
            page(vec![], "p3"),
        ]);
        let mut poller = LiveCommentPoller::new(source.clone(), &settings(16));
        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();
        poller.poll_once().await.unwrap();

        assert_eq!(
            *source.cursors.lock().unwrap(),
            vec![None, Some("p2".to_string()), Some("p3".to_string())]
        );
        assert_eq!(poller.cursor(), Some("p3"));
    }

    #[tokio::test]
    async fn excluded_and_empty_comments_are_never_chosen() {
        let source = PagedSource::with_pages(vec![page(
            vec![item("a", "#mod note"), item("b", "   "), item("c", "question?")],
            "p2",
        )]);
        let mut poller = LiveCommentPoller::new(source, &settings(16));
        let picked = poller.poll_once().await.unwrap().unwrap();
        assert_eq!(picked.author, "c");
        // The excluded comment is still remembered.
        assert_eq!(poller.seen_count(), 2);
    }

    #[tokio::test]
    async fn super_chat_text_is_used() {
        let mut paid = item("d", "plain");
        paid.super_chat = Some("paid comment".to_string());
        let source = PagedSource::with_pages(vec![page(vec![paid], "p2")]);
        let mut poller = LiveCommentPoller::new(source, &settings(16));
        let picked = poller.poll_once().await.unwrap().unwrap();
        assert_eq!(picked.text, "paid comment");
    }

    #[tokio::test]
    async fn malformed_items_are_skipped() {
        let anonymous = RawLiveItem {
            message: Some("who am I".to_string()),
            ..RawLiveItem::default()
        };
        let source = PagedSource::with_pages(vec![page(vec![anonymous], "p2")]);
        let mut poller = LiveCommentPoller::new(source, &settings(16));
        assert_eq!(poller.poll_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn repeated_comments_are_deduplicated() {
        let source = PagedSource::with_pages(vec![
            page(vec![item("a", "hello")], "p2"),
            page(vec![item("a", "hello")], "p3"),
        ]);
        let mut poller = LiveCommentPoller::new(source, &settings(16));
        assert!(poller.poll_once().await.unwrap().is_some());
        assert_eq!(poller.poll_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn zero_capacity_disables_dedup() {
        let source = PagedSource::with_pages(vec![
            page(vec![item("a", "hello")], "p2"),
            page(vec![item("a", "hello")], "p3"),
        ]);
        let mut poller = LiveCommentPoller::new(source, &settings(0));
        assert!(poller.poll_once().await.unwrap().is_some());
        assert!(poller.poll_once().await.unwrap().is_some());
        assert_eq!(poller.seen_count(), 0);
    }

    #[test]
    fn seen_window_is_bounded() {
        let mut window = SeenWindow::new(2);
        let comment = |text: &str| LiveComment {
            author: "a".to_string(),
            icon_url: None,
            text: text.to_string(),
        };
        assert!(window.insert(&comment("1")));
        assert!(window.insert(&comment("2")));
        assert!(window.insert(&comment("3")));
        assert_eq!(window.len(), 2);
        // The oldest entry was evicted and counts as new again.
        assert!(window.insert(&comment("1")));
        assert!(!window.insert(&comment("3")));
    }

    #[tokio::test]
    async fn seeded_choice_is_deterministic() {
        let items = || (0..8).map(|i| item(&format!("u{i}"), "hi")).collect::<Vec<_>>();
        let first = PagedSource::with_pages(vec![page(items(), "p2")]);
        let second = PagedSource::with_pages(vec![page(items(), "p2")]);
        let a = LiveCommentPoller::new(first, &settings(16))
            .poll_once()
            .await
            .unwrap();
        let b = LiveCommentPoller::new(second, &settings(16))
            .poll_once()
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn fetch_errors_propagate() {
        let source = PagedSource::with_pages(vec![Err(LiveError::Request("quota".to_string()))]);
        let mut poller = LiveCommentPoller::new(source, &settings(16));
        assert!(matches!(
            poller.poll_once().await,
            Err(LiveError::Request(_))
        ));
    }
}
