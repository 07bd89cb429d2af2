use history_types::Url;
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;

/// Answers whether a URL is bookmarked. Bookmarked URLs keep their main
/// store row even when all their visits are gone.
pub trait BookmarkService: Send + Sync {
    fn is_bookmarked(&self, url: &Url) -> bool;

    /// Blocks until bookmarks are loaded. Called before every query.
    fn block_till_loaded(&self);
}

#[derive(Default)]
struct BookmarkState {
    loaded: bool,
    urls: HashSet<Url>,
}

/// In-memory bookmark set with an explicit load step.
#[derive(Default)]
pub struct MemoryBookmarkService {
    state: Mutex<BookmarkState>,
    loaded: Condvar,
}

impl MemoryBookmarkService {
    /// Starts out unloaded; `block_till_loaded` waits for `mark_loaded`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts out loaded with the given URLs.
    pub fn with_urls<I: IntoIterator<Item = Url>>(urls: I) -> Self {
        let service = Self::new();
        {
            let mut state = service.state.lock();
            state.urls.extend(urls);
            state.loaded = true;
        }
        service
    }

    pub fn add(&self, url: Url) {
        self.state.lock().urls.insert(url);
    }

    pub fn remove(&self, url: &Url) -> bool {
        self.state.lock().urls.remove(url)
    }

    pub fn mark_loaded(&self) {
        self.state.lock().loaded = true;
        self.loaded.notify_all();
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }
}

impl BookmarkService for MemoryBookmarkService {
    fn is_bookmarked(&self, url: &Url) -> bool {
        self.state.lock().urls.contains(url)
    }

    fn block_till_loaded(&self) {
        let mut state = self.state.lock();
        while !state.loaded {
            self.loaded.wait(&mut state);
        }
    }
}
