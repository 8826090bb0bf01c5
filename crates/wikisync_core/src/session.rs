use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::debug;

use crate::config::ConnectionConfig;
use crate::error::{RemoteError, SessionError};
use crate::gitlab::{Page, PageSummary, WikiApi};

pub const NEW_PAGE_TITLE: &str = "New Page";
pub const NEW_PAGE_SLUG_PREFIX: &str = "new-page-";

const LIST_FAILED: &str = "Failed to load page list. Check configuration.";
const SELECT_FAILED: &str = "Could not load page content.";
const SAVE_SUCCEEDED: &str = "Page saved to GitLab Wiki.";
const SAVE_FAILED: &str = "Failed to save changes to GitLab.";
const DELETE_SUCCEEDED: &str = "Page deleted from GitLab Wiki.";
const DELETE_FAILED: &str = "Failed to delete page from GitLab.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Success,
    Error,
    Info,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusNotice {
    pub kind: NoticeKind,
    pub text: String,
}

impl StatusNotice {
    /// Success and info notices auto-dismiss; errors stay until replaced.
    pub fn is_transient(&self) -> bool {
        self.kind != NoticeKind::Error
    }
}

/// The page being edited: its identity, the edited fields, and the last
/// version known to the server (or the local placeholder for a new page).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivePage {
    pub slug: String,
    pub title: String,
    pub body: String,
    pub baseline: Page,
}

impl ActivePage {
    fn from_page(page: Page) -> Self {
        Self {
            slug: page.slug.clone(),
            title: page.title.clone(),
            body: page.content.clone(),
            baseline: page,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    AlreadyActive,
    Loaded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Created(PageSummary),
    Updated(PageSummary),
}

impl SaveOutcome {
    pub fn summary(&self) -> &PageSummary {
        match self {
            Self::Created(summary) | Self::Updated(summary) => summary,
        }
    }
}

/// Cached page list plus the active page.
///
/// Whether a save creates or updates is decided only by membership of the
/// active slug in the cached list.
#[derive(Debug, Default)]
pub struct EditorSession {
    pages: Vec<PageSummary>,
    active: Option<ActivePage>,
    status: Option<StatusNotice>,
    last_placeholder: Option<String>,
}

impl EditorSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pages(pages: Vec<PageSummary>) -> Self {
        Self {
            pages,
            ..Self::default()
        }
    }

    pub fn pages(&self) -> &[PageSummary] {
        &self.pages
    }

    pub fn active(&self) -> Option<&ActivePage> {
        self.active.as_ref()
    }

    pub fn active_slug(&self) -> Option<&str> {
        self.active.as_ref().map(|page| page.slug.as_str())
    }

    pub fn status(&self) -> Option<&StatusNotice> {
        self.status.as_ref()
    }

    pub fn clear_status(&mut self) {
        self.status = None;
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.pages.iter().any(|page| page.slug == slug)
    }

    /// Active page is not in the cached list, so the next save creates it.
    pub fn is_new(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|page| !self.contains(&page.slug))
    }

    pub fn is_dirty(&self) -> bool {
        self.active.as_ref().is_some_and(|page| {
            page.title != page.baseline.title || page.body != page.baseline.content
        })
    }

    /// Replace the cached list. A failure keeps the previous list.
    pub fn load_pages<A: WikiApi>(
        &mut self,
        api: &mut A,
        config: &ConnectionConfig,
    ) -> Result<usize, RemoteError> {
        match api.list_pages(config) {
            Ok(pages) => {
                self.pages = pages;
                Ok(self.pages.len())
            }
            Err(error) => {
                self.notify(NoticeKind::Error, LIST_FAILED);
                Err(error)
            }
        }
    }

    /// Load `slug` as the active page. Selecting the active slug again is a
    /// no-op that keeps in-progress edits.
    pub fn select_page<A: WikiApi>(
        &mut self,
        api: &mut A,
        config: &ConnectionConfig,
        slug: &str,
    ) -> Result<SelectOutcome, RemoteError> {
        if self.active_slug() == Some(slug) {
            return Ok(SelectOutcome::AlreadyActive);
        }
        match api.get_page(config, slug) {
            Ok(page) => {
                self.active = Some(ActivePage::from_page(page));
                self.status = None;
                Ok(SelectOutcome::Loaded)
            }
            Err(error) => {
                self.notify(NoticeKind::Error, SELECT_FAILED);
                Err(error)
            }
        }
    }

    /// Start an unsaved page under a locally unique placeholder slug.
    pub fn new_page(&mut self) -> &ActivePage {
        self.start_new_page(unix_millis())
    }

    fn start_new_page(&mut self, millis: u128) -> &ActivePage {
        let slug = self.placeholder_slug(millis);
        self.last_placeholder = Some(slug.clone());
        self.active.insert(ActivePage::from_page(Page {
            slug,
            title: NEW_PAGE_TITLE.to_string(),
            format: crate::gitlab::WIKI_FORMAT.to_string(),
            content: String::new(),
        }))
    }

    // Two calls in the same millisecond get `-1`, `-2`, ... suffixes.
    fn placeholder_slug(&self, millis: u128) -> String {
        let base = format!("{NEW_PAGE_SLUG_PREFIX}{millis}");
        let mut candidate = base.clone();
        let mut suffix = 1usize;
        while self.slug_taken(&candidate) {
            candidate = format!("{base}-{suffix}");
            suffix += 1;
        }
        candidate
    }

    fn slug_taken(&self, slug: &str) -> bool {
        self.contains(slug)
            || self.active_slug() == Some(slug)
            || self.last_placeholder.as_deref() == Some(slug)
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> bool {
        match self.active.as_mut() {
            Some(page) => {
                page.title = title.into();
                true
            }
            None => false,
        }
    }

    pub fn set_body(&mut self, body: impl Into<String>) -> bool {
        match self.active.as_mut() {
            Some(page) => {
                page.body = body.into();
                true
            }
            None => false,
        }
    }

    /// Create or update the active page, then adopt whatever identity the
    /// server returned. On failure neither the list nor the edits change.
    pub fn save<A: WikiApi>(
        &mut self,
        api: &mut A,
        config: &ConnectionConfig,
    ) -> Result<SaveOutcome, SessionError> {
        let active = self.active.as_ref().ok_or(SessionError::NoActivePage)?;
        let is_new = !self.contains(&active.slug);
        let previous_slug = active.slug.clone();
        debug!(slug = %previous_slug, is_new, "saving page");

        let result = if is_new {
            api.create_page(config, &active.title, &active.body)
        } else {
            api.update_page(config, &active.slug, &active.title, &active.body)
        };
        let saved = match result {
            Ok(page) => page,
            Err(error) => {
                self.notify(NoticeKind::Error, SAVE_FAILED);
                return Err(error.into());
            }
        };

        let summary = saved.summary();
        if is_new {
            self.upsert_entry(None, summary.clone());
        } else {
            self.upsert_entry(Some(&previous_slug), summary.clone());
        }
        self.active = Some(ActivePage::from_page(saved));
        self.notify(NoticeKind::Success, SAVE_SUCCEEDED);

        Ok(if is_new {
            SaveOutcome::Created(summary)
        } else {
            SaveOutcome::Updated(summary)
        })
    }

    /// Delete `slug` remotely, then drop it from the list and, if it was
    /// active, clear the active page.
    pub fn delete_page<A: WikiApi>(
        &mut self,
        api: &mut A,
        config: &ConnectionConfig,
        slug: &str,
    ) -> Result<(), RemoteError> {
        if let Err(error) = api.delete_page(config, slug) {
            self.notify(NoticeKind::Error, DELETE_FAILED);
            return Err(error);
        }
        self.pages.retain(|page| page.slug != slug);
        if self.active_slug() == Some(slug) {
            self.active = None;
        }
        self.notify(NoticeKind::Success, DELETE_SUCCEEDED);
        Ok(())
    }

    pub fn delete_active<A: WikiApi>(
        &mut self,
        api: &mut A,
        config: &ConnectionConfig,
    ) -> Result<(), SessionError> {
        let slug = self
            .active_slug()
            .map(str::to_string)
            .ok_or(SessionError::NoActivePage)?;
        self.delete_page(api, config, &slug)?;
        Ok(())
    }

    // Refresh the entry keyed by `previous` (or the returned slug) in place,
    // append when absent, and keep slugs unique after a server-side rename.
    fn upsert_entry(&mut self, previous: Option<&str>, summary: PageSummary) {
        let key = previous.unwrap_or(&summary.slug);
        let position = self
            .pages
            .iter()
            .position(|page| page.slug == key)
            .or_else(|| self.pages.iter().position(|page| page.slug == summary.slug));
        match position {
            Some(index) => {
                let slug = summary.slug.clone();
                self.pages[index] = summary;
                let mut position = 0usize;
                self.pages.retain(|page| {
                    let keep = page.slug != slug || position == index;
                    position += 1;
                    keep
                });
            }
            None => self.pages.push(summary),
        }
    }

    fn notify(&mut self, kind: NoticeKind, text: &str) {
        self.status = Some(StatusNotice {
            kind,
            text: text.to_string(),
        });
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or_default()
}
