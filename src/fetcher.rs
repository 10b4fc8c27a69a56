use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{COOKIE, USER_AGENT};

use crate::error::TransportError;

const PORTAL_USER_AGENT: &str = "orioks-monitor/0.1";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PageKind {
    HomeworkList,
    MarksOverview,
}

impl fmt::Display for PageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageKind::HomeworkList => f.write_str("homework list"),
            PageKind::MarksOverview => f.write_str("marks overview"),
        }
    }
}

/// Retrieves raw portal markup. Timeouts and retries are the fetcher's concern.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, page: PageKind) -> Result<String, TransportError>;
}

/// Absolute portal locations derived from one base URL.
#[derive(Debug, Clone)]
pub struct PortalUrls {
    base: String,
}

impl PortalUrls {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn page(&self, page: PageKind) -> String {
        match page {
            PageKind::HomeworkList => format!("{}/student/homework/list", self.base),
            PageKind::MarksOverview => format!("{}/student/student", self.base),
        }
    }

    /// Template with an `{id}` placeholder for a homework thread.
    pub fn homework_thread_template(&self) -> String {
        format!("{}/student/homework/view?id_thread={{id}}", self.base)
    }
}

/// Portal client authenticated by an existing session cookie.
#[derive(Clone)]
pub struct PortalClient {
    http: reqwest::Client,
    urls: PortalUrls,
    session_cookie: String,
}

impl PortalClient {
    pub fn new(urls: PortalUrls, session_cookie: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            urls,
            session_cookie: session_cookie.into(),
        })
    }
}

#[async_trait]
impl Fetcher for PortalClient {
    async fn fetch(&self, page: PageKind) -> Result<String, TransportError> {
        let url = self.urls.page(page);
        tracing::debug!(%page, url, "Fetching portal page");

        let resp = self
            .http
            .get(&url)
            .header(USER_AGENT, PORTAL_USER_AGENT)
            .header(COOKIE, &self.session_cookie)
            .send()
            .await
            .map_err(|err| TransportError::new(page, err.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportError::new(page, format!("HTTP {status}")));
        }

        resp.text()
            .await
            .map_err(|err| TransportError::new(page, format!("reading body: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_built_from_base() {
        let urls = PortalUrls::new("https://orioks.miet.ru/");
        assert_eq!(urls.page(PageKind::MarksOverview), "https://orioks.miet.ru/student/student");
        assert_eq!(
            urls.page(PageKind::HomeworkList),
            "https://orioks.miet.ru/student/homework/list"
        );
        assert_eq!(
            urls.homework_thread_template(),
            "https://orioks.miet.ru/student/homework/view?id_thread={id}"
        );
    }
}
