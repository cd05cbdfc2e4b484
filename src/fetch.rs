use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use reqwest::Url;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::parser::{html, Classifier};

pub const DEFAULT_INDEX_URL: &str = "https://plantops.uwaterloo.ca/service-interruptions/";

/// A relevant service-interruption notice. `link` is the href as it appears
/// on the index page and doubles as the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Announcement {
    pub title: String,
    pub link: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("bad status: {0}")]
    Status(u16),
    #[error("unreadable body: {0}")]
    Body(String),
    #[error("cannot resolve link {link:?}: {reason}")]
    Url { link: String, reason: String },
}

/// Status and body of one GET. Body is empty for non-200 responses.
#[derive(Debug, Clone)]
pub struct Page {
    pub status: u16,
    pub body: String,
}

impl Page {
    pub fn ok(body: impl Into<String>) -> Self {
        Page {
            status: 200,
            body: body.into(),
        }
    }
}

pub trait PageSource {
    fn get(&self, url: &str) -> impl Future<Output = Result<Page, FetchError>> + Send;
}

pub struct HttpSource {
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(user_agent: &str, timeout: Option<Duration>) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent);
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Request(e.to_string()))?;
        Ok(HttpSource { client })
    }
}

impl PageSource for HttpSource {
    async fn get(&self, url: &str) -> Result<Page, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Request(e.to_string()))?;
        let status = resp.status().as_u16();
        if status != 200 {
            return Ok(Page {
                status,
                body: String::new(),
            });
        }
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::Body(e.to_string()))?;
        Ok(Page::ok(body))
    }
}

/// What happened to one notice link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoticeOutcome {
    Relevant(Announcement),
    Irrelevant { link: String, title: String },
    Skipped { link: String, reason: FetchError },
}

impl NoticeOutcome {
    pub fn into_announcement(self) -> Option<Announcement> {
        match self {
            NoticeOutcome::Relevant(a) => Some(a),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub concurrency: usize,
    pub progress: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            concurrency: 4,
            progress: false,
        }
    }
}

/// Fetch the index page, then every notice it links to, and classify each
/// notice. Only an index failure is an error; a notice that cannot be
/// fetched comes back as `Skipped`. Outcomes follow index order.
pub async fn fetch_notices<S>(
    source: Arc<S>,
    index_url: &str,
    classifier: &Classifier,
    opts: &FetchOptions,
) -> Result<Vec<NoticeOutcome>, FetchError>
where
    S: PageSource + Send + Sync + 'static,
{
    info!("Fetching index page: {}", index_url);
    let index = source.get(index_url).await?;
    if index.status != 200 {
        return Err(FetchError::Status(index.status));
    }
    let base = Url::parse(index_url).map_err(|e| FetchError::Url {
        link: index_url.to_string(),
        reason: e.to_string(),
    })?;

    let links = html::notice_links(&index.body);
    info!("Found {} notice links", links.len());

    let pages = fetch_pages(source, &base, links, opts).await;

    // Classification is CPU-only and runs on the blocking pool; order is kept
    // by the indexed collect.
    let classifier = classifier.clone();
    let outcomes: Vec<NoticeOutcome> = tokio::task::spawn_blocking(move || {
        pages
            .into_par_iter()
            .map(|(link, page)| classify_notice(&classifier, link, page))
            .collect::<Vec<_>>()
    })
    .await
    .map_err(|e| FetchError::Request(format!("classify task failed: {}", e)))?;

    for outcome in &outcomes {
        match outcome {
            NoticeOutcome::Relevant(a) => debug!(link = %a.link, title = %a.title, "relevant"),
            NoticeOutcome::Irrelevant { link, title } => debug!(%link, %title, "not relevant"),
            NoticeOutcome::Skipped { link, reason } => warn!("Skipping notice {}: {}", link, reason),
        }
    }
    Ok(outcomes)
}

/// Relevant announcements only, in index order.
pub async fn fetch_and_parse<S>(
    source: Arc<S>,
    index_url: &str,
    classifier: &Classifier,
    opts: &FetchOptions,
) -> Result<Vec<Announcement>, FetchError>
where
    S: PageSource + Send + Sync + 'static,
{
    let outcomes = fetch_notices(source, index_url, classifier, opts).await?;
    Ok(outcomes
        .into_iter()
        .filter_map(NoticeOutcome::into_announcement)
        .collect())
}

async fn fetch_pages<S>(
    source: Arc<S>,
    base: &Url,
    links: Vec<String>,
    opts: &FetchOptions,
) -> Vec<(String, Result<String, FetchError>)>
where
    S: PageSource + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(opts.concurrency.max(1)));
    let pb = if opts.progress {
        let pb = ProgressBar::new(links.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} notices")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        pb
    } else {
        ProgressBar::hidden()
    };

    let mut handles = Vec::with_capacity(links.len());
    for link in &links {
        let source = Arc::clone(&source);
        let sem = Arc::clone(&semaphore);
        let target = resolve_link(base, link);

        handles.push(tokio::spawn(async move {
            let url = target?;
            let _permit = sem
                .acquire_owned()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))?;
            let page = source.get(url.as_str()).await?;
            if page.status != 200 {
                return Err(FetchError::Status(page.status));
            }
            Ok::<String, FetchError>(page.body)
        }));
    }

    // Await in spawn order so results line up with the index page.
    let mut pages = Vec::with_capacity(links.len());
    for (link, handle) in links.into_iter().zip(handles) {
        let result = match handle.await {
            Ok(r) => r,
            Err(e) => Err(FetchError::Request(format!("fetch task failed: {}", e))),
        };
        pb.inc(1);
        pages.push((link, result));
    }
    pb.finish_and_clear();
    pages
}

fn resolve_link(base: &Url, link: &str) -> Result<Url, FetchError> {
    base.join(link).map_err(|e| FetchError::Url {
        link: link.to_string(),
        reason: e.to_string(),
    })
}

fn classify_notice(
    classifier: &Classifier,
    link: String,
    page: Result<String, FetchError>,
) -> NoticeOutcome {
    let body = match page {
        Ok(body) => body,
        Err(reason) => return NoticeOutcome::Skipped { link, reason },
    };
    let title = html::notice_title(&body);
    if classifier.is_relevant(&title, &body) {
        NoticeOutcome::Relevant(Announcement { title, link })
    } else {
        NoticeOutcome::Irrelevant { link, title }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::*;

    /// In-memory pages keyed by absolute URL. Unknown URLs fail like a
    /// refused connection.
    #[derive(Default)]
    pub(crate) struct StaticSource {
        pages: HashMap<String, Result<Page, FetchError>>,
    }

    impl StaticSource {
        pub(crate) fn with(mut self, url: &str, page: Result<Page, FetchError>) -> Self {
            self.pages.insert(url.to_string(), page);
            self
        }

        pub(crate) fn fixture(self, url: &str, name: &str) -> Self {
            let body = std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap();
            self.with(url, Ok(Page::ok(body)))
        }
    }

    impl PageSource for StaticSource {
        fn get(&self, url: &str) -> impl Future<Output = Result<Page, FetchError>> + Send {
            let result = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or_else(|| Err(FetchError::Request("connection refused".into())));
            async move { result }
        }
    }

    pub(crate) fn notice_url(id: u32) -> String {
        format!("{}notice.php?ID={}", DEFAULT_INDEX_URL, id)
    }

    /// Index fixture with its four notices: CPH electrical, SCH water,
    /// E2/E3 power, E3 electrical (absolute link).
    pub(crate) fn plantops_source() -> StaticSource {
        StaticSource::default()
            .fixture(DEFAULT_INDEX_URL, "index")
            .fixture(&notice_url(2818), "notice_cph")
            .fixture(&notice_url(2819), "notice_water")
            .fixture(&notice_url(2820), "notice_e2")
            .with(
                &notice_url(2821),
                Ok(Page::ok("<h3>Electrical shutdown - Engineering 3</h3>")),
            )
    }

    fn classifier() -> Classifier {
        Classifier::for_buildings(["CPH", "E2"])
    }

    #[tokio::test]
    async fn relevant_notices_in_index_order() {
        let source = Arc::new(plantops_source());
        let found = fetch_and_parse(source, DEFAULT_INDEX_URL, &classifier(), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(
            found,
            vec![
                Announcement {
                    title: "Electrical shutdown".into(),
                    link: "notice.php?ID=2818".into(),
                },
                Announcement {
                    title: "Power outage - Engineering 2 & 3".into(),
                    link: "notice.php?ID=2820".into(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn outcomes_cover_every_link() {
        let source = Arc::new(plantops_source());
        let outcomes = fetch_notices(source, DEFAULT_INDEX_URL, &classifier(), &FetchOptions::default())
            .await
            .unwrap();
        let links: Vec<&str> = outcomes
            .iter()
            .map(|o| match o {
                NoticeOutcome::Relevant(a) => a.link.as_str(),
                NoticeOutcome::Irrelevant { link, .. } | NoticeOutcome::Skipped { link, .. } => link,
            })
            .collect();
        assert_eq!(
            links,
            vec![
                "notice.php?ID=2818",
                "notice.php?ID=2819",
                "notice.php?ID=2820",
                "https://plantops.uwaterloo.ca/service-interruptions/notice.php?ID=2821",
            ]
        );
        assert!(matches!(
            &outcomes[1],
            NoticeOutcome::Irrelevant { title, .. } if title == "Domestic water shutdown"
        ));
        // absolute link, E3 is not a target
        assert!(matches!(&outcomes[3], NoticeOutcome::Irrelevant { .. }));
    }

    #[tokio::test]
    async fn absolute_link_kept_verbatim() {
        let source = Arc::new(plantops_source());
        let e3 = Classifier::for_buildings(["E3"]);
        let found = fetch_and_parse(source, DEFAULT_INDEX_URL, &e3, &FetchOptions::default())
            .await
            .unwrap();
        let links: Vec<&str> = found.iter().map(|a| a.link.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "notice.php?ID=2820",
                "https://plantops.uwaterloo.ca/service-interruptions/notice.php?ID=2821",
            ]
        );
    }

    #[tokio::test]
    async fn failed_notice_is_skipped_not_fatal() {
        let source = Arc::new(
            plantops_source()
                .with(&notice_url(2818), Ok(Page { status: 503, body: String::new() }))
                .with(&notice_url(2819), Err(FetchError::Request("timed out".into()))),
        );
        let opts = FetchOptions { concurrency: 1, progress: false };
        let outcomes = fetch_notices(source, DEFAULT_INDEX_URL, &classifier(), &opts)
            .await
            .unwrap();
        assert_eq!(
            outcomes[0],
            NoticeOutcome::Skipped {
                link: "notice.php?ID=2818".into(),
                reason: FetchError::Status(503),
            }
        );
        assert!(matches!(outcomes[1], NoticeOutcome::Skipped { .. }));

        let found: Vec<Announcement> = outcomes
            .into_iter()
            .filter_map(NoticeOutcome::into_announcement)
            .collect();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].link, "notice.php?ID=2820");
    }

    #[tokio::test]
    async fn unreadable_body_is_skipped_in_order() {
        let source = Arc::new(
            plantops_source().with(
                &notice_url(2819),
                Err(FetchError::Body("error decoding response body".into())),
            ),
        );
        let outcomes = fetch_notices(source, DEFAULT_INDEX_URL, &classifier(), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(matches!(&outcomes[0], NoticeOutcome::Relevant(a) if a.link == "notice.php?ID=2818"));
        assert_eq!(
            outcomes[1],
            NoticeOutcome::Skipped {
                link: "notice.php?ID=2819".into(),
                reason: FetchError::Body("error decoding response body".into()),
            }
        );
        assert!(matches!(&outcomes[2], NoticeOutcome::Relevant(a) if a.link == "notice.php?ID=2820"));
    }

    #[tokio::test]
    async fn unresolvable_link_is_skipped_in_order() {
        let index = r#"
            <a class="w3-leftbar" href="notice.php?ID=2818">CPH</a>
            <a class="w3-leftbar" href="http://[bad">Broken</a>
            <a class="w3-leftbar" href="notice.php?ID=2820">E2</a>
        "#;
        let source = Arc::new(plantops_source().with(DEFAULT_INDEX_URL, Ok(Page::ok(index))));
        let outcomes = fetch_notices(source, DEFAULT_INDEX_URL, &classifier(), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(&outcomes[0], NoticeOutcome::Relevant(a) if a.link == "notice.php?ID=2818"));
        assert!(matches!(
            &outcomes[1],
            NoticeOutcome::Skipped { link, reason: FetchError::Url { .. } } if link == "http://[bad"
        ));
        assert!(matches!(&outcomes[2], NoticeOutcome::Relevant(a) if a.link == "notice.php?ID=2820"));
    }

    #[tokio::test]
    async fn padded_href_resolves_and_keeps_its_link() {
        let index = r#"<a class="w3-leftbar" href=" notice.php?ID=2818 ">CPH</a>"#;
        let source = Arc::new(plantops_source().with(DEFAULT_INDEX_URL, Ok(Page::ok(index))));
        let found = fetch_and_parse(source, DEFAULT_INDEX_URL, &classifier(), &FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].link, " notice.php?ID=2818 ");
    }

    #[tokio::test]
    async fn index_bad_status_is_an_error() {
        let source = Arc::new(
            plantops_source().with(DEFAULT_INDEX_URL, Ok(Page { status: 500, body: String::new() })),
        );
        let err = fetch_and_parse(source, DEFAULT_INDEX_URL, &classifier(), &FetchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Status(500));
        assert!(err.to_string().starts_with("bad status"));
    }

    #[tokio::test]
    async fn index_unreachable_is_an_error() {
        let source = Arc::new(StaticSource::default());
        let err = fetch_and_parse(source, DEFAULT_INDEX_URL, &classifier(), &FetchOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("request failed"));
    }

    #[tokio::test]
    async fn empty_index_yields_nothing() {
        let source = Arc::new(
            StaticSource::default().with(DEFAULT_INDEX_URL, Ok(Page::ok("<html><body></body></html>"))),
        );
        let found = fetch_and_parse(source, DEFAULT_INDEX_URL, &classifier(), &FetchOptions::default())
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn resolves_relative_and_absolute_links() {
        let base = Url::parse(DEFAULT_INDEX_URL).unwrap();
        assert_eq!(
            resolve_link(&base, "notice.php?ID=7").unwrap().as_str(),
            "https://plantops.uwaterloo.ca/service-interruptions/notice.php?ID=7"
        );
        assert_eq!(
            resolve_link(&base, "https://example.org/n?ID=1").unwrap().as_str(),
            "https://example.org/n?ID=1"
        );
    }
}
