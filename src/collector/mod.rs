//! Collector stage: pick one unseen article from the knowledge source.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;

pub mod filters;
pub mod html;
pub mod wiki;

use crate::config::CollectorConfig;
use crate::error::{Classify, ErrorCategory};
use crate::http::ServiceError;
use crate::records::ArticleRecord;
use crate::state::SeenSet;
use crate::workspace::{JobDir, Workspace, WorkspaceError};

pub use wiki::WikiClient;

/// Rendered page as returned by the knowledge source
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    pub html: String,
    /// `File:` titles of images used on the page, in article order
    pub image_titles: Vec<String>,
}

/// Where articles come from
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Title of a random content page
    async fn random_title(&self) -> Result<String, ServiceError>;

    /// Category names of a page, without the `Category:` prefix
    async fn page_categories(&self, title: &str) -> Result<Vec<String>, ServiceError>;

    async fn fetch_page(&self, title: &str) -> Result<PageContent, ServiceError>;

    /// Direct URLs for image titles, in the order given
    async fn resolve_image_urls(&self, file_titles: &[String]) -> Result<Vec<String>, ServiceError>;

    /// Public URL of a page
    fn page_url(&self, title: &str) -> String;
}

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error(transparent)]
    Source(#[from] ServiceError),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("failed to record seen article: {0}")]
    SeenLog(#[source] std::io::Error),
}

impl Classify for CollectError {
    fn category(&self) -> ErrorCategory {
        match self {
            CollectError::Source(e) => e.category(),
            CollectError::Workspace(e) => e.category(),
            CollectError::SeenLog(_) => ErrorCategory::Permanent,
        }
    }
}

#[derive(Debug)]
pub enum CollectOutcome {
    Collected { article: ArticleRecord, job: JobDir },
    /// No acceptable unseen article turned up within the attempt budget
    Exhausted { attempts: usize },
}

pub struct Collector {
    source: Box<dyn KnowledgeSource>,
    config: CollectorConfig,
}

impl Collector {
    pub fn new(source: Box<dyn KnowledgeSource>, config: CollectorConfig) -> Self {
        Self { source, config }
    }

    /// Find one unseen article, persist it as a new job and mark it seen.
    ///
    /// The article record is durable before the id reaches the seen log.
    pub async fn collect(&self, seen: &mut SeenSet, workspace: &Workspace) -> Result<CollectOutcome, CollectError> {
        let max_attempts = self.config.max_attempts;
        let mut rejected: HashSet<String> = HashSet::new();

        tracing::info!("Looking for a new article ({} already seen)", seen.len());

        for attempt in 1..=max_attempts {
            let title = self.source.random_title().await?;
            tracing::debug!("Attempt {}/{}: '{}'", attempt, max_attempts, title);

            if seen.contains(&title) || rejected.contains(&title) {
                tracing::debug!("'{}' has already been considered, skipping", title);
                continue;
            }

            let categories = self.source.page_categories(&title).await?;

            let excluded = filters::excluded_by(&categories, &self.config.exclude_categories);
            if !excluded.is_empty() {
                tracing::info!("'{}' is in an excluded category ({}), skipping", title, excluded.join(", "));
                rejected.insert(title);
                continue;
            }

            if !filters::matches_include(&categories, &self.config.include_categories) {
                tracing::debug!("'{}' matches none of the included categories, skipping", title);
                rejected.insert(title);
                continue;
            }

            let page = self.source.fetch_page(&title).await?;
            let parsed = html::parse_article(&page.html);
            let body = parsed.body();
            if body.trim().is_empty() {
                tracing::info!("'{}' has no body text, skipping", title);
                rejected.insert(title);
                continue;
            }

            let image_urls = self.image_urls(&title, &page.image_titles).await;
            let category = filters::folder_category(
                &categories,
                &self.config.avoid_folder_categories,
                &self.config.exclude_categories,
            );

            let article = ArticleRecord {
                id: title.clone(),
                url: self.source.page_url(&title),
                title,
                body,
                sections: parsed.sections,
                infobox: parsed.infobox,
                appearances: parsed.appearances,
                image_urls,
                categories,
                category,
                collected_at: Utc::now(),
            };

            let job = workspace.create_job(&article.title)?;
            job.store(&article)?;
            seen.mark(&article.id).map_err(CollectError::SeenLog)?;

            tracing::info!(
                "Collected '{}' into job '{}' (category: {}, {} images)",
                article.title,
                job.id,
                article.category,
                article.image_urls.len()
            );
            return Ok(CollectOutcome::Collected { article, job });
        }

        tracing::warn!("No new article found after {} attempts", max_attempts);
        Ok(CollectOutcome::Exhausted { attempts: max_attempts })
    }

    /// Image URLs for the article. Failures leave the article without images.
    async fn image_urls(&self, title: &str, image_titles: &[String]) -> Vec<String> {
        let mut candidates = filters::filter_image_titles(image_titles, &self.config.image_exclude_keywords);
        if candidates.is_empty() {
            return Vec::new();
        }
        // a few spares in case some titles do not resolve
        candidates.truncate(self.config.max_images * 2);

        match self.source.resolve_image_urls(&candidates).await {
            Ok(mut urls) => {
                urls.truncate(self.config.max_images);
                urls
            }
            Err(e) => {
                tracing::warn!("Could not resolve images for '{}': {}", title, e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use tempfile::TempDir;

    const PAGE: &str = r#"<p>Dagobah was a swamp planet.</p><h2><span class="mw-headline">History</span></h2><p>Yoda lived there.</p>"#;

    fn config() -> CollectorConfig {
        CollectorConfig {
            max_attempts: 5,
            exclude_categories: vec!["Real-world people".into()],
            ..CollectorConfig::default()
        }
    }

    fn setup() -> (TempDir, Workspace, SeenSet) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::new(dir.path());
        workspace.ensure_layout().unwrap();
        let seen = SeenSet::load(&workspace.seen_log(), Vec::new()).unwrap();
        (dir, workspace, seen)
    }

    fn page_source(titles: Vec<&'static str>) -> MockKnowledgeSource {
        let mut source = MockKnowledgeSource::new();
        let mut queue = titles.into_iter();
        source
            .expect_random_title()
            .returning(move || Ok(queue.next().unwrap_or("Dagobah").to_string()));
        source.expect_page_categories().returning(|title| {
            Ok(match title {
                "George Lucas" => vec!["Real-world people".to_string()],
                _ => vec!["Planets".to_string(), "Legends articles".to_string()],
            })
        });
        source.expect_fetch_page().returning(|title| {
            Ok(PageContent {
                html: if title == "Empty Page" { String::new() } else { PAGE.to_string() },
                image_titles: vec!["File:Dagobah.jpg".into(), "File:Site-logo.png".into()],
            })
        });
        source
            .expect_page_url()
            .returning(|title| format!("https://example.org/wiki/{}", title));
        source
    }

    #[tokio::test]
    async fn test_collects_and_marks_seen() {
        let (_dir, workspace, mut seen) = setup();
        let mut source = page_source(vec!["Dagobah"]);
        source
            .expect_resolve_image_urls()
            .with(eq(vec!["File:Dagobah.jpg".to_string()]))
            .returning(|_| Ok(vec!["https://img.example.org/Dagobah.jpg".into()]));

        let collector = Collector::new(Box::new(source), config());
        let outcome = collector.collect(&mut seen, &workspace).await.unwrap();

        let CollectOutcome::Collected { article, job } = outcome else {
            panic!("expected an article");
        };
        assert_eq!(article.id, "Dagobah");
        assert_eq!(article.category, "Planets");
        assert_eq!(article.sections.len(), 2);
        assert_eq!(article.image_urls, vec!["https://img.example.org/Dagobah.jpg".to_string()]);
        assert!(job.has::<ArticleRecord>());
        assert!(seen.contains("Dagobah"));
    }

    #[tokio::test]
    async fn test_never_returns_a_seen_article() {
        let (_dir, workspace, mut seen) = setup();
        let mut source = page_source(vec![]);
        source.expect_resolve_image_urls().returning(|_| Ok(Vec::new()));

        let collector = Collector::new(Box::new(source), config());

        let first = collector.collect(&mut seen, &workspace).await.unwrap();
        assert!(matches!(first, CollectOutcome::Collected { .. }));

        // the source keeps offering the same title
        let second = collector.collect(&mut seen, &workspace).await.unwrap();
        assert!(matches!(second, CollectOutcome::Exhausted { attempts: 5 }));
        assert_eq!(workspace.list_jobs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skips_excluded_and_empty_pages() {
        let (_dir, workspace, mut seen) = setup();
        let mut source = page_source(vec!["George Lucas", "Empty Page", "Dagobah"]);
        source.expect_resolve_image_urls().returning(|_| Ok(Vec::new()));

        let collector = Collector::new(Box::new(source), config());
        let outcome = collector.collect(&mut seen, &workspace).await.unwrap();

        let CollectOutcome::Collected { article, .. } = outcome else {
            panic!("expected an article");
        };
        assert_eq!(article.id, "Dagobah");
        assert!(!seen.contains("George Lucas"));
        assert!(!seen.contains("Empty Page"));
    }

    #[tokio::test]
    async fn test_image_failure_is_not_fatal() {
        let (_dir, workspace, mut seen) = setup();
        let mut source = page_source(vec!["Dagobah"]);
        source
            .expect_resolve_image_urls()
            .returning(|_| Err(ServiceError::Timeout { service: "wiki" }));

        let collector = Collector::new(Box::new(source), config());
        let outcome = collector.collect(&mut seen, &workspace).await.unwrap();

        let CollectOutcome::Collected { article, .. } = outcome else {
            panic!("expected an article");
        };
        assert!(article.image_urls.is_empty());
    }

    #[tokio::test]
    async fn test_source_errors_propagate_with_category() {
        let (_dir, workspace, mut seen) = setup();
        let mut source = MockKnowledgeSource::new();
        source.expect_random_title().returning(|| {
            Err(ServiceError::Status {
                service: "wiki",
                status: 503,
                message: "down".into(),
                retry_after: None,
            })
        });

        let collector = Collector::new(Box::new(source), config());
        let err = collector.collect(&mut seen, &workspace).await.unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Transient);
    }
}
