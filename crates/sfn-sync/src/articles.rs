use std::collections::HashSet;
use std::sync::Arc;

use scraper::Html;
use sfn_core::{
    ArticleRecord, ContentMeta, ContentRecord, ContentStatus, NewContent, StoreError,
    UpsertOutcome,
};
use sfn_storage::ContentStore;
use url::Url;

/// Strip all markup and collapse whitespace; entities come back decoded.
pub fn sanitize_text(raw: &str) -> String {
    let stripped = ammonia::Builder::empty()
        .clean_content_tags(HashSet::from(["script", "style"]))
        .clean(raw)
        .to_string();
    let text = Html::parse_fragment(&stripped)
        .root_element()
        .text()
        .collect::<String>();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Keep the default safe-HTML allowlist, drop everything else.
pub fn sanitize_html(raw: &str) -> String {
    ammonia::clean(raw).trim().to_string()
}

/// Absolute http(s) URLs only.
pub fn clean_url(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Maps upstream articles to local content records, one record per external id.
#[derive(Clone)]
pub struct ArticleStore {
    store: Arc<dyn ContentStore>,
}

impl ArticleStore {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self { store }
    }

    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<ContentRecord>, StoreError> {
        self.store.find_by_external_id(external_id).await
    }

    /// Insert on first sight, otherwise refresh title and body in place.
    pub async fn upsert(&self, article: &ArticleRecord) -> Result<(ContentRecord, UpsertOutcome), StoreError> {
        let content = NewContent {
            title: sanitize_text(&article.title),
            body: sanitize_html(&article.summary),
            published_at: article.published_at,
            status: ContentStatus::Publish,
            meta: ContentMeta {
                external_id: article.external_id.clone(),
                news_site: sanitize_text(&article.news_site),
                source_url: clean_url(&article.source_url).unwrap_or_default(),
                image_url: article.image_url.as_deref().and_then(clean_url),
            },
        };
        self.store.upsert(content).await
    }

    /// Write the upstream metadata fields the article actually carries onto
    /// `record`. Fields the article leaves empty keep their stored value.
    pub async fn republish_meta(
        &self,
        record: &ContentRecord,
        article: &ArticleRecord,
    ) -> Result<ContentMeta, StoreError> {
        let meta = merge_meta(&record.meta, article);
        if meta != record.meta {
            self.store.set_meta(record.id, &meta).await?;
        }
        Ok(meta)
    }
}

fn merge_meta(existing: &ContentMeta, article: &ArticleRecord) -> ContentMeta {
    let mut meta = existing.clone();
    let news_site = sanitize_text(&article.news_site);
    if !news_site.is_empty() {
        meta.news_site = news_site;
    }
    if let Some(url) = clean_url(&article.source_url) {
        meta.source_url = url;
    }
    if let Some(url) = article.image_url.as_deref().and_then(clean_url) {
        meta.image_url = Some(url);
    }
    meta
}
