use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;

use super::{KnowledgeSource, PageContent};
use crate::config::RetryConfig;
use crate::http::{check_status, ServiceError};
use crate::retry::with_retry;

const SERVICE: &str = "knowledge source";

/// Titles per `prop=imageinfo` request
const IMAGE_BATCH: usize = 50;

/// MediaWiki action API client
pub struct WikiClient {
    client: Client,
    api_url: String,
    retry: RetryConfig,
}

#[derive(Debug, Deserialize)]
struct RandomResponse {
    query: RandomQuery,
}

#[derive(Debug, Deserialize)]
struct RandomQuery {
    random: Vec<TitleEntry>,
}

#[derive(Debug, Deserialize)]
struct TitleEntry {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PagesResponse {
    query: PagesQuery,
}

#[derive(Debug, Deserialize)]
struct PagesQuery {
    #[serde(default)]
    pages: Vec<PageEntry>,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    categories: Vec<TitleEntry>,
    #[serde(default)]
    imageinfo: Vec<ImageInfo>,
}

#[derive(Debug, Deserialize)]
struct ImageInfo {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ParseResponse {
    parse: Option<ParsedEntry>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ParsedEntry {
    text: String,
    #[serde(default)]
    images: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    info: String,
}

impl WikiClient {
    pub fn new(client: Client, api_url: impl Into<String>, retry: RetryConfig) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            retry,
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, params: &[(&str, &str)]) -> Result<T, ServiceError> {
        with_retry(&self.retry, "wiki request", || async move {
            let response = self
                .client
                .get(&self.api_url)
                .query(&[("format", "json"), ("formatversion", "2")])
                .query(params)
                .send()
                .await
                .map_err(|e| ServiceError::from_reqwest(SERVICE, e))?;

            check_status(SERVICE, response)
                .await?
                .json::<T>()
                .await
                .map_err(|e| ServiceError::from_reqwest(SERVICE, e))
        })
        .await
    }
}

#[async_trait]
impl KnowledgeSource for WikiClient {
    async fn random_title(&self) -> Result<String, ServiceError> {
        let response: RandomResponse = self
            .get_json(&[
                ("action", "query"),
                ("list", "random"),
                ("rnnamespace", "0"),
                ("rnlimit", "1"),
            ])
            .await?;

        response
            .query
            .random
            .into_iter()
            .next()
            .map(|entry| entry.title)
            .ok_or_else(|| ServiceError::malformed(SERVICE, "random query returned no pages"))
    }

    async fn page_categories(&self, title: &str) -> Result<Vec<String>, ServiceError> {
        let response: PagesResponse = self
            .get_json(&[
                ("action", "query"),
                ("titles", title),
                ("prop", "categories"),
                ("cllimit", "max"),
            ])
            .await?;

        let page = response
            .query
            .pages
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::malformed(SERVICE, format!("no page data for '{}'", title)))?;

        Ok(page
            .categories
            .into_iter()
            .map(|c| c.title.trim_start_matches("Category:").to_string())
            .collect())
    }

    async fn fetch_page(&self, title: &str) -> Result<PageContent, ServiceError> {
        let response: ParseResponse = self
            .get_json(&[
                ("action", "parse"),
                ("page", title),
                ("prop", "text|images"),
                ("disableeditsection", "1"),
                ("redirects", "1"),
            ])
            .await?;

        if let Some(error) = response.error {
            return Err(ServiceError::rejected(SERVICE, format!("{}: {}", error.code, error.info)));
        }

        let parsed = response
            .parse
            .ok_or_else(|| ServiceError::malformed(SERVICE, format!("no parse output for '{}'", title)))?;

        Ok(PageContent {
            html: parsed.text,
            image_titles: parsed
                .images
                .into_iter()
                .map(|name| format!("File:{}", name.replace('_', " ")))
                .collect(),
        })
    }

    async fn resolve_image_urls(&self, file_titles: &[String]) -> Result<Vec<String>, ServiceError> {
        let mut by_title: HashMap<String, String> = HashMap::new();

        for batch in file_titles.chunks(IMAGE_BATCH) {
            let joined = batch.join("|");
            let response: PagesResponse = self
                .get_json(&[
                    ("action", "query"),
                    ("titles", joined.as_str()),
                    ("prop", "imageinfo"),
                    ("iiprop", "url"),
                ])
                .await?;

            for page in response.query.pages {
                if page.missing {
                    continue;
                }
                if let Some(info) = page.imageinfo.into_iter().next() {
                    by_title.insert(page.title, info.url);
                }
            }
        }

        // keep article order, not response order
        Ok(file_titles
            .iter()
            .filter_map(|title| by_title.remove(title))
            .collect())
    }

    fn page_url(&self, title: &str) -> String {
        let base = self.api_url.trim_end_matches("api.php").trim_end_matches('/');
        format!("{}/wiki/{}", base, urlencoding::encode(&title.replace(' ', "_")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> WikiClient {
        WikiClient::new(Client::new(), "https://starwars.fandom.com/api.php", RetryConfig::default())
    }

    #[test]
    fn test_page_url() {
        assert_eq!(
            client().page_url("Mace Windu"),
            "https://starwars.fandom.com/wiki/Mace_Windu"
        );
        assert_eq!(
            client().page_url("Darth Plagueis/Legends"),
            "https://starwars.fandom.com/wiki/Darth_Plagueis%2FLegends"
        );
    }

    #[test]
    fn test_response_shapes() {
        let random: RandomResponse =
            serde_json::from_str(r#"{"batchcomplete":true,"query":{"random":[{"id":1,"ns":0,"title":"Yoda"}]}}"#)
                .unwrap();
        assert_eq!(random.query.random[0].title, "Yoda");

        let pages: PagesResponse = serde_json::from_str(
            r#"{"query":{"pages":[{"pageid":2,"ns":0,"title":"Yoda","categories":[{"ns":14,"title":"Category:Jedi Masters"}]}]}}"#,
        )
        .unwrap();
        assert_eq!(pages.query.pages[0].categories[0].title, "Category:Jedi Masters");

        let parsed: ParseResponse = serde_json::from_str(
            r#"{"parse":{"title":"Yoda","pageid":2,"text":"<p>Hi</p>","images":["Yoda_SWSB.png"]}}"#,
        )
        .unwrap();
        assert_eq!(parsed.parse.unwrap().images, vec!["Yoda_SWSB.png".to_string()]);
    }
}
