// Copyright 2024 Felix Engl
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The default [ContentAnalyser] of the miner.

use crate::miner::traits::{Analysis, ContentAnalyser};
use crate::url::is_http;
use aho_corasick::{AhoCorasick, BuildError};
use itertools::Itertools;
use scraper::{Html, Selector};
use std::sync::LazyLock;
use url::Url;

static LINK_HOLDER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("The link selector is valid."));

/// Hrefs longer than this are ignored.
const MAX_HREF_LENGTH: usize = 128;

const IGNORED_SUFFIXES: [&str; 8] = [
    ".pdf", ".png", ".mp4", ".jpg", ".apk", ".zip", ".exe", ".rpm",
];

fn is_followable(href: &str) -> bool {
    if href.is_empty() || href.len() > MAX_HREF_LENGTH {
        return false;
    }
    if href.contains("void(0)") || href.starts_with("mailto:") || href.starts_with("tel:") {
        return false;
    }
    let lowered = href.to_ascii_lowercase();
    !IGNORED_SUFFIXES
        .iter()
        .any(|suffix| lowered.ends_with(suffix))
}

/// Extracts the links of the anchors in a page and searches for keywords.
#[derive(Debug, Clone)]
pub struct LinkAnalyser {
    keywords: Vec<String>,
    matcher: Option<AhoCorasick>,
}

impl LinkAnalyser {
    pub fn new<I, P>(keywords: I) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        let keywords = keywords
            .into_iter()
            .map(|keyword| keyword.as_ref().to_string())
            .filter(|keyword| !keyword.is_empty())
            .collect_vec();
        let matcher = if keywords.is_empty() {
            None
        } else {
            Some(
                AhoCorasick::builder()
                    .ascii_case_insensitive(true)
                    .build(&keywords)?,
            )
        };
        Ok(Self { keywords, matcher })
    }

    /// The first keyword found in [content].
    pub fn find_keyword(&self, content: &str) -> Option<String> {
        let found = self.matcher.as_ref()?.find(content)?;
        self.keywords.get(found.pattern().as_usize()).cloned()
    }

    /// The absolute http(s) links of the anchors in [content].
    pub fn extract_links(&self, url: &str, content: &str) -> Vec<String> {
        let base = match Url::parse(url) {
            Ok(base) => base,
            Err(err) => {
                log::debug!("Can not resolve links of {url}: {err}");
                return Vec::new();
            }
        };
        let html = Html::parse_document(content);
        html.select(&LINK_HOLDER)
            .filter_map(|element| element.value().attr("href"))
            .map(str::trim)
            .filter(|href| is_followable(href))
            .filter_map(|href| base.join(href).ok())
            .filter(is_http)
            .map(|mut link| {
                link.set_fragment(None);
                link.to_string()
            })
            .unique()
            .collect_vec()
    }
}

impl ContentAnalyser for LinkAnalyser {
    fn analyse(&self, _host: &str, url: &str, content: &str) -> Analysis {
        Analysis {
            matched_keyword: self.find_keyword(content),
            discovered_links: self.extract_links(url, content),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
            <a href="/about">About</a>
            <a href="https://other.org/page#top">Other</a>
            <a href="https://other.org/page">Other again</a>
            <a href="javascript:void(0)">Nothing</a>
            <a href="mailto:someone@example.com">Mail</a>
            <a href="tel:12345">Call</a>
            <a href="/files/report.PDF">Report</a>
            <a href="ftp://files.example.com/">Ftp</a>
            <a href="">Empty</a>
            <a>No href</a>
            <p>Some Gold and silver</p>
        </body></html>
    "#;

    #[test]
    fn extracts_followable_links() {
        let analyser = LinkAnalyser::new(Vec::<String>::new()).unwrap();
        let links = analyser.extract_links("http://example.com/index.html", PAGE);
        assert_eq!(
            vec![
                "http://example.com/about".to_string(),
                "https://other.org/page".to_string()
            ],
            links
        );
    }

    #[test]
    fn long_hrefs_are_ignored() {
        let analyser = LinkAnalyser::new(Vec::<String>::new()).unwrap();
        let page = format!("<a href=\"/{}\">long</a>", "a".repeat(MAX_HREF_LENGTH));
        assert!(analyser.extract_links("http://example.com/", &page).is_empty());
    }

    #[test]
    fn reports_the_first_keyword() {
        let analyser = LinkAnalyser::new(["silver", "gold"]).unwrap();
        let analysis = analyser.analyse("example.com", "http://example.com/", PAGE);
        assert_eq!(Some("gold".to_string()), analysis.matched_keyword);
        assert_eq!(2, analysis.discovered_links.len());

        let none = LinkAnalyser::new(["platinum"]).unwrap();
        assert_eq!(None, none.find_keyword(PAGE));
    }
}
