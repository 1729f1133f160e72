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

//! The default [Fetcher] of the miner.

use crate::config::MinerConfig;
use crate::miner::traits::Fetcher;
use crate::status::FetchError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use ubyte::ToByteUnit;

/// Fetches pages with [reqwest]. Only textual content is accepted.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_body_size: u64,
}

impl HttpFetcher {
    pub fn new(config: &MinerConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout())
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()?;
        Ok(Self {
            client,
            max_body_size: config.max_body_size,
        })
    }
}

fn classify(url: &str, err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(url.to_string())
    } else {
        FetchError::Network(format!("{url}: {err}"))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| classify(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Network(format!("{url} returned {status}")));
        }

        if let Some(content_type) = response.headers().get(CONTENT_TYPE) {
            let content_type = content_type.to_str().unwrap_or_default().to_lowercase();
            if !content_type.contains("text") {
                return Err(FetchError::TypeMismatch(format!(
                    "{url} has the content-type {content_type}"
                )));
            }
        }

        if let Some(length) = response.content_length() {
            if length > self.max_body_size {
                return Err(FetchError::TypeMismatch(format!(
                    "{url} announced {} but the limit is {}",
                    length.bytes(),
                    self.max_body_size.bytes()
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|err| classify(url, err))? {
            if (body.len() + chunk.len()) as u64 > self.max_body_size {
                return Err(FetchError::TypeMismatch(format!(
                    "{url} is bigger than {}",
                    self.max_body_size.bytes()
                )));
            }
            body.extend_from_slice(&chunk);
        }
        log::trace!("Fetched {url} with {}.", body.len().bytes());
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::status::StatusCode;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves [response] to every connection and returns the base url.
    async fn serve(response: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buffer = [0u8; 4096];
                    let _ = socket.read(&mut buffer).await;
                    tokio::time::sleep(delay).await;
                    let _ = socket.write_all(response.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{address}/")
    }

    fn fetcher(timeout_secs: u64, max_body_size: u64) -> HttpFetcher {
        HttpFetcher::new(&MinerConfig {
            request_timeout_secs: timeout_secs,
            max_body_size,
            ..MinerConfig::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn fetches_text() {
        let url = serve(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: 11\r\nConnection: close\r\n\r\n<p>gold</p>",
            Duration::ZERO,
        )
        .await;
        let content = fetcher(10, 1024).fetch(&url).await.unwrap();
        assert_eq!("<p>gold</p>", content);
    }

    #[tokio::test]
    async fn rejects_binary_content() {
        let url = serve(
            "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 3\r\nConnection: close\r\n\r\nabc",
            Duration::ZERO,
        )
        .await;
        let err = fetcher(10, 1024).fetch(&url).await.unwrap_err();
        assert_eq!(StatusCode::TypeMismatch, err.status());
    }

    #[tokio::test]
    async fn rejects_oversized_bodies() {
        let url = serve(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nConnection: close\r\n\r\n0123456789abcdef",
            Duration::ZERO,
        )
        .await;
        let err = fetcher(10, 8).fetch(&url).await.unwrap_err();
        assert_eq!(StatusCode::TypeMismatch, err.status());
    }

    #[tokio::test]
    async fn error_statuses_are_network_errors() {
        let url = serve(
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/plain\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        )
        .await;
        let err = fetcher(10, 1024).fetch(&url).await.unwrap_err();
        assert_eq!(StatusCode::NetworkError, err.status());
    }

    #[tokio::test]
    async fn slow_servers_time_out() {
        let url = serve(
            "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
            Duration::from_secs(5),
        )
        .await;
        let err = fetcher(1, 1024).fetch(&url).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
