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

use url::Url;

/// Returns the lowercase host name of [url], if it is an absolute url with a host.
pub fn hostname_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

/// Returns true if [url] uses a scheme the miner can fetch.
pub fn is_http(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

#[cfg(test)]
mod test {
    use super::hostname_of;

    #[test]
    fn extracts_hosts() {
        assert_eq!(Some("www.example.com".to_string()), hostname_of("https://WWW.Example.com/a?b=c"));
        assert_eq!(Some("a.example".to_string()), hostname_of("http://a.example:8080/1"));
        assert_eq!(None, hostname_of("not an url"));
        assert_eq!(None, hostname_of("mailto:someone@example.com"));
    }
}
