/*
    REFERENCES
    ----------

    1. https://curl.se/docs/http-cookies.html
    2. https://github.com/yt-dlp/yt-dlp/wiki/FAQ#how-do-i-pass-cookies-to-yt-dlp

*/

use anyhow::{Context, Result};
use cookie::Cookie;
use log::debug;
use reqwest::{Url, cookie::Jar};
use std::{fs, path::Path};

/// One entry of a Netscape `cookies.txt` file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetscapeCookie {
    pub domain: String,
    pub include_subdomains: bool,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub name: String,
    pub value: String,
}

impl NetscapeCookie {
    pub fn parse_line(line: &str) -> Option<Self> {
        let (line, http_only) = match line.strip_prefix("#HttpOnly_") {
            Some(x) => (x, true),
            None => (line, false),
        };

        if line.trim().is_empty() || line.starts_with('#') {
            return None;
        }

        let fields = line.trim_end_matches(['\r', '\n']).split('\t').collect::<Vec<_>>();

        if fields.len() < 7 {
            return None;
        }

        Some(Self {
            domain: fields[0].to_owned(),
            include_subdomains: fields[1].eq_ignore_ascii_case("TRUE"),
            path: fields[2].to_owned(),
            secure: fields[3].eq_ignore_ascii_case("TRUE"),
            http_only,
            name: fields[5].to_owned(),
            value: fields[6].to_owned(),
        })
    }

    fn host(&self) -> &str {
        self.domain.trim_start_matches('.')
    }

    pub fn as_cookie(&self) -> Cookie<'_> {
        let mut cookie = Cookie::new(self.name.as_str(), self.value.as_str());
        cookie.set_path(self.path.as_str());
        cookie.set_secure(self.secure);
        cookie.set_http_only(self.http_only);

        if self.include_subdomains {
            cookie.set_domain(self.host());
        }

        cookie
    }

    /// Url the cookie is scoped to, used by the jar to match requests.
    pub fn url(&self) -> Option<Url> {
        format!("https://{}{}", self.host(), self.path).parse().ok()
    }
}

/// Load every cookie of a Netscape `cookies.txt` file into `jar`.
pub fn load_netscape(path: &Path, jar: &Jar) -> Result<usize> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("couldn't read cookies file {}", path.display()))?;
    let mut count = 0;

    for cookie in text.lines().filter_map(NetscapeCookie::parse_line) {
        if let Some(url) = cookie.url() {
            jar.add_cookie_str(&cookie.as_cookie().to_string(), &url);
            count += 1;
        }
    }

    debug!("Loaded {} cookies from {}", count, path.display());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::cookie::CookieStore;
    use std::io::Write;

    const COOKIES: &str = "# Netscape HTTP Cookie File\n\
        .example.com\tTRUE\t/\tTRUE\t1999999999\taccess_token\tabc123\n\
        #HttpOnly_www.example.com\tFALSE\t/\tTRUE\t0\tsession\txyz\n\
        malformed line\n";

    #[test]
    fn parses_entries_and_skips_comments() {
        let cookies = COOKIES
            .lines()
            .filter_map(NetscapeCookie::parse_line)
            .collect::<Vec<_>>();

        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies[0].name, "access_token");
        assert!(cookies[0].include_subdomains);
        assert!(cookies[1].http_only);
        assert_eq!(cookies[1].domain, "www.example.com");
    }

    #[test]
    fn loads_into_jar() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(COOKIES.as_bytes()).unwrap();

        let jar = Jar::default();
        assert_eq!(load_netscape(file.path(), &jar).unwrap(), 2);

        let header = jar
            .cookies(&"https://www.example.com/course/1".parse().unwrap())
            .unwrap();
        let header = header.to_str().unwrap();

        assert!(header.contains("access_token=abc123"));
        assert!(header.contains("session=xyz"));
    }
}
