/*
    REFERENCES
    ----------

    1. https://en.wikipedia.org/wiki/Filename#Reserved_characters_and_words

*/

use regex::Regex;
use reqwest::Url;
use std::{
    env,
    path::{Path, PathBuf},
    sync::LazyLock,
};

static ASSET_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"assets/(?P<id>\d+)/").unwrap());

/// Query parameters which carry signatures or access tokens.
const REDACTED_QUERY_KEYS: &[&str] = &[
    "token",
    "signature",
    "policy",
    "key-pair-id",
    "x-amz-signature",
    "x-amz-credential",
    "x-amz-security-token",
];

/// Replace signed query parameter values with `***` so urls can be logged.
pub fn redact_url(input: &str) -> String {
    let Ok(mut url) = input.parse::<Url>() else {
        return input.to_owned();
    };

    if url.query().is_none() {
        return input.to_owned();
    }

    let pairs = url
        .query_pairs()
        .map(|(key, value)| {
            let value = if REDACTED_QUERY_KEYS.contains(&key.to_lowercase().as_str()) {
                "***".to_owned()
            } else {
                value.into_owned()
            };
            (key.into_owned(), value)
        })
        .collect::<Vec<_>>();

    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

/// Stable identifier for scratch file names derived from a manifest url.
///
/// Platform asset urls embed `assets/<digits>/`, anything else is named after a
/// blake3 digest of the url.
pub fn asset_id(url: &str) -> String {
    if let Some(caps) = ASSET_ID_RE.captures(url) {
        return caps["id"].to_owned();
    }

    blake3::hash(url.as_bytes()).to_hex()[..16].to_owned()
}

/// Strip characters which are not allowed in file names on common file systems.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned = name
        .chars()
        .filter(|&c| {
            !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*')
                && !c.is_control()
                // emoji and other astral plane symbols
                && c.len_utf8() < 4
        })
        .collect::<String>();

    let cleaned = cleaned.trim().trim_end_matches(['.', ' ']);

    if cleaned.is_empty() {
        "_".to_owned()
    } else {
        cleaned.to_owned()
    }
}

pub fn find_binary(name: &str) -> Option<PathBuf> {
    let bin = if cfg!(target_os = "windows") {
        format!("{}.exe", name)
    } else {
        name.to_owned()
    };

    if Path::new(&bin).is_file() {
        return Some(PathBuf::from(bin));
    }

    env::split_paths(&env::var_os("PATH")?).find_map(|dir| {
        let path = dir.join(&bin);
        path.is_file().then_some(path)
    })
}

/// Render a command line for logs, quoting arguments with spaces and redacting urls.
pub fn format_command(program: &Path, args: &[String]) -> String {
    let program = program
        .file_name()
        .map(|x| x.to_string_lossy())
        .unwrap_or_else(|| program.to_string_lossy());

    let args = args
        .iter()
        .map(|x| {
            let x = if x.starts_with("http://") || x.starts_with("https://") {
                redact_url(x)
            } else {
                x.to_owned()
            };

            if x.contains(' ') { format!("\"{x}\"") } else { x }
        })
        .collect::<Vec<_>>()
        .join(" ");

    format!("{program} {args}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacts_signed_parameters_only() {
        let url = "https://cdn.example.com/assets/123/index.mpd?token=abc&quality=hd&Policy=xyz";
        let redacted = redact_url(url);

        assert!(redacted.contains("token=***"));
        assert!(redacted.contains("Policy=***"));
        assert!(redacted.contains("quality=hd"));
        assert!(!redacted.contains("abc"));
    }

    #[test]
    fn leaves_urls_without_query_untouched() {
        assert_eq!(
            redact_url("https://example.com/a/b.m3u8"),
            "https://example.com/a/b.m3u8"
        );
        assert_eq!(redact_url("not a url"), "not a url");
    }

    #[test]
    fn asset_id_prefers_platform_identifier() {
        assert_eq!(
            asset_id("https://example.com/assets/4419120/files/index.m3u8?token=x"),
            "4419120"
        );

        let hashed = asset_id("https://example.com/stream/master.m3u8");
        assert_eq!(hashed.len(), 16);
        assert_eq!(hashed, asset_id("https://example.com/stream/master.m3u8"));
    }

    #[test]
    fn sanitizes_reserved_characters_and_emoji() {
        assert_eq!(
            sanitize_filename("001 What is C++? <Intro>: part 1/2 🚀.mp4"),
            "001 What is C++ Intro part 12 .mp4"
        );
        assert_eq!(sanitize_filename("trailing dots... "), "trailing dots");
        assert_eq!(sanitize_filename("???"), "_");
    }

    #[test]
    fn formats_command_lines_for_logs() {
        let line = format_command(
            Path::new("/usr/bin/yt-dlp"),
            &[
                "-o".to_owned(),
                "001 intro.%(ext)s".to_owned(),
                "https://example.com/v.m3u8?token=secret".to_owned(),
            ],
        );

        assert_eq!(
            line,
            "yt-dlp -o \"001 intro.%(ext)s\" https://example.com/v.m3u8?token=***"
        );
    }
}
