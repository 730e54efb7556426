use crate::utils;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

/// Curriculum of a course as written by the crawler.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Course {
    pub course_id: u64,
    pub title: String,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub referer: Option<String>,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Chapter {
    pub chapter_index: u32,
    pub chapter_title: String,
    #[serde(default)]
    pub lectures: Vec<LectureRecord>,
}

/// Raw lecture entry, kept unmodified so failed lectures can be re-resolved later.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LectureRecord {
    pub id: u64,
    #[serde(default)]
    pub index: u32,
    pub lecture_title: String,
    #[serde(default)]
    pub is_encrypted: bool,
    /// Plaintext progressive files and HLS manifests.
    #[serde(default)]
    pub sources: Vec<Source>,
    /// Encrypted DASH manifests.
    #[serde(default)]
    pub media_sources: Vec<MediaSource>,
    #[serde(default)]
    pub extension: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct Source {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub file: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct MediaSource {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub src: Option<String>,
}

impl Course {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("couldn't read course file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("couldn't parse course file {}", path.display()))
    }

    pub fn directory_name(&self, id_as_name: bool) -> String {
        if id_as_name {
            self.course_id.to_string()
        } else {
            utils::sanitize_filename(&self.title)
        }
    }

    pub fn lecture_count(&self) -> usize {
        self.chapters.iter().map(|x| x.lectures.len()).sum()
    }
}

impl Chapter {
    pub fn directory_name(&self) -> String {
        utils::sanitize_filename(&self.chapter_title)
    }
}

impl LectureRecord {
    /// Only video lectures are handled, other assets have a non mp4 extension.
    pub fn is_video(&self) -> bool {
        self.extension
            .as_deref()
            .is_none_or(|x| x.eq_ignore_ascii_case("mp4"))
    }

    pub fn file_name(&self) -> String {
        utils::sanitize_filename(&format!("{}.mp4", self.lecture_title))
    }
}

impl Source {
    pub fn is_hls(&self) -> bool {
        self.kind.as_deref() == Some("application/x-mpegURL")
            || self.file.as_deref().is_some_and(|x| x.contains("m3u8"))
    }

    pub fn is_audio(&self) -> bool {
        self.label
            .as_deref()
            .is_some_and(|x| x.eq_ignore_ascii_case("audio"))
    }

    /// Height parsed from labels like `720` or `720p`.
    pub fn height(&self) -> Option<u32> {
        self.label
            .as_deref()
            .map(|x| x.trim().trim_end_matches('p'))
            .and_then(|x| x.parse().ok())
    }

    /// `video/webm` yields `webm`.
    pub fn extension(&self) -> String {
        self.kind
            .as_deref()
            .and_then(|x| x.strip_prefix("video/"))
            .unwrap_or("mp4")
            .to_owned()
    }
}

impl MediaSource {
    pub fn is_dash(&self) -> bool {
        self.kind.as_deref() == Some("application/dash+xml")
    }
}
