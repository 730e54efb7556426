use super::probe::ProbedFormat;
use anyhow::{Result, bail};
use std::collections::BTreeMap;

/// Formats a DASH rendition is built from.
#[derive(Debug)]
pub struct DashSelection<'a> {
    pub audio: &'a ProbedFormat,
    /// Highest bitrate video-only format of each height, ascending by height.
    pub videos: Vec<&'a ProbedFormat>,
}

/// Pick the best audio-only format and the best video-only format of every height.
///
/// Ties keep whichever format was listed first.
pub fn select_formats(formats: &[ProbedFormat]) -> Result<DashSelection<'_>> {
    let mut audio: Option<&ProbedFormat> = None;
    let mut videos: BTreeMap<u32, &ProbedFormat> = BTreeMap::new();

    for format in formats {
        if format.is_audio_only() {
            if audio.is_none_or(|x| format.bitrate() > x.bitrate()) {
                audio = Some(format);
            }
        } else if format.is_video_only()
            && let Some(height) = format.height
        {
            match videos.get(&height) {
                Some(x) if x.bitrate() >= format.bitrate() => (),
                _ => {
                    videos.insert(height, format);
                }
            }
        }
    }

    let Some(audio) = audio else {
        bail!("no audio-only format found in dash manifest.");
    };

    Ok(DashSelection {
        audio,
        videos: videos.into_values().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, height: u32, tbr: f64) -> ProbedFormat {
        ProbedFormat {
            format_id: id.to_owned(),
            ext: Some("mp4".to_owned()),
            width: Some(height * 16 / 9),
            height: Some(height),
            tbr: Some(tbr),
            vcodec: Some("avc1".to_owned()),
            acodec: Some("none".to_owned()),
        }
    }

    fn audio(id: &str, tbr: f64) -> ProbedFormat {
        ProbedFormat {
            format_id: id.to_owned(),
            ext: Some("m4a".to_owned()),
            tbr: Some(tbr),
            vcodec: Some("none".to_owned()),
            acodec: Some("mp4a.40.2".to_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn highest_bitrate_per_height() {
        let formats = vec![
            video("720-low", 720, 1200.0),
            audio("a64", 64.0),
            video("720-high", 720, 2400.0),
            video("480", 480, 900.0),
            audio("a128", 128.0),
            video("720-tie", 720, 2400.0),
        ];

        let selection = select_formats(&formats).unwrap();
        let ids = selection
            .videos
            .iter()
            .map(|x| x.format_id.as_str())
            .collect::<Vec<_>>();

        assert_eq!(ids, ["480", "720-high"]);
        assert_eq!(selection.audio.format_id, "a128");
    }

    #[test]
    fn muxed_and_heightless_formats_are_ignored() {
        let mut muxed = video("muxed", 1080, 9000.0);
        muxed.acodec = Some("mp4a.40.2".to_owned());
        let mut heightless = video("heightless", 0, 9000.0);
        heightless.height = None;

        let formats = vec![muxed, heightless, audio("a", 96.0)];
        let selection = select_formats(&formats).unwrap();
        assert!(selection.videos.is_empty());
    }

    #[test]
    fn audio_is_required() {
        assert!(select_formats(&[video("720", 720, 1.0)]).is_err());
    }
}
