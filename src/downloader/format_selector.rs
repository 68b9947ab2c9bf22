// FormatSelector - format listing and yt-dlp format selection
//
// Converts the raw format list from `yt-dlp --dump-json` into client-friendly
// descriptors and turns a (mode, quality, format id) request into the
// `-f` selector plus post-processing arguments.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::Deserialize;

use super::models::{DownloadMode, FormatDescriptor, FormatsListing, Quality};

/// Audio bitrate used when an audio-only request names none
pub const DEFAULT_AUDIO_BITRATE: u32 = 192;

/// One entry of the `formats` array in yt-dlp's JSON
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
    #[serde(default)]
    pub format_id: String,
    #[serde(default)]
    pub ext: String,
    pub height: Option<u32>,
    pub fps: Option<f32>,
    /// Video codec (avc1, vp9, av01, none)
    pub vcodec: Option<String>,
    /// Audio codec (mp4a, opus, none)
    pub acodec: Option<String>,
    pub filesize: Option<f64>,
    pub filesize_approx: Option<f64>,
    /// Audio bitrate in kbps
    pub abr: Option<f32>,
    pub format_note: Option<String>,
}

impl RawFormat {
    /// Get effective file size (exact or approximate)
    pub fn effective_size(&self) -> Option<u64> {
        self.filesize
            .or(self.filesize_approx)
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(|s| s as u64)
    }

    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref()) && self.height.unwrap_or(0) > 0
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }

    pub fn is_h264(&self) -> bool {
        self.vcodec
            .as_ref()
            .map_or(false, |v| v.starts_with("avc1"))
    }

    fn codec_label(&self) -> Option<String> {
        let vcodec = self.vcodec.as_deref()?;
        if self.is_h264() {
            Some("H.264".to_string())
        } else if vcodec.starts_with("vp9") || vcodec.starts_with("vp09") {
            Some("VP9".to_string())
        } else if vcodec.starts_with("av01") {
            Some("AV1".to_string())
        } else {
            vcodec.split('.').next().map(str::to_string)
        }
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.map_or(false, |c| !c.is_empty() && c != "none")
}

/// The parts of yt-dlp's info JSON the listing needs
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawVideoInfo {
    #[serde(default)]
    pub title: String,
    pub thumbnail: Option<String>,
    pub duration: Option<f64>,
    #[serde(default)]
    pub formats: Vec<RawFormat>,
}

/// Format selector with smart quality detection
pub struct FormatSelector;

impl FormatSelector {
    /// Build the listing: one descriptor per height, highest first.
    ///
    /// Among formats of equal height the one that already carries audio wins,
    /// then the larger file.
    pub fn build_listing(info: RawVideoInfo) -> FormatsListing {
        let mut videos: Vec<&RawFormat> = info.formats.iter().filter(|f| f.has_video()).collect();
        videos.sort_by(|a, b| Self::compare_candidates(b, a));

        let mut seen = BTreeSet::new();
        let formats: Vec<FormatDescriptor> = videos
            .into_iter()
            .filter(|f| seen.insert(f.height.unwrap_or(0)))
            .map(Self::describe)
            .collect();

        let video_formats = formats.iter().map(|f| f.quality.clone()).collect();

        let bitrates: BTreeSet<u32> = info
            .formats
            .iter()
            .filter(|f| f.has_audio() && !f.has_video())
            .filter_map(|f| f.abr)
            .filter(|abr| abr.is_finite() && *abr > 0.0)
            .map(|abr| abr.round() as u32)
            .collect();
        let audio_formats = bitrates
            .into_iter()
            .rev()
            .map(|b| format!("{}kbps", b))
            .collect();

        FormatsListing {
            title: info.title,
            thumbnail: info.thumbnail,
            duration: info.duration,
            formats,
            video_formats,
            audio_formats,
        }
    }

    /// Height, then has-audio, then size
    fn compare_candidates(a: &RawFormat, b: &RawFormat) -> Ordering {
        a.height
            .unwrap_or(0)
            .cmp(&b.height.unwrap_or(0))
            .then_with(|| a.has_audio().cmp(&b.has_audio()))
            .then_with(|| a.effective_size().unwrap_or(0).cmp(&b.effective_size().unwrap_or(0)))
    }

    fn describe(format: &RawFormat) -> FormatDescriptor {
        let height = format.height.unwrap_or(0);
        let size = format.effective_size();

        let mut note_parts = Vec::new();
        if let Some(note) = format.format_note.as_deref().filter(|n| !n.is_empty()) {
            note_parts.push(note.to_string());
        }
        if let Some(codec) = format.codec_label() {
            note_parts.push(codec);
        }
        if !format.has_audio() {
            note_parts.push("video only".to_string());
        }
        if let Some(size) = Self::format_size(size) {
            note_parts.push(size);
        }

        FormatDescriptor {
            id: format.format_id.clone(),
            ext: format.ext.clone(),
            quality: format!("{}p", height),
            height,
            fps: format.fps,
            note: note_parts.join(", "),
            filesize: size,
            has_audio: format.has_audio(),
        }
    }

    /// Format file size for display
    pub fn format_size(bytes: Option<u64>) -> Option<String> {
        bytes.filter(|b| *b > 0).map(|b| {
            let mb = b as f64 / 1_048_576.0;
            if mb >= 1024.0 {
                format!("{:.1} GB", mb / 1024.0)
            } else {
                format!("{:.0} MB", mb)
            }
        })
    }

    /// yt-dlp `-f` selector for a request
    pub fn format_spec(mode: DownloadMode, quality: Quality, format_id: Option<&str>) -> String {
        if let Some(id) = format_id {
            match mode {
                DownloadMode::VideoAudio => return format!("{}+bestaudio/best", id),
                DownloadMode::VideoOnly => return id.to_string(),
                DownloadMode::AudioOnly => {}
            }
        }

        match (mode, quality.height()) {
            (DownloadMode::VideoAudio, Some(h)) => {
                format!("bestvideo[height<={h}]+bestaudio/best[height<={h}]")
            }
            (DownloadMode::VideoAudio, None) => "bestvideo+bestaudio/best".to_string(),
            (DownloadMode::VideoOnly, Some(h)) => format!("bestvideo[height<={h}]/best[height<={h}]"),
            (DownloadMode::VideoOnly, None) => "bestvideo/best".to_string(),
            (DownloadMode::AudioOnly, _) => "bestaudio/best".to_string(),
        }
    }

    /// Merge or extraction arguments that go with the selector
    pub fn postprocess_args(mode: DownloadMode, quality: Quality) -> Vec<String> {
        match mode {
            DownloadMode::VideoAudio => vec!["--merge-output-format".to_string(), "mp4".to_string()],
            DownloadMode::VideoOnly => Vec::new(),
            DownloadMode::AudioOnly => {
                let bitrate = quality.bitrate().unwrap_or(DEFAULT_AUDIO_BITRATE);
                vec![
                    "-x".to_string(),
                    "--audio-format".to_string(),
                    "mp3".to_string(),
                    "--audio-quality".to_string(),
                    format!("{}K", bitrate),
                ]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str, height: u32, acodec: &str, size: f64) -> RawFormat {
        RawFormat {
            format_id: id.to_string(),
            ext: "mp4".to_string(),
            height: Some(height),
            fps: Some(30.0),
            vcodec: Some("avc1.4d401f".to_string()),
            acodec: Some(acodec.to_string()),
            filesize: Some(size),
            ..Default::default()
        }
    }

    fn audio(id: &str, abr: f32) -> RawFormat {
        RawFormat {
            format_id: id.to_string(),
            ext: "m4a".to_string(),
            vcodec: Some("none".to_string()),
            acodec: Some("mp4a.40.2".to_string()),
            abr: Some(abr),
            filesize_approx: Some(3_000_000.0),
            ..Default::default()
        }
    }

    #[test]
    fn test_listing_dedups_by_height_highest_first() {
        let info = RawVideoInfo {
            title: "Clip".to_string(),
            formats: vec![
                video("134", 360, "none", 5_000_000.0),
                video("18", 360, "mp4a.40.2", 4_000_000.0),
                video("137", 1080, "none", 90_000_000.0),
                video("136", 720, "none", 40_000_000.0),
                video("298", 720, "none", 55_000_000.0),
                audio("140", 129.5),
                audio("251", 160.0),
                audio("139", 48.0),
            ],
            ..Default::default()
        };

        let listing = FormatSelector::build_listing(info);
        let ids: Vec<&str> = listing.formats.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["137", "298", "18"]);
        assert_eq!(listing.video_formats, vec!["1080p", "720p", "360p"]);
        assert_eq!(listing.audio_formats, vec!["160kbps", "130kbps", "48kbps"]);
        assert!(listing.formats[2].has_audio);
        assert!(listing.formats[0].note.contains("video only"));
    }

    #[test]
    fn test_listing_skips_storyboards() {
        let storyboard = RawFormat {
            format_id: "sb0".to_string(),
            ext: "mhtml".to_string(),
            height: Some(90),
            vcodec: Some("none".to_string()),
            acodec: Some("none".to_string()),
            ..Default::default()
        };
        let listing = FormatSelector::build_listing(RawVideoInfo {
            formats: vec![storyboard],
            ..Default::default()
        });
        assert!(listing.formats.is_empty());
        assert!(listing.audio_formats.is_empty());
    }

    #[test]
    fn test_raw_info_from_json() {
        let json = r#"{
            "title": "T",
            "duration": 212.0,
            "formats": [
                {"format_id": "22", "ext": "mp4", "height": 720, "vcodec": "avc1", "acodec": "mp4a", "filesize_approx": 1234.0},
                {"format_id": "sb", "ext": "mhtml", "height": null, "vcodec": "none", "acodec": "none"}
            ]
        }"#;
        let info: RawVideoInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.formats.len(), 2);
        assert_eq!(info.formats[0].effective_size(), Some(1234));
        assert!(!info.formats[1].has_video());
    }

    #[test]
    fn test_format_spec_table() {
        use DownloadMode::*;
        assert_eq!(
            FormatSelector::format_spec(VideoAudio, Quality::Height(720), None),
            "bestvideo[height<=720]+bestaudio/best[height<=720]"
        );
        assert_eq!(
            FormatSelector::format_spec(VideoAudio, Quality::Best, None),
            "bestvideo+bestaudio/best"
        );
        assert_eq!(
            FormatSelector::format_spec(VideoOnly, Quality::Height(480), None),
            "bestvideo[height<=480]/best[height<=480]"
        );
        assert_eq!(FormatSelector::format_spec(VideoOnly, Quality::Best, None), "bestvideo/best");
        assert_eq!(
            FormatSelector::format_spec(AudioOnly, Quality::Height(1080), None),
            "bestaudio/best"
        );
        assert_eq!(
            FormatSelector::format_spec(VideoAudio, Quality::Best, Some("137")),
            "137+bestaudio/best"
        );
        assert_eq!(FormatSelector::format_spec(VideoOnly, Quality::Best, Some("137")), "137");
        assert_eq!(
            FormatSelector::format_spec(AudioOnly, Quality::Best, Some("137")),
            "bestaudio/best"
        );
    }

    #[test]
    fn test_postprocess_args() {
        assert_eq!(
            FormatSelector::postprocess_args(DownloadMode::AudioOnly, Quality::Best),
            vec!["-x", "--audio-format", "mp3", "--audio-quality", "192K"]
        );
        assert_eq!(
            FormatSelector::postprocess_args(DownloadMode::AudioOnly, Quality::Bitrate(128))[4],
            "128K"
        );
        assert_eq!(
            FormatSelector::postprocess_args(DownloadMode::VideoAudio, Quality::Best),
            vec!["--merge-output-format", "mp4"]
        );
        assert!(FormatSelector::postprocess_args(DownloadMode::VideoOnly, Quality::Best).is_empty());
    }

    #[test]
    fn test_format_size() {
        assert_eq!(FormatSelector::format_size(Some(150 * 1_048_576)), Some("150 MB".to_string()));
        assert_eq!(
            FormatSelector::format_size(Some(2 * 1024 * 1_048_576)),
            Some("2.0 GB".to_string())
        );
        assert_eq!(FormatSelector::format_size(Some(0)), None);
    }
}
