//! HLS playlist parsing.
//!
//! Only the tags needed to walk a live or VOD rendition are understood:
//! `#EXT-X-STREAM-INF` on master playlists and `#EXTINF`,
//! `#EXT-X-TARGETDURATION`, `#EXT-X-MEDIA-SEQUENCE` and `#EXT-X-ENDLIST` on
//! media playlists. Everything else is ignored.

use anyhow::{bail, Context, Result};
use url::Url;

/// Longest `#EXT-X-TARGETDURATION` accepted, in seconds.
pub const MAX_TARGET_DURATION_SECS: f64 = 3600.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub bandwidth: u64,
    pub resolution: Option<(u32, u32)>,
    pub codecs: Option<String>,
    pub uri: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRef {
    pub sequence: u64,
    pub duration: f64,
    pub uri: Url,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub target_duration: f64,
    pub media_sequence: u64,
    pub segments: Vec<SegmentRef>,
    pub ended: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playlist {
    Master(BitrateLadder),
    Media(MediaPlaylist),
}

/// Renditions of one stream, lowest bandwidth first.
#[derive(Debug, Clone, PartialEq)]
pub struct BitrateLadder {
    variants: Vec<Variant>,
}

impl BitrateLadder {
    /// Returns `None` for an empty ladder.
    pub fn new(mut variants: Vec<Variant>) -> Option<Self> {
        if variants.is_empty() {
            return None;
        }
        variants.sort_by_key(|variant| variant.bandwidth);
        Some(Self { variants })
    }

    /// Ladder with a single rendition of unknown bandwidth.
    pub fn single(uri: Url) -> Self {
        Self {
            variants: vec![Variant {
                bandwidth: 0,
                resolution: None,
                codecs: None,
                uri,
            }],
        }
    }

    pub fn variants(&self) -> &[Variant] {
        &self.variants
    }

    pub fn lowest(&self) -> usize {
        0
    }

    /// Index of the highest rung whose bandwidth fits in
    /// `safety_factor * throughput_bps`, or the lowest rung when none does.
    pub fn select(&self, throughput_bps: f64, safety_factor: f64) -> usize {
        let budget = throughput_bps * safety_factor;
        if !budget.is_finite() || budget <= 0.0 {
            return self.lowest();
        }
        self.variants
            .iter()
            .rposition(|variant| variant.bandwidth as f64 <= budget)
            .unwrap_or(self.lowest())
    }

    pub fn get(&self, index: usize) -> Option<&Variant> {
        self.variants.get(index)
    }
}

pub fn parse_playlist(body: &str, base: &Url) -> Result<Playlist> {
    let mut lines = body.lines().map(str::trim).filter(|line| !line.is_empty());
    match lines.next() {
        Some("#EXTM3U") => {}
        _ => bail!("not an HLS playlist (missing #EXTM3U)"),
    }

    if body.contains("#EXT-X-STREAM-INF") {
        parse_master(lines, base)
    } else {
        parse_media(lines, base).map(Playlist::Media)
    }
}

fn parse_master<'a>(lines: impl Iterator<Item = &'a str>, base: &Url) -> Result<Playlist> {
    let mut variants = Vec::new();
    let mut pending: Option<Vec<(String, String)>> = None;

    for line in lines {
        if let Some(attrs) = line.strip_prefix("#EXT-X-STREAM-INF:") {
            pending = Some(parse_attributes(attrs));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        let Some(attrs) = pending.take() else {
            continue;
        };

        let mut variant = Variant {
            bandwidth: 0,
            resolution: None,
            codecs: None,
            uri: base
                .join(line)
                .with_context(|| format!("invalid variant uri {line:?}"))?,
        };
        for (name, value) in attrs {
            match name.as_str() {
                "BANDWIDTH" => {
                    variant.bandwidth = value
                        .parse()
                        .with_context(|| format!("invalid BANDWIDTH {value:?}"))?;
                }
                "RESOLUTION" => variant.resolution = parse_resolution(&value),
                "CODECS" => variant.codecs = Some(value),
                _ => {}
            }
        }
        variants.push(variant);
    }

    match BitrateLadder::new(variants) {
        Some(ladder) => Ok(Playlist::Master(ladder)),
        None => bail!("master playlist lists no variants"),
    }
}

fn parse_media<'a>(lines: impl Iterator<Item = &'a str>, base: &Url) -> Result<MediaPlaylist> {
    let mut playlist = MediaPlaylist {
        target_duration: 0.0,
        media_sequence: 0,
        segments: Vec::new(),
        ended: false,
    };
    let mut next_duration: Option<f64> = None;

    for line in lines {
        if let Some(value) = line.strip_prefix("#EXT-X-TARGETDURATION:") {
            let target: f64 = value
                .trim()
                .parse()
                .with_context(|| format!("invalid target duration {value:?}"))?;
            if !(0.0..=MAX_TARGET_DURATION_SECS).contains(&target) {
                bail!("target duration {target} is out of range");
            }
            playlist.target_duration = target;
        } else if let Some(value) = line.strip_prefix("#EXT-X-MEDIA-SEQUENCE:") {
            playlist.media_sequence = value
                .trim()
                .parse()
                .with_context(|| format!("invalid media sequence {value:?}"))?;
        } else if let Some(value) = line.strip_prefix("#EXTINF:") {
            let duration = value.split(',').next().unwrap_or_default().trim();
            next_duration = Some(
                duration
                    .parse()
                    .with_context(|| format!("invalid segment duration {duration:?}"))?,
            );
        } else if line == "#EXT-X-ENDLIST" {
            playlist.ended = true;
        } else if !line.starts_with('#') {
            let Some(duration) = next_duration.take() else {
                continue;
            };
            let sequence = u64::try_from(playlist.segments.len())
                .ok()
                .and_then(|offset| playlist.media_sequence.checked_add(offset))
                .context("segment sequence number overflows")?;
            playlist.segments.push(SegmentRef {
                sequence,
                duration,
                uri: base
                    .join(line)
                    .with_context(|| format!("invalid segment uri {line:?}"))?,
            });
        }
    }

    Ok(playlist)
}

/// Splits `NAME=value,NAME="quoted,value"` into pairs, unquoting values.
fn parse_attributes(raw: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    let mut flush = |entry: &mut String| {
        if let Some((name, value)) = entry.split_once('=') {
            attrs.push((name.trim().to_string(), value.trim().trim_matches('"').to_string()));
        }
        entry.clear();
    };

    for ch in raw.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                current.push(ch);
            }
            ',' if !in_quotes => flush(&mut current),
            _ => current.push(ch),
        }
    }
    flush(&mut current);
    attrs
}

fn parse_resolution(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.split_once('x')?;
    Some((width.parse().ok()?, height.parse().ok()?))
}
