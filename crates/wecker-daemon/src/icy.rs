//! Icecast/Shoutcast stream plumbing: metadata interleave stripping, header
//! parsing, and playlist indirection.
//!
//! With `Icy-MetaData: 1` on the request, a cooperating server answers with
//! `icy-metaint: N` and interleaves, after every N audio bytes, one length
//! byte (a count of 16-byte blocks) followed by that much metadata text,
//! usually `StreamTitle='...';`. A zero length byte means no change.

use tracing::debug;

/// Accepted `icy-metaint` range. Anything outside it is a server bug and the
/// stream is treated as plain audio.
const METAINT_MAX: usize = 256_000;

pub fn parse_metaint(value: &str) -> Option<usize> {
    let metaint = value.trim().parse::<usize>().ok()?;
    (1..=METAINT_MAX).contains(&metaint).then_some(metaint)
}

/// `icy-br`, kbit/s.
pub fn parse_bitrate(value: &str) -> Option<u32> {
    let kbps = value.trim().parse::<u32>().ok()?;
    (kbps > 0).then_some(kbps)
}

/// Extract the title from one metadata block. Both quote styles occur in the
/// wild; an empty or absent title is `None`.
pub fn parse_stream_title(meta: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(meta)
        .trim_matches(char::from(0))
        .trim()
        .to_string();
    if text.is_empty() {
        return None;
    }

    if let Some(start) = text.find("StreamTitle='") {
        let rest = &text[start + "StreamTitle='".len()..];
        if let Some(end) = rest.find("';") {
            let title = rest[..end].trim();
            return if title.is_empty() {
                None
            } else {
                Some(title.to_string())
            };
        }
    }

    if let Some(start) = text.find("StreamTitle=\"") {
        let rest = &text[start + "StreamTitle=\"".len()..];
        if let Some(end) = rest.find("\";") {
            let title = rest[..end].trim();
            return if title.is_empty() {
                None
            } else {
                Some(title.to_string())
            };
        }
    }

    None
}

// ── interleave stripper ───────────────────────────────────────────────────────

/// Splits a raw ICY byte stream into pure audio and parsed titles. Byte
/// counts carry across `feed` calls, so chunks may split anywhere, in the
/// middle of a length byte's metadata block included.
pub struct MetaInterleave {
    metaint: usize,
    /// Audio bytes remaining before the next length byte.
    audio_left: usize,
    /// Metadata block in progress: bytes still needed, bytes collected.
    pending: Option<(usize, Vec<u8>)>,
}

impl MetaInterleave {
    pub fn new(metaint: usize) -> Self {
        Self {
            metaint,
            audio_left: metaint,
            pending: None,
        }
    }

    /// Feed one chunk; audio bytes are appended to `audio`. Returns the last
    /// complete title seen in this chunk, if any.
    pub fn feed(&mut self, mut chunk: &[u8], audio: &mut Vec<u8>) -> Option<String> {
        let mut title = None;
        while !chunk.is_empty() {
            if let Some((needed, collected)) = self.pending.as_mut() {
                let take = (*needed).min(chunk.len());
                collected.extend_from_slice(&chunk[..take]);
                *needed -= take;
                chunk = &chunk[take..];
                if *needed == 0 {
                    if let Some((_, block)) = self.pending.take() {
                        if let Some(parsed) = parse_stream_title(&block) {
                            title = Some(parsed);
                        } else {
                            debug!("metadata block without title: {} bytes", block.len());
                        }
                    }
                }
                continue;
            }

            if self.audio_left == 0 {
                let blocks = usize::from(chunk[0]);
                chunk = &chunk[1..];
                self.audio_left = self.metaint;
                if blocks > 0 {
                    self.pending = Some((blocks * 16, Vec::with_capacity(blocks * 16)));
                }
                continue;
            }

            let take = self.audio_left.min(chunk.len());
            audio.extend_from_slice(&chunk[..take]);
            self.audio_left -= take;
            chunk = &chunk[take..];
        }
        title
    }
}

// ── playlists ─────────────────────────────────────────────────────────────────

/// True when the response should be treated as a playlist wrapper rather than
/// audio, judged by content type first and URL extension second.
pub fn looks_like_playlist(url: &str, content_type: Option<&str>) -> bool {
    if let Some(full) = content_type {
        let bare = full
            .split(';')
            .next()
            .unwrap_or(full)
            .trim()
            .to_ascii_lowercase();
        if matches!(
            bare.as_str(),
            "audio/x-mpegurl"
                | "application/x-mpegurl"
                | "application/vnd.apple.mpegurl"
                | "audio/mpegurl"
                | "audio/x-scpls"
                | "application/pls+xml"
        ) {
            return true;
        }
    }
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();
    path.ends_with(".m3u") || path.ends_with(".m3u8") || path.ends_with(".pls")
}

/// First playable entry of an `.m3u` or `.pls` body, resolved against the
/// playlist's own URL when relative.
pub fn playlist_target(base_url: &str, body: &str) -> Option<String> {
    if base_url
        .split(['?', '#'])
        .next()
        .unwrap_or(base_url)
        .to_ascii_lowercase()
        .ends_with(".pls")
    {
        for line in body.lines() {
            let line = line.trim();
            if line.to_ascii_lowercase().starts_with("file") {
                if let Some((_, value)) = line.split_once('=') {
                    return resolve_relative_url(base_url, value.trim());
                }
            }
        }
        return None;
    }

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        return resolve_relative_url(base_url, line);
    }
    None
}

fn resolve_relative_url(base: &str, candidate: &str) -> Option<String> {
    if candidate.starts_with("http://") || candidate.starts_with("https://") {
        return Some(candidate.to_string());
    }
    let base = match reqwest::Url::parse(base) {
        Ok(base) => base,
        Err(e) => {
            debug!("playlist base url unparseable: {e}");
            return None;
        }
    };
    match base.join(candidate) {
        Ok(joined) => Some(joined.to_string()),
        Err(e) => {
            debug!("playlist entry {candidate:?} does not resolve: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_title_single_quotes() {
        let meta = b"StreamTitle='Nina Simone - Sinnerman';StreamUrl='';\0\0\0";
        assert_eq!(
            parse_stream_title(meta),
            Some("Nina Simone - Sinnerman".to_string())
        );
    }

    #[test]
    fn stream_title_double_quotes() {
        let meta = b"StreamTitle=\"Morning Show\";";
        assert_eq!(parse_stream_title(meta), Some("Morning Show".to_string()));
    }

    #[test]
    fn stream_title_keeps_inner_apostrophes() {
        let meta = b"StreamTitle='It's Alright';";
        assert_eq!(parse_stream_title(meta), Some("It's Alright".to_string()));
    }

    #[test]
    fn empty_or_missing_title_is_none() {
        assert_eq!(parse_stream_title(b"StreamTitle='';StreamUrl='';"), None);
        assert_eq!(parse_stream_title(b"StreamUrl='http://x';"), None);
        assert_eq!(parse_stream_title(b"StreamTitle='cut off mid-blo"), None);
        assert_eq!(parse_stream_title(b"\0\0\0\0"), None);
    }

    #[test]
    fn metaint_bounds() {
        assert_eq!(parse_metaint("16000"), Some(16_000));
        assert_eq!(parse_metaint(" 1 "), Some(1));
        assert_eq!(parse_metaint("0"), None);
        assert_eq!(parse_metaint("999999999"), None);
        assert_eq!(parse_metaint("icy"), None);
    }

    // 16 bytes exactly: one metadata block of one 16-byte unit.
    const TITLE_BLOCK: &[u8; 16] = b"StreamTitle='x';";

    fn icy_stream(metaint: usize) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(&vec![0xAA; metaint]);
        raw.push(1); // one 16-byte block follows
        raw.extend_from_slice(TITLE_BLOCK);
        raw.extend_from_slice(&vec![0xBB; metaint]);
        raw.push(0); // no metadata this time
        raw.extend_from_slice(&vec![0xCC; 4]);
        raw
    }

    #[test]
    fn interleave_strips_metadata_and_yields_title() {
        let raw = icy_stream(8);
        let mut strip = MetaInterleave::new(8);
        let mut audio = Vec::new();
        let title = strip.feed(&raw, &mut audio);

        assert_eq!(title, Some("x".to_string()));
        let mut expected = vec![0xAA; 8];
        expected.extend_from_slice(&[0xBB; 8]);
        expected.extend_from_slice(&[0xCC; 4]);
        assert_eq!(audio, expected);
    }

    #[test]
    fn interleave_survives_arbitrary_chunking() {
        let raw = icy_stream(8);
        // Up to chunk sizes longer than the whole stream.
        for chunk_len in 1..=raw.len() + 3 {
            let mut strip = MetaInterleave::new(8);
            let mut audio = Vec::new();
            let mut title = None;
            for chunk in raw.chunks(chunk_len) {
                if let Some(t) = strip.feed(chunk, &mut audio) {
                    title = Some(t);
                }
            }
            assert_eq!(title, Some("x".to_string()), "chunk_len={chunk_len}");
            assert_eq!(audio.len(), 20, "chunk_len={chunk_len}");
        }
    }

    #[test]
    fn zero_length_metadata_passes_audio_through() {
        let mut raw = vec![0x11; 4];
        raw.push(0);
        raw.extend_from_slice(&[0x22; 4]);
        raw.push(0);

        let mut strip = MetaInterleave::new(4);
        let mut audio = Vec::new();
        assert_eq!(strip.feed(&raw, &mut audio), None);
        assert_eq!(audio.len(), 8);
    }

    #[test]
    fn playlist_detection_by_extension_and_content_type() {
        assert!(looks_like_playlist("http://radio.example/stream.pls", None));
        assert!(looks_like_playlist(
            "http://radio.example/hi.m3u?sid=1",
            None
        ));
        assert!(looks_like_playlist(
            "http://radio.example/listen",
            Some("audio/x-mpegurl; charset=utf-8")
        ));
        assert!(!looks_like_playlist(
            "http://radio.example/stream",
            Some("audio/mpeg")
        ));
    }

    #[test]
    fn pls_body_yields_file_entry() {
        let body = "[playlist]\nNumberOfEntries=1\nFile1=http://radio.example/live\nTitle1=Example\nLength1=-1\n";
        assert_eq!(
            playlist_target("http://radio.example/stream.pls", body),
            Some("http://radio.example/live".to_string())
        );
    }

    #[test]
    fn m3u_body_skips_comments_and_resolves_relative_entries() {
        let body = "#EXTM3U\n#EXTINF:-1,Example\nlive/high.mp3\n";
        assert_eq!(
            playlist_target("http://radio.example/dir/stream.m3u", body),
            Some("http://radio.example/dir/live/high.mp3".to_string())
        );
    }

    #[test]
    fn playlist_without_entries_is_none() {
        assert_eq!(playlist_target("http://radio.example/a.m3u", "#EXTM3U\n"), None);
        assert_eq!(
            playlist_target("http://radio.example/a.pls", "[playlist]\nVersion=2\n"),
            None
        );
    }
}
