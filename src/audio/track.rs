//! Tracks as the node hands them out.
//!
//! The node identifies a track by an opaque base64 string. Turning that
//! string into metadata is the job of a [`TrackDecoder`]; the default
//! [`LavaplayerDecoder`] reads the Lavaplayer message layout.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Flag bit in the message header: a version byte follows.
const FLAG_VERSIONED: u32 = 1;

/// Track metadata carried inside the encoded string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackInfo {
    pub title: String,
    pub author: String,
    /// Length in milliseconds.
    pub length: u64,
    pub identifier: String,
    pub is_stream: bool,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub artwork_url: Option<String>,
    #[serde(default)]
    pub isrc: Option<String>,
    pub source_name: String,
    /// Start position in milliseconds.
    #[serde(default)]
    pub position: u64,
}

/// A decoded track: the node's encoded handle plus its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Track {
    encoded: String,
    info: TrackInfo,
}

impl Track {
    pub fn new(encoded: impl Into<String>, info: TrackInfo) -> Self {
        Self {
            encoded: encoded.into(),
            info,
        }
    }

    /// The string to send back to the node in a `play` command.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn info(&self) -> &TrackInfo {
        &self.info
    }
}

/// Turns the node's encoded track strings into [`Track`]s.
pub trait TrackDecoder: Send + Sync {
    fn decode(&self, encoded: &str) -> Result<Track>;
}

/// Decoder for the Lavaplayer track message (versions 1 to 3).
#[derive(Debug, Clone, Copy, Default)]
pub struct LavaplayerDecoder;

impl TrackDecoder for LavaplayerDecoder {
    fn decode(&self, encoded: &str) -> Result<Track> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::TrackDecode(format!("invalid base64: {e}")))?;

        let mut header = Reader::new(&bytes);
        let head = header.u32()?;
        let flags = head >> 30;
        let size = (head & 0x3FFF_FFFF) as usize;
        let body = header.take(size)?;

        let mut r = Reader::new(body);
        let version = if flags & FLAG_VERSIONED != 0 { r.u8()? } else { 1 };
        if !(1..=3).contains(&version) {
            return Err(Error::TrackDecode(format!("unsupported track version {version}")));
        }

        let title = r.utf()?;
        let author = r.utf()?;
        let length = r.i64()?.max(0) as u64;
        let identifier = r.utf()?;
        let is_stream = r.bool()?;
        let uri = if version >= 2 { r.nullable_utf()? } else { None };
        let (artwork_url, isrc) = if version >= 3 {
            (r.nullable_utf()?, r.nullable_utf()?)
        } else {
            (None, None)
        };
        let source_name = r.utf()?;
        // Source-specific fields sit in between; position is always last.
        let position = r.trailing_i64().unwrap_or(0).max(0) as u64;

        Ok(Track::new(
            encoded,
            TrackInfo {
                title,
                author,
                length,
                identifier,
                is_stream,
                uri,
                artwork_url,
                isrc,
                source_name,
                position,
            },
        ))
    }
}

/// Big-endian reader over a Java `DataOutput` stream.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| {
                Error::TrackDecode(format!(
                    "unexpected end of track data at byte {} (wanted {n})",
                    self.pos
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_be_bytes(arr))
    }

    fn utf(&mut self) -> Result<String> {
        let b = self.take(2)?;
        let len = u16::from_be_bytes([b[0], b[1]]) as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|e| Error::TrackDecode(format!("invalid string in track data: {e}")))
    }

    fn nullable_utf(&mut self) -> Result<Option<String>> {
        if self.bool()? {
            self.utf().map(Some)
        } else {
            Ok(None)
        }
    }

    fn trailing_i64(&self) -> Option<i64> {
        let rest = &self.buf[self.pos..];
        if rest.len() < 8 {
            return None;
        }
        let mut arr = [0u8; 8];
        arr.copy_from_slice(&rest[rest.len() - 8..]);
        Some(i64::from_be_bytes(arr))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn utf(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
        out.extend_from_slice(s.as_bytes());
    }

    /// Encode a version 2 message the way Lavaplayer writes it.
    pub(crate) fn encode_v2(title: &str, identifier: &str, length: i64, position: i64) -> String {
        let mut body = vec![2u8];
        utf(&mut body, title);
        utf(&mut body, "Some Artist");
        body.extend_from_slice(&length.to_be_bytes());
        utf(&mut body, identifier);
        body.push(0);
        body.push(1);
        utf(&mut body, &format!("https://www.youtube.com/watch?v={identifier}"));
        utf(&mut body, "youtube");
        body.extend_from_slice(&position.to_be_bytes());

        let head = (FLAG_VERSIONED << 30) | body.len() as u32;
        let mut out = head.to_be_bytes().to_vec();
        out.extend(body);
        STANDARD.encode(out)
    }

    #[test]
    fn decodes_version_2_track() {
        let encoded = encode_v2("Never Gonna Give You Up", "dQw4w9WgXcQ", 212_000, 5_000);
        let track = LavaplayerDecoder.decode(&encoded).unwrap();

        assert_eq!(track.encoded(), encoded);
        assert_eq!(
            track.info(),
            &TrackInfo {
                title: "Never Gonna Give You Up".to_string(),
                author: "Some Artist".to_string(),
                length: 212_000,
                identifier: "dQw4w9WgXcQ".to_string(),
                is_stream: false,
                uri: Some("https://www.youtube.com/watch?v=dQw4w9WgXcQ".to_string()),
                artwork_url: None,
                isrc: None,
                source_name: "youtube".to_string(),
                position: 5_000,
            }
        );
    }

    #[test]
    fn decodes_unversioned_track() {
        let mut body = Vec::new();
        utf(&mut body, "Title");
        utf(&mut body, "Author");
        body.extend_from_slice(&1_000i64.to_be_bytes());
        utf(&mut body, "id");
        body.push(1);
        utf(&mut body, "http");
        body.extend_from_slice(&0i64.to_be_bytes());

        let mut out = (body.len() as u32).to_be_bytes().to_vec();
        out.extend(body);
        let track = LavaplayerDecoder.decode(&STANDARD.encode(out)).unwrap();

        assert_eq!(track.info().title, "Title");
        assert!(track.info().is_stream);
        assert_eq!(track.info().uri, None);
        assert_eq!(track.info().source_name, "http");
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            LavaplayerDecoder.decode("not base64!"),
            Err(Error::TrackDecode(_))
        ));
        // Header claims more bytes than present.
        let short = STANDARD.encode([0x40u8, 0, 0, 0x50, 2]);
        assert!(matches!(LavaplayerDecoder.decode(&short), Err(Error::TrackDecode(_))));
    }
}
