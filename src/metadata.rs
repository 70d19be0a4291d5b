//! Extraction of the `StreamTitle` value from an icy metadata interval.
//!
//! An icy stream interleaves `metaint` bytes of audio with a metadata block. The block starts
//! with a single length byte; multiplied by 16 it gives the size of the text that follows,
//! padded with NULs. Some references:
//! - <https://cast.readme.io/docs/icy#metadata>
//! - <https://gist.github.com/niko/2a1d7b2d109ebe7f7ca2f860c3505ef0>

use tracing::trace;

/// The metadata length byte must be multiplied by 16 to get the total metadata length
pub const ICY_METADATA_MULTIPLIER: usize = 16;

const STREAM_TITLE_KEY: &str = "streamtitle=";
const STREAM_URL_KEY: &str = "streamurl=";

/// Decoded text of a single metadata block, e.g. `StreamTitle='Artist - Title';StreamUrl='';`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamMetadata {
    text: String,
}

impl StreamMetadata {
    /// Decodes a raw metadata block. Invalid UTF-8 falls back to Latin-1, which maps every byte
    /// to a character and therefore can't fail.
    pub fn decode(block: &[u8]) -> Self {
        let end = block
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |last| last + 1);
        let block = &block[..end];
        let text = match std::str::from_utf8(block) {
            Ok(text) => text.to_string(),
            Err(e) => {
                trace!(error = %e, "metadata is not valid utf-8, decoding as latin-1");
                block.iter().copied().map(char::from).collect()
            }
        };
        Self { text }
    }

    /// The full decoded text.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// The title of the currently playing track.
    /// Maps to the `StreamTitle` metadata value, with the framing quotes and semicolon removed.
    pub fn stream_title(&self) -> Option<&str> {
        find_value(&self.text, STREAM_TITLE_KEY, Some(STREAM_URL_KEY))
    }

    /// Maps to the `StreamUrl` metadata value.
    pub fn stream_url(&self) -> Option<&str> {
        find_value(&self.text, STREAM_URL_KEY, Some(STREAM_TITLE_KEY))
    }
}

// Escaping of quotes and semicolons inside values isn't well-defined, so a plain split on `;`
// breaks titles like `Don't; Stop`. Instead the value is bounded by the next well-known key (if
// it follows) and then by the first `';` inside that region.
fn find_value<'a>(text: &'a str, key: &str, next_key: Option<&str>) -> Option<&'a str> {
    // ascii lowercasing keeps byte offsets intact
    let lower = text.to_ascii_lowercase();
    let start = lower.find(key)? + key.len();
    let region_end = next_key
        .and_then(|next_key| lower[start..].find(&format!(";{next_key}")))
        .map_or(text.len(), |i| start + i + 1);
    let region = text[start..region_end].trim_start();

    let value = if let Some(quoted) = region.strip_prefix('\'') {
        match quoted.find("';") {
            Some(end) => &quoted[..end],
            None => {
                let quoted = quoted.trim_end().trim_end_matches(';');
                quoted.strip_suffix('\'').unwrap_or(quoted)
            }
        }
    } else {
        region.split(';').next().unwrap_or_default()
    };
    Some(value)
}

/// Returns the metadata block contained in `frame`, skipping the `metaint` audio bytes in front.
///
/// Frames are allowed to be longer than one interval; anything after the block is ignored. If the
/// frame is cut short the available part of the block is returned.
pub fn metadata_block(frame: &[u8], metaint: usize) -> Option<&[u8]> {
    let length = *frame.get(metaint)? as usize * ICY_METADATA_MULTIPLIER;
    if length == 0 {
        return None;
    }
    let start = metaint + 1;
    let end = (start + length).min(frame.len());
    Some(&frame[start..end])
}

/// Extracts the raw `StreamTitle` value from a frame that starts at an interval boundary.
///
/// Returns `None` when the interval carries no metadata or the metadata has no title, both of
/// which are normal for icy streams.
pub fn extract(frame: &[u8], metaint: usize) -> Option<String> {
    let block = metadata_block(frame, metaint)?;
    let metadata = StreamMetadata::decode(block);
    trace!(metadata = metadata.as_str(), "read metadata block");
    metadata.stream_title().map(ToString::to_string)
}
