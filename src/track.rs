use std::fmt::{self, Display};
use std::sync::LazyLock;

use regex::Regex;

/// Separator between artist and title in a `StreamTitle` value.
pub const ARTIST_TITLE_SEPARATOR: &str = " - ";

/// Artist used when the stream title doesn't name one.
pub const UNKNOWN_ARTIST: &str = "Unknown";

// `[jingle]`, `[Radio Edit]`, `[AD]`, ...
static ANNOTATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]").expect("valid regex"));

static TRAILING_ANNOTATIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\s*\[[^\]]*\])+\s*$").expect("valid regex"));

/// A track as announced by the radio station.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Track {
    artist: String,
    title: String,
}

impl Track {
    /// Creates a track from already cleaned fields.
    pub fn new<A, T>(artist: A, title: T) -> Self
    where
        A: Into<String>,
        T: Into<String>,
    {
        Self {
            artist: artist.into(),
            title: title.into(),
        }
    }

    /// Performing artist, or [`UNKNOWN_ARTIST`].
    pub fn artist(&self) -> &str {
        &self.artist
    }

    /// Track title without annotations.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Parses a raw `StreamTitle` value such as `Artist - Title [Radio Edit]`.
    ///
    /// Bracketed annotations are removed from the title, and from the end of the artist where
    /// stations append their tags. Without a separator (or with an empty side) the whole value
    /// becomes the title of an [`UNKNOWN_ARTIST`]. An artist made only of annotations, as in
    /// `[jingle] - Song`, is also [`UNKNOWN_ARTIST`]. Returns `None` only if no title remains.
    pub fn parse(raw_title: &str) -> Option<Self> {
        let (artist, title) = match raw_title.split_once(ARTIST_TITLE_SEPARATOR) {
            Some((artist, title)) if !artist.trim().is_empty() && !title.trim().is_empty() => {
                let artist = clean_artist(artist);
                let artist = if artist.is_empty() {
                    UNKNOWN_ARTIST.to_string()
                } else {
                    artist
                };
                (artist, clean_title(title))
            }
            _ => (UNKNOWN_ARTIST.to_string(), clean_title(raw_title)),
        };
        if title.is_empty() {
            return None;
        }
        Some(Self { artist, title })
    }
}

impl Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ARTIST_TITLE_SEPARATOR}{}", self.artist, self.title)
    }
}

fn clean_title(title: &str) -> String {
    ANNOTATION.replace_all(title, "").trim().to_string()
}

fn clean_artist(artist: &str) -> String {
    TRAILING_ANNOTATIONS.replace(artist, "").trim().to_string()
}
