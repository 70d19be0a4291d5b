use std::num::NonZeroUsize;

use http::{HeaderMap, HeaderValue};

/// Header name to request icy metadata.
pub const ICY_METADATA_HEADER: &str = "Icy-MetaData";

/// Response header holding the number of audio bytes between metadata blocks.
pub const ICY_METAINT_HEADER: &str = "icy-metaint";

/// Largest accepted `icy-metaint`. Real servers use 8 to 64 KiB; anything above this is treated
/// as a stream without metadata.
pub const MAX_METADATA_INTERVAL: usize = 1 << 20;

/// Appends the `Icy-MetaData: 1` header to the `header_map`.
pub fn add_icy_metadata_header(header_map: &mut HeaderMap) {
    header_map.append(ICY_METADATA_HEADER, HeaderValue::from_static("1"));
}

/// Trait for requesting icy metadata from an HTTP request builder
pub trait RequestIcyMetadata {
    /// Appends the `Icy-MetaData` header to the request's header map
    fn request_icy_metadata(self) -> Self;
}

impl RequestIcyMetadata for reqwest::RequestBuilder {
    fn request_icy_metadata(self) -> Self {
        let mut header_map = HeaderMap::new();
        add_icy_metadata_header(&mut header_map);
        self.headers(header_map)
    }
}

impl RequestIcyMetadata for HeaderMap {
    fn request_icy_metadata(mut self) -> Self {
        add_icy_metadata_header(&mut self);
        self
    }
}

/// Station information found within the stream's HTTP response headers.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct IcyHeaders {
    bitrate: Option<u32>,
    genre: Option<String>,
    name: Option<String>,
    description: Option<String>,
    station_url: Option<String>,
    metadata_interval: Option<NonZeroUsize>,
}

fn find_header<'a>(search: &[&'a str], headers: &'a HeaderMap) -> Option<&'a HeaderValue> {
    search.iter().find_map(|header| headers.get(*header))
}

fn header_string(search: &[&str], headers: &HeaderMap) -> Option<String> {
    find_header(search, headers)
        .and_then(|val| val.to_str().ok())
        .map(|val| val.trim().to_string())
        .filter(|val| !val.is_empty())
}

impl IcyHeaders {
    /// Parse the icy values contained in the `headers`.
    pub fn parse_from_headers(headers: &HeaderMap) -> Self {
        Self {
            bitrate: find_header(&["ice-bitrate", "icy-br", "x-audiocast-bitrate"], headers)
                .and_then(|val| val.to_str().ok())
                // some servers send a list here, the first entry is the nominal bitrate
                .and_then(|val| val.split(',').next()?.trim().parse().ok()),
            genre: header_string(&["ice-genre", "icy-genre", "x-audiocast-genre"], headers),
            name: header_string(&["ice-name", "icy-name", "x-audiocast-name"], headers),
            description: header_string(
                &[
                    "ice-description",
                    "icy-description",
                    "x-audiocast-description",
                ],
                headers,
            ),
            station_url: header_string(&["ice-url", "icy-url", "x-audiocast-url"], headers),
            metadata_interval: headers
                .get(ICY_METAINT_HEADER)
                .and_then(|val| NonZeroUsize::new(val.to_str().ok()?.trim().parse().ok()?))
                .filter(|metaint| metaint.get() <= MAX_METADATA_INTERVAL),
        }
    }

    /// Stream bitrate in kbit/s.
    pub fn bitrate(&self) -> Option<u32> {
        self.bitrate
    }

    /// Genre as advertised by the server.
    pub fn genre(&self) -> Option<&str> {
        self.genre.as_deref()
    }

    /// Station name as advertised by the server.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Free-form station description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Homepage of the station, not the stream itself.
    pub fn station_url(&self) -> Option<&str> {
        self.station_url.as_deref()
    }

    /// Number of audio bytes between metadata blocks. Only present if the stream was requested
    /// with `Icy-MetaData: 1`; `None` means the stream carries no usable in-band metadata.
    /// Never larger than [`MAX_METADATA_INTERVAL`].
    pub fn metadata_interval(&self) -> Option<NonZeroUsize> {
        self.metadata_interval
    }
}
