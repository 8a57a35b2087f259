//! Fragment retrieval client.
//!
//! Composes fragment URLs against the transcoding server, validating
//! that the upstream playlist really carries the sd-hash the caller
//! expects before any URL leaves this module. Resolution of a stream
//! identifier to its upstream playlist URL sits behind
//! [`StreamResolver`] so the cache logic stays testable offline.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use crate::cache::{Fragment, FragmentCache};
use crate::FragmentError;

/// Matches the 96-hex sd-hash segment of a streams URL.
pub fn sd_hash_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/streams/([0-9a-f]{96})/").expect("pattern is valid"))
}

/// Resolves a stream identifier to the upstream playlist URL.
#[async_trait]
pub trait StreamResolver: Send + Sync {
    /// Returns the URL of the stream's master playlist as the upstream
    /// knows it.
    ///
    /// # Errors
    ///
    /// - `FragmentError::NotAvailable` - upstream has no stream for this id
    /// - `FragmentError::Http` - transfer failed
    async fn resolve(&self, uri: &str, sd_hash: &str) -> Result<String, FragmentError>;
}

/// Resolver backed by the transcoding server's video API.
pub struct CdnResolver {
    client: reqwest::Client,
    server: String,
}

impl CdnResolver {
    /// Creates a resolver asking `server` for stream availability.
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            server: server.into(),
        }
    }
}

#[async_trait]
impl StreamResolver for CdnResolver {
    async fn resolve(&self, uri: &str, sd_hash: &str) -> Result<String, FragmentError> {
        let url = format!(
            "{}/api/v1/video/{}?sd_hash={}",
            self.server.trim_end_matches('/'),
            urlencode(uri),
            sd_hash,
        );
        let body: serde_json::Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match body["status"].as_str() {
            Some("available") => {
                let path = body["path"].as_str().unwrap_or_default();
                Ok(format!("{}{}", self.server.trim_end_matches('/'), path))
            }
            Some("remote") => Ok(body["url"].as_str().unwrap_or_default().to_owned()),
            other => Err(FragmentError::NotAvailable {
                uri: uri.to_owned(),
                reason: other.unwrap_or("no status").to_owned(),
            }),
        }
    }
}

/// Minimal percent-encoding for a stream identifier used as one path
/// segment.
fn urlencode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for b in input.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Fragment client: on-disk cache plus validated upstream URLs.
pub struct Client {
    server: String,
    cache: FragmentCache,
    resolver: Box<dyn StreamResolver>,
}

impl Client {
    /// Creates a client serving from `server` and caching under
    /// `video_path`.
    pub fn new(
        server: impl Into<String>,
        video_path: impl Into<std::path::PathBuf>,
        resolver: Box<dyn StreamResolver>,
    ) -> Self {
        Self {
            server: server.into(),
            cache: FragmentCache::new(video_path),
            resolver,
        }
    }

    /// The underlying fragment cache.
    pub fn cache(&self) -> &FragmentCache {
        &self.cache
    }

    /// Rebuilds the cache index from disk; returns the fragment count.
    ///
    /// # Errors
    ///
    /// - `FragmentError::Io` - directory walk failed
    pub async fn restore_cache(&self) -> Result<usize, FragmentError> {
        self.cache.restore().await
    }

    /// Cache lookup for one fragment. `Some` is a hit with exact on-disk
    /// size; `None` sends the caller upstream.
    pub fn get_cached_fragment(&self, url: &str, sd_hash: &str, name: &str) -> Option<Fragment> {
        let hit = self.cache.get(sd_hash, name);
        debug!(url, sd_hash, name, hit = hit.is_some(), "fragment cache lookup");
        hit
    }

    /// Absolute path of a cached fragment's bytes.
    pub fn full_fragment_path(&self, fragment: &Fragment) -> std::path::PathBuf {
        self.cache.full_path(fragment)
    }

    /// Composes the URL a fragment should be fetched from.
    ///
    /// The upstream playlist URL is resolved first and must embed the
    /// exact sd-hash the caller expects; any disagreement is an error,
    /// not a silent fallback.
    ///
    /// # Errors
    ///
    /// - `FragmentError::SdHashMismatch` - upstream embeds another hash
    /// - `FragmentError::NotAvailable` / `FragmentError::Http` - resolution failed
    pub async fn fragment_url(
        &self,
        uri: &str,
        sd_hash: &str,
        name: &str,
    ) -> Result<String, FragmentError> {
        let upstream = self.resolver.resolve(uri, sd_hash).await?;
        let embedded = sd_hash_re()
            .captures(&upstream)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str());

        match embedded {
            Some(embedded) if embedded == sd_hash => {
                Ok(format!("{}/streams/{}/{}", self.server, sd_hash, name))
            }
            _ => Err(FragmentError::SdHashMismatch {
                expected: sd_hash.to_owned(),
                url: upstream,
            }),
        }
    }

    /// Returns a fragment's bytes path, fetching and caching it on a
    /// miss.
    ///
    /// # Errors
    ///
    /// - `FragmentError::SdHashMismatch` - upstream embeds another hash
    /// - `FragmentError::Http` - fragment download failed
    /// - `FragmentError::Io` - cache write failed
    pub async fn fetch_fragment(
        &self,
        uri: &str,
        sd_hash: &str,
        name: &str,
    ) -> Result<Fragment, FragmentError> {
        if let Some(hit) = self.get_cached_fragment(uri, sd_hash, name) {
            return Ok(hit);
        }
        let url = self.fragment_url(uri, sd_hash, name).await?;
        let data = reqwest::get(&url).await?.error_for_status()?.bytes().await?;
        self.cache.store(sd_hash, name, &data).await
    }
}

#[cfg(test)]
mod tests {
    use rand::distributions::Alphanumeric;
    use rand::{thread_rng, Rng};

    use super::*;

    const STREAM_URI: &str = "vanquish-trailer-(2021)-morgan-freeman,#b7b150d1bbca4650ad4ab921dd8d424bf77c1141";
    const STREAM_SD_HASH: &str =
        "bec50ab288153ed03b0eb8dafd814daf19a187e07f8da4ad91cf778f5c39ac74d9d92ad6e3ebf2ddb6b7acea3cb8893a";

    fn random_string(n: usize) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(n)
            .map(char::from)
            .collect()
    }

    /// Resolver that always reports the same upstream playlist URL.
    struct CannedResolver {
        playlist_url: String,
    }

    #[async_trait]
    impl StreamResolver for CannedResolver {
        async fn resolve(&self, _uri: &str, _sd_hash: &str) -> Result<String, FragmentError> {
            Ok(self.playlist_url.clone())
        }
    }

    fn client_with_upstream(tmp: &std::path::Path, embedded_hash: &str) -> Client {
        Client::new(
            "http://t0.example.tv:18081",
            tmp,
            Box::new(CannedResolver {
                playlist_url: format!(
                    "http://t0.example.tv:18081/streams/{embedded_hash}/master.m3u8"
                ),
            }),
        )
    }

    #[test]
    fn sd_hash_regex_extracts_the_hash() {
        let url = format!(
            "http://t0.example.tv:18081/streams/{STREAM_SD_HASH}/master.m3u8"
        );
        let m = sd_hash_re()
            .captures(&url)
            .and_then(|c| c.get(1))
            .expect("match");
        assert_eq!(STREAM_SD_HASH, m.as_str());
    }

    #[tokio::test]
    async fn fragment_url_rejects_hash_mismatch() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let client = client_with_upstream(tmp.path(), STREAM_SD_HASH);

        // Caller expects a different, well-formed hash.
        let other = "0b8dfc049b2165fad5829aca24f2ddfae3acef8d73bc5e04ff8b932fce9fc463dc6cf3e638413f04536638d2e7218427";
        let err = client
            .fragment_url("morgan", other, "master.m3u8")
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("remote sd hash mismatch"));

        // Caller expects a malformed hash.
        let err = client
            .fragment_url(STREAM_URI, "azazaz", "master.m3u8")
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("remote sd hash mismatch"));
    }

    #[tokio::test]
    async fn fragment_url_rejects_unparsable_upstream() {
        let tmp = tempfile::tempdir().expect("tempdir");
        // Upstream URL with no recognisable hash segment.
        let client = client_with_upstream(tmp.path(), "not-a-hash");

        let err = client
            .fragment_url(STREAM_URI, STREAM_SD_HASH, "master.m3u8")
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("remote sd hash mismatch"));
    }

    #[tokio::test]
    async fn fragment_url_composes_on_match() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let client = client_with_upstream(tmp.path(), STREAM_SD_HASH);

        let url = client
            .fragment_url(STREAM_URI, STREAM_SD_HASH, "master.m3u8")
            .await
            .expect("url");
        assert_eq!(
            format!("http://t0.example.tv:18081/streams/{STREAM_SD_HASH}/master.m3u8"),
            url
        );
    }

    /// Writes one plausible HLS rendition: four quality levels of 78
    /// segments each, their four playlists, and the master playlist.
    async fn populate_hls_playlist(root: &std::path::Path, sd_hash: &str) {
        let dir = root.join(sd_hash);
        tokio::fs::create_dir_all(&dir).await.expect("mkdir");

        let mut master = String::from("#EXTM3U\n");
        for rendition in 0..4 {
            let mut playlist = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
            for segment in 0..78 {
                let name = format!("v{rendition}_s{segment:06}.ts");
                tokio::fs::write(dir.join(&name), vec![0u8; 10_000])
                    .await
                    .expect("segment");
                playlist.push_str(&format!("#EXTINF:6.0,\n{name}\n"));
            }
            let playlist_name = format!("stream_{rendition}.m3u8");
            tokio::fs::write(dir.join(&playlist_name), playlist)
                .await
                .expect("playlist");
            master.push_str(&format!(
                "#EXT-X-STREAM-INF:BANDWIDTH={}\n{playlist_name}\n",
                (rendition + 1) * 1_000_000
            ));
        }
        tokio::fs::write(dir.join("master.m3u8"), master)
            .await
            .expect("master");
    }

    #[tokio::test]
    async fn restore_cache_counts_every_fragment() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let client = client_with_upstream(tmp.path(), STREAM_SD_HASH);

        let mut hashes = Vec::new();
        for _ in 0..10 {
            let sd_hash = random_string(96);
            populate_hls_playlist(tmp.path(), &sd_hash).await;
            hashes.push(sd_hash);
        }

        let restored = client.restore_cache().await.expect("restore");
        assert_eq!((78 * 4 + 5) * 10, restored);

        for sd_hash in &hashes {
            let mut entries = tokio::fs::read_dir(tmp.path().join(sd_hash))
                .await
                .expect("read dir");
            while let Some(entry) = entries.next_entry().await.expect("entry") {
                let name = entry.file_name().to_string_lossy().into_owned();
                let fragment = client
                    .get_cached_fragment("zzz", sd_hash, &name)
                    .expect("cache hit");
                let on_disk = entry.metadata().await.expect("metadata").len();
                assert_eq!(on_disk, fragment.size());
                assert!(client.full_fragment_path(&fragment).exists());
            }
        }
    }
}
