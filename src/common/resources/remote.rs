use super::*;
use crate::common::error::MatchLstmError;
use cached_path::{Cache, Options, ProgressBar};
use dirs::cache_dir;
use lazy_static::lazy_static;
use std::path::PathBuf;

/// # Remote resource that will be downloaded and cached locally on demand
#[derive(PartialEq, Clone, Debug)]
pub struct RemoteResource {
    /// Remote path/url for the resource
    pub url: String,
    /// Local subdirectory of the cache root where this resource is saved
    pub cache_subdir: String,
}

impl RemoteResource {
    /// Creates a new RemoteResource from an URL and a custom local path. Note that this does not
    /// download the resource (only declares the remote and local locations)
    ///
    /// # Arguments
    ///
    /// * `url` - `&str` Location of the remote resource
    /// * `cache_subdir` - `&str` Local subdirectory of the cache root to save the resource to
    ///
    /// # Example
    ///
    /// ```no_run
    /// use match_lstm::resources::RemoteResource;
    /// let config_resource = RemoteResource::new("https://example.org/config.json", "match-lstm-squad");
    /// ```
    pub fn new(url: &str, cache_subdir: &str) -> RemoteResource {
        RemoteResource {
            url: url.to_string(),
            cache_subdir: cache_subdir.to_string(),
        }
    }

    /// Creates a new RemoteResource from a `(cache subdirectory, url)` pair.
    pub fn from_pretrained(name_url_tuple: (&str, &str)) -> RemoteResource {
        let cache_subdir = name_url_tuple.0.to_string();
        let url = name_url_tuple.1.to_string();
        RemoteResource { url, cache_subdir }
    }
}

impl ResourceProvider for RemoteResource {
    /// Gets the local path for a remote resource.
    ///
    /// The remote resource is downloaded and cached. Then the path
    /// to the local cache is returned.
    fn get_local_path(&self) -> Result<PathBuf, MatchLstmError> {
        let cache = Cache::builder()
            .dir(CACHE_DIRECTORY.clone())
            .progress_bar(Some(ProgressBar::Light))
            .build()?;
        let cached_path =
            cache.cached_path_with_options(&self.url, &Options::default().subdir(&self.cache_subdir))?;
        tracing::debug!(url = %self.url, path = %cached_path.display(), "resolved remote resource");
        Ok(cached_path)
    }
}

lazy_static! {
/// # Global cache directory
/// If the environment variable `MATCH_LSTM_CACHE` is set, will save the cache model files at that
/// location. Otherwise defaults to `$XDG_CACHE_HOME/.match_lstm`, or corresponding user cache for
/// the current system.
    pub static ref CACHE_DIRECTORY: PathBuf = _get_cache_directory();
}

fn _get_cache_directory() -> PathBuf {
    match std::env::var("MATCH_LSTM_CACHE") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let mut home = cache_dir().unwrap_or_else(|| PathBuf::from("."));
            home.push(".match_lstm");
            home
        }
    }
}
