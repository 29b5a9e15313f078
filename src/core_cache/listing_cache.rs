use crate::core_cache::path_type::ServerPathType;
use chrono::{DateTime, Local, NaiveDate};
use log::{debug, trace, warn};
use percent_encoding::percent_decode_str;
use std::sync::Arc;
use tokio::sync::RwLock;
use url::Url;

/// What a cached listing is looked up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingKey {
    pub host: String,
    pub port: u16,
    /// `None` for an anonymous login.
    pub user: Option<String>,
    pub path_type: ServerPathType,
    /// Path as the server spelled it.
    pub path: String,
    pub list_command: String,
    pub is_ftps: bool,
}

impl ListingKey {
    fn same_server(&self, host: &str, port: u16, user: Option<&str>) -> bool {
        self.host.eq_ignore_ascii_case(host) && self.port == port && self.user.as_deref() == user
    }

    fn matches(&self, other: &ListingKey) -> bool {
        self.same_server(&other.host, other.port, other.user.as_deref())
            && self.path_type == other.path_type
            && self.path_type.is_same_path(&self.path, &other.path)
            && self.is_ftps == other.is_ftps
            && self.list_command.eq_ignore_ascii_case(&other.list_command)
    }

    fn size(&self) -> usize {
        self.host.len()
            + self.user.as_ref().map_or(0, String::len)
            + self.path.len()
            + self.list_command.len()
    }
}

/// A directory listing kept in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedListing {
    pub key: ListingKey,
    pub listing: Vec<u8>,
    pub retrieved_at: DateTime<Local>,
    /// Date assumed for year-less entries of the listing ("Jan 5 12:00").
    pub listing_date: NaiveDate,
}

impl CachedListing {
    pub fn new(key: ListingKey, listing: Vec<u8>) -> Self {
        let retrieved_at = Local::now();
        Self {
            key,
            listing,
            listing_date: retrieved_at.date_naive(),
            retrieved_at,
        }
    }

    fn size(&self) -> usize {
        self.key.size() + self.listing.len()
    }
}

#[derive(Debug, Default)]
struct CacheItems {
    items: Vec<CachedListing>,
    total_size: usize,
}

impl CacheItems {
    fn remove_at(&mut self, index: usize) -> CachedListing {
        let item = self.items.remove(index);
        self.total_size -= item.size();
        item
    }

    fn retain(&mut self, mut keep: impl FnMut(&CachedListing) -> bool) -> usize {
        let before = self.items.len();
        let mut removed_size = 0;
        self.items.retain(|item| {
            let kept = keep(item);
            if !kept {
                removed_size += item.size();
            }
            kept
        });
        self.total_size -= removed_size;
        before - self.items.len()
    }
}

/// Directory listings of every server the process talked to.
///
/// Shared by every connection of the process. Lookups never touch the
/// network; entries are replaced after each successful listing and evicted
/// oldest first once the size quota is exceeded.
#[derive(Debug, Clone)]
pub struct ListingCache {
    items: Arc<RwLock<CacheItems>>,
    max_size: usize,
}

impl ListingCache {
    pub fn new(max_size: u64) -> Self {
        Self {
            items: Arc::new(RwLock::new(CacheItems::default())),
            max_size: usize::try_from(max_size).unwrap_or(usize::MAX),
        }
    }

    /// Pure lookup. The returned listing carries the cached path spelling.
    pub async fn get_path_listing(&self, key: &ListingKey) -> Option<CachedListing> {
        let items = self.items.read().await;
        let found = items.items.iter().find(|item| item.key.matches(key)).cloned();
        trace!(
            "Listing cache {} for {}:{}{}",
            if found.is_some() { "hit" } else { "miss" },
            key.host,
            key.port,
            key.path
        );
        found
    }

    /// Stores a listing, replacing any entry with the same key.
    pub async fn add_or_update_path_listing(&self, listing: CachedListing) {
        let mut items = self.items.write().await;
        if let Some(index) = items.items.iter().position(|item| item.key.matches(&listing.key)) {
            items.remove_at(index);
        }
        items.total_size += listing.size();
        items.items.push(listing);

        // the newest entry stays even when it alone is over quota
        while items.items.len() > 1 && items.total_size > self.max_size {
            let evicted = items.remove_at(0);
            debug!(
                "Listing cache full, evicted {}:{}{}",
                evicted.key.host, evicted.key.port, evicted.key.path
            );
        }
    }

    /// Drops the listings of `path` and its subdirectories on one server,
    /// or every listing of that server with `ignore_path`.
    pub async fn refresh_on_path(
        &self,
        host: &str,
        port: u16,
        user: Option<&str>,
        path_type: ServerPathType,
        path: &str,
        ignore_path: bool,
    ) -> usize {
        let mut items = self.items.write().await;
        let removed = items.retain(|item| {
            !(item.key.same_server(host, port, user)
                && (ignore_path
                    || (item.key.path_type == path_type
                        && path_type.is_prefix_of(path, &item.key.path, false))))
        });
        debug!("Listing cache refresh on {}:{}{}: {} removed", host, port, path, removed);
        removed
    }

    /// Handles a "path changed" notice given as a URL
    /// (`ftp://user@host:port/path`).
    pub async fn accept_change_on_path_notification(
        &self,
        user_part: &str,
        including_subdirs: bool,
    ) -> usize {
        let url = match Url::parse(user_part) {
            Ok(u) => u,
            Err(e) => {
                warn!("Ignoring path change notice {:?}: {}", user_part, e);
                return 0;
            }
        };
        let Some(host) = url.host_str() else {
            return 0;
        };
        let port = url.port_or_known_default().unwrap_or(crate::constants::DEFAULT_FTP_PORT);
        let user = match url.username() {
            "" => None,
            u if u.eq_ignore_ascii_case(crate::constants::ANONYMOUS_USER) => None,
            u => Some(u.to_string()),
        };
        let path = percent_decode_str(url.path()).decode_utf8_lossy().into_owned();

        let mut items = self.items.write().await;
        items.retain(|item| {
            if !item.key.same_server(host, port, user.as_deref()) {
                return true;
            }
            let local = item.key.path_type.local_path(&path);
            !item
                .key
                .path_type
                .is_prefix_of(local, &item.key.path, !including_subdirs)
        })
    }

    /// Empties the cache (listing cache disabled in the configuration).
    pub async fn clear(&self) {
        let mut items = self.items.write().await;
        items.items.clear();
        items.total_size = 0;
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.items.is_empty()
    }

    pub async fn total_size(&self) -> usize {
        self.items.read().await.total_size
    }
}
