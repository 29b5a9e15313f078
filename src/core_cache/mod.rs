pub mod listing_cache;
pub mod path_type;


pub use listing_cache::{CachedListing, ListingCache, ListingKey};
pub use path_type::{server_system_name, ServerPathType};
