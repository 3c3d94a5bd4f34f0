//! Link discovery from search-result pages.

pub mod decode;
pub mod link_extractor;
pub mod normalize;
pub mod portal;

pub use decode::{resolve_link, LinkDecoder};
pub use link_extractor::{extract_links, is_challenge_page, Extraction};
pub use normalize::LinkRules;
pub use portal::{PortalClient, SearchPage, SearchPortal};
