// Extraction module - ordered strategy chains for title, images and videos
//
// Each content type has a declarative list of named strategies. Adding a
// site heuristic means appending a strategy, not editing the driver.

mod chain;
mod images;
mod title;
mod traits;
mod videos;

pub use chain::{Denylist, ExtractionReport, PageExtractor, StrategyChain};
pub use images::{full_size_host_url, has_image_extension, has_video_extension, wordpress_original};
pub use title::{escape_markup, TitleCleaner};
pub use traits::{ExtractionStrategy, PageDocument, RawCandidate};
