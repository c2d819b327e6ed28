//! One extractor per municipal site. Each exposes pure `discover_links` and
//! `parse_detail` functions so the markup heuristics run against fixtures.

mod rijeka;
mod sibenik;
mod split;
mod zagreb;

pub use rijeka::{parse_amounts_page, AmountSection, RijekaDetail, RijekaExtractor};
pub use sibenik::{SibenikDetail, SibenikExtractor};
pub use split::SplitExtractor;
pub use zagreb::ZagrebExtractor;
