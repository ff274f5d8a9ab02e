//! Request interception: strategy selection, the two serving strategies and the
//! offline placeholder.

mod handler;
mod placeholder;
mod strategy;

pub use handler::RequestProxy;
pub use placeholder::{OfflinePlaceholder, DEFAULT_MESSAGE, OFFLINE_HEADER};
pub use strategy::{Strategy, StrategySelector, ASSET_MARKERS, STATIC_EXTENSIONS};
