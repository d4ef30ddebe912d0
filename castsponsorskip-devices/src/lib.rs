pub use capabilities::*;
pub use discovery::*;
pub use models::*;
pub use registry::*;
pub use video_meta::*;
pub use watcher::*;

pub mod cast;

mod capabilities;
mod discovery;
mod models;
mod registry;
mod video_meta;
mod watcher;
