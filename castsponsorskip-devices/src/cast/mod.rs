pub use channel::*;
pub use errors::*;
pub use models::*;
pub use session::*;

mod channel;
mod errors;
mod models;
mod session;
