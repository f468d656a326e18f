pub mod dispatch;
pub mod errors;
pub mod ids;
pub mod model;
pub mod progress;
pub mod time;
pub mod types;

pub use dispatch::*;
pub use errors::*;
pub use ids::*;
pub use model::*;
pub use progress::*;
pub use time::*;
pub use types::*;
