pub mod cache;
pub mod static_catalog;
pub mod traits;

pub use cache::*;
pub use static_catalog::*;
pub use traits::*;
