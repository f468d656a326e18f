pub mod block;
pub mod dataset;
pub mod end;
pub mod error;
pub mod monte_carlo;
pub mod registry;
pub mod single;
pub mod start;

pub use block::*;
pub use dataset::*;
pub use end::*;
pub use error::*;
pub use monte_carlo::*;
pub use registry::*;
pub use single::*;
pub use start::*;
