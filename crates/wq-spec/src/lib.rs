pub mod policy;
pub mod source;
pub mod spec;

pub use policy::*;
pub use source::*;
pub use spec::*;
