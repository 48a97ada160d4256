pub mod cell;
pub mod level;
pub mod pack;
pub mod runtime;

pub use cell::*;
pub use level::*;
pub use pack::*;
pub use runtime::*;
