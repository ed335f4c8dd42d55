pub mod group;
pub mod schedule;
pub mod weather;

pub use group::*;
pub use schedule::*;
pub use weather::*;
