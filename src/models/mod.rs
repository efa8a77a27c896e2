pub mod skill;
pub mod scan;

pub use skill::*;
pub use scan::*;
