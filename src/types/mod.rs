pub mod bar;
pub mod counters;
pub mod position;
pub mod setup;
pub mod signal;

pub use bar::*;
pub use counters::*;
pub use position::*;
pub use setup::*;
pub use signal::*;
