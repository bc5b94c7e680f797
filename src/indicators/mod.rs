pub mod atr;
pub mod ema;
pub mod rsi;
pub mod stats;

pub use atr::*;
pub use ema::*;
pub use rsi::*;
pub use stats::*;

pub trait Indicator {
    fn name(&self) -> &'static str;
    fn is_ready(&self) -> bool;
    fn reset(&mut self);
}
