//! Domain models shared across the entire Wallkeeper system.

pub mod market;
pub mod order;
pub mod target;

pub use market::{Ticker, TickerEntry};
pub use order::{Balance, OpenOrder, OrderAck, Side};
pub use target::{Level, PriceTarget};
