pub mod chain;
pub mod price;
pub mod store;

pub use chain::ChainService;
pub use price::PriceService;
pub use store::{MaspStore, MockStore, PgStore};
