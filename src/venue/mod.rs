//! Trading-venue connectivity (spec §4.12, §4.13): order placement and
//! status polling, plus the real-time order-book price feed.

pub mod client;
pub mod price_feed;

pub use client::{DryRunVenueClient, PlaceOrderRequest, VenueClient, VenueOrderStatus};
pub use price_feed::{PriceFeed, PriceFeedHandle, PriceTick};
