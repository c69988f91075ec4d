pub mod discovery;
pub mod weather;

pub use discovery::{GammaMarketDiscovery, MarketDiscovery, RawMarket, RawToken, parse_market};
pub use weather::{OpenMeteoClient, WeatherClient};
