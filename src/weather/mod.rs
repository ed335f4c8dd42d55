pub mod cache;
pub mod provider;
pub mod resilience;

pub use cache::WeatherCache;
pub use provider::{OpenMeteoClient, WeatherProvider};
pub use resilience::{ResilienceTuning, WeatherResilienceService};
