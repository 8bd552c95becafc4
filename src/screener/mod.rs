pub mod alignment;
pub mod feed;
pub mod legacy;
pub mod scheduler;
pub mod scorecard;
pub mod synthetic;

pub use feed::TaFeed;
pub use scheduler::run_screener;
pub use scorecard::ScreenerScorecard;
