pub mod portfolio;

pub use portfolio::{portfolio_registry, register_portfolio_functions, PortfolioBackend};
