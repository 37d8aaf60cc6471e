pub mod company;
pub mod generator;

pub use company::{CompanyResult, CompanyStatus, Investment, PortfolioCompany};
pub use generator::build_portfolio;
