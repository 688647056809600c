// Business domains
pub mod reports;
