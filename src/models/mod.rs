pub mod auth;
pub mod business;
pub mod call;
pub mod dream_buyer;
pub mod instagram;
pub mod kpi;
pub mod lead;
pub mod offer;
pub mod pipeline;
pub mod plan;
pub mod user;
