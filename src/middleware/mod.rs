pub mod auth;
pub mod rate_limit;
pub mod super_admin;
pub mod tenant;
