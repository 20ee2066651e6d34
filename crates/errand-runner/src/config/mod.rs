pub mod catalog;
pub mod params;
pub mod plan;
pub mod schema;
