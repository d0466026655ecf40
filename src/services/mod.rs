pub mod catalog_service;
pub mod order_service;
pub mod status_service;
