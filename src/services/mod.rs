pub mod mpesa_gateway;
pub mod payments;
