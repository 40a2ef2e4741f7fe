//! Outbound integrations. Only one today: the SSLCommerz payment gateway.

mod sslcommerz;

pub use sslcommerz::SslCommerzClient;
