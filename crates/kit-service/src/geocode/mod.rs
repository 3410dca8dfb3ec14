//! 地理编码
//!
//! 封装限流的第三方地理编码 / 海拔服务

mod client;
mod query;
mod response;

pub use client::{GeocodeClient, Geocoder};
pub use query::GeocodeQuery;
pub use response::{Coordinates, LookupFailure, LookupResult, OVER_QUERY_LIMIT};

#[cfg(test)]
pub use client::MockGeocoder;
