//! GraphQL module
//!
//! Request bodies, cursor connections and the provider metadata carried
//! alongside `data`: query cost, throttle errors and auth-expired errors.
//! Everything provider-specific is data in a [`UsageProfile`].

mod path;
mod response;
mod types;

pub use path::{as_f64, find_all, select, select_f64, select_string, select_value};
pub use response::ResponseInspector;
pub use types::{GraphQlFailure, GraphQlRequest, Page, UsagePaths, UsageProfile};

#[cfg(test)]
mod tests;
