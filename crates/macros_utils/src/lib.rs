//! Small macros shared by the actix applications.

/// Build a `routes` function that registers every listed handler.
///
/// ```ignore
/// macros_utils::routes! {
///     route health_route,
///     route list_certificates,
/// }
/// ```
#[cfg(feature = "actix")]
#[macro_export]
macro_rules! routes {
    ($(route $handler:path),* $(,)?) => {
        pub fn routes(cfg: &mut $crate::actix_web::web::ServiceConfig) {
            $( cfg.service($handler); )*
        }
    };
}

/// Re-exported so expansions resolve without a direct dependency
#[cfg(feature = "actix")]
pub use actix_web;
