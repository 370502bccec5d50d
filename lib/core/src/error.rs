//! Error handling foundation for agency-portal.
//!
//! Only the `Result` alias lives here. Each crate owns its domain error enums
//! and wraps them in a rootcause `Report` where a setup path can fail.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_alias_carries_ok_values() {
        let ok: Result<&str> = Ok("portal");
        assert_eq!(ok.ok(), Some("portal"));
    }
}
