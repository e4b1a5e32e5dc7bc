//! Email variation inspection.
//!
//! Prints the addresses the application workflow treats as the same
//! person, which helps when an applicant reports a false duplicate.

use flexhub_core::generate_email_variations;

/// Print each variation on its own line.
pub fn print_variations(email: &str) {
    #[allow(clippy::print_stdout)]
    {
        for variation in generate_email_variations(email) {
            println!("{variation}");
        }
    }
}
