//! Email address type and identity-matching variations.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Domains whose mailboxes ignore dots in the local part.
const GMAIL_DOMAINS: [&str; 2] = ["gmail.com", "googlemail.com"];

/// Errors that can occur when parsing an [`Email`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    /// The input string is empty.
    #[error("email cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("email must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
    /// The input does not contain an @ symbol.
    #[error("email must contain an @ symbol")]
    MissingAtSymbol,
    /// The local part (before @) is empty.
    #[error("email local part cannot be empty")]
    EmptyLocalPart,
    /// The domain part (after @) is empty.
    #[error("email domain cannot be empty")]
    EmptyDomain,
}

/// An email address.
///
/// Addresses are trimmed and lowercased on parse so that lookups against
/// stored records compare like with like.
///
/// ## Constraints
///
/// - Length: 1-254 characters (RFC 5321 limit)
/// - Local part (before the last @) must not be empty
/// - Domain part (after the last @) must not be empty
///
/// ## Examples
///
/// ```
/// use flexhub_core::Email;
///
/// let email = Email::parse("  Coach.Kim@Example.com ").unwrap();
/// assert_eq!(email.as_str(), "coach.kim@example.com");
///
/// assert!(Email::parse("").is_err());
/// assert!(Email::parse("no-at-symbol").is_err());
/// assert!(Email::parse("@domain.com").is_err());
/// assert!(Email::parse("user@").is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(try_from = "String", into = "String")]
pub struct Email(String);

impl Email {
    /// Maximum length of an email address (RFC 5321).
    pub const MAX_LENGTH: usize = 254;

    /// Parse an `Email` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input:
    /// - Is empty after trimming
    /// - Is longer than 254 characters
    /// - Does not contain an @ symbol
    /// - Has an empty local part or domain
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(EmailError::Empty);
        }

        if s.len() > Self::MAX_LENGTH {
            return Err(EmailError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        let (local, domain) = s.rsplit_once('@').ok_or(EmailError::MissingAtSymbol)?;

        if local.is_empty() {
            return Err(EmailError::EmptyLocalPart);
        }

        if domain.is_empty() {
            return Err(EmailError::EmptyDomain);
        }

        Ok(Self(s.to_lowercase()))
    }

    /// Returns the email address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `Email` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }

    /// Returns the local part of the email (before the @).
    #[must_use]
    pub fn local_part(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(local, _)| local)
    }

    /// Returns the domain part of the email (after the @).
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, domain)| domain)
    }

    /// Returns the address forms this mailbox may also be written as.
    ///
    /// See [`generate_email_variations`].
    #[must_use]
    pub fn variations(&self) -> Vec<String> {
        generate_email_variations(&self.0)
    }

    /// Returns the single stored form of this mailbox.
    ///
    /// See [`canonical_email`].
    #[must_use]
    pub fn canonical(&self) -> String {
        canonical_email(&self.0)
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Email {
    type Err = EmailError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Email {
    type Error = EmailError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Email> for String {
    fn from(email: Email) -> Self {
        email.0
    }
}

impl AsRef<str> for Email {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produce the normalized address forms used to match one person across
/// differently-typed addresses.
///
/// The first entry is always the trimmed, lowercased input. Further entries:
///
/// - the plus-alias stripped (`jane+gym@x.com` → `jane@x.com`)
/// - for Gmail, the dot-insensitive local part and both domain spellings
/// - for educational domains (`.edu`, `.edu.xx`, `.ac.xx`), the dot-folded
///   local part and the department subdomain collapsed
///   (`cs.state.edu` → `state.edu`)
///
/// This is a heuristic. Two different people can collide (false positive) and
/// providers with other aliasing rules are not covered (false negative).
///
/// ```
/// use flexhub_core::generate_email_variations;
///
/// let variations = generate_email_variations("John.Doe+test@gmail.com");
/// assert_eq!(variations[0], "john.doe+test@gmail.com");
/// assert!(variations.contains(&"johndoe@gmail.com".to_string()));
/// ```
#[must_use]
pub fn generate_email_variations(raw: &str) -> Vec<String> {
    let email = raw.trim().to_lowercase();
    let mut variations = vec![email.clone()];

    let Some((local, domain)) = email.rsplit_once('@') else {
        return variations;
    };
    if local.is_empty() || domain.is_empty() {
        return variations;
    }

    let base_local = local.split('+').next().unwrap_or(local);

    let mut locals = vec![local.to_owned(), base_local.to_owned()];
    let mut domains = vec![domain.to_owned()];

    if GMAIL_DOMAINS.contains(&domain) {
        locals.push(local.replace('.', ""));
        locals.push(base_local.replace('.', ""));
        domains.extend(
            GMAIL_DOMAINS
                .iter()
                .filter(|d| **d != domain)
                .map(|d| (*d).to_owned()),
        );
    } else if is_educational_domain(domain) {
        locals.push(base_local.replace('.', ""));
        if let Some(collapsed) = collapse_educational_domain(domain) {
            domains.push(collapsed);
        }
    }

    for domain in &domains {
        for local in &locals {
            if local.is_empty() {
                continue;
            }
            let candidate = format!("{local}@{domain}");
            if !variations.contains(&candidate) {
                variations.push(candidate);
            }
        }
    }

    variations
}

/// Reduce an address to one form per mailbox.
///
/// Applies the same rules as [`generate_email_variations`] in their most
/// folded form: plus-alias dropped, Gmail dots dropped with `googlemail.com`
/// spelled `gmail.com`, educational dots dropped with the department
/// subdomain collapsed. Comparing canonical forms matches no matter which
/// side was typed with the alias.
///
/// Input without a usable local part or domain comes back trimmed and
/// lowercased.
///
/// ```
/// use flexhub_core::canonical_email;
///
/// assert_eq!(canonical_email("First.Last+gym@googlemail.com"), "firstlast@gmail.com");
/// assert_eq!(canonical_email("j.smith@cs.state.edu"), "jsmith@state.edu");
/// assert_eq!(canonical_email("ana.lift+promo@fitmail.io"), "ana.lift@fitmail.io");
/// ```
#[must_use]
pub fn canonical_email(raw: &str) -> String {
    let email = raw.trim().to_lowercase();
    let Some((local, domain)) = email.rsplit_once('@') else {
        return email;
    };
    let base = local.split('+').next().unwrap_or(local);
    if base.is_empty() || domain.is_empty() {
        return email;
    }

    let (base, domain) = if GMAIL_DOMAINS.contains(&domain) {
        (base.replace('.', ""), GMAIL_DOMAINS[0].to_owned())
    } else if is_educational_domain(domain) {
        (
            base.replace('.', ""),
            collapse_educational_domain(domain).unwrap_or_else(|| domain.to_owned()),
        )
    } else {
        (base.to_owned(), domain.to_owned())
    };

    if base.is_empty() {
        return email;
    }
    format!("{base}@{domain}")
}

/// Returns true if both addresses reduce to the same mailbox.
#[must_use]
pub fn same_mailbox(a: &str, b: &str) -> bool {
    canonical_email(a) == canonical_email(b)
}

/// Returns true for `.edu`, `.edu.xx`, and `.ac.xx` domains.
fn is_educational_domain(domain: &str) -> bool {
    let labels: Vec<&str> = domain.split('.').collect();
    match labels.as_slice() {
        [.., "edu"] => true,
        [.., second, country] => (*second == "edu" || *second == "ac") && country.len() == 2,
        _ => false,
    }
}

/// Collapse a departmental subdomain to the institution's domain.
///
/// Returns `None` when the domain is already the institution's domain.
fn collapse_educational_domain(domain: &str) -> Option<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    let keep = if domain.ends_with(".edu") { 2 } else { 3 };

    if labels.len() <= keep {
        return None;
    }

    Some(
        labels
            .iter()
            .skip(labels.len() - keep)
            .copied()
            .collect::<Vec<_>>()
            .join("."),
    )
}

// SQLx support (with postgres feature)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Email {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <String as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Email {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <String as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        // Database values are assumed valid
        Ok(Self(s))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Email {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <String as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_emails() {
        assert!(Email::parse("user@example.com").is_ok());
        assert!(Email::parse("user.name+tag@example.com").is_ok());
        assert!(Email::parse("user@subdomain.example.co.uk").is_ok());
        assert!(Email::parse("a@b.c").is_ok());
    }

    #[test]
    fn test_parse_normalizes_case_and_whitespace() {
        let email = Email::parse("  Jane.Doe@Example.COM\n").unwrap();
        assert_eq!(email.as_str(), "jane.doe@example.com");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(Email::parse("   "), Err(EmailError::Empty));
        assert_eq!(Email::parse("no-at"), Err(EmailError::MissingAtSymbol));
        assert_eq!(Email::parse("@x.com"), Err(EmailError::EmptyLocalPart));
        assert_eq!(Email::parse("user@"), Err(EmailError::EmptyDomain));

        let long = format!("{}@example.com", "a".repeat(250));
        assert!(matches!(
            Email::parse(&long),
            Err(EmailError::TooLong { .. })
        ));
    }

    #[test]
    fn test_local_part_and_domain() {
        let email = Email::parse("user@example.com").unwrap();
        assert_eq!(email.local_part(), "user");
        assert_eq!(email.domain(), "example.com");
    }

    #[test]
    fn test_deserialize_validates() {
        let parsed: Email = serde_json::from_str("\"Coach@Example.com\"").unwrap();
        assert_eq!(parsed.as_str(), "coach@example.com");
        assert!(serde_json::from_str::<Email>("\"nope\"").is_err());
    }

    #[test]
    fn test_variations_gmail_dots_and_plus() {
        let variations = generate_email_variations("John.Doe+test@gmail.com");

        assert_eq!(variations.first().unwrap(), "john.doe+test@gmail.com");
        assert!(variations.contains(&"john.doe@gmail.com".to_string()));
        assert!(variations.contains(&"johndoe@gmail.com".to_string()));
        assert!(variations.contains(&"johndoe@googlemail.com".to_string()));
    }

    #[test]
    fn test_variations_plain_domain_keeps_dots() {
        let variations = generate_email_variations("ana.lift+promo@fitmail.io");

        assert_eq!(
            variations,
            vec![
                "ana.lift+promo@fitmail.io".to_string(),
                "ana.lift@fitmail.io".to_string(),
            ]
        );
    }

    #[test]
    fn test_variations_edu_folding() {
        let variations = generate_email_variations("j.smith@cs.state.edu");

        assert!(variations.contains(&"jsmith@cs.state.edu".to_string()));
        assert!(variations.contains(&"j.smith@state.edu".to_string()));
        assert!(variations.contains(&"jsmith@state.edu".to_string()));
    }

    #[test]
    fn test_variations_international_academic_domain() {
        let variations = generate_email_variations("a.b@eng.ox.ac.uk");

        assert!(variations.contains(&"ab@eng.ox.ac.uk".to_string()));
        assert!(variations.contains(&"a.b@ox.ac.uk".to_string()));
    }

    #[test]
    fn test_variations_deduplicates() {
        let variations = generate_email_variations("plain@gmail.com");
        let mut sorted = variations.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), variations.len());
    }

    #[test]
    fn test_variations_invalid_input_returns_input_only() {
        assert_eq!(generate_email_variations("Not-An-Email"), vec!["not-an-email"]);
    }

    #[test]
    fn test_canonical_email_folds_aliases() {
        assert_eq!(canonical_email("First.Last+gym@gmail.com"), "firstlast@gmail.com");
        assert_eq!(canonical_email("firstlast@googlemail.com"), "firstlast@gmail.com");
        assert_eq!(canonical_email("a.b@eng.ox.ac.uk"), "ab@ox.ac.uk");
        assert_eq!(canonical_email("ana.lift+x@fitmail.io"), "ana.lift@fitmail.io");
    }

    #[test]
    fn test_canonical_email_keeps_unusable_input() {
        assert_eq!(canonical_email(" Not-An-Email "), "not-an-email");
        assert_eq!(canonical_email("+only@gmail.com"), "+only@gmail.com");
        assert_eq!(canonical_email("...@gmail.com"), "...@gmail.com");
        assert_eq!(canonical_email("user@"), "user@");
    }

    #[test]
    fn test_same_mailbox_either_direction() {
        // Stored with dots, typed without, and the reverse.
        assert!(same_mailbox("first.last@gmail.com", "firstlast@googlemail.com"));
        assert!(same_mailbox("firstlast@googlemail.com", "first.last@gmail.com"));
        assert!(same_mailbox("coach+team@fitmail.io", "Coach@FitMail.io"));
        assert!(!same_mailbox("coach@fitmail.io", "c.oach@fitmail.io"));
        assert!(!same_mailbox("coach@gmail.com", "coach@fitmail.io"));
    }

    #[test]
    fn test_email_variations_method_matches_free_function() {
        let email = Email::parse("Pat+x@GMAIL.com").unwrap();
        assert_eq!(email.variations(), generate_email_variations("pat+x@gmail.com"));
    }
}
