//! Integration tests for applicant email variations.
//!
//! Variations expand one address into its likely spellings; the canonical
//! form folds every spelling to the one stored with an application. Both
//! directions matter: the stored spelling and the incoming one must meet.

use flexhub_core::{Email, canonical_email, generate_email_variations, same_mailbox};

fn same_applicant(a: &str, b: &str) -> bool {
    let b = b.trim().to_lowercase();
    generate_email_variations(a).contains(&b)
}

#[test]
fn test_first_variation_is_normalized_input() {
    let variations = generate_email_variations("  Kim.Lee+Coach@Gmail.com ");
    assert_eq!(
        variations.first().map(String::as_str),
        Some("kim.lee+coach@gmail.com")
    );
}

#[test]
fn test_variations_are_deduplicated() {
    let variations = generate_email_variations("kim@gmail.com");
    let mut sorted = variations.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), variations.len());
}

#[test]
fn test_gmail_aliases_match() {
    assert!(same_applicant("Kim.Lee+coach@gmail.com", "kimlee@gmail.com"));
    assert!(same_applicant("kimlee@googlemail.com", "kimlee@gmail.com"));
    assert!(same_applicant("k.i.m.lee@gmail.com", "kimlee@googlemail.com"));
}

#[test]
fn test_plus_alias_stripped_on_any_domain() {
    assert!(same_applicant("dana+apply@flexhub.fit", "dana@flexhub.fit"));
}

#[test]
fn test_dots_significant_outside_gmail() {
    assert!(!same_applicant("dana.reyes@outlook.com", "danareyes@outlook.com"));
}

#[test]
fn test_educational_subdomain_collapses() {
    assert!(same_applicant("j.smith@cs.uni.edu", "jsmith@uni.edu"));
    assert!(same_applicant("j.smith@cs.uni.edu", "j.smith@uni.edu"));
    assert!(same_applicant("ana@maths.ox.ac.uk", "ana@ox.ac.uk"));
}

#[test]
fn test_institution_domain_is_not_collapsed_further() {
    let variations = generate_email_variations("ana@ox.ac.uk");
    assert!(!variations.iter().any(|v| v.ends_with("@ac.uk")));
}

#[test]
fn test_parsed_email_uses_same_variations() {
    let email = Email::parse("Kim.Lee+coach@gmail.com").unwrap();
    assert_eq!(
        email.variations(),
        generate_email_variations("kim.lee+coach@gmail.com")
    );
}

#[test]
fn test_malformed_input_only_returns_itself() {
    assert_eq!(generate_email_variations("not-an-email"), vec!["not-an-email"]);
    assert_eq!(generate_email_variations("@gmail.com"), vec!["@gmail.com"]);
}

#[test]
fn test_canonical_form_is_among_variations() {
    for raw in ["Kim.Lee+coach@gmail.com", "j.smith@cs.state.edu", "ana+x@fitmail.io"] {
        assert!(generate_email_variations(raw).contains(&canonical_email(raw)));
    }
}

#[test]
fn test_stored_and_incoming_spellings_meet() {
    // Stored with dots, new submission without: variations of the incoming
    // address alone never reach the stored spelling.
    assert!(!same_applicant("firstlast@googlemail.com", "first.last@gmail.com"));
    assert!(same_mailbox("first.last@gmail.com", "firstlast@googlemail.com"));

    let stored = Email::parse("First.Last@gmail.com").unwrap();
    let incoming = Email::parse("firstlast+coach@googlemail.com").unwrap();
    assert_eq!(stored.canonical(), incoming.canonical());
}
