//! User management commands.
//!
//! Staff accounts are created here; ambassadors get their role from an
//! approved application or `user set-role`.

use flexhub_core::{Email, UserId, UserRole};
use flexhub_server::db::{NewUser, RepositoryError, UserRepository};

use super::{CliError, connect};

/// Create a new user.
///
/// # Returns
///
/// The ID of the created user.
pub async fn create_user(email: &str, name: &str, role: &str) -> Result<UserId, CliError> {
    let role = parse_role(role)?;
    let email = parse_email(email)?;
    let name = name.trim();
    if name.is_empty() {
        return Err(CliError::InvalidArgument("name is required".to_string()));
    }

    let pool = connect().await?;
    let users = UserRepository::new(&pool);

    if users.get_by_email(&email).await?.is_some() {
        return Err(CliError::InvalidArgument(format!(
            "user already exists with email: {email}"
        )));
    }

    let user = users
        .create(&NewUser {
            email,
            name: name.to_string(),
            role,
        })
        .await?;

    tracing::info!(
        "User created successfully! ID: {}, Email: {}, Role: {:?}",
        user.id,
        user.email,
        user.role
    );
    Ok(user.id)
}

/// Change a user's role.
pub async fn set_role(email: &str, role: &str) -> Result<(), CliError> {
    let role = parse_role(role)?;
    let email = parse_email(email)?;

    let pool = connect().await?;
    let users = UserRepository::new(&pool);

    let user = users
        .get_by_email(&email)
        .await?
        .ok_or(CliError::Repository(RepositoryError::NotFound))?;
    users.set_role(user.id, role).await?;

    tracing::info!("Role for {} set to {:?}", email, role);
    Ok(())
}

fn parse_role(role: &str) -> Result<UserRole, CliError> {
    role.parse().map_err(|_| {
        CliError::InvalidArgument(format!(
            "invalid role: {role}. Valid roles: customer, coach, affiliate, taskforce, admin"
        ))
    })
}

fn parse_email(email: &str) -> Result<Email, CliError> {
    Email::parse(email).map_err(|e| CliError::InvalidArgument(format!("{email}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_role() {
        assert!(matches!(parse_role("taskforce"), Ok(UserRole::Taskforce)));
        assert!(matches!(parse_role("super_admin"), Err(CliError::InvalidArgument(_))));
    }

    #[test]
    fn test_parse_email() {
        assert!(parse_email("Coach@Example.com").is_ok());
        assert!(parse_email("not-an-email").is_err());
    }
}
