//! Session commands: `login`, `logout`, `whoami`

use anyhow::Context;
use colored::Colorize;

use crate::backend::Backend;
use crate::error::Result;
use crate::model::Session;

/// Runs the federated sign-in flow and reports who signed in.
pub async fn login(backend: &Backend, provider: &str) -> Result<Session> {
    let session = backend
        .auth
        .sign_in(provider)
        .await
        .with_context(|| format!("Sign-in with {provider} failed"))?;
    println!(
        "{} {}",
        "Signed in as".green(),
        session.display_name().bold()
    );
    Ok(session)
}

/// Signs out. Succeeds when already signed out.
pub async fn logout(backend: &Backend) -> Result<()> {
    backend.auth.sign_out().await.context("Sign-out failed")?;
    println!("{}", "Signed out".green());
    Ok(())
}

/// Reports the current session, restoring or refreshing it as needed.
pub async fn whoami(backend: &Backend) -> Result<Option<Session>> {
    let session = backend.auth.current_session().await?;
    match session {
        Some(ref s) => {
            println!("{} ({})", s.display_name().bold(), s.user_id().dimmed());
        }
        None => println!("{}", "Not signed in".yellow()),
    }
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::error::SmartmarkError;

    #[tokio::test]
    async fn test_login_publishes_session() {
        let fake = FakeBackend::new();
        let backend = fake.backend();
        let session = login(&backend, "google").await.unwrap();
        assert_eq!(session.user_id(), "user-1");
        assert!(whoami(&backend).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_login_failure_keeps_typed_error() {
        let fake = FakeBackend::new();
        fake.fail_sign_in(Some("denied"));
        let err = login(&fake.backend(), "google").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SmartmarkError>(),
            Some(SmartmarkError::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_logout_then_whoami_is_signed_out() {
        let fake = FakeBackend::signed_in("alice");
        let backend = fake.backend();
        logout(&backend).await.unwrap();
        assert!(whoami(&backend).await.unwrap().is_none());
    }
}
