//! Sign-in capability consumed by the dashboard shell.
//!
//! The identity provider is an external collaborator. Views talk to it only
//! through [`AuthProvider`], so a hosted provider and the offline demo bypass
//! are interchangeable.

use log::info;
use serde::{Deserialize, Serialize};
use std::future::Future;

/// Email used when the demo bypass gets an empty address.
pub const DEMO_EMAIL: &str = "demo@core.exe";
/// Profile returned by the demo bypass for social sign-in.
pub const DEMO_SOCIAL_EMAIL: &str = "demo@user.com";
pub const DEMO_SOCIAL_NAME: &str = "Demo User";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub email: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SocialProvider {
    Google,
    Github,
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("an email address is required")]
    MissingEmail,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account already exists")]
    AccountExists,
    #[error("provider error: {0}")]
    Provider(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

/// Operations the login screen needs from an identity provider.
pub trait AuthProvider {
    fn sign_in(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = AuthResult<UserProfile>> + Send;

    fn sign_up(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = AuthResult<UserProfile>> + Send;

    fn reset_password(&self, email: &str) -> impl Future<Output = AuthResult<()>> + Send;

    fn sign_in_with_social(
        &self,
        provider: SocialProvider,
    ) -> impl Future<Output = AuthResult<UserProfile>> + Send;
}

/// Offline stand-in used when no provider is configured.
///
/// Every credential is accepted and nothing leaves the process.
#[derive(Debug, Clone, Copy, Default)]
pub struct DemoAuthProvider;

impl DemoAuthProvider {
    fn email_profile(email: &str) -> UserProfile {
        let email = email.trim();
        UserProfile {
            email: if email.is_empty() {
                DEMO_EMAIL.to_string()
            } else {
                email.to_string()
            },
            display_name: None,
        }
    }
}

impl AuthProvider for DemoAuthProvider {
    async fn sign_in(&self, email: &str, _password: &str) -> AuthResult<UserProfile> {
        let profile = Self::email_profile(email);
        info!("demo sign-in as {}", profile.email);
        Ok(profile)
    }

    async fn sign_up(&self, email: &str, _password: &str) -> AuthResult<UserProfile> {
        let profile = Self::email_profile(email);
        info!("demo registration for {}", profile.email);
        Ok(profile)
    }

    async fn reset_password(&self, email: &str) -> AuthResult<()> {
        if email.trim().is_empty() {
            return Err(AuthError::MissingEmail);
        }
        info!("demo password reset simulated for {email}");
        Ok(())
    }

    async fn sign_in_with_social(&self, provider: SocialProvider) -> AuthResult<UserProfile> {
        info!("demo {provider:?} sign-in");
        Ok(UserProfile {
            email: DEMO_SOCIAL_EMAIL.to_string(),
            display_name: Some(DEMO_SOCIAL_NAME.to_string()),
        })
    }
}
