//! Session establishment against static login pages.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use audiocrawl::config::AuthConfig;
use audiocrawl::error::HarvestError;
use audiocrawl::models::ResourceRef;
use audiocrawl::services::auth::{
    establish_session, AnonymousAuthenticator, AuthStatus, Authenticator, Credentials,
    FormAuthenticator, Operator, SessionMethod,
};
use common::{context, test_config, MemorySite, BASE};
use url::Url;

fn auth_config() -> AuthConfig {
    AuthConfig {
        login_url: "/login".to_string(),
        username_selector: "input[name='email']".to_string(),
        password_selector: "input[type='password']".to_string(),
        submit_selector: "button[type='submit']".to_string(),
        logged_in_selectors: vec![".account-menu".to_string()],
        logged_out_selectors: vec!["a.sign-in".to_string()],
        username: None,
        password: None,
    }
}

fn credentials() -> Credentials {
    Credentials {
        username: "reader@example.org".to_string(),
        password: "secret".to_string(),
    }
}

const LOGIN_FORM: &str = r#"<form action="/login" method="post">
    <input name="email" type="email"><input type="password" name="password">
    <button type="submit">Sign in</button></form>"#;

struct CountingOperator {
    calls: AtomicUsize,
    accept: bool,
}

#[async_trait]
impl Operator for CountingOperator {
    async fn request_login(&self, login_url: Option<&ResourceRef>, _reason: &str) -> bool {
        assert!(login_url.is_some());
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.accept
    }
}

#[tokio::test]
async fn test_anonymous_session_is_usable() {
    let site = MemorySite::new();
    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = context(&config, tmp.path());
    let mut driver = site.driver();

    let session = establish_session(&AnonymousAuthenticator, &mut driver, &mut ctx, None, None)
        .await
        .unwrap();
    assert_eq!(session.method, SessionMethod::Anonymous);
    assert!(session.status.is_usable());
    assert!(ctx.session.is_some());
    assert!(site.requests().is_empty());
}

#[tokio::test]
async fn test_already_logged_in_skips_form() {
    let site = MemorySite::new();
    site.html("/login", r#"<nav class="account-menu">My account</nav>"#);
    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = context(&config, tmp.path());
    let mut driver = site.driver();
    let auth = FormAuthenticator::new(auth_config(), &Url::parse(BASE).unwrap()).unwrap();

    let session = establish_session(&auth, &mut driver, &mut ctx, Some(&credentials()), None)
        .await
        .unwrap();
    assert_eq!(session.status, AuthStatus::Authenticated);
    assert_eq!(session.method, SessionMethod::Form);
}

#[tokio::test]
async fn test_failed_form_login_is_fatal_without_operator() {
    let site = MemorySite::new();
    site.html("/login", LOGIN_FORM);
    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = context(&config, tmp.path());
    let mut driver = site.driver();
    let auth = FormAuthenticator::new(auth_config(), &Url::parse(BASE).unwrap()).unwrap();

    // The static driver cannot type into forms, so automation needs a human
    let err = establish_session(&auth, &mut driver, &mut ctx, Some(&credentials()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::AuthenticationRequired(_)));
    assert!(err.is_fatal());
    assert!(ctx.session.is_none());
}

#[tokio::test]
async fn test_operator_completes_login_with_unknown_status() {
    let site = MemorySite::new();
    site.html("/login", LOGIN_FORM);
    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = context(&config, tmp.path());
    ctx.interactive = true;
    let mut driver = site.driver();
    let auth = FormAuthenticator::new(auth_config(), &Url::parse(BASE).unwrap()).unwrap();
    let operator = CountingOperator {
        calls: AtomicUsize::new(0),
        accept: true,
    };

    let session = establish_session(&auth, &mut driver, &mut ctx, None, Some(&operator))
        .await
        .unwrap();
    assert_eq!(operator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(session.method, SessionMethod::Manual);
    // No logged-in marker on the page, but Unknown is usable
    assert_eq!(session.status, AuthStatus::Unknown);
}

#[tokio::test]
async fn test_logged_out_marker_blocks_manual_session() {
    let site = MemorySite::new();
    site.html(
        "/login",
        &format!(r#"{}<a class="sign-in" href="/login">Sign in</a>"#, LOGIN_FORM),
    );
    let config = test_config();
    let tmp = tempfile::tempdir().unwrap();
    let mut ctx = context(&config, tmp.path());
    ctx.interactive = true;
    let mut driver = site.driver();
    let auth = FormAuthenticator::new(auth_config(), &Url::parse(BASE).unwrap()).unwrap();
    assert_eq!(
        <FormAuthenticator as Authenticator<_>>::check_status(&auth, &driver).await,
        AuthStatus::Unknown,
        "nothing loaded yet"
    );

    let operator = CountingOperator {
        calls: AtomicUsize::new(0),
        accept: true,
    };
    let err = establish_session(&auth, &mut driver, &mut ctx, Some(&credentials()), Some(&operator))
        .await
        .unwrap_err();
    assert!(matches!(err, HarvestError::AuthenticationRequired(_)));
}
