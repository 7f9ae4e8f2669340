mod common;

use axum::http::StatusCode;
use chrono::Duration;
use common::{borrower_store, client_for, signed_in, spawn_backend, MockBackend};
use loandesk_core::{AuthGuard, GuardState, Role};

#[tokio::test]
async fn test_no_tokens_is_unauthenticated_without_network() {
    let (backend, addr) = spawn_backend().await;
    let guard = AuthGuard::new(client_for(addr, borrower_store()));
    assert_eq!(guard.state(), GuardState::Unknown);

    assert!(!guard.check_auth(None).await);

    assert_eq!(guard.state(), GuardState::Unauthenticated);
    assert_eq!(MockBackend::hits(&backend.me_hits), 0);
    assert_eq!(MockBackend::hits(&backend.refresh_hits), 0);
}

#[tokio::test]
async fn test_valid_session_is_authenticated() {
    let (backend, addr) = spawn_backend().await;
    let store = borrower_store();
    signed_in(&backend, &store, "access-valid", "refresh-valid");
    let guard = AuthGuard::new(client_for(addr, store));

    assert!(guard.check_auth(None).await);
    assert!(guard.check_auth(Some(&Role::User)).await);

    assert_eq!(guard.state(), GuardState::Authenticated);
    assert_eq!(MockBackend::hits(&backend.me_hits), 2);
    assert_eq!(MockBackend::hits(&backend.refresh_hits), 0);
}

#[tokio::test]
async fn test_expired_access_token_is_renewed() {
    let (backend, addr) = spawn_backend().await;
    let store = borrower_store();
    backend.accept_refresh("refresh-valid");
    store
        .set_refresh_token("refresh-valid", Duration::days(90))
        .unwrap();
    store
        .set_access_token("access-original", Duration::minutes(-1))
        .unwrap();
    let guard = AuthGuard::new(client_for(addr, store.clone()));

    assert!(guard.check_auth(None).await);

    let renewed = store.access_token().unwrap();
    assert_ne!(renewed, "access-original");
    assert_eq!(MockBackend::hits(&backend.refresh_hits), 1);
    assert_eq!(guard.state(), GuardState::Authenticated);
}

#[tokio::test]
async fn test_server_rejected_access_token_is_renewed() {
    let (backend, addr) = spawn_backend().await;
    let store = borrower_store();
    signed_in(&backend, &store, "access-original", "refresh-valid");
    backend.revoke_access("access-original");
    let guard = AuthGuard::new(client_for(addr, store.clone()));

    assert!(guard.check_auth(None).await);

    assert_eq!(store.access_token().as_deref(), Some("access-1"));
    assert_eq!(MockBackend::hits(&backend.refresh_hits), 1);
}

#[tokio::test]
async fn test_user_role_is_denied_admin_page() {
    let (backend, addr) = spawn_backend().await;
    backend.set_role("USER");
    let store = borrower_store();
    signed_in(&backend, &store, "access-valid", "refresh-valid");
    let guard = AuthGuard::new(client_for(addr, store.clone()));

    assert!(!guard.check_auth(Some(&Role::Admin)).await);

    assert_eq!(guard.state(), GuardState::Unauthenticated);
    // A role mismatch is not a session failure
    assert_eq!(store.access_token().as_deref(), Some("access-valid"));
    assert_eq!(MockBackend::hits(&backend.refresh_hits), 0);
}

#[tokio::test]
async fn test_admin_role_is_allowed_admin_page() {
    let (backend, addr) = spawn_backend().await;
    backend.set_role("ADMIN");
    let store = borrower_store();
    signed_in(&backend, &store, "access-valid", "refresh-valid");
    let guard = AuthGuard::new(client_for(addr, store));

    assert!(guard.check_auth(Some(&Role::Admin)).await);
}

#[tokio::test]
async fn test_custom_role_matches_exactly() {
    let (backend, addr) = spawn_backend().await;
    backend.set_role("LOAN_OFFICER");
    let store = borrower_store();
    signed_in(&backend, &store, "access-valid", "refresh-valid");
    let guard = AuthGuard::new(client_for(addr, store));

    assert!(guard.check_auth(Some(&Role::from("LOAN_OFFICER"))).await);
    assert!(!guard.check_auth(Some(&Role::Admin)).await);
}

#[tokio::test]
async fn test_dead_session_is_unauthenticated_and_cleared() {
    let (backend, addr) = spawn_backend().await;
    let store = borrower_store();
    store.store_pair("access-revoked", "refresh-revoked").unwrap();
    let guard = AuthGuard::new(client_for(addr, store.clone()));

    assert!(!guard.check_auth(None).await);

    assert_eq!(store.access_token(), None);
    assert_eq!(store.refresh_token(), None);
    // One refresh inside the fetch; the guard's own attempt finds nothing to send
    assert_eq!(MockBackend::hits(&backend.refresh_hits), 1);
}

#[tokio::test]
async fn test_unreachable_backend_is_unauthenticated() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let store = borrower_store();
    store.store_pair("access", "refresh").unwrap();
    let guard = AuthGuard::new(client_for(addr, store.clone()));

    assert!(!guard.check_auth(None).await);
    // The refresh attempt failed too, so the session is gone
    assert_eq!(store.refresh_token(), None);
}

#[tokio::test]
async fn test_guard_reuses_token_renewed_during_who_am_i() {
    let (backend, addr) = spawn_backend().await;
    let store = borrower_store();
    signed_in(&backend, &store, "access-original", "refresh-valid");
    backend.set_me_status(StatusCode::UNAUTHORIZED);
    let guard = AuthGuard::new(client_for(addr, store.clone()));

    assert!(guard.check_auth(None).await);

    // The fetch renewed the pair once; the guard picks up that token
    assert_eq!(MockBackend::hits(&backend.refresh_hits), 1);
    assert_eq!(MockBackend::hits(&backend.me_hits), 2);
    assert_eq!(store.access_token().as_deref(), Some("access-1"));
    assert_eq!(store.refresh_token().as_deref(), Some("refresh-1"));
}
