use super::*;
use tempfile::tempdir;

fn manager(path: &std::path::Path) -> UserManager {
    let config = StoreConfig::builder().cache_capacity(16).build();
    UserManager::open(path, &config).unwrap()
}

fn bootstrap(m: &mut UserManager) {
    assert!(m
        .add_user("", "root", "sesame", "admin", "root@x.com", 10)
        .unwrap());
    assert!(m.login("root", "sesame").unwrap());
}

#[test]
fn first_account_bootstraps_with_full_privilege() {
    let dir = tempdir().unwrap();
    let mut m = manager(&dir.path().join("user.dat"));

    // Nobody is logged in yet, but the very first account is admitted.
    assert!(m
        .add_user("ghost", "root", "sesame", "admin", "root@x.com", 3)
        .unwrap());
    assert!(m.login("root", "sesame").unwrap());
    let user = m.query_profile("root", "root").unwrap().unwrap();
    assert_eq!(user.privilege(), 10);
}

#[test]
fn add_user_requires_a_more_privileged_session() {
    let dir = tempdir().unwrap();
    let mut m = manager(&dir.path().join("user.dat"));
    bootstrap(&mut m);

    assert!(m
        .add_user("root", "alice", "pw", "Alice", "a@x.com", 7)
        .unwrap());
    // Not logged in.
    assert!(!m.add_user("bob", "carol", "pw", "C", "c@x.com", 1).unwrap());
    // Equal privilege is not enough.
    assert!(m.login("alice", "pw").unwrap());
    assert!(!m.add_user("alice", "dave", "pw", "D", "d@x.com", 7).unwrap());
    assert!(m.add_user("alice", "dave", "pw", "D", "d@x.com", 3).unwrap());
    // Duplicate username.
    assert!(!m.add_user("root", "alice", "pw2", "A2", "a2@x.com", 1).unwrap());
}

#[test]
fn login_checks_password_and_rejects_double_login() {
    let dir = tempdir().unwrap();
    let mut m = manager(&dir.path().join("user.dat"));
    bootstrap(&mut m);

    assert!(!m.login("root", "wrong").unwrap());
    assert!(!m.login("root", "sesame").unwrap(), "already logged in");
    assert!(!m.login("nobody", "pw").unwrap());
}

#[test]
fn logout_ends_exactly_one_session() {
    let dir = tempdir().unwrap();
    let mut m = manager(&dir.path().join("user.dat"));
    bootstrap(&mut m);

    assert!(m.logout("root"));
    assert!(!m.logout("root"));
    // A fresh login works again.
    assert!(m.login("root", "sesame").unwrap());
}

#[test]
fn query_profile_is_privilege_gated() {
    let dir = tempdir().unwrap();
    let mut m = manager(&dir.path().join("user.dat"));
    bootstrap(&mut m);
    assert!(m
        .add_user("root", "alice", "pw", "Alice", "a@x.com", 3)
        .unwrap());
    assert!(m.login("alice", "pw").unwrap());

    // Upward queries are refused, downward and self queries succeed.
    assert!(m.query_profile("alice", "root").unwrap().is_none());
    assert_eq!(
        m.query_profile("root", "alice").unwrap().unwrap().name(),
        "Alice"
    );
    let own = m.query_profile("alice", "alice").unwrap().unwrap();
    assert_eq!(own.profile_line(), "alice Alice a@x.com 3");

    // Not logged in at all.
    assert!(m.query_profile("ghost", "alice").unwrap().is_none());
}

#[test]
fn modify_profile_rewrites_selected_fields() {
    let dir = tempdir().unwrap();
    let mut m = manager(&dir.path().join("user.dat"));
    bootstrap(&mut m);
    assert!(m
        .add_user("root", "alice", "pw", "Alice", "a@x.com", 5)
        .unwrap());

    let modified = m
        .modify_profile("root", "alice", None, Some("Alicia"), None, None)
        .unwrap()
        .unwrap();
    assert_eq!(modified.name(), "Alicia");
    assert_eq!(modified.email(), "a@x.com");
    assert_eq!(modified.privilege(), 5);

    // The stored record was replaced, not duplicated.
    assert!(m.login("alice", "pw").unwrap());
    let fetched = m.query_profile("root", "alice").unwrap().unwrap();
    assert_eq!(fetched.name(), "Alicia");
}

#[test]
fn modify_profile_enforces_privilege_rules() {
    let dir = tempdir().unwrap();
    let mut m = manager(&dir.path().join("user.dat"));
    bootstrap(&mut m);
    assert!(m
        .add_user("root", "alice", "pw", "Alice", "a@x.com", 5)
        .unwrap());
    assert!(m.login("alice", "pw").unwrap());

    // Acting on someone else needs strictly higher privilege.
    assert!(m
        .modify_profile("alice", "root", None, Some("X"), None, None)
        .unwrap()
        .is_none());
    // A privilege change must stay below the target's current privilege.
    assert!(m
        .modify_profile("root", "alice", None, None, None, Some(5))
        .unwrap()
        .is_none());
    let demoted = m
        .modify_profile("root", "alice", None, None, None, Some(2))
        .unwrap()
        .unwrap();
    assert_eq!(demoted.privilege(), 2);
}

#[test]
fn self_modification_refreshes_the_session_privilege() {
    let dir = tempdir().unwrap();
    let mut m = manager(&dir.path().join("user.dat"));
    bootstrap(&mut m);

    assert_eq!(m.session_privilege("root"), Some(10));
    let modified = m
        .modify_profile("root", "root", None, None, None, Some(6))
        .unwrap()
        .unwrap();
    assert_eq!(modified.privilege(), 6);
    assert_eq!(m.session_privilege("root"), Some(6));
}

#[test]
fn profiles_persist_but_sessions_do_not() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("user.dat");
    {
        let mut m = manager(&path);
        bootstrap(&mut m);
        assert!(m
            .add_user("root", "alice", "pw", "Alice", "a@x.com", 3)
            .unwrap());
    }

    let mut m = manager(&path);
    // Sessions are process-local: the old login is gone.
    assert!(m.query_profile("root", "alice").unwrap().is_none());
    assert!(m.login("root", "sesame").unwrap());
    assert_eq!(
        m.query_profile("root", "alice").unwrap().unwrap().name(),
        "Alice"
    );
}
