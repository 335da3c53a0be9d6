//! User profiles stored in the index, plus in-memory login sessions.
//!
//! One B+ tree maps usernames to profile records; a process-local session
//! map tracks who is logged in and at which privilege. Every write is gated
//! by the privilege of the acting (logged-in) user. Semantic rejects (not
//! logged in, insufficient privilege, unknown or duplicate user) surface as
//! `Ok(false)` / `Ok(None)`; only storage faults are errors.

#[cfg(test)]
mod tests;

use std::path::Path;

use btree::BPlusTree;
use common::{StoreConfig, StoreResult};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use types::FixedString;

pub type Username = FixedString<20>;

/// Privilege granted to the very first account of a fresh database.
const BOOTSTRAP_PRIVILEGE: i32 = 10;

/// Fixed-width user profile record.
///
/// The derived field-wise `Ord` gives the record the natural total order the
/// index needs for its composite keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct User {
    username: Username,
    password: FixedString<30>,
    name: FixedString<20>,
    email: FixedString<30>,
    privilege: i32,
}

impl User {
    pub fn new(username: &str, password: &str, name: &str, email: &str, privilege: i32) -> Self {
        Self {
            username: Username::new(username),
            password: FixedString::new(password),
            name: FixedString::new(name),
            email: FixedString::new(email),
            privilege,
        }
    }

    pub fn username(&self) -> &str {
        self.username.as_str()
    }

    pub fn password(&self) -> &str {
        self.password.as_str()
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn email(&self) -> &str {
        self.email.as_str()
    }

    pub fn privilege(&self) -> i32 {
        self.privilege
    }

    /// One-line rendering of the profile for command output.
    pub fn profile_line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.username(),
            self.name(),
            self.email(),
            self.privilege
        )
    }
}

/// Profile bookkeeping over one user index.
pub struct UserManager {
    users: BPlusTree<Username, User>,
    sessions: HashMap<Username, i32>,
}

impl UserManager {
    pub fn open(path: &Path, config: &StoreConfig) -> StoreResult<Self> {
        Ok(Self {
            users: BPlusTree::open(path, config)?,
            sessions: HashMap::new(),
        })
    }

    /// Create an account. The acting user must be logged in with a strictly
    /// higher privilege than the new account; the very first account of a
    /// fresh database skips the checks and gets full privilege.
    pub fn add_user(
        &mut self,
        cur_username: &str,
        username: &str,
        password: &str,
        name: &str,
        email: &str,
        privilege: i32,
    ) -> StoreResult<bool> {
        if self.users.is_empty() {
            let user = User::new(username, password, name, email, BOOTSTRAP_PRIVILEGE);
            self.users.insert(Username::new(username), user)?;
            return Ok(true);
        }
        let Some(&cur_privilege) = self.sessions.get(&Username::new(cur_username)) else {
            return Ok(false);
        };
        if cur_privilege <= privilege {
            return Ok(false);
        }
        let uname = Username::new(username);
        if self.users.find(&uname)?.is_some() {
            return Ok(false);
        }
        let user = User::new(username, password, name, email, privilege);
        self.users.insert(uname, user)?;
        Ok(true)
    }

    /// Log a user in; fails on unknown users, wrong passwords and double
    /// logins.
    pub fn login(&mut self, username: &str, password: &str) -> StoreResult<bool> {
        let uname = Username::new(username);
        if self.sessions.contains_key(&uname) {
            return Ok(false);
        }
        let Some(user) = self.users.find(&uname)? else {
            return Ok(false);
        };
        if user.password() != password {
            return Ok(false);
        }
        self.sessions.insert(uname, user.privilege());
        Ok(true)
    }

    pub fn logout(&mut self, username: &str) -> bool {
        self.sessions.remove(&Username::new(username)).is_some()
    }

    /// Look up a profile; the acting user must be logged in and at least as
    /// privileged as the target.
    pub fn query_profile(&mut self, cur_username: &str, username: &str) -> StoreResult<Option<User>> {
        let Some(&cur_privilege) = self.sessions.get(&Username::new(cur_username)) else {
            return Ok(None);
        };
        let Some(user) = self.users.find(&Username::new(username))? else {
            return Ok(None);
        };
        if user.privilege() > cur_privilege {
            return Ok(None);
        }
        Ok(Some(user))
    }

    /// Rewrite selected fields of a profile. Modifying someone else requires
    /// a strictly higher privilege; a privilege change must stay below the
    /// target's current privilege and refreshes the session when the acting
    /// user modifies their own account.
    pub fn modify_profile(
        &mut self,
        cur_username: &str,
        username: &str,
        password: Option<&str>,
        name: Option<&str>,
        email: Option<&str>,
        privilege: Option<i32>,
    ) -> StoreResult<Option<User>> {
        let Some(&cur_privilege) = self.sessions.get(&Username::new(cur_username)) else {
            return Ok(None);
        };
        let uname = Username::new(username);
        let Some(target) = self.users.find(&uname)? else {
            return Ok(None);
        };
        if cur_username != username && cur_privilege <= target.privilege() {
            return Ok(None);
        }
        if let Some(new_privilege) = privilege {
            if new_privilege >= target.privilege() {
                return Ok(None);
            }
        }

        self.users.erase(&uname, &target)?;
        let modified = User::new(
            username,
            password.unwrap_or_else(|| target.password()),
            name.unwrap_or_else(|| target.name()),
            email.unwrap_or_else(|| target.email()),
            privilege.unwrap_or_else(|| target.privilege()),
        );
        self.users.insert(uname, modified.clone())?;

        if cur_username == username {
            if let Some(new_privilege) = privilege {
                self.sessions.insert(uname, new_privilege);
            }
        }
        Ok(Some(modified))
    }

    /// Privilege of a logged-in user, if any (testing/inspection).
    pub fn session_privilege(&self, username: &str) -> Option<i32> {
        self.sessions.get(&Username::new(username)).copied()
    }

    /// Drop every profile and session (reset utility).
    pub fn clean(&mut self) -> StoreResult<()> {
        self.sessions.clear();
        self.users.clear()
    }
}
