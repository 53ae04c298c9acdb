use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Management,
}

/// The authenticated user issuing an intent, as reported by the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub role: Role,
}

impl Actor {
    pub fn employee(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: Role::Employee,
        }
    }

    pub fn manager(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            role: Role::Management,
        }
    }

    pub fn is_management(&self) -> bool {
        self.role == Role::Management
    }

    /// Employees act only on their own engagements; management acts for anyone.
    pub fn may_act_for(&self, username: &str) -> bool {
        self.is_management() || self.username == username
    }
}
