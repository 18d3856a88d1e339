use serde::{Deserialize, Serialize};

/// Collaborator permission level. Owner implies everything a Collaborator
/// may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Permission {
    Collaborator,
    Owner,
}

impl Permission {
    #[must_use]
    pub fn satisfies(self, required: Permission) -> bool {
        self >= required
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Permission::Owner => "Owner",
            Permission::Collaborator => "Collaborator",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Owner" => Some(Permission::Owner),
            "Collaborator" => Some(Permission::Collaborator),
            _ => None,
        }
    }
}
