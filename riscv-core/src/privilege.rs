//! Privilege levels, `spec.md` §3: "one of {User, Supervisor, Machine}; starts in Machine".

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrivilegeLevel {
    User,
    Supervisor,
    Machine,
}

impl PrivilegeLevel {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => PrivilegeLevel::User,
            0b01 => PrivilegeLevel::Supervisor,
            _ => PrivilegeLevel::Machine,
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            PrivilegeLevel::User => 0b00,
            PrivilegeLevel::Supervisor => 0b01,
            PrivilegeLevel::Machine => 0b11,
        }
    }
}

impl Default for PrivilegeLevel {
    fn default() -> Self {
        PrivilegeLevel::Machine
    }
}
