//! Bitwise role/permission model.
//!
//! Roles and permissions are 64-bit grant sets. Only the low 61 bits are
//! assigned so masks survive a round-trip through signed 64-bit columns and
//! JSON numbers. There is no deny bit: absence of a required bit is a denial.

use std::ops::{BitAnd, BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Set of roles held by a subject within a tenant.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleMask(u64);

/// Set of permissions, either granted directly or derived from roles.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionMask(u64);

macro_rules! impl_mask {
    ($t:ident) => {
        impl $t {
            pub const NONE: Self = Self(0);

            pub const fn from_bits(bits: u64) -> Self {
                Self(bits)
            }

            pub const fn bits(self) -> u64 {
                self.0
            }

            pub const fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub const fn contains(self, other: Self) -> bool {
                self.0 & other.0 == other.0
            }

            pub const fn intersects(self, other: Self) -> bool {
                self.0 & other.0 != 0
            }

            /// Bits of `other` that are missing from `self`.
            pub const fn missing(self, other: Self) -> Self {
                Self(other.0 & !self.0)
            }

            /// Bit-cast to the signed form stored in `BIGINT` columns.
            pub const fn to_i64(self) -> i64 {
                self.0 as i64
            }

            pub const fn from_i64(bits: i64) -> Self {
                Self(bits as u64)
            }
        }

        impl BitOr for $t {
            type Output = Self;

            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $t {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl BitAnd for $t {
            type Output = Self;

            fn bitand(self, rhs: Self) -> Self {
                Self(self.0 & rhs.0)
            }
        }

        impl From<u64> for $t {
            fn from(bits: u64) -> Self {
                Self(bits)
            }
        }

        impl From<$t> for u64 {
            fn from(mask: $t) -> Self {
                mask.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

impl_mask!(RoleMask);
impl_mask!(PermissionMask);

impl RoleMask {
    pub const VIEWER: Self = Self(1 << 0);
    pub const EDITOR: Self = Self(1 << 1);
    pub const OWNER: Self = Self(1 << 2);
    pub const ADMIN: Self = Self(1 << 3);

    /// Iterate the individual role bits set in this mask.
    pub fn roles(self) -> impl Iterator<Item = RoleMask> {
        (0..u64::BITS)
            .map(|bit| 1u64 << bit)
            .filter(move |bit| self.0 & bit != 0)
            .map(RoleMask)
    }
}

impl PermissionMask {
    pub const READ: Self = Self(1 << 0);
    pub const WRITE: Self = Self(1 << 1);
    pub const DELETE: Self = Self(1 << 2);
    pub const ADMIN: Self = Self(1 << 3);
}

/// Static mapping from single role bits to the permissions they grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePermissionTable {
    entries: Vec<(RoleMask, PermissionMask)>,
}

impl RolePermissionTable {
    pub fn new(entries: impl IntoIterator<Item = (RoleMask, PermissionMask)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Viewer reads, editor writes, owner deletes, admin holds everything.
    pub fn standard() -> Self {
        use PermissionMask as P;

        Self::new([
            (RoleMask::VIEWER, P::READ),
            (RoleMask::EDITOR, P::READ | P::WRITE),
            (RoleMask::OWNER, P::READ | P::WRITE | P::DELETE),
            (RoleMask::ADMIN, P::READ | P::WRITE | P::DELETE | P::ADMIN),
        ])
    }

    /// Permissions granted by a single role; unknown roles grant nothing.
    pub fn permissions_for(&self, role: RoleMask) -> PermissionMask {
        self.entries
            .iter()
            .find(|(r, _)| *r == role)
            .map(|(_, p)| *p)
            .unwrap_or(PermissionMask::NONE)
    }

    /// `direct` OR'd with the permissions of every known role set in `roles`.
    pub fn effective(&self, roles: RoleMask, direct: PermissionMask) -> PermissionMask {
        self.entries
            .iter()
            .filter(|(role, _)| roles.intersects(*role))
            .fold(direct, |acc, (_, perms)| acc | *perms)
    }
}

impl Default for RolePermissionTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Effective permissions under the standard role table.
pub fn effective_permissions(roles: RoleMask, direct: PermissionMask) -> PermissionMask {
    RolePermissionTable::standard().effective(roles, direct)
}

pub fn has_any(effective: PermissionMask, required: PermissionMask) -> bool {
    effective.intersects(required)
}

pub fn has_all(effective: PermissionMask, required: PermissionMask) -> bool {
    effective.contains(required)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_expansion() {
        assert_eq!(
            effective_permissions(RoleMask::VIEWER, PermissionMask::NONE),
            PermissionMask::READ
        );
        assert_eq!(
            effective_permissions(RoleMask::EDITOR, PermissionMask::NONE),
            PermissionMask::READ | PermissionMask::WRITE
        );
        assert_eq!(
            effective_permissions(RoleMask::ADMIN, PermissionMask::NONE).bits(),
            0b1111
        );
    }

    #[test]
    fn direct_grants_are_kept() {
        let direct = PermissionMask::from_bits(1 << 40);
        let eff = effective_permissions(RoleMask::VIEWER, direct);
        assert!(has_all(eff, direct | PermissionMask::READ));
    }

    #[test]
    fn unknown_roles_contribute_nothing() {
        let eff = effective_permissions(RoleMask::from_bits(1 << 30), PermissionMask::NONE);
        assert!(eff.is_empty());
    }

    #[test]
    fn has_any_and_has_all() {
        let eff = PermissionMask::READ | PermissionMask::WRITE;
        assert!(has_any(eff, PermissionMask::WRITE | PermissionMask::DELETE));
        assert!(!has_all(eff, PermissionMask::WRITE | PermissionMask::DELETE));
        assert!(has_all(eff, PermissionMask::READ));
        assert!(!has_any(eff, PermissionMask::NONE));
    }

    #[test]
    fn signed_round_trip_preserves_high_bits() {
        let mask = RoleMask::from_bits(u64::MAX);
        assert_eq!(mask.to_i64(), -1);
        assert_eq!(RoleMask::from_i64(mask.to_i64()), mask);
    }

    #[test]
    fn roles_iterates_set_bits() {
        let roles: Vec<_> = (RoleMask::VIEWER | RoleMask::OWNER).roles().collect();
        assert_eq!(roles, vec![RoleMask::VIEWER, RoleMask::OWNER]);
    }

    #[test]
    fn missing_reports_absent_bits() {
        let eff = PermissionMask::READ;
        assert_eq!(
            eff.missing(PermissionMask::READ | PermissionMask::DELETE),
            PermissionMask::DELETE
        );
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 1000,
                ..ProptestConfig::default()
            })]

            /// Property: adding a role bit never removes a granted permission.
            #[test]
            fn effective_is_monotonic(roles in any::<u64>(), extra in 0u32..64) {
                let base = effective_permissions(RoleMask::from_bits(roles), PermissionMask::NONE);
                let more = effective_permissions(
                    RoleMask::from_bits(roles | (1u64 << extra)),
                    PermissionMask::NONE,
                );
                prop_assert!(has_all(more, base));
            }

            /// Property: HasAll implies HasAny for any non-empty requirement.
            #[test]
            fn has_all_implies_has_any(effective in any::<u64>(), required in 1u64..=u64::MAX) {
                let effective = PermissionMask::from_bits(effective);
                let required = PermissionMask::from_bits(required);
                if has_all(effective, required) {
                    prop_assert!(has_any(effective, required));
                }
            }

            /// Property: direct grants always survive role expansion.
            #[test]
            fn direct_grants_survive(roles in any::<u64>(), direct in any::<u64>()) {
                let direct = PermissionMask::from_bits(direct);
                let eff = effective_permissions(RoleMask::from_bits(roles), direct);
                prop_assert!(has_all(eff, direct));
            }
        }
    }
}
