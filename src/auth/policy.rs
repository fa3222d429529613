/*!
 * # Access Policy
 *
 * Coarse role to action-category gate. Each role maps to a set of categories;
 * the `ALL` wildcard bypasses the category check entirely. Ownership of
 * records (a student only seeing their own rows) is not decided here, see
 * `services::scope`.
 *
 * The table is built once at startup (built-in defaults, optionally replaced
 * per role from configuration) and shared read-only.
 */

use crate::config::AccessConfig;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

/// Caller role carried on the authenticated identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Registrar,
    Cashier,
    Faculty,
    Student,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Admin,
        Role::Registrar,
        Role::Cashier,
        Role::Faculty,
        Role::Student,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Registrar => "registrar",
            Role::Cashier => "cashier",
            Role::Faculty => "faculty",
            Role::Student => "student",
        }
    }

    /// Anyone who is not a student is staff.
    pub fn is_staff(&self) -> bool {
        !matches!(self, Role::Student)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "registrar" => Ok(Role::Registrar),
            "cashier" => Ok(Role::Cashier),
            "faculty" => Ok(Role::Faculty),
            "student" => Ok(Role::Student),
            other => Err(PolicyError::UnknownRole(other.to_string())),
        }
    }
}

/// Action category an endpoint declares
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// Wildcard; only meaningful inside a role's grant set
    All,
    Enrollment,
    Erd,
    Payment,
    Class,
    /// Access to the caller's own records
    SelfService,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::All,
        Category::Enrollment,
        Category::Erd,
        Category::Payment,
        Category::Class,
        Category::SelfService,
    ];
}

impl FromStr for Category {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" | "*" => Ok(Category::All),
            "ENROLLMENT" => Ok(Category::Enrollment),
            "ERD" => Ok(Category::Erd),
            "PAYMENT" => Ok(Category::Payment),
            "CLASS" => Ok(Category::Class),
            "SELF" => Ok(Category::SelfService),
            other => Err(PolicyError::UnknownCategory(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("unknown role '{0}'")]
    UnknownRole(String),
    #[error("unknown access category '{0}'")]
    UnknownCategory(String),
}

/// Immutable role to category table
#[derive(Debug, Clone)]
pub struct AccessPolicy {
    grants: HashMap<Role, HashSet<Category>>,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl AccessPolicy {
    /// The built-in table used when configuration does not override it
    pub fn standard() -> Self {
        use Category::*;

        let grants = HashMap::from([
            (Role::Admin, HashSet::from([All])),
            (Role::Registrar, HashSet::from([Enrollment, Erd])),
            (Role::Cashier, HashSet::from([Payment])),
            (Role::Faculty, HashSet::from([Erd, Class])),
            (Role::Student, HashSet::from([SelfService, Enrollment])),
        ]);

        Self { grants }
    }

    /// Builds the table from configuration. Roles named in the config replace
    /// their built-in grant set; unnamed roles keep the default.
    pub fn from_config(config: &AccessConfig) -> Result<Self, PolicyError> {
        let mut policy = Self::standard();

        for (role_name, categories) in &config.roles {
            let role: Role = role_name.parse()?;
            let grants = categories
                .iter()
                .map(|c| c.parse::<Category>())
                .collect::<Result<HashSet<_>, _>>()?;
            policy.grants.insert(role, grants);
        }

        Ok(policy)
    }

    /// Categories granted to a role
    pub fn grants(&self, role: Role) -> Option<&HashSet<Category>> {
        self.grants.get(&role)
    }

    /// Pure access decision.
    ///
    /// * no role: denied
    /// * role holding the wildcard: allowed, whatever the category
    /// * action without a category: denied
    /// * otherwise: allowed iff the category is granted
    pub fn allowed(&self, role: Option<Role>, category: Option<Category>) -> bool {
        let Some(grants) = role.and_then(|r| self.grants.get(&r)) else {
            return false;
        };

        if grants.contains(&Category::All) {
            return true;
        }

        match category {
            Some(category) => grants.contains(&category),
            None => false,
        }
    }

    /// Route guard form: passes if any declared category is allowed. An empty
    /// declaration behaves like an action with no category.
    pub fn allowed_any(&self, role: Option<Role>, categories: &[Category]) -> bool {
        if categories.is_empty() {
            return self.allowed(role, None);
        }
        categories.iter().any(|c| self.allowed(role, Some(*c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(Role::Admin, Category::Payment, true)]
    #[case(Role::Admin, Category::Erd, true)]
    #[case(Role::Registrar, Category::Enrollment, true)]
    #[case(Role::Registrar, Category::Erd, true)]
    #[case(Role::Registrar, Category::Payment, false)]
    #[case(Role::Registrar, Category::Class, false)]
    #[case(Role::Cashier, Category::Payment, true)]
    #[case(Role::Cashier, Category::Enrollment, false)]
    #[case(Role::Faculty, Category::Class, true)]
    #[case(Role::Faculty, Category::Erd, true)]
    #[case(Role::Faculty, Category::SelfService, false)]
    #[case(Role::Student, Category::SelfService, true)]
    #[case(Role::Student, Category::Enrollment, true)]
    #[case(Role::Student, Category::Payment, false)]
    fn standard_table(#[case] role: Role, #[case] category: Category, #[case] expected: bool) {
        let policy = AccessPolicy::standard();
        assert_eq!(policy.allowed(Some(role), Some(category)), expected);
    }

    #[test]
    fn missing_role_is_always_denied() {
        let policy = AccessPolicy::standard();
        for category in Category::ALL {
            assert!(!policy.allowed(None, Some(category)));
        }
        assert!(!policy.allowed(None, None));
        assert!(!policy.allowed_any(None, &[]));
    }

    #[test]
    fn uncategorised_action_needs_wildcard() {
        let policy = AccessPolicy::standard();
        assert!(policy.allowed(Some(Role::Admin), None));
        assert!(policy.allowed_any(Some(Role::Admin), &[]));
        for role in [Role::Registrar, Role::Cashier, Role::Faculty, Role::Student] {
            assert!(!policy.allowed(Some(role), None));
            assert!(!policy.allowed_any(Some(role), &[]));
        }
    }

    #[test]
    fn any_of_passes_when_one_category_matches() {
        let policy = AccessPolicy::standard();
        let categories = [Category::Enrollment, Category::Payment];
        assert!(policy.allowed_any(Some(Role::Cashier), &categories));
        assert!(policy.allowed_any(Some(Role::Registrar), &categories));
        assert!(!policy.allowed_any(Some(Role::Faculty), &categories));
    }

    #[test]
    fn config_replaces_only_named_roles() {
        let config = AccessConfig {
            roles: HashMap::from([(
                "registrar".to_string(),
                vec!["ENROLLMENT".to_string(), "payment".to_string()],
            )]),
        };
        let policy = AccessPolicy::from_config(&config).unwrap();

        assert!(policy.allowed(Some(Role::Registrar), Some(Category::Payment)));
        assert!(!policy.allowed(Some(Role::Registrar), Some(Category::Erd)));
        assert!(policy.allowed(Some(Role::Faculty), Some(Category::Class)));
    }

    #[test]
    fn config_rejects_unknown_names() {
        let bad_role = AccessConfig {
            roles: HashMap::from([("dean".to_string(), vec!["ALL".to_string()])]),
        };
        assert_eq!(
            AccessPolicy::from_config(&bad_role).unwrap_err(),
            PolicyError::UnknownRole("dean".to_string())
        );

        let bad_category = AccessConfig {
            roles: HashMap::from([("cashier".to_string(), vec!["REFUNDS".to_string()])]),
        };
        assert!(matches!(
            AccessPolicy::from_config(&bad_category),
            Err(PolicyError::UnknownCategory(_))
        ));
    }

    #[test]
    fn role_names_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("Registrar".parse::<Role>().is_ok());
        assert!("janitor".parse::<Role>().is_err());
    }

    fn any_role() -> impl Strategy<Value = Role> {
        prop::sample::select(Role::ALL.to_vec())
    }

    fn any_category() -> impl Strategy<Value = Category> {
        prop::sample::select(Category::ALL.to_vec())
    }

    fn any_grants() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(
            prop::sample::select(vec!["ALL", "ENROLLMENT", "ERD", "PAYMENT", "CLASS", "SELF"]),
            0..4,
        )
        .prop_map(|v| v.into_iter().map(str::to_string).collect())
    }

    proptest! {
        #[test]
        fn allowed_iff_granted_or_wildcard(
            role in any_role(),
            category in any_category(),
            grants in any_grants(),
        ) {
            let config = AccessConfig {
                roles: HashMap::from([(role.as_str().to_string(), grants)]),
            };
            let policy = AccessPolicy::from_config(&config).unwrap();
            let granted = policy.grants(role).unwrap();

            let expected = granted.contains(&category) || granted.contains(&Category::All);
            prop_assert_eq!(policy.allowed(Some(role), Some(category)), expected);
        }
    }
}
