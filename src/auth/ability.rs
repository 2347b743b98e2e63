//! Role based abilities with attribute conditions.
//!
//! A [`RuleSet`] is derived from an identity on every request and is never
//! cached across requests, so status or profile changes apply immediately.
//! Grants only add permissions; anything not granted is denied.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

use super::identity::{Identity, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Wildcard: matches every action.
    Manage,
    Create,
    Read,
    Update,
    Delete,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manage => "manage",
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    fn covers(self, requested: Self) -> bool {
        self == Self::Manage || self == requested
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum ResourceType {
    /// Wildcard: matches every resource type.
    All,
    User,
    ClientProfile,
    SupplierProfile,
    Service,
    Category,
    Contract,
    Review,
    Dashboard,
}

impl ResourceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "All",
            Self::User => "User",
            Self::ClientProfile => "ClientProfile",
            Self::SupplierProfile => "SupplierProfile",
            Self::Service => "Service",
            Self::Category => "Category",
            Self::Contract => "Contract",
            Self::Review => "Review",
            Self::Dashboard => "Dashboard",
        }
    }

    fn covers(self, requested: Self) -> bool {
        self == Self::All || self == requested
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attribute a condition can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Id,
    ClientId,
    SupplierId,
    ServiceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Condition {
    Equals { field: Field, value: Uuid },
    In { field: Field, values: Vec<Uuid> },
}

impl Condition {
    fn matches(&self, resource: &Resource) -> bool {
        match self {
            Self::Equals { field, value } => resource.field(*field) == Some(*value),
            Self::In { field, values } => resource
                .field(*field)
                .is_some_and(|actual| values.contains(&actual)),
        }
    }
}

/// A concrete resource, carrying the attributes conditions look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Resource {
    User { id: Uuid },
    ClientProfile { id: Uuid },
    SupplierProfile { id: Uuid },
    Service { id: Uuid, supplier_id: Uuid },
    Category { id: Uuid },
    Contract { id: Uuid, client_id: Uuid, service_id: Uuid },
    Review { id: Uuid, client_id: Uuid, service_id: Uuid },
    Dashboard,
}

impl Resource {
    #[must_use]
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::User { .. } => ResourceType::User,
            Self::ClientProfile { .. } => ResourceType::ClientProfile,
            Self::SupplierProfile { .. } => ResourceType::SupplierProfile,
            Self::Service { .. } => ResourceType::Service,
            Self::Category { .. } => ResourceType::Category,
            Self::Contract { .. } => ResourceType::Contract,
            Self::Review { .. } => ResourceType::Review,
            Self::Dashboard => ResourceType::Dashboard,
        }
    }

    #[must_use]
    pub fn field(&self, field: Field) -> Option<Uuid> {
        match (self, field) {
            (
                Self::User { id }
                | Self::ClientProfile { id }
                | Self::SupplierProfile { id }
                | Self::Service { id, .. }
                | Self::Category { id }
                | Self::Contract { id, .. }
                | Self::Review { id, .. },
                Field::Id,
            ) => Some(*id),
            (Self::Service { supplier_id, .. }, Field::SupplierId) => Some(*supplier_id),
            (
                Self::Contract { client_id, .. } | Self::Review { client_id, .. },
                Field::ClientId,
            ) => Some(*client_id),
            (
                Self::Contract { service_id, .. } | Self::Review { service_id, .. },
                Field::ServiceId,
            ) => Some(*service_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub action: Action,
    pub subject: ResourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Rule {
    fn applies_to(&self, action: Action, resource_type: ResourceType) -> bool {
        self.action.covers(action) && self.subject.covers(resource_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    #[must_use]
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Decide whether `action` is allowed.
    ///
    /// Without an instance, any grant for the pair allows it (conditions are
    /// not evaluated). With an instance, an unconditional grant allows it
    /// outright; a scoped grant only matches an instance of `resource_type`
    /// whose attributes satisfy its condition.
    #[must_use]
    pub fn can(
        &self,
        action: Action,
        resource_type: ResourceType,
        instance: Option<&Resource>,
    ) -> bool {
        self.rules
            .iter()
            .filter(|rule| rule.applies_to(action, resource_type))
            .any(|rule| match (instance, &rule.condition) {
                (None, _) | (Some(_), None) => true,
                (Some(resource), Some(condition)) => {
                    resource.resource_type() == resource_type && condition.matches(resource)
                }
            })
    }

    #[must_use]
    pub fn can_on(&self, action: Action, resource: &Resource) -> bool {
        self.can(action, resource.resource_type(), Some(resource))
    }
}

struct RuleSetBuilder {
    rules: Vec<Rule>,
}

impl RuleSetBuilder {
    fn new() -> Self {
        Self { rules: Vec::new() }
    }

    fn allow(mut self, actions: &[Action], subject: ResourceType) -> Self {
        for action in actions {
            self.rules.push(Rule {
                action: *action,
                subject,
                condition: None,
            });
        }
        self
    }

    fn allow_when(mut self, actions: &[Action], subject: ResourceType, condition: Condition) -> Self {
        for action in actions {
            self.rules.push(Rule {
                action: *action,
                subject,
                condition: Some(condition.clone()),
            });
        }
        self
    }

    /// Scoped grant on an optional attribute; skipped when the attribute is unset.
    fn allow_owned(
        self,
        actions: &[Action],
        subject: ResourceType,
        field: Field,
        owner: Option<Uuid>,
    ) -> Self {
        match owner {
            Some(value) => self.allow_when(actions, subject, Condition::Equals { field, value }),
            None => self,
        }
    }

    fn build(self) -> RuleSet {
        RuleSet { rules: self.rules }
    }
}

/// Build the abilities of an identity.
#[must_use]
pub fn define_abilities(identity: &Identity) -> RuleSet {
    use Action::{Create, Delete, Manage, Read, Update};

    let own_user = Condition::Equals {
        field: Field::Id,
        value: identity.id,
    };

    if !identity.is_active() {
        return RuleSetBuilder::new()
            .allow_when(&[Read], ResourceType::User, own_user)
            .build();
    }

    let profiles = &identity.profiles;
    match identity.role {
        Role::Admin => RuleSetBuilder::new()
            .allow(&[Manage], ResourceType::All)
            .build(),
        Role::Client => RuleSetBuilder::new()
            .allow_when(&[Read, Update], ResourceType::User, own_user)
            .allow_owned(
                &[Read, Update],
                ResourceType::ClientProfile,
                Field::Id,
                profiles.client_profile_id,
            )
            .allow(&[Read], ResourceType::Service)
            .allow(&[Read], ResourceType::Category)
            .allow(&[Create], ResourceType::Contract)
            .allow_owned(
                &[Read, Update],
                ResourceType::Contract,
                Field::ClientId,
                profiles.client_profile_id,
            )
            .allow_owned(
                &[Create, Read, Update, Delete],
                ResourceType::Review,
                Field::ClientId,
                profiles.client_profile_id,
            )
            .allow(&[Read], ResourceType::Dashboard)
            .build(),
        Role::Supplier => {
            let own_services = Condition::In {
                field: Field::ServiceId,
                values: profiles.service_ids.clone(),
            };
            RuleSetBuilder::new()
                .allow_when(&[Read, Update], ResourceType::User, own_user)
                .allow_owned(
                    &[Read, Update],
                    ResourceType::SupplierProfile,
                    Field::Id,
                    profiles.supplier_profile_id,
                )
                .allow_owned(
                    &[Create, Read, Update, Delete],
                    ResourceType::Service,
                    Field::SupplierId,
                    profiles.supplier_profile_id,
                )
                .allow(&[Read], ResourceType::Category)
                .allow_when(&[Read, Update], ResourceType::Contract, own_services.clone())
                .allow_when(&[Read, Update], ResourceType::Review, own_services)
                .allow(&[Read], ResourceType::Dashboard)
                .build()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::{LinkedProfiles, Status};

    fn identity(role: Role, profiles: LinkedProfiles) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            email: "someone@agora.test".to_string(),
            role,
            status: Status::Active,
            profiles,
        }
    }

    fn client() -> Identity {
        identity(
            Role::Client,
            LinkedProfiles {
                client_profile_id: Some(Uuid::new_v4()),
                ..LinkedProfiles::default()
            },
        )
    }

    fn supplier() -> Identity {
        identity(
            Role::Supplier,
            LinkedProfiles {
                supplier_profile_id: Some(Uuid::new_v4()),
                service_ids: vec![Uuid::new_v4(), Uuid::new_v4()],
                ..LinkedProfiles::default()
            },
        )
    }

    #[test]
    fn admin_manages_everything() {
        let rules = define_abilities(&identity(Role::Admin, LinkedProfiles::default()));
        assert!(rules.can(Action::Delete, ResourceType::Service, None));
        assert!(rules.can_on(
            Action::Update,
            &Resource::Contract {
                id: Uuid::new_v4(),
                client_id: Uuid::new_v4(),
                service_id: Uuid::new_v4(),
            }
        ));
    }

    #[test]
    fn client_reviews_are_scoped_to_own_profile() {
        let client = client();
        let rules = define_abilities(&client);
        let own = client.profiles.client_profile_id.expect("profile");

        let mine = Resource::Review {
            id: Uuid::new_v4(),
            client_id: own,
            service_id: Uuid::new_v4(),
        };
        let theirs = Resource::Review {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            service_id: Uuid::new_v4(),
        };
        assert!(rules.can_on(Action::Delete, &mine));
        assert!(!rules.can_on(Action::Delete, &theirs));
        assert!(rules.can(Action::Delete, ResourceType::Review, None));
    }

    #[test]
    fn client_can_create_contracts_but_not_services() {
        let rules = define_abilities(&client());
        assert!(rules.can(Action::Create, ResourceType::Contract, None));
        assert!(rules.can(Action::Read, ResourceType::Service, None));
        assert!(!rules.can(Action::Create, ResourceType::Service, None));
        assert!(!rules.can(Action::Delete, ResourceType::Contract, None));
    }

    #[test]
    fn supplier_cannot_delete_foreign_service() {
        let supplier = supplier();
        let rules = define_abilities(&supplier);
        let own = supplier.profiles.supplier_profile_id.expect("profile");

        let foreign = Resource::Service {
            id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
        };
        let mine = Resource::Service {
            id: Uuid::new_v4(),
            supplier_id: own,
        };
        assert!(!rules.can_on(Action::Delete, &foreign));
        assert!(rules.can_on(Action::Delete, &mine));
    }

    #[test]
    fn supplier_contracts_follow_service_ids() {
        let supplier = supplier();
        let rules = define_abilities(&supplier);
        let contract = |service_id| Resource::Contract {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            service_id,
        };
        assert!(rules.can_on(Action::Read, &contract(supplier.profiles.service_ids[1])));
        assert!(!rules.can_on(Action::Read, &contract(Uuid::new_v4())));
        assert!(!rules.can(Action::Create, ResourceType::Contract, None));
    }

    #[test]
    fn inactive_identity_only_reads_itself() {
        let mut pending = client();
        pending.status = Status::Pending;
        let rules = define_abilities(&pending);

        assert_eq!(rules.rules().len(), 1);
        assert!(rules.can_on(Action::Read, &Resource::User { id: pending.id }));
        assert!(!rules.can_on(Action::Update, &Resource::User { id: pending.id }));
        assert!(!rules.can(Action::Read, ResourceType::Dashboard, None));
    }

    const ACTIONS: [Action; 5] = [
        Action::Manage,
        Action::Create,
        Action::Read,
        Action::Update,
        Action::Delete,
    ];

    const RESOURCE_TYPES: [ResourceType; 9] = [
        ResourceType::All,
        ResourceType::User,
        ResourceType::ClientProfile,
        ResourceType::SupplierProfile,
        ResourceType::Service,
        ResourceType::Category,
        ResourceType::Contract,
        ResourceType::Review,
        ResourceType::Dashboard,
    ];

    fn sample_resources() -> Vec<Resource> {
        vec![
            Resource::User { id: Uuid::new_v4() },
            Resource::ClientProfile { id: Uuid::new_v4() },
            Resource::SupplierProfile { id: Uuid::new_v4() },
            Resource::Service {
                id: Uuid::new_v4(),
                supplier_id: Uuid::new_v4(),
            },
            Resource::Category { id: Uuid::new_v4() },
            Resource::Contract {
                id: Uuid::new_v4(),
                client_id: Uuid::new_v4(),
                service_id: Uuid::new_v4(),
            },
            Resource::Review {
                id: Uuid::new_v4(),
                client_id: Uuid::new_v4(),
                service_id: Uuid::new_v4(),
            },
            Resource::Dashboard,
        ]
    }

    #[test]
    fn admin_is_allowed_every_action_on_every_instance() {
        let rules = define_abilities(&identity(Role::Admin, LinkedProfiles::default()));
        let resources = sample_resources();
        for action in ACTIONS {
            for resource_type in RESOURCE_TYPES {
                assert!(
                    rules.can(action, resource_type, None),
                    "admin denied {action:?} on {resource_type}"
                );
                for resource in &resources {
                    assert!(
                        rules.can(action, resource_type, Some(resource)),
                        "admin denied {action:?} on {resource_type} with {resource:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn scoped_grant_ignores_instance_of_another_type() {
        let client = client();
        let rules = define_abilities(&client);
        let own = client.profiles.client_profile_id.expect("profile");

        // A review carrying the right client id must not unlock a contract.
        let review = Resource::Review {
            id: Uuid::new_v4(),
            client_id: own,
            service_id: Uuid::new_v4(),
        };
        assert!(!rules.can(Action::Update, ResourceType::Contract, Some(&review)));
    }

    #[test]
    fn client_contract_update_is_scoped_to_own_profile() {
        let client = client();
        let rules = define_abilities(&client);
        let own = client.profiles.client_profile_id.expect("profile");
        let contract = |client_id| Resource::Contract {
            id: Uuid::new_v4(),
            client_id,
            service_id: Uuid::new_v4(),
        };

        assert!(rules.can(Action::Update, ResourceType::Contract, Some(&contract(own))));
        assert!(!rules.can(
            Action::Update,
            ResourceType::Contract,
            Some(&contract(Uuid::new_v4()))
        ));
    }

    #[test]
    fn rules_serialize_with_conditions() {
        let client = client();
        let json = serde_json::to_value(define_abilities(&client)).expect("json");
        let first = &json["rules"][0];
        assert_eq!(first["action"], "read");
        assert_eq!(first["subject"], "User");
        assert_eq!(first["condition"]["op"], "equals");
        assert_eq!(first["condition"]["field"], "id");
    }
}
