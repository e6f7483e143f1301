//! Repository Implementation

use crate::models::*;
use crate::StorageError;
use auth::Role;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Access to the table holding records of type `T`
pub trait HasTable<T: Scoped> {
    fn table(&self) -> &Mutex<Vec<T>>;
}

/// Repository for data access (in-memory implementation)
///
/// Each table has its own lock. Methods touching several tables take them
/// in declaration order of the fields below.
pub struct Repository {
    organizations: Mutex<Vec<Organization>>,
    users: Mutex<Vec<User>>,
    memberships: Mutex<Vec<Membership>>,
    invitations: Mutex<Vec<Invitation>>,
    services: Mutex<Vec<Service>>,
    poles: Mutex<Vec<Pole>>,
    domains: Mutex<Vec<BudgetDomain>>,
    types: Mutex<Vec<BudgetType>>,
    budget_lines: Mutex<Vec<BudgetLine>>,
    invoices: Mutex<Vec<Invoice>>,
    contracts: Mutex<Vec<Contract>>,
    comments: Mutex<Vec<Comment>>,
    allocations: Mutex<Vec<PoleAllocation>>,
    yearly_budgets: Mutex<Vec<YearlyBudget>>,
    annual_budgets: Mutex<Vec<AnnualBudget>>,
    audit_log: Mutex<Vec<AuditEntry>>,
}

macro_rules! tables {
    ($($ty:ty => $field:ident),* $(,)?) => {
        $(
            impl HasTable<$ty> for Repository {
                fn table(&self) -> &Mutex<Vec<$ty>> {
                    &self.$field
                }
            }
        )*
    };
}

tables! {
    Membership => memberships,
    Invitation => invitations,
    Service => services,
    Pole => poles,
    BudgetDomain => domains,
    BudgetType => types,
    BudgetLine => budget_lines,
    Invoice => invoices,
    Contract => contracts,
    Comment => comments,
    PoleAllocation => allocations,
    YearlyBudget => yearly_budgets,
    AnnualBudget => annual_budgets,
    AuditEntry => audit_log,
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StorageError> {
    mutex
        .lock()
        .map_err(|e| StorageError::DatabaseError(format!("Lock error: {}", e)))
}

fn not_found<T: Scoped>(id: Uuid) -> StorageError {
    StorageError::NotFound { kind: T::KIND, id }
}

impl Repository {
    /// Create a new in-memory repository
    pub fn new() -> Self {
        info!("Creating in-memory repository");
        Self {
            organizations: Mutex::new(Vec::new()),
            users: Mutex::new(Vec::new()),
            memberships: Mutex::new(Vec::new()),
            invitations: Mutex::new(Vec::new()),
            services: Mutex::new(Vec::new()),
            poles: Mutex::new(Vec::new()),
            domains: Mutex::new(Vec::new()),
            types: Mutex::new(Vec::new()),
            budget_lines: Mutex::new(Vec::new()),
            invoices: Mutex::new(Vec::new()),
            contracts: Mutex::new(Vec::new()),
            comments: Mutex::new(Vec::new()),
            allocations: Mutex::new(Vec::new()),
            yearly_budgets: Mutex::new(Vec::new()),
            annual_budgets: Mutex::new(Vec::new()),
            audit_log: Mutex::new(Vec::with_capacity(1000)),
        }
    }

    // ------------------------------------------------------------------
    // Generic organization-scoped access
    // ------------------------------------------------------------------

    /// Insert a scoped record
    pub fn insert<T: Scoped>(&self, record: T) -> Result<T, StorageError>
    where
        Self: HasTable<T>,
    {
        let mut rows = lock(self.table())?;
        if rows.iter().any(|r| r.id() == record.id()) {
            return Err(StorageError::conflict("id", format!("duplicate {}", T::KIND)));
        }
        debug!("Inserted {} {}", T::KIND, record.id());
        rows.push(record.clone());
        Ok(record)
    }

    /// Get one record of an organization
    pub fn get<T: Scoped>(&self, organization_id: Uuid, id: Uuid) -> Result<T, StorageError>
    where
        Self: HasTable<T>,
    {
        lock(self.table())?
            .iter()
            .find(|r| r.id() == id && r.organization_id() == organization_id)
            .cloned()
            .ok_or_else(|| not_found::<T>(id))
    }

    /// List all records of an organization, in insertion order
    pub fn list<T: Scoped>(&self, organization_id: Uuid) -> Result<Vec<T>, StorageError>
    where
        Self: HasTable<T>,
    {
        self.find(organization_id, |_: &T| true)
    }

    /// List records of an organization matching a predicate
    pub fn find<T: Scoped>(
        &self,
        organization_id: Uuid,
        predicate: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>, StorageError>
    where
        Self: HasTable<T>,
    {
        Ok(lock(self.table())?
            .iter()
            .filter(|r| r.organization_id() == organization_id && predicate(r))
            .cloned()
            .collect())
    }

    /// Apply a change to a record and return the updated copy.
    ///
    /// The id and organization of the record cannot be changed.
    pub fn update<T: Scoped>(
        &self,
        organization_id: Uuid,
        id: Uuid,
        change: impl FnOnce(&mut T),
    ) -> Result<T, StorageError>
    where
        Self: HasTable<T>,
    {
        let mut rows = lock(self.table())?;
        let row = rows
            .iter_mut()
            .find(|r| r.id() == id && r.organization_id() == organization_id)
            .ok_or_else(|| not_found::<T>(id))?;

        let mut updated = row.clone();
        change(&mut updated);
        if updated.id() != id || updated.organization_id() != organization_id {
            return Err(StorageError::conflict("id", "identity fields are immutable"));
        }
        *row = updated.clone();
        debug!("Updated {} {}", T::KIND, id);
        Ok(updated)
    }

    /// Insert a record once `check(&record, existing)` accepted every row
    /// of the same organization. Check and insert share one table lock.
    pub fn insert_checked<T: Scoped>(
        &self,
        record: T,
        check: impl Fn(&T, &T) -> Result<(), StorageError>,
    ) -> Result<T, StorageError>
    where
        Self: HasTable<T>,
    {
        let mut rows = lock(self.table())?;
        if rows.iter().any(|r| r.id() == record.id()) {
            return Err(StorageError::conflict("id", format!("duplicate {}", T::KIND)));
        }
        for existing in rows
            .iter()
            .filter(|r| r.organization_id() == record.organization_id())
        {
            check(&record, existing)?;
        }

        debug!("Inserted {} {}", T::KIND, record.id());
        rows.push(record.clone());
        Ok(record)
    }

    /// Like [`Repository::update`], but the changed record must pass
    /// `check(&updated, other)` against every other row of the organization
    /// before it is stored.
    pub fn update_checked<T: Scoped>(
        &self,
        organization_id: Uuid,
        id: Uuid,
        change: impl FnOnce(&mut T),
        check: impl Fn(&T, &T) -> Result<(), StorageError>,
    ) -> Result<T, StorageError>
    where
        Self: HasTable<T>,
    {
        let mut rows = lock(self.table())?;
        let index = rows
            .iter()
            .position(|r| r.id() == id && r.organization_id() == organization_id)
            .ok_or_else(|| not_found::<T>(id))?;

        let mut updated = rows[index].clone();
        change(&mut updated);
        if updated.id() != id || updated.organization_id() != organization_id {
            return Err(StorageError::conflict("id", "identity fields are immutable"));
        }
        for other in rows
            .iter()
            .filter(|r| r.organization_id() == organization_id && r.id() != id)
        {
            check(&updated, other)?;
        }

        rows[index] = updated.clone();
        debug!("Updated {} {}", T::KIND, id);
        Ok(updated)
    }

    /// Remove a record
    pub fn delete<T: Scoped>(&self, organization_id: Uuid, id: Uuid) -> Result<T, StorageError>
    where
        Self: HasTable<T>,
    {
        let mut rows = lock(self.table())?;
        let index = rows
            .iter()
            .position(|r| r.id() == id && r.organization_id() == organization_id)
            .ok_or_else(|| not_found::<T>(id))?;
        debug!("Deleted {} {}", T::KIND, id);
        Ok(rows.remove(index))
    }

    /// Check that `id` names a record of the organization, reporting
    /// failures against the request field that carried it.
    pub fn ensure_exists<T: Scoped>(
        &self,
        organization_id: Uuid,
        field: &'static str,
        id: Uuid,
    ) -> Result<(), StorageError>
    where
        Self: HasTable<T>,
    {
        match self.get::<T>(organization_id, id) {
            Ok(_) => Ok(()),
            Err(StorageError::NotFound { kind, id }) => {
                Err(StorageError::InvalidReference { field, kind, id })
            }
            Err(e) => Err(e),
        }
    }

    // ------------------------------------------------------------------
    // Organizations, users and memberships
    // ------------------------------------------------------------------

    /// Create an organization and make `owner` its first admin
    pub fn create_organization(
        &self,
        name: &str,
        owner: Uuid,
    ) -> Result<(Organization, Membership), StorageError> {
        self.get_user(owner)?;

        let now = Utc::now();
        let organization = Organization {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: now,
        };
        lock(&self.organizations)?.push(organization.clone());
        let membership = self.add_member(organization.id, owner, Role::Admin)?;

        info!("Created organization '{}' ({})", organization.name, organization.id);
        Ok((organization, membership))
    }

    pub fn get_organization(&self, id: Uuid) -> Result<Organization, StorageError> {
        lock(&self.organizations)?
            .iter()
            .find(|o| o.id == id)
            .cloned()
            .ok_or(StorageError::NotFound {
                kind: "organization",
                id,
            })
    }

    pub fn rename_organization(&self, id: Uuid, name: &str) -> Result<Organization, StorageError> {
        let mut organizations = lock(&self.organizations)?;
        let organization = organizations
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(StorageError::NotFound {
                kind: "organization",
                id,
            })?;
        organization.name = name.to_string();
        Ok(organization.clone())
    }

    /// Organizations a user belongs to, with the user's role in each
    pub fn organizations_of(&self, user_id: Uuid) -> Result<Vec<(Organization, Role)>, StorageError> {
        let organizations = lock(&self.organizations)?;
        let memberships = lock(&self.memberships)?;

        Ok(memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| {
                organizations
                    .iter()
                    .find(|o| o.id == m.organization_id)
                    .map(|o| (o.clone(), m.role))
            })
            .collect())
    }

    pub fn organization_count(&self) -> usize {
        self.organizations.lock().map(|o| o.len()).unwrap_or(0)
    }

    /// Create a user. Emails are unique.
    pub fn create_user(&self, email: &str, name: &str) -> Result<User, StorageError> {
        let mut users = lock(&self.users)?;
        if users.iter().any(|u| u.email == email) {
            return Err(StorageError::conflict("email", "already registered"));
        }

        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        users.push(user.clone());
        debug!("Created user {}", user.id);
        Ok(user)
    }

    pub fn get_user(&self, id: Uuid) -> Result<User, StorageError> {
        lock(&self.users)?
            .iter()
            .find(|u| u.id == id)
            .cloned()
            .ok_or(StorageError::NotFound { kind: "user", id })
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StorageError> {
        Ok(lock(&self.users)?.iter().find(|u| u.email == email).cloned())
    }

    /// Return the user registered with `email`, creating it if needed
    pub fn ensure_user(&self, email: &str, name: &str) -> Result<User, StorageError> {
        match self.find_user_by_email(email)? {
            Some(user) => Ok(user),
            None => self.create_user(email, name),
        }
    }

    pub fn membership(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Membership>, StorageError> {
        Ok(lock(&self.memberships)?
            .iter()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .cloned())
    }

    pub fn add_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<Membership, StorageError> {
        let mut memberships = lock(&self.memberships)?;
        if memberships
            .iter()
            .any(|m| m.organization_id == organization_id && m.user_id == user_id)
        {
            return Err(StorageError::conflict("email", "already a member"));
        }

        let membership = Membership {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            role,
            created_at: Utc::now(),
        };
        memberships.push(membership.clone());
        Ok(membership)
    }

    /// Members of an organization with their user records
    pub fn members(&self, organization_id: Uuid) -> Result<Vec<(User, Membership)>, StorageError> {
        let users = lock(&self.users)?;
        let memberships = lock(&self.memberships)?;

        Ok(memberships
            .iter()
            .filter(|m| m.organization_id == organization_id)
            .filter_map(|m| {
                users
                    .iter()
                    .find(|u| u.id == m.user_id)
                    .map(|u| (u.clone(), m.clone()))
            })
            .collect())
    }

    /// Change a member's role. The last admin cannot be demoted.
    pub fn set_member_role(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        role: Role,
    ) -> Result<Membership, StorageError> {
        let mut memberships = lock(&self.memberships)?;
        let admins = count_admins(&memberships, organization_id);

        let membership = memberships
            .iter_mut()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .ok_or(StorageError::NotFound {
                kind: "user",
                id: user_id,
            })?;

        if membership.role == Role::Admin && role != Role::Admin && admins <= 1 {
            return Err(StorageError::conflict(
                "role",
                "the last admin of an organization cannot be demoted",
            ));
        }

        membership.role = role;
        Ok(membership.clone())
    }

    /// Remove a member. The last admin cannot be removed.
    pub fn remove_member(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
    ) -> Result<Membership, StorageError> {
        let mut memberships = lock(&self.memberships)?;
        let admins = count_admins(&memberships, organization_id);

        let index = memberships
            .iter()
            .position(|m| m.organization_id == organization_id && m.user_id == user_id)
            .ok_or(StorageError::NotFound {
                kind: "user",
                id: user_id,
            })?;

        if memberships[index].role == Role::Admin && admins <= 1 {
            return Err(StorageError::conflict(
                "user",
                "the last admin of an organization cannot be removed",
            ));
        }

        Ok(memberships.remove(index))
    }

    // ------------------------------------------------------------------
    // Invitations
    // ------------------------------------------------------------------

    /// Store a new invitation. Refused when the email already belongs to a
    /// member or has a pending invitation in the same organization.
    pub fn create_invitation(&self, invitation: Invitation) -> Result<Invitation, StorageError> {
        let users = lock(&self.users)?;
        let memberships = lock(&self.memberships)?;
        let mut invitations = lock(&self.invitations)?;

        let is_member = users
            .iter()
            .filter(|u| u.email == invitation.email)
            .any(|u| {
                memberships
                    .iter()
                    .any(|m| m.organization_id == invitation.organization_id && m.user_id == u.id)
            });
        if is_member {
            return Err(StorageError::conflict("email", "already a member"));
        }
        if invitations.iter().any(|i| {
            i.organization_id == invitation.organization_id && i.email == invitation.email && i.is_pending()
        }) {
            return Err(StorageError::conflict("email", "already invited"));
        }

        invitations.push(invitation.clone());
        debug!("Created invitation {}", invitation.id);
        Ok(invitation)
    }

    /// Accept a pending invitation: registers the user if needed and adds
    /// the membership with the invited role. An invitation is accepted once.
    pub fn accept_invitation(
        &self,
        token: &str,
        name: &str,
    ) -> Result<(User, Membership), StorageError> {
        let mut users = lock(&self.users)?;
        let mut memberships = lock(&self.memberships)?;
        let mut invitations = lock(&self.invitations)?;

        let invitation = invitations
            .iter_mut()
            .find(|i| i.token == token)
            .ok_or(StorageError::NotFound {
                kind: "invitation",
                id: Uuid::nil(),
            })?;
        if !invitation.is_pending() {
            return Err(StorageError::conflict("token", "invitation already accepted"));
        }
        if memberships.iter().any(|m| {
            m.organization_id == invitation.organization_id
                && users.iter().any(|u| u.id == m.user_id && u.email == invitation.email)
        }) {
            return Err(StorageError::conflict("email", "already a member"));
        }

        let now = Utc::now();
        let existing = users.iter().find(|u| u.email == invitation.email).cloned();
        let user = match existing {
            Some(user) => user,
            None => {
                let user = User {
                    id: Uuid::new_v4(),
                    email: invitation.email.clone(),
                    name: name.to_string(),
                    created_at: now,
                };
                users.push(user.clone());
                user
            }
        };

        let membership = Membership {
            id: Uuid::new_v4(),
            organization_id: invitation.organization_id,
            user_id: user.id,
            role: invitation.role,
            created_at: now,
        };
        memberships.push(membership.clone());
        invitation.accepted_at = Some(now);

        info!(
            "User {} joined organization {} as {}",
            user.id, invitation.organization_id, invitation.role
        );
        Ok((user, membership))
    }

    // ------------------------------------------------------------------
    // Budget lines
    // ------------------------------------------------------------------

    /// Budget vs. invoiced totals of every budget line of an organization
    pub fn budget_line_totals(&self, organization_id: Uuid) -> Result<Vec<BudgetLineTotals>, StorageError> {
        let lines = lock(&self.budget_lines)?;
        let invoices = lock(&self.invoices)?;

        let mut invoiced: HashMap<Uuid, f64> = HashMap::new();
        for invoice in invoices
            .iter()
            .filter(|i| i.organization_id == organization_id && i.status.is_billable())
        {
            *invoiced.entry(invoice.budget_line_id).or_insert(0.0) += invoice.amount;
        }

        Ok(lines
            .iter()
            .filter(|l| l.organization_id == organization_id)
            .map(|l| BudgetLineTotals {
                budget_line_id: l.id,
                name: l.name.clone(),
                year: l.year,
                budget_amount: l.budget_amount,
                invoiced_amount: invoiced.get(&l.id).copied().unwrap_or(0.0),
            })
            .collect())
    }

    /// Totals of a single budget line
    pub fn budget_line_total(
        &self,
        organization_id: Uuid,
        id: Uuid,
    ) -> Result<BudgetLineTotals, StorageError> {
        self.budget_line_totals(organization_id)?
            .into_iter()
            .find(|t| t.budget_line_id == id)
            .ok_or_else(|| not_found::<BudgetLine>(id))
    }

    /// Delete a budget line and its comments, allocations and yearly
    /// budgets. Refused while invoices or contracts reference it.
    pub fn delete_budget_line(&self, organization_id: Uuid, id: Uuid) -> Result<BudgetLine, StorageError> {
        let mut lines = lock(&self.budget_lines)?;
        let index = lines
            .iter()
            .position(|l| l.id == id && l.organization_id == organization_id)
            .ok_or_else(|| not_found::<BudgetLine>(id))?;

        if lock(&self.invoices)?.iter().any(|i| i.budget_line_id == id) {
            return Err(StorageError::conflict("budget_line_id", "budget line has invoices"));
        }
        if lock(&self.contracts)?
            .iter()
            .any(|c| c.budget_line_id == Some(id))
        {
            return Err(StorageError::conflict("budget_line_id", "budget line has contracts"));
        }

        lock(&self.comments)?.retain(|c| c.budget_line_id != id);
        lock(&self.allocations)?.retain(|a| a.budget_line_id != id);
        lock(&self.yearly_budgets)?.retain(|y| y.budget_line_id != id);

        info!("Deleted budget line {}", id);
        Ok(lines.remove(index))
    }

    /// Apply a change to a budget line. The new budget amount may not fall
    /// below what is already allocated to poles.
    pub fn update_budget_line(
        &self,
        organization_id: Uuid,
        id: Uuid,
        change: impl FnOnce(&mut BudgetLine),
    ) -> Result<BudgetLine, StorageError> {
        let mut lines = lock(&self.budget_lines)?;
        let allocations = lock(&self.allocations)?;

        let line = lines
            .iter_mut()
            .find(|l| l.id == id && l.organization_id == organization_id)
            .ok_or_else(|| not_found::<BudgetLine>(id))?;

        let mut updated = line.clone();
        change(&mut updated);
        if updated.id != id || updated.organization_id != organization_id {
            return Err(StorageError::conflict("id", "identity fields are immutable"));
        }

        let allocated = allocated_to(&allocations, organization_id, id, None);
        if allocated > updated.budget_amount {
            return Err(StorageError::conflict(
                "budget_amount",
                format!("pole allocations already total {:.2}", allocated),
            ));
        }

        *line = updated.clone();
        debug!("Updated budget line {}", id);
        Ok(updated)
    }

    // ------------------------------------------------------------------
    // Pole allocations
    // ------------------------------------------------------------------

    /// Store a new allocation. The pole must exist and the allocations of
    /// the line may not add up to more than its budget amount.
    pub fn insert_allocation(&self, allocation: PoleAllocation) -> Result<PoleAllocation, StorageError> {
        let poles = lock(&self.poles)?;
        let lines = lock(&self.budget_lines)?;
        let mut allocations = lock(&self.allocations)?;

        let organization_id = allocation.organization_id;
        if !poles
            .iter()
            .any(|p| p.id == allocation.pole_id && p.organization_id == organization_id)
        {
            return Err(StorageError::InvalidReference {
                field: "pole_id",
                kind: Pole::KIND,
                id: allocation.pole_id,
            });
        }
        let line = lines
            .iter()
            .find(|l| l.id == allocation.budget_line_id && l.organization_id == organization_id)
            .ok_or_else(|| not_found::<BudgetLine>(allocation.budget_line_id))?;
        ensure_allocatable(&allocations, line, allocation.amount, None)?;

        allocations.push(allocation.clone());
        debug!("Allocated {:.2} of budget line {}", allocation.amount, line.id);
        Ok(allocation)
    }

    /// Change the amount of an allocation, within the line's budget
    pub fn set_allocation_amount(
        &self,
        organization_id: Uuid,
        id: Uuid,
        amount: f64,
    ) -> Result<PoleAllocation, StorageError> {
        let lines = lock(&self.budget_lines)?;
        let mut allocations = lock(&self.allocations)?;

        let index = allocations
            .iter()
            .position(|a| a.id == id && a.organization_id == organization_id)
            .ok_or_else(|| not_found::<PoleAllocation>(id))?;
        let line_id = allocations[index].budget_line_id;
        let line = lines
            .iter()
            .find(|l| l.id == line_id && l.organization_id == organization_id)
            .ok_or_else(|| not_found::<BudgetLine>(line_id))?;
        ensure_allocatable(&allocations, line, amount, Some(id))?;

        allocations[index].amount = amount;
        Ok(allocations[index].clone())
    }

    // ------------------------------------------------------------------
    // Organizational structure
    // ------------------------------------------------------------------

    /// Delete a service not referenced by poles or budget lines
    pub fn delete_service(&self, organization_id: Uuid, id: Uuid) -> Result<Service, StorageError> {
        let mut services = lock(&self.services)?;
        let index = services
            .iter()
            .position(|s| s.id == id && s.organization_id == organization_id)
            .ok_or_else(|| not_found::<Service>(id))?;

        if lock(&self.poles)?.iter().any(|p| p.service_id == id) {
            return Err(StorageError::conflict("service_id", "service has poles"));
        }
        if lock(&self.budget_lines)?
            .iter()
            .any(|l| l.service_id == Some(id))
        {
            return Err(StorageError::conflict("service_id", "service has budget lines"));
        }

        Ok(services.remove(index))
    }

    /// Delete a pole without allocations
    pub fn delete_pole(&self, organization_id: Uuid, id: Uuid) -> Result<Pole, StorageError> {
        let mut poles = lock(&self.poles)?;
        let index = poles
            .iter()
            .position(|p| p.id == id && p.organization_id == organization_id)
            .ok_or_else(|| not_found::<Pole>(id))?;

        if lock(&self.allocations)?.iter().any(|a| a.pole_id == id) {
            return Err(StorageError::conflict("pole_id", "pole has allocations"));
        }

        Ok(poles.remove(index))
    }

    /// Delete a budget domain not used by any budget line
    pub fn delete_domain(&self, organization_id: Uuid, id: Uuid) -> Result<BudgetDomain, StorageError> {
        let mut domains = lock(&self.domains)?;
        let index = domains
            .iter()
            .position(|d| d.id == id && d.organization_id == organization_id)
            .ok_or_else(|| not_found::<BudgetDomain>(id))?;

        if lock(&self.budget_lines)?
            .iter()
            .any(|l| l.domain_id == Some(id))
        {
            return Err(StorageError::conflict("domain_id", "domain is used by budget lines"));
        }

        Ok(domains.remove(index))
    }

    /// Delete a budget type not used by any budget line
    pub fn delete_type(&self, organization_id: Uuid, id: Uuid) -> Result<BudgetType, StorageError> {
        let mut types = lock(&self.types)?;
        let index = types
            .iter()
            .position(|t| t.id == id && t.organization_id == organization_id)
            .ok_or_else(|| not_found::<BudgetType>(id))?;

        if lock(&self.budget_lines)?
            .iter()
            .any(|l| l.type_id == Some(id))
        {
            return Err(StorageError::conflict("type_id", "type is used by budget lines"));
        }

        Ok(types.remove(index))
    }

    // ------------------------------------------------------------------
    // Yearly and annual budgets
    // ------------------------------------------------------------------

    /// Insert a yearly budget, unique per (budget line, year)
    pub fn insert_yearly_budget(&self, record: YearlyBudget) -> Result<YearlyBudget, StorageError> {
        let mut rows = lock(&self.yearly_budgets)?;
        if rows
            .iter()
            .any(|y| y.budget_line_id == record.budget_line_id && y.year == record.year)
        {
            return Err(StorageError::conflict(
                "year",
                format!("a yearly budget already exists for {}", record.year),
            ));
        }
        rows.push(record.clone());
        Ok(record)
    }

    /// Create or replace the annual envelope of one year
    pub fn upsert_annual_budget(
        &self,
        organization_id: Uuid,
        year: i32,
        fonctionnement: f64,
        investissement: f64,
    ) -> Result<(AnnualBudget, bool), StorageError> {
        let mut rows = lock(&self.annual_budgets)?;
        let now = Utc::now();

        if let Some(existing) = rows
            .iter_mut()
            .find(|a| a.organization_id == organization_id && a.year == year)
        {
            existing.fonctionnement = fonctionnement;
            existing.investissement = investissement;
            existing.updated_at = now;
            return Ok((existing.clone(), false));
        }

        let record = AnnualBudget {
            id: Uuid::new_v4(),
            organization_id,
            year,
            fonctionnement,
            investissement,
            updated_at: now,
        };
        rows.push(record.clone());
        Ok((record, true))
    }

    // ------------------------------------------------------------------
    // Audit log
    // ------------------------------------------------------------------

    /// Append an entry to the audit log
    pub fn record_audit(
        &self,
        organization_id: Uuid,
        user_id: Uuid,
        action: AuditAction,
        entity: &str,
        entity_id: Uuid,
        summary: impl Into<String>,
    ) -> Result<AuditEntry, StorageError> {
        let entry = AuditEntry {
            id: Uuid::new_v4(),
            organization_id,
            user_id,
            action,
            entity: entity.to_string(),
            entity_id,
            summary: summary.into(),
            at: Utc::now(),
        };
        lock(&self.audit_log)?.push(entry.clone());
        Ok(entry)
    }

    /// Latest audit entries of an organization, newest first
    pub fn audit_entries(&self, organization_id: Uuid, limit: usize) -> Result<Vec<AuditEntry>, StorageError> {
        Ok(lock(&self.audit_log)?
            .iter()
            .rev()
            .filter(|e| e.organization_id == organization_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

fn allocated_to(allocations: &[PoleAllocation], organization_id: Uuid, budget_line_id: Uuid, except: Option<Uuid>) -> f64 {
    allocations
        .iter()
        .filter(|a| {
            a.organization_id == organization_id && a.budget_line_id == budget_line_id && Some(a.id) != except
        })
        .map(|a| a.amount)
        .sum()
}

fn ensure_allocatable(
    allocations: &[PoleAllocation],
    line: &BudgetLine,
    amount: f64,
    except: Option<Uuid>,
) -> Result<(), StorageError> {
    let total = allocated_to(allocations, line.organization_id, line.id, except) + amount;
    if total > line.budget_amount {
        return Err(StorageError::conflict(
            "amount",
            format!(
                "allocations would total {:.2}, above the budget amount {:.2}",
                total, line.budget_amount
            ),
        ));
    }
    Ok(())
}

fn count_admins(memberships: &[Membership], organization_id: Uuid) -> usize {
    memberships
        .iter()
        .filter(|m| m.organization_id == organization_id && m.role == Role::Admin)
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn setup() -> (Repository, Uuid, Uuid) {
        let repo = Repository::new();
        let owner = repo.create_user("owner@example.org", "Owner").unwrap();
        let (org, _) = repo.create_organization("Mairie", owner.id).unwrap();
        (repo, org.id, owner.id)
    }

    fn line(org: Uuid, amount: f64) -> BudgetLine {
        let now = Utc::now();
        BudgetLine {
            id: Uuid::new_v4(),
            organization_id: org,
            name: "Licences".to_string(),
            description: None,
            year: 2026,
            kind: ExpenseKind::Fonctionnement,
            service_id: None,
            domain_id: None,
            type_id: None,
            budget_amount: amount,
            created_at: now,
            updated_at: now,
        }
    }

    fn invoice(org: Uuid, line: Uuid, amount: f64, status: InvoiceStatus) -> Invoice {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        Invoice {
            id: Uuid::new_v4(),
            organization_id: org,
            budget_line_id: line,
            contract_id: None,
            number: "F-001".to_string(),
            supplier: "ACME".to_string(),
            amount,
            issue_date: date,
            due_date: date,
            status,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cross_tenant_access_is_not_found() {
        let (repo, org, _) = setup();
        let record = repo.insert(line(org, 100.0)).unwrap();

        let other = Uuid::new_v4();
        assert!(matches!(
            repo.get::<BudgetLine>(other, record.id),
            Err(StorageError::NotFound { kind: "budget_line", .. })
        ));
        assert!(repo.list::<BudgetLine>(other).unwrap().is_empty());
        assert!(repo.delete::<BudgetLine>(other, record.id).is_err());
        assert_eq!(repo.list::<BudgetLine>(org).unwrap().len(), 1);
    }

    #[test]
    fn test_update_keeps_identity() {
        let (repo, org, _) = setup();
        let record = repo.insert(line(org, 100.0)).unwrap();

        let updated = repo
            .update::<BudgetLine>(org, record.id, |l| l.budget_amount = 250.0)
            .unwrap();
        assert_eq!(updated.budget_amount, 250.0);

        let err = repo.update::<BudgetLine>(org, record.id, |l| l.organization_id = Uuid::new_v4());
        assert!(matches!(err, Err(StorageError::Conflict { .. })));
        assert_eq!(repo.get::<BudgetLine>(org, record.id).unwrap().budget_amount, 250.0);
    }

    #[test]
    fn test_budget_line_totals_skip_cancelled() {
        let (repo, org, _) = setup();
        let l = repo.insert(line(org, 100.0)).unwrap();
        repo.insert(invoice(org, l.id, 80.0, InvoiceStatus::Paid)).unwrap();
        repo.insert(invoice(org, l.id, 40.0, InvoiceStatus::Late)).unwrap();
        repo.insert(invoice(org, l.id, 500.0, InvoiceStatus::Cancelled)).unwrap();

        let totals = repo.budget_line_total(org, l.id).unwrap();
        assert_eq!(totals.invoiced_amount, 120.0);
        assert!(totals.is_overspent());
    }

    #[test]
    fn test_delete_budget_line_with_invoices_is_refused() {
        let (repo, org, _) = setup();
        let l = repo.insert(line(org, 100.0)).unwrap();
        repo.insert(invoice(org, l.id, 10.0, InvoiceStatus::Pending)).unwrap();

        assert!(matches!(
            repo.delete_budget_line(org, l.id),
            Err(StorageError::Conflict { field: "budget_line_id", .. })
        ));
    }

    #[test]
    fn test_delete_budget_line_cascades() {
        let (repo, org, owner) = setup();
        let l = repo.insert(line(org, 100.0)).unwrap();
        repo.insert(Comment {
            id: Uuid::new_v4(),
            organization_id: org,
            budget_line_id: l.id,
            author_id: owner,
            body: "ok".to_string(),
            created_at: Utc::now(),
        })
        .unwrap();

        repo.delete_budget_line(org, l.id).unwrap();
        assert!(repo.list::<Comment>(org).unwrap().is_empty());
    }

    #[test]
    fn test_last_admin_is_protected() {
        let (repo, org, owner) = setup();
        assert!(repo.set_member_role(org, owner, Role::Viewer).is_err());
        assert!(repo.remove_member(org, owner).is_err());

        let second = repo.create_user("second@example.org", "Second").unwrap();
        repo.add_member(org, second.id, Role::Admin).unwrap();
        assert_eq!(
            repo.set_member_role(org, owner, Role::Viewer).unwrap().role,
            Role::Viewer
        );
    }

    #[test]
    fn test_duplicate_email_and_membership() {
        let (repo, org, owner) = setup();
        assert!(repo.create_user("owner@example.org", "Again").is_err());
        assert!(repo.add_member(org, owner, Role::Viewer).is_err());
    }

    #[test]
    fn test_accept_invitation() {
        let (repo, org, owner) = setup();
        repo.insert(Invitation {
            id: Uuid::new_v4(),
            organization_id: org,
            email: "new@example.org".to_string(),
            role: Role::Manager,
            token: "tok".to_string(),
            invited_by: owner,
            created_at: Utc::now(),
            accepted_at: None,
        })
        .unwrap();

        let (user, membership) = repo.accept_invitation("tok", "Newcomer").unwrap();
        assert_eq!(user.email, "new@example.org");
        assert_eq!(membership.role, Role::Manager);
        assert!(repo.accept_invitation("tok", "Newcomer").is_err());
        assert_eq!(repo.members(org).unwrap().len(), 2);
    }

    #[test]
    fn test_annual_budget_upsert() {
        let (repo, org, _) = setup();
        let (first, created) = repo.upsert_annual_budget(org, 2026, 10.0, 20.0).unwrap();
        assert!(created);
        let (second, created) = repo.upsert_annual_budget(org, 2026, 15.0, 5.0).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(second.total(), 20.0);
        assert_eq!(repo.list::<AnnualBudget>(org).unwrap().len(), 1);
    }

    #[test]
    fn test_yearly_budget_unique_per_year() {
        let (repo, org, _) = setup();
        let l = repo.insert(line(org, 100.0)).unwrap();
        let yearly = YearlyBudget {
            id: Uuid::new_v4(),
            organization_id: org,
            budget_line_id: l.id,
            year: 2027,
            amount: 50.0,
        };
        repo.insert_yearly_budget(yearly.clone()).unwrap();
        let duplicate = YearlyBudget {
            id: Uuid::new_v4(),
            ..yearly
        };
        assert!(matches!(
            repo.insert_yearly_budget(duplicate),
            Err(StorageError::Conflict { field: "year", .. })
        ));
    }

    #[test]
    fn test_audit_entries_newest_first() {
        let (repo, org, owner) = setup();
        for i in 0..3 {
            repo.record_audit(org, owner, AuditAction::Create, "invoice", Uuid::new_v4(), format!("#{}", i))
                .unwrap();
        }
        let entries = repo.audit_entries(org, 2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].summary, "#2");
    }

    #[test]
    fn test_ensure_exists_reports_field() {
        let (repo, org, _) = setup();
        let missing = Uuid::new_v4();
        assert_eq!(
            repo.ensure_exists::<Service>(org, "service_id", missing),
            Err(StorageError::InvalidReference {
                field: "service_id",
                kind: "service",
                id: missing,
            })
        );
    }

    fn pole(repo: &Repository, org: Uuid) -> Pole {
        let service = repo
            .insert(Service {
                id: Uuid::new_v4(),
                organization_id: org,
                name: "Finances".to_string(),
                code: "FIN".to_string(),
            })
            .unwrap();
        repo.insert(Pole {
            id: Uuid::new_v4(),
            organization_id: org,
            service_id: service.id,
            name: "Comptabilite".to_string(),
        })
        .unwrap()
    }

    fn allocation(org: Uuid, line: Uuid, pole: Uuid, amount: f64) -> PoleAllocation {
        PoleAllocation {
            id: Uuid::new_v4(),
            organization_id: org,
            budget_line_id: line,
            pole_id: pole,
            amount,
        }
    }

    fn invitation(org: Uuid, owner: Uuid, email: &str, token: &str) -> Invitation {
        Invitation {
            id: Uuid::new_v4(),
            organization_id: org,
            email: email.to_string(),
            role: Role::Viewer,
            token: token.to_string(),
            invited_by: owner,
            created_at: Utc::now(),
            accepted_at: None,
        }
    }

    #[test]
    fn test_allocations_capped_by_budget() {
        let (repo, org, _) = setup();
        let l = repo.insert(line(org, 100.0)).unwrap();
        let p = pole(&repo, org);

        let first = repo.insert_allocation(allocation(org, l.id, p.id, 60.0)).unwrap();
        assert!(matches!(
            repo.insert_allocation(allocation(org, l.id, p.id, 60.0)),
            Err(StorageError::Conflict { field: "amount", .. })
        ));
        assert!(matches!(
            repo.insert_allocation(allocation(org, l.id, Uuid::new_v4(), 10.0)),
            Err(StorageError::InvalidReference { field: "pole_id", .. })
        ));

        assert_eq!(repo.set_allocation_amount(org, first.id, 100.0).unwrap().amount, 100.0);
        assert!(repo.set_allocation_amount(org, first.id, 100.5).is_err());

        assert!(matches!(
            repo.update_budget_line(org, l.id, |l| l.budget_amount = 99.0),
            Err(StorageError::Conflict { field: "budget_amount", .. })
        ));
        assert_eq!(repo.get::<BudgetLine>(org, l.id).unwrap().budget_amount, 100.0);
    }

    #[test]
    fn test_concurrent_allocations_never_exceed_budget() {
        let (repo, org, _) = setup();
        let l = repo.insert(line(org, 100.0)).unwrap();
        let p = pole(&repo, org);

        let (repo, line_id, pole_id) = (&repo, l.id, p.id);
        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..32)
                .map(|_| {
                    scope.spawn(move || {
                        repo.insert_allocation(allocation(org, line_id, pole_id, 60.0))
                            .is_ok()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count()
        });

        assert_eq!(accepted, 1);
        let total: f64 = repo.list::<PoleAllocation>(org).unwrap().iter().map(|a| a.amount).sum();
        assert_eq!(total, 60.0);
    }

    #[test]
    fn test_insert_checked_is_atomic() {
        let (repo, org, _) = setup();
        let unique = |new: &BudgetDomain, existing: &BudgetDomain| {
            if new.name.eq_ignore_ascii_case(&existing.name) {
                Err(StorageError::conflict("name", "taken"))
            } else {
                Ok(())
            }
        };

        let repo_ref = &repo;
        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(move || {
                    let _ = repo_ref.insert_checked(
                        BudgetDomain {
                            id: Uuid::new_v4(),
                            organization_id: org,
                            name: "Informatique".to_string(),
                        },
                        unique,
                    );
                });
            }
        });
        assert_eq!(repo.list::<BudgetDomain>(org).unwrap().len(), 1);

        let other = Uuid::new_v4();
        let domain = BudgetDomain {
            id: Uuid::new_v4(),
            organization_id: other,
            name: "INFORMATIQUE".to_string(),
        };
        assert!(repo.insert_checked(domain, unique).is_ok());
    }

    #[test]
    fn test_update_checked_rejects_clash() {
        let (repo, org, _) = setup();
        let l = repo.insert(line(org, 100.0)).unwrap();
        let yearly = |year| YearlyBudget {
            id: Uuid::new_v4(),
            organization_id: org,
            budget_line_id: l.id,
            year,
            amount: 10.0,
        };
        repo.insert_yearly_budget(yearly(2026)).unwrap();
        let next = repo.insert_yearly_budget(yearly(2027)).unwrap();

        let result = repo.update_checked(
            org,
            next.id,
            |y: &mut YearlyBudget| y.year = 2026,
            |updated: &YearlyBudget, other: &YearlyBudget| {
                if updated.year == other.year {
                    Err(StorageError::conflict("year", "taken"))
                } else {
                    Ok(())
                }
            },
        );
        assert!(matches!(result, Err(StorageError::Conflict { field: "year", .. })));
        assert_eq!(repo.get::<YearlyBudget>(org, next.id).unwrap().year, 2027);
    }

    #[test]
    fn test_invitations_are_not_duplicated() {
        let (repo, org, owner) = setup();

        std::thread::scope(|scope| {
            for i in 0..16 {
                let repo = &repo;
                scope.spawn(move || {
                    let _ = repo.create_invitation(invitation(org, owner, "new@example.org", &format!("tok-{}", i)));
                });
            }
        });
        assert_eq!(repo.list::<Invitation>(org).unwrap().len(), 1);

        assert!(matches!(
            repo.create_invitation(invitation(org, owner, "owner@example.org", "mine")),
            Err(StorageError::Conflict { field: "email", .. })
        ));
    }

    #[test]
    fn test_invitation_accepted_once_under_contention() {
        let (repo, org, owner) = setup();
        repo.create_invitation(invitation(org, owner, "new@example.org", "tok")).unwrap();

        let repo = &repo;
        let accepted = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(move || repo.accept_invitation("tok", "Newcomer").is_ok()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).filter(|ok| *ok).count()
        });

        assert_eq!(accepted, 1);
        assert_eq!(repo.members(org).unwrap().len(), 2);
    }
}
