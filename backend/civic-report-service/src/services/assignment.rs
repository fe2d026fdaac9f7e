use std::sync::Arc;
use uuid::Uuid;

use crate::db::{ReportFilter, ReportRepository, StaffDirectory};
use crate::error::{LifecycleError, Result};
use crate::models::{Actor, Report, Role};

/// Maps reports to the staff members working them
#[derive(Clone)]
pub struct AssignmentRegistry {
    staff: Arc<dyn StaffDirectory>,
    reports: Arc<dyn ReportRepository>,
}

impl AssignmentRegistry {
    pub fn new(staff: Arc<dyn StaffDirectory>, reports: Arc<dyn ReportRepository>) -> Self {
        Self { staff, reports }
    }

    /// Fail with `StaffNotFound` unless `staff_id` is a known staff identity.
    pub async fn ensure_staff(&self, staff_id: Uuid) -> Result<()> {
        if self.staff.is_staff(staff_id).await? {
            Ok(())
        } else {
            Err(LifecycleError::StaffNotFound(staff_id))
        }
    }

    pub async fn register_staff(&self, staff_id: Uuid) -> Result<()> {
        self.staff.register_staff(staff_id).await?;
        tracing::info!(staff_id = %staff_id, "Registered staff member");
        Ok(())
    }

    /// Staff members an admin may assign reports to, in registration order
    pub async fn list_staff(&self, actor: &Actor) -> Result<Vec<Uuid>> {
        if actor.role != Role::Admin {
            return Err(LifecycleError::WrongActor {
                actor_id: actor.id,
                role: actor.role,
                action: "list staff members",
            });
        }
        self.staff.list_staff().await
    }

    /// Reports assigned to `staff_id`, oldest first with ties broken by id
    pub async fn tasks_for(&self, staff_id: Uuid) -> Result<Vec<Report>> {
        self.reports
            .list_reports(ReportFilter::AssignedTo(staff_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn test_unknown_staff_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let registry = AssignmentRegistry::new(store.clone(), store);
        let staff = Uuid::new_v4();

        assert!(matches!(
            registry.ensure_staff(staff).await,
            Err(LifecycleError::StaffNotFound(id)) if id == staff
        ));

        registry.register_staff(staff).await.unwrap();
        registry.ensure_staff(staff).await.unwrap();
        assert!(registry.tasks_for(staff).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_only_admins_list_staff() {
        let staff = Uuid::new_v4();
        let store = Arc::new(MemoryStore::new().with_staff([staff]).await);
        let registry = AssignmentRegistry::new(store.clone(), store);

        let admin = Actor::admin(Uuid::new_v4());
        assert_eq!(registry.list_staff(&admin).await.unwrap(), vec![staff]);

        let citizen = Actor::citizen(Uuid::new_v4());
        assert!(matches!(
            registry.list_staff(&citizen).await,
            Err(LifecycleError::WrongActor { role: Role::Citizen, .. })
        ));
    }
}
