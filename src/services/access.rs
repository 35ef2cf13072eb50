use serde::Serialize;

use crate::{error::AppError, middleware::tenant::TenantContext, models::business::Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Permission {
    #[serde(rename = "leads.read")]
    LeadsRead,
    #[serde(rename = "leads.write")]
    LeadsWrite,
    #[serde(rename = "marketing.write")]
    MarketingWrite,
    #[serde(rename = "kpis.write")]
    KpisWrite,
    #[serde(rename = "pipeline.manage")]
    PipelineManage,
    #[serde(rename = "calls.analyze")]
    CallsAnalyze,
    #[serde(rename = "team.manage")]
    TeamManage,
    #[serde(rename = "billing.manage")]
    BillingManage,
    #[serde(rename = "chatbot.manage")]
    ChatbotManage,
}

use Permission::*;

const ALL: &[Permission] = &[
    LeadsRead,
    LeadsWrite,
    MarketingWrite,
    KpisWrite,
    PipelineManage,
    CallsAnalyze,
    TeamManage,
    BillingManage,
    ChatbotManage,
];

/// Role → capabilities. The only place roles are interpreted.
const CAPABILITIES: &[(Role, &[Permission])] = &[
    (Role::Owner, ALL),
    (Role::Admin, ALL),
    (
        Role::Manager,
        &[LeadsRead, LeadsWrite, MarketingWrite, KpisWrite, PipelineManage, CallsAnalyze, ChatbotManage],
    ),
    (Role::Operator, &[LeadsRead, LeadsWrite, CallsAnalyze, ChatbotManage]),
    (Role::Member, &[LeadsRead]),
];

pub fn permissions(role: Role) -> &'static [Permission] {
    CAPABILITIES
        .iter()
        .find(|(r, _)| *r == role)
        .map(|(_, perms)| *perms)
        .unwrap_or(&[])
}

pub fn allows(role: Role, permission: Permission) -> bool {
    permissions(role).contains(&permission)
}

/// Fails unless the caller may perform `permission` in the active business.
pub fn authorize(ctx: &TenantContext, permission: Permission) -> Result<(), AppError> {
    ctx.require_business()?;
    if ctx.user.is_super_admin {
        return Ok(());
    }
    match ctx.role {
        Some(role) if allows(role, permission) => Ok(()),
        _ => Err(AppError::Forbidden("You do not have permission for this action".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_and_admin_hold_everything() {
        for perm in ALL {
            assert!(allows(Role::Owner, *perm));
            assert!(allows(Role::Admin, *perm));
        }
    }

    #[test]
    fn members_only_read() {
        assert!(allows(Role::Member, LeadsRead));
        assert!(!allows(Role::Member, LeadsWrite));
        assert!(!allows(Role::Member, CallsAnalyze));
    }

    #[test]
    fn billing_and_team_are_admin_only() {
        for role in [Role::Manager, Role::Operator, Role::Member] {
            assert!(!allows(role, BillingManage));
            assert!(!allows(role, TeamManage));
        }
        assert!(allows(Role::Operator, ChatbotManage));
        assert!(!allows(Role::Operator, MarketingWrite));
    }
}
