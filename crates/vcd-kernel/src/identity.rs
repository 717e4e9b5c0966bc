//! Turning host-supplied IDs and names into remote objects.

use vcd_sdk::{Entity, EntityKind, Query, Urn};

use crate::bag::ResourceData;
use crate::error::{KernelError, KernelResult};
use crate::import::CandidateTable;
use crate::lock::LockKey;
use crate::session::Session;

/// Name of the provider organization.
pub const SYSTEM_ORG: &str = "System";

/// Scope that owns an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentContext {
    Org { org: String, id: Urn },
    Vdc { org: String, vdc: Urn },
    VdcGroup { org: String, group: Urn },
    NsxtManager { manager: Urn },
    Provider,
}

impl ParentContext {
    pub fn org(&self) -> Option<&str> {
        match self {
            ParentContext::Org { org, .. }
            | ParentContext::Vdc { org, .. }
            | ParentContext::VdcGroup { org, .. } => Some(org),
            ParentContext::NsxtManager { .. } | ParentContext::Provider => None,
        }
    }

    pub fn owner_urn(&self) -> Option<&Urn> {
        match self {
            ParentContext::Org { id, .. } => Some(id),
            ParentContext::Vdc { vdc, .. } => Some(vdc),
            ParentContext::VdcGroup { group, .. } => Some(group),
            ParentContext::NsxtManager { manager } => Some(manager),
            ParentContext::Provider => None,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self, ParentContext::VdcGroup { .. })
    }
}

/// A VDC or a VDC group, whichever owns the object.
///
/// Callers use the shared operations below and never branch on the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum VdcOrGroup {
    Vdc(Entity),
    Group(Entity),
}

impl VdcOrGroup {
    pub fn from_entity(entity: Entity) -> KernelResult<Self> {
        match entity.kind {
            EntityKind::Vdc => Ok(VdcOrGroup::Vdc(entity)),
            EntityKind::VdcGroup => Ok(VdcOrGroup::Group(entity)),
            other => Err(KernelError::validation(format!(
                "{} is a {other}, expected a VDC or VDC group",
                entity.id
            ))),
        }
    }

    pub fn entity(&self) -> &Entity {
        match self {
            VdcOrGroup::Vdc(e) | VdcOrGroup::Group(e) => e,
        }
    }

    pub fn id(&self) -> &Urn {
        &self.entity().id
    }

    pub fn name(&self) -> &str {
        &self.entity().name
    }

    pub fn is_group(&self) -> bool {
        matches!(self, VdcOrGroup::Group(_))
    }

    pub fn is_nsxt(&self) -> bool {
        match self {
            VdcOrGroup::Vdc(vdc) => vdc.bool_field("isNsxt"),
            VdcOrGroup::Group(group) => group.str_field("networkProviderType") == Some("NSX_T"),
        }
    }

    pub fn context(&self, org: &str) -> ParentContext {
        match self {
            VdcOrGroup::Vdc(vdc) => ParentContext::Vdc {
                org: org.to_string(),
                vdc: vdc.id.clone(),
            },
            VdcOrGroup::Group(group) => ParentContext::VdcGroup {
                org: org.to_string(),
                group: group.id.clone(),
            },
        }
    }

    pub async fn edge_gateway_by_name(&self, session: &Session, name: &str) -> KernelResult<Entity> {
        child_by_name(session, self.id(), EntityKind::EdgeGateway, name).await
    }

    pub async fn network_by_name(&self, session: &Session, name: &str) -> KernelResult<Entity> {
        child_by_name(session, self.id(), EntityKind::OrgVdcNetwork, name).await
    }

    pub async fn app_port_profile_by_name(&self, session: &Session, name: &str) -> KernelResult<Entity> {
        child_by_name(session, self.id(), EntityKind::AppPortProfile, name).await
    }

    pub async fn importable_switch_by_name(&self, session: &Session, name: &str) -> KernelResult<Entity> {
        child_by_name(session, self.id(), EntityKind::ImportableSwitch, name).await
    }
}

/// Unique child of `parent` with `name`; more than one match is an error
/// listing the candidates.
pub async fn child_by_name(
    session: &Session,
    parent: &Urn,
    kind: EntityKind,
    name: &str,
) -> KernelResult<Entity> {
    let query = Query::of(kind).under(parent).named(name);
    let mut found = session.client.query(&session.ctx, &query).await?;
    match found.len() {
        0 => Err(KernelError::not_found(format!("{kind} '{name}' in {parent}"))),
        1 => Ok(found.remove(0)),
        _ => Err(candidates(&found).into_error(&kind.to_string(), name)),
    }
}

fn candidates(found: &[Entity]) -> CandidateTable {
    let mut table = CandidateTable::new(&["ID", "Name"]);
    for entity in found {
        table.row(vec![entity.id.to_string(), entity.name.clone()]);
    }
    table
}

/// Rules a descriptor imposes on its owner.
#[derive(Debug, Clone, Copy)]
pub struct OwnerRules {
    pub allow_group: bool,
    pub require_nsxt: bool,
}

impl Default for OwnerRules {
    fn default() -> Self {
        Self {
            allow_group: true,
            require_nsxt: true,
        }
    }
}

/// A vApp together with the scope that names its lock.
#[derive(Debug, Clone)]
pub struct VAppScope {
    pub org: String,
    pub vdc: Entity,
    pub vapp: Entity,
}

impl VAppScope {
    pub fn lock_key(&self) -> LockKey {
        LockKey::vapp(&self.org, &self.vdc.name, &self.vapp.name)
    }

    pub fn context(&self) -> ParentContext {
        ParentContext::Vdc {
            org: self.org.clone(),
            vdc: self.vdc.id.clone(),
        }
    }
}

pub struct IdentityResolver<'a> {
    session: &'a Session,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    async fn unique(&self, query: Query, what: &str) -> KernelResult<Entity> {
        let name = query.name.clone().unwrap_or_default();
        let mut found = self.session.client.query(&self.session.ctx, &query).await?;
        match found.len() {
            0 => Err(KernelError::not_found(format!("{what} '{name}'"))),
            1 => Ok(found.remove(0)),
            _ => Err(candidates(&found).into_error(what, &name)),
        }
    }

    /// Org named in the bag, or the provider default.
    pub fn org_name(&self, bag: &ResourceData) -> KernelResult<String> {
        bag.get_str("org")
            .map(str::to_string)
            .or_else(|| self.session.config.default_org.clone())
            .ok_or_else(|| {
                KernelError::validation("`org` is not set and the provider has no default org")
            })
    }

    pub async fn org(&self, bag: &ResourceData) -> KernelResult<Entity> {
        let name = self.org_name(bag)?;
        self.org_by_name(&name).await
    }

    pub async fn org_by_name(&self, name: &str) -> KernelResult<Entity> {
        self.unique(Query::of(EntityKind::Org).named(name), "org").await
    }

    pub async fn vdc_by_name(&self, org: &Entity, name: &str) -> KernelResult<Entity> {
        self.unique(Query::of(EntityKind::Vdc).under(&org.id).named(name), "VDC")
            .await
    }

    pub async fn vdc_group_by_name(&self, org: &Entity, name: &str) -> KernelResult<Entity> {
        self.unique(
            Query::of(EntityKind::VdcGroup).under(&org.id).named(name),
            "VDC group",
        )
        .await
    }

    /// Try a VDC first and fall back to a VDC group on not found.
    pub async fn lookup_vdc_or_group(&self, org: &Entity, name: &str) -> KernelResult<VdcOrGroup> {
        match self.vdc_by_name(org, name).await {
            Ok(vdc) => Ok(VdcOrGroup::Vdc(vdc)),
            Err(err) if err.is_not_found() => match self.vdc_group_by_name(org, name).await {
                Ok(group) => Ok(VdcOrGroup::Group(group)),
                Err(err) if err.is_not_found() => Err(KernelError::not_found(format!(
                    "VDC or VDC group '{name}' in org '{}'",
                    org.name
                ))),
                Err(err) => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    /// Owner of an object that may live in a VDC or a VDC group.
    ///
    /// `owner_id` wins over `vdc`, which wins over the provider default VDC.
    pub async fn resolve_owner(
        &self,
        bag: &ResourceData,
        rules: OwnerRules,
    ) -> KernelResult<(ParentContext, VdcOrGroup)> {
        let org = self.org(bag).await?;
        let owner = if let Some(owner_id) = bag.get_str("owner_id") {
            let urn = self.session.urn(owner_id)?;
            let owner = VdcOrGroup::from_entity(self.session.fetch(&urn).await?)?;
            if owner.entity().parent.as_ref() != Some(&org.id) {
                return Err(KernelError::validation(format!(
                    "owner_id {urn} does not belong to org '{}'",
                    org.name
                )));
            }
            owner
        } else {
            let vdc_name = bag
                .get_str("vdc")
                .map(str::to_string)
                .or_else(|| self.session.config.default_vdc.clone())
                .ok_or_else(|| {
                    KernelError::validation(
                        "one of `owner_id` or `vdc` must be set when the provider has no default VDC",
                    )
                })?;
            VdcOrGroup::Vdc(self.vdc_by_name(&org, &vdc_name).await?)
        };
        if owner.is_group() && !rules.allow_group {
            return Err(KernelError::validation(format!(
                "VDC group '{}' cannot own this resource, use a VDC",
                owner.name()
            )));
        }
        if rules.require_nsxt && !owner.is_nsxt() {
            return Err(KernelError::validation(format!(
                "'{}' is not backed by NSX-T",
                owner.name()
            )));
        }
        Ok((owner.context(&org.name), owner))
    }

    /// Edge gateway named by URN in `attr`, plus the scope that owns it.
    pub async fn edge_gateway(
        &self,
        bag: &ResourceData,
        attr: &str,
    ) -> KernelResult<(ParentContext, Entity)> {
        let urn = self.session.urn(bag.require_str(attr)?)?;
        self.edge_gateway_by_id(&urn).await
    }

    pub async fn edge_gateway_by_id(&self, urn: &Urn) -> KernelResult<(ParentContext, Entity)> {
        let edge = self.session.fetch(urn).await?;
        if edge.kind != EntityKind::EdgeGateway {
            return Err(KernelError::validation(format!(
                "{urn} is not an edge gateway"
            )));
        }
        let owner_id = edge
            .parent
            .clone()
            .ok_or_else(|| KernelError::payload(format!("edge gateway {urn} has no owner")))?;
        let owner = VdcOrGroup::from_entity(self.session.fetch(&owner_id).await?)?;
        let org_name = match &owner.entity().parent {
            Some(org_id) => self.session.fetch(org_id).await?.name,
            None => String::new(),
        };
        Ok((owner.context(&org_name), edge))
    }

    pub async fn vapp(&self, bag: &ResourceData, attr: &str) -> KernelResult<VAppScope> {
        let org = self.org(bag).await?;
        let vdc_name = bag
            .get_str("vdc")
            .map(str::to_string)
            .or_else(|| self.session.config.default_vdc.clone())
            .ok_or_else(|| {
                KernelError::validation("`vdc` is not set and the provider has no default VDC")
            })?;
        let vdc = self.vdc_by_name(&org, &vdc_name).await?;
        let name = bag.require_str(attr)?;
        let vapp = self
            .unique(Query::of(EntityKind::VApp).under(&vdc.id).named(name), "vApp")
            .await?;
        Ok(VAppScope {
            org: org.name,
            vdc,
            vapp,
        })
    }

    pub async fn nsxt_manager_by_name(&self, name: &str) -> KernelResult<Entity> {
        self.unique(Query::of(EntityKind::NsxtManager).named(name), "NSX-T manager")
            .await
    }
}

/// Provider-scoped objects must be managed from the System org.
pub fn check_scope(scope: &str, org: &str) -> KernelResult<()> {
    if scope.eq_ignore_ascii_case("PROVIDER") && org != SYSTEM_ORG {
        return Err(KernelError::validation(format!(
            "scope PROVIDER requires org '{SYSTEM_ORG}', got '{org}'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn entity(kind: EntityKind, body: serde_json::Value) -> Entity {
        Entity {
            id: Urn::new(kind.urn_type(), "1"),
            kind,
            name: "x".into(),
            parent: None,
            etag: "1".into(),
            body,
        }
    }

    #[test]
    fn nsxt_flag_comes_from_either_variant() {
        let vdc = VdcOrGroup::from_entity(entity(EntityKind::Vdc, json!({"isNsxt": true}))).unwrap();
        let group = VdcOrGroup::from_entity(entity(
            EntityKind::VdcGroup,
            json!({"networkProviderType": "NSX_T"}),
        ))
        .unwrap();
        let legacy = VdcOrGroup::from_entity(entity(EntityKind::Vdc, json!({}))).unwrap();
        assert!(vdc.is_nsxt() && group.is_nsxt() && !legacy.is_nsxt());
        assert!(group.context("o").is_group());
        assert!(VdcOrGroup::from_entity(entity(EntityKind::Org, json!({}))).is_err());
    }

    #[test]
    fn provider_scope_needs_system_org() {
        assert!(check_scope("PROVIDER", "System").is_ok());
        assert!(check_scope("TENANT", "acme").is_ok());
        let err = check_scope("PROVIDER", "acme").unwrap_err();
        assert!(err.to_string().contains("System"));
    }
}
