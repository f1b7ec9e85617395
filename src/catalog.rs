//! Entity catalog: logical entity names mapped to OData resource URLs.
//!
//! Two sets share one table: every entry is readable through
//! `query_s4hana`, and entries flagged `creatable` are accepted by
//! `create_s4hana_entity`. Lookups are case-insensitive.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// The entity whose creation is gated behind human approval.
pub const PROTECTED_ENTITY: &str = "salesorders";
/// OData entity set behind the protected entity. Any descriptor pointing at
/// it is protected, whatever its name.
pub const PROTECTED_SET: &str = "A_SalesOrder";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityDescriptor {
    pub name: String,
    pub resource_url: String,
    pub creatable: bool,
    /// Creates against this descriptor require an approved request.
    pub protected: bool,
}

/// Catalog file / built-in table layout.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogSpec {
    #[serde(default)]
    pub base_url: Option<String>,
    pub services: Vec<ServiceSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    /// Service root relative to the base URL, e.g. `/sap/opu/odata/sap/API_SALES_ORDER_SRV`.
    pub path: String,
    pub entities: Vec<EntitySpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntitySpec {
    pub name: String,
    /// OData entity set, e.g. `A_SalesOrder`.
    pub set: String,
    #[serde(default)]
    pub creatable: bool,
}

const BP_SERVICE: &str = "/sap/opu/odata/sap/API_BUSINESS_PARTNER";
const SO_SERVICE: &str = "/sap/opu/odata/sap/API_SALES_ORDER_SRV";

fn builtin_spec() -> CatalogSpec {
    let e = |name: &str, set: &str, creatable: bool| EntitySpec {
        name: name.to_string(),
        set: set.to_string(),
        creatable,
    };
    CatalogSpec {
        base_url: None,
        services: vec![
            ServiceSpec {
                path: BP_SERVICE.to_string(),
                entities: vec![
                    e("businesspartners", "A_BusinessPartner", false),
                    e("businesspartneraddresses", "A_BusinessPartnerAddress", true),
                    e("businesspartnercontacts", "A_BusinessPartnerContact", true),
                    e("customers", "A_Customer", false),
                    e("suppliers", "A_Supplier", false),
                ],
            },
            ServiceSpec {
                path: SO_SERVICE.to_string(),
                entities: vec![
                    e("salesorders", "A_SalesOrder", true),
                    e("salesorderitems", "A_SalesOrderItem", true),
                    e("salesorderheaderpartners", "A_SalesOrderHeaderPartner", true),
                    e("salesorderitempartners", "A_SalesOrderItemPartner", true),
                    e("salesorderschedulelines", "A_SalesOrderScheduleLine", true),
                    e("salesordertexts", "A_SalesOrderText", false),
                    e("salesorderitemtexts", "A_SalesOrderItemText", false),
                ],
            },
        ],
    }
}

#[derive(Debug, Clone)]
pub struct EntityCatalog {
    // keyed by lowercase name; BTreeMap keeps tool enums stable
    entries: BTreeMap<String, EntityDescriptor>,
}

impl EntityCatalog {
    /// Built-in S/4HANA catalog rooted at `base_url`.
    pub fn builtin(base_url: &str) -> Self {
        // the built-in table has no duplicates
        Self::from_spec(builtin_spec(), base_url).unwrap_or_else(|_| Self {
            entries: BTreeMap::new(),
        })
    }

    /// Load the catalog from `path` when given, otherwise use the built-in table.
    pub fn load(path: Option<&str>, base_url: &str) -> Result<Self> {
        match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read catalog file {}", p))?;
                let spec: CatalogSpec = serde_yaml::from_str(&raw)
                    .with_context(|| format!("failed to parse catalog file {}", p))?;
                tracing::info!(path = %p, "loaded entity catalog from file");
                Self::from_spec(spec, base_url)
            }
            None => Ok(Self::builtin(base_url)),
        }
    }

    pub fn from_spec(spec: CatalogSpec, base_url: &str) -> Result<Self> {
        let base = spec
            .base_url
            .as_deref()
            .unwrap_or(base_url)
            .trim_end_matches('/')
            .to_string();

        let mut entries = BTreeMap::new();
        for service in &spec.services {
            let service_path = service.path.trim_end_matches('/');
            for entity in &service.entities {
                let key = entity.name.to_lowercase();
                let descriptor = EntityDescriptor {
                    name: key.clone(),
                    resource_url: format!("{}{}/{}", base, service_path, entity.set),
                    creatable: entity.creatable,
                    protected: entity.set == PROTECTED_SET,
                };
                if entries.insert(key.clone(), descriptor).is_some() {
                    anyhow::bail!("duplicate entity name in catalog: {}", key);
                }
            }
        }
        check_protected(&entries)?;
        Ok(Self { entries })
    }

    /// Case-insensitive lookup of a readable entity.
    pub fn resolve(&self, name: &str) -> Option<&EntityDescriptor> {
        self.entries.get(&name.trim().to_lowercase())
    }

    /// Case-insensitive lookup restricted to the creatable set.
    pub fn resolve_creatable(&self, name: &str) -> Option<&EntityDescriptor> {
        self.resolve(name).filter(|d| d.creatable)
    }

    pub fn is_creatable(&self, name: &str) -> bool {
        self.resolve_creatable(name).is_some()
    }

    pub fn is_protected(name: &str) -> bool {
        name.trim().eq_ignore_ascii_case(PROTECTED_ENTITY)
    }

    /// True when creating `name` must go through approval: either the
    /// protected name itself or any entry resolving to the protected set.
    pub fn requires_approval(&self, name: &str) -> bool {
        Self::is_protected(name) || self.resolve(name).map_or(false, |d| d.protected)
    }

    pub fn readable_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn creatable_names(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|d| d.creatable)
            .map(|d| d.name.clone())
            .collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.entries.values()
    }
}

/// The protected set must be reachable under exactly one name,
/// `salesorders`, and that entry must be creatable.
fn check_protected(entries: &BTreeMap<String, EntityDescriptor>) -> Result<()> {
    if let Some(alias) = entries
        .values()
        .find(|d| d.protected && d.name != PROTECTED_ENTITY)
    {
        anyhow::bail!(
            "catalog entry '{}' points at {}; only '{}' may name the protected set",
            alias.name,
            PROTECTED_SET,
            PROTECTED_ENTITY
        );
    }
    match entries.get(PROTECTED_ENTITY) {
        Some(d) if d.protected && d.creatable => Ok(()),
        Some(_) => anyhow::bail!(
            "catalog entry '{}' must map to {} and be creatable",
            PROTECTED_ENTITY,
            PROTECTED_SET
        ),
        None => anyhow::bail!("catalog is missing the '{}' entity", PROTECTED_ENTITY),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://sap.example:54000";

    #[test]
    fn test_resolve_is_case_insensitive() {
        let catalog = EntityCatalog::builtin(BASE);
        let d = catalog.resolve("SalesOrders").unwrap();
        assert_eq!(d.name, "salesorders");
        assert_eq!(
            d.resource_url,
            "http://sap.example:54000/sap/opu/odata/sap/API_SALES_ORDER_SRV/A_SalesOrder"
        );
        assert!(catalog.resolve("  CUSTOMERS ").is_some());
    }

    #[test]
    fn test_unknown_entity_is_not_found() {
        let catalog = EntityCatalog::builtin(BASE);
        assert!(catalog.resolve("invoices").is_none());
        assert!(!catalog.is_creatable("invoices"));
    }

    #[test]
    fn test_creatable_set_is_smaller() {
        let catalog = EntityCatalog::builtin(BASE);
        assert_eq!(catalog.readable_names().len(), 12);
        assert_eq!(catalog.creatable_names().len(), 7);
        assert!(catalog.is_creatable("salesorderitems"));
        assert!(!catalog.is_creatable("customers"));
        assert!(catalog.resolve("customers").is_some());
    }

    #[test]
    fn test_protected_entity_match() {
        assert!(EntityCatalog::is_protected("SalesOrders"));
        assert!(!EntityCatalog::is_protected("salesorderitems"));
    }

    #[test]
    fn test_descriptor_carries_protection() {
        let catalog = EntityCatalog::builtin(BASE);
        assert!(catalog.resolve("salesorders").unwrap().protected);
        assert!(!catalog.resolve("salesorderitems").unwrap().protected);
        assert!(catalog.requires_approval("SalesOrders"));
        assert!(!catalog.requires_approval("businesspartneraddresses"));
    }

    #[test]
    fn test_alias_of_protected_set_is_rejected() {
        let yaml = r#"
services:
  - path: /sap/opu/odata/sap/API_SALES_ORDER_SRV
    entities:
      - { name: salesorders, set: A_SalesOrder, creatable: true }
      - { name: orders, set: A_SalesOrder, creatable: true }
"#;
        let spec: CatalogSpec = serde_yaml::from_str(yaml).unwrap();
        let err = EntityCatalog::from_spec(spec, BASE).unwrap_err();
        assert!(err.to_string().contains("'orders'"));
    }

    #[test]
    fn test_catalog_without_creatable_sales_orders_is_rejected() {
        let missing = r#"
services:
  - path: /svc
    entities:
      - { name: orders, set: A_SalesOrderItem, creatable: true }
"#;
        let spec: CatalogSpec = serde_yaml::from_str(missing).unwrap();
        assert!(EntityCatalog::from_spec(spec, BASE).is_err());

        let read_only = r#"
services:
  - path: /svc
    entities:
      - { name: salesorders, set: A_SalesOrder }
"#;
        let spec: CatalogSpec = serde_yaml::from_str(read_only).unwrap();
        assert!(EntityCatalog::from_spec(spec, BASE).is_err());
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let yaml = r#"
services:
  - path: /sap/opu/odata/sap/API_SALES_ORDER_SRV
    entities:
      - { name: salesorders, set: A_SalesOrder, creatable: true }
      - { name: SalesOrders, set: A_SalesOrderItem }
"#;
        let spec: CatalogSpec = serde_yaml::from_str(yaml).unwrap();
        let err = EntityCatalog::from_spec(spec, BASE).unwrap_err();
        assert!(err.to_string().contains("duplicate entity name"));
    }

    #[test]
    fn test_spec_base_url_overrides_default() {
        let yaml = r#"
base_url: https://s4.internal/
services:
  - path: /svc/
    entities:
      - { name: things, set: A_Thing }
      - { name: salesorders, set: A_SalesOrder, creatable: true }
"#;
        let spec: CatalogSpec = serde_yaml::from_str(yaml).unwrap();
        let catalog = EntityCatalog::from_spec(spec, BASE).unwrap();
        assert_eq!(
            catalog.resolve("things").unwrap().resource_url,
            "https://s4.internal/svc/A_Thing"
        );
        assert!(!catalog.is_creatable("things"));
    }
}
