//! Configuration types
//!
//! Settings are read from a flat property map whose keys are the literal
//! property names below. They are part of the persisted configuration
//! contract and must not be renamed.

use crate::{BulkIdError, BulkIdResult, ConfigError, DdlTransactionality, StrategyKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================================================
// PROPERTY NAMES
// ============================================================================

pub const GLOBAL_TEMPORARY_CREATE_TABLES: &str =
    "hibernate.hql.bulk_id_strategy.global_temporary.create_tables";
pub const GLOBAL_TEMPORARY_DROP_TABLES: &str =
    "hibernate.hql.bulk_id_strategy.global_temporary.drop_tables";
pub const PERSISTENT_CREATE_TABLES: &str = "hibernate.hql.bulk_id_strategy.persistent.create_tables";
pub const PERSISTENT_DROP_TABLES: &str = "hibernate.hql.bulk_id_strategy.persistent.drop_tables";
pub const PERSISTENT_SCHEMA: &str = "hibernate.hql.bulk_id_strategy.persistent.schema";
pub const PERSISTENT_CATALOG: &str = "hibernate.hql.bulk_id_strategy.persistent.catalog";
pub const DDL_TRANSACTION_HANDLING: &str = "hibernate.hql.bulk_id_strategy.ddl_transaction_handling";
pub const DEFAULT_SCHEMA: &str = "hibernate.default_schema";
pub const DEFAULT_CATALOG: &str = "hibernate.default_catalog";
pub const SHOW_SQL: &str = "hibernate.show_sql";

/// Environment variable name for a property: upper-cased, dots become underscores.
pub fn env_var_name(property: &str) -> String {
    property.replace('.', "_").to_ascii_uppercase()
}

// ============================================================================
// SETTINGS
// ============================================================================

/// Table provisioning switches for strategies that create tables at prepare time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProvisioning {
    /// Create id tables when the strategy is prepared
    pub create_tables: bool,
    /// Drop the created id tables when the strategy is released
    pub drop_tables: bool,
}

impl Default for TableProvisioning {
    fn default() -> Self {
        Self {
            create_tables: true,
            drop_tables: false,
        }
    }
}

/// Bulk id strategy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkIdSettings {
    pub global_temporary: TableProvisioning,
    pub persistent: TableProvisioning,
    /// Schema for persistent id tables, overriding the factory default
    pub persistent_schema: Option<String>,
    /// Catalog for persistent id tables, overriding the factory default
    pub persistent_catalog: Option<String>,
    /// Global DDL transaction handling; `None` means unset
    pub ddl_transaction_handling: Option<DdlTransactionality>,
}

impl BulkIdSettings {
    /// Provisioning switches for a strategy kind. Local temporary tables
    /// are created and dropped around every use, so they are never
    /// provisioned at prepare time.
    pub fn provisioning(&self, kind: StrategyKind) -> TableProvisioning {
        match kind {
            StrategyKind::LocalTemporary => TableProvisioning {
                create_tables: false,
                drop_tables: false,
            },
            StrategyKind::GlobalTemporary => self.global_temporary,
            StrategyKind::Persistent => self.persistent,
        }
    }
}

/// Session factory level options consumed by id-table strategies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFactoryOptions {
    pub default_schema: Option<String>,
    pub default_catalog: Option<String>,
    /// Echo SQL at info level instead of debug
    pub show_sql: bool,
    pub bulk_id: BulkIdSettings,
}

impl SessionFactoryOptions {
    /// Build options from a property map keyed by property name.
    pub fn from_properties(properties: &HashMap<String, String>) -> BulkIdResult<Self> {
        Self::from_lookup(|name| properties.get(name).cloned())
    }

    /// Build options from environment variables.
    ///
    /// Each property is read from the variable named by [`env_var_name`],
    /// e.g. `HIBERNATE_HQL_BULK_ID_STRATEGY_PERSISTENT_SCHEMA`.
    pub fn from_env() -> BulkIdResult<Self> {
        Self::from_lookup(|name| std::env::var(env_var_name(name)).ok())
    }

    /// Build options from any property source.
    pub fn from_lookup<F>(lookup: F) -> BulkIdResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TableProvisioning::default();

        let options = Self {
            default_schema: lookup(DEFAULT_SCHEMA),
            default_catalog: lookup(DEFAULT_CATALOG),
            show_sql: parse_bool(&lookup, SHOW_SQL)?.unwrap_or(false),
            bulk_id: BulkIdSettings {
                global_temporary: TableProvisioning {
                    create_tables: parse_bool(&lookup, GLOBAL_TEMPORARY_CREATE_TABLES)?
                        .unwrap_or(defaults.create_tables),
                    drop_tables: parse_bool(&lookup, GLOBAL_TEMPORARY_DROP_TABLES)?
                        .unwrap_or(defaults.drop_tables),
                },
                persistent: TableProvisioning {
                    create_tables: parse_bool(&lookup, PERSISTENT_CREATE_TABLES)?
                        .unwrap_or(defaults.create_tables),
                    drop_tables: parse_bool(&lookup, PERSISTENT_DROP_TABLES)?
                        .unwrap_or(defaults.drop_tables),
                },
                persistent_schema: lookup(PERSISTENT_SCHEMA),
                persistent_catalog: lookup(PERSISTENT_CATALOG),
                ddl_transaction_handling: parse_ddl_transactionality(&lookup)?,
            },
        };

        options.validate()?;
        Ok(options)
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - schema and catalog names, when given, are not blank
    pub fn validate(&self) -> BulkIdResult<()> {
        let named = [
            (DEFAULT_SCHEMA, &self.default_schema),
            (DEFAULT_CATALOG, &self.default_catalog),
            (PERSISTENT_SCHEMA, &self.bulk_id.persistent_schema),
            (PERSISTENT_CATALOG, &self.bulk_id.persistent_catalog),
        ];

        for (field, value) in named {
            if let Some(value) = value {
                if value.trim().is_empty() {
                    return Err(BulkIdError::Config(ConfigError::InvalidValue {
                        field: field.to_string(),
                        value: value.clone(),
                        reason: "must not be blank".to_string(),
                    }));
                }
            }
        }

        Ok(())
    }

    /// Schema persistent id tables are created in.
    pub fn persistent_schema(&self) -> Option<String> {
        self.bulk_id
            .persistent_schema
            .clone()
            .or_else(|| self.default_schema.clone())
    }

    /// Catalog persistent id tables are created in.
    pub fn persistent_catalog(&self) -> Option<String> {
        self.bulk_id
            .persistent_catalog
            .clone()
            .or_else(|| self.default_catalog.clone())
    }
}

fn parse_bool<F>(lookup: &F, field: &str) -> BulkIdResult<Option<bool>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(field) else {
        return Ok(None);
    };

    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(Some(true)),
        "false" => Ok(Some(false)),
        _ => Err(BulkIdError::Config(ConfigError::InvalidValue {
            field: field.to_string(),
            value: raw,
            reason: "expected true or false".to_string(),
        })),
    }
}

fn parse_ddl_transactionality<F>(lookup: &F) -> BulkIdResult<Option<DdlTransactionality>>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(DDL_TRANSACTION_HANDLING) else {
        return Ok(None);
    };

    // "none" leaves the setting unset so strategy defaults still apply
    match DdlTransactionality::from_config_str(&raw) {
        Ok(DdlTransactionality::None) => Ok(None),
        Ok(handling) => Ok(Some(handling)),
        Err(e) => Err(BulkIdError::Config(ConfigError::InvalidValue {
            field: DDL_TRANSACTION_HANDLING.to_string(),
            value: raw,
            reason: e.to_string(),
        })),
    }
}

// =============================================================================
// TESTS
// =============================================================================
