//! The fixed structural tables the engine treats specially.

/// Table registry.
pub const TABLES_TABLE: &str = "_grist_Tables";
/// Column registry.
pub const COLUMNS_TABLE: &str = "_grist_Tables_column";
/// View registry.
pub const VIEWS_TABLE: &str = "_grist_Views";
/// View section registry.
pub const SECTIONS_TABLE: &str = "_grist_Views_section";
/// View section field registry.
pub const FIELDS_TABLE: &str = "_grist_Views_section_field";
/// Access rule resources.
pub const ACL_RESOURCES_TABLE: &str = "_grist_ACLResources";
/// Access rules.
pub const ACL_RULES_TABLE: &str = "_grist_ACLRules";

/// Column preserved unconditionally through column pruning and censorship.
pub const MANUAL_SORT: &str = "manualSort";

pub const STRUCTURAL_TABLES: &[&str] = &[
    TABLES_TABLE,
    COLUMNS_TABLE,
    VIEWS_TABLE,
    SECTIONS_TABLE,
    FIELDS_TABLE,
    ACL_RESOURCES_TABLE,
    ACL_RULES_TABLE,
];

pub fn is_structural_table(table_id: &str) -> bool {
    STRUCTURAL_TABLES.contains(&table_id)
}

pub fn is_acl_table(table_id: &str) -> bool {
    table_id == ACL_RESOURCES_TABLE || table_id == ACL_RULES_TABLE
}

/// Structural tables hold document layout; any metadata table id shares the
/// reserved prefix.
pub fn is_meta_table(table_id: &str) -> bool {
    table_id.starts_with("_grist_")
}
