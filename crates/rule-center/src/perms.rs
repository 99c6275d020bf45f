//! The five-axis ternary permission algebra and its text codec.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::RuleError;

/// The five permission axes a rule can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AccessAxis {
    Read,
    Update,
    Create,
    Delete,
    SchemaEdit,
}

impl AccessAxis {
    pub const ALL: [AccessAxis; 5] = [
        AccessAxis::Read,
        AccessAxis::Update,
        AccessAxis::Create,
        AccessAxis::Delete,
        AccessAxis::SchemaEdit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessAxis::Read => "read",
            AccessAxis::Update => "update",
            AccessAxis::Create => "create",
            AccessAxis::Delete => "delete",
            AccessAxis::SchemaEdit => "schemaEdit",
        }
    }

    fn from_short(c: char) -> Option<AccessAxis> {
        match c {
            'R' => Some(AccessAxis::Read),
            'U' => Some(AccessAxis::Update),
            'C' => Some(AccessAxis::Create),
            'D' => Some(AccessAxis::Delete),
            'S' => Some(AccessAxis::SchemaEdit),
            _ => None,
        }
    }
}

/// An explicit delta bit carried by one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermBit {
    Allow,
    Deny,
}

/// A resolved verdict for one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermValue {
    Allow,
    Deny,
    /// Undecidable without a concrete record, or conflicting per column.
    Mixed,
}

impl From<PermBit> for PermValue {
    fn from(bit: PermBit) -> Self {
        match bit {
            PermBit::Allow => PermValue::Allow,
            PermBit::Deny => PermValue::Deny,
        }
    }
}

/// The allow/deny bits one rule contributes; unset axes are untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialPermissionSet {
    bits: BTreeMap<AccessAxis, PermBit>,
}

impl PartialPermissionSet {
    pub fn set(mut self, axis: AccessAxis, bit: PermBit) -> Self {
        self.bits.insert(axis, bit);
        self
    }

    pub fn get(&self, axis: AccessAxis) -> Option<PermBit> {
        self.bits.get(&axis).copied()
    }

    pub fn axes(&self) -> impl Iterator<Item = (AccessAxis, PermBit)> + '_ {
        self.bits.iter().map(|(a, b)| (*a, *b))
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn denies_any(&self) -> bool {
        self.bits.values().any(|bit| *bit == PermBit::Deny)
    }

    /// Parse the `+RU-CD` permission text. `all` and `none` are shorthands
    /// for allowing or denying every axis.
    pub fn parse(text: &str) -> Result<PartialPermissionSet, RuleError> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("all") {
            let mut out = PartialPermissionSet::default();
            for axis in AccessAxis::ALL {
                out.bits.insert(axis, PermBit::Allow);
            }
            return Ok(out);
        }
        if text.eq_ignore_ascii_case("none") {
            let mut out = PartialPermissionSet::default();
            for axis in AccessAxis::ALL {
                out.bits.insert(axis, PermBit::Deny);
            }
            return Ok(out);
        }
        let mut out = PartialPermissionSet::default();
        let mut sign: Option<PermBit> = None;
        for c in text.chars() {
            match c {
                '+' => sign = Some(PermBit::Allow),
                '-' => sign = Some(PermBit::Deny),
                c if c.is_whitespace() => {}
                c => {
                    let axis = AccessAxis::from_short(c).ok_or_else(|| {
                        RuleError::BadPermissions(format!("unknown permission flag {c:?}"))
                    })?;
                    let bit = sign.ok_or_else(|| {
                        RuleError::BadPermissions(format!("flag {c:?} before any +/- sign"))
                    })?;
                    out.bits.insert(axis, bit);
                }
            }
        }
        Ok(out)
    }

    pub fn to_text(&self) -> String {
        let mut allow = String::new();
        let mut deny = String::new();
        for axis in AccessAxis::ALL {
            let short = match axis {
                AccessAxis::Read => 'R',
                AccessAxis::Update => 'U',
                AccessAxis::Create => 'C',
                AccessAxis::Delete => 'D',
                AccessAxis::SchemaEdit => 'S',
            };
            match self.bits.get(&axis) {
                Some(PermBit::Allow) => allow.push(short),
                Some(PermBit::Deny) => deny.push(short),
                None => {}
            }
        }
        let mut out = String::new();
        if !allow.is_empty() {
            out.push('+');
            out.push_str(&allow);
        }
        if !deny.is_empty() {
            out.push('-');
            out.push_str(&deny);
        }
        out
    }
}

/// A fully resolved five-axis verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionSet {
    pub read: PermValue,
    pub update: PermValue,
    pub create: PermValue,
    pub delete: PermValue,
    pub schema_edit: PermValue,
}

impl PermissionSet {
    pub fn uniform(value: PermValue) -> Self {
        Self {
            read: value,
            update: value,
            create: value,
            delete: value,
            schema_edit: value,
        }
    }

    pub fn get(&self, axis: AccessAxis) -> PermValue {
        match axis {
            AccessAxis::Read => self.read,
            AccessAxis::Update => self.update,
            AccessAxis::Create => self.create,
            AccessAxis::Delete => self.delete,
            AccessAxis::SchemaEdit => self.schema_edit,
        }
    }

    pub fn set(&mut self, axis: AccessAxis, value: PermValue) {
        match axis {
            AccessAxis::Read => self.read = value,
            AccessAxis::Update => self.update = value,
            AccessAxis::Create => self.create = value,
            AccessAxis::Delete => self.delete = value,
            AccessAxis::SchemaEdit => self.schema_edit = value,
        }
    }
}

/// What produced a permission set, for dispatch and error surfacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleType {
    Default,
    Table,
    Column,
    Row,
    Special,
}

/// A resolved set together with its provenance and any denial memos.
#[derive(Debug, Clone)]
pub struct PermissionSetWithContext {
    pub perms: PermissionSet,
    pub rule_type: RuleType,
    /// Memos of rules that contributed a deny or mixed bit, per axis.
    pub memos: BTreeMap<AccessAxis, Vec<String>>,
}

impl PermissionSetWithContext {
    pub fn new(perms: PermissionSet, rule_type: RuleType) -> Self {
        Self { perms, rule_type, memos: BTreeMap::new() }
    }

    pub fn memos_for(&self, axis: AccessAxis) -> &[String] {
        self.memos.get(&axis).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Accumulates rule deltas in order; the first explicit contribution wins
/// per axis.
#[derive(Debug, Default)]
pub struct PermissionMerge {
    slots: BTreeMap<AccessAxis, PermValue>,
    memos: BTreeMap<AccessAxis, Vec<String>>,
}

impl PermissionMerge {
    /// Absorb a matching rule's bits.
    pub fn absorb(&mut self, delta: &PartialPermissionSet, memo: Option<&str>) {
        for (axis, bit) in delta.axes() {
            let entry = self.slots.entry(axis);
            if let std::collections::btree_map::Entry::Vacant(slot) = entry {
                slot.insert(bit.into());
                if bit == PermBit::Deny {
                    if let Some(memo) = memo {
                        self.memos.entry(axis).or_default().push(memo.to_string());
                    }
                }
            }
        }
    }

    /// Absorb a rule whose predicate needs a record to evaluate: every axis
    /// it touches becomes per-row.
    pub fn absorb_row_dependent(&mut self, delta: &PartialPermissionSet, memo: Option<&str>) {
        for (axis, _bit) in delta.axes() {
            let entry = self.slots.entry(axis);
            if let std::collections::btree_map::Entry::Vacant(slot) = entry {
                slot.insert(PermValue::Mixed);
                if let Some(memo) = memo {
                    self.memos.entry(axis).or_default().push(memo.to_string());
                }
            }
        }
    }

    pub fn resolved(&self, axis: AccessAxis) -> Option<PermValue> {
        self.slots.get(&axis).copied()
    }

    pub fn is_complete(&self) -> bool {
        AccessAxis::ALL.iter().all(|axis| self.slots.contains_key(axis))
    }

    /// Fill the axes no rule decided from the role defaults.
    pub fn finalize(self, defaults: &PermissionSet, rule_type: RuleType) -> PermissionSetWithContext {
        let mut perms = *defaults;
        for (axis, value) in &self.slots {
            perms.set(*axis, *value);
        }
        PermissionSetWithContext { perms, rule_type, memos: self.memos }
    }
}
