use std::collections::HashMap;
use std::fmt;
use std::ops::BitOr;

use super::attrs::AttrMask;
use super::status::StatusManager;
use super::value::ValueType;

/// Criterion a comparison tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Criterion {
    Tree,
    Path,
    Name,
    IName,
    Type,
    Owner,
    Group,
    Size,
    Depth,
    DirCount,
    LastAccess,
    LastMod,
    LastMdChange,
    Creation,
    RmTime,
    Pool,
    OstIndex,
    FileClass,
    Status,
    Xattr,
    SmInfo,
}

/// Validation flags attached to a criterion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CriteriaFlags(u16);

impl CriteriaFlags {
    pub const NONE: CriteriaFlags = CriteriaFlags(0);
    /// Accepts ordering comparators.
    pub const COMPARABLE: CriteriaFlags = CriteriaFlags(1 << 0);
    pub const POSITIVE: CriteriaFlags = CriteriaFlags(1 << 1);
    pub const NOT_EMPTY: CriteriaFlags = CriteriaFlags(1 << 2);
    pub const NO_SLASH: CriteriaFlags = CriteriaFlags(1 << 3);
    /// `**` allowed.
    pub const ALLOW_ANY_DEPTH: CriteriaFlags = CriteriaFlags(1 << 4);
    pub const REMOVE_FINAL_SLASH: CriteriaFlags = CriteriaFlags(1 << 5);
    pub const XATTR: CriteriaFlags = CriteriaFlags(1 << 6);
    /// Needs a status manager at compile time.
    pub const STATUS: CriteriaFlags = CriteriaFlags(1 << 7);
    pub const NO_WILDCARDS: CriteriaFlags = CriteriaFlags(1 << 8);
    pub const CASE_INSENSITIVE: CriteriaFlags = CriteriaFlags(1 << 9);
    pub const NOT_ZERO: CriteriaFlags = CriteriaFlags(1 << 10);

    #[must_use]
    pub fn contains(self, other: CriteriaFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CriteriaFlags {
    type Output = CriteriaFlags;

    fn bitor(self, rhs: CriteriaFlags) -> CriteriaFlags {
        CriteriaFlags(self.0 | rhs.0)
    }
}

/// Static description of a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriteriaDescriptor {
    pub name: &'static str,
    pub criterion: Criterion,
    pub attribute: AttrMask,
    pub value_type: ValueType,
    pub flags: CriteriaFlags,
}

const fn desc(
    name: &'static str,
    criterion: Criterion,
    attribute: AttrMask,
    value_type: ValueType,
    flags: CriteriaFlags,
) -> CriteriaDescriptor {
    CriteriaDescriptor {
        name,
        criterion,
        attribute,
        value_type,
        flags,
    }
}

const fn flags(bits: &[CriteriaFlags]) -> CriteriaFlags {
    let mut out = 0;
    let mut i = 0;
    while i < bits.len() {
        out |= bits[i].0;
        i += 1;
    }
    CriteriaFlags(out)
}

use CriteriaFlags as F;

const PATH_FLAGS: CriteriaFlags = flags(&[F::ALLOW_ANY_DEPTH, F::NOT_EMPTY, F::REMOVE_FINAL_SLASH]);
const ORDERED_FLAGS: CriteriaFlags = flags(&[F::POSITIVE, F::COMPARABLE]);

static STATIC_CRITERIA: [CriteriaDescriptor; 19] = [
    desc("tree", Criterion::Tree, AttrMask::FULLPATH, ValueType::String, PATH_FLAGS),
    desc("path", Criterion::Path, AttrMask::FULLPATH, ValueType::String, PATH_FLAGS),
    desc(
        "name",
        Criterion::Name,
        AttrMask::NAME,
        ValueType::String,
        flags(&[F::NOT_EMPTY, F::NO_SLASH]),
    ),
    desc(
        "iname",
        Criterion::IName,
        AttrMask::NAME,
        ValueType::String,
        flags(&[F::NOT_EMPTY, F::NO_SLASH, F::CASE_INSENSITIVE]),
    ),
    desc("type", Criterion::Type, AttrMask::TYPE, ValueType::Type, F::NONE),
    desc("owner", Criterion::Owner, AttrMask::OWNER, ValueType::String, F::NOT_EMPTY),
    desc("group", Criterion::Group, AttrMask::GROUP, ValueType::String, F::NOT_EMPTY),
    desc("size", Criterion::Size, AttrMask::SIZE, ValueType::Size, ORDERED_FLAGS),
    desc("depth", Criterion::Depth, AttrMask::DEPTH, ValueType::Integer, ORDERED_FLAGS),
    desc("dircount", Criterion::DirCount, AttrMask::DIRCOUNT, ValueType::Integer, ORDERED_FLAGS),
    desc(
        "last_access",
        Criterion::LastAccess,
        AttrMask::LAST_ACCESS,
        ValueType::Duration,
        ORDERED_FLAGS,
    ),
    desc("last_mod", Criterion::LastMod, AttrMask::LAST_MOD, ValueType::Duration, ORDERED_FLAGS),
    desc(
        "last_mdchange",
        Criterion::LastMdChange,
        AttrMask::LAST_MDCHANGE,
        ValueType::Duration,
        ORDERED_FLAGS,
    ),
    desc("creation", Criterion::Creation, AttrMask::CREATION, ValueType::Duration, ORDERED_FLAGS),
    desc(
        "rm_time",
        Criterion::RmTime,
        AttrMask::RM_TIME,
        ValueType::Duration,
        flags(&[F::POSITIVE, F::COMPARABLE, F::STATUS]),
    ),
    desc("ost_pool", Criterion::Pool, AttrMask::POOL, ValueType::String, F::NONE),
    desc("ost_index", Criterion::OstIndex, AttrMask::OST_INDICES, ValueType::Integer, F::POSITIVE),
    desc("fileclass", Criterion::FileClass, AttrMask::FILECLASS, ValueType::String, F::NO_SLASH),
    desc(
        "status",
        Criterion::Status,
        AttrMask::STATUS,
        ValueType::String,
        flags(&[F::STATUS, F::NO_WILDCARDS]),
    ),
];

/// Criterion resolved from a name: either a static descriptor or a dynamic one
/// (extended attribute, status-manager attribute).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCriterion {
    pub criterion: Criterion,
    pub attribute: AttrMask,
    pub value_type: ValueType,
    pub flags: CriteriaFlags,
    /// Attribute name for `xattr.<name>` and status-manager attributes.
    pub attr_name: Option<String>,
}

impl From<&CriteriaDescriptor> for ResolvedCriterion {
    fn from(d: &CriteriaDescriptor) -> Self {
        Self {
            criterion: d.criterion,
            attribute: d.attribute,
            value_type: d.value_type,
            flags: d.flags,
            attr_name: None,
        }
    }
}

/// Result of a catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(ResolvedCriterion),
    /// No criterion has this name in the current context.
    NoSuchCriterion,
}

pub(crate) const XATTR_PREFIX: &str = "xattr.";

/// Mapping from criterion name (case-insensitive) to descriptor.
#[derive(Debug, Clone)]
pub struct CriteriaCatalog {
    by_name: HashMap<&'static str, usize>,
}

impl Default for CriteriaCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl CriteriaCatalog {
    #[must_use]
    pub fn new() -> Self {
        let by_name = STATIC_CRITERIA
            .iter()
            .enumerate()
            .map(|(i, d)| (d.name, i))
            .collect();
        Self { by_name }
    }

    /// Static descriptors in table order.
    pub fn descriptors(&self) -> impl Iterator<Item = &'static CriteriaDescriptor> {
        STATIC_CRITERIA.iter()
    }

    /// Resolve `name` against the static table, the `xattr.` prefix and the
    /// attributes of `status`.
    ///
    /// Status-scoped criteria resolve only when a status manager is supplied, and
    /// `rm_time` only when that manager tracks removed entries.
    #[must_use]
    pub fn lookup(&self, name: &str, status: Option<&dyn StatusManager>) -> Lookup {
        let lower = name.to_ascii_lowercase();

        if let Some(attr) = lower.strip_prefix(XATTR_PREFIX) {
            if attr.is_empty() {
                return Lookup::NoSuchCriterion;
            }
            return Lookup::Found(ResolvedCriterion {
                criterion: Criterion::Xattr,
                attribute: AttrMask::EMPTY,
                value_type: ValueType::String,
                flags: CriteriaFlags::XATTR,
                attr_name: Some(name[XATTR_PREFIX.len()..].to_owned()),
            });
        }

        if let Some(&idx) = self.by_name.get(lower.as_str()) {
            let d = &STATIC_CRITERIA[idx];
            if d.flags.contains(CriteriaFlags::STATUS) {
                match status {
                    None => return Lookup::NoSuchCriterion,
                    Some(sm) if d.criterion == Criterion::RmTime && !sm.manages_deleted() => {
                        return Lookup::NoSuchCriterion;
                    }
                    Some(sm) => {
                        let mut resolved = ResolvedCriterion::from(d);
                        if d.criterion == Criterion::Status {
                            resolved.attr_name = Some(sm.name().to_owned());
                        }
                        return Lookup::Found(resolved);
                    }
                }
            }
            return Lookup::Found(d.into());
        }

        if let Some(def) = status.and_then(|sm| sm.resolve_status_attr(name)) {
            let flags = if def.value_type.is_numeric() {
                CriteriaFlags::COMPARABLE
            } else {
                CriteriaFlags::NONE
            };
            return Lookup::Found(ResolvedCriterion {
                criterion: Criterion::SmInfo,
                attribute: AttrMask::SM_INFO,
                value_type: def.value_type,
                flags,
                attr_name: Some(def.name),
            });
        }

        Lookup::NoSuchCriterion
    }
}

impl Criterion {
    /// Canonical name used when rendering conditions.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Criterion::Xattr => "xattr",
            Criterion::SmInfo => "sm_info",
            other => STATIC_CRITERIA
                .iter()
                .find(|d| d.criterion == other)
                .map_or("?", |d| d.name),
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
