use std::collections::HashMap;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use super::value::ObjectType;

/// Bitmask of the entry attributes an expression needs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct AttrMask(u32);

impl AttrMask {
    pub const EMPTY: AttrMask = AttrMask(0);
    pub const FULLPATH: AttrMask = AttrMask(1 << 0);
    pub const NAME: AttrMask = AttrMask(1 << 1);
    pub const TYPE: AttrMask = AttrMask(1 << 2);
    pub const OWNER: AttrMask = AttrMask(1 << 3);
    pub const GROUP: AttrMask = AttrMask(1 << 4);
    pub const SIZE: AttrMask = AttrMask(1 << 5);
    pub const DEPTH: AttrMask = AttrMask(1 << 6);
    pub const DIRCOUNT: AttrMask = AttrMask(1 << 7);
    pub const LAST_ACCESS: AttrMask = AttrMask(1 << 8);
    pub const LAST_MOD: AttrMask = AttrMask(1 << 9);
    pub const LAST_MDCHANGE: AttrMask = AttrMask(1 << 10);
    pub const CREATION: AttrMask = AttrMask(1 << 11);
    pub const RM_TIME: AttrMask = AttrMask(1 << 12);
    pub const POOL: AttrMask = AttrMask(1 << 13);
    pub const OST_INDICES: AttrMask = AttrMask(1 << 14);
    pub const FILECLASS: AttrMask = AttrMask(1 << 15);
    pub const STATUS: AttrMask = AttrMask(1 << 16);
    pub const SM_INFO: AttrMask = AttrMask(1 << 17);

    const NAMES: [(AttrMask, &'static str); 18] = [
        (AttrMask::FULLPATH, "fullpath"),
        (AttrMask::NAME, "name"),
        (AttrMask::TYPE, "type"),
        (AttrMask::OWNER, "owner"),
        (AttrMask::GROUP, "group"),
        (AttrMask::SIZE, "size"),
        (AttrMask::DEPTH, "depth"),
        (AttrMask::DIRCOUNT, "dircount"),
        (AttrMask::LAST_ACCESS, "last_access"),
        (AttrMask::LAST_MOD, "last_mod"),
        (AttrMask::LAST_MDCHANGE, "last_mdchange"),
        (AttrMask::CREATION, "creation_time"),
        (AttrMask::RM_TIME, "rm_time"),
        (AttrMask::POOL, "pool"),
        (AttrMask::OST_INDICES, "ost_indices"),
        (AttrMask::FILECLASS, "fileclass"),
        (AttrMask::STATUS, "status"),
        (AttrMask::SM_INFO, "sm_info"),
    ];

    #[must_use]
    pub fn contains(self, other: AttrMask) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bits set in `self` but not in `other`.
    #[must_use]
    pub fn difference(self, other: AttrMask) -> AttrMask {
        AttrMask(self.0 & !other.0)
    }
}

impl BitOr for AttrMask {
    type Output = AttrMask;

    fn bitor(self, rhs: AttrMask) -> AttrMask {
        AttrMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for AttrMask {
    fn bitor_assign(&mut self, rhs: AttrMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for AttrMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (bit, name) in Self::NAMES {
            if self.contains(bit) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Identifier of the entry being evaluated, used in diagnostics and handed to
/// collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntryId(String);

impl EntryId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attribute selector passed to an [`AttributeProvider`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind<'a> {
    FullPath,
    Name,
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
    OstIndices,
    FileClass,
    /// Current status for the named status manager.
    Status(&'a str),
    /// Status-manager specific attribute.
    SmInfo(&'a str),
}

impl AttrKind<'_> {
    #[must_use]
    pub fn mask(self) -> AttrMask {
        match self {
            AttrKind::FullPath => AttrMask::FULLPATH,
            AttrKind::Name => AttrMask::NAME,
            AttrKind::Type => AttrMask::TYPE,
            AttrKind::Owner => AttrMask::OWNER,
            AttrKind::Group => AttrMask::GROUP,
            AttrKind::Size => AttrMask::SIZE,
            AttrKind::Depth => AttrMask::DEPTH,
            AttrKind::DirCount => AttrMask::DIRCOUNT,
            AttrKind::LastAccess => AttrMask::LAST_ACCESS,
            AttrKind::LastMod => AttrMask::LAST_MOD,
            AttrKind::LastMdChange => AttrMask::LAST_MDCHANGE,
            AttrKind::Creation => AttrMask::CREATION,
            AttrKind::RmTime => AttrMask::RM_TIME,
            AttrKind::Pool => AttrMask::POOL,
            AttrKind::OstIndices => AttrMask::OST_INDICES,
            AttrKind::FileClass => AttrMask::FILECLASS,
            AttrKind::Status(_) => AttrMask::STATUS,
            AttrKind::SmInfo(_) => AttrMask::SM_INFO,
        }
    }
}

impl fmt::Display for AttrKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrKind::Status(sm) => write!(f, "{sm}.status"),
            AttrKind::SmInfo(name) => f.write_str(name),
            other => write!(f, "{}", other.mask()),
        }
    }
}

/// Borrowed attribute value returned by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrValue<'a> {
    Str(&'a str),
    Uint(u64),
    Int(i64),
    /// Seconds since the epoch. Zero means "never set".
    Time(i64),
    Type(ObjectType),
    Indices(&'a [u32]),
}

/// Owned value of a status-manager specific attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmValue {
    Text(String),
    Int(i64),
    Size(u64),
    Time(i64),
    Type(ObjectType),
}

impl SmValue {
    fn as_attr(&self) -> AttrValue<'_> {
        match self {
            SmValue::Text(s) => AttrValue::Str(s),
            SmValue::Int(v) => AttrValue::Int(*v),
            SmValue::Size(v) => AttrValue::Uint(*v),
            SmValue::Time(v) => AttrValue::Time(*v),
            SmValue::Type(t) => AttrValue::Type(*t),
        }
    }
}

/// Source of entry attributes consulted during evaluation.
pub trait AttributeProvider {
    /// Value of `kind` for this entry, or `None` when it is not available.
    fn get_attr(&self, kind: AttrKind<'_>) -> Option<AttrValue<'_>>;

    /// Attributes currently available.
    fn mask(&self) -> AttrMask;

    fn has(&self, kind: AttrKind<'_>) -> bool {
        self.get_attr(kind).is_some()
    }
}

/// In-memory attribute set, filled with builder-style setters.
///
/// ```
/// use fspolicy::{AttrSet, ObjectType};
///
/// let attrs = AttrSet::new()
///     .with_fullpath("/fs/home/a.tmp")
///     .with_type(ObjectType::File)
///     .with_size(4096);
/// assert_eq!(attrs.size(), Some(4096));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttrSet {
    fullpath: Option<String>,
    name: Option<String>,
    object_type: Option<ObjectType>,
    owner: Option<String>,
    group: Option<String>,
    size: Option<u64>,
    depth: Option<u32>,
    dircount: Option<u32>,
    last_access: Option<i64>,
    last_mod: Option<i64>,
    last_mdchange: Option<i64>,
    creation: Option<i64>,
    rm_time: Option<i64>,
    pool: Option<String>,
    ost_indices: Option<Vec<u32>>,
    fileclass: Option<String>,
    statuses: HashMap<String, String>,
    sm_info: HashMap<String, SmValue>,
}

impl AttrSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the full path. The name attribute is derived from it unless already set.
    #[must_use]
    pub fn with_fullpath(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        if self.name.is_none() {
            let base = path.rsplit('/').next().unwrap_or(&path);
            if !base.is_empty() {
                self.name = Some(base.to_owned());
            }
        }
        self.fullpath = Some(path);
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_type(mut self, t: ObjectType) -> Self {
        self.object_type = Some(t);
        self
    }

    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    #[must_use]
    pub fn with_dircount(mut self, count: u32) -> Self {
        self.dircount = Some(count);
        self
    }

    #[must_use]
    pub fn with_last_access(mut self, t: i64) -> Self {
        self.last_access = Some(t);
        self
    }

    #[must_use]
    pub fn with_last_mod(mut self, t: i64) -> Self {
        self.last_mod = Some(t);
        self
    }

    #[must_use]
    pub fn with_last_mdchange(mut self, t: i64) -> Self {
        self.last_mdchange = Some(t);
        self
    }

    #[must_use]
    pub fn with_creation(mut self, t: i64) -> Self {
        self.creation = Some(t);
        self
    }

    #[must_use]
    pub fn with_rm_time(mut self, t: i64) -> Self {
        self.rm_time = Some(t);
        self
    }

    #[must_use]
    pub fn with_pool(mut self, pool: impl Into<String>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    #[must_use]
    pub fn with_ost_indices(mut self, indices: impl Into<Vec<u32>>) -> Self {
        self.ost_indices = Some(indices.into());
        self
    }

    #[must_use]
    pub fn with_fileclass(mut self, classes: impl Into<String>) -> Self {
        self.fileclass = Some(classes.into());
        self
    }

    #[must_use]
    pub fn with_status(mut self, manager: &str, status: impl Into<String>) -> Self {
        self.statuses.insert(manager.to_owned(), status.into());
        self
    }

    #[must_use]
    pub fn with_sm_info(mut self, attr: &str, value: SmValue) -> Self {
        self.sm_info.insert(attr.to_owned(), value);
        self
    }

    /// Replace (or clear) the class membership attribute.
    pub fn set_fileclass(&mut self, classes: Option<String>) {
        self.fileclass = classes;
    }

    #[must_use]
    pub fn fullpath(&self) -> Option<&str> {
        self.fullpath.as_deref()
    }

    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    #[must_use]
    pub fn object_type(&self) -> Option<ObjectType> {
        self.object_type
    }

    #[must_use]
    pub fn fileclass(&self) -> Option<&str> {
        self.fileclass.as_deref()
    }

    /// Attributes of `needed` that this set cannot provide.
    #[must_use]
    pub fn missing(&self, needed: AttrMask) -> AttrMask {
        needed.difference(AttributeProvider::mask(self))
    }

    /// Fill every attribute unset in `self` from `older`.
    #[must_use]
    pub fn merged_with(mut self, older: &AttrSet) -> Self {
        fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(from);
            }
        }
        fill(&mut self.fullpath, &older.fullpath);
        fill(&mut self.name, &older.name);
        fill(&mut self.object_type, &older.object_type);
        fill(&mut self.owner, &older.owner);
        fill(&mut self.group, &older.group);
        fill(&mut self.size, &older.size);
        fill(&mut self.depth, &older.depth);
        fill(&mut self.dircount, &older.dircount);
        fill(&mut self.last_access, &older.last_access);
        fill(&mut self.last_mod, &older.last_mod);
        fill(&mut self.last_mdchange, &older.last_mdchange);
        fill(&mut self.creation, &older.creation);
        fill(&mut self.rm_time, &older.rm_time);
        fill(&mut self.pool, &older.pool);
        fill(&mut self.ost_indices, &older.ost_indices);
        fill(&mut self.fileclass, &older.fileclass);
        for (k, v) in &older.statuses {
            self.statuses.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &older.sm_info {
            self.sm_info.entry(k.clone()).or_insert_with(|| v.clone());
        }
        self
    }
}

impl AttributeProvider for AttrSet {
    fn get_attr(&self, kind: AttrKind<'_>) -> Option<AttrValue<'_>> {
        match kind {
            AttrKind::FullPath => self.fullpath.as_deref().map(AttrValue::Str),
            AttrKind::Name => self.name.as_deref().map(AttrValue::Str),
            AttrKind::Type => self.object_type.map(AttrValue::Type),
            AttrKind::Owner => self.owner.as_deref().map(AttrValue::Str),
            AttrKind::Group => self.group.as_deref().map(AttrValue::Str),
            AttrKind::Size => self.size.map(AttrValue::Uint),
            AttrKind::Depth => self.depth.map(|v| AttrValue::Int(i64::from(v))),
            AttrKind::DirCount => self.dircount.map(|v| AttrValue::Int(i64::from(v))),
            AttrKind::LastAccess => self.last_access.map(AttrValue::Time),
            AttrKind::LastMod => self.last_mod.map(AttrValue::Time),
            AttrKind::LastMdChange => self.last_mdchange.map(AttrValue::Time),
            AttrKind::Creation => self.creation.map(AttrValue::Time),
            AttrKind::RmTime => self.rm_time.map(AttrValue::Time),
            AttrKind::Pool => self.pool.as_deref().map(AttrValue::Str),
            AttrKind::OstIndices => self.ost_indices.as_deref().map(AttrValue::Indices),
            AttrKind::FileClass => self.fileclass.as_deref().map(AttrValue::Str),
            AttrKind::Status(sm) => self.statuses.get(sm).map(|s| AttrValue::Str(s)),
            AttrKind::SmInfo(name) => self.sm_info.get(name).map(SmValue::as_attr),
        }
    }

    fn mask(&self) -> AttrMask {
        let mut mask = AttrMask::EMPTY;
        let slots = [
            (self.fullpath.is_some(), AttrMask::FULLPATH),
            (self.name.is_some(), AttrMask::NAME),
            (self.object_type.is_some(), AttrMask::TYPE),
            (self.owner.is_some(), AttrMask::OWNER),
            (self.group.is_some(), AttrMask::GROUP),
            (self.size.is_some(), AttrMask::SIZE),
            (self.depth.is_some(), AttrMask::DEPTH),
            (self.dircount.is_some(), AttrMask::DIRCOUNT),
            (self.last_access.is_some(), AttrMask::LAST_ACCESS),
            (self.last_mod.is_some(), AttrMask::LAST_MOD),
            (self.last_mdchange.is_some(), AttrMask::LAST_MDCHANGE),
            (self.creation.is_some(), AttrMask::CREATION),
            (self.rm_time.is_some(), AttrMask::RM_TIME),
            (self.pool.is_some(), AttrMask::POOL),
            (self.ost_indices.is_some(), AttrMask::OST_INDICES),
            (self.fileclass.is_some(), AttrMask::FILECLASS),
            (!self.statuses.is_empty(), AttrMask::STATUS),
            (!self.sm_info.is_empty(), AttrMask::SM_INFO),
        ];
        for (present, bit) in slots {
            if present {
                mask |= bit;
            }
        }
        mask
    }
}
