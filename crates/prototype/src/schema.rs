use glam::IVec2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Opaque per-component parameter blob. Key order is preserved.
pub type ComponentParams = serde_json::Map<String, serde_json::Value>;

/// On-disk template record. Field names are the wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default)]
    pub components: Vec<ComponentDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snap: Option<Vec<String>>,
}

/// One entry of a template's `components` list: a `type` discriminator plus
/// arbitrary type-specific parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentDef {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub params: ComponentParams,
}

/// Placement metadata used by the (external) placement subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub mode: String,
    pub range: i32,
    pub offset: IVec2,
    pub nodes: Vec<i32>,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            mode: "PlaceNearby".into(),
            range: 200,
            offset: IVec2::ZERO,
            nodes: Vec::new(),
        }
    }
}

/// Snap behaviour bitmask, built from the template's list of flag names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapFlags(u32);

impl SnapFlags {
    pub const NONE: SnapFlags = SnapFlags(0);
    pub const GRID: SnapFlags = SnapFlags(1 << 0);
    pub const CENTER: SnapFlags = SnapFlags(1 << 1);
    pub const EDGE: SnapFlags = SnapFlags(1 << 2);
    pub const NODE: SnapFlags = SnapFlags(1 << 3);
    pub const ROTATE: SnapFlags = SnapFlags(1 << 4);

    const NAMED: [(&'static str, SnapFlags); 5] = [
        ("Grid", SnapFlags::GRID),
        ("Center", SnapFlags::CENTER),
        ("Edge", SnapFlags::EDGE),
        ("Node", SnapFlags::NODE),
        ("Rotate", SnapFlags::ROTATE),
    ];

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: SnapFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Look up a single flag by name, ignoring case.
    pub fn from_name(name: &str) -> Option<SnapFlags> {
        Self::NAMED
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, f)| *f)
    }

    /// Combine flag names into a mask. Unknown names are logged and skipped.
    pub fn from_names<'a>(names: impl IntoIterator<Item = &'a str>) -> SnapFlags {
        let mut flags = SnapFlags::NONE;
        for name in names {
            match Self::from_name(name) {
                Some(flag) => flags |= flag,
                None => tracing::warn!(flag = name, "ignoring unknown snap flag"),
            }
        }
        flags
    }
}

impl BitOr for SnapFlags {
    type Output = SnapFlags;

    fn bitor(self, rhs: SnapFlags) -> SnapFlags {
        SnapFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for SnapFlags {
    fn bitor_assign(&mut self, rhs: SnapFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for SnapFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMED
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(n, _)| *n)
            .collect();
        if names.is_empty() {
            f.write_str("None")
        } else {
            f.write_str(&names.join("|"))
        }
    }
}
