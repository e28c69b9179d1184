use serde::Deserialize;

/// One voxel type definition as read from TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockDef {
    pub name: String,
    /// Explicit id; defaults to the next free slot.
    pub id: Option<u8>,
    /// Defaults to true.
    pub solid: Option<bool>,
    /// Whether light passes through faces of this type. Defaults to `!solid`.
    pub transparent: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlocksConfig {
    pub blocks: Vec<BlockDef>,
}
