use std::collections::HashMap;
use std::error::Error;
use std::fs;
use std::path::Path;

use super::BlockId;
use super::config::{BlockDef, BlocksConfig};

/// Compiled voxel type.
#[derive(Debug, Clone)]
pub struct BlockType {
    pub name: String,
    pub solid: bool,
    pub transparent: bool,
}

/// Registry of voxel types indexed by id. Ids are dense `u8` slots; unused
/// slots between explicit ids stay empty and are reported as unknown.
#[derive(Default, Debug, Clone)]
pub struct BlockRegistry {
    blocks: Vec<Option<BlockType>>,
    by_name: HashMap<String, BlockId>,
}

/// Minimal built-in set used by tests and the demo when no config is given.
const BUILTIN_BLOCKS_TOML: &str = r#"
[[blocks]]
name = "air"
id = 0
solid = false

[[blocks]]
name = "stone"
id = 1
solid = true

[[blocks]]
name = "glass"
id = 2
solid = true
transparent = true
"#;

impl BlockRegistry {
    pub fn builtin() -> Self {
        // The built-in config is a constant; a parse failure is a programming error.
        Self::from_toml_str(BUILTIN_BLOCKS_TOML).expect("built-in block config")
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, Box<dyn Error>> {
        let cfg: BlocksConfig = toml::from_str(text)?;
        Self::from_configs(cfg)
    }

    pub fn from_configs(cfg: BlocksConfig) -> Result<Self, Box<dyn Error>> {
        let mut reg = BlockRegistry::default();
        for def in cfg.blocks.into_iter() {
            reg.insert(def)?;
        }
        Ok(reg)
    }

    fn insert(&mut self, def: BlockDef) -> Result<(), Box<dyn Error>> {
        let id = match def.id {
            Some(id) => id,
            None => {
                let next = self.blocks.iter().position(|slot| slot.is_none());
                match next {
                    Some(slot) => slot as u8,
                    None => u8::try_from(self.blocks.len())
                        .map_err(|_| format!("no free id for block '{}'", def.name))?,
                }
            }
        };
        if self.get(id).is_some() {
            return Err(format!("duplicate block id {} ('{}')", id, def.name).into());
        }
        if self.by_name.contains_key(&def.name) {
            return Err(format!("duplicate block name '{}'", def.name).into());
        }
        let solid = def.solid.unwrap_or(true);
        let transparent = def.transparent.unwrap_or(!solid);
        if self.blocks.len() <= id as usize {
            self.blocks.resize(id as usize + 1, None);
        }
        self.by_name.insert(def.name.clone(), id);
        self.blocks[id as usize] = Some(BlockType {
            name: def.name,
            solid,
            transparent,
        });
        Ok(())
    }

    #[inline]
    pub fn get(&self, id: BlockId) -> Option<&BlockType> {
        self.blocks.get(id as usize).and_then(|slot| slot.as_ref())
    }

    pub fn id_by_name(&self, name: &str) -> Option<BlockId> {
        self.by_name.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
