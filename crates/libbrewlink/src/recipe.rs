use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use brewlink_protocol::{ProtocolError, RecipeStep};
use serde::Deserialize;

use crate::error::BrewError;

/// Resolves a recipe reference to its ordered step list. Read-only.
pub trait RecipeBook: Send + Sync {
    fn steps(&self, reference: &str) -> Result<Vec<RecipeStep>, BrewError>;
}

/// Recipe references name files, so they must not be able to walk paths.
pub fn validate_reference(reference: &str) -> Result<(), BrewError> {
    let valid = !reference.is_empty()
        && reference.len() <= 128
        && !reference.starts_with('.')
        && !reference.contains(['/', '\\'])
        && !reference.chars().any(char::is_control);
    if valid {
        Ok(())
    } else {
        Err(ProtocolError::InvalidField {
            field: "recipe",
            reason: "not a valid recipe reference".to_string(),
        }
        .into())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RecipeFile {
    Steps(Vec<RecipeStep>),
    Named { steps: Vec<RecipeStep> },
}

/// Recipes stored as `<dir>/<reference>.json`: either a bare array of steps
/// or an object with a `steps` array.
pub struct DirRecipeBook {
    dir: PathBuf,
}

impl DirRecipeBook {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl RecipeBook for DirRecipeBook {
    fn steps(&self, reference: &str) -> Result<Vec<RecipeStep>, BrewError> {
        validate_reference(reference)?;
        let path = self.dir.join(format!("{reference}.json"));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BrewError::NotFound(format!("recipe {reference}")));
            }
            Err(e) => {
                return Err(BrewError::Recipe(format!("{}: {e}", path.display())));
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(RecipeFile::Steps(steps)) | Ok(RecipeFile::Named { steps }) => Ok(steps),
            Err(e) => Err(BrewError::Recipe(format!("{}: {e}", path.display()))),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct StaticRecipeBook {
    recipes: HashMap<String, Vec<RecipeStep>>,
}

impl StaticRecipeBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<String>, steps: Vec<RecipeStep>) -> Self {
        self.recipes.insert(reference.into(), steps);
        self
    }
}

impl RecipeBook for StaticRecipeBook {
    fn steps(&self, reference: &str) -> Result<Vec<RecipeStep>, BrewError> {
        self.recipes
            .get(reference)
            .cloned()
            .ok_or_else(|| BrewError::NotFound(format!("recipe {reference}")))
    }
}
