// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::builtin;
use super::recipe::{CalibRequirement, Recipe};
use crate::config::Instrument;
use crate::errors::RecipeArgError;

/// Recipes of one instrument, by name.
#[derive(Clone, Default)]
pub struct RecipeRegistry {
    instrument: String,
    recipes: BTreeMap<String, Arc<Recipe>>,
}

impl RecipeRegistry {
    pub fn new(instrument: &str) -> Self {
        Self {
            instrument: instrument.to_string(),
            recipes: BTreeMap::new(),
        }
    }

    /// Every built-in recipe of `instrument`.
    pub fn builtin(instrument: &Instrument) -> Self {
        let mut registry = Self::new(&instrument.name);
        builtin::register_all(&mut registry, instrument);
        registry
    }

    /// Register a recipe, replacing any recipe of the same name.
    pub fn register(&mut self, recipe: Recipe) -> Arc<Recipe> {
        let recipe = Arc::new(recipe);
        self.recipes
            .insert(recipe.name.clone(), Arc::clone(&recipe));
        recipe
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn get(&self, name: &str) -> Result<Arc<Recipe>, RecipeArgError> {
        self.recipes
            .get(name)
            .cloned()
            .ok_or_else(|| RecipeArgError::UnknownRecipe(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.recipes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Recipe>> {
        self.recipes.values()
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }

    /// Recipes with an output satisfying `requirement`.
    pub fn producers<'a>(
        &'a self,
        requirement: &'a CalibRequirement,
    ) -> impl Iterator<Item = &'a Arc<Recipe>> + 'a {
        self.recipes.values().filter(move |r| r.produces(requirement))
    }
}

impl fmt::Debug for RecipeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecipeRegistry")
            .field("instrument", &self.instrument)
            .field("recipes", &self.recipes.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_recipe() {
        let registry = RecipeRegistry::new("SPIROU");
        assert!(registry.is_empty());
        assert_eq!(
            registry.get("apero_nothing").unwrap_err(),
            RecipeArgError::UnknownRecipe("apero_nothing".into())
        );
    }

    #[test]
    fn test_producers_follow_outputs() {
        let instrument = Instrument::builtin("SPIROU").unwrap();
        let registry = RecipeRegistry::builtin(&instrument);
        assert_eq!(registry.instrument(), "SPIROU");

        let wave = CalibRequirement::calib("WAVE", Some("AB"));
        let producers: Vec<&str> = registry.producers(&wave).map(|r| r.name.as_str()).collect();
        assert_eq!(producers, vec!["apero_wave"]);

        let trans = CalibRequirement::telluric("TELLU_TRANS", Some("AB"), false);
        let producers: Vec<&str> = registry.producers(&trans).map(|r| r.name.as_str()).collect();
        assert_eq!(producers, vec!["apero_mk_tellu"]);

        let badpix = CalibRequirement::calib("BADPIX", None);
        assert_eq!(registry.producers(&badpix).count(), 1);
    }
}
