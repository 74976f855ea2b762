use crate::errors::RecipeError;
use crate::recipes::RecipeContext;

/// The body of a recipe.
///
/// Runs inside a worker with its arguments bound and its calibrations
/// resolved. Products go through [`RecipeContext::write_output`]; the body
/// never writes to a database.
pub trait RecipeMain: Send + Sync {
    fn run(&self, ctx: &mut RecipeContext) -> Result<(), RecipeError>;
}

impl<F> RecipeMain for F
where
    F: Fn(&mut RecipeContext) -> Result<(), RecipeError> + Send + Sync,
{
    fn run(&self, ctx: &mut RecipeContext) -> Result<(), RecipeError> {
        self(ctx)
    }
}
