pub mod launcher;
pub mod recipe_main;

pub use launcher::WorkerLauncher;
pub use recipe_main::RecipeMain;
