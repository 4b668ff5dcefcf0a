mod activity;
mod enrollment;
mod learning_path;
mod module_progress;
mod points;
mod quiz;
mod streak;
mod user;

pub use activity::*;
pub use enrollment::*;
pub use learning_path::*;
pub use module_progress::*;
pub use points::*;
pub use quiz::*;
pub use streak::*;
pub use user::*;
