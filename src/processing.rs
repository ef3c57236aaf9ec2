pub mod color_matrix;
pub mod filters;
pub mod geometry;
pub mod imaging;
pub mod layout;
